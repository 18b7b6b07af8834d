use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info_span, warn, Instrument};

use crate::{ChangeEvent, ChangeFeed, ChangeKind, ChannelId, EqFilter, Gateway, GatewayConfig, GatewayError};

/// PostgREST-style HTTP gateway. Change channels are served by polling the
/// filtered table and diffing consecutive snapshots.
#[derive(Debug)]
pub struct RestGateway {
    inner: Arc<RestInner>,
    channels: Mutex<HashMap<ChannelId, AbortHandle>>,
}

#[derive(Debug)]
struct RestInner {
    client: reqwest::Client,
    url: Option<String>,
    access_key: Option<String>,
    limit: Semaphore,
    poll_interval: Duration,
    row_key_column: String,
}

/// Build the read URL for `table`, pushing the equality filter down.
pub fn select_url(base: &str, table: &str, filter: Option<&EqFilter>) -> Result<Url, GatewayError> {
    let raw = format!("{}/rest/v1/{table}", base.trim_end_matches('/'));
    let mut url = Url::parse(&raw).map_err(|err| GatewayError::Unavailable(format!("invalid store url {raw}: {err}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("select", "*");
        if let Some(filter) = filter {
            query.append_pair(&filter.column, &filter.operand());
        }
    }
    Ok(url)
}

/// Changes that turn `previous` into `current`, pairing rows by `key_column`.
pub fn diff_rows(table: &str, previous: &[Value], current: &[Value], key_column: &str) -> Vec<ChangeEvent> {
    let row_key = |row: &Value| {
        row.get(key_column)
            .map(|v| v.to_string())
            .unwrap_or_else(|| row.to_string())
    };

    let before: BTreeMap<String, &Value> = previous.iter().map(|row| (row_key(row), row)).collect();
    let mut seen = BTreeSet::new();
    let mut events = Vec::new();

    for row in current {
        let key = row_key(row);
        match before.get(&key) {
            Some(old) if *old != row => events.push(ChangeEvent::new(
                table,
                ChangeKind::Update,
                Some(row.clone()),
                Some((*old).clone()),
            )),
            Some(_) => {}
            None => events.push(ChangeEvent::new(table, ChangeKind::Insert, Some(row.clone()), None)),
        }
        seen.insert(key);
    }

    for row in previous {
        if !seen.contains(&row_key(row)) {
            events.push(ChangeEvent::new(table, ChangeKind::Delete, None, Some(row.clone())));
        }
    }

    events
}

impl RestGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            inner: Arc::new(RestInner {
                client,
                url: config.url,
                access_key: config.access_key,
                limit: Semaphore::new(config.max_concurrency.max(1)),
                poll_interval: config.poll_interval,
                row_key_column: config.row_key_column,
            }),
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(GatewayConfig::from_env())
    }

    pub fn open_channels(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RestInner {
    async fn select(&self, table: &str, filter: Option<&EqFilter>) -> Result<Vec<Value>, GatewayError> {
        let (Some(base), Some(key)) = (&self.url, &self.access_key) else {
            return Err(GatewayError::Unconfigured);
        };
        let url = select_url(base, table, filter)?;

        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| GatewayError::Unavailable("request limiter closed".to_string()))?;

        let resp = self
            .client
            .get(url.clone())
            .header("apikey", key)
            .bearer_auth(key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn poll_changes(
        self: Arc<Self>,
        table: String,
        filter: Option<EqFilter>,
        mut known: Vec<Value>,
        tx: mpsc::UnboundedSender<ChangeEvent>,
    ) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if tx.is_closed() {
                debug!("change feed receiver dropped; stopping poller");
                return;
            }

            let rows = match self.select(&table, filter.as_ref()).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(error = %err, "polling change feed failed");
                    continue;
                }
            };

            for event in diff_rows(&table, &known, &rows, &self.row_key_column) {
                if tx.send(event).is_err() {
                    return;
                }
            }
            known = rows;
        }
    }
}

#[async_trait]
impl Gateway for RestGateway {
    async fn select(&self, table: &str, filter: Option<&EqFilter>) -> Result<Vec<Value>, GatewayError> {
        let filter_desc = filter.map(ToString::to_string).unwrap_or_default();
        let span = info_span!("store_select", table, filter = %filter_desc);
        self.inner.select(table, filter).instrument(span).await
    }

    async fn channel(&self, table: &str, filter: Option<&EqFilter>) -> Result<ChangeFeed, GatewayError> {
        let initial = self.select(table, filter).await?;
        let (tx, events) = mpsc::unbounded_channel();
        let id = ChannelId::new();

        let span = info_span!("store_channel", table, %id);
        let task = tokio::spawn(
            Arc::clone(&self.inner)
                .poll_changes(table.to_string(), filter.cloned(), initial, tx)
                .instrument(span),
        );
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task.abort_handle());

        debug!(table, %id, "opened polling change channel");
        Ok(ChangeFeed { id, events })
    }

    fn close_channel(&self, id: ChannelId) {
        let handle = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(handle) = handle {
            handle.abort();
            debug!(%id, "closed polling change channel");
        }
    }
}

impl Drop for RestGateway {
    fn drop(&mut self) {
        let channels = self.channels.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in channels.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_url_pushes_filter_down() {
        let url = select_url(
            "https://demo.example.co/",
            "company_culture",
            Some(&EqFilter::new("company_id", 7)),
        )
        .expect("url");
        assert_eq!(
            url.as_str(),
            "https://demo.example.co/rest/v1/company_culture?select=*&company_id=eq.7"
        );

        let bulk = select_url("https://demo.example.co", "companies", None).expect("url");
        assert_eq!(bulk.as_str(), "https://demo.example.co/rest/v1/companies?select=*");
    }

    #[test]
    fn select_url_rejects_garbage_base() {
        assert!(matches!(
            select_url("not a url", "companies", None),
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[test]
    fn diff_detects_insert_update_delete() {
        let before = vec![
            json!({ "company_id": 1, "name": "Acme" }),
            json!({ "company_id": 2, "name": "Globex" }),
        ];
        let after = vec![
            json!({ "company_id": 1, "name": "Acme Corp" }),
            json!({ "company_id": 3, "name": "Initech" }),
        ];
        let events = diff_rows("companies", &before, &after, "company_id");
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Update, ChangeKind::Insert, ChangeKind::Delete]);
        assert_eq!(events[0].old_row, Some(before[0].clone()));
        assert_eq!(events[2].old_row, Some(before[1].clone()));
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let rows = vec![json!({ "company_id": 1, "name": "Acme" })];
        assert!(diff_rows("companies", &rows, &rows, "company_id").is_empty());
    }

    #[tokio::test]
    async fn unconfigured_gateway_fails_every_select() {
        let gateway = RestGateway::new(GatewayConfig::default()).expect("gateway");
        let err = gateway.select("companies", None).await.expect_err("unconfigured");
        assert!(matches!(err, GatewayError::Unconfigured));
        assert!(gateway.channel("companies", None).await.is_err());
        assert_eq!(gateway.open_channels(), 0);
        gateway.close_channel(ChannelId::new());
    }
}
