use std::fmt;
use std::sync::Arc;

use pintel_core::{Company, CompanyId, Entity};
use pintel_store::{EqFilter, Gateway, GatewayError, RestGateway};
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::FetchError;

/// Shared handle to the gateway, passed to every fetcher, subscriber and view.
#[derive(Clone)]
pub struct StoreClient {
    gateway: Arc<dyn Gateway>,
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient").finish_non_exhaustive()
    }
}

pub(crate) fn id_filter<E: Entity>(id: CompanyId) -> EqFilter {
    EqFilter::new(E::ID_COLUMN, id.get())
}

pub(crate) fn decode<E: Entity>(row: Value) -> Result<E, serde_json::Error> {
    serde_json::from_value(row)
}

impl StoreClient {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// REST gateway configured from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(RestGateway::from_env()?)))
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Every row of `E`'s table, in gateway order.
    pub async fn fetch_all<E: Entity>(&self) -> Result<Vec<E>, FetchError> {
        self.fetch_rows(None).await
    }

    pub async fn fetch_where<E: Entity>(&self, filter: &EqFilter) -> Result<Vec<E>, FetchError> {
        self.fetch_rows(Some(filter)).await
    }

    /// The single row for `id`, or `None` when the company has no such row.
    pub async fn fetch_one<E: Entity>(&self, id: CompanyId) -> Result<Option<E>, FetchError> {
        let filter = id_filter::<E>(id);
        let mut records = self.fetch_rows::<E>(Some(&filter)).await?;
        match records.len() {
            0 => {
                debug!(table = E::TABLE, %id, "no row");
                Ok(None)
            }
            1 => Ok(records.pop()),
            rows => Err(FetchError {
                table: E::TABLE,
                cause: GatewayError::Ambiguous { rows },
            }),
        }
    }

    pub async fn fetch_companies_by_category(&self, category: &str) -> Result<Vec<Company>, FetchError> {
        self.fetch_where(&EqFilter::new("category", category)).await
    }

    /// Case-insensitive substring search over name, short name and headquarters.
    pub async fn search_companies(&self, query: &str) -> Result<Vec<Company>, FetchError> {
        let needle = query.trim().to_lowercase();
        let companies = self.fetch_all::<Company>().await?;
        if needle.is_empty() {
            return Ok(companies);
        }
        Ok(companies
            .into_iter()
            .filter(|c| {
                [&c.name, &c.short_name, &c.headquarters_address]
                    .into_iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect())
    }

    async fn fetch_rows<E: Entity>(&self, filter: Option<&EqFilter>) -> Result<Vec<E>, FetchError> {
        let span = info_span!("fetch", table = E::TABLE);
        async {
            let rows = self.gateway.select(E::TABLE, filter).await.map_err(|cause| {
                warn!(error = %cause, "fetch failed");
                FetchError {
                    table: E::TABLE,
                    cause,
                }
            })?;
            rows.into_iter()
                .map(decode::<E>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| {
                    warn!(error = %err, "undecodable row");
                    FetchError {
                        table: E::TABLE,
                        cause: GatewayError::Decode(err),
                    }
                })
        }
        .instrument(span)
        .await
    }
}
