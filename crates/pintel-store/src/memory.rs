use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{ChangeEvent, ChangeFeed, ChangeKind, ChannelId, EqFilter, Gateway, GatewayError};

/// In-process table store with change fan-out.
///
/// Serves fixture-backed runs of the CLI and doubles as the gateway in tests:
/// selects and channel setup can be made to fail per table, and selects can be
/// held back until released to stage slow or out-of-order responses.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Value>>,
    channels: HashMap<ChannelId, MemoryChannel>,
    select_faults: HashMap<String, String>,
    channel_faults: HashMap<String, String>,
    holds: Vec<Hold>,
    channel_holds: Vec<Hold>,
    channels_opened: usize,
    peak_open_channels: usize,
    selects_served: usize,
}

#[derive(Debug)]
struct MemoryChannel {
    table: String,
    filter: Option<EqFilter>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Debug)]
struct Hold {
    table: String,
    value: Option<Value>,
    release: watch::Sender<bool>,
}

impl Hold {
    fn parked(holds: &[Hold], table: &str, filter: Option<&EqFilter>) -> Vec<watch::Receiver<bool>> {
        holds
            .iter()
            .filter(|h| h.covers(table, filter))
            .map(|h| h.release.subscribe())
            .collect()
    }

    async fn wait(pending: Vec<watch::Receiver<bool>>) {
        for mut released in pending {
            // A dropped sender means the hold was discarded; treat it as released.
            let _ = released.wait_for(|open| *open).await;
        }
    }

    fn covers(&self, table: &str, filter: Option<&EqFilter>) -> bool {
        self.table == table
            && match &self.value {
                None => true,
                Some(value) => filter.is_some_and(|f| &f.value == value),
            }
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `{ "table": [rows...] }` JSON document.
    pub fn from_fixture_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let tables: BTreeMap<String, Vec<Value>> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

        let gateway = Self::new();
        for (table, rows) in tables {
            gateway.seed(&table, rows);
        }
        Ok(gateway)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append rows without emitting change events.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.state()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn insert(&self, table: &str, row: Value) {
        let mut state = self.state();
        state.tables.entry(table.to_string()).or_default().push(row.clone());
        state.publish(ChangeEvent::new(table, ChangeKind::Insert, Some(row), None));
    }

    /// Replace every row matching `key`, emitting one update per replaced row.
    pub fn update(&self, table: &str, key: &EqFilter, row: Value) -> usize {
        let mut state = self.state();
        let mut events = Vec::new();
        if let Some(rows) = state.tables.get_mut(table) {
            for existing in rows.iter_mut().filter(|r| key.matches(r)) {
                let old = std::mem::replace(existing, row.clone());
                events.push(ChangeEvent::new(table, ChangeKind::Update, Some(row.clone()), Some(old)));
            }
        }
        let replaced = events.len();
        for event in events {
            state.publish(event);
        }
        replaced
    }

    pub fn delete(&self, table: &str, key: &EqFilter) -> usize {
        let mut state = self.state();
        let removed: Vec<Value> = match state.tables.get_mut(table) {
            Some(rows) => {
                let (gone, kept) = rows.drain(..).partition(|r| key.matches(r));
                *rows = kept;
                gone
            }
            None => Vec::new(),
        };
        let count = removed.len();
        for old in removed {
            state.publish(ChangeEvent::new(table, ChangeKind::Delete, None, Some(old)));
        }
        count
    }

    /// Deliver an arbitrary event to matching channels without touching rows.
    pub fn emit(&self, event: ChangeEvent) {
        self.state().publish(event);
    }

    /// Make every select on `table` fail with `GatewayError::Unavailable`.
    pub fn fail_selects(&self, table: &str, message: impl Into<String>) {
        self.state().select_faults.insert(table.to_string(), message.into());
    }

    pub fn fail_channels(&self, table: &str, message: impl Into<String>) {
        self.state().channel_faults.insert(table.to_string(), message.into());
    }

    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.select_faults.clear();
        state.channel_faults.clear();
    }

    /// Park selects on `table` (optionally only those filtered on `value`)
    /// until [`MemoryGateway::release`] is called with the same arguments.
    pub fn hold(&self, table: &str, value: Option<Value>) {
        let mut state = self.state();
        if state.holds.iter().any(|h| h.table == table && h.value == value) {
            return;
        }
        let (release, _) = watch::channel(false);
        state.holds.push(Hold {
            table: table.to_string(),
            value,
            release,
        });
    }

    pub fn release(&self, table: &str, value: Option<Value>) {
        let mut state = self.state();
        if let Some(pos) = state.holds.iter().position(|h| h.table == table && h.value == value) {
            let hold = state.holds.remove(pos);
            hold.release.send_replace(true);
        }
    }

    /// Park channel handshakes on `table` (optionally only those filtered on
    /// `value`) until [`MemoryGateway::release_channels`].
    pub fn hold_channels(&self, table: &str, value: Option<Value>) {
        let mut state = self.state();
        if state.channel_holds.iter().any(|h| h.table == table && h.value == value) {
            return;
        }
        let (release, _) = watch::channel(false);
        state.channel_holds.push(Hold {
            table: table.to_string(),
            value,
            release,
        });
    }

    pub fn release_channels(&self, table: &str, value: Option<Value>) {
        let mut state = self.state();
        if let Some(pos) = state
            .channel_holds
            .iter()
            .position(|h| h.table == table && h.value == value)
        {
            let hold = state.channel_holds.remove(pos);
            hold.release.send_replace(true);
        }
    }

    /// Release every held select and channel handshake.
    pub fn release_all(&self) {
        let mut guard = self.state();
        let state = &mut *guard;
        for hold in state.holds.drain(..).chain(state.channel_holds.drain(..)) {
            hold.release.send_replace(true);
        }
    }

    pub fn open_channels(&self) -> usize {
        self.state().channels.len()
    }

    pub fn open_channels_for(&self, table: &str) -> usize {
        self.state().channels.values().filter(|c| c.table == table).count()
    }

    pub fn channels_opened(&self) -> usize {
        self.state().channels_opened
    }

    /// Most channels that were ever open at the same time.
    pub fn peak_open_channels(&self) -> usize {
        self.state().peak_open_channels
    }

    /// Number of selects that have returned (successfully or not).
    pub fn selects_served(&self) -> usize {
        self.state().selects_served
    }
}

impl MemoryState {
    fn publish(&mut self, event: ChangeEvent) {
        self.channels.retain(|id, channel| {
            if channel.table != event.table {
                return true;
            }
            if channel.filter.as_ref().is_some_and(|f| !event.touches(f)) {
                return true;
            }
            let delivered = channel.tx.send(event.clone()).is_ok();
            if !delivered {
                debug!(%id, "dropping channel with closed receiver");
            }
            delivered
        });
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn select(&self, table: &str, filter: Option<&EqFilter>) -> Result<Vec<Value>, GatewayError> {
        let pending = Hold::parked(&self.state().holds, table, filter);
        Hold::wait(pending).await;

        let mut state = self.state();
        state.selects_served += 1;
        if let Some(message) = state.select_faults.get(table) {
            return Err(GatewayError::Unavailable(message.clone()));
        }
        let rows = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.map_or(true, |f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn channel(&self, table: &str, filter: Option<&EqFilter>) -> Result<ChangeFeed, GatewayError> {
        let pending = Hold::parked(&self.state().channel_holds, table, filter);
        Hold::wait(pending).await;

        let mut state = self.state();
        if let Some(message) = state.channel_faults.get(table) {
            return Err(GatewayError::Unavailable(message.clone()));
        }
        let (tx, events) = mpsc::unbounded_channel();
        let id = ChannelId::new();
        state.channels.insert(
            id,
            MemoryChannel {
                table: table.to_string(),
                filter: filter.cloned(),
                tx,
            },
        );
        state.channels_opened += 1;
        state.peak_open_channels = state.peak_open_channels.max(state.channels.len());
        Ok(ChangeFeed { id, events })
    }

    fn close_channel(&self, id: ChannelId) {
        self.state().channels.remove(&id);
    }
}
