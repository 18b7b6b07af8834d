use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pintel_core::{CompanyId, Entity};
use pintel_store::{ChangeFeed, ChangeKind, ChannelId, EqFilter, Gateway};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{decode, id_filter};
use crate::{StoreClient, SubscriptionError};

/// Open/closed flag that callbacks run under.
///
/// A callback only runs while the gate is open and holds the gate for its whole
/// duration, so once `close` returns no callback is running or will run.
#[derive(Debug)]
pub(crate) struct DispatchGate {
    open: Mutex<bool>,
}

impl DispatchGate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(true),
        })
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dispatch(&self, callback: impl FnOnce()) -> bool {
        let open = self.lock();
        if *open {
            callback();
        }
        *open
    }

    /// Returns whether the gate was open.
    pub(crate) fn close(&self) -> bool {
        std::mem::replace(&mut *self.lock(), false)
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.lock()
    }
}

/// Handle to one open change channel and its dispatch task.
///
/// Dropping the handle unsubscribes. `unsubscribe` must not be called from
/// inside this subscription's own callback.
pub struct Subscription {
    table: &'static str,
    channel: ChannelId,
    gate: Arc<DispatchGate>,
    gateway: Arc<dyn Gateway>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    /// Close the channel. Idempotent; no callback runs after this returns.
    pub fn unsubscribe(&self) {
        if self.gate.close() {
            self.task.abort();
            self.gateway.close_channel(self.channel);
            debug!(table = self.table, channel = %self.channel, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Subscriptions opened and closed as one unit.
///
/// Closing shuts the shared gate before any member, so consumers never observe
/// callbacks from a partially closed group.
pub struct SubscriptionGroup {
    gate: Arc<DispatchGate>,
    members: Vec<Subscription>,
}

impl std::fmt::Debug for SubscriptionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGroup")
            .field("members", &self.members)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Default for SubscriptionGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionGroup {
    pub fn new() -> Self {
        Self {
            gate: DispatchGate::new(),
            members: Vec::new(),
        }
    }

    pub fn single(subscription: Subscription) -> Self {
        let mut group = Self::new();
        group.push(subscription);
        group
    }

    pub(crate) fn gate(&self) -> Arc<DispatchGate> {
        Arc::clone(&self.gate)
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.members.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    pub fn unsubscribe(&self) {
        if self.gate.close() {
            for member in &self.members {
                member.unsubscribe();
            }
        }
    }
}

impl Drop for SubscriptionGroup {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl StoreClient {
    /// Watch `E`'s row for `id`; `on_change` receives each updated row.
    pub async fn subscribe_one<E, F>(&self, id: CompanyId, on_change: F) -> Result<Subscription, SubscriptionError>
    where
        E: Entity,
        F: Fn(E) + Send + Sync + 'static,
    {
        let filter = id_filter::<E>(id);
        let feed = self.open_feed::<E>(Some(&filter)).await?;
        let channel = feed.id;
        let gate = DispatchGate::new();
        let task = tokio::spawn(dispatch_updates(feed, filter, Arc::clone(&gate), on_change));
        debug!(table = E::TABLE, %id, %channel, "subscribed to row");
        Ok(self.handle::<E>(channel, gate, task))
    }

    /// Watch all of `E`'s table; any change re-reads the table and hands the
    /// whole list to `on_change`.
    pub async fn subscribe_all<E, F>(&self, on_change: F) -> Result<Subscription, SubscriptionError>
    where
        E: Entity,
        F: Fn(Vec<E>) + Send + Sync + 'static,
    {
        let feed = self.open_feed::<E>(None).await?;
        let channel = feed.id;
        let gate = DispatchGate::new();
        let task = tokio::spawn(dispatch_reloads(self.clone(), feed, Arc::clone(&gate), on_change));
        debug!(table = E::TABLE, %channel, "subscribed to table");
        Ok(self.handle::<E>(channel, gate, task))
    }

    async fn open_feed<E: Entity>(&self, filter: Option<&EqFilter>) -> Result<ChangeFeed, SubscriptionError> {
        self.gateway()
            .channel(E::TABLE, filter)
            .await
            .map_err(|cause| {
                warn!(table = E::TABLE, error = %cause, "channel setup failed");
                SubscriptionError {
                    table: E::TABLE,
                    cause,
                }
            })
    }

    fn handle<E: Entity>(&self, channel: ChannelId, gate: Arc<DispatchGate>, task: JoinHandle<()>) -> Subscription {
        Subscription {
            table: E::TABLE,
            channel,
            gate,
            gateway: Arc::clone(self.gateway()),
            task,
        }
    }
}

async fn dispatch_updates<E, F>(mut feed: ChangeFeed, filter: EqFilter, gate: Arc<DispatchGate>, on_change: F)
where
    E: Entity,
    F: Fn(E) + Send + Sync + 'static,
{
    while let Some(event) = feed.events.recv().await {
        if event.kind != ChangeKind::Update {
            continue;
        }
        let Some(row) = event.new_row else {
            continue;
        };
        if !filter.matches(&row) {
            debug!(table = E::TABLE, "ignoring row outside subscription filter");
            continue;
        }
        match decode::<E>(row) {
            Ok(record) => {
                if !gate.dispatch(|| on_change(record)) {
                    return;
                }
            }
            Err(err) => warn!(table = E::TABLE, error = %err, "skipping undecodable change"),
        }
    }
}

async fn dispatch_reloads<E, F>(client: StoreClient, mut feed: ChangeFeed, gate: Arc<DispatchGate>, on_change: F)
where
    E: Entity,
    F: Fn(Vec<E>) + Send + Sync + 'static,
{
    while let Some(event) = feed.events.recv().await {
        debug!(table = E::TABLE, kind = ?event.kind, "table changed; reloading");
        match client.fetch_all::<E>().await {
            Ok(records) => {
                if !gate.dispatch(|| on_change(records)) {
                    return;
                }
            }
            Err(err) => warn!(error = %err, "reload after change failed"),
        }
    }
}
