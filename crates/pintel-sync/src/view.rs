use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use pintel_core::{CompanyId, CompositeProfile, Entity};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::profile::{load_profile, subscribe_profile, DetailFailurePolicy, ProfilePatch};
use crate::{StoreClient, SubscriptionError, SubscriptionGroup, SyncError};

/// In-place change to a view's data.
pub type Patch<V> = Box<dyn FnOnce(&mut V) + Send>;
pub type PatchSink<V> = Arc<dyn Fn(Patch<V>) + Send + Sync>;

/// How a view loads its data for a key and keeps it current.
#[async_trait]
pub trait ViewSource: Send + Sync + 'static {
    type Key: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Value: Clone + Default + Send + Sync + 'static;

    fn describe(&self) -> &'static str;

    async fn load(&self, client: &StoreClient, key: &Self::Key) -> Result<Self::Value, SyncError>;

    /// Open the change subscription(s) for `key`, delivering changes to `sink`.
    async fn watch(
        &self,
        client: &StoreClient,
        key: &Self::Key,
        sink: PatchSink<Self::Value>,
    ) -> Result<SubscriptionGroup, SubscriptionError>;
}

/// One record of `E` for a company id.
pub struct EntitySource<E>(PhantomData<fn() -> E>);

impl<E> Default for EntitySource<E> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<E> fmt::Debug for EntitySource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntitySource")
    }
}

#[async_trait]
impl<E: Entity> ViewSource for EntitySource<E> {
    type Key = CompanyId;
    type Value = Option<E>;

    fn describe(&self) -> &'static str {
        E::TABLE
    }

    async fn load(&self, client: &StoreClient, key: &CompanyId) -> Result<Option<E>, SyncError> {
        Ok(client.fetch_one::<E>(*key).await?)
    }

    async fn watch(
        &self,
        client: &StoreClient,
        key: &CompanyId,
        sink: PatchSink<Option<E>>,
    ) -> Result<SubscriptionGroup, SubscriptionError> {
        let subscription = client
            .subscribe_one::<E, _>(*key, move |record: E| {
                sink(Box::new(move |data: &mut Option<E>| *data = Some(record)));
            })
            .await?;
        Ok(SubscriptionGroup::single(subscription))
    }
}

/// Every row of `E`'s table.
pub struct CollectionSource<E>(PhantomData<fn() -> E>);

impl<E> Default for CollectionSource<E> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<E> fmt::Debug for CollectionSource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CollectionSource")
    }
}

#[async_trait]
impl<E: Entity> ViewSource for CollectionSource<E> {
    type Key = ();
    type Value = Vec<E>;

    fn describe(&self) -> &'static str {
        E::TABLE
    }

    async fn load(&self, client: &StoreClient, _key: &()) -> Result<Vec<E>, SyncError> {
        Ok(client.fetch_all::<E>().await?)
    }

    async fn watch(
        &self,
        client: &StoreClient,
        _key: &(),
        sink: PatchSink<Vec<E>>,
    ) -> Result<SubscriptionGroup, SubscriptionError> {
        let subscription = client
            .subscribe_all::<E, _>(move |records: Vec<E>| {
                sink(Box::new(move |data: &mut Vec<E>| *data = records));
            })
            .await?;
        Ok(SubscriptionGroup::single(subscription))
    }
}

/// Composite profile for a company id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileSource {
    pub policy: DetailFailurePolicy,
}

#[async_trait]
impl ViewSource for ProfileSource {
    type Key = CompanyId;
    type Value = Option<CompositeProfile>;

    fn describe(&self) -> &'static str {
        "profile"
    }

    async fn load(&self, client: &StoreClient, key: &CompanyId) -> Result<Option<CompositeProfile>, SyncError> {
        Ok(Some(load_profile(client, *key, self.policy).await?))
    }

    async fn watch(
        &self,
        client: &StoreClient,
        key: &CompanyId,
        sink: PatchSink<Option<CompositeProfile>>,
    ) -> Result<SubscriptionGroup, SubscriptionError> {
        let adapted = Arc::new(move |patch: ProfilePatch| {
            sink(Box::new(move |data: &mut Option<CompositeProfile>| {
                if let Some(profile) = data.as_mut() {
                    patch(profile);
                }
            }));
        });
        subscribe_profile(client, *key, adapted).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewPhase {
    #[default]
    Idle,
    Loading,
    Synced,
    Error,
}

/// Point-in-time state of a view.
#[derive(Debug, Clone)]
pub struct ViewSnapshot<K, V> {
    pub phase: ViewPhase,
    pub key: Option<K>,
    pub data: V,
    pub error: Option<Arc<SyncError>>,
}

impl<K, V: Default> Default for ViewSnapshot<K, V> {
    fn default() -> Self {
        Self {
            phase: ViewPhase::Idle,
            key: None,
            data: V::default(),
            error: None,
        }
    }
}

impl<K, V> ViewSnapshot<K, V> {
    pub fn is_loading(&self) -> bool {
        self.phase == ViewPhase::Loading
    }

    pub fn is_synced(&self) -> bool {
        self.phase == ViewPhase::Synced
    }
}

type SnapshotOf<S> = ViewSnapshot<<S as ViewSource>::Key, <S as ViewSource>::Value>;

struct ViewShared<S: ViewSource> {
    client: StoreClient,
    source: S,
    control: Mutex<ViewControl>,
    /// Held by a request from opening its subscription until it is installed
    /// or closed, so a superseded open never overlaps a newer one.
    opening: tokio::sync::Mutex<()>,
    state: watch::Sender<SnapshotOf<S>>,
}

#[derive(Default)]
struct ViewControl {
    generation: u64,
    subscription: Option<SubscriptionGroup>,
    torn_down: bool,
}

impl ViewControl {
    fn is_current(&self, generation: u64) -> bool {
        !self.torn_down && self.generation == generation
    }
}

/// Keeps data for one key current: fetch, then follow changes until the key
/// changes or the view is torn down.
///
/// Requests run on spawned tasks, so `set_key` must be called from within a
/// Tokio runtime. Every request carries a generation number and anything it
/// produces after a newer request (or teardown) is discarded.
pub struct SyncedView<S: ViewSource> {
    shared: Arc<ViewShared<S>>,
}

pub type EntityView<E> = SyncedView<EntitySource<E>>;
pub type CollectionView<E> = SyncedView<CollectionSource<E>>;
pub type ProfileView = SyncedView<ProfileSource>;

impl<S: ViewSource> fmt::Debug for SyncedView<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("SyncedView")
            .field("source", &self.shared.source.describe())
            .field("phase", &state.phase)
            .field("key", &state.key)
            .finish_non_exhaustive()
    }
}

impl<S: ViewSource> ViewShared<S> {
    fn control(&self) -> MutexGuard<'_, ViewControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sink bound to one request; patches from older requests are dropped.
    fn patch_sink(shared: &Arc<Self>, generation: u64) -> PatchSink<S::Value> {
        let weak: Weak<Self> = Arc::downgrade(shared);
        Arc::new(move |patch: Patch<S::Value>| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let control = shared.control();
            if control.is_current(generation) {
                shared.state.send_modify(|snapshot| patch(&mut snapshot.data));
            } else {
                debug!(generation, "dropping change for superseded request");
            }
        })
    }
}

impl<S: ViewSource> SyncedView<S> {
    pub fn new(client: StoreClient, source: S) -> Self {
        let (state, _) = watch::channel(ViewSnapshot::default());
        Self {
            shared: Arc::new(ViewShared {
                client,
                source,
                control: Mutex::new(ViewControl::default()),
                opening: tokio::sync::Mutex::new(()),
                state,
            }),
        }
    }

    pub fn snapshot(&self) -> SnapshotOf<S> {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn updates(&self) -> watch::Receiver<SnapshotOf<S>> {
        self.shared.state.subscribe()
    }

    /// Wait until the state satisfies `predicate` and return that state.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&SnapshotOf<S>) -> bool) -> SnapshotOf<S> {
        let mut updates = self.updates();
        let snapshot = match updates.wait_for(|snapshot| predicate(snapshot)).await {
            Ok(snapshot) => snapshot.clone(),
            // The sender lives as long as the view.
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    pub fn has_subscription(&self) -> bool {
        self.shared.control().subscription.is_some()
    }

    /// Track `key`, or nothing with `None`.
    ///
    /// A new key (or the current key after an error) detaches the active
    /// subscription and starts a fetch; the current key while loading or
    /// synced is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if a request has to be started outside a Tokio runtime.
    pub fn set_key(&self, key: Option<S::Key>) {
        let mut control = self.shared.control();
        if control.torn_down {
            debug!(source = self.shared.source.describe(), "ignoring key change after teardown");
            return;
        }
        let (phase, same_key) = {
            let state = self.shared.state.borrow();
            (state.phase, state.key == key)
        };

        let Some(key) = key else {
            control.generation += 1;
            let previous = control.subscription.take();
            self.shared.state.send_replace(ViewSnapshot::default());
            drop(control);
            if let Some(group) = previous {
                group.unsubscribe();
            }
            return;
        };
        if same_key && matches!(phase, ViewPhase::Loading | ViewPhase::Synced) {
            return;
        }

        control.generation += 1;
        let generation = control.generation;
        let previous = control.subscription.take();
        self.shared.state.send_modify(|state| {
            state.phase = ViewPhase::Loading;
            state.error = None;
            if !same_key {
                state.data = S::Value::default();
            }
            state.key = Some(key.clone());
        });
        drop(control);
        if let Some(group) = previous {
            group.unsubscribe();
        }

        debug!(source = self.shared.source.describe(), ?key, generation, "requesting");
        tokio::spawn(run_request(Arc::clone(&self.shared), generation, key));
    }

    /// Re-issue the request for the current key if the last one failed.
    pub fn retry(&self) {
        let snapshot = self.snapshot();
        if snapshot.phase == ViewPhase::Error {
            self.set_key(snapshot.key);
        }
    }

    /// Close the active subscription and ignore all later key changes. Idempotent.
    pub fn teardown(&self) {
        let previous = {
            let mut control = self.shared.control();
            if control.torn_down {
                return;
            }
            control.torn_down = true;
            control.generation += 1;
            control.subscription.take()
        };
        if let Some(group) = previous {
            group.unsubscribe();
        }
        debug!(source = self.shared.source.describe(), "view torn down");
    }
}

impl<E: Entity> SyncedView<EntitySource<E>> {
    pub fn entity(client: StoreClient) -> Self {
        Self::new(client, EntitySource::default())
    }

    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn for_company(client: StoreClient, company_id: CompanyId) -> Self {
        let view = Self::entity(client);
        view.set_key(Some(company_id));
        view
    }
}

impl<E: Entity> SyncedView<CollectionSource<E>> {
    /// Starts loading immediately.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn collection(client: StoreClient) -> Self {
        let view = Self::new(client, CollectionSource::default());
        view.set_key(Some(()));
        view
    }
}

impl SyncedView<ProfileSource> {
    pub fn profile(client: StoreClient, policy: DetailFailurePolicy) -> Self {
        Self::new(client, ProfileSource { policy })
    }
}

impl<S: ViewSource> Drop for SyncedView<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_request<S: ViewSource>(shared: Arc<ViewShared<S>>, generation: u64, key: S::Key) {
    let span = info_span!("view_request", source = shared.source.describe(), ?key, generation);
    async move {
        let loaded = shared.source.load(&shared.client, &key).await;
        {
            let control = shared.control();
            if !control.is_current(generation) {
                debug!("discarding superseded fetch");
                return;
            }
            match loaded {
                Ok(data) => shared.state.send_modify(|state| state.data = data),
                Err(err) => {
                    warn!(error = %err, "view fetch failed");
                    shared.state.send_modify(|state| {
                        state.phase = ViewPhase::Error;
                        state.error = Some(Arc::new(err));
                    });
                    return;
                }
            }
        }

        let _opening = shared.opening.lock().await;
        if !shared.control().is_current(generation) {
            debug!("superseded before subscribing");
            return;
        }
        let sink = ViewShared::patch_sink(&shared, generation);
        let watched = shared.source.watch(&shared.client, &key, sink).await;

        let mut control = shared.control();
        if !control.is_current(generation) {
            drop(control);
            debug!("closing subscription of superseded request");
            drop(watched);
            return;
        }
        match watched {
            Ok(group) => {
                let previous = control.subscription.replace(group);
                shared.state.send_modify(|state| {
                    state.phase = ViewPhase::Synced;
                    state.error = None;
                });
                drop(control);
                drop(previous);
                info!("view synced");
            }
            Err(err) => {
                warn!(error = %err, "view subscription failed");
                shared.state.send_modify(|state| {
                    state.phase = ViewPhase::Error;
                    state.error = Some(Arc::new(SyncError::Subscription(err)));
                });
            }
        }
    }
    .instrument(span)
    .await
}
