//! Real-time synchronization layer: fetchers, change subscribers, synchronized
//! views and the composite profile aggregator.

mod client;
mod error;
mod profile;
mod subscribe;
mod view;

pub use client::StoreClient;
pub use error::{FetchError, ProfileError, SubscriptionError, SyncError};
pub use profile::{load_profile, subscribe_profile, DetailFailurePolicy, ProfilePatch, ProfileSink};
pub use subscribe::{Subscription, SubscriptionGroup};
pub use view::{
    CollectionSource, CollectionView, EntitySource, EntityView, Patch, PatchSink, ProfileSource, ProfileView,
    SyncedView, ViewPhase, ViewSnapshot, ViewSource,
};

pub const CRATE_NAME: &str = "pintel-sync";
