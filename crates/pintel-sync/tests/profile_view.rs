use std::sync::Arc;
use std::time::Duration;

use pintel_core::{CompanyId, DetailKind};
use pintel_store::{EqFilter, MemoryGateway};
use pintel_sync::{DetailFailurePolicy, ProfileError, ProfileView, StoreClient, SyncError, ViewPhase};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(3);

fn gateway() -> Arc<MemoryGateway> {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed(
        "companies",
        [
            json!({ "company_id": 3, "name": "Wayne Enterprises" }),
            json!({ "company_id": 7, "name": "Cyberdyne", "category": "Product" }),
        ],
    );
    gateway.seed("company_business", [json!({ "company_id": 7 })]);
    gateway.seed("company_compensation", [json!({ "company_id": 7, "average_ctc": 9.0 })]);
    gateway.seed("company_technologies", [json!({ "company_id": 7, "tech_stack": "Rust, Go" })]);
    gateway
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_culture_is_empty_not_an_error() {
    let gateway = gateway();
    let view = ProfileView::profile(StoreClient::new(gateway.clone()), DetailFailurePolicy::FailFast);
    view.set_key(Some(CompanyId(7)));

    let snapshot = tokio::time::timeout(WAIT, view.wait_for(|s| s.phase != ViewPhase::Loading))
        .await
        .expect("settled");
    assert_eq!(snapshot.phase, ViewPhase::Synced);
    assert!(snapshot.error.is_none());
    let profile = snapshot.data.expect("profile");
    assert!(profile.culture.is_none());
    assert!(profile.has_detail(DetailKind::Technologies));
    assert_eq!(gateway.open_channels(), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_before_fetches_resolve_leaves_no_trace() {
    let gateway = gateway();
    gateway.hold("companies", Some(json!(3)));
    for kind in DetailKind::ALL {
        gateway.hold(kind.table(), Some(json!(3)));
    }
    let view = ProfileView::profile(StoreClient::new(gateway.clone()), DetailFailurePolicy::FailFast);
    view.set_key(Some(CompanyId(3)));
    let before = view.snapshot();
    assert_eq!(before.phase, ViewPhase::Loading);

    view.teardown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(gateway.selects_served(), 0);
    gateway.release_all();
    eventually(|| gateway.selects_served() == 10).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let after = view.snapshot();
    assert_eq!(after.phase, before.phase);
    assert_eq!(after.key, before.key);
    assert!(after.data.is_none());
    assert!(after.error.is_none());
    assert_eq!(gateway.channels_opened(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detail_change_patches_only_its_section() {
    let gateway = gateway();
    let view = ProfileView::profile(StoreClient::new(gateway.clone()), DetailFailurePolicy::FailFast);
    view.set_key(Some(CompanyId(7)));
    tokio::time::timeout(WAIT, view.wait_for(|s| s.is_synced()))
        .await
        .expect("synced");

    gateway.update(
        "company_technologies",
        &EqFilter::new("company_id", 7),
        json!({ "company_id": 7, "tech_stack": "Rust, Go, Kubernetes" }),
    );
    let patched = tokio::time::timeout(
        WAIT,
        view.wait_for(|s| {
            s.data
                .as_ref()
                .and_then(|p| p.technologies.as_ref())
                .and_then(|t| t.tech_stack.as_deref())
                == Some("Rust, Go, Kubernetes")
        }),
    )
    .await
    .expect("patched");

    let profile = patched.data.expect("profile");
    assert_eq!(profile.company.name.as_deref(), Some("Cyberdyne"));
    assert_eq!(profile.compensation.and_then(|c| c.average_ctc), Some(9.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_company_is_reported() {
    let gateway = gateway();
    let view = ProfileView::profile(StoreClient::new(gateway.clone()), DetailFailurePolicy::FailFast);
    view.set_key(Some(CompanyId(404)));

    let snapshot = tokio::time::timeout(WAIT, view.wait_for(|s| s.phase == ViewPhase::Error))
        .await
        .expect("error");
    assert!(matches!(
        snapshot.error.as_deref(),
        Some(SyncError::Profile(ProfileError::CompanyNotFound { .. }))
    ));
    assert_eq!(gateway.open_channels(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn degraded_sections_heal_on_update() {
    let gateway = gateway();
    gateway.seed("company_people", [json!({ "company_id": 7 })]);
    gateway.fail_selects("company_people", "timeout");
    let view = ProfileView::profile(StoreClient::new(gateway.clone()), DetailFailurePolicy::DegradeToNull);
    view.set_key(Some(CompanyId(7)));

    let synced = tokio::time::timeout(WAIT, view.wait_for(|s| s.is_synced()))
        .await
        .expect("synced");
    assert_eq!(synced.data.as_ref().map(|p| p.degraded.clone()), Some(vec![DetailKind::People]));

    gateway.update(
        "company_people",
        &EqFilter::new("company_id", 7),
        json!({ "company_id": 7, "ceo_name": "Miles Dyson" }),
    );
    let healed = tokio::time::timeout(
        WAIT,
        view.wait_for(|s| s.data.as_ref().is_some_and(|p| p.people.is_some())),
    )
    .await
    .expect("healed");
    assert!(healed.data.expect("profile").degraded.is_empty());
}
