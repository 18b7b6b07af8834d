use std::sync::Arc;

use pintel_core::{
    BrandReputation, Business, Company, CompanyId, Compensation, CompositeProfile, Culture, DetailEntity, Financials,
    Logistics, People, TalentGrowth, Technologies,
};
use tracing::{debug, info_span, warn, Instrument};

use crate::subscribe::DispatchGate;
use crate::{FetchError, ProfileError, StoreClient, SubscriptionError, SubscriptionGroup};

/// What a failed detail fetch does to the whole profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetailFailurePolicy {
    /// Any detail failure fails the profile.
    #[default]
    FailFast,
    /// A failed section is left empty and listed in `CompositeProfile::degraded`.
    DegradeToNull,
}

pub type ProfilePatch = Box<dyn FnOnce(&mut CompositeProfile) + Send>;
pub type ProfileSink = Arc<dyn Fn(ProfilePatch) + Send + Sync>;

/// Fetch the company and its nine detail aspects concurrently and merge them.
pub async fn load_profile(
    client: &StoreClient,
    company_id: CompanyId,
    policy: DetailFailurePolicy,
) -> Result<CompositeProfile, ProfileError> {
    let span = info_span!("load_profile", %company_id, ?policy);
    async {
        let (company, brand, business, compensation, culture, financials, logistics, people, talent, technologies) = tokio::join!(
            client.fetch_one::<Company>(company_id),
            client.fetch_one::<BrandReputation>(company_id),
            client.fetch_one::<Business>(company_id),
            client.fetch_one::<Compensation>(company_id),
            client.fetch_one::<Culture>(company_id),
            client.fetch_one::<Financials>(company_id),
            client.fetch_one::<Logistics>(company_id),
            client.fetch_one::<People>(company_id),
            client.fetch_one::<TalentGrowth>(company_id),
            client.fetch_one::<Technologies>(company_id),
        );

        let company = company
            .map_err(|cause| ProfileError::Fetch { company_id, cause })?
            .ok_or(ProfileError::CompanyNotFound { company_id })?;
        let mut profile = CompositeProfile::new(company);

        settle_detail(&mut profile, brand, policy)?;
        settle_detail(&mut profile, business, policy)?;
        settle_detail(&mut profile, compensation, policy)?;
        settle_detail(&mut profile, culture, policy)?;
        settle_detail(&mut profile, financials, policy)?;
        settle_detail(&mut profile, logistics, policy)?;
        settle_detail(&mut profile, people, policy)?;
        settle_detail(&mut profile, talent, policy)?;
        settle_detail(&mut profile, technologies, policy)?;

        debug!(degraded = profile.degraded.len(), "profile merged");
        Ok(profile)
    }
    .instrument(span)
    .await
}

fn settle_detail<D: DetailEntity>(
    profile: &mut CompositeProfile,
    fetched: Result<Option<D>, FetchError>,
    policy: DetailFailurePolicy,
) -> Result<(), ProfileError> {
    let company_id = profile.company_id();
    match fetched {
        Ok(detail) => {
            if !profile.set_detail(detail) {
                warn!(section = %D::KIND, "dropping detail row for another company");
            }
            Ok(())
        }
        Err(cause) => match policy {
            DetailFailurePolicy::FailFast => Err(ProfileError::Fetch { company_id, cause }),
            DetailFailurePolicy::DegradeToNull => {
                warn!(section = %D::KIND, error = %cause, "detail fetch failed; section left empty");
                profile.degraded.push(D::KIND);
                Ok(())
            }
        },
    }
}

/// Open the nine detail subscriptions for `company_id` as one group.
///
/// Each update arrives at `sink` as a patch replacing that section. If any
/// channel fails to open, the ones already open are closed before returning.
pub async fn subscribe_profile(
    client: &StoreClient,
    company_id: CompanyId,
    sink: ProfileSink,
) -> Result<SubscriptionGroup, SubscriptionError> {
    let mut group = SubscriptionGroup::new();
    watch_detail::<BrandReputation>(client, company_id, &mut group, &sink).await?;
    watch_detail::<Business>(client, company_id, &mut group, &sink).await?;
    watch_detail::<Compensation>(client, company_id, &mut group, &sink).await?;
    watch_detail::<Culture>(client, company_id, &mut group, &sink).await?;
    watch_detail::<Financials>(client, company_id, &mut group, &sink).await?;
    watch_detail::<Logistics>(client, company_id, &mut group, &sink).await?;
    watch_detail::<People>(client, company_id, &mut group, &sink).await?;
    watch_detail::<TalentGrowth>(client, company_id, &mut group, &sink).await?;
    watch_detail::<Technologies>(client, company_id, &mut group, &sink).await?;
    debug!(%company_id, channels = group.len(), "profile subscriptions open");
    Ok(group)
}

async fn watch_detail<D: DetailEntity>(
    client: &StoreClient,
    company_id: CompanyId,
    group: &mut SubscriptionGroup,
    sink: &ProfileSink,
) -> Result<(), SubscriptionError> {
    let gate: Arc<DispatchGate> = group.gate();
    let sink = Arc::clone(sink);
    let subscription = client
        .subscribe_one::<D, _>(company_id, move |record: D| {
            gate.dispatch(|| {
                sink(Box::new(move |profile: &mut CompositeProfile| {
                    if profile.set_detail(Some(record)) {
                        profile.degraded.retain(|kind| *kind != D::KIND);
                    }
                }))
            });
        })
        .await?;
    group.push(subscription);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pintel_core::DetailKind;
    use pintel_store::{EqFilter, GatewayError, MemoryGateway};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn seeded() -> Arc<MemoryGateway> {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed("companies", [json!({ "company_id": 4, "name": "Initech", "category": "Product" })]);
        gateway.seed("company_culture", [json!({ "company_id": 4, "burnout_risk": "medium" })]);
        gateway.seed(
            "company_compensation",
            [json!({ "company_id": 4, "average_ctc": 12.5, "highest_ctc": 30.0 })],
        );
        gateway.seed("company_people", [json!({ "company_id": 5 })]);
        gateway
    }

    #[tokio::test]
    async fn merges_present_sections_and_leaves_the_rest_empty() {
        let client = StoreClient::new(seeded());
        let profile = load_profile(&client, CompanyId(4), DetailFailurePolicy::default())
            .await
            .expect("profile");

        assert_eq!(profile.company.name.as_deref(), Some("Initech"));
        assert!(profile.has_detail(DetailKind::Culture));
        assert_eq!(profile.compensation.as_ref().and_then(|c| c.average_ctc), Some(12.5));
        assert!(profile.people.is_none());
        assert!(profile.technologies.is_none());
        assert!(profile.degraded.is_empty());
    }

    #[tokio::test]
    async fn missing_company_is_not_found() {
        let client = StoreClient::new(seeded());
        let err = load_profile(&client, CompanyId(5), DetailFailurePolicy::FailFast)
            .await
            .expect_err("no company row");
        assert!(matches!(err, ProfileError::CompanyNotFound { company_id: CompanyId(5) }));
    }

    #[tokio::test]
    async fn fail_fast_rejects_the_whole_profile() {
        let gateway = seeded();
        gateway.fail_selects("company_logistics", "timeout");
        let client = StoreClient::new(gateway);

        let err = load_profile(&client, CompanyId(4), DetailFailurePolicy::FailFast)
            .await
            .expect_err("detail fault");
        match err {
            ProfileError::Fetch { company_id, cause } => {
                assert_eq!(company_id, CompanyId(4));
                assert_eq!(cause.table, "company_logistics");
                assert!(matches!(cause.cause, GatewayError::Unavailable(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn degrade_policy_empties_only_the_failed_section() {
        let gateway = seeded();
        gateway.fail_selects("company_culture", "timeout");
        let client = StoreClient::new(gateway);

        let profile = load_profile(&client, CompanyId(4), DetailFailurePolicy::DegradeToNull)
            .await
            .expect("degraded profile");
        assert!(profile.culture.is_none());
        assert_eq!(profile.degraded, vec![DetailKind::Culture]);
        assert!(profile.compensation.is_some());
    }

    #[tokio::test]
    async fn company_fault_fails_even_when_degrading() {
        let gateway = seeded();
        gateway.fail_selects("companies", "reset");
        let client = StoreClient::new(gateway);

        let err = load_profile(&client, CompanyId(4), DetailFailurePolicy::DegradeToNull)
            .await
            .expect_err("company fault");
        assert!(matches!(err, ProfileError::Fetch { .. }));
    }

    #[tokio::test]
    async fn partial_subscription_failure_closes_opened_channels() {
        let gateway = seeded();
        gateway.fail_channels("company_people", "handshake refused");
        let client = StoreClient::new(gateway.clone());

        let err = subscribe_profile(&client, CompanyId(4), Arc::new(|_: ProfilePatch| {}))
            .await
            .expect_err("people channel fails");
        assert_eq!(err.table, "company_people");
        assert_eq!(gateway.channels_opened(), 6);
        assert_eq!(gateway.open_channels(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn detail_updates_patch_their_own_section() {
        let gateway = seeded();
        let client = StoreClient::new(gateway.clone());
        let profile = Arc::new(Mutex::new(
            load_profile(&client, CompanyId(4), DetailFailurePolicy::FailFast)
                .await
                .expect("profile"),
        ));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let target = Arc::clone(&profile);
        let group = subscribe_profile(
            &client,
            CompanyId(4),
            Arc::new(move |patch: ProfilePatch| {
                patch(&mut *target.lock().expect("profile lock"));
                let _ = tx.send(());
            }),
        )
        .await
        .expect("subscribe");
        assert_eq!(group.len(), 9);
        assert_eq!(gateway.open_channels(), 9);

        gateway.update(
            "company_culture",
            &EqFilter::new("company_id", 4),
            json!({ "company_id": 4, "burnout_risk": "high" }),
        );
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timely")
            .expect("patched");

        let merged = profile.lock().expect("profile lock").clone();
        assert_eq!(merged.culture.and_then(|c| c.burnout_risk).as_deref(), Some("high"));
        assert_eq!(merged.compensation.and_then(|c| c.highest_ctc), Some(30.0));

        drop(group);
        assert_eq!(gateway.open_channels(), 0);
    }
}
