use pintel_core::CompanyId;
use pintel_store::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("fetching {table} failed: {cause}")]
pub struct FetchError {
    pub table: &'static str,
    #[source]
    pub cause: GatewayError,
}

#[derive(Debug, Error)]
#[error("subscribing to {table} failed: {cause}")]
pub struct SubscriptionError {
    pub table: &'static str,
    #[source]
    pub cause: GatewayError,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("company {company_id} does not exist")]
    CompanyNotFound { company_id: CompanyId },
    #[error("loading profile for company {company_id} failed: {cause}")]
    Fetch {
        company_id: CompanyId,
        #[source]
        cause: FetchError,
    },
}

impl ProfileError {
    pub fn company_id(&self) -> CompanyId {
        match self {
            ProfileError::CompanyNotFound { company_id } | ProfileError::Fetch { company_id, .. } => *company_id,
        }
    }
}

/// Error held by a synchronized view.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}
