//! Identity provider lookups.
//!
//! The augmentation stage only needs one capability from the identity
//! provider: fetch the profile for an account id. Token acquisition is the
//! deployment's concern; clients are handed a ready bearer token.

mod keycloak;

pub use keycloak::KeycloakIdentityClient;

pub use crate::records::IdentityProfile;

use async_trait::async_trait;

use crate::errors::IdentityError;

/// Fetches identity profiles by account id.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Looks up the account `identity_id`.
    async fn lookup(&self, identity_id: &str) -> Result<IdentityProfile, IdentityError>;
}
