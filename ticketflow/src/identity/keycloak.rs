//! Keycloak admin API client.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{IdentityLookup, IdentityProfile};
use crate::errors::{ConfigError, IdentityError};

/// User representation returned by `GET /admin/realms/{realm}/users/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<KeycloakUser> for IdentityProfile {
    fn from(user: KeycloakUser) -> Self {
        let full_name = match (&user.first_name, &user.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        };

        Self {
            verified_email: user.email.filter(|_| user.email_verified),
            display_name: full_name.or(user.username),
            first_names: user.first_name,
            last_names: user.last_name,
        }
    }
}

/// Looks up users through the Keycloak admin REST API.
#[derive(Debug, Clone)]
pub struct KeycloakIdentityClient {
    client: reqwest::Client,
    users_url: Url,
    token: String,
}

impl KeycloakIdentityClient {
    /// Creates a client. `timeout` bounds every request. Fails if `base_url`
    /// is not an absolute http(s) URL.
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "identity".to_string(),
                reason: e.to_string(),
            })?;

        let base_url = base_url.into();
        let realm = realm.into();
        let invalid_base = |reason: String| ConfigError::InvalidValue {
            key: "identity.base_url".to_string(),
            reason,
        };
        let mut users_url = Url::parse(&base_url).map_err(|e| invalid_base(e.to_string()))?;
        users_url
            .path_segments_mut()
            .map_err(|()| invalid_base(format!("{base_url} cannot be a base URL")))?
            .pop_if_empty()
            .extend(["admin", "realms", realm.as_str(), "users"]);

        Ok(Self {
            client,
            users_url,
            token: token.into(),
        })
    }

    /// Appends `identity_id` as one escaped path segment.
    fn user_url(&self, identity_id: &str) -> Result<Url, IdentityError> {
        let mut url = self.users_url.clone();
        url.path_segments_mut()
            .map_err(|()| IdentityError::rejected(identity_id, "identity base URL has no path"))?
            .push(identity_id);
        Ok(url)
    }
}

#[async_trait]
impl IdentityLookup for KeycloakIdentityClient {
    async fn lookup(&self, identity_id: &str) -> Result<IdentityProfile, IdentityError> {
        let response = self
            .client
            .get(self.user_url(identity_id)?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| IdentityError::Transient(e.to_string()))?;

        let status = response.status();
        debug!(identity_id = %identity_id, status = %status, "Identity lookup response");

        if status == StatusCode::NOT_FOUND {
            return Err(IdentityError::not_found(identity_id));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(IdentityError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(IdentityError::rejected(identity_id, format!("HTTP {status}")));
        }

        let user: KeycloakUser = response
            .json()
            .await
            .map_err(|e| IdentityError::rejected(identity_id, format!("malformed profile: {e}")))?;
        Ok(user.into())
    }
}
