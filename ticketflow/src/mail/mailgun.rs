//! Mailgun HTTP API mailer.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::{MailMessage, Mailer};
use crate::errors::{ConfigError, MailError};

/// Default Mailgun API base.
pub const DEFAULT_API_BASE: &str = "https://api.eu.mailgun.net";

/// Sends mail through `POST {api_base}/v3/{domain}/messages`.
#[derive(Debug, Clone)]
pub struct MailgunMailer {
    client: reqwest::Client,
    api_base: String,
    domain: String,
    api_key: String,
    from: String,
}

impl MailgunMailer {
    /// Creates a mailer. `timeout` bounds every request.
    pub fn new(
        api_base: impl Into<String>,
        domain: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "mail".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            domain: domain.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v3/{}/messages", self.api_base, self.domain)
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let form = [
            ("from", self.from.as_str()),
            ("to", message.to.as_str()),
            ("subject", message.subject.as_str()),
            ("html", message.body.as_str()),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await
            .map_err(|e| MailError::Transient(e.to_string()))?;

        let status = response.status();
        debug!(to = %message.to, status = %status, "Mailgun response");

        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(MailError::Transient(format!("HTTP {status}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(MailError::rejected(&message.to, format!("HTTP {status}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_url() {
        let mailer = MailgunMailer::new(
            "https://api.mailgun.net/",
            "mg.example.com",
            "key",
            "Team <team@example.com>",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(mailer.messages_url(), "https://api.mailgun.net/v3/mg.example.com/messages");
    }
}
