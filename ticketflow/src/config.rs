//! Batch configuration.
//!
//! Loaded from a TOML file whose path comes from `TICKETFLOW_CONFIG`
//! (default `ticketflow.toml`). Every key is optional. Secrets are never
//! read from the file; it only names the environment variables that hold
//! them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::mail::DEFAULT_API_BASE;
use crate::retry::RetryConfig;
use crate::stages::{AttributeProjection, EligibilityPolicy, MissingIdentityPolicy};
use crate::store::DEFAULT_PAGE_SIZE;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "TICKETFLOW_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "ticketflow.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketflowConfig {
    /// Backing store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Identity provider.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Outbound mail.
    #[serde(default)]
    pub mail: MailConfig,
    /// Message templates.
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Reminder job.
    #[serde(default)]
    pub reminders: ReminderJobConfig,
    /// Ticket job.
    #[serde(default)]
    pub tickets: TicketJobConfig,
    /// Export job.
    #[serde(default)]
    pub export: ExportJobConfig,
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot of user records.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Records fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/users.json")
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            page_size: default_page_size(),
        }
    }
}

/// `[identity]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Identity provider base URL.
    #[serde(default = "default_identity_base_url")]
    pub base_url: String,
    /// Realm holding user accounts.
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Environment variable holding the admin bearer token.
    #[serde(default = "default_identity_token_env")]
    pub token_env: String,
    /// Per-call timeout.
    #[serde(default = "default_identity_timeout")]
    pub timeout_seconds: u64,
    /// Retry budget for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_identity_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_realm() -> String {
    "ticketflow".to_string()
}

fn default_identity_token_env() -> String {
    "TICKETFLOW_IDENTITY_TOKEN".to_string()
}

fn default_identity_timeout() -> u64 {
    10
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: default_identity_base_url(),
            realm: default_realm(),
            token_env: default_identity_token_env(),
            timeout_seconds: default_identity_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl IdentityConfig {
    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Which mail backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailBackend {
    /// Send through the Mailgun HTTP API.
    #[default]
    Mailgun,
    /// Log messages instead of sending them.
    Log,
}

/// `[mail]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailConfig {
    /// Backend.
    #[serde(default)]
    pub backend: MailBackend,
    /// Mailgun API base URL.
    #[serde(default = "default_mail_api_base")]
    pub api_base: String,
    /// Sending domain.
    #[serde(default)]
    pub domain: String,
    /// Environment variable holding the Mailgun API key.
    #[serde(default = "default_mail_key_env")]
    pub api_key_env: String,
    /// Sender address.
    #[serde(default)]
    pub from: String,
    /// Per-call timeout.
    #[serde(default = "default_mail_timeout")]
    pub timeout_seconds: u64,
    /// Retry budget for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_mail_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_mail_key_env() -> String {
    "MAILGUN_API_KEY".to_string()
}

fn default_mail_timeout() -> u64 {
    15
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: MailBackend::default(),
            api_base: default_mail_api_base(),
            domain: String::new(),
            api_key_env: default_mail_key_env(),
            from: String::new(),
            timeout_seconds: default_mail_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl MailConfig {
    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// `[templates]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Directory of `.hbs`, `.html` and `.txt` templates.
    #[serde(default = "default_templates_dir")]
    pub dir: PathBuf,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
        }
    }
}

/// `[reminders]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderJobConfig {
    /// Template name.
    #[serde(default = "default_reminder_template")]
    pub template: String,
    /// Subject line.
    #[serde(default = "default_reminder_subject")]
    pub subject: String,
    /// Records whose identity cannot be found.
    #[serde(default)]
    pub missing_identity: MissingIdentityPolicy,
    /// Records whose identity lookup still fails after retries.
    #[serde(default)]
    pub unreachable_identity: MissingIdentityPolicy,
    /// Who gets a reminder.
    #[serde(default)]
    pub eligibility: EligibilityPolicy,
}

fn default_reminder_template() -> String {
    "upload-cv-reminder".to_string()
}

fn default_reminder_subject() -> String {
    "Reminder: upload your CV".to_string()
}

impl Default for ReminderJobConfig {
    fn default() -> Self {
        Self {
            template: default_reminder_template(),
            subject: default_reminder_subject(),
            missing_identity: MissingIdentityPolicy::PassThrough,
            unreachable_identity: MissingIdentityPolicy::PassThrough,
            eligibility: EligibilityPolicy::AllUsers,
        }
    }
}

/// `[tickets]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketJobConfig {
    /// Template name.
    #[serde(default = "default_ticket_template")]
    pub template: String,
    /// Subject line.
    #[serde(default = "default_ticket_subject")]
    pub subject: String,
    /// Records whose identity cannot be found.
    #[serde(default = "default_ticket_missing_identity")]
    pub missing_identity: MissingIdentityPolicy,
    /// Records whose identity lookup still fails after retries. Dropped
    /// records stay unassigned for the next run.
    #[serde(default = "default_ticket_missing_identity")]
    pub unreachable_identity: MissingIdentityPolicy,
}

fn default_ticket_template() -> String {
    "ticket-assigned".to_string()
}

fn default_ticket_subject() -> String {
    "Your ticket".to_string()
}

fn default_ticket_missing_identity() -> MissingIdentityPolicy {
    MissingIdentityPolicy::Drop
}

impl Default for TicketJobConfig {
    fn default() -> Self {
        Self {
            template: default_ticket_template(),
            subject: default_ticket_subject(),
            missing_identity: default_ticket_missing_identity(),
            unreachable_identity: default_ticket_missing_identity(),
        }
    }
}

/// `[export]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJobConfig {
    /// Partner whose consent columns are exported.
    #[serde(default = "default_partner")]
    pub partner: String,
    /// Output CSV path.
    #[serde(default = "default_export_output")]
    pub output: PathBuf,
    /// Explicit column list, replacing the partner preset.
    #[serde(default)]
    pub attributes: Option<AttributeProjection>,
}

fn default_partner() -> String {
    "huk".to_string()
}

fn default_export_output() -> PathBuf {
    PathBuf::from("export.csv")
}

impl Default for ExportJobConfig {
    fn default() -> Self {
        Self {
            partner: default_partner(),
            output: default_export_output(),
            attributes: None,
        }
    }
}

impl ExportJobConfig {
    /// The configured columns, or the partner preset.
    #[must_use]
    pub fn projection(&self) -> AttributeProjection {
        self.attributes
            .clone()
            .unwrap_or_else(|| AttributeProjection::partner(&self.partner))
    }
}

impl TicketflowConfig {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text)
    }

    /// Loads configuration from the path in [`CONFIG_PATH_ENV`], or
    /// [`DEFAULT_CONFIG_PATH`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.page_size == 0 {
            return Err(invalid("store.page_size", "must be at least 1"));
        }
        if self.identity.base_url.trim().is_empty() {
            return Err(invalid("identity.base_url", "must not be empty"));
        }
        for (key, seconds) in [
            ("identity.timeout_seconds", self.identity.timeout_seconds),
            ("mail.timeout_seconds", self.mail.timeout_seconds),
        ] {
            if seconds == 0 {
                return Err(invalid(key, "must be at least 1"));
            }
        }
        for (key, retry) in [("identity.retry", &self.identity.retry), ("mail.retry", &self.mail.retry)] {
            if retry.max_attempts == 0 {
                return Err(invalid(&format!("{key}.max_attempts"), "must be at least 1"));
            }
        }
        if self.mail.backend == MailBackend::Mailgun {
            if self.mail.domain.trim().is_empty() {
                return Err(invalid("mail.domain", "required for the mailgun backend"));
            }
            if self.mail.from.trim().is_empty() {
                return Err(invalid("mail.from", "required for the mailgun backend"));
            }
        }
        if self.export.attributes.as_ref().is_some_and(|a| a.attributes().is_empty()) {
            return Err(invalid("export.attributes", "must list at least one column"));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Reads the secret held in environment variable `name`.
pub fn secret(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingSecret(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ApplicationStatus;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
        [mail]
        domain = "mg.example.org"
        from = "Team <team@example.org>"
    "#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = TicketflowConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(config.store.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.identity.timeout(), Duration::from_secs(10));
        assert_eq!(config.reminders.template, "upload-cv-reminder");
        assert_eq!(config.reminders.missing_identity, MissingIdentityPolicy::PassThrough);
        assert_eq!(config.reminders.eligibility, EligibilityPolicy::AllUsers);
        assert_eq!(config.tickets.missing_identity, MissingIdentityPolicy::Drop);
        assert_eq!(config.reminders.unreachable_identity, MissingIdentityPolicy::PassThrough);
        assert_eq!(config.tickets.unreachable_identity, MissingIdentityPolicy::Drop);
        assert_eq!(config.export.projection(), AttributeProjection::huk());
    }

    #[test]
    fn test_full_file() {
        let text = r#"
            [store]
            path = "/var/lib/ticketflow/users.json"
            page_size = 25

            [identity]
            base_url = "https://id.example.org"
            realm = "hackathon"

            [identity.retry]
            max_attempts = 5
            backoff_strategy = "constant"

            [mail]
            backend = "log"

            [reminders]
            missing_identity = "drop"
            eligibility = { statuses = ["unsubmitted"] }

            [tickets]
            unreachable_identity = "pass_through"

            [export]
            partner = "acme"
            attributes = [{ field = "email", label = "Email" }]
        "#;
        let config = TicketflowConfig::from_toml(text).unwrap();

        assert_eq!(config.store.page_size, 25);
        assert_eq!(config.identity.realm, "hackathon");
        assert_eq!(config.identity.retry.max_attempts, 5);
        assert_eq!(config.mail.backend, MailBackend::Log);
        assert_eq!(
            config.reminders.eligibility,
            EligibilityPolicy::Statuses(vec![ApplicationStatus::Unsubmitted])
        );
        assert_eq!(config.tickets.unreachable_identity, MissingIdentityPolicy::PassThrough);
        assert_eq!(config.tickets.missing_identity, MissingIdentityPolicy::Drop);
        assert_eq!(config.export.projection().header(), vec!["Email"]);
    }

    #[test]
    fn test_mailgun_requires_domain() {
        let err = TicketflowConfig::from_toml("").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "mail.domain"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let text = format!("{MINIMAL}\n[mail.retry]\nmax_attempts = 0\n");
        let err = TicketflowConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("mail.retry.max_attempts"));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(
            TicketflowConfig::from_toml("[store\npath = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_reports_path() {
        let err = TicketflowConfig::load("/nonexistent/ticketflow.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ticketflow.toml"));
    }

    #[test]
    fn test_missing_secret() {
        let err = secret("TICKETFLOW_TEST_SECRET_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(_)));
    }
}
