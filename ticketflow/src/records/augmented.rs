//! Records in flight through a pipeline.

use serde::{Deserialize, Serialize};

use super::UserRecord;

/// Fields fetched from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentityProfile {
    /// Email address, only set when the provider reports it verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_email: Option<String>,
    /// Name to greet the user by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Given names as held by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_names: Option<String>,
    /// Family names as held by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_names: Option<String>,
}

impl IdentityProfile {
    /// Creates an empty profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the verified email.
    #[must_use]
    pub fn with_verified_email(mut self, email: impl Into<String>) -> Self {
        self.verified_email = Some(email.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Outcome of the augmentation stage for one record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Augmentation {
    /// The record has not reached an augmentation stage.
    #[default]
    Pending,
    /// Identity fields were fetched and merged.
    Augmented {
        /// The fetched profile.
        profile: IdentityProfile,
    },
    /// The identity provider has no usable account; passed through as-is.
    Missing,
    /// Transient failures exhausted the retry budget; passed through as-is.
    Degraded,
}

/// A [`UserRecord`] plus the state accumulated while it moves through the
/// pipeline. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedRecord {
    /// The stored record.
    pub record: UserRecord,
    /// Identity augmentation state.
    pub augmentation: Augmentation,
    /// Row produced by a projection stage, if one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projected: Option<Vec<String>>,
}

impl From<UserRecord> for AugmentedRecord {
    fn from(record: UserRecord) -> Self {
        Self {
            record,
            augmentation: Augmentation::Pending,
            projected: None,
        }
    }
}

impl AugmentedRecord {
    /// Internal user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.record.id
    }

    /// Returns the fetched profile when augmentation succeeded.
    #[must_use]
    pub fn profile(&self) -> Option<&IdentityProfile> {
        match &self.augmentation {
            Augmentation::Augmented { profile } => Some(profile),
            _ => None,
        }
    }

    /// Returns true once an augmentation stage has processed the record.
    #[must_use]
    pub fn has_passed_augmentation(&self) -> bool {
        !matches!(self.augmentation, Augmentation::Pending)
    }

    /// Address to send mail to: the verified identity email if known,
    /// otherwise the stored one.
    #[must_use]
    pub fn recipient(&self) -> &str {
        self.profile()
            .and_then(|p| p.verified_email.as_deref())
            .unwrap_or(&self.record.email)
    }

    /// Name to greet the user by.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = self.profile().and_then(|p| p.display_name.clone()) {
            return name;
        }
        format!("{} {}", self.record.first_names, self.record.last_names)
            .trim()
            .to_string()
    }

    /// Returns the stringified value of a named field, identity fields first.
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<String> {
        let profile = self.profile();
        match name {
            "verified_email" => profile.and_then(|p| p.verified_email.clone()),
            "display_name" => Some(self.display_name()).filter(|n| !n.is_empty()),
            "recipient" => Some(self.recipient().to_string()),
            "first_names" => profile
                .and_then(|p| p.first_names.clone())
                .or_else(|| self.record.field_value(name)),
            "last_names" => profile
                .and_then(|p| p.last_names.clone())
                .or_else(|| self.record.field_value(name)),
            _ => self.record.field_value(name),
        }
    }

    /// JSON view handed to template renderers.
    #[must_use]
    pub fn template_data(&self) -> serde_json::Value {
        let mut data = serde_json::to_value(&self.record).unwrap_or_else(|_| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = data {
            map.insert("recipient".to_string(), serde_json::json!(self.recipient()));
            map.insert("display_name".to_string(), serde_json::json!(self.display_name()));
            if let Some(profile) = self.profile() {
                map.insert("identity".to_string(), serde_json::json!(profile));
            }
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record() -> UserRecord {
        UserRecord::new("u1", "kc-1", "stored@example.com").with_names("Ada", "Lovelace")
    }

    #[test]
    fn test_new_record_is_pending() {
        let rec = AugmentedRecord::from(record());
        assert_eq!(rec.augmentation, Augmentation::Pending);
        assert!(!rec.has_passed_augmentation());
        assert_eq!(rec.recipient(), "stored@example.com");
    }

    #[test]
    fn test_recipient_prefers_verified_email() {
        let mut rec = AugmentedRecord::from(record());
        rec.augmentation = Augmentation::Augmented {
            profile: IdentityProfile::new().with_verified_email("verified@example.com"),
        };
        assert_eq!(rec.recipient(), "verified@example.com");
        assert_eq!(rec.field_value("verified_email").as_deref(), Some("verified@example.com"));
    }

    #[test]
    fn test_display_name_fallback() {
        let mut rec = AugmentedRecord::from(record());
        assert_eq!(rec.display_name(), "Ada Lovelace");

        rec.augmentation = Augmentation::Augmented {
            profile: IdentityProfile::new().with_display_name("Countess Ada"),
        };
        assert_eq!(rec.display_name(), "Countess Ada");
    }

    #[test]
    fn test_template_data_includes_derived_fields() {
        let rec = AugmentedRecord::from(record());
        let data = rec.template_data();
        assert_eq!(data["recipient"], "stored@example.com");
        assert_eq!(data["display_name"], "Ada Lovelace");
        assert_eq!(data["first_names"], "Ada");
        assert!(data.get("identity").is_none());
    }
}
