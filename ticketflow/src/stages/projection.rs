//! Attribute projection for partner exports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{RecordStage, StageOutcome};
use crate::errors::TicketflowError;
use crate::records::AugmentedRecord;

/// One output column: the field it reads and the label it is written under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Field name understood by [`AugmentedRecord::field_value`].
    pub field: String,
    /// Column label.
    pub label: String,
}

impl Attribute {
    /// Creates an attribute.
    #[must_use]
    pub fn new(field: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            label: label.into(),
        }
    }

    /// An attribute whose label equals its field name.
    #[must_use]
    pub fn same(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            label: field.clone(),
            field,
        }
    }
}

/// Ordered list of attributes defining an export schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeProjection {
    attributes: Vec<Attribute>,
}

impl AttributeProjection {
    /// Creates a projection from attributes in column order.
    #[must_use]
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    /// Projection for the HUK partner export.
    #[must_use]
    pub fn huk() -> Self {
        Self::partner("huk")
    }

    /// Demographic columns followed by the consent flags of `partner`.
    #[must_use]
    pub fn partner(partner: &str) -> Self {
        let mut attributes: Vec<Attribute> = [
            "first_names",
            "last_names",
            "email",
            "phone",
            "university",
            "graduation_year",
            "ethnicity",
            "gender",
            "application_status",
        ]
        .into_iter()
        .map(Attribute::same)
        .collect();
        attributes.push(Attribute::new(
            format!("consent.{partner}.marketing"),
            format!("{partner}_marketing_consent"),
        ));
        attributes.push(Attribute::new(
            format!("consent.{partner}.privacy"),
            format!("{partner}_privacy_consent"),
        ));
        Self { attributes }
    }

    /// Returns the attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Column labels in order.
    #[must_use]
    pub fn header(&self) -> Vec<String> {
        self.attributes.iter().map(|a| a.label.clone()).collect()
    }

    /// Projects a record to one row. Missing fields become empty cells.
    #[must_use]
    pub fn project(&self, record: &AugmentedRecord) -> Vec<String> {
        self.attributes
            .iter()
            .map(|a| record.field_value(&a.field).unwrap_or_default())
            .collect()
    }
}

/// Stage that stores the projected row on the record.
#[derive(Debug, Clone)]
pub struct ProjectionStage {
    name: String,
    projection: AttributeProjection,
}

impl ProjectionStage {
    /// Creates a projection stage.
    #[must_use]
    pub fn new(projection: AttributeProjection) -> Self {
        Self {
            name: "projection".to_string(),
            projection,
        }
    }

    /// Returns the projection.
    #[must_use]
    pub fn projection(&self) -> &AttributeProjection {
        &self.projection
    }
}

#[async_trait]
impl RecordStage for ProjectionStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut record: AugmentedRecord) -> Result<StageOutcome, TicketflowError> {
        record.projected = Some(self.projection.project(&record));
        Ok(StageOutcome::emit(record))
    }
}
