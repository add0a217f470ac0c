//! Record types flowing through the pipelines.
//!
//! [`UserRecord`] is the stored snapshot of one applicant. Sources wrap each
//! one in an [`AugmentedRecord`], which carries identity data and projection
//! output for the duration of a single run.

mod augmented;
mod user;

pub use augmented::{Augmentation, AugmentedRecord, IdentityProfile};
pub use user::{ApplicationStatus, ConsentFlags, TicketMarker, UserRecord};
