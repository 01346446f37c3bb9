//! Student level-progression and renewal engine.
//!
//! Drives how a student advances through the ordered levels of a multi-level
//! course: renewal into the next level, direct promotion out of recovery,
//! repeated attempts, and terminal failure. The five transition commands and
//! the eligibility query live behind [`service::ProgressionService`]; the
//! transactional guarantees (one unconfirmed registration per student and
//! target level, seats never over-booked) are contracts of the
//! [`repository::ProgressStore`] boundary.

pub mod catalog;
pub mod domain;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use catalog::{
    CatalogError, DirectoryError, EnrollmentSequence, LevelCatalog, SequenceError, StudentContact,
    StudentDirectory,
};
pub use domain::{
    ActionBucket, ClassId, ClassOccupancy, ClassSection, CourseId, EnrollmentNumber,
    LevelDefinition, LevelId, PaymentStatus, PendingRegistration, ProgressId, ProgressStatus,
    RegistrationId, RenewalOutcome, RenewalTerms, RenewalView, StudentId, StudentLevelProgress,
};
pub use repository::{ProgressStore, SeatLimit, StoreError};
pub use router::progression_router;
pub use service::{AwaitingEntry, AwaitingRoster, ProgressionError, ProgressionService};
