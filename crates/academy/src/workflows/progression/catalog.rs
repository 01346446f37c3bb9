use serde::{Deserialize, Serialize};

use super::domain::{ClassId, ClassSection, EnrollmentNumber, LevelDefinition, LevelId, StudentId};

/// Read-only view over the course catalog consumed by the progression
/// engine. Level ordering and class rosters are owned by the surrounding
/// application; the engine only looks them up.
pub trait LevelCatalog: Send + Sync {
    fn level(&self, id: &LevelId) -> Result<Option<LevelDefinition>, CatalogError>;

    /// The level that follows `id` within its course, by `order`. `None` for
    /// the last level of a course.
    fn next_level(&self, id: &LevelId) -> Result<Option<LevelDefinition>, CatalogError>;

    fn sections_at(&self, level_id: &LevelId) -> Result<Vec<ClassSection>, CatalogError>;

    fn section(&self, id: &ClassId) -> Result<Option<ClassSection>, CatalogError>;
}

/// Error enumeration for catalog lookups.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Display contact for a student, sourced from the directory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentContact {
    pub id: StudentId,
    pub full_name: String,
    pub email: String,
}

/// Read-only student directory lookup used for roster display. Never mutated
/// through this engine.
pub trait StudentDirectory: Send + Sync {
    fn contact(&self, id: &StudentId) -> Result<Option<StudentContact>, DirectoryError>;
}

/// Error enumeration for directory lookups.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Issues enrollment numbers for new registrations. The numbering scheme is
/// owned by the implementation; the engine never parses the value.
pub trait EnrollmentSequence: Send + Sync {
    fn next_enrollment_number(&self) -> Result<EnrollmentNumber, SequenceError>;
}

/// Error enumeration for the enrollment-number sequence.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("enrollment sequence unavailable: {0}")]
    Unavailable(String),
}
