use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for students known to the directory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId(pub String);

/// Identifier wrapper for a course in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseId(pub String);

/// Identifier wrapper for a level within a course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelId(pub String);

/// Identifier wrapper for a class section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub String);

/// Identifier wrapper for a student-level progress record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressId(pub String);

/// Identifier wrapper for a pending renewal registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub String);

/// Enrollment number issued by the sequence collaborator; the engine treats
/// it as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentNumber(pub String);

/// An ordered stage within a multi-level course, owned by the level catalog.
/// Immutable once students are enrolled against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDefinition {
    pub id: LevelId,
    pub course_id: CourseId,
    pub level_number: u8,
    pub name: String,
    pub order: u8,
    pub prerequisite_level_id: Option<LevelId>,
    pub duration_months: u8,
}

/// A class group defined at a level, with its seat limit. Owned by the class
/// roster collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSection {
    pub id: ClassId,
    pub level_id: LevelId,
    pub name: String,
    pub capacity_max: u32,
}

/// Lifecycle of one (student, level, attempt) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    AwaitingTransition,
    AwaitingRenewal,
    Recovery,
    Passed,
    Failed,
    Withdrawn,
}

impl ProgressStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::AwaitingTransition => "awaiting_transition",
            ProgressStatus::AwaitingRenewal => "awaiting_renewal",
            ProgressStatus::Recovery => "recovery",
            ProgressStatus::Passed => "passed",
            ProgressStatus::Failed => "failed",
            ProgressStatus::Withdrawn => "withdrawn",
        }
    }

    /// Terminal statuses are never mutated again by any command.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressStatus::Passed | ProgressStatus::Failed | ProgressStatus::Withdrawn
        )
    }
}

/// One attempt by a student at a level. History is append-only: a closed
/// record stays in place with its terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentLevelProgress {
    pub id: ProgressId,
    pub student_id: StudentId,
    pub level_id: LevelId,
    pub class_id: Option<ClassId>,
    pub status: ProgressStatus,
    pub final_grade: Option<f32>,
    pub attempt: u32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub pending_registration_id: Option<RegistrationId>,
}

impl StudentLevelProgress {
    /// Only an active record keeps its class seat occupied; closed history
    /// rows release the seat.
    pub fn holds_seat_in(&self, class_id: &ClassId) -> bool {
        self.status == ProgressStatus::InProgress && self.class_id.as_ref() == Some(class_id)
    }
}

/// An unconfirmed renewal request awaiting class assignment and confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub id: RegistrationId,
    pub student_id: StudentId,
    pub target_level_id: LevelId,
    pub period: String,
    pub enrollment_fee: u32,
    pub monthly_fee: u32,
    pub enrollment_number: EnrollmentNumber,
    pub confirmed: bool,
    /// Passthrough billing status captured at confirmation; never validated
    /// by this engine.
    pub payment_status: Option<PaymentStatus>,
}

/// Terms captured when an operator opens a renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalTerms {
    pub period: String,
    pub enrollment_fee: u32,
    pub monthly_fee: u32,
}

/// Opaque billing status carried through confirmation without validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Waived,
    Overdue,
}

/// Derived seat usage for a class section; computed from committed records,
/// never stored independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOccupancy {
    pub class_id: ClassId,
    pub level_id: LevelId,
    pub name: String,
    pub capacity_max: u32,
    pub occupied_count: u32,
}

impl ClassOccupancy {
    pub const fn has_seat(&self) -> bool {
        self.occupied_count < self.capacity_max
    }
}

/// Operator action required for an awaiting record, derived from the record
/// itself rather than a stored flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionBucket {
    EligibleForRenewal,
    PendingConfirmation,
    Recovery,
}

impl ActionBucket {
    /// Classify a record, or `None` when no operator action applies.
    pub fn for_record(record: &StudentLevelProgress) -> Option<Self> {
        match record.status {
            ProgressStatus::AwaitingRenewal if record.pending_registration_id.is_none() => {
                Some(Self::EligibleForRenewal)
            }
            ProgressStatus::AwaitingRenewal => Some(Self::PendingConfirmation),
            ProgressStatus::Recovery => Some(Self::Recovery),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ActionBucket::EligibleForRenewal => "eligible_for_renewal",
            ActionBucket::PendingConfirmation => "pending_confirmation",
            ActionBucket::Recovery => "recovery",
        }
    }
}

/// Tagged outcome of opening a renewal. A duplicate submission is a
/// successful idempotent result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    Created { enrollment_number: EnrollmentNumber },
    AlreadyExists { enrollment_number: EnrollmentNumber },
}

impl RenewalOutcome {
    pub fn enrollment_number(&self) -> &EnrollmentNumber {
        match self {
            RenewalOutcome::Created { enrollment_number }
            | RenewalOutcome::AlreadyExists { enrollment_number } => enrollment_number,
        }
    }

    pub const fn already_exists(&self) -> bool {
        matches!(self, RenewalOutcome::AlreadyExists { .. })
    }

    pub fn view(&self) -> RenewalView {
        RenewalView {
            enrollment_number: self.enrollment_number().clone(),
            already_exists: self.already_exists(),
        }
    }
}

/// Wire view of a renewal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenewalView {
    pub enrollment_number: EnrollmentNumber,
    pub already_exists: bool,
}
