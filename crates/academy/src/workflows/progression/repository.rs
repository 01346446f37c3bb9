use chrono::NaiveDate;

use super::domain::{
    ClassId, LevelId, PaymentStatus, PendingRegistration, ProgressId, ProgressStatus,
    RegistrationId, StudentId, StudentLevelProgress,
};

/// Seat limit for an atomic capacity check, resolved from the class roster
/// before the write is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatLimit {
    pub class_id: ClassId,
    pub capacity_max: u32,
}

/// Transactional storage boundary for progress records and registrations.
///
/// Every mutating method is all-or-nothing: implementations apply the whole
/// described write set in one transaction, or nothing at all. The in-memory
/// adapters hold a single lock for the duration of a call; a SQL adapter
/// would use one serializable transaction. The uniqueness rules (at most one
/// unconfirmed registration per student and target level, one record per
/// student, level, and attempt) are enforced here, under the same lock.
pub trait ProgressStore: Send + Sync {
    /// Insert a new progress record, enforcing (student, level, attempt)
    /// uniqueness. `Conflict` when the tuple is taken.
    fn insert_progress(
        &self,
        record: StudentLevelProgress,
    ) -> Result<StudentLevelProgress, StoreError>;

    /// Close a record into a terminal status, stamping its end date.
    /// `Conflict` when the record is already terminal.
    fn close(
        &self,
        id: &ProgressId,
        status: ProgressStatus,
        closed_on: NaiveDate,
    ) -> Result<(), StoreError>;

    /// Most recent attempt for the pair, if any.
    fn latest_progress(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
    ) -> Result<Option<StudentLevelProgress>, StoreError>;

    /// Records at a level whose status asks for operator action
    /// (`awaiting_renewal` or `recovery`).
    fn awaiting_at_level(
        &self,
        level_id: &LevelId,
    ) -> Result<Vec<StudentLevelProgress>, StoreError>;

    fn registration(
        &self,
        id: &RegistrationId,
    ) -> Result<Option<PendingRegistration>, StoreError>;

    /// The unconfirmed registration for (student, target level), if present.
    fn unconfirmed_registration(
        &self,
        student_id: &StudentId,
        target_level_id: &LevelId,
    ) -> Result<Option<PendingRegistration>, StoreError>;

    /// Committed seat count for a class. Reflects only committed data; never
    /// the writes of an in-flight command.
    fn occupied_seats(&self, class_id: &ClassId) -> Result<u32, StoreError>;

    /// Create `registration` and link it to the source record, provided no
    /// unconfirmed registration exists yet for the same student and target
    /// level. `Conflict` otherwise; nothing is written on failure.
    fn open_renewal(
        &self,
        source_id: &ProgressId,
        registration: PendingRegistration,
    ) -> Result<PendingRegistration, StoreError>;

    /// Confirm a registration in one transaction: verify the seat limit,
    /// mark the registration confirmed with its passthrough payment status,
    /// insert `successor`, and clear the pending link on the source record.
    /// On a full class, fails with `CapacityExceeded` and writes nothing.
    fn confirm_renewal(
        &self,
        registration_id: &RegistrationId,
        payment_status: PaymentStatus,
        successor: StudentLevelProgress,
        seat: SeatLimit,
    ) -> Result<StudentLevelProgress, StoreError>;

    /// Close the source record as `passed` and insert `successor` in one
    /// transaction, with an optional seat-limit check.
    fn promote(
        &self,
        source_id: &ProgressId,
        closed_on: NaiveDate,
        successor: StudentLevelProgress,
        seat: Option<SeatLimit>,
    ) -> Result<StudentLevelProgress, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Uniqueness or concurrent-update violation; callers re-read and retry.
    #[error("conflicting write detected")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("class {} is full ({capacity_max} seats)", .class_id.0)]
    CapacityExceeded { class_id: ClassId, capacity_max: u32 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
