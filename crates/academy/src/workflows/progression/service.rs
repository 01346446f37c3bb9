use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::info;

use super::catalog::{
    CatalogError, DirectoryError, EnrollmentSequence, LevelCatalog, SequenceError, StudentContact,
    StudentDirectory,
};
use super::domain::{
    ActionBucket, ClassId, ClassOccupancy, ClassSection, LevelDefinition, LevelId, PaymentStatus,
    PendingRegistration, ProgressId, ProgressStatus, RegistrationId, RenewalOutcome, RenewalTerms,
    StudentId, StudentLevelProgress,
};
use super::repository::{ProgressStore, SeatLimit, StoreError};

/// Service composing the transactional store with the catalog, directory,
/// and enrollment-number collaborators. Stateless between calls: everything
/// durable lives behind the store.
pub struct ProgressionService<S, C, D, G> {
    store: Arc<S>,
    catalog: Arc<C>,
    directory: Arc<D>,
    sequence: Arc<G>,
}

static PROGRESS_ID_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static REGISTRATION_ID_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_progress_id() -> ProgressId {
    let id = PROGRESS_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ProgressId(format!("slp-{id:06}"))
}

fn next_registration_id() -> RegistrationId {
    let id = REGISTRATION_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RegistrationId(format!("reg-{id:06}"))
}

impl<S, C, D, G> ProgressionService<S, C, D, G>
where
    S: ProgressStore + 'static,
    C: LevelCatalog + 'static,
    D: StudentDirectory + 'static,
    G: EnrollmentSequence + 'static,
{
    pub fn new(store: Arc<S>, catalog: Arc<C>, directory: Arc<D>, sequence: Arc<G>) -> Self {
        Self {
            store,
            catalog,
            directory,
            sequence,
        }
    }

    /// Roster of records at `level_id` needing operator action, each with its
    /// action bucket and directory contact, plus seat availability for every
    /// class at the next level.
    pub fn awaiting_roster(&self, level_id: &LevelId) -> Result<AwaitingRoster, ProgressionError> {
        let level = self.require_level(level_id)?;
        let next = self.catalog.next_level(&level.id)?;

        let records = self.store.awaiting_at_level(level_id)?;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let Some(bucket) = ActionBucket::for_record(&record) else {
                continue;
            };
            if self.is_superseded(&record, next.as_ref())? {
                continue;
            }
            let student = self.directory.contact(&record.student_id)?;
            entries.push(AwaitingEntry {
                student,
                bucket,
                record,
            });
        }

        let next_level_classes = match &next {
            Some(next) => self.occupancy_at(next)?,
            None => Vec::new(),
        };

        Ok(AwaitingRoster {
            level_id: level.id,
            records: entries,
            next_level_classes,
        })
    }

    /// Open a renewal toward the next level. Operators double-submit
    /// routinely, so a duplicate returns the existing registration's
    /// enrollment number instead of creating a second row.
    pub fn open_renewal(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
        terms: RenewalTerms,
    ) -> Result<RenewalOutcome, ProgressionError> {
        if terms.period.trim().is_empty() {
            return Err(ProgressionError::Validation { field: "period" });
        }

        let record = self.require_latest(student_id, level_id)?;
        require_status(&record, &[ProgressStatus::AwaitingRenewal])?;
        let target = self.require_next_level(level_id)?;
        self.ensure_not_advanced(student_id, &target.id)?;

        if let Some(existing) = self.store.unconfirmed_registration(student_id, &target.id)? {
            return Ok(RenewalOutcome::AlreadyExists {
                enrollment_number: existing.enrollment_number,
            });
        }

        let enrollment_number = self.sequence.next_enrollment_number()?;
        let registration = PendingRegistration {
            id: next_registration_id(),
            student_id: student_id.clone(),
            target_level_id: target.id.clone(),
            period: terms.period,
            enrollment_fee: terms.enrollment_fee,
            monthly_fee: terms.monthly_fee,
            enrollment_number,
            confirmed: false,
            payment_status: None,
        };

        match self.store.open_renewal(&record.id, registration) {
            Ok(created) => {
                info!(
                    student = %created.student_id.0,
                    target_level = %created.target_level_id.0,
                    "renewal opened"
                );
                Ok(RenewalOutcome::Created {
                    enrollment_number: created.enrollment_number,
                })
            }
            // Lost a race against an identical submission: surface the
            // surviving registration as the idempotent result.
            Err(StoreError::Conflict) => {
                let existing = self
                    .store
                    .unconfirmed_registration(student_id, &target.id)?
                    .ok_or(ProgressionError::Conflict)?;
                Ok(RenewalOutcome::AlreadyExists {
                    enrollment_number: existing.enrollment_number,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Confirm a pending renewal into a destination class at the target
    /// level. Capacity is checked atomically with the write; on a full class
    /// nothing changes.
    pub fn confirm_renewal(
        &self,
        registration_id: &RegistrationId,
        destination_class_id: &ClassId,
        payment_status: PaymentStatus,
    ) -> Result<StudentLevelProgress, ProgressionError> {
        let registration = self
            .store
            .registration(registration_id)?
            .ok_or_else(|| ProgressionError::NotFound {
                entity: "registration",
                id: registration_id.0.clone(),
            })?;
        if registration.confirmed {
            return Err(ProgressionError::Precondition {
                detail: format!("registration {} is already confirmed", registration_id.0),
            });
        }

        let section = self.require_section(destination_class_id)?;
        if section.level_id != registration.target_level_id {
            return Err(ProgressionError::Precondition {
                detail: format!(
                    "class {} does not belong to level {}",
                    section.id.0, registration.target_level_id.0
                ),
            });
        }

        let successor = StudentLevelProgress {
            id: next_progress_id(),
            student_id: registration.student_id.clone(),
            level_id: registration.target_level_id.clone(),
            class_id: Some(section.id.clone()),
            status: ProgressStatus::InProgress,
            final_grade: None,
            attempt: self.next_attempt(&registration.student_id, &registration.target_level_id)?,
            start_date: Local::now().date_naive(),
            end_date: None,
            pending_registration_id: None,
        };
        let seat = SeatLimit {
            class_id: section.id,
            capacity_max: section.capacity_max,
        };

        let stored = self
            .store
            .confirm_renewal(registration_id, payment_status, successor, seat)?;
        info!(
            student = %stored.student_id.0,
            level = %stored.level_id.0,
            class = stored.class_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-"),
            "renewal confirmed"
        );
        Ok(stored)
    }

    /// Promote a recovery student straight into the next level. No
    /// pending-registration step: no fee or period negotiation applies.
    pub fn promote(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
        destination_class_id: Option<&ClassId>,
    ) -> Result<StudentLevelProgress, ProgressionError> {
        let record = self.require_latest(student_id, level_id)?;
        require_status(&record, &[ProgressStatus::Recovery])?;
        let target = self.require_next_level(level_id)?;

        let seat = match destination_class_id {
            Some(class_id) => {
                let section = self.require_section(class_id)?;
                if section.level_id != target.id {
                    return Err(ProgressionError::Precondition {
                        detail: format!(
                            "class {} does not belong to level {}",
                            section.id.0, target.id.0
                        ),
                    });
                }
                Some(SeatLimit {
                    class_id: section.id,
                    capacity_max: section.capacity_max,
                })
            }
            // Class assignment deferred to the roster collaborator.
            None => None,
        };

        let successor = StudentLevelProgress {
            id: next_progress_id(),
            student_id: student_id.clone(),
            level_id: target.id.clone(),
            class_id: seat.as_ref().map(|limit| limit.class_id.clone()),
            status: ProgressStatus::InProgress,
            final_grade: None,
            attempt: self.next_attempt(student_id, &target.id)?,
            start_date: Local::now().date_naive(),
            end_date: None,
            pending_registration_id: None,
        };

        let stored =
            self.store
                .promote(&record.id, Local::now().date_naive(), successor, seat)?;
        info!(student = %stored.student_id.0, level = %stored.level_id.0, "student promoted");
        Ok(stored)
    }

    /// Close the record as `failed`, terminal for this attempt. An open
    /// renewal must be resolved first, otherwise the pending linkage would
    /// dangle on a terminal record.
    pub fn fail_level(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
    ) -> Result<(), ProgressionError> {
        let record = self.require_latest(student_id, level_id)?;
        require_status(
            &record,
            &[ProgressStatus::AwaitingRenewal, ProgressStatus::Recovery],
        )?;
        if record.pending_registration_id.is_some() {
            return Err(ProgressionError::Precondition {
                detail: format!(
                    "record {} has an open renewal; confirm or withdraw it first",
                    record.id.0
                ),
            });
        }
        if let Some(next) = self.catalog.next_level(level_id)? {
            self.ensure_not_advanced(student_id, &next.id)?;
        }

        self.store
            .close(&record.id, ProgressStatus::Failed, Local::now().date_naive())?;
        info!(student = %student_id.0, level = %level_id.0, "level failed");
        Ok(())
    }

    /// Enroll the student for another attempt at the same level. The prior
    /// record is retained unchanged as history.
    pub fn repeat_level(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
    ) -> Result<StudentLevelProgress, ProgressionError> {
        let record = self.require_latest(student_id, level_id)?;
        require_status(&record, &[ProgressStatus::Recovery])?;

        let successor = StudentLevelProgress {
            id: next_progress_id(),
            student_id: student_id.clone(),
            level_id: level_id.clone(),
            class_id: None,
            status: ProgressStatus::InProgress,
            final_grade: None,
            attempt: record.attempt + 1,
            start_date: Local::now().date_naive(),
            end_date: None,
            pending_registration_id: None,
        };

        let stored = self.store.insert_progress(successor)?;
        info!(
            student = %student_id.0,
            level = %level_id.0,
            attempt = stored.attempt,
            "level repeated"
        );
        Ok(stored)
    }

    fn occupancy_at(
        &self,
        level: &LevelDefinition,
    ) -> Result<Vec<ClassOccupancy>, ProgressionError> {
        let sections = self.catalog.sections_at(&level.id)?;
        let mut occupancy = Vec::with_capacity(sections.len());
        for section in sections {
            let occupied_count = self.store.occupied_seats(&section.id)?;
            occupancy.push(ClassOccupancy {
                class_id: section.id,
                level_id: section.level_id,
                name: section.name,
                capacity_max: section.capacity_max,
                occupied_count,
            });
        }
        Ok(occupancy)
    }

    /// A roster row is history once an operator has acted on it: either a
    /// newer attempt exists at the same level, or the student already holds a
    /// record at the next level (confirmed renewal). Such rows keep their
    /// stored status but are read as closed.
    fn is_superseded(
        &self,
        record: &StudentLevelProgress,
        next: Option<&LevelDefinition>,
    ) -> Result<bool, ProgressionError> {
        let latest = self
            .store
            .latest_progress(&record.student_id, &record.level_id)?;
        if latest.map(|newest| newest.id) != Some(record.id.clone()) {
            return Ok(true);
        }
        if let Some(next) = next {
            if self
                .store
                .latest_progress(&record.student_id, &next.id)?
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn ensure_not_advanced(
        &self,
        student_id: &StudentId,
        target_level_id: &LevelId,
    ) -> Result<(), ProgressionError> {
        if self
            .store
            .latest_progress(student_id, target_level_id)?
            .is_some()
        {
            return Err(ProgressionError::Precondition {
                detail: format!(
                    "student {} already has a record at level {}",
                    student_id.0, target_level_id.0
                ),
            });
        }
        Ok(())
    }

    fn next_attempt(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
    ) -> Result<u32, ProgressionError> {
        Ok(self
            .store
            .latest_progress(student_id, level_id)?
            .map(|record| record.attempt + 1)
            .unwrap_or(1))
    }

    fn require_level(&self, level_id: &LevelId) -> Result<LevelDefinition, ProgressionError> {
        self.catalog
            .level(level_id)?
            .ok_or_else(|| ProgressionError::NotFound {
                entity: "level",
                id: level_id.0.clone(),
            })
    }

    fn require_next_level(&self, level_id: &LevelId) -> Result<LevelDefinition, ProgressionError> {
        self.catalog
            .next_level(level_id)?
            .ok_or_else(|| ProgressionError::Precondition {
                detail: format!("level {} has no next level to advance into", level_id.0),
            })
    }

    fn require_section(&self, class_id: &ClassId) -> Result<ClassSection, ProgressionError> {
        self.catalog
            .section(class_id)?
            .ok_or_else(|| ProgressionError::NotFound {
                entity: "class",
                id: class_id.0.clone(),
            })
    }

    fn require_latest(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
    ) -> Result<StudentLevelProgress, ProgressionError> {
        self.require_level(level_id)?;
        self.store
            .latest_progress(student_id, level_id)?
            .ok_or_else(|| ProgressionError::NotFound {
                entity: "student record",
                id: format!("{} at {}", student_id.0, level_id.0),
            })
    }
}

fn require_status(
    record: &StudentLevelProgress,
    allowed: &[ProgressStatus],
) -> Result<(), ProgressionError> {
    if allowed.contains(&record.status) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(|status| status.label())
        .collect::<Vec<_>>()
        .join(" or ");
    Err(ProgressionError::Precondition {
        detail: format!(
            "record {} is {}, expected {}",
            record.id.0,
            record.status.label(),
            expected
        ),
    })
}

/// One record in the eligibility roster, annotated for operator display.
#[derive(Debug, Clone, Serialize)]
pub struct AwaitingEntry {
    pub record: StudentLevelProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentContact>,
    pub bucket: ActionBucket,
}

/// Result of the eligibility query for one level.
#[derive(Debug, Clone, Serialize)]
pub struct AwaitingRoster {
    pub level_id: LevelId,
    pub records: Vec<AwaitingEntry>,
    pub next_level_classes: Vec<ClassOccupancy>,
}

/// Error raised by the progression service.
#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    #[error("missing required field: {field}")]
    Validation { field: &'static str },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("precondition failed: {detail}")]
    Precondition { detail: String },
    #[error("class {} is full ({capacity_max} seats)", .class_id.0)]
    CapacityExceeded { class_id: ClassId, capacity_max: u32 },
    #[error("conflicting update detected; refresh the roster and retry")]
    Conflict,
    #[error("storage unavailable: {0}")]
    Store(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

impl From<StoreError> for ProgressionError {
    fn from(value: StoreError) -> Self {
        match value {
            // The service resolves entities before writing; a store-level
            // miss means the state moved underneath us.
            StoreError::Conflict | StoreError::NotFound => Self::Conflict,
            StoreError::CapacityExceeded {
                class_id,
                capacity_max,
            } => Self::CapacityExceeded {
                class_id,
                capacity_max,
            },
            StoreError::Unavailable(detail) => Self::Store(detail),
        }
    }
}
