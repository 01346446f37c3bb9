use academy::workflows::progression::{
    CatalogError, ClassId, ClassSection, CourseId, DirectoryError, EnrollmentNumber,
    EnrollmentSequence, LevelCatalog, LevelDefinition, LevelId, PaymentStatus,
    PendingRegistration, ProgressId, ProgressStatus, ProgressStore, RegistrationId, SeatLimit,
    SequenceError, StoreError, StudentContact, StudentDirectory, StudentId, StudentLevelProgress,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
struct StoreState {
    progress: HashMap<ProgressId, StudentLevelProgress>,
    registrations: HashMap<RegistrationId, PendingRegistration>,
}

/// In-memory progress store. One mutex covers the whole dataset, so every
/// trait call runs as a serializable transaction; a database-backed adapter
/// would hold one SQL transaction per call instead.
#[derive(Default, Clone)]
pub(crate) struct InMemoryProgressStore {
    state: Arc<Mutex<StoreState>>,
}

impl ProgressStore for InMemoryProgressStore {
    fn insert_progress(
        &self,
        record: StudentLevelProgress,
    ) -> Result<StudentLevelProgress, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let taken = state.progress.values().any(|existing| {
            existing.student_id == record.student_id
                && existing.level_id == record.level_id
                && existing.attempt == record.attempt
        });
        if taken {
            return Err(StoreError::Conflict);
        }
        state.progress.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn close(
        &self,
        id: &ProgressId,
        status: ProgressStatus,
        closed_on: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let record = state.progress.get_mut(id).ok_or(StoreError::NotFound)?;
        if record.status.is_terminal() {
            return Err(StoreError::Conflict);
        }
        record.status = status;
        record.end_date = Some(closed_on);
        Ok(())
    }

    fn latest_progress(
        &self,
        student_id: &StudentId,
        level_id: &LevelId,
    ) -> Result<Option<StudentLevelProgress>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .progress
            .values()
            .filter(|record| &record.student_id == student_id && &record.level_id == level_id)
            .max_by_key(|record| record.attempt)
            .cloned())
    }

    fn awaiting_at_level(
        &self,
        level_id: &LevelId,
    ) -> Result<Vec<StudentLevelProgress>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut records: Vec<_> = state
            .progress
            .values()
            .filter(|record| {
                &record.level_id == level_id
                    && matches!(
                        record.status,
                        ProgressStatus::AwaitingRenewal | ProgressStatus::Recovery
                    )
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.student_id.0.cmp(&b.student_id.0));
        Ok(records)
    }

    fn registration(
        &self,
        id: &RegistrationId,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.registrations.get(id).cloned())
    }

    fn unconfirmed_registration(
        &self,
        student_id: &StudentId,
        target_level_id: &LevelId,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .registrations
            .values()
            .find(|registration| {
                !registration.confirmed
                    && &registration.student_id == student_id
                    && &registration.target_level_id == target_level_id
            })
            .cloned())
    }

    fn occupied_seats(&self, class_id: &ClassId) -> Result<u32, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .progress
            .values()
            .filter(|record| record.holds_seat_in(class_id))
            .count() as u32)
    }

    fn open_renewal(
        &self,
        source_id: &ProgressId,
        registration: PendingRegistration,
    ) -> Result<PendingRegistration, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let duplicate = state.registrations.values().any(|existing| {
            !existing.confirmed
                && existing.student_id == registration.student_id
                && existing.target_level_id == registration.target_level_id
        });
        if duplicate {
            return Err(StoreError::Conflict);
        }
        let source = state
            .progress
            .get_mut(source_id)
            .ok_or(StoreError::NotFound)?;
        if source.pending_registration_id.is_some() {
            return Err(StoreError::Conflict);
        }
        source.pending_registration_id = Some(registration.id.clone());
        state
            .registrations
            .insert(registration.id.clone(), registration.clone());
        Ok(registration)
    }

    fn confirm_renewal(
        &self,
        registration_id: &RegistrationId,
        payment_status: PaymentStatus,
        successor: StudentLevelProgress,
        seat: SeatLimit,
    ) -> Result<StudentLevelProgress, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let confirmed = state
            .registrations
            .get(registration_id)
            .ok_or(StoreError::NotFound)?
            .confirmed;
        if confirmed {
            return Err(StoreError::Conflict);
        }
        let occupied = state
            .progress
            .values()
            .filter(|record| record.holds_seat_in(&seat.class_id))
            .count() as u32;
        if occupied >= seat.capacity_max {
            return Err(StoreError::CapacityExceeded {
                class_id: seat.class_id,
                capacity_max: seat.capacity_max,
            });
        }
        let taken = state.progress.values().any(|existing| {
            existing.student_id == successor.student_id
                && existing.level_id == successor.level_id
                && existing.attempt == successor.attempt
        });
        if taken {
            return Err(StoreError::Conflict);
        }

        // All checks passed; apply the full write set.
        if let Some(registration) = state.registrations.get_mut(registration_id) {
            registration.confirmed = true;
            registration.payment_status = Some(payment_status);
        }
        if let Some(source) = state
            .progress
            .values_mut()
            .find(|record| record.pending_registration_id.as_ref() == Some(registration_id))
        {
            source.pending_registration_id = None;
        }
        state
            .progress
            .insert(successor.id.clone(), successor.clone());
        Ok(successor)
    }

    fn promote(
        &self,
        source_id: &ProgressId,
        closed_on: NaiveDate,
        successor: StudentLevelProgress,
        seat: Option<SeatLimit>,
    ) -> Result<StudentLevelProgress, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let source_status = state
            .progress
            .get(source_id)
            .ok_or(StoreError::NotFound)?
            .status;
        if source_status.is_terminal() {
            return Err(StoreError::Conflict);
        }
        if let Some(seat) = &seat {
            let occupied = state
                .progress
                .values()
                .filter(|record| record.holds_seat_in(&seat.class_id))
                .count() as u32;
            if occupied >= seat.capacity_max {
                return Err(StoreError::CapacityExceeded {
                    class_id: seat.class_id.clone(),
                    capacity_max: seat.capacity_max,
                });
            }
        }
        let taken = state.progress.values().any(|existing| {
            existing.student_id == successor.student_id
                && existing.level_id == successor.level_id
                && existing.attempt == successor.attempt
        });
        if taken {
            return Err(StoreError::Conflict);
        }

        if let Some(source) = state.progress.get_mut(source_id) {
            source.status = ProgressStatus::Passed;
            source.end_date = Some(closed_on);
        }
        state
            .progress
            .insert(successor.id.clone(), successor.clone());
        Ok(successor)
    }
}

/// Fixed catalog for the General English track. Real deployments read the
/// catalog from the course-authoring service instead.
#[derive(Default, Clone)]
pub(crate) struct InMemoryLevelCatalog {
    levels: Vec<LevelDefinition>,
    sections: Vec<ClassSection>,
}

impl InMemoryLevelCatalog {
    pub(crate) fn standard() -> Self {
        let course = CourseId("general-english".to_string());
        let names = [
            "Basic 1",
            "Basic 2",
            "Intermediate 1",
            "Intermediate 2",
            "Advanced 1",
        ];

        let mut levels = Vec::with_capacity(names.len());
        let mut sections = Vec::with_capacity(names.len() * 2);
        for (index, name) in names.iter().enumerate() {
            let number = index as u8 + 1;
            let id = LevelId(format!("lvl-{number}"));
            levels.push(LevelDefinition {
                id: id.clone(),
                course_id: course.clone(),
                level_number: number,
                name: (*name).to_string(),
                order: number,
                prerequisite_level_id: (number > 1).then(|| LevelId(format!("lvl-{}", number - 1))),
                duration_months: 6,
            });
            sections.push(ClassSection {
                id: ClassId(format!("cls-{number}-morning")),
                level_id: id.clone(),
                name: format!("{name} - Morning"),
                capacity_max: 20,
            });
            sections.push(ClassSection {
                id: ClassId(format!("cls-{number}-evening")),
                level_id: id,
                name: format!("{name} - Evening"),
                capacity_max: 16,
            });
        }

        Self { levels, sections }
    }
}

impl LevelCatalog for InMemoryLevelCatalog {
    fn level(&self, id: &LevelId) -> Result<Option<LevelDefinition>, CatalogError> {
        Ok(self.levels.iter().find(|level| &level.id == id).cloned())
    }

    fn next_level(&self, id: &LevelId) -> Result<Option<LevelDefinition>, CatalogError> {
        let Some(current) = self.levels.iter().find(|level| &level.id == id) else {
            return Ok(None);
        };
        Ok(self
            .levels
            .iter()
            .filter(|level| level.course_id == current.course_id && level.order > current.order)
            .min_by_key(|level| level.order)
            .cloned())
    }

    fn sections_at(&self, level_id: &LevelId) -> Result<Vec<ClassSection>, CatalogError> {
        Ok(self
            .sections
            .iter()
            .filter(|section| &section.level_id == level_id)
            .cloned()
            .collect())
    }

    fn section(&self, id: &ClassId) -> Result<Option<ClassSection>, CatalogError> {
        Ok(self
            .sections
            .iter()
            .find(|section| &section.id == id)
            .cloned())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryStudentDirectory {
    contacts: Arc<Mutex<HashMap<StudentId, StudentContact>>>,
}

impl InMemoryStudentDirectory {
    pub(crate) fn upsert(&self, contact: StudentContact) {
        let mut contacts = self.contacts.lock().expect("directory mutex poisoned");
        contacts.insert(contact.id.clone(), contact);
    }
}

impl StudentDirectory for InMemoryStudentDirectory {
    fn contact(&self, id: &StudentId) -> Result<Option<StudentContact>, DirectoryError> {
        let contacts = self.contacts.lock().expect("directory mutex poisoned");
        Ok(contacts.get(id).cloned())
    }
}

/// Sequential enrollment numbers. The numbering scheme belongs to this
/// adapter; nothing downstream parses it.
pub(crate) struct CounterEnrollmentSequence {
    counter: AtomicU64,
}

impl Default for CounterEnrollmentSequence {
    fn default() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }
}

impl EnrollmentSequence for CounterEnrollmentSequence {
    fn next_enrollment_number(&self) -> Result<EnrollmentNumber, SequenceError> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(EnrollmentNumber(format!("ENR-{id:05}")))
    }
}
