use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::workflows::progression::catalog::{
    CatalogError, DirectoryError, EnrollmentSequence, LevelCatalog, SequenceError, StudentContact,
    StudentDirectory,
};
use crate::workflows::progression::domain::{
    ClassId, ClassSection, CourseId, EnrollmentNumber, LevelDefinition, LevelId, PaymentStatus,
    PendingRegistration, ProgressId, ProgressStatus, RegistrationId, RenewalTerms, StudentId,
    StudentLevelProgress,
};
use crate::workflows::progression::repository::{ProgressStore, SeatLimit, StoreError};
use crate::workflows::progression::router::progression_router;
use crate::workflows::progression::service::ProgressionService;

pub(super) type TestService =
    ProgressionService<MemoryStore, MemoryCatalog, MemoryDirectory, CounterSequence>;

pub(super) fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 1).expect("valid date")
}

pub(super) fn renewal_terms() -> RenewalTerms {
    RenewalTerms {
        period: "2026/1".to_string(),
        enrollment_fee: 500,
        monthly_fee: 300,
    }
}

fn level(
    id: &str,
    number: u8,
    name: &str,
    prerequisite: Option<&str>,
) -> LevelDefinition {
    LevelDefinition {
        id: LevelId(id.to_string()),
        course_id: CourseId("course-eng".to_string()),
        level_number: number,
        name: name.to_string(),
        order: number,
        prerequisite_level_id: prerequisite.map(|value| LevelId(value.to_string())),
        duration_months: 6,
    }
}

fn section(id: &str, level_id: &str, name: &str, capacity_max: u32) -> ClassSection {
    ClassSection {
        id: ClassId(id.to_string()),
        level_id: LevelId(level_id.to_string()),
        name: name.to_string(),
        capacity_max,
    }
}

/// Three-level English course. `cls-2a` has a single seat so capacity tests
/// can contend for it directly.
pub(super) fn catalog() -> MemoryCatalog {
    MemoryCatalog {
        levels: vec![
            level("lvl-1", 1, "Basic 1", None),
            level("lvl-2", 2, "Basic 2", Some("lvl-1")),
            level("lvl-3", 3, "Intermediate 1", Some("lvl-2")),
        ],
        sections: vec![
            section("cls-1a", "lvl-1", "Basic 1 - Morning", 30),
            section("cls-2a", "lvl-2", "Basic 2 - Morning", 1),
            section("cls-2b", "lvl-2", "Basic 2 - Evening", 30),
            section("cls-3a", "lvl-3", "Intermediate 1 - Morning", 25),
        ],
    }
}

pub(super) fn directory() -> MemoryDirectory {
    let contacts = [
        ("stu-ana", "Ana Martins", "ana.martins@example.edu"),
        ("stu-bruno", "Bruno Costa", "bruno.costa@example.edu"),
        ("stu-carla", "Carla Dias", "carla.dias@example.edu"),
    ]
    .into_iter()
    .map(|(id, full_name, email)| {
        (
            StudentId(id.to_string()),
            StudentContact {
                id: StudentId(id.to_string()),
                full_name: full_name.to_string(),
                email: email.to_string(),
            },
        )
    })
    .collect();
    MemoryDirectory { contacts }
}

static RECORD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(super) fn record(
    student_id: &str,
    level_id: &str,
    status: ProgressStatus,
) -> StudentLevelProgress {
    record_attempt(student_id, level_id, status, 1)
}

pub(super) fn record_attempt(
    student_id: &str,
    level_id: &str,
    status: ProgressStatus,
    attempt: u32,
) -> StudentLevelProgress {
    let id = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let graded = status != ProgressStatus::InProgress;
    StudentLevelProgress {
        id: ProgressId(format!("seed-{id:04}")),
        student_id: StudentId(student_id.to_string()),
        level_id: LevelId(level_id.to_string()),
        class_id: None,
        status,
        final_grade: graded.then_some(6.5),
        attempt,
        start_date: start_date(),
        end_date: None,
        pending_registration_id: None,
    }
}

/// An active occupant of `class_id`, holding one of its seats.
pub(super) fn record_in_class(
    student_id: &str,
    level_id: &str,
    class_id: &str,
) -> StudentLevelProgress {
    let mut record = record(student_id, level_id, ProgressStatus::InProgress);
    record.class_id = Some(ClassId(class_id.to_string()));
    record
}

pub(super) fn build_service() -> (TestService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let service = ProgressionService::new(
        store.clone(),
        Arc::new(catalog()),
        Arc::new(directory()),
        Arc::new(CounterSequence::default()),
    );
    (service, store)
}

pub(super) fn arc_service() -> (Arc<TestService>, Arc<MemoryStore>) {
    let (service, store) = build_service();
    (Arc::new(service), store)
}

pub(super) fn progression_router_with_service(service: TestService) -> axum::Router {
    progression_router(Arc::new(service))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

#[derive(Default)]
struct StoreState {
    progress: HashMap<ProgressId, StudentLevelProgress>,
    registrations: HashMap<RegistrationId, PendingRegistration>,
}

/// Store fixture: one mutex over the whole dataset, so every trait call is a
/// serializable transaction.
#[derive(Default, Clone)]
pub(super) struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub(super) fn seed(&self, record: StudentLevelProgress) -> StudentLevelProgress {
        self.insert_progress(record).expect("seed record")
    }

    pub(super) fn unconfirmed_count(&self) -> usize {
        let state = self.state.lock().expect("store mutex poisoned");
        state
            .registrations
            .values()
            .filter(|registration| !registration.confirmed)
            .count()
    }

    pub(super) fn progress_by_id(&self, id: &ProgressId) -> Option<StudentLevelProgress> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.progress.get(id).cloned()
    }
}

impl ProgressStore for MemoryStore {
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

        // Checks done; apply the whole write set.
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

#[derive(Default, Clone)]
pub(super) struct MemoryCatalog {
    levels: Vec<LevelDefinition>,
    sections: Vec<ClassSection>,
}

impl LevelCatalog for MemoryCatalog {
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
        Ok(self.sections.iter().find(|section| &section.id == id).cloned())
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryDirectory {
    contacts: HashMap<StudentId, StudentContact>,
}

impl StudentDirectory for MemoryDirectory {
    fn contact(&self, id: &StudentId) -> Result<Option<StudentContact>, DirectoryError> {
        Ok(self.contacts.get(id).cloned())
    }
}

pub(super) struct CounterSequence {
    counter: AtomicU64,
}

impl Default for CounterSequence {
    fn default() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }
}

impl EnrollmentSequence for CounterSequence {
    fn next_enrollment_number(&self) -> Result<EnrollmentNumber, SequenceError> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(EnrollmentNumber(format!("E{id:04}")))
    }
}

/// Store stub simulating an offline database for error-path tests.
pub(super) struct UnavailableStore;

impl ProgressStore for UnavailableStore {
    fn insert_progress(
        &self,
        _record: StudentLevelProgress,
    ) -> Result<StudentLevelProgress, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn close(
        &self,
        _id: &ProgressId,
        _status: ProgressStatus,
        _closed_on: NaiveDate,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn latest_progress(
        &self,
        _student_id: &StudentId,
        _level_id: &LevelId,
    ) -> Result<Option<StudentLevelProgress>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn awaiting_at_level(
        &self,
        _level_id: &LevelId,
    ) -> Result<Vec<StudentLevelProgress>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn registration(
        &self,
        _id: &RegistrationId,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn unconfirmed_registration(
        &self,
        _student_id: &StudentId,
        _target_level_id: &LevelId,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn occupied_seats(&self, _class_id: &ClassId) -> Result<u32, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn open_renewal(
        &self,
        _source_id: &ProgressId,
        _registration: PendingRegistration,
    ) -> Result<PendingRegistration, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn confirm_renewal(
        &self,
        _registration_id: &RegistrationId,
        _payment_status: PaymentStatus,
        _successor: StudentLevelProgress,
        _seat: SeatLimit,
    ) -> Result<StudentLevelProgress, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn promote(
        &self,
        _source_id: &ProgressId,
        _closed_on: NaiveDate,
        _successor: StudentLevelProgress,
        _seat: Option<SeatLimit>,
    ) -> Result<StudentLevelProgress, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}
