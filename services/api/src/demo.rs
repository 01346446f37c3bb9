use crate::infra::{
    CounterEnrollmentSequence, InMemoryLevelCatalog, InMemoryProgressStore,
    InMemoryStudentDirectory,
};
use academy::error::AppError;
use academy::workflows::progression::{
    AwaitingRoster, ClassId, LevelId, PaymentStatus, ProgressId, ProgressStatus, ProgressStore,
    ProgressionError, ProgressionService, RenewalTerms, StudentContact, StudentId,
    StudentLevelProgress,
};
use chrono::{Duration, Local};
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Enrollment period recorded on the opened renewal (defaults to 2026/1)
    #[arg(long)]
    pub(crate) period: Option<String>,
    /// Print the destination-level roster after the walkthrough
    #[arg(long)]
    pub(crate) list_destination: bool,
}

type DemoService = ProgressionService<
    InMemoryProgressStore,
    InMemoryLevelCatalog,
    InMemoryStudentDirectory,
    CounterEnrollmentSequence,
>;

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        period,
        list_destination,
    } = args;
    let period = period.unwrap_or_else(|| "2026/1".to_string());

    let store = Arc::new(InMemoryProgressStore::default());
    let directory = Arc::new(InMemoryStudentDirectory::default());
    let service: DemoService = ProgressionService::new(
        store.clone(),
        Arc::new(InMemoryLevelCatalog::standard()),
        directory.clone(),
        Arc::new(CounterEnrollmentSequence::default()),
    );

    println!("Level progression demo (General English, Basic 1)");
    seed_students(&store, &directory)?;

    let basic_1 = LevelId("lvl-1".to_string());
    let roster = service.awaiting_roster(&basic_1)?;
    render_roster("Basic 1", &roster);

    let ana = StudentId("stu-0001".to_string());
    let terms = RenewalTerms {
        period,
        enrollment_fee: 500,
        monthly_fee: 300,
    };

    println!("\nOpening Ana's renewal into Basic 2");
    let outcome = service.open_renewal(&ana, &basic_1, terms.clone())?;
    println!(
        "- enrollment number {} (already existed: {})",
        outcome.enrollment_number().0,
        outcome.already_exists()
    );

    println!("Submitting the same renewal again (double click)");
    let duplicate = service.open_renewal(&ana, &basic_1, terms)?;
    println!(
        "- enrollment number {} (already existed: {})",
        duplicate.enrollment_number().0,
        duplicate.already_exists()
    );

    let registration = store
        .unconfirmed_registration(&ana, &LevelId("lvl-2".to_string()))
        .map_err(ProgressionError::from)?
        .expect("registration just opened");
    println!("Confirming the renewal into Basic 2 - Morning");
    let confirmed = service.confirm_renewal(
        &registration.id,
        &ClassId("cls-2-morning".to_string()),
        PaymentStatus::Pending,
    )?;
    println!(
        "- {} now in_progress at {} (attempt {})",
        confirmed.student_id.0, confirmed.level_id.0, confirmed.attempt
    );

    println!("\nPromoting Bruno out of recovery into Basic 2 - Evening");
    let promoted = service.promote(
        &StudentId("stu-0002".to_string()),
        &basic_1,
        Some(&ClassId("cls-2-evening".to_string())),
    )?;
    println!(
        "- {} promoted to {} (attempt {})",
        promoted.student_id.0, promoted.level_id.0, promoted.attempt
    );

    println!("\nCarla repeats Basic 1");
    let repeated = service.repeat_level(&StudentId("stu-0003".to_string()), &basic_1)?;
    println!("- new attempt {}", repeated.attempt);

    println!("\nDiego did not return; recording the failure");
    service.fail_level(&StudentId("stu-0004".to_string()), &basic_1)?;
    println!("- record closed as failed");

    let roster = service.awaiting_roster(&basic_1)?;
    render_roster("Basic 1 (after the walkthrough)", &roster);

    if list_destination {
        let destination = service.awaiting_roster(&LevelId("lvl-2".to_string()))?;
        render_roster("Basic 2", &destination);
    }

    Ok(())
}

fn seed_students(
    store: &Arc<InMemoryProgressStore>,
    directory: &Arc<InMemoryStudentDirectory>,
) -> Result<(), AppError> {
    let roster = [
        ("stu-0001", "Ana Martins", ProgressStatus::AwaitingRenewal),
        ("stu-0002", "Bruno Costa", ProgressStatus::Recovery),
        ("stu-0003", "Carla Dias", ProgressStatus::Recovery),
        ("stu-0004", "Diego Alves", ProgressStatus::AwaitingRenewal),
    ];

    let start_date = Local::now().date_naive() - Duration::days(180);
    for (index, (student_id, full_name, status)) in roster.into_iter().enumerate() {
        directory.upsert(StudentContact {
            id: StudentId(student_id.to_string()),
            full_name: full_name.to_string(),
            email: format!("{student_id}@academy.example.edu"),
        });
        store
            .insert_progress(StudentLevelProgress {
                id: ProgressId(format!("demo-slp-{}", index + 1)),
                student_id: StudentId(student_id.to_string()),
                level_id: LevelId("lvl-1".to_string()),
                class_id: None,
                status,
                final_grade: Some(6.0),
                attempt: 1,
                start_date,
                end_date: None,
                pending_registration_id: None,
            })
            .map_err(academy::workflows::progression::ProgressionError::from)?;
    }
    Ok(())
}

fn render_roster(label: &str, roster: &AwaitingRoster) {
    println!("\nAwaiting action at {label}");
    if roster.records.is_empty() {
        println!("- none");
    }
    for entry in &roster.records {
        let name = entry
            .student
            .as_ref()
            .map(|contact| contact.full_name.as_str())
            .unwrap_or("(unknown student)");
        println!(
            "- {} ({}) | attempt {} | {}",
            name,
            entry.record.student_id.0,
            entry.record.attempt,
            entry.bucket.label()
        );
    }

    if roster.next_level_classes.is_empty() {
        println!("Destination classes: none (last level of the course)");
    } else {
        println!("Destination classes");
        for occupancy in &roster.next_level_classes {
            println!(
                "- {}: {}/{} seats",
                occupancy.name, occupancy.occupied_count, occupancy.capacity_max
            );
        }
    }
}
