//! Seed script for the course registry
//!
//! Populates the sled store named by `REGISTRY_DATA_PATH`:
//! - an admin account (admin@uni.edu / admin123)
//! - a student account (student@uni.edu / student123)
//! - a sample catalog across four departments
//! Run: cargo run --bin load_data (before starting the server)
//! Re-running is safe: existing accounts and courses are left alone.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use course_registry::auth::IdentityService;
use course_registry::config::Settings;
use course_registry::error::{AuthError, Error};
use course_registry::models::{Collection, Course, ProfileFields, Role};
use course_registry::report::ReportEngine;
use course_registry::storage::{to_fields, Storage};
use course_registry::telemetry;

/// code, name, department, level, credits, capacity, instructor, description
const CATALOG: &[(&str, &str, &str, u32, u32, u32, &str, &str)] = &[
    ("BIO101", "Introduction to Biology", "Biology", 100, 3, 30, "Dr. Rosalind Hale", "Cells, genetics and evolution."),
    ("BIO240", "Microbiology", "Biology", 200, 4, 20, "Dr. Louis Park", "Microbial life and lab technique."),
    ("CHM100", "General Chemistry", "Chemistry", 100, 4, 40, "Dr. Marie Lindqvist", ""),
    ("CHM310", "Organic Chemistry II", "Chemistry", 300, 4, 2, "Dr. Marie Lindqvist", "Reaction mechanisms and synthesis."),
    ("CS101", "Programming Fundamentals", "Computer Science", 100, 3, 50, "Prof. Alan Reyes", "Problem solving with a first language."),
    ("CS350", "Operating Systems", "Computer Science", 300, 4, 1, "Prof. Grace Okafor", "Processes, memory and file systems."),
    ("MTH201", "Linear Algebra", "Mathematics", 200, 3, 35, "Prof. Emmy Novak", "Vector spaces and linear maps."),
];

fn ensure_account(identity: &IdentityService, email: &str, password: &str, profile: ProfileFields) -> Result<(), Error> {
    match identity.create_account(email, password, &profile) {
        Ok(id) => {
            println!("Created {email} ({id})");
            Ok(())
        }
        Err(Error::Auth(AuthError::DuplicateAccount)) => {
            println!("{email} already exists, skipping");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();
    let _log_guard = telemetry::init(&settings, "info", "load_data");

    let storage = Storage::open(&settings.data_path)?;
    let identity = Arc::new(IdentityService::new(storage.clone(), settings.auth.clone()));

    ensure_account(
        &identity,
        "admin@uni.edu",
        "admin123",
        ProfileFields {
            name: "Registrar".to_string(),
            role: Role::Admin,
            ..Default::default()
        },
    )?;
    ensure_account(
        &identity,
        "student@uni.edu",
        "student123",
        ProfileFields {
            name: "Sam Student".to_string(),
            role: Role::Student,
            student_id: "S-0001".to_string(),
            department: "Biology".to_string(),
        },
    )?;

    let now = Utc::now();
    let mut loaded = 0;
    for &(code, name, department, level, credits, capacity, instructor, description) in CATALOG {
        let id = code.to_lowercase();
        if storage.get_doc(Collection::Courses, &id).is_ok() {
            continue;
        }
        let course = Course {
            id,
            code: code.to_string(),
            name: name.to_string(),
            department: department.to_string(),
            level,
            credits,
            capacity,
            instructor: instructor.to_string(),
            description: description.to_string(),
            registered_student_ids: BTreeSet::new(),
            active: true,
            created_at: Some(now),
        };
        storage.set_doc(Collection::Courses, &course.id, &to_fields(&course)?)?;
        loaded += 1;
    }
    storage.flush()?;
    println!("Loaded {loaded} new courses into {}", settings.data_path);

    // Sanity check through the reporting path
    let courses: Vec<Course> = storage.list_records(Collection::Courses)?;
    let summary = ReportEngine::new(&courses)?.enrollment_by_department().await?;
    println!("{}", summary.columns.join("\t"));
    for row in &summary.rows {
        println!("{}", row.join("\t"));
    }
    Ok(())
}
