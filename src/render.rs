//! Plain-text views of the session snapshot. Pure: nothing here touches the
//! gateway, so every view is a function of its arguments.

use std::fmt::Write as _;
use std::time::Duration;

use crate::enrollment::{total_credits, DashboardStats};
use crate::models::{Account, Course};
use crate::session::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

/// A transient message shown after an action, dismissed after `ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub ttl: Duration,
}

impl Notification {
    pub fn success(message: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
            ttl,
        }
    }

    pub fn error(message: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
            ttl,
        }
    }

    pub fn info(message: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kind: NotificationKind::Info,
            message: message.into(),
            ttl,
        }
    }
}

pub fn notification(note: &Notification) -> String {
    let tag = match note.kind {
        NotificationKind::Success => "ok",
        NotificationKind::Error => "error",
        NotificationKind::Info => "info",
    };
    format!("[{tag}] {}", note.message)
}

/// Label of the register button for a course.
pub fn register_label(course: &Course, registered: bool) -> &'static str {
    if registered {
        "Already Registered"
    } else if course.is_full() {
        "Course Full"
    } else {
        "Register for Course"
    }
}

pub fn course_card(course: &Course, registered: bool) -> String {
    let description = if course.description.is_empty() {
        "No description available."
    } else {
        course.description.as_str()
    };
    let mut out = String::new();
    let _ = writeln!(out, "{} ({}){}", course.name, course.code, if course.active { "" } else { " [inactive]" });
    let _ = writeln!(out, "  Department: {}", course.department);
    let _ = writeln!(out, "  Level: {}  Credits: {}", course.level, course.credits);
    let _ = writeln!(out, "  Instructor: {}", course.instructor);
    let _ = writeln!(out, "  Enrollment: {}/{}", course.enrolled(), course.capacity);
    let _ = writeln!(out, "  {description}");
    let _ = writeln!(out, "  id: {}  [{}]", course.id, register_label(course, registered));
    out
}

pub fn course_list(courses: &[Course], app: &AppState) -> String {
    if courses.is_empty() {
        return "No courses found matching your criteria.\n".to_owned();
    }
    courses
        .iter()
        .map(|course| course_card(course, app.is_registered(&course.id)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn registered_courses(courses: &[Course]) -> String {
    if courses.is_empty() {
        return "No courses registered for this semester.\nTotal credits: 0\n".to_owned();
    }
    let mut out = String::new();
    for course in courses {
        let _ = writeln!(out, "{} - {}", course.code, course.name);
        let _ = writeln!(out, "  Credits: {}  Instructor: {}", course.credits, course.instructor);
        let _ = writeln!(out, "  Schedule: To be announced");
        let _ = writeln!(out, "  id: {}  [Drop Course]", course.id);
    }
    let _ = writeln!(out, "Total credits: {}", total_credits(courses));
    out
}

pub fn dashboard(profile: &Account, stats: &DashboardStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Welcome, {}!", profile.display_name());
    let _ = writeln!(out, "Registered courses: {}", stats.registered_count);
    let _ = writeln!(out, "Available courses:  {}", stats.available_count);
    let _ = writeln!(out, "Total credits:      {}", stats.total_credits);
    let _ = writeln!(out, "Recent courses:");
    if stats.recent_courses.is_empty() {
        let _ = writeln!(out, "  No courses registered yet.");
    }
    for course in &stats.recent_courses {
        let _ = writeln!(out, "  {} - {}", course.code, course.name);
    }
    out
}

/// Admin table: every course with its roster size and status.
pub fn admin_courses(courses: &[Course]) -> String {
    if courses.is_empty() {
        return "No courses yet.\n".to_owned();
    }
    let mut out = String::new();
    for course in courses {
        let _ = writeln!(
            out,
            "{:<10} {:<32} {:>4}/{:<4} {:<8} {}",
            course.code,
            course.name,
            course.enrolled(),
            course.capacity,
            if course.active { "active" } else { "inactive" },
            course.id
        );
    }
    out
}

pub fn department_options(departments: &[String]) -> String {
    let mut out = String::from("All Departments\n");
    for department in departments {
        let _ = writeln!(out, "{department}");
    }
    out
}

pub fn profile(account: &Account) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Name:       {}", account.name);
    let _ = writeln!(out, "Email:      {}", account.email);
    let _ = writeln!(out, "Role:       {:?}", account.role);
    let _ = writeln!(out, "Student ID: {}", account.student_id);
    let _ = writeln!(out, "Department: {}", account.department);
    out
}
