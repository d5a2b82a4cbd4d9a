//! Register/drop for the signed-in student, and the dashboard numbers that
//! follow from their enrollment.

use serde::Serialize;

use crate::error::{EnrollmentError, Result};
use crate::models::{Account, Course};
use crate::session::SessionGate;

/// Courses shown under "recent" on the dashboard.
const RECENT_COURSES: usize = 3;

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct DashboardStats {
    pub registered_count: usize,
    pub available_count: usize,
    pub total_credits: u32,
    pub recent_courses: Vec<Course>,
}

/// Catalog entries the account is registered for, in catalog order.
pub fn registered_courses(account: &Account, courses: &[Course]) -> Vec<Course> {
    courses
        .iter()
        .filter(|course| account.registered_course_ids.contains(&course.id))
        .cloned()
        .collect()
}

pub fn total_credits(courses: &[Course]) -> u32 {
    courses.iter().map(|course| course.credits).sum()
}

pub fn compute_dashboard_stats(account: &Account, courses: &[Course]) -> DashboardStats {
    let registered = registered_courses(account, courses);
    DashboardStats {
        registered_count: registered.len(),
        available_count: courses.iter().filter(|course| course.active).count(),
        total_credits: total_credits(&registered),
        recent_courses: registered.into_iter().take(RECENT_COURSES).collect(),
    }
}

/// Register the signed-in account for `course_id`.
///
/// The service applies both sides of the relation in one transaction; on
/// success the gate's snapshot is reloaded so catalog counts and stats agree.
pub async fn register(gate: &mut SessionGate, course_id: &str) -> Result<()> {
    if !gate.is_signed_in() {
        return Err(EnrollmentError::NotAuthenticated.into());
    }
    gate.gateway().enroll(course_id).await?;
    tracing::info!(course_id, "registered for course");
    reload(gate).await;
    Ok(())
}

/// Drop `course_id` for the signed-in account. Dropping twice reports
/// `NotRegistered` the second time and changes nothing.
pub async fn drop(gate: &mut SessionGate, course_id: &str) -> Result<()> {
    if !gate.is_signed_in() {
        return Err(EnrollmentError::NotAuthenticated.into());
    }
    gate.gateway().withdraw(course_id).await?;
    tracing::info!(course_id, "dropped course");
    reload(gate).await;
    Ok(())
}

// The write has committed by now; a failed reload only leaves the snapshot stale.
async fn reload(gate: &mut SessionGate) {
    if let Err(e) = gate.refresh().await {
        tracing::warn!(error = %e, "snapshot reload after enrollment change failed");
    }
}
