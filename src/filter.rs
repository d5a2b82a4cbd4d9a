//! Catalog filtering for the course list.

use crate::models::Course;

/// Criteria from the catalog's filter bar. `None` and empty strings match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseFilter {
    pub department: Option<String>,
    pub level: Option<u32>,
    pub credits: Option<u32>,
    pub search: Option<String>,
}

impl CourseFilter {
    pub fn is_empty(&self) -> bool {
        non_blank(&self.department).is_none()
            && self.level.is_none()
            && self.credits.is_none()
            && non_blank(&self.search).is_none()
    }

    pub fn matches(&self, course: &Course) -> bool {
        if let Some(department) = non_blank(&self.department) {
            if course.department != department {
                return false;
            }
        }
        if self.level.is_some_and(|level| course.level != level) {
            return false;
        }
        if self.credits.is_some_and(|credits| course.credits != credits) {
            return false;
        }
        match non_blank(&self.search) {
            Some(needle) => {
                let needle = needle.to_lowercase();
                [&course.name, &course.code, &course.instructor, &course.department]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
            None => true,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Courses matching `criteria`, in their original order.
pub fn filter(courses: &[Course], criteria: &CourseFilter) -> Vec<Course> {
    courses.iter().filter(|course| criteria.matches(course)).cloned().collect()
}

/// Distinct departments in first-seen order, for the department dropdown.
pub fn departments(courses: &[Course]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for course in courses {
        if !seen.contains(&course.department) {
            seen.push(course.department.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(id: &str, code: &str, name: &str, department: &str, level: u32, credits: u32) -> Course {
        Course {
            id: id.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            department: department.to_string(),
            level,
            credits,
            capacity: 30,
            instructor: "Dr. Smith".to_string(),
            description: String::new(),
            registered_student_ids: Default::default(),
            active: true,
            created_at: None,
        }
    }

    fn catalog() -> Vec<Course> {
        vec![
            course("c1", "BIO101", "Cells and Life", "Biology", 100, 3),
            course("c2", "CHM100", "General Chemistry", "Chemistry", 100, 4),
            course("c3", "BIO301", "Genetics", "Biology", 300, 3),
            course("c4", "CS200", "Data Structures", "Computer Science", 200, 4),
        ]
    }

    fn ids(courses: &[Course]) -> Vec<&str> {
        courses.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn search_text_matches_code_case_insensitively() {
        let courses = vec![catalog()[0].clone(), catalog()[1].clone()];
        let criteria = CourseFilter {
            search: Some("bio".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter(&courses, &criteria)), vec!["c1"]);
    }

    #[test]
    fn empty_criteria_return_input_unchanged() {
        let courses = catalog();
        let blank = CourseFilter {
            department: Some(String::new()),
            search: Some(String::new()),
            ..Default::default()
        };
        assert!(blank.is_empty());
        assert_eq!(filter(&courses, &blank), courses);
        assert_eq!(filter(&courses, &CourseFilter::default()), courses);
    }

    #[test]
    fn criteria_combine_and_preserve_order() {
        let courses = catalog();
        let criteria = CourseFilter {
            department: Some("Biology".to_string()),
            credits: Some(3),
            ..Default::default()
        };
        assert_eq!(ids(&filter(&courses, &criteria)), vec!["c1", "c3"]);

        let criteria = CourseFilter {
            level: Some(100),
            search: Some("smith".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter(&courses, &criteria)), vec!["c1", "c2"]);
    }

    #[test]
    fn search_covers_department_and_unmatched_is_empty() {
        let courses = catalog();
        let criteria = CourseFilter {
            search: Some("computer".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter(&courses, &criteria)), vec!["c4"]);

        let criteria = CourseFilter {
            department: Some("Physics".to_string()),
            ..Default::default()
        };
        assert!(filter(&courses, &criteria).is_empty());
    }

    #[test]
    fn output_is_always_an_ordered_subsequence() {
        let courses = catalog();
        let searches = ["", "b", "o", "data", "gen", "zzz"];
        for search in searches {
            for level in [None, Some(100), Some(300)] {
                let criteria = CourseFilter {
                    level,
                    search: Some(search.to_string()),
                    ..Default::default()
                };
                let out = filter(&courses, &criteria);
                let mut cursor = courses.iter();
                for picked in &out {
                    assert!(cursor.any(|c| c == picked), "{criteria:?} reordered output");
                }
            }
        }
    }

    #[test]
    fn departments_are_distinct_in_first_seen_order() {
        assert_eq!(
            departments(&catalog()),
            vec!["Biology", "Chemistry", "Computer Science"]
        );
    }
}
