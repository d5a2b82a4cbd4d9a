//! Admin reporting over the course catalog.
//!
//! Projects the course documents into an Arrow `RecordBatch` and registers it
//! with DataFusion as table `courses`, so admins can run ad-hoc SQL such as
//! enrollment per department without touching the live store.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use datafusion::error::DataFusionError;
use datafusion::execution::context::SessionContext;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, ValidationError};
use crate::models::Course;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Query(#[from] DataFusionError),
}

impl From<ReportError> for Error {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Query(e) => ValidationError::InvalidQuery {
                reason: e.to_string(),
            }
            .into(),
            ReportError::Arrow(e) => {
                tracing::error!(error = %e, "catalog projection failed");
                Error::Remote(e.to_string())
            }
        }
    }
}

/// Query result flattened to display strings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    fn from_batches(batches: &[RecordBatch]) -> Result<Self, ArrowError> {
        let mut table = ReportTable::default();
        if let Some(first) = batches.first() {
            table.columns = first.schema().fields().iter().map(|f| f.name().clone()).collect();
        }
        for batch in batches {
            for row in 0..batch.num_rows() {
                let mut cells = Vec::with_capacity(batch.num_columns());
                for column in batch.columns() {
                    cells.push(array_value_to_string(column, row)?);
                }
                table.rows.push(cells);
            }
        }
        Ok(table)
    }
}

/// Arrow projection of the catalog, one row per course.
pub fn project_courses(courses: &[Course]) -> Result<RecordBatch, ArrowError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("code", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("department", DataType::Utf8, false),
        Field::new("level", DataType::UInt32, false),
        Field::new("credits", DataType::UInt32, false),
        Field::new("capacity", DataType::UInt32, false),
        Field::new("enrolled", DataType::UInt32, false),
        Field::new("active", DataType::Boolean, false),
    ]));

    let text = |get: fn(&Course) -> &str| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(courses.iter().map(get)))
    };
    let number = |get: fn(&Course) -> u32| -> ArrayRef {
        Arc::new(UInt32Array::from_iter_values(courses.iter().map(get)))
    };

    RecordBatch::try_new(
        schema,
        vec![
            text(|c| &c.id),
            text(|c| &c.code),
            text(|c| &c.name),
            text(|c| &c.department),
            number(|c| c.level),
            number(|c| c.credits),
            number(|c| c.capacity),
            number(|c| c.registered_student_ids.len() as u32),
            Arc::new(BooleanArray::from(courses.iter().map(|c| c.active).collect::<Vec<_>>())),
        ],
    )
}

/// DataFusion session over a catalog snapshot.
pub struct ReportEngine {
    ctx: SessionContext,
}

impl ReportEngine {
    pub fn new(courses: &[Course]) -> Result<Self, ReportError> {
        let ctx = SessionContext::new();
        ctx.register_batch("courses", project_courses(courses)?)?;
        Ok(Self { ctx })
    }

    pub async fn execute_sql(&self, sql: &str) -> Result<Vec<RecordBatch>, ReportError> {
        let df = self.ctx.sql(sql).await?;
        Ok(df.collect().await?)
    }

    pub async fn table(&self, sql: &str) -> Result<ReportTable, ReportError> {
        let batches = self.execute_sql(sql).await?;
        Ok(ReportTable::from_batches(&batches)?)
    }

    /// Active courses, seats taken and seats offered per department.
    pub async fn enrollment_by_department(&self) -> Result<ReportTable, ReportError> {
        self.table(
            "SELECT department, COUNT(*) AS courses, SUM(enrolled) AS enrolled, SUM(capacity) AS capacity \
             FROM courses WHERE active GROUP BY department ORDER BY department",
        )
        .await
    }
}
