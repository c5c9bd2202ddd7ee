//! ResultRecord domain type
//!
//! Immutable date/value pairs extracted by a successful task.

use serde::{Deserialize, Serialize};

use super::now_ms;
use super::task::Task;

/// A single extracted data point as reported by a session driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPoint {
    pub date: String,
    pub value: String,
}

impl ResultPoint {
    pub fn new(date: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            value: value.into(),
        }
    }
}

/// A persisted data point owned by a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Store-assigned row id (0 until persisted)
    pub id: i64,
    pub task_id: String,
    pub job_id: String,
    pub date: String,
    pub value: String,
    pub created_at: i64,
}

impl ResultRecord {
    /// Bind a reported point to its task
    pub fn from_point(task: &Task, point: ResultPoint) -> Self {
        Self {
            id: 0,
            task_id: task.id.clone(),
            job_id: task.job_id.clone(),
            date: point.date,
            value: point.value,
            created_at: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_point_binds_owner() {
        let task = Task::new("job-1", "target", 0);
        let record = ResultRecord::from_point(&task, ResultPoint::new("2024-01-31", "1.2345"));
        assert_eq!(record.task_id, task.id);
        assert_eq!(record.job_id, "job-1");
        assert_eq!(record.date, "2024-01-31");
        assert_eq!(record.value, "1.2345");
        assert_eq!(record.id, 0);
    }
}
