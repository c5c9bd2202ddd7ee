//! Store implementation backed by rusqlite

use std::path::Path;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::domain::{Job, JobStatus, ResultRecord, Task, TaskStatus};

use super::{StoreError, StoreStats, TaskCounts};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    workers INTEGER NOT NULL,
    total INTEGER NOT NULL,
    successful_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    not_found_count INTEGER NOT NULL DEFAULT 0,
    timeout_secs INTEGER NOT NULL,
    pid INTEGER,
    hostname TEXT,
    output_file TEXT,
    failure_reason TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS jobs_status ON jobs(status);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    target TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_detail TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    result_summary TEXT,
    record_count INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER,
    completed_at INTEGER,
    updated_at INTEGER NOT NULL,
    UNIQUE(job_id, target)
);
CREATE INDEX IF NOT EXISTS tasks_job_status ON tasks(job_id, status);

CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    job_id TEXT NOT NULL,
    date TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS results_job ON results(job_id);
"#;

const JOB_COLUMNS: &str = "id, name, status, workers, total, successful_count, failed_count, not_found_count, \
     timeout_secs, pid, hostname, output_file, failure_reason, created_at, started_at, completed_at, updated_at";

const TASK_COLUMNS: &str = "id, job_id, target, position, status, error_detail, retry_count, attempts, \
     result_summary, record_count, started_at, completed_at, updated_at";

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        workers: row.get::<_, i64>(3)? as usize,
        total: row.get(4)?,
        successful_count: row.get(5)?,
        failed_count: row.get(6)?,
        not_found_count: row.get(7)?,
        timeout_secs: row.get::<_, i64>(8)? as u64,
        pid: row.get(9)?,
        hostname: row.get(10)?,
        output_file: row.get(11)?,
        failure_reason: row.get(12)?,
        created_at: row.get(13)?,
        started_at: row.get(14)?,
        completed_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        job_id: row.get(1)?,
        target: row.get(2)?,
        position: row.get(3)?,
        status: row.get(4)?,
        error_detail: row.get(5)?,
        retry_count: row.get(6)?,
        attempts: row.get(7)?,
        result_summary: row.get(8)?,
        record_count: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<ResultRecord> {
    Ok(ResultRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        job_id: row.get(2)?,
        date: row.get(3)?,
        value: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// `?2, ?3, ...` placeholders for an IN clause following `offset` bound params
fn placeholders(count: usize, offset: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + offset + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQLite-backed store for jobs, tasks and results
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(?path, "Store::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(%mode, "Store::open: journal mode set");
        let store = Self::init(conn)?;
        info!(?path, "Store opened");
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Store::open_in_memory: called");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // === Jobs ===

    /// Insert a job and its tasks atomically.
    ///
    /// Fails with `DuplicateTarget` if two tasks share a target.
    pub fn create_job(&mut self, job: &Job, tasks: &[Task]) -> Result<(), StoreError> {
        debug!(job_id = %job.id, task_count = tasks.len(), "Store::create_job: called");
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                job.id,
                job.name,
                job.status,
                job.workers as i64,
                job.total,
                job.successful_count,
                job.failed_count,
                job.not_found_count,
                job.timeout_secs as i64,
                job.pid,
                job.hostname,
                job.output_file,
                job.failure_reason,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::AlreadyExists(job.id.clone())
            } else {
                StoreError::Sqlite(e)
            }
        })?;

        for task in tasks {
            tx.execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
                params![
                    task.id,
                    task.job_id,
                    task.target,
                    task.position,
                    task.status,
                    task.error_detail,
                    task.retry_count,
                    task.attempts,
                    task.result_summary,
                    task.record_count,
                    task.started_at,
                    task.completed_at,
                    task.updated_at,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    debug!(target = %task.target, "Store::create_job: duplicate target");
                    StoreError::DuplicateTarget {
                        job_id: job.id.clone(),
                        target: task.target.clone(),
                    }
                } else {
                    StoreError::Sqlite(e)
                }
            })?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Get a job by ID
    pub fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        debug!(%id, "Store::get_job: called");
        let job = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// List jobs, newest first, optionally filtered by status
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, StoreError> {
        debug!(?status, "Store::list_jobs: called");
        let jobs = match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at DESC, id DESC"
                ))?;
                let rows = stmt.query_map(params![status], job_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC"))?;
                let rows = stmt.query_map([], job_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(jobs)
    }

    /// Overwrite a job row
    pub fn update_job(&mut self, job: &Job) -> Result<(), StoreError> {
        debug!(job_id = %job.id, status = %job.status, "Store::update_job: called");
        let changed = self.conn.execute(
            "UPDATE jobs SET name = ?2, status = ?3, workers = ?4, total = ?5, successful_count = ?6, \
             failed_count = ?7, not_found_count = ?8, timeout_secs = ?9, pid = ?10, hostname = ?11, \
             output_file = ?12, failure_reason = ?13, started_at = ?14, completed_at = ?15, updated_at = ?16 \
             WHERE id = ?1",
            params![
                job.id,
                job.name,
                job.status,
                job.workers as i64,
                job.total,
                job.successful_count,
                job.failed_count,
                job.not_found_count,
                job.timeout_secs as i64,
                job.pid,
                job.hostname,
                job.output_file,
                job.failure_reason,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("Job {}", job.id)));
        }
        Ok(())
    }

    // === Tasks ===

    /// List a job's tasks in submission order.
    ///
    /// An empty `statuses` slice means every status.
    pub fn list_tasks(&self, job_id: &str, statuses: &[TaskStatus]) -> Result<Vec<Task>, StoreError> {
        debug!(%job_id, ?statuses, "Store::list_tasks: called");
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = ?1");
        if !statuses.is_empty() {
            sql.push_str(&format!(" AND status IN ({})", placeholders(statuses.len(), 1)));
        }
        sql.push_str(" ORDER BY position ASC");

        let mut values = vec![Value::Text(job_id.to_string())];
        values.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Get a task by ID
    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        debug!(%id, "Store::get_task: called");
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Overwrite a task row
    pub fn update_task(&mut self, task: &Task) -> Result<(), StoreError> {
        debug!(task_id = %task.id, status = %task.status, "Store::update_task: called");
        write_task(&self.conn, task)
    }

    /// Persist a task's final state together with its result records
    pub fn finalize_task(&mut self, task: &Task, records: &[ResultRecord]) -> Result<(), StoreError> {
        debug!(task_id = %task.id, record_count = records.len(), "Store::finalize_task: called");
        let tx = self.conn.transaction()?;
        write_task(&tx, task)?;
        for record in records {
            tx.execute(
                "INSERT INTO results (task_id, job_id, date, value, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![record.task_id, record.job_id, record.date, record.value, record.created_at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Reset every task of `job_id` whose status is in `from` back to pending.
    ///
    /// Returns how many tasks were reset.
    pub fn reset_tasks(&mut self, job_id: &str, from: &[TaskStatus]) -> Result<usize, StoreError> {
        debug!(%job_id, ?from, "Store::reset_tasks: called");
        if from.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE tasks SET status = 'pending', error_detail = NULL, completed_at = NULL, updated_at = ?2 \
             WHERE job_id = ?1 AND status IN ({})",
            placeholders(from.len(), 2)
        );
        let mut values = vec![
            Value::Text(job_id.to_string()),
            Value::Integer(crate::domain::now_ms()),
        ];
        values.extend(from.iter().map(|s| Value::Text(s.as_str().to_string())));
        let changed = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        debug!(%job_id, changed, "Store::reset_tasks: done");
        Ok(changed)
    }

    /// Count a job's tasks per status
    pub fn count_tasks(&self, job_id: &str) -> Result<TaskCounts, StoreError> {
        debug!(%job_id, "Store::count_tasks: called");
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM tasks WHERE job_id = ?1 GROUP BY status")?;
        let rows = stmt.query_map(params![job_id], |row| Ok((row.get::<_, TaskStatus>(0)?, row.get::<_, u32>(1)?)))?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let (status, n) = row?;
            match status {
                TaskStatus::Pending => counts.pending = n,
                TaskStatus::Processing => counts.processing = n,
                TaskStatus::Success => counts.success = n,
                TaskStatus::Failed => counts.failed = n,
                TaskStatus::NotFound => counts.not_found = n,
                TaskStatus::Cancelled => counts.cancelled = n,
            }
        }
        Ok(counts)
    }

    // === Results ===

    /// List a job's result records grouped by task submission order
    pub fn list_results(&self, job_id: &str) -> Result<Vec<ResultRecord>, StoreError> {
        debug!(%job_id, "Store::list_results: called");
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.task_id, r.job_id, r.date, r.value, r.created_at \
             FROM results r JOIN tasks t ON t.id = r.task_id \
             WHERE r.job_id = ?1 ORDER BY t.position ASC, r.id ASC",
        )?;
        let rows = stmt.query_map(params![job_id], result_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // === Aggregates ===

    /// Statistics across all jobs
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        debug!("Store::stats: called");
        let mut stats = StoreStats::default();

        let mut stmt = self.conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, JobStatus>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, n) = row?;
            let n = n as u64;
            stats.total_jobs += n;
            match status {
                JobStatus::Pending => stats.pending_jobs = n,
                JobStatus::Running => stats.running_jobs = n,
                JobStatus::Completed => stats.completed_jobs = n,
                JobStatus::Failed => stats.failed_jobs = n,
                JobStatus::Cancelled => stats.cancelled_jobs = n,
            }
        }

        stats.total_tasks = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get::<_, i64>(0))? as u64;
        stats.successful_tasks = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = ?1",
            params![TaskStatus::Success],
            |row| row.get::<_, i64>(0),
        )? as u64;

        Ok(stats)
    }
}

fn write_task(conn: &Connection, task: &Task) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE tasks SET status = ?2, error_detail = ?3, retry_count = ?4, attempts = ?5, result_summary = ?6, \
         record_count = ?7, started_at = ?8, completed_at = ?9, updated_at = ?10 WHERE id = ?1",
        params![
            task.id,
            task.status,
            task.error_detail,
            task.retry_count,
            task.attempts,
            task.result_summary,
            task.record_count,
            task.started_at,
            task.completed_at,
            task.updated_at,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("Task {}", task.id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResultPoint;
    use tempfile::tempdir;

    fn job_with_tasks(id: &str, targets: &[&str]) -> (Job, Vec<Task>) {
        let mut job = Job::with_id(id, "test", 2, 60);
        let tasks: Vec<Task> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| Task::new(id, *t, i as u32))
            .collect();
        job.total = tasks.len() as u32;
        (job, tasks)
    }

    #[test]
    fn test_create_and_get_job() {
        let mut store = Store::open_in_memory().unwrap();
        let (job, tasks) = job_with_tasks("j1", &["a", "b", "c"]);
        store.create_job(&job, &tasks).unwrap();

        let loaded = store.get_job("j1").unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_target_rejected_atomically() {
        let mut store = Store::open_in_memory().unwrap();
        let (job, tasks) = job_with_tasks("j1", &["a", "b", "a"]);
        let err = store.create_job(&job, &tasks).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTarget { ref target, .. } if target == "a"));
        assert!(store.get_job("j1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_job_id_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let (job, tasks) = job_with_tasks("j1", &["a"]);
        store.create_job(&job, &tasks).unwrap();
        let (job2, _) = job_with_tasks("j1", &[]);
        assert!(matches!(store.create_job(&job2, &[]), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_list_tasks_in_submission_order_with_filter() {
        let mut store = Store::open_in_memory().unwrap();
        let (job, mut tasks) = job_with_tasks("j1", &["c", "a", "b"]);
        tasks[1].finalize_failure(TaskStatus::Failed, "boom");
        store.create_job(&job, &tasks).unwrap();

        let all = store.list_tasks("j1", &[]).unwrap();
        let targets: Vec<&str> = all.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(targets, vec!["c", "a", "b"]);

        let failed = store.list_tasks("j1", &[TaskStatus::Failed, TaskStatus::NotFound]).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target, "a");
        assert_eq!(failed[0].error_detail.as_deref(), Some("boom"));
    }

    #[test]
    fn test_update_job_and_list_by_status() {
        let mut store = Store::open_in_memory().unwrap();
        let (mut job, tasks) = job_with_tasks("j1", &["a"]);
        store.create_job(&job, &tasks).unwrap();
        let (other, other_tasks) = job_with_tasks("j2", &["x"]);
        store.create_job(&other, &other_tasks).unwrap();

        job.mark_running(7, "host");
        store.update_job(&job).unwrap();

        let running = store.list_jobs(Some(JobStatus::Running)).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].pid, Some(7));
        assert_eq!(store.list_jobs(None).unwrap().len(), 2);
    }

    #[test]
    fn test_update_missing_job_is_not_found() {
        let mut store = Store::open_in_memory().unwrap();
        let job = Job::with_id("ghost", "x", 1, 1);
        assert!(matches!(store.update_job(&job), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_finalize_task_persists_results() {
        let mut store = Store::open_in_memory().unwrap();
        let (job, mut tasks) = job_with_tasks("j1", &["a", "b"]);
        store.create_job(&job, &tasks).unwrap();

        let task = &mut tasks[1];
        task.finalize_success("Fund B", 2);
        let records = vec![
            ResultRecord::from_point(task, ResultPoint::new("2024-01-01", "1.0")),
            ResultRecord::from_point(task, ResultPoint::new("2024-01-02", "1.1")),
        ];
        store.finalize_task(task, &records).unwrap();

        let loaded = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Success);
        let results = store.list_results("j1").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].date, "2024-01-01");
        assert!(results[0].id > 0);
    }

    #[test]
    fn test_reset_tasks_only_named_statuses() {
        let mut store = Store::open_in_memory().unwrap();
        let (job, mut tasks) = job_with_tasks("j1", &["a", "b", "c"]);
        tasks[0].finalize_failure(TaskStatus::Failed, "x");
        tasks[1].finalize_failure(TaskStatus::NotFound, "y");
        store.create_job(&job, &tasks).unwrap();

        let reset = store.reset_tasks("j1", &[TaskStatus::Failed]).unwrap();
        assert_eq!(reset, 1);

        let counts = store.count_tasks("j1").unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.not_found, 1);
        let a = &store.list_tasks("j1", &[]).unwrap()[0];
        assert!(a.error_detail.is_none());
    }

    #[test]
    fn test_stats() {
        let mut store = Store::open_in_memory().unwrap();
        let (mut job, mut tasks) = job_with_tasks("j1", &["a", "b"]);
        tasks[0].finalize_success("A", 0);
        job.mark_running(1, "h");
        store.create_job(&job, &tasks).unwrap();
        let (job2, tasks2) = job_with_tasks("j2", &["c"]);
        store.create_job(&job2, &tasks2).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.running_jobs, 1);
        assert_eq!(stats.pending_jobs, 1);
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.successful_tasks, 1);
    }

    #[test]
    fn test_open_file_persists_across_handles() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("jobdaemon.db");
        {
            let mut store = Store::open(&path).unwrap();
            let (job, tasks) = job_with_tasks("j1", &["a"]);
            store.create_job(&job, &tasks).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert!(store.get_job("j1").unwrap().is_some());
    }
}
