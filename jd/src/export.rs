//! Result sink: aggregated per-job JSON artifact
//!
//! On completion every task of a job is written to `<exports>/<job-id>.json`,
//! keyed by target, with its result records and a short summary block.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Job, ResultPoint, ResultRecord, Task, TaskStatus};

/// Errors from writing an artifact
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Outcome of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetExport {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub records: Vec<ResultPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
    pub not_found: u32,
    /// Share of targets that succeeded, one decimal place
    pub success_rate: f64,
}

/// The whole artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifact {
    pub job_id: String,
    pub name: String,
    pub exported_at: DateTime<Utc>,
    pub summary: ExportSummary,
    pub targets: BTreeMap<String, TargetExport>,
}

impl JobArtifact {
    /// Assemble the artifact from a job's tasks and result records
    pub fn build(job: &Job, tasks: &[Task], results: &[ResultRecord]) -> Self {
        debug!(job_id = %job.id, tasks = tasks.len(), results = results.len(), "JobArtifact::build: called");
        let mut by_task: BTreeMap<&str, Vec<ResultPoint>> = BTreeMap::new();
        for record in results {
            by_task
                .entry(record.task_id.as_str())
                .or_default()
                .push(ResultPoint::new(record.date.clone(), record.value.clone()));
        }

        let targets = tasks
            .iter()
            .map(|task| {
                let records = by_task.remove(task.id.as_str()).unwrap_or_default();
                let export = TargetExport {
                    status: task.status,
                    summary: task.result_summary.clone(),
                    error: task.error_detail.clone(),
                    records,
                };
                (task.target.clone(), export)
            })
            .collect();

        let success_rate = if job.total == 0 {
            0.0
        } else {
            (f64::from(job.successful_count) / f64::from(job.total) * 1000.0).round() / 10.0
        };

        Self {
            job_id: job.id.clone(),
            name: job.name.clone(),
            exported_at: Utc::now(),
            summary: ExportSummary {
                total: job.total,
                successful: job.successful_count,
                failed: job.failed_count,
                not_found: job.not_found_count,
                success_rate,
            },
            targets,
        }
    }
}

/// Path of a job's artifact inside `export_dir`
pub fn artifact_path(export_dir: &Path, job_id: &str) -> PathBuf {
    export_dir.join(format!("{}.json", job_id))
}

/// Write the artifact, replacing any earlier export of the same job
pub fn write_artifact(export_dir: &Path, artifact: &JobArtifact) -> Result<PathBuf, ExportError> {
    debug!(?export_dir, job_id = %artifact.job_id, "write_artifact: called");
    fs::create_dir_all(export_dir)?;
    let path = artifact_path(export_dir, &artifact.job_id);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(artifact)?)?;
    fs::rename(&tmp, &path)?;
    info!(job_id = %artifact.job_id, path = %path.display(), "Exported job results");
    Ok(path)
}
