//! Jobs and the parameter values submitted with them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::ToSchema;
use uuid::Uuid;

use super::file::FileGroups;

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Error,
    Deleted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Deleted => "deleted",
        }
    }

    /// Completed, failed and errored jobs no longer change output
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Error)
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "Waiting",
            JobStatus::Running => "Executing",
            JobStatus::Completed => "Success",
            JobStatus::Failed => "Failure",
            JobStatus::Error => "Error",
            JobStatus::Deleted => "Deleted",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "submitted" => Ok(JobStatus::Submitted),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "error" => Ok(JobStatus::Error),
            "deleted" => Ok(JobStatus::Deleted),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

// SQLx conversion for JobStatus
impl sqlx::Type<Postgres> for JobStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for JobStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for JobStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <String as Encode<Postgres>>::encode(self.as_str().to_string(), buf)
    }
}

/// One user-submitted execution of a script version
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScriptlyJob {
    pub id: i32,
    pub user_id: Option<i32>,
    pub uuid: Uuid,
    pub job_name: String,
    pub job_description: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub status: JobStatus,
    pub save_path: Option<String>,
    pub command: String,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub script_version_id: i32,
    /// Selected subparser, `None` when only the main parser runs
    pub parser_id: Option<i32>,
}

impl ScriptlyJob {
    /// Anonymous jobs are visible to everyone, owned jobs to their owner
    pub fn can_user_view(&self, user_id: Option<i32>) -> bool {
        match self.user_id {
            None => true,
            Some(owner) => user_id == Some(owner),
        }
    }
}

pub fn realtime_key(job_id: i32) -> String {
    format!("scriptlyjob_{}_rt", job_id)
}

/// A persisted parameter value of a job, JSON encoded to keep its type
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobParameter {
    pub id: i32,
    pub job_id: i32,
    pub parameter_id: i32,
    pub value: String,
}

impl JobParameter {
    pub fn json_value(&self) -> Value {
        serde_json::from_str(&self.value).unwrap_or(Value::Null)
    }
}

/// Parameter value shown on the job page
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobParameterView {
    pub parameter_id: i32,
    pub script_param: String,
    pub form_slug: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

/// Row of the job queues and result lists
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobListEntry {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub url: String,
    pub submitted: String,
    pub status: JobStatus,
    pub status_label: String,
}

/// Row used to build [`JobListEntry`] values
#[derive(Debug, Clone, FromRow)]
pub struct JobListRow {
    pub id: i32,
    pub job_name: String,
    pub job_description: Option<String>,
    pub status: JobStatus,
    pub created_date: DateTime<Utc>,
    pub script_name: String,
}

impl From<JobListRow> for JobListEntry {
    fn from(row: JobListRow) -> Self {
        JobListEntry {
            id: row.id,
            name: row.job_name,
            description: format!(
                "Script: {}\n{}",
                row.script_name,
                row.job_description.unwrap_or_default()
            ),
            url: format!("/api/v1/jobs/{}", row.id),
            submitted: row.created_date.format("%b %d %Y, %H:%M:%S").to_string(),
            status: row.status,
            status_label: row.status.label().to_string(),
        }
    }
}

/// Full job details with outputs
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobDetail {
    pub id: i32,
    pub uuid: Uuid,
    pub job_name: String,
    pub job_description: Option<String>,
    pub status: JobStatus,
    pub command: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub script_name: String,
    pub script_slug: String,
    pub script_version_id: i32,
    pub created_date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub parameters: Vec<JobParameterView>,
    pub files: FileGroups,
}

/// Action on an existing job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Resubmit,
    Rerun,
    Delete,
    Stop,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct JobCommandRequest {
    pub command: JobAction,
}

/// Result of a job command
#[derive(Debug, Serialize, ToSchema)]
pub struct JobCommandResponse {
    pub valid: bool,
    pub job_id: i32,
    pub redirect: String,
}

/// Result of a form submission
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub valid: bool,
    pub job_id: i32,
    pub status: JobStatus,
    pub message: String,
    pub redirect: String,
}

impl SubmitResponse {
    pub fn for_job(job: &ScriptlyJob) -> Self {
        let message = match job.status {
            JobStatus::Completed => "Job completed successfully".to_string(),
            JobStatus::Failed => "Job failed".to_string(),
            other => format!("Job ended with status: {}", other),
        };
        SubmitResponse {
            valid: true,
            job_id: job.id,
            status: job.status,
            message,
            redirect: format!("/api/v1/jobs/{}", job.id),
        }
    }
}

/// Counts and first entries of every job list
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueTotals {
    pub global: i64,
    pub user: i64,
    pub results: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueItems {
    pub global: Vec<JobListEntry>,
    pub user: Vec<JobListEntry>,
    pub results: Vec<JobListEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AllQueuesResponse {
    pub totals: QueueTotals,
    pub items: QueueItems,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Deleted.is_terminal());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [JobStatus::Submitted, JobStatus::Error, JobStatus::Deleted] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("revoked".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_list_entry_from_row() {
        let row = JobListRow {
            id: 12,
            job_name: "merge".to_string(),
            job_description: None,
            status: JobStatus::Running,
            created_date: Utc::now(),
            script_name: "merge_files".to_string(),
        };
        let entry = JobListEntry::from(row);
        assert_eq!(entry.description, "Script: merge_files\n");
        assert_eq!(entry.url, "/api/v1/jobs/12");
        assert_eq!(entry.status_label, "Executing");
    }
}
