//! Jobs and their parameter values

use chrono::Utc;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::job::{JobListRow, JobParameter, JobStatus, ScriptlyJob},
    repository::files::{FilesRepository, NewFile},
};

/// Row data of a job about to be submitted
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub uuid: Uuid,
    pub user_id: Option<i32>,
    pub job_name: &'a str,
    pub job_description: Option<&'a str>,
    pub save_path: Option<&'a str>,
    pub script_version_id: i32,
    pub parser_id: Option<i32>,
}

/// One value of a job about to be submitted
#[derive(Debug, Clone)]
pub struct NewJobValue {
    pub parameter_id: i32,
    /// JSON text of the coerced value
    pub value: String,
    pub file: Option<JobFile>,
}

/// Input file attached to a job value
#[derive(Debug, Clone)]
pub enum JobFile {
    /// Already stored file, reused as is
    Existing { system_file_id: i32, filename: String },
    /// File just written to storage, recorded by checksum
    New {
        filepath: String,
        checksum: String,
        filetype: Option<String>,
        filepreview: Option<String>,
        size_bytes: i64,
        filename: String,
    },
}

/// Which job list to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobList {
    /// Running or waiting jobs of everyone
    Global,
    /// Running jobs of the caller
    User,
    /// Finished jobs of the caller
    Results,
}

impl JobList {
    fn condition(&self) -> &'static str {
        match self {
            JobList::Global => "j.status IN ('running', 'submitted')",
            JobList::User => "j.status = 'running' AND j.user_id IS NOT DISTINCT FROM $1",
            JobList::Results => {
                "j.status NOT IN ('running', 'submitted', 'deleted') AND j.user_id IS NOT DISTINCT FROM $1"
            }
        }
    }
}

#[derive(Clone)]
pub struct JobsRepository {
    pool: Pool<Postgres>,
}

impl JobsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a job with all its values and input file links in one transaction
    pub async fn create(&self, new: &NewJob<'_>, values: &[NewJobValue]) -> AppResult<ScriptlyJob> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let job = sqlx::query_as::<_, ScriptlyJob>(
            r#"
            INSERT INTO scriptly_jobs (
                user_id, uuid, job_name, job_description, status, save_path,
                command, created_date, modified_date, script_version_id, parser_id
            ) VALUES ($1, $2, $3, $4, $5, $6, '', $7, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(new.user_id)
        .bind(new.uuid)
        .bind(new.job_name)
        .bind(new.job_description)
        .bind(JobStatus::Submitted)
        .bind(new.save_path)
        .bind(now)
        .bind(new.script_version_id)
        .bind(new.parser_id)
        .fetch_one(&mut *tx)
        .await?;

        for value in values {
            let param = sqlx::query_as::<_, JobParameter>(
                "INSERT INTO job_parameters (job_id, parameter_id, value) VALUES ($1, $2, $3) RETURNING *",
            )
            .bind(job.id)
            .bind(value.parameter_id)
            .bind(&value.value)
            .fetch_one(&mut *tx)
            .await?;

            let (system_file_id, filename) = match &value.file {
                None => continue,
                Some(JobFile::Existing { system_file_id, filename }) => (*system_file_id, filename.as_str()),
                Some(JobFile::New { filepath, checksum, filetype, filepreview, size_bytes, filename }) => {
                    let (file, _) = FilesRepository::get_or_create_with(
                        &mut tx,
                        &NewFile {
                            filepath,
                            checksum,
                            filetype: filetype.as_deref(),
                            filepreview: filepreview.as_deref(),
                            size_bytes: Some(*size_bytes),
                        },
                    )
                    .await?;
                    (file.id, filename.as_str())
                }
            };
            FilesRepository::get_or_create_user_file_with(&mut tx, job.id, system_file_id, Some(param.id), filename)
                .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<ScriptlyJob> {
        sqlx::query_as::<_, ScriptlyJob>("SELECT * FROM scriptly_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job with id {} not found", id)))
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> AppResult<ScriptlyJob> {
        sqlx::query_as::<_, ScriptlyJob>("SELECT * FROM scriptly_jobs WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", uuid)))
    }

    pub async fn set_status(&self, id: i32, status: JobStatus) -> AppResult<()> {
        sqlx::query("UPDATE scriptly_jobs SET status = $1, modified_date = $2 WHERE id = $3")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_command(&self, id: i32, command: &str) -> AppResult<()> {
        sqlx::query("UPDATE scriptly_jobs SET command = $1, modified_date = $2 WHERE id = $3")
            .bind(command)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_output(&self, id: i32, stdout: &str, stderr: &str) -> AppResult<()> {
        sqlx::query("UPDATE scriptly_jobs SET stdout = $1, stderr = $2, modified_date = $3 WHERE id = $4")
            .bind(stdout)
            .bind(stderr)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of an execution
    pub async fn finish(&self, id: i32, status: JobStatus, stdout: &str, stderr: &str) -> AppResult<ScriptlyJob> {
        let job = sqlx::query_as::<_, ScriptlyJob>(
            r#"
            UPDATE scriptly_jobs SET status = $1, stdout = $2, stderr = $3, modified_date = $4
            WHERE id = $5
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(stdout)
        .bind(stderr)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    /// Clear output and put the job back to `submitted`
    pub async fn reset(&self, id: i32) -> AppResult<ScriptlyJob> {
        let job = sqlx::query_as::<_, ScriptlyJob>(
            r#"
            UPDATE scriptly_jobs SET status = $1, stdout = NULL, stderr = NULL, modified_date = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(JobStatus::Submitted)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    /// One page of a job list; `owner` is the caller (`None` when anonymous)
    pub async fn list(&self, list: JobList, owner: Option<i32>, limit: Option<i64>) -> AppResult<Vec<JobListRow>> {
        let limit_param = if list == JobList::Global { "$1" } else { "$2" };
        let query = format!(
            r#"
            SELECT j.id, j.job_name, j.job_description, j.status, j.created_date, s.script_name
            FROM scriptly_jobs j
            JOIN script_versions v ON v.id = j.script_version_id
            JOIN scripts s ON s.id = v.script_id
            WHERE {}
            ORDER BY j.created_date DESC
            LIMIT {}
            "#,
            list.condition(),
            limit_param
        );
        let mut builder = sqlx::query_as::<_, JobListRow>(&query);
        if list != JobList::Global {
            builder = builder.bind(owner);
        }
        let rows = builder.bind(limit).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn count(&self, list: JobList, owner: Option<i32>) -> AppResult<i64> {
        let query = format!("SELECT COUNT(*) FROM scriptly_jobs j WHERE {}", list.condition());
        let mut builder = sqlx::query_scalar::<_, i64>(&query);
        if list != JobList::Global {
            builder = builder.bind(owner);
        }
        Ok(builder.fetch_one(&self.pool).await?)
    }

    // Parameters

    /// Values of a job in parameter order
    pub async fn parameters(&self, job_id: i32) -> AppResult<Vec<JobParameter>> {
        let params = sqlx::query_as::<_, JobParameter>(
            r#"
            SELECT jp.* FROM job_parameters jp
            JOIN script_parameters sp ON sp.id = jp.parameter_id
            WHERE jp.job_id = $1
            ORDER BY sp.param_order, sp.id, jp.id
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(params)
    }
}
