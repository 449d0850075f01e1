//! Job creation, execution, resubmission and queues
//!
//! Jobs run synchronously inside the submitting request: [`JobsService::submit`]
//! validates the form, persists the job with its coerced parameter values and
//! calls [`JobsService::execute`], which builds the command line, runs the
//! process in the job output directory and registers the produced files.

use std::path::{Path, PathBuf};

use serde_json::Value;
use uuid::Uuid;

use super::{
    realtime::{pick_output, JobOutputSink, RealtimeService},
    scripts::ScriptsService,
    Caller,
};
use crate::{
    config::ScriptlyConfig,
    error::{AppError, AppResult},
    forms::{validate_form, CleanedData, FieldValue, FormInitial, Submission},
    models::{
        file::FileGroups,
        job::{
            AllQueuesResponse, JobDetail, JobListEntry, JobListRow, JobParameterView, QueueItems, QueueTotals, SubmitResponse,
        },
        JobParameter, JobStatus, Script, ScriptParameter, ScriptVersion, ScriptlyJob,
    },
    pipeline::{build_command, coerce_value, job_parser, rebase_output_value, render_command, subprocess_arg},
    repository::{
        files::NewFile,
        jobs::{JobFile, JobList, NewJob, NewJobValue},
        Repository,
    },
    runner::{ensure_venv, run_command, RunError, RunOutput, RunRequest},
    storage::{archive, checksum, fileinfo::get_file_info, FileStore, StoredUpload},
    text::get_valid_filename,
};

pub const NOT_PERMITTED_SCRIPT: &str = "You are not permitted to access this script.";
const QUEUE_PREVIEW: i64 = 10;

/// Storage name of a job's output directory:
/// `file_dir/<user or anonymous>/<script folder>/<uuid>`
pub fn job_output_path(file_dir: &str, username: Option<&str>, folder: &str, uuid: &Uuid) -> String {
    let user = username
        .and_then(|u| get_valid_filename(u).ok())
        .unwrap_or_else(|| "anonymous".to_string());
    let mut path = PathBuf::from(file_dir);
    path.push(user);
    if let Ok(folder) = get_valid_filename(folder) {
        path.push(folder);
    }
    path.push(uuid.to_string());
    path.to_string_lossy().into_owned()
}

/// Final status and output of an execution
pub fn execution_outcome(result: Result<RunOutput, RunError>) -> (JobStatus, String, String) {
    match result {
        Ok(output) if output.success() => (JobStatus::Completed, output.stdout, output.stderr),
        Ok(output) => {
            let stderr = append_line(output.stderr, &format!("Job failed with exit code {}", output.exit_code));
            (JobStatus::Failed, output.stdout, stderr)
        }
        Err(RunError::Timeout {
            elapsed_ms,
            stdout,
            stderr,
        }) => {
            let stderr = append_line(stderr, &format!("Job timed out after {}s", elapsed_ms / 1000));
            (JobStatus::Error, stdout, stderr)
        }
        Err(e) => (JobStatus::Error, String::new(), e.to_string()),
    }
}

/// Final status and output of a job whose execution stopped on an error
pub fn aborted_outcome(error: &AppError) -> (JobStatus, String, String) {
    (JobStatus::Error, String::new(), error.to_string())
}

/// A stored file may be submitted again only by someone who can view one of
/// the jobs it is linked to
pub fn may_reuse_file(owners: &[Option<i32>], caller: &Caller) -> bool {
    if owners.is_empty() {
        return false;
    }
    caller.is_superuser || owners.iter().any(|owner| owner.is_none() || *owner == caller.user_id)
}

fn append_line(mut text: String, line: &str) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(line);
    text
}

/// JSON value of a cleaned, non-file field value
fn field_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Int(i) => Value::from(*i),
        FieldValue::Float(f) => Value::from(*f),
        FieldValue::Text(s) | FieldValue::StoredPath(s) => Value::String(s.clone()),
        FieldValue::Upload(upload) => Value::String(upload.filename.clone()),
    }
}

fn file_name_of(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

#[derive(Clone)]
pub struct JobsService {
    repository: Repository,
    config: ScriptlyConfig,
    store: FileStore,
    realtime: RealtimeService,
    scripts: ScriptsService,
}

impl JobsService {
    pub fn new(
        repository: Repository,
        config: ScriptlyConfig,
        store: FileStore,
        realtime: RealtimeService,
        scripts: ScriptsService,
    ) -> Self {
        Self {
            repository,
            config,
            store,
            realtime,
            scripts,
        }
    }

    // Submission

    /// Validate a form submission, create the job and run it
    pub async fn submit(&self, submission: Submission, caller: &Caller) -> AppResult<SubmitResponse> {
        if !self.config.allow_anonymous && !caller.is_authenticated() {
            return Err(AppError::form_message(NOT_PERMITTED_SCRIPT));
        }

        let version_id = submission.version_id().map_err(AppError::Form)?;
        let version = self.repository.scripts.get_version(version_id).await?;
        let form = self.scripts.form_for_version(version.id, &FormInitial::default()).await?;
        let cleaned = validate_form(&form, &submission).map_err(AppError::Form)?;

        let script = self.repository.scripts.get_by_id(version.script_id).await?;
        if !self.scripts.access(&script, caller).await?.valid {
            return Err(AppError::form_message(NOT_PERMITTED_SCRIPT));
        }

        let job = self.create_job(&version, &script, cleaned, caller).await?;
        let job = self.execute(job).await?;
        Ok(SubmitResponse::for_job(&job))
    }

    /// Persist a job and one parameter row per submitted value
    #[tracing::instrument(skip(self, version, script, cleaned, caller), fields(script = %script.slug))]
    pub async fn create_job(
        &self,
        version: &ScriptVersion,
        script: &Script,
        cleaned: CleanedData,
        caller: &Caller,
    ) -> AppResult<ScriptlyJob> {
        let uuid = Uuid::new_v4();
        let output_path = self.output_path_for(caller.user_id, &uuid, script).await?;

        let parsers = self.repository.parameters.parsers_for_version(version.id).await?;
        let mut parameters = self.repository.parameters.parameters_for_version(version.id).await?;
        parameters.retain(|p| {
            parsers
                .iter()
                .any(|parser| parser.id == p.parser_id && (parser.is_main() || Some(parser.id) == cleaned.parser_id))
        });

        let mut values = Vec::new();
        for param in &parameters {
            let Some(submitted) = cleaned.values.get(&param.form_slug()) else {
                continue;
            };
            for value in submitted {
                values.push(self.prepare_value(param, value, &output_path, caller).await?);
            }
        }

        let job = self
            .repository
            .jobs
            .create(
                &NewJob {
                    uuid,
                    user_id: caller.user_id,
                    job_name: &cleaned.job_name,
                    job_description: cleaned.job_description.as_deref(),
                    save_path: script.save_path.as_deref(),
                    script_version_id: version.id,
                    parser_id: cleaned.parser_id,
                },
                &values,
            )
            .await?;

        tracing::info!("Created job {} ({})", job.id, job.uuid);
        Ok(job)
    }

    /// Store the file of a value if any and coerce it for the job
    async fn prepare_value(
        &self,
        param: &ScriptParameter,
        value: &FieldValue,
        output_path: &str,
        caller: &Caller,
    ) -> AppResult<NewJobValue> {
        let upload = match value {
            FieldValue::Upload(upload) if param.is_input_file() => {
                Some((self.store.ingest(&upload.filename, &upload.bytes).await?, upload.filename.clone()))
            }
            FieldValue::StoredPath(stored) if param.is_input_file() => {
                let bytes = self.reusable_file(param, stored, caller).await?;
                let filename = file_name_of(stored);
                Some((self.store.ingest(&filename, &bytes).await?, filename))
            }
            _ => None,
        };

        let raw = match &upload {
            Some((stored, _)) => Value::String(stored.stored_path.clone()),
            None => field_json(value),
        };
        let coerced = coerce_value(param, &raw, output_path);

        let file = match upload {
            Some((stored, filename)) => Some(self.new_job_file(stored, filename).await?),
            None => None,
        };
        Ok(NewJobValue {
            parameter_id: param.id,
            value: coerced.to_string(),
            file,
        })
    }

    /// Content of an already stored file referenced by a submission
    async fn reusable_file(&self, param: &ScriptParameter, stored: &str, caller: &Caller) -> AppResult<Vec<u8>> {
        let invalid = || AppError::form_field(param.form_slug(), format!("Invalid file reference: {}", stored));
        if !Path::new(stored).starts_with(self.store.file_dir()) || !self.store.local.is_within_root(stored) {
            return Err(invalid());
        }
        let owners = self.repository.files.file_owners(stored).await?;
        if !may_reuse_file(&owners, caller) {
            tracing::warn!("Rejected reference to {} from user {:?}", stored, caller.user_id);
            return Err(invalid());
        }
        let path = self.store.ensure_local(stored).await.map_err(|_| {
            AppError::form_field(
                param.form_slug(),
                format!("The file {} is no longer available", file_name_of(stored)),
            )
        })?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn new_job_file(&self, stored: StoredUpload, filename: String) -> AppResult<JobFile> {
        let info = get_file_info(&self.store.local.path(&stored.stored_path), &stored.stored_path).await?;
        Ok(JobFile::New {
            filetype: Some(info.filetype.as_str().to_string()),
            filepreview: info.preview_json(),
            size_bytes: stored.size as i64,
            filepath: stored.stored_path,
            checksum: stored.checksum,
            filename,
        })
    }

    /// Create or reuse the stored file record and link it to a job
    async fn link_file(
        &self,
        job_id: i32,
        parameter_id: Option<i32>,
        stored: &StoredUpload,
        filename: &str,
    ) -> AppResult<()> {
        let info = get_file_info(&self.store.local.path(&stored.stored_path), &stored.stored_path).await?;
        let preview = info.preview_json();
        let (file, _) = self
            .repository
            .files
            .get_or_create(&NewFile {
                filepath: &stored.stored_path,
                checksum: &stored.checksum,
                filetype: Some(info.filetype.as_str()),
                filepreview: preview.as_deref(),
                size_bytes: Some(stored.size as i64),
            })
            .await?;
        self.repository
            .files
            .get_or_create_user_file(job_id, file.id, parameter_id, filename)
            .await?;
        Ok(())
    }

    async fn output_path_for(&self, user_id: Option<i32>, uuid: &Uuid, script: &Script) -> AppResult<String> {
        let username = match user_id {
            Some(id) => Some(self.repository.users.get_by_id(id).await?.username),
            None => None,
        };
        Ok(job_output_path(
            self.store.file_dir(),
            username.as_deref(),
            script.output_folder(),
            uuid,
        ))
    }

    async fn prepare_output_dir(&self, job: &ScriptlyJob, script: &Script) -> AppResult<String> {
        let output_path = self.output_path_for(job.user_id, &job.uuid, script).await?;
        tokio::fs::create_dir_all(self.store.local.path(&output_path)).await?;
        Ok(output_path)
    }

    // Execution

    /// Run a job to completion and record its outcome. A job stopped by an
    /// error is finished with the error status before the error is returned.
    #[tracing::instrument(skip(self, job), fields(job_id = job.id))]
    pub async fn execute(&self, job: ScriptlyJob) -> AppResult<ScriptlyJob> {
        let job_id = job.id;
        match self.run_to_completion(job).await {
            Ok(job) => Ok(job),
            Err(e) => {
                tracing::error!("Job {} aborted: {}", job_id, e);
                let (status, stdout, stderr) = aborted_outcome(&e);
                if let Err(finish_error) = self.repository.jobs.finish(job_id, status, &stdout, &stderr).await {
                    tracing::error!("Could not mark job {} as errored: {}", job_id, finish_error);
                }
                if let Err(clear_error) = self.realtime.clear(job_id).await {
                    tracing::warn!("Could not clear live output of job {}: {}", job_id, clear_error);
                }
                Err(e)
            }
        }
    }

    async fn run_to_completion(&self, job: ScriptlyJob) -> AppResult<ScriptlyJob> {
        self.repository.jobs.set_status(job.id, JobStatus::Running).await?;

        let version = self.repository.scripts.get_version(job.script_version_id).await?;
        let script = self.repository.scripts.get_by_id(version.script_id).await?;
        let output_path = self.prepare_output_dir(&job, &script).await?;

        let result = self.run(&job, &version, &script, &output_path).await?;
        let (status, stdout, stderr) = execution_outcome(result);
        let job = self.repository.jobs.finish(job.id, status, &stdout, &stderr).await?;

        if let Err(e) = self.register_outputs(&job, &output_path).await {
            tracing::warn!("Could not register outputs of job {}: {}", job.id, e);
        }
        if let Err(e) = self.realtime.clear(job.id).await {
            tracing::warn!("Could not clear live output of job {}: {}", job.id, e);
        }

        tracing::info!("Job {} finished with status {}", job.id, job.status);
        Ok(job)
    }

    /// Build the command of a job and run it; database failures are the
    /// only errors escaping as `Err`
    async fn run(
        &self,
        job: &ScriptlyJob,
        version: &ScriptVersion,
        script: &Script,
        output_path: &str,
    ) -> AppResult<Result<RunOutput, RunError>> {
        if let Err(e) = self.store.ensure_local(&version.script_path).await {
            tracing::error!("Script file {} is missing: {}", version.script_path, e);
            return Ok(Err(RunError::NotFound(version.script_path.clone())));
        }
        let script_path = version.execution_path(self.store.local.root(), script.execute_full_path);

        let interpreter = match script.virtual_environment_id {
            Some(env_id) => {
                let mut env = self.repository.scripts.get_virtual_environment(env_id).await?;
                if env.venv_directory.trim().is_empty() {
                    env.venv_directory = self.config.virtual_environment_directory.clone();
                }
                match ensure_venv(&env).await {
                    Ok(python) => python.to_string_lossy().into_owned(),
                    Err(e) => return Ok(Err(e)),
                }
            }
            None => self.config.default_interpreter.clone(),
        };

        let parsers = self.repository.parameters.parsers_for_version(version.id).await?;
        let parameters = self.repository.parameters.parameters_for_version(version.id).await?;
        let job_values = self.repository.jobs.parameters(job.id).await?;
        let selected_parser = job_parser(job.parser_id, &parsers, &parameters, &job_values);
        let mut args = Vec::new();
        for job_param in &job_values {
            let Some(param) = parameters.iter().find(|p| p.id == job_param.parameter_id) else {
                continue;
            };
            let value = job_param.json_value();
            if param.is_input_file() {
                if let Some(stored) = value.as_str() {
                    if self.store.ensure_local(stored).await.is_err() {
                        return Ok(Err(RunError::NotFound(stored.to_string())));
                    }
                }
            }
            args.extend(subprocess_arg(param, &value, output_path, self.store.local.root()));
        }

        let command = build_command(
            Some(&interpreter),
            &script_path.to_string_lossy(),
            &parsers,
            selected_parser,
            &parameters,
            &args,
        );
        self.repository.jobs.set_command(job.id, &render_command(&command)).await?;

        let Some(mut request) = RunRequest::from_command(&command) else {
            return Ok(Err(RunError::NotFound(interpreter)));
        };
        request.working_directory = Some(self.store.local.path(output_path));
        request.timeout = self.config.job_timeout();
        request.max_output_bytes = self.config.max_output_bytes;
        request.snapshot_interval = std::time::Duration::from_millis(self.config.realtime_interval_ms.max(100));

        let sink = JobOutputSink {
            job_id: job.id,
            realtime: self.realtime.clone(),
            jobs: self.repository.jobs.clone(),
        };
        Ok(run_command(&request, &sink).await)
    }

    /// Archive the output directory and link every file in it to the job
    async fn register_outputs(&self, job: &ScriptlyJob, output_path: &str) -> AppResult<()> {
        let dir = self.store.local.path(output_path);
        let archive_name = get_valid_filename(&job.job_name).unwrap_or_else(|_| "output".to_string());
        let archive_path = dir.join(format!("{}.zip", archive_name));

        let scan_dir = dir.clone();
        let files = tokio::task::spawn_blocking(move || {
            archive::zip_directory(&scan_dir, &archive_path)?;
            archive::collect_files(&scan_dir)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Archiving task failed: {}", e)))??;

        let version_params = self
            .repository
            .parameters
            .parameters_for_version(job.script_version_id)
            .await?;
        let output_params: Vec<(JobParameter, Value)> = self
            .repository
            .jobs
            .parameters(job.id)
            .await?
            .into_iter()
            .filter(|jp| {
                version_params
                    .iter()
                    .any(|p| p.id == jp.parameter_id && p.is_output)
            })
            .map(|jp| {
                let value = jp.json_value();
                (jp, value)
            })
            .collect();

        for relative in files {
            let relative_name = relative.to_string_lossy().into_owned();
            let storage_name = Path::new(output_path).join(&relative).to_string_lossy().into_owned();
            let bytes = self.store.local.read(&storage_name).await?;
            let stored = StoredUpload {
                stored_path: storage_name.clone(),
                checksum: checksum(&bytes),
                size: bytes.len() as u64,
            };
            let parameter_id = output_params
                .iter()
                .find(|(_, value)| value.as_str() == Some(storage_name.as_str()))
                .map(|(jp, _)| jp.id);

            self.link_file(job.id, parameter_id, &stored, &relative_name).await?;
            if let Err(e) = self.store.mirror(&storage_name).await {
                tracing::warn!("Could not mirror {}: {}", storage_name, e);
            }
        }
        Ok(())
    }

    // Commands on existing jobs

    fn can_view(job: &ScriptlyJob, caller: &Caller) -> bool {
        job.can_user_view(caller.user_id) || caller.is_superuser
    }

    async fn viewable_job(&self, id: i32, caller: &Caller) -> AppResult<ScriptlyJob> {
        let job = self.repository.jobs.get_by_id(id).await?;
        if !Self::can_view(&job, caller) {
            return Err(AppError::Authorization("You are not permitted to access this job".to_string()));
        }
        Ok(job)
    }

    /// Copy a job for the caller, rebasing output files, and run the copy
    pub async fn resubmit(&self, id: i32, caller: &Caller) -> AppResult<ScriptlyJob> {
        let old = self.viewable_job(id, caller).await?;
        let version = self.repository.scripts.get_version(old.script_version_id).await?;
        let script = self.repository.scripts.get_by_id(version.script_id).await?;

        let uuid = Uuid::new_v4();
        let output_path = self.output_path_for(caller.user_id, &uuid, &script).await?;

        let parameters = self.repository.parameters.parameters_for_version(version.id).await?;
        let old_files = self.repository.files.files_for_job(old.id).await?;
        let mut values = Vec::new();
        for old_param in self.repository.jobs.parameters(old.id).await? {
            let Some(param) = parameters.iter().find(|p| p.id == old_param.parameter_id) else {
                continue;
            };
            let value = rebase_output_value(param, &old_param.json_value(), &output_path);
            let file = if param.is_input_file() {
                old_files
                    .iter()
                    .find(|f| f.parameter_id == Some(old_param.id))
                    .map(|f| JobFile::Existing {
                        system_file_id: f.system_file_id,
                        filename: f.filename.clone(),
                    })
            } else {
                None
            };
            values.push(NewJobValue {
                parameter_id: param.id,
                value: value.to_string(),
                file,
            });
        }

        let job = self
            .repository
            .jobs
            .create(
                &NewJob {
                    uuid,
                    user_id: caller.user_id,
                    job_name: &old.job_name,
                    job_description: old.job_description.as_deref(),
                    save_path: old.save_path.as_deref(),
                    script_version_id: old.script_version_id,
                    parser_id: old.parser_id,
                },
                &values,
            )
            .await?;

        tracing::info!("Resubmitted job {} as job {}", old.id, job.id);
        self.execute(job).await
    }

    /// Drop the outputs of a job and run it again
    pub async fn rerun(&self, id: i32, caller: &Caller) -> AppResult<ScriptlyJob> {
        let job = self.viewable_job(id, caller).await?;

        for file in self.repository.files.output_files_for_job(job.id).await? {
            self.repository.files.delete_user_file(file.id).await?;
            if self.repository.files.link_count(file.system_file_id).await? == 0 {
                self.repository.files.delete_system_file(file.system_file_id).await?;
                if let Err(e) = self.store.delete(&file.filepath).await {
                    tracing::warn!("Could not delete {}: {}", file.filepath, e);
                }
            }
        }

        let job = self.repository.jobs.reset(job.id).await?;
        tracing::info!("Rerunning job {}", job.id);
        self.execute(job).await
    }

    pub async fn delete(&self, id: i32, caller: &Caller) -> AppResult<()> {
        let job = self.viewable_job(id, caller).await?;
        self.repository.jobs.set_status(job.id, JobStatus::Deleted).await?;
        tracing::info!("Deleted job {}", job.id);
        Ok(())
    }

    // Details

    pub async fn detail(&self, id: i32, caller: &Caller) -> AppResult<JobDetail> {
        let job = self.viewable_job(id, caller).await?;
        self.build_detail(job).await
    }

    /// Jobs are reachable by anyone knowing their uuid
    pub async fn detail_by_uuid(&self, uuid: Uuid) -> AppResult<JobDetail> {
        let job = self.repository.jobs.get_by_uuid(uuid).await?;
        self.build_detail(job).await
    }

    async fn build_detail(&self, job: ScriptlyJob) -> AppResult<JobDetail> {
        let version = self.repository.scripts.get_version(job.script_version_id).await?;
        let script = self.repository.scripts.get_by_id(version.script_id).await?;
        let parameters = self.repository.parameters.parameters_for_version(version.id).await?;

        let views = self
            .repository
            .jobs
            .parameters(job.id)
            .await?
            .into_iter()
            .filter_map(|jp| {
                let param = parameters.iter().find(|p| p.id == jp.parameter_id)?;
                Some(JobParameterView {
                    parameter_id: param.id,
                    script_param: param.script_param.clone(),
                    form_slug: param.form_slug(),
                    value: jp.json_value(),
                })
            })
            .collect();

        let live = if job.status.is_terminal() {
            None
        } else {
            match self.realtime.fetch(job.id).await {
                Ok(live) => live,
                Err(e) => {
                    tracing::warn!("Could not read live output of job {}: {}", job.id, e);
                    None
                }
            }
        };
        let terminal = job.status.is_terminal();
        let stdout = pick_output(
            job.stdout.as_deref(),
            live.as_ref().map(|l| l.stdout.as_str()),
            terminal,
        );
        let stderr = pick_output(
            job.stderr.as_deref(),
            live.as_ref().map(|l| l.stderr.as_str()),
            terminal,
        );

        let files = FileGroups::from_rows(self.repository.files.files_for_job(job.id).await?);

        Ok(JobDetail {
            id: job.id,
            uuid: job.uuid,
            job_name: job.job_name,
            job_description: job.job_description,
            status: job.status,
            command: job.command,
            stdout,
            stderr,
            script_name: script.script_name,
            script_slug: script.slug,
            script_version_id: version.id,
            created_date: job.created_date,
            last_modified: job.modified_date,
            parameters: views,
            files,
        })
    }

    // Queues

    pub async fn list(&self, list: JobList, caller: &Caller) -> AppResult<Vec<JobListEntry>> {
        let rows = self.repository.jobs.list(list, caller.user_id, None).await?;
        Ok(rows.into_iter().map(JobListEntry::from).collect())
    }

    /// Totals and the first entries of every list
    pub async fn all_queues(&self, caller: &Caller) -> AppResult<AllQueuesResponse> {
        let jobs = &self.repository.jobs;
        let preview = |rows: Vec<JobListRow>| rows.into_iter().map(JobListEntry::from).collect::<Vec<_>>();
        Ok(AllQueuesResponse {
            totals: QueueTotals {
                global: jobs.count(JobList::Global, caller.user_id).await?,
                user: jobs.count(JobList::User, caller.user_id).await?,
                results: jobs.count(JobList::Results, caller.user_id).await?,
            },
            items: QueueItems {
                global: preview(jobs.list(JobList::Global, caller.user_id, Some(QUEUE_PREVIEW)).await?),
                user: preview(jobs.list(JobList::User, caller.user_id, Some(QUEUE_PREVIEW)).await?),
                results: preview(jobs.list(JobList::Results, caller.user_id, Some(QUEUE_PREVIEW)).await?),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_output_path() {
        let uuid = Uuid::nil();
        assert_eq!(
            job_output_path("scriptly_files", Some("alice smith"), "merge-files", &uuid),
            format!("scriptly_files/alice_smith/merge-files/{}", uuid)
        );
        assert_eq!(
            job_output_path("scriptly_files", None, "merge-files", &uuid),
            format!("scriptly_files/anonymous/merge-files/{}", uuid)
        );
    }

    fn output(exit_code: i32, stderr: &str) -> RunOutput {
        RunOutput {
            stdout: "done\n".to_string(),
            stderr: stderr.to_string(),
            exit_code,
            duration_ms: 5,
        }
    }

    #[test]
    fn test_outcome_success_and_failure() {
        let (status, stdout, stderr) = execution_outcome(Ok(output(0, "")));
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(stdout, "done\n");
        assert_eq!(stderr, "");

        let (status, _, stderr) = execution_outcome(Ok(output(2, "bad input")));
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(stderr, "bad input\nJob failed with exit code 2");
    }

    #[test]
    fn test_outcome_errors() {
        let (status, stdout, stderr) = execution_outcome(Err(RunError::Timeout {
            elapsed_ms: 3200,
            stdout: "partial".to_string(),
            stderr: String::new(),
        }));
        assert_eq!(status, JobStatus::Error);
        assert_eq!(stdout, "partial");
        assert_eq!(stderr, "Job timed out after 3s");

        let (status, _, stderr) = execution_outcome(Err(RunError::NotFound("scripts/gone.py".to_string())));
        assert_eq!(status, JobStatus::Error);
        assert!(stderr.contains("scripts/gone.py"));
    }

    #[test]
    fn test_aborted_job_is_finished_as_error() {
        let error = AppError::Internal("connection reset".to_string());
        let (status, stdout, stderr) = aborted_outcome(&error);
        assert_eq!(status, JobStatus::Error);
        assert_eq!(stdout, "");
        assert_eq!(stderr, error.to_string());
        assert!(status.is_terminal());
    }

    fn user(id: i32) -> Caller {
        Caller {
            user_id: Some(id),
            username: Some(format!("user{}", id)),
            ..Caller::default()
        }
    }

    #[test]
    fn test_reuse_file_of_own_or_open_job() {
        assert!(may_reuse_file(&[Some(3)], &user(3)));
        assert!(may_reuse_file(&[Some(4), Some(3)], &user(3)));
        assert!(may_reuse_file(&[None], &user(3)));
        assert!(may_reuse_file(&[None], &Caller::anonymous()));
    }

    #[test]
    fn test_reuse_file_of_other_user_rejected() {
        assert!(!may_reuse_file(&[Some(4)], &user(3)));
        assert!(!may_reuse_file(&[Some(4)], &Caller::anonymous()));

        let admin = Caller {
            is_superuser: true,
            ..user(1)
        };
        assert!(may_reuse_file(&[Some(4)], &admin));
    }

    #[test]
    fn test_reuse_unlinked_file_rejected() {
        let admin = Caller {
            is_superuser: true,
            ..user(1)
        };
        assert!(!may_reuse_file(&[], &user(3)));
        assert!(!may_reuse_file(&[], &admin));
    }

    #[test]
    fn test_file_reference_error_targets_field() {
        let AppError::Form(errors) = AppError::form_field("2-input", "Invalid file reference: x") else {
            panic!("expected a form error");
        };
        assert_eq!(errors.get("2-input"), Some(&vec!["Invalid file reference: x".to_string()]));
        assert!(errors.get(crate::error::NON_FIELD_ERRORS).is_none());
    }

    #[test]
    fn test_field_json() {
        assert_eq!(field_json(&FieldValue::Int(4)), Value::from(4));
        assert_eq!(field_json(&FieldValue::Bool(false)), Value::Bool(false));
        assert_eq!(field_json(&FieldValue::Text("a b".to_string())), Value::from("a b"));
    }
}
