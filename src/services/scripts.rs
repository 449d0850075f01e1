//! Script registration, listing and forms

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use super::Caller;
use crate::{
    config::{ScriptlyConfig, StorageConfig},
    error::{AppError, AppResult},
    forms::{get_form_groups, FormInitial, ScriptForm},
    models::{
        parameter::ParameterSignature,
        script::{ScriptGroupListing, ScriptSearchResult, ScriptSummary, VersionInfo},
        Script, ScriptParameter, ScriptParameterGroup, ScriptParser, ScriptSchema, ScriptVersion,
    },
    pipeline::job_parser,
    repository::Repository,
    storage::{checksum, FileStore},
    text::get_valid_filename,
};

pub const NOT_PERMITTED: &str = "You are not permitted to use this script";

/// Whether a caller may use a script or script group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Access {
    pub valid: bool,
    /// `disabled` or `hide` when not valid
    pub display: Option<String>,
    pub error: Option<String>,
}

/// Check a script or script group against the caller.
///
/// Objects without user groups are open to every caller (anonymous ones
/// only when allowed); otherwise the caller must share one of the groups.
pub fn valid_user(is_active: bool, required_groups: &[i32], caller: &Caller, config: &ScriptlyConfig) -> Access {
    let mut valid = false;
    if config.allow_anonymous || caller.is_authenticated() {
        if required_groups.is_empty() && is_active {
            valid = true;
        } else if is_active && caller.groups.iter().any(|g| required_groups.contains(g)) {
            valid = true;
        }
    }
    if valid {
        return Access {
            valid,
            display: None,
            error: None,
        };
    }
    let display = if config.show_locked_scripts { "disabled" } else { "hide" };
    Access {
        valid,
        display: Some(display.to_string()),
        error: Some(NOT_PERMITTED.to_string()),
    }
}

/// A script file and schema to register
#[derive(Debug, Clone)]
pub struct AddScript {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub schema: ScriptSchema,
    pub group: Option<String>,
    pub name: Option<String>,
    /// Stored on the script as is; registration never imports the script
    pub ignore_bad_imports: bool,
    pub user_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AddScriptResult {
    pub script: Script,
    pub version: ScriptVersion,
    pub parameters_created: usize,
    pub parameters_reused: usize,
}

/// A script group with the forms of its scripts
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupDetail {
    pub id: i32,
    pub group_name: String,
    pub description: Option<String>,
    pub scripts: Vec<GroupScript>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupScript {
    #[serde(flatten)]
    pub summary: ScriptSummary,
    pub form: Option<ScriptForm>,
}

/// Everything needed to render a script form
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScriptPage {
    pub script: Script,
    pub version: VersionInfo,
    pub access: Access,
    pub form: ScriptForm,
}

/// Options of a script page request
#[derive(Debug, Clone, Default)]
pub struct ScriptFormQuery {
    pub version: Option<String>,
    pub iteration: Option<i16>,
    pub job_id: Option<i32>,
    /// Script parameter name -> initial values
    pub initial: HashMap<String, Vec<String>>,
}

impl ScriptFormQuery {
    /// Split query pairs into page options and initial values
    pub fn from_pairs(pairs: Vec<(String, String)>) -> AppResult<Self> {
        let mut query = ScriptFormQuery::default();
        for (key, value) in pairs {
            match key.as_str() {
                "version" => query.version = Some(value),
                "iteration" => {
                    let iteration = value
                        .parse()
                        .map_err(|_| AppError::BadRequest(format!("Invalid iteration: {}", value)))?;
                    query.iteration = Some(iteration);
                }
                "job_id" => {
                    let job_id = value
                        .parse()
                        .map_err(|_| AppError::BadRequest(format!("Invalid job id: {}", value)))?;
                    query.job_id = Some(job_id);
                }
                _ => query.initial.entry(key).or_default().push(value),
            }
        }
        Ok(query)
    }
}

/// Parameters of a version with their parser and group names
struct PreviousVersion {
    parsers: Vec<ScriptParser>,
    groups: Vec<ScriptParameterGroup>,
    parameters: Vec<(ParameterSignature, ScriptParameter)>,
}

impl PreviousVersion {
    fn parser_named(&self, name: &str) -> Option<&ScriptParser> {
        self.parsers.iter().find(|p| p.name == name)
    }

    fn group_named(&self, name: &str, hidden: bool) -> Option<&ScriptParameterGroup> {
        self.groups.iter().find(|g| g.group_name == name && g.hidden == hidden)
    }

    fn matching(&self, signature: &ParameterSignature, order: i16) -> Option<&ScriptParameter> {
        self.parameters
            .iter()
            .find(|(sig, param)| sig == signature && param.param_order == order)
            .map(|(_, param)| param)
    }
}

#[derive(Clone)]
pub struct ScriptsService {
    repository: Repository,
    config: ScriptlyConfig,
    storage: StorageConfig,
    store: FileStore,
}

impl ScriptsService {
    pub fn new(repository: Repository, config: ScriptlyConfig, storage: StorageConfig, store: FileStore) -> Self {
        Self {
            repository,
            config,
            storage,
            store,
        }
    }

    // Registration

    /// Register a script file as a new version of the script of the same name
    #[tracing::instrument(skip(self, request), fields(file = %request.filename))]
    pub async fn add_script(&self, request: AddScript) -> AppResult<AddScriptResult> {
        let script_checksum = checksum(&request.bytes);
        let name = request
            .name
            .clone()
            .or_else(|| request.schema.name.clone())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                Path::new(&request.filename)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| request.filename.clone())
            });

        let existing = self.repository.scripts.get_by_name(&name).await?;
        if let Some(script) = &existing {
            if self.repository.scripts.checksum_exists(script.id, &script_checksum).await? {
                return Err(AppError::Conflict("This script already exists!".to_string()));
            }
        }

        let group_name = request
            .group
            .clone()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| self.config.default_script_group.clone());
        let group = self.repository.scripts.get_or_create_group(&group_name).await?;

        let description = request.schema.description.as_deref();
        let script = match existing {
            Some(script) => {
                self.repository
                    .scripts
                    .touch(script.id, description, request.ignore_bad_imports)
                    .await?;
                script
            }
            None => {
                self.repository
                    .scripts
                    .create(&name, group.id, description, request.ignore_bad_imports)
                    .await?
            }
        };

        let filename = get_valid_filename(&request.filename).map_err(AppError::Validation)?;
        let storage_name = format!("{}/{}", self.storage.script_dir, filename);
        let script_path = self.store.local.save(&storage_name, &request.bytes).await?;
        if let Err(e) = self.store.mirror(&script_path).await {
            tracing::warn!("Could not mirror script {}: {}", script_path, e);
        }

        let previous = match self.repository.scripts.default_version(script.id).await? {
            Some(version) => Some(self.previous_version(version.id).await?),
            None => None,
        };

        let version_name = request.schema.version();
        let iteration = self
            .repository
            .scripts
            .max_iteration(script.id, &version_name)
            .await?
            .unwrap_or(0)
            + 1;
        let version = self
            .repository
            .scripts
            .create_version(
                script.id,
                &version_name,
                iteration,
                &script_path,
                &script_checksum,
                request.user_id,
            )
            .await?;

        let (created, reused) = self
            .add_parameters(&request.schema, version.id, previous.as_ref())
            .await?;

        tracing::info!(
            "Registered {} version {}.{} ({} new parameters, {} reused)",
            script.script_name,
            version.script_version,
            version.script_iteration,
            created,
            reused
        );

        Ok(AddScriptResult {
            script,
            version,
            parameters_created: created,
            parameters_reused: reused,
        })
    }

    async fn previous_version(&self, version_id: i32) -> AppResult<PreviousVersion> {
        let parsers = self.repository.parameters.parsers_for_version(version_id).await?;
        let groups = self.repository.parameters.groups_for_version(version_id).await?;
        let parameters = self
            .repository
            .parameters
            .parameters_for_version(version_id)
            .await?
            .into_iter()
            .filter_map(|param| {
                let parser = parsers.iter().find(|p| p.id == param.parser_id)?;
                let group = groups.iter().find(|g| g.id == param.parameter_group_id)?;
                Some((ParameterSignature::of(&param, &parser.name, &group.group_name), param))
            })
            .collect();
        Ok(PreviousVersion {
            parsers,
            groups,
            parameters,
        })
    }

    /// Create parsers, groups and parameters of a new version, linking the
    /// ones identical to the previous default version
    async fn add_parameters(
        &self,
        schema: &ScriptSchema,
        version_id: i32,
        previous: Option<&PreviousVersion>,
    ) -> AppResult<(usize, usize)> {
        let params = &self.repository.parameters;
        let mut created = 0;
        let mut reused = 0;
        let mut order: i16 = 0;
        let mut groups: HashMap<(String, bool), ScriptParameterGroup> = HashMap::new();

        for parser_name in schema.parser_names() {
            let parser = match previous.and_then(|p| p.parser_named(&parser_name)) {
                Some(parser) => {
                    params.link_parser(parser.id, version_id).await?;
                    parser.clone()
                }
                None => params.create_parser(&parser_name, version_id).await?,
            };

            for schema_group in schema.inputs.get(&parser_name).into_iter().flatten() {
                let key = (schema_group.group.clone(), schema_group.hidden);
                let group = match groups.get(&key) {
                    Some(group) => group.clone(),
                    None => {
                        let group = match previous.and_then(|p| p.group_named(&key.0, key.1)) {
                            Some(group) => {
                                params.link_group(group.id, version_id).await?;
                                group.clone()
                            }
                            None => params.create_group(&key.0, key.1, version_id).await?,
                        };
                        groups.insert(key, group.clone());
                        group
                    }
                };

                for node in &schema_group.nodes {
                    let signature = node
                        .signature(&parser.name, &group.group_name)
                        .map_err(AppError::Validation)?;
                    match previous.and_then(|p| p.matching(&signature, order)) {
                        Some(existing) => {
                            params.link_parser(existing.parser_id, version_id).await?;
                            params.link_group(existing.parameter_group_id, version_id).await?;
                            params.link_parameter(existing.id, version_id).await?;
                            reused += 1;
                        }
                        None => {
                            params
                                .create_parameter(&signature, parser.id, group.id, order, version_id)
                                .await?;
                            created += 1;
                        }
                    }
                    order += 1;
                }
            }
        }
        Ok((created, reused))
    }

    // Access

    /// Access of the caller to a script and its group
    pub async fn access(&self, script: &Script, caller: &Caller) -> AppResult<Access> {
        let script_groups = self.repository.scripts.script_user_groups(script.id).await?;
        let access = valid_user(script.is_active, &script_groups, caller, &self.config);
        if !access.valid {
            return Ok(access);
        }
        let group = self.repository.scripts.get_group(script.script_group_id).await?;
        let group_groups = self.repository.scripts.group_user_groups(group.id).await?;
        Ok(valid_user(group.is_active, &group_groups, caller, &self.config))
    }

    // Listing

    /// Active script groups with the scripts the caller may see
    pub async fn home(&self, caller: &Caller) -> AppResult<Vec<ScriptGroupListing>> {
        let mut listings = Vec::new();
        for group in self.repository.scripts.list_active_groups().await? {
            let group_groups = self.repository.scripts.group_user_groups(group.id).await?;
            let group_access = valid_user(group.is_active, &group_groups, caller, &self.config);
            if group_access.display.as_deref() == Some("hide") {
                continue;
            }

            let scripts = self.visible_scripts(group.id, &group_access, caller).await?;
            if scripts.is_empty() {
                continue;
            }
            listings.push(ScriptGroupListing {
                id: group.id,
                group_name: group.group_name,
                description: group.description,
                scripts,
            });
        }
        Ok(listings)
    }

    async fn visible_scripts(
        &self,
        group_id: i32,
        group_access: &Access,
        caller: &Caller,
    ) -> AppResult<Vec<ScriptSummary>> {
        let mut visible = Vec::new();
        for mut summary in self.repository.scripts.list_group_scripts(group_id).await? {
            let script_groups = self.repository.scripts.script_user_groups(summary.id).await?;
            let access = valid_user(true, &script_groups, caller, &self.config);
            let display = if group_access.valid { access.display } else { group_access.display.clone() };
            if display.as_deref() == Some("hide") {
                continue;
            }
            summary.locked = display;
            visible.push(summary);
        }
        Ok(visible)
    }

    /// A script group with the default-version form of each script
    pub async fn group_detail(&self, id: i32, caller: &Caller) -> AppResult<GroupDetail> {
        let group = self.repository.scripts.get_group(id).await?;
        let group_groups = self.repository.scripts.group_user_groups(group.id).await?;
        let group_access = valid_user(group.is_active, &group_groups, caller, &self.config);
        if !group_access.valid && !self.config.show_locked_scripts {
            return Err(AppError::NotFound(format!("Script group with id {} not found", id)));
        }

        let mut scripts = Vec::new();
        for summary in self.visible_scripts(group.id, &group_access, caller).await? {
            let form = match self.repository.scripts.default_version(summary.id).await? {
                Some(version) => Some(self.form_for_version(version.id, &FormInitial::default()).await?),
                None => None,
            };
            scripts.push(GroupScript { summary, form });
        }

        Ok(GroupDetail {
            id: group.id,
            group_name: group.group_name,
            description: group.description,
            scripts,
        })
    }

    pub async fn search(&self, q: &str) -> AppResult<Vec<ScriptSearchResult>> {
        let q = q.trim();
        if q.is_empty() {
            return Ok(Vec::new());
        }
        self.repository.scripts.search(q).await
    }

    pub async fn versions(&self, slug: &str) -> AppResult<Vec<VersionInfo>> {
        let script = self.repository.scripts.get_by_slug(slug).await?;
        self.repository.scripts.list_versions(script.id).await
    }

    // Forms

    /// Form description of one version
    pub async fn form_for_version(&self, version_id: i32, initial: &FormInitial) -> AppResult<ScriptForm> {
        let parsers = self.repository.parameters.parsers_for_version(version_id).await?;
        let groups = self.repository.parameters.groups_for_version(version_id).await?;
        let parameters = self.repository.parameters.parameters_for_version(version_id).await?;
        Ok(get_form_groups(version_id, &parsers, &groups, &parameters, initial))
    }

    /// Default version, or the last version matching the requested version and iteration
    async fn resolve_version(&self, script: &Script, query: &ScriptFormQuery) -> AppResult<ScriptVersion> {
        let found = if query.version.is_none() && query.iteration.is_none() {
            match self.repository.scripts.default_version(script.id).await? {
                Some(version) => Some(version),
                None => self.repository.scripts.find_version(script.id, None, None).await?,
            }
        } else {
            self.repository
                .scripts
                .find_version(script.id, query.version.as_deref(), query.iteration)
                .await?
        };
        found.ok_or_else(|| AppError::NotFound(format!("No matching version of script '{}'", script.slug)))
    }

    /// Initial values copied from a previous job of the caller
    async fn job_initial(&self, job_id: i32, version_id: i32, caller: &Caller) -> AppResult<FormInitial> {
        let job = self.repository.jobs.get_by_id(job_id).await?;
        if !(job.can_user_view(caller.user_id) || caller.is_superuser) {
            return Err(AppError::Authorization("You are not permitted to view this job".to_string()));
        }

        let parsers = self.repository.parameters.parsers_for_version(version_id).await?;
        let parameters = self.repository.parameters.parameters_for_version(version_id).await?;

        let values = self.repository.jobs.parameters(job.id).await?;
        let mut initial = FormInitial {
            parser: job_parser(job.parser_id, &parsers, &parameters, &values),
            ..FormInitial::default()
        };
        for job_param in values {
            let value = job_param.json_value();
            if value == Value::Null {
                continue;
            }
            initial.job_values.entry(job_param.parameter_id).or_default().push(value);
        }
        Ok(initial)
    }

    pub async fn script_form(&self, slug: &str, query: ScriptFormQuery, caller: &Caller) -> AppResult<ScriptPage> {
        let script = self.repository.scripts.get_by_slug(slug).await?;
        let version = self.resolve_version(&script, &query).await?;

        let mut initial = match query.job_id {
            Some(job_id) => self.job_initial(job_id, version.id, caller).await?,
            None => FormInitial::default(),
        };
        initial.query = query.initial;

        let form = self.form_for_version(version.id, &initial).await?;
        let access = self.access(&script, caller).await?;
        let version_info = self
            .repository
            .scripts
            .list_versions(script.id)
            .await?
            .into_iter()
            .find(|v| v.id == version.id)
            .ok_or_else(|| AppError::NotFound(format!("Script version with id {} not found", version.id)))?;

        Ok(ScriptPage {
            script,
            version: version_info,
            access,
            form,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_of(groups: &[i32]) -> Caller {
        Caller {
            user_id: Some(1),
            username: Some("alice".to_string()),
            is_superuser: false,
            groups: groups.to_vec(),
        }
    }

    #[test]
    fn test_form_query_from_pairs() {
        let pairs = vec![
            ("version".to_string(), "1.2".to_string()),
            ("iteration".to_string(), "3".to_string()),
            ("fasta".to_string(), "a".to_string()),
            ("fasta".to_string(), "b".to_string()),
        ];
        let query = ScriptFormQuery::from_pairs(pairs).unwrap();
        assert_eq!(query.version.as_deref(), Some("1.2"));
        assert_eq!(query.iteration, Some(3));
        assert_eq!(query.job_id, None);
        assert_eq!(query.initial["fasta"], vec!["a".to_string(), "b".to_string()]);

        let bad = vec![("job_id".to_string(), "abc".to_string())];
        assert!(matches!(ScriptFormQuery::from_pairs(bad), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_open_script() {
        let config = ScriptlyConfig::default();
        assert!(valid_user(true, &[], &Caller::anonymous(), &config).valid);
        assert!(valid_user(true, &[], &member_of(&[]), &config).valid);
    }

    #[test]
    fn test_inactive_script_is_locked() {
        let config = ScriptlyConfig::default();
        let access = valid_user(false, &[], &member_of(&[]), &config);
        assert!(!access.valid);
        assert_eq!(access.display.as_deref(), Some("disabled"));
        assert_eq!(access.error.as_deref(), Some(NOT_PERMITTED));
    }

    #[test]
    fn test_group_membership() {
        let config = ScriptlyConfig::default();
        assert!(valid_user(true, &[3, 4], &member_of(&[4]), &config).valid);
        assert!(!valid_user(true, &[3, 4], &member_of(&[5]), &config).valid);
        assert!(!valid_user(true, &[3], &Caller::anonymous(), &config).valid);
    }

    #[test]
    fn test_anonymous_disallowed() {
        let config = ScriptlyConfig {
            allow_anonymous: false,
            show_locked_scripts: false,
            ..ScriptlyConfig::default()
        };
        let access = valid_user(true, &[], &Caller::anonymous(), &config);
        assert!(!access.valid);
        assert_eq!(access.display.as_deref(), Some("hide"));
        assert!(valid_user(true, &[], &member_of(&[]), &config).valid);
    }
}
