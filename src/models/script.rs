//! Script groups, scripts, versions and virtual environments

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

/// A collection of scripts shown together
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScriptGroup {
    pub id: i32,
    pub group_name: String,
    pub slug: String,
    pub description: Option<String>,
    pub group_order: i16,
    pub is_active: bool,
}

/// A registered script
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Script {
    pub id: i32,
    pub script_name: String,
    pub slug: String,
    pub script_group_id: i32,
    pub script_description: Option<String>,
    pub documentation: Option<String>,
    pub script_order: i16,
    pub is_active: bool,
    /// Recorded attribute only, nothing imports the script
    pub ignore_bad_imports: bool,
    /// Invoke the script by absolute path rather than by file name
    pub execute_full_path: bool,
    /// Overrides the script slug as output folder name
    pub save_path: Option<String>,
    pub virtual_environment_id: Option<i32>,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
}

impl Script {
    /// Folder name used below the user directory for job outputs
    pub fn output_folder(&self) -> &str {
        match self.save_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => &self.slug,
        }
    }
}

/// An immutable revision of a script file and its parameters
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScriptVersion {
    pub id: i32,
    pub script_id: i32,
    pub script_version: String,
    pub script_iteration: i16,
    /// Storage name of the script file, relative to the media root
    pub script_path: String,
    pub default_version: bool,
    pub checksum: String,
    pub created_by: Option<i32>,
    pub modified_by: Option<i32>,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
}

impl ScriptVersion {
    /// Path handed to the interpreter: absolute, or the bare file name
    pub fn execution_path(&self, media_root: &Path, execute_full_path: bool) -> PathBuf {
        let full_path = media_root.join(&self.script_path);
        if execute_full_path {
            return full_path;
        }
        full_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or(full_path)
    }
}

/// Python virtual environment a script runs under
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct VirtualEnvironment {
    pub id: i32,
    pub name: String,
    /// Binary used to create the environment (e.g. `python3`)
    pub python_binary: String,
    /// Passed to `pip install -r`
    pub requirements: Option<String>,
    pub venv_directory: String,
}

impl VirtualEnvironment {
    pub fn install_path(&self) -> PathBuf {
        let binary_key: String = self.python_binary.chars().filter(|c| c.is_alphanumeric()).collect();
        Path::new(&self.venv_directory).join(binary_key).join(&self.name)
    }

    pub fn venv_python_binary(&self) -> PathBuf {
        if cfg!(windows) {
            self.install_path().join("Scripts").join("python.exe")
        } else {
            self.install_path().join("bin").join("python")
        }
    }
}

/// Script entry on the home page and in group listings
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ScriptSummary {
    pub id: i32,
    pub slug: String,
    pub script_name: String,
    pub script_description: Option<String>,
    pub modified_date: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    /// `disabled` or `hide` when the caller may not run the script
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(default)]
    pub locked: Option<String>,
}

/// A script group with its active scripts
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScriptGroupListing {
    pub id: i32,
    pub group_name: String,
    pub description: Option<String>,
    pub scripts: Vec<ScriptSummary>,
}

/// Version metadata shown next to a script form
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct VersionInfo {
    pub id: i32,
    pub script_version: String,
    pub script_iteration: i16,
    pub default_version: bool,
    pub checksum: String,
    pub created_by: Option<String>,
    pub created_date: DateTime<Utc>,
    pub modified_by: Option<String>,
    pub modified_date: DateTime<Utc>,
}

/// Search hit
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ScriptSearchResult {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub group_id: i32,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ScriptSearchQuery {
    /// Case-insensitive fragment of the script name
    pub q: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(path: &str) -> ScriptVersion {
        ScriptVersion {
            id: 1,
            script_id: 1,
            script_version: "1".to_string(),
            script_iteration: 1,
            script_path: path.to_string(),
            default_version: true,
            checksum: String::new(),
            created_by: None,
            modified_by: None,
            created_date: Utc::now(),
            modified_date: Utc::now(),
        }
    }

    #[test]
    fn test_execution_path() {
        let v = version("scriptly_scripts/merge_files.py");
        let root = Path::new("/srv/media");
        assert_eq!(
            v.execution_path(root, true),
            PathBuf::from("/srv/media/scriptly_scripts/merge_files.py")
        );
        assert_eq!(v.execution_path(root, false), PathBuf::from("merge_files.py"));
    }

    #[test]
    fn test_venv_paths() {
        let env = VirtualEnvironment {
            id: 1,
            name: "pandas".to_string(),
            python_binary: "/usr/bin/python3".to_string(),
            requirements: Some("pandas".to_string()),
            venv_directory: "/tmp/venvs".to_string(),
        };
        assert_eq!(env.install_path(), PathBuf::from("/tmp/venvs/usrbinpython3/pandas"));
        if !cfg!(windows) {
            assert_eq!(
                env.venv_python_binary(),
                PathBuf::from("/tmp/venvs/usrbinpython3/pandas/bin/python")
            );
        }
    }
}
