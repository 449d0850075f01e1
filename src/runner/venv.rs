//! Python virtual environments for scripts

use std::path::PathBuf;

use tokio::fs;
use tokio::process::Command;

use super::RunError;
use crate::models::VirtualEnvironment;

/// Make sure the environment exists and return its python binary.
///
/// A missing environment is created with `python_binary -m venv` and its
/// requirements are installed with pip. A failed install removes the
/// half-created environment.
pub async fn ensure_venv(env: &VirtualEnvironment) -> Result<PathBuf, RunError> {
    let binary = env.venv_python_binary();
    if fs::metadata(&binary).await.is_ok() {
        return Ok(binary);
    }

    let install_path = env.install_path();
    if let Some(parent) = install_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    tracing::info!("Creating virtual environment {} in {}", env.name, install_path.display());
    let created = Command::new(&env.python_binary)
        .arg("-m")
        .arg("venv")
        .arg(&install_path)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RunError::NotFound(env.python_binary.clone()),
            _ => RunError::Io(e),
        })?;
    if !created.status.success() {
        return Err(RunError::Venv(String::from_utf8_lossy(&created.stderr).into_owned()));
    }

    let requirements = env.requirements.as_deref().map(str::trim).unwrap_or_default();
    if !requirements.is_empty() {
        let requirements_file = install_path.join("requirements.txt");
        fs::write(&requirements_file, requirements).await?;
        let installed = Command::new(&binary)
            .args(["-m", "pip", "install", "-r"])
            .arg(&requirements_file)
            .output()
            .await?;
        if !installed.status.success() {
            let _ = fs::remove_dir_all(&install_path).await;
            return Err(RunError::Venv(String::from_utf8_lossy(&installed.stderr).into_owned()));
        }
    }

    Ok(binary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(dir: &std::path::Path, python: &str) -> VirtualEnvironment {
        VirtualEnvironment {
            id: 1,
            name: "tools".to_string(),
            python_binary: python.to_string(),
            requirements: None,
            venv_directory: dir.to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn test_existing_environment_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path(), "scriptly-missing-python");
        let binary = env.venv_python_binary();
        fs::create_dir_all(binary.parent().unwrap()).await.unwrap();
        fs::write(&binary, "").await.unwrap();

        assert_eq!(ensure_venv(&env).await.unwrap(), binary);
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_venv(&env(dir.path(), "scriptly-missing-python")).await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }
}
