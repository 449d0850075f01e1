//! Downloads of job files

use super::Caller;
use crate::{
    error::{AppError, AppResult},
    repository::Repository,
    storage::FileStore,
};

/// A file ready to be streamed back
#[derive(Debug)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Content type guessed from the file extension
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "fa" | "fasta" | "fq" | "fastq" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "tsv" | "tab" => "text/tab-separated-values; charset=utf-8",
        "json" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

#[derive(Clone)]
pub struct FilesService {
    repository: Repository,
    store: FileStore,
}

impl FilesService {
    pub fn new(repository: Repository, store: FileStore) -> Self {
        Self { repository, store }
    }

    /// Read a job file the caller may see
    pub async fn download(&self, id: i32, caller: &Caller) -> AppResult<Download> {
        let file = self.repository.files.get_user_file(id).await?;
        let job = self.repository.jobs.get_by_id(file.job_id).await?;
        if !(job.can_user_view(caller.user_id) || caller.is_superuser) {
            return Err(AppError::Authorization("You are not permitted to access this file".to_string()));
        }
        if !self.store.local.is_within_root(&file.filepath) {
            return Err(AppError::NotFound(format!("File with id {} not found", id)));
        }

        let path = self
            .store
            .ensure_local(&file.filepath)
            .await
            .map_err(|_| AppError::NotFound(format!("File {} is no longer available", file.filename)))?;
        let bytes = tokio::fs::read(&path).await?;
        let filename = std::path::Path::new(&file.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.filename.clone());

        Ok(Download {
            content_type: content_type_for(&filename),
            filename,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("out.CSV"), "text/csv; charset=utf-8");
        assert_eq!(content_type_for("merge.zip"), "application/zip");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }
}
