//! Stored files and their links to jobs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;

/// A stored file, unique per checksum
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ScriptlyFile {
    pub id: i32,
    /// Storage name relative to the media root
    pub filepath: String,
    /// JSON encoded preview
    pub filepreview: Option<String>,
    pub filetype: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum: String,
}

/// A file as seen from one job (input upload or produced output)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserFile {
    pub id: i32,
    pub filename: String,
    pub job_id: i32,
    pub system_file_id: i32,
    /// Set when the file belongs to a job parameter
    pub parameter_id: Option<i32>,
}

/// A user file joined with its stored file
#[derive(Debug, Clone, FromRow)]
pub struct UserFileRow {
    pub id: i32,
    pub filename: String,
    pub job_id: i32,
    pub parameter_id: Option<i32>,
    pub system_file_id: i32,
    pub filepath: String,
    pub filepreview: Option<String>,
    pub filetype: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum: String,
    /// Whether the linked job parameter is an output slot
    pub is_output: Option<bool>,
}

/// File entry returned with job details
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FilePreview {
    pub id: i32,
    pub name: String,
    pub filetype: String,
    pub size_bytes: Option<i64>,
    pub url: String,
    #[schema(value_type = Option<Object>)]
    pub preview: Option<Value>,
}

impl From<UserFileRow> for FilePreview {
    fn from(row: UserFileRow) -> Self {
        FilePreview {
            id: row.id,
            name: row.filename,
            filetype: row.filetype.unwrap_or_else(|| "other".to_string()),
            size_bytes: row.size_bytes,
            url: format!("/api/v1/files/{}/download", row.id),
            preview: row.filepreview.and_then(|p| serde_json::from_str(&p).ok()),
        }
    }
}

/// Job files grouped by detected type
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct FileGroups {
    pub all: Vec<FilePreview>,
    pub archives: Vec<FilePreview>,
    pub images: Vec<FilePreview>,
    pub tabular: Vec<FilePreview>,
    pub fasta: Vec<FilePreview>,
    pub text: Vec<FilePreview>,
}

impl FileGroups {
    pub fn from_rows(rows: Vec<UserFileRow>) -> Self {
        let mut groups = FileGroups::default();
        for row in rows {
            let preview = FilePreview::from(row);
            match preview.filetype.as_str() {
                "archive" => groups.archives.push(preview.clone()),
                "image" => groups.images.push(preview.clone()),
                "tabular" => groups.tabular.push(preview.clone()),
                "fasta" => groups.fasta.push(preview.clone()),
                "text" => groups.text.push(preview.clone()),
                _ => {}
            }
            groups.all.push(preview);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i32, name: &str, filetype: &str) -> UserFileRow {
        UserFileRow {
            id,
            filename: name.to_string(),
            job_id: 1,
            parameter_id: None,
            system_file_id: id,
            filepath: format!("scriptly_files/x/{}", name),
            filepreview: Some("[[\"a\",\"b\"]]".to_string()),
            filetype: Some(filetype.to_string()),
            size_bytes: Some(4),
            checksum: "0".repeat(40),
            is_output: None,
        }
    }

    #[test]
    fn test_group_files() {
        let groups = FileGroups::from_rows(vec![
            row(1, "out.csv", "tabular"),
            row(2, "merge.zip", "archive"),
            row(3, "blob.bin", "other"),
        ]);
        assert_eq!(groups.all.len(), 3);
        assert_eq!(groups.tabular.len(), 1);
        assert_eq!(groups.archives[0].name, "merge.zip");
        assert_eq!(groups.all[0].url, "/api/v1/files/1/download");
        assert!(groups.all[0].preview.is_some());
    }
}
