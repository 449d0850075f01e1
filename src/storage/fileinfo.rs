//! File type detection and previews

use std::path::Path;

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

/// Bytes inspected to detect the type of a file
const SNIFF_BYTES: u64 = 64 * 1024;
const PREVIEW_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Image,
    Fasta,
    Tabular,
    Text,
    Archive,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Fasta => "fasta",
            FileType::Tabular => "tabular",
            FileType::Text => "text",
            FileType::Archive => "archive",
            FileType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub filetype: FileType,
    pub preview: Option<Value>,
}

impl FileInfo {
    /// Preview as stored in `scriptly_files.filepreview`
    pub fn preview_json(&self) -> Option<String> {
        self.preview.as_ref().map(Value::to_string)
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn is_archive(ext: &str, head: &[u8]) -> bool {
    matches!(ext, "zip" | "tar" | "gz" | "tgz" | "bz2" | "xz" | "7z")
        || head.starts_with(b"PK\x03\x04")
        || head.starts_with(&[0x1f, 0x8b])
}

fn is_image(ext: &str, head: &[u8]) -> bool {
    matches!(ext, "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" | "webp" | "tif" | "tiff")
        || head.starts_with(b"\x89PNG")
        || head.starts_with(&[0xff, 0xd8, 0xff])
        || head.starts_with(b"GIF8")
}

/// Decode the sample as UTF-8, tolerating a character cut at the end
fn sample_text(head: &[u8]) -> Option<&str> {
    match std::str::from_utf8(head) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

fn fasta_preview(text: &str) -> Option<Value> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();
    if !lines.peek()?.starts_with('>') {
        return None;
    }
    let mut records: Vec<(String, String)> = Vec::new();
    for line in lines {
        if let Some(header) = line.strip_prefix('>') {
            if records.len() == PREVIEW_ROWS {
                break;
            }
            records.push((header.trim().to_string(), String::new()));
        } else if let Some((_, seq)) = records.last_mut() {
            seq.push_str(line.trim());
        }
    }
    Some(json!(records
        .into_iter()
        .map(|(header, seq)| vec![header, seq])
        .collect::<Vec<_>>()))
}

/// Split the first lines on a delimiter shared by all of them
fn tabular_preview(ext: &str, text: &str) -> Option<Value> {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(PREVIEW_ROWS)
        .collect();
    if lines.len() < 2 && !matches!(ext, "csv" | "tsv") {
        return None;
    }
    let delimiter = ['\t', ',', ';'].into_iter().find(|d| {
        let count = lines.first().map(|l| l.matches(*d).count()).unwrap_or(0);
        count > 0 && lines.iter().all(|l| l.matches(*d).count() == count)
    })?;
    let rows: Vec<Vec<String>> = lines
        .iter()
        .map(|l| l.split(delimiter).map(|c| c.trim().to_string()).collect())
        .collect();
    Some(json!(rows))
}

/// Detect the type of a file and build a small preview.
///
/// `name` is what image previews point at (the storage name, never the
/// absolute path).
pub async fn get_file_info(path: &Path, name: &str) -> std::io::Result<FileInfo> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::new();
    file.take(SNIFF_BYTES).read_to_end(&mut head).await?;
    Ok(classify(path, name, &head))
}

fn classify(path: &Path, name: &str, head: &[u8]) -> FileInfo {
    let ext = extension(path);
    if is_archive(&ext, head) {
        return FileInfo { filetype: FileType::Archive, preview: None };
    }
    if is_image(&ext, head) {
        return FileInfo {
            filetype: FileType::Image,
            preview: Some(json!([name])),
        };
    }
    let Some(text) = sample_text(head) else {
        return FileInfo { filetype: FileType::Other, preview: None };
    };
    if let Some(preview) = fasta_preview(text) {
        return FileInfo { filetype: FileType::Fasta, preview: Some(preview) };
    }
    if let Some(preview) = tabular_preview(&ext, text) {
        return FileInfo { filetype: FileType::Tabular, preview: Some(preview) };
    }
    let lines: Vec<&str> = text.lines().take(PREVIEW_ROWS).collect();
    FileInfo {
        filetype: FileType::Text,
        preview: Some(json!(lines)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tabular() {
        let info = classify(Path::new("out.csv"), "out.csv", b"a,b,c\n1,2,3\n4,5,6\n");
        assert_eq!(info.filetype, FileType::Tabular);
        assert_eq!(info.preview.unwrap(), json!([["a", "b", "c"], ["1", "2", "3"], ["4", "5", "6"]]));
    }

    #[test]
    fn test_fasta() {
        let info = classify(Path::new("seqs.fa"), "seqs.fa", b">seq1 first\nACGT\nTTGA\n>seq2\nGGCC\n");
        assert_eq!(info.filetype, FileType::Fasta);
        assert_eq!(info.preview.unwrap(), json!([["seq1 first", "ACGTTTGA"], ["seq2", "GGCC"]]));
    }

    #[test]
    fn test_text_image_archive_other() {
        let text = classify(Path::new("log.txt"), "log.txt", b"hello world\nsecond line\n");
        assert_eq!(text.filetype, FileType::Text);
        assert_eq!(text.preview.unwrap(), json!(["hello world", "second line"]));

        let image = classify(Path::new("plot"), "files/plot", b"\x89PNG\r\n\x1a\n....");
        assert_eq!(image.filetype, FileType::Image);
        assert_eq!(image.preview_json().as_deref(), Some("[\"files/plot\"]"));

        let archive = classify(Path::new("out.zip"), "out.zip", b"PK\x03\x04rest");
        assert_eq!(archive.filetype, FileType::Archive);

        let binary = classify(Path::new("blob"), "blob", &[0xff, 0xfe, 0x00, 0xc3, 0x28]);
        assert_eq!(binary.filetype, FileType::Other);
    }

    #[tokio::test]
    async fn test_get_file_info_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.tsv");
        tokio::fs::write(&path, "x\ty\n1\t2\n").await.unwrap();
        let info = get_file_info(&path, "data.tsv").await.unwrap();
        assert_eq!(info.filetype, FileType::Tabular);
    }
}
