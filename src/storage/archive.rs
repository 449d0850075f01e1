//! Job output archives

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Every regular file below `dir`, sorted, as paths relative to `dir`
pub fn collect_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                if let Ok(relative) = entry.path().strip_prefix(dir) {
                    files.push(relative.to_path_buf());
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Zip the content of `dir` into `dest`. `dest` itself is skipped when it
/// lives inside `dir`. Returns the number of archived files.
pub fn zip_directory(dir: &Path, dest: &Path) -> io::Result<usize> {
    let files: Vec<PathBuf> = collect_files(dir)?
        .into_iter()
        .filter(|f| dir.join(f) != dest)
        .collect();

    let mut writer = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for relative in &files {
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(name, options).map_err(io::Error::other)?;
        writer.write_all(&std::fs::read(dir.join(relative))?)?;
    }
    writer.finish().map_err(io::Error::other)?;
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_zip_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plots")).unwrap();
        std::fs::write(dir.path().join("result.csv"), "a,b\n").unwrap();
        std::fs::write(dir.path().join("plots/a.txt"), "plot").unwrap();
        let dest = dir.path().join("job.zip");

        let count = zip_directory(dir.path(), &dest).unwrap();
        assert_eq!(count, 2);

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive.by_name("plots/a.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "plot");
    }

    #[test]
    fn test_collect_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/x"), "").unwrap();
        std::fs::write(dir.path().join("a"), "").unwrap();
        let files = collect_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("a"), PathBuf::from("b/x")]);
    }
}
