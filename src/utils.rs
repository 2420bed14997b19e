use anyhow::Result;
use std::path::{Path, PathBuf};
use url::Url;

pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str)?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return Ok(filename.to_string());
            }
        }
    }

    // Fallback if no filename found in path
    Ok(format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Temporary file that holds one segment's bytes until the merge.
pub fn part_file_path(dest: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.part{}", dest.display(), index))
}

pub fn get_unique_filepath(dir: &Path, filename: &str) -> PathBuf {
    let mut path = dir.join(filename);
    let mut counter = 1;

    while path.exists() {
        let file_stem = path.file_stem().unwrap().to_string_lossy();
        let extension = path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();

        let new_filename = if extension.is_empty() {
            format!("{}_{}", file_stem, counter)
        } else {
            format!("{}_{}.{}", file_stem, counter, extension)
        };

        path = dir.join(new_filename);
        counter += 1;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_extraction() {
        assert_eq!(
            get_filename_from_url("https://example.com/archive.zip").unwrap(),
            "archive.zip"
        );

        // Query parameters are not part of the filename
        assert_eq!(
            get_filename_from_url("https://example.com/setup.exe?mirror=3").unwrap(),
            "setup.exe"
        );

        // No path segment: falls back to a generated name
        let fallback = get_filename_from_url("https://example.com/").unwrap();
        assert!(fallback.starts_with("download_"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a b/c:d.bin"), "a_b_c_d.bin");
        assert_eq!(sanitize_filename("plain-name_1.tar"), "plain-name_1.tar");
    }

    #[test]
    fn test_part_file_path_naming() {
        let part = part_file_path(Path::new("/downloads/video.mp4"), 3);
        assert_eq!(part, PathBuf::from("/downloads/video.mp4.part3"));
    }

    #[test]
    fn test_unique_filepath_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("file_1.bin"), b"x").unwrap();

        let unique = get_unique_filepath(dir.path(), "file.bin");
        assert_eq!(unique.file_name().unwrap(), "file_2.bin");
    }
}
