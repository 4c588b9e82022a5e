use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Write a file atomically: a uniquely named temp file in the target's
/// directory, fsynced, then persisted over the target. Readers never observe
/// a partially written file.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.exists() {
        std::fs::create_dir_all(parent)?;
    }

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Sanitize an id for safe use as a file stem.
/// Keeps alphanumeric, hyphens and underscores; replaces everything else.
pub fn sanitize_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out").join("public.json");

        atomic_write_str(&path, "first").expect("write");
        atomic_write_str(&path, "second").expect("overwrite");

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries: Vec<String> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["public.json".to_string()], "temp file left behind");
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("public"), "public");
        assert_eq!(sanitize_file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_file_stem("tier 2"), "tier_2");
    }
}
