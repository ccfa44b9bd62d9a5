//! Submission input for the command line.
//!
//! Reads one submission from a file or stdin, or every `.txt` file below a
//! directory, and assembles the metadata passed to the modules.

use crate::models::Metadata;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Source label used for stdin input.
pub const STDIN_SOURCE: &str = "<stdin>";

/// One submission to analyze.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub submission_id: String,
    /// File path or [`STDIN_SOURCE`].
    pub source: String,
    pub text: String,
}

/// Read the submissions named by `input`.
///
/// A directory yields one submission per `.txt` file, identified by its
/// path relative to the directory without the extension. A file or stdin
/// yields a single submission identified by `submission_id`, or by a
/// random UUID when none is given.
pub fn collect_submissions(input: Option<&Path>, submission_id: Option<&str>) -> Result<Vec<Submission>> {
    let single_id = || {
        submission_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    };

    match input {
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read submission from stdin")?;
            Ok(vec![Submission {
                submission_id: single_id(),
                source: STDIN_SOURCE.to_string(),
                text,
            }])
        }
        Some(path) if path.is_dir() => collect_directory(path),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read submission: {}", path.display()))?;
            Ok(vec![Submission {
                submission_id: single_id(),
                source: path.display().to_string(),
                text,
            }])
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn collect_directory(root: &Path) -> Result<Vec<Submission>> {
    let mut submissions = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
        let submission_id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        debug!("Found submission {} at {}", submission_id, path.display());
        submissions.push(Submission {
            submission_id,
            source: path.display().to_string(),
            text,
        });
    }

    if submissions.is_empty() {
        bail!("No .txt submissions found in {}", root.display());
    }
    Ok(submissions)
}

/// Load extra metadata from a JSON file containing an object.
pub fn load_metadata(path: Option<&Path>) -> Result<Metadata> {
    let Some(path) = path else {
        return Ok(Metadata::new());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read metadata file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse metadata file: {}", path.display()))?;

    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("Metadata file must contain a JSON object: {}", path.display()),
    }
}

/// Metadata for one submission: `extra` plus the identifiers given on the
/// command line, which take precedence.
pub fn build_metadata(
    extra: &Metadata,
    submission_id: &str,
    user_id: Option<&str>,
    institution_id: Option<&str>,
) -> Metadata {
    let mut metadata = extra.clone();
    metadata.insert("submission_id".into(), Value::from(submission_id));
    if let Some(user_id) = user_id {
        metadata.insert("user_id".into(), Value::from(user_id));
    }
    if let Some(institution_id) = institution_id {
        metadata.insert("institution_id".into(), Value::from(institution_id));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("essay.txt");
        std::fs::write(&path, "My essay.").unwrap();

        let subs = collect_submissions(Some(&path), Some("sub-1")).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].submission_id, "sub-1");
        assert_eq!(subs[0].text, "My essay.");

        let subs = collect_submissions(Some(&path), None).unwrap();
        assert!(uuid::Uuid::parse_str(&subs[0].submission_id).is_ok());
    }

    #[test]
    fn test_directory_batch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("alice")).unwrap();
        std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join("bob.txt"), "Bob's essay").unwrap();
        std::fs::write(dir.path().join("alice/essay1.txt"), "Alice's essay").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        std::fs::write(dir.path().join(".cache/old.txt"), "hidden").unwrap();

        let subs = collect_submissions(Some(dir.path()), None).unwrap();
        let ids: Vec<&str> = subs.iter().map(|s| s.submission_id.as_str()).collect();
        assert_eq!(ids, vec!["alice/essay1", "bob"]);
        assert_eq!(subs[1].text, "Bob's essay");
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_submissions(Some(dir.path()), None).is_err());
    }

    #[test]
    fn test_load_metadata() {
        assert!(load_metadata(None).unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, r#"{"session": {"paste_events": 4}}"#).unwrap();
        let metadata = load_metadata(Some(&path)).unwrap();
        assert_eq!(metadata["session"]["paste_events"], 4);

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(load_metadata(Some(&path)).is_err());
    }

    #[test]
    fn test_build_metadata_overrides() {
        let mut extra = Metadata::new();
        extra.insert("user_id".into(), json!("from-file"));
        extra.insert("course".into(), json!("HIST-101"));

        let metadata = build_metadata(&extra, "sub-9", Some("from-cli"), None);
        assert_eq!(metadata["submission_id"], "sub-9");
        assert_eq!(metadata["user_id"], "from-cli");
        assert_eq!(metadata["course"], "HIST-101");
        assert!(!metadata.contains_key("institution_id"));

        let metadata = build_metadata(&extra, "sub-9", None, Some("uni"));
        assert_eq!(metadata["user_id"], "from-file");
        assert_eq!(metadata["institution_id"], "uni");
    }
}
