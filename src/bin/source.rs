use std::fs;
use std::path::{Path, PathBuf};

use crate::builder::BuilderError;

/// What to do with directories found in the source directory.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubdirPolicy {
    /// Fail the build
    #[default]
    Reject,
    /// Pack them, keeping the directory structure
    Recurse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// A host file or directory and the path it gets inside the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub host_path: PathBuf,
    pub volume_path: String,
    pub kind: EntryKind,
}

/// Lists the non-hidden entries of `dir`, sorted by name. Parents always
/// come before their children.
pub fn collect(dir: &Path, policy: SubdirPolicy) -> Result<Vec<SourceEntry>, BuilderError> {
    if !dir.is_dir() {
        return Err(BuilderError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut entries = Vec::new();
    collect_into(dir, "", policy, &mut entries)?;
    Ok(entries)
}

fn collect_into(
    dir: &Path,
    prefix: &str,
    policy: SubdirPolicy,
    entries: &mut Vec<SourceEntry>,
) -> Result<(), BuilderError> {
    let read_error = |source| BuilderError::SourceRead {
        path: dir.to_path_buf(),
        source,
    };

    let mut children = Vec::new();
    for child in fs::read_dir(dir).map_err(read_error)? {
        let child = child.map_err(read_error)?;
        let path = child.path();
        // hidden entries are skipped whatever their encoding
        if child.file_name().as_encoded_bytes().starts_with(b".") {
            log::debug!("skipping hidden {}", path.display());
            continue;
        }
        let name = child
            .file_name()
            .into_string()
            .map_err(|_| BuilderError::InvalidName(path.clone()))?;
        children.push((name, path));
    }
    children.sort();

    for (name, path) in children {
        let volume_path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        // follows symlinks
        let metadata = fs::metadata(&path).map_err(|source| BuilderError::SourceRead {
            path: path.clone(),
            source,
        })?;

        if metadata.is_dir() {
            if policy == SubdirPolicy::Reject {
                return Err(BuilderError::Subdirectory(path));
            }
            entries.push(SourceEntry {
                host_path: path.clone(),
                volume_path: volume_path.clone(),
                kind: EntryKind::Dir,
            });
            collect_into(&path, &volume_path, policy, entries)?;
        } else {
            entries.push(SourceEntry {
                host_path: path,
                volume_path,
                kind: EntryKind::File,
            });
        }
    }

    Ok(())
}
