use std::fs;
use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use littlefs_image::{Geometry, Volume};

use crate::source::{EntryKind, SourceEntry};

#[derive(Debug)]
pub enum BuilderError {
    DirectoryNotFound(PathBuf),
    SourceRead {
        path: PathBuf,
        source: io::Error,
    },
    Subdirectory(PathBuf),
    InvalidName(PathBuf),
    Geometry(littlefs_image::Error),
    VolumeWrite {
        name: String,
        source: littlefs_image::Error,
    },
    VerifyMismatch(String),
    OutputWrite {
        path: PathBuf,
        source: io::Error,
    },
}

impl BuilderError {
    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            BuilderError::DirectoryNotFound(_)
            | BuilderError::SourceRead { .. }
            | BuilderError::Subdirectory(_)
            | BuilderError::InvalidName(_) => 3,
            BuilderError::Geometry(_)
            | BuilderError::VolumeWrite { .. }
            | BuilderError::VerifyMismatch(_) => 4,
            BuilderError::OutputWrite { .. } => 5,
        }
    }
}

impl std::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderError::DirectoryNotFound(path) => {
                write!(f, "source directory {} not found", path.display())
            }
            BuilderError::SourceRead { path, .. } => write!(f, "cannot read {}", path.display()),
            BuilderError::Subdirectory(path) => write!(
                f,
                "{} is a directory (use --subdirs recurse to pack it)",
                path.display()
            ),
            BuilderError::InvalidName(path) => {
                write!(f, "{} does not have a UTF-8 name", path.display())
            }
            BuilderError::Geometry(_) => write!(f, "unusable volume geometry"),
            BuilderError::VolumeWrite { name, .. } => write!(f, "cannot add {name} to the image"),
            BuilderError::VerifyMismatch(name) => {
                write!(f, "{name} reads back differently from the source")
            }
            BuilderError::OutputWrite { path, .. } => {
                write!(f, "cannot write image to {}", path.display())
            }
        }
    }
}

impl std::error::Error for BuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuilderError::SourceRead { source, .. } | BuilderError::OutputWrite { source, .. } => {
                Some(source)
            }
            BuilderError::Geometry(source) | BuilderError::VolumeWrite { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

pub struct LittleFsBuilder {
    volume: Volume,
}

impl LittleFsBuilder {
    pub fn new(geometry: Geometry) -> Result<Self, BuilderError> {
        let volume = Volume::format(geometry).map_err(BuilderError::Geometry)?;
        Ok(Self { volume })
    }

    pub fn add_dir(&mut self, name: &str) -> Result<(), BuilderError> {
        self.volume
            .create_dir(name)
            .map_err(|source| BuilderError::VolumeWrite {
                name: name.to_owned(),
                source,
            })
    }

    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<(), BuilderError> {
        self.volume
            .write_file(name, data)
            .map_err(|source| BuilderError::VolumeWrite {
                name: name.to_owned(),
                source,
            })
    }

    /// Reads a source entry from the host and adds it under its volume path.
    pub fn add_entry(&mut self, entry: &SourceEntry) -> Result<(), BuilderError> {
        match entry.kind {
            EntryKind::Dir => self.add_dir(&entry.volume_path),
            EntryKind::File => {
                let data = read_source(entry)?;
                self.add_file(&entry.volume_path, &data)
            }
        }
    }

    pub fn finalize(mut self) -> Result<Bytes, BuilderError> {
        match self.volume.available_blocks() {
            Ok(free) => log::info!(
                "{free} of {} blocks free",
                self.volume.geometry().block_count()
            ),
            Err(err) => log::warn!("cannot count free blocks: {err}"),
        }

        Ok(self.volume.into_bytes())
    }
}

/// Mounts a finished image and checks every packed file against its source.
pub fn verify(
    geometry: Geometry,
    image: &[u8],
    entries: &[SourceEntry],
) -> Result<(), BuilderError> {
    let mut volume = Volume::mount(geometry, image).map_err(|source| BuilderError::VolumeWrite {
        name: "/".to_owned(),
        source,
    })?;

    let mut verified = 0;
    for entry in entries.iter().filter(|entry| entry.kind == EntryKind::File) {
        let packed = volume
            .read_file(&entry.volume_path)
            .map_err(|source| BuilderError::VolumeWrite {
                name: entry.volume_path.clone(),
                source,
            })?;
        if packed != read_source(entry)? {
            return Err(BuilderError::VerifyMismatch(entry.volume_path.clone()));
        }
        verified += 1;
    }

    log::info!("verified {verified} files");
    Ok(())
}

fn read_source(entry: &SourceEntry) -> Result<Vec<u8>, BuilderError> {
    fs::read(&entry.host_path).map_err(|source| BuilderError::SourceRead {
        path: entry.host_path.clone(),
        source,
    })
}
