#![no_std]
#![deny(unsafe_code)]

//! In-memory LittleFS volumes sized for a flash partition.
//!
//! A [`Volume`] owns a [`RamStorage`] buffer that the littlefs codec formats
//! and populates. The finished buffer is the flashable image.

extern crate alloc;

use alloc::{string::String, vec, vec::Vec};
use core::{fmt, ops::Range};

use bytes::Bytes;
use littlefs2::{
    driver::Storage,
    fs::Filesystem,
    io::{self, Read as _},
    path::PathBuf,
};
use log::debug;

/// Erase block size of the default 12 MiB data partition.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// Number of erase blocks of the default 12 MiB data partition.
pub const DEFAULT_BLOCK_COUNT: usize = 3072;

/// Byte value of erased NOR flash.
pub const ERASE_VALUE: u8 = 0xff;

// Codec tuning, modelled after a SPI NOR part: small reads, 256 byte pages.
const READ_SIZE: usize = 4;
const WRITE_SIZE: usize = 256;
/// Block sizes must be a multiple of this.
pub const CACHE_SIZE: usize = 512;
const LOOKAHEAD_SIZE: usize = 1;

/// Largest image the builder keeps in memory, just under 4 GiB.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

#[derive(Debug)]
pub enum Error {
    InvalidGeometry,
    InvalidPath(String),
    ImageSize { expected: usize, actual: usize },
    OutOfMemory(usize),
    Lfs(io::Error),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Lfs(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidGeometry => write!(
                f,
                "invalid geometry: block size must be a multiple of {CACHE_SIZE}, block count at least 2, \
                 image at most {MAX_CAPACITY} bytes"
            ),
            Error::InvalidPath(path) => write!(f, "invalid volume path {path:?}"),
            Error::ImageSize { expected, actual } => {
                write!(f, "image is {actual} bytes, geometry needs {expected}")
            }
            Error::OutOfMemory(bytes) => write!(f, "cannot allocate {bytes} byte image"),
            Error::Lfs(error) => write!(f, "{} (littlefs error {})", describe(error), error.code()),
        }
    }
}

impl core::error::Error for Error {}

fn describe(error: &io::Error) -> &'static str {
    let messages = [
        (io::Error::NO_SPACE, "no space left in the image"),
        (io::Error::FILENAME_TOO_LONG, "file name too long"),
        (io::Error::FILE_TOO_BIG, "file too big"),
        (io::Error::ENTRY_ALREADY_EXISTED, "entry already exists"),
        (io::Error::NO_SUCH_ENTRY, "no such file or directory"),
        (io::Error::PATH_NOT_DIR, "parent is not a directory"),
        (io::Error::PATH_IS_DIR, "path is a directory"),
        (io::Error::CORRUPTION, "corrupted filesystem"),
        (io::Error::INVALID, "invalid parameter"),
        (io::Error::IO, "storage access out of range"),
    ];
    messages
        .iter()
        .find(|(code, _)| code == error)
        .map_or("filesystem error", |(_, message)| *message)
}

/// Block size and block count of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    block_size: usize,
    block_count: usize,
}

impl Geometry {
    pub fn new(block_size: usize, block_count: usize) -> Result<Self, Error> {
        if block_size == 0 || block_size % CACHE_SIZE != 0 || block_count < 2 {
            return Err(Error::InvalidGeometry);
        }
        // littlefs addresses blocks and offsets with 32 bit integers
        u32::try_from(block_size).map_err(|_| Error::InvalidGeometry)?;
        u32::try_from(block_count).map_err(|_| Error::InvalidGeometry)?;
        block_size
            .checked_mul(block_count)
            .filter(|capacity| *capacity <= MAX_CAPACITY)
            .ok_or(Error::InvalidGeometry)?;

        Ok(Self {
            block_size,
            block_count,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Total image size in bytes.
    pub fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: DEFAULT_BLOCK_COUNT,
        }
    }
}

/// Flash emulated in RAM, starting out fully erased.
pub struct RamStorage {
    geometry: Geometry,
    buf: Vec<u8>,
}

impl RamStorage {
    pub fn new(geometry: Geometry) -> Result<Self, Error> {
        let capacity = geometry.capacity();
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory(capacity))?;
        buf.resize(capacity, ERASE_VALUE);

        Ok(Self { geometry, buf })
    }

    pub fn from_image(geometry: Geometry, image: &[u8]) -> Result<Self, Error> {
        if image.len() != geometry.capacity() {
            return Err(Error::ImageSize {
                expected: geometry.capacity(),
                actual: image.len(),
            });
        }

        Ok(Self {
            geometry,
            buf: image.to_vec(),
        })
    }

    // littlefs never goes past block_count * block_size, but check anyway
    fn range(&self, off: usize, len: usize) -> io::Result<Range<usize>> {
        let end = off
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(io::Error::IO)?;
        Ok(off..end)
    }
}

impl Storage for RamStorage {
    type CACHE_BUFFER = [u8; CACHE_SIZE];
    type LOOKAHEAD_BUFFER = [u8; 8 * LOOKAHEAD_SIZE];

    fn read_size(&self) -> usize {
        READ_SIZE
    }

    fn write_size(&self) -> usize {
        WRITE_SIZE
    }

    fn block_size(&self) -> usize {
        self.geometry.block_size
    }

    fn cache_size(&self) -> usize {
        CACHE_SIZE
    }

    fn lookahead_size(&self) -> usize {
        LOOKAHEAD_SIZE
    }

    fn block_count(&self) -> usize {
        self.geometry.block_count
    }

    fn read(&mut self, off: usize, buf: &mut [u8]) -> io::Result<usize> {
        let range = self.range(off, buf.len())?;
        buf.copy_from_slice(&self.buf[range]);
        Ok(buf.len())
    }

    fn write(&mut self, off: usize, data: &[u8]) -> io::Result<usize> {
        let range = self.range(off, data.len())?;
        self.buf[range].copy_from_slice(data);
        Ok(data.len())
    }

    fn erase(&mut self, off: usize, len: usize) -> io::Result<usize> {
        let range = self.range(off, len)?;
        self.buf[range].fill(ERASE_VALUE);
        Ok(len)
    }
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub len: usize,
}

/// A LittleFS volume held in memory.
///
/// Every operation mounts the filesystem, performs the change and unmounts
/// again, so the buffer is a consistent image between calls.
pub struct Volume {
    storage: RamStorage,
}

impl Volume {
    /// Creates an empty, freshly formatted volume.
    pub fn format(geometry: Geometry) -> Result<Self, Error> {
        let mut storage = RamStorage::new(geometry)?;
        Filesystem::format(&mut storage)?;
        debug!(
            "formatted volume: {} blocks of {} bytes",
            geometry.block_count, geometry.block_size
        );

        Ok(Self { storage })
    }

    /// Opens an existing image. Fails unless the image has exactly the size
    /// of `geometry` and holds a mountable filesystem.
    pub fn mount(geometry: Geometry, image: &[u8]) -> Result<Self, Error> {
        let mut storage = RamStorage::from_image(geometry, image)?;
        Filesystem::mount_and_then(&mut storage, |_| Ok(()))?;

        Ok(Self { storage })
    }

    pub fn geometry(&self) -> Geometry {
        self.storage.geometry
    }

    pub fn create_dir(&mut self, path: &str) -> Result<(), Error> {
        let lfs_path = volume_path(path)?;
        debug!("mkdir {path}");
        Filesystem::mount_and_then(&mut self.storage, |fs| fs.create_dir(&lfs_path))?;
        Ok(())
    }

    /// Creates or truncates the file at `path` and writes `data` to it.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), Error> {
        let lfs_path = volume_path(path)?;
        debug!("write {path}: {} bytes", data.len());
        Filesystem::mount_and_then(&mut self.storage, |fs| fs.write(&lfs_path, data))?;
        Ok(())
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error> {
        let lfs_path = volume_path(path)?;
        let data = Filesystem::mount_and_then(&mut self.storage, |fs| {
            let len = fs.metadata(&lfs_path)?.len();
            fs.open_file_and_then(&lfs_path, |file| {
                let mut data = vec![0; len];
                let mut filled = 0;
                while filled < len {
                    let read = file.read(&mut data[filled..])?;
                    if read == 0 {
                        return Err(io::Error::IO);
                    }
                    filled += read;
                }
                Ok(data)
            })
        })?;
        Ok(data)
    }

    /// Lists a directory, without the `.` and `..` entries.
    pub fn read_dir(&mut self, path: &str) -> Result<Vec<Entry>, Error> {
        let lfs_path = volume_path(path)?;
        let entries = Filesystem::mount_and_then(&mut self.storage, |fs| {
            fs.read_dir_and_then(&lfs_path, |dir| {
                let mut entries = Vec::new();
                for entry in dir {
                    let entry = entry?;
                    let name = entry.file_name().as_str();
                    if name == "." || name == ".." {
                        continue;
                    }
                    let metadata = entry.metadata();
                    entries.push(Entry {
                        name: String::from(name),
                        is_dir: metadata.is_dir(),
                        len: metadata.len(),
                    });
                }
                Ok(entries)
            })
        })?;
        Ok(entries)
    }

    pub fn available_blocks(&mut self) -> Result<usize, Error> {
        let blocks = Filesystem::mount_and_then(&mut self.storage, |fs| fs.available_blocks())?;
        Ok(blocks)
    }

    /// The complete image, `geometry().capacity()` bytes long.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.storage.buf)
    }
}

fn volume_path(path: &str) -> Result<PathBuf, Error> {
    PathBuf::try_from(path).map_err(|_| Error::InvalidPath(String::from(path)))
}
