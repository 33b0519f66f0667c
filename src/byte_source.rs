//! Uniform positional reads over disk files and in-memory byte buffers
//!
//! A [`ByteSource`] is the single byte-stream contract the loader works
//! against, whatever the provenance of the bytes: an opened disk file, an
//! owned buffer handed over by the caller, or a buffer that a producer
//! thread delivers later through the promise registry. Sources are read-only
//! by construction; nothing in this crate can write through one.
//!
//! The container parser consumes sources through their [`std::io::Read`] and
//! [`std::io::Seek`] impls, while the loader itself uses the stricter
//! positional operations (`read` fails on short reads, `seek` fails out of
//! range).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::future_source::FutureByteSource;

/// Upper bound for a single read syscall. Reads larger than this are issued
/// in chunks to stay under OS limits on some platforms.
const MAX_READ_CHUNK: usize = 64 * 1024 * 1024;

/// Resolve a `SeekFrom` against the current position and total size,
/// rejecting targets outside `[0, size]`.
fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => size.checked_add_signed(delta),
    };
    match target {
        Some(offset) if offset <= size => Ok(offset),
        Some(offset) => Err(Error::IoRange { offset, size }),
        None => Err(Error::IoRange { offset: u64::MAX, size }),
    }
}

/// A positional read-only view of an opened disk file.
#[derive(Debug)]
pub struct DiskSource {
    path: PathBuf,
    file: File,
    size: u64,
    pos: u64,
}

impl DiskSource {
    /// Open `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            Error::model_loading(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let size = file
            .metadata()
            .map_err(|e| {
                Error::model_loading(format!("Failed to stat {}: {}", path.display(), e))
            })?
            .len();
        Ok(Self {
            path,
            file,
            size,
            pos: 0,
        })
    }

    /// Path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying file handle, e.g. for memory mapping.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Map the whole file into memory.
    pub fn mmap(&self) -> Result<Mmap> {
        // Safety: the file is opened read-only and the mapping is dropped
        // independently of this source; callers keep the Mmap alive for as
        // long as any tensor references the mapped region.
        unsafe {
            Mmap::map(&self.file).map_err(|e| {
                Error::model_loading(format!("Failed to mmap {}: {}", self.path.display(), e))
            })
        }
    }

    fn read_full(&mut self, dst: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < dst.len() {
            let end = usize::min(done + MAX_READ_CHUNK, dst.len());
            let n = self.file.read(&mut dst[done..end])?;
            if n == 0 {
                return Err(Error::IoShort {
                    wanted: dst.len(),
                    got: done,
                });
            }
            done += n;
            self.pos += n as u64;
        }
        Ok(())
    }

    fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = resolve_seek(pos, self.pos, self.size)?;
        self.file.seek(SeekFrom::Start(target))?;
        self.pos = target;
        Ok(target)
    }
}

/// A positional read-only view of an owned byte buffer.
#[derive(Debug)]
pub struct BufferSource {
    data: Vec<u8>,
    pos: usize,
}

impl BufferSource {
    /// Wrap an owned buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_full(&mut self, dst: &mut [u8]) -> Result<()> {
        let available = self.data.len() - self.pos;
        if available < dst.len() {
            return Err(Error::IoShort {
                wanted: dst.len(),
                got: available,
            });
        }
        dst.copy_from_slice(&self.data[self.pos..self.pos + dst.len()]);
        self.pos += dst.len();
        Ok(())
    }

    fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = resolve_seek(pos, self.pos as u64, self.len())?;
        self.pos = target as usize;
        Ok(target)
    }

    /// Consume the buffer contents, leaving the source empty.
    pub(crate) fn take_data(&mut self) -> Vec<u8> {
        self.pos = 0;
        std::mem::take(&mut self.data)
    }

    /// Partial read with `std::io::Read` semantics.
    fn read_some(&mut self, dst: &mut [u8]) -> usize {
        let n = usize::min(dst.len(), self.data.len() - self.pos);
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// The positional byte stream the loader reads model bytes from.
///
/// Three provenances, one contract: `Disk` wraps an open file, `Buffer`
/// wraps an owned byte buffer, and `Future` wraps a buffer that arrives
/// later through a [`PromiseRegistry`](crate::promise::PromiseRegistry).
/// The first positional operation on a `Future` source blocks until its
/// buffer has been delivered.
#[derive(Debug)]
pub enum ByteSource {
    /// Bytes read from an opened file.
    Disk(DiskSource),
    /// Bytes owned in memory.
    Buffer(BufferSource),
    /// Bytes promised by a producer thread, extracted on first use.
    Future(FutureByteSource),
}

impl ByteSource {
    /// Open a disk-backed source.
    pub fn disk<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::Disk(DiskSource::open(path)?))
    }

    /// Wrap an owned buffer.
    pub fn buffer(data: Vec<u8>) -> Self {
        Self::Buffer(BufferSource::new(data))
    }

    /// Current read offset.
    pub fn tell(&mut self) -> u64 {
        match self {
            Self::Disk(disk) => disk.pos,
            Self::Buffer(buf) => buf.pos as u64,
            Self::Future(future) => future.extract().pos as u64,
        }
    }

    /// Total size in bytes.
    pub fn size(&mut self) -> u64 {
        match self {
            Self::Disk(disk) => disk.size,
            Self::Buffer(buf) => buf.len(),
            Self::Future(future) => future.extract().len(),
        }
    }

    /// Move the read offset. Targets outside the source fail with
    /// [`Error::IoRange`].
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            Self::Disk(disk) => disk.seek_to(pos),
            Self::Buffer(buf) => buf.seek_to(pos),
            Self::Future(future) => future.extract().seek_to(pos),
        }
    }

    /// Fill `dst` completely or fail with [`Error::IoShort`].
    pub fn read(&mut self, dst: &mut [u8]) -> Result<()> {
        match self {
            Self::Disk(disk) => disk.read_full(dst),
            Self::Buffer(buf) => buf.read_full(dst),
            Self::Future(future) => future.extract().read_full(dst),
        }
    }

    /// Read a little-endian `u32` at the current offset.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.read(&mut raw)?;
        Ok(LittleEndian::read_u32(&raw))
    }

    /// The file handle backing this source, if any.
    ///
    /// Buffer-backed sources have none; callers use this to refuse memory
    /// mapping for anything that is not a real file.
    pub fn file(&self) -> Option<&File> {
        match self {
            Self::Disk(disk) => Some(disk.file()),
            Self::Buffer(_) | Self::Future(_) => None,
        }
    }

    /// Map a disk-backed source into memory; buffer-backed sources refuse.
    pub fn mmap(&self) -> Result<Mmap> {
        match self {
            Self::Disk(disk) => disk.mmap(),
            Self::Buffer(_) | Self::Future(_) => Err(Error::model_loading(
                "memory mapping requires a disk-backed source",
            )),
        }
    }
}

impl io::Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Disk(disk) => {
                let end = usize::min(buf.len(), MAX_READ_CHUNK);
                let n = disk.file.read(&mut buf[..end])?;
                disk.pos += n as u64;
                Ok(n)
            }
            Self::Buffer(inner) => Ok(inner.read_some(buf)),
            Self::Future(future) => Ok(future.extract().read_some(buf)),
        }
    }
}

impl io::Seek for ByteSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        ByteSource::seek(self, pos)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_buffer_source_positional_reads() {
        let mut src = ByteSource::buffer(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(src.size(), 8);
        assert_eq!(src.tell(), 0);

        let mut out = [0u8; 3];
        src.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(src.tell(), 3);

        src.seek(SeekFrom::Start(4)).unwrap();
        assert_eq!(src.read_u32().unwrap(), u32::from_le_bytes([5, 6, 7, 8]));
        assert_eq!(src.tell(), 8);
    }

    #[test]
    fn test_buffer_source_short_read() {
        let mut src = ByteSource::buffer(vec![1, 2, 3]);
        src.seek(SeekFrom::Start(2)).unwrap();
        let mut out = [0u8; 4];
        let err = src.read(&mut out).unwrap_err();
        assert!(matches!(err, Error::IoShort { wanted: 4, got: 1 }));
    }

    #[test]
    fn test_buffer_source_seek_out_of_range() {
        let mut src = ByteSource::buffer(vec![0; 10]);
        assert!(matches!(
            src.seek(SeekFrom::Start(11)),
            Err(Error::IoRange { offset: 11, size: 10 })
        ));
        assert!(matches!(
            src.seek(SeekFrom::Current(-1)),
            Err(Error::IoRange { .. })
        ));
        // seeking exactly to the end is allowed
        assert_eq!(src.seek(SeekFrom::End(0)).unwrap(), 10);
    }

    #[test]
    fn test_buffer_source_has_no_file() {
        let src = ByteSource::buffer(vec![0; 4]);
        assert!(src.file().is_none());
        assert!(src.mmap().is_err());
    }

    #[test]
    fn test_disk_source_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[10, 20, 30, 40])
            .unwrap();

        let mut src = ByteSource::disk(&path).unwrap();
        assert_eq!(src.size(), 4);
        assert!(src.file().is_some());

        src.seek(SeekFrom::Start(1)).unwrap();
        let mut out = [0u8; 2];
        src.read(&mut out).unwrap();
        assert_eq!(out, [20, 30]);
        assert_eq!(src.tell(), 3);

        let mmap = src.mmap().unwrap();
        assert_eq!(&mmap[..], &[10, 20, 30, 40]);
    }

    #[test]
    fn test_disk_source_short_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [1u8, 2]).unwrap();

        let mut src = ByteSource::disk(&path).unwrap();
        let mut out = [0u8; 8];
        assert!(matches!(
            src.read(&mut out),
            Err(Error::IoShort { wanted: 8, got: 2 })
        ));
    }

    #[test]
    fn test_missing_file_reports_os_error() {
        let err = ByteSource::disk("/nonexistent/model.gguf").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/model.gguf"));
    }
}
