#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

/// Positioned file I/O used by the batch log and corpus segments.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> io::Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> io::Result<()>;
    /// Synchronizes file data and metadata to disk.
    fn sync_all(&self) -> io::Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> io::Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to the specified length.
    fn truncate(&self, len: u64) -> io::Result<()>;
}

#[cfg(unix)]
mod positioned {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod positioned {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

/// Standard file I/O implementation using `Arc<File>`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Creates a new StdFileIo from an existing File handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file for read-write access without creating it.
    pub fn open_existing(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl FileIo for StdFileIo {
    #[cfg(any(unix, windows))]
    fn read_at(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        positioned::read_exact(&self.inner, off, dst)
    }

    #[cfg(any(unix, windows))]
    fn write_at(&self, off: u64, src: &[u8]) -> io::Result<()> {
        positioned::write_all(&self.inner, off, src)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_at(&self, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_at(&self, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    fn sync_all(&self) -> io::Result<()> {
        self.inner.sync_all()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.inner.set_len(len)
    }
}

/// Fsyncs a directory so renames and unlinks inside it become durable.
pub fn sync_dir(path: impl AsRef<Path>) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(path)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Treats a missing file as already removed.
pub fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
