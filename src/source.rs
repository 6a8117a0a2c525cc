use std::{
    fmt,
    fs::File,
    io::{BufReader, Read},
    os::fd::OwnedFd,
    path::Path,
};

use flate2::read::GzDecoder;

use crate::{StreamErr, StreamResult};

/// A sequential supply of bytes with a monotonic read cursor. Never rewinds.
///
/// The offset counts bytes handed out so far; with gzip active that is the
/// decompressed position, which is what frame offsets are defined over.
pub trait ByteSource: Read {
    fn offset(&self) -> u64;
}

/// Buffered sequential reads from a file on disk.
#[derive(Debug)]
pub struct FileSource {
    reader: BufReader<File>,
    offset: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let file = File::open(path).map_err(StreamErr::IoError)?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
        })
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes = self.reader.read(buf)?;
        self.offset += bytes as u64;
        Ok(bytes)
    }
}

impl ByteSource for FileSource {
    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Unbuffered reads from an open descriptor, e.g. the read end of a pipe.
/// Reads may block until the producer writes more, and may return fewer bytes
/// than asked; downstream loops until it has what it needs.
#[derive(Debug)]
pub struct FdSource {
    file: File,
    offset: u64,
}

impl FdSource {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            offset: 0,
        }
    }
}

impl Read for FdSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes = self.file.read(buf)?;
        self.offset += bytes as u64;
        Ok(bytes)
    }
}

impl ByteSource for FdSource {
    fn offset(&self) -> u64 {
        self.offset
    }
}

enum RawSource {
    File(BufReader<File>),
    Fd(File),
}

impl Read for RawSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::File(reader) => reader.read(buf),
            Self::Fd(file) => file.read(buf),
        }
    }
}

/// Transparently decompresses an underlying gzip byte sequence. Everything
/// downstream consumes the decompressed bytes the same way as the plain
/// variants.
pub struct GzipSource {
    decoder: GzDecoder<RawSource>,
    offset: u64,
}

impl GzipSource {
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let file = File::open(path).map_err(StreamErr::IoError)?;
        Ok(Self::from_raw(RawSource::File(BufReader::new(file))))
    }

    pub fn from_fd(fd: OwnedFd) -> Self {
        Self::from_raw(RawSource::Fd(File::from(fd)))
    }

    fn from_raw(raw: RawSource) -> Self {
        Self {
            decoder: GzDecoder::new(raw),
            offset: 0,
        }
    }
}

impl Read for GzipSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes = self.decoder.read(buf)?;
        self.offset += bytes as u64;
        Ok(bytes)
    }
}

impl ByteSource for GzipSource {
    fn offset(&self) -> u64 {
        self.offset
    }
}

impl fmt::Debug for GzipSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipSource")
            .field("offset", &self.offset)
            .finish()
    }
}

/// The closed set of byte sources a [`Reader`](crate::Reader) can be bound
/// to, matching the construction surface: open by path, open by descriptor,
/// with or without gzip.
#[derive(Debug)]
pub enum DynSource {
    File(FileSource),
    Fd(FdSource),
    Gzip(GzipSource),
}

impl DynSource {
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        Ok(Self::File(FileSource::open(path)?))
    }

    pub fn open_gzip(path: impl AsRef<Path>) -> StreamResult<Self> {
        Ok(Self::Gzip(GzipSource::open(path)?))
    }

    pub fn from_fd(fd: OwnedFd, gzip: bool) -> Self {
        if gzip {
            Self::Gzip(GzipSource::from_fd(fd))
        } else {
            Self::Fd(FdSource::new(fd))
        }
    }
}

impl Read for DynSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::File(source) => source.read(buf),
            Self::Fd(source) => source.read(buf),
            Self::Gzip(source) => source.read(buf),
        }
    }
}

impl ByteSource for DynSource {
    fn offset(&self) -> u64 {
        match self {
            Self::File(source) => source.offset(),
            Self::Fd(source) => source.offset(),
            Self::Gzip(source) => source.offset(),
        }
    }
}
