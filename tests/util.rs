use std::{
    fs::OpenOptions,
    io::{Cursor, Read},
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use proio_stream::ByteSource;

pub fn temp_file(name: &str) -> Result<PathBuf, std::io::Error> {
    let path = PathBuf::from(format!("/tmp/{name}"));
    let _file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)?;
    Ok(path)
}

pub fn timestamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

/// In-memory byte source. `chunk` caps how many bytes a single read returns,
/// which mimics the short reads of a descriptor-backed source.
pub struct MemSource {
    cursor: Cursor<Vec<u8>>,
    chunk: usize,
}

impl MemSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::with_chunk(bytes, usize::MAX)
    }

    pub fn with_chunk(bytes: Vec<u8>, chunk: usize) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            chunk,
        }
    }
}

impl Read for MemSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.chunk);
        self.cursor.read(&mut buf[..n])
    }
}

impl ByteSource for MemSource {
    fn offset(&self) -> u64 {
        self.cursor.position()
    }
}
