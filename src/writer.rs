use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use flate2::{write::GzEncoder, Compression};

use crate::{format, Header, StreamErr, StreamResult};

/// Emits a container stream: one header frame, then an event frame per
/// [`Writer::push`].
///
/// The header frame is written lazily, so metadata can be attached up front
/// with [`Writer::with_header`]; a stream flushed without a single push still
/// gets its header frame, since a container must begin with one.
pub struct Writer<W: Write> {
    sink: W,
    header: Option<Header>,
    offset: u64,
    frames: u64,
}

impl Writer<BufWriter<File>> {
    /// Create (or truncate) a container file.
    pub fn create(path: impl AsRef<Path>) -> StreamResult<Self> {
        let file = File::create(path).map_err(StreamErr::IoError)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl Writer<GzEncoder<BufWriter<File>>> {
    /// Create a gzip-compressed container file. Call [`Writer::finish`] when
    /// done, or the gzip trailer never gets written.
    pub fn create_gzip(path: impl AsRef<Path>) -> StreamResult<Self> {
        let file = File::create(path).map_err(StreamErr::IoError)?;
        Ok(Self::new(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        )))
    }
}

impl<W: Write> Writer<W> {
    pub fn new(sink: W) -> Self {
        Self::with_header(sink, Header::default())
    }

    pub fn with_header(sink: W, header: Header) -> Self {
        Self {
            sink,
            header: Some(header),
            offset: 0,
            frames: 0,
        }
    }

    /// Append one event frame.
    pub fn push(&mut self, payload: &[u8]) -> StreamResult<()> {
        self.ensure_header()?;
        self.offset += format::write_frame(&mut self.sink, payload)?;
        self.frames += 1;
        Ok(())
    }

    /// Flush buffered frames to the sink, writing the header frame first if
    /// nothing was pushed yet.
    pub fn flush(&mut self) -> StreamResult<()> {
        self.ensure_header()?;
        self.sink.flush().map_err(StreamErr::IoError)
    }

    /// Event frames pushed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes emitted so far, whole frames only.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flush and take the sink back.
    pub fn into_inner(mut self) -> StreamResult<W> {
        self.flush()?;
        Ok(self.sink)
    }

    fn ensure_header(&mut self) -> StreamResult<()> {
        if let Some(header) = &self.header {
            let payload = header.encode();
            self.offset += format::write_frame(&mut self.sink, &payload)?;
            self.header = None;
        }
        Ok(())
    }
}

impl<W: Write> Writer<GzEncoder<W>> {
    /// Finalize the gzip stream and return the flushed inner sink.
    pub fn finish(mut self) -> StreamResult<W> {
        self.ensure_header()?;
        let mut sink = self.sink.finish().map_err(StreamErr::IoError)?;
        sink.flush().map_err(StreamErr::IoError)?;
        Ok(sink)
    }
}

impl<W: Write> fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("offset", &self.offset)
            .field("frames", &self.frames)
            .field("header_written", &self.header.is_none())
            .finish()
    }
}
