use std::{fmt, os::fd::OwnedFd, path::Path};

use log::{debug, warn};

use crate::{
    format::{self, FrameRead, Header, HeaderErr, MagicRead, DEFAULT_MAX_PAYLOAD_SIZE, MAGIC},
    ByteSource, DynSource, ErrKind, StreamErr, StreamResult, Synchronizer,
};

/// Tunables for a [`Reader`]. The defaults suit well-formed files; cap the
/// resync scan when reading from a live pipe that may never produce another
/// marker.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    max_payload_size: u64,
    max_resync_bytes: Option<u64>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_resync_bytes: None,
        }
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames declaring a payload above this size fail with
    /// [`StreamErr::OversizedLength`].
    pub fn max_payload_size(&self) -> u64 {
        self.max_payload_size
    }

    pub fn set_max_payload_size(&mut self, max: u64) -> &mut Self {
        self.max_payload_size = max;
        self
    }

    /// Cap on the bytes one Synchronizer attempt may discard. `None` scans
    /// until the end of the source.
    pub fn max_resync_bytes(&self) -> Option<u64> {
        self.max_resync_bytes
    }

    pub fn set_max_resync_bytes(&mut self, limit: Option<u64>) -> &mut Self {
        self.max_resync_bytes = limit;
        self
    }
}

/// Where a reader is in its lifecycle. Constructing the reader is the Open
/// transition, so a live value starts at `HeaderPending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Bound to a source; the header frame has not been read.
    HeaderPending,
    /// Header cached; serving event frames.
    Streaming,
    /// Clean end of stream was reached. Terminal.
    Exhausted,
    /// A hard failure was surfaced. Only [`Reader::resync`] can leave this
    /// state.
    Failed,
}

/// One event frame's payload, as pulled off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    payload: Vec<u8>,
    index: u64,
    offset: u64,
}

impl Event {
    fn new(payload: Vec<u8>, index: u64, offset: u64) -> Self {
        Self {
            payload,
            index,
            offset,
        }
    }

    /// Delivery ordinal: how many events were returned before this one.
    /// Frames lost to a resync do not consume ordinals.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Byte offset of the frame's marker in the (decompressed) source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Pulls a header frame and then event frames off a [`ByteSource`].
///
/// Strictly sequential and synchronous: every call blocks until it can
/// produce a result, an end-of-stream signal or a failure. All state lives in
/// the value, so independent readers never affect each other; sharing one
/// reader across threads requires external mutual exclusion.
pub struct Reader<S: ByteSource = DynSource> {
    source: S,
    options: ReaderOptions,
    state: ReaderState,
    header: Option<Vec<u8>>,
    /// set after an explicit resync: the cursor is past a marker, so the next
    /// read starts at the length field instead of expecting magic
    pending_body: bool,
    frames: u64,
    events: u64,
    last_error: Option<ErrKind>,
}

impl Reader<DynSource> {
    /// Open a container file.
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        Ok(Self::new(DynSource::open(path)?))
    }

    /// Open a gzip-compressed container file.
    pub fn open_gzip(path: impl AsRef<Path>) -> StreamResult<Self> {
        Ok(Self::new(DynSource::open_gzip(path)?))
    }

    /// Read from an open descriptor, e.g. the read end of a pipe.
    pub fn from_fd(fd: OwnedFd, gzip: bool) -> Self {
        Self::new(DynSource::from_fd(fd, gzip))
    }
}

impl<S: ByteSource> Reader<S> {
    /// Bind to a source. The header frame is not read until first needed.
    pub fn new(source: S) -> Self {
        Self::with_options(source, ReaderOptions::default())
    }

    pub fn with_options(source: S, options: ReaderOptions) -> Self {
        Self {
            source,
            options,
            state: ReaderState::HeaderPending,
            header: None,
            pending_body: false,
            frames: 0,
            events: 0,
            last_error: None,
        }
    }

    /// The header frame's payload, read and cached on first access. The first
    /// frame must be aligned: a marker mismatch here is a hard failure and the
    /// Synchronizer is never consulted, since there is no prior valid position
    /// to recover from.
    pub fn header(&mut self) -> StreamResult<&[u8]> {
        self.guard()?;
        if self.header.is_none() {
            let payload = self.read_header().map_err(|err| self.fail(err))?;
            self.header = Some(payload);
            self.frames += 1;
            self.state = ReaderState::Streaming;
        }
        Ok(self.header.as_deref().unwrap_or_default())
    }

    /// The header decoded with the metadata codec. A header that does not
    /// parse is a hard failure, like any other first-frame defect, except on
    /// a reader that is already `Exhausted`: the terminal state sticks and
    /// the error is only returned.
    pub fn metadata(&mut self) -> StreamResult<Header> {
        self.header()?;
        let decoded = Header::decode(self.header.as_deref().unwrap_or_default());
        decoded.map_err(|err| match self.state {
            ReaderState::Exhausted => StreamErr::Header(err),
            _ => self.fail(StreamErr::Header(err)),
        })
    }

    /// Pull the next event frame. `Ok(None)` is a clean end of stream. On a
    /// marker mismatch the Synchronizer runs once and one frame body is
    /// decoded at the recovered position; anything going wrong after that is
    /// a hard failure, so a single call never scans more than once.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> StreamResult<Option<Event>> {
        self.guard()?;
        if self.state == ReaderState::Exhausted {
            return Ok(None);
        }
        self.header()?;
        if self.pending_body {
            self.pending_body = false;
            let marker = self.source.offset() - MAGIC.len() as u64;
            let payload = self.read_body().map_err(|err| self.fail(err))?;
            return Ok(Some(self.deliver(payload, marker)));
        }
        let start = self.source.offset();
        match format::read_frame(&mut self.source, self.options.max_payload_size) {
            Ok(FrameRead::Frame(payload)) => Ok(Some(self.deliver(payload, start))),
            Ok(FrameRead::Eof) => {
                self.state = ReaderState::Exhausted;
                Ok(None)
            }
            Ok(FrameRead::NeedsSync(window)) => {
                let marker = match self.resync_once(window, start) {
                    Ok(marker) => marker,
                    Err(err) => return Err(self.fail(err)),
                };
                let payload = self.read_body().map_err(|err| self.fail(err))?;
                Ok(Some(self.deliver(payload, marker)))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Advance past up to `n` event frames without materializing payloads.
    /// Returns how many frames were actually skipped; fewer than `n` means
    /// the stream ended first, which is not an error. Corruption handling is
    /// identical to [`Reader::next`]: one Synchronizer attempt per frame.
    pub fn skip(&mut self, n: u64) -> StreamResult<u64> {
        self.guard()?;
        if self.state == ReaderState::Exhausted {
            return Ok(0);
        }
        self.header()?;
        let mut skipped = 0;
        while skipped < n {
            if self.pending_body {
                self.pending_body = false;
                self.skip_body().map_err(|err| self.fail(err))?;
            } else {
                let at = self.source.offset();
                match format::read_magic(&mut self.source) {
                    Ok(MagicRead::Eof) => {
                        self.state = ReaderState::Exhausted;
                        break;
                    }
                    Ok(MagicRead::Match) => {
                        self.skip_body().map_err(|err| self.fail(err))?;
                    }
                    Ok(MagicRead::Mismatch(window)) => {
                        self.resync_once(window, at)
                            .and_then(|_| self.skip_body())
                            .map_err(|err| self.fail(err))?;
                    }
                    Err(err) => return Err(self.fail(err)),
                }
            }
            skipped += 1;
            self.frames += 1;
        }
        Ok(skipped)
    }

    /// Explicitly scan for the next frame marker: the manual companion to the
    /// single automatic attempt inside [`Reader::next`] and [`Reader::skip`].
    /// Callable while `Streaming` and, most usefully, from `Failed`, where
    /// success puts the reader back into `Streaming`; callers wanting
    /// repeated recovery attempts loop over this. Returns the number of bytes
    /// discarded before the marker.
    pub fn resync(&mut self) -> StreamResult<u64> {
        if self.header.is_none() {
            // never aligned in the first place; a stream must begin aligned
            return Err(match self.last_error {
                Some(kind) => StreamErr::Poisoned(kind),
                None => StreamErr::Header(HeaderErr::Missing),
            });
        }
        if self.state == ReaderState::Exhausted {
            return Err(StreamErr::SyncFailed { scanned: 0 });
        }
        let at = self.source.offset();
        let outcome = match format::read_magic(&mut self.source) {
            Ok(MagicRead::Match) => Ok(0),
            Ok(MagicRead::Mismatch(window)) => {
                Synchronizer::new(&mut self.source, window, self.options.max_resync_bytes).run()
            }
            Ok(MagicRead::Eof) => Err(StreamErr::SyncFailed { scanned: 0 }),
            Err(StreamErr::Truncated) => Err(StreamErr::SyncFailed { scanned: 0 }),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(discarded) => {
                debug!("resync at offset {at} discarded {discarded} bytes");
                self.state = ReaderState::Streaming;
                self.last_error = None;
                self.pending_body = true;
                Ok(discarded)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Iterate the remaining events. Fused on error: after yielding an `Err`
    /// it only returns `None`.
    pub fn events(&mut self) -> Events<'_, S> {
        Events {
            reader: self,
            done: false,
        }
    }

    /// Current byte position in the source; the decompressed position when
    /// gzip is active. Strictly increasing, there is no rewind.
    pub fn offset(&self) -> u64 {
        self.source.offset()
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Why the reader is `Failed`. `None` while healthy or merely exhausted,
    /// which is how the two terminal conditions are told apart.
    pub fn last_error(&self) -> Option<ErrKind> {
        self.last_error
    }

    /// Frames consumed so far, the header frame and skipped frames included.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Discard the reader and take the source back.
    pub fn into_inner(self) -> S {
        self.source
    }

    fn guard(&self) -> StreamResult<()> {
        if self.state == ReaderState::Failed {
            Err(StreamErr::Poisoned(self.last_error.unwrap_or(ErrKind::Io)))
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, err: StreamErr) -> StreamErr {
        self.state = ReaderState::Failed;
        self.last_error = Some(err.kind());
        err
    }

    fn read_header(&mut self) -> StreamResult<Vec<u8>> {
        match format::read_magic(&mut self.source)? {
            MagicRead::Eof => Err(StreamErr::Header(HeaderErr::Missing)),
            MagicRead::Mismatch(_) => Err(StreamErr::Header(HeaderErr::ByteMark)),
            MagicRead::Match => self.read_body(),
        }
    }

    fn read_body(&mut self) -> StreamResult<Vec<u8>> {
        let length = format::read_length(&mut self.source, self.options.max_payload_size)?;
        format::read_payload(&mut self.source, length)
    }

    fn skip_body(&mut self) -> StreamResult<()> {
        let length = format::read_length(&mut self.source, self.options.max_payload_size)?;
        format::skip_payload(&mut self.source, length)
    }

    /// One Synchronizer attempt. On success the cursor sits at the length
    /// field of the recovered frame, whose marker offset is returned.
    fn resync_once(&mut self, window: [u8; MAGIC.len()], at: u64) -> StreamResult<u64> {
        warn!("frame marker mismatch at offset {at}; scanning for the next marker");
        let discarded =
            Synchronizer::new(&mut self.source, window, self.options.max_resync_bytes).run()?;
        debug!("recovered alignment after discarding {discarded} bytes");
        Ok(self.source.offset() - MAGIC.len() as u64)
    }

    fn deliver(&mut self, payload: Vec<u8>, offset: u64) -> Event {
        let event = Event::new(payload, self.events, offset);
        self.events += 1;
        self.frames += 1;
        event
    }
}

impl<S: ByteSource> fmt::Debug for Reader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("state", &self.state)
            .field("offset", &self.source.offset())
            .field("frames", &self.frames)
            .finish()
    }
}

pub struct Events<'a, S: ByteSource> {
    reader: &'a mut Reader<S>,
    done: bool,
}

impl<S: ByteSource> Iterator for Events<'_, S> {
    type Item = StreamResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<S: ByteSource> fmt::Debug for Events<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("reader", &self.reader)
            .field("done", &self.done)
            .finish()
    }
}
