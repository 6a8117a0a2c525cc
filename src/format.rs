//! The PROIO container is a flat sequence of self-framing records.
//! It is a binary format, but payloads pass through untouched, so it is
//! readable with a plain text editor if the payloads are UTF-8.
//!
//! ```ignore
//! +-----------------~-----------------+
//! |               Header              |
//! +-----------------~-----------------+
//! |               Event               |
//! +-----------------~-----------------+
//! |               Event ...           |
//! +-----------------~-----------------+
//!
//! Every frame, the header frame included, is:
//!
//! +------------------+--------+----~----+
//! |  magic (8 bytes) | length | payload |
//! +------------------+--------+----~----+
//!
//! length is an unsigned LEB128 varint: little-endian base-128, 7 bits per
//! byte, continuation bit set on every byte but the last. It counts payload
//! bytes only.
//!
//! Header metadata v1 is:
//!
//! +---------+-------+------+----~----+------+-----~-----+-----+
//! | version | count | klen |   key   | vlen |   value   | ... |
//! +---------+-------+------+----~----+------+-----~-----+-----+
//! ```
//!
//! The whole stream may be gzip compressed, in which case framing applies to
//! the decompressed bytes. There is no trailer: the end of stream is simply
//! running out of bytes at a frame boundary.

use std::{
    collections::BTreeMap,
    io::{ErrorKind, Read, Write},
    str::Utf8Error,
};

use thiserror::Error;

use crate::{StreamErr, StreamResult};

/// Every frame starts with these 8 bytes: `PROIOV1\0`.
pub const MAGIC: [u8; 8] = [0x50, 0x52, 0x4F, 0x49, 0x4F, 0x56, 0x31, 0x00];

/// Default cap on the decoded length field. Guards against corrupt or hostile
/// length fields causing unbounded allocation.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Version of the header metadata codec.
pub const HEADER_VERSION: u64 = 1;

/// Outcome of reading the 8 magic bytes at a presumed frame boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MagicRead {
    /// The marker matched; the cursor sits at the length field.
    Match,
    /// Not a frame boundary. Carries the bytes read, so they can seed a
    /// [`Synchronizer`](crate::Synchronizer) window without losing input.
    Mismatch([u8; MAGIC.len()]),
    /// Zero bytes left; a clean end of stream.
    Eof,
}

/// Outcome of decoding one whole frame. Lost alignment and end of stream are
/// expected conditions handled in place by the caller, so they are variants
/// here rather than errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    Frame(Vec<u8>),
    /// Magic mismatch; framing alignment was lost.
    NeedsSync([u8; MAGIC.len()]),
    Eof,
}

#[derive(Error, Debug)]
pub enum HeaderErr {
    #[error("The stream ended before a header frame")]
    Missing,
    #[error("Byte mark mismatch on the first frame")]
    ByteMark,
    #[error("Unsupported metadata version: {0}")]
    Version(u64),
    #[error("Utf8Error: {0}")]
    Utf8Error(#[source] Utf8Error),
    #[error("Metadata ended prematurely")]
    Short,
    #[error("Malformed varint in metadata")]
    Varint,
}

/// Read until `buf` is full or the source is exhausted. Returns the number of
/// bytes filled. Descriptor-backed sources may return short reads, so this
/// loops; a short read is not an error.
pub(crate) fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> StreamResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(bytes) => filled += bytes,
            Err(err) if err.kind() == ErrorKind::Interrupted => (),
            Err(err) => return Err(StreamErr::IoError(err)),
        }
    }
    Ok(filled)
}

/// Read the magic bytes at a presumed frame boundary. Ending mid-marker is
/// [`StreamErr::Truncated`]; only a clean zero-byte read is `Eof`.
pub fn read_magic<R: Read>(source: &mut R) -> StreamResult<MagicRead> {
    let mut window = [0u8; MAGIC.len()];
    match fill(source, &mut window)? {
        0 => Ok(MagicRead::Eof),
        n if n < MAGIC.len() => Err(StreamErr::Truncated),
        _ if window == MAGIC => Ok(MagicRead::Match),
        _ => Ok(MagicRead::Mismatch(window)),
    }
}

/// Decode the length field: up to 10 bytes of little-endian base-128.
/// Rejects values above `max` before any payload is read or allocated.
pub fn read_length<R: Read>(source: &mut R, max: u64) -> StreamResult<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let mut byte = [0u8; 1];
        if fill(source, &mut byte)? == 0 {
            return Err(StreamErr::Truncated);
        }
        let byte = byte[0];
        if byte < 0x80 {
            if shift == 63 && byte > 1 {
                // the 10th byte can only contribute one bit
                return Err(StreamErr::OversizedLength { size: u64::MAX, max });
            }
            value |= (byte as u64) << shift;
            if value > max {
                return Err(StreamErr::OversizedLength { size: value, max });
            }
            return Ok(value);
        }
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if shift >= 64 {
            return Err(StreamErr::OversizedLength { size: u64::MAX, max });
        }
    }
}

/// Read exactly `length` payload bytes.
pub fn read_payload<R: Read>(source: &mut R, length: u64) -> StreamResult<Vec<u8>> {
    let mut payload = vec![0u8; length as usize];
    if fill(source, &mut payload)? < payload.len() {
        return Err(StreamErr::Truncated);
    }
    Ok(payload)
}

/// Advance past `length` payload bytes without materializing them.
pub fn skip_payload<R: Read>(source: &mut R, length: u64) -> StreamResult<()> {
    let copied = std::io::copy(&mut source.by_ref().take(length), &mut std::io::sink())
        .map_err(StreamErr::IoError)?;
    if copied < length {
        return Err(StreamErr::Truncated);
    }
    Ok(())
}

/// Decode one frame at the cursor.
pub fn read_frame<R: Read>(source: &mut R, max_payload_size: u64) -> StreamResult<FrameRead> {
    match read_magic(source)? {
        MagicRead::Eof => Ok(FrameRead::Eof),
        MagicRead::Mismatch(window) => Ok(FrameRead::NeedsSync(window)),
        MagicRead::Match => {
            let length = read_length(source, max_payload_size)?;
            Ok(FrameRead::Frame(read_payload(source, length)?))
        }
    }
}

fn encode_varint(mut value: u64, buf: &mut [u8; 10]) -> usize {
    let mut i = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        buf[i] = if value != 0 { byte | 0x80 } else { byte };
        i += 1;
        if value == 0 {
            return i;
        }
    }
}

/// Encode `value` as an unsigned LEB128 varint. Returns the encoded size.
pub fn write_length<W: Write>(sink: &mut W, value: u64) -> StreamResult<usize> {
    let mut buf = [0u8; 10];
    let size = encode_varint(value, &mut buf);
    sink.write_all(&buf[..size]).map_err(StreamErr::IoError)?;
    Ok(size)
}

/// Encode one frame: magic, varint length, payload. Returns the frame's total
/// size in bytes.
pub fn write_frame<W: Write>(sink: &mut W, payload: &[u8]) -> StreamResult<u64> {
    sink.write_all(&MAGIC).map_err(StreamErr::IoError)?;
    let length_size = write_length(sink, payload.len() as u64)?;
    sink.write_all(payload).map_err(StreamErr::IoError)?;
    Ok((MAGIC.len() + length_size + payload.len()) as u64)
}

/// Stream-level metadata carried by the header frame.
///
/// The framing layer treats the header payload as opaque bytes; this is the
/// codec the [`Writer`](crate::Writer) emits and
/// [`Reader::metadata`](crate::Reader::metadata) decodes. Keys are UTF-8,
/// values arbitrary bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderV1 {
    entries: BTreeMap<String, Vec<u8>>,
}

pub type Header = HeaderV1;

impl HeaderV1 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut varint = [0u8; 10];
        let mut buf = Vec::new();
        let size = encode_varint(HEADER_VERSION, &mut varint);
        buf.extend_from_slice(&varint[..size]);
        let size = encode_varint(self.entries.len() as u64, &mut varint);
        buf.extend_from_slice(&varint[..size]);
        for (key, value) in &self.entries {
            let size = encode_varint(key.len() as u64, &mut varint);
            buf.extend_from_slice(&varint[..size]);
            buf.extend_from_slice(key.as_bytes());
            let size = encode_varint(value.len() as u64, &mut varint);
            buf.extend_from_slice(&varint[..size]);
            buf.extend_from_slice(value);
        }
        buf
    }

    /// Decode a header frame's payload. Bytes after the last entry are
    /// ignored, leaving room for future versions to append.
    pub fn decode(payload: &[u8]) -> Result<Self, HeaderErr> {
        let bytes = &mut &payload[..];
        let version = take_varint(bytes)?;
        if version != HEADER_VERSION {
            return Err(HeaderErr::Version(version));
        }
        let count = take_varint(bytes)?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let klen = take_varint(bytes)? as usize;
            let key = std::str::from_utf8(take_bytes(bytes, klen)?)
                .map_err(HeaderErr::Utf8Error)?
                .to_owned();
            let vlen = take_varint(bytes)? as usize;
            entries.insert(key, take_bytes(bytes, vlen)?.to_vec());
        }
        Ok(Self { entries })
    }
}

fn take_varint(bytes: &mut &[u8]) -> Result<u64, HeaderErr> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let (&byte, rest) = bytes.split_first().ok_or(HeaderErr::Short)?;
        *bytes = rest;
        if byte < 0x80 {
            if shift == 63 && byte > 1 {
                return Err(HeaderErr::Varint);
            }
            return Ok(value | (byte as u64) << shift);
        }
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if shift >= 64 {
            return Err(HeaderErr::Varint);
        }
    }
}

fn take_bytes<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8], HeaderErr> {
    if bytes.len() < n {
        return Err(HeaderErr::Short);
    }
    let (head, rest) = bytes.split_at(n);
    *bytes = rest;
    Ok(head)
}

#[cfg(feature = "serde")]
impl serde::Serialize for HeaderV1 {
    /// Entries with UTF-8 values serialize as strings, the rest as byte
    /// arrays.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            match std::str::from_utf8(value) {
                Ok(utf8) => map.serialize_entry(key, utf8)?,
                Err(_) => map.serialize_entry(key, value)?,
            }
        }
        map.end()
    }
}
