use std::{fmt, io::Read};

use crate::{
    format::{fill, MAGIC},
    StreamErr, StreamResult,
};

/// The goal of the Synchronizer is to find the next frame marker after
/// alignment is lost. It slides an 8-byte window over the source one byte at
/// a time; once the window equals the marker, the cursor sits exactly past
/// it, at the length field, and a normal body decode can resume.
pub struct Synchronizer<'a, R: Read> {
    source: &'a mut R,
    window: [u8; MAGIC.len()],
    limit: Option<u64>,
    scanned: u64,
}

impl<'a, R: Read> Synchronizer<'a, R> {
    /// `window` is seeded with the bytes already consumed at the failed
    /// boundary, so no input is lost.
    pub fn new(source: &'a mut R, window: [u8; MAGIC.len()], limit: Option<u64>) -> Self {
        Self {
            source,
            window,
            limit,
            scanned: 0,
        }
    }

    /// Scan forward until the marker is found, returning the number of bytes
    /// discarded before it. "Not found yet" alone never fails; only end of
    /// stream or an exceeded scan limit does.
    pub fn run(mut self) -> StreamResult<u64> {
        while self.window != MAGIC {
            if let Some(limit) = self.limit {
                if self.scanned >= limit {
                    return Err(StreamErr::SyncFailed {
                        scanned: self.scanned,
                    });
                }
            }
            let mut byte = [0u8; 1];
            if fill(&mut *self.source, &mut byte)? == 0 {
                return Err(StreamErr::SyncFailed {
                    scanned: self.scanned,
                });
            }
            self.window.copy_within(1.., 0);
            self.window[MAGIC.len() - 1] = byte[0];
            self.scanned += 1;
        }
        Ok(self.scanned)
    }
}

impl<R: Read> fmt::Debug for Synchronizer<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("window", &self.window)
            .field("scanned", &self.scanned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_of(bytes: &[u8]) -> [u8; MAGIC.len()] {
        let mut window = [0u8; MAGIC.len()];
        window.copy_from_slice(&bytes[..MAGIC.len()]);
        window
    }

    #[test]
    fn seeded_with_marker() {
        let mut source: &[u8] = b"rest";
        let scanned = Synchronizer::new(&mut source, MAGIC, None).run().unwrap();
        assert_eq!(scanned, 0);
        // nothing consumed
        assert_eq!(source, b"rest");
    }

    #[test]
    fn finds_marker_after_garbage() {
        let mut stream = b"deadbeef".to_vec();
        stream.extend_from_slice(b"NOISE");
        stream.extend_from_slice(&MAGIC);
        stream.push(0x07);

        let seed = window_of(&stream);
        let mut source = &stream[MAGIC.len()..];
        let scanned = Synchronizer::new(&mut source, seed, None).run().unwrap();
        // the seed window plus the noise
        assert_eq!(scanned, 8 + 5);
        // cursor sits at the length field
        assert_eq!(source, [0x07]);
    }

    #[test]
    fn marker_straddles_the_seed() {
        // 3 garbage bytes, then the marker begins inside the seeded window
        let mut stream = b"zzz".to_vec();
        stream.extend_from_slice(&MAGIC);

        let seed = window_of(&stream);
        let mut source = &stream[MAGIC.len()..];
        let scanned = Synchronizer::new(&mut source, seed, None).run().unwrap();
        assert_eq!(scanned, 3);
        assert!(source.is_empty());
    }

    #[test]
    fn end_of_stream_fails() {
        let stream = b"no marker anywhere here";
        let seed = window_of(stream);
        let mut source = &stream[MAGIC.len()..];
        match Synchronizer::new(&mut source, seed, None).run() {
            Err(StreamErr::SyncFailed { scanned }) => {
                assert_eq!(scanned, (stream.len() - MAGIC.len()) as u64)
            }
            other => panic!("expected SyncFailed, got {other:?}"),
        }
    }

    #[test]
    fn scan_limit_is_respected() {
        let mut stream = vec![0u8; 100];
        stream.extend_from_slice(&MAGIC);

        let seed = window_of(&stream);
        let mut source = &stream[MAGIC.len()..];
        match Synchronizer::new(&mut source, seed, Some(16)).run() {
            Err(StreamErr::SyncFailed { scanned }) => assert_eq!(scanned, 16),
            other => panic!("expected SyncFailed, got {other:?}"),
        }

        // without the limit the same stream synchronizes fine
        let mut source = &stream[MAGIC.len()..];
        let scanned = Synchronizer::new(&mut source, seed, None).run().unwrap();
        assert_eq!(scanned, 100);
        assert!(source.is_empty());
    }

    #[test]
    fn partial_marker_is_not_a_match() {
        // 7 magic bytes then a corrupt one, then the real marker
        let mut stream = MAGIC[..7].to_vec();
        stream.push(0xEE);
        stream.extend_from_slice(&MAGIC);

        let seed = window_of(&stream);
        let mut source = &stream[MAGIC.len()..];
        let scanned = Synchronizer::new(&mut source, seed, None).run().unwrap();
        assert_eq!(scanned, 8);
        assert!(source.is_empty());
    }
}
