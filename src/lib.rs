//! Streaming reader and writer for the PROIO binary event container: a
//! metadata header frame followed by event frames, each one
//! `magic || varint length || payload`, optionally wrapped in whole-stream
//! gzip.
//!
//! The reader is synchronous and pull-based. It can resynchronize after
//! corruption by scanning for the frame marker, and it can skip frames
//! without materializing their payloads, which is what makes walking
//! gigabyte-scale containers cheap.
//!
//! ```no_run
//! use proio_stream::{Reader, StreamResult};
//!
//! fn main() -> StreamResult<()> {
//!     let mut reader = Reader::open("events.proio")?;
//!     println!("header is {} bytes", reader.header()?.len());
//!     while let Some(event) = reader.next()? {
//!         println!("#{} at {}: {} bytes", event.index(), event.offset(), event.payload().len());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_debug_implementations)]

mod error;
mod format;
mod reader;
mod source;
mod sync;
mod writer;

pub use error::*;
pub use format::*;
pub use reader::*;
pub use source::*;
pub use sync::*;
pub use writer::*;
