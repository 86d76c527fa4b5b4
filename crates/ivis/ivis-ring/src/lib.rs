//! `ivis-ring`: the shared-memory frame ring.
//!
//! A single-writer, many-reader circular buffer of fixed-size slots living
//! in two named shared-memory segments (pixel data and metadata), designed
//! so a reader can take a torn-read-free snapshot of a slot without ever
//! blocking the writer for the duration of the pixel copy.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   data + meta segments   ┌────────────────┐
//! │    ShmRing     │ ──────────────────────── │    ShmRing     │
//! │ owner/writer   │      (mmap regions)      │ reader         │
//! │  (ingestion)   │                          └────────────────┘
//! └────────────────┘                          ┌────────────────┐
//!                                             │    ShmRing     │
//!                                             │ reader         │
//!                                             └────────────────┘
//! ```
//!
//! # Consistency protocol
//!
//! The writer serializes metadata updates under a cross-process advisory
//! lock. Readers take the lock only at the metadata-read points:
//!
//! 1. read the slot generation (under lock); bail if it is not the one the
//!    caller expects,
//! 2. copy the payload bytes **without** the lock,
//! 3. re-read the generation (under lock); the copy is a valid snapshot iff
//!    it did not change.
//!
//! A reader racing a very fast writer can exhaust its retries and report a
//! miss; that is the intended backpressure behavior, never stale bytes.
//!
//! # Modules
//!
//! - `layout`: little-endian byte layout of the metadata segment
//! - `mutex`: cross-process advisory lock (flock on POSIX)
//! - `ring`: the `ShmRing` itself

mod layout;
mod mutex;
mod ring;

pub use layout::{HEADER_SIZE, MAGIC, VERSION, meta_segment_len};
pub use mutex::{ShmMutex, ShmMutexGuard};
pub use ring::{DEFAULT_READ_RETRIES, RingError, RingOptions, ShmRing, cleanup, exists};
