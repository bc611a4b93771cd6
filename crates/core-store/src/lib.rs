//! Content-addressed, reference-counted paragraph storage.
//!
//! Scrollback history does not keep paragraph objects alive; it keeps opaque
//! 32-bit tags into a repository shared by every terminal instance in the
//! process. Identical lines (blank lines, shell prompts, repeated build
//! output) deduplicate to one serialized entry plus a refcount.
//!
//! Contract:
//! * `store` → tag derived from the SDBM hash of the serialized entry;
//!   collisions and refcount saturation fall back to linear probing by
//!   incrementing the tag.
//! * Entries are immutable once inserted. `retrieve` copies out.
//! * Every operation is linearized by a single internal mutex; trait methods
//!   take `&self` so the repository can sit behind an `Arc` shared across
//!   terminals.

use std::io;

use thiserror::Error;

pub mod dedupe;
pub mod hash;
pub mod rle;
pub mod simple;
pub mod wire;

pub use dedupe::DedupeRepository;
pub use simple::SimpleRepository;

/// Opaque handle to a stored entry.
pub type Tag = u32;

/// A paragraph's storable form: one style per code point, plus the packed
/// UTF-8 byte string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub styles: Vec<core_cells::Style>,
    pub string: Vec<u8>,
}

impl Entry {
    pub fn new(styles: Vec<core_cells::Style>, string: Vec<u8>) -> Self {
        Self { styles, string }
    }
}

/// Truncated or corrupt serialized bytes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    #[error("unexpected end of entry bytes")]
    UnexpectedEof,
    #[error("style count does not match code-point count")]
    CountMismatch,
    #[error(transparent)]
    Cell(#[from] core_cells::WireError),
    #[error(transparent)]
    Codec(#[from] core_codec::DecodeError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown tag {0:#010x}")]
    NotFound(Tag),
    #[error("repository capacity exhausted")]
    CapacityExhausted,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// The storage seam between text models and history.
///
/// Implementations are thread-safe: every method serializes on an internal
/// lock, and none of them block on anything but that lock.
pub trait Repository: Send + Sync {
    /// Serialize and store an entry, returning its tag. Storing an equal
    /// entry again bumps its refcount and returns the same tag.
    fn store(&self, entry: &Entry) -> Result<Tag, StoreError>;

    /// Deserialize the entry stored under `tag`.
    fn retrieve(&self, tag: Tag) -> Result<Entry, StoreError>;

    /// Code-point count of the entry, without full deserialization.
    fn length(&self, tag: Tag) -> Result<u32, StoreError>;

    /// Whether any of `regexes` matches the entry's string. Only the string
    /// portion is deserialized; styles are never allocated.
    fn matches(&self, tag: Tag, regexes: &[regex::bytes::Regex]) -> Result<bool, StoreError>;

    /// Drop one reference to `tag`, removing the entry at zero.
    fn discard(&self, tag: Tag) -> Result<(), StoreError>;

    /// Diagnostic dump, one `tag: string` line per entry.
    fn dump(&self, sink: &mut dyn io::Write) -> io::Result<()>;
}
