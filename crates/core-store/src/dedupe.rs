//! The deduplicating repository.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::{Entry, Repository, StoreError, Tag, hash, wire};

struct Stored {
    /// Code-point count, cached so `length` skips deserialization.
    length: u32,
    bytes: Vec<u8>,
    refs: u32,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Tag, Stored>,
    total_refs: u64,
}

/// Content-addressed store with refcounted, deduplicated entries.
///
/// Tags are SDBM hashes of the serialized bytes, clamped to `[0, max_tag]`.
/// The default covers the full 32-bit space; tests shrink it to force
/// collisions.
pub struct DedupeRepository {
    inner: Mutex<Inner>,
    max_tag: Tag,
}

impl Default for DedupeRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupeRepository {
    pub fn new() -> Self {
        Self::with_max_tag(Tag::MAX)
    }

    /// A repository whose tags are clamped to `[0, max_tag]`. Shrinking the
    /// tag space raises the collision rate; the table is declared full when
    /// it holds `max_tag` entries.
    pub fn with_max_tag(max_tag: Tag) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_tag,
        }
    }

    /// (unique entries, total references).
    pub fn line_stats(&self) -> (u32, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.entries.len() as u32, inner.total_refs)
    }

    /// (unique serialized bytes, reference-weighted serialized bytes).
    pub fn byte_stats(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap();
        let mut unique = 0u64;
        let mut total = 0u64;
        for stored in inner.entries.values() {
            let size = stored.bytes.len() as u64;
            unique += size;
            total += stored.refs as u64 * size;
        }
        (unique, total)
    }

    fn clamp(&self, tag: Tag) -> Tag {
        (tag as u64 % (self.max_tag as u64 + 1)) as Tag
    }
}

impl Repository for DedupeRepository {
    fn store(&self, entry: &Entry) -> Result<Tag, StoreError> {
        let bytes = wire::encode_entry(entry);
        let mut tag = self.clamp(hash::sdbm(&bytes));

        let mut inner = self.inner.lock().unwrap();

        loop {
            match inner.entries.get_mut(&tag) {
                None => break,
                Some(stored) if stored.bytes == bytes && stored.refs < u32::MAX => {
                    stored.refs += 1;
                    inner.total_refs += 1;
                    return Ok(tag);
                }
                Some(stored) => {
                    // Hash collision, or a refcount pinned at saturation.
                    if stored.bytes != bytes {
                        debug!(target: "store", tag, "hash_collision");
                    }
                    if inner.entries.len() as u64 >= self.max_tag as u64 {
                        return Err(StoreError::CapacityExhausted);
                    }
                    tag = self.clamp(tag.wrapping_add(1));
                }
            }
        }

        trace!(target: "store", tag, length = entry.styles.len(), "insert");
        inner.entries.insert(
            tag,
            Stored {
                length: entry.styles.len() as u32,
                bytes,
                refs: 1,
            },
        );
        inner.total_refs += 1;
        Ok(tag)
    }

    fn retrieve(&self, tag: Tag) -> Result<Entry, StoreError> {
        let inner = self.inner.lock().unwrap();
        let stored = inner.entries.get(&tag).ok_or(StoreError::NotFound(tag))?;
        let entry = wire::decode_entry(&stored.bytes)?;
        debug_assert_eq!(entry.styles.len() as u32, stored.length);
        Ok(entry)
    }

    fn length(&self, tag: Tag) -> Result<u32, StoreError> {
        let inner = self.inner.lock().unwrap();
        let stored = inner.entries.get(&tag).ok_or(StoreError::NotFound(tag))?;
        Ok(stored.length)
    }

    fn matches(&self, tag: Tag, regexes: &[regex::bytes::Regex]) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        let stored = inner.entries.get(&tag).ok_or(StoreError::NotFound(tag))?;
        let string = wire::string_slice(&stored.bytes)?;
        Ok(regexes.iter().any(|regex| regex.is_match(string)))
    }

    fn discard(&self, tag: Tag) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let stored = inner
            .entries
            .get_mut(&tag)
            .ok_or(StoreError::NotFound(tag))?;

        stored.refs -= 1;
        if stored.refs == 0 {
            inner.entries.remove(&tag);
        }
        inner.total_refs -= 1;
        Ok(())
    }

    fn dump(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        let inner = self.inner.lock().unwrap();
        for (tag, stored) in &inner.entries {
            let string = wire::string_slice(&stored.bytes).unwrap_or_default();
            writeln!(sink, "{}: {}", tag, String::from_utf8_lossy(string))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_cells::Style;

    fn entry(text: &str) -> Entry {
        let count = text.chars().count();
        Entry::new(vec![Style::default(); count], text.as_bytes().to_vec())
    }

    #[test]
    fn store_retrieve_round_trip() {
        let repo = DedupeRepository::new();
        let e = entry("round trip me");
        let tag = repo.store(&e).unwrap();
        assert_eq!(repo.retrieve(tag).unwrap(), e);
        assert_eq!(repo.length(tag).unwrap(), 13);
    }

    #[test]
    fn equal_entries_share_a_tag_and_refcount() {
        let repo = DedupeRepository::new();
        let e = entry("dup");

        let tag1 = repo.store(&e).unwrap();
        let tag2 = repo.store(&e).unwrap();
        assert_eq!(tag1, tag2);
        assert_eq!(repo.line_stats(), (1, 2));

        repo.discard(tag1).unwrap();
        assert_eq!(repo.line_stats(), (1, 1));
        repo.discard(tag1).unwrap();
        assert_eq!(repo.line_stats(), (0, 0));

        // The final discard removed the entry entirely.
        assert_eq!(repo.discard(tag1), Err(StoreError::NotFound(tag1)));
        assert_eq!(repo.retrieve(tag1), Err(StoreError::NotFound(tag1)));
    }

    #[test]
    fn colliding_entries_get_adjacent_tags() {
        // "b!" and "a`" serialize to byte strings whose SDBM hashes agree
        // modulo 256: the entries differ only in the two string bytes, and
        // (+1 * 65599 - 63) * 65599^11 is divisible by 256.
        let a = entry("b!");
        let b = entry("a`");
        assert_eq!(
            hash::sdbm(&wire::encode_entry(&a)) % 256,
            hash::sdbm(&wire::encode_entry(&b)) % 256,
            "test entries must collide in an 8-bit tag space"
        );

        let repo = DedupeRepository::with_max_tag(0xFF);
        let tag_a = repo.store(&a).unwrap();
        let tag_b = repo.store(&b).unwrap();

        assert_ne!(tag_a, tag_b);
        assert_eq!(tag_b, (tag_a + 1) % 256);
        assert_eq!(repo.retrieve(tag_a).unwrap(), a);
        assert_eq!(repo.retrieve(tag_b).unwrap(), b);
    }

    #[test]
    fn many_entries_in_a_small_tag_space() {
        let repo = DedupeRepository::with_max_tag(0xFF);
        let entries: Vec<Entry> = (0..200).map(|i| entry(&format!("line {i}"))).collect();

        let tags: Vec<Tag> = entries
            .iter()
            .map(|e| repo.store(e).unwrap())
            .collect();

        let mut sorted = tags.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), tags.len(), "every entry got its own tag");

        for (tag, e) in tags.iter().zip(&entries) {
            assert_eq!(&repo.retrieve(*tag).unwrap(), e);
        }
    }

    #[test]
    fn exhausted_table_reports_capacity() {
        // One slot: the second distinct entry has nowhere to probe.
        let repo = DedupeRepository::with_max_tag(0);
        repo.store(&entry("first")).unwrap();
        assert_eq!(
            repo.store(&entry("second")),
            Err(StoreError::CapacityExhausted)
        );
    }

    #[test]
    fn matches_consults_only_the_string() {
        let repo = DedupeRepository::new();
        let tag = repo.store(&entry("error: all the worse")).unwrap();

        let hit = regex::bytes::Regex::new("error").unwrap();
        let miss = regex::bytes::Regex::new("warning").unwrap();
        assert!(repo.matches(tag, &[miss.clone(), hit]).unwrap());
        assert!(!repo.matches(tag, &[miss]).unwrap());
        assert!(!repo.matches(tag, &[]).unwrap());
    }

    #[test]
    fn dump_lists_tag_and_string() {
        let repo = DedupeRepository::new();
        let tag = repo.store(&entry("visible")).unwrap();

        let mut out = Vec::new();
        repo.dump(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{tag}: visible\n"));
    }
}
