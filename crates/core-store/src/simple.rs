//! A sequential-tag repository without deduplication.
//!
//! Tags are handed out in insertion order and entries are kept decoded, one
//! per `store`. No refcounting: `discard` always removes. Useful as a test
//! double and as a baseline when measuring what deduplication buys.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use crate::{Entry, Repository, StoreError, Tag};

#[derive(Default)]
struct Inner {
    next_tag: Tag,
    entries: HashMap<Tag, Entry>,
}

#[derive(Default)]
pub struct SimpleRepository {
    inner: Mutex<Inner>,
}

impl SimpleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for SimpleRepository {
    fn store(&self, entry: &Entry) -> Result<Tag, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let tag = inner.next_tag;
            inner.next_tag = inner.next_tag.wrapping_add(1);
            if !inner.entries.contains_key(&tag) {
                inner.entries.insert(tag, entry.clone());
                return Ok(tag);
            }
        }
    }

    fn retrieve(&self, tag: Tag) -> Result<Entry, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(&tag)
            .cloned()
            .ok_or(StoreError::NotFound(tag))
    }

    fn length(&self, tag: Tag) -> Result<u32, StoreError> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.get(&tag).ok_or(StoreError::NotFound(tag))?;
        Ok(entry.styles.len() as u32)
    }

    fn matches(&self, tag: Tag, regexes: &[regex::bytes::Regex]) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.get(&tag).ok_or(StoreError::NotFound(tag))?;
        Ok(regexes.iter().any(|regex| regex.is_match(&entry.string)))
    }

    fn discard(&self, tag: Tag) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entries
            .remove(&tag)
            .map(|_| ())
            .ok_or(StoreError::NotFound(tag))
    }

    fn dump(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        let inner = self.inner.lock().unwrap();
        for (tag, entry) in &inner.entries {
            writeln!(sink, "{}: {}", tag, String::from_utf8_lossy(&entry.string))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_cells::Style;

    fn entry(text: &str) -> Entry {
        Entry::new(
            vec![Style::default(); text.chars().count()],
            text.as_bytes().to_vec(),
        )
    }

    #[test]
    fn tags_are_sequential() {
        let repo = SimpleRepository::new();
        let a = repo.store(&entry("a")).unwrap();
        let b = repo.store(&entry("b")).unwrap();
        assert_eq!(b, a + 1);
        assert_eq!(repo.retrieve(a).unwrap(), entry("a"));
    }

    #[test]
    fn equal_entries_do_not_deduplicate() {
        let repo = SimpleRepository::new();
        let a = repo.store(&entry("same")).unwrap();
        let b = repo.store(&entry("same")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn discard_removes_immediately() {
        let repo = SimpleRepository::new();
        let tag = repo.store(&entry("gone")).unwrap();
        repo.discard(tag).unwrap();
        assert_eq!(repo.retrieve(tag), Err(StoreError::NotFound(tag)));
        assert_eq!(repo.discard(tag), Err(StoreError::NotFound(tag)));
    }
}
