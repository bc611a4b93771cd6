//! LRU cache of decoded paragraphs in front of the repository.
//!
//! The cache is owned by exactly one text model and is not synchronized; the
//! repository behind it is the shared, locked resource. Entries are immutable
//! once decoded (stored paragraphs never change), so there is no
//! invalidation, only LRU eviction.
//!
//! The recency list is a plain deque scanned linearly on hit. Capacities are
//! small (hundreds of paragraphs at most) and hits touch only the tag list,
//! so this stays simpler than an intrusive list until profiling says
//! otherwise.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use core_store::{Repository, StoreError, Tag};

use crate::Para;

pub struct ParaCache {
    repository: Arc<dyn Repository>,
    entries: HashMap<Tag, Para>,
    /// Recency order: front is least recently used.
    order: VecDeque<Tag>,
    /// Zero means unbounded.
    max_entries: usize,
}

impl ParaCache {
    pub fn new(repository: Arc<dyn Repository>, max_entries: usize) -> Self {
        Self {
            repository,
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The paragraph stored under `tag`, decoding it on a miss.
    pub fn get(&mut self, tag: Tag) -> Result<&Para, StoreError> {
        if self.entries.contains_key(&tag) {
            if let Some(position) = self.order.iter().position(|&t| t == tag) {
                self.order.remove(position);
            }
            self.order.push_back(tag);
            return Ok(&self.entries[&tag]);
        }

        let entry = self.repository.retrieve(tag)?;
        let para = Para::from_parts(entry.styles, entry.string);

        if self.max_entries > 0 {
            while self.entries.len() >= self.max_entries {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                } else {
                    break;
                }
            }
        }

        self.order.push_back(tag);
        Ok(self.entries.entry(tag).or_insert(para))
    }

    /// Adjust the capacity, shrinking immediately if over it.
    pub fn set_max_entries(&mut self, max_entries: usize) {
        self.max_entries = max_entries;
        if self.max_entries > 0 {
            while self.entries.len() > self.max_entries {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                } else {
                    break;
                }
            }
        }
    }
}
