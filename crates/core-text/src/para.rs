//! Paragraphs: wrap-free logical lines.
//!
//! A paragraph stores one style per code point next to the packed UTF-8 byte
//! string, with an index table mapping code-point offsets to byte offsets.
//!
//! Invariants:
//! * `indices.len() == styles.len() + 1`; the final entry is one past the
//!   last byte (so `indices[i]..indices[i + 1]` is always a valid range).
//! * `indices[i + 1] - indices[i]` equals the lead length at
//!   `string[indices[i]]`.
//! * Reads past the length return the blank cell; writes past the length
//!   first pad with blank spaces, so the length is always the highest
//!   ever-touched offset plus one.

use core_cells::{Cell, Style};
use core_codec::Seq;

#[derive(Debug, Clone, Default)]
pub struct Para {
    styles: Vec<Style>,
    string: Vec<u8>,
    indices: Vec<u32>,
}

impl Para {
    pub fn new() -> Self {
        Self {
            styles: Vec::new(),
            string: Vec::new(),
            indices: vec![0],
        }
    }

    /// Rebuild a paragraph from its storable parts, recomputing the index
    /// table by walking the string's lead bytes.
    ///
    /// Panics if the string is not a whole number of valid sequences or the
    /// style count does not match the code-point count; parts only ever come
    /// from the repository, which validated them at decode time.
    pub fn from_parts(styles: Vec<Style>, string: Vec<u8>) -> Self {
        let mut indices = Vec::with_capacity(styles.len() + 1);
        let mut index = 0usize;

        while index < string.len() {
            indices.push(index as u32);
            match core_codec::lead_length(string[index]) {
                Ok(length) => index += length,
                Err(err) => panic!("corrupt paragraph string: {err}"),
            }
        }
        indices.push(index as u32);

        assert_eq!(
            indices.len(),
            styles.len() + 1,
            "style count does not match string code points"
        );

        Self {
            styles,
            string,
            indices,
        }
    }

    /// Count of code points.
    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    pub fn styles(&self) -> &[Style] {
        &self.styles
    }

    pub fn string(&self) -> &[u8] {
        &self.string
    }

    /// Byte range of the string covering code points `[begin, end)`, both
    /// clamped to the length.
    pub fn string_range(&self, begin: usize, end: usize) -> &[u8] {
        let begin = begin.min(self.len());
        let end = end.max(begin).min(self.len());
        &self.string[self.indices[begin] as usize..self.indices[end] as usize]
    }

    /// Code-point offset containing the given byte offset.
    pub fn offset_at_byte(&self, byte: usize) -> usize {
        self.indices.partition_point(|&i| i as usize <= byte) - 1
    }

    /// The cell at `offset`; blank past the length.
    pub fn cell_at(&self, offset: usize) -> Cell {
        if offset >= self.len() {
            return Cell::default();
        }

        let begin = self.indices[offset] as usize;
        let end = self.indices[offset + 1] as usize;
        let mut seq = Seq::new([0; 4]);
        seq.bytes[..end - begin].copy_from_slice(&self.string[begin..end]);

        Cell::new(self.styles[offset], seq)
    }

    /// Replace the cell at `offset`, padding with blanks first if the
    /// paragraph is shorter.
    pub fn set_cell(&mut self, offset: usize, cell: Cell) {
        self.expand(offset + 1);

        self.styles[offset] = cell.style;

        let index = self.indices[offset] as usize;
        let new_length = cell.seq.len();
        let old_length = (self.indices[offset + 1] - self.indices[offset]) as usize;

        self.string
            .splice(index..index + old_length, cell.seq.as_bytes().iter().copied());

        let delta = new_length as i64 - old_length as i64;
        if delta != 0 {
            for entry in &mut self.indices[offset + 1..] {
                *entry = (*entry as i64 + delta) as u32;
            }
        }
    }

    /// Insert a cell at `offset` and erase the (post-insertion) cell at
    /// `end`, if one exists. `end` past the current length means nothing
    /// falls off: the paragraph simply grows by one cell.
    pub fn insert_cell(&mut self, offset: usize, end: usize, cell: Cell) {
        self.insert_at(offset.min(self.len()), cell);
        if end < self.len() {
            self.erase_at(end);
        }
    }

    /// Drop content past `length`.
    pub fn truncate(&mut self, length: usize) {
        if length < self.len() {
            self.string.truncate(self.indices[length] as usize);
            self.indices.truncate(length + 1);
            self.styles.truncate(length);
        }
    }

    fn insert_at(&mut self, offset: usize, cell: Cell) {
        debug_assert!(offset <= self.len());

        let index = self.indices[offset] as usize;
        let length = cell.seq.len();

        self.styles.insert(offset, cell.style);
        self.string
            .splice(index..index, cell.seq.as_bytes().iter().copied());
        self.indices.insert(offset, index as u32);
        for entry in &mut self.indices[offset + 1..] {
            *entry += length as u32;
        }
    }

    fn erase_at(&mut self, offset: usize) {
        debug_assert!(offset < self.len());

        let begin = self.indices[offset] as usize;
        let end = self.indices[offset + 1] as usize;
        let length = (end - begin) as u32;

        self.string.drain(begin..end);
        self.styles.remove(offset);
        for entry in &mut self.indices[offset + 1..] {
            *entry -= length;
        }
        self.indices.remove(offset);
    }

    fn expand(&mut self, new_size: usize) {
        let old_size = self.len();
        if new_size <= old_size {
            return;
        }

        self.styles.resize(new_size, Style::default());
        self.string.resize(self.string.len() + new_size - old_size, b' ');

        let mut index = self.indices[old_size];
        self.indices.reserve(new_size - old_size);
        for _ in old_size..new_size {
            index += 1;
            self.indices.push(index);
        }
    }

    #[cfg(debug_assertions)]
    pub(crate) fn check_invariants(&self) {
        assert_eq!(self.indices.len(), self.styles.len() + 1);
        assert_eq!(self.indices[0], 0);
        assert_eq!(*self.indices.last().unwrap() as usize, self.string.len());
        for window in self.indices.windows(2) {
            let lead = self.string[window[0] as usize];
            let length = core_codec::lead_length(lead).unwrap();
            assert_eq!((window[1] - window[0]) as usize, length);
        }
    }
}
