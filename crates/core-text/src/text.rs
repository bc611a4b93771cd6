//! The combined scrollback-and-screen structure.
//!
//! Content lives in paragraphs (wrap-free logical lines); what the screen
//! shows is a window of fixed-width slices of them. Three regions, newest
//! last:
//!
//! * history: promoted paragraphs, held as repository tags plus the lines
//!   derived from them;
//! * straddling: lines that have spilled above row 0 but whose paragraph is
//!   still open at the bottom of the screen, so it cannot be promoted yet;
//! * current: the visible rows.
//!
//! Row addressing is signed. Row 0 is the first non-straddling current line,
//! `rows - 1` the bottom of the screen; negative rows walk up through the
//! straddling region and then history.
//!
//! Lines do not hold pointers to their paragraphs; they hold a monotone
//! paragraph index plus a slice sequence number. Deque positions are the
//! index minus a popped-counter, so promoting or ejecting paragraphs only
//! renumbers the lines after the change.
//!
//! Invariants (checked in tests):
//! * `rows == current_lines.len() - straddling_lines`.
//! * A continued line's successor has the same paragraph index and the next
//!   sequence number; a paragraph spanning n lines is continued on the first
//!   n-1 and not on the last.
//! * A paragraph of length L occupies `max(1, ceil(L / cols))` lines.

use std::collections::VecDeque;
use std::sync::Arc;

use core_cells::{Cell, Style};
use core_store::{Entry, Repository, Tag};
use tracing::error;

use crate::{Para, ParaCache};

/// A physical screen row: a `cols`-wide slice of one paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Line {
    index: u32,
    /// Sequence number in the high 31 bits, continued flag in bit 0.
    seqcont: u32,
}

const _: () = assert!(std::mem::size_of::<Line>() == 8);

impl Line {
    fn new(index: u32, seqnum: u32, continued: bool) -> Self {
        debug_assert!(seqnum <= u32::MAX >> 1);
        Self {
            index,
            seqcont: seqnum << 1 | continued as u32,
        }
    }

    fn index(self) -> u32 {
        self.index
    }

    fn seqnum(self) -> u32 {
        self.seqcont >> 1
    }

    fn continued(self) -> bool {
        self.seqcont & 1 != 0
    }

    fn set_continued(&mut self, continued: bool) {
        self.seqcont = self.seqcont & !1 | continued as u32;
    }

    fn set_index_seqnum(&mut self, index: u32, seqnum: u32) {
        *self = Line::new(index, seqnum, self.continued());
    }

    fn increment_index(&mut self) {
        self.index += 1;
    }

    fn decrement_index(&mut self) {
        self.index -= 1;
    }
}

/// A stable reference to a logical character: a paragraph plus a code-point
/// offset. Survives reflow; `row`/`col` are recomputed on resize.
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    valid: bool,
    row: i32,
    col: i16,
    /// Current paragraph vs historical tag.
    current: bool,
    /// Deque-relative paragraph position.
    index: u32,
    offset: u32,
}

impl Marker {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn row(&self) -> i32 {
        self.row
    }

    pub fn col(&self) -> i16 {
        self.col
    }
}

/// One reverse-search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    row: i32,
    col: i16,
    offset_begin: u32,
    offset_end: u32,
}

impl SearchMatch {
    pub fn row(&self) -> i32 {
        self.row
    }

    pub fn col(&self) -> i16 {
        self.col
    }

    /// Length in code points.
    pub fn length(&self) -> u32 {
        self.offset_end - self.offset_begin
    }

    pub fn offsets(&self) -> (u32, u32) {
        (self.offset_begin, self.offset_end)
    }
}

/// Receiver for row visits; spans carry the backing paragraph and the
/// code-point offset of the span start so renderers can read bytes directly.
pub trait Visitor {
    fn visit_styled(
        &mut self,
        row: i32,
        col_begin: i16,
        col_end: i16,
        style: &Style,
        para: &Para,
        offset: usize,
    );

    fn visit_unstyled(
        &mut self,
        row: i32,
        col_begin: i16,
        col_end: i16,
        para: &Para,
        offset: usize,
    );
}

pub struct Text {
    repository: Arc<dyn Repository>,
    cache: ParaCache,

    history_tags: VecDeque<Tag>,
    popped_history_tags: u32,
    history_lines: VecDeque<Line>,

    current_paras: VecDeque<Para>,
    popped_current_paras: u32,
    straddling_lines: u32,
    current_lines: VecDeque<Line>,

    cols: i16,
    history_limit: u32,
}

impl Text {
    /// `history_limit` bounds the history tag count; zero means unbounded.
    /// `cache_entries` sizes the paragraph cache; zero means unbounded.
    pub fn new(
        repository: Arc<dyn Repository>,
        rows: i16,
        cols: i16,
        history_limit: u32,
        cache_entries: usize,
    ) -> Self {
        assert!(rows > 0 && cols > 0, "rows and cols must be positive");

        let mut current_paras = VecDeque::with_capacity(rows as usize);
        let mut current_lines = VecDeque::with_capacity(rows as usize);
        for row in 0..rows {
            current_paras.push_back(Para::new());
            current_lines.push_back(Line::new(row as u32, 0, false));
        }

        Self {
            cache: ParaCache::new(Arc::clone(&repository), cache_entries),
            repository,
            history_tags: VecDeque::new(),
            popped_history_tags: 0,
            history_lines: VecDeque::new(),
            current_paras,
            popped_current_paras: 0,
            straddling_lines: 0,
            current_lines,
            cols,
            history_limit,
        }
    }

    pub fn rows(&self) -> i16 {
        (self.current_lines.len() - self.straddling_lines as usize) as i16
    }

    pub fn cols(&self) -> i16 {
        self.cols
    }

    /// Rows addressable above row 0: straddling lines plus history lines.
    pub fn scrollback_rows(&self) -> i32 {
        self.straddling_lines as i32 + self.history_lines.len() as i32
    }

    pub fn history_len(&self) -> usize {
        self.history_tags.len()
    }

    pub fn history_tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.history_tags.iter().copied()
    }

    pub fn cache_mut(&mut self) -> &mut ParaCache {
        &mut self.cache
    }

    /// The cell at a signed row. Non-negative rows and the straddling region
    /// read current paragraphs; rows above that decode history through the
    /// cache.
    pub fn cell_at(&mut self, row: i32, col: i16) -> Cell {
        self.assert_col(col);
        assert!(
            row < self.rows() as i32 && row >= -self.scrollback_rows(),
            "row {row} out of range"
        );

        let straddling = self.straddling_lines as i32;
        if row >= -straddling {
            let line = self.current_lines[(row + straddling) as usize];
            let para = &self.current_paras[(line.index() - self.popped_current_paras) as usize];
            para.cell_at(line.seqnum() as usize * self.cols as usize + col as usize)
        } else {
            let position = (self.history_lines.len() as i32 + row + straddling) as usize;
            let line = self.history_lines[position];
            let tag = self.history_tags[(line.index() - self.popped_history_tags) as usize];
            let para = self
                .cache
                .get(tag)
                .expect("history tags keep their repository entry alive");
            para.cell_at(line.seqnum() as usize * self.cols as usize + col as usize)
        }
    }

    pub fn set_cell(&mut self, row: i16, col: i16, cell: Cell) {
        self.assert_visible(row, col);
        let line = self.current_lines[self.line_pos(row as i32)];
        let base = line.seqnum() as usize * self.cols as usize;
        let para = &mut self.current_paras[(line.index() - self.popped_current_paras) as usize];
        para.set_cell(base + col as usize, cell);
    }

    /// Insert at `(row, col)`, dropping the cell that would fall off the
    /// right edge of the line.
    pub fn insert_cell(&mut self, row: i16, col: i16, cell: Cell) {
        self.assert_visible(row, col);
        let line = self.current_lines[self.line_pos(row as i32)];
        let base = line.seqnum() as usize * self.cols as usize;
        let para = &mut self.current_paras[(line.index() - self.popped_current_paras) as usize];
        para.insert_cell(base + col as usize, base + self.cols as usize, cell);
    }

    /// Remove the cell at `(row, col)`, pulling the rest of the line left; a
    /// blank enters at the right edge of the line.
    pub fn delete_cell(&mut self, row: i16, col: i16) {
        self.assert_visible(row, col);
        let line = self.current_lines[self.line_pos(row as i32)];
        let base = line.seqnum() as usize * self.cols as usize;
        let para = &mut self.current_paras[(line.index() - self.popped_current_paras) as usize];
        if base + (col as usize) < para.len() {
            para.insert_cell(base + self.cols as usize, base + col as usize, Cell::default());
        }
    }

    /// Append a trailing line. A continuation extends the last line's
    /// paragraph by one slice; otherwise a fresh paragraph starts. Either
    /// way the window slides: the top line becomes straddling, and a
    /// completed straddling paragraph is promoted to history.
    pub fn add_line(&mut self, continuation: bool) {
        if continuation {
            let back = self.current_lines.len() - 1;
            let last = &mut self.current_lines[back];
            last.set_continued(true);
            let (index, seqnum) = (last.index(), last.seqnum());
            self.current_lines.push_back(Line::new(index, seqnum + 1, false));
        } else {
            let index = self.current_paras.len() as u32 + self.popped_current_paras;
            self.current_lines.push_back(Line::new(index, 0, false));
            self.current_paras.push_back(Para::new());
        }

        self.straddling_lines += 1;
        self.clean_straddling();
    }

    /// Make the line at `row` flow into the next: merge the next line's
    /// paragraph into this one. No-op if already continued.
    pub fn make_continued(&mut self, row: i16) {
        self.make_continued_at(row as i32);
    }

    /// Split the line at `row` from the next: the tail of its paragraph
    /// becomes a fresh paragraph. No-op if not continued.
    pub fn make_uncontinued(&mut self, row: i16) {
        self.make_uncontinued_at(row as i32);
    }

    /// Scroll content up within `[row_begin, row_end)`: the top `n` lines of
    /// the region are ejected and `n` fresh lines enter at the bottom.
    /// Ejected lines are destroyed, never promoted to history.
    pub fn scroll_up(&mut self, row_begin: i16, row_end: i16, n: i16) {
        self.assert_region(row_begin, row_end, n);
        let rows = self.rows() as i32;

        if row_begin > 0 {
            self.make_uncontinued_at(row_begin as i32 - 1);
        }
        if (row_end as i32) < rows {
            self.make_uncontinued_at(row_end as i32 - 1);
        }
        if row_begin == 0 && self.straddling_lines > 0 {
            self.make_uncontinued_at(-1);
        }

        for _ in 0..n {
            if (row_begin as i32) < rows - 1 {
                self.make_uncontinued_at(row_begin as i32);
            }

            let pos = self.line_pos(row_begin as i32);
            let line = self.current_lines[pos];
            self.current_paras
                .remove((line.index() - self.popped_current_paras) as usize);
            self.current_lines.remove(pos);

            let mut index = line.index();
            let end_pos = self.line_pos(row_end as i32 - 1);
            for i in pos..end_pos {
                index = self.current_lines[i].index();
                self.current_lines[i].decrement_index();
            }

            self.current_lines.insert(end_pos, Line::new(index, 0, false));
            self.current_paras
                .insert((index - self.popped_current_paras) as usize, Para::new());
        }
    }

    /// Scroll content down within `[row_begin, row_end)`: the bottom `n`
    /// lines of the region are ejected and `n` fresh lines enter at the top.
    pub fn scroll_down(&mut self, row_begin: i16, row_end: i16, n: i16) {
        self.assert_region(row_begin, row_end, n);
        let rows = self.rows() as i32;

        if row_begin > 0 {
            self.make_uncontinued_at(row_begin as i32 - 1);
        }
        if (row_end as i32) < rows {
            self.make_uncontinued_at(row_end as i32 - 1);
        }
        if row_begin == 0 && self.straddling_lines > 0 {
            self.make_uncontinued_at(-1);
        }

        for _ in 0..n {
            if row_begin < row_end - 1 {
                self.make_uncontinued_at(row_end as i32 - 2);
            }

            let pos = self.line_pos(row_end as i32 - 1);
            let line = self.current_lines[pos];
            self.current_paras
                .remove((line.index() - self.popped_current_paras) as usize);
            self.current_lines.remove(pos);

            let begin_pos = self.line_pos(row_begin as i32);
            let index = if begin_pos < pos {
                self.current_lines[begin_pos].index()
            } else {
                line.index()
            };
            for i in begin_pos..pos {
                self.current_lines[i].increment_index();
            }

            self.current_lines.insert(begin_pos, Line::new(index, 0, false));
            self.current_paras
                .insert((index - self.popped_current_paras) as usize, Para::new());
        }
    }

    /// Resize to `rows x cols`, reflowing paragraphs to the new width.
    /// Markers keep referring to the same logical character; their row/col
    /// are recomputed, and a marker whose paragraph is trimmed out of
    /// history is invalidated.
    pub fn resize(&mut self, rows: i16, cols: i16, markers: &mut [&mut Marker]) {
        assert!(rows > 0 && cols > 0, "rows and cols must be positive");

        // Snapshot markers to absolute paragraph indices; promotion below
        // shifts the deques underneath them.
        for marker in markers.iter_mut() {
            if marker.valid {
                marker.index += if marker.current {
                    self.popped_current_paras
                } else {
                    self.popped_history_tags
                };
            }
        }
        let promote_base = self.popped_current_paras;
        let history_base = self.history_tags.len() as u32 + self.popped_history_tags;

        if cols != self.cols {
            self.cols = cols;
            self.rebuild_current_lines();
            self.rebuild_history_lines();
        }

        let total = self.current_lines.len() as i32;
        if total >= rows as i32 {
            self.straddling_lines = (total - rows as i32) as u32;
            self.promote_complete_straddling();
        } else {
            self.straddling_lines = 0;
            for _ in 0..(rows as i32 - total) {
                let index = self.current_paras.len() as u32 + self.popped_current_paras;
                self.current_lines.push_back(Line::new(index, 0, false));
                self.current_paras.push_back(Para::new());
            }
        }

        for marker in markers.iter_mut() {
            if !marker.valid {
                continue;
            }
            if marker.current {
                if marker.index < self.popped_current_paras {
                    // Promoted to history during this resize.
                    let history_abs = history_base + (marker.index - promote_base);
                    if history_abs < self.popped_history_tags {
                        marker.valid = false;
                        continue;
                    }
                    marker.current = false;
                    marker.index = history_abs - self.popped_history_tags;
                } else {
                    marker.index -= self.popped_current_paras;
                }
            } else {
                if marker.index < self.popped_history_tags {
                    marker.valid = false;
                    continue;
                }
                marker.index -= self.popped_history_tags;
            }
            self.relocate_marker(marker);
        }
    }

    /// A marker anchored to the logical character shown at `(row, col)`.
    pub fn marker_at(&self, row: i32, col: i16) -> Marker {
        self.assert_col(col);
        assert!(
            row < self.rows() as i32 && row >= -self.scrollback_rows(),
            "row {row} out of range"
        );

        let straddling = self.straddling_lines as i32;
        let (current, index, seqnum) = if row >= -straddling {
            let line = self.current_lines[(row + straddling) as usize];
            (
                true,
                line.index() - self.popped_current_paras,
                line.seqnum(),
            )
        } else {
            let position = (self.history_lines.len() as i32 + row + straddling) as usize;
            let line = self.history_lines[position];
            (
                false,
                line.index() - self.popped_history_tags,
                line.seqnum(),
            )
        };

        Marker {
            valid: true,
            row,
            col,
            current,
            index,
            offset: seqnum * self.cols as u32 + col as u32,
        }
    }

    /// A marker before the first stored paragraph.
    pub fn begin(&self) -> Marker {
        Marker {
            valid: true,
            row: 0,
            col: 0,
            current: self.history_tags.is_empty(),
            index: 0,
            offset: 0,
        }
    }

    /// A marker one past the last current paragraph; the starting point for
    /// reverse search.
    pub fn end(&self) -> Marker {
        Marker {
            valid: true,
            row: self.rows() as i32,
            col: 0,
            current: true,
            index: self.current_paras.len() as u32,
            offset: 0,
        }
    }

    /// Search one paragraph backward from `marker`, returning that
    /// paragraph's matches ordered right to left. The marker advances to the
    /// previous paragraph; `ongoing` turns false once the beginning has been
    /// passed.
    pub fn rfind(
        &mut self,
        regex: &regex::bytes::Regex,
        marker: &mut Marker,
        ongoing: &mut bool,
    ) -> Vec<SearchMatch> {
        assert!(marker.valid, "invalid marker");

        let mut matches = Vec::new();

        if marker.index == 0 {
            if marker.current && !self.history_tags.is_empty() {
                marker.current = false;
                marker.index = self.history_tags.len() as u32 - 1;
            } else {
                *ongoing = false;
                return matches;
            }
        } else {
            marker.index -= 1;
        }

        let cols = self.cols as u32;
        let para = if marker.current {
            &self.current_paras[marker.index as usize]
        } else {
            let tag = self.history_tags[marker.index as usize];
            self.cache
                .get(tag)
                .expect("history tags keep their repository entry alive")
        };

        let length = para.len() as u32;
        marker.row -= if length == 0 {
            1
        } else {
            length.div_ceil(cols) as i32
        };

        let found: Vec<(usize, usize)> = regex
            .find_iter(para.string())
            .map(|m| (m.start(), m.end()))
            .collect();

        for &(byte_begin, byte_end) in found.iter().rev() {
            let begin = para.offset_at_byte(byte_begin) as u32;
            let end = if byte_end == byte_begin {
                begin
            } else {
                para.offset_at_byte(byte_end - 1) as u32 + 1
            };

            matches.push(SearchMatch {
                row: marker.row + (begin / cols) as i32,
                col: (begin % cols) as i16,
                offset_begin: begin,
                offset_end: end,
            });
        }

        *ongoing = true;
        matches
    }

    /// Visit style runs within the rectangle `[row_begin, row_end)` x
    /// `[col_begin, col_end)`. A run past the paragraph's length is reported
    /// once with the default style and an offset at the paragraph's end.
    pub fn visit_styled(
        &mut self,
        row_begin: i32,
        col_begin: i16,
        row_end: i32,
        col_end: i16,
        visitor: &mut dyn Visitor,
    ) {
        self.visit(row_begin, col_begin, row_end, col_end, visitor, true);
    }

    /// Visit whole-row spans within the rectangle, without style runs.
    pub fn visit_unstyled(
        &mut self,
        row_begin: i32,
        col_begin: i16,
        row_end: i32,
        col_end: i16,
        visitor: &mut dyn Visitor,
    ) {
        self.visit(row_begin, col_begin, row_end, col_end, visitor, false);
    }

    fn visit(
        &mut self,
        row_begin: i32,
        col_begin: i16,
        row_end: i32,
        col_end: i16,
        visitor: &mut dyn Visitor,
        styled: bool,
    ) {
        assert!(row_begin <= row_end && col_begin <= col_end, "inverted range");
        assert!(col_begin >= 0 && col_end <= self.cols, "cols out of range");
        assert!(
            row_begin >= -self.scrollback_rows() && row_end <= self.rows() as i32,
            "rows out of range"
        );

        let cols = self.cols as usize;
        let straddling = self.straddling_lines as i32;

        for row in row_begin..row_end {
            let (para, seqnum): (&Para, u32) = if row >= -straddling {
                let line = self.current_lines[(row + straddling) as usize];
                (
                    &self.current_paras[(line.index() - self.popped_current_paras) as usize],
                    line.seqnum(),
                )
            } else {
                let position = (self.history_lines.len() as i32 + row + straddling) as usize;
                let line = self.history_lines[position];
                let tag = self.history_tags[(line.index() - self.popped_history_tags) as usize];
                (
                    self.cache
                        .get(tag)
                        .expect("history tags keep their repository entry alive"),
                    line.seqnum(),
                )
            };

            let base = seqnum as usize * cols;
            if !styled {
                visitor.visit_unstyled(row, col_begin, col_end, para, base + col_begin as usize);
                continue;
            }

            let begin = base + col_begin as usize;
            let end = base + col_end as usize;
            let in_para = end.min(para.len());
            let mut offset = begin;

            while offset < in_para {
                let style = para.styles()[offset];
                let mut run_end = offset + 1;
                while run_end < in_para && para.styles()[run_end] == style {
                    run_end += 1;
                }
                visitor.visit_styled(
                    row,
                    (offset - base) as i16,
                    (run_end - base) as i16,
                    &style,
                    para,
                    offset,
                );
                offset = run_end;
            }

            if offset < end {
                let col = (offset.max(begin) - base) as i16;
                visitor.visit_styled(row, col, col_end, &Style::default(), para, offset);
            }
        }
    }

    //
    // Internals.
    //

    fn line_pos(&self, row: i32) -> usize {
        (row + self.straddling_lines as i32) as usize
    }

    fn assert_col(&self, col: i16) {
        assert!((0..self.cols).contains(&col), "col {col} out of range");
    }

    fn assert_visible(&self, row: i16, col: i16) {
        assert!((0..self.rows()).contains(&row), "row {row} out of range");
        self.assert_col(col);
    }

    fn assert_region(&self, row_begin: i16, row_end: i16, n: i16) {
        assert!(
            row_begin >= 0 && row_end <= self.rows() && n > 0 && row_begin + n <= row_end,
            "bad scroll region {row_begin}..{row_end} by {n}"
        );
    }

    fn make_continued_at(&mut self, row: i32) {
        let rows = self.rows() as i32;
        assert!(
            row >= -(self.straddling_lines as i32) && row < rows - 1,
            "row {row} out of range"
        );

        let pos = self.line_pos(row);
        if self.current_lines[pos].continued() {
            return;
        }

        if row < rows - 2 && self.current_lines[pos + 1].continued() {
            // The next line flows onward; split it off before merging it in.
            self.make_uncontinued_at(row + 1);
        }

        let this = self.current_lines[pos];
        let next = self.current_lines[pos + 1];
        debug_assert!(!next.continued());
        debug_assert_eq!(next.index(), this.index() + 1);

        let next_para = self
            .current_paras
            .remove((next.index() - self.popped_current_paras) as usize)
            .expect("line indices track paragraph positions");

        let base = (this.seqnum() as usize + 1) * self.cols as usize;
        let this_para =
            &mut self.current_paras[(this.index() - self.popped_current_paras) as usize];
        for offset in 0..next_para.len() {
            this_para.set_cell(base + offset, next_para.cell_at(offset));
        }

        self.current_lines[pos].set_continued(true);
        self.current_lines[pos + 1].set_index_seqnum(this.index(), this.seqnum() + 1);
        for line in self.current_lines.iter_mut().skip(pos + 2) {
            line.decrement_index();
        }
    }

    fn make_uncontinued_at(&mut self, row: i32) {
        let rows = self.rows() as i32;
        assert!(
            row >= -(self.straddling_lines as i32) && row < rows - 1,
            "row {row} out of range"
        );

        let pos = self.line_pos(row);
        if !self.current_lines[pos].continued() {
            return;
        }

        if row < rows - 2 && self.current_lines[pos + 1].continued() {
            self.make_uncontinued_at(row + 1);
        }

        let this = self.current_lines[pos];
        let boundary = (this.seqnum() as usize + 1) * self.cols as usize;
        let para_pos = (this.index() - self.popped_current_paras) as usize;

        let mut next_para = Para::new();
        {
            let this_para = &self.current_paras[para_pos];
            for offset in boundary..this_para.len() {
                next_para.set_cell(offset - boundary, this_para.cell_at(offset));
            }
        }
        self.current_paras[para_pos].truncate(boundary);
        self.current_paras.insert(para_pos + 1, next_para);

        self.current_lines[pos].set_continued(false);
        self.current_lines[pos + 1].set_index_seqnum(this.index() + 1, 0);
        for line in self.current_lines.iter_mut().skip(pos + 2) {
            line.increment_index();
        }
    }

    /// Promote the straddling paragraph once its last line stops being
    /// continued, i.e. the whole paragraph has scrolled above row 0.
    fn clean_straddling(&mut self) {
        if self.straddling_lines == 0 {
            return;
        }
        let last = self.current_lines[self.straddling_lines as usize - 1];
        if last.continued() {
            return;
        }
        self.promote_front_para(self.straddling_lines);
    }

    /// After a resize the straddling region can cover several whole
    /// paragraphs; promote front paragraphs while they fit entirely above
    /// row 0.
    fn promote_complete_straddling(&mut self) {
        while self.straddling_lines > 0 {
            let front_lines = Self::line_count(self.current_paras[0].len(), self.cols);
            if front_lines > self.straddling_lines {
                break;
            }
            self.promote_front_para(front_lines);
        }
    }

    fn promote_front_para(&mut self, line_count: u32) {
        // Pad to the full width of the occupied lines so equal screen
        // content serializes to equal bytes regardless of write history.
        let target = line_count as usize * self.cols as usize;
        {
            let para = &mut self.current_paras[0];
            if para.len() < target {
                para.set_cell(target - 1, Cell::default());
            }
        }

        let para = &self.current_paras[0];
        let entry = Entry::new(para.styles().to_vec(), para.string().to_vec());

        match self.repository.store(&entry) {
            Ok(tag) => {
                let index = self.history_tags.len() as u32 + self.popped_history_tags;
                for seqnum in 0..line_count {
                    self.history_lines
                        .push_back(Line::new(index, seqnum, seqnum != line_count - 1));
                }
                self.history_tags.push_back(tag);
            }
            Err(err) => {
                // The paragraph falls out of scrollback but the screen
                // keeps working.
                error!(target: "text", %err, "history_store_failed");
            }
        }

        for _ in 0..line_count {
            self.current_lines.pop_front();
        }
        self.current_paras.pop_front();
        self.popped_current_paras += 1;
        self.straddling_lines -= line_count;

        self.enforce_history_limit();
    }

    fn enforce_history_limit(&mut self) {
        if self.history_limit == 0 {
            return;
        }
        while self.history_tags.len() as u32 > self.history_limit {
            if let Some(tag) = self.history_tags.pop_front() {
                if let Err(err) = self.repository.discard(tag) {
                    error!(target: "text", %err, "history_discard_failed");
                }
            }
            while self
                .history_lines
                .front()
                .is_some_and(|line| line.index() == self.popped_history_tags)
            {
                self.history_lines.pop_front();
            }
            self.popped_history_tags += 1;
        }
    }

    fn line_count(length: usize, cols: i16) -> u32 {
        if length == 0 {
            1
        } else {
            (length as u32).div_ceil(cols as u32)
        }
    }

    fn rebuild_current_lines(&mut self) {
        let mut lines = VecDeque::with_capacity(self.current_lines.len());
        for (position, para) in self.current_paras.iter().enumerate() {
            let index = position as u32 + self.popped_current_paras;
            let count = Self::line_count(para.len(), self.cols);
            for seqnum in 0..count {
                lines.push_back(Line::new(index, seqnum, seqnum != count - 1));
            }
        }
        self.current_lines = lines;
    }

    fn rebuild_history_lines(&mut self) {
        let mut lines = VecDeque::with_capacity(self.history_lines.len());
        for (position, &tag) in self.history_tags.iter().enumerate() {
            let index = position as u32 + self.popped_history_tags;
            let length = self
                .repository
                .length(tag)
                .expect("history tags keep their repository entry alive");
            let count = Self::line_count(length as usize, self.cols);
            for seqnum in 0..count {
                lines.push_back(Line::new(index, seqnum, seqnum != count - 1));
            }
        }
        self.history_lines = lines;
    }

    fn relocate_marker(&self, marker: &mut Marker) {
        let cols = self.cols as u32;
        marker.col = (marker.offset % cols) as i16;

        if marker.current {
            let mut row = -(self.straddling_lines as i32);
            for para in self.current_paras.iter().take(marker.index as usize) {
                row += Self::line_count(para.len(), self.cols) as i32;
            }
            marker.row = row + (marker.offset / cols) as i32;
        } else {
            let abs = marker.index + self.popped_history_tags;
            let start = self
                .history_lines
                .iter()
                .position(|line| line.index() == abs && line.seqnum() == 0);
            match start {
                Some(position) => {
                    let below = (self.history_lines.len() - position) as i32;
                    marker.row =
                        -(self.straddling_lines as i32) - below + (marker.offset / cols) as i32;
                }
                None => marker.valid = false,
            }
        }
    }

    #[cfg(debug_assertions)]
    pub(crate) fn check_invariants(&self) {
        assert!(self.rows() >= 1);
        assert_eq!(
            self.rows() as usize,
            self.current_lines.len() - self.straddling_lines as usize
        );

        for pair in self
            .current_lines
            .iter()
            .zip(self.current_lines.iter().skip(1))
        {
            let (line, next) = pair;
            if line.continued() {
                assert_eq!(next.index(), line.index());
                assert_eq!(next.seqnum(), line.seqnum() + 1);
            } else {
                assert_eq!(next.index(), line.index() + 1);
                assert_eq!(next.seqnum(), 0);
            }
        }

        if let Some(last) = self.current_lines.back() {
            assert!(!last.continued());
        }

        for (position, para) in self.current_paras.iter().enumerate() {
            let index = position as u32 + self.popped_current_paras;
            let max_seqnum = self
                .current_lines
                .iter()
                .filter(|line| line.index() == index)
                .map(|line| line.seqnum())
                .max()
                .expect("every paragraph has at least one line");
            assert!(para.len() <= (max_seqnum as usize + 1) * self.cols as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_store::{DedupeRepository, SimpleRepository};

    fn text(rows: i16, cols: i16, history_limit: u32) -> Text {
        let repository: Arc<dyn Repository> = Arc::new(SimpleRepository::new());
        Text::new(repository, rows, cols, history_limit, 0)
    }

    fn cell(ch: char) -> Cell {
        Cell::new(Style::default(), core_codec::encode(ch))
    }

    /// Feed characters the way a line-discipline test does: `\n` moves to
    /// the next row (adding a line at the bottom), anything else writes the
    /// cell and wraps with continuation at the right edge.
    fn write(text: &mut Text, input: &str, row: &mut i16, col: &mut i16) {
        for ch in input.chars() {
            if ch == '\n' {
                if *row + 1 == text.rows() {
                    text.add_line(false);
                } else {
                    *row += 1;
                }
                *col = 0;
            } else {
                text.set_cell(*row, *col, cell(ch));
                *col += 1;
                if *col == text.cols() {
                    if *row + 1 == text.rows() {
                        text.add_line(true);
                    } else {
                        text.make_continued(*row);
                        *row += 1;
                    }
                    *col = 0;
                }
            }
            text.check_invariants();
        }
    }

    fn read(text: &mut Text, mut row: i32, mut col: i16, count: usize) -> String {
        let mut result = String::new();
        for _ in 0..count {
            let cell = text.cell_at(row, col);
            result.push_str(&cell.seq.to_string());
            col += 1;
            if col == text.cols() {
                row += 1;
                col = 0;
            }
        }
        result
    }

    #[test]
    fn basic_write_read() {
        let mut text = text(1, 8, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "hello", &mut row, &mut col);

        assert_eq!(read(&mut text, 0, 0, 5), "hello");
        for col in 5..8 {
            assert_eq!(text.cell_at(0, col), Cell::default());
        }
    }

    #[test]
    fn straddling_paragraph_stays_readable() {
        // Ten characters in a 1x4 buffer wrap into three slices; the first
        // two straddle above row 0 but the paragraph is still open, so
        // nothing is promoted.
        let mut text = text(1, 4, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abcdefghij", &mut row, &mut col);

        assert_eq!(text.rows(), 1);
        assert_eq!(text.history_len(), 0);
        assert_eq!(text.scrollback_rows(), 2);
        assert_eq!(read(&mut text, -2, 0, 10), "abcdefghij");
        assert_eq!(read(&mut text, 0, 0, 2), "ij");
    }

    #[test]
    fn completed_paragraph_promotes_to_history() {
        let mut text = text(1, 24, 1);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "hello\nworld", &mut row, &mut col);

        assert_eq!(text.history_len(), 1);
        // The stored paragraph is padded to the full line width.
        let tag = text.history_tags().next().unwrap();
        let entry = text.cache_mut().repository().retrieve(tag).unwrap();
        assert_eq!(entry.string.len(), 24);
        assert_eq!(&entry.string[..5], b"hello");
        assert!(entry.string[5..].iter().all(|&b| b == b' '));

        assert_eq!(read(&mut text, -1, 0, 24), format!("hello{}", " ".repeat(19)));
        assert_eq!(read(&mut text, 0, 0, 24), format!("world{}", " ".repeat(19)));
    }

    #[test]
    fn history_limit_discards_oldest() {
        let repository = Arc::new(DedupeRepository::new());
        let mut text = Text::new(
            Arc::clone(&repository) as Arc<dyn Repository>,
            1,
            10,
            2,
            0,
        );
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "one\ntwo\nthree\nfour", &mut row, &mut col);

        assert_eq!(text.history_len(), 2);
        assert_eq!(text.scrollback_rows(), 2);
        assert_eq!(read(&mut text, -1, 0, 5), "three");
        assert_eq!(read(&mut text, -2, 0, 3), "two");
        assert_eq!(read(&mut text, 0, 0, 4), "four");
        // The discarded paragraph released its repository reference.
        assert_eq!(repository.line_stats().0, 2);
    }

    #[test]
    fn rfind_walks_backward_one_paragraph_at_a_time() {
        let mut text = text(3, 10, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "hello\nworld\n", &mut row, &mut col);

        let regex = regex::bytes::Regex::new("o").unwrap();
        let mut marker = text.end();
        let mut ongoing = true;

        // Third line is empty.
        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert!(ongoing);
        assert!(matches.is_empty());

        // "world".
        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert!(ongoing);
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].row(), matches[0].col(), matches[0].length()), (1, 1, 1));

        // "hello".
        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert!(ongoing);
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].row(), matches[0].col(), matches[0].length()), (0, 4, 1));

        // Past the beginning.
        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert!(!ongoing);
        assert!(matches.is_empty());
    }

    #[test]
    fn rfind_descends_into_history() {
        let mut text = text(2, 10, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "alpha\nbeta\ngamma\n", &mut row, &mut col);

        assert_eq!(text.history_len(), 2);

        let regex = regex::bytes::Regex::new("a").unwrap();
        let mut marker = text.end();
        let mut ongoing = true;

        // Trailing empty paragraph.
        assert!(text.rfind(&regex, &mut marker, &mut ongoing).is_empty());

        // "gamma" on screen: matches right to left.
        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].row(), matches[0].col()), (0, 4));
        assert_eq!((matches[1].row(), matches[1].col()), (0, 1));

        // "beta" from history (padded to 10).
        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert!(ongoing);
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].row(), matches[0].col()), (-1, 3));

        // "alpha" from history.
        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].row(), matches[0].col()), (-2, 4));
        assert_eq!((matches[1].row(), matches[1].col()), (-2, 0));

        let matches = text.rfind(&regex, &mut marker, &mut ongoing);
        assert!(!ongoing);
        assert!(matches.is_empty());
    }

    #[test]
    fn make_continued_merges_and_is_idempotent() {
        let mut text = text(2, 4, 0);
        for (i, ch) in "ab".chars().enumerate() {
            text.set_cell(0, i as i16, cell(ch));
        }
        for (i, ch) in "cd".chars().enumerate() {
            text.set_cell(1, i as i16, cell(ch));
        }

        text.make_continued(0);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 8), "ab  cd  ");

        // Idempotent.
        text.make_continued(0);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 8), "ab  cd  ");
    }

    #[test]
    fn make_uncontinued_splits_and_is_idempotent() {
        let mut text = text(2, 4, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abcdef", &mut row, &mut col);
        assert_eq!(read(&mut text, 0, 0, 8), "abcdef  ");

        text.make_uncontinued(0);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 8), "abcdef  ");

        text.make_uncontinued(0);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 8), "abcdef  ");
    }

    #[test]
    fn scroll_up_ejects_the_top_line() {
        let mut text = text(3, 5, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "one\ntwo\nthr", &mut row, &mut col);

        text.scroll_up(0, 3, 1);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 3), "two");
        assert_eq!(read(&mut text, 1, 0, 3), "thr");
        assert_eq!(read(&mut text, 2, 0, 3), "   ");
        // Nothing was promoted.
        assert_eq!(text.history_len(), 0);
    }

    #[test]
    fn scroll_down_ejects_the_bottom_line() {
        let mut text = text(3, 5, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "one\ntwo\nthr", &mut row, &mut col);

        text.scroll_down(0, 3, 1);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 3), "   ");
        assert_eq!(read(&mut text, 1, 0, 3), "one");
        assert_eq!(read(&mut text, 2, 0, 3), "two");
    }

    #[test]
    fn scroll_within_interior_region() {
        let mut text = text(4, 5, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "aa\nbb\ncc\ndd", &mut row, &mut col);

        // Region covers rows 1..3 only.
        text.scroll_up(1, 3, 1);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 2), "aa");
        assert_eq!(read(&mut text, 1, 0, 2), "cc");
        assert_eq!(read(&mut text, 2, 0, 2), "  ");
        assert_eq!(read(&mut text, 3, 0, 2), "dd");
    }

    #[test]
    fn scroll_uncontinues_region_boundaries() {
        // A paragraph wrapped across rows 0-1 must be split before a region
        // starting at row 1 scrolls.
        let mut text = text(3, 4, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abcdef", &mut row, &mut col);
        assert_eq!(read(&mut text, 1, 0, 2), "ef");

        text.scroll_up(1, 3, 1);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 4), "abcd");
        assert_eq!(read(&mut text, 1, 0, 4), "    ");
        assert_eq!(read(&mut text, 2, 0, 4), "    ");
    }

    #[test]
    fn insert_cell_drops_the_right_edge() {
        let mut text = text(1, 4, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abcd", &mut row, &mut col);

        text.insert_cell(0, 1, cell('x'));
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 4), "axbc");
    }

    #[test]
    fn delete_cell_pulls_the_line_left() {
        let mut text = text(1, 4, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abcd", &mut row, &mut col);

        text.delete_cell(0, 1);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 4), "acd ");
    }

    #[test]
    fn resize_reflows_to_narrower_and_back() {
        let mut text = text(2, 6, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abcdefgh", &mut row, &mut col);
        assert_eq!(read(&mut text, 0, 0, 6), "abcdef");
        assert_eq!(read(&mut text, 1, 0, 2), "gh");

        text.resize(2, 4, &mut []);
        text.check_invariants();
        assert_eq!(text.cols(), 4);
        assert_eq!(read(&mut text, 0, 0, 4), "abcd");
        assert_eq!(read(&mut text, 1, 0, 4), "efgh");

        text.resize(2, 6, &mut []);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 6), "abcdef");
        assert_eq!(read(&mut text, 1, 0, 2), "gh");
    }

    #[test]
    fn resize_shrinking_rows_promotes_to_history() {
        let mut text = text(3, 5, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "one\ntwo\nthree", &mut row, &mut col);

        text.resize(1, 5, &mut []);
        text.check_invariants();
        assert_eq!(text.rows(), 1);
        assert_eq!(text.history_len(), 2);
        assert_eq!(read(&mut text, 0, 0, 5), "three");
        assert_eq!(read(&mut text, -1, 0, 3), "two");
        assert_eq!(read(&mut text, -2, 0, 3), "one");

        // Growing back appends blank rows; history stays where it is.
        text.resize(3, 5, &mut []);
        text.check_invariants();
        assert_eq!(read(&mut text, 0, 0, 5), "three");
        assert_eq!(read(&mut text, 1, 0, 5), "     ");
        assert_eq!(text.history_len(), 2);
    }

    #[test]
    fn resize_translates_markers() {
        let mut text = text(2, 6, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abcdefgh", &mut row, &mut col);

        // Anchor on 'h' at (1, 1).
        let mut marker = text.marker_at(1, 1);
        assert_eq!((marker.row(), marker.col()), (1, 1));

        text.resize(2, 4, &mut [&mut marker]);
        assert!(marker.is_valid());
        assert_eq!((marker.row(), marker.col()), (1, 3));
        assert_eq!(text.cell_at(marker.row(), marker.col()), cell('h'));

        text.resize(2, 6, &mut [&mut marker]);
        assert!(marker.is_valid());
        assert_eq!((marker.row(), marker.col()), (1, 1));
    }

    #[test]
    fn resize_keeps_marker_on_promoted_paragraph() {
        let mut text = text(3, 5, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "one\ntwo\nthree", &mut row, &mut col);

        let mut marker = text.marker_at(1, 1);
        text.resize(1, 5, &mut [&mut marker]);

        // "two" was promoted; the marker follows it into history.
        assert!(marker.is_valid());
        assert_eq!((marker.row(), marker.col()), (-1, 1));
        assert_eq!(text.cell_at(marker.row(), marker.col()), cell('w'));
    }

    /// Every addressable row (history and screen), right-trimmed, with
    /// trailing blank rows dropped. Shrinking may promote rows into history
    /// and growing may append blanks, so content comparisons span the whole
    /// buffer.
    fn snapshot(text: &mut Text) -> Vec<String> {
        let cols = text.cols();
        let mut rows: Vec<String> = (-text.scrollback_rows()..text.rows() as i32)
            .map(|r| read(text, r, 0, cols as usize).trim_end().to_owned())
            .collect();
        while rows.last().is_some_and(|row| row.is_empty()) {
            rows.pop();
        }
        rows
    }

    #[test]
    fn reflow_preserves_content_through_a_round_trip() {
        let mut text = text(4, 7, 0);
        let mut row = 0;
        let mut col = 0;
        write(
            &mut text,
            "the quick brown fox\njumps\n\nover the lazy dog",
            &mut row,
            &mut col,
        );
        let before = snapshot(&mut text);

        text.resize(5, 3, &mut []);
        text.check_invariants();
        text.resize(4, 7, &mut []);
        text.check_invariants();

        let after = snapshot(&mut text);
        assert_eq!(before, after);
    }

    struct CollectingVisitor {
        styled: Vec<(i32, i16, i16, usize)>,
        unstyled: Vec<(i32, i16, i16)>,
    }

    impl Visitor for CollectingVisitor {
        fn visit_styled(
            &mut self,
            row: i32,
            col_begin: i16,
            col_end: i16,
            _style: &Style,
            _para: &Para,
            offset: usize,
        ) {
            self.styled.push((row, col_begin, col_end, offset));
        }

        fn visit_unstyled(
            &mut self,
            row: i32,
            col_begin: i16,
            col_end: i16,
            _para: &Para,
            _offset: usize,
        ) {
            self.unstyled.push((row, col_begin, col_end));
        }
    }

    #[test]
    fn visitors_cover_the_rectangle() {
        let mut text = text(2, 6, 0);
        let mut row = 0;
        let mut col = 0;
        write(&mut text, "abc\nde", &mut row, &mut col);

        let mut visitor = CollectingVisitor {
            styled: Vec::new(),
            unstyled: Vec::new(),
        };
        text.visit_styled(0, 0, 2, 6, &mut visitor);
        text.visit_unstyled(0, 0, 2, 6, &mut visitor);

        // Uniform style: one in-paragraph run plus one blank-tail run per row.
        assert_eq!(
            visitor.styled,
            vec![(0, 0, 3, 0), (0, 3, 6, 3), (1, 0, 2, 0), (1, 2, 6, 2)]
        );
        assert_eq!(visitor.unstyled, vec![(0, 0, 6), (1, 0, 6)]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_row_panics() {
        let mut t = text(2, 4, 0);
        t.set_cell(2, 0, Cell::default());
    }

    #[test]
    #[should_panic(expected = "bad scroll region")]
    fn misordered_scroll_region_panics() {
        let mut t = text(4, 4, 0);
        t.scroll_up(3, 1, 1);
    }
}
