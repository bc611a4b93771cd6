//! The terminal controller.
//!
//! Owns the interpretation pipeline end to end: bytes from the source feed
//! the UTF-8 machine, accepted sequences feed the VT machine, and the
//! resulting events mutate the active buffer (primary or secondary), each a
//! text model plus cursor state, margins and character-set registers.
//!
//! A dispatch is one pass of that pipeline, bracketed by observer
//! begin/end callbacks. Dispatches never nest: driving the controller from
//! inside one of its own callbacks is a programming error and asserts.
//! `resize` and `write` are likewise rejected mid-dispatch.

use std::sync::Arc;

use core_cells::{Attrs, Cell, Color, Pos, Region, Rgb, StockColor, Style};
use core_codec::Seq;
use core_config::CoreConfig;
use core_store::Repository;
use core_text::Text;
use core_vt::{VtEvent, VtMachine};
use tracing::{debug, trace};

use crate::charsub::{CharSet, CharSubArray, SPECIAL_GRAPHICS, UK, US};
use crate::destroyer::Destroyer;
use crate::io::{ByteSink, ByteSource};
use crate::modes::ModeSet;
use crate::TermObserver;

const BEL: u8 = 0x07;
const BS: u8 = 0x08;
const HT: u8 = 0x09;
const LF: u8 = 0x0A;
const VT: u8 = 0x0B;
const FF: u8 = 0x0C;
const CR: u8 = 0x0D;
const SO: u8 = 0x0E;
const SI: u8 = 0x0F;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1A;

/// VT cursor state: position, the style new cells take, the deferred-wrap
/// flag, and the active character-set register.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    row: i16,
    col: i16,
    style: Style,
    wrap_next: bool,
    charset: CharSet,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            style: Style::default(),
            wrap_next: false,
            charset: CharSet::G0,
        }
    }
}

/// One buffer: a text model with its cursor, saved cursor, scroll margins
/// and character-set registers.
struct Screen {
    text: Text,
    cursor: Cursor,
    saved: Cursor,
    /// Scroll region, `[margin_begin, margin_end)`.
    margin_begin: i16,
    margin_end: i16,
    charsubs: CharSubArray,
}

impl Screen {
    fn new(
        repository: Arc<dyn Repository>,
        rows: i16,
        cols: i16,
        history_limit: u32,
        cache_entries: usize,
    ) -> Self {
        Self {
            text: Text::new(repository, rows, cols, history_limit, cache_entries),
            cursor: Cursor::default(),
            saved: Cursor::default(),
            margin_begin: 0,
            margin_end: rows,
            charsubs: CharSubArray::default(),
        }
    }

    fn rows(&self) -> i16 {
        self.text.rows()
    }

    fn cols(&self) -> i16 {
        self.text.cols()
    }

    fn full_margins(&self) -> bool {
        self.margin_begin == 0 && self.margin_end == self.rows()
    }

    /// Absolute cursor move; under origin mode rows are relative to the top
    /// margin and clamped inside the region.
    fn move_to(&mut self, row: i16, col: i16, origin: bool) {
        let (row, min_row, max_row) = if origin {
            (
                self.margin_begin.saturating_add(row),
                self.margin_begin,
                self.margin_end - 1,
            )
        } else {
            (row, 0, self.rows() - 1)
        };
        self.cursor.row = row.clamp(min_row, max_row);
        self.cursor.col = col.clamp(0, self.cols() - 1);
        self.cursor.wrap_next = false;
    }

    fn cursor_up(&mut self, n: i16) {
        let limit = if self.cursor.row >= self.margin_begin {
            self.margin_begin
        } else {
            0
        };
        self.cursor.row = (self.cursor.row - n).max(limit);
        self.cursor.wrap_next = false;
    }

    fn cursor_down(&mut self, n: i16) {
        let limit = if self.cursor.row < self.margin_end {
            self.margin_end - 1
        } else {
            self.rows() - 1
        };
        self.cursor.row = self.cursor.row.saturating_add(n).min(limit);
        self.cursor.wrap_next = false;
    }

    fn cursor_left(&mut self, n: i16) {
        self.cursor.col = (self.cursor.col - n).max(0);
        self.cursor.wrap_next = false;
    }

    fn cursor_right(&mut self, n: i16) {
        self.cursor.col = self.cursor.col.saturating_add(n).min(self.cols() - 1);
        self.cursor.wrap_next = false;
    }

    /// Line feed at the cursor. Returns true if the screen content moved.
    fn linefeed(&mut self) -> bool {
        self.cursor.wrap_next = false;
        if self.cursor.row == self.margin_end - 1 {
            if self.full_margins() {
                self.text.add_line(false);
            } else {
                self.text
                    .scroll_up(self.margin_begin, self.margin_end, 1);
            }
            true
        } else {
            if self.cursor.row < self.rows() - 1 {
                self.cursor.row += 1;
            }
            false
        }
    }

    /// Reverse line feed. Returns true if the screen content moved.
    fn reverse_index(&mut self) -> bool {
        self.cursor.wrap_next = false;
        if self.cursor.row == self.margin_begin {
            self.text
                .scroll_down(self.margin_begin, self.margin_end, 1);
            true
        } else {
            if self.cursor.row > 0 {
                self.cursor.row -= 1;
            }
            false
        }
    }

    fn insert_lines(&mut self, n: i16) -> bool {
        if self.cursor.row < self.margin_begin || self.cursor.row >= self.margin_end {
            return false;
        }
        let n = n.min(self.margin_end - self.cursor.row);
        if n > 0 {
            self.text.scroll_down(self.cursor.row, self.margin_end, n);
        }
        self.cursor.wrap_next = false;
        n > 0
    }

    fn delete_lines(&mut self, n: i16) -> bool {
        if self.cursor.row < self.margin_begin || self.cursor.row >= self.margin_end {
            return false;
        }
        let n = n.min(self.margin_end - self.cursor.row);
        if n > 0 {
            self.text.scroll_up(self.cursor.row, self.margin_end, n);
        }
        self.cursor.wrap_next = false;
        n > 0
    }

    fn scroll_region_up(&mut self, n: i16) -> bool {
        let n = n.min(self.margin_end - self.margin_begin);
        if n > 0 {
            self.text.scroll_up(self.margin_begin, self.margin_end, n);
        }
        n > 0
    }

    fn scroll_region_down(&mut self, n: i16) -> bool {
        let n = n.min(self.margin_end - self.margin_begin);
        if n > 0 {
            self.text.scroll_down(self.margin_begin, self.margin_end, n);
        }
        n > 0
    }

    /// Blank `[col_begin, col_end)` on `row` in the cursor's style.
    fn erase_cols(&mut self, row: i16, col_begin: i16, col_end: i16) {
        let blank = Cell::blank(self.cursor.style);
        for col in col_begin..col_end {
            self.text.set_cell(row, col, blank);
        }
    }

    /// EL: 0 = cursor to end, 1 = start to cursor inclusive, 2 = whole line.
    fn erase_line(&mut self, mode: i32) -> (i16, i16) {
        let (begin, end) = match mode {
            1 => (0, self.cursor.col + 1),
            2 => (0, self.cols()),
            _ => (self.cursor.col, self.cols()),
        };
        self.erase_cols(self.cursor.row, begin, end);
        (begin, end)
    }

    /// ED: 0 = cursor to end of screen, 1 = start to cursor, 2 = all.
    fn erase_screen(&mut self, mode: i32) {
        let cols = self.cols();
        match mode {
            1 => {
                for row in 0..self.cursor.row {
                    self.erase_cols(row, 0, cols);
                }
                self.erase_line(1);
            }
            2 => {
                for row in 0..self.rows() {
                    self.erase_cols(row, 0, cols);
                }
            }
            _ => {
                self.erase_line(0);
                for row in self.cursor.row + 1..self.rows() {
                    self.erase_cols(row, 0, cols);
                }
            }
        }
    }

    fn apply_sgr(&mut self, params: &[i32]) {
        if params.is_empty() {
            self.cursor.style = Style::default();
            return;
        }

        let style = &mut self.cursor.style;
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => *style = Style::default(),
                1 => style.attrs.insert(Attrs::BOLD),
                2 => style.attrs.insert(Attrs::FAINT),
                3 => style.attrs.insert(Attrs::ITALIC),
                4 => style.attrs.insert(Attrs::UNDERLINE),
                5 => style.attrs.insert(Attrs::BLINK),
                7 => style.attrs.insert(Attrs::INVERSE),
                8 => style.attrs.insert(Attrs::CONCEAL),
                21 | 22 => style.attrs.remove(Attrs::BOLD | Attrs::FAINT),
                23 => style.attrs.remove(Attrs::ITALIC),
                24 => style.attrs.remove(Attrs::UNDERLINE),
                25 => style.attrs.remove(Attrs::BLINK),
                27 => style.attrs.remove(Attrs::INVERSE),
                28 => style.attrs.remove(Attrs::CONCEAL),
                30..=37 => style.fg = Color::Indexed((params[i] - 30) as u8),
                39 => style.fg = Color::Stock(StockColor::TextFg),
                40..=47 => style.bg = Color::Indexed((params[i] - 40) as u8),
                49 => style.bg = Color::Stock(StockColor::TextBg),
                90..=97 => style.fg = Color::Indexed((params[i] - 90 + 8) as u8),
                100..=107 => style.bg = Color::Indexed((params[i] - 100 + 8) as u8),
                38 | 48 => {
                    let background = params[i] == 48;
                    let color = match params.get(i + 1).copied() {
                        Some(5) => {
                            let index = params.get(i + 2).copied().unwrap_or(0);
                            i += 2;
                            Some(Color::Indexed(index.clamp(0, 255) as u8))
                        }
                        Some(2) => {
                            let channel = |offset: usize| {
                                params.get(i + offset).copied().unwrap_or(0).clamp(0, 255) as u8
                            };
                            let rgb = Rgb::new(channel(2), channel(3), channel(4));
                            i += 4;
                            Some(Color::Direct(rgb))
                        }
                        _ => None,
                    };
                    match (color, background) {
                        (Some(color), true) => style.bg = color,
                        (Some(color), false) => style.fg = color,
                        (None, _) => debug!(target: "term", "malformed_extended_color"),
                    }
                }
                other => {
                    debug!(target: "term", sgr = other, "unhandled_sgr");
                }
            }
            i += 1;
        }
    }
}

/// One terminal instance: the interpretation pipeline plus its two buffers
/// and the queue of bytes waiting for the sink.
pub struct Terminal {
    observer: Box<dyn TermObserver>,
    source: Box<dyn ByteSource>,
    sink: Box<dyn ByteSink>,
    destroyer: Box<dyn Destroyer>,
    repository: Arc<dyn Repository>,

    dispatching: bool,
    exited: bool,
    dump_writes: bool,
    write_queue: Vec<u8>,

    utf8: core_codec::Machine,
    vt: VtMachine,

    primary: Screen,
    secondary: Screen,
    alt_active: bool,
    modes: ModeSet,
    tabs: Vec<bool>,
    damage: Region,

    history_limit: u32,
    cache_entries: usize,
}

impl Terminal {
    pub fn new(
        observer: Box<dyn TermObserver>,
        source: Box<dyn ByteSource>,
        sink: Box<dyn ByteSink>,
        destroyer: Box<dyn Destroyer>,
        repository: Arc<dyn Repository>,
        config: &CoreConfig,
    ) -> Self {
        let rows = config.geometry.rows;
        let cols = config.geometry.cols;

        let primary = Screen::new(
            Arc::clone(&repository),
            rows,
            cols,
            config.history.limit,
            config.history.cache_entries,
        );
        // The alternate buffer keeps no scrollback.
        let secondary = Screen::new(Arc::clone(&repository), rows, cols, 0, 0);

        Self {
            observer,
            source,
            sink,
            destroyer,
            repository,
            dispatching: false,
            exited: false,
            dump_writes: false,
            write_queue: Vec::new(),
            utf8: core_codec::Machine::new(),
            vt: VtMachine::new(),
            primary,
            secondary,
            alt_active: false,
            modes: Self::initial_modes(config),
            tabs: Self::default_tabs(cols),
            damage: Region::default(),
            history_limit: config.history.limit,
            cache_entries: config.history.cache_entries,
        }
    }

    fn initial_modes(config: &CoreConfig) -> ModeSet {
        let mut modes = ModeSet::SHOW_CURSOR | ModeSet::AUTO_REPEAT;
        if config.modes.auto_wrap {
            modes.insert(ModeSet::AUTO_WRAP);
        }
        if config.modes.cr_on_lf {
            modes.insert(ModeSet::CR_ON_LF);
        }
        modes
    }

    fn default_tabs(cols: i16) -> Vec<bool> {
        (0..cols).map(|i| (i + 1) % 8 == 0).collect()
    }

    pub fn rows(&self) -> i16 {
        self.screen().rows()
    }

    pub fn cols(&self) -> i16 {
        self.screen().cols()
    }

    pub fn modes(&self) -> ModeSet {
        self.modes
    }

    /// (row, col) of the active cursor.
    pub fn cursor(&self) -> (i16, i16) {
        let cursor = &self.screen().cursor;
        (cursor.row, cursor.col)
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// The active buffer's text model, for search and rendering visits.
    pub fn text_mut(&mut self) -> &mut Text {
        &mut self.screen_mut().text
    }

    fn screen(&self) -> &Screen {
        if self.alt_active {
            &self.secondary
        } else {
            &self.primary
        }
    }

    fn screen_mut(&mut self) -> &mut Screen {
        if self.alt_active {
            &mut self.secondary
        } else {
            &mut self.primary
        }
    }

    /// Drain the byte source: one dispatch. Call when the source is
    /// readable; returns when it would block or the child has exited.
    pub fn dispatch(&mut self) {
        assert!(!self.dispatching, "nested dispatch");
        self.dispatching = true;
        self.observer.begin_dispatch();

        let mut buffer = [0u8; 4096];
        loop {
            match self.source.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => {
                    for i in 0..count {
                        let byte = buffer[i];
                        self.consume_byte(byte);
                    }
                }
                Err(exited) => {
                    if !self.exited {
                        self.exited = true;
                        self.dump_writes = true;
                        self.write_queue.clear();
                        self.observer.child_exited(exited.exit_code);
                    }
                    break;
                }
            }
        }

        self.flush_damage();
        self.observer.end_dispatch();
        self.dispatching = false;
    }

    fn consume_byte(&mut self, byte: u8) {
        match self.utf8.advance(byte) {
            core_codec::State::Accept => {
                let seq = self.utf8.seq();
                self.consume_seq(seq);
            }
            core_codec::State::Reject => {
                trace!(target: "term", byte, "utf8_rejected");
                self.consume_seq(core_codec::REPLACEMENT);
            }
            _ => {}
        }
    }

    fn consume_seq(&mut self, seq: Seq) {
        if let Some(event) = self.vt.advance(seq) {
            match event {
                VtEvent::Normal(seq) => self.print(seq),
                VtEvent::Control(byte) => self.control(byte),
                VtEvent::Escape(byte) => self.escape(byte),
                VtEvent::Csi {
                    private,
                    params,
                    finish,
                } => self.csi(private, &params, finish),
                VtEvent::Dcs(bytes) => {
                    trace!(target: "term", length = bytes.len(), "dcs_ignored");
                }
                VtEvent::Osc(strings) => self.osc(&strings),
                VtEvent::Special { intro, code } => self.special(intro, code),
            }
        }
    }

    fn print(&mut self, seq: Seq) {
        let auto_wrap = self.modes.contains(ModeSet::AUTO_WRAP);
        let insert = self.modes.contains(ModeSet::INSERT);
        let mut scrolled = false;

        let screen = if self.alt_active {
            &mut self.secondary
        } else {
            &mut self.primary
        };

        let sub = screen.charsubs.get(screen.cursor.charset);
        let translated = sub.translate(seq);
        let mut style = screen.cursor.style;
        if sub.is_special() {
            style.attrs.remove(Attrs::BOLD | Attrs::ITALIC);
        }

        if auto_wrap && screen.cursor.wrap_next && screen.cursor.col == screen.cols() - 1 {
            if screen.cursor.row == screen.margin_end - 1 {
                if screen.full_margins() {
                    screen.text.add_line(true);
                } else {
                    screen
                        .text
                        .scroll_up(screen.margin_begin, screen.margin_end, 1);
                }
                scrolled = true;
            } else {
                screen.text.make_continued(screen.cursor.row);
                screen.cursor.row += 1;
            }
            screen.cursor.col = 0;
        }
        screen.cursor.wrap_next = false;

        let (row, col) = (screen.cursor.row, screen.cursor.col);
        let cell = Cell::new(style, translated);
        if insert {
            screen.text.insert_cell(row, col, cell);
        } else {
            screen.text.set_cell(row, col, cell);
        }

        let cols = screen.cols();
        if col == cols - 1 {
            screen.cursor.wrap_next = true;
        } else {
            screen.cursor.col += 1;
        }

        if scrolled {
            self.damage.clear();
            self.observer.all_damage();
        }
        if insert {
            self.damage.accommodate_row(row as i32, col, cols);
        } else {
            self.damage.accommodate_cell(Pos::new(row as i32, col));
        }
    }

    fn control(&mut self, byte: u8) {
        match byte {
            BEL => {
                debug!(target: "term", "bell");
            }
            BS => {
                // Deliberately leaves the wrap-pending flag alone.
                let cursor = &mut self.screen_mut().cursor;
                if cursor.col > 0 {
                    cursor.col -= 1;
                }
            }
            HT => self.horizontal_tab(),
            LF | VT | FF => {
                if self.modes.contains(ModeSet::CR_ON_LF) {
                    self.screen_mut().cursor.col = 0;
                }
                if self.screen_mut().linefeed() {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            CR => {
                let cursor = &mut self.screen_mut().cursor;
                cursor.col = 0;
                cursor.wrap_next = false;
            }
            SO => self.screen_mut().cursor.charset = CharSet::G1,
            SI => self.screen_mut().cursor.charset = CharSet::G0,
            // Sequence aborts are handled inside the VT machine; nothing
            // more to do when they surface as plain controls.
            CAN | SUB => {}
            _ => {
                trace!(target: "term", byte, "control_ignored");
            }
        }
    }

    fn horizontal_tab(&mut self) {
        let (cols, current) = {
            let screen = self.screen();
            (screen.cols(), screen.cursor.col)
        };
        let mut col = current + 1;
        while (col as usize) < self.tabs.len() && !self.tabs[col as usize] {
            col += 1;
        }
        self.screen_mut().cursor.col = col.min(cols - 1);
    }

    fn escape(&mut self, byte: u8) {
        match byte {
            b'7' => {
                let screen = self.screen_mut();
                screen.saved = screen.cursor;
            }
            b'8' => self.restore_cursor(),
            b'D' => {
                // IND
                if self.screen_mut().linefeed() {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            b'E' => {
                // NEL
                self.screen_mut().cursor.col = 0;
                if self.screen_mut().linefeed() {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            b'M' => {
                // RI
                if self.screen_mut().reverse_index() {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            b'H' => {
                // HTS
                let col = self.screen().cursor.col as usize;
                if col < self.tabs.len() {
                    self.tabs[col] = true;
                }
            }
            b'c' => self.reset(),
            b'=' => self.modes.insert(ModeSet::APP_KEYPAD),
            b'>' => self.modes.remove(ModeSet::APP_KEYPAD),
            _ => {
                debug!(target: "term", byte, "unhandled_escape");
            }
        }
    }

    fn restore_cursor(&mut self) {
        let screen = self.screen_mut();
        let (rows, cols) = (screen.rows(), screen.cols());
        screen.cursor = screen.saved;
        screen.cursor.row = screen.cursor.row.min(rows - 1);
        screen.cursor.col = screen.cursor.col.min(cols - 1);
    }

    fn csi(&mut self, private: bool, params: &[i32], finish: u8) {
        // Counts from the wire are clamped so arithmetic on row/col types
        // cannot overflow, however hostile the parameter.
        let count = |index: usize| param(params, index, 1).clamp(1, i16::MAX as i32 / 2) as i16;

        match finish {
            b'A' => self.screen_mut().cursor_up(count(0)),
            b'B' => self.screen_mut().cursor_down(count(0)),
            b'C' => self.screen_mut().cursor_right(count(0)),
            b'D' => self.screen_mut().cursor_left(count(0)),
            b'E' => {
                let screen = self.screen_mut();
                screen.cursor_down(count(0));
                screen.cursor.col = 0;
            }
            b'F' => {
                let screen = self.screen_mut();
                screen.cursor_up(count(0));
                screen.cursor.col = 0;
            }
            b'G' | b'`' => {
                let col = count(0) - 1;
                let screen = self.screen_mut();
                screen.cursor.col = col.clamp(0, screen.cols() - 1);
                screen.cursor.wrap_next = false;
            }
            b'H' | b'f' => {
                let origin = self.modes.contains(ModeSet::ORIGIN);
                let row = count(0) - 1;
                let col = count(1) - 1;
                self.screen_mut().move_to(row, col, origin);
            }
            b'd' => {
                let origin = self.modes.contains(ModeSet::ORIGIN);
                let row = count(0) - 1;
                let col = self.screen().cursor.col;
                self.screen_mut().move_to(row, col, origin);
            }
            b'J' => {
                let mode = param(params, 0, 0);
                self.screen_mut().erase_screen(mode);
                self.damage.clear();
                self.observer.all_damage();
            }
            b'K' => {
                let mode = param(params, 0, 0);
                let row = self.screen().cursor.row;
                let (begin, end) = self.screen_mut().erase_line(mode);
                self.damage.accommodate_row(row as i32, begin, end);
            }
            b'@' => {
                // ICH
                let n = count(0);
                let screen = self.screen_mut();
                let (row, col) = (screen.cursor.row, screen.cursor.col);
                let blank = Cell::blank(screen.cursor.style);
                for _ in 0..n.min(screen.cols() - col) {
                    screen.text.insert_cell(row, col, blank);
                }
                let cols = screen.cols();
                self.damage.accommodate_row(row as i32, col, cols);
            }
            b'P' => {
                // DCH
                let n = count(0);
                let screen = self.screen_mut();
                let (row, col) = (screen.cursor.row, screen.cursor.col);
                for _ in 0..n.min(screen.cols() - col) {
                    screen.text.delete_cell(row, col);
                }
                let cols = screen.cols();
                self.damage.accommodate_row(row as i32, col, cols);
            }
            b'X' => {
                // ECH
                let n = count(0);
                let screen = self.screen_mut();
                let (row, col) = (screen.cursor.row, screen.cursor.col);
                let end = col.saturating_add(n).min(screen.cols());
                screen.erase_cols(row, col, end);
                self.damage.accommodate_row(row as i32, col, end);
            }
            b'L' => {
                if self.screen_mut().insert_lines(count(0)) {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            b'M' => {
                if self.screen_mut().delete_lines(count(0)) {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            b'S' => {
                if self.screen_mut().scroll_region_up(count(0)) {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            b'T' => {
                if self.screen_mut().scroll_region_down(count(0)) {
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            b'm' => self.screen_mut().apply_sgr(params),
            b'h' => self.set_modes(private, params, true),
            b'l' => self.set_modes(private, params, false),
            b'r' => {
                let rows = self.screen().rows();
                let begin = param(params, 0, 1) - 1;
                let end = param(params, 1, rows as i32);
                if begin >= 0 && begin < end && end <= rows as i32 {
                    let origin = self.modes.contains(ModeSet::ORIGIN);
                    let screen = self.screen_mut();
                    screen.margin_begin = begin as i16;
                    screen.margin_end = end as i16;
                    screen.move_to(0, 0, origin);
                } else {
                    debug!(target: "term", begin, end, "bad_scroll_margins_ignored");
                }
            }
            b'g' => match param(params, 0, 0) {
                0 => {
                    let col = self.screen().cursor.col as usize;
                    if col < self.tabs.len() {
                        self.tabs[col] = false;
                    }
                }
                3 => self.tabs.iter_mut().for_each(|stop| *stop = false),
                other => debug!(target: "term", mode = other, "unhandled_tbc"),
            },
            b'c' => {
                // DA1: identify as a VT102.
                if param(params, 0, 0) == 0 {
                    self.reply(b"\x1b[?6c");
                }
            }
            b'n' => match param(params, 0, 0) {
                5 => self.reply(b"\x1b[0n"),
                6 => {
                    let origin = self.modes.contains(ModeSet::ORIGIN);
                    let screen = self.screen();
                    let row = if origin {
                        screen.cursor.row - screen.margin_begin
                    } else {
                        screen.cursor.row
                    };
                    let report = format!("\x1b[{};{}R", row + 1, screen.cursor.col + 1);
                    self.reply(report.as_bytes());
                }
                other => debug!(target: "term", request = other, "unhandled_dsr"),
            },
            other => {
                debug!(target: "term", finish = other, private, "unhandled_csi");
            }
        }
    }

    fn set_modes(&mut self, private: bool, params: &[i32], value: bool) {
        for &code in params {
            if private {
                self.set_dec_mode(code, value);
            } else {
                self.set_ansi_mode(code, value);
            }
        }
    }

    fn set_ansi_mode(&mut self, code: i32, value: bool) {
        match code {
            2 => self.modes.set(ModeSet::KBD_LOCK, value),
            4 => self.modes.set(ModeSet::INSERT, value),
            // SRM set means local echo off.
            12 => self.modes.set(ModeSet::ECHO, !value),
            20 => self.modes.set(ModeSet::CR_ON_LF, value),
            other => debug!(target: "term", mode = other, value, "unhandled_ansi_mode"),
        }
    }

    fn set_dec_mode(&mut self, code: i32, value: bool) {
        match code {
            1 => self.modes.set(ModeSet::APP_CURSOR, value),
            5 => {
                if self.modes.contains(ModeSet::REVERSE_VIDEO) != value {
                    self.modes.set(ModeSet::REVERSE_VIDEO, value);
                    self.observer.all_damage();
                }
            }
            6 => {
                self.modes.set(ModeSet::ORIGIN, value);
                self.screen_mut().move_to(0, 0, value);
            }
            7 => self.modes.set(ModeSet::AUTO_WRAP, value),
            8 => self.modes.set(ModeSet::AUTO_REPEAT, value),
            25 => self.modes.set(ModeSet::SHOW_CURSOR, value),
            47 => self.switch_buffer(value, false),
            66 => self.modes.set(ModeSet::APP_KEYPAD, value),
            1000 => self.modes.set(ModeSet::MOUSE_PRESS_RELEASE, value),
            1001 => self.modes.set(ModeSet::MOUSE_SELECT, value),
            1002 => self.modes.set(ModeSet::MOUSE_DRAG, value),
            1003 => self.modes.set(ModeSet::MOUSE_MOTION, value),
            1004 => self.modes.set(ModeSet::FOCUS, value),
            1006 => self.modes.set(ModeSet::MOUSE_FORMAT_SGR, value),
            1034 => self.modes.set(ModeSet::META_8BIT, value),
            1036 => self.modes.set(ModeSet::ALT_SENDS_ESC, value),
            1037 => self.modes.set(ModeSet::DELETE_SENDS_DEL, value),
            1047 => self.switch_buffer(value, value),
            1048 => {
                if value {
                    let screen = self.screen_mut();
                    screen.saved = screen.cursor;
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if value {
                    let screen = self.screen_mut();
                    screen.saved = screen.cursor;
                    self.switch_buffer(true, true);
                } else {
                    self.switch_buffer(false, false);
                    self.restore_cursor();
                }
            }
            2004 => self.modes.set(ModeSet::BRACKETED_PASTE, value),
            other => debug!(target: "term", mode = other, value, "unhandled_dec_mode"),
        }
    }

    fn switch_buffer(&mut self, alt: bool, clear_alt: bool) {
        if alt == self.alt_active {
            return;
        }
        self.alt_active = alt;
        if alt && clear_alt {
            self.clear_alt_buffer();
        }
        self.damage.clear();
        self.observer.all_damage();
    }

    fn clear_alt_buffer(&mut self) {
        let rows = self.secondary.rows();
        let cols = self.secondary.cols();
        let fresh = Text::new(Arc::clone(&self.repository), rows, cols, 0, 0);
        let old = std::mem::replace(&mut self.secondary.text, fresh);
        self.destroyer.add(Box::new(old));
        self.secondary.cursor = Cursor::default();
        self.secondary.margin_begin = 0;
        self.secondary.margin_end = rows;
    }

    fn osc(&mut self, strings: &[String]) {
        match strings.first().map(String::as_str) {
            Some("0") | Some("2") => match strings.get(1) {
                Some(title) if !title.is_empty() => self.observer.set_title(title),
                _ => self.observer.reset_title(),
            },
            other => {
                debug!(target: "term", code = ?other, "unhandled_osc");
            }
        }
    }

    fn special(&mut self, intro: u8, code: u8) {
        match intro {
            b'(' | b')' => {
                let register = if intro == b'(' { CharSet::G0 } else { CharSet::G1 };
                let sub = match code {
                    b'0' => &SPECIAL_GRAPHICS,
                    b'A' => &UK,
                    b'B' => &US,
                    other => {
                        debug!(target: "term", code = other, "unhandled_charset");
                        return;
                    }
                };
                self.screen_mut().charsubs.set(register, sub);
            }
            b'#' => {
                if code == b'8' {
                    // DECALN: fill the screen with E.
                    let screen = self.screen_mut();
                    let cell = Cell::ascii(b'E', Style::default());
                    for row in 0..screen.rows() {
                        for col in 0..screen.cols() {
                            screen.text.set_cell(row, col, cell);
                        }
                    }
                    self.damage.clear();
                    self.observer.all_damage();
                }
            }
            _ => {}
        }
    }

    /// Full reset: both buffers, modes, tab stops and parser state.
    fn reset(&mut self) {
        let rows = self.screen().rows();
        let cols = self.screen().cols();

        for alt in [false, true] {
            let history_limit = if alt { 0 } else { self.history_limit };
            let cache_entries = if alt { 0 } else { self.cache_entries };
            let fresh = Text::new(
                Arc::clone(&self.repository),
                rows,
                cols,
                history_limit,
                cache_entries,
            );
            let screen = if alt {
                &mut self.secondary
            } else {
                &mut self.primary
            };
            let old = std::mem::replace(&mut screen.text, fresh);
            self.destroyer.add(Box::new(old));
            screen.cursor = Cursor::default();
            screen.saved = Cursor::default();
            screen.margin_begin = 0;
            screen.margin_end = rows;
            screen.charsubs = CharSubArray::default();
        }

        self.alt_active = false;
        self.modes = ModeSet::SHOW_CURSOR | ModeSet::AUTO_REPEAT | ModeSet::AUTO_WRAP;
        self.tabs = Self::default_tabs(cols);
        self.vt.reset();
        self.utf8 = core_codec::Machine::new();
        self.damage.clear();
        self.observer.all_damage();
    }

    /// Resize both buffers. Rejected while a dispatch is in progress. The
    /// cursor rides its marker through the reflow so it stays on the same
    /// logical character where possible.
    pub fn resize(&mut self, rows: i16, cols: i16) {
        assert!(!self.dispatching, "resize during dispatch");
        assert!(rows > 0 && cols > 0, "rows and cols must be positive");

        for alt in [false, true] {
            let screen = if alt {
                &mut self.secondary
            } else {
                &mut self.primary
            };

            // Anchor on the cell to the left of the cursor (the last
            // character printed) so the cursor lands just after it again
            // once the content has rewrapped.
            let anchor_before = screen.cursor.col > 0;
            let anchor_col = if anchor_before {
                screen.cursor.col - 1
            } else {
                screen.cursor.col
            };
            let mut marker = screen.text.marker_at(screen.cursor.row as i32, anchor_col);
            screen.text.resize(rows, cols, &mut [&mut marker]);

            if marker.is_valid() && (0..rows as i32).contains(&marker.row()) {
                screen.cursor.row = marker.row() as i16;
                screen.cursor.col = (marker.col() + anchor_before as i16).min(cols - 1);
            } else {
                screen.cursor.row = screen.cursor.row.min(rows - 1);
                screen.cursor.col = screen.cursor.col.min(cols - 1);
            }
            screen.cursor.wrap_next = false;
            screen.saved.row = screen.saved.row.min(rows - 1);
            screen.saved.col = screen.saved.col.min(cols - 1);
            screen.margin_begin = 0;
            screen.margin_end = rows;
        }

        self.tabs = Self::default_tabs(cols);
        self.damage.clear();
        self.observer.all_damage();
    }

    /// Queue bytes for the sink, writing through immediately when nothing
    /// is already queued. After a sink error all writes are dropped.
    pub fn write(&mut self, data: &[u8]) {
        assert!(!self.dispatching, "write during dispatch");
        self.send(data);
    }

    pub fn writes_queued(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Retry queued bytes; call when the sink is writable again.
    pub fn flush(&mut self) {
        assert!(!self.dispatching, "flush during dispatch");
        if self.dump_writes || self.write_queue.is_empty() {
            return;
        }

        let mut written = 0;
        loop {
            match self.sink.write(&self.write_queue[written..]) {
                Ok(0) => break,
                Ok(count) => {
                    written += count;
                    if written == self.write_queue.len() {
                        break;
                    }
                }
                Err(_) => {
                    debug!(target: "term", "sink_gone_dumping_writes");
                    self.dump_writes = true;
                    self.write_queue.clear();
                    return;
                }
            }
        }
        self.write_queue.drain(..written);
    }

    /// Device replies raised mid-dispatch share the write path but not the
    /// reentrancy assertion.
    fn reply(&mut self, data: &[u8]) {
        self.send(data);
    }

    fn send(&mut self, data: &[u8]) {
        if self.dump_writes {
            return;
        }

        if self.write_queue.is_empty() {
            let mut data = data;
            while !data.is_empty() {
                match self.sink.write(data) {
                    Ok(0) => break,
                    Ok(count) => data = &data[count..],
                    Err(_) => {
                        debug!(target: "term", "sink_gone_dumping_writes");
                        self.dump_writes = true;
                        self.write_queue.clear();
                        return;
                    }
                }
            }
            self.write_queue.extend_from_slice(data);
        } else {
            // The sink was already blocking; queue behind what is waiting.
            self.write_queue.extend_from_slice(data);
        }
    }

    fn flush_damage(&mut self) {
        if self.damage.is_empty() {
            return;
        }
        let region = self.damage;
        self.damage.clear();
        for row in region.begin.row..region.end.row {
            self.observer
                .cell_damage(row as i16, region.begin.col, region.end.col);
        }
    }
}

fn param(params: &[i32], index: usize, default: i32) -> i32 {
    match params.get(index) {
        Some(&value) if value != 0 => value,
        _ => default,
    }
}
