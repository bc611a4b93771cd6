//! Cell-level data model: attributes, colors, styles, cells, positions and
//! damage regions.
//!
//! Wire layout invariants (consumed by the repository serializer):
//! * `Color` is 4 bytes: 1 tag byte (0 = stock, 1 = indexed, 2 = direct)
//!   followed by 3 payload bytes.
//! * `Style` is 9 bytes: 1 attribute byte, 4 foreground bytes, 4 background
//!   bytes.
//! Total equality is structural everywhere; two styles that render the same
//! but are encoded differently (e.g. indexed 15 vs direct white) are not
//! equal and will not deduplicate together.

use core_codec::Seq;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod region;

pub use region::Region;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid color tag byte {0:#04x}")]
    InvalidColorTag(u8),
    #[error("invalid stock color name byte {0:#04x}")]
    InvalidStockName(u8),
    #[error("malformed hex color")]
    MalformedHexColor,
}

bitflags::bitflags! {
    /// Rendition attributes of a cell.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Attrs: u8 {
        const BOLD      = 1 << 0;
        const FAINT     = 1 << 1;
        const ITALIC    = 1 << 2;
        const UNDERLINE = 1 << 3;
        const BLINK     = 1 << 4;
        const INVERSE   = 1 << 5;
        const CONCEAL   = 1 << 6;
    }
}

/// Semantic colors resolved by the renderer's palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StockColor {
    TextFg = 0,
    TextBg = 1,
    SelectFg = 2,
    SelectBg = 3,
    CursorFill = 4,
    CursorText = 5,
}

impl StockColor {
    fn from_byte(byte: u8) -> Result<Self, WireError> {
        Ok(match byte {
            0 => StockColor::TextFg,
            1 => StockColor::TextBg,
            2 => StockColor::SelectFg,
            3 => StockColor::SelectBg,
            4 => StockColor::CursorFill,
            5 => StockColor::CursorText,
            _ => return Err(WireError::InvalidStockName(byte)),
        })
    }
}

/// An explicit 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = WireError;

    /// Parse `#RRGGBB`, case-insensitive on the hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .ok_or(WireError::MalformedHexColor)?
            .as_bytes();
        if hex.len() != 6 {
            return Err(WireError::MalformedHexColor);
        }
        let nibble = |b: u8| -> Result<u8, WireError> {
            (b as char)
                .to_digit(16)
                .map(|d| d as u8)
                .ok_or(WireError::MalformedHexColor)
        };
        let byte = |hi: u8, lo: u8| -> Result<u8, WireError> {
            Ok(nibble(hi)? << 4 | nibble(lo)?)
        };
        Ok(Rgb::new(
            byte(hex[0], hex[1])?,
            byte(hex[2], hex[3])?,
            byte(hex[4], hex[5])?,
        ))
    }
}

/// Hybrid color: semantic, palette-indexed, or direct RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Stock(StockColor),
    Indexed(u8),
    Direct(Rgb),
}

impl Color {
    /// 4-byte wire form: tag byte then 3 payload bytes.
    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            Color::Stock(name) => [0, name as u8, 0, 0],
            Color::Indexed(index) => [1, index, 0, 0],
            Color::Direct(rgb) => [2, rgb.r, rgb.g, rgb.b],
        }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, WireError> {
        match bytes[0] {
            0 => Ok(Color::Stock(StockColor::from_byte(bytes[1])?)),
            1 => Ok(Color::Indexed(bytes[1])),
            2 => Ok(Color::Direct(Rgb::new(bytes[1], bytes[2], bytes[3]))),
            tag => Err(WireError::InvalidColorTag(tag)),
        }
    }
}

/// Rendition of one cell: attributes plus foreground/background colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Style {
    pub attrs: Attrs,
    pub fg: Color,
    pub bg: Color,
}

/// On-wire size of a [`Style`].
pub const STYLE_WIRE_LEN: usize = 9;

impl Default for Style {
    fn default() -> Self {
        Self {
            attrs: Attrs::empty(),
            fg: Color::Stock(StockColor::TextFg),
            bg: Color::Stock(StockColor::TextBg),
        }
    }
}

impl Style {
    pub fn new(attrs: Attrs, fg: Color, bg: Color) -> Self {
        Self { attrs, fg, bg }
    }

    /// 9-byte wire form: attribute byte, foreground, background.
    pub fn to_bytes(self) -> [u8; STYLE_WIRE_LEN] {
        let mut bytes = [0; STYLE_WIRE_LEN];
        bytes[0] = self.attrs.bits();
        bytes[1..5].copy_from_slice(&self.fg.to_bytes());
        bytes[5..9].copy_from_slice(&self.bg.to_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; STYLE_WIRE_LEN]) -> Result<Self, WireError> {
        Ok(Self {
            attrs: Attrs::from_bits_retain(bytes[0]),
            fg: Color::from_bytes([bytes[1], bytes[2], bytes[3], bytes[4]])?,
            bg: Color::from_bytes([bytes[5], bytes[6], bytes[7], bytes[8]])?,
        })
    }
}

/// One screen cell: a styled code-point sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub style: Style,
    pub seq: Seq,
}

impl Cell {
    pub fn new(style: Style, seq: Seq) -> Self {
        Self { style, seq }
    }

    /// The canonical blank: a single space in the given style.
    pub fn blank(style: Style) -> Self {
        Self::new(style, Seq::ascii(b' '))
    }

    pub fn ascii(byte: u8, style: Style) -> Self {
        Self::new(style, Seq::ascii(byte))
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank(Style::default())
    }
}

/// A screen-relative position. Rows are signed: negative rows address
/// scrollback above the visible screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub row: i32,
    pub col: i16,
}

impl Pos {
    pub const fn new(row: i32, col: i16) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.row, self.col)
    }
}
