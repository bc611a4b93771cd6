//! Terminal controller: the interpretation pipeline and its state.
//!
//! Byte flow: source bytes -> UTF-8 machine -> VT machine -> semantic
//! mutations of the active text model. Everything a window-system embedder
//! needs sits behind three seams: [`ByteSource`]/[`ByteSink`] for the PTY,
//! [`TermObserver`] for damage and lifecycle callbacks, and
//! [`Destroyer`](destroyer::Destroyer) for offloading bulky destructor work.

pub mod charsub;
pub mod destroyer;
pub mod io;
pub mod modes;
pub mod terminal;

pub use charsub::{CharSet, CharSub, CharSubArray};
pub use destroyer::{AsyncDestroyer, Destroyer, Garbage, SyncDestroyer};
pub use io::{ByteSink, ByteSource, SinkError, SourceExited};
pub use modes::ModeSet;
pub use terminal::Terminal;

/// Callbacks the terminal raises during and around a dispatch. Damage
/// coordinates are half-open column ranges on one row.
pub trait TermObserver {
    fn begin_dispatch(&mut self) {}
    fn cell_damage(&mut self, _row: i16, _col_begin: i16, _col_end: i16) {}
    fn all_damage(&mut self) {}
    fn reset_title(&mut self) {}
    fn set_title(&mut self, _title: &str) {}
    fn child_exited(&mut self, _exit_code: i32) {}
    fn end_dispatch(&mut self) {}
}
