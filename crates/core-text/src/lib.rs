//! Paragraph storage and the scrollback+screen text model.
//!
//! Layering, leaves first: [`Para`] is one wrap-free logical line;
//! [`ParaCache`] decodes repository-stored paragraphs on demand with LRU
//! eviction; [`Text`] joins a history of repository tags with the live
//! screen, decoupling logical paragraphs from the physical rows that display
//! them.

pub mod cache;
pub mod para;
pub mod text;

pub use cache::ParaCache;
pub use para::Para;
pub use text::{Marker, SearchMatch, Text, Visitor};
