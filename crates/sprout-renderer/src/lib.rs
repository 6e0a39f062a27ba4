//! In-memory patch backend for sprout.
//!
//! [`MemoryRenderer`] turns rendered trees into [`Element`](sprout_core::Element)
//! handles and runs the component placeholder hooks:
//!
//! - *init*: create the child instance (parent = active instance) and mount it
//! - *prepatch*: hand a re-rendered placeholder's inputs to the existing child
//! - *insert*: mark the child mounted, or re-activate a kept-alive one
//! - *destroy*: destroy the child, or deactivate a kept-alive one

pub mod memory;

pub use memory::{MemoryRenderer, REF_ATTR};
