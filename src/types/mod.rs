//! Core message and generation types.

pub mod generation;
pub mod message;

pub use generation::*;
pub use message::*;
