//! Small shared helpers: text truncation and timeout/cancellation wrappers.

pub mod text;
pub mod timeout;
