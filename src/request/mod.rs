//! Request domain model: what callers submit, what they get back, and how a
//! request looks while queued.

pub mod types;

pub use types::*;
