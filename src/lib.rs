//! Multi-producer, multi-consumer subjects built on `futures` streams.
//!
//! A [`Subject`] hands every sent value to exactly one consumer; once
//! finished, every consumer sees the end of the sequence. A
//! [`ThrowingSubject`] terminates with a failure instead, raised to every
//! consumer from then on.

mod error;
pub mod publisher;

pub use error::*;
pub use publisher::*;
