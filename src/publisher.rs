use std::error::Error;

use futures::Stream;

mod subject;
mod subject_impl;
mod throwing_subject;
pub use subject::*;
pub use throwing_subject::*;

/// A publisher delivers elements to one or more Subscriber instances.
///
/// call receive to create new subscriber stream.
pub trait Publisher {
    type Output;
    type Failure: Error;
    type Stream: Stream;

    ///  Create new receiver stream for this publisher
    fn receive(&self) -> Self::Stream;
}
