use thiserror::Error;

/// Returned by `try_send` when the subject no longer accepts values.
///
/// The rejected value is handed back to the caller.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SendError<Output> {
    #[error("Subject finished")]
    Finished(Output),

    #[error("Subject failed")]
    Failed(Output),
}

impl<Output> SendError<Output> {
    /// Recover the value that could not be sent.
    pub fn into_inner(self) -> Output {
        match self {
            SendError::Finished(value) | SendError::Failed(value) => value,
        }
    }
}
