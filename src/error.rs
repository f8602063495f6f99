//! Errors recorded by pipe completions.

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

/// A fault recorded against one end of a pipe.
///
/// Faults are stored once and handed out again on every check, so the payload
/// is shared rather than owned.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipeError {
    /// Two operations tried to wait on the same end of a pipe at once.
    #[error("concurrent reads or writes are not supported")]
    NoConcurrentOperation,

    /// The pending operation was cancelled before it could complete.
    #[error("pending operation was cancelled")]
    Cancelled,

    /// An I/O error supplied when completing the pipe.
    #[error("pipe failed: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Any other error supplied when completing the pipe.
    #[error("{0}")]
    Custom(#[source] Arc<dyn StdError + Send + Sync>),
}

impl PipeError {
    /// Wrap an arbitrary error as a pipe fault.
    pub fn custom<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        PipeError::Custom(Arc::new(error))
    }
}

impl From<io::Error> for PipeError {
    fn from(error: io::Error) -> Self {
        PipeError::Io(Arc::new(error))
    }
}

impl From<PipeError> for io::Error {
    fn from(error: PipeError) -> Self {
        let kind = match &error {
            PipeError::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        };

        io::Error::new(kind, error)
    }
}

pub type Result<T> = std::result::Result<T, PipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kind_survives_conversion() {
        let error = PipeError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        let io_error = io::Error::from(error);

        assert_eq!(io_error.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn cancelled_converts_to_other() {
        let io_error = io::Error::from(PipeError::Cancelled);

        assert_eq!(io_error.kind(), io::ErrorKind::Other);
        assert!(matches!(
            io_error.get_ref().and_then(|e| e.downcast_ref::<PipeError>()),
            Some(PipeError::Cancelled)
        ));
    }

    #[test]
    fn custom_exposes_source() {
        let error = PipeError::custom(io::Error::new(io::ErrorKind::Other, "upstream"));

        let source = StdError::source(&error).expect("custom errors have a source");
        assert_eq!(source.to_string(), "upstream");
        assert_eq!(error.to_string(), "upstream");
    }

    #[test]
    fn clones_share_payload() {
        let error = PipeError::from(io::Error::new(io::ErrorKind::Other, "boom"));

        match (&error, &error.clone()) {
            (PipeError::Io(a), PipeError::Io(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected io errors"),
        }
    }
}
