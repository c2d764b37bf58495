use std::any::Any;
use std::error;
use std::fmt;
use thiserror::Error;

/// Error type produced by user functions.
///
/// Anything that converts into a boxed error can be returned from a task, stage or consumer.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Identifies which terminal callback a [Error::DuplicateCallback] refers to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CallbackKind {
    /// The success callback.
    Success,
    /// The error callback.
    Error,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::Success => f.write_str("on_success"),
            CallbackKind::Error => f.write_str("on_error"),
        }
    }
}

/// Everything that can go wrong while building or running a chain.
#[derive(Debug, Error)]
pub enum Error {
    /// The owning scope is no longer active.
    /// Never delivered to an error callback.
    #[error("work was cancelled")]
    Cancelled,

    /// The chain was discontinued without failing, for example by a filter.
    /// Neither callback fires.
    #[error("work was discontinued")]
    Ignore,

    /// A terminal callback was registered twice.
    #[error("{0}() is called twice")]
    DuplicateCallback(CallbackKind),

    /// Pooled consumers resolved to different producers.
    #[error("can't start properly, internal producer conflicts")]
    ProducerConflict,

    /// The runtime was configured twice, or configured after first use.
    #[error("configuration is already set")]
    AlreadyConfigured,

    /// The UI executor went away before running a posted job.
    #[error("ui executor is unavailable")]
    UiUnavailable,

    /// A user-supplied function panicked. Holds the panic message.
    #[error("work panicked: {0}")]
    Panicked(String),

    /// Failure raised by a user-supplied function.
    #[error(transparent)]
    User(BoxError),
}

impl Error {
    /// Returns `true` for the signals that end a chain silently ([Error::Cancelled] and [Error::Ignore]).
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Ignore)
    }

    /// Turn the payload of a caught panic into an error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<&'static str>() {
            Ok(message) => String::from(*message),
            Err(payload) => match payload.downcast::<String>() {
                Ok(message) => *message,
                Err(_) => String::from("opaque panic payload"),
            },
        };
        Error::Panicked(message)
    }
}

impl From<BoxError> for Error {
    /// Boxed crate errors are unwrapped, so that a user function returning
    /// `Err(discontinue())` behaves the same as a failing filter.
    fn from(error: BoxError) -> Self {
        match error.downcast::<Error>() {
            Ok(error) => *error,
            Err(error) => Error::User(error),
        }
    }
}

/// Box an error, so it can be returned from a user function.
pub fn new_error<E>(error: E) -> BoxError
where
    E: Into<BoxError>,
{
    error.into()
}

/// Error to return from a user function to discontinue the chain without reporting.
pub fn discontinue() -> BoxError {
    Box::new(Error::Ignore)
}


#[cfg(test)]
pub type ErrorForTesting = for_testing::Error;

#[cfg(test)]
mod tests {
    use super::{discontinue, new_error, CallbackKind, Error, ErrorForTesting};

    #[test]
    fn boxed_user_error_stays_user_error() {
        let error = Error::from(new_error(ErrorForTesting::from("broken")));
        match error {
            Error::User(inner) => assert_eq!(
                ErrorForTesting::from("broken"),
                *inner.downcast_ref::<ErrorForTesting>().unwrap()
            ),
            other => panic!("expected a user error, got {:?}", other),
        }
    }

    #[test]
    fn boxed_crate_error_is_unwrapped() {
        assert!(matches!(Error::from(discontinue()), Error::Ignore));
        assert!(matches!(
            Error::from(new_error(Error::Cancelled)),
            Error::Cancelled
        ));
    }

    #[test]
    fn suppression() {
        assert!(Error::Cancelled.is_suppressed());
        assert!(Error::Ignore.is_suppressed());
        assert!(!Error::ProducerConflict.is_suppressed());
        assert!(!Error::from(new_error("plain")).is_suppressed());
    }

    #[test]
    fn panic_payloads_keep_their_message() {
        let error = Error::from_panic(Box::new("static text"));
        assert_eq!("work panicked: static text", error.to_string());

        let error = Error::from_panic(Box::new(String::from("formatted 7")));
        assert!(matches!(&error, Error::Panicked(message) if message == "formatted 7"));
        assert!(!error.is_suppressed());

        let error = Error::from_panic(Box::new(7_u32));
        assert_eq!("work panicked: opaque panic payload", error.to_string());
    }

    #[test]
    fn duplicate_callback_message() {
        assert_eq!(
            "on_success() is called twice",
            Error::DuplicateCallback(CallbackKind::Success).to_string()
        );
        assert_eq!(
            "on_error() is called twice",
            Error::DuplicateCallback(CallbackKind::Error).to_string()
        );
    }
}
