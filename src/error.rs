use std::sync::Arc;

/// Creates an ad hoc [`Error`] value from format arguments.
///
/// This is used for attaching human readable context to a lower level
/// error, e.g., `result.context(err!("canonicalizing {name}"))`.
macro_rules! err {
    ($($tt:tt)*) => {
        crate::error::Error::adhoc(format!($($tt)*))
    }
}

pub(crate) use err;

/// An error that can occur in this crate.
///
/// There are three root causes, and callers that need to dispatch on them
/// can use the corresponding predicates:
///
/// * [`Error::is_allocation`]: memory for a result could not be allocated.
/// * [`Error::is_host`]: the host operating system reported a failure, for
/// example while loading the provider module or converting text through the
/// host's code page. When the host supplied an error code, it is captured
/// in the error rather than left in thread-local last-error state.
/// * [`Error::is_provider`]: the external timezone data provider reported a
/// failure or returned unusable data.
///
/// Errors may carry a chain of context frames; the `Display` impl renders
/// the whole chain from the most recent frame down to the root cause.
#[derive(Clone, Debug)]
pub struct Error {
    inner: Arc<ErrorInner>,
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    cause: Option<Error>,
}

#[derive(Debug)]
enum ErrorKind {
    Adhoc(Box<str>),
    Allocation,
    Host(HostError),
    Provider(ProviderError),
}

impl Error {
    /// Creates a new error from an arbitrary message.
    pub(crate) fn adhoc(message: impl Into<Box<str>>) -> Error {
        Error::from(ErrorKind::Adhoc(message.into()))
    }

    /// Creates a new error indicating that memory for a result could not
    /// be allocated.
    #[inline(never)]
    #[cold]
    pub(crate) fn allocation() -> Error {
        Error::from(ErrorKind::Allocation)
    }

    /// Creates a new host error with an optional OS error code.
    #[inline(never)]
    #[cold]
    pub(crate) fn host(code: Option<i32>) -> Error {
        Error::from(ErrorKind::Host(HostError { code }))
    }

    /// Creates a new host error carrying the calling thread's current OS
    /// error code.
    #[inline(never)]
    #[cold]
    pub(crate) fn host_last_os() -> Error {
        Error::host(std::io::Error::last_os_error().raw_os_error())
    }

    /// Creates a new error for a failure reported by the timezone data
    /// provider, preserving its raw status code.
    #[inline(never)]
    #[cold]
    pub(crate) fn provider(status: i32) -> Error {
        Error::from(ErrorKind::Provider(ProviderError { status }))
    }

    /// Returns true when the root cause of this error is an allocation
    /// failure.
    pub fn is_allocation(&self) -> bool {
        matches!(self.root().kind(), ErrorKind::Allocation)
    }

    /// Returns true when the root cause of this error is a host operating
    /// system failure. This includes the case where the optional provider
    /// module could not be loaded.
    pub fn is_host(&self) -> bool {
        matches!(self.root().kind(), ErrorKind::Host(_))
    }

    /// Returns true when the root cause of this error is a failure reported
    /// by the external timezone data provider.
    pub fn is_provider(&self) -> bool {
        matches!(self.root().kind(), ErrorKind::Provider(_))
    }

    /// Returns the OS error code captured on a host error, if one was
    /// available.
    pub fn host_code(&self) -> Option<i32> {
        match self.root().kind() {
            ErrorKind::Host(HostError { code }) => *code,
            _ => None,
        }
    }

    /// Contextualizes this error with the given consequent error.
    ///
    /// That is, "consequent is caused by self." The consequent must not
    /// itself have a cause.
    pub(crate) fn context(self, consequent: Error) -> Error {
        let mut err = consequent;
        let inner = Arc::get_mut(&mut err.inner)
            .expect("consequent error must be newly created");
        assert!(inner.cause.is_none(), "cause of consequent must be `None`");
        inner.cause = Some(self);
        err
    }

    /// Returns the root error in this chain.
    fn root(&self) -> &Error {
        // OK because `Error::chain` always yields at least one error.
        self.chain().last().unwrap()
    }

    /// Returns a chain of error values, starting with the most recent
    /// context frame and ending with the root cause. Always non-empty.
    fn chain(&self) -> impl Iterator<Item = &Error> {
        let mut err = self;
        std::iter::once(err).chain(std::iter::from_fn(move || {
            err = err.inner.cause.as_ref()?;
            Some(err)
        }))
    }

    fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut it = self.chain().peekable();
        while let Some(err) = it.next() {
            std::fmt::Display::fmt(err.kind(), f)?;
            if it.peek().is_some() {
                f.write_str(": ")?;
            }
        }
        Ok(())
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { inner: Arc::new(ErrorInner { kind, cause: None }) }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Error {
        Error::allocation()
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ErrorKind::Adhoc(ref msg) => f.write_str(msg),
            ErrorKind::Allocation => {
                f.write_str("failed to allocate memory for result")
            }
            ErrorKind::Host(ref err) => err.fmt(f),
            ErrorKind::Provider(ref err) => err.fmt(f),
        }
    }
}

/// A failure reported by the host operating system.
#[derive(Debug)]
struct HostError {
    code: Option<i32>,
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "host error (OS error {code})"),
            None => f.write_str("host error"),
        }
    }
}

/// A failure reported by the external timezone data provider.
#[derive(Debug)]
struct ProviderError {
    status: i32,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "timezone data provider error (status {})", self.status)
    }
}

/// A trait for contextualizing error values.
///
/// This makes it easy to contextualize a `Result<T, Error>` without calling
/// `map_err` everywhere. This trick was borrowed from `anyhow`.
pub(crate) trait ErrorContext<T> {
    /// Contextualize the error, if any, with the given consequent error.
    fn context(self, consequent: Error) -> Result<T, Error>;

    /// Like `context`, but hides error construction within a closure, so
    /// that the happy path doesn't pay for building the context frame.
    fn with_context(
        self,
        consequent: impl FnOnce() -> Error,
    ) -> Result<T, Error>;
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn context(self, consequent: Error) -> Result<T, Error> {
        self.map_err(|err| err.context(consequent))
    }

    fn with_context(
        self,
        consequent: impl FnOnce() -> Error,
    ) -> Result<T, Error> {
        self.map_err(|err| err.context(consequent()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_follow_root_cause() {
        let err = Error::provider(7)
            .context(err!("canonicalizing id"))
            .context(err!("enumerating time zones"));
        assert!(err.is_provider());
        assert!(!err.is_host());
        assert!(!err.is_allocation());
    }

    #[test]
    fn display_renders_chain() {
        let err = Error::provider(15).context(err!("fetching version"));
        let rendered = err.to_string();
        assert!(rendered.starts_with("fetching version: "), "{rendered:?}");
        assert!(rendered.contains("status 15"), "{rendered:?}");
    }

    #[test]
    fn host_code_is_captured() {
        let err = Error::host(Some(126)).context(err!("loading provider"));
        assert!(err.is_host());
        assert_eq!(err.host_code(), Some(126));
        assert_eq!(Error::host(None).host_code(), None);
    }
}
