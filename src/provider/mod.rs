/*!
The external timezone data provider: the trait it presents to the rest of
the crate, the once-only concurrent binding, and the Windows discovery of
the real thing.

The provider is an optional runtime dependency. This crate requires a
minimal function set from it (seven operations, see [`Provider`] and
[`Enumeration`]); a provider missing any of them is treated as entirely
unavailable.
*/

use crate::{buffer::Status, error::Error};

pub(crate) use self::binding::Binding;
pub use self::binding::ProviderState;

pub(crate) mod binding;
#[cfg(windows)]
mod icu;

/// A bound provider, boxed for storage in the process-wide binding.
pub(crate) type BoxedProvider = Box<dyn Provider + Send + Sync + 'static>;

/// The interface the external timezone data provider presents.
///
/// The sized calls (`canonical_id`, `default_zone`) follow the provider's
/// native convention: write into a caller supplied buffer, report the
/// string length (or, on overflow, the required buffer size) along with a
/// status. They are meant to be driven by
/// [`sized_query`](crate::buffer::sized_query).
pub(crate) trait Provider {
    /// Returns the version string of the provider's timezone data, e.g.
    /// `"2021a"`.
    fn data_version(&self) -> Result<String, Error>;

    /// Opens an enumeration over every known timezone identifier.
    fn open_enumeration(&self) -> Result<Box<dyn Enumeration + '_>, Error>;

    /// Writes the canonical identifier for `id` into `buf`.
    fn canonical_id(&self, id: &[u16], buf: &mut [u16]) -> (i32, Status);

    /// Writes the host's default timezone identifier into `buf`.
    fn default_zone(&self, buf: &mut [u16]) -> (i32, Status);
}

/// An open identifier enumeration.
///
/// Enumerations are not restartable, so callers that need the length up
/// front (to pre-size result arrays) must take [`Enumeration::count`]
/// before pulling entries.
pub(crate) trait Enumeration {
    /// The total number of identifiers this enumeration will yield.
    fn count(&mut self) -> Result<usize, Error>;

    /// The next identifier, as UTF-16. A provider failure or a premature
    /// end of the enumeration is an error, never `None`.
    fn next(&mut self) -> Result<Vec<u16>, Error>;
}

/// Loads the host's timezone data provider.
///
/// This is the load operation the process-wide binding runs exactly once.
/// A missing provider module is a normal outcome and maps to a host error.
#[cfg(windows)]
pub(crate) fn load_platform_provider() -> Result<BoxedProvider, Error> {
    let icu = icu::Icu::load()?;
    Ok(Box::new(icu))
}

/// Loads the host's timezone data provider.
///
/// No provider exists on this platform, so loading always fails the same
/// way a Windows host without the provider module does.
#[cfg(not(windows))]
pub(crate) fn load_platform_provider() -> Result<BoxedProvider, Error> {
    use crate::error::err;

    debug!("no timezone data provider exists on this platform");
    Err(Error::host(None).context(err!("timezone data provider unavailable")))
}
