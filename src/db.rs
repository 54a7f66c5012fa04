use crate::{
    buffer::sized_query,
    encoding::wide_to_narrow,
    error::{err, Error, ErrorContext},
    provider::{
        load_platform_provider, Binding, BoxedProvider, Provider,
        ProviderState,
    },
};

/// Returns the process-wide timezone database facade.
///
/// The handle itself is always available; whether the underlying data
/// provider is available is decided on first use and can be inspected via
/// [`TimeZoneDatabase::provider_state`].
pub fn db() -> &'static TimeZoneDatabase {
    static DB: TimeZoneDatabase =
        TimeZoneDatabase { provider: Binding::new() };
    &DB
}

/// A facade over the host's timezone data provider.
///
/// This type answers three questions: what time zones does the host know
/// about (and which of them are aliases), what is the host's current time
/// zone, and what version of timezone data is all of this drawn from.
///
/// The underlying provider is bound lazily on the first query, at most
/// once per process. If binding fails, it is never retried: every
/// subsequent query reports the provider as unavailable.
pub struct TimeZoneDatabase {
    provider: Binding<BoxedProvider>,
}

impl TimeZoneDatabase {
    /// Returns the current state of the provider binding without forcing
    /// a bind.
    pub fn provider_state(&self) -> ProviderState {
        self.provider.state()
    }

    /// Enumerates every timezone identifier the provider knows, with
    /// aliases resolved.
    ///
    /// This is a fresh enumeration on every call; results are not cached.
    pub fn time_zones(&self) -> Result<TimeZones, Error> {
        let provider = self.acquire_provider()?;
        let enumerated = enumerate_with(&**provider);
        match enumerated.err {
            None => Ok(TimeZones {
                // OK because `enumerate_with` only leaves the version
                // unset when it also records an error.
                version: enumerated.version.ok_or_else(|| {
                    err!("provider yielded no timezone data version")
                })?,
                entries: enumerated.entries,
            }),
            Some(err) => Err(err),
        }
    }

    /// Returns the identifier of the host's current default time zone.
    pub fn current_zone(&self) -> Result<String, Error> {
        let provider = self.acquire_provider()?;
        default_zone_with(&**provider)
    }

    /// Binds the provider if necessary and returns it, mapping an
    /// unavailable provider to a host error.
    pub(crate) fn acquire_provider(
        &self,
    ) -> Result<&BoxedProvider, Error> {
        self.provider.acquire(load_platform_provider).ok_or_else(|| {
            Error::host(None)
                .context(err!("timezone data provider is unavailable"))
        })
    }
}

impl std::fmt::Debug for TimeZoneDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TimeZoneDatabase")
            .field("provider_state", &self.provider.state())
            .finish()
    }
}

/// The result of enumerating the provider's timezone identifiers.
#[derive(Debug)]
pub struct TimeZones {
    version: String,
    entries: Vec<TimeZoneEntry>,
}

impl TimeZones {
    /// The version of the timezone data these entries were drawn from,
    /// e.g. `"2021a"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The enumerated entries, in provider order.
    pub fn entries(&self) -> &[TimeZoneEntry] {
        &self.entries
    }
}

/// A single enumerated time zone.
#[derive(Debug, Eq, PartialEq)]
pub struct TimeZoneEntry {
    name: String,
    link: Option<String>,
}

impl TimeZoneEntry {
    /// The identifier of this time zone, e.g. `"America/New_York"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When this identifier is an alias, the canonical identifier it
    /// refers to. `None` for identifiers that are themselves canonical.
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }
}

/// The raw outcome of one enumeration pass.
///
/// Unlike [`TimeZones`], this keeps whatever was produced before a
/// failure, which the C interface needs in order to hand callers a
/// partially populated result alongside the error.
#[derive(Debug)]
pub(crate) struct Enumerated {
    /// The data version, when fetching it succeeded.
    pub(crate) version: Option<String>,
    /// The total entry count the provider reported up front. Entries past
    /// `entries.len()` were never produced.
    pub(crate) count: usize,
    /// The entries produced before any failure.
    pub(crate) entries: Vec<TimeZoneEntry>,
    /// The failure that cut the pass short, if any.
    pub(crate) err: Option<Error>,
}

impl Enumerated {
    fn fail(self, err: Error) -> Enumerated {
        Enumerated { err: Some(err), ..self }
    }
}

/// Runs one full enumeration pass against `provider`.
///
/// For each identifier, the provider is asked for its canonical form; an
/// identifier whose canonical form differs (compared in the provider's
/// native encoding, before any conversion) is recorded as an alias of it.
pub(crate) fn enumerate_with(provider: &dyn Provider) -> Enumerated {
    let mut out = Enumerated {
        version: None,
        count: 0,
        entries: Vec::new(),
        err: None,
    };
    match provider.data_version() {
        Ok(version) => out.version = Some(version),
        Err(err) => {
            return out
                .fail(err.context(err!("fetching timezone data version")));
        }
    }
    let mut en = match provider.open_enumeration() {
        Ok(en) => en,
        Err(err) => {
            return out
                .fail(err.context(err!("opening timezone enumeration")));
        }
    };
    out.count = match en.count() {
        Ok(count) => count,
        Err(err) => {
            return out
                .fail(err.context(err!("counting timezone identifiers")));
        }
    };
    if let Err(err) = out.entries.try_reserve_exact(out.count) {
        return out.fail(Error::from(err));
    }
    for i in 0..out.count {
        let wide = match en.next() {
            Ok(wide) => wide,
            Err(err) => {
                let count = out.count;
                return out.fail(err.context(err!(
                    "pulling timezone identifier {i} of {count}",
                )));
            }
        };
        let name = match wide_to_narrow(&wide) {
            Ok(name) => name,
            Err(err) => {
                return out.fail(
                    err.context(err!("converting timezone identifier {i}")),
                );
            }
        };
        let canonical = match sized_query(|buf| {
            provider.canonical_id(&wide, buf)
        }) {
            Ok(canonical) => canonical,
            Err(err) => {
                return out.fail(
                    err.context(err!("canonicalizing {name:?}")),
                );
            }
        };
        // Aliases are detected on the provider's native strings so that a
        // lossy narrow conversion can never manufacture or hide one.
        let link = if canonical == wide {
            None
        } else {
            match wide_to_narrow(&canonical) {
                Ok(canonical) => Some(canonical),
                Err(err) => {
                    return out.fail(err.context(err!(
                        "converting canonical identifier for {name:?}",
                    )));
                }
            }
        };
        trace!("enumerated time zone {name:?} (link: {link:?})");
        out.entries.push(TimeZoneEntry { name, link });
    }
    out
}

/// Asks `provider` for the host's default time zone identifier.
pub(crate) fn default_zone_with(
    provider: &dyn Provider,
) -> Result<String, Error> {
    let wide = sized_query(|buf| provider.default_zone(buf))
        .context(err!("fetching default time zone"))?;
    wide_to_narrow(&wide)
        .context(err!("converting default time zone identifier"))
}
