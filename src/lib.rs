/*!
A process-local facade over the host's timezone database.

This crate gives a higher-level runtime three things without that runtime
needing to know how the host stores timezone data:

* the full list of known timezone identifiers along with, for each
identifier, its canonical form when the identifier is merely an alias
(via [`TimeZoneDatabase::time_zones`]),
* the name of the host's currently configured timezone (via
[`TimeZoneDatabase::current_zone`]),
* any operating-system-published leap second announcements (via
[`registry_leap_seconds`]).

The interesting part is the binding layer. Timezone identifier data comes
from an *optional* external provider (on Windows, the system `icu.dll`).
The provider is discovered and bound at most once per process, safely under
concurrent first use, and its absence is a normal outcome rather than a
panic or an abort. See [`TimeZoneDatabase`] and [`ProviderState`].

Leap second announcements are independent of the provider and come from a
well-known host configuration key. A missing key is likewise a normal
outcome. See [`LeapSecondRead`] for the full read contract.

Every operation allocates fresh, independently owned results. Nothing is
cached across calls, so callers observe updates the host publishes while
the process is running.

# C ABI

The [`ffi`] module exposes the same operations over a C calling convention
with an explicit memory ownership contract, for consumers that cannot link
against Rust directly.

# Platform support

The provider binding and the leap second registry source are implemented
for Windows. On other hosts the provider is reported as unavailable (a
`Host` error from the query operations) and the leap second reader reports
no data, which mirrors what a Windows machine without `icu.dll` or the
leap second key looks like.
*/

#![deny(missing_docs)]

pub use crate::{
    db::{db, TimeZoneDatabase, TimeZoneEntry, TimeZones},
    error::Error,
    leap::{registry_leap_seconds, LeapSecondRead, LeapSecondRecord},
    provider::ProviderState,
};

#[macro_use]
mod logging;

mod buffer;
mod db;
mod encoding;
mod error;
pub mod ffi;
mod leap;
mod provider;
