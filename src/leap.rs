/*!
Reading the host's leap second table.

Windows records leap seconds declared since its own built-in table was
frozen under the registry key
`SYSTEM\CurrentControlSet\Control\LeapSecondInformation`, in the
`LeapSeconds` value: a packed array of 12 byte records. This module reads
that value and hands the records to callers, with a short-circuit for the
common case where the table hasn't grown since the caller last looked.
*/

/// The size of one packed leap second record, in bytes.
const RECORD_SIZE: usize = 12;

/// One leap second declaration, as the host records it.
///
/// The layout matches the host's packed registry format, so records can be
/// handed across the C interface without translation. The leap second is
/// inserted (or, when `negative` is set, removed) at the end of the named
/// UTC day.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct LeapSecondRecord {
    /// The UTC year of the declaration.
    pub year: u16,
    /// The UTC month, 1-12.
    pub month: u16,
    /// The UTC day of month.
    pub day: u16,
    /// The UTC hour. In every declaration to date this is 23.
    pub hour: u16,
    /// Non-zero when a second is removed rather than inserted.
    pub negative: u16,
    /// Unused. Present to match the host's record layout.
    pub reserved: u16,
}

const _: () = assert!(std::mem::size_of::<LeapSecondRecord>() == RECORD_SIZE);

/// The outcome of asking the host for its leap second table.
///
/// Every variant carries the number of records the host currently holds,
/// so callers can tell "no change" and "no table" apart from genuine
/// failure, and can see how large the table was even when reading it
/// failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LeapSecondRead {
    /// The host's table holds no more records than the caller already
    /// has. No records were read. A host with no table at all reports
    /// this with a count of zero.
    Unchanged {
        /// The number of records the host currently holds.
        count: usize,
    },
    /// The table grew past what the caller already had and was read in
    /// full.
    Read {
        /// Every record the host currently holds, oldest first.
        records: Vec<LeapSecondRecord>,
    },
    /// The table should have been readable but the host failed to produce
    /// it.
    ReadFailed {
        /// The number of records the host reported before the read
        /// failed.
        count: usize,
    },
    /// Memory for the records could not be allocated.
    AllocationFailed {
        /// The number of records the host reported.
        count: usize,
    },
}

/// A source of packed leap second records.
///
/// The host registry is the real source; tests script their own. The
/// two-call shape mirrors how the registry is actually queried: size
/// first, then a read into a buffer of that size.
pub(crate) trait LeapSecondSource {
    /// The current size of the packed record data in bytes, or `None`
    /// when the host has no leap second data at all.
    fn size(&mut self) -> Option<usize>;

    /// Fills `buf` with the packed record data. Returns false on failure.
    /// `buf` is exactly as large as the size reported by [`size`].
    ///
    /// [`size`]: LeapSecondSource::size
    fn read(&mut self, buf: &mut [u8]) -> bool;
}

/// Reads the host's current leap second table.
///
/// `previous` is the number of records the caller already holds; when the
/// host's table is no larger than that, nothing is read and
/// [`LeapSecondRead::Unchanged`] reports the current count. Trailing
/// bytes that don't fill a whole record are ignored.
pub fn registry_leap_seconds(previous: usize) -> LeapSecondRead {
    read_from(&mut sys::source(), previous)
}

pub(crate) fn read_from(
    source: &mut dyn LeapSecondSource,
    previous: usize,
) -> LeapSecondRead {
    let Some(byte_size) = source.size() else {
        debug!("host has no leap second information");
        return LeapSecondRead::Unchanged { count: 0 };
    };
    let count = byte_size / RECORD_SIZE;
    if count <= previous {
        return LeapSecondRead::Unchanged { count };
    }
    let mut buf = Vec::new();
    if buf.try_reserve_exact(byte_size).is_err() {
        return LeapSecondRead::AllocationFailed { count };
    }
    buf.resize(byte_size, 0u8);
    if !source.read(&mut buf) {
        warn!("host leap second data reported {count} records but \
               reading them failed");
        return LeapSecondRead::ReadFailed { count };
    }
    let mut records = Vec::new();
    if records.try_reserve_exact(count).is_err() {
        return LeapSecondRead::AllocationFailed { count };
    }
    for chunk in buf.chunks_exact(RECORD_SIZE) {
        let field = |i: usize| {
            u16::from_ne_bytes([chunk[i * 2], chunk[i * 2 + 1]])
        };
        records.push(LeapSecondRecord {
            year: field(0),
            month: field(1),
            day: field(2),
            hour: field(3),
            negative: field(4),
            reserved: field(5),
        });
    }
    LeapSecondRead::Read { records }
}

#[cfg(windows)]
mod sys {
    use windows_sys::Win32::{
        Foundation::{ERROR_MORE_DATA, ERROR_SUCCESS},
        System::Registry::{
            RegCloseKey, RegOpenKeyExW, RegQueryValueExW, HKEY,
            HKEY_LOCAL_MACHINE, KEY_READ,
        },
    };

    use super::LeapSecondSource;

    const SUBKEY: &str =
        r"SYSTEM\CurrentControlSet\Control\LeapSecondInformation";
    const VALUE: &str = "LeapSeconds";

    /// NUL terminated UTF-16, as the registry API wants its names.
    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub(super) fn source() -> RegistrySource {
        RegistrySource { key: None }
    }

    /// The `LeapSecondInformation` registry value.
    ///
    /// The key is opened on the first size query and held across the
    /// subsequent read so both observe the same value.
    pub(super) struct RegistrySource {
        key: Option<HKEY>,
    }

    impl RegistrySource {
        fn open(&mut self) -> Option<HKEY> {
            if let Some(key) = self.key {
                return Some(key);
            }
            let subkey = wide(SUBKEY);
            let mut key: HKEY = std::ptr::null_mut();
            let status = unsafe {
                RegOpenKeyExW(
                    HKEY_LOCAL_MACHINE,
                    subkey.as_ptr(),
                    0,
                    KEY_READ,
                    &mut key,
                )
            };
            if status != ERROR_SUCCESS {
                // The key simply doesn't exist on hosts predating leap
                // second tracking.
                debug!(
                    "could not open leap second registry key \
                     (status {status})",
                );
                return None;
            }
            self.key = Some(key);
            Some(key)
        }
    }

    impl LeapSecondSource for RegistrySource {
        fn size(&mut self) -> Option<usize> {
            let key = self.open()?;
            let value = wide(VALUE);
            let mut byte_size: u32 = 0;
            let status = unsafe {
                RegQueryValueExW(
                    key,
                    value.as_ptr(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    &mut byte_size,
                )
            };
            if status != ERROR_SUCCESS {
                return None;
            }
            Some(byte_size as usize)
        }

        fn read(&mut self, buf: &mut [u8]) -> bool {
            let Some(key) = self.open() else { return false };
            let value = wide(VALUE);
            let mut byte_size = buf.len() as u32;
            let status = unsafe {
                RegQueryValueExW(
                    key,
                    value.as_ptr(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    buf.as_mut_ptr(),
                    &mut byte_size,
                )
            };
            // The value growing between the size query and the read shows
            // up as ERROR_MORE_DATA with `buf` filled to capacity. The
            // caller asked for the records that existed at the size
            // query, and those are all present, so that is a success.
            status == ERROR_SUCCESS
                || (status == ERROR_MORE_DATA
                    && byte_size as usize >= buf.len())
        }
    }

    impl Drop for RegistrySource {
        fn drop(&mut self) {
            if let Some(key) = self.key.take() {
                unsafe { RegCloseKey(key) };
            }
        }
    }
}

#[cfg(not(windows))]
mod sys {
    use super::LeapSecondSource;

    pub(super) fn source() -> NoSource {
        NoSource
    }

    /// This host keeps no leap second table, which reads the same as a
    /// Windows host without the registry value.
    pub(super) struct NoSource;

    impl LeapSecondSource for NoSource {
        fn size(&mut self) -> Option<usize> {
            None
        }

        fn read(&mut self, _buf: &mut [u8]) -> bool {
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A scripted source that counts how often it is consulted.
    pub(crate) struct Scripted {
        pub(crate) data: Option<Vec<u8>>,
        pub(crate) fail_read: bool,
        pub(crate) size_calls: usize,
        pub(crate) read_calls: usize,
    }

    impl Scripted {
        pub(crate) fn with_records(
            records: &[LeapSecondRecord],
        ) -> Scripted {
            let mut data = Vec::new();
            for rec in records {
                for field in [
                    rec.year,
                    rec.month,
                    rec.day,
                    rec.hour,
                    rec.negative,
                    rec.reserved,
                ] {
                    data.extend_from_slice(&field.to_ne_bytes());
                }
            }
            Scripted {
                data: Some(data),
                fail_read: false,
                size_calls: 0,
                read_calls: 0,
            }
        }
    }

    impl LeapSecondSource for Scripted {
        fn size(&mut self) -> Option<usize> {
            self.size_calls += 1;
            self.data.as_ref().map(Vec::len)
        }

        fn read(&mut self, buf: &mut [u8]) -> bool {
            self.read_calls += 1;
            if self.fail_read {
                return false;
            }
            match self.data.as_ref() {
                Some(data) => {
                    buf.copy_from_slice(&data[..buf.len()]);
                    true
                }
                None => false,
            }
        }
    }

    const JUNE_2015: LeapSecondRecord = LeapSecondRecord {
        year: 2015,
        month: 6,
        day: 30,
        hour: 23,
        negative: 0,
        reserved: 0,
    };
    const DEC_2016: LeapSecondRecord = LeapSecondRecord {
        year: 2016,
        month: 12,
        day: 31,
        hour: 23,
        negative: 0,
        reserved: 0,
    };

    #[test]
    fn missing_table_is_unchanged_zero() {
        let mut source = Scripted {
            data: None,
            fail_read: false,
            size_calls: 0,
            read_calls: 0,
        };
        let got = read_from(&mut source, 0);
        assert_eq!(got, LeapSecondRead::Unchanged { count: 0 });
        assert_eq!(source.read_calls, 0);
    }

    #[test]
    fn no_growth_reads_nothing() {
        let mut source = Scripted::with_records(&[JUNE_2015, DEC_2016]);
        let got = read_from(&mut source, 2);
        assert_eq!(got, LeapSecondRead::Unchanged { count: 2 });
        assert_eq!(got, read_from(&mut source, 3));
        assert_eq!(source.read_calls, 0);
    }

    #[test]
    fn growth_reads_full_table() {
        let mut source = Scripted::with_records(&[JUNE_2015, DEC_2016]);
        let got = read_from(&mut source, 1);
        assert_eq!(
            got,
            LeapSecondRead::Read { records: vec![JUNE_2015, DEC_2016] },
        );
        assert_eq!(source.read_calls, 1);
    }

    #[test]
    fn first_read_takes_everything() {
        let mut source = Scripted::with_records(&[JUNE_2015]);
        let got = read_from(&mut source, 0);
        assert_eq!(
            got,
            LeapSecondRead::Read { records: vec![JUNE_2015] },
        );
    }

    #[test]
    fn failed_read_reports_count() {
        let mut source = Scripted::with_records(&[JUNE_2015, DEC_2016]);
        source.fail_read = true;
        let got = read_from(&mut source, 0);
        assert_eq!(got, LeapSecondRead::ReadFailed { count: 2 });
    }

    #[test]
    fn trailing_partial_record_is_ignored() {
        let mut source = Scripted::with_records(&[JUNE_2015, DEC_2016]);
        // Truncate mid-record: the count rounds down.
        source.data.as_mut().unwrap().truncate(2 * 12 + 5);
        let got = read_from(&mut source, 0);
        assert_eq!(
            got,
            LeapSecondRead::Read { records: vec![JUNE_2015, DEC_2016] },
        );
        let mut source = Scripted::with_records(&[JUNE_2015, DEC_2016]);
        source.data.as_mut().unwrap().truncate(12 + 11);
        let got = read_from(&mut source, 1);
        assert_eq!(got, LeapSecondRead::Unchanged { count: 1 });
    }

    #[test]
    fn empty_value_is_unchanged_zero() {
        let mut source = Scripted::with_records(&[]);
        let got = read_from(&mut source, 0);
        assert_eq!(got, LeapSecondRead::Unchanged { count: 0 });
    }
}
