/*!
The C interface.

Everything handed across this boundary is allocated through the process
allocator via [`tzhost_calloc`] and released via [`tzhost_free`]; the
`tzhost_delete_*` entry points are compositions of `tzhost_free` over the
matching result shape. Callers therefore have exactly one allocator to
agree with, and any single pointer received from this interface may be
released with `tzhost_free` directly.

Result structs are allocated zeroed and filled in place, so a partially
populated result (which [`tzhost_get_time_zones`] produces on provider
failure mid-enumeration) is always safe to delete: unfilled slots are
null and `free(NULL)` is a no-op.
*/

use std::ffi::{c_char, c_void};

use crate::{
    db::{db, default_zone_with, enumerate_with, Enumerated},
    error::Error,
    leap::{registry_leap_seconds, LeapSecondRead, LeapSecondRecord},
};

/// The outcome of a C interface call, beyond what null-ness expresses.
///
/// Allocation failure is not represented here: it is reported by
/// returning null from the entry point itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub enum ErrorCode {
    /// The call succeeded in full.
    Success = 0,
    /// The host operating system failed, including the case where the
    /// timezone data provider is not available on this host.
    HostError = 1,
    /// The timezone data provider reported a failure or returned
    /// unusable data.
    ProviderError = 2,
}

/// The result of [`tzhost_get_time_zones`].
#[repr(C)]
pub struct TimeZonesInfo {
    /// The overall outcome. On anything other than `Success` the other
    /// fields may be partially populated.
    pub error: ErrorCode,
    /// The timezone data version, or null when fetching it failed.
    pub version: *const c_char,
    /// The number of slots in `names` and `links`.
    pub num_time_zones: usize,
    /// One identifier per time zone. Slots past the point of a
    /// mid-enumeration failure are null.
    pub names: *mut *const c_char,
    /// Parallel to `names`: the canonical identifier when the name is an
    /// alias, null otherwise.
    pub links: *mut *const c_char,
}

/// The result of [`tzhost_get_current_zone`].
#[repr(C)]
pub struct CurrentZoneInfo {
    /// The overall outcome.
    pub error: ErrorCode,
    /// The host's current timezone identifier, or null on failure.
    pub name: *const c_char,
}

/// Allocates `count * size` bytes of zeroed memory from the process
/// allocator. Returns null on failure.
#[no_mangle]
pub extern "C" fn tzhost_calloc(count: usize, size: usize) -> *mut c_void {
    unsafe { libc::calloc(count, size) }
}

/// Releases memory obtained from this interface. Safe on null.
///
/// # Safety
///
/// `ptr` must be null or a pointer obtained from this interface that has
/// not already been released.
#[no_mangle]
pub unsafe extern "C" fn tzhost_free(ptr: *mut c_void) {
    unsafe { libc::free(ptr) }
}

/// Allocates a zeroed array of `count` values of `T`. Null when `count`
/// is zero or allocation fails.
fn alloc_zeroed<T>(count: usize) -> *mut T {
    if count == 0 {
        return std::ptr::null_mut();
    }
    tzhost_calloc(count, std::mem::size_of::<T>()) as *mut T
}

/// Copies `s` into a freshly allocated NUL terminated C string. Null on
/// allocation failure.
fn dup_str(s: &str) -> *const c_char {
    let ptr = tzhost_calloc(s.len() + 1, 1) as *mut c_char;
    if ptr.is_null() {
        return std::ptr::null();
    }
    // Safety: the allocation is `s.len() + 1` bytes and zeroed, so the
    // copy fits and the terminator is already in place.
    unsafe {
        std::ptr::copy_nonoverlapping(
            s.as_ptr() as *const c_char,
            ptr,
            s.len(),
        );
    }
    ptr
}

fn error_code(err: &Error) -> ErrorCode {
    if err.is_provider() {
        ErrorCode::ProviderError
    } else {
        ErrorCode::HostError
    }
}

/// Enumerates the host's time zones.
///
/// Returns null only when memory for the result could not be allocated.
/// Otherwise the returned struct is owned by the caller and must be
/// released with [`tzhost_delete_time_zones`]; its `error` field reports
/// any host or provider failure, in which case the remaining fields hold
/// whatever was produced before the failure.
#[no_mangle]
pub extern "C" fn tzhost_get_time_zones() -> *mut TimeZonesInfo {
    let info = alloc_zeroed::<TimeZonesInfo>(1);
    if info.is_null() {
        return std::ptr::null_mut();
    }
    // Safety: `info` is a valid zeroed allocation of one `TimeZonesInfo`,
    // and a zeroed `ErrorCode` is `Success`.
    let result = match db().acquire_provider() {
        Ok(provider) => enumerate_with(&**provider),
        Err(err) => {
            unsafe { (*info).error = error_code(&err) };
            return info;
        }
    };
    match fill_time_zones(info, result) {
        Ok(()) => info,
        Err(Exhausted) => {
            // Allocation failed partway through. Release everything
            // populated so far and report via null.
            unsafe { tzhost_delete_time_zones(info) };
            std::ptr::null_mut()
        }
    }
}

/// Marker for allocation failure while populating a result.
struct Exhausted;

fn fill_time_zones(
    info: *mut TimeZonesInfo,
    result: Enumerated,
) -> Result<(), Exhausted> {
    // Safety: `info` points at a valid zeroed `TimeZonesInfo` that this
    // function alone is populating.
    let info = unsafe { &mut *info };
    if let Some(ref version) = result.version {
        info.version = dup_str(version);
        if info.version.is_null() {
            return Err(Exhausted);
        }
    }
    info.num_time_zones = result.count;
    if result.count > 0 {
        info.names = alloc_zeroed::<*const c_char>(result.count);
        info.links = alloc_zeroed::<*const c_char>(result.count);
        if info.names.is_null() || info.links.is_null() {
            return Err(Exhausted);
        }
        for (i, entry) in result.entries.iter().enumerate() {
            let name = dup_str(entry.name());
            if name.is_null() {
                return Err(Exhausted);
            }
            // Safety: `i < count` and both arrays have `count` slots.
            unsafe { *info.names.add(i) = name };
            if let Some(link) = entry.link() {
                let link = dup_str(link);
                if link.is_null() {
                    return Err(Exhausted);
                }
                unsafe { *info.links.add(i) = link };
            }
        }
    }
    info.error = match result.err {
        None => ErrorCode::Success,
        Some(ref err) if err.is_allocation() => return Err(Exhausted),
        Some(ref err) => error_code(err),
    };
    Ok(())
}

/// Releases a result of [`tzhost_get_time_zones`]. Safe on null and on
/// partially populated results.
///
/// # Safety
///
/// `info` must be null or an unreleased pointer returned by
/// [`tzhost_get_time_zones`].
#[no_mangle]
pub unsafe extern "C" fn tzhost_delete_time_zones(info: *mut TimeZonesInfo) {
    if info.is_null() {
        return;
    }
    // Safety: per the contract, `info` came from `tzhost_get_time_zones`,
    // so every non-null pointer in it is an unreleased allocation from
    // this interface and both arrays (when present) have
    // `num_time_zones` slots.
    unsafe {
        let info = &mut *info;
        for column in [info.names, info.links] {
            if column.is_null() {
                continue;
            }
            for i in 0..info.num_time_zones {
                tzhost_free(*column.add(i) as *mut c_void);
            }
            tzhost_free(column as *mut c_void);
        }
        tzhost_free(info.version as *mut c_void);
        tzhost_free(info as *mut TimeZonesInfo as *mut c_void);
    }
}

/// Reports the host's current time zone.
///
/// Returns null only when memory for the result could not be allocated;
/// the returned struct must be released with
/// [`tzhost_delete_current_zone`].
#[no_mangle]
pub extern "C" fn tzhost_get_current_zone() -> *mut CurrentZoneInfo {
    let info = alloc_zeroed::<CurrentZoneInfo>(1);
    if info.is_null() {
        return std::ptr::null_mut();
    }
    let result = db()
        .acquire_provider()
        .and_then(|provider| default_zone_with(&**provider));
    // Safety: `info` is a valid zeroed allocation of one
    // `CurrentZoneInfo`.
    unsafe {
        match result {
            Ok(name) => {
                (*info).name = dup_str(&name);
                if (*info).name.is_null() {
                    tzhost_free(info as *mut c_void);
                    return std::ptr::null_mut();
                }
            }
            Err(ref err) if err.is_allocation() => {
                tzhost_free(info as *mut c_void);
                return std::ptr::null_mut();
            }
            Err(ref err) => (*info).error = error_code(err),
        }
    }
    info
}

/// Releases a result of [`tzhost_get_current_zone`]. Safe on null.
///
/// # Safety
///
/// `info` must be null or an unreleased pointer returned by
/// [`tzhost_get_current_zone`].
#[no_mangle]
pub unsafe extern "C" fn tzhost_delete_current_zone(
    info: *mut CurrentZoneInfo,
) {
    if info.is_null() {
        return;
    }
    // Safety: per the contract, both pointers are unreleased allocations
    // from this interface.
    unsafe {
        tzhost_free((*info).name as *mut c_void);
        tzhost_free(info as *mut c_void);
    }
}

/// Reads the leap second records the host has accumulated since its
/// built-in table was frozen.
///
/// `previous` is the record count the caller already holds. The current
/// count is always written to `*out_count`, and the return value
/// disambiguates the outcome:
///
/// * records returned, `*out_count` is their number: the table grew and
///   was read in full;
/// * null with `*out_count <= previous`: nothing new (a host without
///   leap second data reports zero);
/// * null with `*out_count > previous`: memory for the records could not
///   be allocated;
/// * non-null with `*out_count == 0`: the host failed to produce a table
///   it claimed to have. The returned buffer is zeroed and owned by the
///   caller.
///
/// Release the result with [`tzhost_delete_registry_leap_seconds`].
///
/// # Safety
///
/// `out_count` must point to writable memory for one `usize`.
#[no_mangle]
pub unsafe extern "C" fn tzhost_get_registry_leap_seconds(
    previous: usize,
    out_count: *mut usize,
) -> *mut LeapSecondRecord {
    let read = std::panic::catch_unwind(|| registry_leap_seconds(previous))
        .unwrap_or(LeapSecondRead::Unchanged { count: 0 });
    let (buffer, count) = leap_buffer_from(read);
    // Safety: the caller promises `out_count` is writable.
    unsafe { *out_count = count };
    buffer
}

fn leap_buffer_from(
    read: LeapSecondRead,
) -> (*mut LeapSecondRecord, usize) {
    match read {
        LeapSecondRead::Unchanged { count }
        | LeapSecondRead::AllocationFailed { count } => {
            (std::ptr::null_mut(), count)
        }
        LeapSecondRead::Read { records } => {
            let buffer = alloc_zeroed::<LeapSecondRecord>(records.len());
            if buffer.is_null() {
                // Degrades to the allocation failure shape: null with a
                // count the caller will see as growth.
                return (std::ptr::null_mut(), records.len());
            }
            // Safety: `buffer` holds exactly `records.len()` records.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    records.as_ptr(),
                    buffer,
                    records.len(),
                );
            }
            (buffer, records.len())
        }
        LeapSecondRead::ReadFailed { count } => {
            // The failed-read shape is a present buffer with a zero
            // count. The buffer stays zeroed.
            let buffer = alloc_zeroed::<LeapSecondRecord>(count);
            if buffer.is_null() {
                return (std::ptr::null_mut(), count);
            }
            (buffer, 0)
        }
    }
}

/// Releases a result of [`tzhost_get_registry_leap_seconds`]. Safe on
/// null.
///
/// # Safety
///
/// `records` must be null or an unreleased pointer returned by
/// [`tzhost_get_registry_leap_seconds`].
#[no_mangle]
pub unsafe extern "C" fn tzhost_delete_registry_leap_seconds(
    records: *mut LeapSecondRecord,
) {
    unsafe { tzhost_free(records as *mut c_void) }
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use crate::db::tests::Mock;

    use super::*;

    unsafe fn narrow(ptr: *const c_char) -> &'static str {
        CStr::from_ptr(ptr).to_str().unwrap()
    }

    #[test]
    fn calloc_zero_initializes() {
        let ptr = tzhost_calloc(4, 8) as *mut u8;
        assert!(!ptr.is_null());
        unsafe {
            for i in 0..32 {
                assert_eq!(*ptr.add(i), 0);
            }
            tzhost_free(ptr as *mut c_void);
        }
    }

    #[test]
    fn deletes_are_safe_on_null() {
        unsafe {
            tzhost_delete_time_zones(std::ptr::null_mut());
            tzhost_delete_current_zone(std::ptr::null_mut());
            tzhost_delete_registry_leap_seconds(std::ptr::null_mut());
        }
    }

    #[test]
    fn time_zones_round_trip() {
        let mock = Mock::new(vec![
            ("America/New_York", "America/New_York"),
            ("US/Eastern", "America/New_York"),
            ("UTC", "UTC"),
        ]);
        let result = enumerate_with(&mock);
        let info = alloc_zeroed::<TimeZonesInfo>(1);
        assert!(!info.is_null());
        assert!(fill_time_zones(info, result).is_ok());
        unsafe {
            assert_eq!((*info).error, ErrorCode::Success);
            assert_eq!(narrow((*info).version), "2021a");
            assert_eq!((*info).num_time_zones, 3);
            assert_eq!(narrow(*(*info).names), "America/New_York");
            assert!((*(*info).links).is_null());
            assert_eq!(narrow(*(*info).names.add(1)), "US/Eastern");
            assert_eq!(
                narrow(*(*info).links.add(1)),
                "America/New_York"
            );
            assert!((*(*info).links.add(2)).is_null());
            tzhost_delete_time_zones(info);
        }
    }

    #[test]
    fn partial_time_zones_are_deletable() {
        let mut mock = Mock::new(vec![
            ("America/New_York", "America/New_York"),
            ("US/Eastern", "America/New_York"),
            ("UTC", "UTC"),
        ]);
        mock.fail_at = Some(1);
        let result = enumerate_with(&mock);
        let info = alloc_zeroed::<TimeZonesInfo>(1);
        assert!(!info.is_null());
        assert!(fill_time_zones(info, result).is_ok());
        unsafe {
            assert_eq!((*info).error, ErrorCode::ProviderError);
            // Counted three, produced one. The remaining slots are null.
            assert_eq!((*info).num_time_zones, 3);
            assert_eq!(narrow(*(*info).names), "America/New_York");
            assert!((*(*info).names.add(1)).is_null());
            assert!((*(*info).names.add(2)).is_null());
            tzhost_delete_time_zones(info);
        }
    }

    #[test]
    fn empty_enumeration_has_null_columns() {
        let result = enumerate_with(&Mock::new(vec![]));
        let info = alloc_zeroed::<TimeZonesInfo>(1);
        assert!(!info.is_null());
        assert!(fill_time_zones(info, result).is_ok());
        unsafe {
            assert_eq!((*info).error, ErrorCode::Success);
            assert_eq!((*info).num_time_zones, 0);
            assert!((*info).names.is_null());
            assert!((*info).links.is_null());
            tzhost_delete_time_zones(info);
        }
    }

    #[test]
    fn allocation_failure_in_result_aborts_fill() {
        let result = Enumerated {
            version: Some("2021a".to_string()),
            count: 0,
            entries: Vec::new(),
            err: Some(Error::allocation()),
        };
        let info = alloc_zeroed::<TimeZonesInfo>(1);
        assert!(!info.is_null());
        assert!(fill_time_zones(info, result).is_err());
        unsafe { tzhost_delete_time_zones(info) };
    }

    #[cfg(not(windows))]
    #[test]
    fn unavailable_provider_reports_host_error() {
        let info = tzhost_get_time_zones();
        assert!(!info.is_null());
        unsafe {
            assert_eq!((*info).error, ErrorCode::HostError);
            assert!((*info).version.is_null());
            assert_eq!((*info).num_time_zones, 0);
            assert!((*info).names.is_null());
            assert!((*info).links.is_null());
            tzhost_delete_time_zones(info);
        }

        let info = tzhost_get_current_zone();
        assert!(!info.is_null());
        unsafe {
            assert_eq!((*info).error, ErrorCode::HostError);
            assert!((*info).name.is_null());
            tzhost_delete_current_zone(info);
        }
    }

    #[test]
    fn leap_rows_encode_as_nullness_and_count() {
        let record = LeapSecondRecord {
            year: 2016,
            month: 12,
            day: 31,
            hour: 23,
            negative: 0,
            reserved: 0,
        };

        let (buf, count) =
            leap_buffer_from(LeapSecondRead::Unchanged { count: 2 });
        assert!(buf.is_null());
        assert_eq!(count, 2);

        let (buf, count) = leap_buffer_from(LeapSecondRead::Read {
            records: vec![record, record],
        });
        assert!(!buf.is_null());
        assert_eq!(count, 2);
        unsafe {
            assert_eq!(*buf, record);
            tzhost_delete_registry_leap_seconds(buf);
        }

        let (buf, count) =
            leap_buffer_from(LeapSecondRead::ReadFailed { count: 3 });
        assert!(!buf.is_null());
        assert_eq!(count, 0);
        unsafe {
            // The failed-read buffer is zeroed.
            assert_eq!((*buf).year, 0);
            tzhost_delete_registry_leap_seconds(buf);
        }

        let (buf, count) = leap_buffer_from(
            LeapSecondRead::AllocationFailed { count: 4 },
        );
        assert!(buf.is_null());
        assert_eq!(count, 4);
    }

    #[cfg(not(windows))]
    #[test]
    fn leap_entry_reports_no_data_on_this_host() {
        let mut count = usize::MAX;
        let buf = unsafe {
            tzhost_get_registry_leap_seconds(0, &mut count)
        };
        assert!(buf.is_null());
        assert_eq!(count, 0);
    }
}
