/*!
Discovery of the real timezone data provider on Windows: the system ICU.

`icu.dll` ships with Windows 10 1703+, but this crate treats it as
optional: older hosts simply don't have it, and that is a normal outcome.
The module is loaded from the trusted system directory only, never via the
default search order, so a DLL planted next to the executable can never be
bound as the provider.
*/

use std::ffi::{c_char, c_int, c_void, CStr};

use libloading::os::windows::{Library, LOAD_LIBRARY_SEARCH_SYSTEM32};

use crate::{
    buffer::Status,
    error::{err, Error},
    provider::{Enumeration, Provider},
};

const ICU_MODULE: &str = "icu.dll";

// ICU's C API types, as much of them as the seven calls need.
type UChar = u16;
type UBool = i8;
type UErrorCode = i32;

const U_ZERO_ERROR: UErrorCode = 0;
const U_BUFFER_OVERFLOW_ERROR: UErrorCode = 15;
// UCAL_ZONE_TYPE_ANY: enumerate canonical zones and their links alike.
const ZONE_TYPE_ANY: c_int = 0;

fn is_failure(status: UErrorCode) -> bool {
    status > U_ZERO_ERROR
}

type UcalGetCanonicalTimeZoneId = unsafe extern "C" fn(
    id: *const UChar,
    len: i32,
    result: *mut UChar,
    result_capacity: i32,
    is_system_id: *mut UBool,
    status: *mut UErrorCode,
) -> i32;
type UcalGetDefaultTimeZone = unsafe extern "C" fn(
    result: *mut UChar,
    result_capacity: i32,
    status: *mut UErrorCode,
) -> i32;
type UcalGetTzDataVersion =
    unsafe extern "C" fn(status: *mut UErrorCode) -> *const c_char;
type UcalOpenTimeZoneIdEnumeration = unsafe extern "C" fn(
    zone_type: c_int,
    region: *const c_char,
    raw_offset: *const i32,
    status: *mut UErrorCode,
) -> *mut c_void;
type UenumClose = unsafe extern "C" fn(en: *mut c_void);
type UenumCount =
    unsafe extern "C" fn(en: *mut c_void, status: *mut UErrorCode) -> i32;
type UenumUnext = unsafe extern "C" fn(
    en: *mut c_void,
    result_length: *mut i32,
    status: *mut UErrorCode,
) -> *const UChar;

/// The resolved ICU entry point table.
///
/// Once built, this is immutable: the function pointers live exactly as
/// long as `_library`, and the binding that owns this table never drops
/// it.
pub(crate) struct Icu {
    ucal_get_canonical_time_zone_id: UcalGetCanonicalTimeZoneId,
    ucal_get_default_time_zone: UcalGetDefaultTimeZone,
    ucal_get_tz_data_version: UcalGetTzDataVersion,
    ucal_open_time_zone_id_enumeration: UcalOpenTimeZoneIdEnumeration,
    uenum_close: UenumClose,
    uenum_count: UenumCount,
    uenum_unext: UenumUnext,
    _library: Library,
}

// Safety: ICU's ucal/uenum calls are thread safe, and the table itself is
// immutable after construction.
unsafe impl Send for Icu {}
unsafe impl Sync for Icu {}

impl Icu {
    /// Loads `icu.dll` from the system directory and resolves every
    /// required entry point.
    ///
    /// All seven symbols are resolved even after one fails, but the
    /// *first* failure is the one reported: a later successful lookup
    /// must not mask it.
    pub(crate) fn load() -> Result<Icu, Error> {
        debug!("attempting to load {ICU_MODULE} from the system directory");
        let library = unsafe {
            Library::load_with_flags(ICU_MODULE, LOAD_LIBRARY_SEARCH_SYSTEM32)
        }
        .map_err(|e| {
            Error::host_last_os()
                .context(err!("failed to load {ICU_MODULE}: {e}"))
        })?;
        debug!("loaded {ICU_MODULE}, resolving entry points");

        // Every symbol is probed even after one fails, but only the
        // first failure is reported; a later successful lookup must not
        // mask it.
        let mut first_err: Option<Error> = None;
        let canonical = pick(
            symbol(&library, b"ucal_getCanonicalTimeZoneID\0"),
            &mut first_err,
        );
        let default = pick(
            symbol(&library, b"ucal_getDefaultTimeZone\0"),
            &mut first_err,
        );
        let version = pick(
            symbol(&library, b"ucal_getTZDataVersion\0"),
            &mut first_err,
        );
        let open = pick(
            symbol(&library, b"ucal_openTimeZoneIDEnumeration\0"),
            &mut first_err,
        );
        let close = pick(symbol(&library, b"uenum_close\0"), &mut first_err);
        let count = pick(symbol(&library, b"uenum_count\0"), &mut first_err);
        let unext = pick(symbol(&library, b"uenum_unext\0"), &mut first_err);
        if let Some(err) = first_err {
            return Err(err);
        }
        let (
            Some(ucal_get_canonical_time_zone_id),
            Some(ucal_get_default_time_zone),
            Some(ucal_get_tz_data_version),
            Some(ucal_open_time_zone_id_enumeration),
            Some(uenum_close),
            Some(uenum_count),
            Some(uenum_unext),
        ) = (canonical, default, version, open, close, count, unext)
        else {
            // Unreachable: a missing value always set `first_err`.
            return Err(Error::host(None));
        };
        Ok(Icu {
            ucal_get_canonical_time_zone_id,
            ucal_get_default_time_zone,
            ucal_get_tz_data_version,
            ucal_open_time_zone_id_enumeration,
            uenum_close,
            uenum_count,
            uenum_unext,
            _library: library,
        })
    }
}

/// Resolves one entry point, capturing the OS error code on failure.
fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, Error> {
    match unsafe { library.get::<T>(name) } {
        Ok(sym) => Ok(*sym),
        Err(e) => {
            let display = String::from_utf8_lossy(
                name.strip_suffix(b"\0").unwrap_or(name),
            );
            Err(Error::host_last_os().context(err!(
                "failed to resolve {display} in {ICU_MODULE}: {e}"
            )))
        }
    }
}

fn pick<T>(
    result: Result<T, Error>,
    first_err: &mut Option<Error>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            if first_err.is_none() {
                *first_err = Some(err);
            }
            None
        }
    }
}

impl Provider for Icu {
    fn data_version(&self) -> Result<String, Error> {
        let mut status = U_ZERO_ERROR;
        let ptr = unsafe { (self.ucal_get_tz_data_version)(&mut status) };
        if is_failure(status) || ptr.is_null() {
            return Err(Error::provider(status)
                .context(err!("fetching timezone data version")));
        }
        // Safety: on success ICU returns a static nul terminated string.
        let version = unsafe { CStr::from_ptr(ptr) };
        Ok(version.to_string_lossy().into_owned())
    }

    fn open_enumeration(&self) -> Result<Box<dyn Enumeration + '_>, Error> {
        let mut status = U_ZERO_ERROR;
        let handle = unsafe {
            (self.ucal_open_time_zone_id_enumeration)(
                ZONE_TYPE_ANY,
                std::ptr::null(),
                std::ptr::null(),
                &mut status,
            )
        };
        if is_failure(status) || handle.is_null() {
            return Err(Error::provider(status)
                .context(err!("opening timezone id enumeration")));
        }
        Ok(Box::new(IcuEnumeration { icu: self, handle }))
    }

    fn canonical_id(&self, id: &[u16], buf: &mut [u16]) -> (i32, Status) {
        let mut status = U_ZERO_ERROR;
        let mut is_system: UBool = 0;
        let len = unsafe {
            (self.ucal_get_canonical_time_zone_id)(
                id.as_ptr(),
                id.len() as i32,
                buf.as_mut_ptr(),
                buf.len() as i32,
                &mut is_system,
                &mut status,
            )
        };
        (len, to_status(status))
    }

    fn default_zone(&self, buf: &mut [u16]) -> (i32, Status) {
        let mut status = U_ZERO_ERROR;
        let len = unsafe {
            (self.ucal_get_default_time_zone)(
                buf.as_mut_ptr(),
                buf.len() as i32,
                &mut status,
            )
        };
        (len, to_status(status))
    }
}

fn to_status(status: UErrorCode) -> Status {
    if status == U_BUFFER_OVERFLOW_ERROR {
        Status::Overflow
    } else if is_failure(status) {
        Status::Fail(status)
    } else {
        Status::Ok
    }
}

struct IcuEnumeration<'a> {
    icu: &'a Icu,
    handle: *mut c_void,
}

impl<'a> Enumeration for IcuEnumeration<'a> {
    fn count(&mut self) -> Result<usize, Error> {
        let mut status = U_ZERO_ERROR;
        let count =
            unsafe { (self.icu.uenum_count)(self.handle, &mut status) };
        if is_failure(status) || count < 0 {
            return Err(Error::provider(status)
                .context(err!("counting timezone ids")));
        }
        Ok(count as usize)
    }

    fn next(&mut self) -> Result<Vec<u16>, Error> {
        let mut len: i32 = 0;
        let mut status = U_ZERO_ERROR;
        let ptr = unsafe {
            (self.icu.uenum_unext)(self.handle, &mut len, &mut status)
        };
        if is_failure(status) || ptr.is_null() || len < 0 {
            return Err(Error::provider(status)
                .context(err!("pulling next timezone id")));
        }
        // Safety: on success ICU returns `len` UTF-16 units valid until
        // the next call on this enumeration. Copy them out now.
        let units = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
        let mut id = Vec::new();
        id.try_reserve_exact(units.len())?;
        id.extend_from_slice(units);
        Ok(id)
    }
}

impl<'a> Drop for IcuEnumeration<'a> {
    fn drop(&mut self) {
        unsafe { (self.icu.uenum_close)(self.handle) };
    }
}
