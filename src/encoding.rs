/*!
The wide-to-narrow encoding bridge.

The provider speaks UTF-16. Callers of this crate get strings in the
host's narrow encoding. On Windows that means converting through the
host's configured ANSI code page; everywhere else the narrow encoding is
UTF-8.
*/

pub(crate) use self::sys::wide_to_narrow;

#[cfg(windows)]
mod sys {
    use windows_sys::Win32::Globalization::{GetACP, WideCharToMultiByte};

    use crate::error::{err, Error, ErrorContext};

    /// Converts a provider-native UTF-16 string into the narrow encoding
    /// expected by callers, using the host's configured code page.
    ///
    /// This is the usual two-phase dance: ask the host for the required
    /// narrow byte count, allocate exactly that, then convert. Any failure
    /// the host reports maps to a host error with the OS error code
    /// captured.
    pub(crate) fn wide_to_narrow(wide: &[u16]) -> Result<String, Error> {
        let code_page = unsafe { GetACP() };
        // An empty identifier would make WideCharToMultiByte report
        // failure rather than a zero length, so handle it up front.
        if wide.is_empty() {
            return Ok(String::new());
        }
        let len = i32::try_from(wide.len())
            .map_err(|_| Error::host(None))
            .context(err!("identifier length overflows conversion API"))?;
        let required = unsafe {
            WideCharToMultiByte(
                code_page,
                0,
                wide.as_ptr(),
                len,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        if required <= 0 {
            return Err(Error::host_last_os());
        }
        let mut narrow = Vec::new();
        narrow.try_reserve_exact(required as usize)?;
        narrow.resize(required as usize, 0u8);
        let written = unsafe {
            WideCharToMultiByte(
                code_page,
                0,
                wide.as_ptr(),
                len,
                narrow.as_mut_ptr(),
                required,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        if written <= 0 {
            return Err(Error::host_last_os());
        }
        narrow.truncate(written as usize);
        // Timezone identifiers are ASCII in practice, but a code page is
        // free to produce bytes a Rust string can't hold. Treat that as a
        // host-level conversion failure.
        String::from_utf8(narrow).map_err(|_| Error::host(None))
    }
}

#[cfg(not(windows))]
mod sys {
    use crate::error::Error;

    /// Converts a provider-native UTF-16 string into the narrow encoding
    /// expected by callers. Off Windows the host narrow encoding is UTF-8.
    pub(crate) fn wide_to_narrow(wide: &[u16]) -> Result<String, Error> {
        String::from_utf16(wide).map_err(|_| Error::host(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trips() {
        let wide: Vec<u16> = "America/New_York".encode_utf16().collect();
        assert_eq!(wide_to_narrow(&wide).unwrap(), "America/New_York");
    }

    #[test]
    fn empty_is_empty() {
        assert_eq!(wide_to_narrow(&[]).unwrap(), "");
    }

    #[cfg(not(windows))]
    #[test]
    fn invalid_utf16_is_a_host_error() {
        // A lone high surrogate.
        let err = wide_to_narrow(&[0xD800]).unwrap_err();
        assert!(err.is_host());
    }
}
