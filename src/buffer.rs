use crate::error::Error;

/// The initial probe buffer size, in UTF-16 units.
///
/// Most timezone identifiers fit. When one doesn't, the provider reports
/// the required length and the query is retried exactly once.
const INITIAL_LEN: usize = 32;

/// The outcome of a single provider call that writes into a caller
/// supplied buffer, paired with the length the provider reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Status {
    /// The call completed. The reported length is the number of units
    /// written (excluding any terminator).
    Ok,
    /// The buffer was too small. The reported length is the required
    /// buffer size.
    Overflow,
    /// Any other provider failure, with its raw status code.
    Fail(i32),
}

/// Runs a sized provider query with at most one buffer growth retry.
///
/// `call` is invoked with a scratch buffer and must return the length the
/// provider reported along with a [`Status`]. The first invocation uses a
/// small fixed-size buffer. If the provider reports `Overflow` with a
/// positive required length, the buffer is reallocated to exactly that
/// length (plus one slot of terminator margin) and `call` runs once more.
/// A second failure, a non-`Overflow` failure, or a non-positive reported
/// length is a terminal provider error. Allocation failure at any point is
/// reported as its own error kind, distinguishable from provider failure.
pub(crate) fn sized_query<F>(mut call: F) -> Result<Vec<u16>, Error>
where
    F: FnMut(&mut [u16]) -> (i32, Status),
{
    let mut buf = zeroed(INITIAL_LEN)?;
    let (len, status) = call(&mut buf);
    match status {
        Status::Ok if len > 0 => {
            buf.truncate(len as usize);
            Ok(buf)
        }
        Status::Overflow if len > 0 => {
            let required = len as usize;
            let mut buf = zeroed(required + 1)?;
            let (len, status) = call(&mut buf);
            if status == Status::Ok && len > 0 {
                buf.truncate(len as usize);
                Ok(buf)
            } else {
                let raw = match status {
                    Status::Fail(raw) => raw,
                    _ => 0,
                };
                Err(Error::provider(raw))
            }
        }
        Status::Fail(raw) => Err(Error::provider(raw)),
        // A "success" with a non-positive length is unusable data.
        Status::Ok | Status::Overflow => Err(Error::provider(0)),
    }
}

/// Fallibly allocates a zero filled UTF-16 buffer of exactly `len` units.
fn zeroed(len: usize) -> Result<Vec<u16>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A provider call that writes `text` when the buffer is big enough and
    // reports an overflow with the required length otherwise, counting how
    // many times it runs.
    fn writes(
        text: Vec<u16>,
        calls: &mut usize,
    ) -> impl FnMut(&mut [u16]) -> (i32, Status) + '_ {
        move |buf: &mut [u16]| {
            *calls += 1;
            if buf.len() >= text.len() {
                buf[..text.len()].copy_from_slice(&text);
                (text.len() as i32, Status::Ok)
            } else {
                (text.len() as i32, Status::Overflow)
            }
        }
    }

    #[test]
    fn fits_on_first_call() {
        let text: Vec<u16> = "America/New_York".encode_utf16().collect();
        let mut calls = 0;
        let got = sized_query(writes(text.clone(), &mut calls)).unwrap();
        assert_eq!(got, text);
        assert_eq!(calls, 1);
    }

    #[test]
    fn grows_exactly_once() {
        let text: Vec<u16> = "X".repeat(100).encode_utf16().collect();
        let mut calls = 0;
        let got = sized_query(writes(text.clone(), &mut calls)).unwrap();
        assert_eq!(got, text);
        assert_eq!(calls, 2);
    }

    #[test]
    fn second_overflow_is_terminal() {
        // A pathological provider that always claims the buffer is too
        // small. The helper must give up after one retry.
        let mut calls = 0;
        let result = sized_query(|_buf| {
            calls += 1;
            (1000, Status::Overflow)
        });
        assert!(result.unwrap_err().is_provider());
        assert_eq!(calls, 2);
    }

    #[test]
    fn failure_status_is_terminal() {
        let mut calls = 0;
        let result = sized_query(|_buf| {
            calls += 1;
            (0, Status::Fail(5))
        });
        assert!(result.unwrap_err().is_provider());
        assert_eq!(calls, 1);
    }

    #[test]
    fn non_positive_length_is_unusable() {
        let result = sized_query(|_buf| (0, Status::Ok));
        assert!(result.unwrap_err().is_provider());
        let result = sized_query(|_buf| (-1, Status::Ok));
        assert!(result.unwrap_err().is_provider());
    }

    #[test]
    fn overflow_with_non_positive_length_is_unusable() {
        let result = sized_query(|_buf| (0, Status::Overflow));
        assert!(result.unwrap_err().is_provider());
    }

    #[test]
    fn retry_failure_is_provider_error() {
        let mut calls = 0;
        let result = sized_query(|_buf| {
            calls += 1;
            if calls == 1 {
                (64, Status::Overflow)
            } else {
                (0, Status::Fail(27))
            }
        });
        assert!(result.unwrap_err().is_provider());
        assert_eq!(calls, 2);
    }
}
