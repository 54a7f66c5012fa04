use tzhost::{db, registry_leap_seconds, LeapSecondRead, ProviderState};

#[test]
fn database_is_a_singleton() {
    let a = db() as *const _;
    let b = db() as *const _;
    assert_eq!(a, b);
}

#[cfg(not(windows))]
#[test]
fn queries_on_a_host_without_a_provider() {
    let _ = env_logger::try_init();

    let err = db().time_zones().unwrap_err();
    assert!(err.is_host(), "{err}");
    let err = db().current_zone().unwrap_err();
    assert!(err.is_host(), "{err}");
    // The failed bind is terminal for the process.
    assert_eq!(db().provider_state(), ProviderState::Failed);
}

#[cfg(windows)]
#[test]
fn queries_on_a_windows_host() -> anyhow::Result<()> {
    let _ = env_logger::try_init();

    // The provider ships with every supported Windows release, but a
    // host without it must still answer coherently.
    match db().time_zones() {
        Ok(zones) => {
            assert_eq!(db().provider_state(), ProviderState::Bound);
            assert!(!zones.version().is_empty());
            assert!(!zones.entries().is_empty());
            for entry in zones.entries() {
                assert!(!entry.name().is_empty());
                if let Some(link) = entry.link() {
                    assert_ne!(link, entry.name());
                }
            }
            let current = db().current_zone()?;
            assert!(!current.is_empty());
        }
        Err(err) => {
            assert!(err.is_host(), "{err}");
            assert_eq!(db().provider_state(), ProviderState::Failed);
        }
    }
    Ok(())
}

#[test]
fn leap_second_outcomes_are_tagged() {
    // Any host answer is acceptable; the point is that each outcome is
    // distinguishable without sentinel values.
    match registry_leap_seconds(0) {
        LeapSecondRead::Unchanged { count } => assert_eq!(count, 0),
        LeapSecondRead::Read { records } => {
            assert!(!records.is_empty());
            for record in &records {
                assert!((1..=12).contains(&record.month));
            }
            // Asking again with the full count reads nothing new.
            let again = registry_leap_seconds(records.len());
            assert_eq!(
                again,
                LeapSecondRead::Unchanged { count: records.len() },
            );
        }
        LeapSecondRead::ReadFailed { .. }
        | LeapSecondRead::AllocationFailed { .. } => {}
    }
}

#[cfg(not(windows))]
#[test]
fn leap_seconds_absent_off_windows() {
    assert_eq!(
        registry_leap_seconds(0),
        LeapSecondRead::Unchanged { count: 0 },
    );
    assert_eq!(
        registry_leap_seconds(5),
        LeapSecondRead::Unchanged { count: 0 },
    );
}

mod c_interface {
    use tzhost::ffi::{
        tzhost_calloc, tzhost_delete_current_zone,
        tzhost_delete_registry_leap_seconds, tzhost_delete_time_zones,
        tzhost_free, tzhost_get_current_zone,
        tzhost_get_registry_leap_seconds, tzhost_get_time_zones,
        ErrorCode,
    };

    #[test]
    fn allocation_facade_round_trips() {
        let ptr = tzhost_calloc(16, 4);
        assert!(!ptr.is_null());
        unsafe { tzhost_free(ptr) };
    }

    #[test]
    fn results_are_never_dangling() {
        let info = tzhost_get_time_zones();
        assert!(!info.is_null());
        unsafe {
            if (*info).error == ErrorCode::Success {
                assert!(!(*info).version.is_null());
            }
            tzhost_delete_time_zones(info);
        }

        let info = tzhost_get_current_zone();
        assert!(!info.is_null());
        unsafe {
            if (*info).error == ErrorCode::Success {
                assert!(!(*info).name.is_null());
            } else {
                assert!((*info).name.is_null());
            }
            tzhost_delete_current_zone(info);
        }

        let mut count = usize::MAX;
        let records =
            unsafe { tzhost_get_registry_leap_seconds(0, &mut count) };
        assert_ne!(count, usize::MAX);
        unsafe { tzhost_delete_registry_leap_seconds(records) };
    }
}
