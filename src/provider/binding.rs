use std::sync::atomic::{
    AtomicPtr, AtomicUsize,
    Ordering::{AcqRel, Acquire, Release},
};

use crate::error::Error;

/// The state of the process-wide provider binding.
///
/// `Failed` and `Bound` are terminal: once either is observed, it is the
/// binding's state for the remaining life of the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderState {
    /// No caller has attempted to bind the provider yet.
    NotSet,
    /// A caller is currently loading the provider and resolving its entry
    /// points.
    Detecting,
    /// Loading failed. The provider is unavailable for this process.
    Failed,
    /// The provider is bound and every required entry point is resolved.
    Bound,
}

const NOT_SET: usize = 0;
const DETECTING: usize = 1;
const FAILED: usize = 2;
const BOUND: usize = 3;

/// A lazily populated, process-lifetime binding to a value of type `T`.
///
/// This is the once-only concurrent initialization at the heart of the
/// provider resolver. The value is built in full by exactly one winning
/// caller and then published through a single atomic pointer, so any
/// caller that observes the `Bound` state is guaranteed to see the
/// completely initialized value. The binding is immortal: the value is
/// leaked on purpose and never torn down.
#[derive(Debug)]
pub(crate) struct Binding<T> {
    state: AtomicUsize,
    snapshot: AtomicPtr<T>,
}

impl<T: Send + Sync + 'static> Binding<T> {
    /// Creates an empty binding in the `NotSet` state.
    pub(crate) const fn new() -> Binding<T> {
        Binding {
            state: AtomicUsize::new(NOT_SET),
            snapshot: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Returns the bound value, loading it via `load` if this is the
    /// first use.
    ///
    /// Exactly one caller ever runs `load`, even under unbounded
    /// concurrent first use. Callers that lose the race wait for the
    /// winner to publish a terminal state rather than re-entering
    /// detection. Once a terminal state is published, this is a cheap
    /// atomic read and `load` is never invoked again.
    ///
    /// Returns `None` when the binding is (or ends up) `Failed`.
    pub(crate) fn acquire(
        &self,
        load: impl FnOnce() -> Result<T, Error>,
    ) -> Option<&T> {
        let mut state = self.state.load(Acquire);
        loop {
            match state {
                BOUND => return self.value(),
                FAILED => return None,
                DETECTING => {
                    // Another caller is mid-detection. Its result is
                    // imminent, so just wait for it to publish.
                    std::thread::yield_now();
                    state = self.state.load(Acquire);
                }
                _ => {
                    match self.state.compare_exchange_weak(
                        NOT_SET, DETECTING, AcqRel, Acquire,
                    ) {
                        Ok(_) => break,
                        Err(observed) => state = observed,
                    }
                }
            }
        }
        // This caller won the transition to `Detecting` and is the one
        // that performs the load.
        match load() {
            Ok(value) => {
                let leaked = Box::into_raw(Box::new(value));
                // The snapshot must be visible before the state is, so
                // that an acquire read of `Bound` implies a valid pointer.
                self.snapshot.store(leaked, Release);
                self.state.store(BOUND, Release);
                // OK because we just stored a non-null snapshot.
                self.value()
            }
            Err(err) => {
                warn!("failed to bind timezone data provider: {err}");
                self.state.store(FAILED, Release);
                None
            }
        }
    }

    /// Returns the current binding state without attempting a bind.
    pub(crate) fn state(&self) -> ProviderState {
        match self.state.load(Acquire) {
            NOT_SET => ProviderState::NotSet,
            DETECTING => ProviderState::Detecting,
            FAILED => ProviderState::Failed,
            _ => ProviderState::Bound,
        }
    }

    fn value(&self) -> Option<&T> {
        let ptr = self.snapshot.load(Acquire);
        // Safety: the snapshot is only ever set once, to a pointer leaked
        // from a `Box`, and is never mutated or freed afterwards.
        unsafe { ptr.as_ref() }
    }
}
