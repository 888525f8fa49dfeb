use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide "generation in progress" flag.
///
/// Acquisition is fail-fast: a second caller gets `None` immediately rather
/// than queueing. The returned permit releases the flag on drop, so every
/// exit path — success, error, panic — releases it.
#[derive(Clone, Default)]
pub struct GenerationGuard {
    busy: Arc<AtomicBool>,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<GenerationPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GenerationPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

pub struct GenerationPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for GenerationPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_sets_busy() {
        let guard = GenerationGuard::new();
        assert!(!guard.is_busy());
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_busy());
        drop(permit);
        assert!(!guard.is_busy());
    }

    #[test]
    fn second_acquire_fails_fast() {
        let guard = GenerationGuard::new();
        let _permit = guard.try_acquire().unwrap();
        assert!(guard.try_acquire().is_none());
    }

    #[test]
    fn released_on_panic() {
        let guard = GenerationGuard::new();
        let cloned = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire().unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn reacquire_after_release() {
        let guard = GenerationGuard::new();
        for _ in 0..3 {
            let permit = guard.try_acquire().unwrap();
            drop(permit);
        }
        assert!(!guard.is_busy());
    }

    #[test]
    fn clones_share_the_flag() {
        let guard = GenerationGuard::new();
        let other = guard.clone();
        let _permit = guard.try_acquire().unwrap();
        assert!(other.is_busy());
        assert!(other.try_acquire().is_none());
    }
}
