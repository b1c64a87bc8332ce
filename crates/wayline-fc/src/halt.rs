use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Cancellation token for an in-flight leg.
///
/// `wait` parks the caller until the token fires or the timeout elapses, so
/// arrival polling does not spin.
#[derive(Debug, Default)]
pub struct Halt {
    set: Mutex<bool>,
    cv: Condvar,
}

impl Halt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        *set = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if the token fired before `timeout`.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wait_returns_early_on_trigger() {
        let halt = Arc::new(Halt::new());
        let h = halt.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            h.trigger();
        });
        let start = Instant::now();
        assert!(halt.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();

        halt.reset();
        assert!(!halt.wait(Duration::from_millis(5)));
    }
}
