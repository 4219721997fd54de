use core::cell::RefCell;
use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

/// Upper bound on concurrently parked waiters. Registering past it wakes
/// every waiter early, which then simply re-registers.
const MAX_WAITERS: usize = 8;

/// One-shot latch telling every pipeline task to wind down.
///
/// Unlike a `Signal`, any number of tasks can wait on it and all of them
/// observe the trigger. Once set it stays set.
pub struct Shutdown {
    triggered: AtomicBool,
    waiters: Mutex<CriticalSectionRawMutex, RefCell<MultiWakerRegistration<MAX_WAITERS>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub const fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            waiters: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.waiters.lock(|waiters| waiters.borrow_mut().wake());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Resolve once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.is_triggered() {
                return Poll::Ready(());
            }
            self.waiters
                .lock(|waiters| waiters.borrow_mut().register(cx.waker()));
            // A trigger may have landed between the check and the registration.
            if self.is_triggered() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join3;
    use embassy_futures::select::{Either, select};
    use embassy_time::Timer;

    #[test]
    fn test_wait_returns_after_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        block_on(shutdown.wait());
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_every_waiter_is_released() {
        let shutdown = Shutdown::new();

        block_on(join3(shutdown.wait(), shutdown.wait(), async {
            Timer::after_millis(5).await;
            shutdown.trigger();
        }));

        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_wait_stays_pending_until_triggered() {
        let shutdown = Shutdown::new();

        let result = block_on(select(shutdown.wait(), Timer::after_millis(5)));

        assert!(matches!(result, Either::Second(())));
        assert!(!shutdown.is_triggered());
    }
}
