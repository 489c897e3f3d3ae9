// LogRelay - app/poller.rs
//
// Poll source: the fixed-interval trigger that backs up (or replaces) native
// notifications.
//
// Architecture:
//   - One background thread wakes every `poll_interval` and runs the sweep
//     callback, which submits every active path to the dispatcher. A path
//     whose size has not changed costs one stat.
//   - Every `rescan_interval` the thread also runs the rescan callback, which
//     re-lists the log directory and discovers files the event source missed.
//     The rescan runs on its own sub-thread and at most one is in flight, so
//     a directory listing stalled on a slow mounted volume never delays the
//     sweep.
//   - An `Arc<AtomicBool>` cancel flag stops the thread. The loop sleeps in
//     CANCEL_CHECK_INTERVAL_MS slices so cancellation is noticed promptly.
//     The rescan callback receives the same flag, and `stop` waits for an
//     in-flight rescan, so no rescan work happens after `stop` returns.

use crate::util::constants::CANCEL_CHECK_INTERVAL_MS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Sweep = Arc<dyn Fn() + Send + Sync>;
type Rescan = Arc<dyn Fn(&AtomicBool) + Send + Sync>;

/// Running poll source. Dropping it stops the thread.
pub struct PollSource {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollSource {
    /// Start the timer thread. `rescan` should return early once the flag
    /// it is given is set.
    pub fn start<S, R>(
        poll_interval: Duration,
        rescan_interval: Duration,
        sweep: S,
        rescan: R,
    ) -> Self
    where
        S: Fn() + Send + Sync + 'static,
        R: Fn(&AtomicBool) + Send + Sync + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let sweep: Sweep = Arc::new(sweep);
        let rescan: Rescan = Arc::new(rescan);

        let handle = std::thread::Builder::new()
            .name("poll-source".to_string())
            .spawn(move || {
                run_poll_loop(
                    poll_interval,
                    rescan_interval,
                    &sweep,
                    &rescan,
                    thread_cancel,
                )
            })
            .ok();

        tracing::info!(
            poll_ms = poll_interval.as_millis() as u64,
            rescan_ms = rescan_interval.as_millis() as u64,
            "Poll source started"
        );
        Self { cancel, handle }
    }

    /// Returns `true` while the timer thread is running.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread to stop and wait for it and any in-flight rescan.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Poll source thread panicked");
            }
        }
    }
}

impl Drop for PollSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_poll_loop(
    poll_interval: Duration,
    rescan_interval: Duration,
    sweep: &Sweep,
    rescan: &Rescan,
    cancel: Arc<AtomicBool>,
) {
    let mut rescan_in_flight: Option<JoinHandle<()>> = None;
    poll_until_cancelled(
        poll_interval,
        rescan_interval,
        sweep,
        rescan,
        &cancel,
        &mut rescan_in_flight,
    );
    if let Some(handle) = rescan_in_flight {
        if handle.join().is_err() {
            tracing::error!("Directory rescan thread panicked");
        }
    }
}

fn poll_until_cancelled(
    poll_interval: Duration,
    rescan_interval: Duration,
    sweep: &Sweep,
    rescan: &Rescan,
    cancel: &Arc<AtomicBool>,
    rescan_in_flight: &mut Option<JoinHandle<()>>,
) {
    let cancel_check = Duration::from_millis(CANCEL_CHECK_INTERVAL_MS);
    let mut last_rescan = Instant::now();

    loop {
        // Sleep in slices so cancellation is detected promptly.
        let wake_at = Instant::now() + poll_interval;
        loop {
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!("Poll source: cancel flag set, exiting");
                return;
            }
            let now = Instant::now();
            if now >= wake_at {
                break;
            }
            std::thread::sleep(cancel_check.min(wake_at - now));
        }

        sweep();

        if last_rescan.elapsed() >= rescan_interval {
            let busy = rescan_in_flight
                .as_ref()
                .is_some_and(|h| !h.is_finished());
            if busy {
                tracing::debug!("Previous directory rescan still running; skipping");
            } else {
                last_rescan = Instant::now();
                let rescan = Arc::clone(rescan);
                let cancel = Arc::clone(cancel);
                if let Some(done) = rescan_in_flight.take() {
                    let _ = done.join();
                }
                *rescan_in_flight = std::thread::Builder::new()
                    .name("dir-rescan".to_string())
                    .spawn(move || rescan(&cancel))
                    .ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_sweep_and_rescan_fire() {
        let sweeps = Arc::new(AtomicUsize::new(0));
        let rescans = Arc::new(AtomicUsize::new(0));
        let (s, r) = (Arc::clone(&sweeps), Arc::clone(&rescans));

        let mut source = PollSource::start(
            Duration::from_millis(20),
            Duration::from_millis(50),
            move || {
                s.fetch_add(1, Ordering::SeqCst);
            },
            move |_: &AtomicBool| {
                r.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(source.is_active());

        let deadline = Instant::now() + Duration::from_secs(5);
        while (sweeps.load(Ordering::SeqCst) < 3 || rescans.load(Ordering::SeqCst) < 1)
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(10));
        }
        source.stop();

        assert!(sweeps.load(Ordering::SeqCst) >= 3);
        assert!(rescans.load(Ordering::SeqCst) >= 1);
        assert!(!source.is_active());
    }

    #[test]
    fn test_stop_is_prompt() {
        let mut source = PollSource::start(
            Duration::from_secs(60),
            Duration::from_secs(60),
            || {},
            |_: &AtomicBool| {},
        );
        let started = Instant::now();
        source.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_waits_for_in_flight_rescan() {
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let (e, f, c) = (
            Arc::clone(&entered),
            Arc::clone(&finished),
            Arc::clone(&saw_cancel),
        );

        let mut source = PollSource::start(
            Duration::from_millis(20),
            Duration::from_millis(20),
            || {},
            move |cancel: &AtomicBool| {
                if e.swap(true, Ordering::SeqCst) {
                    return;
                }
                // A slow listing that notices cancellation between entries.
                let deadline = Instant::now() + Duration::from_secs(5);
                while !cancel.load(Ordering::Relaxed) && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(10));
                }
                c.store(cancel.load(Ordering::Relaxed), Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                f.store(true, Ordering::SeqCst);
            },
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while !entered.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(entered.load(Ordering::SeqCst));

        source.stop();
        assert!(finished.load(Ordering::SeqCst), "stop returned before the rescan finished");
        assert!(saw_cancel.load(Ordering::SeqCst));
    }
}
