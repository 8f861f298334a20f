//! Capture thread: pulls frames from a source at the target rate, stamps
//! them and publishes them on the bus.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::bus::FrameBus;
use crate::errors::CctvError;
use crate::source::FrameSource;
use crate::timing::{CaptureClock, Pacer};
use crate::types::FrameFormat;

/// Longest single sleep between stop-flag checks
const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct CaptureShared {
    stop: AtomicBool,
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
}

/// Owner of the running capture thread
pub struct CaptureHandle {
    shared: Arc<CaptureShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureHandle {
    /// Start capturing on a dedicated thread.
    ///
    /// `open` runs on the capture thread, so the source itself never has to
    /// cross threads; `spawn` waits for it and returns its error if the
    /// source cannot be opened. After `max_failures` consecutive capture
    /// errors the loop gives up, closes the bus and the thread exits.
    pub fn spawn<F, S>(
        open: F,
        format: FrameFormat,
        max_failures: u32,
        bus: FrameBus,
    ) -> Result<Self, CctvError>
    where
        F: FnOnce() -> Result<S, CctvError> + Send + 'static,
        S: FrameSource,
    {
        let shared = Arc::new(CaptureShared::default());
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<(), CctvError>>(1);

        let thread = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("crabcctv-capture".to_string())
                .spawn(move || match open() {
                    Ok(source) => {
                        let _ = opened_tx.send(Ok(()));
                        capture_loop(source, format, max_failures.max(1), bus, &shared)
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                    }
                })
                .map_err(|e| CctvError::CaptureError(format!("spawn failed: {e}")))?
        };

        let opened = opened_rx.recv().unwrap_or_else(|_| {
            Err(CctvError::CaptureError(
                "capture thread exited while opening the source".to_string(),
            ))
        });
        if let Err(e) = opened {
            if thread.join().is_err() {
                log::warn!("Capture thread panicked while opening the source");
            }
            log::error!("Could not open frame source: {}", e);
            return Err(e);
        }

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Frames published since capture started
    pub fn frames_captured(&self) -> u64 {
        self.shared.frames_captured.load(Ordering::Relaxed)
    }

    /// Capture errors seen since capture started
    pub fn capture_failures(&self) -> u64 {
        self.shared.capture_failures.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to stop and wait up to `join_timeout` for it.
    ///
    /// On timeout the handle keeps the thread so a later call can retry.
    pub fn stop(&self, join_timeout: Duration) -> Result<(), CctvError> {
        self.shared.stop.store(true, Ordering::Relaxed);

        let mut handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let start = Instant::now();
        while let Some(h) = handle.take() {
            if h.is_finished() {
                if h.join().is_err() {
                    log::warn!("Capture thread panicked");
                }
                break;
            }
            if start.elapsed() >= join_timeout {
                *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(h);
                return Err(CctvError::CaptureError(format!(
                    "capture thread did not stop within {:?}",
                    join_timeout
                )));
            }
            handle = Some(h);
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop(Duration::from_millis(500)) {
            log::warn!("Error stopping capture in drop: {}", e);
        }
    }
}

fn capture_loop<S: FrameSource>(
    mut source: S,
    format: FrameFormat,
    max_failures: u32,
    bus: FrameBus,
    shared: &CaptureShared,
) {
    let clock = CaptureClock::new();
    let (width, height) = source.resolution();
    log::info!(
        "Capturing from {} at {}x{} {:.1} fps",
        source.name(),
        width,
        height,
        format.fps
    );

    let mut pacer = Pacer::new(format.frame_interval());
    let mut sequence = 0u64;
    let mut consecutive_failures = 0u32;

    while !shared.stop.load(Ordering::Relaxed) {
        match source.capture().and_then(|frame| frame.validate().map(|_| frame)) {
            Ok(frame) => {
                consecutive_failures = 0;
                sequence += 1;
                bus.publish(frame.stamped(sequence, clock.now()));
                shared.frames_captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                consecutive_failures += 1;
                shared.capture_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Capture from {} failed ({}/{}): {}",
                    source.name(),
                    consecutive_failures,
                    max_failures,
                    e
                );
                if consecutive_failures >= max_failures {
                    log::error!(
                        "Giving up on {} after {} consecutive capture failures",
                        source.name(),
                        consecutive_failures
                    );
                    // no more frames will come; end the viewers' streams
                    bus.close();
                    break;
                }
            }
        }

        sleep_unless_stopped(pacer.next_delay(), &shared.stop);
    }

    log::info!("Capture stopped after {} frames", sequence);
}

fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + delay;
    loop {
        let now = Instant::now();
        if now >= deadline || stop.load(Ordering::Relaxed) {
            return;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}
