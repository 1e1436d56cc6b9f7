//! Host render-loop tick sources.
//!
//! Frame-gated batches run inside callbacks invoked once per rendered frame
//! on a thread the server does not own. [`TickSource`] is the narrow seam
//! between the two: register a callback, unregister it when done.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

/// Callback invoked once per frame on the tick thread.
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// Registration token returned by [`TickSource::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

/// Something that calls registered callbacks once per frame.
pub trait TickSource: Send + Sync {
    /// Start calling `callback` on every tick.
    fn register(&self, callback: TickCallback) -> TickHandle;
    /// Stop calling the callback. It may still run once if a tick is in
    /// progress.
    fn unregister(&self, handle: TickHandle);
}

/// Tick source driven by the host calling [`HostTickSource::tick`] from its
/// render thread.
#[derive(Default)]
pub struct HostTickSource {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(TickHandle, TickCallback)>>,
}

impl HostTickSource {
    /// Create a tick source with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every registered callback once.
    ///
    /// The callback list is snapshotted first, so callbacks may register or
    /// unregister without deadlocking.
    pub fn tick(&self) {
        let snapshot: Vec<TickCallback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in snapshot {
            callback();
        }
    }

    /// Number of registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }
}

impl TickSource for HostTickSource {
    fn register(&self, callback: TickCallback) -> TickHandle {
        let handle = TickHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((handle, callback));
        handle
    }

    fn unregister(&self, handle: TickHandle) {
        self.callbacks.lock().retain(|(h, _)| *h != handle);
    }
}

/// Stand-alone frame clock: a dedicated thread ticking at a fixed rate.
///
/// Used when the server runs without a host render loop.
pub struct FrameClock {
    source: Arc<HostTickSource>,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FrameClock {
    /// Spawn the clock thread.
    pub fn start(frames_per_second: u32) -> std::io::Result<Self> {
        let frame_duration = Duration::from_secs(1) / frames_per_second.max(1);
        let source = Arc::new(HostTickSource::new());
        let stop = Arc::new(AtomicBool::new(false));

        let thread_source = source.clone();
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("stagehand-frame-clock".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    thread_source.tick();
                    std::thread::sleep(frame_duration);
                }
                debug!("frame clock thread exiting");
            })?;

        info!(frames_per_second, "frame clock started");
        Ok(Self {
            source,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop the clock and join its thread. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl TickSource for FrameClock {
    fn register(&self, callback: TickCallback) -> TickHandle {
        self.source.register(callback)
    }

    fn unregister(&self, handle: TickHandle) {
        self.source.unregister(handle);
    }
}

impl Drop for FrameClock {
    fn drop(&mut self) {
        self.stop();
    }
}
