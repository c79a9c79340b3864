//! Position watcher: one-shot fix plus continuous subscription.
//!
//! [`PositionWatcher::start`] asks the [`LocationProvider`] for the
//! fine-location permission, then runs the one-shot `current_fix` read and the
//! `watch_fix` stream concurrently. Results are delivered to the caller's
//! callbacks through a [`Gate`]; cancelling the [`WatchHandle`] closes the gate
//! under its lock, so once `cancel()` returns no callback can run again.
//!
//! There is no retry. A failed read is reported once and the caller decides
//! what to do next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::geo::GpsFix;
use crate::location::{LocationError, LocationProvider, PermissionKind};

type FixCallback = Box<dyn FnMut(GpsFix, bool) + Send>;
type ErrorCallback = Box<dyn FnMut(LocationError) + Send>;

struct Callbacks {
    on_fix: FixCallback,
    on_error: ErrorCallback,
}

/// Shared slot holding the callbacks; `None` once cancelled.
#[derive(Clone)]
struct Gate(Arc<Mutex<Option<Callbacks>>>);

impl Gate {
    fn fix(&self, fix: GpsFix, is_initial: bool) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cb) = slot.as_mut() {
            (cb.on_fix)(fix, is_initial);
        }
    }

    fn error(&self, err: LocationError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cb) = slot.as_mut() {
            (cb.on_error)(err);
        }
    }

    fn close(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn is_open(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Starts position watches against a provider.
pub struct PositionWatcher<P> {
    provider: Arc<P>,
}

impl<P> Clone for PositionWatcher<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: LocationProvider> PositionWatcher<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Begin watching. Must be called from within a tokio runtime.
    ///
    /// `on_fix(fix, true)` is called for the one-shot read and
    /// `on_fix(fix, false)` for each continuous reading; the two may
    /// interleave in any order. Both callbacks are dropped once the watch
    /// ends or is cancelled. They must not call [`WatchHandle::cancel`].
    pub fn start<F, E>(&self, on_fix: F, on_error: E) -> WatchHandle
    where
        F: FnMut(GpsFix, bool) + Send + 'static,
        E: FnMut(LocationError) + Send + 'static,
    {
        let gate = Gate(Arc::new(Mutex::new(Some(Callbacks {
            on_fix: Box::new(on_fix),
            on_error: Box::new(on_error),
        }))));
        let provider = Arc::clone(&self.provider);
        let task_gate = gate.clone();

        let task = tokio::spawn(async move {
            let gate = task_gate;
            if !provider
                .request_permission(PermissionKind::FineLocation)
                .await
            {
                warn!("Watcher: location permission denied");
                gate.error(LocationError::PermissionDenied);
                gate.close();
                return;
            }
            info!("Watcher: permission granted, starting position watch");

            let one_shot = async {
                match provider.current_fix().await {
                    Ok(fix) => {
                        debug!("Watcher: initial fix {fix}");
                        gate.fix(fix, true);
                    }
                    Err(e) => {
                        warn!("Watcher: initial fix failed: {e}");
                        gate.error(e);
                    }
                }
            };

            let continuous = async {
                let mut fixes = provider.watch_fix();
                while let Some(fix) = fixes.next().await {
                    if !gate.is_open() {
                        break;
                    }
                    gate.fix(fix, false);
                }
                debug!("Watcher: position stream ended");
            };

            tokio::join!(one_shot, continuous);
            gate.close();
        });

        WatchHandle {
            gate,
            task,
            cancelled: AtomicBool::new(false),
        }
    }
}

/// Handle to a running watch. Dropping it cancels the watch.
pub struct WatchHandle {
    gate: Gate,
    task: tokio::task::JoinHandle<()>,
    cancelled: AtomicBool,
}

impl WatchHandle {
    /// Stop the watch. No callback runs after this returns.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.gate.close();
        self.task.abort();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether callbacks can no longer run, after cancellation or because
    /// the watch ended on its own.
    pub fn is_closed(&self) -> bool {
        !self.gate.is_open()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
