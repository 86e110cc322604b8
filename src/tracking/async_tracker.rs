//! Decorator running a wrapped tracker on a background thread.
//!
//! `track` never waits for the wrapped tracker (except for the very first run):
//! it launches a run if none is in flight and returns the last completed result.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use opencv::core::{Mat, Point2f};
use opencv::prelude::*;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::geometry::Contour;
use crate::tracking::tracker::{next_tracker_id, ObjectTracker, TrackerId};

/// State shared between the decorator and its worker thread.
struct AsyncShared {
    tracker: Mutex<Box<dyn ObjectTracker>>,
    running: AtomicBool,
    result: Mutex<Contour>,
    updated: AtomicBool,
    /// Reinforcement that arrived while the wrapped tracker was busy.
    pending: Mutex<Option<Contour>>,
}

impl AsyncShared {
    fn publish(&self, result: Contour) {
        *self.result.lock() = result;
        self.updated.store(true, Ordering::SeqCst);
    }

    /// Worker body: one run of the wrapped tracker.
    fn run(&self, frame: Mat) {
        let mut tracker = self.tracker.lock();
        if let Some(location) = self.pending.lock().take() {
            tracker.reinforcement(&location);
        }

        let result = match panic::catch_unwind(AssertUnwindSafe(|| tracker.track(&frame))) {
            Ok(Ok(found)) => found.unwrap_or_default(),
            Ok(Err(e)) => {
                warn!(error = %e, "Background tracker failed");
                Contour::new()
            }
            Err(_) => {
                warn!("Background tracker panicked");
                Contour::new()
            }
        };

        {
            let mut pending = self.pending.lock();
            match pending.take() {
                Some(location) => {
                    tracker.reinforcement(&location);
                    self.publish(location);
                }
                None => self.publish(result),
            }
        }
        drop(tracker);
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct AsyncTracker {
    id: TrackerId,
    shared: Arc<AsyncShared>,
    worker: Option<JoinHandle<()>>,
    launched_once: bool,
}

impl AsyncTracker {
    pub fn new(tracker: Box<dyn ObjectTracker>) -> Self {
        Self {
            id: next_tracker_id(),
            shared: Arc::new(AsyncShared {
                tracker: Mutex::new(tracker),
                running: AtomicBool::new(false),
                result: Mutex::new(Contour::new()),
                updated: AtomicBool::new(false),
                pending: Mutex::new(None),
            }),
            worker: None,
            launched_once: false,
        }
    }

    /// Whether a background run is in flight.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Block until the in-flight run, if any, has finished.
    pub fn wait(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Background tracker thread panicked");
                self.shared.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn last_result(&self) -> Option<Contour> {
        let result = self.shared.result.lock();
        (!result.is_empty()).then(|| result.clone())
    }
}

impl ObjectTracker for AsyncTracker {
    fn track(&mut self, frame: &Mat) -> Result<Option<Contour>> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(self.last_result());
        }

        // The previous worker has released `running`; reap it.
        self.wait();

        let frame = match frame.try_clone() {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let shared = Arc::clone(&self.shared);
        self.worker = Some(thread::spawn(move || shared.run(frame)));

        if !self.launched_once {
            self.launched_once = true;
            self.wait();
        }

        Ok(self.last_result())
    }

    /// Takes effect on the cached result immediately and on the wrapped tracker
    /// as soon as it is idle.
    fn reinforcement(&mut self, location: &[Point2f]) {
        let mut pending = self.shared.pending.lock();
        self.shared.publish(location.to_vec());
        match self.shared.tracker.try_lock() {
            Some(mut tracker) => {
                tracker.reinforcement(location);
                *pending = None;
            }
            None => *pending = Some(location.to_vec()),
        }
    }

    fn clone_box(&self) -> Box<dyn ObjectTracker> {
        let inner = self.shared.tracker.lock().clone_box();
        let copy = AsyncTracker::new(inner);
        *copy.shared.result.lock() = self.shared.result.lock().clone();
        Box::new(copy)
    }

    fn id(&self) -> TrackerId {
        self.id
    }

    fn poll_result(&mut self, cached: &mut Contour) -> bool {
        let updated = self.shared.updated.swap(false, Ordering::SeqCst);
        *cached = self.shared.result.lock().clone();
        updated
    }
}

impl Drop for AsyncTracker {
    fn drop(&mut self) {
        self.wait();
    }
}
