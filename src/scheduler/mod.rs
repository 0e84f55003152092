//! Frame Scheduler
//!
//! Coalesces high-frequency update requests into at most one dispatch per
//! display refresh. The host owns the actual vsync source: it asks
//! [`FrameScheduler::wants_frame`] whether a wakeup is outstanding and calls
//! [`FrameScheduler::on_frame`] when the refresh arrives.
//!
//! - [`FrameScheduler`]: single-slot mailbox of the latest arguments
//! - [`ThrottledCallback`]: a scheduler bound to one callback
//! - [`FrameBatch`]: several named callbacks fired together in one frame

pub mod clock;

pub use clock::RefreshClock;

/// Single-slot mailbox plus one outstanding wakeup
///
/// `schedule` replaces any pending arguments instead of queueing them, so a
/// burst of requests between two refreshes yields exactly one dispatch with
/// the most recent arguments.
#[derive(Debug)]
pub struct FrameScheduler<A> {
    pending: Option<A>,
    disposed: bool,
    clock: RefreshClock,
    frames_dispatched: u64,
    requests_coalesced: u64,
}

impl<A> Default for FrameScheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> FrameScheduler<A> {
    /// Create a scheduler assuming a 60 Hz display until frames are measured
    pub fn new() -> Self {
        Self::with_refresh_hz(crate::config::DEFAULT_REFRESH_HZ)
    }

    /// Create a scheduler with a different nominal refresh rate
    pub fn with_refresh_hz(refresh_hz: f64) -> Self {
        Self {
            pending: None,
            disposed: false,
            clock: RefreshClock::new(refresh_hz),
            frames_dispatched: 0,
            requests_coalesced: 0,
        }
    }

    /// Request a dispatch on the next refresh with `args`
    ///
    /// Returns true if this call opened a new wakeup, false if it replaced
    /// the arguments of an already pending one. Ignored after disposal.
    pub fn schedule(&mut self, args: A) -> bool {
        if self.disposed {
            log::debug!("[SCHEDULER] Ignoring schedule on disposed scheduler");
            return false;
        }
        let opened = self.pending.is_none();
        if !opened {
            self.requests_coalesced += 1;
        }
        self.pending = Some(args);
        opened
    }

    /// Abort the pending dispatch, returning its arguments
    pub fn cancel(&mut self) -> Option<A> {
        self.pending.take()
    }

    /// Whether a wakeup is outstanding
    pub fn wants_frame(&self) -> bool {
        self.pending.is_some()
    }

    /// Handle a display refresh at `timestamp` seconds
    ///
    /// Returns the arguments to dispatch, if a dispatch was pending.
    pub fn on_frame(&mut self, timestamp: f64) -> Option<A> {
        self.clock.observe(timestamp);
        if self.disposed {
            return None;
        }
        let args = self.pending.take()?;
        self.frames_dispatched += 1;
        Some(args)
    }

    /// Cancel anything pending and refuse further requests
    pub fn dispose(&mut self) {
        if self.pending.take().is_some() {
            log::debug!("[SCHEDULER] Cancelled pending frame on dispose");
        }
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Measured (or nominal) display refresh rate in Hz
    pub fn refresh_hz(&self) -> f64 {
        self.clock.refresh_hz()
    }

    /// Number of dispatches delivered so far
    pub fn frames_dispatched(&self) -> u64 {
        self.frames_dispatched
    }

    /// Number of requests that replaced pending arguments
    pub fn requests_coalesced(&self) -> u64 {
        self.requests_coalesced
    }
}

/// A [`FrameScheduler`] bound to a single callback
pub struct ThrottledCallback<A> {
    scheduler: FrameScheduler<A>,
    callback: Box<dyn FnMut(A)>,
}

impl<A> ThrottledCallback<A> {
    pub fn new(callback: impl FnMut(A) + 'static) -> Self {
        Self {
            scheduler: FrameScheduler::new(),
            callback: Box::new(callback),
        }
    }

    /// Invoke the callback on the next refresh with the latest `args`
    pub fn schedule(&mut self, args: A) -> bool {
        self.scheduler.schedule(args)
    }

    pub fn cancel(&mut self) {
        self.scheduler.cancel();
    }

    pub fn wants_frame(&self) -> bool {
        self.scheduler.wants_frame()
    }

    /// Handle a display refresh; returns true if the callback ran
    pub fn on_frame(&mut self, timestamp: f64) -> bool {
        match self.scheduler.on_frame(timestamp) {
            Some(args) => {
                (self.callback)(args);
                true
            }
            None => false,
        }
    }

    pub fn dispose(&mut self) {
        self.scheduler.dispose();
    }
}

type FrameCallback = Box<dyn FnMut(f64)>;

/// Named callbacks that all fire in one frame, in registration order
#[derive(Default)]
pub struct FrameBatch {
    callbacks: Vec<(String, FrameCallback)>,
    requested: bool,
    disposed: bool,
}

impl FrameBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; re-registering a name replaces it in place
    pub fn register(&mut self, name: impl Into<String>, callback: impl FnMut(f64) + 'static) {
        let name = name.into();
        let callback: FrameCallback = Box::new(callback);
        match self.callbacks.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = callback,
            None => self.callbacks.push((name, callback)),
        }
    }

    /// Remove a callback by name; returns whether it existed
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(n, _)| n != name);
        self.callbacks.len() != before
    }

    /// Names in firing order
    pub fn names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Request that the whole batch fires on the next refresh
    pub fn request(&mut self) {
        if !self.disposed {
            self.requested = true;
        }
    }

    pub fn cancel(&mut self) {
        self.requested = false;
    }

    pub fn wants_frame(&self) -> bool {
        self.requested
    }

    /// Handle a display refresh; returns the number of callbacks invoked
    pub fn on_frame(&mut self, timestamp: f64) -> usize {
        if !self.requested || self.disposed {
            return 0;
        }
        self.requested = false;
        for (_, callback) in self.callbacks.iter_mut() {
            callback(timestamp);
        }
        self.callbacks.len()
    }

    /// Cancel the pending frame and drop every callback
    pub fn dispose(&mut self) {
        self.requested = false;
        self.disposed = true;
        self.callbacks.clear();
    }
}
