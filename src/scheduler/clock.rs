//! Display refresh measurement

/// Smoothing factor for the refresh interval moving average.
const SMOOTHING: f64 = 0.1;

/// Frame gaps above this are treated as stalls (tab hidden, debugger) and ignored.
const MAX_FRAME_INTERVAL_SECS: f64 = 0.25;

/// Tracks the actual refresh interval from observed frame timestamps
#[derive(Debug, Clone)]
pub struct RefreshClock {
    interval_secs: f64,
    last_timestamp: Option<f64>,
}

impl RefreshClock {
    pub fn new(nominal_hz: f64) -> Self {
        Self {
            interval_secs: 1.0 / nominal_hz,
            last_timestamp: None,
        }
    }

    /// Record a frame timestamp in seconds
    pub fn observe(&mut self, timestamp: f64) {
        if let Some(last) = self.last_timestamp {
            let delta = timestamp - last;
            if delta > 0.0 && delta <= MAX_FRAME_INTERVAL_SECS {
                self.interval_secs += (delta - self.interval_secs) * SMOOTHING;
            }
        }
        self.last_timestamp = Some(timestamp);
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }

    pub fn refresh_hz(&self) -> f64 {
        1.0 / self.interval_secs
    }
}
