//! Transfer rate sampling over a trailing one-second window.

use tokio::time::Instant;

const WINDOW_MS: u128 = 1000;

#[derive(Debug, Default)]
pub struct SpeedSampler {
    first_checkpoint: Option<Instant>,
    last_checkpoint: Option<Instant>,
    interval_bytes: u64,
    total_bytes: u64,
    last_second_bytes: u64,
}

impl SpeedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.add_bytes_at(bytes, Instant::now());
    }

    fn add_bytes_at(&mut self, bytes: u64, now: Instant) {
        let Some(last) = self.last_checkpoint else {
            self.first_checkpoint = Some(now);
            self.last_checkpoint = Some(now);
            self.interval_bytes += bytes;
            self.total_bytes += bytes;
            return;
        };

        if now.duration_since(last).as_millis() < WINDOW_MS {
            self.interval_bytes += bytes;
        } else {
            // window rolled over
            self.last_second_bytes = self.interval_bytes;
            self.interval_bytes = bytes;
            self.last_checkpoint = Some(now);
        }
        self.total_bytes += bytes;
    }

    /// Rate of the window in progress, in KB/s.
    pub fn current_kbps(&mut self) -> f64 {
        self.current_kbps_at(Instant::now())
    }

    fn current_kbps_at(&mut self, now: Instant) -> f64 {
        self.add_bytes_at(0, now);
        let Some(last) = self.last_checkpoint else {
            return 0.0;
        };
        let mut seconds = now.duration_since(last).as_secs_f64();
        if seconds == 0.0 {
            seconds = 1.0;
        }
        self.interval_bytes as f64 / seconds / 1024.0
    }

    /// Rate of the last complete second in KB/s. Falls back to the current
    /// window once it is at least half a second old, otherwise 0.
    pub fn last_second_kbps(&mut self) -> f64 {
        self.last_second_kbps_at(Instant::now())
    }

    fn last_second_kbps_at(&mut self, now: Instant) -> f64 {
        self.add_bytes_at(0, now);
        if self.last_second_bytes != 0 {
            return self.last_second_bytes as f64 / 1024.0;
        }
        match self.last_checkpoint {
            Some(last) if now.duration_since(last).as_millis() >= WINDOW_MS / 2 => {
                self.current_kbps_at(now)
            }
            _ => 0.0,
        }
    }

    pub fn average_kbps(&self) -> f64 {
        let Some(first) = self.first_checkpoint else {
            return 0.0;
        };
        let seconds = Instant::now().duration_since(first).as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / seconds / 1024.0
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}
