use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};

/// Wall time and blocking waits.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    /// Block the whole run for `duration`.
    fn sleep(&self, duration: Duration);

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        if duration > Duration::from_secs(0) {
            thread::sleep(duration);
        }
    }
}

/// A clock that only moves when told to. `sleep` advances it and is
/// remembered, so callers can see which waits were requested.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Local>) -> ManualClock {
        ManualClock {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            if let Ok(by) = chrono::Duration::from_std(by) {
                *guard = *guard + by;
            }
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
    }
}
