//! Session-wide count of queries in flight.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct InProgressCounter {
    count: Mutex<u64>,
    zero: Condvar,
}

impl InProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        *self.count.lock().unwrap() += 1;
    }

    pub fn decrement(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap()
    }

    /// Block until no query is in flight.
    pub fn wait_for_zero(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.zero.wait(count).unwrap();
        }
    }
}
