use std::time::Duration;

use super::constants::{CONNECT_BACKOFF_BASE_MS, CONNECT_BACKOFF_CAP_MS};

pub(crate) struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { attempt: 0 }
    }

    pub(crate) fn next(&mut self) -> Duration {
        self.attempt += 1;
        let delay = CONNECT_BACKOFF_BASE_MS * 2u64.pow((self.attempt - 1).min(10));
        Duration::from_millis(delay.min(CONNECT_BACKOFF_CAP_MS))
    }
}
