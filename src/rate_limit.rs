//! Window-based rate limiting for outbound fetches.
//!
//! [`TimedSemaphore`] hands out at most `capacity` permits; every permit is
//! returned automatically `window` after it was acquired, whether or not the
//! holder is still working. That caps fetches to `capacity` per rolling
//! window regardless of how long individual requests take.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct TimedSemaphore {
    permits: Arc<Semaphore>,
    window: Duration,
}

impl TimedSemaphore {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            window,
        }
    }

    /// Wait for a slot in the current window.
    ///
    /// There is nothing to release: the slot frees itself after the window.
    /// Returns [`AppError::Cancelled`] if `cancel` fires while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                // The semaphore is never closed.
                permit.map_err(|_| AppError::Cancelled)?
            }
        };

        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            drop(permit);
            trace!("Timed permit released after {:?}", window);
        });

        Ok(())
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
