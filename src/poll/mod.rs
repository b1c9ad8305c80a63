//! Fetch -> display -> wait loop
//!
//! Ticks run strictly one after another on the caller's task. A failed fetch
//! never escapes a tick; it is logged and shown as [`BuildStatus::Error`].

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::indicator::{IndicatorController, OutputError};
use crate::status::{BuildStatus, StatusSource};

pub struct PollLoop<S> {
    source: S,
    interval: Duration,
}

impl<S: StatusSource> PollLoop<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Fetch the latest status and render it; returns what was rendered
    ///
    /// Completes only after `set_status` (including the error flash) is done.
    /// Fetch failures are rendered as `Error`; only an output failure is
    /// returned, after an attempt to switch every lamp off.
    pub async fn tick(
        &self,
        indicator: &mut IndicatorController,
    ) -> Result<BuildStatus, OutputError> {
        let status = match self.source.fetch().await {
            Ok(status) => status,
            Err(e) => {
                warn!(kind = e.kind(), "Failed to fetch build status: {}", e);
                BuildStatus::Error
            }
        };

        if let Err(e) = indicator.set_status(status).await {
            error!("Failed to update indicator ({}): {}", status, e);
            // A write can fail halfway through the flash with red still lit
            if let Err(e) = indicator.switch_off() {
                error!("Failed to switch indicator off: {}", e);
            }
            return Err(e);
        }
        Ok(status)
    }

    /// Run ticks every `interval` until `cancel` fires
    ///
    /// Cancellation is observed at any point: during the fetch, the error
    /// flash or the sleep. The indicator is left as-is; releasing it is the
    /// caller's job.
    pub async fn run(&self, indicator: &mut IndicatorController, cancel: CancellationToken) {
        info!("Polling started (interval: {}s)", self.interval.as_secs());

        let mut displayed: Option<BuildStatus> = None;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.tick(indicator) => result,
            };

            match result {
                Err(_) => displayed = None,
                Ok(status) if displayed != Some(status) => {
                    info!(
                        "Build status: {} (was {})",
                        status,
                        displayed.map(|s| s.as_str()).unwrap_or("none")
                    );
                    displayed = Some(status);
                }
                Ok(status) => debug!("Build status unchanged: {}", status),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Polling stopped");
    }
}
