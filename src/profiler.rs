//! Block timing

use std::future::Future;
use std::time::{Duration, Instant};

use crate::logger::{paint, palette};

/// Logs the time spent in a scope when dropped
#[derive(Debug)]
pub struct Profiler {
    label: String,
    started: Option<Instant>,
}

impl Profiler {
    /// Start timing; a disabled profiler logs nothing
    pub fn start(enabled: bool, label: &str) -> Self {
        Self {
            label: label.to_string(),
            started: enabled.then(Instant::now),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.started.is_some()
    }

    /// Time since start, if enabled
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|s| s.elapsed())
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if let Some(elapsed) = self.elapsed() {
            tracing::info!(
                "{} Time execute block: {:.5} sec",
                self.label,
                elapsed.as_secs_f64()
            );
        }
    }
}

/// Await `future` and log its run time at debug level
pub async fn timed<F, T>(label: &str, future: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let value = future.await;
    tracing::debug!(
        "{}",
        paint(
            format!(
                "\t<-- Profile {:?}. Run time: {:.5} secs -->",
                label,
                start.elapsed().as_secs_f64()
            ),
            palette::PROFILE
        )
    );
    value
}
