//! Progress reporting for long loops

/// Logs a percentage line every `every_n_percent` percent of `max_count`
#[derive(Debug, Clone)]
pub struct ProgressBar {
    info: String,
    silent: bool,
    max_count: u64,
    counter: u64,
    one_percent: u64,
    every_n_percent: u64,
}

impl ProgressBar {
    pub fn new(info: &str, max_count: u64, every_n_percent: u64, silent: bool) -> Self {
        let one_percent = if max_count > 100 { max_count / 100 } else { 1 };
        Self {
            info: info.to_string(),
            silent,
            max_count,
            counter: 0,
            one_percent,
            every_n_percent: every_n_percent.max(1),
        }
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Percent done, as counted in whole `one_percent` steps
    pub fn percent(&self) -> u64 {
        self.counter / self.one_percent
    }

    /// Count one processed item
    pub fn increment(&mut self) {
        self.advance(1);
    }

    /// Count `n` processed items at once
    pub fn increment_by(&mut self, n: u64) {
        self.advance(n);
    }

    /// True when the counter crossed a report step
    fn advance(&mut self, n: u64) -> bool {
        let step = self.one_percent * self.every_n_percent;
        let before = self.counter / step;
        self.counter += n;

        let crossed = self.counter / step > before;
        if crossed && !self.silent {
            tracing::info!(
                "{}. Percent:{}%. (Counter = {})",
                self.info,
                self.percent(),
                self.counter
            );
        }
        crossed
    }
}
