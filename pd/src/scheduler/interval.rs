//! Adaptive loop interval

use std::time::Duration;

use serde::Serialize;

/// Sleep interval for one recurring loop.
///
/// Rate limits stretch it past the baseline; successful cycles relax it back
/// toward the baseline. It never drops below the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdaptiveInterval {
    baseline: Duration,
    current: Duration,
}

impl AdaptiveInterval {
    pub fn new(baseline: Duration) -> Self {
        Self {
            baseline,
            current: baseline,
        }
    }

    pub fn baseline(&self) -> Duration {
        self.baseline
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn is_stretched(&self) -> bool {
        self.current > self.baseline
    }

    /// Back off after a rate limit: wait at least `baseline + retry_after`,
    /// capped at `max(cap, baseline)`
    pub fn stretch(&mut self, retry_after: Duration, cap: Duration) {
        let target = self.baseline.saturating_add(retry_after);
        self.current = self.current.max(target).min(cap.max(self.baseline));
    }

    /// Move back toward the baseline after a successful cycle
    pub fn relax(&mut self, factor: f64) {
        if !self.is_stretched() {
            return;
        }
        let relaxed = self.current.div_f64(factor.max(1.0));
        self.current = relaxed.max(self.baseline);
    }

    /// Replace the baseline. An explicit change discards any stretch.
    pub fn rebase(&mut self, baseline: Duration) {
        self.baseline = baseline;
        self.current = baseline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_stretch_adds_retry_after_to_baseline() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(300));
        interval.stretch(Duration::from_secs(120), HOUR);
        assert_eq!(interval.current(), Duration::from_secs(420));
        assert!(interval.is_stretched());
    }

    #[test]
    fn test_stretch_never_shrinks() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(300));
        interval.stretch(Duration::from_secs(600), HOUR);
        interval.stretch(Duration::from_secs(60), HOUR);
        assert_eq!(interval.current(), Duration::from_secs(900));
    }

    #[test]
    fn test_stretch_is_capped() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(300));
        interval.stretch(Duration::from_secs(10 * 3600), HOUR);
        assert_eq!(interval.current(), HOUR);
    }

    #[test]
    fn test_cap_below_baseline_keeps_baseline() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(300));
        interval.stretch(Duration::from_secs(120), Duration::from_secs(60));
        assert_eq!(interval.current(), Duration::from_secs(300));
    }

    #[test]
    fn test_relax_returns_to_baseline() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(300));
        interval.stretch(Duration::from_secs(900), HOUR);
        assert_eq!(interval.current(), Duration::from_secs(1200));

        interval.relax(2.0);
        assert_eq!(interval.current(), Duration::from_secs(600));
        interval.relax(2.0);
        assert_eq!(interval.current(), Duration::from_secs(300));
        interval.relax(2.0);
        assert_eq!(interval.current(), Duration::from_secs(300));
    }

    #[test]
    fn test_rebase_discards_stretch() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(300));
        interval.stretch(Duration::from_secs(120), HOUR);
        interval.rebase(Duration::from_secs(60));
        assert_eq!(interval.baseline(), Duration::from_secs(60));
        assert_eq!(interval.current(), Duration::from_secs(60));
    }
}
