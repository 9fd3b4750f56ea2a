use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct Span {
    started: Option<Instant>,
    last: Duration,
    total: Duration,
    count: u32,
}

/// Named stopwatches, one per phase (`train-epoch`, `train-step`, `test-epoch`, ...).
#[derive(Debug, Default, Clone)]
pub struct MultiTimer {
    spans: BTreeMap<&'static str, Span>,
}

impl MultiTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, name: &'static str) {
        self.spans.entry(name).or_default().started = Some(Instant::now());
    }

    /// Stops `name` and returns the elapsed time. A timer that was never
    /// started reports zero.
    pub fn stop(&mut self, name: &'static str) -> Duration {
        let span = self.spans.entry(name).or_default();
        let Some(started) = span.started.take() else {
            return Duration::ZERO;
        };
        let elapsed = started.elapsed();
        span.last = elapsed;
        span.total += elapsed;
        span.count += 1;
        elapsed
    }

    pub fn last(&self, name: &str) -> Duration {
        self.spans.get(name).map(|s| s.last).unwrap_or_default()
    }

    pub fn mean(&self, name: &str) -> Duration {
        match self.spans.get(name) {
            Some(s) if s.count > 0 => s.total / s.count,
            _ => Duration::ZERO,
        }
    }

    pub fn count(&self, name: &str) -> u32 {
        self.spans.get(name).map(|s| s.count).unwrap_or(0)
    }

    pub fn reset(&mut self, name: &str) {
        if let Some(span) = self.spans.get_mut(name) {
            *span = Span::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_start_is_zero() {
        let mut t = MultiTimer::new();
        assert_eq!(t.stop("x"), Duration::ZERO);
        assert_eq!(t.count("x"), 0);
    }

    #[test]
    fn accumulates_and_resets() {
        let mut t = MultiTimer::new();
        for _ in 0..3 {
            t.start("step");
            std::thread::sleep(Duration::from_millis(1));
            t.stop("step");
        }
        assert_eq!(t.count("step"), 3);
        assert!(t.mean("step") >= Duration::from_millis(1));
        assert!(t.last("step") > Duration::ZERO);
        t.reset("step");
        assert_eq!(t.count("step"), 0);
        assert_eq!(t.mean("step"), Duration::ZERO);
    }
}
