/// Consecutive health-check failure counting
///
/// Owned by a single subscriber's health loop; never shared.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Failed, but still below the threshold
    Degraded { consecutive_failures: u32 },
    /// Threshold reached; the subscriber must be deregistered
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthTracker {
    threshold: u32,
    consecutive_failures: u32,
}

impl HealthTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn record(&mut self, healthy: bool) -> HealthVerdict {
        if healthy {
            self.consecutive_failures = 0;
            return HealthVerdict::Healthy;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            HealthVerdict::Unhealthy
        } else {
            HealthVerdict::Degraded {
                consecutive_failures: self.consecutive_failures,
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
