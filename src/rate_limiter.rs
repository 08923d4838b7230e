use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// A per-service minimum-spacing gate. This is deliberately not a token
/// bucket: two rapid `acquire` calls serialise rather than burst, because
/// both upstream services are intolerant of bursts.
#[derive(Debug)]
pub struct RateLimiter {
    spacing: Mutex<HashMap<String, ServiceGate>>,
}

#[derive(Debug)]
struct ServiceGate {
    min_spacing: Duration,
    last_release: Option<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            spacing: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or update) the minimum spacing for a named service.
    pub async fn configure(&self, service: &str, min_spacing: Duration) {
        let mut gates = self.spacing.lock().await;
        gates
            .entry(service.to_string())
            .and_modify(|g| g.min_spacing = min_spacing)
            .or_insert(ServiceGate {
                min_spacing,
                last_release: None,
            });
    }

    /// Block until it is safe to issue the next call to `service`, then
    /// reserve the slot. Acquisitions against distinct services are
    /// independent of one another.
    pub async fn acquire(&self, service: &str) {
        loop {
            let wait = {
                let mut gates = self.spacing.lock().await;
                let gate = gates.entry(service.to_string()).or_insert(ServiceGate {
                    min_spacing: Duration::ZERO,
                    last_release: None,
                });

                let now = Instant::now();
                match gate.last_release {
                    None => {
                        gate.last_release = Some(now);
                        None
                    }
                    Some(last) => {
                        let earliest = last + gate.min_spacing;
                        if now >= earliest {
                            gate.last_release = Some(now);
                            None
                        } else {
                            Some(earliest - now)
                        }
                    }
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
