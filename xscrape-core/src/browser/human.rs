use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::ScrollSection;

/// Randomized pacing for timeline scrolling: scroll distances, pauses
/// between passes and between accounts.
#[derive(Debug)]
pub struct ScrollPacer {
    config: ScrollSection,
    rng: StdRng,
}

impl ScrollPacer {
    pub fn new(config: ScrollSection) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(config: ScrollSection, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn scroll_amount(&mut self) -> i64 {
        let [min, max] = self.config.amount_px;
        self.rng.gen_range(min..=max) as i64
    }

    pub fn scroll_delay(&mut self) -> Duration {
        self.random_duration(self.config.delay_ms)
    }

    pub fn settle_delay(&mut self) -> Duration {
        self.random_duration(self.config.settle_delay_ms)
    }

    pub fn account_delay(&mut self) -> Duration {
        self.random_duration(self.config.account_delay_ms)
    }

    /// Whether this pass should re-check the page for a rate-limit notice.
    pub fn should_check_rate_limit(&mut self) -> bool {
        let probability = self.config.rate_limit_check_probability.clamp(0.0, 1.0);
        probability > 0.0 && self.rng.gen_bool(probability)
    }

    fn random_duration(&mut self, bounds: [u64; 2]) -> Duration {
        let ms = self.rng.gen_range(bounds[0]..=bounds[1]);
        Duration::from_millis(ms)
    }
}

/// Cooperative cancellation fed by a `watch` channel. A dropped sender
/// never cancels.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }

    /// Sleeps for `duration` unless cancellation arrives first. Returns
    /// `false` when the sleep was cut short.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let Some(receiver) = self.receiver.as_mut() else {
            sleep(duration).await;
            return true;
        };
        let timer = sleep(duration);
        tokio::pin!(timer);
        let mut live = true;
        loop {
            tokio::select! {
                _ = &mut timer => return true,
                changed = receiver.changed(), if live => {
                    if changed.is_err() {
                        live = false;
                    } else if *receiver.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}
