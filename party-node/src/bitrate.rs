//! Bitrate controller: caps the outbound video encoding once the call has
//! negotiated send parameters.
//!
//! Parameters cannot be set until negotiation has produced at least one
//! encoding entry, and that moment is not observable from outside the peer
//! connection. The controller polls with a fixed backoff and a bounded retry
//! count, then gives up quietly so the call is never blocked on it.

use std::time::Duration;

use tracing::{debug, warn};

/// One entry of the sender's encoding list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingParameters {
    /// Bits per second.
    pub max_bitrate: Option<u32>,
    pub max_framerate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendParameters {
    pub encodings: Vec<EncodingParameters>,
}

/// Outbound video sender of an established media call.
pub trait VideoSender: Send + Sync {
    fn parameters(&self) -> SendParameters;
    fn set_parameters(&self, params: SendParameters) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct BitrateConfig {
    pub max_bitrate: u32,
    pub max_framerate: f64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            max_bitrate: 2_500_000,
            max_framerate: 30.0,
            max_retries: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneOutcome {
    Applied { attempts: u32 },
    /// No encodings appeared within the retry budget.
    GaveUp { attempts: u32 },
    /// The sender refused the new parameters.
    Rejected { attempts: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct BitrateController {
    config: BitrateConfig,
}

impl BitrateController {
    pub fn new(config: BitrateConfig) -> Self {
        Self { config }
    }

    /// Apply the caps, retrying while the sender has no encodings yet.
    /// Makes at most `1 + max_retries` attempts and never fails.
    pub async fn tune(&self, sender: &dyn VideoSender) -> TuneOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut params = sender.parameters();
            if !params.encodings.is_empty() {
                for enc in &mut params.encodings {
                    enc.max_bitrate = Some(self.config.max_bitrate);
                    enc.max_framerate = Some(self.config.max_framerate);
                }
                return match sender.set_parameters(params) {
                    Ok(()) => {
                        debug!(
                            attempts,
                            max_bitrate = self.config.max_bitrate,
                            "applied encoding caps"
                        );
                        TuneOutcome::Applied { attempts }
                    }
                    Err(e) => {
                        warn!(attempts, error = %e, "sender rejected encoding caps");
                        TuneOutcome::Rejected { attempts }
                    }
                };
            }
            if attempts > self.config.max_retries {
                debug!(attempts, "no encodings negotiated, leaving bitrate uncapped");
                return TuneOutcome::GaveUp { attempts };
            }
            tokio::time::sleep(self.config.backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Sender whose encodings appear after `ready_after` reads (never if None).
    struct FakeSender {
        reads: AtomicU32,
        ready_after: Option<u32>,
        reject: bool,
        applied: Mutex<Option<SendParameters>>,
    }

    impl FakeSender {
        fn new(ready_after: Option<u32>) -> Self {
            Self {
                reads: AtomicU32::new(0),
                ready_after,
                reject: false,
                applied: Mutex::new(None),
            }
        }
    }

    impl VideoSender for FakeSender {
        fn parameters(&self) -> SendParameters {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            match self.ready_after {
                Some(k) if n >= k => SendParameters {
                    encodings: vec![EncodingParameters::default(), EncodingParameters::default()],
                },
                _ => SendParameters::default(),
            }
        }

        fn set_parameters(&self, params: SendParameters) -> Result<(), String> {
            if self.reject {
                return Err("InvalidModificationError".into());
            }
            *self.applied.lock().unwrap() = Some(params);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn applies_immediately_when_negotiated() {
        let sender = FakeSender::new(Some(1));
        let outcome = BitrateController::default().tune(&sender).await;
        assert_eq!(outcome, TuneOutcome::Applied { attempts: 1 });
        let applied = sender.applied.lock().unwrap().clone().unwrap();
        assert_eq!(applied.encodings.len(), 2);
        for enc in applied.encodings {
            assert_eq!(enc.max_bitrate, Some(2_500_000));
            assert_eq!(enc.max_framerate, Some(30.0));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_negotiated() {
        let sender = FakeSender::new(Some(3));
        let outcome = BitrateController::default().tune(&sender).await;
        assert_eq!(outcome, TuneOutcome::Applied { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let sender = FakeSender::new(None);
        let controller = BitrateController::new(BitrateConfig {
            max_retries: 4,
            ..BitrateConfig::default()
        });
        let start = tokio::time::Instant::now();
        let outcome = controller.tune(&sender).await;
        assert_eq!(outcome, TuneOutcome::GaveUp { attempts: 5 });
        assert_eq!(sender.reads.load(Ordering::SeqCst), 5);
        assert!(sender.applied.lock().unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(500) * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let sender = FakeSender::new(None);
        let controller = BitrateController::new(BitrateConfig {
            max_retries: 0,
            ..BitrateConfig::default()
        });
        assert_eq!(
            controller.tune(&sender).await,
            TuneOutcome::GaveUp { attempts: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_an_error() {
        let mut sender = FakeSender::new(Some(1));
        sender.reject = true;
        assert_eq!(
            BitrateController::default().tune(&sender).await,
            TuneOutcome::Rejected { attempts: 1 }
        );
    }
}
