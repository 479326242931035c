//! Bounded retry for single-file downloads.
//!
//! A small state machine: the caller reports each attempt's result and is
//! told whether to issue a fresh request. There is no backoff and no jitter.

/// Where a retry sequence stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `attempt` (1-based) is in flight or about to be.
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    /// No further attempts will be made.
    RetryExhausted { attempts: u32 },
}

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

#[derive(Debug)]
pub struct BoundedRetry {
    max_attempts: u32,
    state: RetryState,
}

impl BoundedRetry {
    /// `max_attempts` counts the first try; values below one are raised to one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Current 1-based attempt number, or the total once finished.
    pub fn attempt(&self) -> u32 {
        match self.state {
            RetryState::Attempting { attempt } => attempt,
            RetryState::Succeeded { attempts } | RetryState::RetryExhausted { attempts } => {
                attempts
            }
        }
    }

    pub fn is_final_attempt(&self) -> bool {
        matches!(self.state, RetryState::Attempting { attempt } if attempt >= self.max_attempts)
    }

    pub fn record_success(&mut self) {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = RetryState::Succeeded { attempts: attempt };
        }
    }

    /// Records a failed attempt. Only transient failures on a non-final
    /// attempt are retried.
    pub fn record_failure(&mut self, transient: bool) -> RetryDecision {
        match self.state {
            RetryState::Attempting { attempt } if transient && attempt < self.max_attempts => {
                self.state = RetryState::Attempting {
                    attempt: attempt + 1,
                };
                RetryDecision::Retry
            }
            RetryState::Attempting { attempt } => {
                self.state = RetryState::RetryExhausted { attempts: attempt };
                RetryDecision::GiveUp
            }
            RetryState::Succeeded { .. } | RetryState::RetryExhausted { .. } => {
                RetryDecision::GiveUp
            }
        }
    }
}

impl Default for BoundedRetry {
    fn default() -> Self {
        Self::new(3)
    }
}
