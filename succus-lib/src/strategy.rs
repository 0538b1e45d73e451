//! Ordered strategy chains.
//!
//! Secret negotiation and message decoding both work the same way: a list of
//! named attempts is tried in order, the first success wins, and exhaustion
//! is reported with the full attempt log. [`StrategyChain`] is the single
//! driver loop for both.

use serde::{Deserialize, Serialize};

/// One named attempt.
pub struct Strategy<'a, T> {
    name: &'static str,
    attempt: Box<dyn Fn() -> Result<T, String> + 'a>,
}

impl<'a, T> Strategy<'a, T> {
    pub fn new(name: &'static str, attempt: impl Fn() -> Result<T, String> + 'a) -> Self {
        Self {
            name,
            attempt: Box::new(attempt),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Record of a single attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Strategy name.
    pub strategy: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Error message if failed.
    pub error: Option<String>,
}

/// Result of running a chain.
#[derive(Debug)]
pub enum ChainOutcome<T> {
    /// A strategy produced a value.
    Succeeded {
        value: T,
        strategy: &'static str,
        attempts: Vec<AttemptRecord>,
    },
    /// Every strategy failed.
    Exhausted { attempts: Vec<AttemptRecord> },
}

impl<T> ChainOutcome<T> {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts } => attempts,
        }
    }

    /// Error of the last failed attempt, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.attempts()
            .iter()
            .rev()
            .find_map(|a| a.error.as_deref())
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Ordered list of strategies evaluated by one driver loop.
pub struct StrategyChain<'a, T> {
    label: &'static str,
    strategies: Vec<Strategy<'a, T>>,
}

impl<'a, T> StrategyChain<'a, T> {
    /// Create an empty chain; `label` tags log output.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            strategies: Vec::new(),
        }
    }

    /// Append a strategy.
    pub fn with(
        mut self,
        name: &'static str,
        attempt: impl Fn() -> Result<T, String> + 'a,
    ) -> Self {
        self.strategies.push(Strategy::new(name, attempt));
        self
    }

    /// Append a strategy only when `enabled`.
    pub fn with_if(
        self,
        enabled: bool,
        name: &'static str,
        attempt: impl Fn() -> Result<T, String> + 'a,
    ) -> Self {
        if enabled {
            self.with(name, attempt)
        } else {
            self
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(Strategy::name).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order; stop at the first success.
    pub fn run(&self) -> ChainOutcome<T> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match (strategy.attempt)() {
                Ok(value) => {
                    tracing::debug!(chain = self.label, strategy = strategy.name, "strategy succeeded");
                    attempts.push(AttemptRecord {
                        strategy: strategy.name.to_string(),
                        success: true,
                        error: None,
                    });
                    return ChainOutcome::Succeeded {
                        value,
                        strategy: strategy.name,
                        attempts,
                    };
                }
                Err(error) => {
                    tracing::debug!(chain = self.label, strategy = strategy.name, %error, "strategy failed");
                    attempts.push(AttemptRecord {
                        strategy: strategy.name.to_string(),
                        success: false,
                        error: Some(error),
                    });
                }
            }
        }

        ChainOutcome::Exhausted { attempts }
    }
}
