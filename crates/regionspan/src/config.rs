//! Range lock configuration

use crate::error::{Result, SpanError};
use crate::span::Span;
use serde::{Deserialize, Serialize};

/// Configuration of one [`RegionRangeLock`](crate::RegionRangeLock)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeLockConfig {
    /// Keyspace guarded by the lock
    pub span: Span,

    /// Checkpoint of the whole keyspace before any range is unlocked
    pub start_ts: u64,

    /// Changefeed label attached to log lines
    pub changefeed: String,

    /// Identifies this lock instance in logs and metrics
    pub lock_id: u64,
}

impl Default for RangeLockConfig {
    fn default() -> Self {
        Self {
            span: Span::full(),
            start_ts: 0,
            changefeed: "default".to_string(),
            lock_id: 0,
        }
    }
}

impl RangeLockConfig {
    pub fn builder() -> RangeLockConfigBuilder {
        RangeLockConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.span.is_empty() {
            return Err(SpanError::config(format!(
                "lock span {} is empty",
                self.span
            )));
        }
        if self.changefeed.is_empty() {
            return Err(SpanError::config("changefeed label must not be empty"));
        }
        Ok(())
    }
}

/// Builder for range lock configuration
#[derive(Debug, Default)]
pub struct RangeLockConfigBuilder {
    span: Option<Span>,
    start_ts: Option<u64>,
    changefeed: Option<String>,
    lock_id: Option<u64>,
}

impl RangeLockConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unbounded end keys are widened to the upper bound key.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span.hack());
        self
    }

    pub fn start_ts(mut self, ts: u64) -> Self {
        self.start_ts = Some(ts);
        self
    }

    pub fn changefeed(mut self, changefeed: impl Into<String>) -> Self {
        self.changefeed = Some(changefeed.into());
        self
    }

    pub fn lock_id(mut self, id: u64) -> Self {
        self.lock_id = Some(id);
        self
    }

    pub fn build(self) -> Result<RangeLockConfig> {
        let defaults = RangeLockConfig::default();
        let config = RangeLockConfig {
            span: self.span.unwrap_or(defaults.span),
            start_ts: self.start_ts.unwrap_or(defaults.start_ts),
            changefeed: self.changefeed.unwrap_or(defaults.changefeed),
            lock_id: self.lock_id.unwrap_or(defaults.lock_id),
        };
        config.validate()?;
        Ok(config)
    }
}
