//! Consumer option builder.
//!
//! A [`ConsumerOption`] is resolved once per consume registration by folding
//! option-functions over an empty value: the default set first, then the
//! broker/topic/group binding, then whatever the caller passed.

use crate::error::OptionError;
use krelay_core::{CommitMode, ReaderConfig};
use std::time::Duration;
use validator::Validate;

/// Default maximum fetch size in bytes.
pub const DEFAULT_MAX_BYTES: usize = 1_000_000;
/// Default number of dial attempts made by the underlying reader.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: usize = 10;
/// Default consumer-group heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);
/// Default consumer-group rebalance timeout.
pub const DEFAULT_REBALANCE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default read/fetch/commit attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
/// Default handler attempts.
pub const DEFAULT_RETRY_LOGIC_ATTEMPTS: u32 = 10;
/// Default sleep between read/fetch/commit attempts.
pub const DEFAULT_WAITING_TIME_TO_RECONNECT: Duration = Duration::from_secs(15);
/// Default sleep between handler attempts.
pub const DEFAULT_WAITING_TIME_TO_RETRY_LOGIC: Duration = Duration::from_secs(30);
/// Default consumer span name.
pub const DEFAULT_SPAN_NAME: &str = "kafka.consume";
/// Default bound on handling one message.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(360);

/// Fully resolved, immutable consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct ConsumerOption {
    /// Bootstrap brokers
    #[validate(length(min = 1))]
    pub brokers: Vec<String>,

    /// Physical (prefixed) topic
    #[validate(length(min = 1))]
    pub topic: String,

    /// Consumer group id
    #[validate(length(min = 1))]
    pub group_id: String,

    /// Maximum fetch size in bytes
    #[validate(range(min = 1))]
    pub max_bytes: usize,

    /// Dial attempts made by the underlying reader
    pub max_connect_attempts: usize,

    /// Total read/fetch/commit calls per step
    pub reconnect_attempts: u32,

    /// Sleep between read/fetch/commit attempts
    pub waiting_time_to_reconnect: Duration,

    /// Total handler calls per message
    pub retry_logic_attempts: u32,

    /// Sleep between handler attempts
    pub waiting_time_to_retry_logic: Duration,

    /// Consumer-group heartbeat interval
    pub heartbeat_interval: Duration,

    /// Consumer-group rebalance timeout
    pub rebalance_timeout: Duration,

    /// Strict (explicit commit) or loose (auto commit) delivery
    pub strict_commit: bool,

    /// Name of the consumer-kind span
    #[validate(length(min = 1))]
    pub span_name: String,

    /// Wall-clock bound on handling one message, retries included
    pub processing_timeout: Duration,

    /// Messages older than this are skipped without calling the handler
    pub skip_messages_older_than: Option<Duration>,
}

impl ConsumerOption {
    fn empty() -> Self {
        Self {
            brokers: Vec::new(),
            topic: String::new(),
            group_id: String::new(),
            max_bytes: 0,
            max_connect_attempts: 0,
            reconnect_attempts: 0,
            waiting_time_to_reconnect: Duration::ZERO,
            retry_logic_attempts: 0,
            waiting_time_to_retry_logic: Duration::ZERO,
            heartbeat_interval: Duration::ZERO,
            rebalance_timeout: Duration::ZERO,
            strict_commit: true,
            span_name: DEFAULT_SPAN_NAME.to_string(),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            skip_messages_older_than: None,
        }
    }

    /// Fold `options` in order and validate the result.
    ///
    /// # Errors
    /// The first option-function error, or a validation error.
    pub fn build<I>(options: I) -> Result<Self, OptionError>
    where
        I: IntoIterator<Item = OptionFn>,
    {
        let mut resolved = Self::empty();
        for option in options {
            option(&mut resolved)?;
        }
        resolved.validate()?;
        Ok(resolved)
    }

    /// Resolve the full chain used by a consume registration: defaults,
    /// then the binding, then the caller's options.
    ///
    /// # Errors
    /// See [`ConsumerOption::build`].
    pub fn resolve(
        brokers: Vec<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
        caller: Vec<OptionFn>,
    ) -> Result<Self, OptionError> {
        let mut chain = default_options();
        chain.push(bind(brokers, topic, group_id));
        chain.extend(caller);
        Self::build(chain)
    }

    /// Commit mode implied by the strictness flag.
    #[must_use]
    pub const fn commit_mode(&self) -> CommitMode {
        if self.strict_commit {
            CommitMode::Explicit
        } else {
            CommitMode::Auto
        }
    }

    /// Settings for the underlying broker reader.
    #[must_use]
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            brokers: self.brokers.clone(),
            topic: self.topic.clone(),
            group_id: self.group_id.clone(),
            max_bytes: self.max_bytes,
            max_attempts: self.max_connect_attempts,
            heartbeat_interval: self.heartbeat_interval,
            rebalance_timeout: self.rebalance_timeout,
            commit_mode: self.commit_mode(),
        }
    }
}

/// One step of option resolution.
pub type OptionFn = Box<dyn FnOnce(&mut ConsumerOption) -> Result<(), OptionError> + Send>;

fn option<F>(f: F) -> OptionFn
where
    F: FnOnce(&mut ConsumerOption) -> Result<(), OptionError> + Send + 'static,
{
    Box::new(f)
}

fn non_zero(option: &'static str, value: Duration) -> Result<Duration, OptionError> {
    if value.is_zero() {
        return Err(OptionError::Invalid {
            option,
            reason: "duration must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// The default option set, always applied first.
#[must_use]
pub fn default_options() -> Vec<OptionFn> {
    vec![
        max_bytes(DEFAULT_MAX_BYTES),
        max_connect_attempts(DEFAULT_MAX_CONNECT_ATTEMPTS),
        heartbeat_interval(DEFAULT_HEARTBEAT_INTERVAL),
        rebalance_timeout(DEFAULT_REBALANCE_TIMEOUT),
        reconnect_attempts(DEFAULT_RECONNECT_ATTEMPTS),
        retry_logic_attempts(DEFAULT_RETRY_LOGIC_ATTEMPTS),
        waiting_time_to_reconnect(DEFAULT_WAITING_TIME_TO_RECONNECT),
        waiting_time_to_retry_logic(DEFAULT_WAITING_TIME_TO_RETRY_LOGIC),
        strict_commit(),
    ]
}

/// Bind the consumer to brokers, a physical topic and a group.
#[must_use]
pub fn bind(brokers: Vec<String>, topic: impl Into<String>, group_id: impl Into<String>) -> OptionFn {
    let topic = topic.into();
    let group_id = group_id.into();
    option(move |o| {
        if brokers.is_empty() {
            return Err(OptionError::Invalid {
                option: "brokers",
                reason: "at least one broker is required".to_string(),
            });
        }
        o.brokers = brokers;
        o.topic = topic;
        o.group_id = group_id;
        Ok(())
    })
}

/// Maximum fetch size in bytes.
#[must_use]
pub fn max_bytes(bytes: usize) -> OptionFn {
    option(move |o| {
        if bytes == 0 {
            return Err(OptionError::Invalid {
                option: "max_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        o.max_bytes = bytes;
        Ok(())
    })
}

/// Dial attempts made by the underlying reader.
#[must_use]
pub fn max_connect_attempts(attempts: usize) -> OptionFn {
    option(move |o| {
        o.max_connect_attempts = attempts;
        Ok(())
    })
}

/// Consumer-group heartbeat interval.
#[must_use]
pub fn heartbeat_interval(interval: Duration) -> OptionFn {
    option(move |o| {
        o.heartbeat_interval = non_zero("heartbeat_interval", interval)?;
        Ok(())
    })
}

/// Consumer-group rebalance timeout.
#[must_use]
pub fn rebalance_timeout(timeout: Duration) -> OptionFn {
    option(move |o| {
        o.rebalance_timeout = non_zero("rebalance_timeout", timeout)?;
        Ok(())
    })
}

/// Total read/fetch/commit calls per step. Zero behaves as one.
#[must_use]
pub fn reconnect_attempts(attempts: u32) -> OptionFn {
    option(move |o| {
        o.reconnect_attempts = attempts;
        Ok(())
    })
}

/// Sleep between read/fetch/commit attempts.
#[must_use]
pub fn waiting_time_to_reconnect(wait: Duration) -> OptionFn {
    option(move |o| {
        o.waiting_time_to_reconnect = wait;
        Ok(())
    })
}

/// Total handler calls per message. Zero behaves as one.
#[must_use]
pub fn retry_logic_attempts(attempts: u32) -> OptionFn {
    option(move |o| {
        o.retry_logic_attempts = attempts;
        Ok(())
    })
}

/// Sleep between handler attempts.
#[must_use]
pub fn waiting_time_to_retry_logic(wait: Duration) -> OptionFn {
    option(move |o| {
        o.waiting_time_to_retry_logic = wait;
        Ok(())
    })
}

/// Loose delivery: offsets advance on read and handler failures are skipped.
#[must_use]
pub fn auto_commit() -> OptionFn {
    option(|o| {
        o.strict_commit = false;
        Ok(())
    })
}

/// Strict delivery: explicit commit after a successful handler.
#[must_use]
pub fn strict_commit() -> OptionFn {
    option(|o| {
        o.strict_commit = true;
        Ok(())
    })
}

/// Name of the consumer-kind span.
#[must_use]
pub fn span_name(name: impl Into<String>) -> OptionFn {
    let name = name.into();
    option(move |o| {
        if name.trim().is_empty() {
            return Err(OptionError::Invalid {
                option: "span_name",
                reason: "must not be empty".to_string(),
            });
        }
        o.span_name = name;
        Ok(())
    })
}

/// Wall-clock bound on handling one message.
#[must_use]
pub fn processing_timeout(timeout: Duration) -> OptionFn {
    option(move |o| {
        o.processing_timeout = non_zero("processing_timeout", timeout)?;
        Ok(())
    })
}

/// Skip messages whose broker timestamp is older than `age`.
#[must_use]
pub fn skip_messages_older_than(age: Duration) -> OptionFn {
    option(move |o| {
        o.skip_messages_older_than = Some(non_zero("skip_messages_older_than", age)?);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(caller: Vec<OptionFn>) -> Result<ConsumerOption, OptionError> {
        ConsumerOption::resolve(vec!["localhost:9092".to_string()], "orders", "g", caller)
    }

    #[test]
    fn test_defaults() {
        let option = resolve(Vec::new()).unwrap();

        assert_eq!(option.max_bytes, 1_000_000);
        assert_eq!(option.max_connect_attempts, 10);
        assert_eq!(option.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(option.rebalance_timeout, Duration::from_secs(60));
        assert_eq!(option.reconnect_attempts, 10);
        assert_eq!(option.retry_logic_attempts, 10);
        assert_eq!(option.waiting_time_to_reconnect, Duration::from_secs(15));
        assert_eq!(option.waiting_time_to_retry_logic, Duration::from_secs(30));
        assert!(option.strict_commit);
        assert_eq!(option.commit_mode(), CommitMode::Explicit);
        assert_eq!(option.span_name, "kafka.consume");
        assert_eq!(option.processing_timeout, Duration::from_secs(360));
        assert_eq!(option.skip_messages_older_than, None);
    }

    #[test]
    fn test_caller_overrides_defaults_but_keeps_binding() {
        let option = resolve(vec![
            auto_commit(),
            reconnect_attempts(3),
            waiting_time_to_retry_logic(Duration::from_millis(5)),
        ])
        .unwrap();

        assert!(!option.strict_commit);
        assert_eq!(option.reconnect_attempts, 3);
        assert_eq!(option.waiting_time_to_retry_logic, Duration::from_millis(5));
        assert_eq!(option.topic, "orders");
        assert_eq!(option.group_id, "g");

        let reader = option.reader_config();
        assert_eq!(reader.commit_mode, CommitMode::Auto);
        assert_eq!(reader.brokers, vec!["localhost:9092"]);
    }

    #[test]
    fn test_invalid_option_aborts() {
        assert!(matches!(
            resolve(vec![max_bytes(0)]),
            Err(OptionError::Invalid { option: "max_bytes", .. })
        ));
        assert!(resolve(vec![span_name(" ")]).is_err());
        assert!(resolve(vec![processing_timeout(Duration::ZERO)]).is_err());
    }

    #[test]
    fn test_missing_binding_fails_validation() {
        let result = ConsumerOption::build(default_options());
        assert!(matches!(result, Err(OptionError::Validation(_))));
    }
}
