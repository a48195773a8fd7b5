use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::engine::SUBSCRIPTIONS_DISPATCHER;
use crate::validate::validate_name;

/// Name of the default dispatcher every engine owns.
pub const DEFAULT_DISPATCHER: &str = "";

pub const MIN_QUEUE_SIZE: usize = 1;
pub const MAX_QUEUE_SIZE: usize = 1_000_000;

/// Engine configuration, loaded from the `engine` table of a TOML file
/// or assembled in code. Validated before any thread is started.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Number of timer threads backing the scheduler.
    pub scheduler_pool_size: usize,

    /// One entry per worker thread; each entry is the ordered list of
    /// dispatcher names that worker visits round-robin.
    pub thread_dispatcher_assignment: Vec<Vec<String>>,

    /// Mailbox capacity used when a processor declares no override.
    pub default_queue_size: usize,

    pub backoff: BackoffConfig,
}

#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            scheduler_pool_size: 1,
            thread_dispatcher_assignment: (0..num_cpus::get())
                .map(|_| vec![DEFAULT_DISPATCHER.to_string()])
                .collect(),
            default_queue_size: 1_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_delay: Duration::from_micros(50),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10),
        }
    }
}

impl EngineConfig {
    // Option<()> allows ? while parsing toml values, result is ignored
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        if let Some(n) = v.get("scheduler_pool_size").and_then(toml::Value::as_integer) {
            self.scheduler_pool_size = n as usize;
        }
        if let Some(n) = v.get("default_queue_size").and_then(toml::Value::as_integer) {
            self.default_queue_size = n as usize;
        }
        if let Some(rows) = v
            .get("thread_dispatcher_assignment")
            .and_then(toml::Value::as_array)
        {
            let mut assignment = Vec::with_capacity(rows.len());
            for row in rows {
                let names = row
                    .as_array()?
                    .iter()
                    .map(|name| name.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()?;
                assignment.push(names);
            }
            self.thread_dispatcher_assignment = assignment;
        }
        if let Some(backoff) = v.get("backoff") {
            self.backoff.merge(backoff);
        }
        None
    }

    /// All dispatcher names this configuration declares, plus the default
    /// dispatcher and the dedicated subscriptions dispatcher. Ordered, so
    /// anything locking several dispatchers does so in a fixed order.
    pub fn valid_dispatcher_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .thread_dispatcher_assignment
            .iter()
            .flatten()
            .cloned()
            .collect();
        names.insert(DEFAULT_DISPATCHER.to_string());
        names.insert(SUBSCRIPTIONS_DISPATCHER.to_string());
        names
    }

    /// The configured assignment, extended with a worker pinned to the
    /// subscriptions dispatcher when no configured worker covers it. The
    /// subscriptions processor must always have a serving thread.
    pub fn effective_assignment(&self) -> Vec<Vec<String>> {
        let mut assignment = self.thread_dispatcher_assignment.clone();
        let covered = assignment
            .iter()
            .flatten()
            .any(|name| name == SUBSCRIPTIONS_DISPATCHER);
        if !covered {
            assignment.push(vec![SUBSCRIPTIONS_DISPATCHER.to_string()]);
        }
        assignment
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler_pool_size == 0 {
            return Err(ConfigError::SchedulerPoolSize);
        }
        if self.thread_dispatcher_assignment.is_empty() {
            return Err(ConfigError::EmptyAssignment);
        }
        for (i, names) in self.thread_dispatcher_assignment.iter().enumerate() {
            if names.is_empty() {
                return Err(ConfigError::EmptyDispatcherList(i));
            }
            for name in names {
                if !name.is_empty() && validate_name(name).is_err() {
                    return Err(ConfigError::InvalidDispatcherName(name.clone()));
                }
            }
        }
        if self.default_queue_size < MIN_QUEUE_SIZE || self.default_queue_size > MAX_QUEUE_SIZE {
            return Err(ConfigError::QueueSize(self.default_queue_size));
        }
        self.backoff.validate()
    }
}

impl BackoffConfig {
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        if let Some(n) = v.get("base_delay_micros").and_then(toml::Value::as_integer) {
            self.base_delay = Duration::from_micros(n as u64);
        }
        if let Some(m) = v.get("multiplier").and_then(toml::Value::as_float) {
            self.multiplier = m;
        }
        if let Some(n) = v.get("max_delay_micros").and_then(toml::Value::as_integer) {
            self.max_delay = Duration::from_micros(n as u64);
        }
        None
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.as_nanos() == 0 {
            return Err(ConfigError::Backoff("base_delay must be positive"));
        }
        if self.multiplier <= 1.0 {
            return Err(ConfigError::Backoff("multiplier must be greater than 1.0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::Backoff("max_delay must be >= base_delay"));
        }
        Ok(())
    }
}

/// Load an `EngineConfig`, overlaying the compiled-in defaults with the
/// `engine` table of the file named by `ENGINE_CONF` (default
/// `config/engine.toml`). A missing or unreadable file leaves the
/// defaults untouched; validation happens at engine construction.
pub fn load_config() -> EngineConfig {
    use std::{
        env,
        fs::File,
        io::{self, Read},
    };

    let mut cfg = EngineConfig::default();

    let path = env::var("ENGINE_CONF").unwrap_or_else(|_| "config/engine.toml".into());
    let amendment = File::open(path)
        .and_then(|mut f| {
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            Ok(s)
        })
        .and_then(|s| {
            toml::from_str::<toml::Value>(&s).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        });
    if let Ok(amendment) = amendment {
        if let Some(engine) = amendment.get("engine") {
            cfg.merge(engine);
        }
    }

    cfg
}

pub enum ConfigError {
    SchedulerPoolSize,
    EmptyAssignment,
    EmptyDispatcherList(usize),
    InvalidDispatcherName(String),
    QueueSize(usize),
    Backoff(&'static str),
}

impl Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigError::SchedulerPoolSize => {
                f.write_str("Invalid config: scheduler_pool_size must be at least 1")
            }
            ConfigError::EmptyAssignment => {
                f.write_str("Invalid config: thread_dispatcher_assignment must not be empty")
            }
            ConfigError::EmptyDispatcherList(i) => f.write_str(&format!(
                "Invalid config: thread_dispatcher_assignment[{}] must not be empty",
                i
            )),
            ConfigError::InvalidDispatcherName(ref name) => f.write_str(&format!(
                "Invalid config: dispatcher name {:?} is not a valid name",
                name
            )),
            ConfigError::QueueSize(size) => f.write_str(&format!(
                "Invalid config: default_queue_size {} outside [{}, {}]",
                size, MIN_QUEUE_SIZE, MAX_QUEUE_SIZE
            )),
            ConfigError::Backoff(reason) => {
                f.write_str(&format!("Invalid config: backoff: {}", reason))
            }
        }
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_assignment() {
        let cfg = EngineConfig {
            thread_dispatcher_assignment: vec![],
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyAssignment)));
    }

    #[test]
    fn rejects_empty_inner_list() {
        let cfg = EngineConfig {
            thread_dispatcher_assignment: vec![vec!["a".into()], vec![]],
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyDispatcherList(1))
        ));
    }

    #[test]
    fn rejects_queue_size_out_of_range() {
        let cfg = EngineConfig {
            default_queue_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::QueueSize(0))));

        let cfg = EngineConfig {
            default_queue_size: MAX_QUEUE_SIZE + 1,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_backoff() {
        let mut cfg = EngineConfig::default();
        cfg.backoff.multiplier = 1.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Backoff(_))));

        let mut cfg = EngineConfig::default();
        cfg.backoff.max_delay = Duration::from_nanos(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn merges_engine_table() {
        let raw = r#"
            [engine]
            scheduler_pool_size = 3
            default_queue_size = 42
            thread_dispatcher_assignment = [["a", "b"], ["b"]]

            [engine.backoff]
            base_delay_micros = 10
            multiplier = 1.5
            max_delay_micros = 10000
        "#;
        let value = toml::from_str::<toml::Value>(raw).unwrap();

        let mut cfg = EngineConfig::default();
        cfg.merge(value.get("engine").unwrap());

        assert_eq!(cfg.scheduler_pool_size, 3);
        assert_eq!(cfg.default_queue_size, 42);
        assert_eq!(
            cfg.thread_dispatcher_assignment,
            vec![vec!["a".to_string(), "b".to_string()], vec!["b".to_string()]]
        );
        assert_eq!(cfg.backoff.base_delay, Duration::from_micros(10));
        assert_eq!(cfg.backoff.multiplier, 1.5);
        assert_eq!(cfg.backoff.max_delay, Duration::from_millis(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn dispatcher_names_include_builtins() {
        let cfg = EngineConfig {
            thread_dispatcher_assignment: vec![vec!["work".into()]],
            ..EngineConfig::default()
        };
        let names = cfg.valid_dispatcher_names();
        assert!(names.contains(""));
        assert!(names.contains("subscriptions"));
        assert!(names.contains("work"));
    }

    #[test]
    fn effective_assignment_covers_subscriptions() {
        let cfg = EngineConfig {
            thread_dispatcher_assignment: vec![vec!["work".into()]],
            ..EngineConfig::default()
        };
        let eff = cfg.effective_assignment();
        assert_eq!(eff.len(), 2);
        assert_eq!(eff[1], vec!["subscriptions".to_string()]);

        let cfg = EngineConfig {
            thread_dispatcher_assignment: vec![vec!["work".into(), "subscriptions".into()]],
            ..EngineConfig::default()
        };
        assert_eq!(cfg.effective_assignment().len(), 1);
    }
}
