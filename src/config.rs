//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatcher::SubtaskKind;

/// One duration per subtask kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindTimeouts {
    pub login: Duration,
    pub list: Duration,
    pub elect: Duration,
}

impl KindTimeouts {
    /// Timeout applying to `kind`.
    pub fn for_kind(&self, kind: SubtaskKind) -> Duration {
        match kind {
            SubtaskKind::Login => self.login,
            SubtaskKind::List => self.list,
            SubtaskKind::Elect => self.elect,
        }
    }

    /// Same timeout for every kind.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            login: timeout,
            list: timeout,
            elect: timeout,
        }
    }
}

impl Default for KindTimeouts {
    fn default() -> Self {
        Self {
            login: Duration::from_secs(10),
            list: Duration::from_secs(30),
            elect: Duration::from_secs(5),
        }
    }
}

/// Dispatcher timing and capacity.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of each per-handler queue.
    pub queue_capacity: usize,
    /// How long a poller waits for any accepted queue to yield an item.
    pub pull_timeout: Duration,
    /// How long `submit` waits for its handler queue to accept the item.
    pub push_timeout: KindTimeouts,
    /// How long `submit` waits for a result once the item is queued.
    pub result_timeout: KindTimeouts,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            pull_timeout: Duration::from_secs(30),
            push_timeout: KindTimeouts::default(),
            result_timeout: KindTimeouts::default(),
        }
    }
}

/// Broker process configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Worker-facing endpoint (`get_task` / `put_result`).
    pub task_bind: String,
    /// Administrative API endpoint.
    pub api_bind: String,
    /// PEM file holding the broker's RSA private key.
    pub private_key_path: PathBuf,
    pub dispatcher: DispatcherConfig,
    pub scheduler: SchedulerConfig,
    /// Brokered handler names registered at start-up.
    pub handlers: Vec<String>,
    /// Optional JSON file seeding the task store.
    pub tasks_file: Option<PathBuf>,
    /// Permissive CORS on the admin API.
    pub cors: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            task_bind: "0.0.0.0:8001".to_string(),
            api_bind: "0.0.0.0:8000".to_string(),
            private_key_path: PathBuf::from("private.pem"),
            dispatcher: DispatcherConfig::default(),
            scheduler: SchedulerConfig::default(),
            handlers: vec!["join".to_string()],
            tasks_file: None,
            cors: false,
        }
    }
}

impl BrokerConfig {
    /// Build from `SEATRELAY_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let dispatcher_defaults = defaults.dispatcher.clone();

        let dispatcher = DispatcherConfig {
            queue_capacity: env_parse("SEATRELAY_QUEUE_CAPACITY")
                .unwrap_or(dispatcher_defaults.queue_capacity),
            pull_timeout: env_secs("SEATRELAY_PULL_TIMEOUT_SECS")
                .unwrap_or(dispatcher_defaults.pull_timeout),
            push_timeout: KindTimeouts {
                login: env_secs("SEATRELAY_PUSH_TIMEOUT_LOGIN_SECS")
                    .unwrap_or(dispatcher_defaults.push_timeout.login),
                list: env_secs("SEATRELAY_PUSH_TIMEOUT_LIST_SECS")
                    .unwrap_or(dispatcher_defaults.push_timeout.list),
                elect: env_secs("SEATRELAY_PUSH_TIMEOUT_ELECT_SECS")
                    .unwrap_or(dispatcher_defaults.push_timeout.elect),
            },
            result_timeout: KindTimeouts {
                login: env_secs("SEATRELAY_RESULT_TIMEOUT_LOGIN_SECS")
                    .unwrap_or(dispatcher_defaults.result_timeout.login),
                list: env_secs("SEATRELAY_RESULT_TIMEOUT_LIST_SECS")
                    .unwrap_or(dispatcher_defaults.result_timeout.list),
                elect: env_secs("SEATRELAY_RESULT_TIMEOUT_ELECT_SECS")
                    .unwrap_or(dispatcher_defaults.result_timeout.elect),
            },
        };

        let handlers = std::env::var("SEATRELAY_HANDLERS")
            .map(|s| split_list(&s))
            .unwrap_or(defaults.handlers);

        Self {
            task_bind: std::env::var("SEATRELAY_TASK_BIND").unwrap_or(defaults.task_bind),
            api_bind: std::env::var("SEATRELAY_API_BIND").unwrap_or(defaults.api_bind),
            private_key_path: std::env::var("SEATRELAY_PRIVATE_KEY")
                .map(PathBuf::from)
                .unwrap_or(defaults.private_key_path),
            dispatcher,
            scheduler: SchedulerConfig::from_env(),
            handlers,
            tasks_file: std::env::var("SEATRELAY_TASKS_FILE").ok().map(PathBuf::from),
            cors: env_flag("SEATRELAY_CORS"),
        }
    }
}

/// Task scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Consecutive failed iterations before the session is invalidated.
    pub max_retry: u32,
    /// Fixed tick between loop iterations.
    pub loop_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retry: 5,
            loop_interval: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retry: env_parse("SEATRELAY_MAX_RETRY").unwrap_or(defaults.max_retry),
            loop_interval: env_millis("SEATRELAY_LOOP_INTERVAL_MS")
                .unwrap_or(defaults.loop_interval),
        }
    }
}

/// Satellite (remote worker) configuration.
#[derive(Debug, Clone)]
pub struct SatelliteConfig {
    /// Root URL of the broker's task endpoint.
    pub server: String,
    /// PEM file holding the broker's RSA public key.
    pub public_key_path: PathBuf,
    /// Pause between consecutive fetches of one routine.
    pub delay: Duration,
    /// Number of concurrent polling routines.
    pub routines: usize,
    /// Suppress per-task info logs.
    pub silent: bool,
}

impl Default for SatelliteConfig {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:8001".to_string(),
            public_key_path: PathBuf::from("public.pem"),
            delay: Duration::from_millis(200),
            routines: 8,
            silent: false,
        }
    }
}

impl SatelliteConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server: std::env::var("SEATRELAY_SERVER").unwrap_or(defaults.server),
            public_key_path: std::env::var("SEATRELAY_PUBLIC_KEY")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_key_path),
            delay: env_millis("SEATRELAY_DELAY_MS").unwrap_or(defaults.delay),
            routines: env_parse::<usize>("SEATRELAY_ROUTINES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.routines),
            silent: env_flag("SEATRELAY_SILENT"),
        }
    }
}

/// Single-process mode: broker, satellites and one task in the same process.
#[derive(Debug, Clone)]
pub struct PersonalConfig {
    /// Loopback port for the in-process task endpoint.
    pub port: u16,
    /// Number of silent satellite routines.
    pub routines: usize,
    /// Pause between fetches of one routine.
    pub delay: Duration,
    /// How often the task statistics are polled for completion.
    pub report_interval: Duration,
    /// RSA modulus size for the throwaway key pair.
    pub key_bits: usize,
    pub dispatcher: DispatcherConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for PersonalConfig {
    fn default() -> Self {
        Self {
            port: 13013,
            routines: 8,
            delay: Duration::from_millis(200),
            report_interval: Duration::from_secs(2),
            key_bits: 2048,
            dispatcher: DispatcherConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl PersonalConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("SEATRELAY_PERSONAL_PORT").unwrap_or(defaults.port),
            routines: env_parse::<usize>("SEATRELAY_ROUTINES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.routines),
            delay: env_millis("SEATRELAY_DELAY_MS").unwrap_or(defaults.delay),
            scheduler: SchedulerConfig::from_env(),
            ..defaults
        }
    }

    pub fn bind(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn server(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
