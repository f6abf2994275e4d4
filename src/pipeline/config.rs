//! Pipeline configuration from environment variables
//!
//! Values are read through a `ConfigSource` once per cycle, so edits to the
//! `.env` file (or the static source in tests) apply on the next cycle.
//! Missing variables fall back to defaults; present but malformed ones are
//! configuration errors.

use super::detection::PatternId;
use super::priority::Priority;
use super::registry::DetectorRegistry;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    Missing(&'static str),
    /// `.env` file present but unparseable
    File { path: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "invalid {}='{}': {}", key, value, reason)
            }
            ConfigError::Missing(key) => write!(f, "{} must be set", key),
            ConfigError::File { path, reason } => write!(f, "cannot read {}: {}", path, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which patterns may notify
#[derive(Debug, Clone, PartialEq)]
pub enum PatternFilter {
    All,
    /// Ids and/or upper-cased names
    Only {
        ids: HashSet<PatternId>,
        names: HashSet<String>,
    },
}

impl PatternFilter {
    pub fn allows(&self, id: PatternId, name: &str) -> bool {
        match self {
            PatternFilter::All => true,
            PatternFilter::Only { ids, names } => {
                ids.contains(&id) || names.contains(&name.to_ascii_uppercase())
            }
        }
    }

    /// `all`, or a comma list mixing ids and names (`1,GOLDEN_CROSS`)
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("all") {
            return PatternFilter::All;
        }
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.parse::<u32>() {
                Ok(id) => {
                    ids.insert(PatternId(id));
                }
                Err(_) => {
                    names.insert(item.to_ascii_uppercase());
                }
            }
        }
        PatternFilter::Only { ids, names }
    }

    /// Every listed id and name must belong to a registered pattern
    pub fn check_known(&self, registry: &DetectorRegistry) -> Result<(), String> {
        let (ids, names) = match self {
            PatternFilter::All => return Ok(()),
            PatternFilter::Only { ids, names } => (ids, names),
        };
        if ids.is_empty() && names.is_empty() {
            return Err("no patterns listed".to_string());
        }

        let mut unknown: Vec<String> = ids
            .iter()
            .filter(|id| registry.get(**id).is_none())
            .map(|id| id.to_string())
            .chain(
                names
                    .iter()
                    .filter(|name| registry.find_by_name(name).is_none())
                    .cloned(),
            )
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort();
        Err(format!("unknown pattern(s): {}", unknown.join(", ")))
    }
}

/// Which priority tiers may notify
#[derive(Debug, Clone, PartialEq)]
pub enum PriorityFilter {
    All,
    Only(HashSet<Priority>),
}

impl PriorityFilter {
    pub fn allows(&self, priority: Priority) -> bool {
        match self {
            PriorityFilter::All => true,
            PriorityFilter::Only(set) => set.contains(&priority),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.trim().eq_ignore_ascii_case("all") {
            return Ok(PriorityFilter::All);
        }
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| Priority::from_str(item).ok_or_else(|| format!("unknown priority '{}'", item)))
            .collect::<Result<HashSet<_>, _>>()
            .map(PriorityFilter::Only)
    }
}

/// Delay before delivery, per priority tier
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityDelays {
    pub very_high: Duration,
    pub high: Duration,
    pub medium: Duration,
    pub low: Duration,
}

impl Default for PriorityDelays {
    fn default() -> Self {
        Self {
            very_high: Priority::VeryHigh.default_delay(),
            high: Priority::High.default_delay(),
            medium: Priority::Medium.default_delay(),
            low: Priority::Low.default_delay(),
        }
    }
}

impl PriorityDelays {
    pub fn delay_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::VeryHigh => self.very_high,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    /// Every tier delivers inline
    pub fn none() -> Self {
        Self {
            very_high: Duration::ZERO,
            high: Duration::ZERO,
            medium: Duration::ZERO,
            low: Duration::ZERO,
        }
    }
}

/// The part of the configuration the dispatch policy reads
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub enabled_patterns: PatternFilter,
    pub enabled_priorities: PriorityFilter,
    /// Minimum spacing between two deliveries of the same (pattern, instrument)
    pub cooldown: Duration,
    pub delays: PriorityDelays,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            enabled_patterns: PatternFilter::All,
            enabled_priorities: PriorityFilter::All,
            cooldown: Duration::from_secs(3600),
            delays: PriorityDelays::default(),
        }
    }
}

/// Configuration for pipeline runtime
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Path to SQLite database file; `None` keeps cooldown state in memory
    pub db_path: Option<String>,

    /// Directory holding the `.sql` migrations
    pub schema_dir: String,

    pub instruments: Vec<String>,

    /// Where `FileSnapshotSource` looks for `<instrument>.json`
    pub data_dir: String,

    pub dispatch: DispatchSettings,

    pub detector_concurrency: usize,

    pub evaluation_interval_ms: u64,

    pub alert_history_capacity: usize,

    /// alert_history rows older than this are pruned
    pub history_retention_secs: i64,

    pub discord_webhook_url: Option<String>,

    /// Master enable flag for pipeline
    pub enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            schema_dir: "sql".to_string(),
            instruments: vec!["BTCUSDT".to_string()],
            data_dir: "data".to_string(),
            dispatch: DispatchSettings::default(),
            detector_concurrency: 4,
            evaluation_interval_ms: 300_000,
            alert_history_capacity: 500,
            history_retention_secs: 30 * 24 * 3600,
            discord_webhook_url: None,
            enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PATTERNWATCH_DB_PATH` (default: unset, in-memory cooldown state)
    /// - `PATTERNWATCH_SCHEMA_DIR` (default: sql)
    /// - `PATTERNWATCH_INSTRUMENTS` (default: BTCUSDT)
    /// - `PATTERNWATCH_DATA_DIR` (default: data)
    /// - `ENABLED_PATTERNS` (default: all)
    /// - `ENABLED_PRIORITIES` (default: all)
    /// - `ALERT_COOLDOWN_SECS` (default: 3600)
    /// - `DELAY_VERY_HIGH_SECS` / `DELAY_HIGH_SECS` (default: 0)
    /// - `DELAY_MEDIUM_SECS` (default: 30), `DELAY_LOW_SECS` (default: 60)
    /// - `DETECTOR_CONCURRENCY` (default: 4)
    /// - `EVALUATION_INTERVAL_MS` (default: 300000)
    /// - `ALERT_HISTORY_CAPACITY` (default: 500)
    /// - `ALERT_HISTORY_RETENTION_SECS` (default: 30 days)
    /// - `DISCORD_WEBHOOK_URL` (default: unset, alerts go to the log)
    /// - `ENABLE_PIPELINE` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let default_delays = PriorityDelays::default();

        let instruments = match get("PATTERNWATCH_INSTRUMENTS") {
            Some(raw) => {
                let list: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_ascii_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if list.is_empty() {
                    return Err(ConfigError::Missing("PATTERNWATCH_INSTRUMENTS"));
                }
                list
            }
            None => defaults.instruments,
        };

        let enabled_priorities = match get("ENABLED_PRIORITIES") {
            Some(raw) => PriorityFilter::parse(&raw).map_err(|reason| ConfigError::Invalid {
                key: "ENABLED_PRIORITIES",
                value: raw.clone(),
                reason,
            })?,
            None => PriorityFilter::All,
        };

        let enabled_patterns = match get("ENABLED_PATTERNS") {
            Some(raw) => {
                let filter = PatternFilter::parse(&raw);
                filter
                    .check_known(&DetectorRegistry::standard())
                    .map_err(|reason| ConfigError::Invalid {
                        key: "ENABLED_PATTERNS",
                        value: raw.clone(),
                        reason,
                    })?;
                filter
            }
            None => PatternFilter::All,
        };

        let dispatch = DispatchSettings {
            enabled_patterns,
            enabled_priorities,
            cooldown: Duration::from_secs(parse_or(&get, "ALERT_COOLDOWN_SECS", 3600u64)?),
            delays: PriorityDelays {
                very_high: secs_or(&get, "DELAY_VERY_HIGH_SECS", default_delays.very_high)?,
                high: secs_or(&get, "DELAY_HIGH_SECS", default_delays.high)?,
                medium: secs_or(&get, "DELAY_MEDIUM_SECS", default_delays.medium)?,
                low: secs_or(&get, "DELAY_LOW_SECS", default_delays.low)?,
            },
        };

        let detector_concurrency: usize = parse_or(&get, "DETECTOR_CONCURRENCY", defaults.detector_concurrency)?;
        if detector_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "DETECTOR_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let evaluation_interval_ms: u64 =
            parse_or(&get, "EVALUATION_INTERVAL_MS", defaults.evaluation_interval_ms)?;
        if evaluation_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "EVALUATION_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            db_path: get("PATTERNWATCH_DB_PATH"),
            schema_dir: get("PATTERNWATCH_SCHEMA_DIR").unwrap_or(defaults.schema_dir),
            instruments,
            data_dir: get("PATTERNWATCH_DATA_DIR").unwrap_or(defaults.data_dir),
            dispatch,
            detector_concurrency,
            evaluation_interval_ms,
            alert_history_capacity: parse_or(&get, "ALERT_HISTORY_CAPACITY", defaults.alert_history_capacity)?,
            history_retention_secs: parse_or(&get, "ALERT_HISTORY_RETENTION_SECS", defaults.history_retention_secs)?,
            discord_webhook_url: get("DISCORD_WEBHOOK_URL"),
            enabled: parse_or(&get, "ENABLE_PIPELINE", defaults.enabled)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}

/// Where each cycle gets its configuration from
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<PipelineConfig, ConfigError>;
}

/// Re-reads the environment on every call
///
/// With a `.env` path, the file is parsed again on each load and its values
/// take precedence over the process environment. `dotenv()` copies the file
/// into the process environment at startup, so without re-reading it an edit
/// would never be seen. A missing file falls back to the process environment.
#[derive(Debug, Default)]
pub struct EnvConfigSource {
    dotenv_path: Option<PathBuf>,
}

impl EnvConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dotenv(path: impl Into<PathBuf>) -> Self {
        Self {
            dotenv_path: Some(path.into()),
        }
    }
}

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> Result<PipelineConfig, ConfigError> {
        let overrides = match &self.dotenv_path {
            Some(path) => read_dotenv(path)?,
            None => HashMap::new(),
        };
        PipelineConfig::from_lookup(|key| overrides.get(key).cloned().or_else(|| env::var(key).ok()))
    }
}

fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let iter = match dotenv::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            log::warn!("⚠️  Could not open {}: {}, using process environment", path.display(), e);
            return Ok(HashMap::new());
        }
    };
    iter.collect::<Result<HashMap<_, _>, _>>()
        .map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Fixed configuration that tests can swap between cycles
#[derive(Debug)]
pub struct StaticConfigSource {
    config: Mutex<Result<PipelineConfig, ConfigError>>,
}

impl StaticConfigSource {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Mutex::new(Ok(config)),
        }
    }

    pub fn set(&self, config: PipelineConfig) {
        *self.config.lock().unwrap_or_else(|p| p.into_inner()) = Ok(config);
    }

    /// Make the next loads fail
    pub fn set_error(&self, error: ConfigError) {
        *self.config.lock().unwrap_or_else(|p| p.into_inner()) = Err(error);
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<PipelineConfig, ConfigError> {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
