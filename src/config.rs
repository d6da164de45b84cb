//! Governor and span registry configuration.
//!
//! # Configuration Precedence
//!
//! 1. **Programmatic**: values set via `with_*` methods
//! 2. **Environment variables**: `RIFT_GOVERNOR_*`
//! 3. **Config file**: TOML with `[governor]` and `[spans]` sections
//!    (requires the `config-file` feature)
//! 4. **Defaults**: [`GovernorConfig::default()`] / [`SpanConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `RIFT_GOVERNOR_MAX_CHILDREN` | `usize` | `max_children_per_parent` |
//! | `RIFT_GOVERNOR_MAX_DEPTH` | `u32` | `max_hierarchy_depth` |
//! | `RIFT_GOVERNOR_MAX_UNITS` | `usize` | `max_units` |
//! | `RIFT_GOVERNOR_HEARTBEAT_MS` | `u64` | `heartbeat_interval` |
//! | `RIFT_GOVERNOR_MISSED_HEARTBEATS` | `u32` | `missed_heartbeat_threshold` |
//! | `RIFT_GOVERNOR_GRACEFUL_MS` | `u64` | `graceful_period` |
//! | `RIFT_GOVERNOR_STRICT_BYPASS` | `bool` | `strict_bypass_checks` |
//! | `RIFT_GOVERNOR_EVENT_LOG` | path | `event_log_path` |

use std::path::PathBuf;
use std::time::Duration;

/// Maximum live children per parent unit.
pub const DEFAULT_MAX_CHILDREN_PER_PARENT: usize = 32;
/// Maximum hierarchy depth below the root.
pub const DEFAULT_MAX_HIERARCHY_DEPTH: u32 = 8;
/// Maximum concurrently tracked units, root included.
pub const DEFAULT_MAX_UNITS: usize = 256;
/// Spawn site recorded for the root sentinel.
pub const ROOT_SPAWN_SITE: &str = "main()";

/// Alignment for classical spans (page-sized).
pub const CLASSICAL_ALIGNMENT: usize = 4096;
/// Alignment for superposed and entangled spans (machine word).
pub const QUANTUM_ALIGNMENT: usize = 8;
/// Alignment for distributed spans (cache line).
pub const DISTRIBUTED_ALIGNMENT: usize = 64;

/// Environment variable name for the per-parent child ceiling.
pub const ENV_MAX_CHILDREN: &str = "RIFT_GOVERNOR_MAX_CHILDREN";
/// Environment variable name for the hierarchy depth ceiling.
pub const ENV_MAX_DEPTH: &str = "RIFT_GOVERNOR_MAX_DEPTH";
/// Environment variable name for the global unit ceiling.
pub const ENV_MAX_UNITS: &str = "RIFT_GOVERNOR_MAX_UNITS";
/// Environment variable name for the heartbeat interval in milliseconds.
pub const ENV_HEARTBEAT_MS: &str = "RIFT_GOVERNOR_HEARTBEAT_MS";
/// Environment variable name for the missed-heartbeat threshold.
pub const ENV_MISSED_HEARTBEATS: &str = "RIFT_GOVERNOR_MISSED_HEARTBEATS";
/// Environment variable name for the graceful drain period in milliseconds.
pub const ENV_GRACEFUL_MS: &str = "RIFT_GOVERNOR_GRACEFUL_MS";
/// Environment variable name for strict bypass checks.
pub const ENV_STRICT_BYPASS: &str = "RIFT_GOVERNOR_STRICT_BYPASS";
/// Environment variable name for the event log path.
pub const ENV_EVENT_LOG: &str = "RIFT_GOVERNOR_EVENT_LOG";

/// Error raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable or key name.
        var: String,
        /// Description of the accepted form.
        expected: &'static str,
        /// The rejected raw value.
        value: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error text.
        reason: String,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
}

/// Configuration for the hierarchy governor and its liveness supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorConfig {
    /// Live children a single parent may hold.
    pub max_children_per_parent: usize,
    /// Deepest permitted hierarchy level (root is depth 0).
    pub max_hierarchy_depth: u32,
    /// Concurrently tracked units, root sentinel included.
    pub max_units: usize,
    /// Expected interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before a unit counts as ghosted.
    pub missed_heartbeat_threshold: u32,
    /// How long a graceful drain waits before escalating to cascade.
    pub graceful_period: Duration,
    /// Spawn site recorded for the root sentinel.
    pub root_spawn_site: String,
    /// Panic when a validated spawn finds the registry full.
    pub strict_bypass_checks: bool,
    /// Append-only JSON-lines event log, if any.
    pub event_log_path: Option<PathBuf>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_children_per_parent: DEFAULT_MAX_CHILDREN_PER_PARENT,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            max_units: DEFAULT_MAX_UNITS,
            heartbeat_interval: Duration::from_secs(1),
            missed_heartbeat_threshold: 3,
            graceful_period: Duration::from_secs(5),
            root_spawn_site: ROOT_SPAWN_SITE.to_string(),
            strict_bypass_checks: cfg!(debug_assertions),
            event_log_path: None,
        }
    }
}

impl GovernorConfig {
    /// Clamps values that would make the governor unusable.
    ///
    /// The registry always has room for the root sentinel plus one unit, the
    /// heartbeat interval is never zero, and at least one miss is tolerated.
    pub fn normalize(&mut self) {
        self.max_units = self.max_units.max(2);
        self.max_children_per_parent = self.max_children_per_parent.max(1);
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = Duration::from_millis(1);
        }
        self.missed_heartbeat_threshold = self.missed_heartbeat_threshold.max(1);
        if self.root_spawn_site.is_empty() {
            self.root_spawn_site = ROOT_SPAWN_SITE.to_string();
        }
    }

    /// Sets the per-parent child ceiling.
    #[must_use]
    pub fn with_max_children(mut self, n: usize) -> Self {
        self.max_children_per_parent = n;
        self
    }

    /// Sets the hierarchy depth ceiling.
    #[must_use]
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_hierarchy_depth = depth;
        self
    }

    /// Sets the global unit ceiling.
    #[must_use]
    pub fn with_max_units(mut self, n: usize) -> Self {
        self.max_units = n;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the missed-heartbeat threshold.
    #[must_use]
    pub fn with_missed_heartbeat_threshold(mut self, n: u32) -> Self {
        self.missed_heartbeat_threshold = n;
        self
    }

    /// Sets the graceful drain period.
    #[must_use]
    pub fn with_graceful_period(mut self, period: Duration) -> Self {
        self.graceful_period = period;
        self
    }

    /// Enables or disables panicking on registry bypass.
    #[must_use]
    pub fn with_strict_bypass_checks(mut self, strict: bool) -> Self {
        self.strict_bypass_checks = strict;
        self
    }

    /// Sets the event log path.
    #[must_use]
    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log_path = Some(path.into());
        self
    }

    /// Time without a heartbeat after which a unit is ghosted.
    #[must_use]
    pub fn ghost_window(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.missed_heartbeat_threshold)
    }
}

/// Configuration for a [`SpanRegistry`](crate::memory::SpanRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanConfig {
    /// Maximum live spans.
    pub max_spans: usize,
    /// Maximum live bytes across all spans.
    pub max_total_bytes: usize,
    /// Default alignment for classical spans.
    pub classical_alignment: usize,
    /// Default alignment for superposed/entangled spans.
    pub quantum_alignment: usize,
    /// Default alignment for distributed spans.
    pub distributed_alignment: usize,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            max_spans: 65_536,
            max_total_bytes: 1 << 30,
            classical_alignment: CLASSICAL_ALIGNMENT,
            quantum_alignment: QUANTUM_ALIGNMENT,
            distributed_alignment: DISTRIBUTED_ALIGNMENT,
        }
    }
}

impl SpanConfig {
    /// Sets the live span ceiling.
    #[must_use]
    pub const fn with_max_spans(mut self, n: usize) -> Self {
        self.max_spans = n;
        self
    }

    /// Sets the live byte ceiling.
    #[must_use]
    pub const fn with_max_total_bytes(mut self, n: usize) -> Self {
        self.max_total_bytes = n;
        self
    }
}

// =========================================================================
// Environment overrides
// =========================================================================

/// Apply environment variable overrides to a [`GovernorConfig`].
///
/// Only variables that are set are applied. Returns an error if a variable is
/// set but unparseable.
pub fn apply_env_overrides(config: &mut GovernorConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, read_env)
}

/// Apply overrides from an arbitrary lookup (`name -> value`).
pub fn apply_overrides_from<F>(config: &mut GovernorConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_MAX_CHILDREN) {
        config.max_children_per_parent = parse_usize(ENV_MAX_CHILDREN, &val)?;
    }
    if let Some(val) = lookup(ENV_MAX_DEPTH) {
        config.max_hierarchy_depth = parse_u32(ENV_MAX_DEPTH, &val)?;
    }
    if let Some(val) = lookup(ENV_MAX_UNITS) {
        config.max_units = parse_usize(ENV_MAX_UNITS, &val)?;
    }
    if let Some(val) = lookup(ENV_HEARTBEAT_MS) {
        config.heartbeat_interval = Duration::from_millis(parse_u64(ENV_HEARTBEAT_MS, &val)?);
    }
    if let Some(val) = lookup(ENV_MISSED_HEARTBEATS) {
        config.missed_heartbeat_threshold = parse_u32(ENV_MISSED_HEARTBEATS, &val)?;
    }
    if let Some(val) = lookup(ENV_GRACEFUL_MS) {
        config.graceful_period = Duration::from_millis(parse_u64(ENV_GRACEFUL_MS, &val)?);
    }
    if let Some(val) = lookup(ENV_STRICT_BYPASS) {
        config.strict_bypass_checks = parse_bool(ENV_STRICT_BYPASS, &val)?;
    }
    if let Some(val) = lookup(ENV_EVENT_LOG) {
        let trimmed = val.trim();
        config.event_log_path = if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        };
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var_name: &str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var_name.to_string(),
        expected,
        value: val.to_string(),
    }
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var_name, "unsigned integer", val))
}

fn parse_u32(var_name: &str, val: &str) -> Result<u32, ConfigError> {
    val.trim()
        .parse::<u32>()
        .map_err(|_| invalid(var_name, "u32", val))
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| invalid(var_name, "u64", val))
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(var_name, "bool (true/false/1/0/yes/no)", val)),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// Top-level TOML config structure.
///
/// ```toml
/// [governor]
/// max_children_per_parent = 16
/// heartbeat_interval_ms = 500
///
/// [spans]
/// max_spans = 1024
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RiftTomlConfig {
    /// Governor settings.
    #[serde(default)]
    pub governor: GovernorToml,
    /// Span registry settings.
    #[serde(default)]
    pub spans: SpansToml,
}

/// Governor section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct GovernorToml {
    /// Per-parent child ceiling.
    pub max_children_per_parent: Option<usize>,
    /// Hierarchy depth ceiling.
    pub max_hierarchy_depth: Option<u32>,
    /// Global unit ceiling.
    pub max_units: Option<usize>,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: Option<u64>,
    /// Missed-heartbeat threshold.
    pub missed_heartbeat_threshold: Option<u32>,
    /// Graceful drain period in milliseconds.
    pub graceful_period_ms: Option<u64>,
    /// Root spawn site label.
    pub root_spawn_site: Option<String>,
    /// Panic on registry bypass.
    pub strict_bypass_checks: Option<bool>,
    /// Event log path.
    pub event_log_path: Option<PathBuf>,
}

/// Spans section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SpansToml {
    /// Live span ceiling.
    pub max_spans: Option<usize>,
    /// Live byte ceiling.
    pub max_total_bytes: Option<usize>,
    /// Classical alignment.
    pub classical_alignment: Option<usize>,
    /// Quantum alignment.
    pub quantum_alignment: Option<usize>,
    /// Distributed alignment.
    pub distributed_alignment: Option<usize>,
}

/// Apply a parsed TOML config. Only `Some` fields override.
///
/// Alignment overrides that are not powers of two are rejected.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    governor: &mut GovernorConfig,
    spans: &mut SpanConfig,
    toml: &RiftTomlConfig,
) -> Result<(), ConfigError> {
    let g = &toml.governor;
    if let Some(v) = g.max_children_per_parent {
        governor.max_children_per_parent = v;
    }
    if let Some(v) = g.max_hierarchy_depth {
        governor.max_hierarchy_depth = v;
    }
    if let Some(v) = g.max_units {
        governor.max_units = v;
    }
    if let Some(v) = g.heartbeat_interval_ms {
        governor.heartbeat_interval = Duration::from_millis(v);
    }
    if let Some(v) = g.missed_heartbeat_threshold {
        governor.missed_heartbeat_threshold = v;
    }
    if let Some(v) = g.graceful_period_ms {
        governor.graceful_period = Duration::from_millis(v);
    }
    if let Some(v) = &g.root_spawn_site {
        governor.root_spawn_site.clone_from(v);
    }
    if let Some(v) = g.strict_bypass_checks {
        governor.strict_bypass_checks = v;
    }
    if let Some(v) = &g.event_log_path {
        governor.event_log_path = Some(v.clone());
    }

    let s = &toml.spans;
    if let Some(v) = s.max_spans {
        spans.max_spans = v;
    }
    if let Some(v) = s.max_total_bytes {
        spans.max_total_bytes = v;
    }
    for (key, value, slot) in [
        (
            "spans.classical_alignment",
            s.classical_alignment,
            &mut spans.classical_alignment,
        ),
        (
            "spans.quantum_alignment",
            s.quantum_alignment,
            &mut spans.quantum_alignment,
        ),
        (
            "spans.distributed_alignment",
            s.distributed_alignment,
            &mut spans.distributed_alignment,
        ),
    ] {
        if let Some(v) = value {
            if !crate::memory::validate_alignment(v) {
                return Err(invalid(key, "power of two", &v.to_string()));
            }
            *slot = v;
        }
    }
    Ok(())
}

/// Parse a TOML string.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RiftTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RiftTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
