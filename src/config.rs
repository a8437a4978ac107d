// =============================================================================
// Runtime configuration — hot-reloadable, atomically persisted
// =============================================================================
//
// Mirrors the teacher's `runtime_config.rs`: every field carries a
// `#[serde(default = "...")]` so that an older config file on disk still
// deserializes after new fields are added, and `save` writes through a
// temp file + rename so a crash mid-write never corrupts the file readers
// depend on.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionMode, TradingMode};

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_watchlist_ttl_minutes() -> f64 {
    120.0
}

fn default_max_watchlist() -> usize {
    300
}

fn default_stale_book_minutes() -> f64 {
    10.0
}

fn default_stale_quote_minutes() -> f64 {
    15.0
}

fn default_stale_tradeability_minutes() -> f64 {
    20.0
}

fn default_pending_window_ms() -> i64 {
    6_000
}

fn default_cooldown_seconds() -> i64 {
    120
}

fn default_max_token_resolves_per_cycle() -> usize {
    10
}

fn default_max_levels_considered() -> usize {
    10
}

fn default_terminal_resolution_threshold() -> f64 {
    0.995
}

fn default_terminal_exchange_threshold() -> f64 {
    0.997
}

fn default_terminal_purge_seconds() -> f64 {
    30.0
}

fn default_reconcile_interval_seconds() -> u64 {
    300
}

fn default_scoreboard_cache_ttl_seconds() -> i64 {
    15
}

fn default_soccer_cooldown_seconds() -> i64 {
    90
}

fn default_resolution_tracker_poll_batch() -> usize {
    25
}

fn default_http_timeout_ms() -> u64 {
    2_500
}

fn default_http_max_concurrency() -> usize {
    8
}

fn default_http_queue_max() -> usize {
    128
}

fn default_streaming_max_stale_ms() -> i64 {
    10_000
}

fn default_backoff_min_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_subscribe_chunk_size() -> usize {
    500
}

fn default_epsilon() -> f64 {
    1e-6
}

fn default_min_margin_hold() -> f64 {
    3.0
}

/// Stage-1/Stage-2/near-margin thresholds. A league may override any subset
/// of these; unset fields fall back to `RuntimeConfig::default_thresholds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageThresholds {
    #[serde(default = "default_min_prob")]
    pub min_prob: f64,
    #[serde(default = "default_max_entry_price")]
    pub max_entry_price: f64,
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,
    #[serde(default = "default_near_prob_min")]
    pub near_prob_min: f64,
    #[serde(default = "default_near_spread_max")]
    pub near_spread_max: f64,
    #[serde(default = "default_min_entry_depth_usd")]
    pub min_entry_depth_usd: f64,
    #[serde(default = "default_min_exit_depth_usd")]
    pub min_exit_depth_usd: f64,
    #[serde(default = "default_sl_bid")]
    pub sl_bid: f64,
    #[serde(default = "default_sl_ask")]
    pub sl_ask: f64,
}

fn default_min_prob() -> f64 {
    0.55
}
fn default_max_entry_price() -> f64 {
    0.92
}
fn default_max_spread() -> f64 {
    0.03
}
fn default_near_prob_min() -> f64 {
    0.90
}
fn default_near_spread_max() -> f64 {
    0.02
}
fn default_min_entry_depth_usd() -> f64 {
    50.0
}
fn default_min_exit_depth_usd() -> f64 {
    50.0
}
fn default_sl_bid() -> f64 {
    0.80
}
fn default_sl_ask() -> f64 {
    0.85
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            min_prob: default_min_prob(),
            max_entry_price: default_max_entry_price(),
            max_spread: default_max_spread(),
            near_prob_min: default_near_prob_min(),
            near_spread_max: default_near_spread_max(),
            min_entry_depth_usd: default_min_entry_depth_usd(),
            min_exit_depth_usd: default_min_exit_depth_usd(),
            sl_bid: default_sl_bid(),
            sl_ask: default_sl_ask(),
        }
    }
}

/// Basketball win-probability / entry-gate parameters, per league (NBA/NCAA).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasketballParams {
    pub sigma: f64,
    pub total_minutes: f64,
    pub final_period: u32,
    pub max_min_left: f64,
    pub min_margin: f64,
    pub min_win_prob: f64,
}

/// Date-window filter bounds (UTC day count) plus basketball parameters for
/// one league. Deliberately data, not code (SPEC_FULL.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueConfig {
    pub min_days_delta: i64,
    pub max_days_delta: i64,
    #[serde(default)]
    pub thresholds: Option<StageThresholds>,
    #[serde(default)]
    pub basketball: Option<BasketballParams>,
}

/// The full league table, normally loaded from `leagues.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeagueTable {
    pub leagues: HashMap<String, LeagueConfig>,
}

impl LeagueTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading league table {}", path.display()))?;
        serde_json::from_str(&raw).context("parsing league table JSON")
    }

    pub fn builtin_default() -> Self {
        let mut leagues = HashMap::new();
        leagues.insert(
            "nba".to_string(),
            LeagueConfig {
                min_days_delta: 0,
                max_days_delta: 1,
                thresholds: None,
                basketball: Some(BasketballParams {
                    sigma: 18.0,
                    total_minutes: 48.0,
                    final_period: 4,
                    max_min_left: 6.0,
                    min_margin: 10.0,
                    min_win_prob: 0.95,
                }),
            },
        );
        leagues.insert(
            "ncaab".to_string(),
            LeagueConfig {
                min_days_delta: 0,
                max_days_delta: 1,
                thresholds: None,
                basketball: Some(BasketballParams {
                    sigma: 19.0,
                    total_minutes: 40.0,
                    final_period: 2,
                    max_min_left: 6.0,
                    min_margin: 10.0,
                    min_win_prob: 0.95,
                }),
            },
        );
        leagues.insert(
            "epl".to_string(),
            LeagueConfig {
                min_days_delta: 0,
                max_days_delta: 1,
                thresholds: None,
                basketball: None,
            },
        );
        Self { leagues }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpQueueConfig {
    #[serde(default = "default_http_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_http_queue_max")]
    pub queue_max: usize,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_http_max_concurrency(),
            queue_max: default_http_queue_max(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_streaming_max_stale_ms")]
    pub max_stale_ms: i64,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_subscribe_chunk_size")]
    pub subscribe_chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_stale_ms: default_streaming_max_stale_ms(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            subscribe_chunk_size: default_subscribe_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_budget_usd")]
    pub budget_usd: f64,
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    #[serde(default = "default_max_concurrent_open")]
    pub max_concurrent_open: u32,
    #[serde(default = "default_max_total_exposure_usd")]
    pub max_total_exposure_usd: f64,
    #[serde(default = "default_false")]
    pub top_up_partial_buys: bool,
    /// Escalating-floor stop-loss step sizes, applied cumulatively from the
    /// trigger price downward. Lower bound is `trigger - 0.10` regardless.
    #[serde(default = "default_sl_escalation_steps")]
    pub sl_escalation_steps: Vec<f64>,
    #[serde(default = "default_resolved_sell_floor")]
    pub resolved_sell_floor: f64,
}

fn default_budget_usd() -> f64 {
    25.0
}
fn default_max_daily_trades() -> u32 {
    40
}
fn default_max_concurrent_open() -> u32 {
    8
}
fn default_max_total_exposure_usd() -> f64 {
    500.0
}
fn default_sl_escalation_steps() -> Vec<f64> {
    vec![0.0, 0.01, 0.02, 0.03, 0.05]
}
fn default_resolved_sell_floor() -> f64 {
    0.95
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            budget_usd: default_budget_usd(),
            allowlist: None,
            max_daily_trades: default_max_daily_trades(),
            max_concurrent_open: default_max_concurrent_open(),
            max_total_exposure_usd: default_max_total_exposure_usd(),
            top_up_partial_buys: false,
            sl_escalation_steps: default_sl_escalation_steps(),
            resolved_sell_floor: default_resolved_sell_floor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoccerGateConfig {
    #[serde(default = "default_soccer_cooldown_seconds")]
    pub score_change_cooldown_seconds: i64,
}

impl Default for SoccerGateConfig {
    fn default() -> Self {
        Self {
            score_change_cooldown_seconds: default_soccer_cooldown_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub trading_mode: TradingMode,
    /// Proxy/funder wallet address whose on-chain positions `reconcile.rs`
    /// diffs against the execution bridge's own idea of what is open.
    #[serde(default)]
    pub funder_address: String,

    #[serde(default = "default_watchlist_ttl_minutes")]
    pub watchlist_ttl_minutes: f64,
    #[serde(default = "default_max_watchlist")]
    pub max_watchlist: usize,
    #[serde(default = "default_stale_book_minutes")]
    pub stale_book_minutes: f64,
    #[serde(default = "default_stale_quote_minutes")]
    pub stale_quote_minutes: f64,
    #[serde(default = "default_stale_tradeability_minutes")]
    pub stale_tradeability_minutes: f64,

    #[serde(default = "default_pending_window_ms")]
    pub pending_window_ms: i64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: i64,

    #[serde(default = "default_max_token_resolves_per_cycle")]
    pub max_token_resolves_per_cycle: usize,
    #[serde(default = "default_max_levels_considered")]
    pub max_levels_considered: usize,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    #[serde(default)]
    pub default_thresholds: StageThresholds,

    #[serde(default = "default_terminal_resolution_threshold")]
    pub terminal_resolution_threshold: f64,
    #[serde(default = "default_terminal_exchange_threshold")]
    pub terminal_exchange_threshold: f64,
    #[serde(default = "default_terminal_purge_seconds")]
    pub terminal_purge_seconds: f64,
    #[serde(default = "default_min_margin_hold")]
    pub min_margin_hold: f64,

    #[serde(default)]
    pub http: HttpQueueConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub soccer_gate: SoccerGateConfig,

    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
    #[serde(default = "default_scoreboard_cache_ttl_seconds")]
    pub scoreboard_cache_ttl_seconds: i64,
    #[serde(default = "default_true")]
    pub resolution_tracker_enabled: bool,
    #[serde(default = "default_resolution_tracker_poll_batch")]
    pub resolution_tracker_poll_batch: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::default(),
            trading_mode: TradingMode::default(),
            funder_address: String::new(),
            watchlist_ttl_minutes: default_watchlist_ttl_minutes(),
            max_watchlist: default_max_watchlist(),
            stale_book_minutes: default_stale_book_minutes(),
            stale_quote_minutes: default_stale_quote_minutes(),
            stale_tradeability_minutes: default_stale_tradeability_minutes(),
            pending_window_ms: default_pending_window_ms(),
            cooldown_seconds: default_cooldown_seconds(),
            max_token_resolves_per_cycle: default_max_token_resolves_per_cycle(),
            max_levels_considered: default_max_levels_considered(),
            epsilon: default_epsilon(),
            default_thresholds: StageThresholds::default(),
            terminal_resolution_threshold: default_terminal_resolution_threshold(),
            terminal_exchange_threshold: default_terminal_exchange_threshold(),
            terminal_purge_seconds: default_terminal_purge_seconds(),
            min_margin_hold: default_min_margin_hold(),
            http: HttpQueueConfig::default(),
            streaming: StreamingConfig::default(),
            execution: ExecutionConfig::default(),
            soccer_gate: SoccerGateConfig::default(),
            reconcile_interval_seconds: default_reconcile_interval_seconds(),
            scoreboard_cache_ttl_seconds: default_scoreboard_cache_ttl_seconds(),
            resolution_tracker_enabled: true,
            resolution_tracker_poll_batch: default_resolution_tracker_poll_batch(),
        }
    }
}

/// Boot-time gate for `ExecutionMode::Live`: mode, stop-loss thresholds,
/// budget caps, funder address, and credentials file must all check out
/// before real orders can be placed. Any failure keeps the engine in
/// Paper mode, per the SAFETY note at startup.
pub fn validate_live_boot(config: &RuntimeConfig, leagues: &LeagueTable, credentials_path: &str) -> Result<()> {
    if config.execution_mode != ExecutionMode::Live {
        anyhow::bail!("validate_live_boot called outside live mode");
    }

    let mut thresholds: Vec<&StageThresholds> = vec![&config.default_thresholds];
    thresholds.extend(leagues.leagues.values().filter_map(|l| l.thresholds.as_ref()));
    for t in thresholds {
        if !(t.sl_bid > 0.0 && t.sl_bid < 1.0) {
            anyhow::bail!("sl_bid {} out of (0,1)", t.sl_bid);
        }
        if !(t.sl_ask > 0.0 && t.sl_ask < 1.0) {
            anyhow::bail!("sl_ask {} out of (0,1)", t.sl_ask);
        }
    }

    if !(config.execution.budget_usd > 0.0 && config.execution.budget_usd <= 1000.0) {
        anyhow::bail!("budget_usd {} out of (0,1000]", config.execution.budget_usd);
    }

    if config.funder_address.trim().is_empty() {
        anyhow::bail!("funder_address is empty");
    }

    std::fs::metadata(credentials_path).with_context(|| format!("credentials file {credentials_path} not readable"))?;

    Ok(())
}

impl RuntimeConfig {
    /// Load from `path`, falling back to defaults if the file is missing or
    /// fails to parse (logged by the caller).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw).context("parsing runtime config JSON")?;
        Ok(config)
    }

    /// Persist atomically: write to `<path>.tmp` then rename over `path`, so
    /// a crash mid-write never leaves a truncated/corrupt config file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("json.tmp");
        let serialized =
            serde_json::to_string_pretty(self).context("serializing runtime config")?;
        std::fs::write(&tmp_path, serialized)
            .with_context(|| format!("writing temp config {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("renaming temp config onto {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_safe_modes() {
        let config = RuntimeConfig::default();
        assert_eq!(config.execution_mode, ExecutionMode::Paper);
        assert_eq!(config.trading_mode, TradingMode::Paused);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.pending_window_ms, 6_000);
        assert_eq!(config.cooldown_seconds, 120);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"max_watchlist": 50}"#).unwrap();
        assert_eq!(config.max_watchlist, 50);
        assert_eq!(config.watchlist_ttl_minutes, 120.0);
    }

    #[test]
    fn roundtrip_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_watchlist, config.max_watchlist);
    }

    #[test]
    fn save_then_load_roundtrips_through_disk() {
        let dir = std::env::temp_dir().join(format!("aurora-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");
        let mut config = RuntimeConfig::default();
        config.max_watchlist = 77;
        config.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.max_watchlist, 77);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn builtin_league_table_has_nba_and_ncaab() {
        let table = LeagueTable::builtin_default();
        assert!(table.leagues.contains_key("nba"));
        assert!(table.leagues.contains_key("ncaab"));
        assert!(table.leagues["nba"].basketball.is_some());
    }

    fn live_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.execution_mode = ExecutionMode::Live;
        config.funder_address = "0xabc".to_string();
        config
    }

    #[test]
    fn validate_live_boot_rejects_non_live_mode() {
        let config = RuntimeConfig::default();
        assert!(validate_live_boot(&config, &LeagueTable::default(), "Cargo.toml").is_err());
    }

    #[test]
    fn validate_live_boot_rejects_empty_funder() {
        let mut config = live_config();
        config.funder_address = String::new();
        assert!(validate_live_boot(&config, &LeagueTable::default(), "Cargo.toml").is_err());
    }

    #[test]
    fn validate_live_boot_rejects_budget_out_of_range() {
        let mut config = live_config();
        config.execution.budget_usd = 1500.0;
        assert!(validate_live_boot(&config, &LeagueTable::default(), "Cargo.toml").is_err());
    }

    #[test]
    fn validate_live_boot_rejects_sl_threshold_out_of_range() {
        let mut config = live_config();
        config.default_thresholds.sl_bid = 1.2;
        assert!(validate_live_boot(&config, &LeagueTable::default(), "Cargo.toml").is_err());
    }

    #[test]
    fn validate_live_boot_rejects_unreadable_credentials() {
        let config = live_config();
        assert!(validate_live_boot(&config, &LeagueTable::default(), "/nonexistent/creds.json").is_err());
    }

    #[test]
    fn validate_live_boot_passes_with_sane_defaults() {
        let config = live_config();
        assert!(validate_live_boot(&config, &LeagueTable::default(), "Cargo.toml").is_ok());
    }
}
