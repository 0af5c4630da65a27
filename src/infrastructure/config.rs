use std::time::Duration;

use serde::Deserialize;

/// クォータ台帳ワーカーのアプリケーション設定。
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub redemption: RedemptionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&content)?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

/// DatabaseConfig はデータベース接続の設定を表す（URL形式）。
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// RedisConfig は Redis 残高キャッシュの設定を表す。
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_key_prefix() -> String {
    "quota:balance:".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// CacheConfig はプロセス内残高キャッシュ（moka）の設定を表す。
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_capacity")]
    pub max_capacity: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_cache_max_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_max_capacity() -> u64 {
    100_000
}

/// LedgerConfig は台帳の失効処理と消費の設定を表す。
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,
    /// このノードが失効スイープを担当するか。
    #[serde(default = "default_true")]
    pub maintenance_node: bool,
    #[serde(default = "default_true")]
    pub expire_before_consume: bool,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl LedgerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            maintenance_node: true,
            expire_before_consume: true,
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sweep_batch_size() -> u32 {
    300
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedemptionConfig {
    /// 引換前に挿入する固定遅延（ミリ秒）。
    #[serde(default = "default_redeem_delay_ms")]
    pub delay_ms: u64,
    /// 課金履歴の金額換算に使う 1 単位あたりのクォータ量。
    #[serde(default = "default_quota_per_unit")]
    pub quota_per_unit: i64,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_redeem_delay_ms(),
            quota_per_unit: default_quota_per_unit(),
        }
    }
}

fn default_redeem_delay_ms() -> u64 {
    100
}

fn default_quota_per_unit() -> i64 {
    500_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// アイドルキーの保持期間と掃除間隔（秒）。
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_expiration_secs(),
        }
    }
}

fn default_expiration_secs() -> u64 {
    180
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}
