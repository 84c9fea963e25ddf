//! Application configuration management.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Ledger storage and concurrency configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Credit policy rates.
    #[serde(default)]
    pub credits: CreditsConfig,
    /// Expiration sweeper schedule.
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL. Required when the ledger backend is `postgres`.
    #[serde(default)]
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Run pending migrations on startup.
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

/// Which ledger store implementation backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// PostgreSQL through SeaORM.
    #[default]
    Postgres,
    /// Process-local memory; state is lost on restart.
    Memory,
}

/// Ledger storage and concurrency configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Store implementation.
    #[serde(default)]
    pub backend: LedgerBackend,
    /// How long a writer waits for an account lock before reporting a conflict.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// How many times a conflicting write is retried before surfacing.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            lock_timeout_ms: default_lock_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    25
}

/// Credit policy rates.
///
/// Amounts are magnitudes; the policy engine applies the sign.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditsConfig {
    /// Welcome bonus granted once per account.
    #[serde(default = "default_registration_bonus")]
    pub registration_bonus: Decimal,
    /// Bonus granted to a referrer per referred user.
    #[serde(default = "default_referral_bonus")]
    pub referral_bonus: Decimal,
    /// Bonus granted for completing a session.
    #[serde(default = "default_session_completion_bonus")]
    pub session_completion_bonus: Decimal,
    /// Credits earned per hour taught.
    #[serde(default = "default_teaching_rate_per_hour")]
    pub teaching_rate_per_hour: Decimal,
    /// Credits charged per hour learned.
    #[serde(default = "default_learning_cost_per_hour")]
    pub learning_cost_per_hour: Decimal,
    /// Credits charged for a late cancellation.
    #[serde(default = "default_cancellation_penalty")]
    pub cancellation_penalty: Decimal,
    /// Lifetime of expiring credits, in months.
    #[serde(default = "default_expiration_months")]
    pub expiration_months: u32,
    /// Window used by statistics to report credits expiring soon, in days.
    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: u32,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            registration_bonus: default_registration_bonus(),
            referral_bonus: default_referral_bonus(),
            session_completion_bonus: default_session_completion_bonus(),
            teaching_rate_per_hour: default_teaching_rate_per_hour(),
            learning_cost_per_hour: default_learning_cost_per_hour(),
            cancellation_penalty: default_cancellation_penalty(),
            expiration_months: default_expiration_months(),
            expiring_soon_days: default_expiring_soon_days(),
        }
    }
}

fn default_registration_bonus() -> Decimal {
    Decimal::new(1000, 2)
}

fn default_referral_bonus() -> Decimal {
    Decimal::new(500, 2)
}

fn default_session_completion_bonus() -> Decimal {
    Decimal::new(200, 2)
}

fn default_teaching_rate_per_hour() -> Decimal {
    Decimal::new(1000, 2)
}

fn default_learning_cost_per_hour() -> Decimal {
    Decimal::new(800, 2)
}

fn default_cancellation_penalty() -> Decimal {
    Decimal::new(200, 2)
}

fn default_expiration_months() -> u32 {
    12
}

fn default_expiring_soon_days() -> u32 {
    30
}

/// Expiration sweeper schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Whether the server runs the sweeper at all.
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// Seconds between sweep passes.
    #[serde(default = "default_sweeper_interval_secs")]
    pub interval_secs: u64,
    /// Maximum entries fetched per batch within one pass.
    #[serde(default = "default_sweeper_batch_size")]
    pub batch_size: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweeper_interval_secs(),
            batch_size: default_sweeper_batch_size(),
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweeper_interval_secs() -> u64 {
    86_400 // daily
}

fn default_sweeper_batch_size() -> u32 {
    500
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("SKILLSWAP").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
