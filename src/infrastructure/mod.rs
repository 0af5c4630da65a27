pub mod balance_cache;
pub mod config;
pub mod database;
pub mod expiry_scheduler;
pub mod rate_limiter;
pub mod redis_cache;
pub mod telemetry;
