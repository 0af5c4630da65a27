use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use sqlx::PgPool;

use k1s0_quota_ledger::adapter::repository::{
    InMemoryLedgerStore, LedgerPostgresRepository, RedemptionCodePostgresRepository,
    TenantAccountPostgresRepository,
};
use k1s0_quota_ledger::adapter::service::{LedgerDependencies, QuotaLedgerService};
use k1s0_quota_ledger::domain::repository::{
    LedgerStore, RedemptionCodeRepository, TenantAccountRepository,
};
use k1s0_quota_ledger::domain::service::SystemClock;
use k1s0_quota_ledger::infrastructure::balance_cache::{BalanceCache, MokaBalanceCache};
use k1s0_quota_ledger::infrastructure::config::Config;
use k1s0_quota_ledger::infrastructure::database;
use k1s0_quota_ledger::infrastructure::expiry_scheduler::{MaintenanceRole, QuotaExpiryScheduler};
use k1s0_quota_ledger::infrastructure::rate_limiter::SlidingWindowRateLimiter;
use k1s0_quota_ledger::infrastructure::redis_cache::RedisBalanceCache;
use k1s0_quota_ledger::infrastructure::telemetry;
use k1s0_quota_ledger::usecase::UnsupportedPlanActivator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let cfg = Config::load(&config_path)?;
    telemetry::init_tracing(&cfg.log)?;

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting quota ledger"
    );

    // --- Store: PostgreSQL, or InMemory only when no database is configured ---
    let repos = match database::connect_configured(cfg.database.as_ref()).await? {
        Some(pool) => {
            info!("PostgreSQL connection pool created successfully");
            Repositories::postgres(Arc::new(pool))
        }
        None => {
            tracing::warn!("no database config found, using non-durable InMemory ledger store");
            Repositories::in_memory()
        }
    };

    // --- Balance cache: Redis → moka fallback ---
    let cache: Arc<dyn BalanceCache> = match cfg.redis {
        Some(ref redis_cfg) => match connect_redis(&redis_cfg.url).await {
            Some(conn) => {
                info!(prefix = %redis_cfg.key_prefix, "using Redis balance cache");
                Arc::new(RedisBalanceCache::new(
                    conn,
                    redis_cfg.key_prefix.clone(),
                    redis_cfg.cache_ttl_secs,
                ))
            }
            None => Arc::new(MokaBalanceCache::new(
                cfg.cache.max_capacity,
                cfg.cache.ttl_secs,
            )),
        },
        None => {
            info!("no Redis config found, using in-process balance cache");
            Arc::new(MokaBalanceCache::new(
                cfg.cache.max_capacity,
                cfg.cache.ttl_secs,
            ))
        }
    };

    let shutdown = CancellationToken::new();

    let limiter = Arc::new(SlidingWindowRateLimiter::new());
    let service = QuotaLedgerService::new(
        LedgerDependencies {
            store: repos.store,
            accounts: repos.accounts,
            codes: repos.codes,
            cache,
            limiter: limiter.clone(),
            plan_activator: Arc::new(UnsupportedPlanActivator),
            clock: Arc::new(SystemClock),
        },
        &cfg.ledger,
        &cfg.redemption,
    );

    let scheduler = QuotaExpiryScheduler::new(
        service.sweep_usecase(),
        MaintenanceRole::from_flag(cfg.ledger.maintenance_node),
        cfg.ledger.sweep_interval(),
        cfg.ledger.sweep_batch_size,
    );
    let scheduler_handle = scheduler.start();

    let janitor_handle = limiter.start_janitor(
        Duration::from_secs(cfg.rate_limit.expiration_secs),
        shutdown.clone(),
    );

    info!(
        expire_before_consume = cfg.ledger.expire_before_consume,
        operation_timeout_ms = cfg.ledger.operation_timeout_ms,
        "quota ledger ready"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scheduler.stop();
    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "quota expiry scheduler task failed");
        }
    }
    if let Some(handle) = janitor_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "rate limiter janitor task failed");
        }
    }

    info!("quota ledger stopped");
    Ok(())
}

struct Repositories {
    store: Arc<dyn LedgerStore>,
    accounts: Arc<dyn TenantAccountRepository>,
    codes: Arc<dyn RedemptionCodeRepository>,
}

impl Repositories {
    fn postgres(pool: Arc<PgPool>) -> Self {
        Self {
            store: Arc::new(LedgerPostgresRepository::new(pool.clone())),
            accounts: Arc::new(TenantAccountPostgresRepository::new(pool.clone())),
            codes: Arc::new(RedemptionCodePostgresRepository::new(pool)),
        }
    }

    // 3 つのトレイトは同じテーブル群を共有する。
    fn in_memory() -> Self {
        let store = InMemoryLedgerStore::new();
        Self {
            store: Arc::new(store.clone()),
            accounts: Arc::new(store.clone()),
            codes: Arc::new(store),
        }
    }
}

async fn connect_redis(url: &str) -> Option<redis::aio::ConnectionManager> {
    info!("connecting to Redis for balance cache");
    match redis::Client::open(url) {
        Ok(client) => match redis::aio::ConnectionManager::new(client).await {
            Ok(cm) => {
                info!("Redis connection established");
                Some(cm)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect to Redis, will fall back");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "invalid Redis URL, will fall back");
            None
        }
    }
}
