use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::infrastructure::config::DatabaseConfig;

/// PostgreSQL 接続プールを作成する。
pub async fn create_pool(cfg: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
        .connect(&cfg.url)
        .await?;
    Ok(pool)
}

/// 同梱のマイグレーションを適用する。
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// 設定に従って接続プールを用意する。DB 未設定なら `None` を返す。
///
/// DB が設定されているのに接続できない場合はエラーを返し、インメモリストアには切り替えない。
pub async fn connect_configured(cfg: Option<&DatabaseConfig>) -> anyhow::Result<Option<PgPool>> {
    let Some(db_cfg) = cfg else {
        return Ok(None);
    };
    let pool = create_pool(db_cfg)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to PostgreSQL: {}", e))?;
    if db_cfg.run_migrations {
        run_migrations(&pool).await?;
        tracing::info!("database migrations applied");
    }
    Ok(Some(pool))
}
