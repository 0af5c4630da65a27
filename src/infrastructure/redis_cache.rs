use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::infrastructure::balance_cache::BalanceCache;

/// ADJUST_IF_EXISTS_SCRIPT はキーが存在する場合のみ残高を加減算する Lua スクリプト。
///
/// KEYS[1]: 残高キー
/// ARGV[1]: 加算量（負数で減算）
/// ARGV[2]: TTL 秒
///
/// Returns: 更新後の値、キーが存在しなければ nil
const ADJUST_IF_EXISTS_SCRIPT: &str = r#"
local key = KEYS[1]
local delta = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

if redis.call('EXISTS', key) == 0 then
    return nil
end

local value = redis.call('INCRBY', key, delta)
if value < 0 then
    value = 0
    redis.call('SET', key, 0)
end
redis.call('EXPIRE', key, ttl)
return value
"#;

/// RedisBalanceCache は Redis を使った複数ノード共有の残高キャッシュ。
///
/// Redis のエラーはログに記録して握りつぶす。
pub struct RedisBalanceCache {
    conn: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
    adjust_script: Script,
}

impl RedisBalanceCache {
    pub fn new(conn: ConnectionManager, key_prefix: String, ttl_secs: u64) -> Self {
        Self {
            conn,
            key_prefix,
            ttl_secs,
            adjust_script: Script::new(ADJUST_IF_EXISTS_SCRIPT),
        }
    }

    fn make_key(&self, owner_id: i64) -> String {
        build_key(&self.key_prefix, owner_id)
    }
}

#[async_trait]
impl BalanceCache for RedisBalanceCache {
    async fn get(&self, owner_id: i64) -> Option<i64> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<i64>> = redis::cmd("GET")
            .arg(self.make_key(owner_id))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(owner_id, error = %e, "failed to read balance cache");
                None
            }
        }
    }

    async fn set(&self, owner_id: i64, total_balance: i64) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(self.make_key(owner_id))
            .arg(total_balance)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(owner_id, error = %e, "failed to write balance cache");
        }
    }

    async fn adjust(&self, owner_id: i64, delta: i64) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<i64>> = self
            .adjust_script
            .key(self.make_key(owner_id))
            .arg(delta)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(owner_id, delta, error = %e, "failed to adjust balance cache");
        }
    }

    async fn invalidate(&self, owner_id: i64) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("DEL")
            .arg(self.make_key(owner_id))
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(owner_id, error = %e, "failed to invalidate balance cache");
        }
    }
}

fn build_key(prefix: &str, owner_id: i64) -> String {
    format!("{}{}", prefix, owner_id)
}
