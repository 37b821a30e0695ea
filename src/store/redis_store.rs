use super::{Fields, KvStore, Result, StoreError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::{debug, info};

/// Merge fields and re-arm the TTL only when the hash exists.
/// KEYS[1] = record, ARGV[1] = ttl ms, ARGV[2..] = field/value pairs
const UPDATE_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
"#;

/// Redis-backed store
///
/// Records are hashes with a native `PEXPIRE`; lists are Redis lists
/// (`RPUSH` / `BLPOP`). Short commands share one multiplexed connection;
/// every `blocking_pop` opens its own, since a pending `BLPOP` would stall
/// everything queued behind it on a shared pipe.
///
/// A `BLPOP` dropped mid-flight can still remove an entry server-side, so a
/// worker cancelled while waiting may lose the entry it was about to receive.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        Ok(Self { client, conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let mut hset = redis::cmd("HSET");
        hset.arg(key);
        for (name, value) in fields {
            hset.arg(*name).arg(value);
        }

        let _: () = redis::pipe()
            .atomic()
            .add_command(hset)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        debug!(key, "Record written");
        Ok(())
    }

    async fn update_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<bool> {
        if fields.is_empty() {
            return Ok(self.get_fields(key).await?.is_some());
        }

        let mut conn = self.conn();
        let mut eval = redis::cmd("EVAL");
        eval.arg(UPDATE_IF_EXISTS).arg(1).arg(key).arg(ttl_ms(ttl));
        for (name, value) in fields {
            eval.arg(*name).arg(value);
        }

        let updated: i64 = eval.query_async(&mut conn).await?;
        Ok(updated == 1)
    }

    async fn get_fields(&self, key: &str) -> Result<Option<Fields>> {
        let mut conn = self.conn();
        let fields: Fields = redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        // HGETALL on a missing key is an empty map
        Ok(if fields.is_empty() { None } else { Some(fields) })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn push(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("RPUSH").arg(list).arg(value).query_async(&mut conn).await?;
        Ok(())
    }

    async fn blocking_pop(&self, list: &str) -> Result<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(list)
            .arg(0)
            .query_async(&mut conn)
            .await?;
        popped
            .map(|(_, value)| value)
            .ok_or_else(|| StoreError::Unavailable("BLPOP returned no value".into()))
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let mut conn = self.conn();
        let len: usize = redis::cmd("LLEN").arg(list).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
