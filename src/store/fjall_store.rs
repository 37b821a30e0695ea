use super::{Fields, KvStore, Result};
use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tracing::{debug, info};

const NEXT_SEQ_KEY: &[u8] = b"next_seq";

/// Embedded store on a fjall keyspace
///
/// Layout:
/// - `records` partition: key -> `StoredRecord` (JSON, carries its own expiry)
/// - `lists` partition: `{list}\0{seq:u64 big-endian}` -> value bytes
/// - `metadata` partition: `next_seq` -> u64 (big-endian)
///
/// Expiry is lazy: an expired record is treated as absent and removed on the
/// next read, and `prune_expired` clears the rest in bulk.
pub struct FjallStore {
    keyspace: Keyspace,
    records: PartitionHandle,
    lists: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: AtomicU64,
    // read-modify-write on records
    record_lock: Mutex<()>,
    // pop = scan head + remove
    list_lock: Mutex<()>,
    pushed: Notify,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    expires_at_ms: u64,
    fields: Fields,
}

impl StoredRecord {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

impl FjallStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let records = keyspace.open_partition("records", PartitionCreateOptions::default())?;
        let lists = keyspace.open_partition("lists", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(NEXT_SEQ_KEY)?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(current_seq, "Fjall store opened");

        Ok(Self {
            keyspace,
            records,
            lists,
            metadata,
            seq_counter: AtomicU64::new(current_seq),
            record_lock: Mutex::new(()),
            list_lock: Mutex::new(()),
            pushed: Notify::new(),
        })
    }

    fn lock_records(&self) -> MutexGuard<'_, ()> {
        self.record_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lists(&self) -> MutexGuard<'_, ()> {
        self.list_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a record, dropping it if its TTL has elapsed
    fn load_live(&self, key: &str) -> Result<Option<StoredRecord>> {
        let Some(bytes) = self.records.get(key)? else {
            return Ok(None);
        };
        let record: StoredRecord = serde_json::from_slice(&bytes)?;
        if record.is_expired(now_ms()) {
            self.records.remove(key)?;
            debug!(key, "Dropped expired record on read");
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn write_record(&self, key: &str, fields: Fields, ttl: Duration) -> Result<()> {
        let record = StoredRecord {
            expires_at_ms: now_ms().saturating_add(ttl_ms(ttl)),
            fields,
        };
        self.records.insert(key, serde_json::to_vec(&record)?)?;
        Ok(())
    }

    fn merge(fields: &mut Fields, updates: &[(&str, String)]) {
        for (name, value) in updates {
            fields.insert((*name).to_string(), value.clone());
        }
    }

    fn try_pop(&self, list: &str) -> Result<Option<String>> {
        let _guard = self.lock_lists();
        let head = self.lists.prefix(list_prefix(list)).next().transpose()?;
        match head {
            Some((key, value)) => {
                self.lists.remove(key)?;
                Ok(Some(String::from_utf8(value.to_vec())?))
            }
            None => Ok(None),
        }
    }

    /// Keys of records expired at `now`, scanned without the record lock
    fn expired_keys(&self, now: u64) -> Result<Vec<fjall::Slice>> {
        let mut expired = Vec::new();
        for item in self.records.iter() {
            let (key, value) = item?;
            let record: StoredRecord = serde_json::from_slice(&value)?;
            if record.is_expired(now) {
                expired.push(key);
            }
        }
        Ok(expired)
    }

    /// Remove `key` if it is still expired; a record rewritten since the scan
    /// is kept.
    fn remove_if_expired(&self, key: &[u8], now: u64) -> Result<bool> {
        let _guard = self.lock_records();
        let Some(bytes) = self.records.get(key)? else {
            return Ok(false);
        };
        let record: StoredRecord = serde_json::from_slice(&bytes)?;
        if !record.is_expired(now) {
            return Ok(false);
        }
        self.records.remove(key)?;
        Ok(true)
    }

    /// Current list sequence counter (next seq to be assigned)
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for FjallStore {
    fn backend(&self) -> &'static str {
        "fjall"
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()> {
        let _guard = self.lock_records();
        let mut current = self.load_live(key)?.map(|r| r.fields).unwrap_or_default();
        Self::merge(&mut current, fields);
        self.write_record(key, current, ttl)?;
        debug!(key, "Record written");
        Ok(())
    }

    async fn update_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<bool> {
        let _guard = self.lock_records();
        let Some(record) = self.load_live(key)? else {
            return Ok(false);
        };
        let mut current = record.fields;
        Self::merge(&mut current, fields);
        self.write_record(key, current, ttl)?;
        debug!(key, "Record updated");
        Ok(true)
    }

    async fn get_fields(&self, key: &str) -> Result<Option<Fields>> {
        let _guard = self.lock_records();
        Ok(self.load_live(key)?.map(|r| r.fields))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.lock_records();
        let existed = self.load_live(key)?.is_some();
        if existed {
            self.records.remove(key)?;
        }
        Ok(existed)
    }

    async fn push(&self, list: &str, value: &str) -> Result<()> {
        {
            let _guard = self.lock_lists();
            let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
            self.lists.insert(list_key(list, seq), value.as_bytes())?;
            self.metadata.insert(NEXT_SEQ_KEY, (seq + 1).to_be_bytes())?;
            debug!(list, seq, "List entry pushed");
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, list: &str) -> Result<String> {
        loop {
            // Register interest before checking so a push landing in between
            // still wakes this waiter.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(list)? {
                return Ok(value);
            }
            notified.await;
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let mut count = 0;
        for item in self.lists.prefix(list_prefix(list)) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        let _ = self.metadata.get(NEXT_SEQ_KEY)?;
        Ok(())
    }

    async fn prune_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut pruned = 0;
        for key in self.expired_keys(now)? {
            if self.remove_if_expired(&key, now)? {
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(pruned, "Pruned expired records");
        }
        Ok(pruned)
    }

    async fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

fn list_prefix(list: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(list.len() + 1);
    prefix.extend_from_slice(list.as_bytes());
    prefix.push(0);
    prefix
}

fn list_key(list: &str, seq: u64) -> Vec<u8> {
    let mut key = list_prefix(list);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn create_test_store() -> (FjallStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("store")).unwrap();
        (store, temp_dir)
    }

    fn field(name: &'static str, value: &str) -> (&'static str, String) {
        (name, value.to_string())
    }

    #[tokio::test]
    async fn test_set_and_get_fields() {
        let (store, _temp) = create_test_store();

        store
            .set_fields("job:1", &[field("status", "pending"), field("url", "https://a")], HOUR)
            .await
            .unwrap();

        let fields = store.get_fields("job:1").await.unwrap().unwrap();
        assert_eq!(fields["status"], "pending");
        assert_eq!(fields["url"], "https://a");
    }

    #[tokio::test]
    async fn test_update_keeps_unnamed_fields() {
        let (store, _temp) = create_test_store();
        store
            .set_fields("job:1", &[field("status", "pending"), field("url", "https://a")], HOUR)
            .await
            .unwrap();

        let updated = store
            .update_fields("job:1", &[field("status", "processing")], HOUR)
            .await
            .unwrap();
        assert!(updated);

        let fields = store.get_fields("job:1").await.unwrap().unwrap();
        assert_eq!(fields["status"], "processing");
        assert_eq!(fields["url"], "https://a");
    }

    #[tokio::test]
    async fn test_update_does_not_resurrect() {
        let (store, _temp) = create_test_store();

        let updated = store
            .update_fields("job:missing", &[field("status", "failed")], HOUR)
            .await
            .unwrap();

        assert!(!updated);
        assert!(store.get_fields("job:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent() {
        let (store, _temp) = create_test_store();
        store
            .set_fields("job:1", &[field("status", "pending")], Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get_fields("job:1").await.unwrap().is_none());
        let updated = store
            .update_fields("job:1", &[field("status", "processing")], HOUR)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_write_refreshes_ttl() {
        let (store, _temp) = create_test_store();
        store
            .set_fields("job:1", &[field("status", "pending")], Duration::from_millis(40))
            .await
            .unwrap();
        store
            .update_fields("job:1", &[field("status", "processing")], HOUR)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let fields = store.get_fields("job:1").await.unwrap().unwrap();
        assert_eq!(fields["status"], "processing");
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp) = create_test_store();
        store.set_fields("result:1", &[field("filename", "1.mp4")], HOUR).await.unwrap();

        assert!(store.delete("result:1").await.unwrap());
        assert!(!store.delete("result:1").await.unwrap());
        assert!(store.get_fields("result:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let (store, _temp) = create_test_store();
        store
            .set_fields("job:old", &[field("status", "failed")], Duration::from_millis(10))
            .await
            .unwrap();
        store.set_fields("job:new", &[field("status", "pending")], HOUR).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.prune_expired().await.unwrap(), 1);
        assert!(store.get_fields("job:new").await.unwrap().is_some());
        assert_eq!(store.prune_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_keeps_record_rewritten_after_scan() {
        let (store, _temp) = create_test_store();
        store
            .set_fields("job:1", &[field("status", "pending")], Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let now = now_ms();
        let candidates = store.expired_keys(now).unwrap();
        assert_eq!(candidates.len(), 1);

        // refreshed by a writer between the scan and the removal
        store.set_fields("job:1", &[field("status", "pending")], HOUR).await.unwrap();

        assert!(!store.remove_if_expired(&candidates[0], now).unwrap());
        assert!(store.get_fields("job:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_is_fifo() {
        let (store, _temp) = create_test_store();
        for id in ["a", "b", "c"] {
            store.push("queue:test", id).await.unwrap();
        }

        assert_eq!(store.list_len("queue:test").await.unwrap(), 3);
        assert_eq!(store.blocking_pop("queue:test").await.unwrap(), "a");
        assert_eq!(store.blocking_pop("queue:test").await.unwrap(), "b");
        assert_eq!(store.blocking_pop("queue:test").await.unwrap(), "c");
        assert_eq!(store.list_len("queue:test").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lists_are_independent() {
        let (store, _temp) = create_test_store();
        store.push("queue:a", "1").await.unwrap();
        store.push("queue:ab", "2").await.unwrap();

        assert_eq!(store.list_len("queue:a").await.unwrap(), 1);
        assert_eq!(store.blocking_pop("queue:ab").await.unwrap(), "2");
        assert_eq!(store.list_len("queue:a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.blocking_pop("queue:test").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        store.push("queue:test", "job-1").await.unwrap();

        let value = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(value, "job-1");
    }

    #[tokio::test]
    async fn test_concurrent_pops_deliver_each_entry_once() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..25 {
                    seen.push(store.blocking_pop("queue:test").await.unwrap());
                }
                seen
            }));
        }

        for i in 0..100 {
            store.push("queue:test", &format!("job-{i}")).await.unwrap();
        }

        let mut all = HashSet::new();
        for consumer in consumers {
            let seen = tokio::time::timeout(Duration::from_secs(5), consumer)
                .await
                .unwrap()
                .unwrap();
            for id in seen {
                assert!(all.insert(id), "entry delivered twice");
            }
        }
        assert_eq!(all.len(), 100);
    }

    #[tokio::test]
    async fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store");

        {
            let store = FjallStore::open(&path).unwrap();
            store.set_fields("job:1", &[field("status", "pending")], HOUR).await.unwrap();
            store.push("queue:test", "job-1").await.unwrap();
            store.flush().await.unwrap();
        }

        let store = FjallStore::open(&path).unwrap();
        assert_eq!(store.current_seq(), 1);
        assert_eq!(store.get_fields("job:1").await.unwrap().unwrap()["status"], "pending");

        store.push("queue:test", "job-2").await.unwrap();
        assert_eq!(store.blocking_pop("queue:test").await.unwrap(), "job-1");
        assert_eq!(store.blocking_pop("queue:test").await.unwrap(), "job-2");
    }
}
