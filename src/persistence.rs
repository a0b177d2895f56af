use crate::model::{AlertId, Bucket};
use crate::store::{AlertStore, DashboardStore, WriteOutcome};
use anyhow::{anyhow, Context, Result};
use hashbrown::HashSet;
use lru::LruCache;
use rocksdb::{
    checkpoint::Checkpoint, ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

const CF_ALERTS: &str = "alerts";
const CF_DASHBOARD: &str = "dashboard";
const CF_METADATA: &str = "metadata";

const KEY_NEXT_ALERT_ID: &[u8] = b"next_alert_id";
const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_CACHE_CAPACITY: usize = 1_024;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

/// RocksDB-backed store holding the alerts collection and the dashboard
/// documents in separate column families.
///
/// Alert documents are stored as JSON bytes since they are schemaless;
/// dashboard documents are typed and stored with bincode.
pub struct PersistentStore {
    db: DB,
    cache: Mutex<LruCache<String, Bucket>>,
    next_alert_id: u64,
    alert_count: usize,
    document_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PersistentOpenOptions {
    pub repair: bool,
    pub cache_capacity: usize,
}

impl Default for PersistentOpenOptions {
    fn default() -> Self {
        Self {
            repair: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        if options.repair {
            repair_db(path)?;
        }
        let db = open_db(path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        validate_or_init_manifest(&db)?;

        let next_alert_id = load_metadata::<u64>(&db, KEY_NEXT_ALERT_ID)?.unwrap_or(0);
        let alert_count = count_cf(&db, CF_ALERTS)?;
        let document_count = count_cf(&db, CF_DASHBOARD)?;
        let capacity = NonZeroUsize::new(options.cache_capacity.max(1))
            .ok_or_else(|| anyhow!("invalid cache capacity"))?;

        tracing::debug!(
            path = %path.display(),
            alerts = alert_count,
            documents = document_count,
            "opened persistent store"
        );

        Ok(Self {
            db,
            cache: Mutex::new(LruCache::new(capacity)),
            next_alert_id,
            alert_count,
            document_count,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint::new(&self.db)?;
        checkpoint.create_checkpoint(path)?;
        Ok(())
    }

    fn cache_put(&self, document: &Bucket) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(document.id().to_string(), document.clone());
        }
    }

    fn cache_pop(&self, id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(id);
        }
    }

    fn document_exists(&self, id: &str) -> Result<bool> {
        let cf = cf_handle(&self.db, CF_DASHBOARD)?;
        Ok(self.db.get_pinned_cf(cf, id.as_bytes())?.is_some())
    }
}

impl AlertStore for PersistentStore {
    fn insert_documents(&mut self, documents: Vec<Value>) -> Result<Vec<AlertId>> {
        let alerts_cf = cf_handle(&self.db, CF_ALERTS)?;
        let metadata_cf = cf_handle(&self.db, CF_METADATA)?;

        let mut batch = WriteBatch::default();
        let mut ids = Vec::with_capacity(documents.len());
        let mut next_id = self.next_alert_id;
        for document in &documents {
            let id = AlertId(next_id);
            next_id += 1;
            batch.put_cf(alerts_cf, id.0.to_be_bytes(), serde_json::to_vec(document)?);
            ids.push(id);
        }
        batch.put_cf(metadata_cf, KEY_NEXT_ALERT_ID, bincode::serialize(&next_id)?);
        self.db.write(batch)?;

        self.next_alert_id = next_id;
        self.alert_count += ids.len();
        Ok(ids)
    }

    fn for_each_document(&self, f: &mut dyn FnMut(AlertId, &Value)) -> Result<()> {
        let alerts_cf = cf_handle(&self.db, CF_ALERTS)?;
        for entry in self.db.iterator_cf(alerts_cf, IteratorMode::Start) {
            let (key, value) = entry?;
            let id = decode_alert_key(&key)
                .ok_or_else(|| anyhow!("corrupt alert key of length {}", key.len()))?;
            // Undecodable bytes are handed on as null so the caller can
            // count them with the other malformed documents.
            let document = serde_json::from_slice(&value).unwrap_or(Value::Null);
            f(id, &document);
        }
        Ok(())
    }

    fn alert_count(&self) -> usize {
        self.alert_count
    }

    fn clear_alerts(&mut self) -> Result<()> {
        clear_cf(&self.db, CF_ALERTS)?;
        remove_metadata_key(&self.db, KEY_NEXT_ALERT_ID)?;
        self.next_alert_id = 0;
        self.alert_count = 0;
        Ok(())
    }
}

impl DashboardStore for PersistentStore {
    fn upsert(&mut self, document: Bucket) -> Result<WriteOutcome> {
        let outcome = if self.document_exists(document.id())? {
            WriteOutcome::Replaced
        } else {
            WriteOutcome::Inserted
        };
        let cf = cf_handle(&self.db, CF_DASHBOARD)?;
        self.db
            .put_cf(cf, document.id().as_bytes(), bincode::serialize(&document)?)?;
        if outcome == WriteOutcome::Inserted {
            self.document_count += 1;
        }
        self.cache_put(&document);
        Ok(outcome)
    }

    /// All documents land in one write batch: either the whole run is
    /// committed or none of it is.
    fn upsert_all(&mut self, documents: Vec<Bucket>) -> Result<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(documents.len());
        let mut batch = WriteBatch::default();
        let mut staged: HashSet<&str> = HashSet::with_capacity(documents.len());
        {
            let cf = cf_handle(&self.db, CF_DASHBOARD)?;
            for document in &documents {
                let seen = !staged.insert(document.id());
                let outcome = if seen || self.document_exists(document.id())? {
                    WriteOutcome::Replaced
                } else {
                    WriteOutcome::Inserted
                };
                batch.put_cf(cf, document.id().as_bytes(), bincode::serialize(document)?);
                outcomes.push(outcome);
            }
        }
        self.db.write(batch)?;

        self.document_count += outcomes
            .iter()
            .filter(|outcome| **outcome == WriteOutcome::Inserted)
            .count();
        for document in &documents {
            self.cache_put(document);
        }
        Ok(outcomes)
    }

    fn get(&self, id: &str) -> Result<Option<Bucket>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(document) = cache.get(id) {
                return Ok(Some(document.clone()));
            }
        }

        let cf = cf_handle(&self.db, CF_DASHBOARD)?;
        let Some(bytes) = self.db.get_cf(cf, id.as_bytes())? else {
            return Ok(None);
        };
        let document: Bucket = bincode::deserialize(&bytes)
            .with_context(|| format!("corrupt dashboard document {id}"))?;
        self.cache_put(&document);
        Ok(Some(document))
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        if !self.document_exists(id)? {
            return Ok(false);
        }
        let cf = cf_handle(&self.db, CF_DASHBOARD)?;
        self.db.delete_cf(cf, id.as_bytes())?;
        self.cache_pop(id);
        self.document_count = self.document_count.saturating_sub(1);
        Ok(true)
    }

    fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let cf = cf_handle(&self.db, CF_DASHBOARD)?;
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );
        let mut ids = Vec::new();
        for entry in iter {
            let (key, _) = entry?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            ids.push(String::from_utf8(key.to_vec())?);
        }
        Ok(ids)
    }

    fn document_count(&self) -> usize {
        self.document_count
    }

    fn clear_documents(&mut self) -> Result<()> {
        clear_cf(&self.db, CF_DASHBOARD)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        self.document_count = 0;
        Ok(())
    }

    fn checkpoint(&self, path: &Path) -> Result<()> {
        PersistentStore::checkpoint(self, path)
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn open_db(path: &Path) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_ALERTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_DASHBOARD, Options::default()),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ];
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn cf_handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| anyhow!("missing column family {name}"))
}

fn decode_alert_key(key: &[u8]) -> Option<AlertId> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(AlertId(u64::from_be_bytes(bytes)))
}

fn count_cf(db: &DB, name: &str) -> Result<usize> {
    let cf = cf_handle(db, name)?;
    let mut count = 0;
    for entry in db.iterator_cf(cf, IteratorMode::Start) {
        entry?;
        count += 1;
    }
    Ok(count)
}

fn repair_db(path: &Path) -> Result<()> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn validate_or_init_manifest(db: &DB) -> Result<()> {
    let metadata_cf = cf_handle(db, CF_METADATA)?;
    if let Some(bytes) = db.get_cf(metadata_cf, KEY_MANIFEST)? {
        let manifest: StorageManifest = bincode::deserialize(&bytes)?;
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(anyhow!(
                "storage format version mismatch: expected {}, found {}",
                STORAGE_FORMAT_VERSION,
                manifest.format_version
            ));
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let bytes = bincode::serialize(&manifest)?;
    db.put_cf(metadata_cf, KEY_MANIFEST, bytes)?;
    Ok(())
}

fn load_metadata<T: serde::de::DeserializeOwned>(db: &DB, key: &[u8]) -> Result<Option<T>> {
    let metadata_cf = cf_handle(db, CF_METADATA)?;
    if let Some(bytes) = db.get_cf(metadata_cf, key)? {
        Ok(Some(bincode::deserialize(&bytes)?))
    } else {
        Ok(None)
    }
}

fn clear_cf(db: &DB, cf_name: &str) -> Result<()> {
    let cf = cf_handle(db, cf_name)?;
    let keys: Vec<Vec<u8>> = db
        .iterator_cf(cf, IteratorMode::Start)
        .map(|entry| entry.map(|(key, _)| key.to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    if keys.is_empty() {
        return Ok(());
    }
    let mut batch = WriteBatch::default();
    for key in keys {
        batch.delete_cf(cf, key);
    }
    db.write(batch)?;
    Ok(())
}

fn remove_metadata_key(db: &DB, key: &[u8]) -> Result<()> {
    let metadata_cf = cf_handle(db, CF_METADATA)?;
    db.delete_cf(metadata_cf, key)?;
    Ok(())
}
