//! # Store Module
//!
//! The two collaborators the pipelines talk to: a source store of alert
//! documents and a key-addressable store of dashboard documents. [`Store`]
//! implements both in memory.

use crate::model::{Alert, AlertId, Bucket};
use anyhow::Result;
use hashbrown::HashMap;
use serde_json::Value;
use std::path::Path;

/// Result of a single keyed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Replaced,
}

/// Source collection of schemaless alert documents.
pub trait AlertStore {
    /// Insert documents as one batch, returning the ids assigned to them.
    fn insert_documents(&mut self, documents: Vec<Value>) -> Result<Vec<AlertId>>;

    /// Visit every stored document in ascending id order.
    fn for_each_document(&self, f: &mut dyn FnMut(AlertId, &Value)) -> Result<()>;

    fn alert_count(&self) -> usize;

    /// Drop every alert document. Id assignment restarts from zero.
    fn clear_alerts(&mut self) -> Result<()>;

    fn insert_alerts(&mut self, alerts: &[Alert]) -> Result<Vec<AlertId>> {
        let documents = alerts
            .iter()
            .map(Alert::to_document)
            .collect::<Result<Vec<_>>>()?;
        self.insert_documents(documents)
    }
}

/// Key-addressable collection of dashboard documents.
pub trait DashboardStore {
    /// Replace the document with the same id, or insert it.
    fn upsert(&mut self, document: Bucket) -> Result<WriteOutcome>;

    fn get(&self, id: &str) -> Result<Option<Bucket>>;

    /// Delete by key. Returns whether a document was removed.
    fn delete(&mut self, id: &str) -> Result<bool>;

    /// Ids starting with `prefix`, sorted.
    fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn document_count(&self) -> usize;

    fn clear_documents(&mut self) -> Result<()>;

    /// Upsert a run's worth of documents. Stops at the first failed write.
    fn upsert_all(&mut self, documents: Vec<Bucket>) -> Result<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(documents.len());
        for document in documents {
            outcomes.push(self.upsert(document)?);
        }
        Ok(outcomes)
    }

    fn checkpoint(&self, _path: &Path) -> Result<()> {
        Err(anyhow::anyhow!("checkpoint not supported for this store"))
    }
}

/// In-memory store holding both collections.
#[derive(Debug, Clone, Default)]
pub struct Store {
    /// Alert documents in insertion order
    alerts: Vec<(AlertId, Value)>,
    /// Dashboard documents by id
    dashboard: HashMap<String, Bucket>,
    next_alert_id: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with alerts.
    pub fn with_alerts(alerts: &[Alert]) -> Result<Self> {
        let mut store = Self::new();
        store.insert_alerts(alerts)?;
        Ok(store)
    }
}

impl AlertStore for Store {
    fn insert_documents(&mut self, documents: Vec<Value>) -> Result<Vec<AlertId>> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let id = AlertId(self.next_alert_id);
            self.next_alert_id += 1;
            self.alerts.push((id, document));
            ids.push(id);
        }
        Ok(ids)
    }

    fn for_each_document(&self, f: &mut dyn FnMut(AlertId, &Value)) -> Result<()> {
        for (id, document) in &self.alerts {
            f(*id, document);
        }
        Ok(())
    }

    fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    fn clear_alerts(&mut self) -> Result<()> {
        self.alerts.clear();
        self.next_alert_id = 0;
        Ok(())
    }
}

impl DashboardStore for Store {
    fn upsert(&mut self, document: Bucket) -> Result<WriteOutcome> {
        match self.dashboard.insert(document.id().to_string(), document) {
            Some(_) => Ok(WriteOutcome::Replaced),
            None => Ok(WriteOutcome::Inserted),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Bucket>> {
        Ok(self.dashboard.get(id).cloned())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        Ok(self.dashboard.remove(id).is_some())
    }

    fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .dashboard
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn document_count(&self) -> usize {
        self.dashboard.len()
    }

    fn clear_documents(&mut self) -> Result<()> {
        self.dashboard.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use serde_json::json;
    use time::macros::datetime;

    fn alert(name: &str) -> Alert {
        Alert::new(name, Priority::High, datetime!(2024-05-01 0:00 UTC), false)
    }

    #[test]
    fn test_store_creation() {
        let store = Store::new();
        assert_eq!(store.alert_count(), 0);
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let mut store = Store::new();
        let ids = store.insert_alerts(&[alert("a"), alert("b")]).unwrap();
        assert_eq!(ids, vec![AlertId(0), AlertId(1)]);
        let more = store.insert_documents(vec![json!({"name": "c"})]).unwrap();
        assert_eq!(more, vec![AlertId(2)]);
        assert_eq!(store.alert_count(), 3);
    }

    #[test]
    fn test_clear_alerts_restarts_ids() {
        let mut store = Store::new();
        store.insert_alerts(&[alert("a"), alert("b")]).unwrap();
        store.clear_alerts().unwrap();
        assert_eq!(store.alert_count(), 0);
        let ids = store.insert_alerts(&[alert("c")]).unwrap();
        assert_eq!(ids, vec![AlertId(0)]);
    }

    #[test]
    fn test_scan_visits_in_insertion_order() {
        let mut store = Store::new();
        store
            .insert_alerts(&[alert("a"), alert("b"), alert("c")])
            .unwrap();
        let mut names = Vec::new();
        store
            .for_each_document(&mut |_, doc| names.push(doc["name"].as_str().unwrap().to_string()))
            .unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_upsert_inserts_then_replaces() {
        let mut store = Store::new();
        let first = Bucket::new("priority_bucket_0", vec![alert("a")]);
        let second = Bucket::new("priority_bucket_0", vec![alert("b"), alert("c")]);

        assert_eq!(store.upsert(first).unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.upsert(second.clone()).unwrap(), WriteOutcome::Replaced);
        assert_eq!(store.document_count(), 1);
        assert_eq!(store.get("priority_bucket_0").unwrap(), Some(second));
    }

    #[test]
    fn test_delete_and_prefix_listing() {
        let mut store = Store::new();
        store
            .upsert_all(vec![
                Bucket::new("priority_bucket_1", vec![]),
                Bucket::new("priority_bucket_0", vec![]),
                Bucket::new("top25", vec![]),
            ])
            .unwrap();
        assert_eq!(
            store.ids_with_prefix("priority_bucket_").unwrap(),
            vec!["priority_bucket_0", "priority_bucket_1"]
        );
        assert!(store.delete("top25").unwrap());
        assert!(!store.delete("top25").unwrap());
        assert_eq!(store.document_count(), 2);
    }
}
