//! Store contents shared by the bundled memory and file backends.

use super::{CompareExchangeResult, CompareExchangeValue, Document, PatchOperation, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Everything a bundled store holds, serializable as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreState {
    #[serde(default)]
    pub documents: BTreeMap<String, Document>,
    #[serde(default)]
    pub compare_exchange: BTreeMap<String, CompareExchangeValue>,
    /// Last fencing index handed out. Never reused.
    #[serde(default)]
    pub last_index: u64,
}

impl StoreState {
    pub fn stream_collection(&self, collection: &str) -> Vec<Document> {
        self.documents
            .values()
            .filter(|doc| doc.collection == collection)
            .cloned()
            .collect()
    }

    pub fn collection_page(&self, collection: &str, skip: usize, take: usize) -> Vec<Document> {
        self.documents
            .values()
            .filter(|doc| doc.collection == collection)
            .skip(skip)
            .take(take)
            .cloned()
            .collect()
    }

    pub fn store_all(&mut self, documents: Vec<Document>) {
        for document in documents {
            self.documents.insert(document.id.clone(), document);
        }
    }

    /// Apply a JSON merge patch payload to every document of a collection.
    pub fn patch_collection(
        &mut self,
        collection: &str,
        script: &str,
    ) -> Result<PatchOperation, StoreError> {
        let patch: Value = serde_json::from_str(script)
            .map_err(|e| StoreError::InvalidPatch(format!("{}: {}", collection, e)))?;

        let mut patched = 0;
        for doc in self
            .documents
            .values_mut()
            .filter(|doc| doc.collection == collection)
        {
            merge_patch(&mut doc.body, &patch);
            patched += 1;
        }

        Ok(PatchOperation {
            collection: collection.to_string(),
            patched,
            completed: true,
        })
    }

    pub fn put_compare_exchange(
        &mut self,
        key: &str,
        value: Value,
        index: u64,
    ) -> CompareExchangeResult {
        let current_index = self.compare_exchange.get(key).map(|entry| entry.index);
        let accepted = match current_index {
            None => index == 0,
            Some(current) => index == current,
        };

        if !accepted {
            return self.rejected(key);
        }

        self.last_index += 1;
        let entry = CompareExchangeValue {
            key: key.to_string(),
            value: value.clone(),
            index: self.last_index,
        };
        self.compare_exchange.insert(key.to_string(), entry);

        CompareExchangeResult {
            successful: true,
            index: self.last_index,
            value: Some(value),
        }
    }

    pub fn delete_compare_exchange(&mut self, key: &str, index: u64) -> CompareExchangeResult {
        let matches = self
            .compare_exchange
            .get(key)
            .is_some_and(|entry| entry.index == index);
        if !matches {
            return self.rejected(key);
        }

        self.compare_exchange.remove(key);
        CompareExchangeResult {
            successful: true,
            index: 0,
            value: None,
        }
    }

    fn rejected(&self, key: &str) -> CompareExchangeResult {
        let current = self.compare_exchange.get(key);
        CompareExchangeResult {
            successful: false,
            index: current.map(|entry| entry.index).unwrap_or(0),
            value: current.map(|entry| entry.value.clone()),
        }
    }
}

/// Apply an RFC 7396 JSON merge patch to `target`.
///
/// Object members are merged recursively, `null` members are removed and any
/// other patch value replaces the target outright.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_members) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_members) = target {
        for (key, value) in patch_members {
            if value.is_null() {
                target_members.remove(key);
            } else {
                merge_patch(
                    target_members.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}
