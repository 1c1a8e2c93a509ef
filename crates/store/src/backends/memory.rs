//! In-memory backend emulating the table contract.
//!
//! Single ordered map keyed by `(hash_key, range_key)`. Conditional writes,
//! range queries, paging, and the batch limits behave as the DynamoDB
//! backend does, which makes this the substrate for every integration test
//! and for local experimentation.

use crate::error::{StoreError, StoreResult};
use crate::traits::KvStore;
use crate::types::{
    AttrValue, Condition, Item, ItemKey, QueryPage, QueryRequest, RangeCond, Update, WriteOp,
};
use crate::{HASH_KEY, MAX_BATCH_GET_ITEMS, MAX_BATCH_WRITE_ITEMS, RANGE_KEY};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory [`KvStore`].
#[derive(Default)]
pub struct MemoryBackend {
    items: RwLock<BTreeMap<(String, i64), Item>>,
    /// When set, query pages are capped at this many items even without an
    /// explicit limit, imitating the server's size-based page boundaries.
    page_limit: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap query pages at `limit` items to exercise pagination paths.
    pub fn with_page_limit(limit: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            page_limit: Some(limit),
        }
    }

    /// Number of stored items (tests only).
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Count items whose hash key starts with `prefix` (tests only).
    pub fn count_hash_prefix(&self, prefix: &str) -> usize {
        self.items
            .read()
            .keys()
            .filter(|(h, _)| h.starts_with(prefix))
            .count()
    }

    fn stored_key(key: &ItemKey) -> (String, i64) {
        (key.hash_key.clone(), key.range_key)
    }

    /// Materialize key attributes into the item map, as the real table does.
    fn with_key_attrs(key: &ItemKey, mut attrs: Item) -> Item {
        attrs.insert(HASH_KEY.to_string(), AttrValue::S(key.hash_key.clone()));
        attrs.insert(RANGE_KEY.to_string(), AttrValue::N(key.range_key));
        attrs
    }

    fn project(item: &Item, projection: Option<&[&str]>) -> Item {
        match projection {
            None => item.clone(),
            Some(attrs) => {
                let mut out = Item::new();
                for attr in attrs {
                    if let Some(value) = item.get(*attr) {
                        out.insert(attr.to_string(), value.clone());
                    }
                }
                out
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryBackend {
    async fn get_item(
        &self,
        key: &ItemKey,
        projection: Option<&[&str]>,
        _consistent: bool,
    ) -> StoreResult<Option<Item>> {
        let items = self.items.read();
        let found = items
            .get(&Self::stored_key(key))
            .map(|item| Self::project(item, projection));
        // An item that projects to nothing reads as absent, matching the
        // service's GetItem response shape.
        Ok(found.filter(|item| !item.is_empty()))
    }

    async fn put_item(
        &self,
        key: &ItemKey,
        attrs: Item,
        condition: Option<Condition>,
    ) -> StoreResult<()> {
        let mut items = self.items.write();
        let stored = Self::stored_key(key);
        if let Some(cond) = condition {
            if !cond.eval(items.get(&stored)) {
                return Err(StoreError::ConditionFailed);
            }
        }
        items.insert(stored, Self::with_key_attrs(key, attrs));
        Ok(())
    }

    async fn update_item(
        &self,
        key: &ItemKey,
        updates: Vec<Update>,
        condition: Option<Condition>,
    ) -> StoreResult<()> {
        let mut items = self.items.write();
        let stored = Self::stored_key(key);
        if let Some(cond) = condition {
            if !cond.eval(items.get(&stored)) {
                return Err(StoreError::ConditionFailed);
            }
        }
        let item = items
            .entry(stored)
            .or_insert_with(|| Self::with_key_attrs(key, Item::new()));
        for update in updates {
            match update {
                Update::Set(attr, value) => {
                    item.insert(attr, value);
                }
                Update::Remove(attr) => {
                    item.remove(&attr);
                }
            }
        }
        Ok(())
    }

    async fn delete_item(&self, key: &ItemKey, condition: Option<Condition>) -> StoreResult<()> {
        let mut items = self.items.write();
        let stored = Self::stored_key(key);
        if let Some(cond) = condition {
            if !cond.eval(items.get(&stored)) {
                return Err(StoreError::ConditionFailed);
            }
        }
        items.remove(&stored);
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> StoreResult<QueryPage> {
        let items = self.items.read();

        let (lo, hi) = match request.range {
            RangeCond::Any => (i64::MIN, i64::MAX),
            RangeCond::Eq(v) => (v, v),
            RangeCond::Between(lo, hi) => (lo, hi),
        };
        if lo > hi {
            return Ok(QueryPage::default());
        }

        let mut matched: Vec<(&(String, i64), &Item)> = items
            .range((request.hash_key.clone(), lo)..=(request.hash_key.clone(), hi))
            .collect();
        if !request.scan_forward {
            matched.reverse();
        }

        // Resume after the exclusive start key, honoring scan direction.
        if let Some(start) = &request.exclusive_start_key {
            let stored = Self::stored_key(start);
            if let Some(pos) = matched.iter().position(|(k, _)| **k == stored) {
                matched.drain(..=pos);
            }
        }

        let mut page_size = matched.len();
        if let Some(limit) = request.limit {
            page_size = page_size.min(limit.max(0) as usize);
        }
        if let Some(cap) = self.page_limit {
            page_size = page_size.min(cap);
        }

        let truncated = page_size < matched.len();
        let projection_refs: Option<Vec<&str>> = request
            .projection
            .as_ref()
            .map(|attrs| attrs.iter().map(String::as_str).collect());

        let page: Vec<Item> = matched[..page_size]
            .iter()
            .map(|(_, item)| Self::project(item, projection_refs.as_deref()))
            .collect();

        let last_evaluated_key = if truncated && page_size > 0 {
            let (hash, range) = matched[page_size - 1].0;
            Some(ItemKey::new(hash.clone(), *range))
        } else {
            None
        };

        Ok(QueryPage {
            items: page,
            last_evaluated_key,
        })
    }

    async fn batch_write(&self, writes: Vec<WriteOp>) -> StoreResult<Vec<WriteOp>> {
        if writes.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StoreError::BatchTooLarge(writes.len()));
        }
        let mut items = self.items.write();
        for write in writes {
            match write {
                WriteOp::Put { key, attrs } => {
                    items.insert(Self::stored_key(&key), Self::with_key_attrs(&key, attrs));
                }
                WriteOp::Delete { key } => {
                    items.remove(&Self::stored_key(&key));
                }
            }
        }
        Ok(Vec::new())
    }

    async fn batch_get(
        &self,
        keys: Vec<ItemKey>,
        projection: Option<&[&str]>,
    ) -> StoreResult<(Vec<Item>, Vec<ItemKey>)> {
        if keys.len() > MAX_BATCH_GET_ITEMS {
            return Err(StoreError::BatchTooLarge(keys.len()));
        }
        let items = self.items.read();
        let mut found = Vec::new();
        for key in keys {
            if let Some(item) = items.get(&Self::stored_key(&key)) {
                let projected = Self::project(item, projection);
                if !projected.is_empty() {
                    found.push(projected);
                }
            }
        }
        Ok((found, Vec::new()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
