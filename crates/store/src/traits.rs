//! KV store trait definition.

use crate::error::StoreResult;
use crate::types::{Condition, Item, ItemKey, QueryPage, QueryRequest, Update, WriteOp};
use async_trait::async_trait;

/// The slice of a hash+range KV store that DonutDB consumes.
///
/// Semantics follow DynamoDB: single-item compare-and-swap through condition
/// expressions (a failed condition surfaces as
/// [`StoreError::ConditionFailed`](crate::StoreError::ConditionFailed)),
/// range queries over the numeric sort key, and batch calls bounded at
/// 25 writes / 100 gets per request. Batch calls may leave work undone;
/// callers own the retry.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Fetch a single item. `projection` limits the returned attributes;
    /// key attributes may be projected like any other.
    async fn get_item(
        &self,
        key: &ItemKey,
        projection: Option<&[&str]>,
        consistent: bool,
    ) -> StoreResult<Option<Item>>;

    /// Write a full item, optionally guarded by a condition on the current
    /// stored state.
    async fn put_item(
        &self,
        key: &ItemKey,
        attrs: Item,
        condition: Option<Condition>,
    ) -> StoreResult<()>;

    /// Apply SET/REMOVE clauses to an item, creating it if absent,
    /// optionally guarded by a condition.
    async fn update_item(
        &self,
        key: &ItemKey,
        updates: Vec<Update>,
        condition: Option<Condition>,
    ) -> StoreResult<()>;

    /// Delete an item, optionally guarded by a condition.
    async fn delete_item(&self, key: &ItemKey, condition: Option<Condition>) -> StoreResult<()>;

    /// Run a range query over one partition. Pages are server-sized; follow
    /// `last_evaluated_key` to continue.
    async fn query(&self, request: QueryRequest) -> StoreResult<QueryPage>;

    /// Apply up to 25 put/delete requests in one call. Returns the requests
    /// the store did not process; the caller must retry them.
    async fn batch_write(&self, writes: Vec<WriteOp>) -> StoreResult<Vec<WriteOp>>;

    /// Fetch up to 100 items by key in one call. Returns the found items
    /// and the keys the store did not process. Missing items are simply
    /// absent from the result.
    async fn batch_get(
        &self,
        keys: Vec<ItemKey>,
        projection: Option<&[&str]>,
    ) -> StoreResult<(Vec<Item>, Vec<ItemKey>)>;

    /// Static identifier of the backend, for logs.
    fn backend_name(&self) -> &'static str;
}
