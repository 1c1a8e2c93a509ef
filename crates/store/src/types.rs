//! Item and request types for the KV store contract.
//!
//! The attribute model is deliberately narrow: DonutDB only ever stores
//! strings, 64-bit integers, and binary payloads.

use bytes::Bytes;
use std::collections::BTreeMap;

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    S(String),
    N(i64),
    B(Bytes),
}

impl AttrValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<i64> {
        match self {
            AttrValue::N(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<&Bytes> {
        match self {
            AttrValue::B(b) => Some(b),
            _ => None,
        }
    }
}

/// An item's attribute map. Key attributes are materialized into the map on
/// reads, so projections may select `hash_key`/`range_key` like any other
/// attribute.
pub type Item = BTreeMap<String, AttrValue>;

/// Primary key of an item: `(hash_key: string, range_key: number)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub hash_key: String,
    pub range_key: i64,
}

impl ItemKey {
    pub fn new(hash_key: impl Into<String>, range_key: i64) -> Self {
        Self {
            hash_key: hash_key.into(),
            range_key,
        }
    }
}

/// One request in a batch write.
#[derive(Clone, Debug)]
pub enum WriteOp {
    Put { key: ItemKey, attrs: Item },
    Delete { key: ItemKey },
}

impl WriteOp {
    pub fn key(&self) -> &ItemKey {
        match self {
            WriteOp::Put { key, .. } => key,
            WriteOp::Delete { key } => key,
        }
    }
}

/// A conditional-write expression.
#[derive(Clone, Debug)]
pub enum Condition {
    /// `attribute_not_exists(#attr)`
    AttributeNotExists(String),
    /// `#attr = :value`
    AttributeEquals(String, AttrValue),
    /// Conjunction of conditions.
    All(Vec<Condition>),
}

impl Condition {
    /// Evaluate against an item (or its absence). This is the semantics the
    /// memory backend implements and the DynamoDB backend delegates to the
    /// service.
    pub fn eval(&self, item: Option<&Item>) -> bool {
        match self {
            Condition::AttributeNotExists(attr) => {
                item.is_none_or(|i| !i.contains_key(attr.as_str()))
            }
            Condition::AttributeEquals(attr, want) => {
                item.is_some_and(|i| i.get(attr.as_str()) == Some(want))
            }
            Condition::All(conds) => conds.iter().all(|c| c.eval(item)),
        }
    }
}

/// One clause of an update expression.
#[derive(Clone, Debug)]
pub enum Update {
    /// `SET #attr = :value`
    Set(String, AttrValue),
    /// `REMOVE #attr`
    Remove(String),
}

/// Sort-key condition for a query.
#[derive(Clone, Copy, Debug)]
pub enum RangeCond {
    /// No sort-key restriction: the whole partition.
    Any,
    /// `range_key = :v`
    Eq(i64),
    /// `range_key BETWEEN :lo AND :hi` (inclusive).
    Between(i64, i64),
}

/// A range query over one partition.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub hash_key: String,
    pub range: RangeCond,
    pub scan_forward: bool,
    pub limit: Option<i32>,
    pub projection: Option<Vec<String>>,
    pub consistent: bool,
    pub exclusive_start_key: Option<ItemKey>,
}

impl QueryRequest {
    /// Query a whole partition, ascending, no limit.
    pub fn partition(hash_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range: RangeCond::Any,
            scan_forward: true,
            limit: None,
            projection: None,
            consistent: false,
            exclusive_start_key: None,
        }
    }

    pub fn range(mut self, range: RangeCond) -> Self {
        self.range = range;
        self
    }

    pub fn scan_forward(mut self, forward: bool) -> Self {
        self.scan_forward = forward;
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, attrs: &[&str]) -> Self {
        self.projection = Some(attrs.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent = consistent;
        self
    }

    pub fn start_after(mut self, key: ItemKey) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }
}

/// One page of query results. `last_evaluated_key` is present when the
/// server stopped before exhausting the range; pass it back via
/// [`QueryRequest::start_after`] to continue.
#[derive(Clone, Debug, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<ItemKey>,
}
