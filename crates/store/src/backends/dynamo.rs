//! DynamoDB backend using the AWS SDK.

use crate::error::{StoreError, StoreResult};
use crate::traits::KvStore;
use crate::types::{
    AttrValue, Condition, Item, ItemKey, QueryPage, QueryRequest, RangeCond, Update, WriteOp,
};
use crate::{HASH_KEY, MAX_BATCH_GET_ITEMS, MAX_BATCH_WRITE_ITEMS, RANGE_KEY};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, DeleteRequest, KeySchemaElement,
    KeysAndAttributes, KeyType, PutRequest, ScalarAttributeType, TableStatus, WriteRequest,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

/// DynamoDB-backed [`KvStore`] over one table.
pub struct DynamoBackend {
    client: Client,
    table: String,
}

impl std::fmt::Debug for DynamoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoBackend")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl DynamoBackend {
    /// Wrap an already-configured client.
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Build a client from the ambient AWS environment (credentials chain,
    /// region, etc).
    pub async fn from_env(table: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), table)
    }

    /// Build a client from explicit settings. `endpoint` supports local
    /// DynamoDB emulators; bare `host:port` endpoints get `http://`
    /// prepended.
    pub async fn connect(
        table: impl Into<String>,
        endpoint: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> StoreResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StoreError::MalformedItem(
                "config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_dynamodb::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_dynamodb::config::Credentials::new(key_id, secret, None, None, "donutdb");
            builder = builder.credentials_provider(credentials);
        }

        if let Some(endpoint_url) = endpoint {
            let endpoint_lower = endpoint_url.to_lowercase();
            let normalized =
                if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
                    endpoint_url
                } else {
                    format!("http://{endpoint_url}")
                };
            builder = builder.endpoint_url(normalized);
        }

        Ok(Self::new(Client::from_conf(builder.build()), table))
    }

    /// Create the backing table (pay-per-request) if it does not exist, and
    /// wait for it to become active.
    pub async fn create_table(&self) -> StoreResult<()> {
        let result = self
            .client
            .create_table()
            .table_name(&self.table)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(HASH_KEY)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(StoreError::service)?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(RANGE_KEY)
                    .attribute_type(ScalarAttributeType::N)
                    .build()
                    .map_err(StoreError::service)?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(HASH_KEY)
                    .key_type(KeyType::Hash)
                    .build()
                    .map_err(StoreError::service)?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(RANGE_KEY)
                    .key_type(KeyType::Range)
                    .build()
                    .map_err(StoreError::service)?,
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        if let Err(err) = result {
            let service = err.into_service_error();
            if !service.is_resource_in_use_exception() {
                return Err(StoreError::service(service));
            }
        }

        // Bounded poll until the table reports active.
        for _ in 0..60 {
            let desc = self
                .client
                .describe_table()
                .table_name(&self.table)
                .send()
                .await
                .map_err(StoreError::service)?;
            let status = desc.table().and_then(|t| t.table_status().cloned());
            if status == Some(TableStatus::Active) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        Err(StoreError::MalformedItem(format!(
            "table {} did not become active",
            self.table
        )))
    }

    fn key_map(key: &ItemKey) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (
                HASH_KEY.to_string(),
                AttributeValue::S(key.hash_key.clone()),
            ),
            (
                RANGE_KEY.to_string(),
                AttributeValue::N(key.range_key.to_string()),
            ),
        ])
    }
}

fn to_sdk_value(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(s) => AttributeValue::S(s.clone()),
        AttrValue::N(n) => AttributeValue::N(n.to_string()),
        AttrValue::B(b) => AttributeValue::B(Blob::new(b.to_vec())),
    }
}

fn from_sdk_value(value: AttributeValue) -> StoreResult<AttrValue> {
    match value {
        AttributeValue::S(s) => Ok(AttrValue::S(s)),
        AttributeValue::N(n) => n
            .parse::<i64>()
            .map(AttrValue::N)
            .map_err(|_| StoreError::MalformedItem(format!("numeric attribute {n} overflows"))),
        AttributeValue::B(b) => Ok(AttrValue::B(Bytes::from(b.into_inner()))),
        other => Err(StoreError::MalformedItem(format!(
            "unsupported attribute type: {other:?}"
        ))),
    }
}

fn from_sdk_item(raw: HashMap<String, AttributeValue>) -> StoreResult<Item> {
    let mut item = Item::new();
    for (name, value) in raw {
        item.insert(name, from_sdk_value(value)?);
    }
    Ok(item)
}

fn item_key_from_sdk(raw: &HashMap<String, AttributeValue>) -> StoreResult<ItemKey> {
    let hash_key = raw
        .get(HASH_KEY)
        .and_then(|v| v.as_s().ok())
        .ok_or(StoreError::MissingAttribute(HASH_KEY))?;
    let range_key = raw
        .get(RANGE_KEY)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
        .ok_or(StoreError::MissingAttribute(RANGE_KEY))?;
    Ok(ItemKey::new(hash_key.clone(), range_key))
}

/// Accumulates expression-attribute-name and -value substitutions. File
/// names land in attribute positions, so every name goes through an alias
/// to dodge reserved words and illegal characters.
#[derive(Default)]
struct ExprBuilder {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl ExprBuilder {
    fn name(&mut self, attr: &str) -> String {
        let alias = format!("#n{}", self.names.len());
        self.names.insert(alias.clone(), attr.to_string());
        alias
    }

    fn value(&mut self, value: &AttrValue) -> String {
        let alias = format!(":v{}", self.values.len());
        self.values.insert(alias.clone(), to_sdk_value(value));
        alias
    }

    fn condition(&mut self, cond: &Condition) -> String {
        match cond {
            Condition::AttributeNotExists(attr) => {
                format!("attribute_not_exists({})", self.name(attr))
            }
            Condition::AttributeEquals(attr, value) => {
                format!("{} = {}", self.name(attr), self.value(value))
            }
            Condition::All(conds) => conds
                .iter()
                .map(|c| self.condition(c))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    fn projection(&mut self, attrs: &[&str]) -> String {
        attrs
            .iter()
            .map(|a| self.name(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn update(&mut self, updates: &[Update]) -> String {
        let mut sets = Vec::new();
        let mut removes = Vec::new();
        for update in updates {
            match update {
                Update::Set(attr, value) => {
                    let name = self.name(attr);
                    let value = self.value(value);
                    sets.push(format!("{name} = {value}"));
                }
                Update::Remove(attr) => removes.push(self.name(attr)),
            }
        }

        let mut expr = String::new();
        if !sets.is_empty() {
            expr.push_str("SET ");
            expr.push_str(&sets.join(", "));
        }
        if !removes.is_empty() {
            if !expr.is_empty() {
                expr.push(' ');
            }
            expr.push_str("REMOVE ");
            expr.push_str(&removes.join(", "));
        }
        expr
    }

    fn names(&self) -> Option<HashMap<String, String>> {
        (!self.names.is_empty()).then(|| self.names.clone())
    }

    fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }
}

#[async_trait]
impl KvStore for DynamoBackend {
    #[instrument(skip(self, projection), fields(table = %self.table))]
    async fn get_item(
        &self,
        key: &ItemKey,
        projection: Option<&[&str]>,
        consistent: bool,
    ) -> StoreResult<Option<Item>> {
        let mut expr = ExprBuilder::default();
        let projection_expr = projection.map(|attrs| expr.projection(attrs));

        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .set_key(Some(Self::key_map(key)))
            .consistent_read(consistent)
            .set_projection_expression(projection_expr)
            .set_expression_attribute_names(expr.names())
            .send()
            .await
            .map_err(StoreError::service)?;

        match out.item {
            Some(raw) if !raw.is_empty() => Ok(Some(from_sdk_item(raw)?)),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, attrs, condition), fields(table = %self.table))]
    async fn put_item(
        &self,
        key: &ItemKey,
        attrs: Item,
        condition: Option<Condition>,
    ) -> StoreResult<()> {
        let mut expr = ExprBuilder::default();
        let condition_expr = condition.map(|c| expr.condition(&c));

        let mut item = Self::key_map(key);
        for (name, value) in &attrs {
            item.insert(name.clone(), to_sdk_value(value));
        }

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .set_condition_expression(condition_expr)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if matches!(service, PutItemError::ConditionalCheckFailedException(_)) {
                    StoreError::ConditionFailed
                } else {
                    StoreError::service(service)
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self, updates, condition), fields(table = %self.table))]
    async fn update_item(
        &self,
        key: &ItemKey,
        updates: Vec<Update>,
        condition: Option<Condition>,
    ) -> StoreResult<()> {
        let mut expr = ExprBuilder::default();
        let update_expr = expr.update(&updates);
        let condition_expr = condition.map(|c| expr.condition(&c));

        self.client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key_map(key)))
            .update_expression(update_expr)
            .set_condition_expression(condition_expr)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if matches!(
                    service,
                    UpdateItemError::ConditionalCheckFailedException(_)
                ) {
                    StoreError::ConditionFailed
                } else {
                    StoreError::service(service)
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self, condition), fields(table = %self.table))]
    async fn delete_item(&self, key: &ItemKey, condition: Option<Condition>) -> StoreResult<()> {
        let mut expr = ExprBuilder::default();
        let condition_expr = condition.map(|c| expr.condition(&c));

        self.client
            .delete_item()
            .table_name(&self.table)
            .set_key(Some(Self::key_map(key)))
            .set_condition_expression(condition_expr)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if matches!(
                    service,
                    DeleteItemError::ConditionalCheckFailedException(_)
                ) {
                    StoreError::ConditionFailed
                } else {
                    StoreError::service(service)
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(table = %self.table, hash_key = %request.hash_key))]
    async fn query(&self, request: QueryRequest) -> StoreResult<QueryPage> {
        let mut expr = ExprBuilder::default();
        let hk = expr.name(HASH_KEY);
        let hk_value = expr.value(&AttrValue::S(request.hash_key.clone()));
        let key_condition = match request.range {
            RangeCond::Any => format!("{hk} = {hk_value}"),
            RangeCond::Eq(v) => {
                let rk = expr.name(RANGE_KEY);
                let rv = expr.value(&AttrValue::N(v));
                format!("{hk} = {hk_value} AND {rk} = {rv}")
            }
            RangeCond::Between(lo, hi) => {
                let rk = expr.name(RANGE_KEY);
                let lo_value = expr.value(&AttrValue::N(lo));
                let hi_value = expr.value(&AttrValue::N(hi));
                format!("{hk} = {hk_value} AND {rk} BETWEEN {lo_value} AND {hi_value}")
            }
        };
        let projection_expr = request
            .projection
            .as_ref()
            .map(|attrs| {
                let refs: Vec<&str> = attrs.iter().map(String::as_str).collect();
                expr.projection(&refs)
            });

        let out = self
            .client
            .query()
            .table_name(&self.table)
            .key_condition_expression(key_condition)
            .scan_index_forward(request.scan_forward)
            .consistent_read(request.consistent)
            .set_limit(request.limit)
            .set_projection_expression(projection_expr)
            .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(Self::key_map))
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .send()
            .await
            .map_err(StoreError::service)?;

        let mut items = Vec::new();
        for raw in out.items.unwrap_or_default() {
            items.push(from_sdk_item(raw)?);
        }
        let last_evaluated_key = match out.last_evaluated_key {
            Some(raw) => Some(item_key_from_sdk(&raw)?),
            None => None,
        };

        Ok(QueryPage {
            items,
            last_evaluated_key,
        })
    }

    #[instrument(skip(self, writes), fields(table = %self.table, count = writes.len()))]
    async fn batch_write(&self, writes: Vec<WriteOp>) -> StoreResult<Vec<WriteOp>> {
        if writes.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StoreError::BatchTooLarge(writes.len()));
        }
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let mut requests = Vec::with_capacity(writes.len());
        for write in &writes {
            let request = match write {
                WriteOp::Put { key, attrs } => {
                    let mut item = Self::key_map(key);
                    for (name, value) in attrs {
                        item.insert(name.clone(), to_sdk_value(value));
                    }
                    WriteRequest::builder()
                        .put_request(
                            PutRequest::builder()
                                .set_item(Some(item))
                                .build()
                                .map_err(StoreError::service)?,
                        )
                        .build()
                }
                WriteOp::Delete { key } => WriteRequest::builder()
                    .delete_request(
                        DeleteRequest::builder()
                            .set_key(Some(Self::key_map(key)))
                            .build()
                            .map_err(StoreError::service)?,
                    )
                    .build(),
            };
            requests.push(request);
        }

        let out = self
            .client
            .batch_write_item()
            .request_items(&self.table, requests)
            .send()
            .await
            .map_err(StoreError::service)?;

        let mut unprocessed = Vec::new();
        if let Some(mut remaining) = out.unprocessed_items {
            for request in remaining.remove(&self.table).unwrap_or_default() {
                if let Some(put) = request.put_request {
                    let raw = put.item;
                    let key = item_key_from_sdk(&raw)?;
                    let mut attrs = from_sdk_item(raw)?;
                    attrs.remove(HASH_KEY);
                    attrs.remove(RANGE_KEY);
                    unprocessed.push(WriteOp::Put { key, attrs });
                } else if let Some(delete) = request.delete_request {
                    unprocessed.push(WriteOp::Delete {
                        key: item_key_from_sdk(&delete.key)?,
                    });
                }
            }
        }
        Ok(unprocessed)
    }

    #[instrument(skip(self, keys, projection), fields(table = %self.table, count = keys.len()))]
    async fn batch_get(
        &self,
        keys: Vec<ItemKey>,
        projection: Option<&[&str]>,
    ) -> StoreResult<(Vec<Item>, Vec<ItemKey>)> {
        if keys.len() > MAX_BATCH_GET_ITEMS {
            return Err(StoreError::BatchTooLarge(keys.len()));
        }
        if keys.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut expr = ExprBuilder::default();
        let projection_expr = projection.map(|attrs| expr.projection(attrs));

        let mut builder = KeysAndAttributes::builder()
            .set_keys(Some(keys.iter().map(Self::key_map).collect()))
            .set_projection_expression(projection_expr);
        if let Some(names) = expr.names() {
            builder = builder.set_expression_attribute_names(Some(names));
        }
        let keys_and_attrs = builder.build().map_err(StoreError::service)?;

        let out = self
            .client
            .batch_get_item()
            .request_items(&self.table, keys_and_attrs)
            .send()
            .await
            .map_err(StoreError::service)?;

        let mut items = Vec::new();
        if let Some(mut responses) = out.responses {
            for raw in responses.remove(&self.table).unwrap_or_default() {
                items.push(from_sdk_item(raw)?);
            }
        }

        let mut unprocessed = Vec::new();
        if let Some(mut remaining) = out.unprocessed_keys {
            if let Some(keys_and_attrs) = remaining.remove(&self.table) {
                for raw in keys_and_attrs.keys {
                    unprocessed.push(item_key_from_sdk(&raw)?);
                }
            }
        }

        Ok((items, unprocessed))
    }

    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }
}
