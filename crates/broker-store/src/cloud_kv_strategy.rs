use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::sigv4::{authorization_header, SigningCredentials};
use crate::strategy::StorageStrategy;

/// DynamoDB-shaped key-value storage strategy, one instance per entity type
/// mapped to one table. Uses the JSON 1.0 protocol directly over `reqwest`
/// rather than a generated SDK client, with a hand-rolled SigV4 signer.
pub struct CloudKvStorageStrategy {
    client: reqwest::Client,
    table: String,
    region: String,
    endpoint: String,
    credentials: SigningCredentials,
}

impl CloudKvStorageStrategy {
    pub fn new(table: impl Into<String>, region: impl Into<String>) -> Result<Self, StoreError> {
        let region = region.into();
        let credentials = SigningCredentials::from_env().ok_or_else(|| {
            StoreError::CloudKv("no AWS credentials found in environment".to_string())
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            table: table.into(),
            endpoint: format!("dynamodb.{region}.amazonaws.com"),
            region,
            credentials,
        })
    }

    async fn call(&self, target: &str, body: Value) -> Result<Value, StoreError> {
        let body_bytes = serde_json::to_vec(&body)?;
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let auth = authorization_header(
            &self.credentials,
            &self.region,
            "dynamodb",
            &self.endpoint,
            target,
            &amz_date,
            &body_bytes,
        );

        let mut req = self
            .client
            .post(format!("https://{}/", self.endpoint))
            .header("content-type", "application/x-amz-json-1.0")
            .header("x-amz-target", target)
            .header("x-amz-date", &amz_date)
            .header("authorization", auth)
            .body(body_bytes);
        if let Some(token) = &self.credentials.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::CloudKv(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::CloudKv(format!("{status}: {text}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| StoreError::CloudKv(e.to_string()))
    }

    fn item_from_blob(&self, id: &str, blob: &Value) -> Value {
        json!({
            "TableName": self.table,
            "Item": {
                "id": { "S": id },
                "blob": { "S": serde_json::to_string(blob).unwrap_or_default() },
            }
        })
    }

    /// Submits `requests` (each a `PutRequest`/`DeleteRequest` envelope) via
    /// `BatchWriteItem`, chunked to the API's 25-item limit and resubmitting
    /// whatever comes back in `UnprocessedItems` until the table drains or
    /// the retry budget runs out.
    async fn batch_write(&self, requests: Vec<Value>) -> Result<(), StoreError> {
        const BATCH_LIMIT: usize = 25;
        const MAX_UNPROCESSED_RETRIES: u32 = 5;

        for chunk in requests.chunks(BATCH_LIMIT) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0;
            while !pending.is_empty() {
                attempt += 1;
                if attempt > MAX_UNPROCESSED_RETRIES {
                    return Err(StoreError::CloudKv(format!(
                        "BatchWriteItem: {} item(s) still unprocessed after {MAX_UNPROCESSED_RETRIES} retries",
                        pending.len()
                    )));
                }
                let mut request_items = serde_json::Map::new();
                request_items.insert(self.table.clone(), Value::Array(pending));
                let resp = self
                    .call(
                        "DynamoDB_20120810.BatchWriteItem",
                        json!({ "RequestItems": Value::Object(request_items) }),
                    )
                    .await?;
                pending = resp
                    .get("UnprocessedItems")
                    .and_then(|v| v.get(self.table.as_str()))
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageStrategy for CloudKvStorageStrategy {
    async fn save(&self, id: &str, blob: Value) -> Result<(), StoreError> {
        self.call("DynamoDB_20120810.PutItem", self.item_from_blob(id, &blob))
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let resp = self
            .call(
                "DynamoDB_20120810.GetItem",
                json!({
                    "TableName": self.table,
                    "Key": { "id": { "S": id } },
                }),
            )
            .await?;
        let Some(item) = resp.get("Item") else {
            return Ok(None);
        };
        let blob_str = item
            .get("blob")
            .and_then(|v| v.get("S"))
            .and_then(|v| v.as_str())
            .unwrap_or("null");
        Ok(Some(serde_json::from_str(blob_str)?))
    }

    async fn find_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        let resp = self
            .call("DynamoDB_20120810.Scan", json!({ "TableName": self.table }))
            .await?;
        let mut out = HashMap::new();
        if let Some(items) = resp.get("Items").and_then(|v| v.as_array()) {
            for item in items {
                let id = item
                    .get("id")
                    .and_then(|v| v.get("S"))
                    .and_then(|v| v.as_str());
                let blob_str = item
                    .get("blob")
                    .and_then(|v| v.get("S"))
                    .and_then(|v| v.as_str());
                if let (Some(id), Some(blob_str)) = (id, blob_str) {
                    if let Ok(blob) = serde_json::from_str(blob_str) {
                        out.insert(id.to_string(), blob);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.call(
            "DynamoDB_20120810.DeleteItem",
            json!({
                "TableName": self.table,
                "Key": { "id": { "S": id } },
            }),
        )
        .await?;
        Ok(())
    }

    async fn save_batch(&self, items: Vec<(String, Value)>) -> Result<(), StoreError> {
        let requests: Vec<Value> = items
            .iter()
            .map(|(id, blob)| {
                json!({
                    "PutRequest": {
                        "Item": {
                            "id": { "S": id },
                            "blob": { "S": serde_json::to_string(blob).unwrap_or_default() },
                        }
                    }
                })
            })
            .collect();
        self.batch_write(requests).await
    }

    async fn delete_batch(&self, ids: Vec<String>) -> Result<(), StoreError> {
        let requests: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "DeleteRequest": {
                        "Key": { "id": { "S": id } }
                    }
                })
            })
            .collect();
        self.batch_write(requests).await
    }
}
