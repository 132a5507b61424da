//! HTTP gateway for the Worthy tRPC API.
//!
//! Every call is `POST <base>/api/trpc/<procedure>` with the input wrapped as
//! `{"json": <input>}`. Responses may come bare or inside the tRPC envelope
//! `{"result": {"data": {"json": …}}}`.

use super::{GatewayError, RemoteGateway, RemoteResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use worthy_engine::{Action, EntityType, Record, SyncOperation};

/// Page size used when listing a collection.
pub const PAGE_SIZE: u32 = 100;

/// Upper bound on pages fetched for one collection.
const MAX_PAGES: u32 = 1_000;

/// Longest error body kept in a rejection message.
const MAX_MESSAGE_LEN: usize = 512;

/// tRPC procedure for an operation.
pub fn procedure_for(entity: EntityType, action: Action) -> &'static str {
    match (entity, action) {
        (EntityType::Transaction, Action::Create) => "transactions.create",
        (EntityType::Transaction, Action::Update) => "transactions.update",
        (EntityType::Transaction, Action::Delete) => "transactions.delete",
        (EntityType::Template, Action::Create) => "templates.create",
        (EntityType::Template, Action::Update) => "templates.update",
        (EntityType::Template, Action::Delete) => "templates.delete",
        (EntityType::ShoppingSession, Action::Create) => "shoppingSessions.createSession",
        (EntityType::ShoppingSession, Action::Update) => "shoppingSessions.updateSession",
        (EntityType::ShoppingSession, Action::Delete) => "shoppingSessions.deleteSession",
    }
}

fn list_procedure(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Transaction => "transactions.getList",
        EntityType::Template => "templates.getList",
        EntityType::ShoppingSession => "shoppingSessions.getSessionsList",
    }
}

/// Gateway speaking HTTP to the remote API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    /// Create a gateway for the API at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, GatewayError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Create a gateway from the daemon configuration.
    pub fn from_config(config: &crate::config::Config) -> Result<Self, GatewayError> {
        Self::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    fn url(&self, procedure: &str) -> String {
        format!("{}/api/trpc/{}", self.base_url, procedure)
    }

    /// Call a procedure and return its unwrapped result.
    async fn call(
        &self,
        procedure: &str,
        input: Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let mut request = self
            .client
            .post(self.url(procedure))
            .json(&json!({ "json": input }));
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(rejection(status, &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{procedure}: {e}")))?;
        Ok(unwrap_envelope(value))
    }

    async fn fetch_page(&self, entity: EntityType, page: u32) -> Result<Vec<Value>, GatewayError> {
        let input = match entity {
            EntityType::Template => Value::Null,
            _ => json!({ "page": page, "perPage": PAGE_SIZE }),
        };
        match self.call(list_procedure(entity), input, None).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(GatewayError::InvalidResponse(format!(
                "{}: expected a list, got {}",
                list_procedure(entity),
                short(&other.to_string())
            ))),
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn execute(
        &self,
        key: &str,
        operation: &SyncOperation,
    ) -> Result<RemoteResult, GatewayError> {
        let procedure = procedure_for(operation.entity_type, operation.action);

        match operation.action {
            Action::Create => {
                let mut input = operation.payload.clone();
                if let Some(obj) = input.as_object_mut() {
                    obj.remove("id");
                }
                let response = self.call(procedure, input, Some(key)).await?;
                let server_id = parse_created_id(&response).ok_or_else(|| {
                    GatewayError::InvalidResponse(format!(
                        "{procedure}: no id in {}",
                        short(&response.to_string())
                    ))
                })?;
                Ok(RemoteResult {
                    server_id: Some(server_id),
                })
            }
            Action::Update => {
                let id = remote_id(operation, procedure)?;
                let mut input = operation.payload.clone();
                if let Some(obj) = input.as_object_mut() {
                    obj.insert("id".into(), json!(id));
                }
                self.call(procedure, input, Some(key)).await?;
                Ok(RemoteResult::default())
            }
            Action::Delete => {
                let id = remote_id(operation, procedure)?;
                self.call(procedure, json!(id), Some(key)).await?;
                Ok(RemoteResult::default())
            }
        }
    }

    async fn fetch_all(&self, entity: EntityType) -> Result<Vec<Record>, GatewayError> {
        let mut raw = Vec::new();
        for page in 1..=MAX_PAGES {
            let items = self.fetch_page(entity, page).await?;
            let last = entity == EntityType::Template || items.len() < PAGE_SIZE as usize;
            raw.extend(items);
            if last {
                break;
            }
        }

        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            match Record::from_value(value) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(entity = %entity, error = %e, "Skipping unreadable remote record"),
            }
        }
        tracing::debug!(entity = %entity, count = records.len(), "Fetched remote collection");
        Ok(records)
    }

    async fn ping(&self) -> bool {
        // Any answer at all means the server is reachable.
        self.client.get(&self.base_url).send().await.is_ok()
    }
}

/// Server id targeted by an update or delete.
fn remote_id(operation: &SyncOperation, procedure: &str) -> Result<i64, GatewayError> {
    operation.entity_id.as_remote().ok_or_else(|| {
        GatewayError::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
            message: format!(
                "{procedure}: '{}' has no server id yet",
                operation.entity_id
            ),
        }
    })
}

fn rejection(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/json/message")
                .or_else(|| v.pointer("/error/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| short(body));
    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}

/// Strip the tRPC envelope if present.
fn unwrap_envelope(value: Value) -> Value {
    if let Some(inner) = value.pointer("/result/data/json") {
        return inner.clone();
    }
    if let Some(inner) = value.pointer("/result/data") {
        return inner.clone();
    }
    value
}

/// The new server id: `{ "id": n }` or a bare number.
fn parse_created_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        Value::Object(obj) => obj.get("id").and_then(parse_created_id),
        _ => None,
    }
}

fn short(text: &str) -> String {
    if text.len() <= MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut end = MAX_MESSAGE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
