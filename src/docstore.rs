use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::custom_error::MapErrToString;


/// Typed record identifier. Clients send ids both as bare keys and as
/// "table:key" strings; normalization happens once at the boundary and
/// everything past it works with a RecordId.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    table: String,
    key: String,
}

impl RecordId {
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        RecordId { table: table.into(), key: key.into() }
    }

    /// Accepts "key", "table:key", or "table:⟨key⟩" (the store wraps keys
    /// containing special characters in angle brackets).
    pub fn normalize(table: &str, raw: &str) -> Self {
        let raw = raw.trim();
        let key = match raw.split_once(':') {
            Some((t, k)) if t == table => k,
            _ => raw,
        };
        let key = key.trim_start_matches('⟨').trim_end_matches('⟩');
        RecordId::new(table, key)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// SurrealQL record literal, safe to embed in a statement.
    pub fn literal(&self) -> String {
        fn escape(s: &str) -> String {
            s.replace('\\', "\\\\").replace('\'', "\\'")
        }
        format!("type::thing('{}', '{}')", escape(&self.table), escape(&self.key))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.key)
    }
}


/// Generic query/create/update interface over the document database. The
/// database itself is an external collaborator reached over HTTP; this
/// trait is the whole surface the rest of the server sees, which also
/// makes the handlers testable against an in-memory fake.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<Value>, String>;
    async fn get(&self, id: &RecordId) -> Result<Option<Value>, String>;
    async fn create(&self, id: &RecordId, content: Value) -> Result<Value, String>;
    async fn update_merge(&self, id: &RecordId, patch: Value) -> Result<Value, String>;
    async fn delete(&self, id: &RecordId) -> Result<(), String>;
}


pub struct SurrealDocStore {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    database: String,
    user: String,
    password: String,
}

impl SurrealDocStore {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        namespace: String,
        database: String,
        user: String,
        password: String,
    ) -> Self {
        SurrealDocStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace,
            database,
            user,
            password,
        }
    }

    async fn sql(&self, sql: &str) -> Result<Vec<Value>, String> {
        let resp = self.client.post(format!("{}/sql", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
            .header("NS", &self.namespace)
            .header("DB", &self.database)
            .body(sql.to_string())
            .send().await
            .map_err_with_prefix("database request failed:")?;
        let status = resp.status();
        let body: Value = resp.json().await
            .map_err_with_prefix("database response is not json:")?;
        if !status.is_success() {
            return Err(format!("database returned {}: {}", status, body));
        }
        // one result object per statement, flatten the OK ones
        let statements = body.as_array().cloned().unwrap_or_default();
        let mut rows: Vec<Value> = Vec::new();
        for st in statements {
            match st.get("status").and_then(|s| s.as_str()) {
                Some("OK") => {
                    match st.get("result") {
                        Some(Value::Array(arr)) => rows.extend(arr.iter().cloned()),
                        Some(Value::Null) | None => {},
                        Some(other) => rows.push(other.clone()),
                    }
                },
                _ => {
                    return Err(format!("database statement failed: {}",
                        st.get("result").map(|r| r.to_string()).unwrap_or_else(|| st.to_string())));
                },
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl DocStore for SurrealDocStore {
    async fn query(&self, sql: &str) -> Result<Vec<Value>, String> {
        self.sql(sql).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Value>, String> {
        let rows = self.sql(&format!("SELECT * FROM {}", id.literal())).await?;
        Ok(rows.into_iter().next())
    }

    async fn create(&self, id: &RecordId, content: Value) -> Result<Value, String> {
        let rows = self.sql(&format!("CREATE {} CONTENT {}", id.literal(), content)).await?;
        rows.into_iter().next().ok_or_else(|| format!("create returned no record for {}", id))
    }

    async fn update_merge(&self, id: &RecordId, patch: Value) -> Result<Value, String> {
        let rows = self.sql(&format!("UPDATE {} MERGE {}", id.literal(), patch)).await?;
        rows.into_iter().next().ok_or_else(|| format!("update returned no record for {}", id))
    }

    async fn delete(&self, id: &RecordId) -> Result<(), String> {
        self.sql(&format!("DELETE {}", id.literal())).await?;
        Ok(())
    }
}
