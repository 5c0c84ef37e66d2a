use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent_runtime::{AgentRuntime, ThreadState, TokenStream, TurnRequest};
use crate::docstore::{DocStore, RecordId};


/// In-memory stand-in for the document database. Understands exactly the
/// query shapes the server issues, nothing more.
pub struct MockDocStore {
    records: Mutex<HashMap<String, Value>>,
    relations: Mutex<Vec<(String, String)>>,  // refers_to edges: (in, out)
    queries: Mutex<Vec<String>>,
    status_writes: Mutex<Vec<(String, String)>>,
    fail_pattern: Mutex<Option<String>>,
}

impl MockDocStore {
    pub fn new() -> Self {
        MockDocStore {
            records: Mutex::new(HashMap::new()),
            relations: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            status_writes: Mutex::new(Vec::new()),
            fail_pattern: Mutex::new(None),
        }
    }

    pub fn put(&self, id: &str, value: Value) {
        self.records.lock().unwrap().insert(id.to_string(), value);
    }

    pub fn peek(&self, id: &str) -> Option<Value> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn relate(&self, r_in: &str, r_out: &str) {
        self.relations.lock().unwrap().push((r_in.to_string(), r_out.to_string()));
    }

    pub fn relations(&self) -> Vec<(String, String)> {
        self.relations.lock().unwrap().clone()
    }

    pub fn query_log(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn status_history(&self, id: &str) -> Vec<String> {
        self.status_writes.lock().unwrap().iter()
            .filter(|(record_id, _)| record_id == id)
            .map(|(_, status)| status.clone())
            .collect()
    }

    pub fn fail_queries_containing(&self, pattern: &str) {
        *self.fail_pattern.lock().unwrap() = Some(pattern.to_string());
    }

    /// "type::thing('table', 'key')" occurrences as "table:key" strings.
    fn things_in(sql: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = sql;
        while let Some(pos) = rest.find("type::thing('") {
            rest = &rest[pos + "type::thing('".len()..];
            let table_end = match rest.find('\'') { Some(x) => x, None => break };
            let table = &rest[..table_end];
            rest = &rest[table_end..];
            let key_start = match rest.find(", '") { Some(x) => x + 3, None => break };
            rest = &rest[key_start..];
            let key_end = match rest.find("')") { Some(x) => x, None => break };
            out.push(format!("{}:{}", table, &rest[..key_end]));
            rest = &rest[key_end..];
        }
        out
    }
}

#[async_trait]
impl DocStore for MockDocStore {
    async fn query(&self, sql: &str) -> Result<Vec<Value>, String> {
        self.queries.lock().unwrap().push(sql.to_string());
        if let Some(pattern) = self.fail_pattern.lock().unwrap().as_ref() {
            if sql.contains(pattern.as_str()) {
                return Err(format!("mock failure for query: {}", sql));
            }
        }
        let things = Self::things_in(sql);
        let records = self.records.lock().unwrap();
        if sql.starts_with("RELATE ") {
            let (r_in, r_out) = (things.get(0).cloned(), things.get(1).cloned());
            if let (Some(r_in), Some(r_out)) = (r_in, r_out) {
                self.relations.lock().unwrap().push((r_in, r_out));
            }
            return Ok(vec![]);
        }
        if sql.contains("SELECT VALUE in.* FROM refers_to WHERE out = ") {
            let notebook = things.first().cloned().unwrap_or_default();
            let rows = self.relations.lock().unwrap().iter()
                .filter(|(_, out)| out == &notebook)
                .filter_map(|(r_in, _)| records.get(r_in).cloned())
                .collect();
            return Ok(rows);
        }
        if sql.contains("SELECT VALUE out FROM refers_to WHERE in = ") {
            let session = things.first().cloned().unwrap_or_default();
            let rows = self.relations.lock().unwrap().iter()
                .filter(|(r_in, _)| r_in == &session)
                .map(|(_, out)| Value::String(out.clone()))
                .collect();
            return Ok(rows);
        }
        if sql.contains("FROM note WHERE notebook = ") {
            let notebook = things.first().cloned().unwrap_or_default();
            let rows = records.values()
                .filter(|r| r.get("notebook").and_then(|n| n.as_str()) == Some(notebook.as_str()))
                .cloned()
                .collect();
            return Ok(rows);
        }
        if sql.contains("FROM source WHERE notebooks CONTAINS ") {
            let notebook = things.first().cloned().unwrap_or_default();
            let rows = records.values()
                .filter(|r| {
                    r.get("notebooks").and_then(|n| n.as_array())
                        .map(|arr| arr.iter().any(|x| x.as_str() == Some(notebook.as_str())))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            return Ok(rows);
        }
        if sql.contains("FROM source WHERE id = ") {
            let source = things.first().cloned().unwrap_or_default();
            return Ok(records.get(&source).cloned().into_iter().collect());
        }
        if sql.contains("FROM video_job ORDER BY created_at DESC") {
            let mut rows: Vec<Value> = records.iter()
                .filter(|(id, _)| id.starts_with("video_job:"))
                .map(|(_, v)| v.clone())
                .collect();
            rows.sort_by(|a, b| {
                let ka = a.get("created_at").and_then(|x| x.as_str()).unwrap_or("");
                let kb = b.get("created_at").and_then(|x| x.as_str()).unwrap_or("");
                kb.cmp(ka)
            });
            return Ok(rows);
        }
        Err(format!("mock store does not understand query: {}", sql))
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Value>, String> {
        Ok(self.records.lock().unwrap().get(&id.to_string()).cloned())
    }

    async fn create(&self, id: &RecordId, mut content: Value) -> Result<Value, String> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&id.to_string()) {
            return Err(format!("record {} already exists", id));
        }
        if let Some(obj) = content.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.to_string()));
        }
        records.insert(id.to_string(), content.clone());
        Ok(content)
    }

    async fn update_merge(&self, id: &RecordId, patch: Value) -> Result<Value, String> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id.to_string())
            .ok_or_else(|| format!("record {} not found", id))?;
        if let (Some(target), Some(fields)) = (record.as_object_mut(), patch.as_object()) {
            for (k, v) in fields {
                if k == "status" {
                    if let Some(s) = v.as_str() {
                        self.status_writes.lock().unwrap().push((id.to_string(), s.to_string()));
                    }
                }
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, id: &RecordId) -> Result<(), String> {
        self.records.lock().unwrap().remove(&id.to_string());
        Ok(())
    }
}


/// Scripted agent runtime: fixed thread states and a fixed chunk sequence
/// for the next turn.
pub struct MockAgentRuntime {
    states: Mutex<HashMap<String, ThreadState>>,
    chunks: Mutex<Vec<Result<String, String>>>,
    turns: Mutex<Vec<TurnRequest>>,
    fail_stream_start: Mutex<Option<String>>,
}

impl MockAgentRuntime {
    pub fn new() -> Self {
        MockAgentRuntime {
            states: Mutex::new(HashMap::new()),
            chunks: Mutex::new(Vec::new()),
            turns: Mutex::new(Vec::new()),
            fail_stream_start: Mutex::new(None),
        }
    }

    pub fn set_state(&self, thread_id: &str, state: ThreadState) {
        self.states.lock().unwrap().insert(thread_id.to_string(), state);
    }

    pub fn set_chunks(&self, chunks: Vec<Result<String, String>>) {
        *self.chunks.lock().unwrap() = chunks;
    }

    pub fn fail_stream_start(&self, message: &str) {
        *self.fail_stream_start.lock().unwrap() = Some(message.to_string());
    }

    pub fn turns(&self) -> Vec<TurnRequest> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn thread_state(&self, thread_id: &str) -> Result<Option<ThreadState>, String> {
        Ok(self.states.lock().unwrap().get(thread_id).cloned())
    }

    async fn stream_turn(&self, turn: TurnRequest) -> Result<TokenStream, String> {
        self.turns.lock().unwrap().push(turn);
        if let Some(message) = self.fail_stream_start.lock().unwrap().clone() {
            return Err(message);
        }
        let chunks = self.chunks.lock().unwrap().clone();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
