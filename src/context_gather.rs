use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::warn;

use crate::docstore::{DocStore, RecordId};
use crate::nicer_logs::clip_chars;


/// "notebook:<id>" or "source:<id>"
#[derive(Debug, Clone, PartialEq)]
pub enum ContextRef {
    Notebook(RecordId),
    Source(RecordId),
}

pub fn parse_context_ref(raw: &str) -> Result<ContextRef, String> {
    match raw.split_once(':') {
        Some(("notebook", _)) => Ok(ContextRef::Notebook(RecordId::normalize("notebook", raw))),
        Some(("source", _)) => Ok(ContextRef::Source(RecordId::normalize("source", raw))),
        _ => Err(format!("unknown context reference tag in {:?}", raw)),
    }
}

/// Per-item aggregation outcomes: partial results are preferred over total
/// failure, but skips stay visible instead of vanishing into logs only.
#[derive(Debug, Default)]
pub struct ContextReport {
    pub text: String,
    pub resolved: Vec<String>,
    pub skipped: Vec<(String, String)>,  // (reference, reason)
}

/// Resolves each unique reference exactly once, first occurrence wins.
/// Resolution failures never propagate to the caller.
pub async fn gather_context(store: &dyn DocStore, refs: &[String]) -> ContextReport {
    let mut report = ContextReport::default();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut pieces: Vec<String> = Vec::new();
    for raw in refs {
        if !seen.insert(raw.as_str()) {
            continue;
        }
        match resolve_one(store, raw).await {
            Ok(Some(text)) => {
                pieces.push(text);
                report.resolved.push(raw.clone());
            },
            Ok(None) => {
                warn!("context reference {} resolved to no content", raw);
                report.skipped.push((raw.clone(), "no content".to_string()));
            },
            Err(e) => {
                warn!("error fetching context for {}: {}", raw, e);
                report.skipped.push((raw.clone(), e));
            },
        }
    }
    report.text = pieces.join("\n\n");
    report
}

async fn resolve_one(store: &dyn DocStore, raw: &str) -> Result<Option<String>, String> {
    match parse_context_ref(raw)? {
        ContextRef::Notebook(notebook) => {
            let mut pieces: Vec<String> = Vec::new();
            let notes = store.query(&format!(
                "SELECT * FROM note WHERE notebook = {}", notebook.literal())).await?;
            let note_units: Vec<String> = notes.iter()
                .filter_map(|note| {
                    let content = text_of(note, &["content"]);
                    if content.is_empty() { return None; }
                    Some(format!("Note: {}\n{}", title_of(note), content))
                })
                .collect();
            if !note_units.is_empty() {
                pieces.push(format!("--- Notebook Content ({}) ---", raw));
                pieces.extend(note_units);
            }
            let sources = store.query(&format!(
                "SELECT * FROM source WHERE notebooks CONTAINS {}", notebook.literal())).await?;
            let source_units: Vec<String> = sources.iter()
                .filter_map(|source| {
                    let content = text_of(source, &["full_text", "content"]);
                    if content.is_empty() { return None; }
                    Some(format!("Source: {}\n{}", title_of(source), content))
                })
                .collect();
            if !source_units.is_empty() {
                pieces.push(format!("--- Sources in Notebook ({}) ---", raw));
                pieces.extend(source_units);
            }
            if pieces.is_empty() {
                Ok(None)
            } else {
                Ok(Some(pieces.join("\n\n")))
            }
        },
        ContextRef::Source(source_id) => {
            let rows = store.query(&format!(
                "SELECT * FROM source WHERE id = {}", source_id.literal())).await?;
            let source = match rows.first() {
                Some(x) => x,
                None => return Ok(None),
            };
            let content = text_of(source, &["full_text", "content"]);
            if content.is_empty() {
                return Ok(None);
            }
            Ok(Some(format!("--- Specific Source ({}) ---\nSource: {}\n{}", raw, title_of(source), content)))
        },
    }
}

fn title_of(row: &Value) -> String {
    row.get("title").and_then(|t| t.as_str()).unwrap_or("Untitled").to_string()
}

fn text_of(row: &Value, fields: &[&str]) -> String {
    for field in fields {
        if let Some(text) = row.get(*field).and_then(|t| t.as_str()) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    String::new()
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContextSize {
    Short,
    Long,
}

pub struct NotebookContext {
    pub data: Value,
    pub char_count: usize,
    pub token_count: usize,
}

/// Structured context for the /chat/context endpoint: per-item status strings
/// select insight-level or full content; with no config everything in the
/// notebook is included at short size. Item failures are skipped with a
/// warning, the call itself never fails.
pub async fn build_notebook_context(store: &dyn DocStore, notebook: &RecordId, config: &Value) -> NotebookContext {
    let mut sources_out: Vec<Value> = Vec::new();
    let mut notes_out: Vec<Value> = Vec::new();
    let mut total_content = String::new();

    let cfg_sources = config.get("sources").and_then(|s| s.as_object());
    let cfg_notes = config.get("notes").and_then(|n| n.as_object());

    if cfg_sources.is_some() || cfg_notes.is_some() {
        for (source_id, status) in cfg_sources.into_iter().flatten() {
            let status = status.as_str().unwrap_or("");
            if status.contains("not in") {
                continue;
            }
            let size = if status.contains("insights") {
                ContextSize::Short
            } else if status.contains("full content") {
                ContextSize::Long
            } else {
                continue;
            };
            let sid = RecordId::normalize("source", source_id);
            match store.get(&sid).await {
                Ok(Some(row)) => {
                    let ctx = source_context(&row, size);
                    total_content.push_str(&ctx.to_string());
                    sources_out.push(ctx);
                },
                Ok(None) => continue,
                Err(e) => {
                    warn!("error processing source {}: {}", source_id, e);
                    continue;
                },
            }
        }
        for (note_id, status) in cfg_notes.into_iter().flatten() {
            let status = status.as_str().unwrap_or("");
            if status.contains("not in") || !status.contains("full content") {
                continue;
            }
            let nid = RecordId::normalize("note", note_id);
            match store.get(&nid).await {
                Ok(Some(row)) => {
                    let ctx = note_context(&row);
                    total_content.push_str(&ctx.to_string());
                    notes_out.push(ctx);
                },
                Ok(None) => continue,
                Err(e) => {
                    warn!("error processing note {}: {}", note_id, e);
                    continue;
                },
            }
        }
    } else {
        // no config means everything in the notebook at short size
        match store.query(&format!("SELECT * FROM source WHERE notebooks CONTAINS {}", notebook.literal())).await {
            Ok(rows) => {
                for row in rows {
                    let ctx = source_context(&row, ContextSize::Short);
                    total_content.push_str(&ctx.to_string());
                    sources_out.push(ctx);
                }
            },
            Err(e) => warn!("error listing sources for {}: {}", notebook, e),
        }
        match store.query(&format!("SELECT * FROM note WHERE notebook = {}", notebook.literal())).await {
            Ok(rows) => {
                for row in rows {
                    let ctx = note_context(&row);
                    total_content.push_str(&ctx.to_string());
                    notes_out.push(ctx);
                }
            },
            Err(e) => warn!("error listing notes for {}: {}", notebook, e),
        }
    }

    let char_count = total_content.chars().count();
    NotebookContext {
        data: json!({"sources": sources_out, "notes": notes_out}),
        char_count,
        token_count: char_count / 4,  // rough estimate, no tokenizer at this layer
    }
}

fn source_context(row: &Value, size: ContextSize) -> Value {
    let id = row.get("id").and_then(|i| i.as_str()).unwrap_or("");
    let title = title_of(row);
    match size {
        ContextSize::Short => {
            let insights = match row.get("insights") {
                Some(x) if !x.is_null() => x.clone(),
                _ => Value::String(clip_chars(&text_of(row, &["full_text", "content"]), 500)),
            };
            json!({"id": id, "title": title, "insights": insights})
        },
        ContextSize::Long => {
            json!({"id": id, "title": title, "full_text": text_of(row, &["full_text", "content"])})
        },
    }
}

fn note_context(row: &Value) -> Value {
    let id = row.get("id").and_then(|i| i.as_str()).unwrap_or("");
    json!({"id": id, "title": title_of(row), "content": text_of(row, &["content"])})
}
