//! IPC method dispatch.
//!
//! Methods are grouped by prefix (`services.*`, `blocklist.*`, `export.*`,
//! `dashboard.*`, `digest.*`, `patterns.*`, `graph.*`, `openloops.*`,
//! `chat.*`, `search.*`, `permissions.*`). Unknown methods produce a
//! failure response, never a dropped request.

use std::sync::Arc;

use chrono::Local;
use serde_json::{json, Value};
use trace_core::chat::open_loops::open_loops;
use trace_core::retrieval::graph::ExpandOptions;
use trace_domain::{Result, TraceError};

use crate::context::AppContext;
use crate::services::ServiceSet;

/// Dispatch one request to its handler. The error string goes into the
/// response verbatim; unrecognized methods produce exactly
/// `unknown method: <m>`.
pub async fn dispatch(
    context: &Arc<AppContext>,
    services: &ServiceSet,
    method: &str,
    params: &Value,
) -> std::result::Result<Value, String> {
    let result: Result<Value> = match method {
        "ping" => Ok(json!("pong")),
        "get_status" => status(context, services),
        "permissions.check" => Ok(json!(context.probes.permissions())),

        "services.status" => Ok(json!(context.registry.snapshot())),
        "services.restart" => restart_service(services, params).await,
        "services.backfill" => run_backfill(context).await,

        "blocklist.list" => blocklist_list(context, params),
        "blocklist.add_app" => blocklist_add_app(context, params),
        "blocklist.add_domain" => blocklist_add_domain(context, params),
        "blocklist.remove" => blocklist_remove(context, params),
        "blocklist.set_enabled" => blocklist_set_enabled(context, params),

        "export.summary" => context.exporter.summary().map(|stats| json!(stats)),
        "export.json" => export_json(context, params),
        "export.markdown" => export_markdown(context, params),
        "export.archive" => export_archive(context, params),

        "dashboard.summary" => dashboard(context, params).await,
        "digest.weekly" => digest(context, params).await,
        "patterns.all" => patterns(context, params).await,

        "graph.expand" => graph_expand(context, params).await,
        "graph.entity_context" => graph_entity_context(context, params).await,

        "openloops.list" => open_loops_list(context, params).await,

        "chat.query" => chat_query(context, params).await,
        // Spotlight-style lookup over the note corpus; OS index donation
        // itself is a platform concern outside this process.
        "search.query" | "spotlight.search" => search_query(context, params).await,

        // Built directly: the contract mandates this exact error text, with
        // no error-taxonomy prefix in front of it.
        other => return Err(format!("unknown method: {other}")),
    };

    result.map_err(|err| err.to_string())
}

fn status(context: &Arc<AppContext>, services: &ServiceSet) -> Result<Value> {
    let schema = context.db.verify_schema()?;
    Ok(json!({
        "services": context.registry.snapshot(),
        "capture": services.capture.stats(),
        "queue_pending": context.queue.pending(),
        "summarization_enabled": context.config.summarization_enabled(),
        "schema": schema,
    }))
}

async fn restart_service(services: &ServiceSet, params: &Value) -> Result<Value> {
    use trace_infra::scheduling::Supervised as _;

    let name = required_str(params, "name")?;
    match name {
        "capture" => services.capture.restart().await?,
        "hourly" => services.hourly.restart().await?,
        "daily" => services.daily.restart().await?,
        other => return Err(TraceError::NotFound(format!("unknown service: {other}"))),
    }
    Ok(json!({ "restarted": name }))
}

async fn run_backfill(context: &Arc<AppContext>) -> Result<Value> {
    let report = context
        .backfill
        .run(
            context.summarizer.as_ref(),
            context.notifier.as_ref(),
            Local::now().naive_local(),
        )
        .await?;
    Ok(json!(report))
}

fn blocklist_list(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let include_disabled = params
        .get("include_disabled")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    Ok(json!(context.blocklist.list(include_disabled)?))
}

fn blocklist_add_app(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let bundle_id = required_str(params, "bundle_id")?;
    let display_name = params.get("display_name").and_then(Value::as_str);
    Ok(json!(context.blocklist.add_app(bundle_id, display_name)?))
}

fn blocklist_add_domain(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let domain = required_str(params, "domain")?;
    let display_name = params.get("display_name").and_then(Value::as_str);
    Ok(json!(context.blocklist.add_domain(domain, display_name)?))
}

fn blocklist_remove(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let blocklist_id = required_str(params, "blocklist_id")?;
    Ok(json!({ "removed": context.blocklist.remove(blocklist_id)? }))
}

fn blocklist_set_enabled(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let blocklist_id = required_str(params, "blocklist_id")?;
    let enabled = params
        .get("enabled")
        .and_then(Value::as_bool)
        .ok_or_else(|| TraceError::Validation("missing param: enabled".into()))?;
    Ok(json!({ "updated": context.blocklist.set_enabled(blocklist_id, enabled)? }))
}

fn export_json(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let path = required_str(params, "path")?;
    Ok(json!(context.exporter.export_json(std::path::Path::new(path))?))
}

fn export_markdown(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let dir = required_str(params, "dir")?;
    Ok(json!(context.exporter.export_markdown(std::path::Path::new(dir))?))
}

fn export_archive(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let path = required_str(params, "path")?;
    Ok(json!(context.exporter.export_archive(std::path::Path::new(path))?))
}

async fn dashboard(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let days = params.get("days").and_then(Value::as_i64).unwrap_or(7);
    let data = context
        .dashboard
        .dashboard(Local::now().naive_local(), days.clamp(1, 90))
        .await?;
    Ok(json!(data))
}

async fn digest(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let offset = params.get("week_offset").and_then(Value::as_i64).unwrap_or(1);
    let digest = context
        .digest
        .digest(Local::now().naive_local(), offset.clamp(0, 52))
        .await?;
    Ok(json!(digest))
}

async fn patterns(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let days = params.get("days").and_then(Value::as_i64).unwrap_or(30);
    let patterns = context
        .patterns
        .all_patterns(Local::now().naive_local(), days.clamp(1, 365))
        .await?;
    Ok(json!(patterns))
}

async fn graph_expand(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let names: Vec<String> = params
        .get("entities")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if names.is_empty() {
        return Err(TraceError::Validation("missing param: entities".into()));
    }

    let options = ExpandOptions {
        hops: params.get("hops").and_then(Value::as_u64).unwrap_or(1).min(3) as u32,
        min_weight: params.get("min_weight").and_then(Value::as_f64).unwrap_or(0.3),
        ..ExpandOptions::default()
    };

    let expansion = context.graph.expand_from_names(&names, None, options).await?;
    Ok(json!({
        "source_entities": expansion.source_entities,
        "related": expansion
            .related
            .iter()
            .map(|r| json!({
                "entity_id": r.entity_id,
                "name": r.canonical_name,
                "type": r.entity_type.as_str(),
                "edge_type": r.edge_type.as_str(),
                "weight": r.weight,
                "direction": r.direction,
                "source": r.source_entity_name,
            }))
            .collect::<Vec<_>>(),
        "notes": expansion
            .notes
            .iter()
            .map(note_match_json)
            .collect::<Vec<_>>(),
        "hops": expansion.hops,
    }))
}

async fn graph_entity_context(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let name = required_str(params, "name")?;
    match context.graph.entity_context(name, None).await? {
        Some((entity, expansion)) => Ok(json!({
            "entity": {
                "entity_id": entity.entity_id,
                "type": entity.entity_type.as_str(),
                "canonical_name": entity.canonical_name,
                "aliases": entity.aliases,
            },
            "related": expansion
                .related
                .iter()
                .map(|r| json!({
                    "name": r.canonical_name,
                    "edge_type": r.edge_type.as_str(),
                    "weight": r.weight,
                }))
                .collect::<Vec<_>>(),
            "notes": expansion.notes.iter().map(note_match_json).collect::<Vec<_>>(),
        })),
        None => Err(TraceError::NotFound(format!("entity not found: {name}"))),
    }
}

async fn open_loops_list(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let days = params.get("days").and_then(Value::as_i64).unwrap_or(7);
    let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;
    let loops = open_loops(
        &context.notes,
        Local::now().naive_local(),
        days.clamp(1, 90),
        limit.min(100),
    )
    .await?;
    Ok(json!(loops))
}

async fn chat_query(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let query = required_str(params, "query")?;
    let response = context.chat.query(query, Local::now().naive_local()).await?;
    Ok(json!(response))
}

async fn search_query(context: &Arc<AppContext>, params: &Value) -> Result<Value> {
    let query = required_str(params, "query")?;
    let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
    let time_filter = trace_core::retrieval::time::parse_time_filter(
        query,
        Local::now().naive_local(),
    );

    let result = context
        .searcher
        .search(query, time_filter.as_ref(), limit.min(50), 0.0)
        .await?;

    Ok(json!({
        "query": result.query,
        "time_filter": result.time_filter,
        "matches": result.matches.iter().map(note_match_json).collect::<Vec<_>>(),
        "embedding_computed": result.embedding_computed,
    }))
}

fn note_match_json(note: &trace_core::retrieval::search::NoteMatch) -> Value {
    json!({
        "note_id": note.note_id,
        "note_type": note.note_type.as_str(),
        "start_ts": trace_domain::utils::time::format_ts(note.start_ts),
        "end_ts": trace_domain::utils::time::format_ts(note.end_ts),
        "file_path": note.file_path,
        "summary": note.summary,
        "categories": note.categories,
        "score": note.score,
    })
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TraceError::Validation(format!("missing param: {key}")))
}
