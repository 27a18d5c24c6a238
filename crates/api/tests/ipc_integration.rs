//! End-to-end boot test: real database, real services, dispatch through the
//! same handler table the IPC loop uses.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use trace_app::context::AppContext;
use trace_app::handlers::dispatch;
use trace_app::services::ServiceSet;

async fn start_stack(dir: &TempDir) -> (Arc<AppContext>, ServiceSet) {
    let config = trace_domain::config::TraceConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let context = Arc::new(AppContext::initialize(config).expect("context"));
    let services = ServiceSet::start(Arc::clone(&context)).await.expect("services");
    (context, services)
}

async fn dispatch_method(
    context: &Arc<AppContext>,
    services: &ServiceSet,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, String> {
    dispatch(context, services, method, &params).await
}

#[tokio::test(flavor = "multi_thread")]
async fn boots_and_answers_core_methods() {
    let dir = TempDir::new().unwrap();
    let (context, services) = start_stack(&dir).await;

    // ping
    let pong = dispatch_method(&context, &services, "ping", json!({})).await.unwrap();
    assert_eq!(pong, json!("pong"));

    // status carries a valid schema report and all three services.
    let status = dispatch_method(&context, &services, "get_status", json!({})).await.unwrap();
    assert_eq!(status["schema"]["valid"], true);
    let names: Vec<&str> = status["services"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert!(names.contains(&"capture"));
    assert!(names.contains(&"hourly"));
    assert!(names.contains(&"daily"));

    // Default blocklist was seeded.
    let blocklist = dispatch_method(&context, &services, "blocklist.list", json!({}))
        .await
        .unwrap();
    assert!(!blocklist.as_array().unwrap().is_empty());

    // Unknown methods fail loudly with the exact contract string.
    let err = dispatch_method(&context, &services, "nope.nothing", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err, "unknown method: nope.nothing");

    let err = dispatch_method(&context, &services, "chat.nope", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err, "unknown method: chat.nope");

    services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn blocklist_round_trip_via_handlers() {
    let dir = TempDir::new().unwrap();
    let (context, services) = start_stack(&dir).await;

    let added = dispatch_method(
        &context,
        &services,
        "blocklist.add_domain",
        json!({"domain": "https://secret.example.com/login"}),
    )
    .await
    .unwrap();
    assert_eq!(added["pattern"], "secret.example.com");
    let id = added["blocklist_id"].as_str().unwrap().to_string();

    // Repeated add is a no-op upsert.
    let again = dispatch_method(
        &context,
        &services,
        "blocklist.add_domain",
        json!({"domain": "secret.example.com"}),
    )
    .await
    .unwrap();
    assert_eq!(again["blocklist_id"], id.as_str());

    let disabled = dispatch_method(
        &context,
        &services,
        "blocklist.set_enabled",
        json!({"blocklist_id": id, "enabled": false}),
    )
    .await
    .unwrap();
    assert_eq!(disabled["updated"], true);

    services.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn export_summary_and_chat_no_data() {
    let dir = TempDir::new().unwrap();
    let (context, services) = start_stack(&dir).await;

    let summary = dispatch_method(&context, &services, "export.summary", json!({}))
        .await
        .unwrap();
    assert_eq!(summary["notes"], 0);

    // Without an API key the chat engine falls back to the deterministic
    // no-data answer.
    let chat = dispatch_method(
        &context,
        &services,
        "chat.query",
        json!({"query": "what did I do yesterday"}),
    )
    .await
    .unwrap();
    assert_eq!(chat["answer"]["confidence"], 0.0);
    assert!(chat["answer"]["answer"].as_str().unwrap().contains("don't have any"));

    services.shutdown().await;
}
