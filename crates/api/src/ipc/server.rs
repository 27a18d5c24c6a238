//! The IPC server loop.
//!
//! One JSON document per line on the reader; one response per request on
//! the writer. The ready handshake goes out before the first read. Handlers
//! run on the loop task but never block the reader indefinitely: all heavy
//! work happens in already-running workers, and requests are answered
//! strictly in order.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use trace_domain::Result;

use crate::context::AppContext;
use crate::handlers::dispatch;
use crate::services::ServiceSet;

use super::protocol::{IpcRequest, IpcResponse, ReadyHandshake};

/// Run the server until the reader reaches EOF.
pub async fn run_server<R, W>(
    context: Arc<AppContext>,
    services: &ServiceSet,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let handshake = ReadyHandshake::new(
        context.registry.snapshot().into_iter().map(|s| s.name).collect(),
    );
    write_line(&mut writer, &serde_json::to_string(&handshake).unwrap_or_default()).await?;

    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                debug!(method = %request.method, "ipc request");
                match dispatch(&context, services, &request.method, &request.params).await {
                    Ok(result) => IpcResponse::ok(request.id, result),
                    Err(err) => IpcResponse::err(request.id, err),
                }
            }
            Err(err) => {
                warn!(error = %err, "unparseable ipc request");
                IpcResponse::err(Value::Null, format!("invalid request: {err}"))
            }
        };

        let serialized = serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"id":null,"success":false,"error":"serialize"}"#.to_string());
        write_line(&mut writer, &serialized).await?;
    }

    debug!("ipc reader reached EOF");
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    let fail = |e: std::io::Error| trace_domain::TraceError::Fatal(format!("ipc write: {e}"));
    writer.write_all(line.as_bytes()).await.map_err(fail)?;
    writer.write_all(b"\n").await.map_err(fail)?;
    writer.flush().await.map_err(fail)
}
