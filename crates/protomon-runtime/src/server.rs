//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use protomon_core::types::RawError;
use protomon_registry::ProtocolStatusRegistry;

/// Longest request line accepted, newline included.
const MAX_REQUEST_BYTES: u64 = 64 * 1024;

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({"code": self.code, "message": self.message})
    }
}

#[derive(Debug, Deserialize)]
struct SourceParams {
    source_id: String,
}

#[derive(Debug, Deserialize)]
struct ReportErrorParams {
    source_id: String,
    #[serde(default)]
    category_hint: Option<String>,
    message: String,
}

/// Run the UDS JSON-RPC server.
pub async fn run_server(
    socket_path: &str,
    registry: Arc<ProtocolStatusRegistry>,
) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    registry: Arc<ProtocolStatusRegistry>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();

    let response = match read_request(reader, MAX_REQUEST_BYTES).await? {
        Some(line) => handle_line(&registry, line.trim()),
        None => {
            tracing::warn!("rejected request over {MAX_REQUEST_BYTES} bytes");
            error_response(
                RpcError::new(INVALID_REQUEST, "request too large"),
                serde_json::Value::Null,
            )
        }
    };
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

/// Read one newline-terminated request of at most `limit` bytes.
/// Returns `None` if the request is longer; the rest is never buffered.
pub(crate) async fn read_request<R: AsyncRead + Unpin>(
    reader: R,
    limit: u64,
) -> std::io::Result<Option<String>> {
    let mut reader = BufReader::new(reader.take(limit.saturating_add(1)));
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf).await?;
    if buf.len() as u64 > limit {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn error_response(error: RpcError, id: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": error.to_json(),
        "id": id,
    })
}

/// Turn one request line into one response object.
pub(crate) fn handle_line(registry: &ProtocolStatusRegistry, line: &str) -> serde_json::Value {
    let request: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            let error = RpcError::new(PARSE_ERROR, format!("parse error: {e}"));
            return error_response(error, serde_json::Value::Null);
        }
    };
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();

    match dispatch(registry, method, &request["params"]) {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(error) => {
            tracing::debug!("rpc {method} failed: {}", error.message);
            error_response(error, id)
        }
    }
}

/// Route a method call to the registry.
pub(crate) fn dispatch(
    registry: &ProtocolStatusRegistry,
    method: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, RpcError> {
    let ok = || serde_json::json!({"status": "ok"});

    let result = match method {
        "report_connected" => {
            let p: SourceParams = parse_params(params)?;
            registry.report_connected(&p.source_id);
            ok()
        }
        "report_heartbeat" => {
            let p: SourceParams = parse_params(params)?;
            registry.report_heartbeat(&p.source_id);
            ok()
        }
        "report_disconnected" => {
            let p: SourceParams = parse_params(params)?;
            registry.report_disconnected(&p.source_id);
            ok()
        }
        "report_error" => {
            let p: ReportErrorParams = parse_params(params)?;
            let raw = RawError {
                category_hint: p.category_hint,
                message: p.message,
            };
            let category = registry.report_error(&p.source_id, &raw);
            serde_json::json!({"status": "ok", "category": category})
        }
        "try_connect" => {
            let p: SourceParams = parse_params(params)?;
            to_value(registry.try_connect(&p.source_id))?
        }
        "snapshot" => {
            let p: SourceParams = parse_params(params)?;
            match registry.snapshot(&p.source_id) {
                Some(snapshot) => to_value(snapshot)?,
                None => serde_json::json!({"status": "not_found"}),
            }
        }
        "snapshot_all" => to_value(registry.snapshot_all())?,
        "summary" => to_value(registry.summary())?,
        "reset" => {
            let p: SourceParams = parse_params(params)?;
            registry.reset(&p.source_id);
            ok()
        }
        _ => return Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    };
    Ok(result)
}

fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, RpcError> {
    T::deserialize(params).map_err(|e| RpcError::new(INVALID_PARAMS, format!("invalid params: {e}")))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, format!("internal error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use protomon_core::config::EngineConfig;
    use serde_json::json;

    fn registry() -> ProtocolStatusRegistry {
        ProtocolStatusRegistry::new(EngineConfig::default())
    }

    #[test]
    fn snapshot_unknown_is_not_found() {
        let reg = registry();
        let result = dispatch(&reg, "snapshot", &json!({"source_id": "mqtt"})).expect("ok");
        assert_eq!(result, json!({"status": "not_found"}));
    }

    #[test]
    fn connect_then_snapshot() {
        let reg = registry();
        dispatch(&reg, "report_connected", &json!({"source_id": "opcua-1"})).expect("ok");
        let snap = dispatch(&reg, "snapshot", &json!({"source_id": "opcua-1"})).expect("ok");
        assert_eq!(snap["connected"], true);
        assert_eq!(snap["health_score"], 100);
        assert_eq!(snap["availability_level"], "full");
        assert_eq!(snap["recovering"], false);
        assert_eq!(snap["protocol"], "opcua");
    }

    #[test]
    fn report_error_returns_category() {
        let reg = registry();
        let result = dispatch(
            &reg,
            "report_error",
            &json!({"source_id": "modbus-1", "category_hint": "TIMEOUT", "message": "read timeout"}),
        )
        .expect("ok");
        assert_eq!(result["category"], "timeout");

        let result = dispatch(
            &reg,
            "report_error",
            &json!({"source_id": "modbus-1", "message": "bad certificate"}),
        )
        .expect("hint is optional");
        assert_eq!(result["category"], "auth");
    }

    #[test]
    fn missing_params_are_invalid() {
        let reg = registry();
        let err = dispatch(&reg, "report_connected", &json!({})).expect_err("no source_id");
        assert_eq!(err.code, INVALID_PARAMS);

        let err = dispatch(&reg, "report_error", &json!({"source_id": "mqtt"}))
            .expect_err("no message");
        assert_eq!(err.code, INVALID_PARAMS);

        let err = dispatch(&reg, "snapshot", &serde_json::Value::Null).expect_err("null params");
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn unknown_method() {
        let reg = registry();
        let err = dispatch(&reg, "list_panes", &json!({})).expect_err("unknown");
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[test]
    fn try_connect_reports_decision() {
        let reg = registry();
        for remaining in [2, 1, 0] {
            let result = dispatch(&reg, "try_connect", &json!({"source_id": "dnp3"})).expect("ok");
            assert_eq!(result, json!({"decision": "allowed", "remaining": remaining}));
        }
        let result = dispatch(&reg, "try_connect", &json!({"source_id": "dnp3"})).expect("ok");
        assert_eq!(result["decision"], "rate_limited");
        assert!(result["retry_after"].as_i64().expect("millis") > 0);
    }

    #[test]
    fn snapshot_all_and_summary() {
        let reg = registry();
        dispatch(&reg, "report_connected", &json!({"source_id": "mqtt"})).expect("ok");
        dispatch(
            &reg,
            "report_error",
            &json!({"source_id": "modbus-1", "message": "connection refused"}),
        )
        .expect("ok");

        let all = dispatch(&reg, "snapshot_all", &json!({})).expect("ok");
        let ids: Vec<_> = all
            .as_array()
            .expect("array")
            .iter()
            .map(|s| s["source_id"].as_str().expect("id"))
            .collect();
        assert_eq!(ids, ["modbus-1", "mqtt"]);

        let summary = dispatch(&reg, "summary", &serde_json::Value::Null).expect("ok");
        assert_eq!(summary["total"], 2);
        assert_eq!(summary["overall"], "unavailable");
    }

    #[test]
    fn reset_via_rpc() {
        let reg = registry();
        dispatch(
            &reg,
            "report_error",
            &json!({"source_id": "modbus-1", "message": "read timeout"}),
        )
        .expect("ok");
        dispatch(&reg, "reset", &json!({"source_id": "modbus-1"})).expect("ok");
        let snap = dispatch(&reg, "snapshot", &json!({"source_id": "modbus-1"})).expect("ok");
        assert_eq!(snap["consecutive_failures"], 0);
        assert_eq!(snap["recent_errors"], json!([]));
    }

    #[test]
    fn handle_line_wraps_result_and_error() {
        let reg = registry();
        let resp = handle_line(
            &reg,
            r#"{"jsonrpc":"2.0","method":"summary","params":{},"id":7}"#,
        );
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["result"]["total"], 0);

        let resp = handle_line(&reg, r#"{"jsonrpc":"2.0","method":"nope","id":8}"#);
        assert_eq!(resp["id"], 8);
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);

        let resp = handle_line(&reg, "not json");
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn read_request_stops_at_newline() {
        let input: &[u8] = b"{\"method\":\"summary\"}\nleftover";
        let line = read_request(input, MAX_REQUEST_BYTES)
            .await
            .expect("read")
            .expect("within limit");
        assert_eq!(line, "{\"method\":\"summary\"}\n");
    }

    #[tokio::test]
    async fn read_request_rejects_oversized_line() {
        let big = vec![b'x'; 100];
        let line = read_request(big.as_slice(), 64).await.expect("read");
        assert!(line.is_none());

        let exact: &[u8] = b"0123456789\n";
        let line = read_request(exact, 11).await.expect("read");
        assert_eq!(line.as_deref(), Some("0123456789\n"));
        assert!(read_request(exact, 10).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn serves_requests_over_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("run").join("protomond.sock");
        let socket = socket.to_str().expect("utf-8 path").to_string();

        let reg = Arc::new(registry());
        let server = {
            let socket = socket.clone();
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { run_server(&socket, reg).await })
        };

        // Wait for the listener to come up.
        for _ in 0..100 {
            if std::path::Path::new(&socket).exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        crate::client::rpc_call(&socket, "report_connected", json!({"source_id": "mqtt"}))
            .await
            .expect("report_connected");
        let snap = crate::client::rpc_call(&socket, "snapshot", json!({"source_id": "mqtt"}))
            .await
            .expect("snapshot");
        assert_eq!(snap["availability_level"], "full");

        let err = crate::client::rpc_call(&socket, "nope", json!({}))
            .await
            .expect_err("unknown method");
        assert!(err.to_string().contains("-32601"));

        server.abort();
    }
}
