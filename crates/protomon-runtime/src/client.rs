//! UDS JSON-RPC client for CLI subcommands.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `protomon status [SOURCE]`: pretty JSON of one snapshot or all of them.
///
/// An unknown source prints `{"status":"not_found"}` and exits non-zero.
pub async fn cmd_status(socket_path: &str, source_id: Option<&str>) -> anyhow::Result<()> {
    let result = match source_id {
        Some(id) => rpc_call(socket_path, "snapshot", serde_json::json!({"source_id": id})).await?,
        None => rpc_call(socket_path, "snapshot_all", serde_json::json!({})).await?,
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    if is_not_found(&result) {
        anyhow::bail!("unknown source {}", source_id.unwrap_or_default());
    }
    Ok(())
}

/// `protomon summary`: one line per level plus the overall level.
pub async fn cmd_summary(socket_path: &str) -> anyhow::Result<()> {
    let summary = rpc_call(socket_path, "summary", serde_json::json!({})).await?;
    println!("{}", format_summary(&summary));
    Ok(())
}

/// `protomon reset SOURCE`.
pub async fn cmd_reset(socket_path: &str, source_id: &str) -> anyhow::Result<()> {
    rpc_call(socket_path, "reset", serde_json::json!({"source_id": source_id})).await?;
    println!("reset {source_id}");
    Ok(())
}

pub(crate) fn is_not_found(result: &serde_json::Value) -> bool {
    result["status"].as_str() == Some("not_found")
}

/// Pure formatting logic for summary output, separated for testability.
pub(crate) fn format_summary(summary: &serde_json::Value) -> String {
    let count = |key: &str| summary[key].as_u64().unwrap_or(0);
    let overall = summary["overall"].as_str().unwrap_or("unknown");

    let mut line = format!(
        "{overall}: {} sources ({} full, {} degraded, {} unavailable)",
        count("total"),
        count("full"),
        count("degraded"),
        count("unavailable"),
    );
    let recovering = count("recovering");
    if recovering > 0 {
        line.push_str(&format!(", {recovering} recovering"));
    }
    line
}
