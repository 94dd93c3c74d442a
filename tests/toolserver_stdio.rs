//! Drives the real tool-server binary over stdin/stdout pipes and checks
//! the JSON-RPC contract: one line per response, ids echoed, the agreed
//! error codes, and a clean exit on stdin EOF.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

struct ToolServer {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

fn spawn_toolserver(data_dir: &std::path::Path) -> Result<ToolServer> {
    let bin = env!("CARGO_BIN_EXE_pdfqa-toolserver");
    let mut cmd = Command::new(bin);
    cmd.env("PDFQA_DATA_DIR", data_dir);
    cmd.env("EMBEDDING_MODEL_ID", "hash");
    cmd.env("RUST_LOG", "warn");
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::null());

    let mut child = cmd.spawn().context("spawn tool server")?;
    let stdin = child.stdin.take().context("stdin")?;
    let stdout = BufReader::new(child.stdout.take().context("stdout")?);
    Ok(ToolServer {
        child,
        stdin,
        stdout,
    })
}

async fn send_line(stdin: &mut ChildStdin, value: &Value) -> Result<()> {
    let mut frame = serde_json::to_vec(value)?;
    frame.push(b'\n');
    stdin.write_all(&frame).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_line_json(stdout: &mut BufReader<ChildStdout>) -> Result<Value> {
    loop {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(20), stdout.read_line(&mut line))
            .await
            .context("timeout reading json line")??;
        if n == 0 {
            anyhow::bail!("EOF while reading json line");
        }
        if line.trim().is_empty() {
            continue;
        }
        return Ok(serde_json::from_str(&line)?);
    }
}

#[tokio::test]
async fn tools_list_returns_catalogue() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut server = spawn_toolserver(tmp.path())?;

    let req = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} });
    send_line(&mut server.stdin, &req).await?;

    let msg = read_line_json(&mut server.stdout).await?;
    assert_eq!(msg["id"], json!(1));
    let tools = msg["result"]["tools"].as_array().context("tools array")?;
    let names: Vec<&str> = tools
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"answer_question_rag"));
    assert!(names.contains(&"extract_pdf_metadata"));

    drop(server.stdin);
    let status = tokio::time::timeout(Duration::from_secs(15), server.child.wait())
        .await
        .context("timeout waiting for exit")??;
    assert!(status.success(), "tool server exited with {status}");
    Ok(())
}

#[tokio::test]
async fn unknown_method_and_tool_yield_32601() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut server = spawn_toolserver(tmp.path())?;

    let req = json!({ "jsonrpc": "2.0", "id": 5, "method": "resources/list", "params": {} });
    send_line(&mut server.stdin, &req).await?;
    let msg = read_line_json(&mut server.stdout).await?;
    assert_eq!(msg["id"], json!(5));
    assert_eq!(msg["error"]["code"], json!(-32601));

    let req = json!({
        "jsonrpc": "2.0", "id": 6, "method": "tools/call",
        "params": { "name": "open_pod_bay_doors", "arguments": {} }
    });
    send_line(&mut server.stdin, &req).await?;
    let msg = read_line_json(&mut server.stdout).await?;
    assert_eq!(msg["id"], json!(6));
    assert_eq!(msg["error"]["code"], json!(-32601));

    drop(server.stdin);
    server.child.wait().await?;
    Ok(())
}

#[tokio::test]
async fn missing_argument_yields_32602_naming_the_field() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut server = spawn_toolserver(tmp.path())?;

    let req = json!({
        "jsonrpc": "2.0", "id": 9, "method": "tools/call",
        "params": { "name": "answer_question_rag", "arguments": { "question": "hi" } }
    });
    send_line(&mut server.stdin, &req).await?;
    let msg = read_line_json(&mut server.stdout).await?;
    assert_eq!(msg["id"], json!(9));
    assert_eq!(msg["error"]["code"], json!(-32602));
    let message = msg["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("pdf_path"), "message was: {message}");

    drop(server.stdin);
    server.child.wait().await?;
    Ok(())
}

#[tokio::test]
async fn missing_file_is_a_structured_tool_failure() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut server = spawn_toolserver(tmp.path())?;

    let req = json!({
        "jsonrpc": "2.0", "id": 11, "method": "tools/call",
        "params": {
            "name": "extract_pdf_text",
            "arguments": { "pdf_path": tmp.path().join("missing.pdf").to_string_lossy() }
        }
    });
    send_line(&mut server.stdin, &req).await?;
    let msg = read_line_json(&mut server.stdout).await?;
    assert_eq!(msg["id"], json!(11));
    assert_eq!(msg["error"]["code"], json!(-32000));
    assert_eq!(msg["error"]["data"]["kind"], json!("bad_input"));

    drop(server.stdin);
    server.child.wait().await?;
    Ok(())
}

#[tokio::test]
async fn delete_document_reports_nothing_removed_for_unknown_path() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut server = spawn_toolserver(tmp.path())?;

    let req = json!({
        "jsonrpc": "2.0", "id": 14, "method": "tools/call",
        "params": {
            "name": "delete_document",
            "arguments": { "pdf_path": tmp.path().join("never-uploaded.pdf").to_string_lossy() }
        }
    });
    send_line(&mut server.stdin, &req).await?;
    let msg = read_line_json(&mut server.stdout).await?;
    assert_eq!(msg["id"], json!(14));
    assert_eq!(msg["result"]["deleted"], json!(false));

    drop(server.stdin);
    server.child.wait().await?;
    Ok(())
}

#[tokio::test]
async fn responses_correlate_by_id_across_interleaved_requests() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut server = spawn_toolserver(tmp.path())?;

    for id in [21, 22, 23] {
        let req = json!({ "jsonrpc": "2.0", "id": id, "method": "tools/list", "params": {} });
        send_line(&mut server.stdin, &req).await?;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let msg = read_line_json(&mut server.stdout).await?;
        assert!(msg["result"].is_object());
        seen.push(msg["id"].as_u64().context("numeric id")?);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![21, 22, 23]);

    drop(server.stdin);
    server.child.wait().await?;
    Ok(())
}
