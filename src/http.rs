//! Thin HTTP/1.1 surface: request parsing, routing, JSON marshaling.
//!
//! No business logic lives here — every route delegates to the engine and
//! maps its error taxonomy onto status codes.

use crate::engine::OpenBoxEngine;
use crate::error::EngineError;
use crate::rpc::LedgerRpc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Header block cap. Real requests are a few hundred bytes.
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Body cap. Open requests carry two short strings.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// A connection that has not produced a full request within this window is
/// dropped (slowloris guard).
const READ_TIMEOUT_SECS: u64 = 10;

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

pub async fn serve(
    engine: Arc<OpenBoxEngine<LedgerRpc>>,
    listen_addr: &str,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("http listening on {}", listen_addr);
    serve_listener(engine, listener).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_listener(
    engine: Arc<OpenBoxEngine<LedgerRpc>>,
    listener: TcpListener,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, engine).await {
                debug!("client {}: {}", peer, e);
            }
        });
    }
}

async fn handle_client(
    mut stream: TcpStream,
    engine: Arc<OpenBoxEngine<LedgerRpc>>,
) -> std::io::Result<()> {
    let request = match tokio::time::timeout(
        Duration::from_secs(READ_TIMEOUT_SECS),
        read_request(&mut stream),
    )
    .await
    {
        Ok(Ok(Some(request))) => request,
        Ok(Ok(None)) => {
            return write_json(&mut stream, 400, &json!({"ok": false, "error": "bad request"}))
                .await;
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => return Ok(()), // slow client, drop silently
    };

    let (status, body) = route(&request, &engine).await;
    write_json(&mut stream, status, &body).await
}

async fn route(
    request: &Request,
    engine: &OpenBoxEngine<LedgerRpc>,
) -> (u16, serde_json::Value) {
    let (path, query) = match request.path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (request.path.as_str(), None),
    };

    match (request.method.as_str(), path) {
        ("GET", "/health") => match engine.health().await {
            Ok(report) => (200, with_ok(json!(report))),
            Err(e) => error_body(&e),
        },

        ("GET", "/eligibility") => {
            let Some(owner) = query_param(query, "owner") else {
                return (400, json!({"ok": false, "error": "missing owner parameter"}));
            };
            match engine.eligibility(&owner).await {
                Ok((snapshot, opens)) => (
                    200,
                    json!({
                        "ok": true,
                        "owner": owner,
                        "tier": snapshot.tier,
                        "holderCount": snapshot.holding_count,
                        "tokenBalance": snapshot.token_balances,
                        "opens": opens,
                    }),
                ),
                Err(e) => error_body(&e),
            }
        }

        ("POST", "/prepare-payment") => {
            let Some(owner) = body_field(&request.body, "owner") else {
                return (400, json!({"ok": false, "error": "missing owner"}));
            };
            match engine.prepare_payment(&owner).await {
                Ok(prepared) => (200, with_ok(json!(prepared))),
                // On this route quota exhaustion is a denial, not a
                // rate-limit signal: there is nothing to pay for.
                Err(e @ EngineError::QuotaExceeded { .. }) => {
                    let (_, body) = error_body(&e);
                    (403, body)
                }
                Err(e) => error_body(&e),
            }
        }

        ("POST", "/open") => {
            let (Some(owner), Some(proof)) = (
                body_field(&request.body, "owner"),
                body_field(&request.body, "proof"),
            ) else {
                return (400, json!({"ok": false, "error": "missing owner or proof"}));
            };
            match engine.open(&owner, &proof).await {
                Ok(receipt) => (200, with_ok(json!(receipt))),
                Err(e) => error_body(&e),
            }
        }

        _ => (404, json!({"ok": false, "error": "not found"})),
    }
}

fn with_ok(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(map) = value.as_object_mut() {
        map.insert("ok".into(), json!(true));
    }
    value
}

fn error_body(error: &EngineError) -> (u16, serde_json::Value) {
    let status = match error {
        EngineError::InvalidInput { .. } => 400,
        EngineError::AccessDenied => 403,
        EngineError::QuotaExceeded { .. } => 429,
        EngineError::ProofReplayed => 409,
        EngineError::PaymentVerificationFailed { .. } => 402,
        EngineError::SettlementFailed { .. } => 502,
        EngineError::UpstreamUnavailable { .. } => 503,
        EngineError::Store(_) | EngineError::Codec(_) | EngineError::Config(_) => 500,
    };
    let mut body = json!({
        "ok": false,
        "code": error.code(),
        "error": error.to_string(),
    });
    if let EngineError::QuotaExceeded { cooldown_remaining } = error {
        body["cooldownRemaining"] = json!(cooldown_remaining);
    }
    (status, body)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn body_field(body: &[u8], field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get(field)?.as_str().map(str::to_string)
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut buf = Vec::with_capacity(1024);
    let mut scan_from = 0usize;
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        // Resume the terminator scan where the last read stopped; the
        // terminator may straddle a chunk boundary by up to three bytes.
        if let Some(pos) = buf[scan_from..].windows(4).position(|w| w == b"\r\n\r\n") {
            break scan_from + pos;
        }
        scan_from = buf.len().saturating_sub(3);
        if buf.len() > MAX_HEADER_BYTES {
            return Ok(None);
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    let method = method.to_string();
    let path = path.to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Ok(None);
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request { method, path, body }))
}

async fn write_json(
    stream: &mut TcpStream,
    status: u16,
    body: &serde_json::Value,
) -> std::io::Result<()> {
    let payload = body.to_string();
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        429 => "Too Many Requests",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}
