//! End-to-end tests for the HTTP surface over loopback

use openbox::config::{Config, TokenThreshold};
use openbox::engine::OpenBoxEngine;
use openbox::http;
use openbox::rpc::LedgerRpc;
use openbox::store::Storage;
use openbox::types::{PrizeOutcome, WeightedOutcome};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TREASURY: &str = "TREASURY11111111111111111111111111111111111";
/// Holder: 5 qualifying items, open limit 1.
const HOLDER: &str = "holderowner1";
/// SuperHolder: 10 qualifying items, open limit 2.
const SUPER: &str = "superowner1";
/// No holdings, no tokens: tier None.
const NOBODY: &str = "noneowner1";
const FEE: u64 = 100;

// ====== MOCK COLLABORATOR ======

/// Minimal JSON-RPC collaborator. Holdings are keyed off the owner name
/// prefix; any proof starting with "paid" resolves to a sufficient fee
/// transfer from either test payer.
async fn spawn_collaborator() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let _ = answer_rpc(&mut stream).await;
            });
        }
    });
    addr
}

async fn answer_rpc(stream: &mut TcpStream) -> Option<()> {
    let body = read_http_body(stream).await?;
    let request: Value = serde_json::from_slice(&body).ok()?;
    let params = &request["params"];

    let result = match request["method"].as_str().unwrap_or_default() {
        "countQualifyingItems" => {
            let owner = params["owner"].as_str().unwrap_or_default();
            if owner.starts_with("super") {
                json!(10)
            } else if owner.starts_with("holder") {
                json!(5)
            } else {
                json!(0)
            }
        }
        "tokenBalance" => json!(0),
        "accountBalance" => json!(777_000u64),
        "getTransfer" => {
            let proof = params["proof"].as_str().unwrap_or_default();
            if proof.starts_with("paid") {
                json!({
                    "balanceDeltas": [
                        { "account": HOLDER, "delta": -(FEE as i64) },
                        { "account": SUPER, "delta": -(FEE as i64) },
                        { "account": TREASURY, "delta": FEE },
                    ]
                })
            } else {
                Value::Null
            }
        }
        "getLedgerMeta" => json!({}),
        "submitTransfer" => json!("settleref1"),
        "pickAvailableAsset" => Value::Null,
        _ => Value::Null,
    };

    let payload = json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }).to_string();
    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    stream.write_all(reply.as_bytes()).await.ok()?;
    stream.flush().await.ok()
}

async fn read_http_body(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(body)
}

// ====== SERVICE AND CLIENT HELPERS ======

/// Spin up collaborator mock, engine, and HTTP listener; return the
/// service address.
async fn spawn_service() -> String {
    let rpc_endpoint = spawn_collaborator().await;
    let config = Config {
        network: "testnet".into(),
        listen_addr: "127.0.0.1:0".into(),
        data_dir: "./unused".into(),
        treasury: TREASURY.into(),
        fee_amount: FEE,
        fee_label: "lam".into(),
        collection_id: "boxes".into(),
        token_thresholds: vec![TokenThreshold { token_id: "boxtoken".into(), minimum: 1_000 }],
        cooldown_secs: 86_400,
        proof_ttl_secs: 604_800,
        rpc_endpoint,
        rpc_timeout_ms: 2_000,
        prizes: vec![WeightedOutcome {
            weight: 1.0,
            outcome: PrizeOutcome::Currency { amount: 1_000, label: "lam".into() },
        }],
    };
    let store = Storage::temporary(config.cooldown_secs, config.proof_ttl_secs).unwrap();
    let client = LedgerRpc::new(config.rpc_endpoint.clone(), config.rpc_timeout_ms);
    let engine = Arc::new(OpenBoxEngine::new(Arc::new(config), store, client).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(http::serve_listener(engine, listener));
    addr
}

async fn send_raw(addr: &str, request: &[u8]) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let status: u16 = text.split_whitespace().nth(1).unwrap().parse().unwrap();
    let body = text.split("\r\n\r\n").nth(1).unwrap_or_default();
    (status, serde_json::from_str(body).unwrap())
}

async fn get(addr: &str, path: &str) -> (u16, Value) {
    let request = format!("GET {path} HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n");
    send_raw(addr, request.as_bytes()).await
}

async fn post(addr: &str, path: &str, body: &Value) -> (u16, Value) {
    let payload = body.to_string();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: t\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    send_raw(addr, request.as_bytes()).await
}

// ====== TESTS ======

#[tokio::test]
async fn test_health_route() {
    let addr = spawn_service().await;
    let (status, body) = get(&addr, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["network"], "testnet");
    assert_eq!(body["treasury"], TREASURY);
    assert_eq!(body["treasuryBalance"], 777_000);
}

#[tokio::test]
async fn test_eligibility_route() {
    let addr = spawn_service().await;

    let (status, body) = get(&addr, &format!("/eligibility?owner={HOLDER}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["tier"], "holder");
    assert_eq!(body["holderCount"], 5);
    assert_eq!(body["opens"]["limit"], 1);
    assert_eq!(body["opens"]["remaining"], 1);

    let (status, body) = get(&addr, &format!("/eligibility?owner={SUPER}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["tier"], "superholder");
    assert_eq!(body["opens"]["limit"], 2);

    // Missing query parameter.
    let (status, body) = get(&addr, "/eligibility").await;
    assert_eq!(status, 400);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_open_route_and_replay_conflict() {
    let addr = spawn_service().await;

    let (status, body) =
        post(&addr, "/open", &json!({ "owner": SUPER, "proof": "paidsig1" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["status"], "settled");
    assert_eq!(body["result"]["kind"], "currency");
    assert_eq!(body["result"]["amount"], 1_000);
    assert_eq!(body["settlementRef"], "settleref1");
    assert_eq!(body["payment"]["proof"], "paidsig1");
    assert_eq!(body["payment"]["amountReceived"], FEE);
    assert_eq!(body["opens"]["used"], 1);

    // SuperHolder has a second slot, so the replay reaches the proof
    // check and conflicts there.
    let (status, body) =
        post(&addr, "/open", &json!({ "owner": SUPER, "proof": "paidsig1" })).await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "proof_replayed");
}

#[tokio::test]
async fn test_open_route_quota_exhausted() {
    let addr = spawn_service().await;

    let (status, _) = post(&addr, "/open", &json!({ "owner": HOLDER, "proof": "paidq1" })).await;
    assert_eq!(status, 200);

    let (status, body) =
        post(&addr, "/open", &json!({ "owner": HOLDER, "proof": "paidq2" })).await;
    assert_eq!(status, 429);
    assert_eq!(body["code"], "quota_exceeded");
    assert!(body["cooldownRemaining"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_prepare_payment_route() {
    let addr = spawn_service().await;
    let (status, body) = post(&addr, "/prepare-payment", &json!({ "owner": HOLDER })).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["feeAmount"], FEE);
    assert_eq!(body["treasuryAddress"], TREASURY);
    assert!(body["unsignedPaymentPayload"].as_str().is_some());
}

#[tokio::test]
async fn test_prepare_payment_quota_exhaustion_is_forbidden() {
    let addr = spawn_service().await;

    let (status, _) = post(&addr, "/open", &json!({ "owner": HOLDER, "proof": "paidp1" })).await;
    assert_eq!(status, 200);

    // Quota exhaustion on this route is a denial, not a rate limit.
    let (status, body) = post(&addr, "/prepare-payment", &json!({ "owner": HOLDER })).await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "quota_exceeded");
    assert!(body["cooldownRemaining"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_prepare_payment_ineligible_forbidden() {
    let addr = spawn_service().await;
    let (status, body) = post(&addr, "/prepare-payment", &json!({ "owner": NOBODY })).await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "access_denied");
}

#[tokio::test]
async fn test_bad_requests() {
    let addr = spawn_service().await;

    let (status, _) = get(&addr, "/nope").await;
    assert_eq!(status, 404);

    // Non-JSON body.
    let request =
        "POST /open HTTP/1.1\r\nHost: t\r\nContent-Length: 7\r\nConnection: close\r\n\r\nnotjson";
    let (status, _) = send_raw(&addr, request.as_bytes()).await;
    assert_eq!(status, 400);

    // Missing proof field.
    let (status, _) = post(&addr, "/open", &json!({ "owner": HOLDER })).await;
    assert_eq!(status, 400);

    // Malformed identity.
    let (status, body) =
        post(&addr, "/open", &json!({ "owner": "not valid!", "proof": "paidz" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_header_split_across_reads() {
    let addr = spawn_service().await;

    // Terminator straddles two writes, splitting inside "\r\n\r\n".
    let request = "GET /health HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n";
    let (a, b) = request.as_bytes().split_at(request.len() - 2);

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(a).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    stream.write_all(b).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"), "got: {}", text);
}
