//! Integration tests for the `leanflow serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with the
//! seed fixture loaded into in-memory storage, makes HTTP requests, and
//! verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so parallel `cargo test --workspace` runs
/// (which spawn separate test binaries) don't collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Helper: start `leanflow serve` on the given port with the seed fixture.
fn start_server(port: u16, env: &[(&str, &str)]) -> Child {
    let seed = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/seed.json");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_leanflow"));
    cmd.arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--seed")
        .arg(seed);
    cmd.env_remove("ANTHROPIC_API_KEY");
    cmd.env_remove("LEANFLOW_API_KEY");
    for (key, value) in env {
        cmd.env(key, value);
    }
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().expect("failed to start leanflow serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            return child;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    child
}

fn stop(mut child: Child) {
    child.kill().ok();
    child.wait().ok();
}

/// Helper: make an HTTP request with optional headers and JSON body;
/// returns (status, body).
fn http_request(
    port: u16,
    method: &str,
    path: &str,
    extra_headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in extra_headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    if let Some(body) = body {
        header_lines.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n",
            body.len()
        ));
    }

    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Connection: close\r\n\r\n{}",
        method,
        path,
        port,
        header_lines,
        body.unwrap_or("")
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

fn http_get(port: u16, path: &str) -> (u16, String) {
    http_request(port, "GET", path, &[], None)
}

fn http_post(port: u16, path: &str, body: &str) -> (u16, String) {
    http_request(port, "POST", path, &[], Some(body))
}

fn http_patch(port: u16, path: &str, body: &str) -> (u16, String) {
    http_request(port, "PATCH", path, &[], Some(body))
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON ({}): {}", e, body))
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status_line = headers.lines().next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    // Handle chunked transfer encoding
    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };

    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = if chunk_end + 2 <= remaining.len() {
            &remaining[chunk_end + 2..]
        } else {
            ""
        };
    }

    result
}

// ──────────────────────────────────────────────
// 1. Basics
// ──────────────────────────────────────────────

#[test]
fn health_returns_200_with_version() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (status, body) = http_get(port, "/health");
    stop(child);

    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["status"], "ok");
    assert!(body.get("version").is_some());
}

#[test]
fn unknown_route_returns_json_404() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (status, body) = http_get(port, "/contracts");
    stop(child);

    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "not found");
}

// ──────────────────────────────────────────────
// 2. Future-state graphs
// ──────────────────────────────────────────────

#[test]
fn seeded_graph_is_served() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (list_status, list_body) = http_get(port, "/sessions/walk-ap/future-states");
    let (status, body) = http_get(port, "/future-states/fs-lean-ap");
    let (missing_status, _) = http_get(port, "/future-states/fs-nope");
    stop(child);

    assert_eq!(list_status, 200);
    assert_eq!(json(&list_body)["future_states"][0]["version"], 1);

    assert_eq!(status, 200);
    let graph = json(&body);
    assert_eq!(graph["future_state"]["name"], "Lean AP v1");
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(graph["edges"].as_array().unwrap().len(), 1);

    assert_eq!(missing_status, 404);
}

#[test]
fn node_update_detects_stale_revision() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (first, first_body) = http_patch(
        port,
        "/nodes/node-capture",
        r#"{"expected_revision": 0, "name": "Scan and capture"}"#,
    );
    let (stale, stale_body) = http_patch(
        port,
        "/nodes/node-capture",
        r#"{"expected_revision": 0, "lane": "Shared services"}"#,
    );
    let (blank, _) = http_patch(port, "/nodes/node-capture", r#"{"name": "  "}"#);
    stop(child);

    assert_eq!(first, 200);
    let node = json(&first_body);
    assert_eq!(node["revision"], 1);
    assert_eq!(node["name"], "Scan and capture");

    assert_eq!(stale, 409);
    assert_eq!(json(&stale_body)["kind"], "conflict");

    assert_eq!(blank, 400);
}

#[test]
fn edge_creation_enforces_graph_rules() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (created, created_body) = http_post(
        port,
        "/future-states/fs-lean-ap/edges",
        r#"{"source_node_id": "node-capture", "target_node_id": "node-approve", "label": "exceptions"}"#,
    );
    let (duplicate, _) = http_post(
        port,
        "/future-states/fs-lean-ap/edges",
        r#"{"source_node_id": "node-capture", "target_node_id": "node-approve"}"#,
    );
    let (self_loop, _) = http_post(
        port,
        "/future-states/fs-lean-ap/edges",
        r#"{"source_node_id": "node-approve", "target_node_id": "node-approve"}"#,
    );
    let (reverse, reverse_body) = http_post(
        port,
        "/future-states/fs-lean-ap/edges",
        r#"{"source_node_id": "node-capture", "target_node_id": "node-receive"}"#,
    );
    stop(child);

    assert_eq!(created, 201);
    let created = json(&created_body);
    assert_eq!(created["edge"]["order_index"], 0);
    assert_eq!(created["edge"]["label"], "exceptions");

    assert_eq!(duplicate, 409);
    assert_eq!(self_loop, 400);

    assert_eq!(reverse, 201);
    let reverse = json(&reverse_body);
    assert_eq!(reverse["edge"]["order_index"], 1);
    assert_eq!(reverse["warnings"].as_array().unwrap().len(), 1);
}

#[test]
fn edge_update_and_delete() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (updated, updated_body) =
        http_patch(port, "/edges/edge-1", r#"{"label": "scanned", "order_index": 4}"#);
    let (deleted, _) = http_request(port, "DELETE", "/edges/edge-1", &[], None);
    let (again, _) = http_request(port, "DELETE", "/edges/edge-1", &[], None);
    let (_, graph_body) = http_get(port, "/future-states/fs-lean-ap");
    stop(child);

    assert_eq!(updated, 200);
    assert_eq!(json(&updated_body)["order_index"], 4);
    assert_eq!(deleted, 204);
    assert_eq!(again, 404);
    assert_eq!(json(&graph_body)["edges"].as_array().unwrap().len(), 0);
}

#[test]
fn locked_future_state_rejects_edits() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (locked, locked_body) = http_post(
        port,
        "/future-states/fs-lean-ap/status",
        r#"{"status": "locked"}"#,
    );
    let (edit, _) = http_patch(port, "/nodes/node-receive", r#"{"name": "Receive"}"#);
    let (bad_status, _) = http_post(
        port,
        "/future-states/fs-lean-ap/status",
        r#"{"status": "archived"}"#,
    );
    stop(child);

    assert_eq!(locked, 200);
    assert_eq!(json(&locked_body)["status"], "locked");
    assert_eq!(edit, 409);
    assert_eq!(bad_status, 400);
}

// ──────────────────────────────────────────────
// 3. Information flows and comparisons
// ──────────────────────────────────────────────

#[test]
fn comparison_is_generated_and_stored() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (before, _) = http_get(port, "/sessions/walk-ap/future-states/fs-lean-ap/comparison");
    let (generated, generated_body) = http_post(
        port,
        "/sessions/walk-ap/future-states/fs-lean-ap/comparison",
        "{}",
    );
    let (stored, stored_body) =
        http_get(port, "/sessions/walk-ap/future-states/fs-lean-ap/comparison");
    stop(child);

    assert_eq!(before, 404);

    assert_eq!(generated, 200);
    let record = json(&generated_body);
    assert_eq!(record["eliminated_count"], 1);
    assert_eq!(record["added_count"], 1);
    assert_eq!(record["modified_count"], 1);
    assert_eq!(record["unchanged_count"], 0);
    assert_eq!(record["avg_quality_improvement"], 7.0);
    assert_eq!(record["waste_reduction_count"], 2);

    assert_eq!(stored, 200);
    assert_eq!(json(&stored_body)["id"], record["id"]);
}

#[test]
fn recorded_flow_changes_comparison() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (created, _) = http_post(
        port,
        "/sessions/walk-ap/flows",
        r#"{"future_state_id": "fs-lean-ap", "source_ref": "node-capture",
            "target_ref": "node-approve", "name": "Approval email", "flow_type": "approval",
            "completeness_score": 2, "accuracy_score": 3, "timeliness_score": 1}"#,
    );
    let (invalid, _) = http_post(
        port,
        "/sessions/walk-ap/flows",
        r#"{"source_ref": "a", "target_ref": "b", "name": "Fax", "flow_type": "document",
            "completeness_score": 0, "accuracy_score": 3, "timeliness_score": 1}"#,
    );
    let (_, body) = http_post(
        port,
        "/sessions/walk-ap/future-states/fs-lean-ap/comparison",
        "{}",
    );
    stop(child);

    assert_eq!(created, 201);
    assert_eq!(invalid, 400);
    let record = json(&body);
    assert_eq!(record["eliminated_count"], 0);
    assert_eq!(record["unchanged_count"], 1);
}

// ──────────────────────────────────────────────
// 4. Agent endpoints, plan, quota and auth
// ──────────────────────────────────────────────

#[test]
fn agent_endpoints_require_user_id() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (design, body) = http_post(port, "/sessions/walk-ap/design", "{}");
    let (sequencing, _) = http_post(port, "/sessions/walk-ap/sequencing", "{}");
    stop(child);

    assert_eq!(design, 400);
    assert!(json(&body)["error"].as_str().unwrap().contains("X-User-Id"));
    assert_eq!(sequencing, 400);
}

#[test]
fn agent_without_client_is_upstream_error_and_quota_applies() {
    let port = next_port();
    let child = start_server(port, &[("LEANFLOW_RATE_LIMIT", "1")]);

    let user = [("X-User-Id", "ana")];
    let (first, first_body) =
        http_request(port, "POST", "/sessions/walk-ap/design", &user, Some("{}"));
    let (second, second_body) =
        http_request(port, "POST", "/sessions/walk-ap/design", &user, Some("{}"));
    let (other_user, _) = http_request(
        port,
        "POST",
        "/sessions/walk-ap/design",
        &[("X-User-Id", "ben")],
        Some("{}"),
    );
    stop(child);

    assert_eq!(first, 502);
    assert_eq!(json(&first_body)["kind"], "upstream");

    assert_eq!(second, 429);
    let limited = json(&second_body);
    assert_eq!(limited["error"], "rate limit exceeded");
    assert!(limited["retry_after"].as_u64().unwrap() > 0);

    assert_eq!(other_user, 502);
}

#[test]
fn plan_is_empty_before_sequencing() {
    let port = next_port();
    let child = start_server(port, &[]);

    let (status, body) = http_get(port, "/sessions/walk-ap/plan");
    let (missing_session, _) = http_get(port, "/sessions/walk-zz/plan");
    let (missing_item, _) = http_patch(
        port,
        "/items/item-nope",
        r#"{"wave_id": "wave-nope", "order_index": 0}"#,
    );
    stop(child);

    assert_eq!(status, 200);
    let plan = json(&body);
    assert_eq!(plan["session_id"], "walk-ap");
    assert_eq!(plan["waves"].as_array().unwrap().len(), 0);
    assert_eq!(missing_session, 404);
    assert_eq!(missing_item, 404);
}

#[test]
fn api_key_is_enforced_except_for_health() {
    let port = next_port();
    let child = start_server(port, &[("LEANFLOW_API_KEY", "sekret")]);

    let (health, _) = http_get(port, "/health");
    let (anonymous, anonymous_body) = http_get(port, "/future-states/fs-lean-ap");
    let (wrong, _) = http_request(
        port,
        "GET",
        "/future-states/fs-lean-ap",
        &[("Authorization", "Bearer nope")],
        None,
    );
    let (bearer, _) = http_request(
        port,
        "GET",
        "/future-states/fs-lean-ap",
        &[("Authorization", "Bearer sekret")],
        None,
    );
    let (header, _) = http_request(
        port,
        "GET",
        "/future-states/fs-lean-ap",
        &[("X-API-Key", "sekret")],
        None,
    );
    stop(child);

    assert_eq!(health, 200);
    assert_eq!(anonymous, 401);
    assert_eq!(json(&anonymous_body)["error"], "authentication required");
    assert_eq!(wrong, 403);
    assert_eq!(bearer, 200);
    assert_eq!(header, 200);
}
