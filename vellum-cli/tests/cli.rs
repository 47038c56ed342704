//! End-to-end tests against a minimal in-process mock server, driven
//! through the real `vellum_cli::client::Client`.

use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use vellum_cli::client::Client;

fn read_frame(stream: &mut TcpStream) -> Option<Value> {
    let mut len_buf = [0u8; 4];
    if stream.read_exact(&mut len_buf).is_err() {
        return None;
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).ok()?;
    serde_json::from_slice(&payload).ok()
}

fn write_frame(stream: &mut TcpStream, value: &Value) {
    let payload = serde_json::to_vec(value).unwrap();
    stream.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
    stream.write_all(&payload).unwrap();
    stream.flush().unwrap();
}

/// Replies with canned responses for a handful of commands, enough to
/// exercise the client's framing without a real `vellumd`.
fn spawn_mock_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        loop {
            let Some(req) = read_frame(&mut stream) else { return };
            let cmd = req.get("cmd").and_then(Value::as_str).unwrap_or("");
            let resp = match cmd {
                "ping" => json!({"ok": true, "data": "pong"}),
                "count" => json!({"ok": true, "data": {"count": 3}}),
                "boom" => json!({"ok": false, "error": "boom happened"}),
                other => json!({"ok": false, "error": format!("unknown command: {other}")}),
            };
            write_frame(&mut stream, &resp);
        }
    });
    addr
}

#[test]
fn call_roundtrips_ping() {
    let addr = spawn_mock_server();
    let mut client = Client::connect(&addr, Duration::from_secs(5)).unwrap();
    let resp = client.call(&json!({"cmd": "ping"})).unwrap();
    assert_eq!(resp, json!({"ok": true, "data": "pong"}));
}

#[test]
fn call_surfaces_structured_errors() {
    let addr = spawn_mock_server();
    let mut client = Client::connect(&addr, Duration::from_secs(5)).unwrap();
    let resp = client.call(&json!({"cmd": "boom"})).unwrap();
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"], json!("boom happened"));
}

#[test]
fn call_returns_nested_data() {
    let addr = spawn_mock_server();
    let mut client = Client::connect(&addr, Duration::from_secs(5)).unwrap();
    let resp = client.call(&json!({"cmd": "count", "collection": "docs", "query": {}})).unwrap();
    assert_eq!(resp["data"]["count"], json!(3));
}

#[test]
fn connecting_to_a_closed_port_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    assert!(Client::connect(&addr, Duration::from_millis(500)).is_err());
}
