//! Scripted stand-in for the coding-assistant executable.
//!
//! Speaks the newline-delimited JSON protocol and reacts to magic prompt
//! texts so integration tests can exercise streaming, timeouts, permission
//! resolution, and crash semantics:
//!
//! - `sleep:<ms>` — respond after a delay (timeout tests)
//! - `exit`      — exit(1) immediately, leaving prompts unanswered
//! - `perm:<tool>` — ask for permission, echo the chosen option back
//! - anything else — stream two chunks, then `echo: <text>`

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

fn write_line(stdout: &Arc<Mutex<std::io::Stdout>>, value: Value) {
    let mut out = stdout.lock().unwrap_or_else(|e| e.into_inner());
    let _ = writeln!(out, "{value}");
    let _ = out.flush();
}

fn main() {
    let stdout = Arc::new(Mutex::new(std::io::stdout()));
    let stdin = std::io::stdin();
    let session_counter = AtomicU64::new(0);
    let server_request_id = AtomicU64::new(1_000_000);

    // `--handshake-delay-ms N` lets tests hold a connect in flight.
    let args: Vec<String> = std::env::args().collect();
    let handshake_delay_ms: u64 = args
        .iter()
        .position(|a| a == "--handshake-delay-ms")
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut lines = stdin.lock().lines();
    while let Some(Ok(line)) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        let id = message.get("id").and_then(Value::as_u64);
        let method = message.get("method").and_then(Value::as_str);
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let (Some(id), Some(method)) = (id, method) else {
            continue;
        };

        match method {
            "initialize" => {
                if handshake_delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(handshake_delay_ms));
                }
                write_line(
                    &stdout,
                    json!({"id": id, "result": {
                        "protocol_version": "1",
                        "agent_version": "stub-agent"
                    }}),
                );
            }
            "session/new" => {
                let n = session_counter.fetch_add(1, Ordering::SeqCst) + 1;
                write_line(
                    &stdout,
                    json!({"id": id, "result": {
                        "session_id": format!("sess-{n}"),
                        "available_modes": ["agent", "plan"],
                        "current_model": "stub-model"
                    }}),
                );
            }
            "session/end" | "session/set_mode" | "session/set_model" => {
                write_line(&stdout, json!({"id": id, "result": {}}));
            }
            "session/prompt" => {
                let session_id = params
                    .get("session_id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let text = params
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();

                if text == "exit" {
                    std::process::exit(1);
                }

                if let Some(ms) = text.strip_prefix("sleep:") {
                    let ms: u64 = ms.parse().unwrap_or(100);
                    let stdout = Arc::clone(&stdout);
                    std::thread::spawn(move || {
                        std::thread::sleep(std::time::Duration::from_millis(ms));
                        write_line(
                            &stdout,
                            json!({"id": id, "result": {
                                "response": format!("slept {ms}ms"),
                                "stop_reason": "end_turn"
                            }}),
                        );
                    });
                    continue;
                }

                if let Some(tool) = text.strip_prefix("perm:") {
                    let request_id = server_request_id.fetch_add(1, Ordering::SeqCst);
                    write_line(
                        &stdout,
                        json!({"id": request_id, "method": "session/request_permission", "params": {
                            "session_id": session_id,
                            "tool_name": tool,
                            "options": [
                                {"option_id": "opt-aa", "kind": "allow_always"},
                                {"option_id": "opt-ao", "kind": "allow_once"},
                                {"option_id": "opt-ro", "kind": "reject_once"}
                            ]
                        }}),
                    );

                    // Read until the matching permission response shows up.
                    let mut outcome = "no-answer".to_string();
                    for reply in lines.by_ref() {
                        let Ok(reply) = reply else { break };
                        let Ok(value) = serde_json::from_str::<Value>(reply.trim()) else {
                            continue;
                        };
                        if value.get("id").and_then(Value::as_u64) == Some(request_id) {
                            let result =
                                value.get("result").cloned().unwrap_or(Value::Null);
                            outcome = match result.get("outcome").and_then(Value::as_str) {
                                Some("selected") => result
                                    .get("option_id")
                                    .and_then(Value::as_str)
                                    .unwrap_or("selected")
                                    .to_string(),
                                Some(other) => other.to_string(),
                                None => "malformed".to_string(),
                            };
                            break;
                        }
                    }

                    write_line(
                        &stdout,
                        json!({"id": id, "result": {
                            "response": format!("perm:{outcome}"),
                            "stop_reason": "end_turn"
                        }}),
                    );
                    continue;
                }

                for chunk in ["chunk one", "chunk two"] {
                    write_line(
                        &stdout,
                        json!({"method": "session/update", "params": {
                            "session_id": session_id,
                            "text": chunk
                        }}),
                    );
                }
                write_line(
                    &stdout,
                    json!({"id": id, "result": {
                        "response": format!("echo: {text}"),
                        "stop_reason": "end_turn"
                    }}),
                );
            }
            _ => {
                write_line(
                    &stdout,
                    json!({"id": id, "error": {"code": -32601, "message": format!("unknown method: {method}")}}),
                );
            }
        }
    }
}
