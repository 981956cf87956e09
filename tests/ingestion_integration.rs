//! Ingestion Integration Tests
//!
//! Drives a served hub over real HTTP:
//! 1. Validation errors reach the producer with stable codes
//! 2. Out-of-order delivery is applied in sequence order
//! 3. Sessions are independent of each other
//! 4. Deletion tombstones a session until it is restarted

mod common;

use common::{event, post_event, start_test_api_server, tool_end};
use serde_json::{json, Value};

#[tokio::test]
async fn test_rejected_payloads_report_codes() {
    let server = start_test_api_server().await;
    let client = reqwest::Client::new();

    let cases = [
        (json!({"event_type": "session_start"}), "missing_session_id"),
        (json!({"session_id": "s1"}), "missing_event_type"),
        (json!({"event_type": "lunch", "session_id": "s1"}), "unknown_event_type"),
        (
            json!({"event_type": "tool_use_end", "session_id": "s1", "data": {"success": true}}),
            "missing_field",
        ),
        (
            json!({"event_type": "tool_use_end", "session_id": "s1",
                   "data": {"tool_name": "Read", "success": "yes"}}),
            "invalid_field",
        ),
        (json!(["not", "an", "object"]), "malformed_payload"),
    ];

    for (payload, code) in cases {
        let (status, body) = post_event(&client, &server, &payload).await;
        assert_eq!(status, 400, "payload {} should be rejected", payload);
        assert_eq!(body["error"], code);
    }

    let sessions: Value = client
        .get(server.url("/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions["sessions"], json!([]));

    server.stop().await;
}

#[tokio::test]
async fn test_out_of_order_events_apply_in_sequence() {
    let server = start_test_api_server().await;
    let client = reqwest::Client::new();

    let (status, body) = post_event(&client, &server, &tool_end("s1", 3, "Edit", true)).await;
    assert_eq!(status, 202);
    assert_eq!(body["outcome"], "buffered");

    let (_, body) = post_event(&client, &server, &tool_end("s1", 1, "Read", true)).await;
    assert_eq!(body["sequences"], json!([1]));

    let (_, body) = post_event(&client, &server, &tool_end("s1", 2, "Bash", false)).await;
    assert_eq!(body["sequences"], json!([2, 3]));

    // Too late: the producer is still told it was accepted
    let (status, body) = post_event(&client, &server, &tool_end("s1", 2, "Bash", false)).await;
    assert_eq!(status, 202);
    assert_eq!(body["outcome"], "discarded");

    let detail: Value = client
        .get(server.url("/sessions/s1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["last_sequence"], 3);
    let counters = &detail["state"]["counters"];
    assert_eq!(counters["tool_uses"], 3);
    assert_eq!(counters["successes"], 2);
    assert_eq!(counters["failures"], 1);
    // Failure at 2 reset the streak; success at 3 started a new one
    assert_eq!(counters["consecutive_successes"], 1);

    server.stop().await;
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let server = start_test_api_server().await;
    let client = reqwest::Client::new();

    let mut tasks = Vec::new();
    for session in 0..4 {
        let client = client.clone();
        let url = server.url("/events");
        tasks.push(tokio::spawn(async move {
            let session_id = format!("s{}", session);
            for seq in 1..=20u64 {
                let response = client
                    .post(&url)
                    .json(&tool_end(&session_id, seq, "Read", seq % 5 != 0))
                    .send()
                    .await
                    .unwrap();
                assert_eq!(response.status().as_u16(), 202);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let sessions: Value = client
        .get(server.url("/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sessions = sessions["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 4);
    for summary in sessions {
        assert_eq!(summary["last_sequence"], 20);
    }

    let detail: Value = client
        .get(server.url("/sessions/s2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["state"]["counters"]["failures"], 4);

    server.stop().await;
}

#[tokio::test]
async fn test_delete_tombstones_until_restart() {
    let server = start_test_api_server().await;
    let client = reqwest::Client::new();

    post_event(&client, &server, &event("s1", 1, "session_start", json!({}))).await;
    post_event(&client, &server, &tool_end("s1", 2, "Read", true)).await;

    let status = client
        .delete(server.url("/sessions/s1"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 200);

    let (status, body) = post_event(&client, &server, &tool_end("s1", 3, "Read", true)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "session_not_found");

    // Restarting begins a fresh session
    let (status, _) =
        post_event(&client, &server, &event("s1", 1, "session_start", json!({}))).await;
    assert_eq!(status, 202);
    let detail: Value = client
        .get(server.url("/sessions/s1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["state"]["counters"]["tool_uses"], 0);
    assert_eq!(detail["last_sequence"], 1);

    server.stop().await;
}

#[tokio::test]
async fn test_session_metadata_listed() {
    let server = start_test_api_server().await;
    let client = reqwest::Client::new();

    post_event(
        &client,
        &server,
        &event(
            "s1",
            1,
            "session_start",
            json!({"project_name": "payments", "project_root": "/src/payments"}),
        ),
    )
    .await;
    post_event(
        &client,
        &server,
        &event("s1", 2, "subagent_start", json!({"agent_id": "a1", "agent_name": "Reviewer"})),
    )
    .await;

    let sessions: Value = client
        .get(server.url("/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let summary = &sessions["sessions"][0];
    assert_eq!(summary["session_id"], "s1");
    assert_eq!(summary["status"], "active");
    assert_eq!(summary["project_name"], "payments");
    assert_eq!(summary["agent_count"], 2);
    assert_eq!(summary["degraded"], false);

    let health: Value = client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sessions"], 1);

    server.stop().await;
}
