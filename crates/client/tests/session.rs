//! Session behavior against a scripted in-memory server.
//!
//! The "server" end of a duplex pipe plays the remote host, so every test
//! controls exactly which frames arrive and in what order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use semem_client::{Channel, ClientConfig, ClientError, Session};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FakeServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    /// Read the next inbound frame.
    async fn recv(&mut self) -> Value {
        let line = self
            .lines
            .next_line()
            .await
            .expect("read from client")
            .expect("client closed the channel");
        serde_json::from_str(&line).expect("client sent invalid JSON")
    }

    async fn send_raw(&mut self, frame: &str) {
        self.writer.write_all(frame.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn respond(&mut self, id: u64, result: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        self.send_raw(&frame.to_string()).await;
    }

    async fn respond_error(&mut self, id: u64, code: i64, message: &str, data: Option<Value>) {
        let mut error = json!({ "code": code, "message": message });
        if let Some(data) = data {
            error["data"] = data;
        }
        let frame = json!({ "jsonrpc": "2.0", "id": id, "error": error });
        self.send_raw(&frame.to_string()).await;
    }

    /// Answer `initialize` and `tools/list`, swallow the `initialized`
    /// notification.
    async fn handle_handshake(&mut self, tools: Value) {
        let init = self.recv().await;
        assert_eq!(init["method"], "initialize");
        self.respond(
            init["id"].as_u64().unwrap(),
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {}, "resources": {} },
                "serverInfo": { "name": "semem", "version": "0.0.0" }
            }),
        )
        .await;

        let initialized = self.recv().await;
        assert_eq!(initialized["method"], "notifications/initialized");
        assert!(initialized.get("id").is_none());

        let list = self.recv().await;
        assert_eq!(list["method"], "tools/list");
        self.respond(list["id"].as_u64().unwrap(), json!({ "tools": tools }))
            .await;
    }
}

fn default_tools() -> Value {
    json!([
        { "name": "semem_store_interaction", "description": "Store a prompt/response pair" },
        { "name": "semem_generate_embedding", "description": "Embed a text" },
        { "name": "semem_retrieve_memories", "description": "Semantic search" }
    ])
}

fn test_config() -> ClientConfig {
    ClientConfig {
        retries: 0,
        ..ClientConfig::default()
    }
}

/// Establish a session over an in-memory channel, running the scripted
/// handshake on the server side.
async fn connect_pair(config: &ClientConfig, tools: Value) -> (Session, FakeServer) {
    let (client_io, server_io) = duplex(64 * 1024);
    let (client_read, client_write) = split(client_io);
    let (server_read, server_write) = split(server_io);

    let mut server = FakeServer {
        lines: BufReader::new(server_read).lines(),
        writer: server_write,
    };
    let server_task = tokio::spawn(async move {
        server.handle_handshake(tools).await;
        server
    });

    let channel = Channel::from_streams(client_read, client_write);
    let session = Session::establish(channel, config).await.expect("establish");
    let server = server_task.await.unwrap();
    (session, server)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog discovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn handshake_discovers_catalog_and_listed_tools_are_callable() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let tools = session.tools();
    assert!(!tools.is_empty());
    assert!(tools.iter().any(|t| t.name == "semem_store_interaction"));

    // A name straight out of the catalog must not fail with "unknown tool".
    let name = tools[0].name.clone();
    let call = session.call_tool(&name, json!({ "prompt": "hi", "response": "there" }));
    let serve = async {
        let req = server.recv().await;
        assert_eq!(req["method"], "tools/call");
        assert_eq!(req["params"]["name"], name.as_str());
        server
            .respond(
                req["id"].as_u64().unwrap(),
                json!({ "content": [{ "type": "text", "text": "stored" }] }),
            )
            .await;
    };
    let (result, ()) = tokio::join!(call, serve);
    let result = result.unwrap();
    assert_eq!(result["content"][0]["text"], "stored");

    session.close().await;
}

#[tokio::test]
async fn list_tools_refreshes_stale_cache() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;
    assert_eq!(session.tools().len(), 3);

    // The remote catalog changed since connect.
    let refresh = session.list_tools();
    let serve = async {
        let req = server.recv().await;
        assert_eq!(req["method"], "tools/list");
        server
            .respond(
                req["id"].as_u64().unwrap(),
                json!({ "tools": [{ "name": "semem_ask" }] }),
            )
            .await;
    };
    let (tools, ()) = tokio::join!(refresh, serve);
    assert_eq!(tools.unwrap().len(), 1);
    assert_eq!(session.tools()[0].name, "semem_ask");

    session.close().await;
}

#[tokio::test]
async fn malformed_list_result_is_protocol_error() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let refresh = session.list_tools();
    let serve = async {
        let req = server.recv().await;
        // Required `tools` field missing.
        server.respond(req["id"].as_u64().unwrap(), json!({ "nope": [] })).await;
    };
    let (result, ()) = tokio::join!(refresh, serve);
    assert!(matches!(result.unwrap_err(), ClientError::Protocol(_)));

    session.close().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Demultiplexing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn out_of_order_responses_reach_their_own_callers() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let call_a = session.call_tool("semem_generate_embedding", json!({ "text": "a" }));
    let call_b = session.call_tool("semem_retrieve_memories", json!({ "query": "b" }));

    let serve = async {
        let first = server.recv().await;
        let second = server.recv().await;
        // Reply in reverse arrival order, each echoing its own tool name.
        for req in [second, first] {
            let name = req["params"]["name"].clone();
            server
                .respond(req["id"].as_u64().unwrap(), json!({ "tool": name }))
                .await;
        }
    };

    let (a, b, ()) = tokio::join!(call_a, call_b, serve);
    assert_eq!(a.unwrap()["tool"], "semem_generate_embedding");
    assert_eq!(b.unwrap()["tool"], "semem_retrieve_memories");

    session.close().await;
}

#[tokio::test]
async fn unknown_id_response_does_not_affect_pending_calls() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let call = session.call_tool("semem_generate_embedding", json!({ "text": "hello" }));
    let serve = async {
        let req = server.recv().await;
        // Never requested by anyone.
        server.respond(9999, json!({ "bogus": true })).await;
        server
            .respond(req["id"].as_u64().unwrap(), json!({ "embedding": [0.1, 0.2, 0.3] }))
            .await;
    };
    let (result, ()) = tokio::join!(call, serve);
    let result = result.unwrap();
    assert!(result["embedding"].as_array().unwrap().iter().all(Value::is_number));

    session.close().await;
}

#[tokio::test]
async fn server_notifications_and_junk_lines_are_skipped() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let call = session.call_tool("semem_generate_embedding", json!({ "text": "x" }));
    let serve = async {
        let req = server.recv().await;
        server.send_raw("INFO semem: embedding request received").await;
        server
            .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":50}}"#)
            .await;
        server.send_raw("not json at all {").await;
        server.respond(req["id"].as_u64().unwrap(), json!({ "ok": true })).await;
    };
    let (result, ()) = tokio::join!(call, serve);
    assert_eq!(result.unwrap(), json!({ "ok": true }));

    session.close().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeouts and cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out_at_the_deadline() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let call = session.call_tool("semem_retrieve_memories", json!({ "query": "q" }));
    let serve = async {
        // Swallow the request, never answer.
        server.recv().await
    };
    let (result, request) = tokio::join!(call, serve);
    match result.unwrap_err() {
        ClientError::Timeout { method, after_ms } => {
            assert_eq!(method, "tools/call");
            assert_eq!(after_ms, 30_000);
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(session.pending_count(), 0);

    // The late response must not corrupt the next call.
    let stale_id = request["id"].as_u64().unwrap();
    let next = session.call_tool("semem_generate_embedding", json!({ "text": "y" }));
    let serve = async {
        server.respond(stale_id, json!({ "stale": true })).await;
        let req = server.recv().await;
        server.respond(req["id"].as_u64().unwrap(), json!({ "fresh": true })).await;
    };
    let (result, ()) = tokio::join!(next, serve);
    assert_eq!(result.unwrap(), json!({ "fresh": true }));

    session.close().await;
}

#[tokio::test]
async fn cancelled_call_is_discarded() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;
    let session = Arc::new(session);

    let caller = {
        let session = session.clone();
        tokio::spawn(async move {
            session.call_tool("semem_retrieve_memories", json!({ "query": "q" })).await
        })
    };
    // Wait until the request is on the wire, then cancel the caller.
    let cancelled = server.recv().await;
    caller.abort();
    let _ = caller.await;
    assert_eq!(session.pending_count(), 0);

    // Late answer to the cancelled call is ignored; a new call still works.
    let next = session.call_tool("semem_generate_embedding", json!({ "text": "z" }));
    let serve = async {
        server.respond(cancelled["id"].as_u64().unwrap(), json!({ "stale": true })).await;
        let req = server.recv().await;
        server.respond(req["id"].as_u64().unwrap(), json!({ "fresh": true })).await;
    };
    let (result, ()) = tokio::join!(next, serve);
    assert_eq!(result.unwrap(), json!({ "fresh": true }));

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_is_a_connection_error() {
    let (client_io, server_io) = duplex(64 * 1024);
    let (client_read, client_write) = split(client_io);
    // Keep the server half alive but silent.
    let _server_io = server_io;

    let channel = Channel::from_streams(client_read, client_write);
    let err = Session::establish(channel, &test_config()).await.unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation and remote errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn empty_tool_name_fails_before_any_message_is_sent() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let err = session.call_tool("", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    let err = session.call_tool("   ", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));

    // Nothing reached the wire.
    let nothing = tokio::time::timeout(Duration::from_secs(1), server.recv()).await;
    assert!(nothing.is_err());

    session.close().await;
}

#[tokio::test]
async fn remote_error_is_propagated_verbatim() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let call = session.call_tool("semem_store_interaction", json!({}));
    let serve = async {
        let req = server.recv().await;
        server
            .respond_error(
                req["id"].as_u64().unwrap(),
                -32050,
                "embedding provider unavailable",
                Some(json!({ "provider": "ollama" })),
            )
            .await;
    };
    let (result, ()) = tokio::join!(call, serve);
    match result.unwrap_err() {
        ClientError::Remote { code, message, data } => {
            assert_eq!(code, -32050);
            assert_eq!(message, "embedding provider unavailable");
            assert_eq!(data, Some(json!({ "provider": "ollama" })));
        }
        other => panic!("expected Remote, got {other:?}"),
    }

    session.close().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn read_resource_returns_contents() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let read = session.read_resource("semem://status");
    let serve = async {
        let req = server.recv().await;
        assert_eq!(req["method"], "resources/read");
        assert_eq!(req["params"]["uri"], "semem://status");
        server
            .respond(
                req["id"].as_u64().unwrap(),
                json!({
                    "contents": [{
                        "uri": "semem://status",
                        "mimeType": "application/json",
                        "text": "{\"memories\":42}"
                    }]
                }),
            )
            .await;
    };
    let (result, ()) = tokio::join!(read, serve);
    let contents = result.unwrap().contents;
    assert_eq!(contents[0].uri, "semem://status");
    assert_eq!(contents[0].text.as_deref(), Some("{\"memories\":42}"));

    session.close().await;
}

#[tokio::test]
async fn unknown_resource_uri_maps_to_not_found() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let read = session.read_resource("semem://bogus");
    let serve = async {
        let req = server.recv().await;
        server
            .respond_error(req["id"].as_u64().unwrap(), -32002, "Resource not found", None)
            .await;
    };
    let (result, ()) = tokio::join!(read, serve);
    match result.unwrap_err() {
        ClientError::NotFound(uri) => assert_eq!(uri, "semem://bogus"),
        other => panic!("expected NotFound, got {other:?}"),
    }

    session.close().await;
}

#[tokio::test]
async fn list_resources_parses_catalog() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let list = session.list_resources();
    let serve = async {
        let req = server.recv().await;
        assert_eq!(req["method"], "resources/list");
        server
            .respond(
                req["id"].as_u64().unwrap(),
                json!({
                    "resources": [
                        { "uri": "semem://status", "name": "status" },
                        { "uri": "semem://graph/schema", "name": "schema" }
                    ]
                }),
            )
            .await;
    };
    let (result, ()) = tokio::join!(list, serve);
    let resources = result.unwrap();
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[1].uri, "semem://graph/schema");

    session.close().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shutdown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn close_resolves_pending_calls() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;
    let session = Arc::new(session);

    let caller = {
        let session = session.clone();
        tokio::spawn(async move {
            session.call_tool("semem_retrieve_memories", json!({ "query": "q" })).await
        })
    };
    // Wait until the request is on the wire, then close underneath it.
    let _req = server.recv().await;
    session.close().await;

    let result = caller.await.unwrap();
    assert!(matches!(result.unwrap_err(), ClientError::Connection(_)));
    assert!(!session.is_alive());
}

#[tokio::test]
async fn server_going_away_fails_pending_and_future_calls() {
    let (session, mut server) = connect_pair(&test_config(), default_tools()).await;

    let call = session.call_tool("semem_store_interaction", json!({}));
    let serve = async {
        let _req = server.recv().await;
        drop(server);
    };
    let (result, ()) = tokio::join!(call, serve);
    assert!(matches!(result.unwrap_err(), ClientError::Connection(_)));

    // The session is dead; later calls fail fast.
    let err = session.call_tool("semem_store_interaction", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
    assert!(!session.is_alive());
}
