//! Integration tests for the launcher over a real socket
//!
//! These tests verify:
//! - The router serves over TCP
//! - A start/stop session round trip works end to end
//! - Error bodies keep the documented shape

#![cfg(unix)]

use bloom_ingest::store::{DocumentStore, MemoryStore};
use bloom_server::{config::AgentConfig, router, supervisor::ProcessSupervisor, AppState};
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc, time::Duration};

struct TestServer {
    addr: SocketAddr,
    store: Arc<MemoryStore>,
    supervisor: Arc<ProcessSupervisor>,
}

impl TestServer {
    async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let supervisor = Arc::new(ProcessSupervisor::new(AgentConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "exec sleep 30".to_string(), "agent".to_string()],
            session_flag: "--chat_id".to_string(),
            required_env: vec![],
            grace_period: Duration::from_secs(5),
        }));

        let app = router(AppState {
            supervisor: supervisor.clone(),
            store: store.clone(),
            chats_collection: "chats".to_string(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            store,
            supervisor,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

#[tokio::test]
async fn test_session_round_trip() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/start"))
        .query(&[("chat_id", "greenhouse-1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(server.supervisor.is_running().await);
    assert!(server
        .store
        .get_document("chats", "greenhouse-1")
        .await
        .unwrap()
        .is_some());

    let status: Value = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["chat_id"], "greenhouse-1");

    let response = client.post(server.url("/stop")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Voice agent stopped");
    assert!(!server.supervisor.is_running().await);
}

#[tokio::test]
async fn test_error_body_shape() {
    let server = TestServer::start().await;

    let response = reqwest::Client::new()
        .post(server.url("/stop"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["status"], 400);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let server = TestServer::start().await;

    let response = reqwest::get(server.url("/agents")).await.unwrap();

    assert_eq!(response.status(), 404);
}
