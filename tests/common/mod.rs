//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use sqlwright::agent::message::ChatRequest;
use sqlwright::agent::prompt::PromptSet;
use sqlwright::agent::resilient::{Completion, ModelClient};
use sqlwright::agent::{AgentConfig, Pipeline};
use sqlwright::db::{ConnectionPool, SchemaStore, SqlitePool, SqliteSchemaStore};
use sqlwright::error::AgentError;

/// Creates `<root>/shop/shop.sqlite` with users and orders.
pub fn shop_database() -> TempDir {
    let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
    create_shop(dir.path());
    dir
}

fn create_shop(root: &Path) {
    let db_dir = root.join("shop");
    std::fs::create_dir_all(&db_dir).unwrap_or_else(|_| unreachable!());
    let conn = rusqlite::Connection::open(db_dir.join("shop.sqlite"))
        .unwrap_or_else(|_| unreachable!());
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER);
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             user_id INTEGER REFERENCES users(id),
             amount REAL
         );
         INSERT INTO users VALUES (1, 'ann', 31), (2, 'bob', NULL), (3, 'cid', 45);
         INSERT INTO orders VALUES (1, 1, 9.5), (2, 1, 20.0), (3, 3, 4.25);",
    )
    .unwrap_or_else(|_| unreachable!());
}

/// Model client that replays canned answers and records every request.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| (*r).to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let reply = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        reply
            .map(|content| Completion {
                content,
                prompt_tokens: 100,
                response_tokens: 20,
                finish_reason: Some("stop".to_string()),
            })
            .ok_or_else(|| AgentError::RetriesExhausted {
                attempts: 1,
                last: Box::new(AgentError::ApiRequest {
                    message: "no scripted reply".to_string(),
                    status: Some(500),
                }),
            })
    }
}

pub fn config() -> AgentConfig {
    AgentConfig::builder()
        .api_key("test-key")
        .model("scripted")
        .build()
        .unwrap_or_else(|_| unreachable!())
}

pub fn pool(root: &Path) -> Arc<dyn ConnectionPool> {
    let config = config();
    Arc::new(SqlitePool::new(
        root,
        config.pool_size,
        config.acquire_timeout,
        config.statement_timeout,
    ))
}

pub fn pipeline(root: &Path, model: Arc<ScriptedModel>) -> Pipeline {
    let pool = pool(root);
    let schemas: Arc<dyn SchemaStore> = Arc::new(SqliteSchemaStore::new(Arc::clone(&pool)));
    Pipeline {
        client: model,
        pool,
        schemas,
        prompts: PromptSet::defaults(),
    }
}
