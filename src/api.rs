//! Push-socket server
//!
//! Serves the browser client and one websocket per chat session.

mod handlers;
mod types;
mod ws;

pub use handlers::create_router;

use crate::config::ChatConfig;
use crate::llm::ChatTransport;
use std::path::PathBuf;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<dyn ChatTransport>,
    /// MCP server scripts each connection spawns
    pub servers: Arc<Vec<PathBuf>>,
    pub static_dir: PathBuf,
    pub index_file: PathBuf,
}

impl AppState {
    pub fn new(config: &ChatConfig, transport: Arc<dyn ChatTransport>, servers: Vec<PathBuf>) -> Self {
        Self {
            transport,
            servers: Arc::new(servers),
            static_dir: config.static_dir.clone(),
            index_file: config.index_file.clone(),
        }
    }
}
