//! Local hub for chat-transcript history: discovers JSONL session files,
//! derives their titles, status and chains, and streams live updates.

pub mod config;
pub mod error;
pub mod live;
pub mod routes;
pub mod session;
pub mod transcript;

use crate::config::Config;
use crate::live::Distributor;
use crate::session::SessionDirectory;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub directory: SessionDirectory,
    pub distributor: Distributor,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            directory: SessionDirectory::new(&config.projects_dir)
                .with_thresholds(config.thresholds),
            distributor: Distributor::new(config.thresholds),
        }
    }
}
