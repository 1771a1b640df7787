//! Shared state for API handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::downloader::NovelDownloader;

/// State handed to every API handler
#[derive(Clone)]
pub struct AppState {
    /// Pipeline handle
    pub downloader: NovelDownloader,
    /// Server configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Bundle the pipeline and configuration for the router
    pub fn new(downloader: NovelDownloader, config: Arc<Config>) -> Self {
        Self { downloader, config }
    }
}
