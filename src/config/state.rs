// Application state module
// Everything a request handler may touch, built once at startup

use std::path::Path;

use super::types::Config;
use crate::error::WikiError;
use crate::page::TitleValidator;
use crate::render::Renderer;
use crate::store::PageStore;

/// Application state
///
/// Read-only after construction and shared between connections behind an
/// `Arc`. The page store is the only component with durable side effects.
pub struct AppState {
    pub config: Config,
    pub store: PageStore,
    pub renderer: Renderer,
    pub validator: TitleValidator,
}

impl AppState {
    /// Open the data directory and compile templates and the path pattern
    pub fn new(config: Config) -> Result<Self, WikiError> {
        let store = PageStore::open(&config.storage.data_dir)?;
        let renderer = Renderer::new(Path::new(&config.templates.dir), config.templates.builtin)?;
        let validator = TitleValidator::new()?;

        Ok(Self {
            config,
            store,
            renderer,
            validator,
        })
    }
}
