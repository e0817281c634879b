// server/src/state.rs

use common::{Editor, JobStore, Viewer, WritePolicy};
use std::sync::Arc;

/// Estado compartido por los handlers: editor y viewer sobre el mismo store.
#[derive(Clone)]
pub struct AppState {
    pub editor: Arc<Editor>,
    pub viewer: Arc<Viewer>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, policy: WritePolicy) -> Self {
        Self {
            editor: Arc::new(Editor::new(store.clone(), policy)),
            viewer: Arc::new(Viewer::new(store)),
        }
    }
}
