pub mod cache;
pub mod config;
pub mod editor;
pub mod job;
pub mod schema;
pub mod store;
pub mod viewer;

pub use cache::CachedJobStore;
pub use config::{StoreBackend, StoreConfig};
pub use editor::{
    CreateJobRequest, Editor, EditorError, QualityRequest, StageTimingRequest, WellSpec,
    WritePolicy,
};
pub use job::{stage_key, Job, JobId, QualityEntry, StageEntry, WellName};
pub use store::{DocumentStore, ExportStore, JobStore, MemoryStore, StoreError};
pub use viewer::{
    JobSummary, QualityLookup, QualityRow, TimelineRow, Viewer, WellProgress,
};

/* --------- respuestas de la API --------- */

use serde::{Deserialize, Serialize};

/// Cuerpo de error de la API: `code` estable + mensaje para mostrar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

/// Confirmación de guardado: qué job y con qué versión quedó.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub job_id: JobId,
    pub version: u64,
    pub job: Job,
}
