use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use common::{
    ApiError, CreateJobRequest, EditorError, Job, JobSummary, QualityLookup, QualityRequest,
    QualityRow, SaveResponse, StageTimingRequest, StoreError, TimelineRow, WellProgress,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", get(list_jobs).post(create_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/stages", axum::routing::post(add_stage))
        .route("/api/v1/jobs/:id/quality", get(get_quality).post(add_quality))
        .route("/api/v1/jobs/:id/quality/:well/:stage", get(lookup_quality))
        .route("/api/v1/jobs/:id/progress", get(get_progress))
        .route("/api/v1/jobs/:id/timeline", get(get_timeline))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- errores ---------------- */

/// Error visible para el usuario: status HTTP + cuerpo `ApiError`.
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    body: ApiError,
}

impl Failure {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiError {
                error: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidId(_) => StatusCode::BAD_REQUEST,
            StoreError::Malformed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::Conflict { .. } => StatusCode::CONFLICT,
            StoreError::ReadOnly => StatusCode::FORBIDDEN,
            StoreError::Unavailable(_) | StoreError::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            warn!("error del store: {}", e);
        }
        Failure::new(status, e.code(), e.to_string())
    }
}

impl From<EditorError> for Failure {
    fn from(e: EditorError) -> Self {
        let message = e.to_string();
        match e {
            EditorError::Store(inner) => inner.into(),
            EditorError::InvalidJobId(_) => {
                Failure::new(StatusCode::BAD_REQUEST, "invalid_job_id", message)
            }
            EditorError::Validation(_) => {
                Failure::new(StatusCode::BAD_REQUEST, "validation_error", message)
            }
            EditorError::AlreadyExists(_) => {
                Failure::new(StatusCode::CONFLICT, "already_exists", message)
            }
            EditorError::UnknownWell { .. } => {
                Failure::new(StatusCode::NOT_FOUND, "unknown_well", message)
            }
        }
    }
}

fn saved(job_id: &str, job: Job) -> Json<SaveResponse> {
    Json(SaveResponse {
        job_id: job_id.to_string(),
        version: job.version,
        job,
    })
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Listado (puede venir del cache, hasta KPI_CACHE_TTL_SECS de atraso)
async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobSummary>>, Failure> {
    Ok(Json(state.viewer.jobs()?))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, Failure> {
    Ok(Json(state.viewer.job(&id)?))
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<SaveResponse>), Failure> {
    let job_id = req.job_id.clone();
    let job = state.editor.create_job(req)?;
    info!("POST jobs -> {} creado", job_id);
    Ok((StatusCode::CREATED, saved(&job_id, job)))
}

async fn add_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StageTimingRequest>,
) -> Result<Json<SaveResponse>, Failure> {
    let job = state.editor.add_stage_timing(&id, req)?;
    Ok(saved(&id, job))
}

async fn add_quality(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<QualityRequest>,
) -> Result<Json<SaveResponse>, Failure> {
    let job = state.editor.add_quality(&id, req)?;
    Ok(saved(&id, job))
}

async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WellProgress>>, Failure> {
    Ok(Json(state.viewer.progress(&id)?))
}

async fn get_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TimelineRow>>, Failure> {
    Ok(Json(state.viewer.timeline(&id)?))
}

async fn get_quality(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<QualityRow>>, Failure> {
    Ok(Json(state.viewer.quality(&id)?))
}

// Sin datos -> 200 con {"status": "no_data"}, nunca 404
async fn lookup_quality(
    State(state): State<AppState>,
    Path((id, well, stage)): Path<(String, String, String)>,
) -> Result<Json<QualityLookup>, Failure> {
    Ok(Json(state.viewer.quality_lookup(&id, &well, &stage)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use common::{DocumentStore, ExportStore, JobStore, MemoryStore, WritePolicy};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
        build_router(AppState::new(store, WritePolicy::LastWriteWins))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, value)
    }

    fn create_body(id: &str, wells: Value) -> Value {
        json!({"job_id": id, "operator": "Acme", "pad": "Pad 1", "wells": wells})
    }

    fn stage_body(well: &str, stage: u32, start: &str, end: &str) -> Value {
        json!({"well": well, "stage": stage, "date": "2024-03-01", "start_time": start, "end_time": end})
    }

    #[tokio::test]
    async fn health_ok() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".into()));
    }

    #[tokio::test]
    async fn flujo_completo_crear_cargar_y_ver_progreso() {
        let app = app();

        let (status, body) = call(&app, Method::POST, "/api/v1/jobs", Some(create_body("J1", json!([{"name": "W1", "stages": 2}])))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["version"], 1);
        assert_eq!(body["job"]["stage_log"], json!({}));

        for (n, s, e) in [(1, "00:00", "01:00"), (2, "01:00", "01:30")] {
            let (status, _) = call(&app, Method::POST, "/api/v1/jobs/J1/stages", Some(stage_body("W1", n, s, e))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, progress) = call(&app, Method::GET, "/api/v1/jobs/J1/progress", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(progress[0]["well"], "W1");
        assert_eq!(progress[0]["percent"], 100.0);

        let (_, timeline) = call(&app, Method::GET, "/api/v1/jobs/J1/timeline", None).await;
        assert_eq!(timeline.as_array().unwrap().len(), 2);
        assert_eq!(timeline[0]["start"], "2024-03-01T00:00:00");

        let (_, jobs) = call(&app, Method::GET, "/api/v1/jobs", None).await;
        assert_eq!(jobs[0]["id"], "J1");
        assert_eq!(jobs[0]["logged_stages"], 2);
    }

    #[tokio::test]
    async fn crear_duplicado_da_409_salvo_overwrite() {
        let app = app();
        let body = create_body("J1", json!([{"name": "W1", "stages": 2}]));
        call(&app, Method::POST, "/api/v1/jobs", Some(body.clone())).await;

        let (status, err) = call(&app, Method::POST, "/api/v1/jobs", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"], "already_exists");

        let mut overwrite = body;
        overwrite["overwrite"] = json!(true);
        let (status, _) = call(&app, Method::POST, "/api/v1/jobs", Some(overwrite)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn errores_visibles_para_el_usuario() {
        let app = app();
        call(&app, Method::POST, "/api/v1/jobs", Some(create_body("J1", json!([{"name": "W1", "stages": 2}])))).await;

        let (status, err) = call(&app, Method::GET, "/api/v1/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "not_found");

        let (status, err) = call(&app, Method::POST, "/api/v1/jobs/J1/stages", Some(stage_body("W7", 1, "00:00", "01:00"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "unknown_well");

        let (status, err) = call(&app, Method::POST, "/api/v1/jobs", Some(create_body("J2", json!([{"name": "W1", "stages": 0}])))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "validation_error");
    }

    #[tokio::test]
    async fn quality_lookup_sin_datos_devuelve_no_data() {
        let app = app();
        call(&app, Method::POST, "/api/v1/jobs", Some(create_body("J1", json!([{"name": "W1", "stages": 4}])))).await;

        let q = json!({"well": "W1", "stage": 2, "pre_sand": "100", "post_sand": "99", "spp": "7000", "comment": "ok"});
        let (status, _) = call(&app, Method::POST, "/api/v1/jobs/J1/quality", Some(q)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, found) = call(&app, Method::GET, "/api/v1/jobs/J1/quality/W1/2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["status"], "found");
        assert_eq!(found["entry"]["spp"], "7000");

        for uri in ["/api/v1/jobs/J1/quality/W1/3", "/api/v1/jobs/J1/quality/W9/1", "/api/v1/jobs/J9/quality/W1/1"] {
            let (status, body) = call(&app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(body["status"], "no_data", "{}", uri);
        }

        let (_, all) = call(&app, Method::GET, "/api/v1/jobs/J1/quality", None).await;
        assert_eq!(all[0]["stage"], "2");
        assert_eq!(all[0]["comment"], "ok");
    }

    #[tokio::test]
    async fn quality_lookup_con_id_invalido_devuelve_no_data() {
        let dir = std::env::temp_dir().join("server_handler_tests").join("invalid_id");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let store: Arc<dyn JobStore> = Arc::new(DocumentStore::open(&dir).unwrap());
        let app = build_router(AppState::new(store, WritePolicy::LastWriteWins));

        let (status, body) = call(&app, Method::GET, "/api/v1/jobs/a%2Fb/quality/W1/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no_data");

        let (status, err) = call(&app, Method::GET, "/api/v1/jobs/a%2Fb", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "invalid_job_id");
    }

    #[tokio::test]
    async fn export_de_solo_lectura_rechaza_escrituras() {
        let export = ExportStore::from_value(json!({
            "jobs": {"J1": {"operator": "a", "pad": "b", "wells": {"W1": 4}}}
        }))
        .unwrap();
        let store: Arc<dyn JobStore> = Arc::new(export);
        let app = build_router(AppState::new(store, WritePolicy::LastWriteWins));

        let (status, _) = call(&app, Method::GET, "/api/v1/jobs/J1/progress", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, err) = call(&app, Method::POST, "/api/v1/jobs/J1/stages", Some(stage_body("W1", 1, "00:00", "01:00"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["error"], "read_only");
    }
}
