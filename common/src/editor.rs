use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::job::{validate_job_id, InvalidJobId, Job, JobId, QualityEntry, StageEntry, WellName};
use crate::store::{JobStore, StoreError};

/// Cómo se guarda el documento en los ciclos leer-modificar-escribir.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// El último que guarda gana (comportamiento histórico).
    #[default]
    LastWriteWins,
    /// Falla con conflicto si alguien guardó entre la lectura y la escritura.
    CheckVersion,
}

/// Una fila del formulario de pozos: nombre + cantidad de stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellSpec {
    pub name: WellName,
    pub stages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub job_id: JobId,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub pad: String,
    pub wells: Vec<WellSpec>,

    /// Reemplazar un job existente con el mismo id.
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimingRequest {
    pub well: WellName,
    pub stage: u32,
    pub date: NaiveDate,
    /// "HH:MM" o "HH:MM:SS"
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRequest {
    pub well: WellName,
    pub stage: u32,
    #[serde(default)]
    pub pre_sand: String,
    #[serde(default)]
    pub post_sand: String,
    #[serde(default)]
    pub spp: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug)]
pub enum EditorError {
    InvalidJobId(InvalidJobId),
    Validation(String),
    AlreadyExists(JobId),
    UnknownWell { job_id: JobId, well: WellName },
    Store(StoreError),
}

impl fmt::Display for EditorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJobId(e) => write!(f, "{}", e),
            Self::Validation(msg) => write!(f, "datos inválidos: {}", msg),
            Self::AlreadyExists(id) => write!(
                f,
                "ya existe el job {} (usar overwrite para reemplazarlo)",
                id
            ),
            Self::UnknownWell { job_id, well } => {
                write!(f, "el job {} no tiene el pozo {}", job_id, well)
            }
            Self::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EditorError {}

impl From<StoreError> for EditorError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<InvalidJobId> for EditorError {
    fn from(value: InvalidJobId) -> Self {
        Self::InvalidJobId(value)
    }
}

/// "HH:MM" o "HH:MM:SS", como lo entrega un selector de hora.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, EditorError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| EditorError::Validation(format!("hora inválida: {:?}", s)))
}

pub struct Editor {
    store: Arc<dyn JobStore>,
    policy: WritePolicy,
}

impl Editor {
    pub fn new(store: Arc<dyn JobStore>, policy: WritePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Crea un job vacío (sin stage_log ni quality).
    pub fn create_job(&self, req: CreateJobRequest) -> Result<Job, EditorError> {
        validate_job_id(&req.job_id)?;

        if req.wells.is_empty() {
            return Err(EditorError::Validation("el job necesita al menos un pozo".into()));
        }
        let mut wells = BTreeMap::new();
        for (i, spec) in req.wells.iter().enumerate() {
            let name = spec.name.trim();
            if name.is_empty() {
                return Err(EditorError::Validation(format!("el pozo {} no tiene nombre", i + 1)));
            }
            if spec.stages < 1 {
                return Err(EditorError::Validation(format!(
                    "el pozo {} debe tener al menos 1 stage",
                    name
                )));
            }
            if wells.insert(name.to_string(), spec.stages).is_some() {
                return Err(EditorError::Validation(format!("pozo repetido: {}", name)));
            }
        }

        let mut job = Job::new(req.operator, req.pad, wells);

        let version = if req.overwrite {
            if self.store.find_job(&req.job_id)?.is_some() {
                warn!("reemplazando job existente {}", req.job_id);
            }
            self.store.put_job(&req.job_id, &job)?
        } else {
            match self.store.find_job(&req.job_id) {
                Ok(Some(_)) | Err(StoreError::Malformed { .. }) => {
                    return Err(EditorError::AlreadyExists(req.job_id))
                }
                Ok(None) => {}
                Err(e) => return Err(e.into()),
            }
            // si otro lo creó entre medio, put_job_if(0) lo detecta
            self.store.put_job_if(&req.job_id, &job, 0)
                .map_err(|e| match e {
                    StoreError::Conflict { .. } => EditorError::AlreadyExists(req.job_id.clone()),
                    other => other.into(),
                })?
        };
        job.version = version;

        info!(
            "job {} creado ({} pozos, version={})",
            req.job_id,
            job.wells.len(),
            version
        );
        Ok(job)
    }

    /// Agrega (o reemplaza) el registro de tiempos de well+stage y guarda el job completo.
    pub fn add_stage_timing(&self, job_id: &str, req: StageTimingRequest) -> Result<Job, EditorError> {
        if req.stage < 1 {
            return Err(EditorError::Validation("el stage debe ser >= 1".into()));
        }
        let start = req.date.and_time(parse_time_of_day(&req.start_time)?);
        let end = req.date.and_time(parse_time_of_day(&req.end_time)?);

        let mut job = self.store.get_job(job_id)?;
        if !job.has_well(&req.well) {
            return Err(EditorError::UnknownWell {
                job_id: job_id.to_string(),
                well: req.well,
            });
        }

        let entry = StageEntry::new(req.well, req.stage, start, end);
        if entry.duration_hr < 0.0 {
            warn!(
                "job {}: {} termina antes de empezar ({} h), se guarda igual",
                job_id,
                entry.key(),
                entry.duration_hr
            );
        }
        let key = entry.key();
        if job.upsert_stage(entry).is_some() {
            info!("job {}: reemplazando entrada {}", job_id, key);
        }

        self.save(job_id, &mut job)?;
        info!("job {}: entrada KPI {} guardada", job_id, key);
        Ok(job)
    }

    /// Agrega (o reemplaza) quality[well][stage] y guarda el job completo.
    pub fn add_quality(&self, job_id: &str, req: QualityRequest) -> Result<Job, EditorError> {
        if req.stage < 1 {
            return Err(EditorError::Validation("el stage debe ser >= 1".into()));
        }

        let mut job = self.store.get_job(job_id)?;
        if !job.has_well(&req.well) {
            return Err(EditorError::UnknownWell {
                job_id: job_id.to_string(),
                well: req.well,
            });
        }

        let entry = QualityEntry {
            pre_sand: req.pre_sand,
            post_sand: req.post_sand,
            spp: req.spp,
            comment: req.comment,
        };
        job.upsert_quality(&req.well, req.stage, entry);

        self.save(job_id, &mut job)?;
        info!("job {}: calidad {} stage {} guardada", job_id, req.well, req.stage);
        Ok(job)
    }

    fn save(&self, job_id: &str, job: &mut Job) -> Result<(), EditorError> {
        let version = match self.policy {
            WritePolicy::LastWriteWins => self.store.put_job(job_id, job)?,
            WritePolicy::CheckVersion => self.store.put_job_if(job_id, job, job.version)?,
        };
        job.version = version;
        Ok(())
    }
}
