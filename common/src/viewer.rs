use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use crate::job::{stage_prefix, Job, JobId, QualityEntry, WellName};
use crate::store::{JobStore, StoreError};

/// Una fila de la tabla de progreso (alimenta el gráfico de barras).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellProgress {
    pub well: WellName,
    pub completed: usize,
    pub total: u32,
    /// completed / total * 100, redondeado a 2 decimales
    pub percent: f64,
    /// De las completadas, cuántas tienen stage fuera de 1..=total.
    /// Se informan pero NO se descuentan de `completed`.
    pub out_of_range: usize,
}

/// Una fila del gráfico de timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRow {
    pub well: WellName,
    pub stage: u32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_hr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QualityLookup {
    Found { well: WellName, stage: String, entry: QualityEntry },
    NoData { well: WellName, stage: String },
}

impl QualityLookup {
    pub fn entry(&self) -> Option<&QualityEntry> {
        match self {
            Self::Found { entry, .. } => Some(entry),
            Self::NoData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRow {
    pub well: WellName,
    pub stage: String,
    #[serde(flatten)]
    pub entry: QualityEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub operator: String,
    pub pad: String,
    pub wells: usize,
    pub total_stages: u64,
    pub logged_stages: usize,
    pub version: u64,
}

/// Redondeo a 2 decimales con empate al par, sobre el valor exacto del
/// float (mismo resultado que `round(x, 2)` de Python).
fn round2(x: f64) -> f64 {
    let y = x * 100.0;
    // y + err == x * 100 exacto
    let err = x.mul_add(100.0, -y);
    let floor = y.floor();
    let r = if y - floor == 0.5 {
        if err > 0.0 {
            floor + 1.0
        } else if err < 0.0 {
            floor
        } else if floor % 2.0 == 0.0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        y.round()
    };
    r / 100.0
}

/// Progreso por pozo.
///
/// "Completadas" = cantidad de claves de stage_log que empiezan con
/// "<well>_s". No se valida que el stage esté en rango ni que no haya
/// claves raras; eso se informa aparte en `out_of_range`.
pub fn well_progress(job: &Job) -> Vec<WellProgress> {
    job.wells
        .iter()
        .map(|(well, &total)| {
            let prefix = stage_prefix(well);
            let matching: Vec<_> = job
                .stage_log
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .collect();

            let completed = matching.len();
            let out_of_range = matching
                .iter()
                .filter(|(_, e)| e.stage < 1 || e.stage > total)
                .count();
            let percent = if total == 0 {
                0.0
            } else {
                round2(completed as f64 / total as f64 * 100.0)
            };

            WellProgress {
                well: well.clone(),
                completed,
                total,
                percent,
                out_of_range,
            }
        })
        .collect()
}

/// Todas las entradas de stage_log ordenadas por pozo, stage y hora de inicio.
pub fn timeline(job: &Job) -> Vec<TimelineRow> {
    let mut rows: Vec<TimelineRow> = job
        .stage_log
        .values()
        .map(|e| TimelineRow {
            well: e.well.clone(),
            stage: e.stage,
            start: e.start,
            end: e.end,
            duration_hr: e.duration_hr,
        })
        .collect();
    rows.sort_by(|a, b| {
        a.well
            .cmp(&b.well)
            .then(a.stage.cmp(&b.stage))
            .then(a.start.cmp(&b.start))
    });
    rows
}

/// Nunca falla: si falta el pozo o el stage devuelve `NoData`.
pub fn quality_lookup(job: &Job, well: &str, stage: &str) -> QualityLookup {
    match job.quality_entry(well, stage) {
        Some(entry) => QualityLookup::Found {
            well: well.to_string(),
            stage: stage.to_string(),
            entry: entry.clone(),
        },
        None => QualityLookup::NoData {
            well: well.to_string(),
            stage: stage.to_string(),
        },
    }
}

/// Orden de stages: numérico si se puede, si no alfabético al final.
fn stage_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Stages de un pozo que tienen datos de calidad (vacío si no hay).
pub fn quality_stages(job: &Job, well: &str) -> Vec<String> {
    let mut stages: Vec<String> = job
        .quality
        .get(well)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    stages.sort_by(|a, b| stage_order(a, b));
    stages
}

pub fn quality_report(job: &Job) -> Vec<QualityRow> {
    let mut rows = Vec::new();
    for (well, stages) in &job.quality {
        let mut keys: Vec<&String> = stages.keys().collect();
        keys.sort_by(|a, b| stage_order(a, b));
        for stage in keys {
            rows.push(QualityRow {
                well: well.clone(),
                stage: stage.clone(),
                entry: stages[stage].clone(),
            });
        }
    }
    rows
}

pub fn job_summaries(jobs: &BTreeMap<JobId, Job>) -> Vec<JobSummary> {
    jobs.iter()
        .map(|(id, job)| JobSummary {
            id: id.clone(),
            operator: job.operator.clone(),
            pad: job.pad.clone(),
            wells: job.wells.len(),
            total_stages: job.wells.values().map(|&n| n as u64).sum(),
            logged_stages: job.stage_log.len(),
            version: job.version,
        })
        .collect()
}

/// Tabla de progreso en CSV: Well,Completed Stages,Total Stages,Progress (%)
pub fn write_progress_csv<W: Write>(rows: &[WellProgress], out: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["Well", "Completed Stages", "Total Stages", "Progress (%)"])?;
    for r in rows {
        wtr.write_record([
            r.well.clone(),
            r.completed.to_string(),
            r.total.to_string(),
            format!("{:.2}", r.percent),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Acceso de sólo lectura a los jobs, para las vistas.
pub struct Viewer {
    store: Arc<dyn JobStore>,
}

impl Viewer {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Puede venir de un cache: lo recién guardado por otro usuario tarda
    /// hasta el TTL en aparecer.
    pub fn jobs(&self) -> Result<Vec<JobSummary>, StoreError> {
        Ok(job_summaries(&self.store.list_jobs()?))
    }

    pub fn job(&self, id: &str) -> Result<Job, StoreError> {
        self.store.get_job(id)
    }

    pub fn progress(&self, id: &str) -> Result<Vec<WellProgress>, StoreError> {
        Ok(well_progress(&self.store.get_job(id)?))
    }

    pub fn timeline(&self, id: &str) -> Result<Vec<TimelineRow>, StoreError> {
        Ok(timeline(&self.store.get_job(id)?))
    }

    pub fn quality(&self, id: &str) -> Result<Vec<QualityRow>, StoreError> {
        Ok(quality_report(&self.store.get_job(id)?))
    }

    /// Job inexistente (o id que ningún job puede tener) también degrada a
    /// `NoData`. Los errores del backend sí se propagan.
    pub fn quality_lookup(&self, id: &str, well: &str, stage: &str) -> Result<QualityLookup, StoreError> {
        match self.store.find_job(id) {
            Ok(Some(job)) => Ok(quality_lookup(&job, well, stage)),
            Ok(None) | Err(StoreError::InvalidId(_)) => Ok(QualityLookup::NoData {
                well: well.to_string(),
                stage: stage.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}
