use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type JobId = String;
pub type WellName = String;

/// Clave compuesta de una entrada de stage_log: "<well>_s<stage>".
pub fn stage_key(well: &str, stage: u32) -> String {
    format!("{}_s{}", well, stage)
}

/// Prefijo usado para contar stages de un pozo ("<well>_s").
pub fn stage_prefix(well: &str) -> String {
    format!("{}_s", well)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidJobId {
    Empty,
    ReservedName,
    ForbiddenChar(char),
}

impl fmt::Display for InvalidJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "job id vacío"),
            Self::ReservedName => write!(f, "job id reservado ('.' o '..')"),
            Self::ForbiddenChar(c) => write!(f, "job id contiene un caracter no permitido: {:?}", c),
        }
    }
}

impl std::error::Error for InvalidJobId {}

/// Mismas restricciones que pone una base documental a los ids de documento.
pub fn validate_job_id(id: &str) -> Result<(), InvalidJobId> {
    if id.trim().is_empty() {
        return Err(InvalidJobId::Empty);
    }
    if id == "." || id == ".." {
        return Err(InvalidJobId::ReservedName);
    }
    if let Some(c) = id.chars().find(|c| *c == '/' || *c == '\\' || c.is_control()) {
        return Err(InvalidJobId::ForbiddenChar(c));
    }
    Ok(())
}

/// Un registro de tiempos (KPI) de un stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub well: WellName,
    pub stage: u32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,

    /// Se guarda redundante al crear la entrada; no se recalcula al leer.
    pub duration_hr: f64,
}

impl StageEntry {
    /// Construye la entrada calculando duration_hr = (end - start) en horas.
    /// Una duración negativa se acepta tal cual.
    pub fn new(well: impl Into<WellName>, stage: u32, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let duration_hr = (end - start).num_seconds() as f64 / 3600.0;
        Self {
            well: well.into(),
            stage,
            start,
            end,
            duration_hr,
        }
    }

    pub fn key(&self) -> String {
        stage_key(&self.well, self.stage)
    }
}

/// Anotación de calidad para un pozo + stage. Todos los campos son texto libre.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityEntry {
    #[serde(default)]
    pub pre_sand: String,
    #[serde(default)]
    pub post_sand: String,
    #[serde(default)]
    pub spp: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub operator: String,
    pub pad: String,

    /// pozo -> cantidad total de stages (>= 1)
    pub wells: BTreeMap<WellName, u32>,

    /// "<well>_s<stage>" -> entrada de tiempos
    #[serde(default)]
    pub stage_log: BTreeMap<String, StageEntry>,

    /// pozo -> (stage como texto -> entrada de calidad)
    #[serde(default)]
    pub quality: BTreeMap<WellName, BTreeMap<String, QualityEntry>>,

    /// Versión monotónica; cada put exitoso guarda la anterior + 1.
    #[serde(default)]
    pub version: u64,
}

impl Job {
    /// Job recién creado: sin stage_log ni quality.
    pub fn new(operator: impl Into<String>, pad: impl Into<String>, wells: BTreeMap<WellName, u32>) -> Self {
        Self {
            operator: operator.into(),
            pad: pad.into(),
            wells,
            stage_log: BTreeMap::new(),
            quality: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn has_well(&self, well: &str) -> bool {
        self.wells.contains_key(well)
    }

    /// Inserta (o reemplaza) la entrada bajo su clave compuesta.
    /// Devuelve la entrada anterior si existía.
    pub fn upsert_stage(&mut self, entry: StageEntry) -> Option<StageEntry> {
        self.stage_log.insert(entry.key(), entry)
    }

    /// Inserta en quality[well][stage], creando el mapa intermedio si falta.
    pub fn upsert_quality(&mut self, well: &str, stage: u32, entry: QualityEntry) -> Option<QualityEntry> {
        self.quality
            .entry(well.to_string())
            .or_default()
            .insert(stage.to_string(), entry)
    }

    pub fn quality_entry(&self, well: &str, stage: &str) -> Option<&QualityEntry> {
        self.quality.get(well).and_then(|stages| stages.get(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn stage_key_usa_formato_compuesto() {
        assert_eq!(stage_key("A", 3), "A_s3");
        assert_eq!(stage_prefix("Well 1"), "Well 1_s");
    }

    #[test]
    fn duration_se_calcula_en_horas() {
        let e = StageEntry::new("W1", 1, at(1, 0), at(2, 30));
        assert_eq!(e.duration_hr, 1.5);

        // end < start no se rechaza
        let neg = StageEntry::new("W1", 2, at(3, 0), at(2, 0));
        assert_eq!(neg.duration_hr, -1.0);
    }

    #[test]
    fn upsert_quality_no_pisa_otros_pozos() {
        let mut job = Job::new("op", "pad", BTreeMap::from([("A".to_string(), 2), ("B".to_string(), 2)]));
        job.upsert_quality("A", 1, QualityEntry { comment: "a1".into(), ..Default::default() });
        job.upsert_quality("B", 1, QualityEntry { comment: "b1".into(), ..Default::default() });
        job.upsert_quality("A", 2, QualityEntry { comment: "a2".into(), ..Default::default() });

        assert_eq!(job.quality_entry("A", "1").unwrap().comment, "a1");
        assert_eq!(job.quality_entry("A", "2").unwrap().comment, "a2");
        assert_eq!(job.quality_entry("B", "1").unwrap().comment, "b1");
        assert!(job.quality_entry("C", "1").is_none());
    }

    #[test]
    fn validate_job_id_rechaza_ids_invalidos() {
        assert!(validate_job_id("J1").is_ok());
        assert_eq!(validate_job_id("  "), Err(InvalidJobId::Empty));
        assert_eq!(validate_job_id(".."), Err(InvalidJobId::ReservedName));
        assert_eq!(validate_job_id("a/b"), Err(InvalidJobId::ForbiddenChar('/')));
    }
}
