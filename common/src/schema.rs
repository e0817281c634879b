//! Carga de documentos crudos (JSON) hacia los registros tipados.
//!
//! Los documentos guardados por versiones anteriores del editor no tienen
//! forma garantizada: acá se rechaza lo que no se puede interpretar y se
//! marcan (warnings) las inconsistencias que sí se pueden guardar.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::job::{stage_key, Job, QualityEntry, StageEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    /// Ruta del campo con problemas, ej: "stage_log.W1_s2.start"
    pub path: String,
    pub message: String,
}

impl SchemaError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl std::error::Error for SchemaError {}

#[derive(Debug, Clone)]
pub struct LoadedJob {
    pub job: Job,
    /// Inconsistencias toleradas (se guardan igual, pero se avisan)
    pub warnings: Vec<String>,
}

/// Interpreta el documento `doc` del job `id`.
pub fn load_job(id: &str, doc: Value) -> Result<LoadedJob, SchemaError> {
    let obj = match doc {
        Value::Object(map) => map,
        other => {
            return Err(SchemaError::new(
                "",
                format!("se esperaba un objeto, llegó {}", kind(&other)),
            ))
        }
    };

    let mut warnings = Vec::new();

    let operator = required_string(&obj, "operator")?;
    let pad = required_string(&obj, "pad")?;
    let wells = parse_wells(&obj)?;

    let stage_log = match obj.get("stage_log") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(v) => parse_stage_log(v, &wells, &mut warnings)?,
    };

    let quality = match obj.get("quality") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(v) => parse_quality(v, &wells, &mut warnings)?,
    };

    let version = match obj.get("version") {
        None | Some(Value::Null) => 0,
        Some(v) => whole_number(v).ok_or_else(|| {
            SchemaError::new("version", "se esperaba un entero no negativo")
        })?,
    };

    for w in &warnings {
        warn!("job {}: {}", id, w);
    }

    Ok(LoadedJob {
        job: Job {
            operator,
            pad,
            wells,
            stage_log,
            quality,
            version,
        },
        warnings,
    })
}

fn parse_wells(obj: &Map<String, Value>) -> Result<BTreeMap<String, u32>, SchemaError> {
    let raw = obj
        .get("wells")
        .and_then(Value::as_object)
        .ok_or_else(|| SchemaError::new("wells", "falta el mapa de pozos"))?;

    let mut wells = BTreeMap::new();
    for (name, total) in raw {
        let path = format!("wells.{}", name);
        let total = whole_number(total)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| SchemaError::new(path, "la cantidad de stages debe ser un entero >= 1"))?;
        wells.insert(name.clone(), total);
    }
    Ok(wells)
}

fn parse_stage_log(
    value: &Value,
    wells: &BTreeMap<String, u32>,
    warnings: &mut Vec<String>,
) -> Result<BTreeMap<String, StageEntry>, SchemaError> {
    let raw = value
        .as_object()
        .ok_or_else(|| SchemaError::new("stage_log", "se esperaba un objeto"))?;

    let mut log = BTreeMap::new();
    for (key, entry) in raw {
        let base = format!("stage_log.{}", key);
        let e = entry
            .as_object()
            .ok_or_else(|| SchemaError::new(base.as_str(), "se esperaba un objeto"))?;

        let well = e
            .get("well")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::new(format!("{}.well", base), "falta el pozo"))?
            .to_string();
        let stage = e
            .get("stage")
            .and_then(whole_number)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| SchemaError::new(format!("{}.stage", base), "se esperaba un entero no negativo"))?;
        let start = timestamp(e.get("start"), &format!("{}.start", base))?;
        let end = timestamp(e.get("end"), &format!("{}.end", base))?;

        let duration_hr = match e.get("duration_hr").and_then(Value::as_f64) {
            Some(d) => d,
            None => {
                warnings.push(format!("{}: sin duration_hr, se recalcula", base));
                (end - start).num_seconds() as f64 / 3600.0
            }
        };

        if *key != stage_key(&well, stage) {
            warnings.push(format!(
                "{}: la clave no coincide con well={} stage={}",
                base, well, stage
            ));
        }
        match wells.get(&well) {
            None => warnings.push(format!("{}: pozo desconocido '{}'", base, well)),
            Some(total) if stage < 1 || stage > *total => warnings.push(format!(
                "{}: stage {} fuera de rango 1..={}",
                base, stage, total
            )),
            Some(_) => {}
        }
        if end < start {
            warnings.push(format!("{}: end anterior a start", base));
        }

        log.insert(
            key.clone(),
            StageEntry {
                well,
                stage,
                start,
                end,
                duration_hr,
            },
        );
    }
    Ok(log)
}

fn parse_quality(
    value: &Value,
    wells: &BTreeMap<String, u32>,
    warnings: &mut Vec<String>,
) -> Result<BTreeMap<String, BTreeMap<String, QualityEntry>>, SchemaError> {
    let raw = value
        .as_object()
        .ok_or_else(|| SchemaError::new("quality", "se esperaba un objeto"))?;

    let mut quality = BTreeMap::new();
    for (well, stages) in raw {
        let base = format!("quality.{}", well);
        let stages = stages
            .as_object()
            .ok_or_else(|| SchemaError::new(base.as_str(), "se esperaba un objeto"))?;

        if !wells.contains_key(well) {
            warnings.push(format!("{}: pozo desconocido", base));
        }

        let mut per_stage = BTreeMap::new();
        for (stage, entry) in stages {
            let path = format!("{}.{}", base, stage);
            let e = entry
                .as_object()
                .ok_or_else(|| SchemaError::new(path, "se esperaba un objeto"))?;
            per_stage.insert(
                stage.clone(),
                QualityEntry {
                    pre_sand: text(e.get("pre_sand")),
                    post_sand: text(e.get("post_sand")),
                    spp: text(e.get("spp")),
                    comment: text(e.get("comment")),
                },
            );
        }
        quality.insert(well.clone(), per_stage);
    }
    Ok(quality)
}

fn required_string(obj: &Map<String, Value>, key: &str) -> Result<String, SchemaError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SchemaError::new(key, "se esperaba texto"))
}

/// Enteros, o floats sin parte decimal (3.0), como los que deja un number_input.
fn whole_number(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    let f = v.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

fn timestamp(v: Option<&Value>, path: &str) -> Result<NaiveDateTime, SchemaError> {
    let s = v
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::new(path, "falta el timestamp"))?;
    parse_timestamp(s).ok_or_else(|| SchemaError::new(path, format!("timestamp inválido: {}", s)))
}

/// ISO-8601 sin zona ("2024-03-01T08:00:00"), con espacio en vez de 'T',
/// o RFC 3339 con offset (se normaliza a UTC).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    s.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

fn text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "número",
        Value::String(_) => "texto",
        Value::Array(_) => "lista",
        Value::Object(_) => "objeto",
    }
}
