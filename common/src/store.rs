//! Almacenamiento de documentos Job, indexados por id.
//!
//! Todas las escrituras reemplazan el documento completo. `put_job` es
//! last-write-wins; `put_job_if` sólo escribe si la versión guardada es la
//! que el llamador leyó.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::job::{validate_job_id, InvalidJobId, Job, JobId};
use crate::schema::{load_job, SchemaError};

#[derive(Debug)]
pub enum StoreError {
    /// Backend caído o inaccesible (reintentar)
    Unavailable(String),
    InvalidId(InvalidJobId),
    NotFound(JobId),
    Malformed { id: JobId, error: SchemaError },
    Conflict { id: JobId, expected: u64, actual: u64 },
    ReadOnly,
    Io(io::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "store_unavailable",
            Self::InvalidId(_) => "invalid_job_id",
            Self::NotFound(_) => "not_found",
            Self::Malformed { .. } => "malformed_document",
            Self::Conflict { .. } => "conflict",
            Self::ReadOnly => "read_only",
            Self::Io(_) => "io_error",
        }
    }

    /// Errores que vale la pena reintentar desde la UI.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_) | Self::Conflict { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "store no disponible: {}", msg),
            Self::InvalidId(err) => write!(f, "{}", err),
            Self::NotFound(id) => write!(f, "no existe el job {}", id),
            Self::Malformed { id, error } => write!(f, "documento del job {} malformado: {}", id, error),
            Self::Conflict { id, expected, actual } => write!(
                f,
                "conflicto de versión en job {} (esperada={}, actual={})",
                id, expected, actual
            ),
            Self::ReadOnly => write!(f, "el store es de sólo lectura"),
            Self::Io(err) => write!(f, "io: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<InvalidJobId> for StoreError {
    fn from(value: InvalidJobId) -> Self {
        Self::InvalidId(value)
    }
}

pub trait JobStore: Send + Sync {
    /// Todos los jobs guardados. Un store vacío devuelve un mapa vacío.
    fn list_jobs(&self) -> Result<BTreeMap<JobId, Job>, StoreError>;

    fn get_job(&self, id: &str) -> Result<Job, StoreError>;

    /// Crea o reemplaza el documento completo. Devuelve la versión guardada.
    fn put_job(&self, id: &str, job: &Job) -> Result<u64, StoreError>;

    /// Igual que `put_job`, pero falla con `Conflict` si la versión guardada
    /// no es `expected_version` (0 = el documento no existe).
    fn put_job_if(&self, id: &str, job: &Job, expected_version: u64) -> Result<u64, StoreError>;

    fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        match self.get_job(id) {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/* ---------------- store en memoria ---------------- */

#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<JobId, Job>>, StoreError> {
        self.jobs
            .lock()
            .map_err(|_| StoreError::Unavailable("lock jobs".to_string()))
    }
}

impl JobStore for MemoryStore {
    fn list_jobs(&self) -> Result<BTreeMap<JobId, Job>, StoreError> {
        let jobs = self.lock()?;
        Ok(jobs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        let jobs = self.lock()?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn put_job(&self, id: &str, job: &Job) -> Result<u64, StoreError> {
        validate_job_id(id)?;
        let mut jobs = self.lock()?;
        let next = jobs.get(id).map(|j| j.version).unwrap_or(0) + 1;
        let mut stored = job.clone();
        stored.version = next;
        jobs.insert(id.to_string(), stored);
        Ok(next)
    }

    fn put_job_if(&self, id: &str, job: &Job, expected_version: u64) -> Result<u64, StoreError> {
        validate_job_id(id)?;
        let mut jobs = self.lock()?;
        let actual = jobs.get(id).map(|j| j.version).unwrap_or(0);
        if actual != expected_version {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected: expected_version,
                actual,
            });
        }
        let mut stored = job.clone();
        stored.version = actual + 1;
        jobs.insert(id.to_string(), stored);
        Ok(actual + 1)
    }
}

/* ---------------- colección de documentos en disco ---------------- */

pub const JOBS_COLLECTION: &str = "jobs";

/// Un documento JSON por job en `<root>/jobs/<id>.json`.
pub struct DocumentStore {
    dir: PathBuf,
    // serializa read-modify-write dentro del proceso
    write_lock: Mutex<()>,
}

impl DocumentStore {
    /// Falla de inmediato si la raíz no existe o no se puede crear la colección.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "no existe el directorio {}",
                root.display()
            )));
        }
        let dir = root.join(JOBS_COLLECTION);
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Unavailable(format!("no se pudo crear {}: {}", dir.display(), e))
        })?;
        info!("document store abierto en {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn doc_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read_doc(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let path = self.doc_path(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
            id: id.to_string(),
            error: SchemaError {
                path: String::new(),
                message: format!("json inválido: {}", e),
            },
        })?;
        let loaded = load_job(id, value).map_err(|error| StoreError::Malformed {
            id: id.to_string(),
            error,
        })?;
        Ok(Some(loaded.job))
    }

    fn write_doc(&self, id: &str, job: &Job) -> Result<(), StoreError> {
        let path = self.doc_path(id);
        // escribir a un temporal y renombrar: nunca queda un documento a medias
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(job)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!("job {} guardado (version={})", id, job.version);
        Ok(())
    }

    fn put_checked(&self, id: &str, job: &Job, expected: Option<u64>) -> Result<u64, StoreError> {
        validate_job_id(id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("lock escritura".to_string()))?;

        let actual = match self.read_doc(id) {
            Ok(current) => current.map(|j| j.version).unwrap_or(0),
            // un documento roto se puede reemplazar con put_job, no con put_job_if
            Err(StoreError::Malformed { .. }) if expected.is_none() => 0,
            Err(e) => return Err(e),
        };
        if let Some(expected) = expected {
            if expected != actual {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected,
                    actual,
                });
            }
        }

        let mut stored = job.clone();
        stored.version = actual + 1;
        self.write_doc(id, &stored)?;
        Ok(stored.version)
    }
}

impl JobStore for DocumentStore {
    fn list_jobs(&self) -> Result<BTreeMap<JobId, Job>, StoreError> {
        let mut jobs = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // los temporales terminan en .tmp; ids como ".J1" son válidos
            let Some(id) = name.strip_suffix(".json") else { continue };
            if validate_job_id(id).is_err() {
                continue;
            }

            match self.read_doc(id) {
                Ok(Some(job)) => {
                    jobs.insert(id.to_string(), job);
                }
                Ok(None) => {}
                Err(StoreError::Malformed { id, error }) => {
                    warn!("salteando job {} malformado: {}", id, error);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(jobs)
    }

    fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        validate_job_id(id)?;
        self.read_doc(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn put_job(&self, id: &str, job: &Job) -> Result<u64, StoreError> {
        self.put_checked(id, job, None)
    }

    fn put_job_if(&self, id: &str, job: &Job, expected_version: u64) -> Result<u64, StoreError> {
        self.put_checked(id, job, Some(expected_version))
    }
}

/* ---------------- export estático (sólo lectura) ---------------- */

/// Archivo `{"jobs": {<id>: <job>, ...}}` exportado. No tiene camino de escritura.
pub struct ExportStore {
    jobs: BTreeMap<JobId, Job>,
}

impl ExportStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            StoreError::Unavailable(format!("no se pudo leer {}: {}", path.display(), e))
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::Unavailable(format!("{} no es json válido: {}", path.display(), e))
        })?;
        let store = Self::from_value(value)?;
        info!(
            "export cargado desde {} ({} jobs)",
            path.display(),
            store.jobs.len()
        );
        Ok(store)
    }

    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(mut root) = value else {
            return Err(StoreError::Unavailable("el export debe ser un objeto".to_string()));
        };
        let raw_jobs = match root.remove("jobs") {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(StoreError::Unavailable(
                    "el export no tiene el mapa \"jobs\"".to_string(),
                ))
            }
        };

        let mut jobs = BTreeMap::new();
        for (id, doc) in raw_jobs {
            match load_job(&id, doc) {
                Ok(loaded) => {
                    jobs.insert(id, loaded.job);
                }
                Err(e) => warn!("salteando job {} malformado en el export: {}", id, e),
            }
        }
        Ok(Self { jobs })
    }
}

impl JobStore for ExportStore {
    fn list_jobs(&self) -> Result<BTreeMap<JobId, Job>, StoreError> {
        Ok(self.jobs.clone())
    }

    fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        self.jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn put_job(&self, _id: &str, _job: &Job) -> Result<u64, StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn put_job_if(&self, _id: &str, _job: &Job, _expected_version: u64) -> Result<u64, StoreError> {
        Err(StoreError::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::env;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("job_store_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn sample_job() -> Job {
        Job::new("Acme", "Pad 1", BTreeMap::from([("W1".to_string(), 3)]))
    }

    fn sample_json() -> String {
        serde_json::to_string(&sample_job()).unwrap()
    }

    /// Mismo contrato para todos los backends escribibles.
    fn check_contract(store: &dyn JobStore) {
        assert!(store.list_jobs().unwrap().is_empty());
        assert!(matches!(store.get_job("J1"), Err(StoreError::NotFound(_))));
        assert!(store.find_job("J1").unwrap().is_none());

        let v1 = store.put_job("J1", &sample_job()).unwrap();
        assert_eq!(v1, 1);
        let got = store.get_job("J1").unwrap();
        assert_eq!(got.version, 1);
        assert!(got.stage_log.is_empty());
        assert!(got.quality.is_empty());

        // put_job_if con versión vieja -> conflicto, el documento no cambia
        let mut changed = got.clone();
        changed.operator = "Otro".to_string();
        let err = store.put_job_if("J1", &changed, 0).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 0, actual: 1, .. }));
        assert_eq!(store.get_job("J1").unwrap().operator, "Acme");

        let v2 = store.put_job_if("J1", &changed, 1).unwrap();
        assert_eq!(v2, 2);
        assert_eq!(store.get_job("J1").unwrap().operator, "Otro");

        // last-write-wins ignora la versión que trae el job
        let v3 = store.put_job("J1", &sample_job()).unwrap();
        assert_eq!(v3, 3);

        store.put_job("J2", &sample_job()).unwrap();
        let all = store.list_jobs().unwrap();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["J1", "J2"]);

        assert!(matches!(
            store.put_job("../x", &sample_job()),
            Err(StoreError::InvalidId(_))
        ));
    }

    #[test]
    fn memory_store_cumple_contrato() {
        check_contract(&MemoryStore::new());
    }

    #[test]
    fn document_store_cumple_contrato() {
        let dir = temp_dir("contract");
        let store = DocumentStore::open(&dir).unwrap();
        check_contract(&store);
        assert!(dir.join("jobs").join("J1.json").is_file());
    }

    #[test]
    fn document_store_falla_si_no_existe_la_raiz() {
        let dir = temp_dir("missing").join("no-existe");
        let err = DocumentStore::open(&dir).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn document_store_saltea_documentos_malformados_en_list() {
        let dir = temp_dir("malformed");
        let store = DocumentStore::open(&dir).unwrap();
        store.put_job("bueno", &sample_job()).unwrap();
        fs::write(dir.join("jobs").join("roto.json"), b"{\"operator\": 1}").unwrap();

        let all = store.list_jobs().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("bueno"));
        assert!(matches!(store.get_job("roto"), Err(StoreError::Malformed { .. })));

        // put_job puede reemplazarlo, put_job_if no
        assert!(store.put_job_if("roto", &sample_job(), 0).is_err());
        assert_eq!(store.put_job("roto", &sample_job()).unwrap(), 1);
    }

    #[test]
    fn document_store_lista_ids_que_empiezan_con_punto() {
        let dir = temp_dir("dot_ids");
        let store = DocumentStore::open(&dir).unwrap();
        store.put_job(".J1", &sample_job()).unwrap();
        store.put_job("J2", &sample_job()).unwrap();
        // un temporal que quedó de una escritura cortada
        fs::write(dir.join("jobs").join(".J3.abc.tmp"), b"{}").unwrap();
        // nombre que ningún id válido produce
        fs::write(dir.join("jobs").join("..json"), sample_json()).unwrap();

        let all = store.list_jobs().unwrap();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec![".J1", "J2"]);
        assert_eq!(store.get_job(".J1").unwrap().version, 1);
    }

    #[test]
    fn document_store_lee_documentos_de_otra_version() {
        let dir = temp_dir("legacy");
        let store = DocumentStore::open(&dir).unwrap();
        let legacy = json!({
            "operator": "Acme", "pad": "P", "wells": {"W1": 2},
            "stage_log": {}, "quality": {}
        });
        fs::write(dir.join("jobs").join("J9.json"), legacy.to_string()).unwrap();

        let job = store.get_job("J9").unwrap();
        assert_eq!(job.version, 0);
        assert_eq!(store.put_job_if("J9", &job, 0).unwrap(), 1);
    }

    #[test]
    fn export_store_es_solo_lectura() {
        let store = ExportStore::from_value(json!({
            "jobs": {
                "J1": {"operator": "a", "pad": "b", "wells": {"W1": 2}, "stage_log": {}, "quality": {}},
                "roto": {"pad": "b"}
            }
        }))
        .unwrap();

        let all = store.list_jobs().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(store.get_job("J1").unwrap().pad, "b");
        assert!(matches!(store.put_job("J1", &sample_job()), Err(StoreError::ReadOnly)));
        assert!(matches!(store.put_job_if("J1", &sample_job(), 0), Err(StoreError::ReadOnly)));
    }

    #[test]
    fn export_store_falla_sin_mapa_jobs() {
        assert!(ExportStore::from_value(json!({"otra": {}})).is_err());

        let dir = temp_dir("export_missing");
        assert!(matches!(
            ExportStore::open(dir.join("jobs_data.json")),
            Err(StoreError::Unavailable(_))
        ));
    }
}
