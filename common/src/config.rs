use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::env;

use crate::cache::{CachedJobStore, DEFAULT_CACHE_TTL};
use crate::editor::WritePolicy;
use crate::store::{DocumentStore, ExportStore, JobStore, MemoryStore};

pub const DEFAULT_STORE_PATH: &str = "./data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Colección de documentos en disco (lectura/escritura)
    Documents,
    /// Archivo exportado {"jobs": {...}} (sólo lectura)
    Export,
    /// En memoria, se pierde al reiniciar
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "documents" | "docs" => Ok(Self::Documents),
            "export" | "file" => Ok(Self::Export),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(anyhow!("backend desconocido: {}", other)),
        }
    }
}

impl FromStr for WritePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-write-wins" | "lww" => Ok(Self::LastWriteWins),
            "check-version" | "strict" => Ok(Self::CheckVersion),
            other => Err(anyhow!("write policy desconocida: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directorio raíz (documents) o archivo (export)
    pub path: PathBuf,
    pub cache_ttl: Duration,
    pub write_policy: WritePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Documents,
            path: PathBuf::from(DEFAULT_STORE_PATH),
            cache_ttl: DEFAULT_CACHE_TTL,
            write_policy: WritePolicy::LastWriteWins,
        }
    }
}

impl StoreConfig {
    /// Lee KPI_STORE_BACKEND, KPI_STORE_PATH, KPI_CACHE_TTL_SECS y KPI_WRITE_POLICY.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("KPI_STORE_BACKEND") {
            cfg.backend = v.parse::<StoreBackend>().context("KPI_STORE_BACKEND")?;
        }
        if let Some(v) = lookup("KPI_STORE_PATH") {
            cfg.path = PathBuf::from(v);
        } else if cfg.backend == StoreBackend::Export {
            cfg.path = PathBuf::from("jobs_data.json");
        }
        if let Some(v) = lookup("KPI_CACHE_TTL_SECS") {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("KPI_CACHE_TTL_SECS inválido: {}", v))?;
            cfg.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("KPI_WRITE_POLICY") {
            cfg.write_policy = v.parse::<WritePolicy>().context("KPI_WRITE_POLICY")?;
        }
        Ok(cfg)
    }

    /// Abre el backend configurado envuelto en el cache de listados.
    /// Cualquier error acá es fatal: la aplicación no debe arrancar.
    pub fn open_store(&self) -> Result<Arc<dyn JobStore>> {
        let inner: Box<dyn JobStore> = match self.backend {
            StoreBackend::Documents => Box::new(
                DocumentStore::open(&self.path)
                    .with_context(|| format!("abriendo document store en {}", self.path.display()))?,
            ),
            StoreBackend::Export => Box::new(
                ExportStore::open(&self.path)
                    .with_context(|| format!("abriendo export {}", self.path.display()))?,
            ),
            StoreBackend::Memory => Box::new(MemoryStore::new()),
        };
        if self.backend == StoreBackend::Export && self.write_policy == WritePolicy::CheckVersion {
            bail!("KPI_WRITE_POLICY no aplica a un export de sólo lectura");
        }
        Ok(Arc::new(CachedJobStore::new(inner, self.cache_ttl)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_sin_variables() {
        let cfg = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.backend, StoreBackend::Documents);
        assert_eq!(cfg.path, PathBuf::from("./data"));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(10));
        assert_eq!(cfg.write_policy, WritePolicy::LastWriteWins);
    }

    #[test]
    fn lee_variables() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("KPI_STORE_BACKEND", "Export"),
            ("KPI_CACHE_TTL_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend, StoreBackend::Export);
        assert_eq!(cfg.path, PathBuf::from("jobs_data.json"));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(3));

        let cfg = StoreConfig::from_lookup(lookup(&[("KPI_WRITE_POLICY", "check-version")])).unwrap();
        assert_eq!(cfg.write_policy, WritePolicy::CheckVersion);
    }

    #[test]
    fn rechaza_valores_invalidos() {
        assert!(StoreConfig::from_lookup(lookup(&[("KPI_STORE_BACKEND", "firestore")])).is_err());
        assert!(StoreConfig::from_lookup(lookup(&[("KPI_CACHE_TTL_SECS", "diez")])).is_err());
        assert!(StoreConfig::from_lookup(lookup(&[("KPI_WRITE_POLICY", "merge")])).is_err());
    }

    #[test]
    fn open_store_falla_rapido_si_el_backend_no_esta() {
        let base = env::temp_dir().join("store_config_tests");
        let _ = fs::remove_dir_all(&base);

        let cfg = StoreConfig {
            path: base.join("no-existe"),
            ..StoreConfig::default()
        };
        assert!(cfg.open_store().is_err());

        fs::create_dir_all(&base).unwrap();
        let cfg = StoreConfig {
            path: base.clone(),
            ..StoreConfig::default()
        };
        let store = cfg.open_store().unwrap();
        assert!(store.list_jobs().unwrap().is_empty());
    }
}
