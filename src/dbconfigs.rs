//! Named relational database connection descriptors.
//!
//! A JSON file maps a logical database name to its connection settings.
//! Reads hit the disk fresh on every use; mutation goes through a
//! single-writer mutex (in-process), last-writer-wins across processes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbConnConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

pub struct DbConfigStore {
    path: PathBuf,
    write_gate: Mutex<()>,
}

impl DbConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_gate: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<BTreeMap<String, DbConnConfig>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Registry(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Registry(format!("{}: {}", self.path.display(), e)))
    }

    pub fn get(&self, name: &str) -> Result<DbConnConfig> {
        self.load()?
            .remove(name)
            .ok_or_else(|| Error::UnknownDatabase(name.to_string()))
    }

    pub async fn upsert(&self, name: &str, config: DbConnConfig) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        let mut configs = self.load()?;
        configs.insert(name.to_string(), config);
        self.write(&configs)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        let mut configs = self.load()?;
        if configs.remove(name).is_none() {
            return Err(Error::UnknownDatabase(name.to_string()));
        }
        self.write(&configs)
    }

    /// Create an empty store file if none exists yet (`docsql init`).
    pub async fn ensure_file(&self) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        if self.path.exists() {
            return Ok(());
        }
        self.write(&BTreeMap::new())
    }

    fn write(&self, configs: &BTreeMap<String, DbConnConfig>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Registry(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(configs)
            .map_err(|e| Error::Registry(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::Registry(format!("{}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DbConnConfig {
        DbConnConfig {
            host: "localhost".into(),
            port: 5432,
            dbname: "company_db".into(),
            user: "postgres".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn upsert_get_remove_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = DbConfigStore::new(dir.path().join("databases.json"));

        assert!(store.load().unwrap().is_empty());
        store.upsert("company", sample()).await.unwrap();
        assert_eq!(store.get("company").unwrap(), sample());

        store.remove("company").await.unwrap();
        assert!(matches!(
            store.get("company").unwrap_err(),
            Error::UnknownDatabase(_)
        ));
    }

    #[tokio::test]
    async fn removing_unknown_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = DbConfigStore::new(dir.path().join("databases.json"));
        assert!(store.remove("ghost").await.is_err());
    }

    #[tokio::test]
    async fn reads_see_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("databases.json");
        let store = DbConfigStore::new(path.clone());
        store.upsert("a", sample()).await.unwrap();

        // Simulate an external editor rewriting the file.
        let mut edited = sample();
        edited.port = 5433;
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), edited.clone());
        std::fs::write(&path, serde_json::to_string(&map).unwrap()).unwrap();

        assert_eq!(store.get("a").unwrap(), edited);
    }
}
