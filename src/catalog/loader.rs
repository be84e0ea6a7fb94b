//! Profile loading from either a SQLite store or a filesystem corpus.
//!
//! The backend is detected from the path: a file is opened as a SQLite
//! database, a directory is walked for `*.json` profile documents.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::{Error, Result};

use super::profile::{
    Capability, FeatureVector, IntentTag, InvocationPattern, ToolInput, ToolProfile,
};

/// Loads tool profiles at startup and on explicit reload.
pub struct ProfileLoader {
    source: PathBuf,
}

impl ProfileLoader {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Load every profile from the configured source.
    ///
    /// An empty result is an error: the pipeline cannot select tools out of
    /// nothing, and a silently empty catalog would turn every request into an
    /// information-only answer.
    pub fn load_all(&self) -> Result<Vec<ToolProfile>> {
        let profiles = if self.source.is_dir() {
            self.load_corpus(&self.source)?
        } else {
            self.load_sql(&self.source)?
        };

        if profiles.is_empty() {
            return Err(Error::CatalogStore(format!(
                "no tool profiles found in {}",
                self.source.display()
            )));
        }
        tracing::info!(
            count = profiles.len(),
            source = %self.source.display(),
            "loaded tool catalog"
        );
        Ok(profiles)
    }

    fn load_corpus(&self, dir: &Path) -> Result<Vec<ToolProfile>> {
        let pattern = dir.join("**").join("*.json");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| Error::CatalogStore("profile corpus path is not UTF-8".to_string()))?;

        let mut profiles = Vec::new();
        let entries = glob::glob(pattern)
            .map_err(|e| Error::CatalogStore(format!("bad corpus glob: {}", e)))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::CatalogStore(format!("corpus walk failed: {}", e)))?;
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::CatalogStore(format!("read {}: {}", path.display(), e)))?;
            let profile: ToolProfile = serde_json::from_str(&raw).map_err(|e| {
                Error::CatalogStore(format!("parse {}: {}", path.display(), e))
            })?;
            profiles.push(profile);
        }
        Ok(profiles)
    }

    fn load_sql(&self, db_path: &Path) -> Result<Vec<ToolProfile>> {
        let conn = Connection::open(db_path)
            .map_err(|e| Error::CatalogStore(format!("open {}: {}", db_path.display(), e)))?;
        Self::load_from_connection(&conn)
    }

    /// Load profiles from an open SQLite connection.
    ///
    /// Expected tables: `tools`, `tool_capabilities`, `tool_patterns`,
    /// `tool_intents`, `tool_inputs` (the last one optional).
    pub fn load_from_connection(conn: &Connection) -> Result<Vec<ToolProfile>> {
        let sql_err = |e: rusqlite::Error| Error::CatalogStore(e.to_string());

        let mut stmt = conn
            .prepare("SELECT tool_name, platform, category, description FROM tools ORDER BY tool_name")
            .map_err(sql_err)?;
        let mut profiles: Vec<ToolProfile> = stmt
            .query_map([], |row| {
                Ok(ToolProfile {
                    tool_name: row.get(0)?,
                    platform: row.get(1)?,
                    category: row.get(2)?,
                    description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    capabilities: Vec::new(),
                    patterns: Vec::new(),
                    intent_tags: Vec::new(),
                    inputs: Vec::new(),
                })
            })
            .map_err(sql_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(sql_err)?;

        for profile in &mut profiles {
            profile.capabilities = Self::load_capabilities(conn, &profile.tool_name)?;
            profile.patterns = Self::load_patterns(conn, &profile.tool_name)?;
            profile.intent_tags = Self::load_intents(conn, &profile.tool_name)?;
            profile.inputs = Self::load_inputs(conn, &profile.tool_name)?;
        }
        Ok(profiles)
    }

    fn load_capabilities(conn: &Connection, tool: &str) -> Result<Vec<Capability>> {
        let sql_err = |e: rusqlite::Error| Error::CatalogStore(e.to_string());
        let mut stmt = conn
            .prepare("SELECT name, description FROM tool_capabilities WHERE tool_name = ?1")
            .map_err(sql_err)?;
        let result = stmt
            .query_map([tool], |row| {
                Ok(Capability {
                    name: row.get(0)?,
                    description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })
            .map_err(sql_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(sql_err);
        result
    }

    fn load_patterns(conn: &Connection, tool: &str) -> Result<Vec<InvocationPattern>> {
        let sql_err = |e: rusqlite::Error| Error::CatalogStore(e.to_string());
        let mut stmt = conn
            .prepare(
                "SELECT pattern_name, description, time_ms, cost, accuracy, completeness, \
                 complexity, limitations FROM tool_patterns WHERE tool_name = ?1",
            )
            .map_err(sql_err)?;
        let result = stmt
            .query_map([tool], |row| {
                let limitations: Option<String> = row.get(7)?;
                Ok(InvocationPattern {
                    pattern_name: row.get(0)?,
                    description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    features: FeatureVector {
                        time_ms: row.get(2)?,
                        cost: row.get(3)?,
                        accuracy: row.get(4)?,
                        completeness: row.get(5)?,
                        complexity: row.get(6)?,
                        limitations: limitations
                            .and_then(|raw| serde_json::from_str(&raw).ok())
                            .unwrap_or_default(),
                    },
                })
            })
            .map_err(sql_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(sql_err);
        result
    }

    fn load_intents(conn: &Connection, tool: &str) -> Result<Vec<IntentTag>> {
        let sql_err = |e: rusqlite::Error| Error::CatalogStore(e.to_string());
        let mut stmt = conn
            .prepare("SELECT category, action FROM tool_intents WHERE tool_name = ?1")
            .map_err(sql_err)?;
        let result = stmt
            .query_map([tool], |row| {
                Ok(IntentTag {
                    category: row.get(0)?,
                    action: row.get(1)?,
                })
            })
            .map_err(sql_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(sql_err);
        result
    }

    fn load_inputs(conn: &Connection, tool: &str) -> Result<Vec<ToolInput>> {
        let sql_err = |e: rusqlite::Error| Error::CatalogStore(e.to_string());
        // The inputs table is optional in older stores.
        let mut stmt = match conn
            .prepare("SELECT name, description, required FROM tool_inputs WHERE tool_name = ?1")
        {
            Ok(stmt) => stmt,
            Err(_) => return Ok(Vec::new()),
        };
        let result = stmt
            .query_map([tool], |row| {
                Ok(ToolInput {
                    name: row.get(0)?,
                    description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    required: row.get::<_, i64>(2)? != 0,
                })
            })
            .map_err(sql_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(sql_err);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seed_sql_store(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE tools (tool_name TEXT PRIMARY KEY, platform TEXT, category TEXT, description TEXT);
             CREATE TABLE tool_capabilities (tool_name TEXT, name TEXT, description TEXT);
             CREATE TABLE tool_patterns (tool_name TEXT, pattern_name TEXT, description TEXT, \
                 time_ms REAL, cost REAL, accuracy REAL, completeness REAL, complexity REAL, limitations TEXT);
             CREATE TABLE tool_intents (tool_name TEXT, category TEXT, action TEXT);
             CREATE TABLE tool_inputs (tool_name TEXT, name TEXT, description TEXT, required INTEGER);
             INSERT INTO tools VALUES ('svc-restart', 'linux', 'system', 'Restart a service over SSH');
             INSERT INTO tool_capabilities VALUES ('svc-restart', 'service_restart', 'restart a systemd unit');
             INSERT INTO tool_patterns VALUES ('svc-restart', 'systemctl', 'systemctl restart', \
                 2000.0, 0.1, 0.95, 0.9, 0.2, '[\"requires systemd\"]');
             INSERT INTO tool_intents VALUES ('svc-restart', 'action', 'restart_service');
             INSERT INTO tool_inputs VALUES ('svc-restart', 'target', 'host', 1);
             INSERT INTO tool_inputs VALUES ('svc-restart', 'service', 'unit name', 1);",
        )
        .unwrap();
    }

    #[test]
    fn test_sql_store_loads_joined_profile() {
        let conn = Connection::open_in_memory().unwrap();
        seed_sql_store(&conn);

        let profiles = ProfileLoader::load_from_connection(&conn).unwrap();
        assert_eq!(profiles.len(), 1);

        let profile = &profiles[0];
        assert_eq!(profile.tool_name, "svc-restart");
        assert_eq!(profile.capabilities[0].name, "service_restart");
        assert_eq!(profile.patterns[0].features.limitations, vec!["requires systemd"]);
        assert_eq!(profile.intent_tags[0].action, "restart_service");
        assert_eq!(profile.required_inputs(), vec!["target", "service"]);
    }

    #[test]
    fn test_corpus_loads_json_documents() {
        let dir = tempfile::tempdir().unwrap();
        let profile = super::super::profile::test_profiles::profile(
            "sys-monitor",
            "linux",
            &["system_monitoring"],
            &[("information", "check_status")],
        );
        std::fs::write(
            dir.path().join("sys-monitor.json"),
            serde_json::to_string_pretty(&profile).unwrap(),
        )
        .unwrap();

        let loaded = ProfileLoader::new(dir.path()).load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], profile);
    }

    #[test]
    fn test_empty_corpus_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProfileLoader::new(dir.path()).load_all().unwrap_err();
        assert!(matches!(err, Error::CatalogStore(_)));
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert!(ProfileLoader::new(dir.path()).load_all().is_err());
    }
}
