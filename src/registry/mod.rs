//! SQLite-backed server registry
//!
//! Persists registered MCP servers and their discovered capabilities. Every
//! call opens its own connection (short critical sections, no shared
//! handle) and runs with `PRAGMA foreign_keys = ON` so capability rows
//! cascade with their server. Multi-row writes happen in a single
//! transaction.
//!
//! All queries are parameterized; user input never reaches SQL text.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{McpHubError, Result};
use crate::mcp::types::{CapabilitySet, Prompt, Resource, Tool};

pub mod types;

use types::{CapabilityKind, SearchMatch, ServerConfig, ServerRecord, ServerStatus, TransportKind};

/// Inclusive bounds on the search result cap.
pub const SEARCH_LIMIT_RANGE: std::ops::RangeInclusive<usize> = 1..=1000;

/// Registry of MCP servers backed by SQLite.
pub struct SqliteRegistry {
    db_path: PathBuf,
}

impl SqliteRegistry {
    /// Open the registry at its default location.
    ///
    /// Honors the `MCPHUB_DB` environment variable; otherwise the database
    /// lives in the user's data directory.
    pub fn open_default() -> Result<Self> {
        if let Ok(override_path) = std::env::var("MCPHUB_DB") {
            return Self::open(override_path);
        }

        let proj_dirs = ProjectDirs::from("io", "mcphub", "mcphub")
            .ok_or_else(|| McpHubError::Storage("could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("failed to create data directory")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;

        Self::open(data_dir.join("registry.db"))
    }

    /// Open (and initialize) the registry at the given path.
    ///
    /// Parent directories are created as needed. This is also the entry
    /// point for tests running against a temporary directory.
    pub fn open<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create parent directory for database")
                .map_err(|e| McpHubError::Storage(e.to_string()))?;
        }

        let registry = Self { db_path };
        registry.init()?;
        Ok(registry)
    }

    /// Open a connection with foreign-key enforcement enabled.
    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("failed to open database")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        Ok(conn)
    }

    /// Initialize the database schema.
    fn init(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS mcp_servers (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                description TEXT,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_verified TEXT,
                status TEXT NOT NULL DEFAULT 'active'
            );

            CREATE TABLE IF NOT EXISTS mcp_tools (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                input_schema TEXT,
                FOREIGN KEY (server_id) REFERENCES mcp_servers(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS mcp_resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_id TEXT NOT NULL,
                uri TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                mime_type TEXT,
                FOREIGN KEY (server_id) REFERENCES mcp_servers(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS mcp_prompts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                arguments TEXT,
                FOREIGN KEY (server_id) REFERENCES mcp_servers(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_mcp_servers_type ON mcp_servers(type);
            CREATE INDEX IF NOT EXISTS idx_mcp_servers_status ON mcp_servers(status);
            CREATE INDEX IF NOT EXISTS idx_mcp_tools_server_id ON mcp_tools(server_id);
            CREATE INDEX IF NOT EXISTS idx_mcp_tools_name ON mcp_tools(name);
            CREATE INDEX IF NOT EXISTS idx_mcp_resources_server_id ON mcp_resources(server_id);
            CREATE INDEX IF NOT EXISTS idx_mcp_resources_name ON mcp_resources(name);
            CREATE INDEX IF NOT EXISTS idx_mcp_prompts_server_id ON mcp_prompts(server_id);
            CREATE INDEX IF NOT EXISTS idx_mcp_prompts_name ON mcp_prompts(name);",
        )
        .context("failed to create tables")
        .map_err(|e| McpHubError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Insert a server and its capabilities in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Conflict`] if `id` already exists and
    /// [`McpHubError::Storage`] on any other database failure.
    pub fn insert_server(
        &self,
        id: &str,
        kind: TransportKind,
        description: Option<&str>,
        config: &ServerConfig,
        capabilities: &CapabilitySet,
    ) -> Result<ServerRecord> {
        let mut conn = self.connection()?;
        let now = Utc::now().to_rfc3339();
        let config_json = serde_json::to_string(config)?;

        let tx = conn
            .transaction()
            .context("failed to start transaction")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;

        let inserted = tx.execute(
            "INSERT INTO mcp_servers (id, type, description, config, created_at, last_verified, status)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                kind.to_string(),
                description,
                config_json,
                now,
                now,
                ServerStatus::Active.to_string()
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(McpHubError::Conflict(format!("server id already exists: {id}")).into());
            }
            Err(e) => return Err(McpHubError::Storage(e.to_string()).into()),
        }

        Self::insert_capability_rows(&tx, id, capabilities)?;

        tx.commit()
            .context("failed to commit transaction")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;

        self.get_server(id)?
            .ok_or_else(|| McpHubError::Internal(format!("inserted server {id} not readable")).into())
    }

    /// Insert capability rows for one server inside an open transaction.
    fn insert_capability_rows(
        tx: &rusqlite::Transaction<'_>,
        server_id: &str,
        capabilities: &CapabilitySet,
    ) -> Result<()> {
        for tool in &capabilities.tools {
            let schema_json = tool
                .input_schema
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO mcp_tools (server_id, name, description, input_schema)
                 VALUES (?, ?, ?, ?)",
                params![server_id, tool.name, tool.description, schema_json],
            )
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        }

        for resource in &capabilities.resources {
            tx.execute(
                "INSERT INTO mcp_resources (server_id, uri, name, description, mime_type)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    server_id,
                    resource.uri,
                    resource.name,
                    resource.description,
                    resource.mime_type
                ],
            )
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        }

        for prompt in &capabilities.prompts {
            let args_json = prompt
                .arguments
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO mcp_prompts (server_id, name, description, arguments)
                 VALUES (?, ?, ?, ?)",
                params![server_id, prompt.name, prompt.description, args_json],
            )
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        }

        Ok(())
    }

    /// Joined lookup of a server and its capabilities.
    pub fn get_server(&self, id: &str) -> Result<Option<ServerRecord>> {
        let conn = self.connection()?;
        self.get_server_with(&conn, id)
    }

    fn get_server_with(&self, conn: &Connection, id: &str) -> Result<Option<ServerRecord>> {
        let row = conn
            .query_row(
                "SELECT id, type, description, config, created_at, last_verified, status
                 FROM mcp_servers WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("failed to query server")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;

        let Some((id, kind, description, config_json, created_at, last_verified, status)) = row
        else {
            return Ok(None);
        };

        let capabilities = self.capabilities_for(conn, &id)?;

        Ok(Some(ServerRecord {
            kind: TransportKind::from_str(&kind).map_err(McpHubError::Storage)?,
            description,
            config: serde_json::from_str(&config_json)?,
            created_at: parse_timestamp(&created_at)?,
            last_verified: last_verified.as_deref().map(parse_timestamp).transpose()?,
            status: ServerStatus::from_str(&status).map_err(McpHubError::Storage)?,
            capabilities,
            id,
        }))
    }

    /// Load the capability triple for one server, preserving stored order.
    fn capabilities_for(&self, conn: &Connection, server_id: &str) -> Result<CapabilitySet> {
        let mut stmt = conn
            .prepare("SELECT name, description, input_schema FROM mcp_tools WHERE server_id = ? ORDER BY id")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        let tools = stmt
            .query_map(params![server_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|e| McpHubError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| McpHubError::Storage(e.to_string()))?
            .into_iter()
            .map(|(name, description, schema_json)| {
                Ok(Tool {
                    name,
                    description,
                    input_schema: schema_json
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stmt = conn
            .prepare("SELECT uri, name, description, mime_type FROM mcp_resources WHERE server_id = ? ORDER BY id")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        let resources = stmt
            .query_map(params![server_id], |row| {
                Ok(Resource {
                    uri: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    mime_type: row.get(3)?,
                })
            })
            .map_err(|e| McpHubError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| McpHubError::Storage(e.to_string()))?;

        let mut stmt = conn
            .prepare("SELECT name, description, arguments FROM mcp_prompts WHERE server_id = ? ORDER BY id")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        let prompts = stmt
            .query_map(params![server_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(|e| McpHubError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| McpHubError::Storage(e.to_string()))?
            .into_iter()
            .map(|(name, description, args_json)| {
                Ok(Prompt {
                    name,
                    description,
                    arguments: args_json.as_deref().map(serde_json::from_str).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CapabilitySet {
            tools,
            resources,
            prompts,
        })
    }

    /// List servers, newest first, optionally filtered by type and status.
    pub fn list_servers(
        &self,
        kind: Option<TransportKind>,
        status: Option<ServerStatus>,
    ) -> Result<Vec<ServerRecord>> {
        let conn = self.connection()?;

        let mut conditions = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(kind) = kind {
            conditions.push("type = ?");
            values.push(kind.to_string().into());
        }
        if let Some(status) = status {
            conditions.push("status = ?");
            values.push(status.to_string().into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT id FROM mcp_servers{where_clause} ORDER BY created_at DESC, id");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(values), |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| McpHubError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| McpHubError::Storage(e.to_string()))?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_server_with(&conn, &id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Delete a server; capability rows cascade.
    ///
    /// Returns `false` when the id was unknown.
    pub fn delete_server(&self, id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM mcp_servers WHERE id = ?", params![id])
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Update a server's status and verification timestamp.
    ///
    /// `last_verified` defaults to now.
    pub fn update_status(
        &self,
        id: &str,
        status: ServerStatus,
        last_verified: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let conn = self.connection()?;
        let verified = last_verified.unwrap_or_else(Utc::now).to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE mcp_servers SET status = ?, last_verified = ? WHERE id = ?",
                params![status.to_string(), verified, id],
            )
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Replace a server's capability rows wholesale.
    ///
    /// Used after a successful re-verification; old rows are dropped and
    /// the fresh triple inserted in one transaction.
    pub fn replace_capabilities(&self, id: &str, capabilities: &CapabilitySet) -> Result<bool> {
        let mut conn = self.connection()?;

        let tx = conn
            .transaction()
            .context("failed to start transaction")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM mcp_servers WHERE id = ?",
                params![id],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| McpHubError::Storage(e.to_string()))?
            .unwrap_or(false);
        if !exists {
            return Ok(false);
        }

        for table in ["mcp_tools", "mcp_resources", "mcp_prompts"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE server_id = ?"),
                params![id],
            )
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        }

        Self::insert_capability_rows(&tx, id, capabilities)?;

        tx.commit()
            .context("failed to commit transaction")
            .map_err(|e| McpHubError::Storage(e.to_string()))?;
        Ok(true)
    }

    /// Search capabilities across all active servers.
    ///
    /// Case-insensitive substring match against name and description (and
    /// uri for resources), restricted to `status = 'active'`. Matches are
    /// grouped per server; across servers the order follows the first
    /// encounter per kind, tools then resources then prompts. At most
    /// `limit` entries are returned.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Validation`] when `limit` is outside
    /// [`SEARCH_LIMIT_RANGE`].
    pub fn search_capabilities(
        &self,
        query: Option<&str>,
        kind: Option<CapabilityKind>,
        server_type: Option<TransportKind>,
        limit: usize,
    ) -> Result<Vec<SearchMatch>> {
        if !SEARCH_LIMIT_RANGE.contains(&limit) {
            return Err(McpHubError::Validation(format!(
                "limit must be between {} and {}",
                SEARCH_LIMIT_RANGE.start(),
                SEARCH_LIMIT_RANGE.end()
            ))
            .into());
        }

        let conn = self.connection()?;
        let mut results: Vec<SearchMatch> = Vec::new();
        let needle = query.map(|q| q.to_lowercase());

        let plans = [
            (
                CapabilityKind::Tool,
                "SELECT DISTINCT s.id FROM mcp_servers s JOIN mcp_tools t ON s.id = t.server_id",
                "(t.name LIKE ? OR t.description LIKE ?)",
                2usize,
            ),
            (
                CapabilityKind::Resource,
                "SELECT DISTINCT s.id FROM mcp_servers s JOIN mcp_resources r ON s.id = r.server_id",
                "(r.name LIKE ? OR r.description LIKE ? OR r.uri LIKE ?)",
                3usize,
            ),
            (
                CapabilityKind::Prompt,
                "SELECT DISTINCT s.id FROM mcp_servers s JOIN mcp_prompts p ON s.id = p.server_id",
                "(p.name LIKE ? OR p.description LIKE ?)",
                2usize,
            ),
        ];

        for (plan_kind, base, match_clause, pattern_count) in plans {
            if kind.is_some() && kind != Some(plan_kind) {
                continue;
            }

            let mut sql = format!("{base} WHERE s.status = ?");
            let mut values: Vec<rusqlite::types::Value> =
                vec![ServerStatus::Active.to_string().into()];

            if let Some(server_type) = server_type {
                sql.push_str(" AND s.type = ?");
                values.push(server_type.to_string().into());
            }
            if let Some(q) = query {
                sql.push_str(&format!(" AND {match_clause}"));
                let pattern = format!("%{q}%");
                for _ in 0..pattern_count {
                    values.push(pattern.clone().into());
                }
            }
            sql.push_str(" LIMIT ?");
            values.push((limit as i64).into());

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| McpHubError::Storage(e.to_string()))?;
            let ids = stmt
                .query_map(rusqlite::params_from_iter(values), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| McpHubError::Storage(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| McpHubError::Storage(e.to_string()))?;

            for server_id in ids {
                let Some(server) = self.get_server_with(&conn, &server_id)? else {
                    continue;
                };
                let matched = filter_matches(&server.capabilities, plan_kind, needle.as_deref());

                if let Some(existing) = results.iter_mut().find(|m| m.server_id == server.id) {
                    match plan_kind {
                        CapabilityKind::Tool => existing.matched_tools = matched.0,
                        CapabilityKind::Resource => existing.matched_resources = matched.1,
                        CapabilityKind::Prompt => existing.matched_prompts = matched.2,
                    }
                } else {
                    results.push(SearchMatch {
                        server_id: server.id,
                        server_type: server.kind,
                        server_description: server.description,
                        server_config: server.config,
                        matched_tools: matched.0,
                        matched_resources: matched.1,
                        matched_prompts: matched.2,
                    });
                }
            }
        }

        results.truncate(limit);
        Ok(results)
    }
}

/// Filter one server's capabilities of a single kind against a lowercase
/// needle; the other two kinds come back empty.
fn filter_matches(
    capabilities: &CapabilitySet,
    kind: CapabilityKind,
    needle: Option<&str>,
) -> (Vec<Tool>, Vec<Resource>, Vec<Prompt>) {
    let contains = |haystack: Option<&str>| -> bool {
        match (needle, haystack) {
            (None, _) => true,
            (Some(n), Some(h)) => h.to_lowercase().contains(n),
            (Some(_), None) => false,
        }
    };

    match kind {
        CapabilityKind::Tool => {
            let tools = capabilities
                .tools
                .iter()
                .filter(|t| contains(Some(&t.name)) || contains(t.description.as_deref()))
                .cloned()
                .collect();
            (tools, Vec::new(), Vec::new())
        }
        CapabilityKind::Resource => {
            let resources = capabilities
                .resources
                .iter()
                .filter(|r| {
                    contains(Some(&r.name))
                        || contains(r.description.as_deref())
                        || contains(Some(&r.uri))
                })
                .cloned()
                .collect();
            (Vec::new(), resources, Vec::new())
        }
        CapabilityKind::Prompt => {
            let prompts = capabilities
                .prompts
                .iter()
                .filter(|p| contains(Some(&p.name)) || contains(p.description.as_deref()))
                .cloned()
                .collect();
            (Vec::new(), Vec::new(), prompts)
        }
    }
}

/// Parse an RFC-3339 timestamp stored by this registry.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| McpHubError::Storage(format!("malformed timestamp {raw}: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Helper: create a temporary registry backed by a temp directory.
    ///
    /// Returns both the registry and the `TempDir` so the caller keeps
    /// ownership of the directory (preventing it from being removed).
    fn create_test_registry() -> (SqliteRegistry, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("registry.db");
        let registry = SqliteRegistry::open(db_path).expect("failed to create registry");
        (registry, dir)
    }

    fn stdio_config(command: &str) -> ServerConfig {
        ServerConfig::Stdio {
            command: command.to_string(),
            args: vec![],
            env: HashMap::new(),
        }
    }

    fn sample_capabilities() -> CapabilitySet {
        CapabilitySet {
            tools: vec![Tool {
                name: "echo".to_string(),
                description: Some("Echo a message".to_string()),
                input_schema: Some(serde_json::json!({"type": "object"})),
            }],
            resources: vec![Resource {
                uri: "file:///tmp/readme.txt".to_string(),
                name: "readme".to_string(),
                description: Some("Project readme".to_string()),
                mime_type: Some("text/plain".to_string()),
            }],
            prompts: vec![Prompt {
                name: "greeting".to_string(),
                description: Some("Greets someone".to_string()),
                arguments: Some(vec![crate::mcp::types::PromptArgument {
                    name: "who".to_string(),
                    description: None,
                    required: true,
                }]),
            }],
        }
    }

    #[test]
    fn test_init_creates_tables() {
        let (registry, _dir) = create_test_registry();
        let conn = registry.connection().expect("open connection");
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table'
                 AND name IN ('mcp_servers', 'mcp_tools', 'mcp_resources', 'mcp_prompts')",
                [],
                |r| r.get(0),
            )
            .expect("query row");
        assert_eq!(count, 4);
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let (registry, _dir) = create_test_registry();
        let caps = sample_capabilities();

        let record = registry
            .insert_server(
                "srv-1",
                TransportKind::Stdio,
                Some("echo server"),
                &stdio_config("echo-mcp"),
                &caps,
            )
            .expect("insert failed");

        assert_eq!(record.id, "srv-1");
        assert_eq!(record.kind, TransportKind::Stdio);
        assert_eq!(record.status, ServerStatus::Active);
        assert!(record.last_verified.is_some());
        assert_eq!(record.capabilities, caps);

        let fetched = registry.get_server("srv-1").expect("get failed");
        assert_eq!(fetched.expect("record missing").capabilities, caps);
    }

    #[test]
    fn test_insert_duplicate_id_is_conflict() {
        let (registry, _dir) = create_test_registry();
        let caps = CapabilitySet::default();

        registry
            .insert_server("dup", TransportKind::Stdio, None, &stdio_config("a"), &caps)
            .expect("first insert failed");

        let result = registry.insert_server(
            "dup",
            TransportKind::Stdio,
            None,
            &stdio_config("b"),
            &caps,
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::Conflict(_))
        ));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (registry, _dir) = create_test_registry();
        let result = registry.get_server("nope").expect("get failed");
        assert!(result.is_none());
    }

    #[test]
    fn test_list_servers_newest_first_with_filters() {
        let (registry, _dir) = create_test_registry();
        let caps = CapabilitySet::default();

        registry
            .insert_server("s1", TransportKind::Stdio, None, &stdio_config("a"), &caps)
            .unwrap();
        registry
            .insert_server(
                "s2",
                TransportKind::Http,
                None,
                &ServerConfig::Remote {
                    url: url::Url::parse("http://localhost:3000/mcp").unwrap(),
                    headers: HashMap::new(),
                },
                &caps,
            )
            .unwrap();

        let all = registry.list_servers(None, None).unwrap();
        assert_eq!(all.len(), 2);

        let stdio_only = registry
            .list_servers(Some(TransportKind::Stdio), None)
            .unwrap();
        assert_eq!(stdio_only.len(), 1);
        assert_eq!(stdio_only[0].id, "s1");

        registry
            .update_status("s1", ServerStatus::Error, None)
            .unwrap();
        let active_only = registry
            .list_servers(None, Some(ServerStatus::Active))
            .unwrap();
        assert_eq!(active_only.len(), 1);
        assert_eq!(active_only[0].id, "s2");
    }

    #[test]
    fn test_delete_cascades_capabilities() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "gone",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();

        assert!(registry.delete_server("gone").unwrap());

        let conn = registry.connection().unwrap();
        for table in ["mcp_tools", "mcp_resources", "mcp_prompts"] {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT count(*) FROM {table} WHERE server_id = ?"),
                    params!["gone"],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 0, "{table} rows should cascade");
        }
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let (registry, _dir) = create_test_registry();
        assert!(!registry.delete_server("missing").unwrap());
    }

    #[test]
    fn test_update_status_sets_timestamp() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &CapabilitySet::default(),
            )
            .unwrap();

        assert!(registry
            .update_status("s", ServerStatus::Error, None)
            .unwrap());
        let record = registry.get_server("s").unwrap().unwrap();
        assert_eq!(record.status, ServerStatus::Error);
        assert!(record.last_verified.is_some());

        assert!(!registry
            .update_status("missing", ServerStatus::Active, None)
            .unwrap());
    }

    #[test]
    fn test_replace_capabilities_is_wholesale() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();

        let fresh = CapabilitySet {
            tools: vec![Tool {
                name: "search".to_string(),
                description: None,
                input_schema: None,
            }],
            resources: vec![],
            prompts: vec![],
        };
        assert!(registry.replace_capabilities("s", &fresh).unwrap());

        let record = registry.get_server("s").unwrap().unwrap();
        assert_eq!(record.capabilities.tools.len(), 1);
        assert_eq!(record.capabilities.tools[0].name, "search");
        assert!(record.capabilities.resources.is_empty());
        assert!(record.capabilities.prompts.is_empty());

        assert!(!registry
            .replace_capabilities("missing", &fresh)
            .unwrap());
    }

    #[test]
    fn test_search_matches_tool_name_case_insensitive() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();

        let matches = registry
            .search_capabilities(Some("ECHO"), None, None, 100)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_tools.len(), 1);
        assert_eq!(matches[0].matched_tools[0].name, "echo");
    }

    #[test]
    fn test_search_kind_scoping_leaves_other_kinds_empty() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();

        // "e" appears in tool, resource, and prompt names; a tool-scoped
        // search must still return only tool matches.
        let matches = registry
            .search_capabilities(Some("e"), Some(CapabilityKind::Tool), None, 100)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert!(!matches[0].matched_tools.is_empty());
        assert!(matches[0].matched_resources.is_empty());
        assert!(matches[0].matched_prompts.is_empty());
    }

    #[test]
    fn test_search_matches_resource_uri() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();

        let matches = registry
            .search_capabilities(Some("readme.txt"), Some(CapabilityKind::Resource), None, 10)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_resources.len(), 1);
    }

    #[test]
    fn test_search_excludes_inactive_servers() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();
        registry
            .update_status("s", ServerStatus::Error, None)
            .unwrap();

        let matches = registry
            .search_capabilities(Some("echo"), None, None, 100)
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_search_groups_kinds_per_server() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();

        // No query: everything matches; all three kinds group into one entry.
        let matches = registry.search_capabilities(None, None, None, 100).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_tools.len(), 1);
        assert_eq!(matches[0].matched_resources.len(), 1);
        assert_eq!(matches[0].matched_prompts.len(), 1);
    }

    #[test]
    fn test_search_limit_bounds_validated() {
        let (registry, _dir) = create_test_registry();
        for bad in [0usize, 1001] {
            let err = registry
                .search_capabilities(None, None, None, bad)
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<McpHubError>(),
                Some(McpHubError::Validation(_))
            ));
        }
        // Boundary values are accepted.
        assert!(registry.search_capabilities(None, None, None, 1).is_ok());
        assert!(registry.search_capabilities(None, None, None, 1000).is_ok());
    }

    #[test]
    fn test_search_server_type_filter() {
        let (registry, _dir) = create_test_registry();
        registry
            .insert_server(
                "s1",
                TransportKind::Stdio,
                None,
                &stdio_config("a"),
                &sample_capabilities(),
            )
            .unwrap();

        let matches = registry
            .search_capabilities(Some("echo"), None, Some(TransportKind::Http), 100)
            .unwrap();
        assert!(matches.is_empty());

        let matches = registry
            .search_capabilities(Some("echo"), None, Some(TransportKind::Stdio), 100)
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    #[serial]
    fn test_open_default_respects_env_override() {
        let dir = tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("nested").join("registry.db");
        std::env::set_var("MCPHUB_DB", db_path.to_string_lossy().to_string());

        let registry = SqliteRegistry::open_default().expect("open failed with env override");
        assert_eq!(registry.db_path, db_path);
        assert!(db_path.parent().unwrap().exists());

        std::env::remove_var("MCPHUB_DB");
    }
}
