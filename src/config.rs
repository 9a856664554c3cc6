//! Runtime configuration for workflow execution.

use crate::branching::LoopPolicy;

/// Which persistence backend a runner should use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreType {
    #[default]
    InMemory,
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// Per-runner knobs, bundled so call sites stay short.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Thread id for the run; generated per run when absent.
    pub thread_id: Option<String>,
    pub store: StoreType,
    /// SQLite database file, resolved from the environment when not given.
    pub sqlite_db_name: Option<String>,
    pub loop_policy: LoopPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            store: StoreType::InMemory,
            sqlite_db_name: Self::resolve_sqlite_db_name(None),
            loop_policy: LoopPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    fn resolve_sqlite_db_name(provided: Option<String>) -> Option<String> {
        if let Some(name) = provided {
            return Some(name);
        }
        dotenvy::dotenv().ok();
        Some(std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "probeflow.db".to_string()))
    }

    pub fn new(thread_id: Option<String>, store: StoreType, sqlite_db_name: Option<String>) -> Self {
        Self {
            thread_id,
            store,
            sqlite_db_name: Self::resolve_sqlite_db_name(sqlite_db_name),
            loop_policy: LoopPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_loop_policy(mut self, policy: LoopPolicy) -> Self {
        self.loop_policy = policy;
        self
    }

    /// Connection URL for the configured SQLite database.
    #[must_use]
    pub fn sqlite_url(&self) -> String {
        let name = self.sqlite_db_name.as_deref().unwrap_or("probeflow.db");
        format!("sqlite://{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolves_a_db_name() {
        let config = RuntimeConfig::default();
        assert!(config.sqlite_db_name.is_some());
        assert!(config.sqlite_url().starts_with("sqlite://"));
    }

    #[test]
    fn explicit_db_name_wins() {
        let config = RuntimeConfig::new(None, StoreType::InMemory, Some("runs.db".into()));
        assert_eq!(config.sqlite_url(), "sqlite://runs.db");
    }
}
