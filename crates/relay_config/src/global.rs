use serde::Deserialize;

// =======================================================
// GLOBAL CONFIG + DEFAULTS
// =======================================================
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Max concurrent client connections (semaphore size).
    pub max_connections: u32,
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            log_level: "info".into(),
        }
    }
}

impl GlobalConfig {
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub(crate) fn apply_defaults_from(&mut self, defaults: &GlobalConfig) {
        if self.max_connections == 0 {
            self.max_connections = defaults.max_connections;
        }
        if self.log_level.is_empty() {
            self.log_level = defaults.log_level.clone();
        }
    }
}
