use crate::error::{Error, Result};

/// What happens to a registry entry once its result has been awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Keep every entry for the dispatcher's lifetime; repeated awaits see the same outcome.
    #[default]
    KeepAll,
    /// Drop the entry after the first await returns; later awaits report an unknown id.
    EvictOnAwait,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_name: String,
    pub retention: Retention,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_name: "task-worker".to_string(),
            retention: Retention::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_name.trim().is_empty() {
            return Err(Error::config("worker_name must not be empty"));
        }
        // std::thread::Builder panics on interior NUL bytes.
        if self.worker_name.contains('\0') {
            return Err(Error::config("worker_name must not contain NUL bytes"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DispatcherConfigBuilder {
    config: DispatcherConfig,
}

impl DispatcherConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
        }
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_name = name.into();
        self
    }

    pub fn retention(mut self, retention: Retention) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn build(self) -> Result<DispatcherConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
