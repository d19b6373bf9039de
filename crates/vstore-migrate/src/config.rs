use std::time::Duration;

/// Configuration for [`ConnectionFactory`](crate::ConnectionFactory).
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Pause between closing a connection and deleting its database, so the
    /// host can finish flushing. Defaults to 100 ms.
    pub delete_grace: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            delete_grace: Duration::from_millis(100),
        }
    }
}

impl FactoryConfig {
    pub fn delete_grace(mut self, grace: Duration) -> Self {
        self.delete_grace = grace;
        self
    }
}

/// Configuration for [`UpgradeDriver`](crate::UpgradeDriver).
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Refuse to run over a checkpoint store that forgets its contents when
    /// the process exits. Defaults to `true`.
    pub require_durable_checkpoints: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            require_durable_checkpoints: true,
        }
    }
}

impl DriverConfig {
    pub fn require_durable_checkpoints(mut self, required: bool) -> Self {
        self.require_durable_checkpoints = required;
        self
    }
}
