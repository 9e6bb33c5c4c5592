//! Error types for the relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Transport errors for the mail, IMAP and SMS collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} is not configured")]
    NotConfigured { name: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to fetch from channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to delete {id} on channel {name}: {reason}")]
    DeleteFailed {
        name: String,
        id: String,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Cycle-level reconciliation failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("System actor '{username}' not found")]
    MissingSystemActor { username: String },

    #[error("No unused message code found after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },
}
