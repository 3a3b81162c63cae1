//! Error types for the mnemon core library.
//!
//! Each subsystem has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Errors from the message fabric (in-process router and TCP broker).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// An inbound frame named a topic outside the closed enumeration.
    #[error("unknown topic on the wire: {topic}")]
    UnknownTopic {
        /// The topic string that failed to resolve.
        topic: String,
    },

    /// A broker endpoint could not be bound. Fatal at startup.
    #[error("failed to bind broker endpoint {endpoint}: {source}")]
    Bind {
        /// The endpoint that was being bound.
        endpoint: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// A broker endpoint string could not be parsed.
    #[error("invalid broker endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// The endpoint string as configured.
        endpoint: String,
        /// Why it failed to parse.
        message: String,
    },

    /// A wire frame could not be decoded into an envelope.
    #[error("malformed wire frame: {message}")]
    MalformedFrame {
        /// Details about the decode failure.
        message: String,
    },

    /// Transport-level failure while reading or writing frames.
    #[error("broker transport error: {source}")]
    Transport {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from plugin resolution and plugin backends.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No plugin registered for the requested kind and usage.
    #[error("no plugin registered for {kind}/{usage}")]
    NotRegistered {
        /// The plugin kind (llm, embedding, vector_db, db).
        kind: String,
        /// The usage slot within the kind.
        usage: String,
    },

    /// HTTP request to a provider endpoint failed.
    #[error("plugin HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A provider returned an error response.
    #[error("plugin API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the provider.
        message: String,
    },

    /// A provider response could not be parsed.
    #[error("failed to parse plugin response: {0}")]
    Parse(String),

    /// A required credential is missing from the environment.
    #[error("missing credential: {name}")]
    MissingCredential {
        /// The environment variable or config field that is unset.
        name: String,
    },

    /// A replay plugin found no recorded output for the call site.
    #[error("no recorded output for call site {key}")]
    ReplayMiss {
        /// The recorder key that was looked up.
        key: String,
    },

    /// A store backend failed.
    #[error("store error: {message}")]
    Store {
        /// Details about the failure.
        message: String,
    },
}

/// Errors from the relational/document store backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to the database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// A stored record could not be decoded.
    #[error("failed to decode stored record: {0}")]
    Decode(String),
}

/// Errors from host boot and service lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration failed to load or validate.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The fabric failed to start (broker bind, endpoint parse).
    #[error("message fabric error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: BusError,
    },

    /// A plugin could not be constructed or resolved.
    #[error("plugin error: {source}")]
    Plugin {
        /// The underlying plugin error.
        #[from]
        source: PluginError,
    },

    /// The document store failed to initialize.
    #[error("storage error: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: StorageError,
    },

    /// An unknown profile name was supplied.
    #[error("unknown profile: {name} (expected 'standard' or 'mock')")]
    UnknownProfile {
        /// The profile string as supplied.
        name: String,
    },

    /// A service failed during start.
    #[error("service '{service}' failed to start: {message}")]
    ServiceStart {
        /// The service that failed.
        service: &'static str,
        /// Details about the failure.
        message: String,
    },
}

/// Errors raised inside pipeline stages.
///
/// Contract violations abort the current observation so bugs surface loudly;
/// they are never silently recovered.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Two engrams with the same id were registered during one consolidation.
    #[error("Engram ID Collision. During consolidation, two engrams with the same id were detected: {id}")]
    EngramIdCollision {
        /// The colliding engram id.
        id: String,
    },

    /// The language model returned an empty index array for an engram.
    #[error("language model returned no indices for engram {engram_id}")]
    EmptyIndexArray {
        /// The engram whose index generation came back empty.
        engram_id: String,
    },

    /// An engram reached index generation without grounding context.
    #[error("engram {engram_id} has no context")]
    MissingContext {
        /// The engram missing its context map.
        engram_id: String,
    },

    /// Summary embedding was requested but the summary text is absent.
    #[error("summary text is empty for observation {observation_id}")]
    MissingSummary {
        /// The observation whose meta lacks a full summary.
        observation_id: String,
    },

    /// An inbound payload could not be deserialized into its record type.
    #[error("failed to decode {record} payload: {message}")]
    MalformedPayload {
        /// The record type being decoded.
        record: &'static str,
        /// Details about the decode failure.
        message: String,
    },

    /// A plugin call inside a pipeline stage failed.
    #[error("plugin call failed: {source}")]
    Plugin {
        /// The underlying plugin error.
        #[from]
        source: PluginError,
    },

    /// A store call inside a pipeline stage failed.
    #[error("storage failed: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: StorageError,
    },

    /// A fanned-out task panicked or was cancelled before completing.
    #[error("pipeline task failed to complete: {message}")]
    TaskFailed {
        /// Details from the join error.
        message: String,
    },
}
