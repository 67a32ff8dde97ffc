#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Credential error: {0}")]
    CredentialError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("RPC error: {0}")]
    RpcError(String),
    #[error("Timed out after {1:?} waiting for {0}")]
    Timeout(String, std::time::Duration),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Missing field in gateway response: {0}")]
    MissingField(&'static str),
    #[error("Transaction {tx_id} failed to commit with status code {code} ({name})")]
    CommitFailed {
        tx_id: String,
        code: i32,
        name: &'static str,
    },
    #[error("Failed to evaluate transaction {function}: {reason}")]
    EvaluateFailed { function: String, reason: String },
    #[error("Failed to submit transaction {function}: {reason}")]
    SubmitFailed { function: String, reason: String },
    #[error("Failed to parse JSON: {0}")]
    InvalidJson(String),
    #[error("I/O error: {0}")]
    IoError(String),
}
