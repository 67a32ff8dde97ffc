use crate::errors::GatewayError;
use crate::types::{
    CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest, EvaluateResponse,
    SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
};
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a committed submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub transaction_id: String,
    pub block_number: u64,
    pub result: Vec<u8>,
}

/// A deployed contract on one channel, reached through a gateway.
#[async_trait]
pub trait ContractTrait: Send + Sync {
    /// Runs a read-only transaction function on a single peer and returns its result.
    async fn evaluate(&self, function: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError>;

    /// Endorses, orders and waits for commit of a state-changing transaction function.
    async fn submit(&self, function: &str, args: &[&str]) -> Result<Submitted, GatewayError>;
}

/// Unary calls of the `gateway.Gateway` service, each bounded by `timeout`.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn evaluate(
        &self,
        request: EvaluateRequest,
        timeout: Duration,
    ) -> Result<EvaluateResponse, GatewayError>;

    async fn endorse(
        &self,
        request: EndorseRequest,
        timeout: Duration,
    ) -> Result<EndorseResponse, GatewayError>;

    async fn submit(
        &self,
        request: SubmitRequest,
        timeout: Duration,
    ) -> Result<SubmitResponse, GatewayError>;

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        timeout: Duration,
    ) -> Result<CommitStatusResponse, GatewayError>;
}
