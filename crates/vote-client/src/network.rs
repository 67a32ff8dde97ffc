use async_trait::async_trait;
use prost::Message;
use std::future::Future;
use std::time::Duration;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};
use vote_common::types::{
    CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest, EvaluateResponse,
    SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
};
use vote_common::{GatewayError, GatewayTransport};

const EVALUATE: &str = "/gateway.Gateway/Evaluate";
const ENDORSE: &str = "/gateway.Gateway/Endorse";
const SUBMIT: &str = "/gateway.Gateway/Submit";
const COMMIT_STATUS: &str = "/gateway.Gateway/CommitStatus";

/// The TLS gRPC channel to a Fabric Gateway peer, shared by all calls.
#[derive(Debug, Clone)]
pub struct GatewayNetwork {
    channel: Channel,
}

impl GatewayNetwork {
    /// Dials `endpoint` (host:port) over TLS, trusting `tls_root` and
    /// verifying the server as `server_name`.
    pub async fn connect(
        endpoint: &str,
        server_name: &str,
        tls_root: &[u8],
    ) -> Result<Self, GatewayError> {
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(tls_root))
            .domain_name(server_name);
        let channel = Endpoint::from_shared(format!("https://{}", endpoint))
            .map_err(|e| GatewayError::ConnectionError(e.to_string()))?
            .tls_config(tls)
            .map_err(|e| GatewayError::ConnectionError(e.to_string()))?
            .connect()
            .await
            .map_err(|e| {
                GatewayError::ConnectionError(format!("failed to connect to {}: {}", endpoint, e))
            })?;
        info!("Connected to gateway {} ({})", endpoint, server_name);
        Ok(GatewayNetwork { channel })
    }

    async fn unary<Req, Resp>(
        &self,
        method: &'static str,
        request: Req,
        timeout: Duration,
    ) -> Result<Resp, GatewayError>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        debug!("Calling {}", method);
        let mut request = tonic::Request::new(request);
        request.set_timeout(timeout);

        with_deadline(method, timeout, async {
            let mut grpc = tonic::client::Grpc::new(self.channel.clone());
            grpc.ready()
                .await
                .map_err(|e| GatewayError::ConnectionError(e.to_string()))?;
            let codec: ProstCodec<Req, Resp> = ProstCodec::default();
            grpc.unary(request, PathAndQuery::from_static(method), codec)
                .await
                .map(tonic::Response::into_inner)
                .map_err(status_to_error)
        })
        .await
    }
}

#[async_trait]
impl GatewayTransport for GatewayNetwork {
    async fn evaluate(
        &self,
        request: EvaluateRequest,
        timeout: Duration,
    ) -> Result<EvaluateResponse, GatewayError> {
        self.unary(EVALUATE, request, timeout).await
    }

    async fn endorse(
        &self,
        request: EndorseRequest,
        timeout: Duration,
    ) -> Result<EndorseResponse, GatewayError> {
        self.unary(ENDORSE, request, timeout).await
    }

    async fn submit(
        &self,
        request: SubmitRequest,
        timeout: Duration,
    ) -> Result<SubmitResponse, GatewayError> {
        self.unary(SUBMIT, request, timeout).await
    }

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        timeout: Duration,
    ) -> Result<CommitStatusResponse, GatewayError> {
        self.unary(COMMIT_STATUS, request, timeout).await
    }
}

/// Bounds `call` by `timeout`, independent of whether the server honours
/// the gRPC deadline header.
pub async fn with_deadline<T, F>(what: &str, timeout: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| GatewayError::Timeout(what.to_string(), timeout))?
}

fn status_to_error(status: tonic::Status) -> GatewayError {
    GatewayError::RpcError(format!("{:?}: {}", status.code(), status.message()))
}
