use crate::network::GatewayNetwork;
use async_trait::async_trait;
use prost::Message;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};
use vote_common::crypto::{certificate_from_pem, read_file};
use vote_common::types::{
    tx_validation_code_name, ChaincodeAction, ChaincodeActionPayload, ChaincodeHeaderExtension,
    ChaincodeId, ChaincodeInput, ChaincodeInvocationSpec, ChaincodeProposalPayload,
    ChaincodeSpec, ChannelHeader, CommitStatusRequest, EndorseRequest, EvaluateRequest, Header,
    Payload, Proposal, ProposalResponsePayload, SignatureHeader, SignedCommitStatusRequest,
    SignedProposal, SubmitRequest, Transaction, HEADER_TYPE_ENDORSER_TRANSACTION,
    TX_VALIDATION_VALID,
};
use vote_common::{
    Config, ContractTrait, GatewayError, GatewayTransport, Identity, Signer, Submitted, Timeouts,
    TransactionContext,
};

/// Shared state of one gateway connection for a single client identity.
struct GatewayInner {
    network: Arc<dyn GatewayTransport>,
    identity: Identity,
    signer: Signer,
    timeouts: Timeouts,
}

/// A connection to a Fabric Gateway peer.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(
        network: Arc<dyn GatewayTransport>,
        identity: Identity,
        signer: Signer,
        timeouts: Timeouts,
    ) -> Self {
        Gateway {
            inner: Arc::new(GatewayInner {
                network,
                identity,
                signer,
                timeouts,
            }),
        }
    }

    /// Loads credentials and dials the gateway described by `config`.
    pub async fn connect(config: &Config) -> Result<Self, GatewayError> {
        let tls_root = read_file(&config.tls_cert_path, "TLS certificate")?;
        certificate_from_pem(&tls_root)?;
        let identity = Identity::load(&config.msp_id, &config.cert_path)?;
        let signer = Signer::load_from_dir(&config.key_dir)?;
        let network =
            GatewayNetwork::connect(&config.peer_endpoint, &config.gateway_peer, &tls_root).await?;
        info!("Gateway connected as {}", identity.msp_id());
        Ok(Self::new(Arc::new(network), identity, signer, config.timeouts))
    }

    pub fn contract(&self, channel_name: &str, chaincode_name: &str) -> Contract {
        Contract {
            gateway: self.clone(),
            channel_name: channel_name.to_string(),
            chaincode_name: chaincode_name.to_string(),
        }
    }
}

/// A chaincode on a channel, invoked through a [`Gateway`].
#[derive(Clone)]
pub struct Contract {
    gateway: Gateway,
    channel_name: String,
    chaincode_name: String,
}

impl Contract {
    fn inner(&self) -> &GatewayInner {
        &self.gateway.inner
    }

    fn signed_proposal(
        &self,
        function: &str,
        args: &[&str],
    ) -> (TransactionContext, SignedProposal) {
        let creator = self.inner().identity.serialize();
        let context = TransactionContext::new(&creator);
        let proposal = build_proposal(
            &context,
            creator,
            &self.channel_name,
            &self.chaincode_name,
            function,
            args,
        );
        let proposal_bytes = proposal.encode_to_vec();
        let signature = self.inner().signer.sign(&proposal_bytes);
        (
            context,
            SignedProposal {
                proposal_bytes,
                signature,
            },
        )
    }
}

#[async_trait]
impl ContractTrait for Contract {
    async fn evaluate(&self, function: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError> {
        let (context, proposal) = self.signed_proposal(function, args);
        debug!("Evaluating {} as {}", function, context.transaction_id);
        let request = EvaluateRequest {
            transaction_id: context.transaction_id,
            channel_id: self.channel_name.clone(),
            proposed_transaction: Some(proposal),
            target_organizations: Vec::new(),
        };
        let response = self
            .inner()
            .network
            .evaluate(request, self.inner().timeouts.evaluate)
            .await?;
        let result = response.result.ok_or(GatewayError::MissingField("result"))?;
        Ok(result.payload)
    }

    async fn submit(&self, function: &str, args: &[&str]) -> Result<Submitted, GatewayError> {
        let inner = self.inner();
        let (context, proposal) = self.signed_proposal(function, args);
        let transaction_id = context.transaction_id;
        debug!("Endorsing {} as {}", function, transaction_id);

        let endorsed = inner
            .network
            .endorse(
                EndorseRequest {
                    transaction_id: transaction_id.clone(),
                    channel_id: self.channel_name.clone(),
                    proposed_transaction: Some(proposal),
                    endorsing_organizations: Vec::new(),
                },
                inner.timeouts.endorse,
            )
            .await?;
        let mut envelope = endorsed
            .prepared_transaction
            .ok_or(GatewayError::MissingField("prepared_transaction"))?;
        let result = transaction_result(&envelope.payload)?;
        envelope.signature = inner.signer.sign(&envelope.payload);

        inner
            .network
            .submit(
                SubmitRequest {
                    transaction_id: transaction_id.clone(),
                    channel_id: self.channel_name.clone(),
                    prepared_transaction: Some(envelope),
                },
                inner.timeouts.submit,
            )
            .await?;
        debug!("Submitted {}, waiting for commit", transaction_id);

        let request = CommitStatusRequest {
            transaction_id: transaction_id.clone(),
            channel_id: self.channel_name.clone(),
            identity: inner.identity.serialize(),
        }
        .encode_to_vec();
        let signature = inner.signer.sign(&request);
        let status = inner
            .network
            .commit_status(
                SignedCommitStatusRequest { request, signature },
                inner.timeouts.commit_status,
            )
            .await?;

        if status.result != TX_VALIDATION_VALID {
            return Err(GatewayError::CommitFailed {
                tx_id: transaction_id,
                code: status.result,
                name: tx_validation_code_name(status.result),
            });
        }
        info!(
            "Transaction {} committed in block {}",
            transaction_id, status.block_number
        );
        Ok(Submitted {
            transaction_id,
            block_number: status.block_number,
            result,
        })
    }
}

/// Builds an unsigned endorser-transaction proposal for `function(args...)`.
pub fn build_proposal(
    context: &TransactionContext,
    creator: Vec<u8>,
    channel_name: &str,
    chaincode_name: &str,
    function: &str,
    args: &[&str],
) -> Proposal {
    let chaincode_id = ChaincodeId {
        name: chaincode_name.to_string(),
        ..Default::default()
    };
    let extension = ChaincodeHeaderExtension {
        chaincode_id: Some(chaincode_id.clone()),
    };
    let channel_header = ChannelHeader {
        r#type: HEADER_TYPE_ENDORSER_TRANSACTION,
        timestamp: Some(SystemTime::now().into()),
        channel_id: channel_name.to_string(),
        tx_id: context.transaction_id.clone(),
        epoch: 0,
        extension: extension.encode_to_vec(),
        ..Default::default()
    };
    let signature_header = SignatureHeader {
        creator,
        nonce: context.nonce.clone(),
    };
    let header = Header {
        channel_header: channel_header.encode_to_vec(),
        signature_header: signature_header.encode_to_vec(),
    };

    let mut input_args = vec![function.as_bytes().to_vec()];
    input_args.extend(args.iter().map(|arg| arg.as_bytes().to_vec()));
    let invocation = ChaincodeInvocationSpec {
        chaincode_spec: Some(ChaincodeSpec {
            chaincode_id: Some(chaincode_id),
            input: Some(ChaincodeInput {
                args: input_args,
                ..Default::default()
            }),
            ..Default::default()
        }),
    };
    let payload = ChaincodeProposalPayload {
        input: invocation.encode_to_vec(),
        ..Default::default()
    };

    Proposal {
        header: header.encode_to_vec(),
        payload: payload.encode_to_vec(),
        extension: Vec::new(),
    }
}

/// Extracts the chaincode response payload from a prepared transaction.
pub fn transaction_result(envelope_payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let payload = decode::<Payload>(envelope_payload)?;
    let transaction = decode::<Transaction>(&payload.data)?;
    let action = transaction
        .actions
        .first()
        .ok_or(GatewayError::MissingField("transaction actions"))?;
    let action_payload = decode::<ChaincodeActionPayload>(&action.payload)?;
    let endorsed = action_payload
        .action
        .ok_or(GatewayError::MissingField("chaincode endorsed action"))?;
    let response_payload =
        decode::<ProposalResponsePayload>(&endorsed.proposal_response_payload)?;
    let chaincode_action = decode::<ChaincodeAction>(&response_payload.extension)?;
    Ok(chaincode_action
        .response
        .map(|response| response.payload)
        .unwrap_or_default())
}

fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M, GatewayError> {
    M::decode(bytes).map_err(|e| GatewayError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::Signature;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use p256::SecretKey;
    use std::sync::Mutex;
    use std::time::Duration;
    use vote_common::types::{
        ChaincodeEndorsedAction, CommitStatusResponse, EndorseResponse, Envelope,
        EvaluateResponse, Response, SubmitResponse, TransactionAction,
    };

    #[test]
    fn test_proposal_carries_invocation() {
        let context = TransactionContext::with_nonce(vec![5; 24], b"creator");
        let proposal = build_proposal(
            &context,
            b"creator".to_vec(),
            "mychannel",
            "basic",
            "VoteUser",
            &["alice"],
        );

        let header = Header::decode(proposal.header.as_slice()).unwrap();
        let channel_header = ChannelHeader::decode(header.channel_header.as_slice()).unwrap();
        assert_eq!(channel_header.r#type, HEADER_TYPE_ENDORSER_TRANSACTION);
        assert_eq!(channel_header.channel_id, "mychannel");
        assert_eq!(channel_header.tx_id, context.transaction_id);
        assert!(channel_header.timestamp.is_some());
        let extension =
            ChaincodeHeaderExtension::decode(channel_header.extension.as_slice()).unwrap();
        assert_eq!(extension.chaincode_id.unwrap().name, "basic");

        let signature_header =
            SignatureHeader::decode(header.signature_header.as_slice()).unwrap();
        assert_eq!(signature_header.creator, b"creator");
        assert_eq!(signature_header.nonce, vec![5; 24]);

        let payload = ChaincodeProposalPayload::decode(proposal.payload.as_slice()).unwrap();
        let spec = ChaincodeInvocationSpec::decode(payload.input.as_slice())
            .unwrap()
            .chaincode_spec
            .unwrap();
        assert_eq!(spec.chaincode_id.unwrap().name, "basic");
        assert_eq!(
            spec.input.unwrap().args,
            vec![b"VoteUser".to_vec(), b"alice".to_vec()]
        );
    }

    #[test]
    fn test_no_arg_proposal_has_only_function_name() {
        let context = TransactionContext::new(b"creator");
        let proposal = build_proposal(&context, vec![], "ch", "cc", "GetAllVotes", &[]);
        let payload = ChaincodeProposalPayload::decode(proposal.payload.as_slice()).unwrap();
        let spec = ChaincodeInvocationSpec::decode(payload.input.as_slice())
            .unwrap()
            .chaincode_spec
            .unwrap();
        assert_eq!(spec.input.unwrap().args, vec![b"GetAllVotes".to_vec()]);
    }

    fn prepared_transaction(response: Option<Response>) -> Vec<u8> {
        let chaincode_action = ChaincodeAction {
            response,
            ..Default::default()
        };
        let response_payload = ProposalResponsePayload {
            proposal_hash: vec![0; 32],
            extension: chaincode_action.encode_to_vec(),
        };
        let action_payload = ChaincodeActionPayload {
            chaincode_proposal_payload: vec![],
            action: Some(ChaincodeEndorsedAction {
                proposal_response_payload: response_payload.encode_to_vec(),
            }),
        };
        let transaction = Transaction {
            actions: vec![TransactionAction {
                header: vec![],
                payload: action_payload.encode_to_vec(),
            }],
        };
        Payload {
            header: Some(Header::default()),
            data: transaction.encode_to_vec(),
        }
        .encode_to_vec()
    }

    #[test]
    fn test_transaction_result_extracted() {
        let bytes = prepared_transaction(Some(Response {
            status: 200,
            message: String::new(),
            payload: b"{\"alice\":3}".to_vec(),
        }));
        assert_eq!(transaction_result(&bytes).unwrap(), b"{\"alice\":3}");

        let empty = prepared_transaction(None);
        assert!(transaction_result(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_transaction_without_actions_rejected() {
        let bytes = Payload {
            header: None,
            data: Transaction { actions: vec![] }.encode_to_vec(),
        }
        .encode_to_vec();
        assert!(matches!(
            transaction_result(&bytes),
            Err(GatewayError::MissingField(_))
        ));
        assert!(matches!(
            transaction_result(&[0xff, 0xff]),
            Err(GatewayError::SerializationError(_))
        ));
    }

    const CERT_PEM: &str =
        "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUXp8=\n-----END CERTIFICATE-----\n";

    /// Records every gateway call with the deadline it was given.
    struct RecordingTransport {
        calls: Mutex<Vec<(&'static str, Duration)>>,
        prepared_transaction: Option<Envelope>,
        commit_result: i32,
        submitted: Mutex<Option<SubmitRequest>>,
        commit_request: Mutex<Option<SignedCommitStatusRequest>>,
    }

    impl RecordingTransport {
        fn new(prepared_transaction: Option<Envelope>, commit_result: i32) -> Arc<Self> {
            Arc::new(RecordingTransport {
                calls: Mutex::new(Vec::new()),
                prepared_transaction,
                commit_result,
                submitted: Mutex::new(None),
                commit_request: Mutex::new(None),
            })
        }

        fn calls(&self) -> Vec<(&'static str, Duration)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, method: &'static str, timeout: Duration) {
            self.calls.lock().unwrap().push((method, timeout));
        }
    }

    #[async_trait]
    impl GatewayTransport for RecordingTransport {
        async fn evaluate(
            &self,
            request: EvaluateRequest,
            timeout: Duration,
        ) -> Result<EvaluateResponse, GatewayError> {
            self.record("Evaluate", timeout);
            assert_eq!(request.channel_id, "mychannel");
            assert!(request.proposed_transaction.is_some());
            Ok(EvaluateResponse {
                result: Some(Response {
                    status: 200,
                    message: String::new(),
                    payload: b"{\"alice\":1}".to_vec(),
                }),
            })
        }

        async fn endorse(
            &self,
            _request: EndorseRequest,
            timeout: Duration,
        ) -> Result<EndorseResponse, GatewayError> {
            self.record("Endorse", timeout);
            Ok(EndorseResponse {
                prepared_transaction: self.prepared_transaction.clone(),
            })
        }

        async fn submit(
            &self,
            request: SubmitRequest,
            timeout: Duration,
        ) -> Result<SubmitResponse, GatewayError> {
            self.record("Submit", timeout);
            *self.submitted.lock().unwrap() = Some(request);
            Ok(SubmitResponse {})
        }

        async fn commit_status(
            &self,
            request: SignedCommitStatusRequest,
            timeout: Duration,
        ) -> Result<CommitStatusResponse, GatewayError> {
            self.record("CommitStatus", timeout);
            *self.commit_request.lock().unwrap() = Some(request);
            Ok(CommitStatusResponse {
                result: self.commit_result,
                block_number: 12,
            })
        }
    }

    fn contract_over(transport: Arc<RecordingTransport>) -> Contract {
        let key = SecretKey::from_slice(&[4u8; 32]).unwrap();
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
        let signer = Signer::from_pem(&pem).unwrap();
        let identity = Identity::from_pem("Org1MSP", CERT_PEM.as_bytes().to_vec()).unwrap();
        Gateway::new(transport, identity, signer, Timeouts::default())
            .contract("mychannel", "basic")
    }

    fn verifies(contract: &Contract, message: &[u8], der: &[u8]) -> bool {
        let signature = Signature::from_der(der).unwrap();
        contract
            .inner()
            .signer
            .verifying_key()
            .verify(message, &signature)
            .is_ok()
    }

    fn endorsed_envelope() -> Envelope {
        Envelope {
            payload: prepared_transaction(Some(Response {
                status: 200,
                message: String::new(),
                payload: b"ok".to_vec(),
            })),
            signature: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_evaluate_uses_evaluate_deadline() {
        let transport = RecordingTransport::new(None, TX_VALIDATION_VALID);
        let contract = contract_over(transport.clone());

        let payload = contract.evaluate("GetUserVote", &["alice"]).await.unwrap();
        assert_eq!(payload, b"{\"alice\":1}");
        assert_eq!(transport.calls(), vec![("Evaluate", Duration::from_secs(5))]);
    }

    #[tokio::test]
    async fn test_submit_signs_envelope_and_waits_for_commit() {
        let transport = RecordingTransport::new(Some(endorsed_envelope()), TX_VALIDATION_VALID);
        let contract = contract_over(transport.clone());

        let submitted = contract.submit("VoteUser", &["alice"]).await.unwrap();
        assert_eq!(submitted.block_number, 12);
        assert_eq!(submitted.result, b"ok");
        assert_eq!(
            transport.calls(),
            vec![
                ("Endorse", Duration::from_secs(15)),
                ("Submit", Duration::from_secs(5)),
                ("CommitStatus", Duration::from_secs(60)),
            ]
        );

        let request = transport.submitted.lock().unwrap().clone().unwrap();
        assert_eq!(request.transaction_id, submitted.transaction_id);
        let envelope = request.prepared_transaction.unwrap();
        assert!(!envelope.signature.is_empty());
        assert!(verifies(&contract, &envelope.payload, &envelope.signature));

        let status = transport.commit_request.lock().unwrap().clone().unwrap();
        assert!(verifies(&contract, &status.request, &status.signature));
        let decoded = CommitStatusRequest::decode(status.request.as_slice()).unwrap();
        assert_eq!(decoded.transaction_id, submitted.transaction_id);
        assert_eq!(decoded.channel_id, "mychannel");
    }

    #[tokio::test]
    async fn test_invalid_commit_names_validation_code() {
        let transport = RecordingTransport::new(Some(endorsed_envelope()), 11);
        let contract = contract_over(transport);

        match contract.submit("VoteUser", &["alice"]).await {
            Err(GatewayError::CommitFailed { code, name, .. }) => {
                assert_eq!(code, 11);
                assert_eq!(name, "MVCC_READ_CONFLICT");
            }
            other => panic!("expected commit failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_prepared_transaction_stops_before_submit() {
        let transport = RecordingTransport::new(None, TX_VALIDATION_VALID);
        let contract = contract_over(transport.clone());

        let result = contract.submit("VoteUser", &["alice"]).await;
        assert!(matches!(
            result,
            Err(GatewayError::MissingField("prepared_transaction"))
        ));
        assert_eq!(transport.calls(), vec![("Endorse", Duration::from_secs(15))]);
    }
}
