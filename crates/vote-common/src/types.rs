//! Fabric protobuf messages used by the gateway protocol.
//!
//! Only the fields this client reads or writes are declared; prost skips
//! unknown fields on decode. Tags follow the `fabric-protos` definitions.

use prost::Message;
use std::collections::HashMap;

/// `common.HeaderType.ENDORSER_TRANSACTION`
pub const HEADER_TYPE_ENDORSER_TRANSACTION: i32 = 3;

/// `protos.TxValidationCode.VALID`
pub const TX_VALIDATION_VALID: i32 = 0;

#[derive(Clone, PartialEq, Message)]
pub struct SerializedIdentity {
    #[prost(string, tag = "1")]
    pub mspid: String,
    #[prost(bytes, tag = "2")]
    pub id_bytes: Vec<u8>,
}

// common/common.proto

#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(bytes, tag = "1")]
    pub channel_header: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub signature_header: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelHeader {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(int32, tag = "2")]
    pub version: i32,
    #[prost(message, optional, tag = "3")]
    pub timestamp: Option<prost_types::Timestamp>,
    #[prost(string, tag = "4")]
    pub channel_id: String,
    #[prost(string, tag = "5")]
    pub tx_id: String,
    #[prost(uint64, tag = "6")]
    pub epoch: u64,
    #[prost(bytes, tag = "7")]
    pub extension: Vec<u8>,
    #[prost(bytes, tag = "8")]
    pub tls_cert_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SignatureHeader {
    #[prost(bytes, tag = "1")]
    pub creator: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub nonce: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Payload {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(bytes, tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(bytes, tag = "1")]
    pub payload: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub signature: Vec<u8>,
}

// peer/proposal.proto, peer/chaincode.proto

#[derive(Clone, PartialEq, Message)]
pub struct SignedProposal {
    #[prost(bytes, tag = "1")]
    pub proposal_bytes: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Proposal {
    #[prost(bytes, tag = "1")]
    pub header: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bytes, tag = "3")]
    pub extension: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeHeaderExtension {
    #[prost(message, optional, tag = "2")]
    pub chaincode_id: Option<ChaincodeId>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeProposalPayload {
    #[prost(bytes, tag = "1")]
    pub input: Vec<u8>,
    #[prost(map = "string, bytes", tag = "2")]
    pub transient_map: HashMap<String, Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeId {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub version: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeInput {
    #[prost(bytes, repeated, tag = "1")]
    pub args: Vec<Vec<u8>>,
    #[prost(map = "string, bytes", tag = "2")]
    pub decorations: HashMap<String, Vec<u8>>,
    #[prost(bool, tag = "3")]
    pub is_init: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeSpec {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub chaincode_id: Option<ChaincodeId>,
    #[prost(message, optional, tag = "3")]
    pub input: Option<ChaincodeInput>,
    #[prost(int32, tag = "4")]
    pub timeout: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeInvocationSpec {
    #[prost(message, optional, tag = "1")]
    pub chaincode_spec: Option<ChaincodeSpec>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bytes, tag = "3")]
    pub payload: Vec<u8>,
}

// peer/transaction.proto, peer/proposal_response.proto
//
// Walked to recover the chaincode response from a prepared transaction.

#[derive(Clone, PartialEq, Message)]
pub struct Transaction {
    #[prost(message, repeated, tag = "1")]
    pub actions: Vec<TransactionAction>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TransactionAction {
    #[prost(bytes, tag = "1")]
    pub header: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeActionPayload {
    #[prost(bytes, tag = "1")]
    pub chaincode_proposal_payload: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub action: Option<ChaincodeEndorsedAction>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeEndorsedAction {
    #[prost(bytes, tag = "1")]
    pub proposal_response_payload: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProposalResponsePayload {
    #[prost(bytes, tag = "1")]
    pub proposal_hash: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub extension: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChaincodeAction {
    #[prost(bytes, tag = "1")]
    pub results: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub events: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub response: Option<Response>,
    #[prost(message, optional, tag = "4")]
    pub chaincode_id: Option<ChaincodeId>,
}

// gateway/gateway.proto

#[derive(Clone, PartialEq, Message)]
pub struct EvaluateRequest {
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    #[prost(string, tag = "2")]
    pub channel_id: String,
    #[prost(message, optional, tag = "3")]
    pub proposed_transaction: Option<SignedProposal>,
    #[prost(string, repeated, tag = "4")]
    pub target_organizations: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EvaluateResponse {
    #[prost(message, optional, tag = "1")]
    pub result: Option<Response>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EndorseRequest {
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    #[prost(string, tag = "2")]
    pub channel_id: String,
    #[prost(message, optional, tag = "3")]
    pub proposed_transaction: Option<SignedProposal>,
    #[prost(string, repeated, tag = "4")]
    pub endorsing_organizations: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EndorseResponse {
    #[prost(message, optional, tag = "1")]
    pub prepared_transaction: Option<Envelope>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SubmitRequest {
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    #[prost(string, tag = "2")]
    pub channel_id: String,
    #[prost(message, optional, tag = "3")]
    pub prepared_transaction: Option<Envelope>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SubmitResponse {}

#[derive(Clone, PartialEq, Message)]
pub struct CommitStatusRequest {
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    #[prost(string, tag = "2")]
    pub channel_id: String,
    #[prost(bytes, tag = "3")]
    pub identity: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SignedCommitStatusRequest {
    #[prost(bytes, tag = "1")]
    pub request: Vec<u8>,
    #[prost(bytes, tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommitStatusResponse {
    #[prost(int32, tag = "1")]
    pub result: i32,
    #[prost(uint64, tag = "2")]
    pub block_number: u64,
}

/// Name of a `protos.TxValidationCode` value.
pub fn tx_validation_code_name(code: i32) -> &'static str {
    match code {
        0 => "VALID",
        1 => "NIL_ENVELOPE",
        2 => "BAD_PAYLOAD",
        3 => "BAD_COMMON_HEADER",
        4 => "BAD_CREATOR_SIGNATURE",
        5 => "INVALID_ENDORSER_TRANSACTION",
        6 => "INVALID_CONFIG_TRANSACTION",
        7 => "UNSUPPORTED_TX_PAYLOAD",
        8 => "BAD_PROPOSAL_TXID",
        9 => "DUPLICATE_TXID",
        10 => "ENDORSEMENT_POLICY_FAILURE",
        11 => "MVCC_READ_CONFLICT",
        12 => "PHANTOM_READ_CONFLICT",
        13 => "UNKNOWN_TX_TYPE",
        14 => "TARGET_CHAIN_NOT_FOUND",
        15 => "MARSHAL_TX_ERROR",
        16 => "NIL_TXACTION",
        17 => "EXPIRED_CHAINCODE",
        18 => "CHAINCODE_VERSION_CONFLICT",
        19 => "BAD_HEADER_EXTENSION",
        20 => "BAD_CHANNEL_HEADER",
        21 => "BAD_RESPONSE_PAYLOAD",
        22 => "BAD_RWSET",
        23 => "ILLEGAL_WRITESET",
        24 => "INVALID_WRITESET",
        25 => "INVALID_CHAINCODE",
        254 => "NOT_VALIDATED",
        255 => "INVALID_OTHER_REASON",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_code_names() {
        assert_eq!(tx_validation_code_name(TX_VALIDATION_VALID), "VALID");
        assert_eq!(tx_validation_code_name(11), "MVCC_READ_CONFLICT");
        assert_eq!(tx_validation_code_name(99), "UNKNOWN");
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        // ChaincodeEndorsedAction.endorsements (tag 2) is not declared here.
        let mut bytes = ChaincodeEndorsedAction {
            proposal_response_payload: vec![1, 2, 3],
        }
        .encode_to_vec();
        bytes.extend_from_slice(&[0x12, 0x02, 0xaa, 0xbb]);
        let decoded = ChaincodeEndorsedAction::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.proposal_response_payload, vec![1, 2, 3]);
    }
}
