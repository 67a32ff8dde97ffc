use crate::{errors::GatewayError, types::SerializedIdentity};
use p256::ecdsa::{signature::Signer as _, Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{der::pem, DecodePrivateKey};
use p256::SecretKey;
use prost::Message;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

const NONCE_LENGTH: usize = 24;

/// X.509 client identity scoped to an MSP.
#[derive(Debug, Clone)]
pub struct Identity {
    msp_id: String,
    certificate: Vec<u8>,
}

impl Identity {
    pub fn from_pem(msp_id: &str, certificate: Vec<u8>) -> Result<Self, GatewayError> {
        certificate_from_pem(&certificate)?;
        Ok(Identity {
            msp_id: msp_id.to_string(),
            certificate,
        })
    }

    pub fn load(msp_id: &str, cert_path: &Path) -> Result<Self, GatewayError> {
        let certificate = read_file(cert_path, "certificate")?;
        Self::from_pem(msp_id, certificate)
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    /// `SerializedIdentity` bytes used as transaction creator.
    pub fn serialize(&self) -> Vec<u8> {
        SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.certificate.clone(),
        }
        .encode_to_vec()
    }
}

/// ECDSA P-256 signer for proposals, transactions and status requests.
pub struct Signer {
    signing_key: SigningKey,
}

impl Signer {
    pub fn from_pem(private_key: &str) -> Result<Self, GatewayError> {
        let secret_key = SecretKey::from_pkcs8_pem(private_key)
            .or_else(|_| SecretKey::from_sec1_pem(private_key))
            .map_err(|e| {
                GatewayError::CredentialError(format!("failed to parse private key: {}", e))
            })?;
        Ok(Signer {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Loads the first file (by name) in the keystore directory.
    pub fn load_from_dir(key_dir: &Path) -> Result<Self, GatewayError> {
        let entries = std::fs::read_dir(key_dir).map_err(|e| {
            GatewayError::CredentialError(format!(
                "failed to read private key directory {}: {}",
                key_dir.display(),
                e
            ))
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GatewayError::CredentialError(e.to_string()))?;
            if entry.path().is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        let key_path = files.first().ok_or_else(|| {
            GatewayError::CredentialError(format!(
                "no private key found in {}",
                key_dir.display()
            ))
        })?;
        debug!("Loading private key from {}", key_path.display());

        let pem = read_file(key_path, "private key")?;
        let pem = String::from_utf8(pem).map_err(|_| {
            GatewayError::CredentialError("private key file is not valid PEM".to_string())
        })?;
        Self::from_pem(&pem)
    }

    /// Signs the SHA-256 digest of `message`; low-S, DER encoded.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(message);
        let signature = signature.normalize_s().unwrap_or(signature);
        signature.to_der().as_bytes().to_vec()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }
}

/// Nonce and derived id of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub transaction_id: String,
    pub nonce: Vec<u8>,
}

impl TransactionContext {
    pub fn new(creator: &[u8]) -> Self {
        let nonce: [u8; NONCE_LENGTH] = rand::random();
        Self::with_nonce(nonce.to_vec(), creator)
    }

    pub fn with_nonce(nonce: Vec<u8>, creator: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&nonce);
        hasher.update(creator);
        TransactionContext {
            transaction_id: hex::encode(hasher.finalize()),
            nonce,
        }
    }
}

/// Checks that `data` holds a PEM `CERTIFICATE` block and returns its DER body.
pub fn certificate_from_pem(data: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let (label, der) = pem::decode_vec(data).map_err(|e| {
        GatewayError::CredentialError(format!("failed to decode certificate PEM: {}", e))
    })?;
    if label != "CERTIFICATE" {
        return Err(GatewayError::CredentialError(format!(
            "expected CERTIFICATE PEM block, found {}",
            label
        )));
    }
    Ok(der)
}

pub fn read_file(path: &Path, what: &str) -> Result<Vec<u8>, GatewayError> {
    std::fs::read(path).map_err(|e| {
        GatewayError::CredentialError(format!(
            "failed to read {} file {}: {}",
            what,
            path.display(),
            e
        ))
    })
}
