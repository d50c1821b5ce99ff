//! Ed25519-signed key/value records.
//!
//! A record is trusted only after its signature verifies over
//! `key || value || author` under the author's public key. The author field
//! is the hex-encoded SHA-256 of that public key, so a verifier needs a way
//! to resolve author ids back to keys; [`Keyring`] is the in-memory one.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from record signature checks.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid signature length: {0} bytes (expected 64)")]
    InvalidSignatureLength(usize),
    #[error("author {author} does not match the verifying key")]
    AuthorMismatch { author: String },
    #[error("unknown author: {0}")]
    UnknownAuthor(String),
    #[error("signature verification failed: {0}")]
    BadSignature(String),
}

/// A key/value pair signed by its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRecord {
    /// The key that references this record.
    pub key: String,
    /// The stored value.
    pub value: Vec<u8>,
    /// Hex SHA-256 of the author's public key.
    pub author: String,
    /// Ed25519 signature over `key || value || author`.
    pub signature: Vec<u8>,
    /// Set by the receiver when the record arrives.
    pub time_received: Option<DateTime<Utc>>,
}

/// Derive the author id for a public key.
pub fn author_id(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn signing_payload(key: &str, value: &[u8], author: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(key.len() + value.len() + author.len());
    payload.extend_from_slice(key.as_bytes());
    payload.extend_from_slice(value);
    payload.extend_from_slice(author.as_bytes());
    payload
}

/// Sign `key || value || author` and return the raw 64-byte signature.
pub fn sign_record(key: &str, value: &[u8], author: &str, signing_key: &SigningKey) -> Vec<u8> {
    signing_key
        .sign(&signing_payload(key, value, author))
        .to_bytes()
        .to_vec()
}

impl SignedRecord {
    /// Build a record authored and signed by `signing_key`.
    pub fn new_signed(
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        signing_key: &SigningKey,
    ) -> Self {
        let key = key.into();
        let value = value.into();
        let author = author_id(&signing_key.verifying_key());
        let signature = sign_record(&key, &value, &author, signing_key);
        Self {
            key,
            value,
            author,
            signature,
            time_received: None,
        }
    }

    /// Stamp the receipt time.
    pub fn received_now(mut self) -> Self {
        self.time_received = Some(Utc::now());
        self
    }

    /// Check the author id and the signature against `key`.
    pub fn verify_with(&self, key: &VerifyingKey) -> Result<(), RecordError> {
        if author_id(key) != self.author {
            return Err(RecordError::AuthorMismatch {
                author: self.author.clone(),
            });
        }

        let sig_bytes: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| RecordError::InvalidSignatureLength(self.signature.len()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify(
            &signing_payload(&self.key, &self.value, &self.author),
            &signature,
        )
        .map_err(|e| RecordError::BadSignature(e.to_string()))
    }
}

/// Decides whether a record can be trusted.
pub trait RecordVerifier: Send + Sync {
    fn verify(&self, record: &SignedRecord) -> bool;
}

/// Thread-safe map of author id to public key.
#[derive(Debug, Default)]
pub struct Keyring {
    keys: RwLock<HashMap<String, VerifyingKey>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a public key; returns its author id.
    pub fn insert(&self, key: VerifyingKey) -> String {
        let id = author_id(&key);
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(id.clone(), key);
        id
    }

    pub fn get(&self, author: &str) -> Option<VerifyingKey> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(author).copied()
    }

    /// Like [`RecordVerifier::verify`] but reports why a record was rejected.
    pub fn check(&self, record: &SignedRecord) -> Result<(), RecordError> {
        let key = self
            .get(&record.author)
            .ok_or_else(|| RecordError::UnknownAuthor(record.author.clone()))?;
        record.verify_with(&key)
    }
}

impl RecordVerifier for Keyring {
    fn verify(&self, record: &SignedRecord) -> bool {
        self.check(record).is_ok()
    }
}
