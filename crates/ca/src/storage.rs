// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Storage Authority and SCT provider interfaces the CA consumes.
//!
//! Serials cross this boundary as lowercase hex strings. The request
//! structs are owned values so writes can be completed on detached tasks.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Expected absence; an internal signal, never surfaced unchanged.
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSerialRequest {
    pub serial: String,
    pub reg_id: i64,
    pub created: OffsetDateTime,
    pub expires: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPrecertificateRequest {
    /// The lint certificate's DER, not the signed precertificate.
    pub der: Vec<u8>,
    pub reg_id: i64,
    pub issued: OffsetDateTime,
    pub issuer_name_id: i64,
    pub ocsp_not_ready: bool,
}

// Unlike AddPrecertificateRequest this carries no issuer NameID; the final
// certificate table does not record it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddCertificateRequest {
    pub der: Vec<u8>,
    pub reg_id: i64,
    pub issued: OffsetDateTime,
}

/// Durable storage for serials and certificates. Every serial moves through
/// `add_serial` (state "wait"), then `set_certificate_status_ready`
/// (state "good"); rows are never deleted.
#[async_trait]
pub trait StorageAuthority: Send + Sync {
    async fn add_serial(&self, req: AddSerialRequest) -> Result<(), StorageError>;
    async fn add_precertificate(&self, req: AddPrecertificateRequest) -> Result<(), StorageError>;
    async fn set_certificate_status_ready(&self, serial: String) -> Result<(), StorageError>;
    /// Returns the final certificate DER for a serial, or
    /// [`StorageError::NotFound`].
    async fn get_certificate(&self, serial: &str) -> Result<Vec<u8>, StorageError>;
    async fn add_certificate(&self, req: AddCertificateRequest) -> Result<(), StorageError>;
}

#[derive(Error, Debug, Clone)]
#[error("SCT acquisition failed: {0}")]
pub struct SctProviderError(pub String);

/// Gathers enough SCTs for a precertificate to satisfy CT policy.
#[async_trait]
pub trait SctProvider: Send + Sync {
    async fn get_scts(&self, precert_der: &[u8]) -> Result<Vec<Vec<u8>>, SctProviderError>;
}
