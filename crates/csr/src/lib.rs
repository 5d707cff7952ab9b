// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PKCS#10 certificate signing request checks.
//!
//! A CSR arriving at the CA is untrusted input. [`verify_csr`] runs the full
//! admission sequence: key policy, proof of possession (the CSR
//! self-signature), identifier extraction and limits, and finally the
//! external name-policy check via [`PolicyAuthority`].
//!
//! Identifiers are only ever read from the requested subjectAltName
//! extension; the subject DN alone never contributes names.

use async_trait::async_trait;
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, SHA_256_WITH_RSA_ENCRYPTION,
    SHA_384_WITH_RSA_ENCRYPTION,
};
use der::Encode;
use goodkey::{KeyAlgorithm, KeyError, KeyPolicy};
use rsa::pkcs8::DecodePublicKey;
use sha2::{Sha256, Sha384};
use signature::Verifier;
use thiserror::Error;
use x509_cert::request::CertReq;

mod names;

pub use names::{cn_from_csr, identifiers_from_csr, CsrIdentifiers};

/// Name-policy oracle. Decides whether the CA is willing to issue for a set
/// of DNS names; the decision logic (blocked lists, label rules, and so on)
/// lives outside the CA core.
#[async_trait]
pub trait PolicyAuthority: Send + Sync {
    async fn willing_to_issue(&self, dns_names: &[String]) -> Result<(), PolicyError>;
}

/// A policy refusal. Surfaced to the requesting user verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PolicyError(pub String);

#[derive(Error, Debug)]
pub enum CsrError {
    #[error("malformed CSR: {0}")]
    Der(String),
    #[error("invalid signature on CSR")]
    BadSignature,
    #[error("unsupported CSR signature algorithm")]
    UnsupportedSignatureAlgorithm,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("at least one identifier is required")]
    NoNames,
    #[error("CSR contains {got} identifiers, more than the allowed {max}")]
    TooManyNames { got: usize, max: usize },
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<der::Error> for CsrError {
    fn from(e: der::Error) -> Self {
        CsrError::Der(e.to_string())
    }
}

/// Full admission check for an inbound CSR. Returns the public key's
/// algorithm family so the caller can pick an issuer pool.
pub async fn verify_csr(
    csr: &CertReq,
    max_names: usize,
    key_policy: &KeyPolicy,
    pa: &dyn PolicyAuthority,
) -> Result<KeyAlgorithm, CsrError> {
    let alg = key_policy.check(&csr.info.public_key)?;
    verify_signature(csr)?;

    let identifiers = identifiers_from_csr(csr)?;
    let total = identifiers.dns_names.len() + identifiers.ip_addresses.len();
    if total == 0 {
        return Err(CsrError::NoNames);
    }
    if total > max_names {
        return Err(CsrError::TooManyNames { got: total, max: max_names });
    }

    pa.willing_to_issue(&identifiers.dns_names).await?;
    Ok(alg)
}

/// Verifies the CSR's self-signature (proof of possession of the subject
/// key) over the DER encoding of CertificationRequestInfo.
pub fn verify_signature(csr: &CertReq) -> Result<(), CsrError> {
    let message = csr.info.to_der()?;
    let signature = csr.signature.as_bytes().ok_or(CsrError::BadSignature)?;
    let spki_der = csr.info.public_key.to_der()?;

    match csr.algorithm.oid {
        SHA_256_WITH_RSA_ENCRYPTION => {
            let key = rsa::RsaPublicKey::from_public_key_der(&spki_der)
                .map_err(|_| CsrError::BadSignature)?;
            let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key);
            let sig = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|_| CsrError::BadSignature)?;
            verifier
                .verify(&message, &sig)
                .map_err(|_| CsrError::BadSignature)
        }
        SHA_384_WITH_RSA_ENCRYPTION => {
            let key = rsa::RsaPublicKey::from_public_key_der(&spki_der)
                .map_err(|_| CsrError::BadSignature)?;
            let verifier = rsa::pkcs1v15::VerifyingKey::<Sha384>::new(key);
            let sig = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|_| CsrError::BadSignature)?;
            verifier
                .verify(&message, &sig)
                .map_err(|_| CsrError::BadSignature)
        }
        ECDSA_WITH_SHA_256 => {
            let key = p256::PublicKey::from_public_key_der(&spki_der)
                .map_err(|_| CsrError::BadSignature)?;
            let verifier = p256::ecdsa::VerifyingKey::from(&key);
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| CsrError::BadSignature)?;
            verifier
                .verify(&message, &sig)
                .map_err(|_| CsrError::BadSignature)
        }
        ECDSA_WITH_SHA_384 => {
            let key = p384::PublicKey::from_public_key_der(&spki_der)
                .map_err(|_| CsrError::BadSignature)?;
            let verifier = p384::ecdsa::VerifyingKey::from(&key);
            let sig = p384::ecdsa::Signature::from_der(signature)
                .map_err(|_| CsrError::BadSignature)?;
            verifier
                .verify(&message, &sig)
                .map_err(|_| CsrError::BadSignature)
        }
        _ => Err(CsrError::UnsupportedSignatureAlgorithm),
    }
}
