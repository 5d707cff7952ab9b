// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Issuer identities: signing key handles, NameIDs, and the
//! prepare/lint/issue cycle.

use std::fmt;

use const_oid::db::rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER;
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, SHA_256_WITH_RSA_ENCRYPTION,
};
use der::asn1::{Any, AnyRef, BitString};
use der::{Decode, Encode};
use goodkey::KeyAlgorithm;
use lints::{Battery, LintError};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use serde::Serialize;
use sha2::{Digest, Sha256};
use signature::Signer;
use thiserror::Error;
use time::OffsetDateTime;
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use x509_cert::name::Name;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::{Certificate, TbsCertificate};

use crate::profile::Profile;
use crate::request::{common_name, IssuanceRequest};
use crate::tbs;

/// Stable 64-bit identifier for an issuer, derived from the DER encoding of
/// its Subject DN. Certificates signed by an issuer can be mapped back to it
/// through their Issuer DN without configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NameId(i64);

impl NameId {
    pub fn from_name(name: &Name) -> Result<NameId, der::Error> {
        let der = name.to_der()?;
        let digest = Sha256::digest(&der);
        let mut first = [0u8; 8];
        first.copy_from_slice(&digest[..8]);
        Ok(NameId(i64::from_be_bytes(first)))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for NameId {
    fn from(v: i64) -> Self {
        NameId(v)
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum SignError {
    #[error("hardware token failure: {0}")]
    Token(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("could not encode public key: {0}")]
    PublicKey(String),
}

/// An opaque signing key, typically living in an HSM. Implementations must
/// be safe to call from multiple tasks at once.
pub trait KeyHandle: Send + Sync {
    fn algorithm(&self) -> KeyAlgorithm;
    fn signature_algorithm(&self) -> AlgorithmIdentifierOwned;
    fn public_key_der(&self) -> Result<Vec<u8>, SignError>;
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// The key material an issuer signs with. Software-held RSA and ECDSA keys
/// are supported directly; anything else (PKCS#11 sessions in particular)
/// plugs in through [`KeyHandle`].
pub enum SigningKey {
    Rsa {
        key: rsa::pkcs1v15::SigningKey<Sha256>,
        public: rsa::RsaPublicKey,
    },
    EcdsaP256(p256::ecdsa::SigningKey),
    EcdsaP384(p384::ecdsa::SigningKey),
    Remote(Box<dyn KeyHandle>),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKey::Rsa { .. } => write!(f, "SigningKey::Rsa"),
            SigningKey::EcdsaP256(_) => write!(f, "SigningKey::EcdsaP256"),
            SigningKey::EcdsaP384(_) => write!(f, "SigningKey::EcdsaP384"),
            SigningKey::Remote(_) => write!(f, "SigningKey::Remote"),
        }
    }
}

impl SigningKey {
    pub fn rsa(private: rsa::RsaPrivateKey) -> SigningKey {
        let public = private.to_public_key();
        SigningKey::Rsa {
            key: rsa::pkcs1v15::SigningKey::new(private),
            public,
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            SigningKey::Rsa { .. } => KeyAlgorithm::Rsa,
            SigningKey::EcdsaP256(_) | SigningKey::EcdsaP384(_) => KeyAlgorithm::Ecdsa,
            SigningKey::Remote(handle) => handle.algorithm(),
        }
    }

    pub fn signature_algorithm(&self) -> AlgorithmIdentifierOwned {
        match self {
            SigningKey::Rsa { .. } => AlgorithmIdentifierOwned {
                oid: SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(Any::from(AnyRef::NULL)),
            },
            SigningKey::EcdsaP256(_) => AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA_256,
                parameters: None,
            },
            SigningKey::EcdsaP384(_) => AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA_384,
                parameters: None,
            },
            SigningKey::Remote(handle) => handle.signature_algorithm(),
        }
    }

    pub fn public_key_der(&self) -> Result<Vec<u8>, SignError> {
        match self {
            SigningKey::Rsa { public, .. } => Ok(public
                .to_public_key_der()
                .map_err(|e| SignError::PublicKey(e.to_string()))?
                .into_vec()),
            SigningKey::EcdsaP256(key) => Ok(key
                .verifying_key()
                .to_public_key_der()
                .map_err(|e| SignError::PublicKey(e.to_string()))?
                .into_vec()),
            SigningKey::EcdsaP384(key) => Ok(key
                .verifying_key()
                .to_public_key_der()
                .map_err(|e| SignError::PublicKey(e.to_string()))?
                .into_vec()),
            SigningKey::Remote(handle) => handle.public_key_der(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignError> {
        match self {
            SigningKey::Rsa { key, .. } => {
                use signature::SignatureEncoding;
                let sig = key
                    .try_sign(message)
                    .map_err(|e| SignError::Signing(e.to_string()))?;
                Ok(sig.to_vec())
            }
            SigningKey::EcdsaP256(key) => {
                let sig: p256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| SignError::Signing(e.to_string()))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            SigningKey::EcdsaP384(key) => {
                let sig: p384::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| SignError::Signing(e.to_string()))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            SigningKey::Remote(handle) => handle.sign(message),
        }
    }

    /// A throwaway key of the same algorithm family, used to pseudo-sign
    /// lint certificates. RSA and ECDSA PKCS#1 v1.5 / RFC 6979 signing are
    /// deterministic, so the lint certificate is reproducible.
    fn throwaway_like(&self) -> Result<SigningKey, IssuerError> {
        match self.algorithm() {
            KeyAlgorithm::Rsa => {
                let key = rsa::RsaPrivateKey::new(&mut OsRng, 2048)
                    .map_err(|e| IssuerError::LintSigner(e.to_string()))?;
                Ok(SigningKey::rsa(key))
            }
            KeyAlgorithm::Ecdsa => match self {
                SigningKey::EcdsaP384(_) => Ok(SigningKey::EcdsaP384(
                    p384::ecdsa::SigningKey::random(&mut OsRng),
                )),
                _ => Ok(SigningKey::EcdsaP256(p256::ecdsa::SigningKey::random(
                    &mut OsRng,
                ))),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("could not parse issuer certificate: {0}")]
    CertParse(String),
    #[error("issuer signing key does not match issuer certificate")]
    KeyMismatch,
    #[error("issuer certificate has no subject key identifier")]
    MissingSubjectKeyId,
    #[error("issuer certificate has no common name")]
    MissingCommonName,
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("could not generate lint signer: {0}")]
    LintSigner(String),
}

#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("linting failed: {0}")]
    Lint(#[from] LintError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("DER error: {0}")]
    Der(String),
    #[error("invalid issuance request: {0}")]
    InvalidRequest(String),
    #[error("issuance token was prepared by a different issuer")]
    TokenIssuerMismatch,
}

impl From<der::Error> for IssuanceError {
    fn from(e: der::Error) -> Self {
        IssuanceError::Der(e.to_string())
    }
}

/// A staged, linted TBSCertificate waiting for its one real signature.
/// Deliberately neither `Clone` nor `Copy`: [`Issuer::issue`] consumes it.
#[derive(Debug)]
pub struct IssuanceToken {
    pub(crate) tbs: TbsCertificate,
    pub(crate) signature_algorithm: AlgorithmIdentifierOwned,
    pub(crate) issuer: NameId,
}

/// Everything about an issuer other than the certificate and key.
pub struct IssuerOptions {
    pub active: bool,
    pub ocsp_url: Option<String>,
    pub issuer_url: Option<String>,
    pub battery: Battery,
}

/// A signing identity: CA certificate plus the key that matches it.
pub struct Issuer {
    name: String,
    cert: Certificate,
    name_id: NameId,
    subject_key_id: Vec<u8>,
    key: SigningKey,
    lint_key: SigningKey,
    battery: Battery,
    active: bool,
    root: bool,
    ocsp_url: Option<String>,
    issuer_url: Option<String>,
    not_after: OffsetDateTime,
}

impl fmt::Debug for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issuer")
            .field("name", &self.name)
            .field("name_id", &self.name_id)
            .field("active", &self.active)
            .finish()
    }
}

impl Issuer {
    /// Loads an issuer from its certificate and signing key. The key must
    /// match the certificate's SubjectPublicKeyInfo byte for byte.
    pub fn new(cert_der: &[u8], key: SigningKey, options: IssuerOptions) -> Result<Issuer, IssuerError> {
        let cert =
            Certificate::from_der(cert_der).map_err(|e| IssuerError::CertParse(e.to_string()))?;

        let cert_spki = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| IssuerError::CertParse(e.to_string()))?;
        if key.public_key_der()? != cert_spki {
            return Err(IssuerError::KeyMismatch);
        }

        let name =
            common_name(&cert.tbs_certificate.subject).ok_or(IssuerError::MissingCommonName)?;
        let name_id = NameId::from_name(&cert.tbs_certificate.subject)
            .map_err(|e| IssuerError::CertParse(e.to_string()))?;

        let subject_key_id = cert
            .tbs_certificate
            .extensions
            .as_ref()
            .and_then(|exts| {
                exts.iter()
                    .find(|e| e.extn_id == ID_CE_SUBJECT_KEY_IDENTIFIER)
            })
            .and_then(|e| SubjectKeyIdentifier::from_der(e.extn_value.as_bytes()).ok())
            .map(|skid| skid.0.as_bytes().to_vec())
            .ok_or(IssuerError::MissingSubjectKeyId)?;

        let subject_der = cert
            .tbs_certificate
            .subject
            .to_der()
            .map_err(|e| IssuerError::CertParse(e.to_string()))?;
        let issuer_der = cert
            .tbs_certificate
            .issuer
            .to_der()
            .map_err(|e| IssuerError::CertParse(e.to_string()))?;

        let not_after = tbs::offset_time(&cert.tbs_certificate.validity.not_after);
        let lint_key = key.throwaway_like()?;

        Ok(Issuer {
            name,
            root: subject_der == issuer_der,
            cert,
            name_id,
            subject_key_id,
            key,
            lint_key,
            battery: options.battery,
            active: options.active,
            ocsp_url: options.ocsp_url,
            issuer_url: options.issuer_url,
            not_after,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_id(&self) -> NameId {
        self.name_id
    }

    pub fn key_type(&self) -> KeyAlgorithm {
        self.key.algorithm()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn cert(&self) -> &Certificate {
        &self.cert
    }

    /// Expiry of the issuer's own certificate. Nothing signed by this issuer
    /// may outlive it.
    pub fn cert_not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub(crate) fn subject_key_id(&self) -> &[u8] {
        &self.subject_key_id
    }

    pub(crate) fn subject(&self) -> &Name {
        &self.cert.tbs_certificate.subject
    }

    pub(crate) fn ocsp_url(&self) -> Option<&str> {
        self.ocsp_url.as_deref()
    }

    pub(crate) fn issuer_url(&self) -> Option<&str> {
        self.issuer_url.as_deref()
    }

    pub(crate) fn signature_algorithm(&self) -> AlgorithmIdentifierOwned {
        self.key.signature_algorithm()
    }

    /// Stage one: build the TBS, pseudo-sign it with the throwaway key, lint
    /// the result, and hand back the lint DER plus a token for stage two.
    pub fn prepare(
        &self,
        profile: &Profile,
        req: &IssuanceRequest,
    ) -> Result<(Vec<u8>, IssuanceToken), IssuanceError> {
        self.check_request(req)?;

        let tbs = tbs::build_tbs(self, profile, req)?;
        let tbs_der = tbs.to_der()?;

        let lint_sig = self.lint_key.sign(&tbs_der)?;
        let lint_cert = Certificate {
            tbs_certificate: tbs.clone(),
            signature_algorithm: self.signature_algorithm(),
            signature: BitString::from_bytes(&lint_sig)?,
        };
        let lint_der = lint_cert.to_der()?;

        // Re-parse so the battery sees exactly what a relying party would.
        let parsed = Certificate::from_der(&lint_der)?;
        self.battery.check(&parsed)?;

        let token = IssuanceToken {
            tbs,
            signature_algorithm: self.signature_algorithm(),
            issuer: self.name_id,
        };
        Ok((lint_der, token))
    }

    /// Stage two: the real signature. Consumes the token.
    pub fn issue(&self, token: IssuanceToken) -> Result<Vec<u8>, IssuanceError> {
        if token.issuer != self.name_id {
            return Err(IssuanceError::TokenIssuerMismatch);
        }
        let tbs_der = token.tbs.to_der()?;
        let signature = self.key.sign(&tbs_der)?;
        let cert = Certificate {
            tbs_certificate: token.tbs,
            signature_algorithm: token.signature_algorithm,
            signature: BitString::from_bytes(&signature)?,
        };
        Ok(cert.to_der()?)
    }

    fn check_request(&self, req: &IssuanceRequest) -> Result<(), IssuanceError> {
        if req.dns_names.is_empty() && req.ip_addresses.is_empty() {
            return Err(IssuanceError::InvalidRequest(
                "request carries no identifiers".into(),
            ));
        }
        if req.serial.len() < 9 || req.serial.len() > 19 {
            return Err(IssuanceError::InvalidRequest(format!(
                "serial must be 9 to 19 bytes, got {}",
                req.serial.len()
            )));
        }
        if req.subject_key_id.len() != 20 {
            return Err(IssuanceError::InvalidRequest(
                "subject key identifier must be 20 bytes".into(),
            ));
        }
        if req.include_ct_poison == !req.sct_list.is_empty() {
            return Err(IssuanceError::InvalidRequest(
                "exactly one of the CT poison and an SCT list is required".into(),
            ));
        }
        if req.not_after <= req.not_before {
            return Err(IssuanceError::InvalidRequest(
                "notAfter is not later than notBefore".into(),
            ));
        }
        if req.not_after > self.not_after {
            return Err(IssuanceError::InvalidRequest(
                "certificate would expire after the issuer certificate".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Profile, ProfileConfig};
    use crate::request::IssuanceRequest;
    use crate::sct;
    use crate::test_helpers::{fake_sct, test_issuer_ecdsa, test_issuer_rsa, TestKey};
    use time::macros::datetime;
    use time::Duration;

    fn test_profile() -> Profile {
        Profile::new(&ProfileConfig {
            validity: Duration::days(90),
            backdate: Duration::hours(1),
            include_client_auth: false,
            omit_common_name: false,
        })
        .unwrap()
    }

    fn test_request(include_ct_poison: bool, scts: Vec<sct::Sct>) -> IssuanceRequest {
        let key = TestKey::new_p256();
        let spki = key.spki();
        let digest = Sha256::digest(spki.subject_public_key.raw_bytes());
        let mut serial = vec![0x7f];
        serial.extend_from_slice(&[0xab; 16]);
        let not_before = datetime!(2024-03-01 00:00 UTC);
        IssuanceRequest {
            public_key: spki,
            subject_key_id: digest[..20].to_vec(),
            serial,
            dns_names: vec!["example.com".to_string()],
            ip_addresses: Vec::new(),
            common_name: Some("example.com".to_string()),
            include_ct_poison,
            sct_list: scts,
            not_before,
            not_after: not_before + Duration::days(90),
        }
    }

    #[test]
    fn prepare_then_issue_yields_identical_tbs() {
        let issuer = test_issuer_ecdsa("Test ECDSA Root");
        let (lint_der, token) = issuer
            .prepare(&test_profile(), &test_request(true, Vec::new()))
            .unwrap();
        let cert_der = issuer.issue(token).unwrap();

        let lint = Certificate::from_der(&lint_der).unwrap();
        let cert = Certificate::from_der(&cert_der).unwrap();
        assert_eq!(
            lint.tbs_certificate.to_der().unwrap(),
            cert.tbs_certificate.to_der().unwrap()
        );
        // the lint signature must not be the real one
        assert_ne!(lint.signature, cert.signature);
    }

    #[test]
    fn precert_carries_critical_poison() {
        let issuer = test_issuer_rsa("Test RSA Root");
        let (lint_der, _token) = issuer
            .prepare(&test_profile(), &test_request(true, Vec::new()))
            .unwrap();
        let lint = Certificate::from_der(&lint_der).unwrap();
        let exts = lint.tbs_certificate.extensions.unwrap();
        let poison = exts
            .iter()
            .find(|e| e.extn_id == lints::CT_POISON_OID)
            .expect("poison extension");
        assert!(poison.critical);
        assert!(!exts.iter().any(|e| e.extn_id == lints::SCT_LIST_OID));
    }

    #[test]
    fn final_cert_carries_sct_list_and_no_poison() {
        let issuer = test_issuer_ecdsa("Test ECDSA Root");
        let (lint_der, _token) = issuer
            .prepare(&test_profile(), &test_request(false, vec![fake_sct(1), fake_sct(2)]))
            .unwrap();
        let lint = Certificate::from_der(&lint_der).unwrap();
        let exts = lint.tbs_certificate.extensions.unwrap();
        assert!(!exts.iter().any(|e| e.extn_id == lints::CT_POISON_OID));
        let sct_ext = exts
            .iter()
            .find(|e| e.extn_id == lints::SCT_LIST_OID)
            .expect("sct list extension");
        let scts = sct::scts_from_extension(sct_ext).unwrap();
        assert_eq!(scts, vec![fake_sct(1), fake_sct(2)]);
    }

    #[test]
    fn rejects_request_with_poison_and_scts() {
        let issuer = test_issuer_ecdsa("Test ECDSA Root");
        let err = issuer
            .prepare(&test_profile(), &test_request(true, vec![fake_sct(1)]))
            .unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidRequest(_)));
    }

    #[test]
    fn rejects_request_outliving_issuer() {
        let issuer = test_issuer_ecdsa("Test ECDSA Root");
        let mut req = test_request(true, Vec::new());
        req.not_after = issuer.cert_not_after() + time::Duration::days(1);
        let err = issuer.prepare(&test_profile(), &req).unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidRequest(_)));
    }

    #[test]
    fn token_from_another_issuer_is_refused() {
        let one = test_issuer_ecdsa("Test ECDSA Root One");
        let two = test_issuer_ecdsa("Test ECDSA Root Two");
        let (_lint, token) = one
            .prepare(&test_profile(), &test_request(true, Vec::new()))
            .unwrap();
        let err = two.issue(token).unwrap_err();
        assert!(matches!(err, IssuanceError::TokenIssuerMismatch));
    }

    #[test]
    fn name_id_is_stable_per_subject() {
        let one = test_issuer_ecdsa("Test Stable Root");
        let two = test_issuer_rsa("Test Stable Root");
        // same subject DN, same NameID, regardless of key
        assert_eq!(one.name_id(), two.name_id());
        let other = test_issuer_ecdsa("Test Other Root");
        assert_ne!(one.name_id(), other.name_id());
    }

    #[test]
    fn issuer_key_must_match_certificate() {
        use crate::test_helpers::{issuer_options, self_signed_root};
        let cert_key = TestKey::new_p256();
        let cert_der = self_signed_root(&cert_key, "Test Mismatch Root", datetime!(2045-01-01 00:00 UTC));
        let other = SigningKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut OsRng));
        let err = Issuer::new(&cert_der, other, issuer_options()).unwrap_err();
        assert!(matches!(err, IssuerError::KeyMismatch));
    }
}
