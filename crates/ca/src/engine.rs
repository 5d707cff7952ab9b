// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The issuance engine.
//!
//! One issuance is two signings over the same request: first the
//! precertificate (CT poison included), then, once SCTs are in hand, the
//! final certificate with the poison swapped for the SCT list. The Storage
//! Authority sequence per request is fixed: `add_serial`, then
//! `add_precertificate` with the lint DER, then the precert signature, then
//! `set_certificate_status_ready`, and finally `add_certificate`.
//! Concurrent issuances never interact; they use disjoint serials.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use csr::{CsrError, PolicyAuthority};
use der::{Decode, Header, Reader, SliceReader, Tag};
use goodkey::{KeyAlgorithm, KeyPolicy};
use issuance::sct::Sct;
use issuance::{
    request_from_precert, IssuanceError, IssuanceRequest, Issuer, NameId, Profile, ProfileConfig,
    ProfileError,
};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info};
use x509_cert::request::CertReq;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

use crate::clock::Clock;
use crate::error::Error;
use crate::metrics::CaMetrics;
use crate::storage::{
    AddCertificateRequest, AddPrecertificateRequest, AddSerialRequest, SctProvider,
    StorageAuthority, StorageError,
};

/// Serials are one prefix byte plus sixteen CSPRNG bytes.
const SERIAL_BYTES: usize = 17;

const PURPOSE_PRECERTIFICATE: &str = "precertificate";
const PURPOSE_CERTIFICATE: &str = "certificate";

/// One inbound issuance request, as handed over by the front end.
#[derive(Debug, Clone)]
pub struct IssueCertificateRequest {
    /// DER-encoded PKCS#10 CSR.
    pub csr: Vec<u8>,
    pub registration_id: i64,
    pub order_id: i64,
    pub profile_name: String,
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("serial prefix must be between 0x01 and 0x7f")]
    SerialPrefix,
    #[error("at least one issuer is required")]
    NoIssuers,
    #[error("at least one certificate profile is required")]
    NoProfiles,
    #[error("two issuers with the same NameID {0} ({1}) configured")]
    DuplicateNameId(NameId, String),
    #[error("no active RSA issuers configured")]
    NoRsaIssuers,
    #[error("no active ECDSA issuers configured")]
    NoEcdsaIssuers,
    #[error("invalid profile {name}: {source}")]
    Profile {
        name: String,
        #[source]
        source: ProfileError,
    },
}

struct CertProfile {
    name: String,
    profile: Profile,
}

/// Dual index over the configured issuers: by public-key algorithm for
/// selecting who signs a new (pre)certificate, and by NameID for re-opening
/// existing ones. Only active issuers enter the by-algorithm pools.
#[derive(Debug)]
struct IssuerMaps {
    by_alg: HashMap<KeyAlgorithm, Vec<Arc<Issuer>>>,
    by_name_id: HashMap<NameId, Arc<Issuer>>,
}

fn make_issuer_maps(issuers: Vec<Issuer>) -> Result<IssuerMaps, SetupError> {
    let mut by_alg: HashMap<KeyAlgorithm, Vec<Arc<Issuer>>> = HashMap::with_capacity(2);
    let mut by_name_id: HashMap<NameId, Arc<Issuer>> = HashMap::with_capacity(issuers.len());
    for issuer in issuers {
        let issuer = Arc::new(issuer);
        if by_name_id.contains_key(&issuer.name_id()) {
            return Err(SetupError::DuplicateNameId(
                issuer.name_id(),
                issuer.name().to_string(),
            ));
        }
        by_name_id.insert(issuer.name_id(), Arc::clone(&issuer));
        if issuer.is_active() {
            by_alg.entry(issuer.key_type()).or_default().push(issuer);
        }
    }
    if by_alg.get(&KeyAlgorithm::Ecdsa).map_or(true, Vec::is_empty) {
        return Err(SetupError::NoEcdsaIssuers);
    }
    if by_alg.get(&KeyAlgorithm::Rsa).map_or(true, Vec::is_empty) {
        return Err(SetupError::NoRsaIssuers);
    }
    Ok(IssuerMaps { by_alg, by_name_id })
}

/// A CA that signs precertificates and certificates.
pub struct CertificateAuthority {
    sa: Arc<dyn StorageAuthority>,
    sct_provider: Option<Arc<dyn SctProvider>>,
    pa: Arc<dyn PolicyAuthority>,
    issuers: IssuerMaps,
    profiles: HashMap<String, Arc<CertProfile>>,
    serial_prefix: u8,
    max_names: usize,
    key_policy: KeyPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<CaMetrics>,
    propagate_cancels: bool,
}

impl CertificateAuthority {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sa: Arc<dyn StorageAuthority>,
        sct_provider: Option<Arc<dyn SctProvider>>,
        pa: Arc<dyn PolicyAuthority>,
        issuers: Vec<Issuer>,
        certificate_profiles: &HashMap<String, ProfileConfig>,
        serial_prefix: u8,
        max_names: usize,
        key_policy: KeyPolicy,
        clock: Arc<dyn Clock>,
        metrics: Arc<CaMetrics>,
        propagate_cancels: bool,
    ) -> Result<CertificateAuthority, SetupError> {
        if !(0x01..=0x7f).contains(&serial_prefix) {
            return Err(SetupError::SerialPrefix);
        }
        if issuers.is_empty() {
            return Err(SetupError::NoIssuers);
        }
        if certificate_profiles.is_empty() {
            return Err(SetupError::NoProfiles);
        }

        let mut profiles = HashMap::with_capacity(certificate_profiles.len());
        for (name, config) in certificate_profiles {
            let profile = Profile::new(config).map_err(|source| SetupError::Profile {
                name: name.clone(),
                source,
            })?;
            profiles.insert(
                name.clone(),
                Arc::new(CertProfile { name: name.clone(), profile }),
            );
        }

        Ok(CertificateAuthority {
            sa,
            sct_provider,
            pa,
            issuers: make_issuer_maps(issuers)?,
            profiles,
            serial_prefix,
            max_names,
            key_policy,
            clock,
            metrics,
            propagate_cancels,
        })
    }

    /// The single entry point: precertificate, SCT acquisition, final
    /// certificate. Any failure abandons the serial; a retry by the caller
    /// gets a fresh one.
    pub async fn issue_certificate(&self, req: &IssueCertificateRequest) -> Result<Vec<u8>, Error> {
        if req.csr.is_empty() || req.registration_id == 0 || req.order_id == 0 {
            return Err(Error::internal("incomplete issue certificate request"));
        }
        let Some(sct_provider) = self.sct_provider.as_ref() else {
            return Err(Error::internal("issue certificate called with no SCT provider"));
        };
        let profile = self.profile(&req.profile_name)?;

        let precert_der = self.issue_precertificate(&profile, req).await?;

        let sct_ders = sct_provider
            .get_scts(&precert_der)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;

        self.issue_certificate_for_precertificate(
            &precert_der,
            &sct_ders,
            req.registration_id,
            req.order_id,
            &req.profile_name,
        )
        .await
    }

    /// Allocates and stores a serial, builds and lints the precertificate,
    /// persists the lint DER, signs, and promotes the serial to "good".
    async fn issue_precertificate(
        &self,
        profile: &CertProfile,
        req: &IssueCertificateRequest,
    ) -> Result<Vec<u8>, Error> {
        let serial = generate_serial(self.serial_prefix)?;
        let serial_hex = hex::encode(&serial);
        let (not_before, not_after) = profile.profile.generate_validity(self.clock.now());

        let add_serial = AddSerialRequest {
            serial: serial_hex.clone(),
            reg_id: req.registration_id,
            created: self.clock.now(),
            expires: not_after,
        };
        let sa = Arc::clone(&self.sa);
        self.severed(async move { sa.add_serial(add_serial).await })
            .await?;

        let precert_der = self
            .issue_precertificate_inner(profile, req, serial, not_before, not_after)
            .await?;

        let sa = Arc::clone(&self.sa);
        let ready_serial = serial_hex.clone();
        self.severed(async move { sa.set_certificate_status_ready(ready_serial).await })
            .await?;

        Ok(precert_der)
    }

    async fn issue_precertificate_inner(
        &self,
        profile: &CertProfile,
        issue_req: &IssueCertificateRequest,
        serial: Vec<u8>,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<Vec<u8>, Error> {
        let parsed_csr = CertReq::from_der(&issue_req.csr)
            .map_err(|e| Error::malformed(format!("unable to parse CSR: {e}")))?;

        let alg = csr::verify_csr(&parsed_csr, self.max_names, &self.key_policy, self.pa.as_ref())
            .await
            .map_err(|e| {
                let err = csr_error(e);
                error!(target: "audit", error = %err, "CSR rejected");
                err
            })?;

        let pool = self
            .issuers
            .by_alg
            .get(&alg)
            .filter(|pool| !pool.is_empty())
            .ok_or_else(|| {
                Error::internal(format!("no issuers found for public key algorithm {alg}"))
            })?;
        let issuer = &pool[rand::thread_rng().gen_range(0..pool.len())];

        if issuer.cert_not_after() < not_after {
            let err =
                Error::internal("cannot issue a certificate that expires after the issuer certificate");
            error!(target: "audit", error = %err, issuer = issuer.name(), "issuance refused");
            return Err(err);
        }

        let identifiers = csr::identifiers_from_csr(&parsed_csr).map_err(csr_error)?;
        let serial_hex = hex::encode(&serial);

        let request = IssuanceRequest {
            public_key: parsed_csr.info.public_key.clone(),
            subject_key_id: generate_skid(&parsed_csr.info.public_key),
            serial,
            dns_names: identifiers.dns_names,
            ip_addresses: identifiers.ip_addresses,
            common_name: csr::cn_from_csr(&parsed_csr),
            include_ct_poison: true,
            sct_list: Vec::new(),
            not_before,
            not_after,
        };

        let (lint_der, token) = issuer.prepare(&profile.profile, &request).map_err(|e| {
            error!(target: "audit", serial = %serial_hex, error = %e, "Preparing precert failed");
            if matches!(e, IssuanceError::Lint(_)) {
                self.metrics.note_lint_error();
            }
            Error::internal(format!("failed to prepare precertificate signing: {e}"))
        })?;

        // The lint DER is persisted before signing, and on a detached task:
        // even if the client hangs up mid-request, the row that makes this
        // serial revocable must land.
        let sa = Arc::clone(&self.sa);
        let add_precert = AddPrecertificateRequest {
            der: lint_der.clone(),
            reg_id: issue_req.registration_id,
            issued: self.clock.now(),
            issuer_name_id: issuer.name_id().as_i64(),
            ocsp_not_ready: true,
        };
        detached(async move { sa.add_precertificate(add_precert).await }).await?;

        let mut event = IssuanceEvent {
            csr: Some(hex::encode(&issue_req.csr)),
            issuance_request: &request,
            issuer: issuer.name(),
            order_id: issue_req.order_id,
            profile: &profile.name,
            requester: issue_req.registration_id,
            precertificate: None,
            certificate: None,
        };
        audit_object("Signing precert", &event);

        let precert_der = issuer.issue(token).map_err(|e| {
            self.metrics.note_sign_error(&e);
            error!(target: "audit", serial = %serial_hex, error = %e, "Signing precert failed");
            Error::internal(format!("failed to sign precertificate: {e}"))
        })?;

        tbs_cert_is_deterministic(&lint_der, &precert_der)?;

        self.metrics.note_signature(PURPOSE_PRECERTIFICATE, issuer.name());
        // The CSR is big and not that informative, so don't log it twice.
        event.csr = None;
        event.precertificate = Some(hex::encode(&precert_der));
        audit_object("Signing precert success", &event);

        Ok(precert_der)
    }

    /// Turns a precertificate plus SCTs into the final certificate.
    ///
    /// Must be called at most once per serial. The front end guarantees
    /// this structurally (one call per `issue_certificate`, fresh serial
    /// per attempt); the `get_certificate` probe here is belt and braces
    /// against signing divergent final certificates over one precert.
    pub async fn issue_certificate_for_precertificate(
        &self,
        precert_der: &[u8],
        sct_ders: &[Vec<u8>],
        registration_id: i64,
        order_id: i64,
        profile_name: &str,
    ) -> Result<Vec<u8>, Error> {
        let profile = self.profile(profile_name)?;
        let precert = Certificate::from_der(precert_der)
            .map_err(|e| Error::internal(format!("unable to parse precertificate: {e}")))?;
        let serial_hex = hex::encode(precert.tbs_certificate.serial_number.as_bytes());

        match self.sa.get_certificate(&serial_hex).await {
            Ok(_) => {
                let err = Error::internal(format!(
                    "issuance of duplicate final certificate requested: {serial_hex}"
                ));
                error!(target: "audit", error = %err, "duplicate final certificate");
                return Err(err);
            }
            Err(StorageError::NotFound) => {}
            Err(e) => {
                return Err(Error::internal(format!(
                    "error checking for duplicate issuance of {serial_hex}: {e}"
                )));
            }
        }

        let mut scts = Vec::with_capacity(sct_ders.len());
        for der in sct_ders {
            scts.push(
                Sct::parse(der).map_err(|e| Error::internal(format!("unable to parse SCT: {e}")))?,
            );
        }

        let issuer_name_id = NameId::from_name(&precert.tbs_certificate.issuer)
            .map_err(|e| Error::internal(e.to_string()))?;
        let issuer = self.issuers.by_name_id.get(&issuer_name_id).ok_or_else(|| {
            Error::internal(format!("no issuer found for issuer name {issuer_name_id}"))
        })?;

        let request = request_from_precert(&precert, scts)
            .map_err(|e| Error::internal(format!("unable to reconstruct issuance request: {e}")))?;

        let (lint_der, token) = issuer.prepare(&profile.profile, &request).map_err(|e| {
            error!(target: "audit", serial = %serial_hex, error = %e, "Preparing cert failed");
            if matches!(e, IssuanceError::Lint(_)) {
                self.metrics.note_lint_error();
            }
            Error::internal(format!("failed to prepare certificate signing: {e}"))
        })?;

        let mut event = IssuanceEvent {
            csr: None,
            issuance_request: &request,
            issuer: issuer.name(),
            order_id,
            profile: &profile.name,
            requester: registration_id,
            precertificate: None,
            certificate: None,
        };
        audit_object("Signing cert", &event);

        let cert_der = issuer.issue(token).map_err(|e| {
            self.metrics.note_sign_error(&e);
            error!(target: "audit", serial = %serial_hex, error = %e, "Signing cert failed");
            Error::internal(format!("failed to sign certificate: {e}"))
        })?;

        tbs_cert_is_deterministic(&lint_der, &cert_der)?;

        self.metrics.note_signature(PURPOSE_CERTIFICATE, issuer.name());
        self.metrics.note_certificate(&profile.name);
        event.certificate = Some(hex::encode(&cert_der));
        audit_object("Signing cert success", &event);

        let sa = Arc::clone(&self.sa);
        let add_cert = AddCertificateRequest {
            der: cert_der.clone(),
            reg_id: registration_id,
            issued: self.clock.now(),
        };
        self.severed(async move { sa.add_certificate(add_cert).await })
            .await
            .map_err(|e| {
                error!(target: "audit", serial = %serial_hex, error = %e, "Failed to store certificate");
                Error::from(e)
            })?;

        Ok(cert_der)
    }

    fn profile(&self, name: &str) -> Result<Arc<CertProfile>, Error> {
        self.profiles.get(name).cloned().ok_or_else(|| {
            Error::not_found(format!("the CA is incapable of using a profile named {name}"))
        })
    }

    /// Runs a storage write either inline (cancellation propagates) or on a
    /// spawned task that survives the caller being dropped, depending on
    /// the `propagate_cancels` setting.
    async fn severed<T, F>(&self, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.propagate_cancels {
            fut.await
        } else {
            detached(fut).await
        }
    }
}

/// Always runs on a spawned task; the write completes even if the awaiting
/// request future is dropped.
async fn detached<T, F>(fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => Err(StorageError::Other(format!("storage task failed: {e}"))),
    }
}

fn csr_error(e: CsrError) -> Error {
    match e {
        CsrError::Key(_) => Error::bad_public_key(e.to_string()),
        _ => Error::malformed(e.to_string()),
    }
}

/// A fresh serial: the configured prefix byte followed by sixteen bytes of
/// CSPRNG output. The prefix is below 0x80, so the big-endian integer is
/// positive.
fn generate_serial(prefix: u8) -> Result<Vec<u8>, Error> {
    let mut serial = vec![0u8; SERIAL_BYTES];
    serial[0] = prefix;
    OsRng.try_fill_bytes(&mut serial[1..]).map_err(|e| {
        let err = Error::internal(format!("failed to generate serial: {e}"));
        error!(target: "audit", error = %err, "Serial randomness failed");
        err
    })?;
    Ok(serial)
}

/// RFC 7093 section 2, method 1: the leftmost 160 bits of the SHA-256 hash
/// of the subjectPublicKey BIT STRING value (no tag, length, or unused-bit
/// count).
fn generate_skid(spki: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    let digest = Sha256::digest(spki.subject_public_key.raw_bytes());
    digest[..20].to_vec()
}

/// Checks that two certificates carry byte-identical TBSCertificate
/// octets. A mismatch after signing means the signer did not sign what was
/// linted, which is misissuance; the caller must abort.
fn tbs_cert_is_deterministic(lint_der: &[u8], leaf_der: &[u8]) -> Result<(), Error> {
    if lint_der.is_empty() || leaf_der.is_empty() {
        return Err(Error::internal("lint or leaf certificate bytes were empty"));
    }
    let lint_tbs = extract_tbs(lint_der)
        .map_err(|e| Error::internal(format!("while extracting lint TBS cert: {e}")))?;
    let leaf_tbs = extract_tbs(leaf_der)
        .map_err(|e| Error::internal(format!("while extracting leaf TBS cert: {e}")))?;
    if lint_tbs != leaf_tbs {
        return Err(Error::internal(format!(
            "mismatch between lint and leaf TBSCertificate DER bytes: \"{}\" != \"{}\"",
            hex::encode(lint_tbs),
            hex::encode(leaf_tbs)
        )));
    }
    Ok(())
}

/// A minimal pull parse of the two outer SEQUENCEs of a certificate,
/// returning the TBSCertificate contents. Far cheaper than a full
/// certificate parse.
fn extract_tbs(input: &[u8]) -> Result<&[u8], String> {
    let mut reader = SliceReader::new(input).map_err(|e| e.to_string())?;
    let outer = Header::decode(&mut reader).map_err(|_| "malformed certificate".to_string())?;
    if outer.tag != Tag::Sequence {
        return Err("malformed certificate".to_string());
    }
    let inner = Header::decode(&mut reader).map_err(|_| "malformed tbs certificate".to_string())?;
    if inner.tag != Tag::Sequence {
        return Err("malformed tbs certificate".to_string());
    }
    let tbs = reader.read_slice(inner.length).map_err(|e| e.to_string())?;
    if tbs.is_empty() {
        return Err("parsed TBSCertificate was empty".to_string());
    }
    Ok(tbs)
}

#[derive(Serialize)]
struct IssuanceEvent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    csr: Option<String>,
    issuance_request: &'a IssuanceRequest,
    issuer: &'a str,
    order_id: i64,
    profile: &'a str,
    requester: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    precertificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate: Option<String>,
}

fn audit_object(message: &str, event: &IssuanceEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(json) => info!(target: "audit", event = %json, "{message}"),
        Err(e) => info!(target: "audit", serialize_error = %e, "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{AllowAllPolicy, FixedClock, MockStorageAuthority, StaticSctProvider};
    use issuance::test_helpers::{build_csr, test_issuer_ecdsa, test_issuer_rsa, test_issuer_with, issuer_options, TestKey};
    use time::macros::datetime;
    use time::Duration;

    #[test]
    fn serials_carry_the_prefix_and_length() {
        for _ in 0..32 {
            let serial = generate_serial(0x66).unwrap();
            assert_eq!(serial.len(), 17);
            assert_eq!(serial[0], 0x66);
            assert_eq!(serial[0] & 0x80, 0);
        }
    }

    #[test]
    fn skid_is_deterministic_per_key() {
        let rsa = TestKey::new_rsa().spki();
        let p256 = TestKey::new_p256().spki();
        let a = generate_skid(&rsa);
        let b = generate_skid(&rsa);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert_ne!(a, generate_skid(&p256));
    }

    #[test]
    fn determinism_check_accepts_identical_tbs() {
        // SEQUENCE { SEQUENCE { NULL } }, trailing fields ignored
        let cert = [0x30, 0x04, 0x30, 0x02, 0x05, 0x00];
        tbs_cert_is_deterministic(&cert, &cert).unwrap();
    }

    #[test]
    fn determinism_check_rejects_mismatch() {
        let lint = [0x30, 0x04, 0x30, 0x02, 0x05, 0x00];
        let leaf = [0x30, 0x04, 0x30, 0x02, 0x01, 0x00];
        let err = tbs_cert_is_deterministic(&lint, &leaf).unwrap_err();
        assert!(err.detail().contains("mismatch"));
    }

    #[test]
    fn determinism_check_rejects_empty_and_garbage() {
        let good = [0x30, 0x04, 0x30, 0x02, 0x05, 0x00];
        assert!(tbs_cert_is_deterministic(&[], &good).is_err());
        assert!(tbs_cert_is_deterministic(&[0x01, 0x02], &good).is_err());
        // empty TBS contents
        let empty_tbs = [0x30, 0x02, 0x30, 0x00];
        assert!(tbs_cert_is_deterministic(&empty_tbs, &empty_tbs).is_err());
    }

    #[test]
    fn issuer_maps_reject_duplicate_name_ids() {
        let a = test_issuer_ecdsa("Test Duplicate Root");
        let b = test_issuer_ecdsa("Test Duplicate Root");
        let err = make_issuer_maps(vec![a, b]).unwrap_err();
        assert!(matches!(err, SetupError::DuplicateNameId(_, _)));
    }

    #[test]
    fn issuer_maps_require_both_key_families() {
        let only_ecdsa = vec![test_issuer_ecdsa("Test Lone ECDSA Root")];
        assert!(matches!(
            make_issuer_maps(only_ecdsa).unwrap_err(),
            SetupError::NoRsaIssuers
        ));

        let inactive_ecdsa = test_issuer_with(
            TestKey::new_p256(),
            "Test Inactive ECDSA Root",
            datetime!(2045-01-01 00:00 UTC),
            issuance::IssuerOptions { active: false, ..issuer_options() },
        );
        let rsa = test_issuer_rsa("Test RSA Root");
        assert!(matches!(
            make_issuer_maps(vec![rsa, inactive_ecdsa]).unwrap_err(),
            SetupError::NoEcdsaIssuers
        ));
    }

    fn test_ca(sa: Arc<MockStorageAuthority>) -> (CertificateAuthority, Arc<CaMetrics>) {
        let metrics = Arc::new(CaMetrics::new(&prometheus::Registry::new()));
        let mut profiles = HashMap::new();
        profiles.insert(
            "classic".to_string(),
            ProfileConfig {
                validity: Duration::days(90),
                backdate: Duration::hours(1),
                include_client_auth: false,
                omit_common_name: false,
            },
        );
        let ca = CertificateAuthority::new(
            sa,
            Some(Arc::new(StaticSctProvider::two()) as Arc<dyn crate::storage::SctProvider>),
            Arc::new(AllowAllPolicy),
            vec![test_issuer_rsa("Test RSA Root"), test_issuer_ecdsa("Test ECDSA Root")],
            &profiles,
            0x7f,
            10,
            KeyPolicy::new(Default::default()).unwrap(),
            Arc::new(FixedClock(datetime!(2024-05-15 12:00 UTC))),
            Arc::clone(&metrics),
            false,
        )
        .unwrap();
        (ca, metrics)
    }

    #[tokio::test]
    async fn empty_issuer_pool_is_refused_without_cert_rows() {
        let sa = Arc::new(MockStorageAuthority::default());
        let (mut ca, _metrics) = test_ca(Arc::clone(&sa));
        ca.issuers.by_alg.remove(&KeyAlgorithm::Rsa);

        let req = IssueCertificateRequest {
            csr: build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]),
            registration_id: 1,
            order_id: 2,
            profile_name: "classic".to_string(),
        };
        let err = ca.issue_certificate(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalServerError);
        assert!(err.detail().contains("no issuers found for public key algorithm"));
        assert_eq!(sa.count("add_precertificate"), 0);
        assert_eq!(sa.count("add_certificate"), 0);
    }
}
