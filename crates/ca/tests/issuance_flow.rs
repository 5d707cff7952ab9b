// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end issuance tests against mock collaborators: the full
//! precert → SCT → final cycle, the storage call ordering, and the
//! refusal paths.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ca::test_support::{
    AllowAllPolicy, BlockListPolicy, FixedClock, MockStorageAuthority, StaticSctProvider,
};
use ca::{CaMetrics, CertificateAuthority, ErrorKind, IssueCertificateRequest, SctProvider};
use csr::PolicyAuthority;
use der::Decode;
use goodkey::KeyPolicy;
use issuance::sct;
use issuance::test_helpers::{
    build_csr, fake_sct, issuer_options, test_issuer_ecdsa, test_issuer_rsa, test_issuer_with,
    TestKey,
};
use issuance::{Issuer, IssuerOptions, ProfileConfig};
use lints::{Battery, Lint, Problem, CT_POISON_OID, SCT_LIST_OID};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use x509_cert::Certificate;

const CLOCK_TIME: OffsetDateTime = datetime!(2024-05-15 12:00 UTC);
const SERIAL_PREFIX: u8 = 0x7f;

fn classic_profiles() -> HashMap<String, ProfileConfig> {
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
    profiles
}

struct Harness {
    ca: CertificateAuthority,
    sa: Arc<MockStorageAuthority>,
    sct_provider: Arc<StaticSctProvider>,
    metrics: Arc<CaMetrics>,
}

fn harness() -> Harness {
    harness_with(
        vec![test_issuer_rsa("Test RSA Root"), test_issuer_ecdsa("Test ECDSA Root")],
        Arc::new(AllowAllPolicy),
    )
}

fn harness_with(issuers: Vec<Issuer>, pa: Arc<dyn PolicyAuthority>) -> Harness {
    let sa = Arc::new(MockStorageAuthority::default());
    let sct_provider = Arc::new(StaticSctProvider::two());
    let metrics = Arc::new(CaMetrics::new(&prometheus::Registry::new()));
    let ca = CertificateAuthority::new(
        Arc::clone(&sa) as Arc<dyn ca::StorageAuthority>,
        Some(Arc::clone(&sct_provider) as Arc<dyn SctProvider>),
        pa,
        issuers,
        &classic_profiles(),
        SERIAL_PREFIX,
        10,
        KeyPolicy::new(Default::default()).unwrap(),
        Arc::new(FixedClock(CLOCK_TIME)),
        Arc::clone(&metrics),
        false,
    )
    .unwrap();
    Harness { ca, sa, sct_provider, metrics }
}

fn classic_request(csr: Vec<u8>) -> IssueCertificateRequest {
    IssueCertificateRequest {
        csr,
        registration_id: 10,
        order_id: 20,
        profile_name: "classic".to_string(),
    }
}

fn has_extension(cert: &Certificate, oid: der::asn1::ObjectIdentifier) -> bool {
    cert.tbs_certificate
        .extensions
        .as_ref()
        .map(|exts| exts.iter().any(|e| e.extn_id == oid))
        .unwrap_or(false)
}

#[tokio::test]
async fn rsa_issuance_end_to_end() {
    let h = harness();
    let req = classic_request(build_csr(
        &TestKey::new_rsa(),
        Some("example.com"),
        &["example.com"],
        &[],
    ));
    let final_der = h.ca.issue_certificate(&req).await.unwrap();
    let final_cert = Certificate::from_der(&final_der).unwrap();

    // serial shape: configured prefix, 17 bytes, positive
    let serial = final_cert.tbs_certificate.serial_number.as_bytes();
    assert_eq!(serial.len(), 17);
    assert_eq!(serial[0], SERIAL_PREFIX);
    assert_eq!(serial[0] & 0x80, 0);

    // final cert: SCT list present, poison absent
    assert!(has_extension(&final_cert, SCT_LIST_OID));
    assert!(!has_extension(&final_cert, CT_POISON_OID));
    let sct_ext = final_cert
        .tbs_certificate
        .extensions
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.extn_id == SCT_LIST_OID)
        .unwrap();
    assert_eq!(
        sct::scts_from_extension(sct_ext).unwrap(),
        vec![fake_sct(1), fake_sct(2)]
    );

    // storage ordering per spec: AddSerial < AddPrecertificate <
    // SetCertificateStatusReady < AddCertificate
    let add_serial = h.sa.position("add_serial").unwrap();
    let add_precert = h.sa.position("add_precertificate").unwrap();
    let set_ready = h.sa.position("set_certificate_status_ready").unwrap();
    let add_cert = h.sa.position("add_certificate").unwrap();
    assert!(add_serial < add_precert);
    assert!(add_precert < set_ready);
    assert!(set_ready < add_cert);
    assert_eq!(h.sa.count("add_serial"), 1);
    assert_eq!(h.sa.count("add_precertificate"), 1);
    assert_eq!(h.sa.count("set_certificate_status_ready"), 1);
    assert_eq!(h.sa.count("add_certificate"), 1);

    // the persisted precertificate row is the lint DER, flagged OcspNotReady
    let rows = h.sa.precertificate_rows();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].ocsp_not_ready);
    assert_eq!(rows[0].reg_id, 10);
    let lint_cert = Certificate::from_der(&rows[0].der).unwrap();
    assert!(has_extension(&lint_cert, CT_POISON_OID));
    assert_eq!(lint_cert.tbs_certificate.serial_number.as_bytes(), serial);

    // serial row anchored at the fixed clock
    let serials = h.sa.serial_rows();
    assert_eq!(serials.len(), 1);
    assert_eq!(serials[0].created, CLOCK_TIME);
    assert_eq!(serials[0].serial, hex::encode(serial));

    // metrics
    assert_eq!(h.metrics.signatures("precertificate", "Test RSA Root"), 1);
    assert_eq!(h.metrics.signatures("certificate", "Test RSA Root"), 1);
    assert_eq!(h.metrics.certificates_issued("classic"), 1);
    assert_eq!(h.metrics.lint_errors(), 0);
}

#[tokio::test]
async fn final_certificate_matches_precertificate_except_ct_extensions() {
    let h = harness();
    let req = classic_request(build_csr(
        &TestKey::new_p256(),
        Some("example.org"),
        &["example.org", "www.example.org"],
        &[],
    ));
    let final_der = h.ca.issue_certificate(&req).await.unwrap();
    let final_cert = Certificate::from_der(&final_der).unwrap();
    let lint_precert = Certificate::from_der(&h.sa.precertificate_rows()[0].der).unwrap();

    let pre_tbs = &lint_precert.tbs_certificate;
    let fin_tbs = &final_cert.tbs_certificate;
    assert_eq!(pre_tbs.serial_number, fin_tbs.serial_number);
    assert_eq!(pre_tbs.validity, fin_tbs.validity);
    assert_eq!(pre_tbs.subject, fin_tbs.subject);
    assert_eq!(pre_tbs.issuer, fin_tbs.issuer);
    assert_eq!(pre_tbs.subject_public_key_info, fin_tbs.subject_public_key_info);

    // identical extension sequence, with the poison swapped for the SCT list
    let pre_oids: Vec<_> = pre_tbs
        .extensions
        .as_ref()
        .unwrap()
        .iter()
        .map(|e| {
            if e.extn_id == CT_POISON_OID {
                SCT_LIST_OID
            } else {
                e.extn_id
            }
        })
        .collect();
    let fin_oids: Vec<_> = fin_tbs
        .extensions
        .as_ref()
        .unwrap()
        .iter()
        .map(|e| e.extn_id)
        .collect();
    assert_eq!(pre_oids, fin_oids);
}

#[tokio::test]
async fn unknown_profile_is_refused_without_storage_writes() {
    let h = harness();
    let mut req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    req.profile_name = "modern".to_string();
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.detail().contains("incapable of using a profile named modern"));
    assert!(h.sa.op_names().is_empty());
}

#[tokio::test]
async fn incomplete_request_is_refused() {
    let h = harness();
    let mut req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    req.registration_id = 0;
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    assert!(err.detail().contains("incomplete issue certificate request"));
    assert!(h.sa.op_names().is_empty());
}

#[tokio::test]
async fn missing_sct_provider_is_refused() {
    let sa = Arc::new(MockStorageAuthority::default());
    let metrics = Arc::new(CaMetrics::new(&prometheus::Registry::new()));
    let ca = CertificateAuthority::new(
        Arc::clone(&sa) as Arc<dyn ca::StorageAuthority>,
        None,
        Arc::new(AllowAllPolicy),
        vec![test_issuer_rsa("Test RSA Root"), test_issuer_ecdsa("Test ECDSA Root")],
        &classic_profiles(),
        SERIAL_PREFIX,
        10,
        KeyPolicy::new(Default::default()).unwrap(),
        Arc::new(FixedClock(CLOCK_TIME)),
        metrics,
        false,
    )
    .unwrap();
    let req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    let err = ca.issue_certificate(&req).await.unwrap_err();
    assert!(err.detail().contains("no SCT provider"));
}

#[tokio::test]
async fn lint_failure_halts_before_persistence_and_signing() {
    fn always_sad(_: &Certificate) -> Option<Problem> {
        Some(Problem::error("unconditionally unhappy"))
    }
    let battery = Battery::standard().with(Lint { name: "always_sad", check: always_sad });
    let issuers = vec![
        test_issuer_with(
            TestKey::new_rsa(),
            "Test RSA Root",
            datetime!(2045-01-01 00:00 UTC),
            IssuerOptions { battery: battery.clone(), ..issuer_options() },
        ),
        test_issuer_with(
            TestKey::new_p256(),
            "Test ECDSA Root",
            datetime!(2045-01-01 00:00 UTC),
            IssuerOptions { battery, ..issuer_options() },
        ),
    ];
    let h = harness_with(issuers, Arc::new(AllowAllPolicy));

    let req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    assert!(err.detail().contains("failed to prepare precertificate signing"));

    assert_eq!(h.metrics.lint_errors(), 1);
    assert_eq!(h.metrics.signatures("precertificate", "Test RSA Root"), 0);
    // serial was reserved, but nothing was persisted or signed after the gate
    assert_eq!(h.sa.count("add_serial"), 1);
    assert_eq!(h.sa.count("add_precertificate"), 0);
    assert_eq!(h.sa.count("set_certificate_status_ready"), 0);
}

#[tokio::test]
async fn duplicate_final_certificate_is_refused() {
    let h = harness();
    let req = classic_request(build_csr(
        &TestKey::new_rsa(),
        Some("example.com"),
        &["example.com"],
        &[],
    ));
    h.ca.issue_certificate(&req).await.unwrap();

    // replay the final step for the same serial; the lint precert row is a
    // faithful stand-in for the precertificate DER
    let precert_der = h.sa.precertificate_rows()[0].der.clone();
    let scts = h.sct_provider.scts.clone();
    let err = h
        .ca
        .issue_certificate_for_precertificate(&precert_der, &scts, 10, 20, "classic")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    assert!(err.detail().contains("issuance of duplicate final certificate requested"));
    assert_eq!(h.sa.count("add_certificate"), 1);
    assert_eq!(h.metrics.signatures("certificate", "Test RSA Root"), 1);
}

#[tokio::test]
async fn duplicate_probe_failure_is_fatal() {
    let h = harness();
    let req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    h.ca.issue_certificate(&req).await.unwrap();

    let precert_der = h.sa.precertificate_rows()[0].der.clone();
    h.sa.fail_get_certificate.store(true, Ordering::SeqCst);
    let err = h
        .ca
        .issue_certificate_for_precertificate(&precert_der, &h.sct_provider.scts.clone(), 10, 20, "classic")
        .await
        .unwrap_err();
    assert!(err.detail().contains("error checking for duplicate issuance"));
}

#[tokio::test]
async fn issuance_cannot_outlive_the_issuer() {
    let near_expiry = datetime!(2024-06-01 00:00 UTC);
    let issuers = vec![
        test_issuer_with(TestKey::new_rsa(), "Test RSA Root", near_expiry, issuer_options()),
        test_issuer_with(TestKey::new_p256(), "Test ECDSA Root", near_expiry, issuer_options()),
    ];
    let h = harness_with(issuers, Arc::new(AllowAllPolicy));

    let req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    assert!(err
        .detail()
        .contains("cannot issue a certificate that expires after the issuer certificate"));
    // the reserved serial is the only trace; no precert row was written
    assert_eq!(h.sa.count("add_serial"), 1);
    assert_eq!(h.sa.count("add_precertificate"), 0);
}

#[tokio::test]
async fn sct_failure_leaves_a_revocable_precert_behind() {
    let h = harness();
    h.sct_provider.fail.store(true, Ordering::SeqCst);
    let req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);

    // the serial went to "good" and a lint precert row exists; the final
    // certificate never happened
    assert_eq!(h.sa.count("add_serial"), 1);
    assert_eq!(h.sa.count("add_precertificate"), 1);
    assert_eq!(h.sa.count("set_certificate_status_ready"), 1);
    assert_eq!(h.sa.count("add_certificate"), 0);
}

#[tokio::test]
async fn policy_refusal_is_surfaced_as_malformed() {
    let h = harness_with(
        vec![test_issuer_rsa("Test RSA Root"), test_issuer_ecdsa("Test ECDSA Root")],
        Arc::new(BlockListPolicy(vec!["forbidden.example".to_string()])),
    );
    let req = classic_request(build_csr(&TestKey::new_rsa(), None, &["forbidden.example"], &[]));
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert!(err.detail().contains("policy forbids name forbidden.example"));
    assert_eq!(h.sa.count("add_precertificate"), 0);
}

#[tokio::test]
async fn weak_keys_are_rejected_as_bad_public_key() {
    let h = harness();
    let weak = TestKey::Rsa(rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap());
    let req = classic_request(build_csr(&weak, None, &["example.com"], &[]));
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadPublicKey);
    assert_eq!(h.sa.count("add_precertificate"), 0);
}

#[tokio::test]
async fn storage_failure_on_add_serial_aborts_cleanly() {
    let h = harness();
    h.sa.fail_add_serial.store(true, Ordering::SeqCst);
    let req = classic_request(build_csr(&TestKey::new_rsa(), None, &["example.com"], &[]));
    let err = h.ca.issue_certificate(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalServerError);
    assert!(h.sa.op_names().is_empty());
}

#[tokio::test]
async fn ecdsa_issuance_uses_the_ecdsa_pool() {
    let h = harness();
    let req = classic_request(build_csr(
        &TestKey::new_p256(),
        None,
        &["ecdsa.example.com"],
        &[],
    ));
    let final_der = h.ca.issue_certificate(&req).await.unwrap();
    let final_cert = Certificate::from_der(&final_der).unwrap();
    assert_eq!(
        final_cert.signature_algorithm.oid,
        const_oid::db::rfc5912::ECDSA_WITH_SHA_256
    );
    assert_eq!(h.metrics.signatures("precertificate", "Test ECDSA Root"), 1);
    assert_eq!(h.metrics.signatures("precertificate", "Test RSA Root"), 0);
}
