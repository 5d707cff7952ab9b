// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for tests that need keys, CSRs, issuers, and SCTs.
//!
//! RSA key generation is slow, so the helpers share lazily-generated static
//! keys; everything derived from them (CSRs, issuer certificates) is built
//! fresh per call.

use std::net::IpAddr;

use const_oid::db::rfc5280::{ID_CE_BASIC_CONSTRAINTS, ID_CE_KEY_USAGE, ID_CE_SUBJECT_ALT_NAME, ID_CE_SUBJECT_KEY_IDENTIFIER};
use const_oid::db::rfc5912::{ECDSA_WITH_SHA_256, SHA_256_WITH_RSA_ENCRYPTION};
use const_oid::AssociatedOid;
use der::asn1::{Any, AnyRef, BitString, Ia5String, OctetString, SetOfVec};
use der::{Decode, Encode};
use lints::Battery;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use signature::{SignatureEncoding, Signer};
use time::macros::datetime;
use time::OffsetDateTime;
use x509_cert::attr::Attribute;
use x509_cert::certificate::Version;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages, SubjectAltName, SubjectKeyIdentifier};
use x509_cert::ext::Extension;
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;
use x509_cert::{Certificate, TbsCertificate};

use crate::issuer::{Issuer, IssuerOptions, SigningKey};
use crate::sct::Sct;
use crate::tbs;

static SUBSCRIBER_RSA_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa keygen"));

static ISSUER_RSA_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa keygen"));

const ROOT_NOT_BEFORE: OffsetDateTime = datetime!(2020-01-01 00:00 UTC);
const ROOT_NOT_AFTER: OffsetDateTime = datetime!(2045-01-01 00:00 UTC);

/// A subscriber or issuer keypair for tests.
pub enum TestKey {
    Rsa(RsaPrivateKey),
    P256(p256::ecdsa::SigningKey),
}

impl TestKey {
    pub fn new_rsa() -> TestKey {
        TestKey::Rsa(SUBSCRIBER_RSA_KEY.clone())
    }

    pub fn new_p256() -> TestKey {
        TestKey::P256(p256::ecdsa::SigningKey::random(&mut OsRng))
    }

    pub fn spki(&self) -> SubjectPublicKeyInfoOwned {
        let der = match self {
            TestKey::Rsa(key) => key.to_public_key().to_public_key_der().unwrap(),
            TestKey::P256(key) => key.verifying_key().to_public_key_der().unwrap(),
        };
        SubjectPublicKeyInfoOwned::from_der(der.as_bytes()).unwrap()
    }

    pub fn signature_algorithm(&self) -> AlgorithmIdentifierOwned {
        match self {
            TestKey::Rsa(_) => AlgorithmIdentifierOwned {
                oid: SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(Any::from(AnyRef::NULL)),
            },
            TestKey::P256(_) => AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA_256,
                parameters: None,
            },
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            TestKey::Rsa(key) => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
                signer.sign(message).to_vec()
            }
            TestKey::P256(key) => {
                let sig: p256::ecdsa::Signature = key.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
        }
    }

    fn signing_key(&self) -> SigningKey {
        match self {
            TestKey::Rsa(key) => SigningKey::rsa(key.clone()),
            TestKey::P256(key) => SigningKey::EcdsaP256(key.clone()),
        }
    }
}

/// A PKCS#10 CSR with the given subject CN and requested SANs, signed by
/// `key`.
pub fn build_csr(key: &TestKey, cn: Option<&str>, dns: &[&str], ips: &[IpAddr]) -> Vec<u8> {
    let mut sans = Vec::new();
    for name in dns {
        sans.push(GeneralName::DnsName(Ia5String::new(name).unwrap()));
    }
    for ip in ips {
        let octets = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        sans.push(GeneralName::IpAddress(OctetString::new(octets).unwrap()));
    }

    let mut attributes = Vec::new();
    if !sans.is_empty() {
        let san_ext = Extension {
            extn_id: ID_CE_SUBJECT_ALT_NAME,
            critical: false,
            extn_value: OctetString::new(SubjectAltName(sans).to_der().unwrap()).unwrap(),
        };
        let ext_req = ExtensionReq(vec![san_ext]);
        let value = Any::from_der(&ext_req.to_der().unwrap()).unwrap();
        attributes.push(Attribute {
            oid: ExtensionReq::OID,
            values: SetOfVec::try_from(vec![value]).unwrap(),
        });
    }

    let info = CertReqInfo {
        version: x509_cert::request::Version::V1,
        subject: tbs::subject_name(cn).unwrap(),
        public_key: key.spki(),
        attributes: SetOfVec::try_from(attributes).unwrap(),
    };
    let signature = key.sign(&info.to_der().unwrap());
    CertReq {
        info,
        algorithm: key.signature_algorithm(),
        signature: BitString::from_bytes(&signature).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// A self-signed root certificate for `key`, expiring at `not_after`.
pub fn self_signed_root(key: &TestKey, cn: &str, not_after: OffsetDateTime) -> Vec<u8> {
    let spki = key.spki();
    let skid = Sha256::digest(spki.subject_public_key.raw_bytes());
    let name = tbs::subject_name(Some(cn)).unwrap();

    let extensions = vec![
        Extension {
            extn_id: ID_CE_BASIC_CONSTRAINTS,
            critical: true,
            extn_value: OctetString::new(
                BasicConstraints { ca: true, path_len_constraint: None }
                    .to_der()
                    .unwrap(),
            )
            .unwrap(),
        },
        Extension {
            extn_id: ID_CE_KEY_USAGE,
            critical: true,
            extn_value: OctetString::new(
                KeyUsage(
                    KeyUsages::DigitalSignature | KeyUsages::KeyCertSign | KeyUsages::CRLSign,
                )
                .to_der()
                .unwrap(),
            )
            .unwrap(),
        },
        Extension {
            extn_id: ID_CE_SUBJECT_KEY_IDENTIFIER,
            critical: false,
            extn_value: OctetString::new(
                SubjectKeyIdentifier(OctetString::new(skid[..20].to_vec()).unwrap())
                    .to_der()
                    .unwrap(),
            )
            .unwrap(),
        },
    ];

    let tbs_cert = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x01, 0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04])
            .unwrap(),
        signature: key.signature_algorithm(),
        issuer: name.clone(),
        validity: Validity {
            not_before: tbs::der_time(ROOT_NOT_BEFORE).unwrap(),
            not_after: tbs::der_time(not_after).unwrap(),
        },
        subject: name,
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };
    let signature = key.sign(&tbs_cert.to_der().unwrap());
    Certificate {
        tbs_certificate: tbs_cert,
        signature_algorithm: key.signature_algorithm(),
        signature: BitString::from_bytes(&signature).unwrap(),
    }
    .to_der()
    .unwrap()
}

pub fn issuer_options() -> IssuerOptions {
    IssuerOptions {
        active: true,
        ocsp_url: Some("http://ocsp.test.invalid".to_string()),
        issuer_url: Some("http://certs.test.invalid/issuer.der".to_string()),
        battery: Battery::standard(),
    }
}

/// An active RSA issuer with the standard lint battery.
pub fn test_issuer_rsa(cn: &str) -> Issuer {
    let key = TestKey::Rsa(ISSUER_RSA_KEY.clone());
    test_issuer_with(key, cn, ROOT_NOT_AFTER, issuer_options())
}

/// An active ECDSA (P-256) issuer with the standard lint battery.
pub fn test_issuer_ecdsa(cn: &str) -> Issuer {
    test_issuer_with(TestKey::new_p256(), cn, ROOT_NOT_AFTER, issuer_options())
}

/// Full control over the issuer's expiry and options.
pub fn test_issuer_with(
    key: TestKey,
    cn: &str,
    not_after: OffsetDateTime,
    options: IssuerOptions,
) -> Issuer {
    let cert_der = self_signed_root(&key, cn, not_after);
    Issuer::new(&cert_der, key.signing_key(), options).unwrap()
}

/// A structurally valid SCT that no log ever signed.
pub fn fake_sct(seed: u8) -> Sct {
    Sct {
        log_id: [seed; 32],
        timestamp: 1_700_000_000_000 + seed as u64,
        extensions: Vec::new(),
        hash_algorithm: 4,      // sha256
        signature_algorithm: 3, // ecdsa
        signature: vec![seed.wrapping_add(1); 71],
    }
}

pub fn fake_sct_bytes(seed: u8) -> Vec<u8> {
    fake_sct(seed).serialize().unwrap()
}
