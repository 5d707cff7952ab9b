// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-request input to certificate construction, and its
//! reconstruction from an existing precertificate.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use const_oid::db::rfc4519::CN;
use const_oid::db::rfc5280::{ID_CE_SUBJECT_ALT_NAME, ID_CE_SUBJECT_KEY_IDENTIFIER};
use der::asn1::{PrintableStringRef, Utf8StringRef};
use der::Decode;
use lints::CT_POISON_OID;
use serde::Serialize;
use serde_with::serde_as;
use thiserror::Error;
use time::OffsetDateTime;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{SubjectAltName, SubjectKeyIdentifier};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

use crate::sct::Sct;
use crate::tbs;

/// Everything needed to build one TBSCertificate. Built fresh per request
/// and discarded after signing.
///
/// Exactly one of `include_ct_poison` and a non-empty `sct_list` must be
/// set: the former produces a precertificate, the latter the final
/// certificate.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct IssuanceRequest {
    #[serde(skip)]
    pub public_key: SubjectPublicKeyInfoOwned,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub subject_key_id: Vec<u8>,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub serial: Vec<u8>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    pub include_ct_poison: bool,
    #[serde(skip)]
    pub sct_list: Vec<Sct>,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("certificate is not a precertificate (missing CT poison)")]
    NotAPrecertificate,
    #[error("certificate is missing the {0} extension")]
    MissingExtension(&'static str),
    #[error("DER error: {0}")]
    Der(String),
    #[error("unsupported iPAddress encoding")]
    BadIpAddress,
}

impl From<der::Error> for RequestError {
    fn from(e: der::Error) -> Self {
        RequestError::Der(e.to_string())
    }
}

/// Rebuilds the [`IssuanceRequest`] that produced a precertificate,
/// swapping the poison for the supplied SCT list. Everything else (names,
/// serial, key, validity) is read back out of the precertificate so the
/// final certificate cannot drift from it.
pub fn request_from_precert(
    precert: &Certificate,
    scts: Vec<Sct>,
) -> Result<IssuanceRequest, RequestError> {
    let tbs = &precert.tbs_certificate;
    let exts: &[Extension] = tbs
        .extensions
        .as_deref()
        .ok_or(RequestError::MissingExtension("subjectAltName"))?;

    if !exts.iter().any(|e| e.extn_id == CT_POISON_OID) {
        return Err(RequestError::NotAPrecertificate);
    }

    let (dns_names, ip_addresses) =
        san_from_extensions(exts)?.ok_or(RequestError::MissingExtension("subjectAltName"))?;

    let subject_key_id = exts
        .iter()
        .find(|e| e.extn_id == ID_CE_SUBJECT_KEY_IDENTIFIER)
        .ok_or(RequestError::MissingExtension("subjectKeyIdentifier"))
        .and_then(|e| Ok(SubjectKeyIdentifier::from_der(e.extn_value.as_bytes())?))
        .map(|skid| skid.0.as_bytes().to_vec())?;

    Ok(IssuanceRequest {
        public_key: tbs.subject_public_key_info.clone(),
        subject_key_id,
        serial: tbs.serial_number.as_bytes().to_vec(),
        dns_names,
        ip_addresses,
        common_name: common_name(&tbs.subject),
        include_ct_poison: false,
        sct_list: scts,
        not_before: tbs::offset_time(&tbs.validity.not_before),
        not_after: tbs::offset_time(&tbs.validity.not_after),
    })
}

/// DNS names and IP addresses from a certificate's subjectAltName, in the
/// order they appear on the wire.
pub fn san_from_extensions(
    exts: &[Extension],
) -> Result<Option<(Vec<String>, Vec<IpAddr>)>, RequestError> {
    let Some(ext) = exts.iter().find(|e| e.extn_id == ID_CE_SUBJECT_ALT_NAME) else {
        return Ok(None);
    };
    let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    for name in san.0 {
        match name {
            GeneralName::DnsName(dns) => dns_names.push(dns.as_str().to_string()),
            GeneralName::IpAddress(octets) => match octets.as_bytes().len() {
                4 => {
                    let mut v4 = [0u8; 4];
                    v4.copy_from_slice(octets.as_bytes());
                    ip_addresses.push(IpAddr::V4(Ipv4Addr::from(v4)));
                }
                16 => {
                    let mut v6 = [0u8; 16];
                    v6.copy_from_slice(octets.as_bytes());
                    ip_addresses.push(IpAddr::V6(Ipv6Addr::from(v6)));
                }
                _ => return Err(RequestError::BadIpAddress),
            },
            _ => {}
        }
    }
    Ok(Some((dns_names, ip_addresses)))
}

/// The first common name in a DN, if any.
pub(crate) fn common_name(name: &Name) -> Option<String> {
    for rdn in name.0.iter() {
        for atav in rdn.0.iter() {
            if atav.oid != CN {
                continue;
            }
            if let Ok(s) = atav.value.decode_as::<Utf8StringRef>() {
                return Some(s.as_str().to_string());
            }
            if let Ok(s) = atav.value.decode_as::<PrintableStringRef>() {
                return Some(s.as_str().to_string());
            }
        }
    }
    None
}
