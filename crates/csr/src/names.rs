// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifier extraction from a CSR's requested extensions.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use const_oid::db::rfc4519::CN;
use const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME;
use const_oid::AssociatedOid;
use der::asn1::{PrintableStringRef, Utf8StringRef};
use der::{Decode, Encode};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::request::{CertReq, ExtensionReq};

use crate::CsrError;

/// The identifiers a CSR asks for, lowercased, deduplicated and sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrIdentifiers {
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

/// Reads DNS names and IP addresses out of the CSR's requested
/// subjectAltName extension. A CSR without an extensionRequest attribute, or
/// without a SAN in it, yields empty identifier lists rather than an error;
/// the caller decides whether that is acceptable.
pub fn identifiers_from_csr(csr: &CertReq) -> Result<CsrIdentifiers, CsrError> {
    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();

    if let Some(san) = requested_san(csr)? {
        for name in san.0 {
            match name {
                GeneralName::DnsName(dns) => {
                    dns_names.push(dns.as_str().to_ascii_lowercase());
                }
                GeneralName::IpAddress(octets) => {
                    ip_addresses.push(ip_from_octets(octets.as_bytes())?);
                }
                _ => {}
            }
        }
    }

    dns_names.sort();
    dns_names.dedup();
    ip_addresses.sort();
    ip_addresses.dedup();

    Ok(CsrIdentifiers { dns_names, ip_addresses })
}

/// The subject common name, lowercased. A CN longer than 64 bytes cannot be
/// carried in a certificate and is treated as absent.
pub fn cn_from_csr(csr: &CertReq) -> Option<String> {
    for rdn in csr.info.subject.0.iter() {
        for atav in rdn.0.iter() {
            if atav.oid != CN {
                continue;
            }
            let value = if let Ok(s) = atav.value.decode_as::<Utf8StringRef>() {
                s.as_str().to_string()
            } else if let Ok(s) = atav.value.decode_as::<PrintableStringRef>() {
                s.as_str().to_string()
            } else {
                continue;
            };
            if value.len() > 64 {
                return None;
            }
            return Some(value.to_ascii_lowercase());
        }
    }
    None
}

fn requested_san(csr: &CertReq) -> Result<Option<SubjectAltName>, CsrError> {
    for attr in csr.info.attributes.iter() {
        if attr.oid != ExtensionReq::OID {
            continue;
        }
        let Some(value) = attr.values.iter().next() else {
            continue;
        };
        let ext_req = ExtensionReq::from_der(&value.to_der()?)?;
        for ext in ext_req.0 {
            if ext.extn_id == ID_CE_SUBJECT_ALT_NAME {
                return Ok(Some(SubjectAltName::from_der(ext.extn_value.as_bytes())?));
            }
        }
    }
    Ok(None)
}

fn ip_from_octets(octets: &[u8]) -> Result<IpAddr, CsrError> {
    match octets.len() {
        4 => {
            let mut v4 = [0u8; 4];
            v4.copy_from_slice(octets);
            Ok(IpAddr::V4(Ipv4Addr::from(v4)))
        }
        16 => {
            let mut v6 = [0u8; 16];
            v6.copy_from_slice(octets);
            Ok(IpAddr::V6(Ipv6Addr::from(v6)))
        }
        n => Err(CsrError::Der(format!("iPAddress with {n} octets"))),
    }
}
