// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The individual lints making up the standard battery.
//!
//! Each lint inspects one aspect of the synthesized certificate and stays
//! silent when satisfied. Lints only ever read the TBS portion; the lint
//! certificate's signature comes from a throwaway key and is meaningless.

use const_oid::db::rfc4519::CN;
use const_oid::db::rfc5280::{
    ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS, ID_CE_EXT_KEY_USAGE,
    ID_CE_KEY_USAGE, ID_CE_SUBJECT_ALT_NAME, ID_CE_SUBJECT_KEY_IDENTIFIER, ID_KP_SERVER_AUTH,
};
use der::asn1::{ObjectIdentifier, PrintableStringRef, Utf8StringRef};
use der::Decode;
use x509_cert::certificate::Version;
use x509_cert::ext::pkix::{BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages, SubjectAltName};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::{Lint, Problem, CT_POISON_OID, SCT_LIST_OID};

/// Subscriber certificates may not be valid for longer than 398 days.
const MAX_VALIDITY_SECS: u64 = 398 * 86_400;

/// Minimum number of serial content octets; anything shorter cannot carry
/// the required CSPRNG output.
const MIN_SERIAL_OCTETS: usize = 9;

pub fn standard_lints() -> Vec<Lint> {
    vec![
        Lint { name: "cert_version_v3", check: cert_version_v3 },
        Lint { name: "serial_shape", check: serial_shape },
        Lint { name: "validity_window", check: validity_window },
        Lint { name: "san_present", check: san_present },
        Lint { name: "common_name_in_sans", check: common_name_in_sans },
        Lint { name: "leaf_key_usage", check: leaf_key_usage },
        Lint { name: "eku_server_auth", check: eku_server_auth },
        Lint { name: "skid_present", check: skid_present },
        Lint { name: "akid_present", check: akid_present },
        Lint { name: "basic_constraints_not_ca", check: basic_constraints_not_ca },
        Lint { name: "ct_extension_exclusive", check: ct_extension_exclusive },
    ]
}

fn ext<'a>(cert: &'a Certificate, oid: ObjectIdentifier) -> Option<&'a Extension> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|e| e.extn_id == oid)
}

fn unix_secs(time: &Time) -> u64 {
    match time {
        Time::UtcTime(t) => t.to_unix_duration().as_secs(),
        Time::GeneralTime(t) => t.to_unix_duration().as_secs(),
    }
}

fn common_name(name: &Name) -> Option<String> {
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

fn cert_version_v3(cert: &Certificate) -> Option<Problem> {
    if cert.tbs_certificate.version != Version::V3 {
        return Some(Problem::error("certificate is not X.509 v3"));
    }
    None
}

fn serial_shape(cert: &Certificate) -> Option<Problem> {
    let serial = cert.tbs_certificate.serial_number.as_bytes();
    if serial.is_empty() || serial.len() > 20 {
        return Some(Problem::error(format!(
            "serial number must be 1 to 20 octets, got {}",
            serial.len()
        )));
    }
    if serial[0] & 0x80 != 0 {
        return Some(Problem::error("serial number is negative"));
    }
    if serial.len() < MIN_SERIAL_OCTETS {
        return Some(Problem::error(format!(
            "serial number carries fewer than {MIN_SERIAL_OCTETS} octets of content"
        )));
    }
    None
}

fn validity_window(cert: &Certificate) -> Option<Problem> {
    let validity = &cert.tbs_certificate.validity;
    let not_before = unix_secs(&validity.not_before);
    let not_after = unix_secs(&validity.not_after);
    if not_after <= not_before {
        return Some(Problem::error("notAfter is not later than notBefore"));
    }
    if not_after - not_before > MAX_VALIDITY_SECS {
        return Some(Problem::error("validity period exceeds 398 days"));
    }
    None
}

fn san_present(cert: &Certificate) -> Option<Problem> {
    let Some(ext) = ext(cert, ID_CE_SUBJECT_ALT_NAME) else {
        return Some(Problem::error("subjectAltName extension is missing"));
    };
    match SubjectAltName::from_der(ext.extn_value.as_bytes()) {
        Ok(san) if !san.0.is_empty() => None,
        Ok(_) => Some(Problem::error("subjectAltName extension is empty")),
        Err(e) => Some(Problem::error(format!("subjectAltName does not parse: {e}"))),
    }
}

fn common_name_in_sans(cert: &Certificate) -> Option<Problem> {
    let cn = common_name(&cert.tbs_certificate.subject)?;
    let Some(ext) = ext(cert, ID_CE_SUBJECT_ALT_NAME) else {
        return Some(Problem::error("common name present but no subjectAltName"));
    };
    let san = match SubjectAltName::from_der(ext.extn_value.as_bytes()) {
        Ok(san) => san,
        Err(_) => return None, // san_present reports the parse failure
    };
    let cn_lower = cn.to_ascii_lowercase();
    let covered = san.0.iter().any(|name| {
        matches!(name, x509_cert::ext::pkix::name::GeneralName::DnsName(dns)
            if dns.as_str().eq_ignore_ascii_case(&cn_lower))
    });
    if !covered {
        return Some(Problem::error(format!(
            "common name {cn:?} is not repeated in the subjectAltName"
        )));
    }
    None
}

fn leaf_key_usage(cert: &Certificate) -> Option<Problem> {
    let Some(ext) = ext(cert, ID_CE_KEY_USAGE) else {
        return Some(Problem::error("keyUsage extension is missing"));
    };
    let ku = match KeyUsage::from_der(ext.extn_value.as_bytes()) {
        Ok(ku) => ku,
        Err(e) => return Some(Problem::error(format!("keyUsage does not parse: {e}"))),
    };
    if !ku.0.contains(KeyUsages::DigitalSignature) {
        return Some(Problem::error("keyUsage lacks digitalSignature"));
    }
    if ku.0.contains(KeyUsages::KeyCertSign) {
        return Some(Problem::error("subscriber certificate asserts keyCertSign"));
    }
    None
}

fn eku_server_auth(cert: &Certificate) -> Option<Problem> {
    let Some(ext) = ext(cert, ID_CE_EXT_KEY_USAGE) else {
        return Some(Problem::error("extendedKeyUsage extension is missing"));
    };
    match ExtendedKeyUsage::from_der(ext.extn_value.as_bytes()) {
        Ok(eku) if eku.0.contains(&ID_KP_SERVER_AUTH) => None,
        Ok(_) => Some(Problem::error("extendedKeyUsage lacks serverAuth")),
        Err(e) => Some(Problem::error(format!("extendedKeyUsage does not parse: {e}"))),
    }
}

fn skid_present(cert: &Certificate) -> Option<Problem> {
    if ext(cert, ID_CE_SUBJECT_KEY_IDENTIFIER).is_none() {
        return Some(Problem::error("subjectKeyIdentifier extension is missing"));
    }
    None
}

fn akid_present(cert: &Certificate) -> Option<Problem> {
    if ext(cert, ID_CE_AUTHORITY_KEY_IDENTIFIER).is_none() {
        return Some(Problem::error("authorityKeyIdentifier extension is missing"));
    }
    None
}

fn basic_constraints_not_ca(cert: &Certificate) -> Option<Problem> {
    let ext = ext(cert, ID_CE_BASIC_CONSTRAINTS)?;
    match BasicConstraints::from_der(ext.extn_value.as_bytes()) {
        Ok(bc) if bc.ca => Some(Problem::error("subscriber certificate asserts cA")),
        Ok(_) => None,
        Err(e) => Some(Problem::error(format!("basicConstraints does not parse: {e}"))),
    }
}

fn ct_extension_exclusive(cert: &Certificate) -> Option<Problem> {
    let poison = ext(cert, CT_POISON_OID);
    let sct_list = ext(cert, SCT_LIST_OID);
    match (poison, sct_list) {
        (Some(_), Some(_)) => Some(Problem::error(
            "certificate carries both the CT poison and an SCT list",
        )),
        (None, None) => Some(Problem::error(
            "certificate carries neither the CT poison nor an SCT list",
        )),
        (Some(poison), None) => {
            if !poison.critical {
                return Some(Problem::error("CT poison extension is not critical"));
            }
            if poison.extn_value.as_bytes() != [0x05, 0x00] {
                return Some(Problem::error("CT poison payload is not an ASN.1 NULL"));
            }
            None
        }
        (None, Some(_)) => None,
    }
}
