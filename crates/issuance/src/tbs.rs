// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic TBSCertificate assembly.
//!
//! Given the same issuer, profile, and request this module produces the
//! same DER bytes; the downstream determinism check depends on it.

use const_oid::db::rfc4519::CN;
use const_oid::db::rfc5280::{
    ID_AD_CA_ISSUERS, ID_AD_OCSP, ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS,
    ID_CE_CERTIFICATE_POLICIES, ID_CE_EXT_KEY_USAGE, ID_CE_KEY_USAGE, ID_CE_SUBJECT_ALT_NAME,
    ID_CE_SUBJECT_KEY_IDENTIFIER, ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH, ID_PE_AUTHORITY_INFO_ACCESS,
};
use const_oid::db::rfc5912::RSA_ENCRYPTION;
use der::asn1::{
    Any, AnyRef, GeneralizedTime, Ia5String, ObjectIdentifier, OctetString, SetOfVec, UtcTime,
    Utf8StringRef,
};
use der::Encode;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::certificate::Version;
use x509_cert::ext::pkix::certpolicy::PolicyInformation;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax, AuthorityKeyIdentifier, BasicConstraints,
    CertificatePolicies, ExtendedKeyUsage, KeyUsage, KeyUsages, SubjectAltName,
    SubjectKeyIdentifier,
};
use x509_cert::ext::Extension;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::TbsCertificate;

use crate::issuer::{Issuer, IssuanceError};
use crate::profile::Profile;
use crate::request::IssuanceRequest;
use crate::sct;

/// CA/Browser Forum domain-validated policy.
const DOMAIN_VALIDATED_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.140.1.2.1");

pub(crate) fn build_tbs(
    issuer: &Issuer,
    profile: &Profile,
    req: &IssuanceRequest,
) -> Result<TbsCertificate, IssuanceError> {
    let serial_number = SerialNumber::new(&req.serial)?;
    let validity = Validity {
        not_before: der_time(req.not_before)?,
        not_after: der_time(req.not_after)?,
    };

    let cn = if profile.omit_common_name {
        None
    } else {
        req.common_name.as_deref()
    };
    let subject = subject_name(cn)?;
    let empty_subject = cn.is_none();

    let mut extensions: Vec<Extension> = Vec::with_capacity(9);

    let key_usage = if req.public_key.algorithm.oid == RSA_ENCRYPTION {
        KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment
    } else {
        KeyUsages::DigitalSignature.into()
    };
    extensions.push(encode_ext(ID_CE_KEY_USAGE, true, &KeyUsage(key_usage))?);

    let mut ekus = vec![ID_KP_SERVER_AUTH];
    if profile.include_client_auth {
        ekus.push(ID_KP_CLIENT_AUTH);
    }
    extensions.push(encode_ext(ID_CE_EXT_KEY_USAGE, false, &ExtendedKeyUsage(ekus))?);

    extensions.push(encode_ext(
        ID_CE_BASIC_CONSTRAINTS,
        true,
        &BasicConstraints { ca: false, path_len_constraint: None },
    )?);

    extensions.push(encode_ext(
        ID_CE_AUTHORITY_KEY_IDENTIFIER,
        false,
        &AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(issuer.subject_key_id())?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        },
    )?);

    extensions.push(encode_ext(
        ID_CE_SUBJECT_KEY_IDENTIFIER,
        false,
        &SubjectKeyIdentifier(OctetString::new(req.subject_key_id.clone())?),
    )?);

    if let Some(aia) = authority_info_access(issuer)? {
        extensions.push(aia);
    }

    extensions.push(encode_ext(
        ID_CE_CERTIFICATE_POLICIES,
        false,
        &CertificatePolicies(vec![PolicyInformation {
            policy_identifier: DOMAIN_VALIDATED_OID,
            policy_qualifiers: None,
        }]),
    )?);

    // With an empty subject the SAN is the only identity and must be
    // marked critical (RFC 5280 §4.2.1.6).
    extensions.push(subject_alt_name(req, empty_subject)?);

    if req.include_ct_poison {
        extensions.push(sct::poison_extension()?);
    } else {
        extensions.push(sct::sct_list_extension(&req.sct_list)?);
    }

    Ok(TbsCertificate {
        version: Version::V3,
        serial_number,
        signature: issuer.signature_algorithm(),
        issuer: issuer.subject().clone(),
        validity,
        subject,
        subject_public_key_info: req.public_key.clone(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    })
}

pub(crate) fn encode_ext<T: Encode>(
    oid: ObjectIdentifier,
    critical: bool,
    value: &T,
) -> Result<Extension, IssuanceError> {
    Ok(Extension {
        extn_id: oid,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

fn subject_alt_name(req: &IssuanceRequest, critical: bool) -> Result<Extension, IssuanceError> {
    let mut names = Vec::with_capacity(req.dns_names.len() + req.ip_addresses.len());
    for dns in &req.dns_names {
        names.push(GeneralName::DnsName(
            Ia5String::new(dns).map_err(|e| IssuanceError::Der(e.to_string()))?,
        ));
    }
    for ip in &req.ip_addresses {
        let octets = match ip {
            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        names.push(GeneralName::IpAddress(OctetString::new(octets)?));
    }
    encode_ext(ID_CE_SUBJECT_ALT_NAME, critical, &SubjectAltName(names))
}

fn authority_info_access(issuer: &Issuer) -> Result<Option<Extension>, IssuanceError> {
    let mut descriptions = Vec::new();
    if let Some(url) = issuer.ocsp_url() {
        descriptions.push(AccessDescription {
            access_method: ID_AD_OCSP,
            access_location: GeneralName::UniformResourceIdentifier(
                Ia5String::new(url).map_err(|e| IssuanceError::Der(e.to_string()))?,
            ),
        });
    }
    if let Some(url) = issuer.issuer_url() {
        descriptions.push(AccessDescription {
            access_method: ID_AD_CA_ISSUERS,
            access_location: GeneralName::UniformResourceIdentifier(
                Ia5String::new(url).map_err(|e| IssuanceError::Der(e.to_string()))?,
            ),
        });
    }
    if descriptions.is_empty() {
        return Ok(None);
    }
    Ok(Some(encode_ext(
        ID_PE_AUTHORITY_INFO_ACCESS,
        false,
        &AuthorityInfoAccessSyntax(descriptions),
    )?))
}

/// A subject DN holding just a UTF8String common name, or the empty DN.
pub(crate) fn subject_name(cn: Option<&str>) -> Result<Name, IssuanceError> {
    let Some(cn) = cn else {
        return Ok(RdnSequence(Vec::new()));
    };
    let value = Any::from(AnyRef::from(
        Utf8StringRef::new(cn).map_err(|e| IssuanceError::Der(e.to_string()))?,
    ));
    let atav = AttributeTypeAndValue { oid: CN, value };
    let set = SetOfVec::try_from(vec![atav])?;
    Ok(RdnSequence(vec![RelativeDistinguishedName(set)]))
}

/// RFC 5280 requires UTCTime up to 2049 and GeneralizedTime from 2050 on.
pub(crate) fn der_time(t: OffsetDateTime) -> Result<Time, IssuanceError> {
    let unix = t.unix_timestamp();
    if unix < 0 {
        return Err(IssuanceError::InvalidRequest(
            "validity predates the unix epoch".into(),
        ));
    }
    let duration = std::time::Duration::from_secs(unix as u64);
    if t.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(duration)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(duration)?))
    }
}

pub(crate) fn offset_time(t: &Time) -> OffsetDateTime {
    let secs = match t {
        Time::UtcTime(u) => u.to_unix_duration().as_secs(),
        Time::GeneralTime(g) => g.to_unix_duration().as_secs(),
    };
    OffsetDateTime::from_unix_timestamp(secs as i64).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
