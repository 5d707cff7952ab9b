// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RFC 6962 signed certificate timestamps.
//!
//! The CT log client hands us opaque TLS-serialized SCT blobs; we parse
//! them into [`Sct`] values and re-serialize the set into the SCT-list
//! certificate extension that replaces the poison in the final certificate.

use der::asn1::OctetString;
use der::Encode;
use thiserror::Error;
use x509_cert::ext::Extension;

use crate::issuer::IssuanceError;

pub use lints::{CT_POISON_OID, SCT_LIST_OID};

/// The only SCT version defined by RFC 6962.
const SCT_VERSION_V1: u8 = 0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SctError {
    #[error("truncated SCT")]
    Truncated,
    #[error("trailing data after SCT")]
    TrailingData,
    #[error("unsupported SCT version {0}")]
    UnsupportedVersion(u8),
    #[error("SCT component exceeds 2^16-1 bytes")]
    Oversize,
}

/// One signed certificate timestamp, decomposed from its TLS encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sct {
    pub log_id: [u8; 32],
    pub timestamp: u64,
    pub extensions: Vec<u8>,
    pub hash_algorithm: u8,
    pub signature_algorithm: u8,
    pub signature: Vec<u8>,
}

impl Sct {
    /// Parses a single TLS-serialized v1 SCT. The whole input must be
    /// consumed.
    pub fn parse(bytes: &[u8]) -> Result<Sct, SctError> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let version = cursor.u8()?;
        if version != SCT_VERSION_V1 {
            return Err(SctError::UnsupportedVersion(version));
        }
        let mut log_id = [0u8; 32];
        log_id.copy_from_slice(cursor.take(32)?);
        let timestamp = cursor.u64()?;
        let extensions = cursor.vec16()?;
        let hash_algorithm = cursor.u8()?;
        let signature_algorithm = cursor.u8()?;
        let signature = cursor.vec16()?;
        if cursor.pos != bytes.len() {
            return Err(SctError::TrailingData);
        }
        Ok(Sct {
            log_id,
            timestamp,
            extensions,
            hash_algorithm,
            signature_algorithm,
            signature,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, SctError> {
        let mut out = Vec::with_capacity(45 + self.extensions.len() + self.signature.len());
        out.push(SCT_VERSION_V1);
        out.extend_from_slice(&self.log_id);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        push16(&mut out, &self.extensions)?;
        out.push(self.hash_algorithm);
        out.push(self.signature_algorithm);
        push16(&mut out, &self.signature)?;
        Ok(out)
    }
}

/// TLS `SignedCertificateTimestampList`: a 2-byte length, then each SCT
/// with its own 2-byte length.
pub fn serialize_list(scts: &[Sct]) -> Result<Vec<u8>, SctError> {
    let mut body = Vec::new();
    for sct in scts {
        push16(&mut body, &sct.serialize()?)?;
    }
    let mut out = Vec::with_capacity(body.len() + 2);
    push16(&mut out, &body)?;
    Ok(out)
}

pub fn parse_list(bytes: &[u8]) -> Result<Vec<Sct>, SctError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let body = cursor.vec16()?;
    if cursor.pos != bytes.len() {
        return Err(SctError::TrailingData);
    }
    let mut inner = Cursor { bytes: &body, pos: 0 };
    let mut scts = Vec::new();
    while inner.pos < body.len() {
        let entry = inner.vec16()?;
        scts.push(Sct::parse(&entry)?);
    }
    Ok(scts)
}

/// The critical poison extension carried by every precertificate.
pub fn poison_extension() -> Result<Extension, IssuanceError> {
    Ok(Extension {
        extn_id: CT_POISON_OID,
        critical: true,
        // DER NULL
        extn_value: OctetString::new(vec![0x05, 0x00])?,
    })
}

/// The SCT-list extension that replaces the poison in a final certificate.
/// The extension value is an OCTET STRING wrapping the TLS list.
pub fn sct_list_extension(scts: &[Sct]) -> Result<Extension, IssuanceError> {
    let tls = serialize_list(scts).map_err(|e| IssuanceError::Der(e.to_string()))?;
    let inner = OctetString::new(tls)?;
    Ok(Extension {
        extn_id: SCT_LIST_OID,
        critical: false,
        extn_value: OctetString::new(inner.to_der()?)?,
    })
}

/// Recovers the SCTs from an SCT-list extension value.
pub fn scts_from_extension(ext: &Extension) -> Result<Vec<Sct>, IssuanceError> {
    use der::Decode;
    let inner = OctetString::from_der(ext.extn_value.as_bytes())?;
    parse_list(inner.as_bytes()).map_err(|e| IssuanceError::Der(e.to_string()))
}

fn push16(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), SctError> {
    let len = u16::try_from(bytes.len()).map_err(|_| SctError::Oversize)?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SctError> {
        if self.pos + n > self.bytes.len() {
            return Err(SctError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SctError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, SctError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn vec16(&mut self) -> Result<Vec<u8>, SctError> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        let len = u16::from_be_bytes(buf) as usize;
        Ok(self.take(len)?.to_vec())
    }
}
