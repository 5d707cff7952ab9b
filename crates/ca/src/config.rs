// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Startup configuration for the CA.
//!
//! The embedding binary deserializes [`CaConfig`], loads each
//! [`IssuerConfig`] into an [`Issuer`], and hands everything to
//! [`crate::CertificateAuthority::new`].

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use der::{DecodePem, Encode};
use goodkey::AllowedKeys;
use issuance::{Issuer, IssuerError, IssuerOptions, ProfileConfig, SigningKey};
use lints::Battery;
use rsa::pkcs8::DecodePrivateKey;
use serde::Deserialize;
use thiserror::Error;
use x509_cert::Certificate;

#[derive(Debug, Deserialize)]
pub struct CaConfig {
    /// High byte of every serial; must be within `0x01..=0x7f`.
    pub serial_prefix: u8,
    /// Maximum SAN count per issuance.
    pub max_names: usize,
    /// Whether inbound request cancellation propagates to storage writes.
    /// Off by default: the CA prefers to finish what it started.
    #[serde(default)]
    pub propagate_cancels: bool,
    pub certificate_profiles: HashMap<String, ProfileConfig>,
    pub issuers: Vec<IssuerConfig>,
    #[serde(default)]
    pub allowed_keys: AllowedKeys,
}

#[derive(Debug, Deserialize)]
pub struct IssuerConfig {
    /// PEM certificate for this issuer.
    pub cert_file: PathBuf,
    /// PEM PKCS#8 private key matching the certificate.
    pub key_file: PathBuf,
    #[serde(default = "default_true")]
    pub active: bool,
    pub ocsp_url: Option<String>,
    pub issuer_url: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("could not parse issuer certificate: {0}")]
    CertParse(String),
    #[error("could not parse issuer key: {0}")]
    KeyParse(String),
    #[error(transparent)]
    Issuer(#[from] IssuerError),
}

impl IssuerConfig {
    pub fn load(&self) -> Result<Issuer, ConfigError> {
        let cert_pem = fs::read_to_string(&self.cert_file)?;
        let cert = Certificate::from_pem(cert_pem.as_bytes())
            .map_err(|e| ConfigError::CertParse(e.to_string()))?;
        let cert_der = cert
            .to_der()
            .map_err(|e| ConfigError::CertParse(e.to_string()))?;

        let key_pem = fs::read_to_string(&self.key_file)?;
        let key = parse_signing_key(&key_pem)?;

        Ok(Issuer::new(
            &cert_der,
            key,
            IssuerOptions {
                active: self.active,
                ocsp_url: self.ocsp_url.clone(),
                issuer_url: self.issuer_url.clone(),
                battery: Battery::standard(),
            },
        )?)
    }
}

fn parse_signing_key(pem: &str) -> Result<SigningKey, ConfigError> {
    if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(SigningKey::rsa(key));
    }
    if let Ok(key) = p256::SecretKey::from_pkcs8_pem(pem) {
        return Ok(SigningKey::EcdsaP256(key.into()));
    }
    if let Ok(key) = p384::SecretKey::from_pkcs8_pem(pem) {
        return Ok(SigningKey::EcdsaP384(key.into()));
    }
    Err(ConfigError::KeyParse(
        "not an RSA, P-256, or P-384 PKCS#8 key".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "serial_prefix": 127,
            "max_names": 100,
            "certificate_profiles": {
                "classic": {"validity": 7776000, "backdate": 3600}
            },
            "issuers": [
                {"cert_file": "/issuers/r1.pem", "key_file": "/issuers/r1.key.pem",
                 "ocsp_url": "http://ocsp.example", "issuer_url": null}
            ]
        }"#;
        let config: CaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.serial_prefix, 0x7f);
        assert!(!config.propagate_cancels);
        assert!(config.issuers[0].active);
        assert!(config.certificate_profiles.contains_key("classic"));
    }
}
