// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public key admission policy.
//!
//! Every subscriber key is checked against this policy before the CA agrees
//! to sign anything over it. The policy is deliberately a whitelist: a key is
//! rejected unless its algorithm, size, and shape are all explicitly allowed.

use std::fmt;

use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1, SECP_384_R_1};
use der::asn1::ObjectIdentifier;
use der::Encode;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::Deserialize;
use thiserror::Error;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

/// The two public-key algorithms the CA issues for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => write!(f, "RSA"),
            KeyAlgorithm::Ecdsa => write!(f, "ECDSA"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum KeyError {
    #[error("unsupported public key type")]
    UnsupportedKeyType,
    #[error("could not parse public key: {0}")]
    Parse(String),
    #[error("unsupported RSA modulus size: {0} bits")]
    RsaModulusSize(u64),
    #[error("RSA modulus is even")]
    RsaModulusEven,
    #[error("RSA modulus is divisible by small prime {0}")]
    RsaModulusSmallPrime(u64),
    #[error("RSA public exponent is even")]
    RsaExponentEven,
    #[error("RSA public exponent is too small")]
    RsaExponentTooSmall,
    #[error("RSA public exponent is too large")]
    RsaExponentTooLarge,
    #[error("unsupported ECDSA curve")]
    UnsupportedCurve,
    #[error("key policy allows no key types")]
    NothingAllowed,
}

/// Which key shapes the policy admits. Defaults to everything the CA can
/// sign for.
#[derive(Debug, Clone, Deserialize)]
pub struct AllowedKeys {
    #[serde(default)]
    pub rsa2048: bool,
    #[serde(default)]
    pub rsa3072: bool,
    #[serde(default)]
    pub rsa4096: bool,
    #[serde(default)]
    pub ecdsa_p256: bool,
    #[serde(default)]
    pub ecdsa_p384: bool,
}

impl Default for AllowedKeys {
    fn default() -> Self {
        AllowedKeys {
            rsa2048: true,
            rsa3072: true,
            rsa4096: true,
            ecdsa_p256: true,
            ecdsa_p384: true,
        }
    }
}

/// Minimum RSA public exponent, per the Baseline Requirements (F4).
const MIN_RSA_EXPONENT: u32 = 65537;

/// Maximum bit length we accept for an RSA public exponent.
const MAX_RSA_EXPONENT_BITS: u64 = 64;

/// Primes used to screen RSA moduli for trivially weak factors.
const SMALL_PRIMES: &[u64] = &[
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

#[derive(Debug, Clone)]
pub struct KeyPolicy {
    allowed: AllowedKeys,
}

impl KeyPolicy {
    pub fn new(allowed: AllowedKeys) -> Result<Self, KeyError> {
        if !(allowed.rsa2048
            || allowed.rsa3072
            || allowed.rsa4096
            || allowed.ecdsa_p256
            || allowed.ecdsa_p384)
        {
            return Err(KeyError::NothingAllowed);
        }
        Ok(KeyPolicy { allowed })
    }

    /// Checks a SubjectPublicKeyInfo against the policy, returning the key's
    /// algorithm family on success.
    pub fn check(&self, spki: &SubjectPublicKeyInfoOwned) -> Result<KeyAlgorithm, KeyError> {
        if spki.algorithm.oid == RSA_ENCRYPTION {
            self.check_rsa(spki)?;
            Ok(KeyAlgorithm::Rsa)
        } else if spki.algorithm.oid == ID_EC_PUBLIC_KEY {
            self.check_ecdsa(spki)?;
            Ok(KeyAlgorithm::Ecdsa)
        } else {
            Err(KeyError::UnsupportedKeyType)
        }
    }

    fn check_rsa(&self, spki: &SubjectPublicKeyInfoOwned) -> Result<(), KeyError> {
        let spki_der = spki.to_der().map_err(|e| KeyError::Parse(e.to_string()))?;
        let key =
            RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| KeyError::Parse(e.to_string()))?;

        let bits = key.n().bits() as u64;
        let allowed = match bits {
            2048 => self.allowed.rsa2048,
            3072 => self.allowed.rsa3072,
            4096 => self.allowed.rsa4096,
            _ => false,
        };
        if !allowed {
            return Err(KeyError::RsaModulusSize(bits));
        }

        if is_even(key.n()) {
            return Err(KeyError::RsaModulusEven);
        }
        if let Some(p) = small_prime_factor(key.n()) {
            return Err(KeyError::RsaModulusSmallPrime(p));
        }

        let e = key.e();
        if is_even(e) {
            return Err(KeyError::RsaExponentEven);
        }
        if e < &BigUint::from(MIN_RSA_EXPONENT) {
            return Err(KeyError::RsaExponentTooSmall);
        }
        if e.bits() as u64 > MAX_RSA_EXPONENT_BITS {
            return Err(KeyError::RsaExponentTooLarge);
        }

        Ok(())
    }

    fn check_ecdsa(&self, spki: &SubjectPublicKeyInfoOwned) -> Result<(), KeyError> {
        let params = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or(KeyError::UnsupportedCurve)?;
        let curve: ObjectIdentifier = params
            .decode_as()
            .map_err(|_| KeyError::UnsupportedCurve)?;

        let allowed = if curve == SECP_256_R_1 {
            self.allowed.ecdsa_p256
        } else if curve == SECP_384_R_1 {
            self.allowed.ecdsa_p384
        } else {
            false
        };
        if !allowed {
            return Err(KeyError::UnsupportedCurve);
        }
        Ok(())
    }
}

fn is_even(n: &BigUint) -> bool {
    n.to_bytes_be().last().map(|b| b % 2 == 0).unwrap_or(true)
}

fn small_prime_factor(n: &BigUint) -> Option<u64> {
    for &p in SMALL_PRIMES {
        if n % &BigUint::from(p) == BigUint::from(0u8) {
            return Some(p);
        }
    }
    None
}
