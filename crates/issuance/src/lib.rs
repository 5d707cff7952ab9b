// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Issuer identities and two-phase certificate construction.
//!
//! An [`Issuer`] wraps a signing key and its CA certificate. Issuance is
//! split into two steps with a linting gate between them:
//!
//! 1. [`Issuer::prepare`] deterministically builds the TBSCertificate for an
//!    [`IssuanceRequest`] under a [`Profile`], synthesizes a lint
//!    certificate signed by a throwaway key, runs the lint battery over it,
//!    and hands back the lint DER together with a single-use
//!    [`IssuanceToken`].
//! 2. [`Issuer::issue`] consumes the token and asks the real key holder to
//!    sign the identical TBS bytes.
//!
//! Because the token is a move-only value, a prepared TBS can be signed at
//! most once.

mod issuer;
mod profile;
mod request;
mod tbs;

pub mod sct;
pub mod test_helpers;

pub use issuer::{
    Issuer, IssuerError, IssuerOptions, IssuanceError, IssuanceToken, KeyHandle, NameId,
    SignError, SigningKey,
};
pub use profile::{Profile, ProfileConfig, ProfileError};
pub use request::{request_from_precert, IssuanceRequest, RequestError};
