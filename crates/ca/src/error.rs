// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error taxonomy surfaced to callers.

use std::fmt;

use thiserror::Error;

use crate::storage::StorageError;

/// How a caller should interpret a failure. User-attributable problems
/// (bad CSR, policy refusal) are distinguished from everything else, which
/// collapses into [`ErrorKind::InternalServerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    BadPublicKey,
    NotFound,
    InternalServerError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Malformed => write!(f, "malformed"),
            ErrorKind::BadPublicKey => write!(f, "bad public key"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::InternalServerError => write!(f, "internal server error"),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{detail}")]
pub struct Error {
    kind: ErrorKind,
    detail: String,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn malformed(detail: impl Into<String>) -> Error {
        Error { kind: ErrorKind::Malformed, detail: detail.into() }
    }

    pub fn bad_public_key(detail: impl Into<String>) -> Error {
        Error { kind: ErrorKind::BadPublicKey, detail: detail.into() }
    }

    pub fn not_found(detail: impl Into<String>) -> Error {
        Error { kind: ErrorKind::NotFound, detail: detail.into() }
    }

    pub fn internal(detail: impl Into<String>) -> Error {
        Error { kind: ErrorKind::InternalServerError, detail: detail.into() }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Error {
        match e {
            StorageError::NotFound => Error::not_found("not found in storage"),
            StorageError::Other(detail) => Error::internal(format!("storage failure: {detail}")),
        }
    }
}
