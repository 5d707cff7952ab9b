// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pre-signing certificate linting.
//!
//! Before an issuer's private key holder is asked to sign anything, a
//! lint copy of the certificate is synthesized and run through a battery of
//! policy checks. Any check reporting [`Severity::Error`] or higher halts
//! issuance. The battery is configured per issuer; [`Battery::standard`]
//! is the set a public CA runs.

use std::fmt;

use der::asn1::ObjectIdentifier;
use x509_cert::Certificate;

mod checks;

pub use checks::standard_lints;

/// RFC 6962 precertificate poison extension.
pub const CT_POISON_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.3");

/// RFC 6962 SCT list extension.
pub const SCT_LIST_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.2");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Notice,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Notice => write!(f, "notice"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// What a single lint reports when it is unhappy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub severity: Severity,
    pub detail: String,
}

impl Problem {
    pub fn error(detail: impl Into<String>) -> Self {
        Problem {
            severity: Severity::Error,
            detail: detail.into(),
        }
    }

    pub fn warn(detail: impl Into<String>) -> Self {
        Problem {
            severity: Severity::Warn,
            detail: detail.into(),
        }
    }
}

/// A problem attributed to the lint that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub lint: &'static str,
    pub severity: Severity,
    pub detail: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.lint, self.severity, self.detail)
    }
}

pub type LintFn = fn(&Certificate) -> Option<Problem>;

#[derive(Clone)]
pub struct Lint {
    pub name: &'static str,
    pub check: LintFn,
}

impl fmt::Debug for Lint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lint").field("name", &self.name).finish()
    }
}

/// Raised when a battery run produces at least one finding at
/// [`Severity::Error`] or above.
#[derive(Debug, Clone)]
pub struct LintError {
    pub findings: Vec<Finding>,
}

impl fmt::Display for LintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} lint failure(s):", self.findings.len())?;
        for finding in &self.findings {
            write!(f, " {};", finding)?;
        }
        Ok(())
    }
}

impl std::error::Error for LintError {}

/// An ordered set of lints run against every to-be-signed certificate.
#[derive(Debug, Clone)]
pub struct Battery {
    lints: Vec<Lint>,
}

impl Battery {
    /// The battery a public CA runs before signing.
    pub fn standard() -> Self {
        Battery {
            lints: standard_lints(),
        }
    }

    pub fn empty() -> Self {
        Battery { lints: Vec::new() }
    }

    pub fn with(mut self, lint: Lint) -> Self {
        self.lints.push(lint);
        self
    }

    pub fn len(&self) -> usize {
        self.lints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lints.is_empty()
    }

    /// Runs every lint. Findings below [`Severity::Error`] are collected but
    /// do not fail the run.
    pub fn check(&self, cert: &Certificate) -> Result<Vec<Finding>, LintError> {
        let mut findings = Vec::new();
        for lint in &self.lints {
            if let Some(problem) = (lint.check)(cert) {
                findings.push(Finding {
                    lint: lint.name,
                    severity: problem.severity,
                    detail: problem.detail,
                });
            }
        }
        if findings.iter().any(|f| f.severity >= Severity::Error) {
            return Err(LintError {
                findings: findings
                    .into_iter()
                    .filter(|f| f.severity >= Severity::Error)
                    .collect(),
            });
        }
        Ok(findings)
    }
}
