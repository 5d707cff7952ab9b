// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Issuance metrics.

use issuance::{IssuanceError, SignError};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

pub struct CaMetrics {
    signature_count: IntCounterVec,
    sign_error_count: IntCounterVec,
    lint_error_count: IntCounter,
    certificates: IntCounterVec,
}

impl CaMetrics {
    pub fn new(registry: &Registry) -> CaMetrics {
        let signature_count = IntCounterVec::new(
            Opts::new("signatures", "Number of signatures"),
            &["purpose", "issuer"],
        )
        .unwrap();
        registry.register(Box::new(signature_count.clone())).unwrap();

        let sign_error_count = IntCounterVec::new(
            Opts::new("signature_errors", "A counter of signature errors labelled by error type"),
            &["type"],
        )
        .unwrap();
        registry.register(Box::new(sign_error_count.clone())).unwrap();

        let lint_error_count = IntCounter::new(
            "lint_errors",
            "Number of issuances that were halted by linting errors",
        )
        .unwrap();
        registry.register(Box::new(lint_error_count.clone())).unwrap();

        let certificates = IntCounterVec::new(
            Opts::new("certificates", "Number of certificates issued"),
            &["profile"],
        )
        .unwrap();
        registry.register(Box::new(certificates.clone())).unwrap();

        CaMetrics { signature_count, sign_error_count, lint_error_count, certificates }
    }

    pub(crate) fn note_signature(&self, purpose: &str, issuer: &str) {
        self.signature_count.with_label_values(&[purpose, issuer]).inc();
    }

    pub(crate) fn note_certificate(&self, profile: &str) {
        self.certificates.with_label_values(&[profile]).inc();
    }

    pub(crate) fn note_lint_error(&self) {
        self.lint_error_count.inc();
    }

    /// Recognizes hardware-token signing failures so HSM trouble stands out
    /// from everything else.
    pub(crate) fn note_sign_error(&self, err: &IssuanceError) {
        if let IssuanceError::Sign(SignError::Token(_)) = err {
            self.sign_error_count.with_label_values(&["HSM"]).inc();
        }
    }

    pub fn lint_errors(&self) -> u64 {
        self.lint_error_count.get()
    }

    pub fn signatures(&self, purpose: &str, issuer: &str) -> u64 {
        self.signature_count.with_label_values(&[purpose, issuer]).get()
    }

    pub fn certificates_issued(&self, profile: &str) -> u64 {
        self.certificates.with_label_values(&[profile]).get()
    }

    pub fn hsm_errors(&self) -> u64 {
        self.sign_error_count.with_label_values(&["HSM"]).get()
    }
}
