// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock collaborators for engine tests: a recording Storage Authority, a
//! permissive Policy Authority, a canned SCT provider, and a fixed clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use csr::{PolicyAuthority, PolicyError};
use issuance::test_helpers::fake_sct_bytes;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::storage::{
    AddCertificateRequest, AddPrecertificateRequest, AddSerialRequest, SctProvider,
    SctProviderError, StorageAuthority, StorageError,
};

pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Every Storage Authority call, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    AddSerial(AddSerialRequest),
    AddPrecertificate(AddPrecertificateRequest),
    SetCertificateStatusReady(String),
    GetCertificate(String),
    AddCertificate(AddCertificateRequest),
}

impl StorageOp {
    pub fn name(&self) -> &'static str {
        match self {
            StorageOp::AddSerial(_) => "add_serial",
            StorageOp::AddPrecertificate(_) => "add_precertificate",
            StorageOp::SetCertificateStatusReady(_) => "set_certificate_status_ready",
            StorageOp::GetCertificate(_) => "get_certificate",
            StorageOp::AddCertificate(_) => "add_certificate",
        }
    }
}

/// In-memory Storage Authority that records the call sequence and serves
/// stored final certificates back out of `get_certificate`.
#[derive(Default)]
pub struct MockStorageAuthority {
    pub ops: Mutex<Vec<StorageOp>>,
    pub certificates: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_add_serial: AtomicBool,
    pub fail_add_precertificate: AtomicBool,
    pub fail_set_ready: AtomicBool,
    pub fail_add_certificate: AtomicBool,
    pub fail_get_certificate: AtomicBool,
}

impl MockStorageAuthority {
    pub fn op_names(&self) -> Vec<&'static str> {
        self.ops.lock().unwrap().iter().map(StorageOp::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.name() == name)
            .count()
    }

    /// Index of the first op with this name in the recorded sequence.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .position(|op| op.name() == name)
    }

    pub fn precertificate_rows(&self) -> Vec<AddPrecertificateRequest> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                StorageOp::AddPrecertificate(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn serial_rows(&self) -> Vec<AddSerialRequest> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                StorageOp::AddSerial(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: StorageOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl StorageAuthority for MockStorageAuthority {
    async fn add_serial(&self, req: AddSerialRequest) -> Result<(), StorageError> {
        if self.fail_add_serial.load(Ordering::SeqCst) {
            return Err(StorageError::Other("add_serial failed".into()));
        }
        self.record(StorageOp::AddSerial(req));
        Ok(())
    }

    async fn add_precertificate(&self, req: AddPrecertificateRequest) -> Result<(), StorageError> {
        if self.fail_add_precertificate.load(Ordering::SeqCst) {
            return Err(StorageError::Other("add_precertificate failed".into()));
        }
        self.record(StorageOp::AddPrecertificate(req));
        Ok(())
    }

    async fn set_certificate_status_ready(&self, serial: String) -> Result<(), StorageError> {
        if self.fail_set_ready.load(Ordering::SeqCst) {
            return Err(StorageError::Other("set_certificate_status_ready failed".into()));
        }
        self.record(StorageOp::SetCertificateStatusReady(serial));
        Ok(())
    }

    async fn get_certificate(&self, serial: &str) -> Result<Vec<u8>, StorageError> {
        if self.fail_get_certificate.load(Ordering::SeqCst) {
            return Err(StorageError::Other("get_certificate failed".into()));
        }
        self.record(StorageOp::GetCertificate(serial.to_string()));
        match self.certificates.lock().unwrap().get(serial) {
            Some(der) => Ok(der.clone()),
            None => Err(StorageError::NotFound),
        }
    }

    async fn add_certificate(&self, req: AddCertificateRequest) -> Result<(), StorageError> {
        if self.fail_add_certificate.load(Ordering::SeqCst) {
            return Err(StorageError::Other("add_certificate failed".into()));
        }
        let serial = hex::encode(serial_of(&req.der));
        self.certificates.lock().unwrap().insert(serial, req.der.clone());
        self.record(StorageOp::AddCertificate(req));
        Ok(())
    }
}

fn serial_of(der: &[u8]) -> Vec<u8> {
    use der::Decode;
    x509_cert::Certificate::from_der(der)
        .map(|cert| cert.tbs_certificate.serial_number.as_bytes().to_vec())
        .unwrap_or_default()
}

/// A Policy Authority that never objects.
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyAuthority for AllowAllPolicy {
    async fn willing_to_issue(&self, _dns_names: &[String]) -> Result<(), PolicyError> {
        Ok(())
    }
}

/// A Policy Authority that refuses a fixed set of names.
pub struct BlockListPolicy(pub Vec<String>);

#[async_trait]
impl PolicyAuthority for BlockListPolicy {
    async fn willing_to_issue(&self, dns_names: &[String]) -> Result<(), PolicyError> {
        for name in dns_names {
            if self.0.contains(name) {
                return Err(PolicyError(format!("policy forbids name {name}")));
            }
        }
        Ok(())
    }
}

/// Hands back a fixed set of SCT blobs, or fails on demand.
#[derive(Default)]
pub struct StaticSctProvider {
    pub scts: Vec<Vec<u8>>,
    pub fail: AtomicBool,
}

impl StaticSctProvider {
    /// Two structurally valid SCTs from imaginary logs.
    pub fn two() -> StaticSctProvider {
        StaticSctProvider {
            scts: vec![fake_sct_bytes(1), fake_sct_bytes(2)],
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SctProvider for StaticSctProvider {
    async fn get_scts(&self, _precert_der: &[u8]) -> Result<Vec<Vec<u8>>, SctProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SctProviderError("log submission failed".into()));
        }
        Ok(self.scts.clone())
    }
}
