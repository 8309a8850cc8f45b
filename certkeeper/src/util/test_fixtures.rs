// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

#![allow(dead_code)]

use crate::issuer::{Issue, IssuedCertificate};
use crate::store::{SecretStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use rcgen::{CertificateParams, KeyPair};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug)]
pub struct TestFixtureRoot {
    path: PathBuf,
}

impl TestFixtureRoot {
    pub fn new_unique(prefix: &str) -> io::Result<Self> {
        let name = format!("{}-{}", prefix, Uuid::new_v4());
        let root = fixtures_root().join(name);
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;
        Ok(Self { path: root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn challenge_dir(&self) -> io::Result<PathBuf> {
        let dir = self.path.join("challenges");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Drop for TestFixtureRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn fixtures_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let repo_root = manifest_dir.parent().unwrap_or(&manifest_dir);
    repo_root.join("target").join("test-fixtures")
}

/// Self-signed PEM certificate with a chosen expiry, for validity tests.
pub fn cert_pem_with_validity(domain: &str, not_after: OffsetDateTime) -> Vec<u8> {
    let mut params = CertificateParams::new(vec![domain.to_string()]).expect("params");
    params.not_before = not_after - time::Duration::days(1);
    params.not_after = not_after;
    let key_pair = KeyPair::generate().expect("key pair");
    let cert = params.self_signed(&key_pair).expect("cert");
    cert.pem().into_bytes()
}

/// In-memory secret store with scriptable failures, keyed by
/// (namespace, name). Counters track exactly how often the reconciler touched
/// the store.
#[derive(Default)]
pub struct StubStore {
    pub secrets: Mutex<HashMap<(String, String), Secret>>,
    /// Number of update attempts to reject with Conflict before succeeding.
    pub update_conflicts: AtomicUsize,
    /// Number of initial gets that report NotFound even when a secret is
    /// stored, to simulate a concurrent creator.
    pub hide_from_get: AtomicUsize,
    pub fail_gets_with_api_error: AtomicBool,
    pub fail_creates_with_api_error: AtomicBool,
    pub fail_updates_with_api_error: AtomicBool,
    pub get_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
}

impl StubStore {
    pub fn put(&self, namespace: &str, name: &str, secret: Secret) {
        self.secrets
            .lock()
            .expect("stub store lock")
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn get_stored(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .expect("stub store lock")
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn key_of(secret: &Secret) -> Result<(String, String), StoreError> {
        let namespace = secret
            .metadata
            .namespace
            .clone()
            .filter(|value| !value.is_empty());
        let name = secret
            .metadata
            .name
            .clone()
            .filter(|value| !value.is_empty());
        match (namespace, name) {
            (Some(namespace), Some(name)) => Ok((namespace, name)),
            _ => Err(StoreError::Api(
                "stub secret is missing namespace or name".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SecretStore for StubStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets_with_api_error.load(Ordering::SeqCst) {
            return Err(StoreError::Api("stubbed get failure".to_string()));
        }
        if self.hide_from_get.load(Ordering::SeqCst) > 0 {
            self.hide_from_get.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::NotFound);
        }
        self.get_stored(namespace, name).ok_or(StoreError::NotFound)
    }

    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates_with_api_error.load(Ordering::SeqCst) {
            return Err(StoreError::Api("stubbed create failure".to_string()));
        }
        let key = Self::key_of(secret)?;
        let mut secrets = self.secrets.lock().expect("stub store lock");
        if secrets.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        secrets.insert(key, secret.clone());
        Ok(())
    }

    async fn update(&self, secret: &Secret) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates_with_api_error.load(Ordering::SeqCst) {
            return Err(StoreError::Api("stubbed update failure".to_string()));
        }
        if self.update_conflicts.load(Ordering::SeqCst) > 0 {
            self.update_conflicts.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Conflict);
        }
        let key = Self::key_of(secret)?;
        let mut secrets = self.secrets.lock().expect("stub store lock");
        if !secrets.contains_key(&key) {
            return Err(StoreError::NotFound);
        }
        secrets.insert(key, secret.clone());
        Ok(())
    }
}

/// Issuer stub returning fixed material, counting invocations.
pub struct StubIssuer {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl Default for StubIssuer {
    fn default() -> Self {
        Self {
            cert_pem: b"stub-cert-pem".to_vec(),
            key_pem: b"stub-key-pem".to_vec(),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }
}

impl StubIssuer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait(?Send)]
impl Issue for StubIssuer {
    async fn issue(&self, _email: &str, _domain: &str) -> io::Result<IssuedCertificate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(io::Error::other("stubbed issuance failure"));
        }
        Ok(IssuedCertificate {
            cert_pem: self.cert_pem.clone(),
            key_pem: self.key_pem.clone(),
        })
    }
}
