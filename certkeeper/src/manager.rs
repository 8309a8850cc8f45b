// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::backup;
use crate::config::Target;
use crate::issuer::{Issue, IssuedCertificate};
use crate::store::{self, SecretStore, StoreError};
use crate::validity;
use k8s_openapi::api::core::v1::Secret;
use log::{info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use time::Duration;

/// Renewal margin. Deliberately much shorter than the run interval so a
/// secret is renewed well before real expiry without churning on every pass.
const MIN_CERT_VALIDITY: Duration = Duration::hours(1);

/// Bound on contending with one concurrent writer of the same secret.
const UPDATE_ATTEMPTS: usize = 3;

pub struct SecretManager {
    store: Arc<dyn SecretStore>,
    backup_path: Option<PathBuf>,
}

impl SecretManager {
    pub fn new(store: Arc<dyn SecretStore>, backup_path: Option<PathBuf>) -> Self {
        Self { store, backup_path }
    }

    /// Makes one target's stored secret valid, idempotently. Reconciling an
    /// already-valid secret performs no store write and no issuance.
    pub async fn ensure_tls_secret(&self, target: &Target, issuer: &dyn Issue) -> io::Result<()> {
        target
            .validate()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;

        let namespace = target.namespace.trim();
        let secret_name = target.secret_name.as_str();

        let existing = match self.store.get(namespace, secret_name).await {
            Ok(secret) => Some(secret),
            Err(StoreError::NotFound) => None,
            Err(err) => {
                return Err(io::Error::other(format!(
                    "failed to request secret {}/{} from the store: {}",
                    namespace, secret_name, err
                )));
            }
        };

        info!(
            "secret {}/{} found: {}",
            namespace,
            secret_name,
            existing.is_some()
        );

        if let Some(secret) = existing.as_ref() {
            if validity::is_cert_valid(secret, MIN_CERT_VALIDITY) {
                info!(
                    "secret {}/{} already exists and is valid",
                    namespace, secret_name
                );
                return Ok(());
            }
        }

        info!(
            "secret {}/{} does not exist or is not valid, requesting a new certificate",
            namespace, secret_name
        );

        let issued = issuer.issue(&target.email, &target.domain).await.map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("failed to issue certificate for {}: {}", target.domain, err),
            )
        })?;

        match existing {
            Some(current) => self.update_with_retry(target, current, &issued).await,
            None => self.create_secret(target, &issued).await,
        }
    }

    async fn create_secret(&self, target: &Target, issued: &IssuedCertificate) -> io::Result<()> {
        let namespace = target.namespace.trim();
        let secret_name = target.secret_name.as_str();
        let secret = store::tls_secret(namespace, secret_name, &issued.cert_pem, &issued.key_pem);

        match self.store.create(&secret).await {
            Ok(()) => {
                info!("created secret {}/{}", namespace, secret_name);
                Ok(())
            }
            Err(StoreError::AlreadyExists) => {
                // Someone created the secret between our fetch and the write.
                // Treat it like an update conflict: take the current object
                // and install the freshly issued data over it.
                info!(
                    "secret {}/{} was created concurrently, switching to update",
                    namespace, secret_name
                );
                match self.store.get(namespace, secret_name).await {
                    Ok(current) => self.update_with_retry(target, current, issued).await,
                    Err(err) => {
                        self.backup_on_failure(target, issued);
                        Err(io::Error::other(format!(
                            "failed to get secret {}/{} after concurrent creation: {}",
                            namespace, secret_name, err
                        )))
                    }
                }
            }
            Err(err) => {
                self.backup_on_failure(target, issued);
                Err(io::Error::other(format!(
                    "failed to create secret {}/{}: {}",
                    namespace, secret_name, err
                )))
            }
        }
    }

    async fn update_with_retry(
        &self,
        target: &Target,
        mut current: Secret,
        issued: &IssuedCertificate,
    ) -> io::Result<()> {
        let namespace = target.namespace.trim();
        let secret_name = target.secret_name.as_str();
        let data = store::tls_secret_data(&issued.cert_pem, &issued.key_pem);

        let mut last_error: Option<io::Error> = None;
        for attempt in 0..UPDATE_ATTEMPTS {
            current.data = Some(data.clone());
            current.type_ = Some(store::TLS_SECRET_TYPE.to_string());

            match self.store.update(&current).await {
                Ok(()) => {
                    info!("updated secret {}/{}", namespace, secret_name);
                    return Ok(());
                }
                Err(StoreError::Conflict) => {
                    last_error = Some(io::Error::other(format!(
                        "failed to update secret {}/{} after {} attempts: {}",
                        namespace,
                        secret_name,
                        UPDATE_ATTEMPTS,
                        StoreError::Conflict
                    )));
                    // Re-fetch only while an attempt remains to use it.
                    if attempt + 1 == UPDATE_ATTEMPTS {
                        break;
                    }
                    match self.store.get(namespace, secret_name).await {
                        Ok(latest) => current = latest,
                        Err(err) => {
                            last_error = Some(io::Error::other(format!(
                                "failed to get secret {}/{} on conflict retry: {}",
                                namespace, secret_name, err
                            )));
                            break;
                        }
                    }
                }
                Err(err) => {
                    last_error = Some(io::Error::other(format!(
                        "failed to update secret {}/{}: {}",
                        namespace, secret_name, err
                    )));
                    break;
                }
            }
        }

        self.backup_on_failure(target, issued);
        Err(last_error.unwrap_or_else(|| {
            io::Error::other(format!(
                "failed to update secret {}/{} after {} attempts",
                namespace, secret_name, UPDATE_ATTEMPTS
            ))
        }))
    }

    /// Best-effort: a backup failure is logged and never masks the original
    /// reconciliation failure.
    fn backup_on_failure(&self, target: &Target, issued: &IssuedCertificate) {
        let backup_path = match self.backup_path.as_ref() {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => return,
        };

        match backup::backup_secret_data(
            backup_path,
            &target.namespace,
            &target.secret_name,
            &target.domain,
            &issued.cert_pem,
            &issued.key_pem,
        ) {
            Ok(path) => info!("backed up certificate data to {}", path.display()),
            Err(err) => warn!(
                "failed to back up certificate data after secret install failure: {}",
                err
            ),
        }
    }
}
