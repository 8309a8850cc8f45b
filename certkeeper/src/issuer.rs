// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::challenge::FileChallengeSolver;
use crate::config::AcmeEnvironment;
use async_trait::async_trait;
use lers::{Directory, Solver, LETS_ENCRYPT_PRODUCTION_URL, LETS_ENCRYPT_STAGING_URL};
use log::info;
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use reqwest::Client;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration as StdDuration;
use time::OffsetDateTime;

/// Freshly issued certificate material. Consumed by the reconciler within the
/// same pass and then dropped; never cached.
pub struct IssuedCertificate {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// Capability the reconciler depends on instead of a concrete issuer.
#[async_trait(?Send)]
pub trait Issue: Send + Sync {
    async fn issue(&self, email: &str, domain: &str) -> io::Result<IssuedCertificate>;
}

pub struct AcmeIssuer {
    directory_url: String,
    challenge_dir: PathBuf,
    obtain_timeout: StdDuration,
}

impl AcmeIssuer {
    pub fn new(
        environment: AcmeEnvironment,
        directory_url: Option<String>,
        challenge_dir: impl Into<PathBuf>,
        obtain_timeout: StdDuration,
    ) -> Self {
        let directory_url = directory_url.unwrap_or_else(|| {
            match environment {
                AcmeEnvironment::Production => LETS_ENCRYPT_PRODUCTION_URL,
                AcmeEnvironment::Staging => LETS_ENCRYPT_STAGING_URL,
            }
            .to_string()
        });
        Self {
            directory_url,
            challenge_dir: challenge_dir.into(),
            obtain_timeout,
        }
    }
}

#[async_trait(?Send)]
impl Issue for AcmeIssuer {
    async fn issue(&self, email: &str, domain: &str) -> io::Result<IssuedCertificate> {
        info!(
            "ACME issuance starting (domain={}, directory_url={})",
            domain, self.directory_url
        );

        // One solver instance per issuance; the clone shares its token state
        // so leftovers can be removed after a failed order.
        let solver = FileChallengeSolver::new(self.challenge_dir.clone());
        let cleanup_handle = solver.clone();

        let client = Client::builder()
            .user_agent("certkeeper-acme")
            .build()
            .map_err(|err| io::Error::other(err.to_string()))?;

        let boxed_solver: Box<dyn Solver> = Box::new(solver);
        let directory = Directory::builder(self.directory_url.clone())
            .client(client)
            .http01_solver(boxed_solver)
            .build()
            .await
            .map_err(|err| {
                io::Error::other(format!(
                    "failed to build ACME directory for {}: {}",
                    domain, err
                ))
            })?;

        let account_key = generate_account_key()?;
        let account = directory
            .account()
            .contacts(vec![format!("mailto:{}", email)])
            .terms_of_service_agreed(true)
            .private_key(account_key)
            .create_if_not_exists()
            .await
            .map_err(|err| {
                io::Error::other(format!(
                    "failed to register ACME account for {}: {}",
                    email, err
                ))
            })?;

        let order = account.certificate().add_domain(domain).obtain();
        let certificate = match obtain_with_deadline(self.obtain_timeout, domain, order).await {
            Ok(certificate) => certificate,
            Err(err) => {
                cleanup_handle.force_cleanup();
                return Err(err);
            }
        };

        let cert_pem: Vec<u8> = certificate
            .fullchain_to_pem()
            .map_err(|err| io::Error::other(err.to_string()))?
            .into();
        let key_pem: Vec<u8> = certificate
            .private_key_to_pem()
            .map_err(|err| io::Error::other(err.to_string()))?
            .into();

        info!("ACME certificate issued for {}", domain);

        Ok(IssuedCertificate { cert_pem, key_pem })
    }
}

/// Races the order against the caller's deadline. When the deadline wins the
/// order future is dropped, which cancels the in-flight request; nothing keeps
/// running in the background.
async fn obtain_with_deadline<F, T, E>(
    deadline: StdDuration,
    domain: &str,
    order: F,
) -> io::Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(deadline, order).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(io::Error::other(format!(
            "failed to obtain certificate for {}: {}",
            domain, err
        ))),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!(
                "certificate order for {} timed out after {:?}",
                domain, deadline
            ),
        )),
    }
}

fn generate_account_key() -> io::Result<PKey<Private>> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
        .map_err(|err| io::Error::other(err.to_string()))?;
    let ec_key = EcKey::generate(&group).map_err(|err| io::Error::other(err.to_string()))?;
    PKey::from_ec_key(ec_key).map_err(|err| io::Error::other(err.to_string()))
}

/// Issues a throwaway self-signed certificate instead of contacting a CA.
/// Used by the stripped-down deployment variant where the workload only needs
/// a placeholder certificate.
pub struct SelfSignedIssuer {
    validity: time::Duration,
}

impl SelfSignedIssuer {
    pub fn new(validity: time::Duration) -> Self {
        Self { validity }
    }
}

impl Default for SelfSignedIssuer {
    fn default() -> Self {
        Self::new(time::Duration::days(90))
    }
}

#[async_trait(?Send)]
impl Issue for SelfSignedIssuer {
    async fn issue(&self, _email: &str, domain: &str) -> io::Result<IssuedCertificate> {
        let mut params = CertificateParams::new(vec![domain.to_string()])
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, domain);
        params.distinguished_name = dn;

        let now = OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::seconds(60);
        params.not_after = now + self.validity;

        let key_pair =
            KeyPair::generate().map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        info!("Generated self-signed certificate for {}", domain);

        Ok(IssuedCertificate {
            cert_pem: cert.pem().into_bytes(),
            key_pem: key_pair.serialize_pem().into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validity::cert_not_after;
    use std::time::Instant;

    #[test]
    fn directory_url_follows_environment() {
        let staging = AcmeIssuer::new(
            AcmeEnvironment::Staging,
            None,
            "/tmp/challenges",
            StdDuration::from_secs(60),
        );
        assert_eq!(staging.directory_url, LETS_ENCRYPT_STAGING_URL);

        let production = AcmeIssuer::new(
            AcmeEnvironment::Production,
            None,
            "/tmp/challenges",
            StdDuration::from_secs(60),
        );
        assert_eq!(production.directory_url, LETS_ENCRYPT_PRODUCTION_URL);

        let overridden = AcmeIssuer::new(
            AcmeEnvironment::Staging,
            Some("https://localhost:14000/dir".to_string()),
            "/tmp/challenges",
            StdDuration::from_secs(60),
        );
        assert_eq!(overridden.directory_url, "https://localhost:14000/dir");
    }

    #[tokio::test]
    async fn deadline_cuts_off_a_stalled_order() {
        let started = Instant::now();
        let result = obtain_with_deadline(
            StdDuration::from_millis(10),
            "example.com",
            std::future::pending::<Result<(), io::Error>>(),
        )
        .await;

        let err = result.expect_err("expected timeout");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(
            started.elapsed() < StdDuration::from_secs(1),
            "timeout should fire near the deadline, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn completed_order_wins_the_race() {
        let result = obtain_with_deadline(
            StdDuration::from_secs(5),
            "example.com",
            async { Ok::<_, io::Error>(42) },
        )
        .await;
        assert_eq!(result.expect("order should win"), 42);
    }

    #[tokio::test]
    async fn failed_order_is_reported_as_issuance_failure() {
        let result = obtain_with_deadline(
            StdDuration::from_secs(5),
            "example.com",
            async { Err::<(), _>(io::Error::other("rejected")) },
        )
        .await;
        let err = result.expect_err("expected failure");
        assert_ne!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.to_string().contains("example.com"));
    }

    #[tokio::test]
    async fn self_signed_issuer_produces_parseable_material() {
        let issuer = SelfSignedIssuer::default();
        let issued = issuer
            .issue("ops@example.com", "api.example.com")
            .await
            .expect("issue");

        let not_after = cert_not_after(&issued.cert_pem).expect("parse cert");
        assert!(not_after > OffsetDateTime::now_utc() + time::Duration::days(80));
        let key_pem = String::from_utf8(issued.key_pem).expect("utf8 key");
        assert!(key_pem.contains("PRIVATE KEY"));
    }
}
