// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use async_trait::async_trait;
use lers::Solver;
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// HTTP-01 solver that publishes challenges as files under the shared
/// challenge directory. The external responder process answers
/// `/.well-known/acme-challenge/{token}` by reading the same directory; the
/// two processes communicate only through it.
///
/// At most one token is current per instance. Create a fresh instance per
/// issuance; instances are not shared across concurrent targets.
#[derive(Clone)]
pub struct FileChallengeSolver {
    dir: PathBuf,
    current: Arc<RwLock<Option<String>>>,
}

impl FileChallengeSolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Arc::new(RwLock::new(None)),
        }
    }

    pub fn current_token(&self) -> Option<String> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(_) => {
                warn!("challenge token lock poisoned; current token unknown");
                None
            }
        }
    }

    fn write_challenge(&self, token: &str, key_authorization: &str) -> io::Result<()> {
        let path = self.dir.join(token);
        fs::write(&path, key_authorization)?;
        debug!("wrote challenge file {}", path.display());
        match self.current.write() {
            Ok(mut guard) => *guard = Some(token.to_string()),
            Err(_) => warn!("challenge token lock poisoned; token not recorded"),
        }
        Ok(())
    }

    /// Removes the challenge file for `token`. Removing an absent file is a
    /// no-op, so cleanup stays idempotent.
    fn remove_challenge(&self, token: &str) -> io::Result<()> {
        let path = self.dir.join(token);
        match fs::remove_file(&path) {
            Ok(()) => debug!("removed challenge file {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        match self.current.write() {
            Ok(mut guard) => {
                if guard.as_deref() == Some(token) {
                    *guard = None;
                }
            }
            Err(_) => warn!("challenge token lock poisoned; token not cleared"),
        }
        Ok(())
    }

    /// Removes whatever token is currently recorded. Used when issuance fails
    /// before the protocol's own cleanup callback fires, so no challenge file
    /// is orphaned in the shared directory.
    pub fn force_cleanup(&self) {
        if let Some(token) = self.current_token() {
            info!("Cleaning up leftover challenge for token {}", token);
            if let Err(err) = self.remove_challenge(&token) {
                warn!("Failed to clean up challenge file for token {}: {}", token, err);
            }
        }
    }
}

#[async_trait]
impl Solver for FileChallengeSolver {
    async fn present(
        &self,
        domain: String,
        token: String,
        key_authorization: String,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        info!(
            "Presenting HTTP-01 challenge (domain={}, token={})",
            domain, token
        );
        self.write_challenge(&token, &key_authorization)
            .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync + 'static>)
    }

    async fn cleanup(
        &self,
        token: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        info!("Cleaning up HTTP-01 challenge for token {}", token);
        // Cleanup is best-effort: a leftover file never invalidates an order.
        if let Err(err) = self.remove_challenge(token) {
            warn!("Failed to remove challenge file for token {}: {}", token, err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_fixtures::TestFixtureRoot;

    #[tokio::test]
    async fn present_writes_file_and_records_token() {
        let fixture = TestFixtureRoot::new_unique("challenge-present").unwrap();
        let dir = fixture.challenge_dir().unwrap();
        let solver = FileChallengeSolver::new(&dir);

        solver
            .present(
                "example.com".to_string(),
                "token123".to_string(),
                "token123.keyauth".to_string(),
            )
            .await
            .expect("present should succeed");

        let content = fs::read_to_string(dir.join("token123")).expect("challenge file");
        assert_eq!(content, "token123.keyauth");
        assert_eq!(solver.current_token().as_deref(), Some("token123"));
    }

    #[tokio::test]
    async fn present_fails_when_directory_is_missing() {
        let fixture = TestFixtureRoot::new_unique("challenge-missing-dir").unwrap();
        let solver = FileChallengeSolver::new(fixture.path().join("does-not-exist"));

        let result = solver
            .present(
                "example.com".to_string(),
                "token123".to_string(),
                "authz".to_string(),
            )
            .await;
        assert!(result.is_err(), "expected write into missing dir to fail");
        assert!(solver.current_token().is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_file_and_clears_token() {
        let fixture = TestFixtureRoot::new_unique("challenge-cleanup").unwrap();
        let dir = fixture.challenge_dir().unwrap();
        let solver = FileChallengeSolver::new(&dir);

        solver
            .present(
                "example.com".to_string(),
                "token123".to_string(),
                "authz".to_string(),
            )
            .await
            .expect("present should succeed");

        solver.cleanup("token123").await.expect("cleanup");
        assert!(!dir.join("token123").exists());
        assert!(solver.current_token().is_none());
    }

    #[tokio::test]
    async fn cleanup_of_absent_token_is_a_noop() {
        let fixture = TestFixtureRoot::new_unique("challenge-idempotent").unwrap();
        let dir = fixture.challenge_dir().unwrap();
        let solver = FileChallengeSolver::new(&dir);

        solver.cleanup("never-presented").await.expect("cleanup");
        solver.cleanup("never-presented").await.expect("cleanup again");
    }

    #[tokio::test]
    async fn cleanup_of_non_current_token_keeps_current() {
        let fixture = TestFixtureRoot::new_unique("challenge-non-current").unwrap();
        let dir = fixture.challenge_dir().unwrap();
        let solver = FileChallengeSolver::new(&dir);

        solver
            .present(
                "example.com".to_string(),
                "first".to_string(),
                "authz1".to_string(),
            )
            .await
            .expect("present first");
        solver
            .present(
                "example.com".to_string(),
                "second".to_string(),
                "authz2".to_string(),
            )
            .await
            .expect("present second");

        // Presenting a new token made it current; cleaning the old one must
        // not clear the new one.
        solver.cleanup("first").await.expect("cleanup first");
        assert_eq!(solver.current_token().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn force_cleanup_removes_current_challenge() {
        let fixture = TestFixtureRoot::new_unique("challenge-force").unwrap();
        let dir = fixture.challenge_dir().unwrap();
        let solver = FileChallengeSolver::new(&dir);

        solver
            .present(
                "example.com".to_string(),
                "token123".to_string(),
                "authz".to_string(),
            )
            .await
            .expect("present");

        solver.force_cleanup();
        assert!(!dir.join("token123").exists());
        assert!(solver.current_token().is_none());

        // Nothing current; must not fail.
        solver.force_cleanup();
    }
}
