// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::config::ChallengeConfig;
use actix_web::http::header;
use actix_web::{web, App, HttpResponse, HttpServer};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Shared challenge directory the solver writes into from the reconciler
/// process. This listener only ever reads from it.
pub struct ChallengeDir {
    dir: PathBuf,
}

impl ChallengeDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/.well-known/acme-challenge/{token}",
        web::get().to(serve_challenge),
    );
}

// ACME tokens are base64url; anything else never names a challenge file and
// must not reach the filesystem.
fn valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn serve_challenge(
    path: web::Path<String>,
    challenge_dir: web::Data<ChallengeDir>,
) -> HttpResponse {
    let token = path.into_inner();
    if !valid_token(&token) {
        debug!("rejected challenge request with invalid token");
        return HttpResponse::NotFound().finish();
    }

    match fs::read_to_string(challenge_dir.dir.join(&token)) {
        Ok(content) => {
            info!("Serving challenge response for token {}", token);
            HttpResponse::Ok()
                .insert_header((header::CONTENT_TYPE, "text/plain"))
                .body(content)
        }
        Err(_) => HttpResponse::NotFound().finish(),
    }
}

/// Runs the challenge responder until SIGINT/SIGTERM; the server drains
/// in-flight requests before returning.
pub async fn run_server(config: &ChallengeConfig) -> io::Result<()> {
    info!(
        "Starting challenge responder on port {} (path={})",
        config.port,
        config.challenge_path.display()
    );

    let challenge_dir = web::Data::new(ChallengeDir::new(config.challenge_path.clone()));
    HttpServer::new(move || {
        App::new()
            .app_data(challenge_dir.clone())
            .configure(configure)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
