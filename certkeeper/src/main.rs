// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use actix_web::rt::System;
use log::LevelFilter;
use std::io::Write;
use std::sync::Arc;

mod backup;
mod challenge;
mod config;
mod issuer;
mod manager;
mod responder;
mod run;
mod store;
mod util;
mod validity;

use config::{ChallengeConfig, Config, IssuerMode};
use issuer::{AcmeIssuer, Issue, SelfSignedIssuer};
use manager::SecretManager;
use store::KubeSecretStore;
use tokio::sync::watch;

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let command = match parse_args() {
        Ok(command) => command,
        Err(error) => {
            eprintln!("❌ Invalid command line arguments: {}", error);
            eprint!("{}", help_text());
            return 1;
        }
    };

    match command {
        Command::Help => {
            print!("{}", help_text());
            0
        }
        Command::Version => {
            println!("certkeeper {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Command::CertManager => {
            init_logging();
            System::new().block_on(run_certmanager())
        }
        Command::Challenge => {
            init_logging();
            System::new().block_on(run_challenge())
        }
    }
}

async fn run_certmanager() -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("❌ Invalid configuration: {}", error);
            return 1;
        }
    };

    let store = match KubeSecretStore::connect().await {
        Ok(store) => store,
        Err(error) => {
            eprintln!("❌ Failed to create Kubernetes client: {}", error);
            return 1;
        }
    };

    let manager = SecretManager::new(Arc::new(store), config.backup_path.clone());
    let issuer: Box<dyn Issue> = match config.issuer {
        IssuerMode::Acme => Box::new(AcmeIssuer::new(
            config.acme_environment,
            config.acme_directory_url.clone(),
            config.challenge_path.clone(),
            config.issue_timeout,
        )),
        IssuerMode::SelfSigned => Box::new(SelfSignedIssuer::default()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    actix_web::rt::spawn(async move {
        run::shutdown_signal().await;
        log::info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    run::run_periodically(&config, &manager, issuer.as_ref(), shutdown_rx).await;
    0
}

async fn run_challenge() -> i32 {
    let config = match ChallengeConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("❌ Invalid configuration: {}", error);
            return 1;
        }
    };

    match responder::run_server(&config).await {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("❌ Challenge responder failed: {}", error);
            1
        }
    }
}

fn init_logging() {
    let log_level = match config::log_level_from_env().to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };

    let result = env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
    if let Err(error) = result {
        eprintln!("❌ Failed to initialize logger: {}", error);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    CertManager,
    Challenge,
    Version,
    Help,
}

fn parse_args() -> Result<Command, String> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    if args.iter().any(|arg| is_help_flag(arg)) {
        return Ok(Command::Help);
    }

    let mut command = None;
    for arg in args {
        if command.is_some() {
            return Err(format!("Unexpected argument: {}", arg));
        }
        command = Some(match arg.to_lowercase().as_str() {
            "certmanager" => Command::CertManager,
            "challenge" => Command::Challenge,
            "version" => Command::Version,
            "help" => Command::Help,
            other => return Err(format!("Unknown command: {}", other)),
        });
    }

    Ok(command.unwrap_or(Command::Help))
}

fn is_help_flag(arg: &str) -> bool {
    arg == "-h" || arg == "--help"
}

fn help_text() -> String {
    [
        "CertKeeper keeps Kubernetes TLS secrets valid.",
        "",
        "Usage: certkeeper <command>",
        "",
        "Commands:",
        "  certmanager   Run the certificate reconciler",
        "  challenge     Run the ACME challenge responder",
        "  version       Print the version",
        "  help          Show this help",
        "",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::{parse_args_from, Command};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        let command = parse_args_from(Vec::new()).expect("parse args");
        assert_eq!(command, Command::Help);
    }

    #[test]
    fn certmanager_command_parses() {
        let command = parse_args_from(args(&["certmanager"])).expect("parse args");
        assert_eq!(command, Command::CertManager);
    }

    #[test]
    fn challenge_command_parses() {
        let command = parse_args_from(args(&["challenge"])).expect("parse args");
        assert_eq!(command, Command::Challenge);
    }

    #[test]
    fn version_command_parses() {
        let command = parse_args_from(args(&["version"])).expect("parse args");
        assert_eq!(command, Command::Version);
    }

    #[test]
    fn help_flag_wins_over_commands() {
        let command = parse_args_from(args(&["certmanager", "--help"])).expect("parse args");
        assert_eq!(command, Command::Help);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let result = parse_args_from(args(&["frobnicate"]));
        assert!(result.is_err(), "expected unknown command to fail");
    }

    #[test]
    fn extra_arguments_are_rejected() {
        let result = parse_args_from(args(&["certmanager", "challenge"]));
        assert!(result.is_err(), "expected extra argument to fail");
    }
}
