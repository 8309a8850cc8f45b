// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use log::info;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "CERTKEEPER_";

pub const DEFAULT_RUN_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_ISSUE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
pub const DEFAULT_CHALLENGE_PORT: u16 = 8080;

#[derive(Debug)]
pub enum ConfigError {
    LoadError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::LoadError(msg) => write!(f, "Configuration load error: {}", msg),
            ConfigError::ValidationError(msg) => {
                write!(f, "Configuration validation error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmeEnvironment {
    Staging,
    Production,
}

impl AcmeEnvironment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "staging" => Ok(AcmeEnvironment::Staging),
            "production" => Ok(AcmeEnvironment::Production),
            other => Err(ConfigError::ValidationError(format!(
                "Unsupported ACME environment: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerMode {
    Acme,
    SelfSigned,
}

impl IssuerMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "acme" => Ok(IssuerMode::Acme),
            "self-signed" => Ok(IssuerMode::SelfSigned),
            other => Err(ConfigError::ValidationError(format!(
                "Unsupported issuer mode: {}",
                other
            ))),
        }
    }
}

/// One reconciliation unit: a secret to keep valid in one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub domain: String,
    pub secret_name: String,
    pub email: String,
}

impl Target {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty()
            || self.domain.trim().is_empty()
            || self.secret_name.trim().is_empty()
            || self.email.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(format!(
                "namespace, domain, secret name and email must all be set in target {:?}",
                self
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub secret_name: String,
    pub namespaces: Vec<String>,
    pub domain: String,
    pub email: String,
    pub run_interval: Duration,
    pub challenge_path: PathBuf,
    pub issue_timeout: Duration,
    pub backup_path: Option<PathBuf>,
    pub acme_environment: AcmeEnvironment,
    pub acme_directory_url: Option<String>,
    pub issuer: IssuerMode,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_name = require(&lookup, "SECRET_NAME")?;
        let namespaces = parse_namespaces(&require(&lookup, "NAMESPACES")?)?;
        let domain = require(&lookup, "DOMAIN")?;
        let email = require(&lookup, "EMAIL")?;
        let challenge_path = PathBuf::from(require(&lookup, "CHALLENGE_PATH")?);

        let run_interval = match optional(&lookup, "RUN_INTERVAL") {
            Some(value) => parse_duration(&value)?,
            None => DEFAULT_RUN_INTERVAL,
        };
        let issue_timeout = match optional(&lookup, "ISSUE_TIMEOUT") {
            Some(value) => parse_duration(&value)?,
            None => DEFAULT_ISSUE_TIMEOUT,
        };
        let backup_path = optional(&lookup, "BACKUP_PATH").map(PathBuf::from);
        let acme_environment = match optional(&lookup, "ACME_ENVIRONMENT") {
            Some(value) => AcmeEnvironment::parse(&value)?,
            None => AcmeEnvironment::Staging,
        };
        let acme_directory_url = optional(&lookup, "ACME_DIRECTORY_URL");
        let issuer = match optional(&lookup, "ISSUER") {
            Some(value) => IssuerMode::parse(&value)?,
            None => IssuerMode::Acme,
        };

        let config = Config {
            secret_name,
            namespaces,
            domain,
            email,
            run_interval,
            challenge_path,
            issue_timeout,
            backup_path,
            acme_environment,
            acme_directory_url,
            issuer,
        };

        for target in config.targets() {
            target.validate()?;
        }

        info!(
            "Loaded certmanager config (secret={}, namespaces={}, domain={}, interval={:?}, issue_timeout={:?})",
            config.secret_name,
            config.namespaces.join(", "),
            config.domain,
            config.run_interval,
            config.issue_timeout
        );

        Ok(config)
    }

    /// Targets in configured order; one per namespace.
    pub fn targets(&self) -> Vec<Target> {
        self.namespaces
            .iter()
            .map(|namespace| Target {
                namespace: namespace.clone(),
                domain: self.domain.clone(),
                secret_name: self.secret_name.clone(),
                email: self.email.clone(),
            })
            .collect()
    }
}

/// Configuration for the standalone challenge responder listener.
#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    pub port: u16,
    pub challenge_path: PathBuf,
}

impl ChallengeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match optional(&lookup, "CHALLENGE_PORT") {
            Some(value) => value.trim().parse::<u16>().map_err(|_| {
                ConfigError::ValidationError(format!("Invalid challenge port: {}", value))
            })?,
            None => DEFAULT_CHALLENGE_PORT,
        };
        let challenge_path = PathBuf::from(require(&lookup, "CHALLENGE_PATH")?);

        info!(
            "Loaded challenge config (port={}, path={})",
            port,
            challenge_path.display()
        );

        Ok(ChallengeConfig {
            port,
            challenge_path,
        })
    }
}

pub fn log_level_from_env() -> String {
    std::env::var(env_key("LOGGING_LEVEL")).unwrap_or_else(|_| "info".to_string())
}

fn env_key(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name)
}

fn require<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = env_key(name);
    match lookup(&key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::LoadError(format!(
            "Missing required option {}",
            key
        ))),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&env_key(name))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_namespaces(raw: &str) -> Result<Vec<String>, ConfigError> {
    let namespaces: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect();
    if namespaces.is_empty() {
        return Err(ConfigError::ValidationError(
            "Namespace list cannot be empty".to_string(),
        ));
    }
    Ok(namespaces)
}

/// Parses `30s` / `5m` / `2h` style durations; a bare number means seconds.
fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| {
        ConfigError::ValidationError(format!("Invalid duration value: {}", value))
    })?;
    let seconds = match unit {
        "" | "s" => amount,
        "m" => amount * 60,
        "h" => amount * 60 * 60,
        _ => {
            return Err(ConfigError::ValidationError(format!(
                "Invalid duration unit in: {}",
                value
            )));
        }
    };
    Ok(Duration::from_secs(seconds))
}
