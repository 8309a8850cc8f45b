// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::store::TLS_SECRET_TYPE;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretManifest<'a> {
    api_version: &'a str,
    kind: &'a str,
    metadata: ManifestMetadata<'a>,
    #[serde(rename = "type")]
    secret_type: &'a str,
    data: ManifestData,
}

#[derive(Debug, Serialize)]
struct ManifestMetadata<'a> {
    name: &'a str,
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct ManifestData {
    #[serde(rename = "tls.crt")]
    tls_crt: String,
    #[serde(rename = "tls.key")]
    tls_key: String,
}

/// Writes an applyable secret manifest so a failed store write never discards
/// issued certificate material. Returns the path of the written file.
///
/// The file name carries a UTC timestamp with second resolution; two backups
/// for the same target within the same second collide and the later write
/// wins. Sanitization can also collide distinct inputs that differ only in
/// punctuation. Both windows are accepted behavior.
pub fn backup_secret_data(
    backup_path: &Path,
    namespace: &str,
    secret_name: &str,
    domain: &str,
    cert_pem: &[u8],
    key_pem: &[u8],
) -> io::Result<PathBuf> {
    fs::create_dir_all(backup_path).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!(
                "failed to create backup path {}: {}",
                backup_path.display(),
                err
            ),
        )
    })?;
    let info = fs::metadata(backup_path)?;
    if !info.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("backup path {} is not a directory", backup_path.display()),
        ));
    }

    let timestamp = OffsetDateTime::now_utc()
        .format(&format_description!(
            "[year][month][day]T[hour][minute][second]Z"
        ))
        .map_err(|err| io::Error::other(err.to_string()))?;
    let file_name = format!(
        "{}_{}_{}_{}.yaml",
        sanitize_name(namespace),
        sanitize_name(secret_name),
        sanitize_name(domain),
        timestamp
    );

    let manifest = SecretManifest {
        api_version: "v1",
        kind: "Secret",
        metadata: ManifestMetadata {
            name: secret_name,
            namespace,
        },
        secret_type: TLS_SECRET_TYPE,
        data: ManifestData {
            tls_crt: BASE64.encode(cert_pem),
            tls_key: BASE64.encode(key_pem),
        },
    };
    let yaml = serde_yaml::to_string(&manifest).map_err(|err| io::Error::other(err.to_string()))?;

    let secret_path = backup_path.join(file_name);
    fs::write(&secret_path, yaml).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!(
                "failed to write secret backup {}: {}",
                secret_path.display(),
                err
            ),
        )
    })?;

    Ok(secret_path)
}

/// Maps every character outside `[A-Za-z0-9]` to `_`, with `unknown` for
/// empty input. Guarantees a filesystem-safe name; inputs differing only in
/// punctuation sanitize to the same name.
pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_fixtures::TestFixtureRoot;

    #[test]
    fn sanitize_keeps_alphanumerics_and_replaces_the_rest() {
        assert_eq!(sanitize_name("prod"), "prod");
        assert_eq!(sanitize_name("api.example.com"), "api_example_com");
        assert_eq!(sanitize_name("a/b:c"), "a_b_c");
        assert_eq!(sanitize_name("  spaced  "), "spaced");
        assert_eq!(sanitize_name(""), "unknown");
        assert_eq!(sanitize_name("   "), "unknown");
    }

    #[test]
    fn punctuation_only_differences_collide() {
        // Accepted behavior: the sanitized name is the on-disk identity.
        assert_eq!(sanitize_name("api.example.com"), sanitize_name("api-example,com"));
    }

    #[test]
    fn backup_writes_a_parseable_manifest() {
        let fixture = TestFixtureRoot::new_unique("backup-manifest").unwrap();
        let backup_dir = fixture.path().join("backups");

        let path = backup_secret_data(
            &backup_dir,
            "prod",
            "api-tls",
            "api.example.com",
            b"cert-bytes",
            b"key-bytes",
        )
        .expect("backup");

        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("prod_api_tls_api_example_com_"));
        assert!(file_name.ends_with(".yaml"));

        let content = fs::read_to_string(&path).expect("read backup");
        let value: serde_yaml::Value = serde_yaml::from_str(&content).expect("parse yaml");
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["kind"], "Secret");
        assert_eq!(value["type"], TLS_SECRET_TYPE);
        assert_eq!(value["metadata"]["namespace"], "prod");
        assert_eq!(value["metadata"]["name"], "api-tls");
        assert_eq!(value["data"]["tls.crt"], BASE64.encode(b"cert-bytes"));
        assert_eq!(value["data"]["tls.key"], BASE64.encode(b"key-bytes"));
    }

    #[test]
    fn backup_creates_the_directory() {
        let fixture = TestFixtureRoot::new_unique("backup-mkdir").unwrap();
        let backup_dir = fixture.path().join("nested").join("backups");

        let path = backup_secret_data(&backup_dir, "prod", "api-tls", "example.com", b"c", b"k")
            .expect("backup");
        assert!(path.exists());
    }

    #[test]
    fn backup_rejects_a_non_directory_path() {
        let fixture = TestFixtureRoot::new_unique("backup-not-dir").unwrap();
        let file_path = fixture.path().join("occupied");
        fs::write(&file_path, "placeholder").unwrap();

        let result = backup_secret_data(&file_path, "prod", "api-tls", "example.com", b"c", b"k");
        assert!(result.is_err(), "expected non-directory path to fail");
    }
}
