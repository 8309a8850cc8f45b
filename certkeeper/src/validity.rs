// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use crate::store::TLS_CERT_KEY;
use k8s_openapi::api::core::v1::Secret;
use std::io;
use time::{Duration, OffsetDateTime};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Expiry of the first certificate in a PEM bundle.
pub fn cert_not_after(pem: &[u8]) -> io::Result<OffsetDateTime> {
    let (_, parsed) = parse_x509_pem(pem)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let (_, cert) = X509Certificate::from_der(parsed.contents.as_slice())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    Ok(cert.validity().not_after.to_datetime())
}

/// True only when the stored certificate parses and keeps strictly more than
/// `min_validity` of remaining lifetime. Anything else (missing data key,
/// undecodable PEM, expiry at or inside the margin) means renewal.
pub fn is_cert_valid(secret: &Secret, min_validity: Duration) -> bool {
    let data = match secret.data.as_ref() {
        Some(data) => data,
        None => return false,
    };
    let crt = match data.get(TLS_CERT_KEY) {
        Some(value) => value.0.as_slice(),
        None => return false,
    };
    let not_after = match cert_not_after(crt) {
        Ok(value) => value,
        Err(_) => return false,
    };
    not_after > OffsetDateTime::now_utc() + min_validity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tls_secret;
    use crate::util::test_fixtures::cert_pem_with_validity;

    const MIN_VALIDITY: Duration = Duration::hours(1);

    fn secret_with_cert(cert_pem: &[u8]) -> Secret {
        tls_secret("prod", "api-tls", cert_pem, b"key")
    }

    #[test]
    fn secret_without_data_is_invalid() {
        let secret = Secret::default();
        assert!(!is_cert_valid(&secret, MIN_VALIDITY));
    }

    #[test]
    fn secret_without_cert_entry_is_invalid() {
        let mut secret = secret_with_cert(b"cert");
        if let Some(data) = secret.data.as_mut() {
            data.remove(TLS_CERT_KEY);
        }
        assert!(!is_cert_valid(&secret, MIN_VALIDITY));
    }

    #[test]
    fn garbage_cert_data_is_invalid() {
        let secret = secret_with_cert(b"not a certificate");
        assert!(!is_cert_valid(&secret, MIN_VALIDITY));
    }

    #[test]
    fn cert_above_margin_is_valid() {
        let not_after = OffsetDateTime::now_utc() + MIN_VALIDITY + Duration::minutes(5);
        let cert = cert_pem_with_validity("api.example.com", not_after);
        assert!(is_cert_valid(&secret_with_cert(&cert), MIN_VALIDITY));
    }

    #[test]
    fn cert_below_margin_is_invalid() {
        let not_after = OffsetDateTime::now_utc() + MIN_VALIDITY - Duration::minutes(5);
        let cert = cert_pem_with_validity("api.example.com", not_after);
        assert!(!is_cert_valid(&secret_with_cert(&cert), MIN_VALIDITY));
    }

    #[test]
    fn expired_cert_is_invalid() {
        let not_after = OffsetDateTime::now_utc() - Duration::days(1);
        let cert = cert_pem_with_validity("api.example.com", not_after);
        assert!(!is_cert_valid(&secret_with_cert(&cert), MIN_VALIDITY));
    }

    #[test]
    fn not_after_round_trips_through_parser() {
        let not_after = OffsetDateTime::now_utc() + Duration::days(30);
        let cert = cert_pem_with_validity("api.example.com", not_after);
        let parsed = cert_not_after(&cert).expect("parse");
        // x509 validity has second resolution.
        assert!((parsed - not_after).whole_seconds().abs() <= 1);
    }
}
