// This file is part of the product CertKeeper.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use std::collections::BTreeMap;

pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// NotFound, AlreadyExists and Conflict are first-class outcomes the
/// reconciler branches on; everything else is opaque.
#[derive(Debug)]
pub enum StoreError {
    NotFound,
    AlreadyExists,
    Conflict,
    Api(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "secret not found"),
            StoreError::AlreadyExists => write!(f, "secret already exists"),
            StoreError::Conflict => write!(f, "secret was modified concurrently"),
            StoreError::Api(msg) => write!(f, "secret store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;
    async fn create(&self, secret: &Secret) -> Result<(), StoreError>;
    async fn update(&self, secret: &Secret) -> Result<(), StoreError>;
}

pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a store from the ambient kubeconfig or in-cluster environment.
    pub async fn connect() -> Result<Self, StoreError> {
        let client = Client::try_default()
            .await
            .map_err(|err| StoreError::Api(format!("failed to create Kubernetes client: {}", err)))?;
        Ok(Self::new(client))
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.secrets(namespace).get(name).await.map_err(map_kube_error)
    }

    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        let namespace = metadata_field(secret, |meta| meta.namespace.as_deref())?;
        self.secrets(&namespace)
            .create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(map_kube_error)
    }

    async fn update(&self, secret: &Secret) -> Result<(), StoreError> {
        let namespace = metadata_field(secret, |meta| meta.namespace.as_deref())?;
        let name = metadata_field(secret, |meta| meta.name.as_deref())?;
        self.secrets(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(map_kube_error)
    }
}

fn metadata_field<F>(secret: &Secret, field: F) -> Result<String, StoreError>
where
    F: Fn(&ObjectMeta) -> Option<&str>,
{
    field(&secret.metadata)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| StoreError::Api("secret is missing namespace or name metadata".to_string()))
}

fn map_kube_error(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound,
        kube::Error::Api(response) if response.code == 409 => {
            if response.reason == "AlreadyExists" {
                StoreError::AlreadyExists
            } else {
                StoreError::Conflict
            }
        }
        other => StoreError::Api(other.to_string()),
    }
}

/// Builds the persisted artifact: a `kubernetes.io/tls` secret carrying the
/// PEM chain and private key under the conventional data keys.
pub fn tls_secret(namespace: &str, name: &str, cert_pem: &[u8], key_pem: &[u8]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(TLS_SECRET_TYPE.to_string()),
        data: Some(tls_secret_data(cert_pem, key_pem)),
        ..Default::default()
    }
}

pub fn tls_secret_data(cert_pem: &[u8], key_pem: &[u8]) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();
    data.insert(TLS_CERT_KEY.to_string(), ByteString(cert_pem.to_vec()));
    data.insert(TLS_PRIVATE_KEY_KEY.to_string(), ByteString(key_pem.to_vec()));
    data
}
