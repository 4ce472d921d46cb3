//! Kubernetes-scoped registry credential resolution.
//!
//! Callers describe where registry credentials live (an image pull secret, a
//! service account's attached pull secrets, or nothing) and this module turns
//! that into a [`Keychain`] usable against a registry. Exactly one resolution
//! path runs per call.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::Api;
use oci_client::secrets::RegistryAuth;
use serde::Deserialize;

use crate::error::{CourierError, Result};

/// Secret type required for image pull secrets.
pub const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Key inside a pull secret holding the docker config JSON.
const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// Describes where registry credentials should be resolved from.
///
/// At most one of `secret_name` and `service_account_name` should be set. If
/// both are set, the secret takes precedence; this is a documented choice,
/// not validated. If neither is set, ambient credentials are used
/// (`REGISTRY_USERNAME`/`REGISTRY_PASSWORD`, then the local docker config,
/// then anonymous).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Namespace the secret or service account lives in.
    pub namespace: String,
    /// Name of an image pull secret of type `kubernetes.io/dockerconfigjson`.
    pub secret_name: Option<String>,
    /// Name of a service account whose `imagePullSecrets` should be used.
    pub service_account_name: Option<String>,
}

impl Credentials {
    /// Resolve using ambient credentials only.
    pub fn ambient() -> Self {
        Self::default()
    }

    /// Resolve from a namespaced image pull secret.
    pub fn from_secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: Some(name.into()),
            service_account_name: None,
        }
    }

    /// Resolve from a service account's attached pull secrets.
    pub fn from_service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: None,
            service_account_name: Some(name.into()),
        }
    }

    /// The single resolution path this descriptor selects.
    ///
    /// Empty-string names count as unset. Secret beats service account.
    pub(crate) fn source(&self) -> AuthSource<'_> {
        if let Some(name) = self.secret_name.as_deref().filter(|s| !s.is_empty()) {
            return AuthSource::PullSecret {
                namespace: &self.namespace,
                name,
            };
        }
        if let Some(name) = self
            .service_account_name
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            return AuthSource::ServiceAccount {
                namespace: &self.namespace,
                name,
            };
        }
        AuthSource::Ambient
    }
}

/// Explicit three-way choice of credential source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthSource<'a> {
    PullSecret { namespace: &'a str, name: &'a str },
    ServiceAccount { namespace: &'a str, name: &'a str },
    Ambient,
}

/// Basic credentials for one registry.
#[derive(Debug, Clone)]
struct BasicAuth {
    username: String,
    password: String,
}

/// A credential provider mapping registry hosts to basic credentials.
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    auths: HashMap<String, BasicAuth>,
    fallback: Option<BasicAuth>,
}

/// Docker config JSON as stored in `.dockerconfigjson` secrets and
/// `~/.docker/config.json`.
#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    username: Option<String>,
    password: Option<String>,
    /// base64-encoded `username:password`; wins over the split fields.
    auth: Option<String>,
}

impl Keychain {
    /// An empty keychain that resolves everything to anonymous auth.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Parse a docker config JSON document into a keychain.
    pub fn from_docker_config(bytes: &[u8]) -> Result<Self> {
        let config: DockerConfig = serde_json::from_slice(bytes).map_err(|e| {
            CourierError::CredentialError(format!("failed to parse docker config JSON: {}", e))
        })?;

        let mut auths = HashMap::new();
        for (registry, entry) in config.auths {
            let basic = entry.into_basic_auth()?;
            auths.insert(normalize_registry(&registry), basic);
        }

        Ok(Self {
            auths,
            fallback: None,
        })
    }

    /// Merge another keychain's entries into this one. Existing entries win.
    pub fn merge(&mut self, other: Keychain) {
        for (registry, auth) in other.auths {
            self.auths.entry(registry).or_insert(auth);
        }
        if self.fallback.is_none() {
            self.fallback = other.fallback;
        }
    }

    /// Resolve authentication for a registry host.
    ///
    /// Returns basic auth when the keychain has an entry (or a fallback),
    /// anonymous otherwise.
    pub fn resolve(&self, registry: &str) -> RegistryAuth {
        let entry = self
            .auths
            .get(&normalize_registry(registry))
            .or(self.fallback.as_ref());
        match entry {
            Some(auth) => RegistryAuth::Basic(auth.username.clone(), auth.password.clone()),
            None => RegistryAuth::Anonymous,
        }
    }

    fn with_fallback(username: String, password: String) -> Self {
        Self {
            auths: HashMap::new(),
            fallback: Some(BasicAuth { username, password }),
        }
    }
}

impl DockerAuthEntry {
    fn into_basic_auth(self) -> Result<BasicAuth> {
        if let Some(encoded) = self.auth {
            let decoded = BASE64.decode(encoded.trim()).map_err(|e| {
                CourierError::CredentialError(format!(
                    "failed to decode 'auth' field in docker config: {}",
                    e
                ))
            })?;
            let decoded = String::from_utf8(decoded).map_err(|e| {
                CourierError::CredentialError(format!(
                    "'auth' field in docker config is not UTF-8: {}",
                    e
                ))
            })?;
            let (username, password) = decoded.split_once(':').ok_or_else(|| {
                CourierError::CredentialError(
                    "'auth' field in docker config is not 'username:password'".to_string(),
                )
            })?;
            return Ok(BasicAuth {
                username: username.to_string(),
                password: password.to_string(),
            });
        }

        match (self.username, self.password) {
            (Some(username), Some(password)) => Ok(BasicAuth { username, password }),
            _ => Err(CourierError::CredentialError(
                "docker config entry has neither 'auth' nor username/password".to_string(),
            )),
        }
    }
}

/// Resolve a keychain for the given credential descriptor.
///
/// Exactly one path runs: pull secret, service account, or ambient.
/// Resolution failures are surfaced, never downgraded to ambient auth.
pub(crate) async fn resolve_keychain(
    client: &kube::Client,
    creds: &Credentials,
) -> Result<Keychain> {
    match creds.source() {
        AuthSource::PullSecret { namespace, name } => {
            let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
            let secret = secrets.get(name).await?;
            keychain_from_pull_secret(&secret)
        }
        AuthSource::ServiceAccount { namespace, name } => {
            let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
            let account = accounts.get(name).await?;

            let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
            let mut keychain = Keychain::anonymous();
            for reference in account.image_pull_secrets.unwrap_or_default() {
                let Some(secret_name) = reference.name else {
                    continue;
                };
                let secret = secrets.get(&secret_name).await?;
                keychain.merge(keychain_from_pull_secret(&secret)?);
            }
            Ok(keychain)
        }
        AuthSource::Ambient => Ok(ambient_keychain()),
    }
}

/// Build a keychain from an image pull secret.
///
/// The secret must be of type `kubernetes.io/dockerconfigjson` and carry the
/// `.dockerconfigjson` key.
pub(crate) fn keychain_from_pull_secret(secret: &Secret) -> Result<Keychain> {
    let secret_name = secret.metadata.name.as_deref().unwrap_or("<unnamed>");

    if secret.type_.as_deref() != Some(DOCKER_CONFIG_SECRET_TYPE) {
        return Err(CourierError::CredentialError(format!(
            "secret '{}' has type {:?}, expected {}",
            secret_name, secret.type_, DOCKER_CONFIG_SECRET_TYPE
        )));
    }

    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(DOCKER_CONFIG_KEY))
        .ok_or_else(|| {
            CourierError::CredentialError(format!(
                "secret '{}' is missing the '{}' key",
                secret_name, DOCKER_CONFIG_KEY
            ))
        })?;

    Keychain::from_docker_config(&data.0)
}

/// Ambient credential resolution: environment pair first, then the local
/// docker config, then anonymous. Best-effort — a missing or unreadable
/// docker config is not an error.
fn ambient_keychain() -> Keychain {
    let mut keychain = match (
        std::env::var("REGISTRY_USERNAME"),
        std::env::var("REGISTRY_PASSWORD"),
    ) {
        (Ok(username), Ok(password)) => Keychain::with_fallback(username, password),
        _ => Keychain::anonymous(),
    };

    if let Some(path) = docker_config_path() {
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(parsed) = Keychain::from_docker_config(&bytes) {
                keychain.merge(parsed);
            }
        }
    }

    keychain
}

/// Path to the local docker config: `$DOCKER_CONFIG/config.json` or
/// `~/.docker/config.json`.
fn docker_config_path() -> Option<PathBuf> {
    std::env::var_os("DOCKER_CONFIG")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".docker")))
        .map(|dir| dir.join("config.json"))
}

/// Normalize registry keys: docker config entries may be bare hosts or URLs,
/// and Docker Hub goes by several aliases.
fn normalize_registry(registry: &str) -> String {
    let mut r = registry.trim().to_lowercase();
    if let Some(rest) = r.strip_prefix("https://").or_else(|| r.strip_prefix("http://")) {
        r = rest.to_string();
    }
    if let Some(slash) = r.find('/') {
        r.truncate(slash);
    }
    if r == "docker.io" || r == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        r
    }
}
