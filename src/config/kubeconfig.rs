//! Orchestrator connection settings
//!
//! Two sources are supported: a kubeconfig file (out-of-cluster) and the
//! service account mounted into every pod (in-cluster). Both are resolved by
//! `kube::Config`, which also handles exec credential plugins and rotated
//! service account tokens.

use std::path::{Path, PathBuf};

use base64::Engine;
use kube::config::{KubeConfigOptions, Kubeconfig};

use super::ConfigError;

/// Where the in-cluster service account credentials are mounted
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// TLS material given on the command line; replaces what the kubeconfig or
/// service account provides
#[derive(Debug, Clone, Default)]
pub struct TlsOverrides {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsOverrides {
    pub fn is_empty(&self) -> bool {
        self.ca_cert.is_none() && self.client_cert.is_none() && self.client_key.is_none()
    }

    pub fn apply(&self, config: &mut kube::Config) -> Result<(), ConfigError> {
        if let Some(ref path) = self.ca_cert {
            let pem = read_file(path)?;
            config.root_cert = Some(pem_certificates(&String::from_utf8_lossy(&pem))?);
        }
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => {
                let auth = &mut config.auth_info;
                auth.client_certificate = Some(cert.to_string_lossy().into_owned());
                auth.client_key = Some(key.to_string_lossy().into_owned());
                auth.client_certificate_data = None;
                auth.client_key_data = None;
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "--client-cert and --client-key must be given together".to_string(),
                ))
            }
        }
        Ok(())
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// DER bodies of every certificate block in a PEM bundle
pub fn pem_certificates(pem: &str) -> Result<Vec<Vec<u8>>, ConfigError> {
    let mut certs = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(PEM_CERT_BEGIN) {
        let body_start = start + PEM_CERT_BEGIN.len();
        let end = rest[body_start..]
            .find(PEM_CERT_END)
            .map(|i| body_start + i)
            .ok_or_else(|| ConfigError::Kube("unterminated certificate block".to_string()))?;

        let body: String = rest[body_start..end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| ConfigError::Kube(format!("invalid certificate: {}", e)))?;
        certs.push(der);
        rest = &rest[end + PEM_CERT_END.len()..];
    }

    if certs.is_empty() {
        return Err(ConfigError::Kube("no certificate found".to_string()));
    }
    Ok(certs)
}

fn kube_error(e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Kube(e.to_string())
}

// ============================================================================
// I/O boundary
// ============================================================================

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::File {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Default kubeconfig location: ~/.kube/config
pub fn default_kubeconfig_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kube")
        .join("config")
}

/// Load a kubeconfig file and resolve one of its contexts
pub async fn load_kubeconfig(
    path: &Path,
    context: Option<&str>,
) -> Result<kube::Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::File {
            path: path.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    }
    let kubeconfig = Kubeconfig::read_from(path).map_err(kube_error)?;
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    kube::Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(kube_error)
}

/// Build the connection from the pod's service account
pub fn in_cluster() -> Result<kube::Config, ConfigError> {
    if std::env::var_os("KUBERNETES_SERVICE_HOST").is_none() {
        return Err(ConfigError::Missing("KUBERNETES_SERVICE_HOST"));
    }
    kube::Config::incluster().map_err(kube_error)
}
