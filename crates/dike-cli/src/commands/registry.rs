//! Registry connection options shared by `push` and `pull`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use dike_registry::{
    ChainResolver, DockerConfigKeychain, RegistryAuth, RegistryConfig, StaticCredentials,
    TlsConfig,
};

/// Registry authentication and transport options.
#[derive(Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    /// Username for basic authentication
    #[arg(short, long, env = "DIKE_REGISTRY_USERNAME")]
    pub username: Option<String>,

    /// Password for basic authentication
    #[arg(long, env = "DIKE_REGISTRY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Bearer token for authentication
    #[arg(long, env = "DIKE_REGISTRY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Registry (host[:port]) to reach over plain HTTP; repeatable
    #[arg(long = "insecure-registry", value_name = "HOST")]
    pub insecure_registries: Vec<String>,

    /// CA certificate used to verify the registry
    #[arg(long, env = "DIKE_REGISTRY_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate for mutual TLS
    #[arg(long, env = "DIKE_REGISTRY_CLIENT_CERT", requires = "client_key")]
    pub client_cert: Option<PathBuf>,

    /// Private key for the client certificate
    #[arg(long, env = "DIKE_REGISTRY_CLIENT_KEY", requires = "client_cert")]
    pub client_key: Option<PathBuf>,

    /// Skip verification of the registry certificate
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "60")]
    pub timeout: u64,
}

impl RegistryArgs {
    /// Builds the client configuration.
    pub fn config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::new().with_timeout(Duration::from_secs(self.timeout));
        if let Some(tls) = self.tls() {
            config = config.with_tls(tls);
        }
        self.insecure_registries
            .iter()
            .fold(config, |config, registry| config.with_insecure_registry(registry))
    }

    /// Returns TLS settings when any TLS flag is given.
    fn tls(&self) -> Option<TlsConfig> {
        let client_auth = self.client_cert.is_some() && self.client_key.is_some();
        if self.ca_cert.is_none() && !client_auth && !self.insecure_skip_tls_verify {
            return None;
        }

        let mut tls = TlsConfig::new();
        if let Some(ref ca_cert) = self.ca_cert {
            tls = tls.with_ca_cert(ca_cert);
        }
        if let (Some(ref cert), Some(ref key)) = (&self.client_cert, &self.client_key) {
            tls = tls.with_client_cert(cert, key);
        }
        if self.insecure_skip_tls_verify {
            tls = tls.insecure();
        }
        Some(tls)
    }

    /// Flag credentials first, then the docker config file.
    pub fn credentials(&self) -> Result<ChainResolver> {
        Ok(ChainResolver::new()
            .with(StaticCredentials::new(self.determine_auth()?))
            .with(DockerConfigKeychain::from_default_location()))
    }

    /// Determines the authentication method from CLI arguments.
    fn determine_auth(&self) -> Result<RegistryAuth> {
        if let Some(ref token) = self.token {
            return Ok(RegistryAuth::bearer(token));
        }

        if let (Some(ref username), Some(ref password)) = (&self.username, &self.password) {
            return Ok(RegistryAuth::basic(username, password));
        }

        if self.username.is_some() || self.password.is_some() {
            anyhow::bail!("Both --username and --password are required for basic authentication");
        }

        Ok(RegistryAuth::Anonymous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_auth_none() {
        let args = RegistryArgs::default();
        assert!(args.determine_auth().unwrap().is_anonymous());
    }

    #[test]
    fn test_determine_auth_bearer() {
        let args = RegistryArgs {
            token: Some("test-token".to_string()),
            ..RegistryArgs::default()
        };
        assert_eq!(
            args.determine_auth().unwrap(),
            RegistryAuth::bearer("test-token")
        );
    }

    #[test]
    fn test_determine_auth_basic() {
        let args = RegistryArgs {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..RegistryArgs::default()
        };
        assert_eq!(
            args.determine_auth().unwrap(),
            RegistryAuth::basic("user", "pass")
        );
    }

    #[test]
    fn test_determine_auth_incomplete_basic() {
        let args = RegistryArgs {
            username: Some("user".to_string()),
            ..RegistryArgs::default()
        };
        assert!(args.determine_auth().is_err());
        assert!(args.credentials().is_err());
    }

    #[test]
    fn test_determine_auth_bearer_takes_precedence() {
        let args = RegistryArgs {
            token: Some("bearer-token".to_string()),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..RegistryArgs::default()
        };
        assert!(matches!(
            args.determine_auth().unwrap(),
            RegistryAuth::Bearer { .. }
        ));
    }

    #[test]
    fn test_config_from_args() {
        let args = RegistryArgs {
            insecure_registries: vec!["registry.lan:5000".to_string()],
            ca_cert: Some(PathBuf::from("/etc/dike/ca.pem")),
            timeout: 5,
            ..RegistryArgs::default()
        };
        let config = args.config();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.scheme("registry.lan:5000"), "http");
        assert_eq!(
            config.tls.and_then(|tls| tls.ca_cert),
            Some(PathBuf::from("/etc/dike/ca.pem"))
        );
    }

    #[test]
    fn test_config_without_tls_flags() {
        assert!(RegistryArgs::default().config().tls.is_none());
    }

    #[test]
    fn test_config_with_client_cert_and_insecure() {
        let args = RegistryArgs {
            client_cert: Some(PathBuf::from("/etc/dike/client.pem")),
            client_key: Some(PathBuf::from("/etc/dike/client.key")),
            insecure_skip_tls_verify: true,
            ..RegistryArgs::default()
        };
        let tls = args.config().tls.unwrap();

        assert!(tls.ca_cert.is_none());
        assert_eq!(tls.client_cert, Some(PathBuf::from("/etc/dike/client.pem")));
        assert_eq!(tls.client_key, Some(PathBuf::from("/etc/dike/client.key")));
        assert!(tls.insecure_skip_verify);
    }
}
