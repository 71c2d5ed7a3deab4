//! OCI Distribution API client.
//!
//! [`RegistryClient`] writes finished policy images to a registry and reads
//! them back. Credentials come from an injected [`CredentialResolver`]; when
//! the registry answers with a bearer challenge the client exchanges those
//! credentials for a token and retries once.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::config::{RegistryAuth, RegistryConfig};
use crate::credentials::CredentialResolver;
use crate::error::RegistryError;
use crate::image::PolicyImage;
use crate::oci::{sha256_digest, Descriptor, ErrorResponse, Manifest, MediaType};
use crate::push::ImageWriter;
use crate::reference::Reference;

/// Header some registries use to report the manifest digest.
const CONTENT_DIGEST: &str = "docker-content-digest";

/// Client for interacting with OCI-compatible registries.
#[derive(Debug)]
pub struct RegistryClient {
    config: RegistryConfig,
    http: reqwest::Client,
}

/// Per-operation state: where to talk to and how to authenticate.
struct Session<'a> {
    reference: &'a Reference,
    origin: String,
    base: String,
    auth: RegistryAuth,
    token: Option<String>,
    actions: &'static str,
}

impl RegistryClient {
    /// Creates a new registry client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dike_registry::{RegistryClient, RegistryConfig};
    ///
    /// let client = RegistryClient::new(RegistryConfig::new())?;
    /// # Ok::<(), dike_registry::RegistryError>(())
    /// ```
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let http = Self::build_http_client(&config)?;
        Ok(Self { config, http })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Writes an image under `reference` and returns the manifest digest.
    ///
    /// Blobs already present in the repository are not uploaded again. The
    /// manifest is written last, so the reference only becomes visible once
    /// every blob it points to exists.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials cannot be resolved, a blob upload
    /// fails, or the registry rejects the manifest.
    pub async fn write_image(
        &self,
        reference: &Reference,
        image: &PolicyImage,
        credentials: &dyn CredentialResolver,
    ) -> Result<String, RegistryError> {
        let manifest_bytes = image.manifest_bytes()?;
        let digest = sha256_digest(&manifest_bytes);

        if let Some(expected) = &reference.digest {
            if *expected != digest {
                return Err(RegistryError::ManifestPushFailed {
                    reference: reference.to_string(),
                    message: format!("image digest is {digest}, reference requires {expected}"),
                });
            }
        }

        let auth = credentials.resolve(&reference.registry)?;
        let mut session = self.session(reference, auth, "pull,push");

        self.upload_blob(&mut session, image.config(), &image.config_descriptor().digest)
            .await?;
        for layer in image.layers() {
            self.upload_blob(&mut session, layer.data(), layer.digest())
                .await?;
        }

        let pushed = self
            .push_manifest(&mut session, image.media_type(), manifest_bytes)
            .await?;
        let digest = pushed.unwrap_or(digest);

        info!(reference = %reference, digest = %digest, layers = image.layers().len(), "Wrote image");
        Ok(digest)
    }

    /// Reads a policy image from the registry.
    ///
    /// Every blob is checked against the size and digest its manifest
    /// declares.
    ///
    /// # Errors
    ///
    /// Returns an error if the image does not exist, is not a policy bundle,
    /// or any blob fails verification.
    pub async fn pull(
        &self,
        reference: &Reference,
        credentials: &dyn CredentialResolver,
    ) -> Result<PolicyImage, RegistryError> {
        let auth = credentials.resolve(&reference.registry)?;
        let mut session = self.session(reference, auth, "pull");

        let manifest = self.fetch_manifest(&mut session).await?;
        if !manifest.is_policy_bundle() {
            return Err(RegistryError::InvalidImage {
                message: format!(
                    "{reference} has config media type {}, not a policy bundle",
                    manifest.config.media_type
                ),
            });
        }

        let config = self.fetch_blob(&mut session, &manifest.config).await?;
        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            layers.push(self.fetch_blob(&mut session, descriptor).await?);
        }

        debug!(reference = %reference, layers = layers.len(), "Fetched image");
        PolicyImage::from_parts(&manifest, config, layers)
    }

    fn session<'a>(
        &self,
        reference: &'a Reference,
        auth: RegistryAuth,
        actions: &'static str,
    ) -> Session<'a> {
        let origin = format!(
            "{}://{}",
            self.config.scheme(&reference.registry),
            reference.api_host()
        );
        let base = format!("{origin}/v2/{}", reference.repository);
        Session {
            reference,
            origin,
            base,
            auth,
            token: None,
            actions,
        }
    }

    async fn blob_exists(
        &self,
        session: &mut Session<'_>,
        digest: &str,
    ) -> Result<bool, RegistryError> {
        let url = format!("{}/blobs/{digest}", session.base);
        let response = self.send(session, |http| http.head(&url)).await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RegistryError::HttpError {
                status: status.as_u16(),
                message: format!("checking blob {digest}"),
            }),
        }
    }

    async fn upload_blob(
        &self,
        session: &mut Session<'_>,
        data: &[u8],
        digest: &str,
    ) -> Result<(), RegistryError> {
        if self.blob_exists(session, digest).await? {
            debug!(digest, "Blob already present");
            return Ok(());
        }

        let start_url = format!("{}/blobs/uploads/", session.base);
        let response = self
            .send(session, |http| http.post(&start_url).header(CONTENT_LENGTH, 0))
            .await?;

        if !response.status().is_success() {
            return Err(RegistryError::UploadFailed {
                digest: digest.to_string(),
                message: format!("starting upload: {}", error_message(response).await),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::UploadFailed {
                digest: digest.to_string(),
                message: "No upload location returned".to_string(),
            })?;

        let mut upload_url = Url::parse(&session.origin)
            .and_then(|origin| origin.join(location))
            .map_err(|_| RegistryError::InvalidUrl {
                url: location.to_string(),
            })?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let response = self
            .send(session, |http| {
                http.put(upload_url.as_str())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;

        if !response.status().is_success() {
            return Err(RegistryError::UploadFailed {
                digest: digest.to_string(),
                message: error_message(response).await,
            });
        }

        debug!(digest, size = data.len(), "Uploaded blob");
        Ok(())
    }

    /// Returns the digest the registry reports, if it reports one.
    async fn push_manifest(
        &self,
        session: &mut Session<'_>,
        media_type: &MediaType,
        manifest: Vec<u8>,
    ) -> Result<Option<String>, RegistryError> {
        let url = format!("{}/manifests/{}", session.base, session.reference.identifier());

        let response = self
            .send(session, |http| {
                http.put(&url)
                    .header(CONTENT_TYPE, media_type.as_str())
                    .body(manifest.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(RegistryError::ManifestPushFailed {
                reference: session.reference.to_string(),
                message: error_message(response).await,
            });
        }

        Ok(response
            .headers()
            .get(CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string))
    }

    async fn fetch_manifest(&self, session: &mut Session<'_>) -> Result<Manifest, RegistryError> {
        let url = format!("{}/manifests/{}", session.base, session.reference.identifier());

        let response = self
            .send(session, |http| {
                http.get(&url).header(ACCEPT, MediaType::OCI_MANIFEST)
            })
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::NotFound {
                    reference: session.reference.to_string(),
                })
            }
            status => {
                return Err(RegistryError::HttpError {
                    status: status.as_u16(),
                    message: error_message(response).await,
                })
            }
        }

        let body = response.bytes().await?;
        if let Some(expected) = &session.reference.digest {
            let actual = sha256_digest(&body);
            if actual != *expected {
                return Err(RegistryError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        serde_json::from_slice(&body).map_err(Into::into)
    }

    async fn fetch_blob(
        &self,
        session: &mut Session<'_>,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}/blobs/{}", session.base, descriptor.digest);
        let response = self.send(session, |http| http.get(&url)).await?;

        if !response.status().is_success() {
            return Err(RegistryError::HttpError {
                status: response.status().as_u16(),
                message: error_message(response).await,
            });
        }

        response.bytes().await.map(|b| b.to_vec()).map_err(Into::into)
    }

    /// Sends a request, answering one bearer challenge if the registry
    /// issues it.
    async fn send<F>(&self, session: &mut Session<'_>, build: F) -> Result<Response, RegistryError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let response = authorize(build(&self.http), session).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED || session.token.is_some() {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse)
        else {
            return Err(RegistryError::AuthenticationFailed {
                message: format!("{} rejected the credentials", session.reference.registry),
            });
        };

        let token = self.fetch_token(&challenge, session).await?;
        session.token = Some(token);

        let response = authorize(build(&self.http), session).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::AuthenticationFailed {
                message: format!(
                    "{} rejected the issued token",
                    session.reference.registry
                ),
            });
        }
        Ok(response)
    }

    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        session: &Session<'_>,
    ) -> Result<String, RegistryError> {
        let mut url = Url::parse(&challenge.realm).map_err(|_| RegistryError::InvalidUrl {
            url: challenge.realm.clone(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            query.append_pair(
                "scope",
                &format!(
                    "repository:{}:{}",
                    session.reference.repository, session.actions
                ),
            );
        }

        let request = match &session.auth {
            RegistryAuth::Anonymous => self.http.get(url),
            RegistryAuth::Basic { username, password } => {
                self.http.get(url).basic_auth(username, Some(password))
            }
            RegistryAuth::Bearer { token } => self.http.get(url).bearer_auth(token),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::AuthenticationFailed {
                message: format!(
                    "token request to {} failed: {}",
                    challenge.realm,
                    response.status()
                ),
            });
        }

        let body: TokenResponse = response.json().await?;
        debug!(realm = %challenge.realm, "Obtained registry token");
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::AuthenticationFailed {
                message: "token response did not contain a token".to_string(),
            })
    }

    /// Builds the HTTP client with proper configuration.
    fn build_http_client(config: &RegistryConfig) -> Result<reqwest::Client, RegistryError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent);

        if let Some(ref tls) = config.tls {
            if tls.insecure_skip_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }

            if let Some(ref ca_cert) = tls.ca_cert {
                let cert_pem = std::fs::read(ca_cert).map_err(|e| RegistryError::IoError {
                    path: ca_cert.clone(),
                    source: e,
                })?;
                let cert = reqwest::Certificate::from_pem(&cert_pem).map_err(|e| {
                    RegistryError::AuthenticationFailed {
                        message: format!("Invalid CA certificate: {e}"),
                    }
                })?;
                builder = builder.add_root_certificate(cert);
            }

            if let (Some(ref cert_path), Some(ref key_path)) = (&tls.client_cert, &tls.client_key)
            {
                let mut cert_pem = std::fs::read(cert_path).map_err(|e| RegistryError::IoError {
                    path: cert_path.clone(),
                    source: e,
                })?;
                let key_pem = std::fs::read(key_path).map_err(|e| RegistryError::IoError {
                    path: key_path.clone(),
                    source: e,
                })?;
                cert_pem.extend_from_slice(&key_pem);

                let identity = reqwest::Identity::from_pem(&cert_pem).map_err(|e| {
                    RegistryError::AuthenticationFailed {
                        message: format!("Invalid client certificate: {e}"),
                    }
                })?;
                builder = builder.identity(identity);
            }
        }

        builder.build().map_err(|e| RegistryError::ConnectionFailed {
            url: "client initialization".to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl ImageWriter for RegistryClient {
    async fn write(
        &self,
        reference: &Reference,
        image: PolicyImage,
        credentials: &dyn CredentialResolver,
        cancel: &CancellationToken,
    ) -> Result<String, RegistryError> {
        tokio::select! {
            () = cancel.cancelled() => Err(RegistryError::Cancelled),
            result = self.write_image(reference, &image, credentials) => result,
        }
    }
}

fn authorize(request: RequestBuilder, session: &Session<'_>) -> RequestBuilder {
    if let Some(token) = &session.token {
        return request.bearer_auth(token);
    }
    match &session.auth {
        RegistryAuth::Anonymous => request,
        RegistryAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        RegistryAuth::Bearer { token } => request.bearer_auth(token),
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) if !body.errors.is_empty() => format!("{status}: {}", body.message()),
        _ if text.is_empty() => status.to_string(),
        _ => format!("{status}: {text}"),
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// A parsed `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        for (key, value) in auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
        })
    }
}

/// Splits `key="value", key=value` auth parameters.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim().to_string();
        let after = after.trim_start();
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            quoted
                .find('"')
                .map_or((quoted, ""), |end| (&quoted[..end], &quoted[end + 1..]))
        } else {
            after
                .find(',')
                .map_or((after, ""), |end| (&after[..end], &after[end..]))
        };
        params.push((key, value.trim().to_string()));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::image::{Addendum, ImageBuilder};
    use dike_core::{Policy, PolicyKind};
    use mockito::Matcher;
    use serde_json::json;

    const BLOB_PATH: &str = r"^/v2/policies/blobs/sha256:[0-9a-f]{64}$";

    fn policy() -> Policy {
        Policy::new(
            PolicyKind::ClusterPolicy,
            "require-labels",
            json!({ "rules": [{ "name": "check-team" }] }),
        )
    }

    fn image() -> PolicyImage {
        ImageBuilder::policy_image()
            .append(Addendum::for_policy(&policy()).unwrap())
            .unwrap()
            .build()
            .unwrap()
    }

    fn reference_for(server: &mockito::Server) -> Reference {
        Reference::parse(&format!("{}/policies:v1", server.host_with_port())).unwrap()
    }

    fn utf8(data: &[u8]) -> String {
        String::from_utf8(data.to_vec()).unwrap()
    }

    #[test]
    fn test_client_creation() {
        assert!(RegistryClient::new(RegistryConfig::new()).is_ok());
    }

    #[test]
    fn test_session_urls() {
        let client = RegistryClient::new(RegistryConfig::new()).unwrap();

        let reference = Reference::parse("registry.example.com/team/policies:v1").unwrap();
        let session = client.session(&reference, RegistryAuth::Anonymous, "pull");
        assert_eq!(session.origin, "https://registry.example.com");
        assert_eq!(session.base, "https://registry.example.com/v2/team/policies");

        let reference = Reference::parse("localhost:5000/policies").unwrap();
        let session = client.session(&reference, RegistryAuth::Anonymous, "pull");
        assert_eq!(session.base, "http://localhost:5000/v2/policies");

        let reference = Reference::parse("policies:v1").unwrap();
        let session = client.session(&reference, RegistryAuth::Anonymous, "pull");
        assert_eq!(session.base, "https://registry-1.docker.io/v2/library/policies");
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:policies:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.example.com/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.example.com"));
    }

    #[test]
    fn test_parse_bearer_challenge_unquoted_and_spaced() {
        let challenge =
            BearerChallenge::parse("bearer realm=https://auth.example.com/token, service=reg")
                .unwrap();
        assert_eq!(challenge.realm, "https://auth.example.com/token");
        assert_eq!(challenge.service.as_deref(), Some("reg"));
    }

    #[test]
    fn test_parse_non_bearer_challenge() {
        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="no-realm""#).is_none());
        assert!(BearerChallenge::parse("Bearer").is_none());
    }

    #[test]
    fn test_auth_params_keeps_commas_inside_quotes() {
        let params = auth_params(r#"realm="r",scope="repository:a:pull,push""#);
        assert_eq!(
            params,
            vec![
                ("realm".to_string(), "r".to_string()),
                ("scope".to_string(), "repository:a:pull,push".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_skips_present_blobs_and_pushes_manifest_last() {
        let mut server = mockito::Server::new_async().await;
        let image = image();
        let config_digest = image.config_descriptor().digest;
        let layer = &image.layers()[0];

        let config_head = server
            .mock("HEAD", format!("/v2/policies/blobs/{config_digest}").as_str())
            .with_status(200)
            .create_async()
            .await;
        let layer_head = server
            .mock("HEAD", format!("/v2/policies/blobs/{}", layer.digest()).as_str())
            .with_status(404)
            .create_async()
            .await;
        let start = server
            .mock("POST", "/v2/policies/blobs/uploads/")
            .with_status(202)
            .with_header("location", "/v2/policies/blobs/uploads/abc?state=1")
            .create_async()
            .await;
        let upload = server
            .mock("PUT", "/v2/policies/blobs/uploads/abc")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("state".to_string(), "1".to_string()),
                Matcher::UrlEncoded("digest".to_string(), layer.digest().to_string()),
            ]))
            .match_body(utf8(layer.data()).as_str())
            .with_status(201)
            .create_async()
            .await;
        let manifest = server
            .mock("PUT", "/v2/policies/manifests/v1")
            .match_header("content-type", MediaType::OCI_MANIFEST)
            .match_body(utf8(&image.manifest_bytes().unwrap()).as_str())
            .with_status(201)
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let digest = client
            .write_image(&reference_for(&server), &image, &StaticCredentials::anonymous())
            .await
            .unwrap();

        assert_eq!(digest, image.digest().unwrap());
        config_head.assert_async().await;
        layer_head.assert_async().await;
        start.assert_async().await;
        upload.assert_async().await;
        manifest.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_answers_bearer_challenge_once() {
        let mut server = mockito::Server::new_async().await;
        let image = image();

        let challenged = server
            .mock("HEAD", Matcher::Regex(BLOB_PATH.to_string()))
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_status(401)
            .with_header(
                "www-authenticate",
                &format!(
                    r#"Bearer realm="{}/token",service="registry.test",scope="repository:policies:pull""#,
                    server.url()
                ),
            )
            .expect(1)
            .create_async()
            .await;
        let token = server
            .mock("GET", "/token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("service".to_string(), "registry.test".to_string()),
                Matcher::UrlEncoded(
                    "scope".to_string(),
                    "repository:policies:pull,push".to_string(),
                ),
            ]))
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token": "tok"}"#)
            .expect(1)
            .create_async()
            .await;
        let present = server
            .mock("HEAD", Matcher::Regex(BLOB_PATH.to_string()))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;
        let manifest = server
            .mock("PUT", "/v2/policies/manifests/v1")
            .match_header("authorization", "Bearer tok")
            .with_status(201)
            .with_header("docker-content-digest", "sha256:reported")
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let credentials = StaticCredentials::new(RegistryAuth::basic("user", "pass"));
        let digest = client
            .write_image(&reference_for(&server), &image, &credentials)
            .await
            .unwrap();

        assert_eq!(digest, "sha256:reported");
        challenged.assert_async().await;
        token.assert_async().await;
        present.assert_async().await;
        manifest.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_without_challenge_fails_authentication() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", Matcher::Regex(BLOB_PATH.to_string()))
            .with_status(401)
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let err = client
            .write_image(&reference_for(&server), &image(), &StaticCredentials::anonymous())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn test_write_reports_registry_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", Matcher::Regex(BLOB_PATH.to_string()))
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/policies/blobs/uploads/")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errors":[{"code":"DENIED","message":"requested access to the resource is denied"}]}"#)
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let err = client
            .write_image(&reference_for(&server), &image(), &StaticCredentials::anonymous())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::UploadFailed { .. }));
        assert!(err.to_string().contains("DENIED: requested access to the resource is denied"));
    }

    #[tokio::test]
    async fn test_write_rejects_mismatched_digest_reference() {
        let reference = Reference::parse(&format!(
            "registry.example.com/policies@sha256:{}",
            "0".repeat(64)
        ))
        .unwrap();

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let err = client
            .write_image(&reference, &image(), &StaticCredentials::anonymous())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::ManifestPushFailed { .. }));
    }

    #[tokio::test]
    async fn test_pull_returns_policies() {
        let mut server = mockito::Server::new_async().await;
        let image = image();
        let layer = &image.layers()[0];

        server
            .mock("GET", "/v2/policies/manifests/v1")
            .match_header("accept", MediaType::OCI_MANIFEST)
            .with_status(200)
            .with_header("content-type", MediaType::OCI_MANIFEST)
            .with_body(image.manifest_bytes().unwrap())
            .create_async()
            .await;
        server
            .mock(
                "GET",
                format!("/v2/policies/blobs/{}", image.config_descriptor().digest).as_str(),
            )
            .with_status(200)
            .with_body(image.config())
            .create_async()
            .await;
        server
            .mock("GET", format!("/v2/policies/blobs/{}", layer.digest()).as_str())
            .with_status(200)
            .with_body(layer.data())
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let pulled = client
            .pull(&reference_for(&server), &StaticCredentials::anonymous())
            .await
            .unwrap();

        assert_eq!(pulled.digest().unwrap(), image.digest().unwrap());
        assert_eq!(pulled.policies().unwrap(), vec![policy()]);
    }

    #[tokio::test]
    async fn test_pull_rejects_tampered_layer() {
        let mut server = mockito::Server::new_async().await;
        let image = image();
        let layer = &image.layers()[0];
        let tampered = utf8(layer.data()).replace("check-team", "check-tean");

        server
            .mock("GET", "/v2/policies/manifests/v1")
            .with_status(200)
            .with_body(image.manifest_bytes().unwrap())
            .create_async()
            .await;
        server
            .mock(
                "GET",
                format!("/v2/policies/blobs/{}", image.config_descriptor().digest).as_str(),
            )
            .with_status(200)
            .with_body(image.config())
            .create_async()
            .await;
        server
            .mock("GET", format!("/v2/policies/blobs/{}", layer.digest()).as_str())
            .with_status(200)
            .with_body(tampered)
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let err = client
            .pull(&reference_for(&server), &StaticCredentials::anonymous())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_pull_rejects_foreign_image() {
        let mut server = mockito::Server::new_async().await;
        let mut manifest = image().manifest();
        manifest.config.media_type = MediaType::new(MediaType::OCI_CONFIG);

        server
            .mock("GET", "/v2/policies/manifests/v1")
            .with_status(200)
            .with_body(serde_json::to_vec(&manifest).unwrap())
            .create_async()
            .await;
        let blobs = server
            .mock("GET", Matcher::Regex(BLOB_PATH.to_string()))
            .expect(0)
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let err = client
            .pull(&reference_for(&server), &StaticCredentials::anonymous())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::InvalidImage { .. }));
        blobs.assert_async().await;
    }

    #[tokio::test]
    async fn test_pull_missing_image() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/policies/manifests/v1")
            .with_status(404)
            .create_async()
            .await;

        let client = RegistryClient::new(RegistryConfig::new()).unwrap();
        let err = client
            .pull(&reference_for(&server), &StaticCredentials::anonymous())
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::NotFound { .. }));
    }
}
