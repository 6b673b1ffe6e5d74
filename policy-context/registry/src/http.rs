//! A registry client speaking the OCI distribution API over HTTP.

use crate::{Authenticator, FetchedManifest, ImageReference, RegistryClient, RegistryConnector};
use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use tracing::{debug, trace};

const MANIFEST_TYPES: &str = "application/vnd.oci.image.manifest.v1+json,\
    application/vnd.oci.image.index.v1+json,\
    application/vnd.docker.distribution.manifest.v2+json,\
    application/vnd.docker.distribution.manifest.list.v2+json";

const DIGEST_HEADER: &str = "docker-content-digest";

/// Identifies this client to OAuth2 token services.
const CLIENT_ID: &str = "policy-context";

/// Builds [`RegistryClient`]s that talk to registries over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpConnector {
    http: reqwest::Client,
    platform: Platform,
}

/// The platform selected from multi-platform images, e.g. `linux/amd64`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    os: String,
    architecture: String,
    variant: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid platform {0:?}: expected os/architecture[/variant]")]
pub struct InvalidPlatform(String);

struct HttpClient {
    http: reqwest::Client,
    base: url::Url,
    auth: Authenticator,
    platform: Platform,

    /// A bearer token obtained from the registry's token service.
    token: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

// === impl HttpConnector ===

impl HttpConnector {
    pub fn new(platform: Platform) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("policy-context/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, platform })
    }
}

impl RegistryConnector for HttpConnector {
    fn connect(
        &self,
        auth: Authenticator,
        image: &ImageReference,
        allow_insecure: bool,
    ) -> Result<Arc<dyn RegistryClient>> {
        let base = base_url(image.registry(), allow_insecure)?;
        Ok(Arc::new(HttpClient {
            http: self.http.clone(),
            base,
            auth,
            platform: self.platform.clone(),
            token: Mutex::new(None),
        }))
    }
}

// === impl Platform ===

impl Default for Platform {
    fn default() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
            variant: None,
        }
    }
}

impl FromStr for Platform {
    type Err = InvalidPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(os), Some(arch), variant, None) if !os.is_empty() && !arch.is_empty() => {
                Ok(Self {
                    os: os.to_string(),
                    architecture: arch.to_string(),
                    variant: variant.filter(|v| !v.is_empty()).map(Into::into),
                })
            }
            _ => Err(InvalidPlatform(s.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

impl Platform {
    fn matches(&self, descriptor: &Value) -> bool {
        let Some(platform) = descriptor.get("platform") else {
            return false;
        };
        let field = |name: &str| platform.get(name).and_then(Value::as_str);
        field("os") == Some(self.os.as_str())
            && field("architecture") == Some(self.architecture.as_str())
            && (self.variant.is_none() || field("variant") == self.variant.as_deref())
    }
}

// === impl HttpClient ===

#[async_trait::async_trait]
impl RegistryClient for HttpClient {
    async fn manifest(&self, image: &ImageReference) -> Result<FetchedManifest> {
        let (digest, manifest) = self
            .get_manifest(image.repository(), image.identifier())
            .await?;
        if !is_index(&manifest) {
            let digest = digest
                .or_else(|| image.digest().map(Into::into))
                .ok_or_else(|| anyhow!("registry did not report a digest for {image}"))?;
            return Ok(FetchedManifest {
                digest,
                manifest,
                index: None,
            });
        }

        let selected = select_manifest(&manifest, &self.platform)
            .ok_or_else(|| anyhow!("{image} has no manifest for {}", self.platform))?;
        debug!(%image, digest = %selected, platform = %self.platform, "Selected manifest from index");
        let (_, platform_manifest) = self.get_manifest(image.repository(), &selected).await?;
        Ok(FetchedManifest {
            digest: selected,
            manifest: platform_manifest,
            index: Some(manifest),
        })
    }

    async fn blob(&self, image: &ImageReference, digest: &str) -> Result<Value> {
        let path = format!("v2/{}/blobs/{digest}", image.repository());
        let rsp = self.get(image.repository(), &path, None).await?;
        rsp.json()
            .await
            .with_context(|| format!("blob {digest} is not JSON"))
    }
}

impl HttpClient {
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<(Option<String>, Value)> {
        let path = format!("v2/{repository}/manifests/{reference}");
        let rsp = self.get(repository, &path, Some(MANIFEST_TYPES)).await?;
        let digest = rsp
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Into::into);
        let manifest = rsp
            .json()
            .await
            .with_context(|| format!("manifest {repository}:{reference} is not JSON"))?;
        Ok((digest, manifest))
    }

    /// Issues a GET, exchanging a token challenge for a bearer token once if required.
    async fn get(
        &self,
        repository: &str,
        path: &str,
        accept: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = self.base.join(path)?;
        let mut retried = false;
        loop {
            let mut req = self.http.get(url.clone());
            if let Some(accept) = accept {
                req = req.header(header::ACCEPT, accept);
            }
            if let Some(authz) = self.authorization() {
                req = req.header(header::AUTHORIZATION, authz);
            }

            trace!(%url, "GET");
            let rsp = req.send().await.with_context(|| format!("GET {url} failed"))?;
            if rsp.status() == StatusCode::UNAUTHORIZED && !retried {
                let challenge = rsp
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_bearer_challenge);
                if let Some(challenge) = challenge {
                    let token = self.fetch_token(&challenge, repository).await?;
                    *self.token.lock() = Some(token);
                    retried = true;
                    continue;
                }
            }
            if !rsp.status().is_success() {
                bail!("GET {url} failed: {}", rsp.status());
            }
            return Ok(rsp);
        }
    }

    fn authorization(&self) -> Option<String> {
        if let Some(token) = self.token.lock().as_ref() {
            return Some(format!("Bearer {token}"));
        }
        self.auth.authorization()
    }

    async fn fetch_token(&self, challenge: &HashMap<String, String>, repository: &str) -> Result<String> {
        let realm = challenge
            .get("realm")
            .ok_or_else(|| anyhow!("token challenge has no realm"))?;
        let url = url::Url::parse(realm).with_context(|| format!("invalid token realm {realm}"))?;
        let service = challenge.get("service").map(String::as_str);
        let scope = challenge
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{repository}:pull"));

        let req = match self.auth.identity_token() {
            Some(refresh_token) => {
                debug!(realm = %realm, "Exchanging identity token");
                self.http
                    .post(url)
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(refresh_token_form(service, &scope, refresh_token))
            }
            None => {
                let mut url = url;
                {
                    let mut query = url.query_pairs_mut();
                    if let Some(service) = service {
                        query.append_pair("service", service);
                    }
                    query.append_pair("scope", &scope);
                }
                let mut req = self.http.get(url);
                if let Some(authz) = self.auth.authorization() {
                    req = req.header(header::AUTHORIZATION, authz);
                }
                debug!(realm = %realm, anonymous = self.auth.is_anonymous(), "Requesting registry token");
                req
            }
        };

        let rsp = req
            .send()
            .await
            .with_context(|| format!("token request to {realm} failed"))?;
        if !rsp.status().is_success() {
            bail!("token request to {realm} failed: {}", rsp.status());
        }
        let TokenResponse {
            token,
            access_token,
        } = rsp.json().await.context("invalid token response")?;
        token
            .or(access_token)
            .ok_or_else(|| anyhow!("token response from {realm} has no token"))
    }
}

/// Encodes an OAuth2 refresh-token grant for a registry token service.
fn refresh_token_form(service: Option<&str>, scope: &str, refresh_token: &str) -> String {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    form.append_pair("grant_type", "refresh_token");
    if let Some(service) = service {
        form.append_pair("service", service);
    }
    form.append_pair("client_id", CLIENT_ID)
        .append_pair("scope", scope)
        .append_pair("refresh_token", refresh_token);
    form.finish()
}

fn base_url(registry: &str, allow_insecure: bool) -> Result<url::Url> {
    let host = match registry {
        "docker.io" | "index.docker.io" => "registry-1.docker.io",
        host => host,
    };
    let scheme = if allow_insecure { "http" } else { "https" };
    url::Url::parse(&format!("{scheme}://{host}/"))
        .with_context(|| format!("invalid registry {registry}"))
}

fn is_index(manifest: &Value) -> bool {
    match manifest.get("mediaType").and_then(Value::as_str) {
        Some(media_type) => media_type.contains("index") || media_type.contains("manifest.list"),
        None => manifest.get("manifests").is_some_and(Value::is_array),
    }
}

fn select_manifest(index: &Value, platform: &Platform) -> Option<String> {
    index
        .get("manifests")?
        .as_array()?
        .iter()
        .find(|m| platform.matches(m))?
        .get("digest")?
        .as_str()
        .map(Into::into)
}

/// Parses a `WWW-Authenticate: Bearer k="v",...` challenge.
fn parse_bearer_challenge(value: &str) -> Option<HashMap<String, String>> {
    let (scheme, params) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut out = HashMap::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let (key, tail) = rest.split_once('=')?;
        let tail = tail.trim_start();
        let (value, tail) = match tail.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => tail.split_once(',').unwrap_or((tail, "")),
        };
        out.insert(key.trim().to_ascii_lowercase(), value.to_string());
        rest = tail.trim_start().trim_start_matches(',').trim_start();
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bearer_challenges() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .expect("challenge must parse");
        assert_eq!(challenge["realm"], "https://auth.docker.io/token");
        assert_eq!(challenge["service"], "registry.docker.io");
        assert_eq!(challenge["scope"], "repository:library/nginx:pull");

        let challenge = parse_bearer_challenge("Bearer realm=https://ghcr.io/token, service=ghcr.io")
            .expect("challenge must parse");
        assert_eq!(challenge["realm"], "https://ghcr.io/token");
        assert_eq!(challenge["service"], "ghcr.io");

        assert_eq!(parse_bearer_challenge(r#"Basic realm="registry""#), None);
    }

    #[test]
    fn refresh_token_grant() {
        let form = refresh_token_form(
            Some("registry.docker.io"),
            "repository:library/nginx:pull",
            "idt/+=",
        );
        assert_eq!(
            form,
            "grant_type=refresh_token&service=registry.docker.io&client_id=policy-context\
             &scope=repository%3Alibrary%2Fnginx%3Apull&refresh_token=idt%2F%2B%3D"
        );

        let form = refresh_token_form(None, "repository:app:pull", "t");
        assert!(!form.contains("service="), "{form}");
    }

    #[test]
    fn platforms() {
        assert_eq!("linux/amd64".parse::<Platform>().unwrap(), Platform::default());
        let arm = "linux/arm64/v8".parse::<Platform>().unwrap();
        assert_eq!(arm.to_string(), "linux/arm64/v8");
        assert!("linux".parse::<Platform>().is_err());
        assert!("linux/arm/v7/extra".parse::<Platform>().is_err());
    }

    #[test]
    fn selects_platform_manifest() {
        let index = json!({
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [
                {"digest": "sha256:arm", "platform": {"os": "linux", "architecture": "arm64", "variant": "v8"}},
                {"digest": "sha256:amd", "platform": {"os": "linux", "architecture": "amd64"}},
            ],
        });
        assert!(is_index(&index));
        assert_eq!(
            select_manifest(&index, &Platform::default()).as_deref(),
            Some("sha256:amd")
        );
        assert_eq!(
            select_manifest(&index, &"linux/arm64".parse().unwrap()).as_deref(),
            Some("sha256:arm")
        );
        assert_eq!(select_manifest(&index, &"windows/amd64".parse().unwrap()), None);
        assert!(!is_index(&json!({"schemaVersion": 2, "config": {}})));
    }

    #[test]
    fn base_urls() {
        assert_eq!(
            base_url("docker.io", false).unwrap().as_str(),
            "https://registry-1.docker.io/"
        );
        assert_eq!(
            base_url("localhost:5000", true).unwrap().as_str(),
            "http://localhost:5000/"
        );
    }
}
