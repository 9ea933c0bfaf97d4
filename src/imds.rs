/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Instance and container metadata clients
//!
//! The instance metadata service (IMDS) and the ECS container credentials
//! endpoint are plain HTTP services on link-local addresses. Both are probed
//! with short, bounded timeouts and a small fixed retry count: on hosts where
//! the endpoint does not exist the whole resolution must not stall.

use crate::credentials::{
    BoxFuture, Credentials, CredentialsError, CredentialsResult, ProvideCredentials,
};
use crate::os_shim::Env;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

const IMDS_BASE_URL: &str = "http://169.254.169.254";
const ECS_BASE_URL: &str = "http://169.254.170.2";
const TOKEN_PATH: &str = "/latest/api/token";
const IDENTITY_DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";
const SECURITY_CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/";
const TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "60";

const ENV_CONTAINER_RELATIVE_URI: &str = "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI";
const ENV_CONTAINER_FULL_URI: &str = "AWS_CONTAINER_CREDENTIALS_FULL_URI";
const ENV_CONTAINER_AUTH_TOKEN: &str = "AWS_CONTAINER_AUTHORIZATION_TOKEN";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImdsError {
    #[error("request to the metadata service timed out")]
    Timeout,

    #[error("metadata service returned HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("metadata service returned an empty response")]
    EmptyResponse,

    #[error("failed to reach the metadata service: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid metadata request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("invalid metadata response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

impl From<ImdsError> for CredentialsError {
    fn from(err: ImdsError) -> Self {
        CredentialsError::ProviderError(err.into())
    }
}

/// The subset of the instance identity document that is consumed
#[derive(Debug, Deserialize)]
struct InstanceIdentityDocument {
    region: String,
}

/// Credentials payload shared by the IMDS role endpoint and the ECS endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<String>,
}

impl SecurityCredentials {
    fn into_credentials(self, provider_name: &'static str) -> CredentialsResult {
        let expiry = match &self.expiration {
            Some(raw) => Some(parse_expiration(raw)?),
            None => None,
        };
        Ok(Credentials::new(
            self.access_key_id,
            self.secret_access_key,
            self.token,
            expiry,
            provider_name,
        ))
    }
}

fn parse_expiration(raw: &str) -> Result<SystemTime, CredentialsError> {
    let parsed =
        time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
            .map_err(|err| {
                CredentialsError::Unhandled(
                    format!("invalid credential expiration '{}': {}", raw, err).into(),
                )
            })?;
    Ok(SystemTime::from(parsed))
}

/// Client for the EC2 instance metadata service
///
/// Uses IMDSv2 (session token) when available and falls back to IMDSv1 when
/// the token endpoint cannot be reached.
pub struct ImdsClient {
    client: hyper::Client<hyper::client::HttpConnector>,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl Default for ImdsClient {
    fn default() -> Self {
        ImdsClient::new(IMDS_BASE_URL)
    }
}

impl ImdsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        ImdsClient {
            client: hyper::Client::new(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(1),
            max_retries: 2,
        }
    }

    async fn request(
        &self,
        method: &http::Method,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<String, ImdsError> {
        let mut last_error = ImdsError::EmptyResponse;
        for _attempt in 0..=self.max_retries {
            match self.request_once(method, path, headers).await {
                Ok(body) => return Ok(body),
                Err(err) => {
                    tracing::debug!(path, "metadata request failed: {}", err);
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn request_once(
        &self,
        method: &http::Method,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<String, ImdsError> {
        let mut request = http::Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_url, path));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let request = request.body(hyper::Body::empty())?;
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_elapsed| ImdsError::Timeout)??;
        if !response.status().is_success() {
            return Err(ImdsError::UnexpectedStatus(response.status().as_u16()));
        }
        let body = tokio::time::timeout(self.timeout, hyper::body::to_bytes(response.into_body()))
            .await
            .map_err(|_elapsed| ImdsError::Timeout)??;
        let body = String::from_utf8_lossy(&body).into_owned();
        if body.is_empty() {
            return Err(ImdsError::EmptyResponse);
        }
        Ok(body)
    }

    /// Fetch a short-lived IMDSv2 session token
    pub async fn fetch_token(&self) -> Result<String, ImdsError> {
        tracing::debug!("attempting to retrieve an IMDSv2 token");
        let token = self
            .request(
                &http::Method::PUT,
                TOKEN_PATH,
                &[(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)],
            )
            .await?;
        Ok(token.trim().to_string())
    }

    /// Best-effort token fetch; IMDSv1 hosts simply have no token
    async fn optional_token(&self) -> Option<String> {
        match self.fetch_token().await {
            Ok(token) => Some(token),
            Err(err) => {
                tracing::debug!("no IMDSv2 token: {}", err);
                None
            }
        }
    }

    /// The region from the instance identity document
    pub async fn region(&self) -> Result<String, ImdsError> {
        tracing::debug!("retrieving the AWS region from the instance metadata service");
        let token = self.optional_token().await;
        let mut headers = Vec::new();
        if let Some(token) = &token {
            headers.push((TOKEN_HEADER, token.as_str()));
        }
        let body = self
            .request(&http::Method::GET, IDENTITY_DOCUMENT_PATH, &headers)
            .await?;
        let document: InstanceIdentityDocument = serde_json::from_str(&body)?;
        Ok(document.region)
    }

    /// Credentials from the instance role attached to this instance
    pub async fn credentials(&self) -> CredentialsResult {
        let token = self.optional_token().await;
        let mut headers = Vec::new();
        if let Some(token) = &token {
            headers.push((TOKEN_HEADER, token.as_str()));
        }
        let roles = self
            .request(&http::Method::GET, SECURITY_CREDENTIALS_PATH, &headers)
            .await
            .map_err(CredentialsError::from)?;
        let role = match roles.lines().next().map(str::trim) {
            Some(role) if !role.is_empty() => role.to_string(),
            _ => return Err(CredentialsError::CredentialsNotLoaded),
        };
        let body = self
            .request(
                &http::Method::GET,
                &format!("{}{}", SECURITY_CREDENTIALS_PATH, role),
                &headers,
            )
            .await
            .map_err(CredentialsError::from)?;
        let payload: SecurityCredentials = serde_json::from_str(&body)
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        payload.into_credentials("Ec2InstanceMetadata")
    }
}

/// Credential provider backed by [`ImdsClient`]
pub struct ImdsCredentialsProvider {
    client: Arc<ImdsClient>,
}

impl ImdsCredentialsProvider {
    pub fn new(client: Arc<ImdsClient>) -> Self {
        ImdsCredentialsProvider { client }
    }
}

impl ProvideCredentials for ImdsCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(self.client.credentials())
    }
}

/// Whether container (ECS) credentials look configured for this process
pub fn has_ecs_credentials(env: &Env) -> bool {
    env.get(ENV_CONTAINER_RELATIVE_URI).is_some() || env.get(ENV_CONTAINER_FULL_URI).is_some()
}

/// Credential provider for the ECS container credentials endpoint
pub struct EcsCredentialsProvider {
    env: Env,
    client: hyper::Client<hyper::client::HttpConnector>,
    timeout: Duration,
}

impl EcsCredentialsProvider {
    pub fn new(env: Env) -> Self {
        EcsCredentialsProvider {
            env,
            client: hyper::Client::new(),
            timeout: Duration::from_secs(1),
        }
    }

    fn credentials_url(&self) -> Option<String> {
        if let Some(full) = self.env.get(ENV_CONTAINER_FULL_URI) {
            return Some(full);
        }
        self.env
            .get(ENV_CONTAINER_RELATIVE_URI)
            .map(|relative| format!("{}{}", ECS_BASE_URL, relative))
    }

    async fn credentials(&self) -> CredentialsResult {
        let url = self
            .credentials_url()
            .ok_or(CredentialsError::CredentialsNotLoaded)?;
        let mut request = http::Request::builder().method(http::Method::GET).uri(&url);
        if let Some(auth) = self.env.get(ENV_CONTAINER_AUTH_TOKEN) {
            request = request.header(http::header::AUTHORIZATION, auth);
        }
        let request = request
            .body(hyper::Body::empty())
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_elapsed| CredentialsError::ProviderError(ImdsError::Timeout.into()))?
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        if !response.status().is_success() {
            return Err(CredentialsError::ProviderError(
                ImdsError::UnexpectedStatus(response.status().as_u16()).into(),
            ));
        }
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        let payload: SecurityCredentials = serde_json::from_slice(&body)
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        payload.into_credentials("EcsContainer")
    }
}

impl ProvideCredentials for EcsCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(self.credentials())
    }
}
