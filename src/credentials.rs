/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Credential types and the provider abstraction
//!
//! [`ProvideCredentials`] is the seam every credential source implements. The
//! [`ChainProvider`] combinator tries a list of named sources in order and
//! resolves to the first one that produces credentials.

use crate::os_shim::Env;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type CredentialsResult = Result<Credentials, CredentialsError>;

/// AWS access credentials
///
/// Cheap to clone; the fields are shared behind an `Arc`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(Arc<Inner>);

#[derive(PartialEq, Eq)]
struct Inner {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expiry: Option<SystemTime>,
    provider_name: &'static str,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        expiry: Option<SystemTime>,
        provider_name: &'static str,
    ) -> Self {
        Credentials(Arc::new(Inner {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
            expiry,
            provider_name,
        }))
    }

    /// Static credentials with no session token or expiry
    pub fn from_keys(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Credentials::new(access_key_id, secret_access_key, None, None, "Static")
    }

    pub fn access_key_id(&self) -> &str {
        &self.0.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.0.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.0.session_token.as_deref()
    }

    pub fn expiry(&self) -> Option<SystemTime> {
        self.0.expiry
    }

    pub fn provider_name(&self) -> &'static str {
        self.0.provider_name
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the secret
        f.debug_struct("Credentials")
            .field("access_key_id", &self.0.access_key_id)
            .field("provider_name", &self.0.provider_name)
            .finish()
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialsError {
    /// This provider has nothing configured; the next provider in a chain
    /// should be tried
    #[error("this provider was not able to provide credentials")]
    CredentialsNotLoaded,

    /// The provider is configured, but the configuration is invalid
    #[error("invalid credential configuration: {0}")]
    InvalidConfiguration(Cow<'static, str>),

    /// The provider failed while loading credentials
    #[error("the credential provider failed: {0}")]
    ProviderError(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("unhandled credential error: {0}")]
    Unhandled(Cow<'static, str>),
}

impl From<std::io::Error> for CredentialsError {
    fn from(err: std::io::Error) -> Self {
        CredentialsError::ProviderError(err.into())
    }
}

/// Asynchronously loaded credentials
///
/// Object safe so that chains and registries can hold heterogeneous sources.
pub trait ProvideCredentials: Send + Sync {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a;
}

impl ProvideCredentials for Credentials {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(async move { Ok(self.clone()) })
    }
}

/// Credential provider chain
///
/// Providers are tried in insertion order. A provider that fails moves
/// resolution along to the next one; if every provider fails, the last
/// error is returned.
pub struct ChainProvider {
    providers: Vec<(Cow<'static, str>, Arc<dyn ProvideCredentials>)>,
}

impl ChainProvider {
    pub fn first_try(
        name: impl Into<Cow<'static, str>>,
        provider: impl ProvideCredentials + 'static,
    ) -> Self {
        ChainProvider {
            providers: vec![(name.into(), Arc::new(provider))],
        }
    }

    pub fn or_else(
        mut self,
        name: impl Into<Cow<'static, str>>,
        provider: impl ProvideCredentials + 'static,
    ) -> Self {
        self.providers.push((name.into(), Arc::new(provider)));
        self
    }

    /// The names of the providers in this chain, in resolution order
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|(name, _)| name.as_ref()).collect()
    }

    async fn resolve(&self) -> CredentialsResult {
        let mut last_error = CredentialsError::CredentialsNotLoaded;
        for (name, provider) in &self.providers {
            match provider.provide_credentials().await {
                Ok(credentials) => {
                    tracing::debug!(provider = %name, "loaded credentials");
                    return Ok(credentials);
                }
                Err(err) => {
                    tracing::debug!(provider = %name, "provider did not provide credentials: {}", err);
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}

impl ProvideCredentials for ChainProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(self.resolve())
    }
}

/// Credentials sourced from environment variables under a given prefix
///
/// Checks `{prefix}_ACCESS_KEY_ID`, `{prefix}_SECRET_ACCESS_KEY` and the
/// optional `{prefix}_SESSION_TOKEN`.
pub struct EnvironmentVariableCredentialsProvider {
    env: Env,
    prefix: &'static str,
}

impl EnvironmentVariableCredentialsProvider {
    pub fn new_with_env(env: Env, prefix: &'static str) -> Self {
        EnvironmentVariableCredentialsProvider { env, prefix }
    }

    fn credentials(&self) -> CredentialsResult {
        let access_key_id = self
            .env
            .get(&format!("{}_ACCESS_KEY_ID", self.prefix))
            .ok_or(CredentialsError::CredentialsNotLoaded)?;
        let secret_access_key = self
            .env
            .get(&format!("{}_SECRET_ACCESS_KEY", self.prefix))
            .ok_or_else(|| {
                CredentialsError::InvalidConfiguration(
                    format!(
                        "{0}_ACCESS_KEY_ID is set but {0}_SECRET_ACCESS_KEY is not",
                        self.prefix
                    )
                    .into(),
                )
            })?;
        let session_token = self.env.get(&format!("{}_SESSION_TOKEN", self.prefix));
        Ok(Credentials::new(
            access_key_id,
            secret_access_key,
            session_token,
            None,
            "Environment",
        ))
    }
}

impl ProvideCredentials for EnvironmentVariableCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(async move { self.credentials() })
    }
}
