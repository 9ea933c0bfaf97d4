/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Credential provider plugins
//!
//! Plugins are externally registered sources that can supply credentials for
//! accounts the ambient configuration knows nothing about. The registry asks
//! each source, in registration order, whether it is available and whether it
//! covers the requested account, and uses the first one that claims both.

use crate::credentials::{Credentials, CredentialsError, ProvideCredentials};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The class of operations credentials will be used for
///
/// A plugin may hand out different credentials for reading than for writing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    ForReading,
    ForWriting,
}

/// What a plugin returns from [`CredentialProviderSource::get_provider`]
///
/// Older plugins return a provider chain that still needs resolving rather
/// than resolved credentials; the registry normalizes both shapes.
pub enum PluginProviderResult {
    Credentials(Credentials),
    Chain(Arc<dyn ProvideCredentials>),
}

/// An externally registered credential source
#[async_trait]
pub trait CredentialProviderSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the source is usable at all in this process
    async fn is_available(&self) -> bool;

    /// Whether the source can produce credentials for the given account
    async fn can_provide_credentials(&self, account_id: &str) -> bool;

    async fn get_provider(
        &self,
        account_id: &str,
        mode: Mode,
    ) -> Result<PluginProviderResult, CredentialsError>;
}

/// Credentials supplied by a plugin, tagged with the plugin's name
#[derive(Clone, Debug)]
pub struct PluginCredentials {
    pub credentials: Credentials,
    pub plugin_name: String,
}

/// Registry over the loaded credential provider sources
///
/// Lookups are memoized per `(account, mode)` so that multiple clients for
/// the same environment do not trigger repeated plugin calls.
pub struct CredentialPlugins {
    sources: Vec<Arc<dyn CredentialProviderSource>>,
    cache: Mutex<HashMap<(String, Mode), Option<PluginCredentials>>>,
}

impl CredentialPlugins {
    pub fn new(sources: Vec<Arc<dyn CredentialProviderSource>>) -> Self {
        CredentialPlugins {
            sources,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The names of every registered source, in registration order
    pub fn available_plugin_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    pub async fn fetch_credentials_for(
        &self,
        account_id: &str,
        mode: Mode,
    ) -> Result<Option<PluginCredentials>, CredentialsError> {
        let key = (account_id.to_string(), mode);
        // compute under the lock so concurrent first callers resolve once
        let mut cache = self.cache.lock().await;
        if let Some(found) = cache.get(&key) {
            return Ok(found.clone());
        }
        let found = self.lookup_credentials(account_id, mode).await?;
        cache.insert(key, found.clone());
        Ok(found)
    }

    async fn lookup_credentials(
        &self,
        account_id: &str,
        mode: Mode,
    ) -> Result<Option<PluginCredentials>, CredentialsError> {
        for source in &self.sources {
            if !source.is_available().await {
                tracing::debug!(
                    plugin = source.name(),
                    "credentials source is not available, ignoring it"
                );
                continue;
            }
            if !source.can_provide_credentials(account_id).await {
                continue;
            }
            tracing::debug!(plugin = source.name(), account_id, "using plugin credentials");
            let credentials = match source.get_provider(account_id, mode).await? {
                PluginProviderResult::Credentials(credentials) => credentials,
                PluginProviderResult::Chain(chain) => chain.provide_credentials().await?,
            };
            return Ok(Some(PluginCredentials {
                credentials,
                plugin_name: source.name().to_string(),
            }));
        }
        Ok(None)
    }
}
