/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! The client handle returned by a successful resolution
//!
//! An [`Sdk`] binds a credential source to a region. Credentials are resolved
//! lazily and memoized on the handle; [`Sdk::force_credential_retrieval`]
//! resolves them eagerly so that an assume-role failure surfaces at
//! construction time instead of on first use.

use crate::account_cache::AccountAccessKeyCache;
use crate::credentials::{BoxFuture, Credentials, CredentialsError, CredentialsResult, ProvideCredentials};
use crate::environment::Account;
use crate::sts::{AssumeRoleRequest, StsOps};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct Sdk {
    credentials_provider: Arc<dyn ProvideCredentials>,
    region: String,
    sts: Arc<dyn StsOps>,
    account_cache: Arc<AccountAccessKeyCache>,
    /// Human-readable description of where the credentials came from,
    /// included in diagnostics
    credential_description: String,
    cached_credentials: OnceCell<Credentials>,
    cached_account: OnceCell<Account>,
}

impl Sdk {
    pub fn new(
        credentials_provider: Arc<dyn ProvideCredentials>,
        region: impl Into<String>,
        sts: Arc<dyn StsOps>,
        account_cache: Arc<AccountAccessKeyCache>,
        credential_description: impl Into<String>,
    ) -> Self {
        Sdk {
            credentials_provider,
            region: region.into(),
            sts,
            account_cache,
            credential_description: credential_description.into(),
            cached_credentials: OnceCell::new(),
            cached_account: OnceCell::new(),
        }
    }

    pub fn current_region(&self) -> &str {
        &self.region
    }

    pub fn credential_description(&self) -> &str {
        &self.credential_description
    }

    /// The resolved credentials, resolving them on first call
    pub async fn credentials(&self) -> Result<&Credentials, CredentialsError> {
        self.cached_credentials
            .get_or_try_init(|| self.credentials_provider.provide_credentials())
            .await
    }

    /// Resolve credentials now instead of on first use
    ///
    /// Used to detect assume-role failures at handle construction time.
    pub async fn force_credential_retrieval(&self) -> Result<&Credentials, CredentialsError> {
        match self.credentials().await {
            Ok(credentials) => Ok(credentials),
            Err(err) => {
                tracing::debug!(
                    "could not retrieve {}: {}",
                    self.credential_description,
                    err
                );
                Err(err)
            }
        }
    }

    /// The account these credentials belong to
    ///
    /// Goes through the on-disk access-key cache so repeated lookups for the
    /// same key skip the identity call.
    pub async fn current_account(&self) -> Result<&Account, CredentialsError> {
        self.cached_account
            .get_or_try_init(|| async {
                let credentials = self.credentials().await?;
                self.account_cache
                    .fetch(credentials.access_key_id(), || async {
                        let identity = self
                            .sts
                            .get_caller_identity(credentials, &self.region)
                            .await?;
                        tracing::debug!(
                            "Looked up default account ID: {}",
                            identity.account
                        );
                        Ok(Account::new(
                            identity.account.clone(),
                            identity.partition().unwrap_or("aws"),
                        ))
                    })
                    .await
            })
            .await
    }
}

/// Provides temporary credentials by assuming a role with fixed base
/// credentials
///
/// Single-shot by design: the resulting credentials carry their expiration
/// and the handle memoizes them, so no refresh loop lives here.
pub struct AssumeRoleProvider {
    sts: Arc<dyn StsOps>,
    base: Credentials,
    request: AssumeRoleRequest,
}

impl AssumeRoleProvider {
    pub fn new(sts: Arc<dyn StsOps>, base: Credentials, request: AssumeRoleRequest) -> Self {
        AssumeRoleProvider { sts, base, request }
    }
}

impl ProvideCredentials for AssumeRoleProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(async move {
            tracing::debug!("Assuming role '{}'", self.request.role_arn);
            self.sts.assume_role(&self.base, self.request.clone()).await
        })
    }
}
