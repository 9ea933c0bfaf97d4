/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! The resolution engine
//!
//! [`SdkProvider`] turns an [`Environment`] (account and region, possibly
//! unknown) plus an optional role assumption into an [`Sdk`] handle bound to
//! concrete credentials. Default credentials and the default account are
//! resolved at most once per provider and shared across concurrent callers.

use crate::account_cache::AccountAccessKeyCache;
use crate::cli_compatible::{AwsCliCompatible, CliCompatibleOptions};
use crate::credentials::{Credentials, CredentialsError, ProvideCredentials};
use crate::environment::{Account, Environment, UNKNOWN_ACCOUNT, UNKNOWN_REGION};
use crate::imds::ImdsClient;
use crate::os_shim::{Env, Fs};
use crate::platform::{HostProbe, PlatformProbe};
use crate::plugin::{CredentialPlugins, CredentialProviderSource, Mode};
use crate::profile::{ProfileParseError, TokenCodeFn};
use crate::sdk::{AssumeRoleProvider, Sdk};
use crate::sts::{sanitize_session_name, AssumeRoleRequest, StsOps};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Requested role assumption for [`SdkProvider::for_environment`]
#[derive(Clone, Debug, Default)]
pub struct AssumeRoleOptions {
    pub role_arn: Option<String>,
    pub external_id: Option<String>,
}

/// Where a set of base credentials came from
///
/// The provenance decides whether a failed role assumption may fall back to
/// the base credentials: `CorrectDefault` and `Plugin` credentials belong to
/// a known-good identity, `IncorrectDefault` ones are known to be wrong.
#[derive(Clone, Debug)]
pub enum ObtainedCredentials {
    /// Default credentials matching the requested account
    CorrectDefault { credentials: Credentials },
    /// Credentials supplied by a registered plugin
    Plugin {
        credentials: Credentials,
        plugin_name: String,
    },
    /// Default credentials exist but belong to a different account
    IncorrectDefault {
        credentials: Credentials,
        account_id: String,
        unused_plugins: Vec<String>,
    },
    /// No credentials could be found anywhere
    None { unused_plugins: Vec<String> },
}

impl ObtainedCredentials {
    fn credentials(&self) -> Option<&Credentials> {
        match self {
            ObtainedCredentials::CorrectDefault { credentials } => Some(credentials),
            ObtainedCredentials::Plugin { credentials, .. } => Some(credentials),
            ObtainedCredentials::IncorrectDefault { credentials, .. } => Some(credentials),
            ObtainedCredentials::None { .. } => None,
        }
    }

    fn description(&self) -> String {
        match self {
            ObtainedCredentials::CorrectDefault { .. } => "current credentials".to_string(),
            ObtainedCredentials::Plugin { plugin_name, .. } => {
                format!("credentials returned by plugin '{}'", plugin_name)
            }
            ObtainedCredentials::IncorrectDefault { account_id, .. } => {
                format!("current credentials (which are for account {})", account_id)
            }
            ObtainedCredentials::None { .. } => "no credentials".to_string(),
        }
    }

    fn may_fall_back(&self) -> bool {
        matches!(
            self,
            ObtainedCredentials::CorrectDefault { .. } | ObtainedCredentials::Plugin { .. }
        )
    }
}

fn fmt_obtain_credentials_error(
    account_id: &str,
    default_account_id: Option<&str>,
    unused_plugins: &[String],
) -> String {
    let mut message = format!("Need to perform AWS calls for account {}", account_id);
    match default_account_id {
        Some(default_account_id) => {
            message.push_str(&format!(
                ", but the current credentials are for {}",
                default_account_id
            ));
        }
        None => message.push_str(", but no credentials have been configured"),
    }
    if !unused_plugins.is_empty() {
        message.push_str(&format!(
            ", and none of these plugins found any: {}",
            unused_plugins.join(", ")
        ));
    }
    message
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The environment used the unknown-account sentinel and no default
    /// account could be determined
    #[error(
        "unable to resolve default AWS account to use; \
         specify an explicit account or configure credentials"
    )]
    CouldNotResolveDefaultAccount,

    #[error("{}", fmt_obtain_credentials_error(.account_id, .default_account_id.as_deref(), .unused_plugins))]
    CannotObtainCredentials {
        account_id: String,
        default_account_id: Option<String>,
        unused_plugins: Vec<String>,
    },

    #[error("{description} could not be used to assume '{role_arn}' for account {account_id}: {source}")]
    AssumeRoleFailed {
        description: String,
        role_arn: String,
        account_id: String,
        source: CredentialsError,
    },

    #[error(transparent)]
    Profile(#[from] ProfileParseError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

/// An [`Sdk`] handle plus how it was obtained
pub struct SdkForEnvironment {
    pub sdk: Sdk,
    pub did_assume_role: bool,
}

impl std::fmt::Debug for SdkForEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkForEnvironment")
            .field("did_assume_role", &self.did_assume_role)
            .finish_non_exhaustive()
    }
}

pub struct SdkProvider {
    chain: Arc<dyn ProvideCredentials>,
    default_region: String,
    sts: Arc<dyn StsOps>,
    plugins: CredentialPlugins,
    account_cache: Arc<AccountAccessKeyCache>,
    cached_default_credentials: OnceCell<Option<Credentials>>,
    cached_default_account: OnceCell<Option<Account>>,
}

impl SdkProvider {
    /// Construct a provider resolving credentials and region the way the
    /// AWS CLI does
    pub fn builder(sts: Arc<dyn StsOps>) -> SdkProviderBuilder {
        SdkProviderBuilder::new(sts)
    }

    /// Construct a provider from an already-built chain
    pub fn new(
        chain: Arc<dyn ProvideCredentials>,
        default_region: impl Into<String>,
        sts: Arc<dyn StsOps>,
        plugins: CredentialPlugins,
        account_cache: Arc<AccountAccessKeyCache>,
    ) -> Self {
        SdkProvider {
            chain,
            default_region: default_region.into(),
            sts,
            plugins,
            account_cache,
            cached_default_credentials: OnceCell::new(),
            cached_default_account: OnceCell::new(),
        }
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Replace the unknown-account and unknown-region sentinels with the
    /// defaults
    ///
    /// An unknown account with no determinable default account is fatal.
    pub async fn resolve_environment(
        &self,
        environment: &Environment,
    ) -> Result<Environment, ResolutionError> {
        let region = if environment.region == UNKNOWN_REGION {
            self.default_region.clone()
        } else {
            environment.region.clone()
        };
        let account = if environment.account == UNKNOWN_ACCOUNT {
            self.default_account()
                .await
                .ok_or(ResolutionError::CouldNotResolveDefaultAccount)?
                .account_id
        } else {
            environment.account.clone()
        };
        Ok(Environment::new(account, region))
    }

    /// The first credentials the default chain produces, resolved at most
    /// once
    ///
    /// Failure to resolve is an expected state, logged at debug level.
    pub async fn default_credentials(&self) -> Option<Credentials> {
        self.cached_default_credentials
            .get_or_init(|| async {
                match self.chain.provide_credentials().await {
                    Ok(credentials) => Some(credentials),
                    Err(err) => {
                        tracing::debug!("unable to resolve default AWS credentials: {}", err);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// The account the default credentials belong to, resolved at most once
    pub async fn default_account(&self) -> Option<Account> {
        self.cached_default_account
            .get_or_init(|| async {
                let credentials = self.default_credentials().await?;
                let sdk = Sdk::new(
                    Arc::new(credentials),
                    self.default_region.clone(),
                    self.sts.clone(),
                    self.account_cache.clone(),
                    "current credentials",
                );
                match sdk.current_account().await {
                    Ok(account) => Some(account.clone()),
                    Err(err) => {
                        tracing::debug!("unable to determine the default AWS account: {}", err);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Find base credentials for `account_id`
    ///
    /// Plugins are only consulted when the default credentials do not
    /// already match the requested account.
    pub async fn obtain_base_credentials(
        &self,
        account_id: &str,
        mode: Mode,
    ) -> Result<ObtainedCredentials, ResolutionError> {
        let default_account = self.default_account().await;
        if let Some(account) = &default_account {
            if account.account_id == account_id {
                if let Some(credentials) = self.default_credentials().await {
                    return Ok(ObtainedCredentials::CorrectDefault { credentials });
                }
            }
        }
        if let Some(found) = self.plugins.fetch_credentials_for(account_id, mode).await? {
            return Ok(ObtainedCredentials::Plugin {
                credentials: found.credentials,
                plugin_name: found.plugin_name,
            });
        }
        let unused_plugins = self.plugins.available_plugin_names();
        if let Some(account) = default_account {
            if let Some(credentials) = self.default_credentials().await {
                return Ok(ObtainedCredentials::IncorrectDefault {
                    credentials,
                    account_id: account.account_id,
                    unused_plugins,
                });
            }
        }
        Ok(ObtainedCredentials::None { unused_plugins })
    }

    /// Produce an [`Sdk`] handle for the given environment
    ///
    /// When role assumption fails but the base credentials belong to a
    /// known-good identity, falls back to the base credentials with a
    /// warning instead of failing.
    pub async fn for_environment(
        &self,
        environment: &Environment,
        mode: Mode,
        options: AssumeRoleOptions,
    ) -> Result<SdkForEnvironment, ResolutionError> {
        let environment = self.resolve_environment(environment).await?;
        let base = self.obtain_base_credentials(&environment.account, mode).await?;
        let credentials = match base.credentials().cloned() {
            Some(credentials) => credentials,
            None => {
                let unused_plugins = match base {
                    ObtainedCredentials::None { unused_plugins } => unused_plugins,
                    _ => Vec::new(),
                };
                return Err(ResolutionError::CannotObtainCredentials {
                    account_id: environment.account,
                    default_account_id: None,
                    unused_plugins,
                });
            }
        };

        let role_arn = match options.role_arn {
            Some(role_arn) => role_arn,
            None => {
                // direct use requires that the credentials actually match
                if let ObtainedCredentials::IncorrectDefault {
                    account_id,
                    unused_plugins,
                    ..
                } = &base
                {
                    return Err(ResolutionError::CannotObtainCredentials {
                        account_id: environment.account,
                        default_account_id: Some(account_id.clone()),
                        unused_plugins: unused_plugins.clone(),
                    });
                }
                return Ok(SdkForEnvironment {
                    sdk: self.sdk_with_credentials(&credentials, &environment.region, base.description()),
                    did_assume_role: false,
                });
            }
        };

        let sdk = self.with_assumed_role(
            credentials.clone(),
            &role_arn,
            options.external_id,
            &environment.region,
            base.description(),
        );
        let retrieval = sdk.force_credential_retrieval().await.map(|_| ());
        match retrieval {
            Ok(()) => Ok(SdkForEnvironment {
                sdk,
                did_assume_role: true,
            }),
            Err(err) if base.may_fall_back() => {
                tracing::debug!("assume role failed: {}", err);
                tracing::warn!(
                    "{} could not be used to assume '{}', but are for the right account. Proceeding anyway.",
                    base.description(),
                    role_arn
                );
                Ok(SdkForEnvironment {
                    sdk: self.sdk_with_credentials(&credentials, &environment.region, base.description()),
                    did_assume_role: false,
                })
            }
            Err(err) => Err(ResolutionError::AssumeRoleFailed {
                description: base.description(),
                role_arn,
                account_id: environment.account,
                source: err,
            }),
        }
    }

    /// The partition of whatever base credentials would be used for this
    /// environment, or `None` when there are none
    pub async fn base_credentials_partition(
        &self,
        environment: &Environment,
        mode: Mode,
    ) -> Result<Option<String>, ResolutionError> {
        let environment = self.resolve_environment(environment).await?;
        let base = self.obtain_base_credentials(&environment.account, mode).await?;
        let credentials = match base.credentials() {
            Some(credentials) => credentials.clone(),
            None => return Ok(None),
        };
        let sdk = self.sdk_with_credentials(&credentials, &environment.region, base.description());
        let account = sdk.current_account().await.map_err(ResolutionError::Credentials)?;
        Ok(Some(account.partition.clone()))
    }

    fn sdk_with_credentials(
        &self,
        credentials: &Credentials,
        region: &str,
        description: String,
    ) -> Sdk {
        Sdk::new(
            Arc::new(credentials.clone()),
            region,
            self.sts.clone(),
            self.account_cache.clone(),
            description,
        )
    }

    fn with_assumed_role(
        &self,
        base: Credentials,
        role_arn: &str,
        external_id: Option<String>,
        region: &str,
        description: String,
    ) -> Sdk {
        let request = AssumeRoleRequest {
            role_arn: role_arn.to_string(),
            external_id,
            session_name: session_name(),
            mfa_serial: None,
            token_code: None,
            region: region.to_string(),
        };
        Sdk::new(
            Arc::new(AssumeRoleProvider::new(self.sts.clone(), base, request)),
            region,
            self.sts.clone(),
            self.account_cache.clone(),
            description,
        )
    }
}

/// Session name for assumed roles, derived from the OS username
///
/// STS restricts session names to `[\w+=,.@-]`.
fn session_name() -> String {
    format!("aws-auth-resolver-{}", sanitize_session_name(&whoami::username()))
}

pub struct SdkProviderBuilder {
    env: Env,
    fs: Fs,
    sts: Arc<dyn StsOps>,
    imds: Option<Arc<ImdsClient>>,
    probe: Option<Arc<dyn PlatformProbe>>,
    token_code_fn: Option<TokenCodeFn>,
    plugin_sources: Vec<Arc<dyn CredentialProviderSource>>,
    account_cache: Option<AccountAccessKeyCache>,
    options: CliCompatibleOptions,
}

impl SdkProviderBuilder {
    fn new(sts: Arc<dyn StsOps>) -> Self {
        SdkProviderBuilder {
            env: Env::real(),
            fs: Fs::real(),
            sts,
            imds: None,
            probe: None,
            token_code_fn: None,
            plugin_sources: Vec::new(),
            account_cache: None,
            options: CliCompatibleOptions::default(),
        }
    }

    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn fs(mut self, fs: Fs) -> Self {
        self.fs = fs;
        self
    }

    pub fn imds(mut self, imds: Arc<ImdsClient>) -> Self {
        self.imds = Some(imds);
        self
    }

    pub fn platform_probe(mut self, probe: Arc<dyn PlatformProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn token_code_fn(mut self, token_code_fn: TokenCodeFn) -> Self {
        self.token_code_fn = Some(token_code_fn);
        self
    }

    pub fn register_plugin(mut self, source: Arc<dyn CredentialProviderSource>) -> Self {
        self.plugin_sources.push(source);
        self
    }

    pub fn account_cache(mut self, account_cache: AccountAccessKeyCache) -> Self {
        self.account_cache = Some(account_cache);
        self
    }

    pub fn options(mut self, options: CliCompatibleOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the provider, resolving the default region now
    pub async fn build(self) -> Result<SdkProvider, ProfileParseError> {
        let imds = self.imds.unwrap_or_else(|| Arc::new(ImdsClient::default()));
        let probe: Arc<dyn PlatformProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HostProbe::new(self.fs.clone())),
        };
        let compatible = AwsCliCompatible::new(
            self.env,
            self.fs,
            self.sts.clone(),
            imds,
            probe,
            self.token_code_fn,
        );
        let default_region = compatible.region(&self.options).await?;
        let chain = compatible.credential_chain(&self.options).await;
        let account_cache = self
            .account_cache
            .unwrap_or_else(AccountAccessKeyCache::default_location);
        Ok(SdkProvider::new(
            Arc::new(chain),
            default_region,
            self.sts,
            CredentialPlugins::new(self.plugin_sources),
            Arc::new(account_cache),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::credentials::{BoxFuture, CredentialsResult};
    use crate::plugin::PluginProviderResult;
    use crate::sts::CallerIdentity;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEFAULT_ACCOUNT: &str = "11111";

    struct FakeSts {
        identity_calls: AtomicUsize,
        /// access key ids allowed to assume roles
        allowed_to_assume: Vec<String>,
    }

    impl FakeSts {
        fn new(allowed_to_assume: Vec<String>) -> Self {
            FakeSts {
                identity_calls: AtomicUsize::new(0),
                allowed_to_assume,
            }
        }
    }

    #[async_trait]
    impl StsOps for FakeSts {
        async fn get_caller_identity(
            &self,
            credentials: &Credentials,
            _region: &str,
        ) -> Result<CallerIdentity, CredentialsError> {
            self.identity_calls.fetch_add(1, Ordering::SeqCst);
            // test access keys encode their account as "akid-<account>"
            let account = credentials
                .access_key_id()
                .strip_prefix("akid-")
                .unwrap_or(DEFAULT_ACCOUNT)
                .to_string();
            Ok(CallerIdentity {
                arn: format!("arn:aws:iam::{}:user/test", account),
                account,
            })
        }

        async fn assume_role(
            &self,
            credentials: &Credentials,
            request: AssumeRoleRequest,
        ) -> CredentialsResult {
            if self
                .allowed_to_assume
                .iter()
                .any(|akid| akid == credentials.access_key_id())
            {
                Ok(Credentials::new(
                    format!("akid-{}", account_of(&request.role_arn)),
                    "assumed-secret",
                    None,
                    None,
                    "AssumeRole",
                ))
            } else {
                Err(CredentialsError::ProviderError(
                    format!("{} may not assume {}", credentials.access_key_id(), request.role_arn).into(),
                ))
            }
        }

        async fn assume_role_with_web_identity(
            &self,
            _region: &str,
            _role_arn: &str,
            _session_name: &str,
            _web_identity_token: &str,
        ) -> CredentialsResult {
            unimplemented!("not exercised")
        }
    }

    fn account_of(role_arn: &str) -> String {
        role_arn.split(':').nth(4).unwrap_or("").to_string()
    }

    struct PluginSource {
        name: &'static str,
        account: &'static str,
    }

    #[async_trait]
    impl CredentialProviderSource for PluginSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn can_provide_credentials(&self, account_id: &str) -> bool {
            account_id == self.account
        }

        async fn get_provider(
            &self,
            account_id: &str,
            _mode: Mode,
        ) -> Result<PluginProviderResult, CredentialsError> {
            Ok(PluginProviderResult::Credentials(Credentials::new(
                format!("akid-{}", account_id),
                "plugin-secret",
                None,
                None,
                "Plugin",
            )))
        }
    }

    struct FailingChain;
    impl ProvideCredentials for FailingChain {
        fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
        where
            Self: 'a,
        {
            Box::pin(async { Err(CredentialsError::CredentialsNotLoaded) })
        }
    }

    fn temp_cache() -> Arc<AccountAccessKeyCache> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(AccountAccessKeyCache::new(
            dir.into_path().join("accounts_partitions.json"),
        ))
    }

    fn provider_with(
        sts: Arc<FakeSts>,
        plugin_sources: Vec<Arc<dyn CredentialProviderSource>>,
    ) -> SdkProvider {
        SdkProvider::new(
            Arc::new(Credentials::from_keys(format!("akid-{}", DEFAULT_ACCOUNT), "secret")),
            "eu-west-1",
            sts,
            CredentialPlugins::new(plugin_sources),
            temp_cache(),
        )
    }

    fn provider_without_credentials(
        sts: Arc<FakeSts>,
        plugin_sources: Vec<Arc<dyn CredentialProviderSource>>,
    ) -> SdkProvider {
        SdkProvider::new(
            Arc::new(FailingChain),
            "eu-west-1",
            sts,
            CredentialPlugins::new(plugin_sources),
            temp_cache(),
        )
    }

    #[tokio::test]
    async fn matching_default_credentials_skip_the_plugins() {
        // a plugin claiming the default account must never be consulted
        struct PanickyPlugin;
        #[async_trait]
        impl CredentialProviderSource for PanickyPlugin {
            fn name(&self) -> &str {
                "panicky"
            }
            async fn is_available(&self) -> bool {
                true
            }
            async fn can_provide_credentials(&self, _account_id: &str) -> bool {
                panic!("plugin consulted although default credentials match")
            }
            async fn get_provider(
                &self,
                _account_id: &str,
                _mode: Mode,
            ) -> Result<PluginProviderResult, CredentialsError> {
                unreachable!()
            }
        }

        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts, vec![Arc::new(PanickyPlugin)]);
        let obtained = provider
            .obtain_base_credentials(DEFAULT_ACCOUNT, Mode::ForReading)
            .await
            .unwrap();
        assert!(matches!(obtained, ObtainedCredentials::CorrectDefault { .. }));
    }

    #[tokio::test]
    async fn unclaimed_account_with_default_credentials_is_incorrect_default() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(
            sts,
            vec![Arc::new(PluginSource {
                name: "other-plugin",
                account: "33333",
            })],
        );
        match provider
            .obtain_base_credentials("22222", Mode::ForReading)
            .await
            .unwrap()
        {
            ObtainedCredentials::IncorrectDefault {
                account_id,
                unused_plugins,
                ..
            } => {
                assert_eq!(account_id, DEFAULT_ACCOUNT);
                assert_eq!(unused_plugins, vec!["other-plugin"]);
            }
            other => panic!("unexpected provenance: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unclaimed_account_without_default_credentials_is_none() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_without_credentials(sts, vec![]);
        let obtained = provider
            .obtain_base_credentials("22222", Mode::ForReading)
            .await
            .unwrap();
        assert!(matches!(obtained, ObtainedCredentials::None { .. }));
    }

    #[tokio::test]
    async fn plugin_credentials_are_used_for_other_accounts() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(
            sts,
            vec![Arc::new(PluginSource {
                name: "acme-plugin",
                account: "22222",
            })],
        );
        match provider
            .obtain_base_credentials("22222", Mode::ForReading)
            .await
            .unwrap()
        {
            ObtainedCredentials::Plugin {
                plugin_name,
                credentials,
            } => {
                assert_eq!(plugin_name, "acme-plugin");
                assert_eq!(credentials.access_key_id(), "akid-22222");
            }
            other => panic!("unexpected provenance: {:?}", other),
        }
    }

    #[tokio::test]
    async fn default_account_performs_one_identity_call() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts.clone(), vec![]);
        for _ in 0..5 {
            let account = provider.default_account().await.unwrap();
            assert_eq!(account.account_id, DEFAULT_ACCOUNT);
        }
        assert_eq!(sts.identity_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_environment_resolves_to_the_defaults() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts, vec![]);
        let resolved = provider
            .resolve_environment(&Environment::unknown())
            .await
            .unwrap();
        assert_eq!(resolved.account, DEFAULT_ACCOUNT);
        assert_eq!(resolved.region, "eu-west-1");
    }

    #[tokio::test]
    async fn unknown_account_without_default_account_is_fatal() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_without_credentials(sts, vec![]);
        let err = provider
            .resolve_environment(&Environment::unknown())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::CouldNotResolveDefaultAccount));
    }

    #[tokio::test]
    async fn assume_role_failure_falls_back_to_matching_base_credentials() {
        // nobody may assume the role, but the default credentials are for
        // the requested account, so the failure is forgiven
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts, vec![]);
        let result = provider
            .for_environment(
                &Environment::new(DEFAULT_ACCOUNT, "eu-west-1"),
                Mode::ForReading,
                AssumeRoleOptions {
                    role_arn: Some(format!("arn:aws:iam::{}:role/Reader", DEFAULT_ACCOUNT)),
                    external_id: None,
                },
            )
            .await
            .unwrap();
        assert!(!result.did_assume_role);
        let account = result.sdk.current_account().await.unwrap();
        assert_eq!(account.account_id, DEFAULT_ACCOUNT);
    }

    #[tokio::test]
    async fn assume_role_failure_with_wrong_account_credentials_is_fatal() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts, vec![]);
        let role_arn = "arn:aws:iam::88888:role/Writer";
        let err = provider
            .for_environment(
                &Environment::new("88888", "eu-west-1"),
                Mode::ForWriting,
                AssumeRoleOptions {
                    role_arn: Some(role_arn.to_string()),
                    external_id: None,
                },
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("88888"), "message was: {}", message);
        assert!(message.contains(role_arn), "message was: {}", message);
    }

    #[tokio::test]
    async fn successful_assume_role_returns_the_assumed_identity() {
        let sts = Arc::new(FakeSts::new(vec![format!("akid-{}", DEFAULT_ACCOUNT)]));
        let provider = provider_with(sts, vec![]);
        let result = provider
            .for_environment(
                &Environment::new("22222", "eu-west-1"),
                Mode::ForWriting,
                AssumeRoleOptions {
                    role_arn: Some("arn:aws:iam::22222:role/Writer".to_string()),
                    external_id: None,
                },
            )
            .await
            .unwrap();
        assert!(result.did_assume_role);
        assert_eq!(
            result.sdk.current_account().await.unwrap().account_id,
            "22222"
        );
    }

    #[tokio::test]
    async fn wrong_account_without_assume_role_is_fatal() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts, vec![]);
        let err = provider
            .for_environment(
                &Environment::new("88888", "eu-west-1"),
                Mode::ForReading,
                AssumeRoleOptions::default(),
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("88888"), "message was: {}", message);
        assert!(message.contains(DEFAULT_ACCOUNT), "message was: {}", message);
    }

    #[tokio::test]
    async fn no_credentials_anywhere_lists_the_tried_plugins() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_without_credentials(
            sts,
            vec![Arc::new(PluginSource {
                name: "acme-plugin",
                account: "33333",
            })],
        );
        let err = provider
            .for_environment(
                &Environment::new("88888", "eu-west-1"),
                Mode::ForReading,
                AssumeRoleOptions::default(),
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("no credentials have been configured"),
            "message was: {}",
            message
        );
        assert!(message.contains("acme-plugin"), "message was: {}", message);
    }

    #[tokio::test]
    async fn base_credentials_partition_comes_from_the_caller_arn() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts, vec![]);
        let partition = provider
            .base_credentials_partition(
                &Environment::new(DEFAULT_ACCOUNT, "eu-west-1"),
                Mode::ForReading,
            )
            .await
            .unwrap();
        assert_eq!(partition.as_deref(), Some("aws"));
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_default_account_resolution() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = Arc::new(provider_with(sts.clone(), vec![]));
        let lookups = (0..8).map(|_| {
            let provider = provider.clone();
            async move { provider.default_account().await }
        });
        for account in futures_util::future::join_all(lookups).await {
            assert_eq!(account.unwrap().account_id, DEFAULT_ACCOUNT);
        }
        assert_eq!(sts.identity_calls.load(Ordering::SeqCst), 1);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn fallback_to_base_credentials_is_logged_as_a_warning() {
        let sts = Arc::new(FakeSts::new(vec![]));
        let provider = provider_with(sts, vec![]);
        provider
            .for_environment(
                &Environment::new(DEFAULT_ACCOUNT, "eu-west-1"),
                Mode::ForReading,
                AssumeRoleOptions {
                    role_arn: Some(format!("arn:aws:iam::{}:role/Reader", DEFAULT_ACCOUNT)),
                    external_id: None,
                },
            )
            .await
            .unwrap();
        assert!(logs_contain("could not be used to assume"));
    }

    #[test]
    fn session_names_contain_only_allowed_characters() {
        let name = session_name();
        assert!(name.starts_with("aws-auth-resolver-"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_+=,.@-".contains(c)));
    }
}
