/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Behaviors to match the AWS CLI
//!
//! The CLI and the various SDKs disagree on the details of credential and
//! region resolution. This module reproduces the CLI's documented rules:
//!
//! 1. An explicitly requested profile is used to the exclusion of every
//!    ambient source (except that profile's own `credential_process`).
//! 2. EC2 instance credentials are only consulted when the host actually
//!    looks like an EC2 instance; probing the metadata endpoint elsewhere
//!    leads to long delays.
//! 3. `$AWS_SHARED_CREDENTIALS_FILE` and `$AWS_DEFAULT_PROFILE` are
//!    respected in addition to the better-known variable names.

use crate::credentials::{ChainProvider, EnvironmentVariableCredentialsProvider};
use crate::environment::FALLBACK_REGION;
use crate::imds::{has_ecs_credentials, EcsCredentialsProvider, ImdsClient, ImdsCredentialsProvider};
use crate::os_shim::{Env, Fs};
use crate::platform::PlatformProbe;
use crate::profile::{
    config_file_name, credentials_file_name, ProcessCredentialsProvider,
    ProfileCredentialsProvider, ProfileParseError, SharedIniFile, TokenCodeFn,
};
use crate::sts::StsOps;
use crate::web_identity_token::{has_web_identity_credentials, WebIdentityTokenCredentialProvider};
use std::sync::Arc;
use tokio::sync::OnceCell;

const ENV_PROFILE: &str = "AWS_PROFILE";
const ENV_DEFAULT_PROFILE: &str = "AWS_DEFAULT_PROFILE";
const ENV_REGION_VARS: [&str; 4] = [
    "AWS_REGION",
    "AMAZON_REGION",
    "AWS_DEFAULT_REGION",
    "AMAZON_DEFAULT_REGION",
];

/// Options accepted by [`AwsCliCompatible`]
///
/// `ec2_instance` and `container_credentials` override auto-detection when
/// set; `None` means "detect".
#[derive(Clone, Default)]
pub struct CliCompatibleOptions {
    pub profile: Option<String>,
    pub ec2_instance: Option<bool>,
    pub container_credentials: Option<bool>,
}

/// Builds AWS CLI-compatible credential chains and resolves the region
///
/// Holds the per-session memoized state (the EC2 detection result) so that
/// repeated resolutions do not repeat the probe.
pub struct AwsCliCompatible {
    env: Env,
    fs: Fs,
    sts: Arc<dyn StsOps>,
    imds: Arc<ImdsClient>,
    probe: Arc<dyn PlatformProbe>,
    token_code_fn: Option<TokenCodeFn>,
    ec2_detection: OnceCell<bool>,
}

impl AwsCliCompatible {
    pub fn new(
        env: Env,
        fs: Fs,
        sts: Arc<dyn StsOps>,
        imds: Arc<ImdsClient>,
        probe: Arc<dyn PlatformProbe>,
        token_code_fn: Option<TokenCodeFn>,
    ) -> Self {
        AwsCliCompatible {
            env,
            fs,
            sts,
            imds,
            probe,
            token_code_fn,
            ec2_detection: OnceCell::new(),
        }
    }

    fn profile_provider(&self, profile: &str) -> ProfileCredentialsProvider {
        ProfileCredentialsProvider::new(
            profile,
            self.env.clone(),
            self.fs.clone(),
            self.sts.clone(),
            self.imds.clone(),
            self.token_code_fn.clone(),
        )
    }

    /// Build the credential provider chain
    ///
    /// An explicitly requested profile is exclusive: only that profile and
    /// its `credential_process` are consulted. Otherwise environment
    /// variables come first, then the implicit profile (if a credentials
    /// file exists on disk), then at most one of container, web-identity or
    /// instance-metadata credentials.
    pub async fn credential_chain(&self, options: &CliCompatibleOptions) -> ChainProvider {
        if let Some(profile) = &options.profile {
            return ChainProvider::first_try("Profile", self.profile_provider(profile)).or_else(
                "Process",
                ProcessCredentialsProvider::new(profile, self.env.clone(), self.fs.clone()),
            );
        }

        let implicit_profile = self
            .env
            .get(ENV_PROFILE)
            .or_else(|| self.env.get(ENV_DEFAULT_PROFILE))
            .unwrap_or_else(|| "default".to_string());

        let mut chain = ChainProvider::first_try(
            "Environment",
            EnvironmentVariableCredentialsProvider::new_with_env(self.env.clone(), "AWS"),
        )
        .or_else(
            "Environment(AMAZON)",
            EnvironmentVariableCredentialsProvider::new_with_env(self.env.clone(), "AMAZON"),
        );

        if self.fs.exists(credentials_file_name(&self.env)) {
            chain = chain
                .or_else("Profile", self.profile_provider(&implicit_profile))
                .or_else(
                    "Process",
                    ProcessCredentialsProvider::new(
                        &implicit_profile,
                        self.env.clone(),
                        self.fs.clone(),
                    ),
                );
        }

        // at most one of these three; ECS and EKS pods run on EC2 boxes but
        // the instance role is not the credentials they should use
        if options
            .container_credentials
            .unwrap_or_else(|| has_ecs_credentials(&self.env))
        {
            chain = chain.or_else("EcsContainer", EcsCredentialsProvider::new(self.env.clone()));
        } else if has_web_identity_credentials(&self.env) {
            chain = chain.or_else(
                "WebIdentityToken",
                WebIdentityTokenCredentialProvider::new(
                    self.env.clone(),
                    self.fs.clone(),
                    self.sts.clone(),
                    self.region_env_override()
                        .unwrap_or_else(|| FALLBACK_REGION.to_string()),
                ),
            );
        } else if match options.ec2_instance {
            Some(forced) => forced,
            None => self.is_ec2_instance().await,
        } {
            chain = chain.or_else(
                "Ec2InstanceMetadata",
                ImdsCredentialsProvider::new(self.imds.clone()),
            );
        }
        chain
    }

    fn region_env_override(&self) -> Option<String> {
        ENV_REGION_VARS.iter().find_map(|var| self.env.get(var))
    }

    /// Resolve the region the way the AWS CLI does
    ///
    /// Never fails for want of configuration; the hard-coded default is used
    /// (and logged) when nothing else determines a region.
    pub async fn region(&self, options: &CliCompatibleOptions) -> Result<String, ProfileParseError> {
        let profile = options
            .profile
            .clone()
            .or_else(|| self.env.get(ENV_PROFILE))
            .or_else(|| self.env.get(ENV_DEFAULT_PROFILE))
            .unwrap_or_else(|| "default".to_string());

        if let Some(region) = self.region_env_override() {
            return Ok(region);
        }

        let to_check = [
            (credentials_file_name(&self.env), false, profile.as_str()),
            (config_file_name(&self.env), true, profile.as_str()),
            (config_file_name(&self.env), true, "default"),
        ];
        for (filename, is_config, profile_name) in to_check {
            if !self.fs.exists(&filename) {
                continue;
            }
            let file = SharedIniFile::new(filename, is_config, self.fs.clone());
            if let Some(section) = file.get_profile(profile_name).await? {
                if let Some(region) = section.get("region") {
                    return Ok(region.clone());
                }
            }
        }

        let on_ec2 = match options.ec2_instance {
            Some(forced) => forced,
            None => self.is_ec2_instance().await,
        };
        if on_ec2 {
            tracing::debug!("looking up the AWS region in the instance metadata service");
            match self.imds.region().await {
                Ok(region) => return Ok(region),
                Err(err) => {
                    tracing::debug!("unable to retrieve the AWS region from IMDS: {}", err);
                }
            }
        }

        tracing::debug!(
            profile = %profile,
            "unable to determine the AWS region from the environment or configuration, \
             defaulting to '{}'",
            FALLBACK_REGION
        );
        Ok(FALLBACK_REGION.to_string())
    }

    /// Whether this process runs on an EC2 instance, probed at most once
    pub async fn is_ec2_instance(&self) -> bool {
        *self
            .ec2_detection
            .get_or_init(|| async {
                tracing::debug!("determining if this host is an EC2 instance");
                let detected = self.probe.is_cloud_instance().await;
                if detected {
                    tracing::debug!("looks like an EC2 instance");
                } else {
                    tracing::debug!("does not look like an EC2 instance");
                }
                detected
            })
            .await
    }
}
