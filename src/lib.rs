/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! AWS credential and region resolution, the way the CLI does it
//!
//! This crate resolves "which credentials and which region should this
//! process use for account X" from the usual ambient sources: environment
//! variables, the shared config and credentials files, `credential_process`
//! helpers, container and instance metadata endpoints, web identity tokens,
//! and externally registered credential plugins. On top of the raw chain it
//! implements account targeting: ask for an account, get back a client
//! handle bound to credentials that are actually for that account, assuming
//! a role along the way if requested.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use aws_auth_resolver::{AssumeRoleOptions, Environment, Mode, SdkProvider};
//! # async fn docs(sts: Arc<dyn aws_auth_resolver::StsOps>) -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SdkProvider::builder(sts).build().await?;
//! let resolved = provider
//!     .for_environment(
//!         &Environment::new("123456789012", "eu-west-1"),
//!         Mode::ForReading,
//!         AssumeRoleOptions::default(),
//!     )
//!     .await?;
//! let credentials = resolved.sdk.credentials().await?;
//! # Ok(())
//! # }
//! ```
//!
//! All environment and filesystem access goes through [`Env`] and [`Fs`]
//! handles so that every resolution path can be tested hermetically.

pub mod account_cache;
pub mod cli_compatible;
pub mod credentials;
pub mod environment;
pub mod imds;
pub mod os_shim;
pub mod platform;
pub mod plugin;
pub mod profile;
pub mod provider;
pub mod sdk;
pub mod sts;
pub mod web_identity_token;

pub use account_cache::AccountAccessKeyCache;
pub use cli_compatible::{AwsCliCompatible, CliCompatibleOptions};
pub use credentials::{ChainProvider, Credentials, CredentialsError, ProvideCredentials};
pub use environment::{Account, Environment, UNKNOWN_ACCOUNT, UNKNOWN_REGION};
pub use os_shim::{Env, Fs};
pub use platform::PlatformProbe;
pub use plugin::{
    CredentialPlugins, CredentialProviderSource, Mode, PluginCredentials, PluginProviderResult,
};
pub use provider::{
    AssumeRoleOptions, ObtainedCredentials, ResolutionError, SdkForEnvironment, SdkProvider,
};
pub use sdk::Sdk;
pub use sts::{AssumeRoleRequest, CallerIdentity, StsOps};
