/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Profile File Based Providers
//!
//! Profiles are spread over two ini-style files: `~/.aws/credentials` holds
//! the secrets ("who") and `~/.aws/config` holds region and role
//! configuration ("where"). The config file names non-default sections
//! `profile <name>`; the credentials file does not. Because some native
//! loaders only trust one file at a time, the merged view here is built
//! independently: config entries as the base, credentials entries overlaid
//! per profile, per key.
//!
//! An absent or unreadable file is an empty profile set. A file that exists
//! but does not parse is an error; corrupt configuration is not the same
//! condition as missing configuration.

use crate::credentials::{
    BoxFuture, Credentials, CredentialsError, CredentialsResult, ProvideCredentials,
};
use crate::environment::FALLBACK_REGION;
use crate::imds::{EcsCredentialsProvider, ImdsClient};
use crate::os_shim::{Env, Fs};
use crate::sts::{default_session_name, AssumeRoleRequest, StsOps};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

const ENV_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
const ENV_CONFIG_FILE: &str = "AWS_CONFIG_FILE";

const KEY_ACCESS_KEY_ID: &str = "aws_access_key_id";
const KEY_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const KEY_SESSION_TOKEN: &str = "aws_session_token";
const KEY_ROLE_ARN: &str = "role_arn";
const KEY_SOURCE_PROFILE: &str = "source_profile";
const KEY_CREDENTIAL_SOURCE: &str = "credential_source";
const KEY_EXTERNAL_ID: &str = "external_id";
const KEY_MFA_SERIAL: &str = "mfa_serial";
const KEY_ROLE_SESSION_NAME: &str = "role_session_name";
const KEY_REGION: &str = "region";
const KEY_CREDENTIAL_PROCESS: &str = "credential_process";

/// Callback used to prompt the user for an MFA token code
pub type TokenCodeFn =
    Arc<dyn Fn(&str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

pub type Profile = HashMap<String, String>;

#[derive(Clone, Debug, Error)]
#[error("could not parse {path} on line {line}: {message}")]
pub struct ProfileParseError {
    pub path: String,
    pub line: usize,
    pub message: String,
}

impl From<ProfileParseError> for CredentialsError {
    fn from(err: ProfileParseError) -> Self {
        CredentialsError::ProviderError(err.into())
    }
}

/// The user's home directory, resolved the way the AWS CLI does
pub fn home_dir(env: &Env) -> PathBuf {
    if let Some(home) = env.get("HOME") {
        return PathBuf::from(home);
    }
    if let Some(profile) = env.get("USERPROFILE") {
        return PathBuf::from(profile);
    }
    if let Some(home_path) = env.get("HOMEPATH") {
        let drive = env.get("HOMEDRIVE").unwrap_or_else(|| "C:/".to_string());
        return PathBuf::from(format!("{}{}", drive, home_path));
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

pub fn credentials_file_name(env: &Env) -> PathBuf {
    env.get(ENV_SHARED_CREDENTIALS_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir(env).join(".aws").join("credentials"))
}

pub fn config_file_name(env: &Env) -> PathBuf {
    env.get(ENV_CONFIG_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir(env).join(".aws").join("config"))
}

fn parse_ini(
    contents: &str,
    path: &Path,
) -> Result<HashMap<String, Profile>, ProfileParseError> {
    let error = |line: usize, message: &str| ProfileParseError {
        path: path.display().to_string(),
        line,
        message: message.to_string(),
    };
    let mut sections: HashMap<String, Profile> = HashMap::new();
    let mut current: Option<String> = None;
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[') {
            let section = section
                .strip_suffix(']')
                .ok_or_else(|| error(idx + 1, "unterminated section header"))?
                .trim();
            if section.is_empty() {
                return Err(error(idx + 1, "empty section header"));
            }
            sections.entry(section.to_string()).or_default();
            current = Some(section.to_string());
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| error(idx + 1, "expected `key = value`"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(error(idx + 1, "empty property name"));
        }
        let section = current
            .as_ref()
            .ok_or_else(|| error(idx + 1, "property defined outside of a section"))?;
        sections
            .get_mut(section)
            .expect("section was inserted when entered")
            .insert(key.to_string(), value.trim().to_string());
    }
    Ok(sections)
}

/// Lazily parsed view of a single credentials or config file
///
/// Content is read and parsed at most once for the lifetime of this value;
/// a resolution session never observes a file changing underneath it.
pub struct SharedIniFile {
    filename: PathBuf,
    is_config: bool,
    fs: Fs,
    contents: OnceCell<HashMap<String, Profile>>,
}

impl SharedIniFile {
    pub fn new(filename: impl Into<PathBuf>, is_config: bool, fs: Fs) -> Self {
        SharedIniFile {
            filename: filename.into(),
            is_config,
            fs,
            contents: OnceCell::new(),
        }
    }

    /// Look up a profile section; `None` if the file or section is absent
    pub async fn get_profile(&self, name: &str) -> Result<Option<Profile>, ProfileParseError> {
        let section = if self.is_config && name != "default" {
            format!("profile {}", name)
        } else {
            name.to_string()
        };
        let parsed = self
            .contents
            .get_or_try_init(|| async {
                match self.fs.read_to_string(&self.filename) {
                    Ok(contents) => parse_ini(&contents, &self.filename),
                    // best-effort lookup layer: absent or unreadable is empty
                    Err(_) => Ok(HashMap::new()),
                }
            })
            .await?;
        Ok(parsed.get(&section).cloned())
    }
}

/// Merge all profiles from the config and credentials files
///
/// Config entries form the base (with the `profile ` section prefix
/// stripped); credentials entries are overlaid per profile, per key, so a
/// key defined in both files resolves to the credentials-file value.
pub fn merged_profiles(env: &Env, fs: &Fs) -> Result<HashMap<String, Profile>, ProfileParseError> {
    let mut profiles: HashMap<String, Profile> = HashMap::new();
    let config_file = config_file_name(env);
    if fs.exists(&config_file) {
        let contents = fs.read_to_string(&config_file).unwrap_or_default();
        for (name, profile) in parse_ini(&contents, &config_file)? {
            let name = name.strip_prefix("profile ").unwrap_or(&name).to_string();
            profiles.insert(name, profile);
        }
    }
    let credentials_file = credentials_file_name(env);
    if fs.exists(&credentials_file) {
        let contents = fs.read_to_string(&credentials_file).unwrap_or_default();
        for (name, profile) in parse_ini(&contents, &credentials_file)? {
            let merged = profiles.entry(name).or_default();
            for (key, value) in profile {
                merged.insert(key, value);
            }
        }
    }
    Ok(profiles)
}

fn static_credentials(profile: &Profile) -> Option<Credentials> {
    let access_key_id = profile.get(KEY_ACCESS_KEY_ID)?;
    let secret_access_key = profile.get(KEY_SECRET_ACCESS_KEY)?;
    Some(Credentials::new(
        access_key_id,
        secret_access_key,
        profile.get(KEY_SESSION_TOKEN).cloned(),
        None,
        "Profile",
    ))
}

/// Credentials from a named profile
///
/// Supports static keys, and role profiles (`role_arn` plus exactly one of
/// `source_profile` / `credential_source`) including `mfa_serial` prompting.
pub struct ProfileCredentialsProvider {
    profile: String,
    env: Env,
    fs: Fs,
    sts: Arc<dyn StsOps>,
    imds: Arc<ImdsClient>,
    token_code_fn: Option<TokenCodeFn>,
}

impl ProfileCredentialsProvider {
    pub fn new(
        profile: impl Into<String>,
        env: Env,
        fs: Fs,
        sts: Arc<dyn StsOps>,
        imds: Arc<ImdsClient>,
        token_code_fn: Option<TokenCodeFn>,
    ) -> Self {
        ProfileCredentialsProvider {
            profile: profile.into(),
            env,
            fs,
            sts,
            imds,
            token_code_fn,
        }
    }

    async fn credentials(&self) -> CredentialsResult {
        let profiles = merged_profiles(&self.env, &self.fs)?;
        let profile = profiles
            .get(&self.profile)
            .ok_or(CredentialsError::CredentialsNotLoaded)?;
        if profile.contains_key(KEY_ROLE_ARN) {
            return self.assume_role_from_profile(&profiles, profile).await;
        }
        static_credentials(profile).ok_or(CredentialsError::CredentialsNotLoaded)
    }

    async fn assume_role_from_profile(
        &self,
        profiles: &HashMap<String, Profile>,
        profile: &Profile,
    ) -> CredentialsResult {
        let role_arn = profile
            .get(KEY_ROLE_ARN)
            .expect("caller checked role_arn is present");
        let source_profile = profile.get(KEY_SOURCE_PROFILE);
        let credential_source = profile.get(KEY_CREDENTIAL_SOURCE);
        if source_profile.is_some() == credential_source.is_some() {
            return Err(CredentialsError::InvalidConfiguration(
                format!(
                    "when using '{}' in profile '{}', you must also configure exactly one of '{}' or '{}'",
                    KEY_ROLE_ARN, self.profile, KEY_SOURCE_PROFILE, KEY_CREDENTIAL_SOURCE
                )
                .into(),
            ));
        }

        let base_credentials = match (source_profile, credential_source) {
            (Some(source), None) => self.source_profile_credentials(profiles, source)?,
            (None, Some(source)) => self.credential_source_credentials(source).await?,
            _ => unreachable!("exactly one is present"),
        };

        // the role profile's region wins, then the default profile's
        let region = profile
            .get(KEY_REGION)
            .or_else(|| profiles.get("default").and_then(|p| p.get(KEY_REGION)))
            .cloned()
            .unwrap_or_else(|| FALLBACK_REGION.to_string());

        let mfa_serial = profile.get(KEY_MFA_SERIAL);
        let token_code = match (mfa_serial, &self.token_code_fn) {
            (Some(serial), Some(prompt)) => {
                tracing::debug!(serial, "MFA token required for role profile");
                let token = prompt(serial).map_err(|err| {
                    CredentialsError::ProviderError(
                        format!("error fetching MFA token: {}", err).into(),
                    )
                })?;
                Some(token)
            }
            _ => None,
        };

        let session_name = profile
            .get(KEY_ROLE_SESSION_NAME)
            .cloned()
            .unwrap_or_else(|| default_session_name("profile"));
        let request = AssumeRoleRequest {
            role_arn: role_arn.clone(),
            external_id: profile.get(KEY_EXTERNAL_ID).cloned(),
            session_name,
            mfa_serial: mfa_serial.cloned(),
            token_code,
            region,
        };
        self.sts.assume_role(&base_credentials, request).await
    }

    fn source_profile_credentials(
        &self,
        profiles: &HashMap<String, Profile>,
        source: &str,
    ) -> CredentialsResult {
        let source_profile = profiles.get(source).ok_or_else(|| {
            CredentialsError::InvalidConfiguration(
                format!(
                    "source_profile '{}' used by profile '{}' does not exist",
                    source, self.profile
                )
                .into(),
            )
        })?;
        // prefer static keys even if the source profile is itself a role profile
        static_credentials(source_profile).ok_or_else(|| {
            CredentialsError::InvalidConfiguration(
                format!(
                    "source_profile '{}' used by profile '{}' does not contain credentials",
                    source, self.profile
                )
                .into(),
            )
        })
    }

    async fn credential_source_credentials(&self, source: &str) -> CredentialsResult {
        match source {
            "Environment" => {
                crate::credentials::EnvironmentVariableCredentialsProvider::new_with_env(
                    self.env.clone(),
                    "AWS",
                )
                .provide_credentials()
                .await
            }
            "Ec2InstanceMetadata" => self.imds.credentials().await,
            "EcsContainer" => {
                EcsCredentialsProvider::new(self.env.clone())
                    .provide_credentials()
                    .await
            }
            unsupported => Err(CredentialsError::InvalidConfiguration(
                format!(
                    "credential_source {} in profile {} is unsupported. choose one of [Environment, Ec2InstanceMetadata, EcsContainer]",
                    unsupported, self.profile
                )
                .into(),
            )),
        }
    }
}

impl ProvideCredentials for ProfileCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(self.credentials())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessOutput {
    version: u32,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expiration: Option<String>,
}

/// Credentials produced by a profile's `credential_process` command
pub struct ProcessCredentialsProvider {
    profile: String,
    env: Env,
    fs: Fs,
}

impl ProcessCredentialsProvider {
    pub fn new(profile: impl Into<String>, env: Env, fs: Fs) -> Self {
        ProcessCredentialsProvider {
            profile: profile.into(),
            env,
            fs,
        }
    }

    async fn credentials(&self) -> CredentialsResult {
        let profiles = merged_profiles(&self.env, &self.fs)?;
        let command = profiles
            .get(&self.profile)
            .and_then(|profile| profile.get(KEY_CREDENTIAL_PROCESS))
            .ok_or(CredentialsError::CredentialsNotLoaded)?
            .clone();
        tracing::debug!(profile = %self.profile, "running credential_process");
        let output = command_for(&command)
            .output()
            .await
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        if !output.status.success() {
            return Err(CredentialsError::ProviderError(
                format!(
                    "credential_process exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )
                .into(),
            ));
        }
        let parsed: ProcessOutput = serde_json::from_slice(&output.stdout)
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        if parsed.version != 1 {
            return Err(CredentialsError::InvalidConfiguration(
                format!(
                    "unsupported credential_process output version {}",
                    parsed.version
                )
                .into(),
            ));
        }
        let expiry = match &parsed.expiration {
            Some(raw) => Some(
                time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
                    .map(std::time::SystemTime::from)
                    .map_err(|err| {
                        CredentialsError::ProviderError(
                            format!("invalid credential_process expiration: {}", err).into(),
                        )
                    })?,
            ),
            None => None,
        };
        Ok(Credentials::new(
            parsed.access_key_id,
            parsed.secret_access_key,
            parsed.session_token,
            expiry,
            "Process",
        ))
    }
}

#[cfg(not(windows))]
fn command_for(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn command_for(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

impl ProvideCredentials for ProcessCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(self.credentials())
    }
}
