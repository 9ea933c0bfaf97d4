/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! The STS seam
//!
//! Resolution needs exactly three remote operations: an identity lookup, a
//! role assumption, and a web-identity role assumption. The wire protocol is
//! not this crate's concern; callers inject an implementation of [`StsOps`]
//! backed by whatever STS client they use, and tests inject stubs.

use crate::credentials::{Credentials, CredentialsError, CredentialsResult};
use async_trait::async_trait;

/// Result of a `GetCallerIdentity` call, restricted to the fields consumed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

impl CallerIdentity {
    /// The partition encoded in the caller ARN (`arn:<partition>:...`)
    pub fn partition(&self) -> Option<&str> {
        self.arn.split(':').nth(1).filter(|p| !p.is_empty())
    }
}

/// Parameters for a single `AssumeRole` call
///
/// Built immediately before the call and never persisted.
#[derive(Clone, Debug)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub external_id: Option<String>,
    pub session_name: String,
    pub mfa_serial: Option<String>,
    pub token_code: Option<String>,
    pub region: String,
}

/// The STS operations consumed by the resolution engine
#[async_trait]
pub trait StsOps: Send + Sync {
    async fn get_caller_identity(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> Result<CallerIdentity, CredentialsError>;

    async fn assume_role(
        &self,
        credentials: &Credentials,
        request: AssumeRoleRequest,
    ) -> CredentialsResult;

    async fn assume_role_with_web_identity(
        &self,
        region: &str,
        role_arn: &str,
        session_name: &str,
        web_identity_token: &str,
    ) -> CredentialsResult;
}

/// Replace characters STS does not allow in a role session name with `@`
///
/// The allowed set is `[\w+=,.@-]`.
pub fn sanitize_session_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '=' | ',' | '.' | '@' | '-') {
                c
            } else {
                '@'
            }
        })
        .collect()
}

/// A session name for callers that did not configure one
pub fn default_session_name(base: &str) -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{}", base, millis)
}
