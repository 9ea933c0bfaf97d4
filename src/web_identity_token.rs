/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Web Identity Token Credential Provider
//!
//! Used on EKS, where a service account mounts an OIDC token file and the
//! `AWS_ROLE_ARN` / `AWS_WEB_IDENTITY_TOKEN_FILE` variables point at it.

use crate::credentials::{BoxFuture, CredentialsError, CredentialsResult, ProvideCredentials};
use crate::os_shim::{Env, Fs};
use crate::sts::{default_session_name, StsOps};
use std::sync::Arc;

const ENV_VAR_TOKEN_FILE: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";
const ENV_VAR_ROLE_ARN: &str = "AWS_ROLE_ARN";
const ENV_VAR_SESSION_NAME: &str = "AWS_ROLE_SESSION_NAME";

/// Whether web-identity credentials look configured for this process
pub fn has_web_identity_credentials(env: &Env) -> bool {
    env.get(ENV_VAR_ROLE_ARN).is_some() && env.get(ENV_VAR_TOKEN_FILE).is_some()
}

pub struct WebIdentityTokenCredentialProvider {
    env: Env,
    fs: Fs,
    sts: Arc<dyn StsOps>,
    region: String,
}

impl WebIdentityTokenCredentialProvider {
    pub fn new(env: Env, fs: Fs, sts: Arc<dyn StsOps>, region: impl Into<String>) -> Self {
        WebIdentityTokenCredentialProvider {
            env,
            fs,
            sts,
            region: region.into(),
        }
    }

    async fn credentials(&self) -> CredentialsResult {
        let token_file = self
            .env
            .get(ENV_VAR_TOKEN_FILE)
            .ok_or(CredentialsError::CredentialsNotLoaded)?;
        let role_arn = self.env.get(ENV_VAR_ROLE_ARN).ok_or_else(|| {
            CredentialsError::InvalidConfiguration(
                "AWS_ROLE_ARN environment variable must be set".into(),
            )
        })?;
        let token = self
            .fs
            .read_to_string(&token_file)
            .map_err(|err| CredentialsError::ProviderError(err.into()))?;
        let session_name = self
            .env
            .get(ENV_VAR_SESSION_NAME)
            .unwrap_or_else(|| default_session_name("web-identity-token"));
        self.sts
            .assume_role_with_web_identity(&self.region, &role_arn, &session_name, token.trim())
            .await
    }
}

impl ProvideCredentials for WebIdentityTokenCredentialProvider {
    fn provide_credentials<'a>(&'a self) -> BoxFuture<'a, CredentialsResult>
    where
        Self: 'a,
    {
        Box::pin(self.credentials())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::credentials::Credentials;
    use crate::sts::{AssumeRoleRequest, CallerIdentity};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubSts;

    #[async_trait]
    impl StsOps for StubSts {
        async fn get_caller_identity(
            &self,
            _credentials: &Credentials,
            _region: &str,
        ) -> Result<CallerIdentity, CredentialsError> {
            unimplemented!("not used by this provider")
        }

        async fn assume_role(
            &self,
            _credentials: &Credentials,
            _request: AssumeRoleRequest,
        ) -> CredentialsResult {
            unimplemented!("not used by this provider")
        }

        async fn assume_role_with_web_identity(
            &self,
            region: &str,
            role_arn: &str,
            _session_name: &str,
            web_identity_token: &str,
        ) -> CredentialsResult {
            assert_eq!(region, "us-east-1");
            assert_eq!(role_arn, "arn:aws:iam::123456789123:role/test-role");
            assert_eq!(web_identity_token, "a-token");
            Ok(Credentials::new(
                "AKIDTEST",
                "SECRETKEYTEST",
                Some("SESSIONTOKEN_TEST".to_string()),
                None,
                "WebIdentityToken",
            ))
        }
    }

    #[tokio::test]
    async fn e2e_test() {
        let env = Env::from_slice(&[
            (ENV_VAR_TOKEN_FILE, "/token.jwt"),
            (ENV_VAR_ROLE_ARN, "arn:aws:iam::123456789123:role/test-role"),
            (ENV_VAR_SESSION_NAME, "test-session"),
        ]);
        let mut files = HashMap::new();
        files.insert("/token.jwt", "a-token\n");
        let provider = WebIdentityTokenCredentialProvider::new(
            env,
            Fs::from_map(files),
            Arc::new(StubSts),
            "us-east-1",
        );
        let creds = provider.credentials().await.expect("valid creds");
        assert_eq!(creds.access_key_id(), "AKIDTEST");
        assert_eq!(creds.secret_access_key(), "SECRETKEYTEST");
        assert_eq!(creds.session_token(), Some("SESSIONTOKEN_TEST"));
    }

    #[tokio::test]
    async fn unloaded_provider() {
        let provider = WebIdentityTokenCredentialProvider::new(
            Env::from_slice(&[]),
            Fs::from_map(HashMap::<&str, &str>::new()),
            Arc::new(StubSts),
            "us-east-1",
        );
        let err = provider
            .credentials()
            .await
            .expect_err("should fail, provider not loaded");
        assert!(matches!(err, CredentialsError::CredentialsNotLoaded));
    }

    #[tokio::test]
    async fn missing_role_arn_is_invalid_configuration() {
        let env = Env::from_slice(&[(ENV_VAR_TOKEN_FILE, "/token.jwt")]);
        let provider = WebIdentityTokenCredentialProvider::new(
            env,
            Fs::from_map(HashMap::<&str, &str>::new()),
            Arc::new(StubSts),
            "us-east-1",
        );
        let err = provider
            .credentials()
            .await
            .expect_err("should fail, role arn missing");
        assert!(format!("{}", err).contains("AWS_ROLE_ARN"));
        assert!(matches!(err, CredentialsError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn fs_missing_file() {
        let env = Env::from_slice(&[
            (ENV_VAR_TOKEN_FILE, "/token.jwt"),
            (ENV_VAR_ROLE_ARN, "arn:aws:iam::123456789123:role/test-role"),
        ]);
        let provider = WebIdentityTokenCredentialProvider::new(
            env,
            Fs::from_map(HashMap::<&str, &str>::new()),
            Arc::new(StubSts),
            "us-east-1",
        );
        let err = provider.credentials().await.expect_err("no JWT token");
        assert!(matches!(err, CredentialsError::ProviderError(_)));
    }
}
