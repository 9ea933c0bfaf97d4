/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! Logical deployment environments (account + region)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel account value that must be resolved before use
pub const UNKNOWN_ACCOUNT: &str = "unknown-account";

/// Sentinel region value that must be resolved before use
pub const UNKNOWN_REGION: &str = "unknown-region";

/// The region used when nothing else determines one (what the AWS CLI does)
pub const FALLBACK_REGION: &str = "us-east-1";

/// A logical (account, region) target
///
/// Either coordinate may hold its `UNKNOWN_*` sentinel, in which case it
/// must be resolved against ambient configuration before any client is
/// built for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    pub account: String,
    pub region: String,
}

impl Environment {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Environment {
            account: account.into(),
            region: region.into(),
        }
    }

    /// An environment with both coordinates unknown
    pub fn unknown() -> Self {
        Environment::new(UNKNOWN_ACCOUNT, UNKNOWN_REGION)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aws://{}/{}", self.account, self.region)
    }
}

/// An AWS account together with the partition it lives in
///
/// The partition is tracked because ARN construction differs between
/// partitions (`aws`, `aws-cn`, `aws-us-gov`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "accountId")]
    pub account_id: String,
    pub partition: String,
}

impl Account {
    pub fn new(account_id: impl Into<String>, partition: impl Into<String>) -> Self {
        Account {
            account_id: account_id.into(),
            partition: partition.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn environment_display() {
        let env = Environment::new("11111", "eu-bla-5");
        assert_eq!(format!("{}", env), "aws://11111/eu-bla-5");
    }

    #[test]
    fn account_json_shape() {
        let account = Account::new("11111", "aws");
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, r#"{"accountId":"11111","partition":"aws"}"#);
    }
}
