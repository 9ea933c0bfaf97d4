/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

//! EC2 instance detection
//!
//! Whether the process runs on EC2 determines if the instance metadata
//! service is worth probing at all; probing it from anywhere else stalls
//! resolution until the connect timeout fires. Detection never fails: any
//! read or exec error simply means "not an EC2 instance".

use crate::os_shim::Fs;
use async_trait::async_trait;

/// Platform detection seam
///
/// One implementation per OS family; the resolution logic itself never
/// branches on the platform.
#[async_trait]
pub trait PlatformProbe: Send + Sync {
    async fn is_cloud_instance(&self) -> bool;
}

/// Detects EC2 by inspecting the host
///
/// On Windows this shells out to `wmic` and looks for an `EC2`-prefixed
/// system UUID. Elsewhere it reads the Xen hypervisor UUID (pre-5th gen
/// instances), then the DMI system vendor string (5th gen and later;
/// `product_uuid` would also work but requires root to read).
pub struct HostProbe {
    fs: Fs,
}

impl HostProbe {
    pub fn new(fs: Fs) -> Self {
        HostProbe { fs }
    }

    #[cfg(not(windows))]
    async fn detect(&self) -> bool {
        let checks: [(&str, fn(&str) -> bool); 2] = [
            ("/sys/hypervisor/uuid", starts_with_ec2),
            ("/sys/devices/virtual/dmi/id/sys_vendor", contains_ec2),
        ];
        for (path, matches) in checks {
            match self.fs.read_to_string(path) {
                Ok(contents) if matches(&contents) => return true,
                _ => continue,
            }
        }
        false
    }

    #[cfg(windows)]
    async fn detect(&self) -> bool {
        let output = tokio::process::Command::new("wmic")
            .args(["path", "win32_computersystemproduct", "get", "uuid"])
            .output()
            .await;
        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .lines()
                .any(|line| starts_with_ec2(line)),
            Err(_) => false,
        }
    }
}

fn starts_with_ec2(s: &str) -> bool {
    s.trim().to_ascii_lowercase().starts_with("ec2")
}

#[cfg(not(windows))]
fn contains_ec2(s: &str) -> bool {
    s.to_ascii_lowercase().contains("ec2")
}

#[async_trait]
impl PlatformProbe for HostProbe {
    async fn is_cloud_instance(&self) -> bool {
        self.detect().await
    }
}

/// A probe with a fixed answer, for tests and for callers that already know
pub struct FixedProbe(pub bool);

#[async_trait]
impl PlatformProbe for FixedProbe {
    async fn is_cloud_instance(&self) -> bool {
        self.0
    }
}
