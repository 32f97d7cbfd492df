/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Platform integration seams.
//!
//! Everything boom needs to learn from the running system goes through
//! the [`PlatformProbe`] trait: LVM2 device naming, Stratis pool
//! lookup, the bootloader environment, and file system type detection.
//! The default implementation shells out to the usual system tools and
//! degrades to empty answers where the contract allows; [`TestProbe`]
//! returns canned data.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;

use crate::error::{BoomError, Result};

/// LVM2 device-mapper UUID prefix.
const LVM_UUID_PREFIX: &str = "LVM-";

/// Prefix of Stratis file system symlink paths.
pub const STRATIS_DEV_PREFIX: &str = "/dev/stratis/";

/// Access to platform state that lives outside the boot file system.
pub trait PlatformProbe {
    /// Return the `"vg/lv"` name for the LVM2 logical volume at
    /// `dev_path`, or the empty string on any error.
    fn lv_of_path(&self, dev_path: &str) -> String;

    /// Return `true` if `dev_path` is an LVM2 device-mapper device,
    /// or `false` on any error.
    fn is_lvm_path(&self, dev_path: &str) -> bool;

    /// Return the pool UUID for the Stratis file system symlink at
    /// `link_path`.
    fn stratis_pool_uuid_of_path(&self, link_path: &str) -> Result<String>;

    /// Return the value of a bootloader environment variable, or the
    /// empty string on any error.
    fn grub_env(&self, name: &str) -> String;

    /// Return the file system type of `dev`.
    fn detect_fstype(&self, dev: &str) -> Result<String>;
}

/// Return `true` if `dev_path` names a device below the Stratis
/// device namespace.
pub fn is_stratis_device_path(dev_path: &str) -> bool {
    dev_path.starts_with(STRATIS_DEV_PREFIX)
}

/// Split a `/dev/stratis/<pool>/<fs>` path into its pool and file
/// system names.
pub fn stratis_pool_and_fs(link_path: &str) -> Result<(String, String)> {
    let rest = link_path
        .strip_prefix(STRATIS_DEV_PREFIX)
        .ok_or_else(|| BoomError::Cache(format!("'{link_path}' is not a Stratis path")))?;
    let mut parts = rest.split('/');
    match (parts.next(), parts.next()) {
        (Some(pool), Some(fs)) if !pool.is_empty() && !fs.is_empty() => {
            Ok((pool.to_string(), fs.to_string()))
        }
        _ => Err(BoomError::Cache(format!(
            "malformed Stratis path: '{link_path}'"
        ))),
    }
}

/// The default probe: shells out to the system tools.
#[derive(Debug, Default)]
pub struct HostProbe;

fn run_quiet(cmd: &str, args: &[&str]) -> Option<std::process::Output> {
    let output = Command::new(cmd).args(args).env("LC_ALL", "C").output();
    match output {
        Ok(output) => Some(output),
        Err(e) => {
            log::debug!("could not execute {cmd}: {e}");
            None
        }
    }
}

impl PlatformProbe for HostProbe {
    fn lv_of_path(&self, dev_path: &str) -> String {
        let Some(output) = run_quiet(
            "lvs",
            &["--noheadings", "--options", "vg_name,lv_name", dev_path],
        ) else {
            return String::new();
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("not found") {
                log::debug!("error calling lvs for '{dev_path}': {}", stderr.trim());
            }
            return String::new();
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut fields = stdout.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(vg), Some(lv)) => format!("{vg}/{lv}"),
            _ => String::new(),
        }
    }

    fn is_lvm_path(&self, dev_path: &str) -> bool {
        if dev_path.is_empty() || !std::path::Path::new(dev_path).exists() {
            return false;
        }
        let Some(output) = run_quiet(
            "dmsetup",
            &[
                "info",
                "--noheadings",
                "--columns",
                "--options",
                "uuid",
                dev_path,
            ],
        ) else {
            return false;
        };
        if !output.status.success() {
            return false;
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .starts_with(LVM_UUID_PREFIX)
    }

    fn stratis_pool_uuid_of_path(&self, link_path: &str) -> Result<String> {
        let (pool, _fs) = stratis_pool_and_fs(link_path)?;
        log::debug!("looking up pool UUID for Stratis symlink '{link_path}'");
        let output = run_quiet("stratis", &["report"])
            .ok_or_else(|| BoomError::Cache("could not execute stratis".to_string()))?;
        if !output.status.success() {
            return Err(BoomError::Cache(format!(
                "stratis report failed for pool '{pool}'"
            )));
        }
        let report: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| BoomError::Cache(format!("malformed stratis report: {e}")))?;
        let pools = report
            .get("pools")
            .and_then(|p| p.as_array())
            .ok_or_else(|| BoomError::Cache("malformed stratis report".to_string()))?;
        for entry in pools {
            if entry.get("name").and_then(|n| n.as_str()) == Some(pool.as_str()) {
                if let Some(uuid) = entry.get("uuid").and_then(|u| u.as_str()) {
                    return Ok(uuid.to_string());
                }
            }
        }
        Err(BoomError::Cache(format!("Stratis pool '{pool}' not found")))
    }

    fn grub_env(&self, name: &str) -> String {
        let Some(output) = run_quiet("grub2-editenv", &["list"]) else {
            return String::new();
        };
        if !output.status.success() {
            log::debug!("could not obtain grub2 environment");
            return String::new();
        }
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if let Some((env_name, value)) = line.split_once('=') {
                if env_name == name {
                    return value.trim().to_string();
                }
            }
        }
        String::new()
    }

    fn detect_fstype(&self, dev: &str) -> Result<String> {
        let output = run_quiet("blkid", &[dev])
            .ok_or_else(|| BoomError::Mount("could not execute blkid".to_string()))?;
        if !output.status.success() {
            return Err(BoomError::Mount(format!(
                "could not determine fstype for {dev}"
            )));
        }
        for tag in String::from_utf8_lossy(&output.stdout).split_whitespace() {
            if let Some(fstype) = tag.strip_prefix("TYPE=") {
                return Ok(fstype.trim_matches('"').to_string());
            }
        }
        Err(BoomError::Mount(format!(
            "could not determine fstype for {dev}"
        )))
    }
}

/// A probe returning canned data, for tests.
#[derive(Debug, Default)]
pub struct TestProbe {
    grub_env: BTreeMap<String, String>,
    lvs: BTreeMap<String, String>,
    lvm_paths: BTreeSet<String>,
    stratis_pools: BTreeMap<String, String>,
    fstypes: BTreeMap<String, String>,
}

impl TestProbe {
    pub fn with_grub_env(mut self, name: &str, value: &str) -> Self {
        self.grub_env.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_lv(mut self, dev_path: &str, vg_lv: &str) -> Self {
        self.lvs.insert(dev_path.to_string(), vg_lv.to_string());
        self.lvm_paths.insert(dev_path.to_string());
        self
    }

    pub fn with_stratis_pool(mut self, pool: &str, uuid: &str) -> Self {
        self.stratis_pools.insert(pool.to_string(), uuid.to_string());
        self
    }

    pub fn with_fstype(mut self, dev: &str, fstype: &str) -> Self {
        self.fstypes.insert(dev.to_string(), fstype.to_string());
        self
    }
}

impl PlatformProbe for TestProbe {
    fn lv_of_path(&self, dev_path: &str) -> String {
        self.lvs.get(dev_path).cloned().unwrap_or_default()
    }

    fn is_lvm_path(&self, dev_path: &str) -> bool {
        self.lvm_paths.contains(dev_path)
    }

    fn stratis_pool_uuid_of_path(&self, link_path: &str) -> Result<String> {
        let (pool, _fs) = stratis_pool_and_fs(link_path)?;
        self.stratis_pools
            .get(&pool)
            .cloned()
            .ok_or_else(|| BoomError::Cache(format!("Stratis pool '{pool}' not found")))
    }

    fn grub_env(&self, name: &str) -> String {
        self.grub_env.get(name).cloned().unwrap_or_default()
    }

    fn detect_fstype(&self, dev: &str) -> Result<String> {
        self.fstypes
            .get(dev)
            .cloned()
            .ok_or_else(|| BoomError::Mount(format!("could not determine fstype for {dev}")))
    }
}
