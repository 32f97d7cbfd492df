/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Command line mount and swap units.
//!
//! systemd accepts additional mounts and swap devices on the kernel
//! command line; boom formats its `what:where[:fstype[:options]]`
//! specifications into that syntax, detecting the file system type
//! through the platform probe when it is not given.

use crate::error::{BoomError, Result};
use crate::platform::PlatformProbe;

/// Format for systemd command line mount units.
const MOUNT_UNIT_FMT: &str = "systemd.mount-extra=";

/// Format for systemd command line swap units.
const SWAP_UNIT_FMT: &str = "systemd.swap-extra=";

fn parse_mount_unit(mount: &str, probe: &dyn PlatformProbe) -> Result<String> {
    log::debug!("parsing mount unit: {mount}");
    let parts: Vec<&str> = mount.split(':').collect();
    if parts.len() < 2 {
        return Err(BoomError::Mount(format!(
            "invalid mount specification: '{mount}'"
        )));
    }
    let what = parts[0];
    let where_ = parts[1];
    let fstype = match parts.get(2) {
        Some(fstype) if !fstype.is_empty() => (*fstype).to_string(),
        _ => probe.detect_fstype(what)?,
    };
    let options = match parts.get(3) {
        Some(options) if !options.is_empty() => *options,
        _ => "defaults",
    };
    Ok(format!("{MOUNT_UNIT_FMT}{what}:{where_}:{fstype}:{options}"))
}

/// Parse a list of command line mount specifications into systemd
/// mount unit arguments.
pub fn parse_mount_units(mounts: &[String], probe: &dyn PlatformProbe) -> Result<Vec<String>> {
    mounts.iter().map(|m| parse_mount_unit(m, probe)).collect()
}

fn parse_swap_unit(swap: &str) -> String {
    let (what, options) = match swap.split_once(':') {
        Some((what, options)) => (what, options),
        None => (swap, "defaults"),
    };
    format!("{SWAP_UNIT_FMT}{what}:{options}")
}

/// Parse a list of command line swap specifications into systemd swap
/// unit arguments.
pub fn parse_swap_units(swaps: &[String]) -> Vec<String> {
    swaps.iter().map(|s| parse_swap_unit(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TestProbe;

    #[test]
    fn test_full_mount_spec() {
        let probe = TestProbe::default();
        let units =
            parse_mount_units(&["/dev/sdb1:/data:ext4:noatime".to_string()], &probe).unwrap();
        assert_eq!(units, ["systemd.mount-extra=/dev/sdb1:/data:ext4:noatime"]);
    }

    #[test]
    fn test_fstype_detected_when_omitted() {
        let probe = TestProbe::default().with_fstype("/dev/sdb1", "xfs");
        let units = parse_mount_units(&["/dev/sdb1:/data".to_string()], &probe).unwrap();
        assert_eq!(units, ["systemd.mount-extra=/dev/sdb1:/data:xfs:defaults"]);
    }

    #[test]
    fn test_unknown_fstype_fails() {
        let probe = TestProbe::default();
        assert!(parse_mount_units(&["/dev/sdb1:/data".to_string()], &probe).is_err());
    }

    #[test]
    fn test_invalid_mount_spec() {
        let probe = TestProbe::default();
        assert!(parse_mount_units(&["/dev/sdb1".to_string()], &probe).is_err());
    }

    #[test]
    fn test_swap_units() {
        let units = parse_swap_units(&[
            "/dev/sdb2".to_string(),
            "/dev/sdb3:pri=10".to_string(),
        ]);
        assert_eq!(
            units,
            [
                "systemd.swap-extra=/dev/sdb2:defaults",
                "systemd.swap-extra=/dev/sdb3:pri=10"
            ]
        );
    }
}
