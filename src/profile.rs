/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Shared behaviour for boom template profiles.
//!
//! Both profile types serialise as `KEY="value"` lines and provide the
//! same set of template accessors; host profiles overlay an OS profile
//! and win any lookup for a field they override.

use std::collections::BTreeMap;
use std::io::Write;

use camino::Utf8Path;

use crate::error::{IoContext, Result};
use crate::keyvalue::{blank_or_comment, parse_name_value};

/// Access to the template fields shared by every profile type.
///
/// For a host profile each accessor returns the override when one is
/// present and the embedded OS profile's value otherwise.
pub trait Profile {
    fn os_id(&self) -> &str;
    fn os_name(&self) -> &str;
    fn os_short_name(&self) -> &str;
    fn os_version(&self) -> &str;
    fn os_version_id(&self) -> &str;
    fn uname_pattern(&self) -> &str;
    fn kernel_pattern(&self) -> &str;
    fn initramfs_pattern(&self) -> &str;
    fn root_opts_lvm2(&self) -> &str;
    fn root_opts_btrfs(&self) -> &str;
    fn options(&self) -> &str;
    fn title(&self) -> &str;
    /// Space-separated optional BLS key names permitted by this
    /// profile.
    fn optional_keys(&self) -> &str;

    /// Return `true` if the named optional BLS key is permitted.
    fn permits_optional_key(&self, key: &str) -> bool {
        self.optional_keys().split_whitespace().any(|k| k == key)
    }
}

/// A profile bound to a boot entry: either a plain OS profile or a
/// host profile wrapping one.
#[derive(Debug, Clone)]
pub enum BootProfile {
    Os(crate::osprofile::OsProfile),
    Host(crate::hostprofile::HostProfile),
}

impl BootProfile {
    /// The profile identity recorded in `#OsIdentifier` comments.
    pub fn identity(&self) -> &str {
        match self {
            BootProfile::Os(osp) => osp.os_id(),
            BootProfile::Host(hp) => hp.os_id(),
        }
    }

    /// Return `true` if this is the null profile.
    pub fn is_null(&self) -> bool {
        match self {
            BootProfile::Os(osp) => osp.is_null(),
            BootProfile::Host(_) => false,
        }
    }

    pub fn as_profile(&self) -> &dyn Profile {
        match self {
            BootProfile::Os(osp) => osp,
            BootProfile::Host(hp) => hp,
        }
    }
}

impl Profile for BootProfile {
    fn os_id(&self) -> &str {
        self.as_profile().os_id()
    }
    fn os_name(&self) -> &str {
        self.as_profile().os_name()
    }
    fn os_short_name(&self) -> &str {
        self.as_profile().os_short_name()
    }
    fn os_version(&self) -> &str {
        self.as_profile().os_version()
    }
    fn os_version_id(&self) -> &str {
        self.as_profile().os_version_id()
    }
    fn uname_pattern(&self) -> &str {
        self.as_profile().uname_pattern()
    }
    fn kernel_pattern(&self) -> &str {
        self.as_profile().kernel_pattern()
    }
    fn initramfs_pattern(&self) -> &str {
        self.as_profile().initramfs_pattern()
    }
    fn root_opts_lvm2(&self) -> &str {
        self.as_profile().root_opts_lvm2()
    }
    fn root_opts_btrfs(&self) -> &str {
        self.as_profile().root_opts_btrfs()
    }
    fn options(&self) -> &str {
        self.as_profile().options()
    }
    fn title(&self) -> &str {
        self.as_profile().title()
    }
    fn optional_keys(&self) -> &str {
        self.as_profile().optional_keys()
    }
}

/// Raw data read from one profile file: key/value pairs plus any
/// comment blocks keyed by the profile key that follows them.
#[derive(Debug, Default)]
pub(crate) struct ProfileData {
    pub(crate) values: BTreeMap<String, String>,
    pub(crate) comments: BTreeMap<String, String>,
}

/// Read a `KEY="value"` style profile file, accumulating comment
/// blocks against the next key seen.
pub(crate) fn read_profile_file(path: &Utf8Path) -> Result<ProfileData> {
    let text = std::fs::read_to_string(path).path_context(path.as_str())?;
    let mut data = ProfileData::default();
    let mut comment = String::new();

    for line in text.lines() {
        if blank_or_comment(line) {
            comment.push_str(line);
            comment.push('\n');
            continue;
        }
        let (name, value) = parse_name_value(line, Some('='), false)?;
        data.values.insert(name.clone(), value.unwrap_or_default());
        if !comment.is_empty() {
            data.comments.insert(name, std::mem::take(&mut comment));
        }
    }
    Ok(data)
}

/// Write `data` to `path` atomically: temp file in the target
/// directory, full write, fdatasync, rename, then chmod.
pub(crate) fn atomic_write(path: &Utf8Path, data: &[u8], mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = path
        .parent()
        .unwrap_or_else(|| Utf8Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix("boom")
        .tempfile_in(dir)
        .path_context(dir.as_str())?;

    // The temp file is unlinked on drop if any step below fails.
    tmp.write_all(data).path_context(path.as_str())?;
    tmp.flush().path_context(path.as_str())?;
    tmp.as_file().sync_data().path_context(path.as_str())?;
    tmp.persist(path)
        .map_err(|e| crate::error::BoomError::io(path.as_str(), e.error))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .path_context(path.as_str())?;
    Ok(())
}

/// Serialise profile keys in order as `KEY="value"` lines, re-emitting
/// any preserved comment block ahead of its key.
pub(crate) fn format_profile_lines(
    keys: &[&str],
    values: &BTreeMap<String, String>,
    comments: &BTreeMap<String, String>,
) -> String {
    let mut out = String::new();
    for key in keys {
        let Some(value) = values.get(*key) else {
            continue;
        };
        if let Some(comment) = comments.get(*key) {
            out.push_str(comment.trim_end());
            out.push('\n');
        }
        out.push_str(&format!("{key}=\"{value}\"\n"));
    }
    out
}
