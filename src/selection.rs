/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Declarative selection criteria.
//!
//! A [`Selection`] carries one optional criterion per queryable
//! attribute; matching is the logical AND of all populated criteria.
//! Identifier criteria (`boot_id`, `os_id`, `host_id`, `img_id`) match
//! by prefix, everything else by equality.

use crate::error::{BoomError, Result};

/// Selection criteria for boot entries, boot parameters, profiles,
/// host profiles and cache entries.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    // BootEntry fields
    pub boot_id: Option<String>,
    pub title: Option<String>,
    pub version: Option<String>,
    pub machine_id: Option<String>,
    pub linux: Option<String>,
    pub initrd: Option<String>,
    pub efi: Option<String>,
    pub options: Option<String>,
    pub devicetree: Option<String>,

    // BootParams fields
    pub root_device: Option<String>,
    pub lvm_root_lv: Option<String>,
    pub btrfs_subvol_path: Option<String>,
    pub btrfs_subvol_id: Option<String>,

    // OsProfile fields
    pub os_id: Option<String>,
    pub os_name: Option<String>,
    pub os_short_name: Option<String>,
    pub os_version: Option<String>,
    pub os_version_id: Option<String>,
    pub os_uname_pattern: Option<String>,
    pub os_kernel_pattern: Option<String>,
    pub os_initramfs_pattern: Option<String>,
    pub os_options: Option<String>,

    /// Whether results may include the null profile.
    pub allow_null_profile: bool,

    // HostProfile fields
    pub host_id: Option<String>,
    pub host_name: Option<String>,
    pub host_label: Option<String>,
    pub host_short_name: Option<String>,
    pub host_add_opts: Option<String>,
    pub host_del_opts: Option<String>,

    // Cache fields
    pub path: Option<String>,
    pub orig_path: Option<String>,
    pub timestamp: Option<i64>,
    pub img_id: Option<String>,
}

/// The attribute groups a selection may be validated against.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectionKinds {
    pub entry: bool,
    pub params: bool,
    pub profile: bool,
    pub host: bool,
    pub cache: bool,
}

impl SelectionKinds {
    pub const ENTRY: SelectionKinds = SelectionKinds {
        entry: true,
        params: true,
        profile: true,
        host: false,
        cache: false,
    };
    pub const PROFILE: SelectionKinds = SelectionKinds {
        entry: false,
        params: false,
        profile: true,
        host: false,
        cache: false,
    };
    pub const HOST: SelectionKinds = SelectionKinds {
        entry: false,
        params: false,
        profile: true,
        host: true,
        cache: false,
    };
    pub const CACHE: SelectionKinds = SelectionKinds {
        entry: false,
        params: false,
        profile: false,
        host: false,
        cache: true,
    };
}

impl Selection {
    /// Select an entry by `boot_id` prefix.
    pub fn from_boot_id(boot_id: impl Into<String>) -> Selection {
        Selection {
            boot_id: Some(boot_id.into()),
            ..Default::default()
        }
    }

    /// Select a profile by `os_id` prefix.
    pub fn from_os_id(os_id: impl Into<String>) -> Selection {
        Selection {
            os_id: Some(os_id.into()),
            ..Default::default()
        }
    }

    /// Select a host profile by `host_id` prefix.
    pub fn from_host_id(host_id: impl Into<String>) -> Selection {
        Selection {
            host_id: Some(host_id.into()),
            ..Default::default()
        }
    }

    /// Select entries or cache records referencing an image path.
    pub fn from_path(path: impl Into<String>) -> Selection {
        Selection {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    fn populated(&self) -> Vec<(&'static str, Group)> {
        use Group::*;
        let mut set = Vec::new();
        let mut add = |name, group, is_set: bool| {
            if is_set {
                set.push((name, group));
            }
        };
        add("boot_id", Entry, self.boot_id.is_some());
        add("title", Entry, self.title.is_some());
        add("version", EntryOrCache, self.version.is_some());
        add("machine_id", EntryOrHost, self.machine_id.is_some());
        add("linux", EntryOrCache, self.linux.is_some());
        add("initrd", EntryOrCache, self.initrd.is_some());
        add("efi", Entry, self.efi.is_some());
        add("options", Entry, self.options.is_some());
        add("devicetree", Entry, self.devicetree.is_some());
        add("root_device", Params, self.root_device.is_some());
        add("lvm_root_lv", Params, self.lvm_root_lv.is_some());
        add("btrfs_subvol_path", Params, self.btrfs_subvol_path.is_some());
        add("btrfs_subvol_id", Params, self.btrfs_subvol_id.is_some());
        add("os_id", Profile, self.os_id.is_some());
        add("os_name", Profile, self.os_name.is_some());
        add("os_short_name", Profile, self.os_short_name.is_some());
        add("os_version", Profile, self.os_version.is_some());
        add("os_version_id", Profile, self.os_version_id.is_some());
        add("os_uname_pattern", Profile, self.os_uname_pattern.is_some());
        add("os_kernel_pattern", Profile, self.os_kernel_pattern.is_some());
        add(
            "os_initramfs_pattern",
            Profile,
            self.os_initramfs_pattern.is_some(),
        );
        add("os_options", Profile, self.os_options.is_some());
        add("host_id", Host, self.host_id.is_some());
        add("host_name", Host, self.host_name.is_some());
        add("host_label", Host, self.host_label.is_some());
        add("host_short_name", Host, self.host_short_name.is_some());
        add("host_add_opts", Host, self.host_add_opts.is_some());
        add("host_del_opts", Host, self.host_del_opts.is_some());
        add("path", EntryOrCache, self.path.is_some());
        add("orig_path", Cache, self.orig_path.is_some());
        add("timestamp", Cache, self.timestamp.is_some());
        add("img_id", Cache, self.img_id.is_some());
        set
    }

    /// Check that every populated criterion belongs to one of the
    /// permitted attribute groups.
    pub fn check_valid(&self, kinds: SelectionKinds) -> Result<()> {
        let invalid: Vec<&str> = self
            .populated()
            .into_iter()
            .filter(|(_, group)| !group.permitted(kinds))
            .map(|(name, _)| name)
            .collect();

        if !invalid.is_empty() {
            return Err(BoomError::Parse(format!(
                "invalid criteria for selection type: {}",
                invalid.join(", ")
            )));
        }
        Ok(())
    }

    /// Return `true` if no criteria are populated.
    pub fn is_null(&self) -> bool {
        self.populated().is_empty()
    }
}

/// Which attribute group a criterion belongs to.
#[derive(Debug, Clone, Copy)]
enum Group {
    Entry,
    Params,
    Profile,
    Host,
    Cache,
    /// `version`, `linux`, `initrd` and `path` are valid for both
    /// entry and cache selections.
    EntryOrCache,
    /// `machine_id` is valid for both entry and host selections.
    EntryOrHost,
}

impl Group {
    fn permitted(self, kinds: SelectionKinds) -> bool {
        match self {
            Group::Entry => kinds.entry,
            Group::Params => kinds.entry || kinds.params,
            Group::Profile => kinds.profile || kinds.host,
            Group::Host => kinds.host,
            Group::Cache => kinds.cache,
            Group::EntryOrCache => kinds.entry || kinds.cache,
            Group::EntryOrHost => kinds.entry || kinds.host,
        }
    }
}

/// Match a string criterion by equality.
pub(crate) fn match_eq(criterion: Option<&str>, value: &str) -> bool {
    criterion.map_or(true, |c| c == value)
}

/// Match an identifier criterion by prefix.
pub(crate) fn match_prefix(criterion: Option<&str>, value: &str) -> bool {
    criterion.map_or(true, |c| value.starts_with(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_selection() {
        assert!(Selection::default().is_null());
        assert!(!Selection::from_boot_id("abcd").is_null());
    }

    #[test]
    fn test_valid_for_profile() {
        let s = Selection::from_os_id("d4439b7");
        assert!(s.check_valid(SelectionKinds::PROFILE).is_ok());
        assert!(s.check_valid(SelectionKinds::ENTRY).is_ok());
        assert!(s.check_valid(SelectionKinds::CACHE).is_err());
    }

    #[test]
    fn test_entry_criteria_rejected_for_profile() {
        let s = Selection::from_boot_id("1234abc");
        assert!(s.check_valid(SelectionKinds::PROFILE).is_err());
        assert!(s.check_valid(SelectionKinds::ENTRY).is_ok());
    }

    #[test]
    fn test_cache_shares_image_fields_with_entry() {
        let s = Selection {
            linux: Some("/vmlinuz-5.0.0".to_string()),
            ..Default::default()
        };
        assert!(s.check_valid(SelectionKinds::ENTRY).is_ok());
        assert!(s.check_valid(SelectionKinds::CACHE).is_ok());
        assert!(s.check_valid(SelectionKinds::PROFILE).is_err());
    }

    #[test]
    fn test_match_helpers() {
        assert!(match_eq(None, "anything"));
        assert!(match_eq(Some("x"), "x"));
        assert!(!match_eq(Some("x"), "y"));
        assert!(match_prefix(Some("abc"), "abcdef"));
        assert!(!match_prefix(Some("abd"), "abcdef"));
    }
}
