/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Host profiles.
//!
//! A [`HostProfile`] is a per-machine overlay on an [`OsProfile`]: it
//! may override any non-identity template field and adds host specific
//! kernel command line edits (`add_opts`/`del_opts`). Field lookup
//! falls through to the embedded OS profile for anything the host
//! profile does not override.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};

use crate::digest::{min_id_width, sha1_hex, MIN_ID_WIDTH};
use crate::error::{BoomError, IoContext, Result};
use crate::osprofile::{
    check_format_key_value, OsProfile, ProfileStore, BOOM_OS_ID, BOOM_OS_INITRAMFS_PATTERN,
    BOOM_OS_KERNEL_PATTERN, BOOM_OS_NAME, BOOM_OS_OPTIONS, BOOM_OS_ROOT_OPTS_BTRFS,
    BOOM_OS_ROOT_OPTS_LVM2, BOOM_OS_SHORT_NAME, BOOM_OS_UNAME_PATTERN, BOOM_OS_VERSION,
    BOOM_OS_VERSION_ID,
};
use crate::profile::{
    atomic_write, format_profile_lines, read_profile_file, Profile, ProfileData,
};
use crate::selection::{match_eq, match_prefix, Selection, SelectionKinds};
use crate::template::{FMT_INITRAMFS, FMT_KERNEL, FMT_ROOT_OPTS};

/// Host profiles directory name below the profiles directory.
pub const HOST_PROFILES_DIR: &str = "hosts";

/// File name extension for host profiles.
pub const HOST_PROFILE_EXT: &str = "host";

/// The file mode with which host profiles are created.
pub const HOST_PROFILE_MODE: u32 = 0o644;

pub const BOOM_HOST_ID: &str = "BOOM_HOST_ID";
pub const BOOM_HOST_NAME: &str = "BOOM_HOST_NAME";
pub const BOOM_HOST_ADD_OPTS: &str = "BOOM_HOST_ADD_OPTS";
pub const BOOM_HOST_DEL_OPTS: &str = "BOOM_HOST_DEL_OPTS";
pub const BOOM_HOST_LABEL: &str = "BOOM_HOST_LABEL";

/// The machine_id key shared with boot entries.
pub const BOOM_ENTRY_MACHINE_ID: &str = "BOOM_ENTRY_MACHINE_ID";

/// Serialisation order for host profile keys.
pub const HOST_PROFILE_KEYS: &[&str] = &[
    BOOM_HOST_ID,
    BOOM_HOST_NAME,
    BOOM_ENTRY_MACHINE_ID,
    BOOM_OS_ID,
    BOOM_HOST_LABEL,
    BOOM_HOST_ADD_OPTS,
    BOOM_HOST_DEL_OPTS,
    BOOM_OS_NAME,
    BOOM_OS_SHORT_NAME,
    BOOM_OS_VERSION,
    BOOM_OS_VERSION_ID,
    BOOM_OS_UNAME_PATTERN,
    BOOM_OS_KERNEL_PATTERN,
    BOOM_OS_INITRAMFS_PATTERN,
    BOOM_OS_ROOT_OPTS_LVM2,
    BOOM_OS_ROOT_OPTS_BTRFS,
    BOOM_OS_OPTIONS,
];

/// Characters permitted in a host profile label.
fn check_label(label: &str) -> Result<()> {
    for c in label.chars() {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ') {
            return Err(BoomError::Profile(format!(
                "invalid host label character: '{c}'"
            )));
        }
    }
    Ok(())
}

/// A host profile: identity, a binding to one OS profile, and a set of
/// optional template overrides.
#[derive(Debug, Clone)]
pub struct HostProfile {
    host_id: String,
    machine_id: String,
    host_name: String,
    label: String,
    osp: OsProfile,

    // Template overrides. `None` falls through to the OS profile.
    uname_pattern: Option<String>,
    kernel_pattern: Option<String>,
    initramfs_pattern: Option<String>,
    root_opts_lvm2: Option<String>,
    root_opts_btrfs: Option<String>,
    options: Option<String>,
    title: Option<String>,

    add_opts: String,
    del_opts: String,

    unwritten: bool,
    comments: BTreeMap<String, String>,
}

impl Profile for HostProfile {
    fn os_id(&self) -> &str {
        self.osp.os_id()
    }
    fn os_name(&self) -> &str {
        self.osp.os_name()
    }
    fn os_short_name(&self) -> &str {
        self.osp.os_short_name()
    }
    fn os_version(&self) -> &str {
        self.osp.os_version()
    }
    fn os_version_id(&self) -> &str {
        self.osp.os_version_id()
    }
    fn uname_pattern(&self) -> &str {
        self.uname_pattern
            .as_deref()
            .unwrap_or_else(|| self.osp.uname_pattern())
    }
    fn kernel_pattern(&self) -> &str {
        self.kernel_pattern
            .as_deref()
            .unwrap_or_else(|| self.osp.kernel_pattern())
    }
    fn initramfs_pattern(&self) -> &str {
        self.initramfs_pattern
            .as_deref()
            .unwrap_or_else(|| self.osp.initramfs_pattern())
    }
    fn root_opts_lvm2(&self) -> &str {
        self.root_opts_lvm2
            .as_deref()
            .unwrap_or_else(|| self.osp.root_opts_lvm2())
    }
    fn root_opts_btrfs(&self) -> &str {
        self.root_opts_btrfs
            .as_deref()
            .unwrap_or_else(|| self.osp.root_opts_btrfs())
    }
    fn options(&self) -> &str {
        self.options.as_deref().unwrap_or_else(|| self.osp.options())
    }
    fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_else(|| self.osp.title())
    }
    fn optional_keys(&self) -> &str {
        self.osp.optional_keys()
    }
}

/// Builder for [`HostProfile`] values.
#[derive(Debug, Default)]
pub struct HostProfileBuilder {
    machine_id: String,
    host_name: String,
    label: String,
    uname_pattern: Option<String>,
    kernel_pattern: Option<String>,
    initramfs_pattern: Option<String>,
    root_opts_lvm2: Option<String>,
    root_opts_btrfs: Option<String>,
    options: Option<String>,
    title: Option<String>,
    add_opts: Option<String>,
    del_opts: Option<String>,
}

impl HostProfileBuilder {
    pub fn label(mut self, value: impl Into<String>) -> Self {
        self.label = value.into();
        self
    }

    pub fn uname_pattern(mut self, value: impl Into<String>) -> Self {
        self.uname_pattern = Some(value.into());
        self
    }

    pub fn kernel_pattern(mut self, value: impl Into<String>) -> Self {
        self.kernel_pattern = Some(value.into());
        self
    }

    pub fn initramfs_pattern(mut self, value: impl Into<String>) -> Self {
        self.initramfs_pattern = Some(value.into());
        self
    }

    pub fn root_opts_lvm2(mut self, value: impl Into<String>) -> Self {
        self.root_opts_lvm2 = Some(value.into());
        self
    }

    pub fn root_opts_btrfs(mut self, value: impl Into<String>) -> Self {
        self.root_opts_btrfs = Some(value.into());
        self
    }

    pub fn options(mut self, value: impl Into<String>) -> Self {
        self.options = Some(value.into());
        self
    }

    pub fn title(mut self, value: impl Into<String>) -> Self {
        self.title = Some(value.into());
        self
    }

    pub fn add_opts(mut self, value: impl Into<String>) -> Self {
        self.add_opts = Some(value.into());
        self
    }

    pub fn del_opts(mut self, value: impl Into<String>) -> Self {
        self.del_opts = Some(value.into());
        self
    }

    /// Build the host profile, binding it to `osp`.
    pub fn build(self, osp: &OsProfile) -> Result<HostProfile> {
        if self.machine_id.is_empty() || self.host_name.is_empty() {
            return Err(BoomError::Profile(
                "machine_id, host_name, and os_id are mandatory".to_string(),
            ));
        }
        check_label(&self.label)?;

        let hp = HostProfile {
            host_id: String::new(),
            machine_id: self.machine_id,
            host_name: self.host_name,
            label: self.label,
            osp: osp.clone(),
            uname_pattern: self.uname_pattern,
            kernel_pattern: self.kernel_pattern,
            initramfs_pattern: self.initramfs_pattern,
            root_opts_lvm2: self.root_opts_lvm2,
            root_opts_btrfs: self.root_opts_btrfs,
            options: self.options,
            title: self.title,
            add_opts: self.add_opts.unwrap_or_default(),
            del_opts: self.del_opts.unwrap_or_default(),
            unwritten: true,
            comments: BTreeMap::new(),
        };
        hp.validate()?;
        let mut hp = hp;
        hp.generate_id();
        Ok(hp)
    }
}

impl HostProfile {
    /// Start building a host profile from its identity values.
    pub fn builder(
        machine_id: impl Into<String>,
        host_name: impl Into<String>,
    ) -> HostProfileBuilder {
        HostProfileBuilder {
            machine_id: machine_id.into(),
            host_name: host_name.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(kernel_pattern) = &self.kernel_pattern {
            check_format_key_value("HostProfile.kernel_pattern", kernel_pattern, &[FMT_KERNEL])?;
        }
        if let Some(initramfs_pattern) = &self.initramfs_pattern {
            check_format_key_value(
                "HostProfile.initramfs_pattern",
                initramfs_pattern,
                &[FMT_INITRAMFS],
            )?;
        }
        if let Some(root_opts_lvm2) = &self.root_opts_lvm2 {
            check_format_key_value("HostProfile.root_opts_lvm2", root_opts_lvm2, &[FMT_ROOT_OPTS])?;
        }
        if let Some(root_opts_btrfs) = &self.root_opts_btrfs {
            check_format_key_value(
                "HostProfile.root_opts_btrfs",
                root_opts_btrfs,
                &[FMT_ROOT_OPTS],
            )?;
        }
        Ok(())
    }

    fn generate_id(&mut self) {
        let hashdata = format!("{}{}", self.machine_id, self.label);
        self.host_id = sha1_hex(&hashdata);
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The host portion of a DNS-style host name.
    pub fn short_name(&self) -> &str {
        self.host_name.split('.').next().unwrap_or(&self.host_name)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn add_opts(&self) -> &str {
        &self.add_opts
    }

    pub fn del_opts(&self) -> &str {
        &self.del_opts
    }

    /// The embedded OS profile.
    pub fn os_profile(&self) -> &OsProfile {
        &self.osp
    }

    /// Whether this profile has modifications not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.unwritten
    }

    pub fn set_add_opts(&mut self, opts: impl Into<String>) {
        self.add_opts = opts.into();
        self.unwritten = true;
    }

    pub fn set_del_opts(&mut self, opts: impl Into<String>) {
        self.del_opts = opts.into();
        self.unwritten = true;
    }

    pub fn set_label(&mut self, label: impl Into<String>) -> Result<()> {
        let label = label.into();
        check_label(&label)?;
        if label != self.label {
            self.label = label;
            self.unwritten = true;
            self.generate_id();
        }
        Ok(())
    }

    pub fn set_options(&mut self, options: impl Into<String>) {
        self.options = Some(options.into());
        self.unwritten = true;
    }

    /// Re-bind this host profile to a different OS profile.
    pub fn set_os_profile(&mut self, osp: &OsProfile) {
        if self.osp.os_id() == osp.os_id() {
            return;
        }
        self.osp = osp.clone();
        self.unwritten = true;
    }

    /// The on-disk file name for this host profile.
    pub fn profile_file_name(&self) -> String {
        let name = if self.label.is_empty() {
            self.short_name().to_string()
        } else {
            format!("{}-{}", self.short_name(), self.label.replace(' ', "_"))
        };
        format!("{}-{}.{}", self.host_id, name, HOST_PROFILE_EXT)
    }

    /// The absolute path of this profile below `hosts_dir`.
    pub fn profile_path(&self, hosts_dir: &Utf8Path) -> Utf8PathBuf {
        hosts_dir.join(self.profile_file_name())
    }

    fn to_file_string(&self) -> String {
        let mut values = BTreeMap::new();
        let mut set = |key: &str, value: &str| {
            values.insert(key.to_string(), value.to_string());
        };
        set(BOOM_HOST_ID, &self.host_id);
        set(BOOM_HOST_NAME, &self.host_name);
        set(BOOM_ENTRY_MACHINE_ID, &self.machine_id);
        set(BOOM_OS_ID, self.osp.os_id());
        if !self.label.is_empty() {
            set(BOOM_HOST_LABEL, &self.label);
        }
        if !self.add_opts.is_empty() {
            set(BOOM_HOST_ADD_OPTS, &self.add_opts);
        }
        if !self.del_opts.is_empty() {
            set(BOOM_HOST_DEL_OPTS, &self.del_opts);
        }
        // Only overridden template keys are stored in the host profile.
        let overrides = [
            (BOOM_OS_UNAME_PATTERN, &self.uname_pattern),
            (BOOM_OS_KERNEL_PATTERN, &self.kernel_pattern),
            (BOOM_OS_INITRAMFS_PATTERN, &self.initramfs_pattern),
            (BOOM_OS_ROOT_OPTS_LVM2, &self.root_opts_lvm2),
            (BOOM_OS_ROOT_OPTS_BTRFS, &self.root_opts_btrfs),
            (BOOM_OS_OPTIONS, &self.options),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                set(key, value);
            }
        }
        format_profile_lines(HOST_PROFILE_KEYS, &values, &self.comments)
    }

    /// Write this host profile to `hosts_dir` if dirty (or forced).
    pub fn write(&mut self, hosts_dir: &Utf8Path, force: bool) -> Result<()> {
        if !force && !self.unwritten {
            return Ok(());
        }
        let path = self.profile_path(hosts_dir);
        log::debug!("writing HostProfile(host_id='{}') to '{path}'", self.host_id);
        atomic_write(&path, self.to_file_string().as_bytes(), HOST_PROFILE_MODE)?;
        self.unwritten = false;
        Ok(())
    }

    /// Build a host profile from on-disk profile data, resolving its
    /// OS profile binding through `profiles`.
    pub(crate) fn from_profile_data(
        data: ProfileData,
        profiles: &ProfileStore,
    ) -> Result<HostProfile> {
        let get = |key: &str| data.values.get(key).cloned();
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                BoomError::Profile(format!("invalid host profile data (missing {key})"))
            })
        };

        let os_id = required(BOOM_OS_ID)?;
        let osp = profiles
            .get(&os_id)
            .ok_or_else(|| BoomError::Profile(format!("OsProfile not found: {os_id}")))?;

        let mut hp = HostProfile {
            host_id: get(BOOM_HOST_ID).unwrap_or_default(),
            host_name: required(BOOM_HOST_NAME)?,
            machine_id: required(BOOM_ENTRY_MACHINE_ID)?,
            label: get(BOOM_HOST_LABEL).unwrap_or_default(),
            osp: osp.clone(),
            uname_pattern: get(BOOM_OS_UNAME_PATTERN),
            kernel_pattern: get(BOOM_OS_KERNEL_PATTERN),
            initramfs_pattern: get(BOOM_OS_INITRAMFS_PATTERN),
            root_opts_lvm2: get(BOOM_OS_ROOT_OPTS_LVM2),
            root_opts_btrfs: get(BOOM_OS_ROOT_OPTS_BTRFS),
            options: get(BOOM_OS_OPTIONS),
            title: None,
            add_opts: get(BOOM_HOST_ADD_OPTS).unwrap_or_default(),
            del_opts: get(BOOM_HOST_DEL_OPTS).unwrap_or_default(),
            unwritten: false,
            comments: data.comments,
        };
        hp.validate()?;
        if hp.host_id.is_empty() {
            hp.generate_id();
        }
        Ok(hp)
    }

    /// Load one host profile from a file.
    pub fn from_file(path: &Utf8Path, profiles: &ProfileStore) -> Result<HostProfile> {
        log::debug!("loading HostProfile from '{path}'");
        Self::from_profile_data(read_profile_file(path)?, profiles)
    }
}

/// Test a `HostProfile` against selection criteria.
pub fn select_host_profile(s: &Selection, hp: &HostProfile) -> bool {
    match_prefix(s.host_id.as_deref(), hp.host_id())
        && match_eq(s.machine_id.as_deref(), hp.machine_id())
        && match_eq(s.host_name.as_deref(), hp.host_name())
        && match_eq(s.host_label.as_deref(), hp.label())
        && match_eq(s.host_short_name.as_deref(), hp.short_name())
        && match_eq(s.host_add_opts.as_deref(), hp.add_opts())
        && match_eq(s.host_del_opts.as_deref(), hp.del_opts())
        && match_prefix(s.os_id.as_deref(), hp.os_id())
        && match_eq(s.os_name.as_deref(), hp.os_name())
        && match_eq(s.os_short_name.as_deref(), hp.os_short_name())
        && match_eq(s.os_version.as_deref(), hp.os_version())
        && match_eq(s.os_version_id.as_deref(), hp.os_version_id())
        && match_eq(s.os_uname_pattern.as_deref(), hp.uname_pattern())
        && match_eq(s.os_kernel_pattern.as_deref(), hp.kernel_pattern())
        && match_eq(s.os_initramfs_pattern.as_deref(), hp.initramfs_pattern())
        && match_eq(s.os_options.as_deref(), hp.options())
}

/// The in-memory collection of host profiles.
#[derive(Debug)]
pub struct HostStore {
    dir: Utf8PathBuf,
    profiles: Vec<HostProfile>,
    loaded: bool,
}

impl HostStore {
    pub fn new(dir: Utf8PathBuf) -> HostStore {
        HostStore {
            dir,
            profiles: Vec::new(),
            loaded: false,
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn drop_profiles(&mut self) {
        self.profiles.clear();
        self.loaded = false;
    }

    /// Load every `*.host` file from the store directory, resolving OS
    /// profile bindings through `profiles`. Failures skip the profile
    /// with a warning.
    pub fn load(&mut self, profiles: &ProfileStore) -> Result<()> {
        self.drop_profiles();
        log::debug!("loading host profiles from {}", self.dir);

        // A missing hosts directory is an empty host profile set.
        if !self.dir.exists() {
            self.loaded = true;
            return Ok(());
        }

        let dir_entries = std::fs::read_dir(&self.dir).path_context(self.dir.as_str())?;
        for dir_entry in dir_entries {
            let dir_entry = dir_entry.path_context(self.dir.as_str())?;
            let Some(name) = dir_entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if !name.ends_with(&format!(".{HOST_PROFILE_EXT}")) {
                continue;
            }
            let path = self.dir.join(&name);
            match HostProfile::from_file(&path, profiles).and_then(|hp| self.add(hp).map(|_| ()))
            {
                Ok(()) => (),
                Err(e) => {
                    log::warn!("failed to load HostProfile from '{path}': {e}");
                    if crate::debug_enabled() {
                        return Err(e);
                    }
                }
            }
        }
        log::debug!("loaded {} host profiles", self.profiles.len());
        self.loaded = true;
        Ok(())
    }

    pub fn ensure_loaded(&mut self, profiles: &ProfileStore) -> Result<()> {
        if !self.loaded {
            self.load(profiles)?;
        }
        Ok(())
    }

    /// Add a host profile, rejecting duplicate identities.
    pub fn add(&mut self, hp: HostProfile) -> Result<&HostProfile> {
        if self.profiles.iter().any(|p| p.host_id() == hp.host_id()) {
            return Err(BoomError::Profile(format!(
                "profile already exists (host_id={})",
                &hp.host_id()[..MIN_ID_WIDTH]
            )));
        }
        self.profiles.push(hp);
        Ok(self.profiles.last().expect("host profile just added"))
    }

    /// Look up a host profile by `(machine_id, label)` identity.
    pub fn get(&self, machine_id: &str, label: &str) -> Option<&HostProfile> {
        self.profiles
            .iter()
            .find(|p| p.machine_id() == machine_id && p.label() == label)
    }

    /// Look up a single host profile by identifier prefix.
    pub fn by_id(&self, host_id: &str) -> Result<&HostProfile> {
        let matches: Vec<&HostProfile> = self
            .profiles
            .iter()
            .filter(|p| p.host_id().starts_with(host_id))
            .collect();
        match matches.len() {
            0 => Err(BoomError::Profile(format!(
                "no matching host profile: {host_id}"
            ))),
            1 => Ok(matches[0]),
            _ => Err(BoomError::Profile(format!(
                "HostProfile identifier '{host_id}' is ambiguous"
            ))),
        }
    }

    /// Find the first host profile for a machine id.
    pub fn match_machine_id(&self, machine_id: &str) -> Option<&HostProfile> {
        self.profiles.iter().find(|p| p.machine_id() == machine_id)
    }

    /// Find host profiles matching the supplied selection, sorted by
    /// host name.
    pub fn find(&self, selection: &Selection) -> Result<Vec<&HostProfile>> {
        selection.check_valid(SelectionKinds::HOST)?;
        let mut matches: Vec<&HostProfile> = self
            .profiles
            .iter()
            .filter(|hp| select_host_profile(selection, hp))
            .collect();
        matches.sort_by(|a, b| a.host_name().cmp(b.host_name()));
        Ok(matches)
    }

    /// Write every dirty host profile to disk, logging and continuing
    /// on failure.
    pub fn write_all(&mut self, force: bool) {
        let dir = self.dir.clone();
        for hp in self.profiles.iter_mut() {
            if let Err(e) = hp.write(&dir, force) {
                log::warn!("failed to write HostProfile(host_id='{}'): {e}", hp.host_id());
            }
        }
    }

    /// Persist a single host profile by identifier prefix.
    pub fn write_profile(&mut self, host_id: &str, force: bool) -> Result<()> {
        let unique = self.by_id(host_id)?.host_id().to_string();
        let dir = self.dir.clone();
        let hp = self
            .profiles
            .iter_mut()
            .find(|p| p.host_id() == unique)
            .expect("host profile just resolved");
        hp.write(&dir, force)
    }

    /// Delete a host profile from the store and from disk.
    pub fn delete(&mut self, host_id: &str) -> Result<()> {
        let unique = self.by_id(host_id)?.host_id().to_string();
        let index = self
            .profiles
            .iter()
            .position(|p| p.host_id() == unique)
            .expect("host profile just resolved");
        let path = self.profiles[index].profile_path(&self.dir);
        if path.exists() {
            std::fs::remove_file(&path).path_context(path.as_str())?;
        }
        self.profiles.remove(index);
        log::debug!("deleted HostProfile(host_id='{unique}')");
        Ok(())
    }

    /// The minimum unique display width for host_id values.
    pub fn min_host_id_width(&self) -> usize {
        min_id_width(MIN_ID_WIDTH, self.profiles.iter(), |p| p.host_id())
    }

    /// The minimum unique display width for machine_id values.
    pub fn min_machine_id_width(&self) -> usize {
        min_id_width(MIN_ID_WIDTH, self.profiles.iter(), |p| p.machine_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rhel72() -> OsProfile {
        OsProfile::builder("Red Hat Enterprise Linux Server", "rhel", "7.2 (Maipo)", "7.2")
            .uname_pattern("el7")
            .options("root=%{root_device} ro %{root_opts} rhgb quiet")
            .build()
            .unwrap()
    }

    #[test]
    fn test_identity_hash() {
        let osp = rhel72();
        let hp = HostProfile::builder("ffffffff63bf4e", "db1.example.com")
            .label("testing")
            .build(&osp)
            .unwrap();
        assert_eq!(hp.host_id(), sha1_hex("ffffffff63bf4etesting"));
    }

    #[test]
    fn test_override_precedence() {
        let osp = rhel72();
        let hp = HostProfile::builder("ffffffff63bf4e", "db1.example.com")
            .options("root=%{root_device} ro %{root_opts}")
            .build(&osp)
            .unwrap();
        // Overridden field wins, everything else falls through.
        assert_eq!(hp.options(), "root=%{root_device} ro %{root_opts}");
        assert_eq!(hp.kernel_pattern(), osp.kernel_pattern());
        assert_eq!(hp.uname_pattern(), "el7");
    }

    #[test]
    fn test_short_name() {
        let osp = rhel72();
        let hp = HostProfile::builder("ffffffff63bf4e", "db1.example.com")
            .build(&osp)
            .unwrap();
        assert_eq!(hp.short_name(), "db1");
    }

    #[test]
    fn test_invalid_label_rejected() {
        let osp = rhel72();
        assert!(HostProfile::builder("ffffffff63bf4e", "db1")
            .label("bad/label")
            .build(&osp)
            .is_err());
    }

    #[test]
    fn test_profile_file_name() {
        let osp = rhel72();
        let hp = HostProfile::builder("ffffffff63bf4e", "db1.example.com")
            .label("no boot splash")
            .build(&osp)
            .unwrap();
        let name = hp.profile_file_name();
        assert!(name.starts_with(hp.host_id()));
        assert!(name.ends_with("-db1-no_boot_splash.host"));
    }

    #[test]
    fn test_write_and_reload_roundtrip() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();

        let mut profiles = ProfileStore::new(dir.join("profiles"));
        std::fs::create_dir_all(dir.join("profiles")).unwrap();
        let os_id = profiles.add(rhel72()).unwrap().os_id().to_string();

        let hosts_dir = dir.join("hosts");
        std::fs::create_dir_all(&hosts_dir).unwrap();
        let mut hp = HostProfile::builder("ffffffff63bf4e", "db1.example.com")
            .add_opts("debug")
            .del_opts("rhgb quiet")
            .build(profiles.get(&os_id).unwrap())
            .unwrap();
        hp.write(&hosts_dir, false).unwrap();

        let mut store = HostStore::new(hosts_dir);
        store.load(&profiles).unwrap();
        let loaded = store.get("ffffffff63bf4e", "").expect("host profile reloaded");
        assert_eq!(loaded.add_opts(), "debug");
        assert_eq!(loaded.del_opts(), "rhgb quiet");
        assert_eq!(loaded.os_id(), os_id);
    }

    #[test]
    fn test_duplicate_rejected() {
        let osp = rhel72();
        let mut store = HostStore::new(Utf8PathBuf::from("/nonexistent"));
        let hp = HostProfile::builder("ffffffff63bf4e", "db1").build(&osp).unwrap();
        store.add(hp.clone()).unwrap();
        assert!(store.add(hp).is_err());
    }
}
