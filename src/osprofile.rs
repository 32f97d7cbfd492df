/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Operating system profiles.
//!
//! An [`OsProfile`] defines the identity of an operating system release
//! and the template strings used to generate boot entries for it. The
//! [`ProfileStore`] owns the set of profiles loaded from
//! `<boom>/profiles/`, with the null profile at index 0 as the fallback
//! binding for entries that match nothing else.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::digest::{min_id_width, sha1_hex, MIN_ID_WIDTH};
use crate::error::{BoomError, IoContext, Result};
use crate::profile::{
    atomic_write, format_profile_lines, read_profile_file, Profile, ProfileData,
};
use crate::selection::{match_eq, match_prefix, Selection, SelectionKinds};
use crate::template::{
    key_from_key_name, make_format_regexes, FMT_INITRAMFS, FMT_KERNEL, FMT_ROOT_OPTS,
};

/// File name extension for OS profiles.
pub const PROFILE_EXT: &str = "profile";

/// The file mode with which profiles are created.
pub const PROFILE_MODE: u32 = 0o644;

pub const BOOM_OS_ID: &str = "BOOM_OS_ID";
pub const BOOM_OS_NAME: &str = "BOOM_OS_NAME";
pub const BOOM_OS_SHORT_NAME: &str = "BOOM_OS_SHORT_NAME";
pub const BOOM_OS_VERSION: &str = "BOOM_OS_VERSION";
pub const BOOM_OS_VERSION_ID: &str = "BOOM_OS_VERSION_ID";
pub const BOOM_OS_UNAME_PATTERN: &str = "BOOM_OS_UNAME_PATTERN";
pub const BOOM_OS_KERNEL_PATTERN: &str = "BOOM_OS_KERNEL_PATTERN";
pub const BOOM_OS_INITRAMFS_PATTERN: &str = "BOOM_OS_INITRAMFS_PATTERN";
pub const BOOM_OS_ROOT_OPTS_LVM2: &str = "BOOM_OS_ROOT_OPTS_LVM2";
pub const BOOM_OS_ROOT_OPTS_BTRFS: &str = "BOOM_OS_ROOT_OPTS_BTRFS";
pub const BOOM_OS_OPTIONS: &str = "BOOM_OS_OPTIONS";
pub const BOOM_OS_TITLE: &str = "BOOM_OS_TITLE";
pub const BOOM_OS_OPTIONAL_KEYS: &str = "BOOM_OS_OPTIONAL_KEYS";

/// Serialisation order for OS profile keys.
pub const OS_PROFILE_KEYS: &[&str] = &[
    BOOM_OS_ID,
    BOOM_OS_NAME,
    BOOM_OS_SHORT_NAME,
    BOOM_OS_VERSION,
    BOOM_OS_VERSION_ID,
    BOOM_OS_KERNEL_PATTERN,
    BOOM_OS_INITRAMFS_PATTERN,
    BOOM_OS_ROOT_OPTS_LVM2,
    BOOM_OS_ROOT_OPTS_BTRFS,
    BOOM_OS_OPTIONS,
    BOOM_OS_TITLE,
    BOOM_OS_OPTIONAL_KEYS,
    BOOM_OS_UNAME_PATTERN,
];

/// The closed set of optional BLS keys a profile may permit.
pub const VALID_OPTIONAL_KEYS: &[&str] = &["grub_users", "grub_arg", "grub_class", "id"];

const DEFAULT_KERNEL_PATTERN: &str = "/vmlinuz-%{version}";
const DEFAULT_INITRAMFS_PATTERN: &str = "/initramfs-%{version}.img";
const DEFAULT_ROOT_OPTS_LVM2: &str = "rd.lvm.lv=%{lvm_root_lv}";
const DEFAULT_ROOT_OPTS_BTRFS: &str = "rootflags=%{btrfs_subvolume}";
const DEFAULT_OPTIONS: &str = "root=%{root_device} ro %{root_opts}";
const DEFAULT_TITLE: &str = "%{os_name} %{os_version_id} (%{version})";

/// Validate a set of space-separated optional key names.
pub(crate) fn check_optional_keys(optional_keys: &str) -> Result<()> {
    for key in optional_keys.split_whitespace() {
        if !VALID_OPTIONAL_KEYS.contains(&key) {
            return Err(BoomError::Profile(format!("unknown optional key: '{key}'")));
        }
    }
    Ok(())
}

/// Reject template values that embed the key they themselves define.
pub(crate) fn check_format_key_value(field: &str, value: &str, bad_keys: &[&str]) -> Result<()> {
    for bad in bad_keys {
        let fmt = key_from_key_name(bad);
        if value.contains(&fmt) {
            return Err(BoomError::Profile(format!("{field} cannot contain {fmt}")));
        }
    }
    Ok(())
}

/// An operating system profile: identity plus boot entry templates.
#[derive(Debug, Clone)]
pub struct OsProfile {
    os_id: String,
    name: String,
    short_name: String,
    version: String,
    version_id: String,
    uname_pattern: String,
    kernel_pattern: String,
    initramfs_pattern: String,
    root_opts_lvm2: String,
    root_opts_btrfs: String,
    options: String,
    title: String,
    optional_keys: String,
    unwritten: bool,
    comments: BTreeMap<String, String>,
}

impl Profile for OsProfile {
    fn os_id(&self) -> &str {
        &self.os_id
    }
    fn os_name(&self) -> &str {
        &self.name
    }
    fn os_short_name(&self) -> &str {
        &self.short_name
    }
    fn os_version(&self) -> &str {
        &self.version
    }
    fn os_version_id(&self) -> &str {
        &self.version_id
    }
    fn uname_pattern(&self) -> &str {
        &self.uname_pattern
    }
    fn kernel_pattern(&self) -> &str {
        &self.kernel_pattern
    }
    fn initramfs_pattern(&self) -> &str {
        &self.initramfs_pattern
    }
    fn root_opts_lvm2(&self) -> &str {
        &self.root_opts_lvm2
    }
    fn root_opts_btrfs(&self) -> &str {
        &self.root_opts_btrfs
    }
    fn options(&self) -> &str {
        &self.options
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn optional_keys(&self) -> &str {
        &self.optional_keys
    }
}

/// Builder for [`OsProfile`] values.
///
/// Unset template fields take the boom defaults; `build` enforces the
/// profile invariants.
#[derive(Debug, Default)]
pub struct OsProfileBuilder {
    name: String,
    short_name: String,
    version: String,
    version_id: String,
    uname_pattern: Option<String>,
    kernel_pattern: Option<String>,
    initramfs_pattern: Option<String>,
    root_opts_lvm2: Option<String>,
    root_opts_btrfs: Option<String>,
    options: Option<String>,
    title: Option<String>,
    optional_keys: Option<String>,
}

impl OsProfileBuilder {
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

    pub fn optional_keys(mut self, value: impl Into<String>) -> Self {
        self.optional_keys = Some(value.into());
        self
    }

    pub fn build(self) -> Result<OsProfile> {
        let identity = [&self.name, &self.short_name, &self.version, &self.version_id];
        if identity.iter().any(|v| v.is_empty()) {
            return Err(BoomError::Profile(
                "name, short_name, version, and version_id are mandatory".to_string(),
            ));
        }
        let mut osp = OsProfile {
            os_id: String::new(),
            name: self.name,
            short_name: self.short_name,
            version: self.version,
            version_id: self.version_id,
            uname_pattern: self.uname_pattern.unwrap_or_default(),
            kernel_pattern: self
                .kernel_pattern
                .unwrap_or_else(|| DEFAULT_KERNEL_PATTERN.to_string()),
            initramfs_pattern: self
                .initramfs_pattern
                .unwrap_or_else(|| DEFAULT_INITRAMFS_PATTERN.to_string()),
            root_opts_lvm2: self
                .root_opts_lvm2
                .unwrap_or_else(|| DEFAULT_ROOT_OPTS_LVM2.to_string()),
            root_opts_btrfs: self
                .root_opts_btrfs
                .unwrap_or_else(|| DEFAULT_ROOT_OPTS_BTRFS.to_string()),
            options: self.options.unwrap_or_else(|| DEFAULT_OPTIONS.to_string()),
            title: self.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            optional_keys: self.optional_keys.unwrap_or_default(),
            unwritten: true,
            comments: BTreeMap::new(),
        };
        osp.validate()?;
        osp.generate_id();
        Ok(osp)
    }
}

impl OsProfile {
    /// Start building a profile from its identity values.
    pub fn builder(
        name: impl Into<String>,
        short_name: impl Into<String>,
        version: impl Into<String>,
        version_id: impl Into<String>,
    ) -> OsProfileBuilder {
        OsProfileBuilder {
            name: name.into(),
            short_name: short_name.into(),
            version: version.into(),
            version_id: version_id.into(),
            ..Default::default()
        }
    }

    /// Start building a profile from os-release(5) data.
    pub fn builder_from_os_release(release: &os_release::OsRelease) -> OsProfileBuilder {
        OsProfile::builder(
            release.name.clone(),
            release.id.clone(),
            release.version.clone(),
            release.version_id.clone(),
        )
    }

    /// Start building a profile from an os-release file on disk.
    pub fn builder_from_os_release_file(path: &Utf8Path) -> Result<OsProfileBuilder> {
        let release = os_release::OsRelease::new_from(path).path_context(path.as_str())?;
        Ok(Self::builder_from_os_release(&release))
    }

    /// Start building a profile for the running host.
    pub fn builder_from_host_os_release() -> Result<OsProfileBuilder> {
        let release = os_release::OsRelease::new().path_context("/etc/os-release")?;
        Ok(Self::builder_from_os_release(&release))
    }

    /// The null profile: empty identity and templates, used as the
    /// binding of last resort for entries read from disk.
    pub fn null() -> OsProfile {
        OsProfile {
            os_id: sha1_hex(""),
            name: String::new(),
            short_name: String::new(),
            version: String::new(),
            version_id: String::new(),
            uname_pattern: String::new(),
            kernel_pattern: String::new(),
            initramfs_pattern: String::new(),
            root_opts_lvm2: String::new(),
            root_opts_btrfs: String::new(),
            options: String::new(),
            title: String::new(),
            // The null profile accepts any optional key so that
            // foreign entries carrying them can be represented.
            optional_keys: VALID_OPTIONAL_KEYS.join(" "),
            unwritten: false,
            comments: BTreeMap::new(),
        }
    }

    /// Return `true` if this is the null profile.
    pub fn is_null(&self) -> bool {
        self.name.is_empty()
            && self.short_name.is_empty()
            && self.version.is_empty()
            && self.version_id.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if !self.options.contains("root=") {
            return Err(BoomError::Profile(
                "OsProfile.options must include root= device option".to_string(),
            ));
        }
        check_format_key_value("OsProfile.kernel_pattern", &self.kernel_pattern, &[FMT_KERNEL])?;
        check_format_key_value(
            "OsProfile.initramfs_pattern",
            &self.initramfs_pattern,
            &[FMT_INITRAMFS],
        )?;
        check_format_key_value(
            "OsProfile.root_opts_lvm2",
            &self.root_opts_lvm2,
            &[FMT_ROOT_OPTS],
        )?;
        check_format_key_value(
            "OsProfile.root_opts_btrfs",
            &self.root_opts_btrfs,
            &[FMT_ROOT_OPTS],
        )?;
        check_optional_keys(&self.optional_keys)?;
        Ok(())
    }

    fn generate_id(&mut self) {
        let hashdata = format!("{}{}{}", self.short_name, self.version, self.version_id);
        self.os_id = sha1_hex(&hashdata);
    }

    /// Whether this profile has modifications not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.unwritten
    }

    pub fn set_uname_pattern(&mut self, value: impl Into<String>) {
        self.uname_pattern = value.into();
        self.unwritten = true;
    }

    pub fn set_kernel_pattern(&mut self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        check_format_key_value("OsProfile.kernel_pattern", &value, &[FMT_KERNEL])?;
        self.kernel_pattern = value;
        self.unwritten = true;
        Ok(())
    }

    pub fn set_initramfs_pattern(&mut self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        check_format_key_value("OsProfile.initramfs_pattern", &value, &[FMT_INITRAMFS])?;
        self.initramfs_pattern = value;
        self.unwritten = true;
        Ok(())
    }

    pub fn set_root_opts_lvm2(&mut self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        check_format_key_value("OsProfile.root_opts_lvm2", &value, &[FMT_ROOT_OPTS])?;
        self.root_opts_lvm2 = value;
        self.unwritten = true;
        Ok(())
    }

    pub fn set_root_opts_btrfs(&mut self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        check_format_key_value("OsProfile.root_opts_btrfs", &value, &[FMT_ROOT_OPTS])?;
        self.root_opts_btrfs = value;
        self.unwritten = true;
        Ok(())
    }

    pub fn set_options(&mut self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        if !value.contains("root=") {
            return Err(BoomError::Profile(
                "OsProfile.options must include root= device option".to_string(),
            ));
        }
        self.options = value;
        self.unwritten = true;
        Ok(())
    }

    pub fn set_title(&mut self, value: impl Into<String>) {
        self.title = value.into();
        self.unwritten = true;
    }

    /// Add a BLS key to the permitted optional key set.
    pub fn add_optional_key(&mut self, key: &str) -> Result<()> {
        check_optional_keys(key)?;
        if !self.permits_optional_key(key) {
            if self.optional_keys.is_empty() {
                self.optional_keys = key.to_string();
            } else {
                self.optional_keys = format!("{} {}", self.optional_keys, key);
            }
            self.unwritten = true;
        }
        Ok(())
    }

    /// Remove a BLS key from the permitted optional key set.
    pub fn del_optional_key(&mut self, key: &str) -> Result<()> {
        check_optional_keys(key)?;
        self.optional_keys = self
            .optional_keys
            .split_whitespace()
            .filter(|k| *k != key)
            .collect::<Vec<_>>()
            .join(" ");
        self.unwritten = true;
        Ok(())
    }

    /// Test a version string against this profile's uname pattern.
    pub fn match_uname_version(&self, version: &str) -> bool {
        if self.uname_pattern.is_empty() || version.is_empty() {
            return false;
        }
        log::debug!(
            "matching uname pattern '{}' to '{version}'",
            self.uname_pattern
        );
        match Regex::new(&self.uname_pattern) {
            Ok(re) => re.is_match(version),
            Err(e) => {
                log::warn!("invalid uname pattern '{}': {e}", self.uname_pattern);
                false
            }
        }
    }

    /// Test an entry's options string for a structural match against
    /// this profile's options template.
    ///
    /// This is the match of last resort when no uname pattern matched:
    /// every fixed word of the template must match a word of the entry
    /// options, and at least one format-key regex must capture.
    pub fn match_options(&self, entry_options: &str) -> bool {
        if self.options.is_empty() || entry_options.is_empty() {
            return false;
        }

        let regex_words = make_format_regexes(self, &self.options);
        log::debug!("matching options regex list with {} entries", regex_words.len());

        let word_matches = |expr: &str| -> bool {
            let anchored = format!("^(?:{expr})$");
            match Regex::new(&anchored) {
                Ok(re) => entry_options.split_whitespace().any(|w| re.is_match(w)),
                Err(_) => false,
            }
        };

        let mut have_format = false;
        for (name, expr) in &regex_words {
            if name.is_empty() {
                if !word_matches(expr) {
                    return false;
                }
            } else if word_matches(expr) {
                have_format = true;
            }
        }
        have_format
    }

    /// The on-disk file name for this profile.
    pub fn profile_file_name(&self) -> String {
        format!(
            "{}-{}{}.{}",
            self.os_id, self.short_name, self.version_id, PROFILE_EXT
        )
    }

    /// The absolute path of this profile below `profiles_dir`.
    pub fn profile_path(&self, profiles_dir: &Utf8Path) -> Utf8PathBuf {
        profiles_dir.join(self.profile_file_name())
    }

    fn to_file_string(&self) -> String {
        let mut values = BTreeMap::new();
        let mut set = |key: &str, value: &str| {
            values.insert(key.to_string(), value.to_string());
        };
        set(BOOM_OS_ID, &self.os_id);
        set(BOOM_OS_NAME, &self.name);
        set(BOOM_OS_SHORT_NAME, &self.short_name);
        set(BOOM_OS_VERSION, &self.version);
        set(BOOM_OS_VERSION_ID, &self.version_id);
        set(BOOM_OS_KERNEL_PATTERN, &self.kernel_pattern);
        set(BOOM_OS_INITRAMFS_PATTERN, &self.initramfs_pattern);
        set(BOOM_OS_ROOT_OPTS_LVM2, &self.root_opts_lvm2);
        set(BOOM_OS_ROOT_OPTS_BTRFS, &self.root_opts_btrfs);
        set(BOOM_OS_OPTIONS, &self.options);
        set(BOOM_OS_TITLE, &self.title);
        if !self.optional_keys.is_empty() {
            set(BOOM_OS_OPTIONAL_KEYS, &self.optional_keys);
        }
        if !self.uname_pattern.is_empty() {
            set(BOOM_OS_UNAME_PATTERN, &self.uname_pattern);
        }
        format_profile_lines(OS_PROFILE_KEYS, &values, &self.comments)
    }

    /// Write this profile to `profiles_dir` if dirty (or forced).
    pub fn write(&mut self, profiles_dir: &Utf8Path, force: bool) -> Result<()> {
        if !force && !self.unwritten {
            return Ok(());
        }
        let path = self.profile_path(profiles_dir);
        log::debug!("writing OsProfile(os_id='{}') to '{path}'", self.os_id);
        atomic_write(&path, self.to_file_string().as_bytes(), PROFILE_MODE)?;
        self.unwritten = false;
        Ok(())
    }

    /// Build a profile from on-disk profile data.
    pub(crate) fn from_profile_data(data: ProfileData) -> Result<OsProfile> {
        let get = |key: &str| data.values.get(key).cloned();
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                BoomError::Profile(format!("invalid profile data (missing {key})"))
            })
        };

        let mut osp = OsProfile {
            os_id: get(BOOM_OS_ID).unwrap_or_default(),
            name: required(BOOM_OS_NAME)?,
            short_name: required(BOOM_OS_SHORT_NAME)?,
            version: required(BOOM_OS_VERSION)?,
            version_id: required(BOOM_OS_VERSION_ID)?,
            kernel_pattern: get(BOOM_OS_KERNEL_PATTERN)
                .unwrap_or_else(|| DEFAULT_KERNEL_PATTERN.to_string()),
            initramfs_pattern: get(BOOM_OS_INITRAMFS_PATTERN)
                .unwrap_or_else(|| DEFAULT_INITRAMFS_PATTERN.to_string()),
            root_opts_lvm2: get(BOOM_OS_ROOT_OPTS_LVM2)
                .unwrap_or_else(|| DEFAULT_ROOT_OPTS_LVM2.to_string()),
            root_opts_btrfs: get(BOOM_OS_ROOT_OPTS_BTRFS)
                .unwrap_or_else(|| DEFAULT_ROOT_OPTS_BTRFS.to_string()),
            options: get(BOOM_OS_OPTIONS).unwrap_or_else(|| DEFAULT_OPTIONS.to_string()),
            title: get(BOOM_OS_TITLE).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            optional_keys: get(BOOM_OS_OPTIONAL_KEYS).unwrap_or_default(),
            uname_pattern: get(BOOM_OS_UNAME_PATTERN).unwrap_or_default(),
            unwritten: false,
            comments: data.comments,
        };
        osp.validate()?;
        if osp.os_id.is_empty() {
            osp.generate_id();
        }
        Ok(osp)
    }

    /// Load one profile from a file.
    pub fn from_file(path: &Utf8Path) -> Result<OsProfile> {
        log::debug!("loading OsProfile from '{path}'");
        Self::from_profile_data(read_profile_file(path)?)
    }
}

/// Test an `OsProfile` against selection criteria.
pub fn select_profile(s: &Selection, osp: &OsProfile) -> bool {
    if !s.allow_null_profile && osp.is_null() {
        return false;
    }
    match_prefix(s.os_id.as_deref(), osp.os_id())
        && match_eq(s.os_name.as_deref(), osp.os_name())
        && match_eq(s.os_short_name.as_deref(), osp.os_short_name())
        && match_eq(s.os_version.as_deref(), osp.os_version())
        && match_eq(s.os_version_id.as_deref(), osp.os_version_id())
        && match_eq(s.os_uname_pattern.as_deref(), osp.uname_pattern())
        && match_eq(s.os_kernel_pattern.as_deref(), osp.kernel_pattern())
        && match_eq(s.os_initramfs_pattern.as_deref(), osp.initramfs_pattern())
        && match_eq(s.os_options.as_deref(), osp.options())
}

/// The in-memory collection of OS profiles.
#[derive(Debug)]
pub struct ProfileStore {
    dir: Utf8PathBuf,
    profiles: Vec<OsProfile>,
    loaded: bool,
}

impl ProfileStore {
    pub fn new(dir: Utf8PathBuf) -> ProfileStore {
        ProfileStore {
            dir,
            profiles: vec![OsProfile::null()],
            loaded: false,
        }
    }

    /// The profiles directory this store reads and writes.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Drop all in-memory profiles, leaving only the null profile.
    pub fn drop_profiles(&mut self) {
        let count = self.profiles.len().saturating_sub(1);
        self.profiles = vec![OsProfile::null()];
        if count > 0 {
            log::info!("dropped {count} profiles");
        }
        self.loaded = false;
    }

    /// Load every `*.profile` file from the store directory. A profile
    /// that fails to load is skipped with a warning.
    pub fn load(&mut self) -> Result<()> {
        self.drop_profiles();
        log::debug!("loading profiles from {}", self.dir);

        let dir_entries = std::fs::read_dir(&self.dir).path_context(self.dir.as_str())?;
        for dir_entry in dir_entries {
            let dir_entry = dir_entry.path_context(self.dir.as_str())?;
            let Some(name) = dir_entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if !name.ends_with(&format!(".{PROFILE_EXT}")) {
                continue;
            }
            let path = self.dir.join(&name);
            match OsProfile::from_file(&path).and_then(|osp| self.add(osp).map(|_| ())) {
                Ok(()) => (),
                Err(e) => {
                    log::warn!("failed to load OsProfile from '{path}': {e}");
                    if crate::debug_enabled() {
                        return Err(e);
                    }
                }
            }
        }
        log::debug!("loaded {} profiles", self.profiles.len() - 1);
        self.loaded = true;
        Ok(())
    }

    pub fn ensure_loaded(&mut self) -> Result<()> {
        if !self.loaded {
            self.load()?;
        }
        Ok(())
    }

    /// Add a profile to the store, rejecting duplicate identities.
    pub fn add(&mut self, osp: OsProfile) -> Result<&OsProfile> {
        if self.profiles.iter().any(|p| p.os_id() == osp.os_id()) {
            return Err(BoomError::Profile(format!(
                "profile already exists (os_id={})",
                &osp.os_id()[..MIN_ID_WIDTH]
            )));
        }
        self.profiles.push(osp);
        Ok(self.profiles.last().expect("profile just added"))
    }

    /// The null profile.
    pub fn null_profile(&self) -> &OsProfile {
        &self.profiles[0]
    }

    /// Look up a profile by exact identifier.
    pub fn get(&self, os_id: &str) -> Option<&OsProfile> {
        self.profiles.iter().find(|p| p.os_id() == os_id)
    }

    /// Look up a single profile by identifier prefix, rejecting
    /// unknown and ambiguous prefixes.
    pub fn by_id(&self, os_id: &str) -> Result<&OsProfile> {
        let matches: Vec<&OsProfile> = self
            .profiles
            .iter()
            .filter(|p| !p.is_null() && p.os_id().starts_with(os_id))
            .collect();
        match matches.len() {
            0 => Err(BoomError::Profile(format!("no matching profile: {os_id}"))),
            1 => Ok(matches[0]),
            _ => Err(BoomError::Profile(format!(
                "OsProfile identifier '{os_id}' is ambiguous"
            ))),
        }
    }

    /// Mutable access to a profile by identifier prefix.
    pub fn by_id_mut(&mut self, os_id: &str) -> Result<&mut OsProfile> {
        let unique = self.by_id(os_id)?.os_id().to_string();
        Ok(self
            .profiles
            .iter_mut()
            .find(|p| p.os_id() == unique)
            .expect("profile just resolved"))
    }

    /// Find profiles matching the supplied selection, sorted by
    /// `(os_name, os_version)`.
    pub fn find(&self, selection: &Selection) -> Result<Vec<&OsProfile>> {
        selection.check_valid(SelectionKinds::PROFILE)?;
        let mut matches: Vec<&OsProfile> = self
            .profiles
            .iter()
            .filter(|osp| select_profile(selection, osp))
            .collect();
        matches.sort_by(|a, b| {
            (a.os_name(), a.os_version()).cmp(&(b.os_name(), b.os_version()))
        });
        Ok(matches)
    }

    /// Profiles in `(os_name, os_version)` order, excluding the null
    /// profile. Used for entry matching.
    fn sorted_real_profiles(&self) -> Vec<&OsProfile> {
        let mut profiles: Vec<&OsProfile> =
            self.profiles.iter().filter(|p| !p.is_null()).collect();
        profiles.sort_by(|a, b| {
            (a.os_name(), a.os_version()).cmp(&(b.os_name(), b.os_version()))
        });
        profiles
    }

    /// Attach a profile to an entry parsed from disk: first profile
    /// whose uname pattern matches the version, then first whose
    /// options template structurally matches, then the null profile.
    pub fn match_os_profile(&self, version: &str, options: &str) -> &OsProfile {
        for osp in self.sorted_real_profiles() {
            if osp.match_uname_version(version) {
                log::debug!(
                    "matched version '{version}' to OsProfile(name='{}', os_id='{}')",
                    osp.os_name(),
                    &osp.os_id()[..MIN_ID_WIDTH]
                );
                return osp;
            }
        }
        for osp in self.sorted_real_profiles() {
            if osp.match_options(options) {
                log::debug!(
                    "matched options to OsProfile(name='{}', os_id='{}')",
                    osp.os_name(),
                    &osp.os_id()[..MIN_ID_WIDTH]
                );
                return osp;
            }
        }
        log::debug!("no matching profile found for version '{version}'");
        self.null_profile()
    }

    /// Find the first profile with a uname pattern matching `version`.
    pub fn match_version(&self, version: &str) -> Option<&OsProfile> {
        self.sorted_real_profiles()
            .into_iter()
            .find(|osp| osp.match_uname_version(version))
    }

    /// Write every dirty profile to disk, logging and continuing on
    /// failure.
    pub fn write_all(&mut self, force: bool) {
        log::debug!("writing profiles to {}", self.dir);
        let dir = self.dir.clone();
        for osp in self.profiles.iter_mut().filter(|p| !p.is_null()) {
            if let Err(e) = osp.write(&dir, force) {
                log::warn!("failed to write OsProfile(os_id='{}'): {e}", osp.os_id());
            }
        }
    }

    /// Persist a single profile by identifier prefix.
    pub fn write_profile(&mut self, os_id: &str, force: bool) -> Result<()> {
        let dir = self.dir.clone();
        let osp = self.by_id_mut(os_id)?;
        osp.write(&dir, force)
    }

    /// Delete a profile from the store and from disk.
    pub fn delete(&mut self, os_id: &str) -> Result<()> {
        let unique = self.by_id(os_id)?.os_id().to_string();
        let index = self
            .profiles
            .iter()
            .position(|p| p.os_id() == unique)
            .expect("profile just resolved");
        let path = self.profiles[index].profile_path(&self.dir);
        if path.exists() {
            std::fs::remove_file(&path).path_context(path.as_str())?;
        }
        self.profiles.remove(index);
        log::debug!("deleted OsProfile(os_id='{unique}')");
        Ok(())
    }

    /// The minimum unique display width for os_id values.
    pub fn min_os_id_width(&self) -> usize {
        min_id_width(MIN_ID_WIDTH, self.profiles.iter(), |p| p.os_id())
    }
}
