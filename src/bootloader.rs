/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! BLS boot entries and the on-disk entry store.
//!
//! A [`BootEntry`] composes an OS (or host) profile with a set of
//! [`BootParams`] into a Boot Loader Specification snippet. Entries are
//! content-addressed: the `boot_id` is the SHA-1 of the entry's
//! canonical text and its leading seven characters appear in the entry
//! file name, so any change to the composition moves the file.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::digest::{min_id_width, sha1_hex, MIN_ID_WIDTH};
use crate::error::{BoomError, IoContext, Result};
use crate::hostprofile::HostStore;
use crate::keyvalue::{blank_or_comment, parse_name_value};
use crate::osprofile::ProfileStore;
use crate::platform::{is_stratis_device_path, PlatformProbe};
use crate::profile::{atomic_write, BootProfile, Profile};
use crate::selection::{match_eq, match_prefix, Selection, SelectionKinds};
use crate::template::{
    append_opts, drop_opts, expand_vars, key_from_key_name, make_format_regexes, FMT_BTRFS_ROOT_OPTS,
    FMT_BTRFS_SUBVOLUME, FMT_BTRFS_SUBVOL_ID, FMT_BTRFS_SUBVOL_PATH, FMT_INITRAMFS, FMT_KERNEL,
    FMT_LVM_ROOT_LV, FMT_LVM_ROOT_OPTS, FMT_OS_NAME, FMT_OS_SHORT_NAME, FMT_OS_VERSION,
    FMT_OS_VERSION_ID, FMT_ROOT_DEVICE, FMT_ROOT_OPTS, FMT_STRATIS_POOL_UUID,
    FMT_STRATIS_ROOT_OPTS, FMT_VERSION, GRUB2_EXPAND_ENV, ROOT_OPTS_STRATIS,
};

/// The file mode with which BLS entries are created.
pub const BOOT_ENTRY_MODE: u32 = 0o644;

/// Pattern for forming root device paths from LVM2 names.
const DEV_PATTERN: &str = "/dev/";

/// Comment binding an entry to its OS profile.
const OS_IDENTIFIER_TAG: &str = "OsIdentifier:";

/// Regular expression matching the boom entry file name format.
const ENTRY_FILE_PATTERN: &str = r"^(\w*)-([0-9a-f]{7,})-.*\.conf";

fn entry_file_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ENTRY_FILE_PATTERN).expect("entry file pattern is valid"))
}

/// The keys of a BLS boot entry, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKey {
    Title,
    MachineId,
    Version,
    Linux,
    Efi,
    Initrd,
    Options,
    Devicetree,
    Architecture,
    GrubId,
    GrubUsers,
    GrubArg,
    GrubClass,
}

impl EntryKey {
    /// All keys in the order used for canonical text and file output.
    pub const ALL: [EntryKey; 13] = [
        EntryKey::Title,
        EntryKey::MachineId,
        EntryKey::Version,
        EntryKey::Linux,
        EntryKey::Efi,
        EntryKey::Initrd,
        EntryKey::Options,
        EntryKey::Devicetree,
        EntryKey::Architecture,
        EntryKey::GrubId,
        EntryKey::GrubUsers,
        EntryKey::GrubArg,
        EntryKey::GrubClass,
    ];

    /// The non-standard keys permitted only when the bound profile
    /// allows them.
    pub const OPTIONAL: [EntryKey; 4] = [
        EntryKey::GrubId,
        EntryKey::GrubUsers,
        EntryKey::GrubArg,
        EntryKey::GrubClass,
    ];

    /// The on-disk BLS key name. Standard keys use hyphens; the Red
    /// Hat extensions keep their underscores.
    pub fn bls_name(self) -> &'static str {
        match self {
            EntryKey::Title => "title",
            EntryKey::MachineId => "machine-id",
            EntryKey::Version => "version",
            EntryKey::Linux => "linux",
            EntryKey::Efi => "efi",
            EntryKey::Initrd => "initrd",
            EntryKey::Options => "options",
            EntryKey::Devicetree => "devicetree",
            EntryKey::Architecture => "architecture",
            EntryKey::GrubId => "id",
            EntryKey::GrubUsers => "grub_users",
            EntryKey::GrubArg => "grub_arg",
            EntryKey::GrubClass => "grub_class",
        }
    }

    /// Map an on-disk BLS key name back to the entry key.
    pub fn from_bls_name(name: &str) -> Option<EntryKey> {
        EntryKey::ALL.into_iter().find(|k| k.bls_name() == name)
    }
}

/// Return the default value for an optional entry key, if it has one.
pub fn optional_key_default(key: EntryKey) -> Option<&'static str> {
    match key {
        EntryKey::GrubUsers => Some("$grub_users"),
        EntryKey::GrubArg => Some("--unrestricted"),
        EntryKey::GrubClass => Some("kernel"),
        EntryKey::GrubId => None,
        _ => None,
    }
}

/// Parse a BTRFS subvolume specification into either a subvolume path
/// or a subvolume identifier. Numeric identifiers are kept exactly as
/// given.
pub fn parse_btrfs_subvol(subvol: Option<&str>) -> (Option<String>, Option<String>) {
    match subvol {
        None | Some("") => (None, None),
        Some(subvol) if subvol.chars().all(|c| c.is_ascii_digit()) => {
            (None, Some(subvol.to_string()))
        }
        Some(subvol) => (Some(subvol.to_string()), None),
    }
}

/// Test whether the root device path `dev` exists and is a block
/// device.
pub fn check_root_device(dev: &str) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;
    let meta = std::fs::metadata(dev)
        .map_err(|_| BoomError::RootDevice(format!("device '{dev}' not found")))?;
    if !meta.file_type().is_block_device() {
        return Err(BoomError::RootDevice(format!(
            "path '{dev}' is not a block device"
        )));
    }
    Ok(())
}

/// Split a device-mapper name at the first single dash.
fn dm_split_name(name: &str) -> Option<(&str, &str)> {
    let bytes = name.as_bytes();
    for i in 1..bytes.len().saturating_sub(1) {
        if bytes[i] == b'-' && bytes[i - 1] != b'-' && bytes[i + 1] != b'-' {
            return Some((&name[..i], &name[i + 1..]));
        }
    }
    None
}

/// Return `true` if `rd_lvm_lv` (`vg/lv`) names the logical volume at
/// `root_device` (`/dev/vg/lv` or `/dev/mapper/vg-lv`).
fn match_root_lv(root_device: &str, rd_lvm_lv: &str) -> bool {
    if root_device.strip_prefix(DEV_PATTERN) == Some(rd_lvm_lv) {
        return true;
    }
    if root_device.contains("mapper") {
        if let Some(name) = root_device.rsplit('/').next() {
            if let Some((vg, lv)) = dm_split_name(name) {
                return rd_lvm_lv == format!("{vg}/{lv}");
            }
        }
    }
    false
}

/// The parameters needed to boot one instance of an operating system:
/// kernel version, root device, and root device options.
///
/// Every mutation ticks the `generation` counter; a containing
/// [`BootEntry`] compares generations to notice that its composition
/// has changed.
#[derive(Debug, Clone, Default)]
pub struct BootParams {
    version: String,
    root_device: Option<String>,
    lvm_root_lv: Option<String>,
    btrfs_subvol_path: Option<String>,
    btrfs_subvol_id: Option<String>,
    stratis_pool_uuid: Option<String>,
    add_opts: Vec<String>,
    del_opts: Vec<String>,
    generation: u64,
}

impl BootParams {
    /// Create boot parameters for a kernel version.
    pub fn new(version: impl Into<String>) -> Result<BootParams> {
        let version = version.into();
        if version.is_empty() {
            return Err(BoomError::Entry("version argument is required".to_string()));
        }
        Ok(BootParams {
            version,
            ..Default::default()
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn root_device(&self) -> Option<&str> {
        self.root_device.as_deref()
    }

    pub fn lvm_root_lv(&self) -> Option<&str> {
        self.lvm_root_lv.as_deref()
    }

    pub fn btrfs_subvol_path(&self) -> Option<&str> {
        self.btrfs_subvol_path.as_deref()
    }

    pub fn btrfs_subvol_id(&self) -> Option<&str> {
        self.btrfs_subvol_id.as_deref()
    }

    pub fn stratis_pool_uuid(&self) -> Option<&str> {
        self.stratis_pool_uuid.as_deref()
    }

    pub fn add_opts(&self) -> &[String] {
        &self.add_opts
    }

    pub fn del_opts(&self) -> &[String] {
        &self.del_opts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.generation += 1;
        self.version = version.into();
    }

    pub fn set_root_device(&mut self, root_device: impl Into<String>) {
        self.generation += 1;
        self.root_device = Some(root_device.into());
    }

    /// Set the LVM2 root logical volume. When no root device has been
    /// configured it defaults to the volume's `/dev` path.
    pub fn set_lvm_root_lv(&mut self, lvm_root_lv: impl Into<String>) {
        let lvm_root_lv = lvm_root_lv.into();
        if self.root_device.is_none() {
            self.root_device = Some(format!("{DEV_PATTERN}{lvm_root_lv}"));
        }
        self.generation += 1;
        self.lvm_root_lv = Some(lvm_root_lv);
    }

    pub fn set_btrfs_subvol_path(&mut self, subvol_path: impl Into<String>) {
        self.generation += 1;
        self.btrfs_subvol_path = Some(subvol_path.into());
    }

    pub fn set_btrfs_subvol_id(&mut self, subvol_id: impl Into<String>) {
        self.generation += 1;
        self.btrfs_subvol_id = Some(subvol_id.into());
    }

    pub fn set_stratis_pool_uuid(&mut self, pool_uuid: impl Into<String>) {
        self.generation += 1;
        self.stratis_pool_uuid = Some(pool_uuid.into());
    }

    pub fn set_add_opts(&mut self, add_opts: Vec<String>) {
        self.generation += 1;
        self.add_opts = add_opts;
    }

    pub fn set_del_opts(&mut self, del_opts: Vec<String>) {
        self.generation += 1;
        self.del_opts = del_opts;
    }

    /// Check the boot parameter invariants.
    pub fn validate(&self) -> Result<()> {
        if self.btrfs_subvol_path.is_some() && self.btrfs_subvol_id.is_some() {
            return Err(BoomError::Entry(
                "only one of btrfs_subvol_path and btrfs_subvol_id allowed".to_string(),
            ));
        }
        Ok(())
    }

    /// Return `true` if these parameters use a BTRFS subvolume.
    pub fn has_btrfs(&self) -> bool {
        self.btrfs_subvol_id.is_some() || self.btrfs_subvol_path.is_some()
    }

    /// Return `true` if these parameters use an LVM2 root volume.
    pub fn has_lvm2(&self) -> bool {
        self.lvm_root_lv.as_deref().map_or(false, |lv| !lv.is_empty())
    }

    /// Return `true` if the root device is a Stratis file system path.
    pub fn has_stratis(&self) -> bool {
        self.root_device
            .as_deref()
            .map_or(false, is_stratis_device_path)
    }

    /// Resolve the Stratis pool UUID from the root device path when no
    /// explicit value was supplied. Lookup failure leaves the value
    /// unset so that dependent keys stay unsubstituted.
    pub fn resolve_stratis(&mut self, probe: &dyn PlatformProbe) {
        if self.stratis_pool_uuid.is_some() || !self.has_stratis() {
            return;
        }
        let root_device = self.root_device.clone().unwrap_or_default();
        match probe.stratis_pool_uuid_of_path(&root_device) {
            Ok(uuid) => self.set_stratis_pool_uuid(uuid),
            Err(e) => log::warn!("could not resolve Stratis pool for '{root_device}': {e}"),
        }
    }

    fn set_by_format_key(&mut self, name: &str, value: &str) {
        match name {
            k if k == FMT_VERSION => self.set_version(value),
            k if k == FMT_ROOT_DEVICE => self.set_root_device(value),
            k if k == FMT_LVM_ROOT_LV => self.set_lvm_root_lv(value),
            k if k == FMT_BTRFS_SUBVOL_ID => self.set_btrfs_subvol_id(value),
            k if k == FMT_BTRFS_SUBVOL_PATH => self.set_btrfs_subvol_path(value),
            k if k == FMT_STRATIS_POOL_UUID => self.set_stratis_pool_uuid(value),
            _ => (),
        }
    }

    /// Recover boot parameters from a templated boot entry.
    ///
    /// Each template key becomes a named-capture regex matched against
    /// the words of the entry's options; leftover words become
    /// `add_opts` and template words absent from the options become
    /// `del_opts`. An entry with no usable options template (e.g. one
    /// bound to the null profile) yields `None`.
    pub fn from_entry(be: &BootEntry, probe: &dyn PlatformProbe) -> Option<BootParams> {
        let profile = be.profile()?;
        let version = be.version();
        if version.is_empty() {
            log::warn!("cannot recover BootParams without a version");
            return None;
        }

        let opts_regexes = make_format_regexes(profile.as_profile(), profile.options());
        if opts_regexes.is_empty() {
            return None;
        }
        log::debug!("matching options regex list with {} entries", opts_regexes.len());

        let mut bp = BootParams::new(version).ok()?;
        let expanded = be.expand_options(probe);
        let mut matched: BTreeSet<String> = BTreeSet::new();

        for (name, exp) in &opts_regexes {
            // Fixed words anchor at the start of the word; capture
            // words may match anywhere within it.
            let pattern = if name.is_empty() {
                format!("^(?:{exp})")
            } else {
                exp.clone()
            };
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            let mut value = String::new();
            for word in expanded.split_whitespace() {
                let Some(caps) = re.captures(word) else {
                    continue;
                };
                if let Some(group) = caps.get(1) {
                    value = group.as_str().to_string();
                }
                if name.as_str() == FMT_LVM_ROOT_LV
                    && !match_root_lv(bp.root_device().unwrap_or(""), &value)
                {
                    continue;
                }
                matched.insert(word.to_string());
                if !name.is_empty() {
                    bp.set_by_format_key(name, &value);
                }
            }
            if name.as_str() == FMT_ROOT_DEVICE && value.is_empty() {
                log::warn!("no root_device for entry with boot_id={}", be.disp_boot_id());
                bp.set_root_device("");
            }
        }

        let raw_options = be.options();
        let template_words: BTreeSet<&str> = profile.options().split_whitespace().collect();
        let has_env = raw_options.contains(GRUB2_EXPAND_ENV);
        let expansion: String = if has_env {
            expand_vars(&raw_options, probe)
        } else {
            String::new()
        };
        let expansion_words: BTreeSet<&str> = expansion.split_whitespace().collect();

        // Words that came from neither a template match, the literal
        // template, nor a bootloader environment expansion.
        let add_opts: Vec<String> = raw_options
            .split_whitespace()
            .filter(|opt| {
                !matched.contains(*opt)
                    && !template_words.contains(opt)
                    && (!has_env || expansion_words.contains(opt))
            })
            .map(String::from)
            .collect();

        // Template words whose key is absent from the final options,
        // ignoring parameters that are only rendered when set.
        let ignore: [&str; 5] = [
            "rootflags",
            "rd.lvm.lv",
            "subvol",
            "subvolid",
            "stratis.rootfs.pool_uuid",
        ];
        let matched_names: BTreeSet<&str> = matched
            .iter()
            .map(|word| word.split('=').next().unwrap_or(word.as_str()))
            .collect();
        let del_opts: Vec<String> = opts_regexes
            .iter()
            .map(|(_, exp)| exp)
            .filter(|exp| {
                let name = exp.split('=').next().unwrap_or(exp.as_str());
                !matched_names.contains(name) && !ignore.contains(&name)
            })
            .cloned()
            .collect();

        bp.add_opts = add_opts;
        bp.del_opts = del_opts;
        log::debug!("recovered BootParams(version='{}')", bp.version());
        Some(bp)
    }
}

/// A BLS compliant boot entry.
#[derive(Debug, Clone)]
pub struct BootEntry {
    /// Explicitly set entry values. A key present here overrides the
    /// value rendered from the profile templates.
    overrides: BTreeMap<EntryKey, String>,
    profile: Option<BootProfile>,
    bp: Option<BootParams>,
    bp_generation: u64,
    unwritten: bool,
    read_only: bool,
    suppress_machine_id: bool,
    last_path: Option<Utf8PathBuf>,
}

impl BootEntry {
    /// Create a new boot entry from its constituent parts.
    ///
    /// `title` may be omitted when the bound profile supplies a title
    /// template. Root device validation is the caller's concern.
    pub fn create(
        title: Option<&str>,
        machine_id: Option<&str>,
        profile: Option<BootProfile>,
        boot_params: Option<BootParams>,
        architecture: Option<&str>,
    ) -> Result<BootEntry> {
        if let Some(bp) = &boot_params {
            bp.validate()?;
        }
        let bp_generation = boot_params.as_ref().map_or(0, |bp| bp.generation());
        let mut entry = BootEntry {
            overrides: BTreeMap::new(),
            profile,
            bp: boot_params,
            bp_generation,
            unwritten: true,
            read_only: false,
            suppress_machine_id: false,
            last_path: None,
        };

        match title {
            Some(title) if !title.is_empty() => {
                entry.overrides.insert(EntryKey::Title, title.to_string());
            }
            _ => {
                let templated = entry.profile.as_ref().map_or("", |p| p.title());
                if templated.is_empty() {
                    return Err(BoomError::Entry("entry title cannot be empty".to_string()));
                }
            }
        }

        entry
            .overrides
            .insert(EntryKey::MachineId, machine_id.unwrap_or("").to_string());
        entry.set_architecture(architecture.unwrap_or(""))?;
        Ok(entry)
    }

    fn check_mutable(&self) -> Result<()> {
        if self.read_only {
            return Err(BoomError::Entry(format!(
                "entry with boot_id='{}' is read-only",
                self.disp_boot_id()
            )));
        }
        Ok(())
    }

    /// The profile bound to this entry, if any.
    pub fn profile(&self) -> Option<&BootProfile> {
        self.profile.as_ref()
    }

    /// Bind a profile to this entry.
    pub fn set_profile(&mut self, profile: BootProfile) -> Result<()> {
        self.check_mutable()?;
        self.profile = Some(profile);
        self.unwritten = true;
        Ok(())
    }

    /// The boot parameters attached to this entry, if any.
    pub fn params(&self) -> Option<&BootParams> {
        self.bp.as_ref()
    }

    /// Mutable access to the attached boot parameters. Changes tick
    /// the parameter generation and dirty the entry.
    pub fn params_mut(&mut self) -> Option<&mut BootParams> {
        self.bp.as_mut()
    }

    /// Replace the attached boot parameters, dirtying the entry.
    pub fn set_params(&mut self, bp: BootParams) -> Result<()> {
        self.check_mutable()?;
        bp.validate()?;
        self.bp_generation = bp.generation();
        self.bp = Some(bp);
        self.unwritten = true;
        Ok(())
    }

    /// Whether this entry was loaded from a non-boom file name and is
    /// therefore read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the machine id is omitted from the entry's canonical
    /// text (adopted from the file name of a foreign entry).
    pub fn suppresses_machine_id(&self) -> bool {
        self.suppress_machine_id
    }

    /// Whether this entry needs to be written to disk.
    pub fn is_dirty(&self) -> bool {
        self.unwritten
            || self
                .bp
                .as_ref()
                .map_or(false, |bp| bp.generation() != self.bp_generation)
    }

    /// The path this entry was last read from or written to.
    pub fn last_path(&self) -> Option<&Utf8Path> {
        self.last_path.as_deref()
    }

    fn override_value(&self, key: EntryKey) -> Option<&str> {
        self.overrides.get(&key).map(String::as_str)
    }

    /// Apply `%{key}` substitution to a format string using this
    /// entry's profile and boot parameters.
    ///
    /// A key whose source is undefined is left unsubstituted; a
    /// defined-but-empty source substitutes the empty string.
    pub fn apply_format(&self, fmt: &str) -> String {
        if fmt.is_empty() {
            return String::new();
        }
        let mut out = fmt.to_string();

        let keys = [
            FMT_VERSION,
            FMT_LVM_ROOT_LV,
            FMT_LVM_ROOT_OPTS,
            FMT_BTRFS_ROOT_OPTS,
            FMT_BTRFS_SUBVOLUME,
            FMT_STRATIS_POOL_UUID,
            FMT_STRATIS_ROOT_OPTS,
            FMT_ROOT_DEVICE,
            FMT_ROOT_OPTS,
            FMT_KERNEL,
            FMT_INITRAMFS,
            FMT_OS_NAME,
            FMT_OS_SHORT_NAME,
            FMT_OS_VERSION,
            FMT_OS_VERSION_ID,
        ];

        for key in keys {
            let fmt_key = key_from_key_name(key);
            if !out.contains(&fmt_key) {
                continue;
            }
            let bp = self.bp.as_ref();
            let profile = self.profile.as_ref();
            let value: Option<String> = match key {
                k if k == FMT_VERSION => bp
                    .map(|b| b.version().to_string())
                    .or_else(|| self.override_value(EntryKey::Version).map(String::from)),
                k if k == FMT_LVM_ROOT_LV => {
                    bp.and_then(|b| b.lvm_root_lv().map(String::from))
                }
                k if k == FMT_LVM_ROOT_OPTS => {
                    profile.map(|p| self.apply_format(p.root_opts_lvm2()))
                }
                k if k == FMT_BTRFS_ROOT_OPTS => {
                    profile.map(|p| self.apply_format(p.root_opts_btrfs()))
                }
                k if k == FMT_BTRFS_SUBVOLUME => bp.and_then(|b| {
                    if !b.has_btrfs() {
                        return None;
                    }
                    if let Some(id) = b.btrfs_subvol_id() {
                        Some(format!("subvolid={id}"))
                    } else {
                        b.btrfs_subvol_path().map(|p| format!("subvol={p}"))
                    }
                }),
                k if k == FMT_STRATIS_POOL_UUID => bp.and_then(|b| {
                    if b.has_stratis() {
                        b.stratis_pool_uuid().map(String::from)
                    } else {
                        None
                    }
                }),
                k if k == FMT_STRATIS_ROOT_OPTS => bp.and_then(|b| {
                    if b.has_stratis() {
                        Some(self.apply_format(ROOT_OPTS_STRATIS))
                    } else {
                        None
                    }
                }),
                k if k == FMT_ROOT_DEVICE => {
                    bp.and_then(|b| b.root_device().map(String::from))
                }
                k if k == FMT_ROOT_OPTS => Some(self.root_opts()),
                k if k == FMT_KERNEL => self.linux_opt(),
                k if k == FMT_INITRAMFS => self.initrd_opt(),
                k if k == FMT_OS_NAME => profile.map(|p| p.os_name().to_string()),
                k if k == FMT_OS_SHORT_NAME => profile.map(|p| p.os_short_name().to_string()),
                k if k == FMT_OS_VERSION => profile.map(|p| p.os_version().to_string()),
                k if k == FMT_OS_VERSION_ID => profile.map(|p| p.os_version_id().to_string()),
                _ => None,
            };
            if let Some(value) = value {
                out = out.replace(&fmt_key, &value);
            }
        }
        out
    }

    /// The root options string for this entry: the applicable LVM2,
    /// BTRFS and Stratis sub-expansions joined by single spaces.
    pub fn root_opts(&self) -> String {
        let (Some(profile), Some(bp)) = (self.profile.as_ref(), self.bp.as_ref()) else {
            return String::new();
        };
        let mut root_opts: Vec<String> = Vec::new();
        if bp.has_lvm2() {
            root_opts.push(self.apply_format(profile.root_opts_lvm2()));
        }
        if bp.has_btrfs() {
            root_opts.push(self.apply_format(profile.root_opts_btrfs()));
        }
        if bp.has_stratis() {
            root_opts.push(self.apply_format(ROOT_OPTS_STRATIS));
        }
        root_opts.join(" ").trim().to_string()
    }

    /// The entry title.
    pub fn title(&self) -> String {
        if let Some(title) = self.override_value(EntryKey::Title) {
            return title.to_string();
        }
        if self.profile.is_none() || self.bp.is_none() {
            return String::new();
        }
        let profile = self.profile.as_ref().expect("profile just checked");
        self.apply_format(profile.title())
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.check_mutable()?;
        if title.is_empty() {
            let templated = self.profile.as_ref().map_or("", |p| p.title());
            if templated.is_empty() {
                return Err(BoomError::Entry("entry title cannot be empty".to_string()));
            }
        }
        self.overrides.insert(EntryKey::Title, title.to_string());
        self.unwritten = true;
        Ok(())
    }

    /// The machine id of this entry.
    pub fn machine_id(&self) -> String {
        self.override_value(EntryKey::MachineId)
            .unwrap_or("")
            .to_string()
    }

    pub fn set_machine_id(&mut self, machine_id: &str) -> Result<()> {
        self.check_mutable()?;
        self.overrides
            .insert(EntryKey::MachineId, machine_id.to_string());
        self.unwritten = true;
        Ok(())
    }

    /// The version string of this entry. Attached boot parameters are
    /// authoritative unless an explicit override is present.
    pub fn version(&self) -> String {
        if let Some(bp) = &self.bp {
            if self.override_value(EntryKey::Version).is_none() {
                return bp.version().to_string();
            }
        }
        self.override_value(EntryKey::Version)
            .unwrap_or("")
            .to_string()
    }

    pub fn set_version(&mut self, version: &str) -> Result<()> {
        self.check_mutable()?;
        self.overrides
            .insert(EntryKey::Version, version.to_string());
        self.unwritten = true;
        Ok(())
    }

    fn linux_opt(&self) -> Option<String> {
        if self.profile.is_none() || self.overrides.contains_key(&EntryKey::Linux) {
            return self.override_value(EntryKey::Linux).map(String::from);
        }
        let profile = self.profile.as_ref().expect("profile just checked");
        Some(self.apply_format(profile.kernel_pattern()))
    }

    /// The bootable Linux image for this entry.
    pub fn linux(&self) -> String {
        self.linux_opt().unwrap_or_default()
    }

    pub fn set_linux(&mut self, linux: &str) -> Result<()> {
        self.check_mutable()?;
        self.overrides.insert(EntryKey::Linux, linux.to_string());
        self.unwritten = true;
        Ok(())
    }

    fn initrd_opt(&self) -> Option<String> {
        if self.profile.is_none() || self.overrides.contains_key(&EntryKey::Initrd) {
            return self.override_value(EntryKey::Initrd).map(String::from);
        }
        let profile = self.profile.as_ref().expect("profile just checked");
        Some(self.apply_format(profile.initramfs_pattern()))
    }

    /// The initramfs image for this entry.
    pub fn initrd(&self) -> String {
        self.initrd_opt().unwrap_or_default()
    }

    pub fn set_initrd(&mut self, initrd: &str) -> Result<()> {
        self.check_mutable()?;
        self.overrides.insert(EntryKey::Initrd, initrd.to_string());
        self.unwritten = true;
        Ok(())
    }

    fn options_impl(&self, expand: Option<&dyn PlatformProbe>) -> String {
        let maybe_expand = |opts: String| match expand {
            Some(probe) => expand_vars(&opts, probe),
            None => opts,
        };

        if let Some(stored) = self.override_value(EntryKey::Options) {
            if let Some(bp) = &self.bp {
                if !self.read_only {
                    let opts = append_opts(stored, bp.add_opts());
                    return maybe_expand(drop_opts(&opts, bp.del_opts()));
                }
            }
            return maybe_expand(stored.to_string());
        }

        if let (Some(profile), Some(bp)) = (self.profile.as_ref(), self.bp.as_ref()) {
            let opts = self.apply_format(profile.options());
            let opts = append_opts(&opts, bp.add_opts());
            return maybe_expand(drop_opts(&opts, bp.del_opts()));
        }

        String::new()
    }

    /// The kernel command line options for this entry, with any
    /// bootloader environment references left as written.
    pub fn options(&self) -> String {
        self.options_impl(None)
    }

    /// The kernel command line options with bootloader environment
    /// references expanded to their current values.
    pub fn expand_options(&self, probe: &dyn PlatformProbe) -> String {
        self.options_impl(Some(probe))
    }

    pub fn set_options(&mut self, options: &str) -> Result<()> {
        self.check_mutable()?;
        self.overrides
            .insert(EntryKey::Options, options.to_string());
        self.unwritten = true;
        Ok(())
    }

    /// The EFI application image for this entry.
    pub fn efi(&self) -> String {
        self.override_value(EntryKey::Efi).unwrap_or("").to_string()
    }

    pub fn set_efi(&mut self, efi: &str) -> Result<()> {
        self.check_mutable()?;
        self.overrides.insert(EntryKey::Efi, efi.to_string());
        self.unwritten = true;
        Ok(())
    }

    /// The devicetree archive for this entry.
    pub fn devicetree(&self) -> String {
        self.override_value(EntryKey::Devicetree)
            .unwrap_or("")
            .to_string()
    }

    pub fn set_devicetree(&mut self, devicetree: &str) -> Result<()> {
        self.check_mutable()?;
        self.overrides
            .insert(EntryKey::Devicetree, devicetree.to_string());
        self.unwritten = true;
        Ok(())
    }

    /// The EFI machine type string for this entry.
    pub fn architecture(&self) -> String {
        self.override_value(EntryKey::Architecture)
            .unwrap_or("")
            .to_string()
    }

    pub fn set_architecture(&mut self, architecture: &str) -> Result<()> {
        self.check_mutable()?;
        let machine_types = ["ia32", "x64", "ia64", "arm", "aa64", ""];
        if !machine_types.contains(&architecture.to_lowercase().as_str()) {
            return Err(BoomError::Entry(format!(
                "unknown architecture: '{architecture}'"
            )));
        }
        self.overrides
            .insert(EntryKey::Architecture, architecture.to_string());
        self.unwritten = true;
        Ok(())
    }

    fn optional_key_value(&self, key: EntryKey) -> String {
        let permitted = self
            .profile
            .as_ref()
            .map_or(false, |p| p.permits_optional_key(key.bls_name()));
        if !permitted {
            return String::new();
        }
        self.override_value(key).unwrap_or("").to_string()
    }

    fn set_optional_key(&mut self, key: EntryKey, value: &str) -> Result<()> {
        self.check_mutable()?;
        let permitted = self
            .profile
            .as_ref()
            .map_or(false, |p| p.permits_optional_key(key.bls_name()));
        if !permitted {
            return Err(BoomError::Entry(format!(
                "bound profile does not allow '{}'",
                key.bls_name()
            )));
        }
        self.overrides.insert(key, value.to_string());
        self.unwritten = true;
        Ok(())
    }

    pub fn grub_users(&self) -> String {
        self.optional_key_value(EntryKey::GrubUsers)
    }

    pub fn set_grub_users(&mut self, value: &str) -> Result<()> {
        self.set_optional_key(EntryKey::GrubUsers, value)
    }

    pub fn grub_arg(&self) -> String {
        self.optional_key_value(EntryKey::GrubArg)
    }

    pub fn set_grub_arg(&mut self, value: &str) -> Result<()> {
        self.set_optional_key(EntryKey::GrubArg, value)
    }

    pub fn grub_class(&self) -> String {
        self.optional_key_value(EntryKey::GrubClass)
    }

    pub fn set_grub_class(&mut self, value: &str) -> Result<()> {
        self.set_optional_key(EntryKey::GrubClass, value)
    }

    pub fn grub_id(&self) -> String {
        self.optional_key_value(EntryKey::GrubId)
    }

    pub fn set_grub_id(&mut self, value: &str) -> Result<()> {
        self.set_optional_key(EntryKey::GrubId, value)
    }

    /// Apply the default value for every optional key the bound
    /// profile permits, leaving explicitly set values alone.
    pub fn apply_optional_key_defaults(&mut self) -> Result<()> {
        for key in EntryKey::OPTIONAL {
            let permitted = self
                .profile
                .as_ref()
                .map_or(false, |p| p.permits_optional_key(key.bls_name()));
            if !permitted || self.overrides.contains_key(&key) {
                continue;
            }
            if let Some(default) = optional_key_default(key) {
                self.set_optional_key(key, default)?;
            }
        }
        Ok(())
    }

    fn key_value(&self, key: EntryKey) -> String {
        match key {
            EntryKey::Title => self.title(),
            EntryKey::MachineId => self.machine_id(),
            EntryKey::Version => self.version(),
            EntryKey::Linux => self.linux(),
            EntryKey::Efi => self.efi(),
            EntryKey::Initrd => self.initrd(),
            EntryKey::Options => self.options(),
            EntryKey::Devicetree => self.devicetree(),
            EntryKey::Architecture => self.architecture(),
            EntryKey::GrubId => self.grub_id(),
            EntryKey::GrubUsers => self.grub_users(),
            EntryKey::GrubArg => self.grub_arg(),
            EntryKey::GrubClass => self.grub_class(),
        }
    }

    fn format_text(&self, expand: Option<&dyn PlatformProbe>) -> String {
        let mut lines: Vec<String> = Vec::new();
        for key in EntryKey::ALL {
            if key == EntryKey::MachineId && self.suppress_machine_id {
                continue;
            }
            let value = match (key, expand) {
                (EntryKey::Options, Some(probe)) => self.expand_options(probe),
                (_, Some(probe)) => expand_vars(&self.key_value(key), probe),
                (_, None) => self.key_value(key),
            };
            if value.is_empty() {
                continue;
            }
            lines.push(format!("{} {}", key.bls_name(), value));
        }
        lines.join("\n")
    }

    /// The canonical textual form of this entry: one `key value` line
    /// per populated key, in fixed order, excluding any suppressed
    /// machine id. This text is the input to the `boot_id` digest.
    pub fn canonical_text(&self) -> String {
        self.format_text(None)
    }

    /// The canonical text with bootloader environment variables
    /// expanded.
    pub fn expanded_text(&self, probe: &dyn PlatformProbe) -> String {
        self.format_text(Some(probe))
    }

    /// The SHA-1 identity of this entry's canonical text.
    pub fn boot_id(&self) -> String {
        sha1_hex(&self.canonical_text())
    }

    /// The display prefix of this entry's `boot_id`.
    pub fn disp_boot_id(&self) -> String {
        self.boot_id()[..MIN_ID_WIDTH].to_string()
    }

    /// The file name this entry should be stored under.
    pub fn entry_file_name(&self) -> String {
        format!(
            "{}-{}-{}.conf",
            self.machine_id(),
            &self.boot_id()[..MIN_ID_WIDTH],
            self.version()
        )
    }

    /// The path this entry should be stored at below `entries_dir`.
    /// Read-only entries keep the path they were loaded from.
    pub fn entry_path(&self, entries_dir: &Utf8Path) -> Utf8PathBuf {
        if self.read_only {
            if let Some(last_path) = &self.last_path {
                return last_path.clone();
            }
        }
        entries_dir.join(self.entry_file_name())
    }

    /// Write this entry to `entries_dir` if dirty (or forced).
    pub fn write(&mut self, entries_dir: &Utf8Path, force: bool) -> Result<()> {
        self.write_impl(entries_dir, force, None)
    }

    /// Write this entry with bootloader environment variables expanded
    /// in the on-disk text.
    pub fn write_expanded(
        &mut self,
        entries_dir: &Utf8Path,
        force: bool,
        probe: &dyn PlatformProbe,
    ) -> Result<()> {
        self.write_impl(entries_dir, force, Some(probe))
    }

    fn write_impl(
        &mut self,
        entries_dir: &Utf8Path,
        force: bool,
        expand: Option<&dyn PlatformProbe>,
    ) -> Result<()> {
        if !self.is_dirty() && !force {
            return Ok(());
        }
        let entry_path = entries_dir.join(self.entry_file_name());
        let mut body = String::new();
        if let Some(profile) = &self.profile {
            body.push_str(&format!("#{OS_IDENTIFIER_TAG} {}\n", profile.identity()));
        }
        body.push_str(&self.format_text(expand));
        body.push('\n');
        atomic_write(&entry_path, body.as_bytes(), BOOT_ENTRY_MODE)?;

        self.last_path = Some(entry_path);
        self.unwritten = false;
        self.bp_generation = self.bp.as_ref().map_or(0, |bp| bp.generation());
        Ok(())
    }

    /// Write this entry and unlink its previous path if the identity
    /// moved the file.
    pub fn update(&mut self, entries_dir: &Utf8Path, force: bool) -> Result<()> {
        let to_unlink = self.last_path.clone();
        self.write(entries_dir, force)?;
        log::info!(
            "rewrote entry {} as {}",
            self.disp_boot_id(),
            self.entry_path(entries_dir)
        );
        if let Some(old_path) = to_unlink {
            if Some(&old_path) != self.last_path.as_ref() {
                if let Err(e) = std::fs::remove_file(&old_path) {
                    log::error!("error unlinking entry file {old_path}: {e}");
                }
            }
        }
        Ok(())
    }

    /// Remove the on-disk file for this entry. Read-only entries and
    /// entries that are absent from disk are refused.
    pub fn delete(&self, entries_dir: &Utf8Path) -> Result<()> {
        if self.read_only {
            return Err(BoomError::Entry(format!(
                "cannot delete read-only boot entry: {}",
                self.last_path.as_deref().unwrap_or(Utf8Path::new(""))
            )));
        }
        let entry_path = self.entry_path(entries_dir);
        if !entry_path.exists() {
            return Err(BoomError::Entry(format!(
                "entry does not exist: {entry_path}"
            )));
        }
        std::fs::remove_file(&entry_path).path_context(entry_path.as_str())?;
        Ok(())
    }

    /// Try to obtain a machine id from a BLS entry file name.
    fn machine_id_from_filename(filename: &str) -> Option<&str> {
        let candidate = filename.split('-').next()?;
        if candidate.len() != 32 {
            return None;
        }
        candidate
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
            .then_some(candidate)
    }

    /// Drop overrides whose stored value matches what the attached
    /// profile and parameters would render anyway, so that templates
    /// stay authoritative for loaded entries.
    fn drop_redundant_overrides(&mut self) {
        for key in [
            EntryKey::Version,
            EntryKey::Linux,
            EntryKey::Initrd,
            EntryKey::Options,
        ] {
            let Some(stored) = self.overrides.remove(&key) else {
                continue;
            };
            if self.key_value(key) != stored {
                self.overrides.insert(key, stored);
            }
        }
    }

    /// Load a boot entry from an on-disk BLS snippet.
    ///
    /// The loader binds a profile (via `#OsIdentifier`, uname pattern
    /// or options probe), recovers boot parameters, wraps the profile
    /// with a host profile when one matches the machine id, marks
    /// foreign file names read-only, and rewrites entries whose file
    /// name no longer matches their identity.
    pub fn from_file(
        path: &Utf8Path,
        profiles: &ProfileStore,
        hosts: &HostStore,
        probe: &dyn PlatformProbe,
    ) -> Result<BootEntry> {
        let basename = path.file_name().unwrap_or_default().to_string();
        log::debug!("loading BootEntry from '{basename}'");

        let text = std::fs::read_to_string(path).path_context(path.as_str())?;
        let mut overrides: BTreeMap<EntryKey, String> = BTreeMap::new();
        let mut comment_profile: Option<BootProfile> = None;
        let mut comment = String::new();

        for line in text.lines() {
            if blank_or_comment(line) {
                comment.push_str(line);
                comment.push('\n');
                continue;
            }
            let (bls_key, value) = parse_name_value(line, None, true)?;
            let key = EntryKey::from_bls_name(&bls_key)
                .ok_or_else(|| BoomError::Entry(format!("unknown BLS key '{bls_key}'")))?;
            overrides.insert(key, value.unwrap_or_default());

            if comment.contains(OS_IDENTIFIER_TAG) {
                for comment_line in comment.lines() {
                    let Some((_, os_id)) = comment_line.split_once(OS_IDENTIFIER_TAG) else {
                        continue;
                    };
                    if let Some(osp) = profiles.get(os_id.trim()) {
                        if comment_profile.is_none() {
                            log::debug!("parsed os_id='{}' from comment", osp.os_id());
                            comment_profile = Some(BootProfile::Os(osp.clone()));
                        }
                    }
                }
            }
            comment.clear();
        }

        // Red Hat native BLS entries omit the machine-id key; adopt
        // the value from the file name but keep it out of the
        // canonical text.
        let mut suppress_machine_id = false;
        if !overrides.contains_key(&EntryKey::MachineId) {
            if let Some(machine_id) = Self::machine_id_from_filename(&basename) {
                overrides.insert(EntryKey::MachineId, machine_id.to_string());
                suppress_machine_id = true;
            }
        }

        if !overrides.contains_key(&EntryKey::Title) {
            return Err(BoomError::Entry(format!("{basename}: missing title")));
        }
        if !overrides.contains_key(&EntryKey::Linux) && !overrides.contains_key(&EntryKey::Efi) {
            return Err(BoomError::Entry(format!("{basename}: missing linux or efi")));
        }

        let mut entry = BootEntry {
            overrides,
            profile: comment_profile,
            bp: None,
            bp_generation: 0,
            unwritten: false,
            read_only: false,
            suppress_machine_id,
            last_path: Some(path.to_path_buf()),
        };

        if entry.profile.is_none() {
            let osp = profiles.match_os_profile(&entry.version(), &entry.options());
            entry.profile = Some(BootProfile::Os(osp.clone()));
        }

        // Recover boot parameters from the templated options line.
        if let Some(bp) = BootParams::from_entry(&entry, probe) {
            entry.bp_generation = bp.generation();
            entry.bp = Some(bp);
        }

        // Wrap the OS profile with a host profile when one matches.
        let machine_id = entry.machine_id();
        if !machine_id.is_empty() {
            if let Some(hp) = hosts.match_machine_id(&machine_id) {
                if let Some(bp) = entry.bp.as_mut() {
                    bp.set_add_opts(
                        hp.add_opts().split_whitespace().map(String::from).collect(),
                    );
                    bp.set_del_opts(
                        hp.del_opts().split_whitespace().map(String::from).collect(),
                    );
                }
                entry.profile = Some(BootProfile::Host(hp.clone()));
            }
        }

        entry.drop_redundant_overrides();
        entry.bp_generation = entry.bp.as_ref().map_or(0, |bp| bp.generation());

        match entry_file_regex().captures(&basename) {
            None => {
                log::info!("marking unknown boot entry as read-only: {basename}");
                entry.read_only = true;
            }
            Some(caps) => {
                let file_boot_id = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                if !entry.boot_id().starts_with(file_boot_id) {
                    log::info!("entry file name does not match boot_id: {basename}");
                    let entries_dir = path.parent().unwrap_or(Utf8Path::new(".")).to_path_buf();
                    entry.update(&entries_dir, true)?;
                }
            }
        }

        Ok(entry)
    }
}

/// Test `BootParams` against selection criteria.
fn select_params(s: &Selection, bp: Option<&BootParams>) -> bool {
    let params_criteria = [
        &s.root_device,
        &s.lvm_root_lv,
        &s.btrfs_subvol_path,
        &s.btrfs_subvol_id,
    ];
    let Some(bp) = bp else {
        return params_criteria.iter().all(|c| c.is_none());
    };
    match_eq(s.root_device.as_deref(), bp.root_device().unwrap_or(""))
        && match_eq(s.lvm_root_lv.as_deref(), bp.lvm_root_lv().unwrap_or(""))
        && match_eq(
            s.btrfs_subvol_path.as_deref(),
            bp.btrfs_subvol_path().unwrap_or(""),
        )
        && match_eq(
            s.btrfs_subvol_id.as_deref(),
            bp.btrfs_subvol_id().unwrap_or(""),
        )
}

/// Test a `BootEntry` against selection criteria.
pub fn select_entry(s: &Selection, be: &BootEntry) -> bool {
    // Entries bound to the null profile (or nothing at all) are
    // excluded from default selections.
    let is_null = be.profile().map_or(true, |p| p.is_null());
    if is_null && !s.allow_null_profile {
        return false;
    }
    if let Some(profile) = be.profile() {
        if !match_prefix(s.os_id.as_deref(), profile.os_id())
            || !match_eq(s.os_name.as_deref(), profile.os_name())
            || !match_eq(s.os_short_name.as_deref(), profile.os_short_name())
            || !match_eq(s.os_version.as_deref(), profile.os_version())
            || !match_eq(s.os_version_id.as_deref(), profile.os_version_id())
        {
            return false;
        }
    }
    if let Some(path) = s.path.as_deref() {
        if path != be.linux() && path != be.initrd() {
            return false;
        }
    }
    match_prefix(s.boot_id.as_deref(), &be.boot_id())
        && match_eq(s.title.as_deref(), &be.title())
        && match_eq(s.version.as_deref(), &be.version())
        && match_eq(s.machine_id.as_deref(), &be.machine_id())
        && match_eq(s.linux.as_deref(), &be.linux())
        && match_eq(s.initrd.as_deref(), &be.initrd())
        && match_eq(s.efi.as_deref(), &be.efi())
        && match_eq(s.options.as_deref(), &be.options())
        && match_eq(s.devicetree.as_deref(), &be.devicetree())
        && select_params(s, be.params())
}

/// The in-memory collection of boot entries.
#[derive(Debug)]
pub struct EntryStore {
    dir: Utf8PathBuf,
    entries: Vec<BootEntry>,
    loaded: bool,
}

impl EntryStore {
    pub fn new(dir: Utf8PathBuf) -> EntryStore {
        EntryStore {
            dir,
            entries: Vec::new(),
            loaded: false,
        }
    }

    /// The entries directory this store reads and writes.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn drop_entries(&mut self) {
        self.entries.clear();
        self.loaded = false;
    }

    /// Load boot entries from the entries directory, optionally
    /// filtering by machine id on the file name. An entry that fails
    /// to load is skipped with a warning.
    pub fn load(
        &mut self,
        profiles: &ProfileStore,
        hosts: &HostStore,
        probe: &dyn PlatformProbe,
        machine_id: Option<&str>,
    ) -> Result<()> {
        self.drop_entries();
        log::debug!("loading boot entries from '{}'", self.dir);

        let dir_entries = std::fs::read_dir(&self.dir).path_context(self.dir.as_str())?;
        for dir_entry in dir_entries {
            let dir_entry = dir_entry.path_context(self.dir.as_str())?;
            let Some(name) = dir_entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if !name.ends_with(".conf") {
                continue;
            }
            if let Some(machine_id) = machine_id {
                if !name.contains(machine_id) {
                    log::debug!("skipping entry with machine_id!='{machine_id}'");
                    continue;
                }
            }
            let path = self.dir.join(&name);
            match BootEntry::from_file(&path, profiles, hosts, probe) {
                Ok(entry) => self.add(entry),
                Err(e) => {
                    log::info!("could not load BootEntry '{path}': {e}");
                    if crate::debug_enabled() {
                        return Err(e);
                    }
                }
            }
        }
        log::debug!("loaded {} entries", self.entries.len());
        self.loaded = true;
        Ok(())
    }

    pub fn ensure_loaded(
        &mut self,
        profiles: &ProfileStore,
        hosts: &HostStore,
        probe: &dyn PlatformProbe,
    ) -> Result<()> {
        if !self.loaded {
            self.load(profiles, hosts, probe, None)?;
        }
        Ok(())
    }

    /// Add an entry to the store unless an identical identity is
    /// already present.
    pub fn add(&mut self, entry: BootEntry) {
        let boot_id = entry.boot_id();
        if self.entries.iter().any(|e| e.boot_id() == boot_id) {
            return;
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[BootEntry] {
        &self.entries
    }

    /// Find entries matching the supplied selection.
    pub fn find(&self, selection: &Selection) -> Result<Vec<&BootEntry>> {
        selection.check_valid(SelectionKinds::ENTRY)?;
        Ok(self
            .entries
            .iter()
            .filter(|be| select_entry(selection, be))
            .collect())
    }

    /// Look up a single entry by `boot_id` prefix, rejecting unknown
    /// and ambiguous prefixes.
    pub fn by_id(&self, boot_id: &str) -> Result<&BootEntry> {
        let matches: Vec<&BootEntry> = self
            .entries
            .iter()
            .filter(|e| e.boot_id().starts_with(boot_id))
            .collect();
        match matches.len() {
            0 => Err(BoomError::Entry(format!("no matching entry: {boot_id}"))),
            1 => Ok(matches[0]),
            _ => Err(BoomError::Entry(format!(
                "boot_id '{boot_id}' is ambiguous"
            ))),
        }
    }

    /// Mutable access to an entry by `boot_id` prefix.
    pub fn by_id_mut(&mut self, boot_id: &str) -> Result<&mut BootEntry> {
        let unique = self.by_id(boot_id)?.boot_id();
        Ok(self
            .entries
            .iter_mut()
            .find(|e| e.boot_id() == unique)
            .expect("entry just resolved"))
    }

    /// Delete an entry from the store and remove its on-disk file.
    pub fn delete(&mut self, boot_id: &str) -> Result<()> {
        let unique = self.by_id(boot_id)?.boot_id();
        let index = self
            .entries
            .iter()
            .position(|e| e.boot_id() == unique)
            .expect("entry just resolved");
        self.entries[index].delete(&self.dir)?;
        self.entries.remove(index);
        Ok(())
    }

    /// Write every dirty entry, logging and continuing on failure.
    pub fn write_all(&mut self, force: bool) {
        let dir = self.dir.clone();
        for be in self.entries.iter_mut() {
            if let Err(e) = be.write(&dir, force) {
                log::warn!("could not write BootEntry(boot_id='{}'): {e}", be.disp_boot_id());
            }
        }
    }

    /// The minimum unique display width for boot_id values.
    pub fn min_boot_id_width(&self) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.boot_id()).collect();
        min_id_width(MIN_ID_WIDTH, ids.iter(), |id| id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osprofile::OsProfile;
    use crate::platform::TestProbe;

    fn rhel72() -> OsProfile {
        OsProfile::builder("Red Hat Enterprise Linux Server", "rhel", "7.2 (Maipo)", "7.2")
            .uname_pattern("el7")
            .options("root=%{root_device} ro %{root_opts} rhgb quiet")
            .root_opts_lvm2("rd.lvm.lv=%{lvm_root_lv}")
            .kernel_pattern("/vmlinuz-%{version}")
            .initramfs_pattern("/initramfs-%{version}.img")
            .build()
            .unwrap()
    }

    fn lvm_entry() -> BootEntry {
        let mut bp = BootParams::new("3.10-23.el7").unwrap();
        bp.set_root_device("/dev/vg00/lvol0");
        bp.set_lvm_root_lv("vg00/lvol0");
        BootEntry::create(
            Some("title"),
            Some("ffffffff"),
            Some(BootProfile::Os(rhel72())),
            Some(bp),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_lvm_composition() {
        let be = lvm_entry();
        assert_eq!(
            be.options(),
            "root=/dev/vg00/lvol0 ro rd.lvm.lv=vg00/lvol0 rhgb quiet"
        );
        assert_eq!(be.linux(), "/vmlinuz-3.10-23.el7");
        assert_eq!(be.initrd(), "/initramfs-3.10-23.el7.img");
    }

    #[test]
    fn test_btrfs_subvol_id_composition() {
        let mut bp = BootParams::new("1.1").unwrap();
        bp.set_root_device("/dev/sda5");
        bp.set_btrfs_subvol_id("232");
        let be = BootEntry::create(
            Some("title"),
            Some("ffffffff"),
            Some(BootProfile::Os(rhel72())),
            Some(bp),
            None,
        )
        .unwrap();
        assert_eq!(be.root_opts(), "rootflags=subvolid=232");
        assert_eq!(be.options(), "root=/dev/sda5 ro rootflags=subvolid=232 rhgb quiet");
    }

    #[test]
    fn test_btrfs_subvol_path_composition() {
        let mut bp = BootParams::new("1.1").unwrap();
        bp.set_root_device("/dev/sda5");
        bp.set_btrfs_subvol_path("/snapshots/snap1");
        let be = BootEntry::create(
            Some("title"),
            Some("ffffffff"),
            Some(BootProfile::Os(rhel72())),
            Some(bp),
            None,
        )
        .unwrap();
        assert_eq!(be.root_opts(), "rootflags=subvol=/snapshots/snap1");
    }

    #[test]
    fn test_add_del_opts() {
        let mut bp = BootParams::new("3.10-23.el7").unwrap();
        bp.set_root_device("/dev/vg00/lvol0");
        bp.set_lvm_root_lv("vg00/lvol0");
        bp.set_add_opts(vec!["debug".to_string()]);
        bp.set_del_opts(vec!["rhgb".to_string(), "quiet".to_string()]);
        let be = BootEntry::create(
            Some("title"),
            Some("ffffffff"),
            Some(BootProfile::Os(rhel72())),
            Some(bp),
            None,
        )
        .unwrap();
        let options = be.options();
        assert!(options.ends_with(" debug"));
        assert!(!options.contains("rhgb"));
        assert!(!options.contains("quiet"));
    }

    #[test]
    fn test_fixed_boot_id() {
        // A profile carrying only the default templates.
        let osp = OsProfile::builder("Distribution", "distro", "1 (Workstation)", "1")
            .build()
            .unwrap();
        let mut bp = BootParams::new("1.1.1.x86_64").unwrap();
        bp.set_root_device("/dev/sda5");
        let be = BootEntry::create(
            Some("title"),
            Some("ffffffff"),
            Some(BootProfile::Os(osp)),
            Some(bp),
            None,
        )
        .unwrap();
        assert_eq!(
            be.canonical_text(),
            "title title\n\
             machine-id ffffffff\n\
             version 1.1.1.x86_64\n\
             linux /vmlinuz-1.1.1.x86_64\n\
             initrd /initramfs-1.1.1.x86_64.img\n\
             options root=/dev/sda5 ro"
        );
        assert_eq!(be.boot_id(), "f0a46b7a6e982cab4163af6b45087e87691a0c43");
    }

    #[test]
    fn test_boot_id_without_profile() {
        // With no bound profile only explicitly set keys are hashed.
        let mut bp = BootParams::new("1.1.1.x86_64").unwrap();
        bp.set_root_device("/dev/sda5");
        let be =
            BootEntry::create(Some("title"), Some("ffffffff"), None, Some(bp), None).unwrap();
        assert_eq!(
            be.canonical_text(),
            "title title\nmachine-id ffffffff\nversion 1.1.1.x86_64"
        );
        assert_eq!(be.boot_id().len(), 40);
    }

    #[test]
    fn test_title_from_profile_template() {
        let mut bp = BootParams::new("3.10-23.el7").unwrap();
        bp.set_root_device("/dev/sda5");
        let be = BootEntry::create(
            None,
            Some("ffffffff"),
            Some(BootProfile::Os(rhel72())),
            Some(bp),
            None,
        )
        .unwrap();
        assert_eq!(
            be.title(),
            "Red Hat Enterprise Linux Server 7.2 (3.10-23.el7)"
        );
    }

    #[test]
    fn test_missing_title_rejected() {
        let bp = BootParams::new("1.1").unwrap();
        assert!(BootEntry::create(None, Some("ffffffff"), None, Some(bp), None).is_err());
    }

    #[test]
    fn test_bad_architecture_rejected() {
        let bp = BootParams::new("1.1").unwrap();
        assert!(
            BootEntry::create(Some("t"), Some("ffffffff"), None, Some(bp), Some("sparc"))
                .is_err()
        );
    }

    #[test]
    fn test_param_mutation_dirties_entry() {
        let mut be = lvm_entry();
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        be.write(&dir, false).unwrap();
        assert!(!be.is_dirty());
        be.params_mut().unwrap().set_version("3.10-24.el7");
        assert!(be.is_dirty());
    }

    #[test]
    fn test_filename_tracks_identity() {
        let be = lvm_entry();
        let name = be.entry_file_name();
        assert_eq!(
            name,
            format!("ffffffff-{}-3.10-23.el7.conf", &be.boot_id()[..7])
        );
        assert!(entry_file_regex().captures(&name).is_some());
    }

    #[test]
    fn test_write_and_reload_roundtrip() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let probe = TestProbe::default();

        let mut profiles = ProfileStore::new(dir.join("profiles"));
        profiles.add(rhel72()).unwrap();
        let hosts = HostStore::new(dir.join("hosts"));

        let mut be = lvm_entry();
        be.write(&dir, false).unwrap();
        let path = be.entry_path(&dir);
        assert!(path.exists());

        let loaded = BootEntry::from_file(&path, &profiles, &hosts, &probe).unwrap();
        assert_eq!(loaded.boot_id(), be.boot_id());
        assert_eq!(loaded.options(), be.options());
        assert!(!loaded.is_read_only());

        // Recovered parameters round-trip the composition inputs.
        let bp = loaded.params().expect("recovered params");
        assert_eq!(bp.version(), "3.10-23.el7");
        assert_eq!(bp.root_device(), Some("/dev/vg00/lvol0"));
        assert_eq!(bp.lvm_root_lv(), Some("vg00/lvol0"));
        assert!(bp.add_opts().is_empty());
        assert!(bp.del_opts().is_empty());
    }

    #[test]
    fn test_reverse_match_add_del_roundtrip() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let probe = TestProbe::default();

        let mut profiles = ProfileStore::new(dir.join("profiles"));
        profiles.add(rhel72()).unwrap();
        let hosts = HostStore::new(dir.join("hosts"));

        let mut bp = BootParams::new("3.10-23.el7").unwrap();
        bp.set_root_device("/dev/vg00/lvol0");
        bp.set_lvm_root_lv("vg00/lvol0");
        bp.set_add_opts(vec!["debug".to_string()]);
        bp.set_del_opts(vec!["rhgb".to_string()]);
        let mut be = BootEntry::create(
            Some("title"),
            Some("ffffffff"),
            Some(BootProfile::Os(rhel72())),
            Some(bp),
            None,
        )
        .unwrap();
        be.write(&dir, false).unwrap();

        let loaded = BootEntry::from_file(&be.entry_path(&dir), &profiles, &hosts, &probe).unwrap();
        let bp = loaded.params().expect("recovered params");
        assert_eq!(bp.add_opts(), ["debug".to_string()]);
        assert!(bp.del_opts().contains(&"rhgb".to_string()));
    }

    #[test]
    fn test_suppress_machine_id_roundtrip() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let probe = TestProbe::default();
        let profiles = ProfileStore::new(dir.join("profiles"));
        let hosts = HostStore::new(dir.join("hosts"));

        // A native entry: 32-hex machine id in the file name only.
        let machine_id = "ffffffffffffffffffffffffffffffff";
        let body = "title Fedora\nversion 6.3.1\nlinux /vmlinuz-6.3.1\n";
        let path = dir.join(format!("{machine_id}-6.3.1.conf"));
        std::fs::write(&path, body).unwrap();

        let entry = BootEntry::from_file(&path, &profiles, &hosts, &probe).unwrap();
        assert_eq!(entry.machine_id(), machine_id);
        assert!(entry.suppresses_machine_id());
        assert!(!entry.canonical_text().contains("machine-id"));
        assert!(!entry
            .canonical_text()
            .lines()
            .next()
            .unwrap()
            .starts_with("machine-id"));
    }

    #[test]
    fn test_foreign_entry_read_only() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let probe = TestProbe::default();
        let profiles = ProfileStore::new(dir.join("profiles"));
        let hosts = HostStore::new(dir.join("hosts"));

        let path = dir.join("my-hand-edited-entry.conf");
        std::fs::write(&path, "title Custom\nlinux /vmlinuz\n").unwrap();

        let mut entry = BootEntry::from_file(&path, &profiles, &hosts, &probe).unwrap();
        assert!(entry.is_read_only());
        assert!(entry.set_title("new title").is_err());
        assert!(entry.delete(&dir).is_err());
        // The read-only entry keeps its foreign path.
        assert_eq!(entry.entry_path(&dir), path);
    }

    #[test]
    fn test_self_heal_renames_stale_file() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let probe = TestProbe::default();
        let profiles = ProfileStore::new(dir.join("profiles"));
        let hosts = HostStore::new(dir.join("hosts"));

        // A boom-shaped name whose boot_id prefix is wrong.
        let path = dir.join("ffffffff-0000000-1.1.conf");
        std::fs::write(&path, "title title\nmachine-id ffffffff\nversion 1.1\nlinux /vmlinuz-1.1\n")
            .unwrap();

        let entry = BootEntry::from_file(&path, &profiles, &hosts, &probe).unwrap();
        assert!(!path.exists());
        let healed = entry.entry_path(&dir);
        assert!(healed.exists());
        assert!(healed
            .file_name()
            .unwrap()
            .starts_with(&format!("ffffffff-{}", &entry.boot_id()[..7])));
    }

    #[test]
    fn test_delete_missing_entry_fails() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let be = lvm_entry();
        assert!(be.delete(&dir).is_err());
    }

    #[test]
    fn test_optional_keys_gated_by_profile() {
        let osp = OsProfile::builder("Fedora", "fedora", "38", "38")
            .optional_keys("grub_users grub_class")
            .build()
            .unwrap();
        let mut bp = BootParams::new("6.3.1").unwrap();
        bp.set_root_device("/dev/sda1");
        let mut be = BootEntry::create(
            Some("t"),
            Some("ffffffff"),
            Some(BootProfile::Os(osp)),
            Some(bp),
            None,
        )
        .unwrap();

        be.apply_optional_key_defaults().unwrap();
        assert_eq!(be.grub_users(), "$grub_users");
        assert_eq!(be.grub_class(), "kernel");
        // grub_arg is not permitted by this profile.
        assert_eq!(be.grub_arg(), "");
        assert!(be.set_grub_arg("--unrestricted").is_err());
        let text = be.canonical_text();
        assert!(text.contains("grub_users $grub_users"));
        assert!(!text.contains("grub_arg"));
    }

    #[test]
    fn test_grub_env_expansion_is_lazy() {
        let probe = TestProbe::default().with_grub_env("kopts", "audit=1");
        let osp = rhel72();
        let mut bp = BootParams::new("3.10-23.el7").unwrap();
        bp.set_root_device("/dev/sda5");
        bp.set_add_opts(vec!["$kopts".to_string()]);
        let be = BootEntry::create(
            Some("title"),
            Some("ffffffff"),
            Some(BootProfile::Os(osp)),
            Some(bp),
            None,
        )
        .unwrap();
        // Canonical form retains the reference; expansion happens on
        // request only.
        assert!(be.options().contains("$kopts"));
        assert!(be.expand_options(&probe).contains("audit=1"));
        assert!(!be.expand_options(&probe).contains("$kopts"));
    }

    #[test]
    fn test_match_root_lv() {
        assert!(match_root_lv("/dev/vg00/lvol0", "vg00/lvol0"));
        assert!(match_root_lv("/dev/mapper/vg00-lvol0", "vg00/lvol0"));
        assert!(!match_root_lv("/dev/vg01/lvol0", "vg00/lvol0"));
        assert!(!match_root_lv("/dev/sda5", "vg00/lvol0"));
    }

    #[test]
    fn test_store_load_and_select() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let probe = TestProbe::default();
        let mut profiles = ProfileStore::new(dir.join("profiles"));
        profiles.add(rhel72()).unwrap();
        let hosts = HostStore::new(dir.join("hosts"));

        let entries_dir = dir.join("entries");
        std::fs::create_dir_all(&entries_dir).unwrap();
        let mut be = lvm_entry();
        be.write(&entries_dir, false).unwrap();

        let mut store = EntryStore::new(entries_dir);
        store.load(&profiles, &hosts, &probe, None).unwrap();
        assert_eq!(store.entries().len(), 1);

        let matches = store.find(&Selection::from_boot_id(&be.boot_id()[..7])).unwrap();
        assert_eq!(matches.len(), 1);

        let none = store
            .find(&Selection {
                version: Some("9.9.9".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());

        // Selecting by image path matches linux or initrd.
        let by_path = store.find(&Selection::from_path("/vmlinuz-3.10-23.el7")).unwrap();
        assert_eq!(by_path.len(), 1);
        let by_initrd = store
            .find(&Selection::from_path("/initramfs-3.10-23.el7.img"))
            .unwrap();
        assert_eq!(by_initrd.len(), 1);
    }

    #[test]
    fn test_store_delete() {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        let probe = TestProbe::default();
        let mut profiles = ProfileStore::new(dir.join("profiles"));
        profiles.add(rhel72()).unwrap();
        let hosts = HostStore::new(dir.join("hosts"));

        let entries_dir = dir.join("entries");
        std::fs::create_dir_all(&entries_dir).unwrap();
        let mut be = lvm_entry();
        be.write(&entries_dir, false).unwrap();
        let path = be.entry_path(&entries_dir);

        let mut store = EntryStore::new(entries_dir);
        store.load(&profiles, &hosts, &probe, None).unwrap();
        let boot_id = be.boot_id();
        store.delete(&boot_id[..7]).unwrap();
        assert!(!path.exists());
        assert!(store.by_id(&boot_id).is_err());
    }
}
