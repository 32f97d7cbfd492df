/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The `%{key}` template substitution language.
//!
//! Profiles carry small template strings ("format strings") whose
//! `%{key}` references are filled in from an attached profile and a set
//! of boot parameters. The same tables drive the reverse direction:
//! turning a template into per-word regular expressions that recover
//! boot parameters from an entry read from disk.

use crate::platform::PlatformProbe;
use crate::profile::Profile;

/// Kernel version string, in `uname -r` format.
pub const FMT_VERSION: &str = "version";
/// LVM2 root logical volume in `vg/lv` format.
pub const FMT_LVM_ROOT_LV: &str = "lvm_root_lv";
/// LVM2 kernel command line options.
pub const FMT_LVM_ROOT_OPTS: &str = "lvm_root_opts";
/// BTRFS subvolume specification.
pub const FMT_BTRFS_SUBVOLUME: &str = "btrfs_subvolume";
/// BTRFS subvolume ID specification.
pub const FMT_BTRFS_SUBVOL_ID: &str = "btrfs_subvol_id";
/// BTRFS subvolume path specification.
pub const FMT_BTRFS_SUBVOL_PATH: &str = "btrfs_subvol_path";
/// BTRFS kernel command line options.
pub const FMT_BTRFS_ROOT_OPTS: &str = "btrfs_root_opts";
/// Stratis pool UUID.
pub const FMT_STRATIS_POOL_UUID: &str = "stratis_pool_uuid";
/// Stratis kernel command line options.
pub const FMT_STRATIS_ROOT_OPTS: &str = "stratis_root_opts";
/// Root device path.
pub const FMT_ROOT_DEVICE: &str = "root_device";
/// Root device options.
pub const FMT_ROOT_OPTS: &str = "root_opts";
/// Linux kernel image.
pub const FMT_KERNEL: &str = "kernel";
/// Initramfs image.
pub const FMT_INITRAMFS: &str = "initramfs";
/// OS profile name.
pub const FMT_OS_NAME: &str = "os_name";
/// OS profile short name.
pub const FMT_OS_SHORT_NAME: &str = "os_short_name";
/// OS profile version.
pub const FMT_OS_VERSION: &str = "os_version";
/// OS profile version ID.
pub const FMT_OS_VERSION_ID: &str = "os_version_id";

/// All format keys, in substitution order.
pub const FORMAT_KEYS: &[&str] = &[
    FMT_VERSION,
    FMT_LVM_ROOT_LV,
    FMT_LVM_ROOT_OPTS,
    FMT_BTRFS_SUBVOL_ID,
    FMT_BTRFS_SUBVOL_PATH,
    FMT_BTRFS_SUBVOLUME,
    FMT_BTRFS_ROOT_OPTS,
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

/// Root options for Stratis root file systems.
pub const ROOT_OPTS_STRATIS: &str = "stratis.rootfs.pool_uuid=%{stratis_pool_uuid}";

/// BTRFS volume specified by subvolume path.
pub const ROOT_OPTS_BTRFS_PATH: &str = "subvol=%{btrfs_subvol_path}";

/// BTRFS volume specified by subvolume ID.
pub const ROOT_OPTS_BTRFS_ID: &str = "subvolid=%{btrfs_subvol_id}";

/// Bootloader environment variable expansion character.
pub const GRUB2_EXPAND_ENV: char = '$';

/// Return the `%{name}` form of a format key name.
pub fn key_from_key_name(key_name: &str) -> String {
    format!("%{{{key_name}}}")
}

/// Append additional kernel options to an options string.
pub fn append_opts(opts: &str, append: &[String]) -> String {
    if append.is_empty() {
        return opts.to_string();
    }
    format!("{} {}", opts, append.join(" "))
}

/// Test one option word against a drop specification.
///
/// A drop spec matches a bare name, a name with `=` (any value), or an
/// exact `name=value` pair:
///
/// ```text
/// <name>          drop name
/// <name>=         drop name and any value
/// <name>=<value>  drop name only if its value == value
/// ```
fn drops_opt(opt: &str, drop: &[String]) -> bool {
    // "name" or "name=value"
    if drop.iter().any(|d| d == opt) {
        return true;
    }
    // "name=" wildcard
    let name = opt.split('=').next().unwrap_or(opt);
    let wildcard = format!("{name}=");
    drop.iter().any(|d| *d == wildcard)
}

/// Remove options matching the drop specifications from an options
/// string.
pub fn drop_opts(opts: &str, drop: &[String]) -> String {
    opts.split_whitespace()
        .filter(|o| !drops_opt(o, drop))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Expand `$name` bootloader environment references in an options
/// string to their current values.
pub fn expand_vars(args: &str, probe: &dyn PlatformProbe) -> String {
    if !args.contains(GRUB2_EXPAND_ENV) {
        return args.to_string();
    }
    args.split_whitespace()
        .map(|word| match word.strip_prefix(GRUB2_EXPAND_ENV) {
            Some(name) => probe.grub_env(name),
            None => word.to_string(),
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Template words whose format key captures a boot parameter value.
const CAPTURE_WORDS: &[&str] = &[
    "root=%{root_device}",
    "rd.lvm.lv=%{lvm_root_lv}",
    ROOT_OPTS_BTRFS_ID,
    ROOT_OPTS_BTRFS_PATH,
    ROOT_OPTS_STRATIS,
];

/// Template words that are replaced outright by their expansions.
const REPLACE_WORDS: &[&str] = &["rootflags=%{btrfs_subvolume}"];

/// Regex fragment for a key captured directly from a single word.
fn key_regex(key: &str) -> Option<&'static str> {
    let regex_all = r"\S+";
    let regex_num = r"\d+";
    match key {
        k if k == FMT_VERSION => Some(regex_all),
        k if k == FMT_LVM_ROOT_LV => Some(regex_all),
        k if k == FMT_BTRFS_SUBVOL_ID => Some(regex_num),
        k if k == FMT_BTRFS_SUBVOL_PATH => Some(regex_all),
        k if k == FMT_STRATIS_POOL_UUID => Some(regex_all),
        k if k == FMT_ROOT_DEVICE => Some(regex_all),
        k if k == FMT_KERNEL => Some(regex_all),
        k if k == FMT_INITRAMFS => Some(regex_all),
        _ => None,
    }
}

/// Expansions for keys that reference further template strings.
fn key_expansions(profile: &dyn Profile, key: &str) -> Option<Vec<String>> {
    match key {
        k if k == FMT_LVM_ROOT_OPTS => Some(vec![profile.root_opts_lvm2().to_string()]),
        k if k == FMT_BTRFS_ROOT_OPTS => Some(vec![profile.root_opts_btrfs().to_string()]),
        k if k == FMT_BTRFS_SUBVOLUME => Some(vec![
            ROOT_OPTS_BTRFS_PATH.to_string(),
            ROOT_OPTS_BTRFS_ID.to_string(),
        ]),
        k if k == FMT_STRATIS_ROOT_OPTS => Some(vec![ROOT_OPTS_STRATIS.to_string()]),
        k if k == FMT_ROOT_OPTS => Some(vec![
            profile.root_opts_lvm2().to_string(),
            profile.root_opts_btrfs().to_string(),
            ROOT_OPTS_STRATIS.to_string(),
        ]),
        _ => None,
    }
}

fn substitute_keys(profile: &dyn Profile, word: &str, subst: &mut Vec<(String, String)>) {
    let mut word = word.to_string();
    let mut did_subst = false;

    for key in FORMAT_KEYS {
        let k = key_from_key_name(key);
        if !word.contains(&k) {
            continue;
        }
        if let Some(rgx) = key_regex(key) {
            // Words that are the canonical source of a boot parameter
            // gain a capture group for the value.
            let (replacement, name) = if CAPTURE_WORDS.contains(&word.as_str()) {
                (format!("({rgx})"), key.to_string())
            } else {
                (rgx.to_string(), String::new())
            };
            word = word.replace(&k, &replacement);
            subst.push((name, word.clone()));
            did_subst = true;
        } else if let Some(expansions) = key_expansions(profile, key) {
            for e in expansions {
                let exp = if REPLACE_WORDS.contains(&word.as_str()) {
                    e
                } else {
                    word.replace(&k, &e)
                };
                substitute_keys(profile, &exp, subst);
                did_subst = true;
            }
        }
    }

    if !did_subst {
        // A plain word with no format keys.
        subst.push((String::new(), word));
    }
}

/// Generate `(key, regex)` pairs for the words of a format string.
///
/// Words carrying a boot parameter key are returned with the key name
/// and a regex containing one capture group; other words yield an
/// empty key and a regex with no captures. The result can be matched
/// against the words of an entry's option string to recover the
/// parameters used to render it.
pub fn make_format_regexes(profile: &dyn Profile, fmt: &str) -> Vec<(String, String)> {
    let mut regex_words = Vec::new();
    for word in fmt.split_whitespace() {
        substitute_keys(profile, word, &mut regex_words);
    }
    regex_words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osprofile::OsProfile;
    use crate::platform::TestProbe;

    fn test_profile() -> OsProfile {
        OsProfile::builder("Red Hat Enterprise Linux Server", "rhel", "7.2 (Maipo)", "7.2")
            .uname_pattern("el7")
            .options("root=%{root_device} ro %{root_opts} rhgb quiet")
            .root_opts_lvm2("rd.lvm.lv=%{lvm_root_lv}")
            .kernel_pattern("/vmlinuz-%{version}")
            .initramfs_pattern("/initramfs-%{version}.img")
            .build()
            .unwrap()
    }

    #[test]
    fn test_key_from_key_name() {
        assert_eq!(key_from_key_name(FMT_VERSION), "%{version}");
    }

    #[test]
    fn test_append_opts() {
        assert_eq!(append_opts("ro quiet", &[]), "ro quiet");
        assert_eq!(
            append_opts("ro quiet", &["debug".to_string()]),
            "ro quiet debug"
        );
    }

    #[test]
    fn test_drop_opts_name() {
        let drop = vec!["rhgb".to_string(), "quiet".to_string()];
        assert_eq!(drop_opts("root=/dev/sda5 ro rhgb quiet", &drop), "root=/dev/sda5 ro");
    }

    #[test]
    fn test_drop_opts_wildcard() {
        let drop = vec!["console=".to_string()];
        assert_eq!(
            drop_opts("ro console=ttyS0 console=tty0 quiet", &drop),
            "ro quiet"
        );
    }

    #[test]
    fn test_drop_opts_exact_value() {
        let drop = vec!["console=ttyS0".to_string()];
        assert_eq!(
            drop_opts("ro console=ttyS0 console=tty0", &drop),
            "ro console=tty0"
        );
    }

    #[test]
    fn test_expand_vars() {
        let probe = TestProbe::default().with_grub_env("kopts", "debug audit=1");
        assert_eq!(expand_vars("ro $kopts quiet", &probe), "ro debug audit=1 quiet");
        // Unknown variables expand to nothing.
        assert_eq!(expand_vars("ro $missing quiet", &probe), "ro quiet");
        // No references: returned unchanged.
        assert_eq!(expand_vars("ro quiet", &probe), "ro quiet");
    }

    #[test]
    fn test_make_format_regexes_plain_words() {
        let osp = test_profile();
        let words = make_format_regexes(&osp, "ro rhgb quiet");
        assert_eq!(
            words,
            vec![
                (String::new(), "ro".to_string()),
                (String::new(), "rhgb".to_string()),
                (String::new(), "quiet".to_string()),
            ]
        );
    }

    #[test]
    fn test_make_format_regexes_captures() {
        let osp = test_profile();
        let words = make_format_regexes(&osp, "root=%{root_device}");
        assert_eq!(
            words,
            vec![("root_device".to_string(), r"root=(\S+)".to_string())]
        );
    }

    #[test]
    fn test_make_format_regexes_root_opts_expansion() {
        let osp = test_profile();
        let words = make_format_regexes(&osp, "%{root_opts}");
        // root_opts expands to the LVM2, BTRFS and Stratis templates.
        let keys: Vec<&str> = words.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"lvm_root_lv"));
        assert!(keys.contains(&"btrfs_subvol_path"));
        assert!(keys.contains(&"btrfs_subvol_id"));
        assert!(keys.contains(&"stratis_pool_uuid"));
    }

    #[test]
    fn test_make_format_regexes_subvol_id_numeric() {
        let osp = test_profile();
        let words = make_format_regexes(&osp, "rootflags=%{btrfs_subvolume}");
        assert!(words
            .iter()
            .any(|(k, e)| k == "btrfs_subvol_id" && e == r"subvolid=(\d+)"));
        assert!(words
            .iter()
            .any(|(k, e)| k == "btrfs_subvol_path" && e == r"subvol=(\S+)"));
    }
}
