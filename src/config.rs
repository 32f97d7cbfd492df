/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Persistent boom configuration.
//!
//! The configuration lives in INI format at `<boom>/boom.conf` with a
//! mandatory `[global]` section and optional `[legacy]` and `[cache]`
//! sections. Any missing key other than the `[global]` section itself
//! falls back to the built-in default.

use camino::{Utf8Path, Utf8PathBuf};
use tini::Ini;

use crate::error::{BoomError, IoContext, Result};
use crate::profile::atomic_write;

/// The location of the system `/boot` directory.
pub const DEFAULT_BOOT_PATH: &str = "/boot";

/// The boom configuration directory name below `/boot`.
pub const DEFAULT_BOOM_DIR: &str = "boom";

/// The boom image cache directory name below the boom directory.
pub const DEFAULT_CACHE_DIR: &str = "cache";

/// The boom configuration file name.
pub const BOOM_CONFIG_FILE: &str = "boom.conf";

/// Mode for configuration, profile and entry files created by boom.
pub const BOOT_CONFIG_MODE: u32 = 0o644;

const SECT_GLOBAL: &str = "global";
const SECT_LEGACY: &str = "legacy";
const SECT_CACHE: &str = "cache";

/// Boom persistent configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoomConfig {
    /// The path to the system /boot volume.
    pub boot_path: Utf8PathBuf,
    /// The path to the boom configuration directory.
    pub boom_path: Utf8PathBuf,
    /// Enable legacy bootloader synchronisation.
    pub legacy_enable: bool,
    /// The legacy bootloader format to write.
    pub legacy_format: String,
    /// Synchronise the legacy configuration on every mutation.
    pub legacy_sync: bool,
    /// Enable the boot image cache.
    pub cache_enable: bool,
    /// Automatically clean unused boot images.
    pub cache_auto_clean: bool,
    /// The path to the boot image cache.
    pub cache_path: Utf8PathBuf,
}

impl Default for BoomConfig {
    fn default() -> Self {
        let boot_path = Utf8PathBuf::from(DEFAULT_BOOT_PATH);
        let boom_path = boot_path.join(DEFAULT_BOOM_DIR);
        let cache_path = boom_path.join(DEFAULT_CACHE_DIR);
        BoomConfig {
            boot_path,
            boom_path,
            legacy_enable: false,
            legacy_format: "grub1".to_string(),
            legacy_sync: true,
            cache_enable: true,
            cache_auto_clean: true,
            cache_path,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim(),
        "True" | "true" | "Yes" | "yes" | "1" | "on" | "On"
    )
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl BoomConfig {
    /// Build a configuration rooted at a non-default boot directory,
    /// with the boom and cache paths relocated below it.
    pub fn with_boot_path(boot_path: impl AsRef<Utf8Path>) -> BoomConfig {
        let boot_path = boot_path.as_ref().to_path_buf();
        let boom_path = boot_path.join(DEFAULT_BOOM_DIR);
        let cache_path = boom_path.join(DEFAULT_CACHE_DIR);
        BoomConfig {
            boot_path,
            boom_path,
            cache_path,
            ..Default::default()
        }
    }

    /// The path to the configuration file for this configuration.
    pub fn config_path(&self) -> Utf8PathBuf {
        self.boom_path.join(BOOM_CONFIG_FILE)
    }

    /// The BLS entries directory for this configuration.
    pub fn entries_path(&self) -> Utf8PathBuf {
        self.boot_path.join("loader/entries")
    }

    /// The OS profiles directory for this configuration.
    pub fn profiles_path(&self) -> Utf8PathBuf {
        self.boom_path.join("profiles")
    }

    /// The host profiles directory for this configuration.
    pub fn host_profiles_path(&self) -> Utf8PathBuf {
        self.profiles_path().join("hosts")
    }

    /// Parse a configuration from INI text.
    pub fn from_ini_str(data: &str, origin: &str) -> Result<BoomConfig> {
        let ini = Ini::from_string(data)
            .map_err(|e| BoomError::Config(format!("{origin}: {e}")))?;

        // Every other section and key is optional with defaults.
        if !ini.iter().any(|(name, _)| name.as_str() == SECT_GLOBAL) {
            return Err(BoomError::Config(format!(
                "missing '{SECT_GLOBAL}' section in {origin}"
            )));
        }

        let mut config = BoomConfig::default();

        // The *_path names are accepted as synonyms on read.
        if let Some(path) = ini
            .get::<String>(SECT_GLOBAL, "boot_root")
            .or_else(|| ini.get::<String>(SECT_GLOBAL, "boot_path"))
        {
            config.boot_path = Utf8PathBuf::from(path);
            config.boom_path = config.boot_path.join(DEFAULT_BOOM_DIR);
            config.cache_path = config.boom_path.join(DEFAULT_CACHE_DIR);
        }
        if let Some(path) = ini
            .get::<String>(SECT_GLOBAL, "boom_root")
            .or_else(|| ini.get::<String>(SECT_GLOBAL, "boom_path"))
        {
            config.boom_path = Utf8PathBuf::from(path);
            config.cache_path = config.boom_path.join(DEFAULT_CACHE_DIR);
        }

        if let Some(enable) = ini.get::<String>(SECT_LEGACY, "enable") {
            config.legacy_enable = parse_bool(&enable);
        }
        if let Some(format) = ini.get::<String>(SECT_LEGACY, "format") {
            config.legacy_format = format;
        }
        if let Some(sync) = ini.get::<String>(SECT_LEGACY, "sync") {
            config.legacy_sync = parse_bool(&sync);
        }

        if let Some(enable) = ini.get::<String>(SECT_CACHE, "enable") {
            config.cache_enable = parse_bool(&enable);
        }
        if let Some(auto_clean) = ini.get::<String>(SECT_CACHE, "auto_clean") {
            config.cache_auto_clean = parse_bool(&auto_clean);
        }
        if let Some(path) = ini.get::<String>(SECT_CACHE, "cache_path") {
            config.cache_path = Utf8PathBuf::from(path);
        }

        log::debug!("read configuration: {config:?}");
        Ok(config)
    }

    /// Load configuration from the file at `path`.
    pub fn load(path: &Utf8Path) -> Result<BoomConfig> {
        log::debug!("reading boom configuration from '{path}'");
        let data = std::fs::read_to_string(path).path_context(path.as_str())?;
        Self::from_ini_str(&data, path.as_str())
    }

    /// Load configuration from the default location below `boot_path`,
    /// falling back to built-in defaults when no file exists.
    pub fn load_or_default(boot_path: &Utf8Path) -> Result<BoomConfig> {
        let candidate = boot_path.join(DEFAULT_BOOM_DIR).join(BOOM_CONFIG_FILE);
        if candidate.exists() {
            Self::load(&candidate)
        } else {
            log::debug!("no configuration at '{candidate}': using defaults");
            Ok(BoomConfig::with_boot_path(boot_path))
        }
    }

    /// Render this configuration as INI text.
    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        out.push_str("[global]\n");
        out.push_str(&format!("boot_root = {}\n", self.boot_path));
        out.push_str(&format!("boom_root = {}\n\n", self.boom_path));

        out.push_str("[legacy]\n");
        out.push_str(&format!("enable = {}\n", yes_no(self.legacy_enable)));
        out.push_str(&format!("format = {}\n", self.legacy_format));
        out.push_str(&format!("sync = {}\n\n", yes_no(self.legacy_sync)));

        out.push_str("[cache]\n");
        out.push_str(&format!("enable = {}\n", yes_no(self.cache_enable)));
        out.push_str(&format!("auto_clean = {}\n", yes_no(self.cache_auto_clean)));
        out.push_str(&format!("cache_path = {}\n", self.cache_path));
        out
    }

    /// Write this configuration to its on-disk location atomically.
    pub fn write(&self) -> Result<()> {
        let path = self.config_path();
        atomic_write(&path, self.to_ini_string().as_bytes(), BOOT_CONFIG_MODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_defaults() {
        let config = BoomConfig::default();
        assert_eq!(config.boot_path, Utf8PathBuf::from("/boot"));
        assert_eq!(config.boom_path, Utf8PathBuf::from("/boot/boom"));
        assert_eq!(config.cache_path, Utf8PathBuf::from("/boot/boom/cache"));
        assert!(!config.legacy_enable);
        assert_eq!(config.legacy_format, "grub1");
        assert!(config.cache_enable);
    }

    #[test]
    fn test_parse_full() {
        let data = indoc! {"
            [global]
            boot_root = /mnt/boot
            boom_root = /mnt/boot/boom

            [legacy]
            enable = yes
            format = grub1
            sync = no

            [cache]
            enable = no
            auto_clean = no
            cache_path = /mnt/boot/boom/cache
        "};
        let config = BoomConfig::from_ini_str(data, "test").unwrap();
        assert_eq!(config.boot_path, Utf8PathBuf::from("/mnt/boot"));
        assert!(config.legacy_enable);
        assert!(!config.legacy_sync);
        assert!(!config.cache_enable);
        assert!(!config.cache_auto_clean);
    }

    #[test]
    fn test_missing_global_is_fatal() {
        let data = "[legacy]\nenable = yes\n";
        assert!(BoomConfig::from_ini_str(data, "test").is_err());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let data = "[global]\nboot_root = /somewhere\n";
        let config = BoomConfig::from_ini_str(data, "test").unwrap();
        assert_eq!(config.boot_path, Utf8PathBuf::from("/somewhere"));
        assert_eq!(config.boom_path, Utf8PathBuf::from("/somewhere/boom"));
        assert!(config.legacy_sync);
        assert!(config.cache_enable);
    }

    #[test]
    fn test_path_synonyms() {
        let data = "[global]\nboot_path = /other\n";
        let config = BoomConfig::from_ini_str(data, "test").unwrap();
        assert_eq!(config.boot_path, Utf8PathBuf::from("/other"));
    }

    #[test]
    fn test_roundtrip() {
        let config = BoomConfig::with_boot_path("/mnt/boot");
        let parsed = BoomConfig::from_ini_str(&config.to_ini_string(), "test").unwrap();
        assert_eq!(parsed, config);
    }
}
