/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The boom library context.
//!
//! A [`BoomContext`] owns the configuration, the platform probe, and
//! the four lazily-loaded stores (OS profiles, host profiles, boot
//! entries, image cache). Operations that span more than one store
//! live here; dropping the context discards all in-memory state.

use camino::Utf8PathBuf;

use crate::bootloader::{check_root_device, BootEntry, BootParams, EntryStore};
use crate::cache::{CacheEntry, ImageCache};
use crate::config::BoomConfig;
use crate::error::{BoomError, Result};
use crate::hostprofile::{HostProfile, HostStore};
use crate::legacy::{clear_legacy, write_legacy, BOOM_LOADER_GRUB1, GRUB1_CFG_PATH, GRUB1_NAME};
use crate::osprofile::{OsProfile, ProfileStore};
use crate::platform::{HostProbe, PlatformProbe};
use crate::profile::{BootProfile, Profile};
use crate::selection::Selection;

/// The default Grub1 root device written to legacy entries.
pub const DEFAULT_GRUB1_DEVICE: &str = "(hd0,0)";

/// Library context holding the loaded boom state for one boot file
/// system.
pub struct BoomContext {
    config: BoomConfig,
    probe: Box<dyn PlatformProbe>,
    profiles: ProfileStore,
    hosts: HostStore,
    entries: EntryStore,
    cache: ImageCache,
}

impl BoomContext {
    /// Create a context for `config` using the default host probe.
    pub fn new(config: BoomConfig) -> BoomContext {
        Self::with_probe(config, Box::new(HostProbe))
    }

    /// Create a context with an explicit platform probe.
    pub fn with_probe(config: BoomConfig, probe: Box<dyn PlatformProbe>) -> BoomContext {
        let profiles = ProfileStore::new(config.profiles_path());
        let hosts = HostStore::new(config.host_profiles_path());
        let entries = EntryStore::new(config.entries_path());
        let cache = ImageCache::new(config.boot_path.clone(), config.cache_path.clone());
        BoomContext {
            config,
            probe,
            profiles,
            hosts,
            entries,
            cache,
        }
    }

    pub fn config(&self) -> &BoomConfig {
        &self.config
    }

    pub fn probe(&self) -> &dyn PlatformProbe {
        &*self.probe
    }

    /// The OS profile store, loaded on first use.
    pub fn profiles(&mut self) -> Result<&ProfileStore> {
        self.profiles.ensure_loaded()?;
        Ok(&self.profiles)
    }

    /// Mutable access to the OS profile store, loaded on first use.
    pub fn profiles_mut(&mut self) -> Result<&mut ProfileStore> {
        self.profiles.ensure_loaded()?;
        Ok(&mut self.profiles)
    }

    /// The host profile store, loaded on first use.
    pub fn hosts(&mut self) -> Result<&HostStore> {
        self.profiles.ensure_loaded()?;
        self.hosts.ensure_loaded(&self.profiles)?;
        Ok(&self.hosts)
    }

    /// Mutable access to the host profile store, loaded on first use.
    pub fn hosts_mut(&mut self) -> Result<&mut HostStore> {
        self.profiles.ensure_loaded()?;
        self.hosts.ensure_loaded(&self.profiles)?;
        Ok(&mut self.hosts)
    }

    /// The entry store, loaded on first use.
    pub fn entries(&mut self) -> Result<&EntryStore> {
        self.profiles.ensure_loaded()?;
        self.hosts.ensure_loaded(&self.profiles)?;
        self.entries
            .ensure_loaded(&self.profiles, &self.hosts, &*self.probe)?;
        Ok(&self.entries)
    }

    /// The image cache, loaded on first use.
    pub fn cache(&mut self) -> Result<&mut ImageCache> {
        self.cache.ensure_loaded()?;
        Ok(&mut self.cache)
    }

    /// Resolve the profile to bind to a new entry: an explicit
    /// `os_id`, or the first profile whose uname pattern matches the
    /// version.
    fn resolve_profile(&mut self, os_id: Option<&str>, version: &str) -> Result<OsProfile> {
        self.profiles.ensure_loaded()?;
        match os_id {
            Some(os_id) => Ok(self.profiles.by_id(os_id)?.clone()),
            None => self
                .profiles
                .match_version(version)
                .cloned()
                .ok_or_else(|| {
                    BoomError::Profile(format!("no matching profile for version '{version}'"))
                }),
        }
    }

    /// The number of loaded boot entries referencing an image path.
    pub fn image_ref_count(&mut self, img_path: &str) -> Result<usize> {
        self.entries()?;
        Ok(self
            .entries
            .find(&Selection::from_path(img_path))?
            .len())
    }

    /// Create, compose and persist a new boot entry.
    ///
    /// The profile is selected by `os_id` (or by uname pattern match
    /// on the version), wrapped by a matching host profile, and the
    /// entry is written to the entries directory. With the cache
    /// enabled the entry's images are cached at creation time.
    #[allow(clippy::too_many_arguments)]
    pub fn create_entry(
        &mut self,
        title: Option<&str>,
        machine_id: &str,
        os_id: Option<&str>,
        mut params: BootParams,
        architecture: Option<&str>,
        allow_no_dev: bool,
    ) -> Result<&BootEntry> {
        self.entries()?;

        let osp = self.resolve_profile(os_id, params.version())?;
        let mut profile = BootProfile::Os(osp);

        if !machine_id.is_empty() {
            if let Some(hp) = self.hosts.match_machine_id(machine_id) {
                params.set_add_opts(
                    hp.add_opts().split_whitespace().map(String::from).collect(),
                );
                params.set_del_opts(
                    hp.del_opts().split_whitespace().map(String::from).collect(),
                );
                profile = BootProfile::Host(hp.clone());
            }
        }

        params.validate()?;
        if !allow_no_dev {
            let root_device = params
                .root_device()
                .ok_or_else(|| BoomError::RootDevice("no root device configured".to_string()))?
                .to_string();
            check_root_device(&root_device)?;
        }
        params.resolve_stratis(&*self.probe);

        let mut entry = BootEntry::create(
            title,
            Some(machine_id),
            Some(profile),
            Some(params),
            architecture,
        )?;
        entry.apply_optional_key_defaults()?;

        let boot_id = entry.boot_id();
        if self.entries.by_id(&boot_id).is_ok() {
            return Err(BoomError::Entry(format!(
                "entry already exists (boot_id={})",
                &boot_id[..7]
            )));
        }

        if self.config.cache_enable {
            for img_path in [entry.linux(), entry.initrd()] {
                if img_path.is_empty() {
                    continue;
                }
                if let Err(e) = self.cache.cache_path(&img_path) {
                    log::warn!("could not cache image '{img_path}': {e}");
                }
            }
        }

        entry.write(self.entries.dir(), false)?;
        log::info!("created entry with boot_id={}", &boot_id[..7]);
        self.entries.add(entry);

        self.maybe_sync_legacy(DEFAULT_GRUB1_DEVICE)?;
        self.entries
            .by_id(&boot_id)
            .map_err(|_| BoomError::Entry("entry lost after create".to_string()))
    }

    /// Delete the entries matching `selection`, failing when nothing
    /// matches.
    pub fn delete_entries(&mut self, selection: &Selection) -> Result<usize> {
        self.entries()?;
        let boot_ids: Vec<String> = self
            .entries
            .find(selection)?
            .iter()
            .map(|be| be.boot_id())
            .collect();
        if boot_ids.is_empty() {
            return Err(BoomError::Entry(
                "no matching entries for deletion".to_string(),
            ));
        }
        for boot_id in &boot_ids {
            self.entries.delete(boot_id)?;
            log::info!("deleted entry with boot_id={}", &boot_id[..7]);
        }

        if self.config.cache_enable && self.config.cache_auto_clean {
            self.clean_cache()?;
        }
        self.maybe_sync_legacy(DEFAULT_GRUB1_DEVICE)?;
        Ok(boot_ids.len())
    }

    /// Find boot entries matching `selection`.
    pub fn find_entries(&mut self, selection: &Selection) -> Result<Vec<&BootEntry>> {
        self.entries()?;
        self.entries.find(selection)
    }

    /// Add a new OS profile and persist it.
    pub fn create_profile(&mut self, osp: OsProfile) -> Result<&OsProfile> {
        self.profiles.ensure_loaded()?;
        let os_id = osp.os_id().to_string();
        self.profiles.add(osp)?;
        self.profiles.write_profile(&os_id, false)?;
        log::info!("created profile with os_id={}", &os_id[..7]);
        self.profiles.by_id(&os_id)
    }

    /// Delete an OS profile by identifier prefix. Profiles still used
    /// by entries are refused.
    pub fn delete_profile(&mut self, os_id: &str) -> Result<()> {
        self.entries()?;
        let unique = self.profiles.by_id(os_id)?.os_id().to_string();
        let used = self
            .entries
            .find(&Selection::from_os_id(unique.clone()))?
            .len();
        if used > 0 {
            return Err(BoomError::Profile(format!(
                "profile os_id={} is in use by {used} boot entries",
                &unique[..7]
            )));
        }
        self.profiles.delete(&unique)?;
        log::info!("deleted profile with os_id={}", &unique[..7]);
        Ok(())
    }

    /// Add a new host profile and persist it.
    pub fn create_host_profile(&mut self, hp: HostProfile) -> Result<&HostProfile> {
        self.hosts_mut()?;
        let host_id = hp.host_id().to_string();
        self.hosts.add(hp)?;
        self.hosts.write_profile(&host_id, false)?;
        log::info!("created host profile with host_id={}", &host_id[..7]);
        self.hosts.by_id(&host_id)
    }

    /// Delete a host profile by identifier prefix.
    pub fn delete_host_profile(&mut self, host_id: &str) -> Result<()> {
        self.hosts_mut()?;
        self.hosts.delete(host_id)?;
        log::info!("deleted host profile with host_id={host_id}");
        Ok(())
    }

    /// Cache the images referenced by entries matching `selection`.
    pub fn cache_entry_images(&mut self, selection: &Selection) -> Result<Vec<CacheEntry>> {
        self.entries()?;
        let img_paths: Vec<String> = self
            .entries
            .find(selection)?
            .iter()
            .flat_map(|be| [be.linux(), be.initrd()])
            .filter(|p| !p.is_empty())
            .collect();
        let mut cached = Vec::new();
        for img_path in img_paths {
            cached.push(self.cache.cache_path(&img_path)?);
        }
        Ok(cached)
    }

    /// Remove a path from the image cache, honouring live references.
    pub fn uncache_path(&mut self, img_path: &str, force: bool) -> Result<bool> {
        let refs = self.image_ref_count(img_path)?;
        self.cache.uncache_path(img_path, refs, force)
    }

    /// Remove every cached path no longer referenced by any entry.
    pub fn clean_cache(&mut self) -> Result<usize> {
        self.cache.ensure_loaded()?;
        let mut removed = 0;
        for img_path in self.cache.cached_paths() {
            let refs = self.image_ref_count(&img_path)?;
            if refs == 0 && self.cache.uncache_path(&img_path, refs, false)? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("removed {removed} unused cache entries");
        }
        Ok(removed)
    }

    fn legacy_target(&self) -> Result<(&'static str, Utf8PathBuf)> {
        if self.config.legacy_format != BOOM_LOADER_GRUB1 {
            return Err(BoomError::LegacyFormat(format!(
                "unknown legacy bootloader format: {}",
                self.config.legacy_format
            )));
        }
        Ok((GRUB1_NAME, self.config.boot_path.join(GRUB1_CFG_PATH)))
    }

    fn maybe_sync_legacy(&mut self, grub_device: &str) -> Result<()> {
        if self.config.legacy_enable && self.config.legacy_sync {
            self.sync_legacy(&Selection::default(), grub_device)?;
        }
        Ok(())
    }

    /// Regenerate the legacy bootloader configuration from the entries
    /// matching `selection`.
    pub fn sync_legacy(&mut self, selection: &Selection, grub_device: &str) -> Result<()> {
        let (name, cfg_path) = self.legacy_target()?;
        self.entries()?;
        let entries = self.entries.find(selection)?;
        write_legacy(&cfg_path, name, &entries, grub_device)
    }

    /// Remove all boom entries from the legacy bootloader
    /// configuration.
    pub fn clear_legacy(&mut self) -> Result<()> {
        let (name, cfg_path) = self.legacy_target()?;
        clear_legacy(&cfg_path, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TestProbe;

    fn scratch_boot() -> (tempfile::TempDir, BoomConfig) {
        let td = tempfile::tempdir().unwrap();
        let boot = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        for dir in ["loader/entries", "boom/profiles/hosts", "boom/cache"] {
            std::fs::create_dir_all(boot.join(dir)).unwrap();
        }
        (td, BoomConfig::with_boot_path(&boot))
    }

    fn rhel72() -> OsProfile {
        OsProfile::builder("Red Hat Enterprise Linux Server", "rhel", "7.2 (Maipo)", "7.2")
            .uname_pattern("el7")
            .options("root=%{root_device} ro %{root_opts} rhgb quiet")
            .build()
            .unwrap()
    }

    fn test_context() -> (tempfile::TempDir, BoomContext) {
        let (td, config) = scratch_boot();
        let ctx = BoomContext::with_probe(config, Box::new(TestProbe::default()));
        (td, ctx)
    }

    #[test]
    fn test_create_entry_end_to_end() {
        let (_td, mut ctx) = test_context();
        ctx.create_profile(rhel72()).unwrap();

        // Provide the images so the cache can capture them.
        let boot = ctx.config().boot_path.clone();
        std::fs::write(boot.join("vmlinuz-3.10-23.el7"), "kernel").unwrap();
        std::fs::write(boot.join("initramfs-3.10-23.el7.img"), "initramfs").unwrap();

        let mut params = BootParams::new("3.10-23.el7").unwrap();
        params.set_root_device("/dev/vg00/lvol0");
        params.set_lvm_root_lv("vg00/lvol0");

        let boot_id = {
            let entry = ctx
                .create_entry(Some("title"), "ffffffff", None, params, None, true)
                .unwrap();
            assert_eq!(
                entry.options(),
                "root=/dev/vg00/lvol0 ro rd.lvm.lv=vg00/lvol0 rhgb quiet"
            );
            entry.boot_id()
        };

        // The on-disk name carries machine id, boot_id prefix and
        // version.
        let entries_dir = ctx.config().entries_path();
        let expected = entries_dir.join(format!("ffffffff-{}-3.10-23.el7.conf", &boot_id[..7]));
        assert!(expected.exists());

        // Both images were captured by the cache.
        let cached = ctx.cache().unwrap().find_paths(&Selection::default()).unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn test_create_entry_duplicate_rejected() {
        let (_td, mut ctx) = test_context();
        ctx.create_profile(rhel72()).unwrap();

        let mut params = BootParams::new("3.10-23.el7").unwrap();
        params.set_root_device("/dev/vg00/lvol0");
        ctx.create_entry(Some("title"), "ffffffff", None, params.clone(), None, true)
            .unwrap();
        assert!(ctx
            .create_entry(Some("title"), "ffffffff", None, params, None, true)
            .is_err());
    }

    #[test]
    fn test_create_entry_requires_root_device() {
        let (_td, mut ctx) = test_context();
        ctx.create_profile(rhel72()).unwrap();
        let params = BootParams::new("3.10-23.el7").unwrap();
        let err = ctx
            .create_entry(Some("title"), "ffffffff", None, params, None, false)
            .unwrap_err();
        assert!(matches!(err, BoomError::RootDevice(_)));
    }

    #[test]
    fn test_host_profile_wrap_precedence() {
        let (_td, mut ctx) = test_context();
        let osp = ctx.create_profile(rhel72()).unwrap().clone();
        let hp = HostProfile::builder("ffffffff", "db1.example.com")
            .add_opts("debug")
            .del_opts("rhgb quiet")
            .build(&osp)
            .unwrap();
        ctx.create_host_profile(hp).unwrap();

        let mut params = BootParams::new("3.10-23.el7").unwrap();
        params.set_root_device("/dev/vg00/lvol0");
        let entry = ctx
            .create_entry(Some("title"), "ffffffff", None, params, None, true)
            .unwrap();

        // Host add/del opts are applied to the composed options.
        let options = entry.options();
        assert!(options.contains("debug"));
        assert!(!options.contains("rhgb"));
        assert!(matches!(entry.profile(), Some(BootProfile::Host(_))));
    }

    #[test]
    fn test_delete_entries_and_auto_clean() {
        let (_td, mut ctx) = test_context();
        ctx.create_profile(rhel72()).unwrap();
        let boot = ctx.config().boot_path.clone();
        std::fs::write(boot.join("vmlinuz-3.10-23.el7"), "kernel").unwrap();
        std::fs::write(boot.join("initramfs-3.10-23.el7.img"), "initramfs").unwrap();

        let mut params = BootParams::new("3.10-23.el7").unwrap();
        params.set_root_device("/dev/vg00/lvol0");
        let boot_id = ctx
            .create_entry(Some("title"), "ffffffff", None, params, None, true)
            .unwrap()
            .boot_id();

        let deleted = ctx
            .delete_entries(&Selection::from_boot_id(&boot_id[..7]))
            .unwrap();
        assert_eq!(deleted, 1);

        // Auto-clean dropped the now-unreferenced images.
        let cached = ctx.cache().unwrap().find_paths(&Selection::default()).unwrap();
        assert!(cached.is_empty());

        // Deleting again fails: nothing matches.
        assert!(ctx
            .delete_entries(&Selection::from_boot_id(&boot_id[..7]))
            .is_err());
    }

    #[test]
    fn test_delete_profile_in_use_refused() {
        let (_td, mut ctx) = test_context();
        let os_id = ctx.create_profile(rhel72()).unwrap().os_id().to_string();
        let mut params = BootParams::new("3.10-23.el7").unwrap();
        params.set_root_device("/dev/vg00/lvol0");
        ctx.create_entry(Some("title"), "ffffffff", None, params, None, true)
            .unwrap();

        assert!(ctx.delete_profile(&os_id[..7]).is_err());
        ctx.delete_entries(&Selection::default()).unwrap();
        ctx.delete_profile(&os_id[..7]).unwrap();
    }

    #[test]
    fn test_legacy_sync_on_mutation() {
        let (_td, ctx) = test_context();
        let boot = ctx.config().boot_path.clone();
        std::fs::create_dir_all(boot.join("grub")).unwrap();
        std::fs::write(boot.join("grub/grub.conf"), "default=0\n").unwrap();

        // Enable legacy sync in the context configuration.
        let mut config = ctx.config().clone();
        config.legacy_enable = true;
        config.cache_enable = false;
        let mut ctx = BoomContext::with_probe(config, Box::new(TestProbe::default()));
        ctx.create_profile(rhel72()).unwrap();

        let mut params = BootParams::new("3.10-23.el7").unwrap();
        params.set_root_device("/dev/vg00/lvol0");
        ctx.create_entry(Some("lvm entry"), "ffffffff", None, params, None, true)
            .unwrap();

        let text = std::fs::read_to_string(boot.join("grub/grub.conf")).unwrap();
        assert!(text.contains("#--- BOOM_Grub1_BEGIN ---"));
        assert!(text.contains("title lvm entry"));

        ctx.clear_legacy().unwrap();
        let text = std::fs::read_to_string(boot.join("grub/grub.conf")).unwrap();
        assert!(!text.contains("BOOM_Grub1"));
        assert!(text.contains("default=0"));
    }

    #[test]
    fn test_stratis_pool_resolution() {
        let (_td, config) = scratch_boot();
        let probe = TestProbe::default()
            .with_stratis_pool("pool0", "22be5a85-e3ee-4d3e-b6b2-8c3b0b9a63a7");
        let mut ctx = BoomContext::with_probe(config, Box::new(probe));
        let osp = OsProfile::builder("Fedora", "fedora", "38", "38")
            .uname_pattern("fc38")
            .options("root=%{root_device} ro %{root_opts}")
            .build()
            .unwrap();
        ctx.create_profile(osp).unwrap();

        let mut params = BootParams::new("6.3.1-fc38").unwrap();
        params.set_root_device("/dev/stratis/pool0/fs0");
        let entry = ctx
            .create_entry(Some("stratis"), "ffffffff", None, params, None, true)
            .unwrap();
        assert_eq!(
            entry.root_opts(),
            "stratis.rootfs.pool_uuid=22be5a85-e3ee-4d3e-b6b2-8c3b0b9a63a7"
        );
    }
}
