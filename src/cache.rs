/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The boot image cache.
//!
//! Kernel and initramfs images referenced by boot entries are copied
//! into `<boom>/cache/` under their content address
//! (`<img_id>.img`, where `img_id` is the SHA-1 of the file bytes) so
//! that entries whose images are later removed from `/boot` can be
//! restored byte-for-byte. A JSON index maps cached paths to their
//! image versions and captured file metadata.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::digest::{find_minimum_sha_prefix, sha1_hex_of_file, MIN_ID_WIDTH};
use crate::error::{BoomError, IoContext, Result};
use crate::profile::atomic_write;
use crate::selection::{Selection, SelectionKinds};

/// The name of the JSON cache index file.
pub const CACHE_INDEX: &str = "cacheindex.json";

/// The extension used for cached image files.
pub const IMAGE_EXT: &str = ".img";

/// File mode for the cache index.
const CACHE_INDEX_MODE: u32 = 0o644;

/// The state of one cached path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Image cached and present in /boot.
    Cached,
    /// Image cached and missing from /boot.
    Missing,
    /// Image in /boot but its cache copy is gone.
    Broken,
    /// Image restored to /boot from the cache.
    Restored,
    /// Neither the boot image nor the cache copy exists.
    Unknown,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CacheState::Cached => "CACHED",
            CacheState::Missing => "MISSING",
            CacheState::Broken => "BROKEN",
            CacheState::Restored => "RESTORED",
            CacheState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// File metadata captured from a cached path at insertion time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathMeta {
    #[serde(rename = "path_mode")]
    pub mode: u32,
    #[serde(rename = "path_uid")]
    pub uid: u32,
    #[serde(rename = "path_gid")]
    pub gid: u32,
    #[serde(rename = "path_attrs", default)]
    pub attrs: BTreeMap<String, String>,
}

/// Metadata for one cached image version.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageMeta {
    #[serde(rename = "image_ts")]
    pub timestamp: i64,
}

/// The persistent shape of `cacheindex.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheData {
    /// Cached path to the image versions observed for it.
    index: BTreeMap<String, Vec<String>>,
    /// Cached path to captured file metadata.
    paths: BTreeMap<String, PathMeta>,
    /// Image identifier to image metadata.
    images: BTreeMap<String, ImageMeta>,
}

/// One cached path with its image versions, newest first.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: String,
    pub meta: PathMeta,
    /// `(img_id, timestamp)` pairs sorted newest first.
    pub images: Vec<(String, i64)>,
}

impl CacheEntry {
    /// The most recent image identifier for this path.
    pub fn img_id(&self) -> &str {
        &self.images[0].0
    }

    /// The display prefix of the most recent image identifier.
    pub fn disp_img_id(&self) -> &str {
        let ids = self.images.iter().map(|(id, _)| id.as_str());
        let width = find_minimum_sha_prefix(ids, MIN_ID_WIDTH);
        &self.images[0].0[..width]
    }

    /// The timestamp of the most recent image.
    pub fn timestamp(&self) -> i64 {
        self.images[0].1
    }

    /// The original path of a backup image (`<path>.boomN`), or the
    /// path itself for plain cached images.
    pub fn orig_path(&self) -> &str {
        if let Some((orig, ext)) = self.path.rsplit_once('.') {
            if let Some(n) = ext.strip_prefix("boom") {
                if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) {
                    return orig;
                }
            }
        }
        &self.path
    }
}

/// Test a `CacheEntry` against selection criteria.
pub fn select_cache_entry(s: &Selection, ce: &CacheEntry) -> bool {
    // A version criterion matches anywhere in the image path.
    if let Some(version) = s.version.as_deref() {
        if !ce.path.contains(version) {
            return false;
        }
    }
    if let Some(linux) = s.linux.as_deref() {
        if linux != ce.path {
            return false;
        }
    }
    if let Some(initrd) = s.initrd.as_deref() {
        if initrd != ce.path {
            return false;
        }
    }
    if let Some(path) = s.path.as_deref() {
        if path != ce.path {
            return false;
        }
    }
    if let Some(orig_path) = s.orig_path.as_deref() {
        if orig_path != ce.orig_path() {
            return false;
        }
    }
    if let Some(timestamp) = s.timestamp {
        if timestamp != ce.timestamp() {
            return false;
        }
    }
    if let Some(img_id) = s.img_id.as_deref() {
        if !ce.img_id().starts_with(img_id) {
            return false;
        }
    }
    true
}

/// The boot image cache: an on-disk store of content-addressed image
/// copies plus the JSON index describing them.
#[derive(Debug)]
pub struct ImageCache {
    boot_dir: Utf8PathBuf,
    cache_dir: Utf8PathBuf,
    data: CacheData,
    loaded: bool,
}

impl ImageCache {
    pub fn new(boot_dir: Utf8PathBuf, cache_dir: Utf8PathBuf) -> ImageCache {
        ImageCache {
            boot_dir,
            cache_dir,
            data: CacheData::default(),
            loaded: false,
        }
    }

    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    /// Convert an image path (rooted at the /boot file system) into
    /// an absolute boot path.
    fn boot_path_of(&self, img_path: &str) -> Utf8PathBuf {
        self.boot_dir.join(img_path.trim_start_matches('/'))
    }

    /// The cache file path for an image identifier.
    fn cache_path_of(&self, img_id: &str) -> Utf8PathBuf {
        self.cache_dir.join(format!("{img_id}{IMAGE_EXT}"))
    }

    /// The restored-image sentinel path for a boot path.
    fn sentinel_path_of(boot_path: &Utf8Path) -> Utf8PathBuf {
        let dir = boot_path.parent().unwrap_or(Utf8Path::new("/"));
        let base = boot_path.file_name().unwrap_or_default();
        dir.join(format!(".{base}.boomrestored"))
    }

    /// Return `true` if `boot_path` carries a restored-image sentinel.
    fn is_restored(boot_path: &Utf8Path) -> bool {
        Self::sentinel_path_of(boot_path).exists()
    }

    /// Discard the in-memory cache state.
    pub fn drop_cache(&mut self) {
        self.data = CacheData::default();
        self.loaded = false;
    }

    /// The set of `img_id` values present as files in the cache
    /// directory.
    fn on_disk_image_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.cache_dir.exists() {
            return Ok(ids);
        }
        let dir_entries =
            std::fs::read_dir(&self.cache_dir).path_context(self.cache_dir.as_str())?;
        for dir_entry in dir_entries {
            let dir_entry = dir_entry.path_context(self.cache_dir.as_str())?;
            let Some(name) = dir_entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if let Some(id) = name.strip_suffix(IMAGE_EXT) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Read the on-disk cache state into memory, logging (but not
    /// repairing) inconsistencies between the index and the image
    /// files present.
    pub fn load(&mut self) -> Result<()> {
        self.drop_cache();
        let index_path = self.cache_dir.join(CACHE_INDEX);
        log::debug!("loading cache entries from '{index_path}'");

        let ids = self.on_disk_image_ids()?;

        let text = match std::fs::read_to_string(&index_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no metadata found: starting empty cache");
                self.loaded = true;
                return Ok(());
            }
            Err(e) => return Err(BoomError::io(index_path.as_str(), e)),
        };
        let data: CacheData = serde_json::from_str(&text)
            .map_err(|e| BoomError::Cache(format!("malformed cache index: {e}")))?;

        for (path, images) in &data.index {
            for image_id in images {
                if !ids.contains(image_id) {
                    log::warn!(
                        "image identifier '{image_id}' not found in cache for path {path}"
                    );
                }
            }
        }
        for path in data.paths.keys() {
            if !data.index.contains_key(path) {
                log::warn!("no image for path '{path}' found in cache");
            }
        }
        for id in &ids {
            if !data.images.contains_key(id) {
                log::warn!("found unreferenced image '{id}{IMAGE_EXT}' in cache");
            }
        }

        let image_count: usize = data.index.values().map(Vec::len).sum();
        log::debug!("loaded {} cache paths and {image_count} images", data.paths.len());
        self.data = data;
        self.loaded = true;
        Ok(())
    }

    pub fn ensure_loaded(&mut self) -> Result<()> {
        if !self.loaded {
            self.load()?;
        }
        Ok(())
    }

    /// Write the in-memory cache index back to disk atomically.
    pub fn write(&self) -> Result<()> {
        let index_path = self.cache_dir.join(CACHE_INDEX);
        let json = serde_json::to_string(&self.data)
            .map_err(|e| BoomError::Cache(format!("serialising cache index: {e}")))?;
        atomic_write(&index_path, json.as_bytes(), CACHE_INDEX_MODE)
    }

    /// Build the snapshot entry for a cached path, images newest
    /// first.
    fn entry_for(&self, img_path: &str) -> Option<CacheEntry> {
        let images = self.data.index.get(img_path)?;
        let meta = self.data.paths.get(img_path)?.clone();
        let mut images: Vec<(String, i64)> = images
            .iter()
            .map(|id| {
                let ts = self.data.images.get(id).map_or(0, |m| m.timestamp);
                (id.clone(), ts)
            })
            .collect();
        images.sort_by_key(|(_, ts)| std::cmp::Reverse(*ts));
        Some(CacheEntry {
            path: img_path.to_string(),
            meta,
            images,
        })
    }

    /// The state of a cached path, derived by comparing the boot
    /// directory contents with the cache contents.
    pub fn state(&self, ce: &CacheEntry) -> CacheState {
        let boot_path = self.boot_path_of(&ce.path);
        let cache_path = self.cache_path_of(ce.img_id());
        let boot_exists = boot_path.exists();
        let cache_exists = cache_path.exists();
        match (boot_exists, cache_exists) {
            (true, true) => {
                let boot_id = sha1_hex_of_file(&boot_path).unwrap_or_default();
                if Self::is_restored(&boot_path) && boot_id == ce.img_id() {
                    CacheState::Restored
                } else {
                    CacheState::Cached
                }
            }
            (false, true) => CacheState::Missing,
            (true, false) => CacheState::Broken,
            (false, false) => CacheState::Unknown,
        }
    }

    fn insert_path(&mut self, img_path: &str, img_id: &str, meta: PathMeta) {
        self.data.paths.insert(img_path.to_string(), meta);
        let images = self.data.index.entry(img_path.to_string()).or_default();
        if !images.iter().any(|id| id == img_id) {
            images.push(img_id.to_string());
        }
    }

    /// Allocate a new, unique backup path name for `img_path`.
    fn find_backup_name(&self, img_path: &str) -> String {
        let mut backup_nr = 0;
        loop {
            let candidate = format!("{img_path}.boom{backup_nr}");
            if !self.boot_path_of(&candidate).exists() {
                return candidate;
            }
            backup_nr += 1;
        }
    }

    fn cache_path_impl(&mut self, img_path: &str, backup: bool) -> Result<CacheEntry> {
        use std::os::unix::fs::MetadataExt;

        self.ensure_loaded()?;
        let boot_path = self.boot_path_of(img_path);
        let st = std::fs::metadata(&boot_path).path_context(boot_path.as_str())?;
        if !st.is_file() {
            return Err(BoomError::Cache(format!(
                "'{img_path}' is not a regular file"
            )));
        }

        let img_id = sha1_hex_of_file(&boot_path)?;
        let image_ts = st.mtime();
        let mut img_path = img_path.to_string();

        if backup {
            // An image whose content is already cached needs no new
            // backup copy.
            if self.data.images.contains_key(&img_id) {
                if let Some(ce) = self
                    .find_images(&Selection {
                        img_id: Some(img_id.clone()),
                        ..Default::default()
                    })?
                    .into_iter()
                    .next()
                {
                    return Ok(ce);
                }
            }
            img_path = self.find_backup_name(&img_path);
            log::debug!("backing up path '{boot_path}' as '{img_path}'");
        }

        if let Some(images) = self.data.index.get(&img_path) {
            if images.iter().any(|id| id == &img_id) {
                log::info!(
                    "image with img_id={} already cached for path '{img_path}'",
                    &img_id[..6]
                );
                return self
                    .entry_for(&img_path)
                    .ok_or_else(|| BoomError::Cache(format!("'{img_path}' is not cached")));
            }
        }
        log::info!(
            "adding new image with img_id={} for path '{img_path}'",
            &img_id[..6]
        );

        let meta = PathMeta {
            mode: st.mode(),
            uid: st.uid(),
            gid: st.gid(),
            attrs: BTreeMap::new(),
        };

        let cache_path = self.cache_path_of(&img_id);
        std::fs::copy(&boot_path, &cache_path).path_context(cache_path.as_str())?;

        self.data
            .images
            .insert(img_id.clone(), ImageMeta { timestamp: image_ts });
        self.insert_path(&img_path, &img_id, meta);
        self.write()?;

        self.entry_for(&img_path)
            .ok_or_else(|| BoomError::Cache(format!("'{img_path}' is not cached")))
    }

    /// Add an image to the cache.
    ///
    /// `img_path` is the path to the boot image relative to the
    /// configured /boot directory, as referenced from boot entries.
    pub fn cache_path(&mut self, img_path: &str) -> Result<CacheEntry> {
        log::debug!("caching path '{img_path}'");
        self.cache_path_impl(img_path, false)
    }

    /// Back up an image: cache it under a fresh `<path>.boomN` name
    /// and restore the copy to that path, creating a tamper-resistant
    /// sidecar of the original.
    pub fn backup_path(&mut self, img_path: &str) -> Result<CacheEntry> {
        let ce = self.cache_path_impl(img_path, true)?;
        self.restore_path(&ce.path, None)
    }

    /// Restore a cached path to the /boot file system.
    ///
    /// With `dest` the image is restored to a different path, which
    /// becomes a new cached path sharing the image. The path must be
    /// in state `MISSING` or `RESTORED`.
    pub fn restore_path(&mut self, img_path: &str, dest: Option<&str>) -> Result<CacheEntry> {
        self.ensure_loaded()?;
        let mut ce = self
            .entry_for(img_path)
            .ok_or_else(|| BoomError::Cache(format!("path '{img_path}' is not cached")))?;

        if let Some(dest) = dest {
            if !self.data.index.contains_key(dest) {
                let img_id = ce.img_id().to_string();
                let meta = ce.meta.clone();
                self.insert_path(dest, &img_id, meta);
                self.write()?;
            }
            ce = self
                .entry_for(dest)
                .ok_or_else(|| BoomError::Cache(format!("path '{dest}' is not cached")))?;
        }

        let state = self.state(&ce);
        if state != CacheState::Missing && state != CacheState::Restored {
            return Err(BoomError::Cache(format!(
                "restore failed: state of '{}' is {state}, not MISSING or RESTORED",
                ce.path
            )));
        }

        let boot_path = self.boot_path_of(&ce.path);
        let cache_path = self.cache_path_of(ce.img_id());

        let restore = || -> Result<()> {
            std::fs::copy(&cache_path, &boot_path).path_context(boot_path.as_str())?;
            std::os::unix::fs::chown(&boot_path, Some(ce.meta.uid), Some(ce.meta.gid))
                .path_context(boot_path.as_str())?;
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &boot_path,
                std::fs::Permissions::from_mode(ce.meta.mode & 0o7777),
            )
            .path_context(boot_path.as_str())?;
            let sentinel = Self::sentinel_path_of(&boot_path);
            std::fs::File::create(&sentinel).path_context(sentinel.as_str())?;
            Ok(())
        };

        if let Err(e) = restore() {
            // Do not leave a partially restored image behind.
            let _ = std::fs::remove_file(&boot_path);
            return Err(e);
        }
        Ok(ce)
    }

    /// Remove a boom-restored image copy and its sentinel from /boot.
    fn remove_boot(&self, img_path: &str) -> Result<()> {
        let boot_path = self.boot_path_of(img_path);
        let sentinel = Self::sentinel_path_of(&boot_path);
        if !sentinel.exists() {
            return Err(BoomError::Cache(format!(
                "'{boot_path}' is not boom managed"
            )));
        }
        std::fs::remove_file(&boot_path).path_context(boot_path.as_str())?;
        std::fs::remove_file(&sentinel).path_context(sentinel.as_str())?;
        Ok(())
    }

    /// Remove an image copy from the cache store.
    fn remove_cached_image(&self, img_id: &str) -> Result<()> {
        let cache_path = self.cache_path_of(img_id);
        if !cache_path.starts_with(&self.cache_dir) {
            return Err(BoomError::Cache(format!(
                "'{cache_path}' is not a boom cache path"
            )));
        }
        std::fs::remove_file(&cache_path).path_context(cache_path.as_str())?;
        Ok(())
    }

    /// Remove the boom-restored image for a path in state `RESTORED`.
    pub fn purge_path(&mut self, img_path: &str) -> Result<()> {
        self.ensure_loaded()?;
        let ce = self
            .entry_for(img_path)
            .ok_or_else(|| BoomError::Cache(format!("path '{img_path}' is not cached")))?;
        if self.state(&ce) != CacheState::Restored {
            return Err(BoomError::Cache(format!(
                "purge failed: state of '{img_path}' is not RESTORED"
            )));
        }
        self.remove_boot(img_path)
    }

    /// Remove a path from the cache, discarding any image copies not
    /// shared with another cached path.
    ///
    /// `entry_refs` is the number of live boot entries referencing the
    /// path: a referenced path is retained unless `force` is set.
    /// Returns `true` if the path was removed.
    pub fn uncache_path(&mut self, img_path: &str, entry_refs: usize, force: bool) -> Result<bool> {
        self.ensure_loaded()?;
        if !self.data.paths.contains_key(img_path) {
            return Err(BoomError::Cache(format!("path '{img_path}' is not cached")));
        }

        if entry_refs > 0 && !force {
            log::info!("retaining cache path '{img_path}' used by {entry_refs} boot entries");
            return Ok(false);
        }
        if entry_refs > 0 {
            log::warn!("uncaching path '{img_path}' used by {entry_refs} boot entries");
        }

        let images = self.data.index.remove(img_path).unwrap_or_default();
        self.data.paths.remove(img_path);

        for img_id in images {
            let shared = self.data.index.values().flatten().any(|id| *id == img_id);
            if !shared {
                self.data.images.remove(&img_id);
                if let Err(e) = self.remove_cached_image(&img_id) {
                    log::error!("error removing cache image '{img_id}': {e}");
                }
            }
        }

        let boot_path = self.boot_path_of(img_path);
        if Self::is_restored(&boot_path) {
            self.remove_boot(img_path)?;
        }

        self.write()?;
        Ok(true)
    }

    fn find_entries(&mut self, selection: &Selection, by_image: bool) -> Result<Vec<CacheEntry>> {
        self.ensure_loaded()?;
        selection.check_valid(SelectionKinds::CACHE)?;

        let paths: Vec<String> = self.data.index.keys().cloned().collect();
        let mut matches = Vec::new();
        for path in paths {
            let Some(ce) = self.entry_for(&path) else {
                continue;
            };
            if by_image {
                for (img_id, ts) in &ce.images {
                    let single = CacheEntry {
                        path: ce.path.clone(),
                        meta: ce.meta.clone(),
                        images: vec![(img_id.clone(), *ts)],
                    };
                    if select_cache_entry(selection, &single) {
                        matches.push(single);
                    }
                }
            } else if select_cache_entry(selection, &ce) {
                matches.push(ce);
            }
        }
        Ok(matches)
    }

    /// Find cache entries matching the selection, one per cached path
    /// with its image list sorted newest first.
    pub fn find_paths(&mut self, selection: &Selection) -> Result<Vec<CacheEntry>> {
        let matches = self.find_entries(selection, false)?;
        log::debug!("found {} cached paths", matches.len());
        Ok(matches)
    }

    /// Find cache entries matching the selection, one per cached
    /// image.
    pub fn find_images(&mut self, selection: &Selection) -> Result<Vec<CacheEntry>> {
        let matches = self.find_entries(selection, true)?;
        log::debug!("found {} cached images", matches.len());
        Ok(matches)
    }

    /// All cached paths.
    pub fn cached_paths(&self) -> Vec<String> {
        self.data.index.keys().cloned().collect()
    }
}
