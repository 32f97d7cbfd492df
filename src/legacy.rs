/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Legacy bootloader synchronisation.
//!
//! Legacy formats are write-only: boom regenerates a fenced block of
//! entries inside a foreign configuration file, delimited by
//! `#--- BOOM_<name>_BEGIN ---` and `#--- BOOM_<name>_END ---`
//! markers, leaving everything outside the fence untouched.

use camino::Utf8Path;

use crate::bootloader::{BootEntry, BOOT_ENTRY_MODE};
use crate::error::{BoomError, Result};
use crate::profile::atomic_write;

/// The legacy loader format written by boom.
pub const BOOM_LOADER_GRUB1: &str = "grub1";

/// Default Grub1 configuration file path, relative to /boot.
pub const GRUB1_CFG_PATH: &str = "grub/grub.conf";

/// Display name used in Grub1 fence markers.
pub const GRUB1_NAME: &str = "Grub1";

fn begin_tag(name: &str) -> String {
    format!("#--- BOOM_{name}_BEGIN ---")
}

fn end_tag(name: &str) -> String {
    format!("#--- BOOM_{name}_END ---")
}

/// Render one boot entry in Grub1 configuration notation.
pub fn format_grub1_entry(entry: &BootEntry, grub_device: &str) -> String {
    let tab = " ".repeat(8);
    format!(
        "title {}\n{tab}root {}\n{tab}kernel {} {}\n{tab}initrd {}",
        entry.title(),
        grub_device,
        entry.linux(),
        entry.options(),
        entry.initrd()
    )
}

/// Scan result for one pass over a legacy configuration file.
struct FenceScan {
    /// Lines outside the fence, in order, with the index at which the
    /// fence was found (if any).
    outside: Vec<String>,
    fence_at: Option<usize>,
}

/// Walk the lines of a legacy configuration file, separating the boom
/// fence from the surrounding content and validating the markers.
fn scan_fence(lines: &[&str], name: &str, origin: &Utf8Path) -> Result<FenceScan> {
    let begin = begin_tag(name);
    let end = end_tag(name);

    let mut outside = Vec::new();
    let mut fence_at = None;
    let mut in_fence = false;
    let mut found = false;

    for (nr, line) in lines.iter().enumerate() {
        let line_nr = nr + 1;
        if line.contains(&begin) {
            if in_fence || found {
                return Err(BoomError::LegacyFormat(format!(
                    "duplicate boom begin tag at line {line_nr} in legacy configuration file '{origin}'"
                )));
            }
            in_fence = true;
            fence_at = Some(outside.len());
            continue;
        }
        if line.contains(&end) {
            if found {
                return Err(BoomError::LegacyFormat(format!(
                    "duplicate boom end tag at line {line_nr} in legacy configuration file '{origin}'"
                )));
            }
            if !in_fence {
                return Err(BoomError::LegacyFormat(format!(
                    "missing boom begin tag at line {line_nr} in legacy configuration file '{origin}'"
                )));
            }
            in_fence = false;
            found = true;
            continue;
        }
        if !in_fence {
            outside.push((*line).to_string());
        }
    }

    if in_fence {
        return Err(BoomError::LegacyFormat(format!(
            "missing boom end tag at EOF in legacy configuration file '{origin}'"
        )));
    }
    Ok(FenceScan { outside, fence_at })
}

fn read_config_lines(cfg_path: &Utf8Path) -> Result<Option<String>> {
    match std::fs::read_to_string(cfg_path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BoomError::io(cfg_path.as_str(), e)),
    }
}

/// Regenerate the boom fence in the legacy configuration file at
/// `cfg_path`.
///
/// Content outside the fence is copied verbatim; the fence itself is
/// replaced with a freshly rendered block containing `entries` in
/// `(version, title)` order. A file with no fence gains one at the
/// end. Inconsistent markers are fatal and leave the file unmodified.
pub fn write_legacy(
    cfg_path: &Utf8Path,
    name: &str,
    entries: &[&BootEntry],
    grub_device: &str,
) -> Result<()> {
    let cfg_dir = cfg_path.parent().unwrap_or(Utf8Path::new("/"));
    if !cfg_dir.exists() {
        log::error!("cannot write {name} configuration: '{cfg_dir}' does not exist");
        return Ok(());
    }

    let text = read_config_lines(cfg_path)?.unwrap_or_default();
    let lines: Vec<&str> = text.lines().collect();
    let scan = scan_fence(&lines, name, cfg_path)?;

    // Entries are naturally in file system order; sort them so the
    // legacy configuration does not reorder as entries are rewritten.
    let mut sorted: Vec<&BootEntry> = entries.to_vec();
    sorted.sort_by_key(|be| (be.version(), be.title()));

    let mut block = vec![begin_tag(name)];
    for be in sorted {
        block.push(format_grub1_entry(be, grub_device));
    }
    block.push(end_tag(name));

    let mut out_lines = scan.outside;
    let insert_at = scan.fence_at.unwrap_or(out_lines.len());
    out_lines.splice(insert_at..insert_at, block);

    let mut out = out_lines.join("\n");
    out.push('\n');
    atomic_write(cfg_path, out.as_bytes(), BOOT_ENTRY_MODE)
}

/// Remove the boom fence and its contents from the legacy
/// configuration file at `cfg_path`.
///
/// Absence of both markers is a no-op; a single marker is a fatal
/// formatting error.
pub fn clear_legacy(cfg_path: &Utf8Path, name: &str) -> Result<()> {
    let cfg_dir = cfg_path.parent().unwrap_or(Utf8Path::new("/"));
    if !cfg_dir.exists() {
        log::error!("cannot clear {name} configuration: '{cfg_dir}' does not exist");
        return Ok(());
    }

    let Some(text) = read_config_lines(cfg_path)? else {
        return Ok(());
    };
    let lines: Vec<&str> = text.lines().collect();
    let scan = scan_fence(&lines, name, cfg_path)?;

    if scan.fence_at.is_none() {
        // No boom entries: nothing to do.
        return Ok(());
    }

    let mut out = scan.outside.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    atomic_write(cfg_path, out.as_bytes(), BOOT_ENTRY_MODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootloader::BootParams;
    use crate::osprofile::OsProfile;
    use crate::profile::BootProfile;
    use camino::Utf8PathBuf;
    use indoc::indoc;

    fn entry(version: &str, title: &str) -> BootEntry {
        let osp = OsProfile::builder("Fedora", "fedora", "38", "38")
            .options("root=%{root_device} ro %{root_opts}")
            .build()
            .unwrap();
        let mut bp = BootParams::new(version).unwrap();
        bp.set_root_device("/dev/sda5");
        BootEntry::create(
            Some(title),
            Some("ffffffff"),
            Some(BootProfile::Os(osp)),
            Some(bp),
            None,
        )
        .unwrap()
    }

    fn cfg(td: &tempfile::TempDir, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(td.path().join("grub.conf")).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_write_appends_fence() {
        let td = tempfile::tempdir().unwrap();
        let path = cfg(&td, "default=0\ntimeout=5\n");
        let e1 = entry("5.0.0", "five");

        write_legacy(&path, GRUB1_NAME, &[&e1], "(hd0,0)").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("default=0\ntimeout=5\n#--- BOOM_Grub1_BEGIN ---\n"));
        assert!(text.contains("title five"));
        assert!(text.contains("root (hd0,0)"));
        assert!(text.contains("kernel /vmlinuz-5.0.0 root=/dev/sda5 ro"));
        assert!(text.trim_end().ends_with("#--- BOOM_Grub1_END ---"));
    }

    #[test]
    fn test_write_replaces_existing_fence() {
        let td = tempfile::tempdir().unwrap();
        let path = cfg(
            &td,
            indoc! {"
                default=0
                #--- BOOM_Grub1_BEGIN ---
                title stale
                #--- BOOM_Grub1_END ---
                timeout=5
            "},
        );
        let e1 = entry("5.0.0", "five");

        write_legacy(&path, GRUB1_NAME, &[&e1], "(hd0,0)").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert!(text.contains("title five"));
        // The fence stays where it was, between the foreign lines.
        let begin_pos = text.find("BOOM_Grub1_BEGIN").unwrap();
        assert!(text.find("default=0").unwrap() < begin_pos);
        assert!(text.find("timeout=5").unwrap() > begin_pos);
    }

    #[test]
    fn test_entries_sorted_by_version_title() {
        let td = tempfile::tempdir().unwrap();
        let path = cfg(&td, "");
        let newer = entry("6.0.0", "six");
        let older = entry("5.0.0", "five");

        write_legacy(&path, GRUB1_NAME, &[&newer, &older], "(hd0,0)").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.find("title five").unwrap() < text.find("title six").unwrap());
    }

    #[test]
    fn test_duplicate_begin_is_fatal_and_preserves_file() {
        let td = tempfile::tempdir().unwrap();
        let content = indoc! {"
            #--- BOOM_Grub1_BEGIN ---
            #--- BOOM_Grub1_BEGIN ---
            #--- BOOM_Grub1_END ---
        "};
        let path = cfg(&td, content);
        let e1 = entry("5.0.0", "five");

        assert!(write_legacy(&path, GRUB1_NAME, &[&e1], "(hd0,0)").is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    }

    #[test]
    fn test_unterminated_fence_is_fatal() {
        let td = tempfile::tempdir().unwrap();
        let path = cfg(&td, "#--- BOOM_Grub1_BEGIN ---\ntitle stale\n");
        let e1 = entry("5.0.0", "five");
        assert!(write_legacy(&path, GRUB1_NAME, &[&e1], "(hd0,0)").is_err());
    }

    #[test]
    fn test_clear_removes_fence() {
        let td = tempfile::tempdir().unwrap();
        let path = cfg(
            &td,
            indoc! {"
                default=0
                #--- BOOM_Grub1_BEGIN ---
                title stale
                #--- BOOM_Grub1_END ---
                timeout=5
            "},
        );
        clear_legacy(&path, GRUB1_NAME).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "default=0\ntimeout=5\n");
    }

    #[test]
    fn test_clear_without_markers_is_noop() {
        let td = tempfile::tempdir().unwrap();
        let content = "default=0\ntimeout=5\n";
        let path = cfg(&td, content);
        clear_legacy(&path, GRUB1_NAME).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    }

    #[test]
    fn test_clear_with_single_marker_is_fatal() {
        let td = tempfile::tempdir().unwrap();
        let path = cfg(&td, "default=0\n#--- BOOM_Grub1_END ---\n");
        assert!(clear_legacy(&path, GRUB1_NAME).is_err());

        let path = cfg(&td, "default=0\n#--- BOOM_Grub1_BEGIN ---\n");
        assert!(clear_legacy(&path, GRUB1_NAME).is_err());
    }
}
