/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Boom: a Boot Loader Specification entry manager.
//!
//! Boom composes boot entries from three inputs: an OS profile (the
//! per-release template), an optional host profile (per-machine
//! overrides), and a set of boot parameters (kernel version, root
//! device, root flags). The composition is rendered and persisted as a
//! BLS snippet whose name and content are tied together by a
//! content-addressed identifier, and a boot image cache keeps
//! byte-for-byte copies of the kernels and initramfs images entries
//! refer to.

pub mod bootloader;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod hostprofile;
pub mod keyvalue;
pub mod legacy;
pub mod mounts;
pub mod osprofile;
pub mod platform;
pub mod profile;
pub mod selection;
pub mod template;

pub use config::BoomConfig;
pub use context::BoomContext;
pub use error::{BoomError, Result};
pub use selection::Selection;

/// Return `true` when boom debugging is enabled via the environment.
///
/// With debugging enabled, load operations fail fast instead of
/// skipping items that cannot be parsed.
pub fn debug_enabled() -> bool {
    std::env::var_os("BOOM_DEBUG").is_some()
}
