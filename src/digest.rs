/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Content-addressed identifiers.
//!
//! Every boom identity (`boot_id`, `os_id`, `host_id`, `img_id`) is the
//! SHA-1 of some canonical byte sequence, rendered as lowercase hex.
//! The digests are identifiers, not a security boundary.

use std::io::Read;

use openssl::hash::{Hasher, MessageDigest};

use crate::error::Result;

/// Block size for hashing image files.
const HASH_BLOCK_SIZE: usize = 1024 * 1024;

/// The display prefix length used when no longer prefix is needed for
/// uniqueness.
pub const MIN_ID_WIDTH: usize = 7;

/// Return the SHA-1 hex digest of a string's UTF-8 bytes.
pub fn sha1_hex(data: &str) -> String {
    let mut hasher =
        Hasher::new(MessageDigest::sha1()).expect("openssl sha1 hasher creation failed");
    hasher.update(data.as_bytes()).expect("openssl hash update");
    let digest = hasher.finish().expect("openssl hash finish");
    hex::encode(digest)
}

/// Return the SHA-1 hex digest of a reader's contents, hashing in
/// 1 MiB blocks.
pub fn sha1_hex_of_reader(mut r: impl Read) -> std::io::Result<String> {
    let mut hasher =
        Hasher::new(MessageDigest::sha1()).expect("openssl sha1 hasher creation failed");
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]).expect("openssl hash update");
    }
    let digest = hasher.finish().expect("openssl hash finish");
    Ok(hex::encode(digest))
}

/// Return the SHA-1 hex digest of the file at `path`.
pub fn sha1_hex_of_file(path: &camino::Utf8Path) -> Result<String> {
    use crate::error::IoContext;
    let f = std::fs::File::open(path).path_context(path.as_str())?;
    sha1_hex_of_reader(f).path_context(path.as_str())
}

/// Find the smallest prefix length `>= min_prefix` at which no two of
/// the supplied identifiers collide.
pub fn find_minimum_sha_prefix<'a>(
    ids: impl IntoIterator<Item = &'a str>,
    min_prefix: usize,
) -> usize {
    let mut ids: Vec<&str> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut width = min_prefix;
    for pair in ids.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let common = a
            .chars()
            .zip(b.chars())
            .take_while(|(x, y)| x == y)
            .count();
        if common >= width {
            width = common + 1;
        }
    }
    width
}

/// Calculate the minimum unique display width for a set of identifier
/// values drawn from `objs`.
pub fn min_id_width<'a, T>(
    min_prefix: usize,
    objs: impl IntoIterator<Item = &'a T>,
    id: impl Fn(&'a T) -> &'a str,
) -> usize
where
    T: 'a,
{
    find_minimum_sha_prefix(objs.into_iter().map(id), min_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex() {
        // Well-known digest of the empty string.
        assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            sha1_hex("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_sha1_hex_of_reader_matches_str() {
        let data = "vmlinuz image bytes";
        let from_reader = sha1_hex_of_reader(data.as_bytes()).unwrap();
        assert_eq!(from_reader, sha1_hex(data));
    }

    #[test]
    fn test_min_prefix_no_collision() {
        let ids = ["aaaaaaaaaa", "bbbbbbbbbb"];
        assert_eq!(find_minimum_sha_prefix(ids, 7), 7);
    }

    #[test]
    fn test_min_prefix_collision() {
        let ids = ["aaaaaaaa01", "aaaaaaaa02", "bbbbbbbbbb"];
        assert_eq!(find_minimum_sha_prefix(ids, 7), 10);
    }

    #[test]
    fn test_min_prefix_empty() {
        assert_eq!(find_minimum_sha_prefix([], 7), 7);
    }
}
