#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Deterministic in-memory ZIP fixtures for Pomar tests.
//!
//! Archives are assembled byte-by-byte (local headers, central directory,
//! end-of-central-directory) so tests control every field without going
//! through a writer library. No ZIP64, no data descriptors, DOS timestamps
//! pinned to zero.

use std::io::Write;

use flate2::{Compression, Crc, write::DeflateEncoder};

const LOCAL_SIG: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const CENTRAL_SIG: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
const EOCD_SIG: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

/// One entry in a fixture archive.
pub struct FixtureEntry {
    /// Entry name as stored in both headers.
    pub name: String,
    /// Uncompressed payload.
    pub data: Vec<u8>,
    /// Whether to deflate the payload (method 8) instead of storing it.
    pub deflate: bool,
}

/// Build a stored (method 0) fixture entry.
#[must_use]
pub fn stored(name: &str, data: &[u8]) -> FixtureEntry {
    FixtureEntry {
        name: name.to_string(),
        data: data.to_vec(),
        deflate: false,
    }
}

/// Build a deflated (method 8) fixture entry.
#[must_use]
pub fn deflated(name: &str, data: &[u8]) -> FixtureEntry {
    FixtureEntry {
        name: name.to_string(),
        data: data.to_vec(),
        deflate: true,
    }
}

/// Build an archive of stored entries from `(name, data)` pairs.
#[must_use]
pub fn build_stored_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let entries: Vec<FixtureEntry> = entries
        .iter()
        .map(|(name, data)| stored(name, data))
        .collect();
    build_archive(&entries)
}

/// Assemble a complete single-disk archive from the given entries.
///
/// # Panics
///
/// Panics if an entry name or payload exceeds the 32-bit limits of the
/// classic ZIP format; fixtures are expected to stay tiny.
#[must_use]
pub fn build_archive(entries: &[FixtureEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let crc = crc32(&entry.data);
        let (method, payload) = if entry.deflate {
            (8u16, deflate(&entry.data))
        } else {
            (0u16, entry.data.clone())
        };
        let name = entry.name.as_bytes();
        let local_offset = u32::try_from(out.len()).expect("fixture exceeds u32 offset");
        let compressed = u32::try_from(payload.len()).expect("fixture payload exceeds u32");
        let uncompressed = u32::try_from(entry.data.len()).expect("fixture payload exceeds u32");
        let name_len = u16::try_from(name.len()).expect("fixture name exceeds u16");

        out.extend_from_slice(&LOCAL_SIG);
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(name);
        out.extend_from_slice(&payload);

        central.extend_from_slice(&CENTRAL_SIG);
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // mod time
        central.extend_from_slice(&0u16.to_le_bytes()); // mod date
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&compressed.to_le_bytes());
        central.extend_from_slice(&uncompressed.to_le_bytes());
        central.extend_from_slice(&name_len.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra len
        central.extend_from_slice(&0u16.to_le_bytes()); // comment len
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let cd_offset = u32::try_from(out.len()).expect("fixture exceeds u32 offset");
    let cd_size = u32::try_from(central.len()).expect("fixture directory exceeds u32");
    let count = u16::try_from(entries.len()).expect("fixture entry count exceeds u16");

    out.extend_from_slice(&central);
    out.extend_from_slice(&EOCD_SIG);
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number
    out.extend_from_slice(&0u16.to_le_bytes()); // disk with CD
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment len
    out
}

/// CRC-32 (IEEE polynomial) of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory deflate");
    encoder.finish().expect("in-memory deflate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_archive_has_eocd_at_tail() {
        let archive = build_stored_archive(&[("a.txt", b"hello")]);
        // EOCD is the final 22 bytes for a comment-free archive.
        let eocd = &archive[archive.len() - 22..];
        assert_eq!(&eocd[0..4], &EOCD_SIG);
        assert_eq!(u16::from_le_bytes([eocd[10], eocd[11]]), 1);
    }

    #[test]
    fn deflated_entry_shrinks_repetitive_payload() {
        let data = vec![b'x'; 4096];
        let archive = build_archive(&[deflated("big.bin", &data)]);
        assert!(archive.len() < data.len());
    }

    #[test]
    fn crc32_matches_reference_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }
}
