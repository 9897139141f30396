//! End-of-central-directory and central-directory parsing plus ranged entry
//! reads.

use std::io::Read;

use flate2::{Crc, read::DeflateDecoder};

use crate::error::ZipError;

pub(crate) const EOCD_SIG: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
pub(crate) const CENTRAL_SIG: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
pub(crate) const LOCAL_SIG: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Fixed EOCD length without the trailing comment.
pub(crate) const EOCD_LEN: usize = 22;
/// Fixed central-directory file header length.
pub(crate) const CENTRAL_HEADER_LEN: usize = 46;
/// Fixed local file header length before the variable name and extra field.
pub const LOCAL_HEADER_LEN: usize = 30;

/// Longest tail worth reading: a full EOCD plus the 65535-byte maximum
/// comment plus one signature byte.
pub const MAX_TAIL_LEN: u64 = 65_558;

const ZIP64_U16: u16 = u16::MAX;
const ZIP64_U32: u32 = u32::MAX;

/// Parsed end-of-central-directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eocd {
    /// Absolute offset of the EOCD signature within the archive.
    pub offset: u64,
    /// Number of central-directory entries.
    pub entry_count: u16,
    /// Central directory size in bytes.
    pub cd_size: u64,
    /// Absolute offset of the first central-directory entry.
    pub cd_offset: u64,
}

/// One central-directory entry, with its raw header bytes retained so they
/// can be copied verbatim into a rewritten directory.
#[derive(Debug, Clone)]
pub struct CdEntry {
    /// Entry name.
    pub name: String,
    /// Compression method: 0 stored, 8 deflate.
    pub method: u16,
    /// CRC-32 of the uncompressed payload.
    pub crc32: u32,
    /// Compressed payload size.
    pub compressed_size: u64,
    /// Uncompressed payload size.
    pub uncompressed_size: u64,
    /// Absolute offset of the entry's local file header.
    pub local_offset: u64,
    /// Raw central-directory header bytes, including name/extra/comment.
    pub raw: Vec<u8>,
}

fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Locate and parse the EOCD record in `tail`, the final bytes of an
/// archive of `archive_size` total bytes.
///
/// The scan walks backwards so an archive comment containing the signature
/// bytes cannot shadow the real record.
///
/// # Errors
///
/// [`ZipError::NotAZip`] when no signature is found, and
/// [`ZipError::Unsupported`] for ZIP64 sentinels or multi-disk layouts.
pub fn find_eocd(tail: &[u8], archive_size: u64) -> Result<Eocd, ZipError> {
    if tail.len() < EOCD_LEN || (tail.len() as u64) > archive_size {
        return Err(ZipError::NotAZip);
    }
    let tail_start = archive_size - tail.len() as u64;

    for i in (0..=tail.len() - EOCD_LEN).rev() {
        if tail[i..i + 4] != EOCD_SIG {
            continue;
        }
        let record = &tail[i..];

        let disk_number = le_u16(record, 4);
        let cd_disk = le_u16(record, 6);
        let disk_entries = le_u16(record, 8);
        let entry_count = le_u16(record, 10);
        let cd_size = le_u32(record, 12);
        let cd_offset = le_u32(record, 16);

        if disk_number == ZIP64_U16
            || cd_disk == ZIP64_U16
            || disk_entries == ZIP64_U16
            || entry_count == ZIP64_U16
            || cd_size == ZIP64_U32
            || cd_offset == ZIP64_U32
        {
            return Err(ZipError::Unsupported { feature: "ZIP64" });
        }
        if disk_number != 0 || cd_disk != 0 || disk_entries != entry_count {
            return Err(ZipError::Unsupported {
                feature: "multi-disk archive",
            });
        }

        let offset = tail_start + i as u64;
        let cd_end = u64::from(cd_offset)
            .checked_add(u64::from(cd_size))
            .ok_or(ZipError::Corrupt {
                what: "central directory bounds overflow",
            })?;
        if cd_end > offset {
            return Err(ZipError::Corrupt {
                what: "central directory overlaps end record",
            });
        }

        return Ok(Eocd {
            offset,
            entry_count,
            cd_size: u64::from(cd_size),
            cd_offset: u64::from(cd_offset),
        });
    }

    Err(ZipError::NotAZip)
}

/// Parse a complete central directory byte range into entries.
///
/// # Errors
///
/// Fails on truncated headers, ZIP64 placeholder fields, or a leading
/// non-directory signature.
pub fn parse_central_directory(cd: &[u8]) -> Result<Vec<CdEntry>, ZipError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < cd.len() {
        if cd.len() - pos < CENTRAL_HEADER_LEN {
            return Err(ZipError::Truncated {
                what: "central directory header",
            });
        }
        if cd[pos..pos + 4] != CENTRAL_SIG {
            return Err(ZipError::Corrupt {
                what: "central directory signature",
            });
        }

        let flags = le_u16(cd, pos + 8);
        let method = le_u16(cd, pos + 10);
        let crc32 = le_u32(cd, pos + 16);
        let compressed_size = le_u32(cd, pos + 20);
        let uncompressed_size = le_u32(cd, pos + 24);
        let name_len = le_u16(cd, pos + 28) as usize;
        let extra_len = le_u16(cd, pos + 30) as usize;
        let comment_len = le_u16(cd, pos + 32) as usize;
        let local_offset = le_u32(cd, pos + 42);

        if compressed_size == ZIP64_U32
            || uncompressed_size == ZIP64_U32
            || local_offset == ZIP64_U32
        {
            return Err(ZipError::Unsupported { feature: "ZIP64" });
        }

        let total = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        if cd.len() - pos < total {
            return Err(ZipError::Truncated {
                what: "central directory entry",
            });
        }

        let name_bytes = &cd[pos + CENTRAL_HEADER_LEN..pos + CENTRAL_HEADER_LEN + name_len];
        // Bit 11 marks UTF-8 names; legacy names keep their single-byte
        // code points so offsets stay faithful.
        let name = if flags & (1 << 11) != 0 {
            String::from_utf8_lossy(name_bytes).into_owned()
        } else {
            name_bytes.iter().map(|&b| char::from(b)).collect()
        };

        entries.push(CdEntry {
            name,
            method,
            crc32,
            compressed_size: u64::from(compressed_size),
            uncompressed_size: u64::from(uncompressed_size),
            local_offset: u64::from(local_offset),
            raw: cd[pos..pos + total].to_vec(),
        });
        pos += total;
    }

    Ok(entries)
}

/// Compute where an entry's payload starts, given the 30-byte local header
/// read at [`CdEntry::local_offset`].
///
/// # Errors
///
/// Fails when the header is truncated or does not carry the local
/// signature.
pub fn local_data_start(entry: &CdEntry, local_header: &[u8]) -> Result<u64, ZipError> {
    if local_header.len() < LOCAL_HEADER_LEN {
        return Err(ZipError::Truncated {
            what: "local file header",
        });
    }
    if local_header[0..4] != LOCAL_SIG {
        return Err(ZipError::Corrupt {
            what: "local file header signature",
        });
    }
    let name_len = le_u16(local_header, 26);
    let extra_len = le_u16(local_header, 28);
    Ok(entry.local_offset + LOCAL_HEADER_LEN as u64 + u64::from(name_len) + u64::from(extra_len))
}

/// Decode an entry's raw payload bytes into its uncompressed form,
/// inflating method-8 data and verifying size and CRC.
///
/// # Errors
///
/// Fails for unknown methods, size mismatches, inflate errors, or CRC
/// mismatches.
pub fn decompress_entry(entry: &CdEntry, payload: &[u8]) -> Result<Vec<u8>, ZipError> {
    if payload.len() as u64 != entry.compressed_size {
        return Err(ZipError::DataMismatch {
            what: "compressed size",
        });
    }

    let data = match entry.method {
        0 => {
            if entry.compressed_size != entry.uncompressed_size {
                return Err(ZipError::DataMismatch {
                    what: "stored entry sizes",
                });
            }
            payload.to_vec()
        }
        8 => {
            let mut decoder = DeflateDecoder::new(payload);
            let mut out = Vec::with_capacity(usize::try_from(entry.uncompressed_size).unwrap_or(0));
            decoder
                .read_to_end(&mut out)
                .map_err(|_| ZipError::DataMismatch {
                    what: "deflate stream",
                })?;
            if out.len() as u64 != entry.uncompressed_size {
                return Err(ZipError::DataMismatch {
                    what: "uncompressed size",
                });
            }
            out
        }
        method => return Err(ZipError::UnsupportedCompression { method }),
    };

    let mut crc = Crc::new();
    crc.update(&data);
    if crc.sum() != entry.crc32 {
        return Err(ZipError::DataMismatch { what: "CRC-32" });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pomar_test_support::{build_archive, build_stored_archive, deflated, stored};

    fn tail_of(archive: &[u8]) -> &[u8] {
        let take = archive.len().min(usize::try_from(MAX_TAIL_LEN).unwrap());
        &archive[archive.len() - take..]
    }

    #[test]
    fn find_eocd_reads_fixture_archives() {
        let archive = build_stored_archive(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
        let eocd = find_eocd(tail_of(&archive), archive.len() as u64).unwrap();
        assert_eq!(eocd.entry_count, 2);
        assert_eq!(
            eocd.offset,
            archive.len() as u64 - EOCD_LEN as u64,
            "comment-free archive ends with the EOCD"
        );
        assert_eq!(eocd.cd_offset + eocd.cd_size, eocd.offset);
    }

    #[test]
    fn find_eocd_rejects_garbage() {
        let err = find_eocd(&[0u8; 256], 256).unwrap_err();
        assert!(matches!(err, ZipError::NotAZip));
    }

    #[test]
    fn find_eocd_rejects_multi_disk() {
        let mut record = vec![0u8; EOCD_LEN];
        record[0..4].copy_from_slice(&EOCD_SIG);
        record[4..6].copy_from_slice(&1u16.to_le_bytes());
        let err = find_eocd(&record, EOCD_LEN as u64).unwrap_err();
        assert!(matches!(err, ZipError::Unsupported { .. }));
    }

    #[test]
    fn find_eocd_rejects_zip64_sentinels() {
        let mut record = vec![0u8; EOCD_LEN];
        record[0..4].copy_from_slice(&EOCD_SIG);
        record[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = find_eocd(&record, EOCD_LEN as u64).unwrap_err();
        assert!(matches!(err, ZipError::Unsupported { feature: "ZIP64" }));
    }

    #[test]
    fn find_eocd_mismatched_disk_entry_counts() {
        let mut record = vec![0u8; EOCD_LEN];
        record[0..4].copy_from_slice(&EOCD_SIG);
        record[8..10].copy_from_slice(&1u16.to_le_bytes());
        record[10..12].copy_from_slice(&2u16.to_le_bytes());
        let err = find_eocd(&record, EOCD_LEN as u64).unwrap_err();
        assert!(matches!(err, ZipError::Unsupported { .. }));
    }

    #[test]
    fn central_directory_entries_carry_raw_bytes() {
        let archive = build_stored_archive(&[("Payload/App.app/Info.plist", b"plist")]);
        let eocd = find_eocd(tail_of(&archive), archive.len() as u64).unwrap();
        let cd_start = usize::try_from(eocd.cd_offset).unwrap();
        let cd = &archive[cd_start..cd_start + usize::try_from(eocd.cd_size).unwrap()];

        let entries = parse_central_directory(cd).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Payload/App.app/Info.plist");
        assert_eq!(entries[0].method, 0);
        assert_eq!(entries[0].uncompressed_size, 5);
        let raw: Vec<u8> = entries.iter().flat_map(|e| e.raw.clone()).collect();
        assert_eq!(raw, cd, "raw headers reassemble the directory verbatim");
    }

    #[test]
    fn central_directory_rejects_truncation() {
        let archive = build_stored_archive(&[("a", b"1")]);
        let eocd = find_eocd(tail_of(&archive), archive.len() as u64).unwrap();
        let cd_start = usize::try_from(eocd.cd_offset).unwrap();
        let cd = &archive[cd_start..cd_start + usize::try_from(eocd.cd_size).unwrap() - 1];
        assert!(matches!(
            parse_central_directory(cd).unwrap_err(),
            ZipError::Truncated { .. }
        ));
    }

    #[test]
    fn ranged_entry_read_round_trips_stored_and_deflated() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let archive = build_archive(&[
            stored("stored.bin", &payload),
            deflated("deflated.bin", &payload),
        ]);
        let eocd = find_eocd(tail_of(&archive), archive.len() as u64).unwrap();
        let cd_start = usize::try_from(eocd.cd_offset).unwrap();
        let entries = parse_central_directory(
            &archive[cd_start..cd_start + usize::try_from(eocd.cd_size).unwrap()],
        )
        .unwrap();

        for entry in &entries {
            let header_at = usize::try_from(entry.local_offset).unwrap();
            let data_start =
                local_data_start(entry, &archive[header_at..header_at + LOCAL_HEADER_LEN]).unwrap();
            let start = usize::try_from(data_start).unwrap();
            let end = start + usize::try_from(entry.compressed_size).unwrap();
            let data = decompress_entry(entry, &archive[start..end]).unwrap();
            assert_eq!(data, payload, "entry {}", entry.name);
        }
    }

    #[test]
    fn decompress_rejects_unknown_method() {
        let archive = build_stored_archive(&[("a", b"1")]);
        let eocd = find_eocd(tail_of(&archive), archive.len() as u64).unwrap();
        let cd_start = usize::try_from(eocd.cd_offset).unwrap();
        let mut entries = parse_central_directory(
            &archive[cd_start..cd_start + usize::try_from(eocd.cd_size).unwrap()],
        )
        .unwrap();
        entries[0].method = 12;
        let err = decompress_entry(&entries[0], b"1").unwrap_err();
        assert!(matches!(
            err,
            ZipError::UnsupportedCompression { method: 12 }
        ));
    }

    #[test]
    fn decompress_rejects_corrupted_payload() {
        let archive = build_stored_archive(&[("a", b"abc")]);
        let eocd = find_eocd(tail_of(&archive), archive.len() as u64).unwrap();
        let cd_start = usize::try_from(eocd.cd_offset).unwrap();
        let entries = parse_central_directory(
            &archive[cd_start..cd_start + usize::try_from(eocd.cd_size).unwrap()],
        )
        .unwrap();
        let err = decompress_entry(&entries[0], b"xyz").unwrap_err();
        assert!(matches!(err, ZipError::DataMismatch { what: "CRC-32" }));
    }
}
