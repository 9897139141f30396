//! Suffix builder: append stored entries to an archive by rewriting only
//! the bytes from the central directory onward.

use flate2::Crc;

use crate::error::ZipError;
use crate::tail::{CENTRAL_SIG, CdEntry, EOCD_SIG, Eocd, LOCAL_SIG, MAX_TAIL_LEN, find_eocd,
    parse_central_directory};

/// A file to add to the archive. Appended entries are always stored
/// (method 0).
#[derive(Debug, Clone)]
pub struct NewFile {
    /// Entry name, slash-separated.
    pub name: String,
    /// Uncompressed payload.
    pub data: Vec<u8>,
}

/// Result of [`append_suffix`]: the rewritten archive is
/// `original[0..split_offset] ++ tail`.
#[derive(Debug, Clone)]
pub struct TailRewrite {
    /// Absolute offset where the original bytes stop being reused.
    pub split_offset: u64,
    /// Replacement bytes: new local entries, the old central directory
    /// verbatim, new central entries, and a fresh EOCD.
    pub tail: Vec<u8>,
}

fn file_crc(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

// Offsets past 4 GiB would need ZIP64 structures we refuse to emit.
fn fits_u32(value: u64) -> Result<u32, ZipError> {
    u32::try_from(value).map_err(|_| ZipError::Unsupported { feature: "ZIP64" })
}

/// Build the replacement tail that appends `files` after the existing
/// entries.
///
/// Existing central-directory bytes are reused verbatim; new entries are
/// stored uncompressed with CRC-32 computed here. `split_offset` equals the
/// old central directory offset.
///
/// # Errors
///
/// Fails with [`ZipError::Unsupported`] when any rewritten offset, size, or
/// count would overflow the classic format's 32/16-bit fields.
pub fn append_suffix(
    eocd: &Eocd,
    entries: &[CdEntry],
    files: &[NewFile],
) -> Result<TailRewrite, ZipError> {
    let entry_count = u64::from(eocd.entry_count) + files.len() as u64;
    let entry_count = u16::try_from(entry_count).map_err(|_| ZipError::Unsupported {
        feature: "more than 65535 entries",
    })?;

    let mut locals: Vec<u8> = Vec::new();
    let mut central: Vec<u8> = Vec::new();

    for file in files {
        let name = file.name.as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| ZipError::Unsupported {
            feature: "entry name longer than 65535 bytes",
        })?;
        let size = fits_u32(file.data.len() as u64)?;
        let crc = file_crc(&file.data);
        let local_offset = fits_u32(eocd.cd_offset + locals.len() as u64)?;

        locals.extend_from_slice(&LOCAL_SIG);
        locals.extend_from_slice(&20u16.to_le_bytes()); // version needed
        locals.extend_from_slice(&0u16.to_le_bytes()); // flags
        locals.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        locals.extend_from_slice(&0u16.to_le_bytes()); // mod time
        locals.extend_from_slice(&0u16.to_le_bytes()); // mod date
        locals.extend_from_slice(&crc.to_le_bytes());
        locals.extend_from_slice(&size.to_le_bytes());
        locals.extend_from_slice(&size.to_le_bytes());
        locals.extend_from_slice(&name_len.to_le_bytes());
        locals.extend_from_slice(&0u16.to_le_bytes()); // extra len
        locals.extend_from_slice(name);
        locals.extend_from_slice(&file.data);

        central.extend_from_slice(&CENTRAL_SIG);
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        central.extend_from_slice(&0u16.to_le_bytes()); // mod time
        central.extend_from_slice(&0u16.to_le_bytes()); // mod date
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&name_len.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra len
        central.extend_from_slice(&0u16.to_le_bytes()); // comment len
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let new_cd_offset = fits_u32(eocd.cd_offset + locals.len() as u64)?;
    let new_cd_size = fits_u32(eocd.cd_size + central.len() as u64)?;

    let mut tail = locals;
    for entry in entries {
        tail.extend_from_slice(&entry.raw);
    }
    tail.extend_from_slice(&central);

    tail.extend_from_slice(&EOCD_SIG);
    tail.extend_from_slice(&0u16.to_le_bytes()); // disk number
    tail.extend_from_slice(&0u16.to_le_bytes()); // disk with CD
    tail.extend_from_slice(&entry_count.to_le_bytes());
    tail.extend_from_slice(&entry_count.to_le_bytes());
    tail.extend_from_slice(&new_cd_size.to_le_bytes());
    tail.extend_from_slice(&new_cd_offset.to_le_bytes());
    tail.extend_from_slice(&0u16.to_le_bytes()); // comment len

    Ok(TailRewrite {
        split_offset: eocd.cd_offset,
        tail,
    })
}

/// Full-rewrite convenience: append `files` to an in-memory archive.
///
/// # Errors
///
/// Propagates tail parsing failures and [`append_suffix`] overflow errors.
pub fn append_files(archive: &[u8], files: &[NewFile]) -> Result<Vec<u8>, ZipError> {
    let take = archive
        .len()
        .min(usize::try_from(MAX_TAIL_LEN).unwrap_or(archive.len()));
    let eocd = find_eocd(&archive[archive.len() - take..], archive.len() as u64)?;

    let cd_start = usize::try_from(eocd.cd_offset).map_err(|_| ZipError::Corrupt {
        what: "central directory offset",
    })?;
    let cd_len = usize::try_from(eocd.cd_size).map_err(|_| ZipError::Corrupt {
        what: "central directory size",
    })?;
    let cd = archive
        .get(cd_start..cd_start + cd_len)
        .ok_or(ZipError::Truncated {
            what: "central directory",
        })?;
    let entries = parse_central_directory(cd)?;

    let rewrite = append_suffix(&eocd, &entries, files)?;
    let split = usize::try_from(rewrite.split_offset).map_err(|_| ZipError::Corrupt {
        what: "split offset",
    })?;

    let mut out = Vec::with_capacity(split + rewrite.tail.len());
    out.extend_from_slice(&archive[..split]);
    out.extend_from_slice(&rewrite.tail);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::{LOCAL_HEADER_LEN, decompress_entry, local_data_start};
    use pomar_test_support::build_stored_archive;

    fn parse(archive: &[u8]) -> (Eocd, Vec<CdEntry>) {
        let take = archive
            .len()
            .min(usize::try_from(MAX_TAIL_LEN).unwrap());
        let eocd = find_eocd(&archive[archive.len() - take..], archive.len() as u64).unwrap();
        let cd_start = usize::try_from(eocd.cd_offset).unwrap();
        let entries = parse_central_directory(
            &archive[cd_start..cd_start + usize::try_from(eocd.cd_size).unwrap()],
        )
        .unwrap();
        (eocd, entries)
    }

    fn extract(archive: &[u8], entry: &CdEntry) -> Vec<u8> {
        let header_at = usize::try_from(entry.local_offset).unwrap();
        let data_start =
            local_data_start(entry, &archive[header_at..header_at + LOCAL_HEADER_LEN]).unwrap();
        let start = usize::try_from(data_start).unwrap();
        let end = start + usize::try_from(entry.compressed_size).unwrap();
        decompress_entry(entry, &archive[start..end]).unwrap()
    }

    #[test]
    fn split_offset_is_old_directory_offset() {
        let archive = build_stored_archive(&[("a", b"1"), ("b", b"2")]);
        let (eocd, entries) = parse(&archive);
        let rewrite = append_suffix(
            &eocd,
            &entries,
            &[NewFile {
                name: "c".into(),
                data: b"3".to_vec(),
            }],
        )
        .unwrap();
        assert_eq!(rewrite.split_offset, eocd.cd_offset);
    }

    #[test]
    fn appended_archive_extends_entry_count_and_keeps_old_headers() {
        let archive = build_stored_archive(&[("Payload/App.app/Info.plist", b"plist")]);
        let (_, original_entries) = parse(&archive);

        let appended = append_files(
            &archive,
            &[
                NewFile {
                    name: "Payload/App.app/SC_Info/App.sinf".into(),
                    data: b"SINF".to_vec(),
                },
                NewFile {
                    name: "iTunesMetadata.plist".into(),
                    data: b"bplist00".to_vec(),
                },
            ],
        )
        .unwrap();

        let (eocd, entries) = parse(&appended);
        assert_eq!(eocd.entry_count, 3);
        // Original headers survive byte-identically in the new directory.
        assert_eq!(entries[0].raw, original_entries[0].raw);

        assert_eq!(extract(&appended, &entries[0]), b"plist");
        assert_eq!(extract(&appended, &entries[1]), b"SINF");
        assert_eq!(extract(&appended, &entries[2]), b"bplist00");
    }

    #[test]
    fn appending_nothing_reproduces_a_valid_archive() {
        let archive = build_stored_archive(&[("a", b"1")]);
        let appended = append_files(&archive, &[]).unwrap();
        let (eocd, entries) = parse(&appended);
        assert_eq!(eocd.entry_count, 1);
        assert_eq!(extract(&appended, &entries[0]), b"1");
    }

    #[test]
    fn repeated_appends_accumulate() {
        let mut archive = build_stored_archive(&[("base", b"0")]);
        for i in 0..3 {
            archive = append_files(
                &archive,
                &[NewFile {
                    name: format!("extra-{i}"),
                    data: vec![i],
                }],
            )
            .unwrap();
        }
        let (eocd, entries) = parse(&archive);
        assert_eq!(eocd.entry_count, 4);
        for (i, entry) in entries.iter().skip(1).enumerate() {
            let i = u8::try_from(i).unwrap();
            assert_eq!(extract(&archive, entry), vec![i]);
        }
    }

    #[test]
    fn new_entries_are_stored_with_correct_crc() {
        let archive = build_stored_archive(&[("a", b"1")]);
        let appended = append_files(
            &archive,
            &[NewFile {
                name: "crc-check".into(),
                data: b"123456789".to_vec(),
            }],
        )
        .unwrap();
        let (_, entries) = parse(&appended);
        assert_eq!(entries[1].method, 0);
        assert_eq!(entries[1].crc32, 0xCBF4_3926);
    }
}
