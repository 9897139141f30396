//! Archive injection step.
//!
//! Runs after the artifact is published by the download engine, when the
//! task carries SINF blobs or an iTunesMetadata plist. The archive is never
//! read front to back: the tail is parsed from ranged reads, the rewritten
//! suffix is computed in memory, and the result is staged under a sibling
//! `<key>.new` temp key before being swapped into place.

use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use plist::Value;
use pomar_blob::{BlobError, BlobStore};
use pomar_core::Sinf;
use pomar_zip::{
    CdEntry, LOCAL_HEADER_LEN, MAX_TAIL_LEN, NewFile, TailRewrite, append_suffix,
    decompress_entry, find_eocd, local_data_start, parse_central_directory,
};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

/// Chunk size for prefix copies and the final swap.
const COPY_CHUNK: u64 = 50 * 1024 * 1024;

static BUNDLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Payload/([^/]+)\.app/").expect("bundle pattern is valid"));

/// Rewrites published artifacts to carry SINF and metadata entries.
pub struct Injector {
    blob: Arc<dyn BlobStore>,
    copy_chunk: u64,
}

impl Injector {
    /// Create an injector with the production 50 MiB copy chunk.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self::with_copy_chunk(blob, COPY_CHUNK)
    }

    /// Create an injector with an explicit copy chunk; tests shrink it.
    #[must_use]
    pub const fn with_copy_chunk(blob: Arc<dyn BlobStore>, copy_chunk: u64) -> Self {
        Self { blob, copy_chunk }
    }

    /// Inject `sinfs` and optional base64 XML metadata into the artifact at
    /// `key`.
    ///
    /// # Errors
    ///
    /// Archive shape problems surface as [`PipelineError::Format`] or
    /// [`PipelineError::Archive`]; a failed metadata conversion is
    /// recovered by injecting the raw XML instead.
    pub async fn run(
        &self,
        key: &str,
        sinfs: &[Sinf],
        itunes_metadata: Option<&str>,
    ) -> Result<(), PipelineError> {
        let meta = self.blob.head(key).await?.ok_or_else(|| {
            PipelineError::Blob {
                source: BlobError::NotFound {
                    key: key.to_string(),
                },
            }
        })?;
        let size = meta.size;

        let tail_len = size.min(MAX_TAIL_LEN);
        let tail = self.blob.get_range(key, size - tail_len, tail_len).await?;
        let eocd = find_eocd(&tail, size)?;
        let cd = self.blob.get_range(key, eocd.cd_offset, eocd.cd_size).await?;
        let entries = parse_central_directory(&cd)?;

        let bundle = bundle_name(&entries).ok_or_else(|| PipelineError::Format {
            what: "no app bundle under Payload/".to_string(),
        })?;
        debug!(key, bundle, "resolved app bundle");

        let files = self
            .plan_files(key, &entries, &bundle, sinfs, itunes_metadata)
            .await?;
        if files.is_empty() {
            debug!(key, "nothing to inject");
            return Ok(());
        }

        let rewrite = append_suffix(&eocd, &entries, &files)?;
        let temp_key = format!("{key}.new");
        self.write_rewritten(key, &temp_key, &rewrite).await?;

        if let Err(err) = self.swap(key, &temp_key).await {
            // Leave cleanup of a half-swapped temp object to the janitor if
            // this delete fails as well.
            if let Err(cleanup) = self.blob.delete_many(&[temp_key.clone()]).await {
                warn!(key = %temp_key, error = %cleanup, "temp cleanup failed");
            }
            return Err(err);
        }
        info!(key, injected = files.len(), "archive rewritten");
        Ok(())
    }

    async fn read_entry(&self, key: &str, entry: &CdEntry) -> Result<Vec<u8>, PipelineError> {
        let header = self
            .blob
            .get_range(key, entry.local_offset, LOCAL_HEADER_LEN as u64)
            .await?;
        let data_start = local_data_start(entry, &header)?;
        let payload = self
            .blob
            .get_range(key, data_start, entry.compressed_size)
            .await?;
        Ok(decompress_entry(entry, &payload)?)
    }

    /// Decide which files to append, in archive order: SINFs first, then
    /// the metadata plist at the archive root.
    async fn plan_files(
        &self,
        key: &str,
        entries: &[CdEntry],
        bundle: &str,
        sinfs: &[Sinf],
        itunes_metadata: Option<&str>,
    ) -> Result<Vec<NewFile>, PipelineError> {
        let mut files = Vec::new();

        let sinf_paths = self.manifest_sinf_paths(key, entries, bundle).await?;
        match sinf_paths {
            Some(paths) => {
                for (path, sinf) in paths.iter().zip(sinfs.iter()) {
                    files.push(NewFile {
                        name: format!("Payload/{bundle}.app/{path}"),
                        data: decode_sinf(sinf)?,
                    });
                }
            }
            None if !sinfs.is_empty() => {
                let executable = self.bundle_executable(key, entries, bundle).await?;
                files.push(NewFile {
                    name: format!("Payload/{bundle}.app/SC_Info/{executable}.sinf"),
                    data: decode_sinf(&sinfs[0])?,
                });
            }
            None => {}
        }

        if let Some(b64) = itunes_metadata.filter(|m| !m.is_empty()) {
            let xml = STANDARD.decode(b64).map_err(|_| PipelineError::Format {
                what: "iTunesMetadata is not valid base64".to_string(),
            })?;
            let data = match xml_to_binary_plist(&xml) {
                Ok(binary) => binary,
                Err(err) => {
                    // Conversion failures are recoverable; ship the XML.
                    warn!(key, error = %err, "metadata conversion failed, keeping XML");
                    xml
                }
            };
            files.push(NewFile {
                name: "iTunesMetadata.plist".to_string(),
                data,
            });
        }

        Ok(files)
    }

    /// `SinfPaths` from the bundle's `SC_Info/Manifest.plist`, when both
    /// the file and the array exist.
    async fn manifest_sinf_paths(
        &self,
        key: &str,
        entries: &[CdEntry],
        bundle: &str,
    ) -> Result<Option<Vec<String>>, PipelineError> {
        let manifest_name = format!("Payload/{bundle}.app/SC_Info/Manifest.plist");
        let Some(entry) = entries.iter().find(|entry| entry.name == manifest_name) else {
            return Ok(None);
        };
        let data = self.read_entry(key, entry).await?;
        let Ok(value) = plist::from_bytes::<Value>(&data) else {
            warn!(key, "manifest plist unparsable, falling back to Info.plist");
            return Ok(None);
        };
        Ok(string_array(&value, "SinfPaths"))
    }

    async fn bundle_executable(
        &self,
        key: &str,
        entries: &[CdEntry],
        bundle: &str,
    ) -> Result<String, PipelineError> {
        let info_name = format!("Payload/{bundle}.app/Info.plist");
        let entry = entries
            .iter()
            .find(|entry| entry.name == info_name)
            .ok_or_else(|| PipelineError::Format {
                what: "Info.plist missing from app bundle".to_string(),
            })?;
        let data = self.read_entry(key, entry).await?;
        let value = plist::from_bytes::<Value>(&data).map_err(|_| PipelineError::Format {
            what: "Info.plist unparsable".to_string(),
        })?;
        string_value(&value, "CFBundleExecutable").ok_or_else(|| PipelineError::Format {
            what: "CFBundleExecutable missing from Info.plist".to_string(),
        })
    }

    /// Stage the rewritten archive under `temp_key`: the unchanged prefix
    /// is copied in fixed-size parts with the suffix folded into the final
    /// part, so every non-final part shares the same size.
    async fn write_rewritten(
        &self,
        key: &str,
        temp_key: &str,
        rewrite: &TailRewrite,
    ) -> Result<(), PipelineError> {
        let upload_id = self.blob.create_multipart(temp_key).await?;
        match self
            .upload_rewritten(key, temp_key, &upload_id, rewrite)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(abort_err) = self.blob.abort_multipart(temp_key, &upload_id).await {
                    warn!(key = %temp_key, error = %abort_err, "failed to abort rewrite upload");
                }
                Err(err)
            }
        }
    }

    async fn upload_rewritten(
        &self,
        key: &str,
        temp_key: &str,
        upload_id: &str,
        rewrite: &TailRewrite,
    ) -> Result<(), PipelineError> {
        let split = rewrite.split_offset;
        let mut parts: Vec<u32> = Vec::new();
        let mut part: u32 = 1;

        if split == 0 {
            self.blob
                .upload_part(temp_key, upload_id, part, rewrite.tail.clone().into())
                .await?;
            parts.push(part);
        } else {
            let last_boundary = ((split - 1) / self.copy_chunk) * self.copy_chunk;
            let mut offset = 0u64;
            while offset < last_boundary {
                let data = self.blob.get_range(key, offset, self.copy_chunk).await?;
                self.blob
                    .upload_part(temp_key, upload_id, part, data)
                    .await?;
                parts.push(part);
                part += 1;
                offset += self.copy_chunk;
            }
            let mut final_part = BytesMut::new();
            final_part.extend_from_slice(
                &self
                    .blob
                    .get_range(key, last_boundary, split - last_boundary)
                    .await?,
            );
            final_part.extend_from_slice(&rewrite.tail);
            self.blob
                .upload_part(temp_key, upload_id, part, final_part.freeze())
                .await?;
            parts.push(part);
        }

        self.blob
            .complete_multipart(temp_key, upload_id, &parts)
            .await?;
        Ok(())
    }

    /// Replace the object at `key` with the staged rewrite and delete the
    /// temp key. The key is not served until the task completes, so a
    /// plain read-back-and-put suffices; large objects stream through a
    /// multipart copy instead of materializing in memory.
    async fn swap(&self, key: &str, temp_key: &str) -> Result<(), PipelineError> {
        let meta = self
            .blob
            .head(temp_key)
            .await?
            .ok_or_else(|| PipelineError::Internal {
                what: "staged rewrite vanished before swap".to_string(),
            })?;

        if meta.size <= self.copy_chunk {
            let body = self.blob.get_range(temp_key, 0, meta.size).await?;
            self.blob.put(key, body).await?;
        } else {
            let upload_id = self.blob.create_multipart(key).await?;
            let mut parts: Vec<u32> = Vec::new();
            let mut part: u32 = 1;
            let mut offset = 0u64;
            let result: Result<(), PipelineError> = async {
                while offset < meta.size {
                    let len = self.copy_chunk.min(meta.size - offset);
                    let data = self.blob.get_range(temp_key, offset, len).await?;
                    self.blob.upload_part(key, &upload_id, part, data).await?;
                    parts.push(part);
                    part += 1;
                    offset += len;
                }
                self.blob.complete_multipart(key, &upload_id, &parts).await?;
                Ok(())
            }
            .await;
            if let Err(err) = result {
                if let Err(abort_err) = self.blob.abort_multipart(key, &upload_id).await {
                    warn!(key, error = %abort_err, "failed to abort swap upload");
                }
                return Err(err);
            }
        }

        self.blob.delete_many(&[temp_key.to_string()]).await?;
        Ok(())
    }
}

/// First `.app` bundle name under `Payload/`, skipping watch bundles.
fn bundle_name(entries: &[CdEntry]) -> Option<String> {
    entries
        .iter()
        .filter(|entry| !entry.name.contains("/Watch/"))
        .find_map(|entry| {
            BUNDLE_PATTERN
                .captures(&entry.name)
                .map(|captures| captures[1].to_string())
        })
}

fn decode_sinf(sinf: &Sinf) -> Result<Vec<u8>, PipelineError> {
    STANDARD
        .decode(&sinf.sinf)
        .map_err(|_| PipelineError::Format {
            what: format!("sinf {} is not valid base64", sinf.id),
        })
}

fn string_value(value: &Value, key: &str) -> Option<String> {
    value
        .as_dictionary()?
        .get(key)?
        .as_string()
        .map(String::from)
}

fn string_array(value: &Value, key: &str) -> Option<Vec<String>> {
    let array = value.as_dictionary()?.get(key)?.as_array()?;
    Some(
        array
            .iter()
            .filter_map(|item| item.as_string().map(String::from))
            .collect(),
    )
}

fn xml_to_binary_plist(xml: &[u8]) -> Result<Vec<u8>, plist::Error> {
    let value: Value = plist::from_bytes(xml)?;
    let mut out = Vec::new();
    plist::to_writer_binary(&mut out, &value)?;
    Ok(out)
}
