//! Per-file metadata: content hash, MIME type, text detection, timestamps

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::extractor::{extension_of, ExtractedFile};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::types::FileInspection;

const READ_BUFFER: usize = 64 * 1024;

/// Leading bytes of common binary formats
const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
];

/// Non-`text/*` types that are still text
const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-javascript",
    "application/x-sh",
    "application/x-yaml",
    "application/toml",
    "application/sql",
    "image/svg+xml",
];

/// Computes a [`FileInspection`] for extracted files
#[derive(Debug, Clone)]
pub struct FileInspector {
    inline_text_max_bytes: u64,
    text_probe_bytes: usize,
}

impl FileInspector {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            inline_text_max_bytes: config.inline_text_max_bytes,
            text_probe_bytes: config.text_probe_bytes.max(1),
        }
    }

    pub fn inspect(&self, file: &ExtractedFile) -> Result<FileInspection> {
        self.inspect_path(&file.path, &file.relative_path)
    }

    /// Inspect the file at `path`, recorded under `relative_path`
    ///
    /// The content is streamed once: hashed in full, and buffered only when
    /// small enough to be attached inline.
    pub fn inspect_path(&self, path: &Path, relative_path: &str) -> Result<FileInspection> {
        let fail = |e: io::Error| Error::inspection(path, e.to_string());

        let metadata = std::fs::metadata(path).map_err(fail)?;
        let size_bytes = metadata.len();
        let keep_content = size_bytes <= self.inline_text_max_bytes;

        let file = File::open(path).map_err(fail)?;
        let StreamDigest { content_hash, probe, content } =
            digest_stream(file, self.text_probe_bytes, keep_content).map_err(fail)?;

        let mime_type = detect_mime(path, &probe);
        let is_text = is_text(mime_type.as_deref(), &probe);

        let content = content
            .filter(|_| is_text)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        let created = metadata.created().ok().map(DateTime::<Utc>::from);
        let modified = metadata.modified().map(DateTime::<Utc>::from).map_err(fail)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        tracing::trace!(file = %relative_path, hash = %content_hash, is_text, "inspected file");

        Ok(FileInspection {
            file_name,
            relative_path: relative_path.to_string(),
            size_bytes,
            extension: extension_of(path),
            mime_type,
            content_hash,
            created,
            modified,
            is_text,
            content,
        })
    }
}

/// Everything a single read pass over a file produces
struct StreamDigest {
    /// SHA-256 of the full content, lower-case hex
    content_hash: String,
    /// Leading bytes used for type detection
    probe: Vec<u8>,
    content: Option<Vec<u8>>,
}

fn digest_stream(mut reader: impl Read, probe_len: usize, keep_content: bool) -> io::Result<StreamDigest> {
    let mut hasher = Sha256::new();
    let mut probe = Vec::with_capacity(probe_len.min(READ_BUFFER));
    let mut content = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let chunk = &buf[..n];
        hasher.update(chunk);
        if probe.len() < probe_len {
            let take = (probe_len - probe.len()).min(n);
            probe.extend_from_slice(&chunk[..take]);
        }
        if keep_content {
            content.extend_from_slice(chunk);
        }
    }

    Ok(StreamDigest {
        content_hash: hex::encode(hasher.finalize()),
        probe,
        content: keep_content.then_some(content),
    })
}

/// Magic bytes first, then the extension, then a text/binary fallback
fn detect_mime(path: &Path, probe: &[u8]) -> Option<String> {
    if let Some((_, mime)) = MAGIC.iter().find(|(magic, _)| probe.starts_with(magic)) {
        return Some((*mime).to_string());
    }
    if let Some(mime) = mime_guess::from_path(path).first_raw() {
        return Some(mime.to_string());
    }
    if probe.is_empty() {
        None
    } else if looks_like_text(probe) {
        Some("text/plain".to_string())
    } else {
        Some("application/octet-stream".to_string())
    }
}

fn is_text(mime: Option<&str>, probe: &[u8]) -> bool {
    match mime {
        Some(m) if MAGIC.iter().any(|(_, magic)| *magic == m) => false,
        Some(m) if m.starts_with("text/") || TEXT_MIME_TYPES.contains(&m) => !probe.contains(&0),
        _ => !probe.is_empty() && looks_like_text(probe),
    }
}

/// No NUL bytes and valid UTF-8, allowing a code point cut at the probe end
fn looks_like_text(probe: &[u8]) -> bool {
    if probe.contains(&0) {
        return false;
    }
    match std::str::from_utf8(probe) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}
