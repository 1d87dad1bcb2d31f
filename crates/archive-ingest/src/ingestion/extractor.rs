//! Safe extraction of archive entries into a scoped temporary area

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Per-archive extraction directory, removed on release or drop
#[derive(Debug)]
pub struct ExtractionArea {
    dir: TempDir,
}

impl ExtractionArea {
    /// Create a fresh, uniquely named area under `root`
    pub fn create(root: &Path, archive_name: &str) -> Result<Self> {
        let stem = Path::new(archive_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string());

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}_", stem))
            .tempdir_in(root)
            .map_err(|e| Error::ExtractionRoot {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;

        tracing::debug!(area = %dir.path().display(), "created extraction area");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the area and everything in it
    pub fn release(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(area = %path.display(), "released extraction area");
        Ok(())
    }
}

/// A regular file written into the extraction area
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path inside the archive, `/`-separated
    pub relative_path: String,
    pub size_bytes: u64,
    /// Lower-case extension with leading dot, empty when absent
    pub extension: String,
}

/// Entry that could not be extracted
#[derive(Debug)]
pub struct EntryFailure {
    pub entry: String,
    pub error: Error,
}

/// Entry larger than the per-file maximum; never written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedEntry {
    pub entry: String,
    pub size_bytes: u64,
}

/// Outcome of extracting one archive
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub files: Vec<ExtractedFile>,
    pub failed: Vec<EntryFailure>,
    pub oversized: Vec<OversizedEntry>,
    pub archive_size_bytes: u64,
    pub entry_count: usize,
}

/// Writes archive entries to disk, refusing anything that would land
/// outside the extraction area
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    max_file_size_bytes: u64,
}

impl ArchiveExtractor {
    pub fn new(max_file_size_bytes: u64) -> Self {
        Self {
            max_file_size_bytes,
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    /// Extract every regular file entry of `archive_path` into `area`
    ///
    /// Entry-level problems are collected in the report; only failure to
    /// open the container itself is returned as an error.
    pub fn extract(&self, archive_path: &Path, area: &ExtractionArea) -> Result<ExtractionReport> {
        let file = File::open(archive_path)?;
        let archive_size_bytes = file.metadata()?.len();
        let mut archive = zip::ZipArchive::new(file)?;

        let root = area.path().canonicalize()?;
        let mut report = ExtractionReport {
            archive_size_bytes,
            entry_count: archive.len(),
            ..Default::default()
        };

        for i in 0..archive.len() {
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    report.failed.push(EntryFailure {
                        entry: format!("#{}", i),
                        error: Error::extraction(format!("#{}", i), e.to_string()),
                    });
                    continue;
                }
            };

            let name = entry.name().to_string();
            if entry.is_dir() {
                continue;
            }

            if entry
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
            {
                tracing::warn!(entry = %name, "skipping symbolic link entry");
                report.failed.push(EntryFailure {
                    error: Error::extraction(&name, "symbolic links are not extracted"),
                    entry: name,
                });
                continue;
            }

            let relative = match safe_relative_path(&name) {
                Ok(relative) => relative,
                Err(error) => {
                    tracing::warn!(entry = %name, "rejected entry outside extraction area");
                    report.failed.push(EntryFailure { entry: name, error });
                    continue;
                }
            };

            let declared = entry.size();
            if declared > self.max_file_size_bytes {
                tracing::info!(entry = %name, size = declared, "skipping oversized entry");
                report.oversized.push(OversizedEntry {
                    entry: name,
                    size_bytes: declared,
                });
                continue;
            }

            match self.write_entry(&mut entry, &root, &relative, &name) {
                Ok(EntryWrite::Written(file)) => report.files.push(file),
                Ok(EntryWrite::Oversized(size_bytes)) => {
                    tracing::info!(entry = %name, size = size_bytes, "entry exceeded its declared size");
                    report.oversized.push(OversizedEntry {
                        entry: name,
                        size_bytes,
                    });
                }
                Err(error) => {
                    tracing::warn!(entry = %name, error = %error, "failed to extract entry");
                    report.failed.push(EntryFailure { entry: name, error });
                }
            }
        }

        tracing::debug!(
            archive = %archive_path.display(),
            entries = report.entry_count,
            extracted = report.files.len(),
            failed = report.failed.len(),
            oversized = report.oversized.len(),
            "extraction finished"
        );

        Ok(report)
    }

    fn write_entry(
        &self,
        entry: &mut impl Read,
        root: &Path,
        relative: &Path,
        name: &str,
    ) -> Result<EntryWrite> {
        let target = root.join(relative);
        let parent = target
            .parent()
            .ok_or_else(|| Error::PathTraversal {
                entry: name.to_string(),
            })?;

        fs::create_dir_all(parent).map_err(|e| Error::extraction(name, e.to_string()))?;
        let parent = parent
            .canonicalize()
            .map_err(|e| Error::extraction(name, e.to_string()))?;
        if !parent.starts_with(root) {
            return Err(Error::PathTraversal {
                entry: name.to_string(),
            });
        }

        let target = parent.join(target.file_name().unwrap_or_default());
        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| Error::extraction(name, e.to_string()))?;

        let limit = self.max_file_size_bytes;
        let copied = io::copy(&mut entry.take(limit.saturating_add(1)), &mut out)
            .and_then(|n| out.flush().map(|_| n));

        let written = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(out);
                let _ = fs::remove_file(&target);
                return Err(Error::extraction(name, e.to_string()));
            }
        };

        if written > limit {
            drop(out);
            let _ = fs::remove_file(&target);
            return Ok(EntryWrite::Oversized(written));
        }

        Ok(EntryWrite::Written(ExtractedFile {
            path: target,
            relative_path: relative_to_slash(relative),
            size_bytes: written,
            extension: extension_of(relative),
        }))
    }
}

enum EntryWrite {
    Written(ExtractedFile),
    Oversized(u64),
}

/// Turn an archive entry name into a relative path that cannot escape
/// the directory it is joined onto
pub fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let traversal = || Error::PathTraversal {
        entry: name.to_string(),
    };

    if name.contains('\0') {
        return Err(traversal());
    }

    let normalized = name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(traversal());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    // Windows drive letters survive as a normal component on unix
    if normalized.len() >= 2 && normalized.as_bytes()[1] == b':' {
        return Err(traversal());
    }

    if relative.as_os_str().is_empty() {
        return Err(Error::extraction(name, "empty entry name"));
    }
    Ok(relative)
}

fn relative_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lower-case extension with a leading dot, or empty
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_zip;

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(safe_relative_path("a/b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(safe_relative_path("./a/./b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(safe_relative_path("a\\b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(safe_relative_path("a/../b.txt").unwrap(), PathBuf::from("b.txt"));
        assert_eq!(safe_relative_path("a/b/../../c/d.txt").unwrap(), PathBuf::from("c/d.txt"));

        for bad in ["../evil.txt", "a/../../evil", "a/b/../../../evil", "/etc/passwd", "..\\evil", "C:/win.ini"] {
            assert!(
                matches!(safe_relative_path(bad), Err(Error::PathTraversal { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_extracts_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("docs.zip");
        write_zip(&zip, &[("readme.TXT", b"hello"), ("nested/data.bin", &[1, 2, 3])]);

        let area = ExtractionArea::create(dir.path(), "docs.zip").unwrap();
        let report = ArchiveExtractor::new(1024).extract(&zip, &area).unwrap();

        assert_eq!(report.files.len(), 2);
        assert!(report.failed.is_empty());
        let readme = report
            .files
            .iter()
            .find(|f| f.relative_path == "readme.TXT")
            .unwrap();
        assert_eq!(readme.extension, ".txt");
        assert_eq!(readme.size_bytes, 5);
        assert_eq!(fs::read(&readme.path).unwrap(), b"hello");
        assert!(report
            .files
            .iter()
            .any(|f| f.relative_path == "nested/data.bin"));
    }

    #[test]
    fn test_traversal_entry_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let zip = dir.path().join("evil.zip");
        write_zip(
            &zip,
            &[("../escaped.txt", b"x"), ("ok.txt", b"fine"), ("sub/../kept.txt", b"inside")],
        );

        let area = ExtractionArea::create(&root, "evil.zip").unwrap();
        let report = ArchiveExtractor::new(1024).extract(&zip, &area).unwrap();

        assert_eq!(report.files.len(), 2);
        assert!(report.files.iter().any(|f| f.relative_path == "kept.txt"));
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].error, Error::PathTraversal { .. }));
        assert!(!root.join("escaped.txt").exists());
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_oversized_entry_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("big.zip");
        write_zip(&zip, &[("big.bin", &[7u8; 2048]), ("small.txt", b"ok")]);

        let area = ExtractionArea::create(dir.path(), "big.zip").unwrap();
        let report = ArchiveExtractor::new(1024).extract(&zip, &area).unwrap();

        assert_eq!(report.files.len(), 1);
        assert_eq!(
            report.oversized,
            vec![OversizedEntry {
                entry: "big.bin".into(),
                size_bytes: 2048
            }]
        );
        assert!(!area.path().join("big.bin").exists());
    }

    #[test]
    fn test_reextract_into_fresh_area_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("again.zip");
        write_zip(&zip, &[("a.txt", b"one"), ("b/c.txt", b"two")]);
        let extractor = ArchiveExtractor::new(1024);

        let first = ExtractionArea::create(dir.path(), "again.zip").unwrap();
        let second = ExtractionArea::create(dir.path(), "again.zip").unwrap();
        assert_ne!(first.path(), second.path());

        let a = extractor.extract(&zip, &first).unwrap();
        let b = extractor.extract(&zip, &second).unwrap();
        let names = |r: &ExtractionReport| {
            let mut v: Vec<_> = r
                .files
                .iter()
                .map(|f| (f.relative_path.clone(), f.size_bytes))
                .collect();
            v.sort();
            v
        };
        assert_eq!(names(&a), names(&b));
    }

    #[test]
    fn test_release_removes_area() {
        let dir = tempfile::tempdir().unwrap();
        let area = ExtractionArea::create(dir.path(), "x.zip").unwrap();
        let path = area.path().to_path_buf();
        fs::write(path.join("f.txt"), b"data").unwrap();

        area.release().unwrap();
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
