use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tar::{Archive, EntryType};
use tracing::debug;

use crate::verdict::{CheckKind, Denial, DenyReason};

/// Bounds applied to every archive before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Maximum number of entries (files and directories)
    pub max_entries: usize,
    /// Maximum sum of regular file sizes, in bytes
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_total_bytes: 256 * 1024 * 1024,
        }
    }
}

/// What a successful extraction wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    root: PathBuf,
    files: Vec<PathBuf>,
    total_bytes: u64,
}

impl ExtractReport {
    /// Returns the destination directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the written files, relative to [`root`](Self::root), in archive order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Returns the number of bytes written.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Planned {
    File,
    Dir,
    Skip,
}

#[derive(Debug)]
struct PlannedEntry {
    kind: Planned,
    rel: PathBuf,
}

/// Unpacks verified tar archives into one fixed directory.
///
/// Extraction is all-or-nothing. Every entry is validated first; then the
/// archive is unpacked into a staging directory next to the destination,
/// which is renamed into place only when every entry was written. Any entry
/// that is not a regular file or directory, or whose normalized path leaves
/// the destination, fails the whole archive with [`DenyReason::UnsafePath`].
///
/// Callers must verify the payload signature before calling
/// [`extract`](Self::extract); [`PolicyGuard::admit_archive`](crate::PolicyGuard::admit_archive)
/// does both in order.
#[derive(Debug, Clone)]
pub struct SafeExtractor {
    dest: PathBuf,
    limits: ExtractLimits,
}

impl SafeExtractor {
    /// Creates an extractor for `dest` with default limits.
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            limits: ExtractLimits::default(),
        }
    }

    /// Replaces the entry and size limits.
    pub fn with_limits(mut self, limits: ExtractLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the destination directory.
    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Returns the active limits.
    pub fn limits(&self) -> ExtractLimits {
        self.limits
    }

    /// Validates and unpacks `archive`.
    ///
    /// # Errors
    ///
    /// - [`DenyReason::UnsafePath`] for traversal, absolute paths, links or
    ///   special entries, and for a destination that already has content
    /// - [`DenyReason::MalformedInput`] for unreadable archives, limit excess,
    ///   and filesystem failures while staging
    ///
    /// On error nothing is left under the destination or its parent.
    pub fn extract(&self, archive: &[u8]) -> Result<ExtractReport, Denial> {
        ensure_vacant(&self.dest)?;
        let plan = self.plan(archive)?;

        let parent = match self.dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| staging_failed(&e))?;
        let staging = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(&parent)
            .map_err(|e| staging_failed(&e))?;

        let (files, total_bytes) = unpack(archive, &plan, staging.path())?;

        ensure_vacant(&self.dest)?;
        if self.dest.is_dir() {
            fs::remove_dir(&self.dest).map_err(|e| staging_failed(&e))?;
        }
        // TempDir's drop tolerates the path having moved
        fs::rename(staging.path(), &self.dest).map_err(|e| staging_failed(&e))?;

        debug!(
            dest = %self.dest.display(),
            files = files.len(),
            bytes = total_bytes,
            "archive extracted"
        );
        Ok(ExtractReport {
            root: self.dest.clone(),
            files,
            total_bytes,
        })
    }

    fn plan(&self, archive: &[u8]) -> Result<Vec<PlannedEntry>, Denial> {
        let mut reader = Archive::new(archive);
        let entries = reader.entries().map_err(|_| unreadable())?;

        let mut plan = Vec::new();
        let mut counted = 0_usize;
        let mut total = 0_u64;
        for entry in entries {
            let entry = entry.map_err(|_| unreadable())?;
            let kind = match entry.header().entry_type() {
                EntryType::Regular | EntryType::Continuous => Planned::File,
                EntryType::Directory => Planned::Dir,
                EntryType::XGlobalHeader => Planned::Skip,
                EntryType::Symlink | EntryType::Link => {
                    return Err(unsafe_path("archive contains a link entry"));
                }
                _ => return Err(unsafe_path("archive contains a special entry")),
            };
            if kind == Planned::Skip {
                plan.push(PlannedEntry {
                    kind,
                    rel: PathBuf::new(),
                });
                continue;
            }

            counted += 1;
            if counted > self.limits.max_entries {
                return Err(Denial::new(
                    DenyReason::MalformedInput,
                    format!("archive has more than {} entries", self.limits.max_entries),
                ));
            }

            let raw = entry.path().map_err(|_| unreadable())?;
            let rel = normalize_entry_path(&raw)
                .ok_or_else(|| unsafe_path("entry path escapes the extraction directory"))?;
            if rel.as_os_str().is_empty() && kind == Planned::File {
                return Err(unsafe_path("file entry has an empty path"));
            }

            if kind == Planned::File {
                total = total.saturating_add(entry.size());
                if total > self.limits.max_total_bytes {
                    return Err(Denial::new(
                        DenyReason::MalformedInput,
                        format!("archive expands past {} bytes", self.limits.max_total_bytes),
                    ));
                }
            }
            plan.push(PlannedEntry { kind, rel });
        }
        Ok(plan)
    }
}

fn unpack(
    archive: &[u8],
    plan: &[PlannedEntry],
    staging: &Path,
) -> Result<(Vec<PathBuf>, u64), Denial> {
    let mut reader = Archive::new(archive);
    let entries = reader.entries().map_err(|_| unreadable())?;

    let mut files = Vec::new();
    let mut total = 0_u64;
    for (entry, planned) in entries.zip(plan) {
        let mut entry = entry.map_err(|_| unreadable())?;
        let target = staging.join(&planned.rel);
        match planned.kind {
            Planned::Skip => {}
            Planned::Dir => fs::create_dir_all(&target).map_err(|e| staging_failed(&e))?,
            Planned::File => {
                if let Some(dir) = target.parent() {
                    fs::create_dir_all(dir).map_err(|e| staging_failed(&e))?;
                }
                let mut out = fs::File::create(&target).map_err(|e| staging_failed(&e))?;
                total += io::copy(&mut entry, &mut out).map_err(|e| staging_failed(&e))?;
                files.push(planned.rel.clone());
            }
        }
    }
    Ok((files, total))
}

/// Resolves `.` and `..` lexically, returning `None` if the path is absolute,
/// carries a drive prefix or backslash, or climbs above its root.
fn normalize_entry_path(raw: &Path) -> Option<PathBuf> {
    if raw.to_string_lossy().contains('\\') {
        return None;
    }
    let mut out = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => {
                if out.as_os_str().is_empty() && looks_like_drive(&part.to_string_lossy()) {
                    return None;
                }
                out.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn looks_like_drive(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn ensure_vacant(dest: &Path) -> Result<(), Denial> {
    match fs::read_dir(dest) {
        Ok(mut listing) => {
            if listing.next().is_some() {
                Err(unsafe_path("extraction directory is not empty"))
            } else {
                Ok(())
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(staging_failed(&e)),
    }
}

fn unsafe_path(detail: &str) -> Denial {
    Denial::new(DenyReason::UnsafePath, detail).from_check(CheckKind::Signature)
}

fn unreadable() -> Denial {
    Denial::new(DenyReason::MalformedInput, "archive is not a readable tar stream")
        .from_check(CheckKind::Signature)
}

fn staging_failed(err: &io::Error) -> Denial {
    Denial::new(
        DenyReason::MalformedInput,
        format!("unable to stage extraction: {}", err.kind()),
    )
    .from_check(CheckKind::Signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, Header};

    fn archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn raw_named(name: &[u8], data: &[u8]) -> Vec<u8> {
        let mut header = Header::new_old();
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        let mut builder = Builder::new(Vec::new());
        builder.append(&header, data).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn benign_archive_lands_under_destination() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("release");
        let payload = archive(&[("bin/tool", b"#!/bin/sh\n"), ("README", b"hello")]);

        let report = SafeExtractor::new(&dest).extract(&payload).unwrap();

        assert_eq!(report.files(), &[PathBuf::from("bin/tool"), PathBuf::from("README")]);
        assert_eq!(report.total_bytes(), 15);
        assert_eq!(fs::read(dest.join("README")).unwrap(), b"hello");
        // only the destination remains in the parent
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn traversal_entry_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("release");
        let payload = raw_named(b"../../etc/passwd", b"root::0:0::/:/bin/sh\n");

        let denial = SafeExtractor::new(&dest).extract(&payload).unwrap_err();

        assert_eq!(denial.reason(), DenyReason::UnsafePath);
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn absolute_entry_is_unsafe() {
        let root = tempfile::tempdir().unwrap();
        let payload = raw_named(b"/etc/cron.d/job", b"* * * * * true\n");
        let denial = SafeExtractor::new(root.path().join("out"))
            .extract(&payload)
            .unwrap_err();
        assert_eq!(denial.reason(), DenyReason::UnsafePath);
    }

    #[test]
    fn symlink_entry_is_unsafe() {
        let root = tempfile::tempdir().unwrap();
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_link_name("/etc").unwrap();
        let mut builder = Builder::new(Vec::new());
        builder.append_data(&mut header, "config", io::empty()).unwrap();
        let payload = builder.into_inner().unwrap();

        let denial = SafeExtractor::new(root.path().join("out"))
            .extract(&payload)
            .unwrap_err();
        assert_eq!(denial.reason(), DenyReason::UnsafePath);
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn late_bad_entry_aborts_whole_archive() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("out");
        let mut payload = archive(&[("ok.txt", b"fine")]);
        // drop the end-of-archive blocks before appending the hostile entry
        payload.truncate(payload.len() - 1024);
        payload.extend(raw_named(b"a/../../escape", b"x"));

        let denial = SafeExtractor::new(&dest).extract(&payload).unwrap_err();
        assert_eq!(denial.reason(), DenyReason::UnsafePath);
        assert!(!dest.exists());
    }

    #[test]
    fn entry_limit_is_malformed_input() {
        let root = tempfile::tempdir().unwrap();
        let payload = archive(&[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        let extractor = SafeExtractor::new(root.path().join("out")).with_limits(ExtractLimits {
            max_entries: 2,
            max_total_bytes: 1024,
        });
        assert_eq!(
            extractor.extract(&payload).unwrap_err().reason(),
            DenyReason::MalformedInput
        );
    }

    #[test]
    fn size_limit_is_malformed_input() {
        let root = tempfile::tempdir().unwrap();
        let payload = archive(&[("big", &[0_u8; 4096])]);
        let extractor = SafeExtractor::new(root.path().join("out")).with_limits(ExtractLimits {
            max_entries: 10,
            max_total_bytes: 1024,
        });
        assert_eq!(
            extractor.extract(&payload).unwrap_err().reason(),
            DenyReason::MalformedInput
        );
    }

    #[test]
    fn occupied_destination_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("out");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("existing"), b"keep").unwrap();

        let denial = SafeExtractor::new(&dest)
            .extract(&archive(&[("new", b"data")]))
            .unwrap_err();
        assert_eq!(denial.reason(), DenyReason::UnsafePath);
        assert_eq!(fs::read(dest.join("existing")).unwrap(), b"keep");
        assert!(!dest.join("new").exists());
    }

    #[test]
    fn empty_existing_destination_is_replaced() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("out");
        fs::create_dir(&dest).unwrap();

        SafeExtractor::new(&dest)
            .extract(&archive(&[("new", b"data")]))
            .unwrap();
        assert_eq!(fs::read(dest.join("new")).unwrap(), b"data");
    }

    #[test]
    fn garbage_is_malformed_input() {
        let root = tempfile::tempdir().unwrap();
        let denial = SafeExtractor::new(root.path().join("out"))
            .extract(&[0xFF; 700])
            .unwrap_err();
        assert_eq!(denial.reason(), DenyReason::MalformedInput);
    }

    #[test]
    fn normalization_is_lexical() {
        assert_eq!(
            normalize_entry_path(Path::new("a/./b/../c")),
            Some(PathBuf::from("a/c"))
        );
        assert_eq!(normalize_entry_path(Path::new("a/../../c")), None);
        assert_eq!(normalize_entry_path(Path::new("/abs")), None);
        assert_eq!(normalize_entry_path(Path::new("C:/windows")), None);
        assert_eq!(normalize_entry_path(Path::new("..\\..\\evil")), None);
    }
}
