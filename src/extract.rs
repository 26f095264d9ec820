use crate::{
    error::{Result, TidyboxError},
    rename::split_ext,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{self, Display},
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::Duration,
};
use zip::{read::ZipFile, result::ZipError, ZipArchive};

/// How many times a failing archive is attempted before giving up.
pub const RETRY_COUNT: u32 = 3;
/// How long to wait between retry attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

const RENAME_ATTEMPT_LIMIT: u32 = 999;

type EventCallback<'a> = Box<dyn Fn(ExtractEvent) + 'a>;

/// What to do when an extracted entry already exists at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionStrategy {
    /// Leave the existing file alone and drop the extracted one.
    Skip,
    /// Replace the existing file.
    Overwrite,
    /// Keep both by appending `_1`, `_2`, … to the extracted one.
    Rename,
}

impl Default for CollisionStrategy {
    fn default() -> Self {
        Self::Skip
    }
}

impl FromStr for CollisionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            "rename" => Ok(Self::Rename),
            other => Err(format!("unknown collision strategy: {}", other)),
        }
    }
}

impl Display for CollisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Overwrite => write!(f, "overwrite"),
            Self::Rename => write!(f, "rename"),
        }
    }
}

/// The progress report enum an [`Extractor`] emits during operation.
#[derive(Debug)]
pub enum ExtractEvent<'a> {
    /// Begin extracting an archive.
    BeginArchive {
        /// The archive's file name.
        archive: &'a str,
        /// The sum of the archive entries' uncompressed sizes.
        total_size: u64,
        /// How many entries the archive has.
        entries: usize,
    },
    /// An entry was extracted into the staging directory.
    EntryExtracted {
        /// The archive's file name.
        archive: &'a str,
        /// The entry's uncompressed size.
        bytes: u64,
    },
    /// An entry collided with an existing file and was dropped.
    CollisionSkipped {
        /// The entry's path relative to the destination.
        entry: &'a Path,
    },
    /// An entry collided with an existing file and replaced it.
    CollisionOverwritten {
        /// The entry's path relative to the destination.
        entry: &'a Path,
    },
    /// An entry collided with an existing file and was given a new name.
    CollisionRenamed {
        /// The entry's path relative to the destination.
        entry: &'a Path,
        /// The path the entry ended up at.
        to: &'a Path,
    },
    /// An archive was extracted, published and verified.
    ArchiveExtracted {
        /// The archive's file name.
        archive: &'a str,
    },
    /// An extraction attempt failed.
    ArchiveFailed {
        /// The archive's file name.
        archive: &'a str,
        /// The reason the attempt failed.
        reason: &'a TidyboxError,
    },
    /// A failed archive is about to be attempted again.
    RetryingArchive {
        /// The archive's file name.
        archive: &'a str,
        /// The number of the upcoming attempt.
        attempt: u32,
    },
}

/// Summary of a finished extraction run.
#[derive(Debug, Default)]
pub struct ExtractSummary {
    /// How many archives were found.
    pub archives: usize,
    /// How many archives extracted successfully.
    pub extracted: usize,
    /// How many archives failed all their attempts.
    pub failed: usize,
}

/// The archive extractor.
///
/// Extracts every `.zip` in a directory, each into a sibling folder named after the archive's
/// stem. Entries are staged into a temporary directory first and published into the destination
/// with per-entry collision handling, then verified against the archive's metadata.
pub struct Extractor<'a> {
    dir: PathBuf,
    passwords: Vec<String>,
    keep_original: bool,
    collision: CollisionStrategy,
    callback: EventCallback<'a>,
}

impl<'a> Extractor<'a> {
    /// Returns a new extractor over the given directory.
    pub fn new<P>(dir: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            dir: dir.into(),
            passwords: Vec::new(),
            keep_original: false,
            collision: CollisionStrategy::default(),
            callback: Box::new(noop_callback),
        }
    }

    /// Add passwords to try against encrypted archives.
    #[must_use]
    pub fn passwords<I, S>(mut self, passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passwords.extend(passwords.into_iter().map(|s| s.into()));
        self
    }

    /// Set whether successfully extracted archives are kept instead of deleted.
    #[must_use]
    pub fn keep_original(mut self, keep: bool) -> Self {
        self.keep_original = keep;
        self
    }

    /// Set the collision strategy for entries that already exist at the destination.
    #[must_use]
    pub fn collision(mut self, strategy: CollisionStrategy) -> Self {
        self.collision = strategy;
        self
    }

    /// Set the progress callback called during operation.
    #[must_use]
    pub fn event_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ExtractEvent) + 'a,
    {
        self.callback = Box::new(callback);
        self
    }

    /// Runs the extractor, consuming it. A directory without any archives isn't an error; the
    /// returned summary simply reports zero archives.
    pub fn run(self) -> Result<ExtractSummary> {
        if !self.dir.is_dir() {
            return Err(TidyboxError::NotADirectory(self.dir.clone()));
        }

        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_zip = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("zip"))
                .unwrap_or(false);

            if path.is_file() && is_zip {
                archives.push(path);
            }
        }
        archives.sort();

        let mut summary = ExtractSummary {
            archives: archives.len(),
            ..ExtractSummary::default()
        };

        for archive_path in archives {
            let archive_name = archive_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let (stem, _) = split_ext(&archive_name);
            let destination = self.dir.join(stem);
            fs::create_dir_all(&destination)?;

            if self.extract_with_retries(&archive_path, &archive_name, &destination) {
                summary.extracted += 1;

                if !self.keep_original {
                    fs::remove_file(&archive_path)?;
                }
            } else {
                summary.failed += 1;
            }
        }

        Ok(summary)
    }

    fn extract_with_retries(&self, archive_path: &Path, archive_name: &str, destination: &Path) -> bool {
        for attempt in 1..=RETRY_COUNT {
            match self.extract_one(archive_path, archive_name, destination) {
                Ok(()) => {
                    (self.callback)(ExtractEvent::ArchiveExtracted { archive: archive_name });
                    return true;
                }
                Err(reason) => {
                    (self.callback)(ExtractEvent::ArchiveFailed {
                        archive: archive_name,
                        reason: &reason,
                    });

                    if !retryable(&reason) {
                        return false;
                    }
                }
            }

            if attempt < RETRY_COUNT {
                (self.callback)(ExtractEvent::RetryingArchive {
                    archive: archive_name,
                    attempt: attempt + 1,
                });
                thread::sleep(RETRY_DELAY);
            }
        }

        false
    }

    fn extract_one(&self, archive_path: &Path, archive_name: &str, destination: &Path) -> Result<()> {
        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(file)?;
        let password = self.find_password(&mut archive, archive_name)?;

        let mut total_size = 0;
        for index in 0..archive.len() {
            let entry = open_entry(&mut archive, index, password.as_deref(), archive_name)?;
            total_size += entry.size();
        }

        (self.callback)(ExtractEvent::BeginArchive {
            archive: archive_name,
            total_size,
            entries: archive.len(),
        });

        // staging inside the destination's parent keeps publishing on the same filesystem
        let staging_parent = destination.parent().unwrap_or(Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}_", archive_name))
            .tempdir_in(staging_parent)?;

        let mut staged_sizes: Vec<(PathBuf, u64)> = Vec::new();
        for index in 0..archive.len() {
            let mut entry = open_entry(&mut archive, index, password.as_deref(), archive_name)?;
            let rel = entry
                .enclosed_name()
                .map(|p| p.to_owned())
                .ok_or_else(|| TidyboxError::UnsafeEntryName(entry.name().to_string()))?;

            let staged_path = staging.path().join(&rel);
            if entry.is_dir() {
                fs::create_dir_all(&staged_path)?;
            } else {
                if let Some(parent) = staged_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut staged_file = File::create(&staged_path)?;
                io::copy(&mut entry, &mut staged_file)?;
                staged_sizes.push((rel, entry.size()));
            }

            (self.callback)(ExtractEvent::EntryExtracted {
                archive: archive_name,
                bytes: entry.size(),
            });
        }

        let mut published = HashMap::new();
        self.publish_tree(staging.path(), destination, staging.path(), &mut published)?;

        // verify only what was actually published; skipped and renamed entries are accounted for
        // through the published-paths map
        for (rel, expected_size) in &staged_sizes {
            let final_path = match published.get(rel) {
                Some(path) => path,
                None => continue,
            };

            let meta = fs::metadata(final_path).map_err(|_| TidyboxError::VerificationFailed {
                archive: archive_name.to_string(),
                reason: format!("missing file '{}'", rel.display()),
            })?;

            if meta.len() != *expected_size {
                return Err(TidyboxError::VerificationFailed {
                    archive: archive_name.to_string(),
                    reason: format!(
                        "size mismatch for '{}' (expected {}, got {})",
                        rel.display(),
                        expected_size,
                        meta.len()
                    ),
                });
            }
        }

        Ok(())
    }

    /// Finds a configured password that decrypts the archive, or `None` for plain archives.
    fn find_password(&self, archive: &mut ZipArchive<File>, archive_name: &str) -> Result<Option<String>> {
        if archive.len() == 0 {
            return Ok(None);
        }

        match archive.by_index(0) {
            Ok(_) => return Ok(None),
            Err(ZipError::UnsupportedArchive(msg)) if msg.contains("Password") => (),
            Err(e) => return Err(e.into()),
        }

        for password in &self.passwords {
            match archive.by_index_decrypt(0, password.as_bytes()) {
                // the ZipCrypto check byte passes for roughly 1 in 256 wrong passwords, so a
                // password is only accepted once the entry fully decompresses
                Ok(Ok(mut entry)) => {
                    if io::copy(&mut entry, &mut io::sink()).is_ok() {
                        return Ok(Some(password.clone()));
                    }
                }
                Ok(Err(_invalid)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(TidyboxError::NoWorkingPassword(archive_name.to_string()))
    }

    fn publish_tree(
        &self,
        src_dir: &Path,
        dest_dir: &Path,
        root: &Path,
        published: &mut HashMap<PathBuf, PathBuf>,
    ) -> Result<()> {
        fs::create_dir_all(dest_dir)?;

        for entry in fs::read_dir(src_dir)? {
            let src = entry?.path();
            let rel = src.strip_prefix(root).unwrap_or(&src).to_path_buf();
            let name = match src.file_name() {
                Some(name) => name.to_owned(),
                None => continue,
            };
            let mut dest = dest_dir.join(&name);

            if src.is_dir() {
                // a file squatting where a directory should go is a collision too
                if dest.exists() && !dest.is_dir() {
                    match self.collision {
                        CollisionStrategy::Skip => {
                            (self.callback)(ExtractEvent::CollisionSkipped { entry: &rel });
                            continue;
                        }
                        CollisionStrategy::Overwrite => {
                            fs::remove_file(&dest)?;
                            (self.callback)(ExtractEvent::CollisionOverwritten { entry: &rel });
                        }
                        CollisionStrategy::Rename => match unique_target(&dest) {
                            Some(unique) => {
                                (self.callback)(ExtractEvent::CollisionRenamed {
                                    entry: &rel,
                                    to: &unique,
                                });
                                dest = unique;
                            }
                            None => {
                                (self.callback)(ExtractEvent::CollisionSkipped { entry: &rel });
                                continue;
                            }
                        },
                    }
                }

                self.publish_tree(&src, &dest, root, published)?;
                continue;
            }

            if dest.exists() {
                match self.collision {
                    CollisionStrategy::Skip => {
                        (self.callback)(ExtractEvent::CollisionSkipped { entry: &rel });
                        continue;
                    }
                    CollisionStrategy::Overwrite => {
                        if dest.is_dir() {
                            fs::remove_dir_all(&dest)?;
                        } else {
                            fs::remove_file(&dest)?;
                        }
                        (self.callback)(ExtractEvent::CollisionOverwritten { entry: &rel });
                    }
                    CollisionStrategy::Rename => match unique_target(&dest) {
                        Some(unique) => {
                            (self.callback)(ExtractEvent::CollisionRenamed {
                                entry: &rel,
                                to: &unique,
                            });
                            dest = unique;
                        }
                        None => {
                            (self.callback)(ExtractEvent::CollisionSkipped { entry: &rel });
                            continue;
                        }
                    },
                }
            }

            fs::rename(&src, &dest)?;
            published.insert(rel, dest);
        }

        Ok(())
    }
}

fn open_entry<'a>(
    archive: &'a mut ZipArchive<File>,
    index: usize,
    password: Option<&str>,
    archive_name: &str,
) -> Result<ZipFile<'a>> {
    match password {
        Some(password) => match archive.by_index_decrypt(index, password.as_bytes())? {
            Ok(entry) => Ok(entry),
            Err(_invalid) => Err(TidyboxError::NoWorkingPassword(archive_name.to_string())),
        },
        None => Ok(archive.by_index(index)?),
    }
}

/// Returns a free path next to `path` by appending `_1`, `_2`, … to its stem, giving up after
/// 999 attempts.
fn unique_target(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = split_ext(name);
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    for counter in 1..=RENAME_ATTEMPT_LIMIT {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, ext));
        if !candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

/// Whether a failed attempt is worth repeating. A missing password won't appear on a later
/// attempt, and after a verification failure the destination is already populated, so a retry
/// would publish nothing and pass verification vacuously.
fn retryable(reason: &TidyboxError) -> bool {
    !matches!(
        reason,
        TidyboxError::NoWorkingPassword(_) | TidyboxError::VerificationFailed { .. }
    )
}

fn noop_callback(_: ExtractEvent) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_test_zip(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());

        for (entry_name, content) in entries {
            writer.start_file(*entry_name, FileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }

        writer.finish().unwrap();
        path
    }

    #[test]
    fn extracts_into_stem_named_folder() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_test_zip(
            dir.path(),
            "bundle.zip",
            &[("a.txt", b"hello"), ("sub/b.txt", b"world")],
        );

        let summary = Extractor::new(dir.path()).run().unwrap();
        assert_eq!(summary.archives, 1);
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.failed, 0);

        let dest = dir.path().join("bundle");
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dest.join("sub").join("b.txt")).unwrap(), b"world");

        // the original archive is deleted by default
        assert!(!archive.exists());
    }

    #[test]
    fn keep_original_leaves_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_test_zip(dir.path(), "bundle.zip", &[("a.txt", b"hello")]);

        Extractor::new(dir.path()).keep_original(true).run().unwrap();
        assert!(archive.exists());
    }

    #[test]
    fn collision_skip_preserves_existing() {
        let dir = tempfile::tempdir().unwrap();
        write_test_zip(dir.path(), "bundle.zip", &[("a.txt", b"from archive")]);

        let dest = dir.path().join("bundle");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.txt"), b"existing").unwrap();

        let summary = Extractor::new(dir.path()).run().unwrap();
        assert_eq!(summary.extracted, 1);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"existing");
    }

    #[test]
    fn collision_overwrite_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        write_test_zip(dir.path(), "bundle.zip", &[("a.txt", b"from archive")]);

        let dest = dir.path().join("bundle");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.txt"), b"existing").unwrap();

        Extractor::new(dir.path())
            .collision(CollisionStrategy::Overwrite)
            .run()
            .unwrap();
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"from archive");
    }

    #[test]
    fn collision_rename_keeps_both() {
        let dir = tempfile::tempdir().unwrap();
        write_test_zip(dir.path(), "bundle.zip", &[("a.txt", b"from archive")]);

        let dest = dir.path().join("bundle");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.txt"), b"existing").unwrap();

        Extractor::new(dir.path())
            .collision(CollisionStrategy::Rename)
            .run()
            .unwrap();
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"existing");
        assert_eq!(fs::read(dest.join("a_1.txt")).unwrap(), b"from archive");
    }

    #[test]
    fn events_report_sizes() {
        let dir = tempfile::tempdir().unwrap();
        write_test_zip(dir.path(), "bundle.zip", &[("a.txt", b"hello"), ("b.txt", b"hi")]);

        let total = std::cell::Cell::new(0);
        let entry_bytes = std::cell::Cell::new(0);

        Extractor::new(dir.path())
            .event_callback(|event| match event {
                ExtractEvent::BeginArchive { total_size, entries, .. } => {
                    total.set(total_size);
                    assert_eq!(entries, 2);
                }
                ExtractEvent::EntryExtracted { bytes, .. } => {
                    entry_bytes.set(entry_bytes.get() + bytes)
                }
                _ => (),
            })
            .run()
            .unwrap();

        assert_eq!(total.get(), 7);
        assert_eq!(entry_bytes.get(), 7);
    }

    #[test]
    fn no_archives_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("not-an-archive.txt"), b"hi").unwrap();

        let summary = Extractor::new(dir.path()).run().unwrap();
        assert_eq!(summary.archives, 0);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        assert!(!retryable(&TidyboxError::NoWorkingPassword("a.zip".to_string())));
        assert!(!retryable(&TidyboxError::VerificationFailed {
            archive: "a.zip".to_string(),
            reason: "size mismatch".to_string(),
        }));
        assert!(retryable(&TidyboxError::Io(io::Error::new(
            io::ErrorKind::Other,
            "transient",
        ))));
    }

    #[test]
    fn unique_target_appends_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, b"a").unwrap();
        fs::write(dir.path().join("file_1.txt"), b"b").unwrap();

        let unique = unique_target(&path).unwrap();
        assert_eq!(unique.file_name().unwrap(), "file_2.txt");
    }
}
