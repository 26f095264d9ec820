use crate::{error::Result, mvsep, TidyboxError};
use lazy_static::lazy_static;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// A filename transformation applied over a directory listing.
#[derive(Debug, Clone)]
pub enum RenameRule {
    /// Collapse runs of `+` in the file stem into single spaces.
    Pluses,
    /// Trim the name and collapse misplaced whitespace.
    Spaces,
    /// Remove a literal prefix from the start of the filename.
    StripPrefix { pattern: String, ignore_case: bool },
    /// Remove a literal suffix from the end of the file stem.
    StripSuffix { pattern: String, ignore_case: bool },
    /// Clean up mvsep.com stem-separation output names.
    Mvsep,
}

/// A single planned rename within one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// The outcome of applying one planned rename.
#[derive(Debug)]
pub enum RenameOutcome {
    Renamed,
    WouldRename,
    TargetExists,
    Failed(std::io::Error),
}

/// Counts over an applied rename plan.
#[derive(Debug, Default)]
pub struct RenameSummary {
    pub renamed: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

impl RenameRule {
    /// Returns the new name for `filename`, or `None` if the rule leaves it unchanged or would
    /// produce an unusable (empty) name.
    pub fn new_name(&self, filename: &str) -> Option<String> {
        let renamed = match self {
            RenameRule::Pluses => collapse_pluses(filename),
            RenameRule::Spaces => fix_spaces(filename),
            RenameRule::StripPrefix { pattern, ignore_case } => {
                strip_prefix(filename, pattern, *ignore_case)
            }
            RenameRule::StripSuffix { pattern, ignore_case } => {
                strip_suffix(filename, pattern, *ignore_case)
            }
            RenameRule::Mvsep => mvsep::clean_name(filename),
        }?;

        if renamed == filename || renamed.is_empty() {
            None
        } else {
            Some(renamed)
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            RenameRule::StripPrefix { pattern, .. } | RenameRule::StripSuffix { pattern, .. }
                if pattern.is_empty() =>
            {
                Err(TidyboxError::EmptyPattern)
            }
            _ => Ok(()),
        }
    }
}

/// Scans `dir` and plans the renames `rule` would perform. Only files are considered, and only
/// entries whose name actually changes are included. The plan is ordered by path.
pub fn plan<P>(dir: P, rule: &RenameRule, recursive: bool) -> Result<Vec<Rename>>
where
    P: AsRef<Path>,
{
    rule.validate()?;

    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(TidyboxError::NotADirectory(dir.to_path_buf()));
    }

    let mut renames = Vec::new();
    collect(dir, rule, recursive, &mut renames)?;
    renames.sort_by(|a, b| a.from.cmp(&b.from));
    Ok(renames)
}

fn collect(dir: &Path, rule: &RenameRule, recursive: bool, renames: &mut Vec<Rename>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            if recursive {
                collect(&path, rule, recursive, renames)?;
            }
            continue;
        }

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        if let Some(new_name) = rule.new_name(name) {
            renames.push(Rename {
                to: dir.join(new_name),
                from: path,
            });
        }
    }

    Ok(())
}

impl Rename {
    /// Performs this rename. The target is never overwritten: an existing file at the new path
    /// skips the rename.
    pub fn apply(&self, dry_run: bool) -> RenameOutcome {
        if self.to.exists() {
            return RenameOutcome::TargetExists;
        }

        if dry_run {
            return RenameOutcome::WouldRename;
        }

        match fs::rename(&self.from, &self.to) {
            Ok(()) => RenameOutcome::Renamed,
            Err(e) => RenameOutcome::Failed(e),
        }
    }
}

/// Applies an entire plan and tallies the outcomes.
pub fn apply_all(plan: &[Rename], dry_run: bool) -> RenameSummary {
    let mut summary = RenameSummary::default();

    for rename in plan {
        match rename.apply(dry_run) {
            RenameOutcome::Renamed | RenameOutcome::WouldRename => summary.renamed += 1,
            RenameOutcome::TargetExists => summary.skipped_existing += 1,
            RenameOutcome::Failed(_) => summary.failed += 1,
        }
    }

    summary
}

/// Splits a filename into its stem and extension, the extension including its leading dot. A
/// leading dot alone (dotfiles) doesn't begin an extension.
pub(crate) fn split_ext(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

fn collapse_pluses(filename: &str) -> Option<String> {
    lazy_static! {
        static ref PLUSES: Regex = Regex::new(r"\++").unwrap();
    }

    let (stem, ext) = split_ext(filename);
    let stem = PLUSES.replace_all(stem, " ");
    let stem = stem.trim();

    // a name of nothing but pluses would end up empty
    if stem.is_empty() {
        return None;
    }

    Some(format!("{}{}", stem, ext))
}

fn fix_spaces(filename: &str) -> Option<String> {
    lazy_static! {
        static ref SPACES: Regex = Regex::new(r"\s+").unwrap();
    }

    let collapsed = SPACES.replace_all(filename.trim(), " ");
    let (stem, ext) = split_ext(&collapsed);
    Some(format!("{}{}", stem.trim_end(), ext))
}

fn strip_prefix(filename: &str, pattern: &str, ignore_case: bool) -> Option<String> {
    let matches = if ignore_case {
        filename.to_lowercase().starts_with(&pattern.to_lowercase())
    } else {
        filename.starts_with(pattern)
    };

    if !matches {
        return None;
    }

    let remainder = filename.get(pattern.len()..)?.trim_start();
    rejoin_trimmed(remainder)
}

fn strip_suffix(filename: &str, pattern: &str, ignore_case: bool) -> Option<String> {
    let (stem, ext) = split_ext(filename);

    // lowercasing can change a string's byte length, so the case-insensitive match can't just
    // subtract the pattern's length; find the boundary where the remaining tail folds to the
    // pattern instead
    let idx = if ignore_case {
        let pattern = pattern.to_lowercase();
        stem.char_indices()
            .map(|(i, _)| i)
            .find(|&i| stem[i..].to_lowercase() == pattern)?
    } else {
        stem.ends_with(pattern)
            .then(|| stem.len() - pattern.len())?
    };

    let stem = stem[..idx].trim_end();

    // stripping the entire stem would leave a dotfile, not a usable name
    if stem.is_empty() {
        return None;
    }

    Some(format!("{}{}", stem, ext))
}

// drops any space left between the stem and the extension
fn rejoin_trimmed(filename: &str) -> Option<String> {
    let (stem, ext) = split_ext(filename);
    let stem = stem.trim_end();

    if stem.is_empty() {
        None
    } else {
        Some(format!("{}{}", stem, ext))
    }
}
