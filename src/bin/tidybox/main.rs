mod config;
mod logging;

use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use log::*;
use num_format::{SystemLocale, ToFormattedString};
use std::{
    cell::RefCell,
    fmt::Display,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Instant,
};
use structopt::StructOpt;
use tidybox::{
    CollisionStrategy, ConvertEvent, Conversion, ExtractEvent, Extractor, ListFormat, ListSource,
    RenameOutcome, RenameRule, RenameSummary, HTTP_CONNECT_TIMEOUT, MAX_COVER_DIMENSION,
};

const APP_NAME: &str = env!("CARGO_PKG_NAME");
// archives below this uncompressed size extract too quickly for a bar to be worth drawing
const PROGRESS_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Copy, Clone)]
struct ConnectTimeout(u64);

impl Default for ConnectTimeout {
    fn default() -> Self {
        Self(HTTP_CONNECT_TIMEOUT)
    }
}

impl FromStr for ConnectTimeout {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl Display for ConnectTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = APP_NAME, author, about
)]
struct Opt {
    /// Enable verbose logging
    #[structopt(short, long)]
    verbose: bool,
    /// Custom path to the app's configuration file. By default the app will use the
    /// system-specific user configuration directory.
    #[structopt(short, long)]
    config: Option<PathBuf>,
    /// Append log output to the given file in addition to stdout.
    #[structopt(long)]
    log_file: Option<PathBuf>,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Collapse runs of '+' in file names into single spaces
    Pluses {
        /// Directory to process
        #[structopt(default_value = ".")]
        dir: PathBuf,
        /// Only print what would be renamed
        #[structopt(short = "n", long)]
        dry_run: bool,
    },
    /// Trim file names and collapse misplaced whitespace in them
    Spaces {
        /// Directory to process
        #[structopt(default_value = ".")]
        dir: PathBuf,
        /// Only print what would be renamed
        #[structopt(short = "n", long)]
        dry_run: bool,
    },
    /// Strip a literal prefix or suffix from file names
    Strip {
        /// Directory to process
        #[structopt(default_value = ".")]
        dir: PathBuf,
        /// The prefix to remove from the start of file names
        #[structopt(short, long, conflicts_with = "suffix", required_unless = "suffix")]
        prefix: Option<String>,
        /// The suffix to remove from the end of file stems, before the extension
        #[structopt(short, long)]
        suffix: Option<String>,
        /// Match the prefix or suffix case-insensitively
        #[structopt(short, long)]
        ignore_case: bool,
        /// Only print what would be renamed
        #[structopt(short = "n", long)]
        dry_run: bool,
    },
    /// Clean up mvsep.com stem-separation output file names
    Mvsep {
        /// Directory to process
        #[structopt(default_value = ".")]
        dir: PathBuf,
        /// Process subdirectories recursively
        #[structopt(short, long)]
        recursive: bool,
        /// Only print what would be renamed
        #[structopt(short = "n", long)]
        dry_run: bool,
    },
    /// Extract every zip archive in a directory into a folder named after it
    Extract {
        /// Directory containing the archives
        #[structopt(default_value = ".")]
        dir: PathBuf,
        /// Password to try against encrypted archives, in addition to any configured ones
        #[structopt(short, long)]
        password: Option<String>,
        /// Keep the original archives after successful extraction
        #[structopt(short, long)]
        keep: bool,
        /// Strategy for entries that already exist at the destination
        #[structopt(long, possible_values = &["skip", "overwrite", "rename"])]
        collision: Option<CollisionStrategy>,
    },
    /// Convert a domain blocklist from one format to another
    Convert {
        /// The list to read: a local path, or an http(s):// or file:// URL
        input: String,
        /// The file to write the converted list to
        output: PathBuf,
        /// The input format; detected from the list itself when omitted
        #[structopt(long, possible_values = &["domains", "adguard", "hosts"])]
        from: Option<ListFormat>,
        /// The output format
        #[structopt(long, possible_values = &["domains", "adguard", "hosts"])]
        to: ListFormat,
        /// The address blocked domains map to in hosts-format output
        #[structopt(long)]
        blackhole_address: Option<IpAddr>,
        /// Drop duplicate domains from the output
        #[structopt(long)]
        dedupe: bool,
        /// The timeout to wait for HTTP connects to succeed in milliseconds
        #[structopt(default_value, short, long)]
        timeout: ConnectTimeout,
    },
    /// Downscale a cover image to fit within a maximum dimension
    Resize {
        /// The image to read
        input: PathBuf,
        /// The file to write the downscaled image to
        output: PathBuf,
        /// The maximum width or height in pixels
        #[structopt(short, long)]
        max_dimension: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    logging::setup_logging(
        if opt.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        opt.log_file.as_deref(),
    )?;
    let cfg = load_config(&opt)?;

    debug!("{:?}", opt);
    debug!("{:?}", cfg);

    match opt.command {
        Command::Pluses { dir, dry_run } => run_rename(&dir, RenameRule::Pluses, false, dry_run),
        Command::Spaces { dir, dry_run } => run_rename(&dir, RenameRule::Spaces, false, dry_run),
        Command::Strip {
            dir,
            prefix,
            suffix,
            ignore_case,
            dry_run,
        } => {
            let rule = match (prefix, suffix) {
                (Some(pattern), _) => RenameRule::StripPrefix { pattern, ignore_case },
                (None, Some(pattern)) => RenameRule::StripSuffix { pattern, ignore_case },
                (None, None) => anyhow::bail!("either --prefix or --suffix is required"),
            };
            run_rename(&dir, rule, false, dry_run)
        }
        Command::Mvsep {
            dir,
            recursive,
            dry_run,
        } => run_rename(&dir, RenameRule::Mvsep, recursive, dry_run),
        Command::Extract {
            dir,
            password,
            keep,
            collision,
        } => run_extract(&dir, password, keep, collision, &cfg),
        Command::Convert {
            input,
            output,
            from,
            to,
            blackhole_address,
            dedupe,
            timeout,
        } => run_convert(&input, &output, from, to, blackhole_address, dedupe, timeout, &cfg),
        Command::Resize {
            input,
            output,
            max_dimension,
        } => run_resize(&input, &output, max_dimension.unwrap_or(MAX_COVER_DIMENSION)),
    }
}

fn run_rename(dir: &Path, rule: RenameRule, recursive: bool, dry_run: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    let renames = tidybox::plan(dir, &rule, recursive)?;
    let mut summary = RenameSummary::default();

    for rename in &renames {
        let from = rename.from.display();
        let to = rename.to.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        match rename.apply(dry_run) {
            RenameOutcome::Renamed => {
                info!("Renamed: '{}' -> '{}'", from, to);
                summary.renamed += 1;
            }
            RenameOutcome::WouldRename => {
                info!("Would rename: '{}' -> '{}'", from, to);
                summary.renamed += 1;
            }
            RenameOutcome::TargetExists => {
                warn!("Skipping '{}' -> '{}': the target already exists", from, to);
                summary.skipped_existing += 1;
            }
            RenameOutcome::Failed(e) => {
                error!("Failed to rename '{}': {}", from, e);
                summary.failed += 1;
            }
        }
    }

    let locale = SystemLocale::default().expect("failed to get system locale");
    info!(
        "{} {} files ({} skipped, {} failed) in {}s",
        if dry_run { "Would rename" } else { "Renamed" },
        summary.renamed.to_formatted_string(&locale),
        summary.skipped_existing,
        summary.failed,
        start.elapsed().as_secs_f32()
    );

    Ok(())
}

fn run_extract(
    dir: &Path,
    password: Option<String>,
    keep: bool,
    collision: Option<CollisionStrategy>,
    cfg: &Config,
) -> anyhow::Result<()> {
    let mut passwords = Vec::new();
    passwords.extend(password);
    passwords.extend(cfg.passwords.iter().cloned());

    let start = Instant::now();
    let bar: RefCell<Option<ProgressBar>> = RefCell::new(None);

    let summary = Extractor::new(dir)
        .passwords(passwords)
        .keep_original(keep)
        .collision(collision.unwrap_or(cfg.collision))
        .event_callback(|event| match event {
            ExtractEvent::BeginArchive {
                archive,
                total_size,
                entries,
            } => {
                info!("Extracting {} ({} entries)", archive, entries);

                if total_size > PROGRESS_THRESHOLD_BYTES {
                    let pb = ProgressBar::new(total_size);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("{msg} {bar:40} {bytes}/{total_bytes}")
                            .progress_chars("=> "),
                    );
                    pb.set_message(archive.to_string());
                    *bar.borrow_mut() = Some(pb);
                }
            }
            ExtractEvent::EntryExtracted { bytes, .. } => {
                if let Some(pb) = &*bar.borrow() {
                    pb.inc(bytes);
                }
            }
            ExtractEvent::CollisionSkipped { entry } => {
                warn!("Collision: '{}' already exists, skipping", entry.display())
            }
            ExtractEvent::CollisionOverwritten { entry } => {
                warn!("Collision: '{}' already exists, overwriting", entry.display())
            }
            ExtractEvent::CollisionRenamed { entry, to } => warn!(
                "Collision: '{}' already exists, renamed to '{}'",
                entry.display(),
                to.display()
            ),
            ExtractEvent::ArchiveExtracted { archive } => {
                if let Some(pb) = bar.borrow_mut().take() {
                    pb.finish_and_clear();
                }
                info!("Extracted and verified {}", archive);
            }
            ExtractEvent::ArchiveFailed { archive, reason } => {
                if let Some(pb) = bar.borrow_mut().take() {
                    pb.finish_and_clear();
                }
                error!("Extracting {} failed: {}", archive, reason);
            }
            ExtractEvent::RetryingArchive { archive, attempt } => {
                info!("Retrying {} (attempt {})", archive, attempt)
            }
        })
        .run()?;

    if summary.archives == 0 {
        warn!("No zip archives found in {}", dir.display());
        return Ok(());
    }

    let locale = SystemLocale::default().expect("failed to get system locale");
    info!(
        "Extracted {} of {} archives ({} failed) in {}s",
        summary.extracted.to_formatted_string(&locale),
        summary.archives,
        summary.failed,
        start.elapsed().as_secs_f32()
    );

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_convert(
    input: &str,
    output: &Path,
    from: Option<ListFormat>,
    to: ListFormat,
    blackhole_address: Option<IpAddr>,
    dedupe: bool,
    timeout: ConnectTimeout,
    cfg: &Config,
) -> anyhow::Result<()> {
    let source = ListSource::parse(input)?;

    let start = Instant::now();
    let bar: RefCell<Option<ProgressBar>> = RefCell::new(None);

    let mut conversion = Conversion::new(source, to, output)
        .blackhole_address(blackhole_address.unwrap_or(cfg.blackhole_address))
        .deduplicate(dedupe || cfg.deduplicate)
        .ignore_domains(cfg.ignore.iter().cloned())
        .http_timeout(timeout.0)
        .event_callback(|event| match event {
            ConvertEvent::BeginRead { source, length } => {
                if let Some(len) = length {
                    info!("Reading {} with length {}", source, len);

                    let pb = ProgressBar::new(len);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("{bar:40} {bytes}/{total_bytes}")
                            .progress_chars("=> "),
                    );
                    *bar.borrow_mut() = Some(pb);
                } else {
                    info!("Reading {} with indeterminate length", source);
                }
            }
            ConvertEvent::ReadProgress { delta, .. } => {
                if let Some(pb) = &*bar.borrow() {
                    pb.inc(delta);
                }
            }
            ConvertEvent::FinishRead { source } => {
                if let Some(pb) = bar.borrow_mut().take() {
                    pb.finish_and_clear();
                }
                debug!("Finished reading {}", source);
            }
            ConvertEvent::DomainWritten(domain) => trace!("Wrote {}", domain),
            ConvertEvent::IgnoredDomain(domain) => info!("Ignoring domain {}", domain),
            ConvertEvent::SkippedLine { line_number, line } => {
                debug!("Line {} isn't convertible, skipping: {}", line_number, line)
            }
            ConvertEvent::AllMatchingLineIgnored { line_number, line } => warn!(
                "Line {} parsed to an all-matching entry ({}), so it was ignored",
                line_number, line
            ),
        });

    if let Some(from) = from {
        conversion = conversion.from_format(from);
    }

    let summary = conversion.run()?;

    let locale = SystemLocale::default().expect("failed to get system locale");
    info!(
        "Wrote {} domains to {} in {}s ({} lines skipped, {} domains ignored)",
        summary.written.to_formatted_string(&locale),
        output.display(),
        start.elapsed().as_secs_f32(),
        summary.skipped,
        summary.ignored
    );

    Ok(())
}

fn run_resize(input: &Path, output: &Path, max_dimension: u32) -> anyhow::Result<()> {
    let prepared = tidybox::shrink_to_fit(input, max_dimension)?;
    std::fs::write(output, &prepared.data)?;

    info!(
        "Wrote {} ({}x{}, {} bytes) to {}",
        prepared.mime,
        prepared.width,
        prepared.height,
        prepared.data.len(),
        output.display()
    );

    Ok(())
}

fn load_config(opt: &Opt) -> anyhow::Result<Config> {
    Ok(match opt.config.as_deref() {
        Some(path) => confy::load_path(path)?,
        None => confy::load(APP_NAME)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_defaults_to_max_cover_dimension() {
        let opt = Opt::from_iter(["tidybox", "resize", "in.png", "out.png"]);
        match opt.command {
            Command::Resize { max_dimension, .. } => {
                assert_eq!(max_dimension.unwrap_or(MAX_COVER_DIMENSION), MAX_COVER_DIMENSION)
            }
            _ => panic!("expected the resize subcommand"),
        }
    }
}
