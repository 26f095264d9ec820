use crate::{error::Result, progress_read::ProgressRead, source::ListSource};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{
    cell::Cell,
    collections::HashSet,
    fmt::{self, Display},
    fs::File,
    io::{self, BufRead, BufReader, Seek, SeekFrom, Write},
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::tempfile;

/// The default address blocked domains are mapped to in hosts-format output.
pub const DEFAULT_BLACKHOLE_ADDRESS: &str = "127.0.0.1";

/// The default timeout to wait for HTTP connects to succeed in milliseconds: `30 000` (30
/// seconds).
pub const HTTP_CONNECT_TIMEOUT: u64 = 30_000;

type EventCallback<'a> = Box<dyn Fn(ConvertEvent) + 'a>;

/// A domain-blocklist text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    /// One raw domain per line.
    Domains,
    /// AdGuard-style rules: `||domain.com^`.
    Adguard,
    /// Windows HOSTS file entries: `127.0.0.1 domain.com`.
    Hosts,
}

impl Default for ListFormat {
    fn default() -> Self {
        Self::Domains
    }
}

impl FromStr for ListFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "domains" => Ok(Self::Domains),
            "adguard" => Ok(Self::Adguard),
            "hosts" => Ok(Self::Hosts),
            other => Err(format!("unknown list format: {}", other)),
        }
    }
}

impl Display for ListFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domains => write!(f, "domains"),
            Self::Adguard => write!(f, "adguard"),
            Self::Hosts => write!(f, "hosts"),
        }
    }
}

/// The progress report enum a [`Conversion`] emits during operation.
#[derive(Debug)]
pub enum ConvertEvent<'a> {
    /// Begin reading the source.
    BeginRead {
        /// The source URL.
        source: &'a str,
        /// The source's length, if determined. Some HTTP/HTTPS sources return the content using
        /// chunk transfer encoding, which means their length cannot be determined ahead of time.
        length: Option<u64>,
    },
    /// Progress reading through the source.
    ReadProgress {
        /// How many bytes have been read so far.
        bytes: u64,
        /// How many more bytes have been read since the last progress report.
        delta: u64,
    },
    /// The source finished reading.
    FinishRead {
        /// The source URL.
        source: &'a str,
    },
    /// A domain was written to the output.
    DomainWritten(&'a str),
    /// A domain was skipped because it is in the ignore-set.
    IgnoredDomain(&'a str),
    /// A line didn't parse in the input format and was skipped.
    SkippedLine {
        /// The line number in the source.
        line_number: usize,
        /// The line itself.
        line: &'a str,
    },
    /// A line parsed into an all-matching entry so it was ignored.
    AllMatchingLineIgnored {
        /// The line number in the source.
        line_number: usize,
        /// The line itself.
        line: &'a str,
    },
}

/// Summary of a finished conversion.
#[derive(Debug, Default)]
pub struct ConvertSummary {
    pub written: usize,
    pub skipped: usize,
    pub ignored: usize,
}

/// A single blocklist conversion: read a source in one format, write its domains out in another.
///
/// The output is staged into a temporary file and published to the destination path only once the
/// whole source has been read, so a failed conversion never leaves a half-written list behind.
pub struct Conversion<'a> {
    source: ListSource,
    from: Option<ListFormat>,
    to: ListFormat,
    destination: PathBuf,
    blackhole_address: IpAddr,
    deduplicate: bool,
    ignore: HashSet<String>,
    http_timeout: u64,
    callback: EventCallback<'a>,
}

impl<'a> Conversion<'a> {
    /// Returns a new conversion from `source` into `to`-format at `destination`. The input format
    /// is detected from the first convertible line unless overridden with
    /// [`from`](Self::from_format).
    pub fn new<P>(source: ListSource, to: ListFormat, destination: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            source,
            from: None,
            to,
            destination: destination.into(),
            blackhole_address: default_blackhole_address(),
            deduplicate: false,
            ignore: HashSet::new(),
            http_timeout: HTTP_CONNECT_TIMEOUT,
            callback: Box::new(noop_callback),
        }
    }

    /// Set the input format instead of detecting it.
    #[must_use]
    pub fn from_format(mut self, from: ListFormat) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the address blocked domains map to in hosts-format output.
    #[must_use]
    pub fn blackhole_address<I>(mut self, address: I) -> Self
    where
        I: Into<IpAddr>,
    {
        self.blackhole_address = address.into();
        self
    }

    /// Set whether duplicate domains are dropped from the output.
    #[must_use]
    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Add domains that are never emitted to the output.
    #[must_use]
    pub fn ignore_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(domains.into_iter().map(|s| s.into()));
        self
    }

    /// Set the timeout to wait for HTTP connects to succeed in milliseconds.
    #[must_use]
    pub fn http_timeout(mut self, timeout: u64) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the progress callback called during operation.
    #[must_use]
    pub fn event_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ConvertEvent) + 'a,
    {
        self.callback = Box::new(callback);
        self
    }

    /// Runs the conversion, consuming it.
    pub fn run(self) -> Result<ConvertSummary> {
        let cb = self.callback;
        let source = self.source.as_str();
        let mut from = self.from;
        let mut summary = ConvertSummary::default();
        let mut seen = HashSet::new();

        let mut staged = StagedList::activate(self.to, &self.destination, self.blackhole_address)?;

        let (length, reader) = self.source.read(self.http_timeout)?;
        cb(ConvertEvent::BeginRead { source, length });

        let read_amount = Cell::new(0);
        let last_read_amount = Cell::new(0);
        let reader = ProgressRead::new(reader, &read_amount);
        let reader = BufReader::new(reader);

        for (line_idx, line) in reader.lines().enumerate() {
            let bytes = read_amount.get();
            let delta = bytes - last_read_amount.replace(bytes);
            cb(ConvertEvent::ReadProgress { bytes, delta });

            let line = match line {
                Ok(l) => l,
                Err(_e) => continue,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() || is_comment(trimmed) {
                continue;
            }

            // without an explicit input format, the first convertible line decides it
            let format = *from.get_or_insert_with(|| detect_line_format(trimmed));

            let domain = match parse_line(format, trimmed) {
                Some(domain) => domain,
                None => {
                    cb(ConvertEvent::SkippedLine {
                        line_number: line_idx + 1,
                        line: &line,
                    });
                    summary.skipped += 1;
                    continue;
                }
            };

            if domain.is_empty() || domain == "." {
                cb(ConvertEvent::AllMatchingLineIgnored {
                    line_number: line_idx + 1,
                    line: &line,
                });
                summary.skipped += 1;
                continue;
            }

            if self.ignore.contains(&domain) {
                cb(ConvertEvent::IgnoredDomain(&domain));
                summary.ignored += 1;
                continue;
            }

            if self.deduplicate && !seen.insert(domain.clone()) {
                continue;
            }

            staged.write_domain(&domain)?;
            cb(ConvertEvent::DomainWritten(&domain));
            summary.written += 1;
        }

        cb(ConvertEvent::FinishRead { source });

        staged.finalise()?;
        Ok(summary)
    }
}

/// A staged output list: writes go to a temporary file which is published to the final path on
/// [`finalise`](Self::finalise).
struct StagedList {
    format: ListFormat,
    final_path: PathBuf,
    blackhole_address: IpAddr,
    destination: File,
}

impl StagedList {
    fn activate(format: ListFormat, final_path: &Path, blackhole_address: IpAddr) -> Result<Self> {
        let mut staged = Self {
            format,
            final_path: final_path.to_path_buf(),
            blackhole_address,
            destination: tempfile()?,
        };

        staged.write_primer()?;
        Ok(staged)
    }

    fn write_primer(&mut self) -> Result<()> {
        writeln!(
            &mut self.destination,
            "{} {}",
            comment_prefix(self.format),
            get_generated_at_comment()
        )?;
        Ok(())
    }

    fn write_domain(&mut self, domain: &str) -> Result<()> {
        match self.format {
            ListFormat::Domains => writeln!(&mut self.destination, "{}", domain)?,
            ListFormat::Adguard => writeln!(&mut self.destination, "||{}^", domain)?,
            ListFormat::Hosts => {
                writeln!(&mut self.destination, "{} {}", self.blackhole_address, domain)?
            }
        }

        Ok(())
    }

    fn finalise(mut self) -> Result<()> {
        let mut final_file = File::create(&self.final_path)?;
        self.destination.seek(SeekFrom::Start(0))?;
        io::copy(&mut self.destination, &mut final_file)?;
        Ok(())
    }
}

/// Parses one non-blank, non-comment line in the given format into the domain it blocks.
pub fn parse_line(format: ListFormat, line: &str) -> Option<String> {
    match format {
        ListFormat::Domains => parse_domains_line(line),
        ListFormat::Adguard => parse_adguard_line(line),
        ListFormat::Hosts => parse_hosts_line(line),
    }
}

/// Guesses the format of a blocklist from one of its convertible lines.
pub fn detect_line_format(line: &str) -> ListFormat {
    if line.starts_with("||") && line.ends_with('^') {
        return ListFormat::Adguard;
    }

    let mut tokens = line.split_whitespace();
    if let (Some(first), Some(_)) = (tokens.next(), tokens.next()) {
        if first.parse::<IpAddr>().is_ok() {
            return ListFormat::Hosts;
        }
    }

    ListFormat::Domains
}

fn parse_domains_line(line: &str) -> Option<String> {
    let domain = line.split('#').next().unwrap_or_default().trim();

    if domain.is_empty() || domain.contains(char::is_whitespace) {
        None
    } else {
        Some(domain.to_string())
    }
}

fn parse_adguard_line(line: &str) -> Option<String> {
    // only plain domain rules are convertible; anything with anchors, paths or modifiers isn't
    let domain = line.strip_prefix("||")?.strip_suffix('^')?.trim();

    if domain.is_empty() || domain.contains(['/', '^', '*', '$']) {
        None
    } else {
        Some(domain.to_string())
    }
}

fn parse_hosts_line(line: &str) -> Option<String> {
    let line = line.split('#').next().unwrap_or_default();
    let mut tokens = line.split_whitespace();
    let address: IpAddr = tokens.next()?.parse().ok()?;
    let host = tokens.next()?;

    // blocklists map domains to the unspecified or loopback address; anything else is a real
    // host mapping
    if address.is_unspecified() || address.is_loopback() {
        // disallow having an IP address as the host
        if host.parse::<IpAddr>().is_err() {
            return Some(host.to_string());
        }
    }

    None
}

fn comment_prefix(format: ListFormat) -> char {
    match format {
        ListFormat::Adguard => '!',
        ListFormat::Domains | ListFormat::Hosts => '#',
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('!')
}

fn get_generated_at_comment() -> String {
    format!(
        "Generated at {} with {} v{}",
        Local::now(),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

fn default_blackhole_address() -> IpAddr {
    DEFAULT_BLACKHOLE_ADDRESS
        .parse()
        .expect("failed to parse default blackhole address")
}

fn noop_callback(_: ConvertEvent) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hosts_parse_valid_line() {
        let loopback = parse_hosts_line("127.0.0.1 example.com");
        assert!(matches!(loopback.as_deref(), Some("example.com")));

        let unspecified = parse_hosts_line("0.0.0.0 example.com");
        assert!(matches!(unspecified.as_deref(), Some("example.com")));

        let v6 = parse_hosts_line(":: example.com");
        assert!(matches!(v6.as_deref(), Some("example.com")));
    }

    #[test]
    fn hosts_inline_comment_stripped() {
        let parsed = parse_hosts_line("127.0.0.1 example.com # tracking");
        assert!(matches!(parsed.as_deref(), Some("example.com")));
    }

    #[test]
    fn hosts_malformed_line() {
        assert!(parse_hosts_line("127.0.0.1").is_none());
        assert!(parse_hosts_line("example.com").is_none());
    }

    #[test]
    fn hosts_address_as_host() {
        assert!(parse_hosts_line("0.0.0.0 0.0.0.0").is_none());
    }

    #[test]
    fn hosts_real_mapping_rejected() {
        // an actual host mapping, not a blocklist entry
        assert!(parse_hosts_line("192.168.1.10 nas.local").is_none());
    }

    #[test]
    fn hosts_invalid_ip_address() {
        assert!(parse_hosts_line("999.0.0.0 example.com").is_none());
    }

    #[test]
    fn adguard_parse_valid_rule() {
        let parsed = parse_adguard_line("||example.com^");
        assert!(matches!(parsed.as_deref(), Some("example.com")));
    }

    #[test]
    fn adguard_non_domain_rules_skipped() {
        assert!(parse_adguard_line("||example.com^$third-party").is_none());
        assert!(parse_adguard_line("||example.com/ads^").is_none());
        assert!(parse_adguard_line("example.com").is_none());
        assert!(parse_adguard_line("||^").is_none());
    }

    #[test]
    fn domains_inline_comment_stripped() {
        let parsed = parse_domains_line("example.com # some note");
        assert!(matches!(parsed.as_deref(), Some("example.com")));
        assert!(parse_domains_line("# just a comment").is_none());
    }

    #[test]
    fn detect_each_format() {
        assert_eq!(detect_line_format("||example.com^"), ListFormat::Adguard);
        assert_eq!(detect_line_format("127.0.0.1 example.com"), ListFormat::Hosts);
        assert_eq!(detect_line_format("example.com"), ListFormat::Domains);
    }

    fn convert_str(input: &str, to: ListFormat) -> (ConvertSummary, Vec<String>) {
        let mut infile = tempfile::NamedTempFile::new().unwrap();
        write!(infile, "{}", input).unwrap();

        let outdir = tempfile::tempdir().unwrap();
        let outpath = outdir.path().join("out.txt");

        let source = ListSource::from_path(infile.path()).unwrap();
        let summary = Conversion::new(source, to, &outpath).run().unwrap();

        let content = std::fs::read_to_string(&outpath).unwrap();
        let lines = content.lines().map(str::to_string).collect();
        (summary, lines)
    }

    #[test]
    fn domains_to_hosts() {
        let (summary, lines) = convert_str("example.com\nads.example.net # note\n", ListFormat::Hosts);

        assert_eq!(summary.written, 2);
        assert!(lines[0].starts_with("# Generated at"));
        assert_eq!(lines[1], "127.0.0.1 example.com");
        assert_eq!(lines[2], "127.0.0.1 ads.example.net");
    }

    #[test]
    fn hosts_to_domains() {
        let input = "# header\n127.0.0.1 example.com\n192.168.1.10 nas.local\n\n0.0.0.0 ads.example.net\n";
        let (summary, lines) = convert_str(input, ListFormat::Domains);

        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(lines[1], "example.com");
        assert_eq!(lines[2], "ads.example.net");
    }

    #[test]
    fn adguard_output_uses_exclamation_comment() {
        let (_, lines) = convert_str("example.com\n", ListFormat::Adguard);

        assert!(lines[0].starts_with("! Generated at"));
        assert_eq!(lines[1], "||example.com^");
    }

    #[test]
    fn deduplicate_and_ignore() {
        let mut infile = tempfile::NamedTempFile::new().unwrap();
        write!(infile, "example.com\nexample.com\nkeep.me\nskipped.org\n").unwrap();

        let outdir = tempfile::tempdir().unwrap();
        let outpath = outdir.path().join("out.txt");

        let source = ListSource::from_path(infile.path()).unwrap();
        let summary = Conversion::new(source, ListFormat::Domains, &outpath)
            .deduplicate(true)
            .ignore_domains(["skipped.org"])
            .run()
            .unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(summary.ignored, 1);

        let content = std::fs::read_to_string(&outpath).unwrap();
        assert!(content.contains("example.com\n"));
        assert!(content.contains("keep.me\n"));
        assert!(!content.contains("skipped.org"));
    }
}
