use crate::error::{Result, TidyboxError};
use log::*;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Read, path::Path, time::Duration};
use url::Url;

const HTTP_READ_TIMEOUT: u64 = 10_000;

/// A blocklist input source: a local file, or an `http(s)://` or `file://` URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSource {
    url: Url,
}

impl ListSource {
    /// Returns a new source for the given URL.
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Parses a source from a string. Anything that isn't an absolute URL is treated as a local
    /// file path.
    pub fn parse(s: &str) -> Result<Self> {
        match Url::parse(s) {
            Ok(url) => Ok(Self { url }),
            Err(url::ParseError::RelativeUrlWithoutBase) => Self::from_path(s),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a source for a local file path.
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        // file URLs have to be absolute
        let absolute = std::fs::canonicalize(path)?;
        let url = Url::from_file_path(&absolute)
            .map_err(|()| TidyboxError::InvalidFilePath(path.display().to_string()))?;
        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Returns a tuple of the possible length of the content, and a reader for the content.
    ///
    /// When reading from an HTTP source, the server's response may use chunk transfer encoding in
    /// which case the content length cannot be determined ahead of time.
    pub(crate) fn read(&self, connect_timeout: u64) -> Result<(Option<u64>, Box<dyn Read>)> {
        match self.url.scheme() {
            "http" | "https" => {
                let agent = ureq::AgentBuilder::new()
                    .timeout_connect(Duration::from_millis(connect_timeout))
                    .timeout_read(Duration::from_millis(HTTP_READ_TIMEOUT))
                    .build();

                let resp: ureq::Response = match agent.get(self.url.as_str()).call() {
                    Ok(resp) => resp,
                    Err(ureq::Error::Status(code, resp)) => {
                        return Err(TidyboxError::RequestFailed(code, resp.into_string()?))
                    }
                    Err(e) => return Err(e.into()),
                };

                // the header names may or may not be lowercased
                let len = resp
                    .header("Content-Length")
                    .or_else(|| resp.header("content-length"))
                    .map(str::parse::<u64>)
                    .transpose()?;

                if let Some(len) = len {
                    debug!("Got response status {} with length {}", resp.status(), len);
                } else {
                    debug!("Got response status {} with indeterminate length", resp.status());
                }

                Ok((len, Box::new(resp.into_reader()) as Box<dyn Read>))
            }
            "file" => {
                let path = match self.url.to_file_path() {
                    Ok(path) => path,
                    Err(()) => {
                        return Err(TidyboxError::InvalidFilePath(self.url.as_str().to_string()));
                    }
                };

                let file = File::open(&path)?;
                let meta = file.metadata()?;
                Ok((Some(meta.len()), Box::new(file) as Box<dyn Read>))
            }
            scheme => Err(TidyboxError::UnsupportedUrlScheme(scheme.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn plain_path_becomes_file_url() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, "example.com").unwrap();

        let source = ListSource::parse(input.path().to_str().unwrap()).unwrap();
        assert!(source.as_str().starts_with("file://"));

        let (len, mut reader) = source.read(1000).unwrap();
        assert_eq!(len, Some("example.com\n".len() as u64));

        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "example.com\n");
    }

    #[test]
    fn unsupported_scheme_is_an_error() {
        let source = ListSource::parse("ftp://example.com/list.txt").unwrap();
        assert!(matches!(
            source.read(1000),
            Err(TidyboxError::UnsupportedUrlScheme(scheme)) if scheme == "ftp"
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ListSource::parse("/definitely/not/a/real/file.txt").is_err());
    }
}
