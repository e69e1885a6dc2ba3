//! Fetch the resource named by a URL field.
//!
//! The body lands in `dest` (default `<source>_data`) as bytes, with the
//! HTTP status and byte count beside it. A failed fetch never fails the
//! record: the message is written to `<source><error_suffix>` and to the
//! record's error list, and the record moves on.

use std::io::Read;
use std::time::Duration;

use sluice_core::error::StageError;
use sluice_core::record::Record;
use sluice_core::stage::{Stage, StageConfig, StageResult, StageSpec};
use tracing::{debug, warn};

pub struct FetchUri {
    name: String,
    source: String,
    dest: String,
    status_field: String,
    size_field: String,
    error_field: String,
    max_size: Option<u64>,
    timeout: Duration,
    client: Option<reqwest::blocking::Client>,
}

struct Fetched {
    status: u16,
    body: Vec<u8>,
}

impl FetchUri {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new()
            .required(&["source"])
            .optional(&[
                "dest",
                "status_code_suffix",
                "size_suffix",
                "error_suffix",
                "max_size",
                "timeout_secs",
            ])
            .validate(config)?;
        let name = config.label("fetch_uri");
        let source = config.require_str("source")?;
        let suffix = |key: &str, default: &str| -> Result<String, StageError> {
            Ok(format!(
                "{}{}",
                source,
                config.get_str(key)?.unwrap_or_else(|| default.to_string())
            ))
        };

        let max_size = match config.get_i64("max_size")? {
            Some(n) if n > 0 => Some(n as u64),
            Some(_) => return Err(StageError::config(&name, "max_size must be positive")),
            None => None,
        };
        let timeout_secs = match config.get_i64("timeout_secs")? {
            Some(n) if n > 0 => n as u64,
            Some(_) => return Err(StageError::config(&name, "timeout_secs must be positive")),
            None => 30,
        };

        Ok(Self {
            dest: config
                .get_str("dest")?
                .unwrap_or_else(|| format!("{}_data", source)),
            status_field: suffix("status_code_suffix", "_status_code")?,
            size_field: suffix("size_suffix", "_size")?,
            error_field: suffix("error_suffix", "_error")?,
            max_size,
            timeout: Duration::from_secs(timeout_secs),
            client: None,
            source,
            name,
        })
    }

    fn fetch(&self, client: &reqwest::blocking::Client, url: &str) -> Result<Fetched, String> {
        let response = client.get(url).send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        match self.max_size {
            Some(limit) => response.take(limit).read_to_end(&mut body),
            None => {
                let mut response = response;
                response.read_to_end(&mut body)
            }
        }
        .map_err(|e| format!("failed to read response body: {}", e))?;
        Ok(Fetched { status, body })
    }
}

impl Stage for FetchUri {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), StageError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| StageError::start(&self.name, e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StageError> {
        self.client = None;
        Ok(())
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| StageError::lifecycle(&self.name, "HTTP client not built; call start() first"))?;
        let Some(url) = record.get_str(&self.source).map(str::to_string) else {
            debug!(record = record.id(), field = %self.source, "no url, skipping");
            return Ok(None);
        };

        match self.fetch(client, &url) {
            Ok(fetched) => {
                record.set_field(&self.status_field, fetched.status as i32)?;
                record.set_field(&self.size_field, fetched.body.len() as i64)?;
                record.set_field(&self.dest, fetched.body)?;
            }
            Err(message) => {
                warn!(record = record.id(), url = %url, error = %message, "fetch failed");
                record.set_field(&self.error_field, message.as_str())?;
                record.log_error(format!("{}: failed to fetch {}: {}", self.name, url, message));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/doc", addr)
    }

    fn started(config: StageConfig) -> FetchUri {
        let mut stage = FetchUri::new(&config.with("source", "url")).unwrap();
        stage.start().unwrap();
        stage
    }

    #[test]
    fn test_fetch_stores_body_and_status() {
        let url = serve_once("hello world");
        let stage = started(StageConfig::new());
        let mut record = Record::new("r");
        record.set_field("url", url.as_str()).unwrap();
        stage.process_record(&mut record).unwrap();
        assert_eq!(record.get_bytes("url_data"), Some(b"hello world".to_vec()));
        assert_eq!(record.get_i64("url_status_code"), Some(200));
        assert_eq!(record.get_i64("url_size"), Some(11));
        assert!(record.errors().is_empty());
    }

    #[test]
    fn test_max_size_truncates() {
        let url = serve_once("hello world");
        let stage = started(StageConfig::new().with("max_size", 5).with("dest", "body"));
        let mut record = Record::new("r");
        record.set_field("url", url.as_str()).unwrap();
        stage.process_record(&mut record).unwrap();
        assert_eq!(record.get_bytes("body"), Some(b"hello".to_vec()));
        assert_eq!(record.get_i64("url_size"), Some(5));
    }

    #[test]
    fn test_failure_is_recorded_not_raised() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let stage = started(StageConfig::new().with("timeout_secs", 2));
        let mut record = Record::new("r");
        record
            .set_field("url", format!("http://{}/gone", addr))
            .unwrap();
        assert!(stage.process_record(&mut record).unwrap().is_none());
        assert!(record.has("url_error"));
        assert!(!record.has("url_data"));
        assert_eq!(record.errors().len(), 1);
    }

    #[test]
    fn test_missing_url_is_noop() {
        let stage = started(StageConfig::new());
        let mut record = Record::new("r");
        stage.process_record(&mut record).unwrap();
        assert!(!record.has("url_error"));
    }

    #[test]
    fn test_config_errors() {
        let base = || StageConfig::new().with("source", "url");
        assert!(FetchUri::new(&base().with("max_size", 0)).err().unwrap().is_config());
        assert!(FetchUri::new(&base().with("timeout_secs", -1)).err().unwrap().is_config());
        assert!(FetchUri::new(&StageConfig::new()).err().unwrap().is_config());
    }
}
