use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::warn;
use url::Url;

const USER_AGENT: &str = concat!(
    "vatican_scraper/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/rcds-dssv/vatican-scraper)"
);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

// Politeness window: random pause before every request.
const MIN_PAUSE_MS: u64 = 350;
const MAX_PAUSE_MS: u64 = 1100;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("retries exhausted for {url} (last status {status})")]
    RetriesExhausted { url: String, status: StatusCode },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A fetched page: the post-redirect URL and its decoded HTML.
///
/// The final URL matters because language-prefixed URLs can silently
/// redirect to a different language tree.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub html: String,
}

/// Blocking HTTP client with politeness pauses, bounded retry and
/// content-based charset detection. Constructed once by the pipeline
/// and passed down; holds no other state.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// GET a URL, following redirects, retrying transient failures.
    pub fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        for attempt in 0..=MAX_RETRIES {
            polite_pause();

            let response = match self.client.get(url).send() {
                Ok(r) => r,
                Err(e) if is_transient(&e) && attempt < MAX_RETRIES => {
                    backoff(url, attempt, None);
                    continue;
                }
                Err(e) => {
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        source: e,
                    })
                }
            };

            let status = response.status();
            if is_retryable_status(status) {
                if attempt < MAX_RETRIES {
                    backoff(url, attempt, Some(status));
                    continue;
                }
                return Err(FetchError::RetriesExhausted {
                    url: url.to_string(),
                    status,
                });
            }
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                });
            }

            let final_url = response.url().clone();
            let header_charset = charset_from_headers(&response);
            let bytes = response.bytes().map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: e,
            })?;
            let html = decode_body(&bytes, header_charset.as_deref());
            return Ok(FetchedPage { final_url, html });
        }
        unreachable!("retry loop always returns")
    }
}

fn polite_pause() {
    let ms = fastrand::u64(MIN_PAUSE_MS..=MAX_PAUSE_MS);
    thread::sleep(Duration::from_millis(ms));
}

fn backoff(url: &str, attempt: u32, status: Option<StatusCode>) {
    let wait = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
    match status {
        Some(s) => warn!(
            "HTTP {} on {} (attempt {}/{}), backing off {:.1}s",
            s,
            url,
            attempt + 1,
            MAX_RETRIES,
            wait.as_secs_f64()
        ),
        None => warn!(
            "Network error on {} (attempt {}/{}), backing off {:.1}s",
            url,
            attempt + 1,
            MAX_RETRIES,
            wait.as_secs_f64()
        ),
    }
    thread::sleep(wait);
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn charset_from_headers(response: &reqwest::blocking::Response) -> Option<String> {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)?
        .to_str()
        .ok()?;
    content_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("charset="))
        .next()
        .map(|cs| cs.trim_matches('"').to_ascii_lowercase())
}

/// Decode a response body, distrusting unreliable server headers.
///
/// The site serves many old pages with a Latin-1 header (or none at all)
/// while the bytes are actually UTF-8, so an ISO-8859/ASCII/missing
/// charset triggers content-based re-detection.
pub fn decode_body(bytes: &[u8], header_charset: Option<&str>) -> String {
    if let Some(cs) = header_charset {
        let trustworthy =
            !cs.is_empty() && !cs.contains("8859") && cs != "ascii" && cs != "us-ascii";
        if trustworthy {
            if let Some(enc) = encoding_rs::Encoding::for_label(cs.as_bytes()) {
                let (text, _, _) = enc.decode(bytes);
                return text.into_owned();
            }
        }
    }

    if let Some(declared) = sniff_meta_charset(bytes) {
        if let Some(enc) = encoding_rs::Encoding::for_label(declared.as_bytes()) {
            let (text, _, _) = enc.decode(bytes);
            return text.into_owned();
        }
    }

    let (utf8_text, _, utf8_malformed) = encoding_rs::UTF_8.decode(bytes);
    if !utf8_malformed {
        return utf8_text.into_owned();
    }
    // Windows-1252 maps every byte, so it wins whenever UTF-8 had to
    // substitute replacement characters.
    let (win_text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    win_text.into_owned()
}

/// Look for `<meta charset=...>` / `http-equiv` declarations in the first
/// 1024 bytes, which are ASCII-safe in every encoding we care about.
fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let head_len = bytes.len().min(1024);
    let head: String = bytes[..head_len]
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { ' ' })
        .collect();
    let lower = head.to_ascii_lowercase();
    let idx = lower.find("charset=")?;
    let rest = &lower[idx + "charset=".len()..];
    let value: String = rest
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for code in [429u16, 500, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200u16, 301, 404, 403] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn decode_trusts_utf8_header() {
        let s = "è il Papa".as_bytes();
        assert_eq!(decode_body(s, Some("utf-8")), "è il Papa");
    }

    #[test]
    fn decode_redetects_over_latin1_header() {
        // UTF-8 bytes mislabelled as ISO-8859-1 must still come out as UTF-8.
        let s = "Città del Vaticano".as_bytes();
        assert_eq!(decode_body(s, Some("iso-8859-1")), "Città del Vaticano");
    }

    #[test]
    fn decode_honors_meta_charset() {
        let mut bytes = b"<html><head><meta charset=\"windows-1252\"></head><body>".to_vec();
        bytes.push(0xE8); // e-grave in 1252
        bytes.extend_from_slice(b"</body></html>");
        let text = decode_body(&bytes, None);
        assert!(text.contains('\u{e8}'));
    }

    #[test]
    fn decode_falls_back_to_1252_when_utf8_breaks() {
        // Raw Latin-1 bytes with no header and no meta declaration.
        let bytes = vec![b'R', b'o', b'm', b'a', b' ', 0xE9];
        let text = decode_body(&bytes, None);
        assert_eq!(text, "Roma é");
        assert!(!text.contains('\u{FFFD}'));
    }

    #[test]
    fn sniff_finds_http_equiv_charset() {
        let head = b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\">";
        assert_eq!(sniff_meta_charset(head).as_deref(), Some("iso-8859-1"));
    }
}
