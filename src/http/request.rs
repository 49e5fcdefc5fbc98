//! HTTP/1.1 request head parser.
//!
//! Reads the request line and headers up to the first empty line. The body,
//! if any, is left unread. Header names are lower-cased so lookups are
//! case-insensitive.

use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest accepted request or header line, including the line ending.
pub const MAX_LINE_LEN: u64 = 8 * 1024;

/// Most header lines read before giving up on a request.
pub const MAX_HEADERS: usize = 100;

/// Parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Header lookup by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Integer query parameter, `default` when missing or not a number.
    pub fn query_i64(&self, name: &str, default: i64) -> i64 {
        self.query_param(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// Request parsing errors
#[derive(Debug)]
pub enum ParseError {
    /// Connection closed or sent an empty line before any request line
    Empty,
    /// A line exceeded `MAX_LINE_LEN`, or there were too many headers
    TooLarge,
    Io(std::io::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "Empty request"),
            ParseError::TooLarge => write!(f, "Request head too large"),
            ParseError::Io(e) => write!(f, "I/O error reading request: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::Io(e)
    }
}

/// Read one request head from `reader`.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = match read_line(reader).await? {
        Some(line) if !line.is_empty() => line,
        _ => return Err(ParseError::Empty),
    };

    let mut headers = HashMap::new();
    let mut count = 0;
    while let Some(line) = read_line(reader).await? {
        if line.is_empty() {
            break;
        }
        count += 1;
        if count > MAX_HEADERS {
            return Err(ParseError::TooLarge);
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
            }
        }
    }

    let mut parts = request_line.splitn(3, ' ');
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().filter(|t| !t.is_empty()).unwrap_or("/");

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    Ok(Request {
        method,
        path: path.to_string(),
        query: parse_query(query),
        headers,
    })
}

/// Read a line without its `\r\n` or `\n` terminator.
///
/// Returns `None` at end of stream.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    let n = reader.take(MAX_LINE_LEN).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n as u64 == MAX_LINE_LEN {
        return Err(ParseError::TooLarge);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Parse `a=1&b=two` into a map. Keys and values are percent-decoded;
/// a pair without `=` maps to an empty value.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (decode_component(key), decode_component(value)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

/// Form-style decoding: `+` is a space, `%XX` an escaped byte.
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
