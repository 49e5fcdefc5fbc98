//! HTTP response formatting.
//!
//! Every response closes the connection, so the head always carries
//! `Connection: close` and an exact `Content-Length`.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Status codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    SwitchingProtocols,
    Ok,
    NotFound,
    MethodNotAllowed,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::SwitchingProtocols => 101,
            Status::Ok => 200,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::SwitchingProtocols => "Switching Protocols",
            Status::Ok => "OK",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
        }
    }
}

/// A complete, buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Response {
    pub fn ok(content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            status: Status::Ok,
            content_type,
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            content_type: TEXT_PLAIN,
            body: Bytes::from_static(b"Not Found\n"),
        }
    }

    pub fn method_not_allowed() -> Self {
        Self {
            status: Status::MethodNotAllowed,
            content_type: TEXT_PLAIN,
            body: Bytes::from_static(b"Method Not Allowed"),
        }
    }

    /// Head and body as one buffer.
    pub fn encode(&self) -> BytesMut {
        let mut out = head(self.status, self.content_type, self.body.len() as u64);
        out.put_slice(&self.body);
        out
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }
}

/// Status line and headers for a body of `content_length` bytes.
pub fn head(status: Status, content_type: &str, content_length: u64) -> BytesMut {
    let text = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status.code(),
        status.reason(),
        content_type,
        content_length
    );
    BytesMut::from(text.as_bytes())
}
