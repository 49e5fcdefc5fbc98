//! Minimal HTTP/1.1 support: request head parsing, routing and
//! connection-closing responses.
//!
//! Only GET is served and there is no keep-alive; one request per
//! connection.

pub mod request;
pub mod response;
pub mod router;

pub use request::{read_request, ParseError, Request};
pub use response::Response;
pub use router::{route, Route};
