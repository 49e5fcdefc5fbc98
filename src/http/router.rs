//! Maps a parsed request to the operation that serves it.

use crate::http::request::Request;

/// Path of the signaling endpoint.
pub const WEBSOCKET_PATH: &str = "/ws";

/// Operations the server knows how to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Root,
    Hello,
    Compute,
    Io,
    Metrics,
    WebSocketUpgrade,
    NotFound,
    MethodNotAllowed,
}

/// Pick the route for `request`.
///
/// A WebSocket upgrade on `/ws` is matched first; after that any method
/// other than GET is refused before the path is looked at.
pub fn route(request: &Request) -> Route {
    let upgrade = request
        .header("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if upgrade && request.path == WEBSOCKET_PATH {
        return Route::WebSocketUpgrade;
    }

    if !request.method.eq_ignore_ascii_case("GET") {
        return Route::MethodNotAllowed;
    }

    match request.path.as_str() {
        "/" => Route::Root,
        "/hello" => Route::Hello,
        "/compute" => Route::Compute,
        "/io" => Route::Io,
        "/metrics" => Route::Metrics,
        _ => Route::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(method: &str, path: &str, headers: &[(&str, &str)]) -> Request {
        Request {
            method: method.to_string(),
            path: path.to_string(),
            query: HashMap::new(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_get_routes() {
        assert_eq!(route(&request("GET", "/", &[])), Route::Root);
        assert_eq!(route(&request("GET", "/hello", &[])), Route::Hello);
        assert_eq!(route(&request("get", "/compute", &[])), Route::Compute);
        assert_eq!(route(&request("GET", "/io", &[])), Route::Io);
        assert_eq!(route(&request("GET", "/metrics", &[])), Route::Metrics);
        assert_eq!(route(&request("GET", "/nope", &[])), Route::NotFound);
        assert_eq!(route(&request("GET", "/hello/", &[])), Route::NotFound);
    }

    #[test]
    fn test_method_not_allowed() {
        assert_eq!(route(&request("POST", "/hello", &[])), Route::MethodNotAllowed);
        assert_eq!(route(&request("DELETE", "/nope", &[])), Route::MethodNotAllowed);
    }

    #[test]
    fn test_websocket_upgrade() {
        let upgrade = [("upgrade", "WebSocket")];
        assert_eq!(route(&request("GET", "/ws", &upgrade)), Route::WebSocketUpgrade);
        assert_eq!(route(&request("POST", "/ws", &upgrade)), Route::WebSocketUpgrade);
        // no upgrade header: plain GET of an unknown path
        assert_eq!(route(&request("GET", "/ws", &[])), Route::NotFound);
        // upgrade elsewhere is ignored
        assert_eq!(route(&request("GET", "/hello", &upgrade)), Route::Hello);
        assert_eq!(
            route(&request("GET", "/ws", &[("upgrade", "h2c")])),
            Route::NotFound
        );
    }
}
