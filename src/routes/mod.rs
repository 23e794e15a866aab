//! Request routing
//!
//! Each new stream is matched on the path component of its `:path` header
//! against a fixed route table. Matched streams get a fresh handler; anything
//! else is logged and left unanswered.

pub mod long_polling;
pub mod post;

use crate::http::h2::{Dispatch, StreamHandler, StreamId};
use crate::http::Headers;
use log::info;
use std::time::Duration;

pub use long_polling::{LongPolling, BOUNDARY};
pub use post::Post;

/// Known request paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    LongPolling,
    Post,
}

/// Route table, matched exactly and case-sensitively
pub const ROUTES: &[(&str, Route)] = &[("/longPolling", Route::LongPolling), ("/post", Route::Post)];

impl Route {
    /// Look up a route by path component
    pub fn from_path(path: &str) -> Option<Route> {
        ROUTES
            .iter()
            .find(|(candidate, _)| *candidate == path)
            .map(|(_, route)| *route)
    }
}

/// Path component of a `:path` value: everything before the first `?` or
/// `#`
///
/// The path is taken as sent; dot-segments and backslashes are not
/// rewritten. `None` for values that do not start with `/`.
pub fn request_path(raw: &str) -> Option<&str> {
    if !raw.starts_with('/') {
        return None;
    }
    raw.split(|c: char| c == '?' || c == '#').next()
}

/// Delays after which each handler ends its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub long_poll_delay: Duration,
    pub post_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            long_poll_delay: Duration::from_secs(10),
            post_delay: Duration::from_secs(5),
        }
    }
}

/// Dispatches new streams through the route table
#[derive(Debug, Clone, Default)]
pub struct Router {
    timings: Timings,
}

impl Router {
    pub fn new(timings: Timings) -> Self {
        Router { timings }
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }
}

impl Dispatch for Router {
    fn dispatch(&self, stream_id: StreamId, headers: &Headers) -> Option<Box<dyn StreamHandler>> {
        info!("stream {}: new request {}", stream_id, headers);

        let path = headers.path().and_then(request_path);
        match path.and_then(Route::from_path) {
            Some(Route::LongPolling) => Some(Box::new(LongPolling::new(self.timings.long_poll_delay))),
            Some(Route::Post) => Some(Box::new(Post::new(self.timings.post_delay))),
            None => {
                info!("invalid request: {}", path.or(headers.path()).unwrap_or("<none>"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Headers {
        [(":method", "GET"), (":scheme", "https"), (":path", path)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_request_path_strips_query_and_fragment() {
        assert_eq!(request_path("/longPolling?x=1"), Some("/longPolling"));
        assert_eq!(request_path("/post#frag"), Some("/post"));
        assert_eq!(request_path("/post?a=1#b?c"), Some("/post"));
        assert_eq!(request_path("/"), Some("/"));
    }

    #[test]
    fn test_request_path_rejects_non_paths() {
        assert_eq!(request_path(""), None);
        assert_eq!(request_path("longPolling"), None);
        assert_eq!(request_path("*"), None);
    }

    #[test]
    fn test_request_path_is_not_normalized() {
        assert_eq!(request_path("/x/../post"), Some("/x/../post"));
        assert_eq!(request_path("/./longPolling"), Some("/./longPolling"));
        assert_eq!(request_path("//post"), Some("//post"));
        assert_eq!(request_path("/\\post"), Some("/\\post"));
    }

    #[test]
    fn test_route_table() {
        assert_eq!(Route::from_path("/longPolling"), Some(Route::LongPolling));
        assert_eq!(Route::from_path("/post"), Some(Route::Post));
        assert_eq!(Route::from_path("/longpolling"), None);
        assert_eq!(Route::from_path("/post/"), None);
    }

    #[test]
    fn test_dispatch_matches_path_component() {
        let router = Router::default();
        assert!(router.dispatch(1, &request("/longPolling?wait=1")).is_some());
        assert!(router.dispatch(3, &request("/post#top")).is_some());
        assert!(router.dispatch(5, &request("/other")).is_none());
        assert!(router.dispatch(7, &Headers::new()).is_none());
    }

    #[test]
    fn test_dot_segments_and_doubled_slashes_unmatched() {
        let router = Router::default();
        for path in ["/x/../post", "/./post", "//post", "/./longPolling", "/post/."] {
            assert!(router.dispatch(1, &request(path)).is_none(), "{} matched", path);
        }
    }

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();
        assert_eq!(timings.long_poll_delay, Duration::from_secs(10));
        assert_eq!(timings.post_delay, Duration::from_secs(5));
    }
}
