//! `/longPolling`: a multipart response that stays open for a fixed delay

use crate::http::h2::{StreamContext, StreamHandler, Subscriptions};
use crate::http::Headers;
use log::{debug, info};
use std::time::Duration;

/// Multipart boundary shared by every long-polling response
pub const BOUNDARY: &str = "example-boundary-1234";

/// Final chunk written when the delay expires
pub const FINISHED: &str = "GET-FINISHED";

/// Long-polling responder
///
/// Answers with a `multipart/related` response, writes one boundary line and
/// ends the stream once `delay` has passed.
#[derive(Debug)]
pub struct LongPolling {
    delay: Duration,
}

impl LongPolling {
    pub fn new(delay: Duration) -> Self {
        LongPolling { delay }
    }

    /// `content-type` value of every long-polling response
    pub fn content_type() -> String {
        format!("multipart/related; boundary={}", BOUNDARY)
    }
}

impl StreamHandler for LongPolling {
    fn on_open(&mut self, _headers: &Headers, ctx: &mut StreamContext) -> Subscriptions {
        let content_type = Self::content_type();
        ctx.respond(200, &[("content-type", content_type.as_str())]);
        ctx.write(format!("--{}\r", BOUNDARY));
        ctx.arm_timer(self.delay);
        Subscriptions::none()
    }

    fn on_timer(&mut self, ctx: &mut StreamContext) {
        info!("finish the get stream");
        if ctx.is_writable() {
            ctx.end(FINISHED);
        } else {
            debug!("stream {}: already closed, {} not sent", ctx.stream_id(), FINISHED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::StreamCommand;
    use bytes::Bytes;

    #[test]
    fn test_open_responds_writes_boundary_and_arms_timer() {
        let mut handler = LongPolling::new(Duration::from_secs(10));
        let mut ctx = StreamContext::new(1, true);

        let subscriptions = handler.on_open(&Headers::new(), &mut ctx);

        assert_eq!(subscriptions, Subscriptions::none());
        assert_eq!(
            ctx.into_commands(),
            vec![
                StreamCommand::Respond {
                    status: 200,
                    headers: vec![(
                        "content-type".into(),
                        "multipart/related; boundary=example-boundary-1234".into()
                    )],
                },
                StreamCommand::Data {
                    payload: Bytes::from_static(b"--example-boundary-1234\r"),
                    end_stream: false,
                },
                StreamCommand::ArmTimer(Duration::from_secs(10)),
            ]
        );
    }

    #[test]
    fn test_timer_ends_stream() {
        let mut handler = LongPolling::new(Duration::from_secs(10));
        let mut ctx = StreamContext::new(1, true);

        handler.on_timer(&mut ctx);

        assert_eq!(
            ctx.into_commands(),
            vec![StreamCommand::Data {
                payload: Bytes::from_static(b"GET-FINISHED"),
                end_stream: true,
            }]
        );
    }

    #[test]
    fn test_timer_on_closed_stream_writes_nothing() {
        let mut handler = LongPolling::new(Duration::from_secs(10));
        let mut ctx = StreamContext::new(1, false);

        handler.on_timer(&mut ctx);

        assert!(ctx.commands().is_empty());
    }
}
