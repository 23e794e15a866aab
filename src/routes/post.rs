//! `/post`: an upload stream that is logged and ended after a fixed delay

use crate::http::h2::{ErrorCode, StreamContext, StreamHandler, Subscriptions};
use crate::http::Headers;
use log::{debug, info};
use std::time::Duration;

/// Final chunk written when the delay expires
pub const FINISHED: &str = "POST-FINISHED";

/// Post ingestor
#[derive(Debug)]
pub struct Post {
    delay: Duration,
}

impl Post {
    pub fn new(delay: Duration) -> Self {
        Post { delay }
    }
}

impl StreamHandler for Post {
    fn on_open(&mut self, _headers: &Headers, ctx: &mut StreamContext) -> Subscriptions {
        ctx.respond(200, &[]);
        ctx.arm_timer(self.delay);
        Subscriptions::all()
    }

    fn on_data(&mut self, data: &[u8], _ctx: &mut StreamContext) {
        info!("post data: {}", String::from_utf8_lossy(data));
    }

    fn on_close(&mut self, _ctx: &mut StreamContext) {
        info!("event stream closed");
    }

    // Logged only; the pending timer still fires.
    fn on_error(&mut self, code: ErrorCode, _ctx: &mut StreamContext) {
        info!("event stream error: {}", code);
    }

    fn on_timer(&mut self, ctx: &mut StreamContext) {
        info!("finish the post stream");
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
    use std::cell::RefCell;

    thread_local! {
        static LINES: RefCell<Vec<String>> = RefCell::new(Vec::new());
    }

    /// Keeps this module's info lines, per test thread
    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Info && metadata.target() == "h2longpoll::routes::post"
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                LINES.with(|lines| lines.borrow_mut().push(record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    fn capture_lines() -> Vec<String> {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Info);
        LINES.with(|lines| lines.borrow_mut().drain(..).collect())
    }

    #[test]
    fn test_open_responds_and_subscribes_before_timer() {
        let mut handler = Post::new(Duration::from_secs(5));
        let mut ctx = StreamContext::new(3, true);

        let subscriptions = handler.on_open(&Headers::new(), &mut ctx);

        assert_eq!(subscriptions, Subscriptions::all());
        assert_eq!(
            ctx.into_commands(),
            vec![
                StreamCommand::Respond {
                    status: 200,
                    headers: vec![],
                },
                StreamCommand::ArmTimer(Duration::from_secs(5)),
            ]
        );
    }

    #[test]
    fn test_events_issue_no_commands() {
        let mut handler = Post::new(Duration::from_secs(5));
        let mut ctx = StreamContext::new(3, true);

        handler.on_data(b"hello", &mut ctx);
        handler.on_error(ErrorCode::Cancel, &mut ctx);
        handler.on_close(&mut ctx);

        assert!(ctx.commands().is_empty());
    }

    #[test]
    fn test_events_logged_in_arrival_order() {
        capture_lines();
        let mut handler = Post::new(Duration::from_secs(5));
        let mut ctx = StreamContext::new(3, true);

        handler.on_data(b"hello", &mut ctx);
        handler.on_data(b" world", &mut ctx);
        handler.on_error(ErrorCode::Cancel, &mut ctx);
        handler.on_close(&mut ctx);
        handler.on_timer(&mut ctx);

        assert_eq!(
            capture_lines(),
            vec![
                "post data: hello",
                "post data:  world",
                "event stream error: CANCEL (0x8)",
                "event stream closed",
                "finish the post stream",
            ]
        );
    }

    #[test]
    fn test_timer_ends_stream() {
        let mut handler = Post::new(Duration::from_secs(5));
        let mut ctx = StreamContext::new(3, true);

        handler.on_timer(&mut ctx);

        assert_eq!(
            ctx.into_commands(),
            vec![StreamCommand::Data {
                payload: Bytes::from_static(b"POST-FINISHED"),
                end_stream: true,
            }]
        );
    }

    #[test]
    fn test_timer_after_reset_writes_nothing() {
        let mut handler = Post::new(Duration::from_secs(5));
        let mut ctx = StreamContext::new(3, false);

        handler.on_timer(&mut ctx);

        assert!(ctx.commands().is_empty());
    }
}
