//! Document change sources.
//!
//! A source pushes raw notifications to registered handlers; how it observes
//! the remote document (polling, mutation events, a pipe) is its own
//! business. The reconciler only ever sees [`RawNotification`]s.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::engine::RawNotification;

/// Handler invoked for every change notification, in delivery order.
pub type ChangeHandler = Box<dyn FnMut(RawNotification) + Send>;
/// Handler invoked once when the source stops delivering.
pub type EndHandler = Box<dyn FnOnce(SourceEnd) + Send>;

/// Why a source stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEnd {
    /// Natural end of input.
    Finished,
    /// The source failed; the owner may re-subscribe.
    Failed(String),
}

/// Push-style producer of raw document notifications.
pub trait DocumentChangeSource: Send {
    fn on_change(&mut self, handler: ChangeHandler);
    fn on_end(&mut self, handler: EndHandler);
    /// Start delivering. Handlers must be registered before this call.
    fn start(self: Box<Self>) -> JoinHandle<()>;
}

/// Reads newline-delimited JSON notifications
/// (`{"context": ..., "content": ..., "producing": ...}`) from a stream.
pub struct LinesSource<R> {
    reader: R,
    change: Option<ChangeHandler>,
    end: Option<EndHandler>,
}

impl<R> LinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            change: None,
            end: None,
        }
    }
}

impl<R> DocumentChangeSource for LinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn on_change(&mut self, handler: ChangeHandler) {
        self.change = Some(handler);
    }

    fn on_end(&mut self, handler: EndHandler) {
        self.end = Some(handler);
    }

    fn start(self: Box<Self>) -> JoinHandle<()> {
        let Self {
            reader,
            mut change,
            end,
        } = *self;
        tokio::spawn(async move {
            let mut lines = reader.lines();
            let outcome = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RawNotification>(line) {
                            Ok(notification) => {
                                if let Some(handler) = change.as_mut() {
                                    handler(notification);
                                }
                            }
                            Err(e) => warn!(error = %e, "Skipping malformed source line"),
                        }
                    }
                    Ok(None) => break SourceEnd::Finished,
                    Err(e) => break SourceEnd::Failed(e.to_string()),
                }
            };
            debug!(?outcome, "Line source ended");
            if let Some(handler) = end {
                handler(outcome);
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn delivers_parsed_lines_then_ends() {
        let input = concat!(
            r#"{"context":"X","content":"Hel","producing":true}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"context":"X","content":"Hello","producing":false,"extra":1}"#,
            "\n",
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(Mutex::new(None));

        let mut source = Box::new(LinesSource::new(tokio::io::BufReader::new(input.as_bytes())));
        let sink = Arc::clone(&seen);
        source.on_change(Box::new(move |n| sink.lock().unwrap().push(n)));
        let end_sink = Arc::clone(&ended);
        source.on_end(Box::new(move |e| *end_sink.lock().unwrap() = Some(e)));

        source.start().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                RawNotification::new("X", "Hel", true),
                RawNotification::new("X", "Hello", false),
            ]
        );
        assert_eq!(*ended.lock().unwrap(), Some(SourceEnd::Finished));
    }
}
