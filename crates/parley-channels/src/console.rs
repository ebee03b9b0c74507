use async_stream::stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use parley_core::config::ConsoleConfig;
use parley_core::Event;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::channel::{Channel, EventSource};
use crate::error::ChannelError;
use crate::types::{ChannelStatus, OutboundMessage};

/// Reads events from newline-delimited input.
///
/// A line starting with `{` is parsed as a JSON event; any other non-blank
/// line becomes a private message from the configured console user.
/// Malformed JSON lines are logged and skipped.
pub struct ConsoleSource<R> {
    lines: FramedRead<R, LinesCodec>,
    user_id: u64,
    self_id: u64,
    next_message_id: i64,
}

impl<R> ConsoleSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, config: &ConsoleConfig) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new()),
            user_id: config.user_id,
            self_id: config.self_id,
            next_message_id: 1,
        }
    }

    fn parse_line(&mut self, line: &str) -> Option<Event> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.starts_with('{') {
            return match serde_json::from_str::<Event>(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %ChannelError::from(e), "skipping malformed console event");
                    None
                }
            };
        }
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        Some(
            Event::private(self.user_id, line)
                .with_self_id(self.self_id)
                .with_message_id(message_id),
        )
    }

    /// Adapt the source into a `Stream` of events.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send
    where
        R: 'static,
    {
        stream! {
            let mut source = self;
            while let Some(event) = source.next_event().await {
                yield event;
            }
        }
    }
}

#[async_trait]
impl<R> EventSource for ConsoleSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<Event> {
        while let Some(line) = self.lines.next().await {
            match line {
                Ok(line) => {
                    if let Some(event) = self.parse_line(&line) {
                        return Some(event);
                    }
                }
                Err(e) => {
                    warn!(error = %ChannelError::from(e), "console input failed");
                    return None;
                }
            }
        }
        debug!("console input exhausted");
        None
    }
}

/// Writes every outbound message as one JSON line.
pub struct ConsoleChannel<W> {
    writer: Mutex<W>,
    status: ChannelStatus,
}

impl<W> ConsoleChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            status: ChannelStatus::Disconnected,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl ConsoleChannel<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Channel for ConsoleChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.status = ChannelStatus::Connected;
        info!(channel = "console", "channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.writer.get_mut().flush().await?;
        self.status = ChannelStatus::Disconnected;
        info!(channel = "console", "channel disconnected");
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        if self.status != ChannelStatus::Connected {
            return Err(ChannelError::NotConnected(self.name().to_string()));
        }
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        debug!(channel = "console", target = ?msg.target, "message sent");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status
    }
}
