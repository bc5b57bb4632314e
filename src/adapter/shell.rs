//! Shell message adapter: stdin in, stdout out. The default message slot.

use crate::adapter::traits::{Adapter, MessageAdapter};
use crate::bot::Bot;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::message::{Message, Room, User};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Reads lines from stdin and prints dispatched envelopes to stdout.
pub struct ShellAdapter {
    bot_name: String,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ShellAdapter {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            reader: Mutex::new(None),
        }
    }

    fn shell_user() -> User {
        User::new("shell-user", "user").in_room("shell")
    }

    fn shell_room() -> Room {
        Room::new("shell", "shell")
    }
}

#[async_trait]
impl Adapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    async fn start(&self, bot: Arc<Bot>) -> Result<()> {
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let message =
                            Message::text(Self::shell_user(), Self::shell_room(), line);
                        bot.receive(message).await;
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(%error, "shell stdin read failed");
                        break;
                    }
                }
            }
            tracing::debug!("shell input closed");
        });
        *self.reader.lock().unwrap() = Some(handle);
        tracing::info!("shell adapter started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
        tracing::info!("shell adapter shut down");
        Ok(())
    }
}

#[async_trait]
impl MessageAdapter for ShellAdapter {
    async fn dispatch(&self, envelope: &Envelope) -> Result<()> {
        for string in &envelope.strings {
            println!("{}> {}", self.bot_name, string);
        }
        Ok(())
    }
}
