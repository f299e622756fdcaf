//! `chattermill chat` — drive the full pipeline from the terminal.
//!
//! Each stdin line becomes an inbound event; lines starting with `/` are
//! command events (dispatched only if `admin.admin_id` matches the local
//! sender id `operator`). Replies print to stdout as the task runner
//! delivers them.

use async_trait::async_trait;
use chattermill_agent::{FileThoughtSink, Orchestrator};
use chattermill_config::AppConfig;
use chattermill_core::error::DeliveryError;
use chattermill_core::message::{InboundMessage, MessageKind};
use chattermill_core::outbound::{OutboundReply, OutboundSink};
use chattermill_llm::HttpChatBackend;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Prints delivered replies to stdout.
struct StdoutSink;

#[async_trait]
impl OutboundSink for StdoutSink {
    async fn deliver(&self, reply: OutboundReply) -> Result<(), DeliveryError> {
        match &reply {
            OutboundReply::Group {
                group_id,
                content,
                mention,
            } => match mention {
                Some(user) => println!("[{group_id}] @{user} {content}"),
                None => println!("[{group_id}] {content}"),
            },
            OutboundReply::Direct { content, .. } => println!("{content}"),
        }
        Ok(())
    }
}

const LOCAL_SENDER: &str = "operator";

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let backend = Arc::new(HttpChatBackend::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
    ));
    let sink = Arc::new(StdoutSink);
    let thoughts = Arc::new(FileThoughtSink::from_config_path(&config.thought_log.path));

    let orchestrator =
        Orchestrator::initialize(&config, backend, sink, thoughts).await?;

    println!("chattermill ready — type messages, /commands, Ctrl-D to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let message = to_inbound(trimmed);
                orchestrator.handle_event(message).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

fn to_inbound(line: &str) -> InboundMessage {
    match line.strip_prefix('/') {
        Some(command) => {
            let mut message = InboundMessage::text(LOCAL_SENDER, command);
            message.kind = MessageKind::Command;
            message
        }
        None => InboundMessage::text(LOCAL_SENDER, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_lines_become_commands() {
        let message = to_inbound("/queue status");
        assert_eq!(message.kind, MessageKind::Command);
        assert_eq!(message.content, "queue status");
    }

    #[test]
    fn plain_lines_stay_text() {
        let message = to_inbound("hello there");
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.content, "hello there");
    }
}
