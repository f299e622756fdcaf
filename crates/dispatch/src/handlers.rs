//! Task handlers bridging the runner to the outbound and thought sinks.

use crate::runner::TaskHandler;
use chattermill_core::error::Error;
use chattermill_core::outbound::OutboundSink;
use chattermill_core::task::TaskPayload;
use chattermill_core::thought::ThoughtSink;
use std::sync::Arc;
use tracing::debug;

/// Delivers `deliver-reply` tasks through the outbound sink.
pub struct DeliverReplyHandler {
    sink: Arc<dyn OutboundSink>,
}

impl DeliverReplyHandler {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self { sink }
    }
}

#[async_trait::async_trait]
impl TaskHandler for DeliverReplyHandler {
    async fn handle(&self, payload: &TaskPayload) -> chattermill_core::Result<()> {
        let TaskPayload::DeliverReply(reply) = payload else {
            return Err(Error::Internal(
                "deliver-reply handler received a foreign payload".into(),
            ));
        };
        debug!(target = reply.target(), len = reply.content().len(), "Delivering reply");
        self.sink.deliver(reply.clone()).await?;
        Ok(())
    }
}

/// Appends `record-thought` tasks through the thought sink.
pub struct RecordThoughtHandler {
    sink: Arc<dyn ThoughtSink>,
}

impl RecordThoughtHandler {
    pub fn new(sink: Arc<dyn ThoughtSink>) -> Self {
        Self { sink }
    }
}

#[async_trait::async_trait]
impl TaskHandler for RecordThoughtHandler {
    async fn handle(&self, payload: &TaskPayload) -> chattermill_core::Result<()> {
        let TaskPayload::RecordThought(record) = payload else {
            return Err(Error::Internal(
                "record-thought handler received a foreign payload".into(),
            ));
        };
        self.sink.record(record.clone()).await?;
        Ok(())
    }
}
