//! Durable event stream on top of NATS JetStream.
//!
//! [`EventPublisher`] owns stream auto-creation and publication.
//! [`StreamConsumer`] owns the durable pull-consumer fetch loop. Both are
//! thin wrappers: `async-nats` already speaks the protocol this pipeline
//! needs, so there is no custom wire format here beyond the subject
//! naming convention (`github.<domain>.<action>`).

use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::consumer::{pull::Config as PullConfig, AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{Config as StreamConfig, DiscardPolicy, RetentionPolicy};
use async_nats::jetstream::Context as JetStreamContext;
use futures_util::StreamExt;

pub const STREAM_NAME: &str = "GITHUB_EVENTS";
pub const STREAM_SUBJECT_FILTER: &str = "github.>";
pub const CONSUMER_SUBJECT_FILTER: &str = "github.*";
pub const DEFAULT_CONSUMER_NAME: &str = "github-event-handler";

const MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const MAX_MESSAGES: i64 = 10_000;
const MAX_BYTES: i64 = 100 * 1024 * 1024;

/// A fetched JetStream message, re-exported so callers never need to
/// depend on `async-nats` directly to ack/nak/term it.
pub type Message = async_nats::jetstream::Message;

fn stream_config() -> StreamConfig {
    StreamConfig {
        name: STREAM_NAME.to_string(),
        subjects: vec![STREAM_SUBJECT_FILTER.to_string()],
        retention: RetentionPolicy::Limits,
        discard: DiscardPolicy::Old,
        max_age: MAX_AGE,
        max_messages: MAX_MESSAGES,
        max_bytes: MAX_BYTES,
        ..Default::default()
    }
}

/// Connects to NATS and publishes events, creating the stream on first use.
pub struct EventPublisher {
    jetstream: JetStreamContext,
}

impl EventPublisher {
    pub async fn connect(nats_url: &str) -> Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .with_context(|| format!("failed to connect to NATS at {nats_url}"))?;
        Ok(Self {
            jetstream: async_nats::jetstream::new(client),
        })
    }

    /// Idempotently ensure the stream exists. If a stream with this name
    /// already exists, its configuration is left untouched — we never
    /// reconcile an existing stream's retention policy.
    pub async fn ensure_stream(&self) -> Result<()> {
        if self.jetstream.get_stream(STREAM_NAME).await.is_ok() {
            return Ok(());
        }
        self.jetstream
            .create_stream(stream_config())
            .await
            .context("failed to create GITHUB_EVENTS stream")?;
        Ok(())
    }

    /// Serialize and publish `payload` on `subject`. Does not retry; a
    /// failure here means the caller's cycle logs it and moves on
    /// without advancing any watermark.
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .with_context(|| format!("failed to publish to {subject}"))?;
        ack.await.with_context(|| format!("publish to {subject} was not acked"))?;
        Ok(())
    }
}

/// Durable pull-consumer fetch loop on the handler side.
pub struct StreamConsumer {
    consumer: async_nats::jetstream::consumer::Consumer<PullConfig>,
}

impl StreamConsumer {
    /// Connect and bind (creating if absent) a durable pull consumer
    /// named `consumer_name` on `stream_name`. When `recreate` is set and
    /// a consumer with that name already exists, it is deleted and
    /// recreated from scratch.
    pub async fn connect(
        nats_url: &str,
        stream_name: &str,
        consumer_name: &str,
        recreate: bool,
    ) -> Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .with_context(|| format!("failed to connect to NATS at {nats_url}"))?;
        let jetstream = async_nats::jetstream::new(client);
        let stream = jetstream
            .get_stream(stream_name)
            .await
            .with_context(|| format!("stream {stream_name} does not exist"))?;

        if recreate {
            let _ = stream.delete_consumer(consumer_name).await;
        }

        let consumer = stream
            .get_or_create_consumer(
                consumer_name,
                PullConfig {
                    durable_name: Some(consumer_name.to_string()),
                    deliver_policy: DeliverPolicy::All,
                    ack_policy: AckPolicy::Explicit,
                    filter_subject: CONSUMER_SUBJECT_FILTER.to_string(),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("failed to bind durable consumer {consumer_name}"))?;

        Ok(Self { consumer })
    }

    /// Fetch up to `batch` messages, waiting up to `timeout` for the
    /// first one. An empty result on timeout is normal and should not be
    /// logged by the caller; any other fetch error should be.
    pub async fn fetch_batch(&self, batch: usize, timeout: Duration) -> Result<Vec<Message>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(batch)
            .expires(timeout)
            .messages()
            .await
            .context("failed to start fetch")?;

        let mut out = Vec::with_capacity(batch);
        while let Some(msg) = messages.next().await {
            out.push(msg.context("failed to read message from fetch batch")?);
        }
        Ok(out)
    }
}
