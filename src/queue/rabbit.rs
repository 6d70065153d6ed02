//! RabbitMQ job source
//!
//! Plain-credential AMQP session against the broker named in the
//! environment. The queue is declared durable before the get so a worker
//! that races the runner's publish still finds it; acknowledgement is
//! manual and happens on receipt (the temporary-queue pattern makes
//! redelivery meaningless).

use async_trait::async_trait;
use lapin::options::{
    BasicGetOptions, BasicNackOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use std::marker::PhantomData;
use tracing::{debug, error, info, warn};

use super::{JobSource, QueuePayload};
use crate::config::BrokerConfig;
use crate::error::{PipelineError, PipelineResult};

pub struct RabbitConsumer<T> {
    config: BrokerConfig,
    queue_name: String,
    connection: Option<Connection>,
    channel: Option<Channel>,
    _payload: PhantomData<T>,
}

impl<T: QueuePayload> RabbitConsumer<T> {
    /// Build a consumer for the runner-injected queue.
    ///
    /// Fails with `ProtocolError` when `CONSUMER_QUEUE_NAME` is missing:
    /// in real mode there is nothing sensible to drain.
    pub fn from_config(config: &BrokerConfig) -> PipelineResult<Self> {
        let queue_name = config.queue_name.clone().ok_or_else(|| {
            PipelineError::ProtocolError("CONSUMER_QUEUE_NAME is not set".to_string())
        })?;
        Ok(Self {
            config: config.clone(),
            queue_name,
            connection: None,
            channel: None,
            _payload: PhantomData,
        })
    }

    fn channel(&self) -> PipelineResult<&Channel> {
        self.channel.as_ref().ok_or_else(|| {
            PipelineError::TransportUnavailable("not connected to broker".to_string())
        })
    }
}

#[async_trait]
impl<T: QueuePayload> JobSource<T> for RabbitConsumer<T> {
    async fn connect(&mut self) -> PipelineResult<()> {
        let uri = self.config.amqp_uri();
        let mut last_err = None;

        for attempt in 1..=self.config.connect_attempts {
            match Connection::connect(&uri, ConnectionProperties::default()).await {
                Ok(connection) => {
                    let channel = connection.create_channel().await?;
                    channel
                        .queue_declare(
                            &self.queue_name,
                            QueueDeclareOptions {
                                durable: true,
                                ..Default::default()
                            },
                            FieldTable::default(),
                        )
                        .await?;

                    info!(
                        host = %self.config.host,
                        port = self.config.port,
                        queue = %self.queue_name,
                        "connected to RabbitMQ"
                    );
                    self.connection = Some(connection);
                    self.channel = Some(channel);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, "broker connect failed: {e}");
                    last_err = Some(e);
                    if attempt < self.config.connect_attempts {
                        tokio::time::sleep(std::time::Duration::from_secs(u64::from(attempt)))
                            .await;
                    }
                }
            }
        }

        Err(PipelineError::TransportUnavailable(format!(
            "broker unreachable after {} attempts: {}",
            self.config.connect_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn poll_one(&mut self) -> PipelineResult<Option<T>> {
        let channel = self.channel()?;

        let Some(message) = channel
            .basic_get(&self.queue_name, BasicGetOptions { no_ack: false })
            .await?
        else {
            info!(queue = %self.queue_name, "no message in queue");
            return Ok(None);
        };
        let delivery = message.delivery;

        match T::parse(&delivery.data) {
            Ok(job) => {
                delivery.acker.ack(Default::default()).await?;
                debug!(bytes = delivery.data.len(), "message acknowledged");
                Ok(Some(job))
            }
            Err(e) => {
                // Spent either way: reject without requeue and report empty
                // so the shell still deletes the queue and exits clean.
                error!("failed to parse message body: {e}");
                delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await?;
                Ok(None)
            }
        }
    }

    async fn delete_queue(&mut self) -> PipelineResult<()> {
        let channel = self.channel()?;
        channel
            .queue_delete(&self.queue_name, QueueDeleteOptions::default())
            .await?;
        info!(queue = %self.queue_name, "queue deleted");
        Ok(())
    }

    async fn close(&mut self) {
        self.channel = None;
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "done").await {
                warn!("error closing broker connection: {e}");
            } else {
                info!("broker connection closed");
            }
        }
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}
