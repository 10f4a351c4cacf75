//! Supervising loop: one task per running consumer.

use crate::registry::Registry;
use krelay_consumer::{Consumer, ConsumerError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

/// Drive `consumer` until it is cancelled or fails, then clear its running
/// flag under the registry lock.
pub(crate) async fn supervise(consumer: Arc<dyn Consumer>, registry: Arc<Mutex<Registry>>) {
    let option = consumer.base().option();
    info!(
        topic = %option.topic,
        group_id = %option.group_id,
        strict = option.strict_commit,
        "Consumer started"
    );

    match run(consumer.as_ref()).await {
        Ok(()) => info!(topic = %option.topic, group_id = %option.group_id, "Consumer stopped"),
        Err(err) => error!(
            topic = %option.topic,
            group_id = %option.group_id,
            error = %err,
            "Consumer stopped on error"
        ),
    }

    let _registry = registry.lock();
    consumer.base().set_running(false);
}

/// Read, handle, complete; strictly in sequence.
async fn run(consumer: &dyn Consumer) -> Result<(), ConsumerError> {
    let cancel = consumer.base().cancellation_token().clone();
    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            read = consumer.read_message() => read,
        };
        let message = match read {
            Ok(message) => message,
            Err(ConsumerError::Cancelled) => return Ok(()),
            Err(err) => return Err(err),
        };

        let outcome = consumer.handle_message(&message).await;
        if !outcome.proceed {
            return match outcome.error {
                None | Some(ConsumerError::Cancelled) => Ok(()),
                Some(err) => Err(err),
            };
        }

        match consumer.complete_message(&message).await {
            Ok(()) => {},
            Err(ConsumerError::Cancelled) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}
