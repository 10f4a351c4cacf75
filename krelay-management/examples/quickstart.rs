//! Publish and consume through the management facade over the in-memory broker.
//!
//! Run with `RUST_LOG=info cargo run -p krelay-management --example quickstart`.

use bytes::Bytes;
use krelay_core::backends::MemoryBroker;
use krelay_core::{ManagementConfig, MessageContext, TopicConfig, UserInfo};
use krelay_management::{options, HandlerError, KafkaManagement};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ManagementConfig::new(["memory:9092"])
        .with_topic_prefix("dev.local.")
        .with_service_name("quickstart")
        .with_local(true);
    let broker = MemoryBroker::new();
    let kafka = KafkaManagement::new(config, Arc::new(broker.clone()))?;
    kafka.connect_to_kafka().await;

    kafka.upsert_topic(TopicConfig::new("orders", 3, 3)).await?;

    let group = kafka.consumer_group_name("orders");
    kafka.consume(
        "orders",
        &group,
        vec![options::retry_logic_attempts(3), options::waiting_time_to_retry_logic(Duration::from_millis(200))],
        |ctx: MessageContext, payload: Bytes| async move {
            if payload.is_empty() {
                return Err(HandlerError::permanent("empty order"));
            }
            tracing::info!(
                user_id = %ctx.user_info().user_id,
                traced = ctx.trace().is_some(),
                payload = %String::from_utf8_lossy(&payload),
                "Order received"
            );
            Ok(())
        },
    )?;

    let ctx = MessageContext::new().with_user_info(UserInfo::new("user-1", "orgs/1"));
    kafka.publish_context(&ctx, "orders", "order-1", r#"{"id":1}"#).await?;
    kafka
        .traced_publish_context(&ctx, "orders.publish", "orders", "order-2", r#"{"id":2}"#)
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    kafka.close().await?;

    let metrics = kafka.metrics();
    tracing::info!(ok = metrics.ok, handler_error = metrics.handler_error, "Done");
    Ok(())
}
