mod config;
mod core;

use std::sync::Arc;

use anyhow::{Context, Result};
use crate::config::Config;
use crate::core::{DispatchConsumer, SmtpMailTransport, TemplateRenderer};
use dispatch_helpers::logging::{self, LogSettings};
use dispatch_helpers::shutdown;
use dispatch_queue::{AmqpBroker, Broker, redact_url};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    logging::init_logging(&LogSettings {
        default_filter: "dispatch_worker=info,dispatch_queue=info,lapin=warn",
        filter_env: "DISPATCH_LOG",
        format_env: "DISPATCH_LOG_FORMAT",
        service_name: "dispatch-worker",
    });

    let config = Config::load().context("failed to load configuration")?;
    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown::listen_shutdown(shutdown_token.clone()));

    let mailer = Arc::new(config.mailer.clone());
    info!(
        "worker starting: broker={}, work_queue={}, dead_letter_queue={}, smtp={}:{}, tls={}, username={}, credentials={}",
        redact_url(&config.broker.url),
        config.broker.work_queue,
        config.broker.dead_letter_queue,
        mailer.host,
        mailer.port,
        mailer.tls_mode(),
        mailer.username.as_deref().unwrap_or("-"),
        mailer.has_credentials()
    );

    let broker = AmqpBroker::connect_with_backoff(
        &config.broker.url,
        &config.broker.consumer_tag,
        &config.broker.backoff(),
        &shutdown_token,
    )
    .await
    .context("failed to connect broker")?;

    let topology = config.broker.topology();
    broker
        .declare_topology(&topology)
        .await
        .context("failed to declare queue topology")?;

    let consumer = DispatchConsumer::new(
        TemplateRenderer::new(config.templates.dir.clone()),
        Arc::new(SmtpMailTransport::new(mailer)),
        topology.dead_letter_queue.clone(),
    );

    let result = broker
        .consume(&topology.work_queue, &consumer, &shutdown_token)
        .await
        .context("consumer stopped");

    broker.close().await;
    info!("worker stopped");
    result
}
