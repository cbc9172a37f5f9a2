// Run loop
//
// Each run starts a consumer on the same durable name, so messages left
// unacknowledged by an earlier run are redelivered to a later one.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use pullq_consumer::prelude::*;
use tracing::{info, warn};

use crate::Cli;

/// Stream, subject and durable names for one process
#[derive(Debug, Clone)]
struct Topology {
    stream: String,
    subject: String,
    durable: String,
}

impl Topology {
    fn timestamped() -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let stream = format!("TEST-STREAM-{stamp}");
        Self {
            subject: format!("test.stream.{}", stamp.to_lowercase()),
            durable: format!("{stream}-C"),
            stream,
        }
    }
}

/// How a single run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    Interrupted,
}

pub async fn run(cli: Cli) -> Result<()> {
    let topology = Topology::timestamped();
    let broker = Arc::new(InMemoryBroker::new(
        BrokerConfig::new().with_ack_wait(cli.ack_wait()),
    ));
    seed(&broker, &topology, cli.messages)?;

    info!(
        stream = %topology.stream,
        subject = %topology.subject,
        durable = %topology.durable,
        messages = cli.messages,
        error_mode = !cli.no_err,
        "Stream ready"
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut run_number = 1u64;
    loop {
        info!("===== Starting run {} =====", run_number);
        let outcome = run_once(&cli, &broker, &topology, &mut ctrl_c).await?;

        info!(
            run = run_number,
            remaining = broker.stream_len(&topology.stream)?,
            unacknowledged = broker.outstanding(&topology.durable),
            "===== Finished run {} =====",
            run_number
        );

        if outcome == RunOutcome::Interrupted {
            info!("Received shutdown signal");
            break;
        }
        if cli.runs.is_some_and(|limit| run_number >= limit) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(cli.pause_between_runs()) => {}
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
        }
        run_number += 1;
    }

    info!("Runner stopped");
    Ok(())
}

fn seed(broker: &InMemoryBroker, topology: &Topology, messages: usize) -> Result<()> {
    broker
        .create_stream(&topology.stream, vec![topology.subject.clone()])
        .with_context(|| format!("Failed to create stream {}", topology.stream))?;

    for i in 0..messages {
        broker
            .publish(&topology.subject, i.to_string().into_bytes())
            .with_context(|| format!("Failed to publish message {i}"))?;
    }
    Ok(())
}

async fn run_once<C>(
    cli: &Cli,
    broker: &Arc<InMemoryBroker>,
    topology: &Topology,
    ctrl_c: &mut std::pin::Pin<&mut C>,
) -> Result<RunOutcome>
where
    C: Future<Output = std::io::Result<()>>,
{
    // Environment supplies the slot wait strategy; the stream is ours
    let config = ConsumerConfig {
        subject: topology.subject.clone(),
        durable_name: topology.durable.clone(),
        stream_name: topology.stream.clone(),
        ..ConsumerConfig::from_env()
    }
    .with_worker_count(cli.workers)
    .with_fetch_timeout(cli.fetch_timeout());
    let shutdown_timeout = config.shutdown_timeout;

    let consumer = Consumer::start(
        broker.clone(),
        Arc::new(SimulatedProcessor::new(cli.processing_delay())),
        config,
    )
    .await
    .context("Failed to start consumer")?;

    let mut outcome = RunOutcome::Completed;
    if cli.no_err {
        tokio::select! {
            exit = consumer.wait_stopped() => {
                let exit = exit.context("Poller task failed")?;
                info!(?exit, "Poller stopped on its own");
            }
            _ = ctrl_c.as_mut() => outcome = RunOutcome::Interrupted,
        }
        consumer.shutdown().await;
    } else {
        tokio::select! {
            _ = tokio::time::sleep(cli.run_duration()) => {
                warn!(in_flight = consumer.in_flight(), "Simulating crash");
                consumer.shutdown().await;
                consumer.abort_in_flight();
            }
            exit = consumer.wait_stopped() => {
                let exit = exit.context("Poller task failed")?;
                info!(?exit, "Poller stopped before the run ended");
            }
            _ = ctrl_c.as_mut() => {
                outcome = RunOutcome::Interrupted;
                consumer.shutdown().await;
                consumer.abort_in_flight();
            }
        }
    }

    if let Err(e) = consumer.drain(shutdown_timeout).await {
        warn!(error = %e, "In-flight messages did not finish, interrupting them");
        consumer.abort_in_flight();
        consumer
            .drain(shutdown_timeout)
            .await
            .context("Worker units did not stop after abort")?;
    }
    let exit = consumer.wait_stopped().await.context("Poller task failed")?;

    let stats = consumer.stats();
    info!(
        ?exit,
        acknowledged = stats.acknowledged,
        failed = stats.failed,
        interrupted = stats.cancelled,
        ack_failed = stats.ack_failed,
        peak_in_flight = consumer.peak_in_flight(),
        "Run summary"
    );
    Ok(outcome)
}
