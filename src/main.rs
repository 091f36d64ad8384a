use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use rmq::config::{Direction, Options};
use rmq::message::Synthesizer;
use rmq::messaging::{
    ExchangePublisher, QueueSource, Receiver, Sender, SenderOutcome, Session, Topology,
};
use rmq::shutdown::Shutdown;
use rmq::stats::{Reporter, RunStats};

const REPORT_CADENCE: Duration = Duration::from_secs(10);
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let options = Options::parse();
    if let Err(e) = options.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    setup_logging();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        direction = ?options.direction,
        "rmq starting"
    );

    let session = match Session::connect(&options).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to connect to broker: {}", e);
            std::process::exit(1);
        }
    };

    let topology = Topology::from_options(&options);
    if let Err(e) = topology.bind(session.channel(), options.direction).await {
        eprintln!("Failed to set up topology: {}", e);
        teardown(session).await;
        std::process::exit(1);
    }

    let stats = RunStats::new();
    let shutdown = Shutdown::new();

    let reporter_handle = tokio::spawn(Reporter::run_periodic(
        stats.clone(),
        REPORT_CADENCE,
        shutdown.clone(),
    ));

    let mut loop_handle = match options.direction {
        Direction::In => {
            let publisher = ExchangePublisher::new(
                session.channel().clone(),
                options.exchange.clone(),
                options.routing_key().to_string(),
            );
            let synthesizer = Synthesizer::new(
                options.size,
                options.stddev,
                options.persistent,
                options.entropy,
            );
            let sender = Sender::new(
                publisher,
                synthesizer,
                stats.clone(),
                shutdown.clone(),
                options.count,
                options.interval,
                options.stddev,
            );
            tokio::spawn(async move {
                match sender.run().await {
                    SenderOutcome::Completed => info!("Send run complete"),
                    SenderOutcome::Cancelled => info!("Send run cancelled"),
                    SenderOutcome::Failed => error!("Send run aborted, session no longer usable"),
                }
            })
        }
        Direction::Out => {
            let source =
                match QueueSource::subscribe(session.channel().clone(), options.queue.clone())
                    .await
                {
                    Ok(source) => source,
                    Err(e) => {
                        eprintln!("Failed to subscribe to queue: {}", e);
                        teardown(session).await;
                        std::process::exit(1);
                    }
                };
            let receiver = Receiver::new(
                source,
                stats.clone(),
                shutdown.clone(),
                options.renew,
                options.entropy,
            );
            tokio::spawn(async move {
                let outcome = receiver.run().await;
                info!(resubscribes = outcome.resubscribes, "Receive run stopped");
            })
        }
    };

    let interrupted = tokio::select! {
        _ = &mut loop_handle => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    shutdown.trigger();
    if interrupted {
        warn!("Interrupt received, shutting down");
        if tokio::time::timeout(LOOP_JOIN_TIMEOUT, &mut loop_handle)
            .await
            .is_err()
        {
            warn!("Loop shutdown timeout, aborting");
            loop_handle.abort();
        }
    }
    let _ = reporter_handle.await;

    println!("{}", Reporter::render(&stats.snapshot()));

    teardown(session).await;
    info!("rmq stopped");
}

async fn teardown(session: Session) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Session teardown reported errors");
    }
}

fn setup_logging() {
    let log_level = match std::env::var("RUST_LOG").unwrap_or_default().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}
