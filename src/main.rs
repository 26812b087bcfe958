use async_dispatcher::{Dispatcher, LoggingHandler};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dispatcher = match Dispatcher::<String, _>::new(LoggingHandler::default(), 3) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("failed to start dispatcher: {e}");
            std::process::exit(1);
        }
    };

    for i in 1..=5 {
        let _ = dispatcher.submit(format!("Request{i}"));
    }

    let outcome = dispatcher.shutdown(Duration::from_secs(300)).await;

    // rejected: intake is closed
    let _ = dispatcher.submit("Request6".to_string());

    dispatcher.stopped().await;
    match outcome {
        Ok(report) => tracing::info!(?report, "all requests processed"),
        Err(e) => tracing::error!("{e}"),
    }
}
