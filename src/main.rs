use anyhow::Result;
use clap::Parser;
use http::{Response, StatusCode};
use request_throttler::{Matcher, RateLimitRule, Throttler, ThrottlerConfig};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, ServiceExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Replay a burst of requests through the throttler against a simulated endpoint.
#[derive(Parser, Debug)]
#[command(name = "request-throttler", version)]
struct Args {
    /// JSON configuration file. Without it THROTTLER_* environment variables are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests in the burst
    #[arg(short = 'n', long, default_value_t = 40)]
    requests: usize,

    /// Target URL of every request
    #[arg(short, long, default_value = "https://api.example.com/items")]
    url: String,

    /// Answer every Nth call with 429 (0 never does)
    #[arg(long, default_value_t = 7)]
    overload_every: usize,

    /// Simulated endpoint latency in milliseconds
    #[arg(long, default_value_t = 10)]
    latency_ms: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("request_throttler={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config: ThrottlerConfig<String> = match &args.config {
        Some(path) => ThrottlerConfig::from_file(path),
        None => ThrottlerConfig::from_env(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    if config.rules.is_empty() {
        tracing::info!("No rules configured, using 5 requests per second for api.example.com");
        config.rules.push(
            RateLimitRule::matching(Matcher::substring("api.example.com"))
                .with_name("api")
                .with_bucket_size(5.0)
                .with_refill(5.0, Duration::from_secs(1)),
        );
    }

    let throttler = Throttler::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create throttler: {}", e))?;

    let calls = Arc::new(AtomicUsize::new(0));
    let overload_every = args.overload_every;
    let latency = Duration::from_millis(args.latency_ms);
    let endpoint = tower::service_fn(move |url: String| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(latency).await;
            let mut response = Response::new(url);
            if overload_every > 0 && call % overload_every == 0 {
                *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            }
            Ok::<_, Infallible>(response)
        }
    });
    let service = throttler.layer().layer(endpoint);

    tracing::info!(requests = args.requests, url = %args.url, "Starting burst");
    let start = Instant::now();

    let burst = (0..args.requests).map(|index| {
        let service = service.clone();
        let url = format!("{}?request={}", args.url, index);
        async move {
            let response = service.oneshot(url).await;
            let status = match response {
                Ok(response) => response.status(),
                Err(never) => match never {},
            };
            tracing::info!(
                request = index,
                status = status.as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
        }
    });
    futures::future::join_all(burst).await;

    let report = serde_json::json!({
        "elapsed_ms": start.elapsed().as_millis() as u64,
        "global": throttler.metrics().get_global_metrics(),
        "rules": throttler.metrics().get_all_metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
