//! SQS Worker Binary
//!
//! Long-polls an SQS queue fed by S3 upload notifications and writes a
//! thumbnail next to every uploaded image.
//!
//! Usage:
//!     sqs_worker -n queue_name -t timeout
//!
//! Environment Variables:
//! - AWS_REGION / AWS credentials: resolved by the default AWS provider chain
//! - THUMB_QUEUE_NAME, THUMB_WAIT_SECONDS, THUMB_MAX_MESSAGES: same as the flags
//! - THUMB_MAX_WIDTH, THUMB_MAX_HEIGHT, THUMB_QUALITY, THUMB_MARKER,
//!   THUMB_MAX_IN_FLIGHT, THUMB_POLL_BACKOFF_MS: pipeline settings
//! - RUST_LOG, LOG_FORMAT: logging

use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use vignette::adapters::aws::{S3Store, SqsSource};
use vignette::application::worker::{shutdown_on_signal, WorkerService};
use vignette::config::{PipelineConfig, QueueConfig, DEFAULT_WAIT_SECONDS, MAX_BATCH_MESSAGES};
use vignette::logging;

#[derive(Parser, Debug)]
#[command(name = "sqs_worker")]
#[command(about = "Generate thumbnails for images announced on an SQS queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Queue name
    #[arg(
        short = 'n',
        long,
        env = "THUMB_QUEUE_NAME",
        default_value = "GenerateThumbnail",
        value_parser = clap::builder::NonEmptyStringValueParser::new()
    )]
    queue_name: String,

    /// Timeout in seconds for long polling (at most 20)
    #[arg(short = 't', long = "timeout", env = "THUMB_WAIT_SECONDS", default_value_t = DEFAULT_WAIT_SECONDS)]
    wait_seconds: u32,

    /// Messages requested per receive (1 to 10)
    #[arg(long, env = "THUMB_MAX_MESSAGES", default_value_t = MAX_BATCH_MESSAGES)]
    max_messages: u32,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    logging::init();
    let cli = Cli::parse();

    let pipeline = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            process::exit(1);
        }
    };
    let queue = match QueueConfig::new(cli.queue_name, cli.wait_seconds)
        .and_then(|config| config.with_max_messages(cli.max_messages))
    {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid queue configuration");
            process::exit(1);
        }
    };

    // Load AWS config
    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = S3Store::new(aws_sdk_s3::Client::new(&aws));
    let source = match SqsSource::connect(aws_sdk_sqs::Client::new(&aws), &queue).await {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "Failed to initialise queue");
            process::exit(1);
        }
    };

    info!(
        queue = %queue.queue_name,
        max_width = pipeline.thumbnail.max_width,
        max_height = pipeline.thumbnail.max_height,
        marker = %pipeline.marker,
        "SQS worker started"
    );

    let worker = WorkerService::new(Arc::new(store), Arc::new(source), &pipeline);
    worker.run(shutdown_on_signal()).await;
}
