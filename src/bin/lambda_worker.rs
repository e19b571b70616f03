//! Lambda Worker Binary
//!
//! Custom-runtime Lambda function invoked with S3 upload events. Each
//! invocation is one batch; the invocation response acknowledges it.
//!
//! Environment Variables:
//! - AWS_LAMBDA_RUNTIME_API: set by the Lambda platform
//! - THUMB_RETRY_FAILED_BATCHES: answer with an error when any unit failed
//! - THUMB_MAX_WIDTH, THUMB_MAX_HEIGHT, THUMB_QUALITY, THUMB_MARKER,
//!   THUMB_MAX_IN_FLIGHT: pipeline settings
//! - RUST_LOG, LOG_FORMAT: logging

use std::process;
use std::sync::Arc;
use tracing::{error, info};
use vignette::adapters::aws::{LambdaSource, S3Store};
use vignette::application::worker::{shutdown_on_signal, WorkerService};
use vignette::config::{PipelineConfig, PushConfig};
use vignette::logging;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    logging::init();

    let push = match PushConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid runtime configuration");
            process::exit(1);
        }
    };
    let source = LambdaSource::new(&push);

    let pipeline = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            source.report_init_error(&e).await;
            process::exit(1);
        }
    };

    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = S3Store::new(aws_sdk_s3::Client::new(&aws));

    info!(
        retry_failed_batches = push.retry_failed_batches,
        marker = %pipeline.marker,
        "Lambda worker started"
    );

    let worker = WorkerService::new(Arc::new(store), Arc::new(source), &pipeline);
    worker.run(shutdown_on_signal()).await;
}
