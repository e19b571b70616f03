//! AWS adapters: S3 object store, SQS long-poll source and the Lambda
//! push source.

pub mod lambda;
pub mod s3;
pub mod sqs;

pub use lambda::LambdaSource;
pub use s3::S3Store;
pub use sqs::SqsSource;
