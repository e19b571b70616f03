//! Fans a batch out to concurrent unit-of-work tasks and joins them all.

use super::processor::UnitProcessor;
use crate::domain::unit::{Acknowledgement, ProcessingUnit, UnitOutcome};
use crate::error::UnitError;
use crate::ports::source::NotificationSource;
use crate::ports::storage::ObjectStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info_span, Instrument};

/// A unit that ended in `Failed(stage)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub container: String,
    pub key: String,
    pub stage: &'static str,
    pub error: String,
}

/// Tally of one handled batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub stored: usize,
    pub skipped: usize,
    /// Messages deleted from the source.
    pub acknowledged: usize,
    /// Payloads or records that could not be parsed.
    pub rejected: usize,
    pub failures: Vec<UnitFailure>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record(&mut self, unit: &ProcessingUnit, result: Result<UnitOutcome, UnitError>) {
        match result {
            Ok(outcome) => {
                if outcome.acknowledgement() == Acknowledgement::Deleted {
                    self.acknowledged += 1;
                }
                match outcome {
                    UnitOutcome::Stored { .. } => self.stored += 1,
                    UnitOutcome::Skipped { .. } => self.skipped += 1,
                }
            }
            Err(e) => self.failures.push(UnitFailure {
                container: unit.notification.container.clone(),
                key: unit.notification.key.clone(),
                stage: e.stage(),
                error: e.to_string(),
            }),
        }
    }
}

pub struct Dispatcher<S, Q> {
    processor: Arc<UnitProcessor<S, Q>>,
    max_in_flight: Option<usize>,
}

impl<S, Q> Dispatcher<S, Q>
where
    S: ObjectStore + 'static,
    Q: NotificationSource + 'static,
{
    /// Without `max_in_flight` every unit of a batch runs at once.
    pub fn new(processor: Arc<UnitProcessor<S, Q>>, max_in_flight: Option<usize>) -> Self {
        Self {
            processor,
            max_in_flight,
        }
    }

    /// Processes every unit and returns once each one has succeeded or
    /// failed. A failing or panicking unit does not affect its siblings.
    pub async fn dispatch(&self, units: Vec<ProcessingUnit>) -> BatchReport {
        let mut report = BatchReport::default();
        if units.is_empty() {
            return report;
        }

        let limit = self.max_in_flight.unwrap_or(units.len()).max(1);
        let mut finished = stream::iter(units)
            .map(|unit| {
                let processor = self.processor.clone();
                let span = info_span!(
                    "unit",
                    index = unit.index,
                    container = %unit.notification.container,
                    key = %unit.notification.key,
                );
                async move {
                    let task_unit = unit.clone();
                    let handle = tokio::spawn(
                        async move { processor.process(&task_unit).await }.instrument(span.clone()),
                    );
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(join_error) => {
                            unit.ack.abandon();
                            Err(UnitError::Aborted(join_error.to_string()))
                        }
                    };
                    if let Err(e) = &result {
                        span.in_scope(|| error!(stage = e.stage(), error = %e, "Unit failed"));
                    }
                    (unit, result)
                }
            })
            .buffer_unordered(limit);

        while let Some((unit, result)) = finished.next().await {
            report.record(&unit, result);
        }
        report
    }
}
