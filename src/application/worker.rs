use super::dispatcher::{BatchReport, Dispatcher};
use super::processor::UnitProcessor;
use crate::config::PipelineConfig;
use crate::domain::keys::KeyDeriver;
use crate::domain::notification::parse_event;
use crate::domain::thumbnail::Transcoder;
use crate::domain::unit::{AckHandle, ProcessingUnit, ReceiptGroup};
use crate::ports::source::{Batch, NotificationSource};
use crate::ports::storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pulls batches from a [`NotificationSource`] and runs them through the
/// dispatcher until shut down.
pub struct WorkerService<S, Q> {
    source: Arc<Q>,
    dispatcher: Dispatcher<S, Q>,
    backoff: Duration,
}

impl<S, Q> WorkerService<S, Q>
where
    S: ObjectStore + 'static,
    Q: NotificationSource + 'static,
{
    pub fn new(store: Arc<S>, source: Arc<Q>, config: &PipelineConfig) -> Self {
        let processor = UnitProcessor::new(
            store,
            source.clone(),
            Transcoder::new(config.thumbnail),
            KeyDeriver::new(config.marker.clone()),
        );
        Self {
            source,
            dispatcher: Dispatcher::new(Arc::new(processor), config.max_in_flight),
            backoff: config.poll_backoff,
        }
    }

    /// Runs until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Shutdown is only observed between batches: a batch that has been
    /// received is always processed and finished before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = self.source.next_batch() => next,
            };

            match next {
                Ok(batch) => {
                    self.handle_batch(batch).await;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = self.backoff.as_millis() as u64, "Notification source error");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
        info!("Worker stopped");
    }

    /// Parses, dispatches and finishes one batch.
    pub async fn handle_batch(&self, batch: Batch) -> BatchReport {
        debug!(deliveries = batch.deliveries.len(), "Received batch");

        let mut rejected = 0;
        let units = self.units_from(&batch, &mut rejected).await;
        let mut report = self.dispatcher.dispatch(units).await;
        report.rejected += rejected;

        if let Err(e) = self.source.finish_batch(&batch, &report).await {
            error!(error = %e, "Failed to finish batch");
        }

        if !batch.is_empty() {
            info!(
                deliveries = batch.deliveries.len(),
                stored = report.stored,
                skipped = report.skipped,
                acknowledged = report.acknowledged,
                rejected = report.rejected,
                failed = report.failures.len(),
                "Batch handled"
            );
        }
        report
    }

    async fn units_from(&self, batch: &Batch, rejected: &mut usize) -> Vec<ProcessingUnit> {
        let mut units = Vec::new();
        for delivery in &batch.deliveries {
            let parsed = match parse_event(&delivery.body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(delivery = %delivery.id, error = %e, "Skipping malformed notification");
                    *rejected += 1;
                    continue;
                }
            };
            for e in &parsed.rejected {
                warn!(delivery = %delivery.id, error = %e, "Skipping malformed record");
            }
            *rejected += parsed.rejected.len();

            if parsed.notifications.is_empty() {
                // Nothing left to do for a message holding only non-upload events.
                if let (Some(receipt), true) = (&delivery.receipt, parsed.is_clean()) {
                    debug!(delivery = %delivery.id, ignored = parsed.ignored, "No uploads in message");
                    if let Err(e) = self.source.acknowledge(receipt).await {
                        warn!(delivery = %delivery.id, error = %e, "Failed to delete message");
                    }
                }
                continue;
            }

            let ack = match &delivery.receipt {
                Some(receipt) => {
                    let group = ReceiptGroup::new(receipt.clone(), parsed.notifications.len());
                    if !parsed.is_clean() {
                        group.poison();
                    }
                    AckHandle::Receipt(group)
                }
                None => AckHandle::Implicit,
            };
            for notification in parsed.notifications {
                units.push(ProcessingUnit::new(units.len(), notification, ack.clone()));
            }
        }
        units
    }
}

/// Returns a receiver that flips to true on SIGINT or SIGTERM.
pub fn shutdown_on_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested, draining current batch");
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::thumbnail::tests::{jpeg_bytes, png_bytes};
    use crate::error::{SourceError, StorageError};
    use crate::ports::source::{Delivery, MockNotificationSource};
    use crate::ports::storage::{MockObjectStore, ObjectStore};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(records: &[(&str, &str)]) -> String {
        let records: Vec<_> = records
            .iter()
            .map(|(bucket, key)| {
                serde_json::json!({
                    "eventName": "ObjectCreated:Put",
                    "s3": {"bucket": {"name": bucket}, "object": {"key": key}}
                })
            })
            .collect();
        serde_json::json!({ "Records": records }).to_string()
    }

    fn delivery(id: &str, body: String, receipt: Option<&str>) -> Delivery {
        Delivery {
            id: id.to_string(),
            body,
            receipt: receipt.map(str::to_string),
        }
    }

    fn worker(
        store: MockObjectStore,
        source: MockNotificationSource,
    ) -> WorkerService<MockObjectStore, MockNotificationSource> {
        WorkerService::new(Arc::new(store), Arc::new(source), &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_round_trip_stores_bounded_jpeg() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .withf(|c, k| c == "photos" && k == "abc/photo.jpg")
            .times(1)
            .returning(|_, _| Ok(Bytes::from(jpeg_bytes(2000, 1000))));
        store
            .expect_put()
            .withf(|c, k, data, content_type| {
                let format = image::guess_format(data).unwrap();
                let decoded = image::load_from_memory(data).unwrap();
                c == "photos"
                    && k == "abc/thumb/photo.jpg"
                    && content_type == "image/jpeg"
                    && format == image::ImageFormat::Jpeg
                    && decoded.width() == 600
                    && decoded.height() == 300
            })
            .times(1)
            .returning(|_, k, _, _| Ok(k.to_string()));
        let mut source = MockNotificationSource::new();
        source
            .expect_acknowledge()
            .withf(|r| r == "receipt-1")
            .times(1)
            .returning(|_| Ok(()));
        source.expect_finish_batch().times(1).returning(|_, _| Ok(()));

        let batch = Batch {
            token: None,
            deliveries: vec![delivery(
                "m-1",
                event(&[("photos", "abc/photo.jpg")]),
                Some("receipt-1"),
            )],
        };
        let report = worker(store, source).handle_batch(batch).await;
        assert_eq!(report.stored, 1);
        assert_eq!(report.acknowledged, 1);
    }

    #[tokio::test]
    async fn test_malformed_payloads_never_touch_storage() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(0);
        store.expect_put().times(0);
        let mut source = MockNotificationSource::new();
        source.expect_acknowledge().times(0);
        source
            .expect_finish_batch()
            .withf(|_, report| report.rejected == 2 && report.stored == 0)
            .times(1)
            .returning(|_, _| Ok(()));

        let batch = Batch {
            token: None,
            deliveries: vec![
                delivery("m-1", "not json".to_string(), Some("r-1")),
                delivery("m-2", r#"{"Records": []}"#.to_string(), Some("r-2")),
            ],
        };
        let report = worker(store, source).handle_batch(batch).await;
        assert_eq!(report.rejected, 2);
    }

    #[tokio::test]
    async fn test_multi_record_message_deleted_once_after_all_records() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .times(3)
            .returning(|_, _| Ok(Bytes::from(png_bytes(20, 20))));
        store
            .expect_put()
            .times(3)
            .returning(|_, k, _, _| Ok(k.to_string()));
        let mut source = MockNotificationSource::new();
        source
            .expect_acknowledge()
            .withf(|r| r == "r-1")
            .times(1)
            .returning(|_| Ok(()));
        source.expect_finish_batch().returning(|_, _| Ok(()));

        let body = event(&[("photos", "a/1.png"), ("photos", "a/2.png"), ("photos", "a/3.png")]);
        let batch = Batch {
            token: None,
            deliveries: vec![delivery("m-1", body, Some("r-1"))],
        };
        let report = worker(store, source).handle_batch(batch).await;
        assert_eq!(report.stored, 3);
        assert_eq!(report.acknowledged, 1);
    }

    #[tokio::test]
    async fn test_transient_fetch_error_leaves_message_for_redelivery() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_, key| {
            if key == "a/flaky.jpg" {
                Err(StorageError::transient("timeout"))
            } else {
                Ok(Bytes::from(jpeg_bytes(64, 64)))
            }
        });
        store
            .expect_put()
            .times(1)
            .returning(|_, k, _, _| Ok(k.to_string()));
        let mut source = MockNotificationSource::new();
        source
            .expect_acknowledge()
            .withf(|r| r == "r-ok")
            .times(1)
            .returning(|_| Ok(()));
        source.expect_finish_batch().returning(|_, _| Ok(()));

        let batch = Batch {
            token: None,
            deliveries: vec![
                delivery("m-1", event(&[("photos", "a/flaky.jpg")]), Some("r-flaky")),
                delivery("m-2", event(&[("photos", "a/fine.jpg")]), Some("r-ok")),
            ],
        };
        let report = worker(store, source).handle_batch(batch).await;
        assert_eq!(report.stored, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "a/flaky.jpg");
    }

    #[tokio::test]
    async fn test_push_batch_logs_failures_without_deletes() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .times(2)
            .returning(|_, _| Ok(Bytes::from(png_bytes(10, 10))));
        store.expect_put().times(2).returning(|_, k, _, _| {
            if k == "u/thumb/b.png" {
                Err(StorageError::transient("503"))
            } else {
                Ok(k.to_string())
            }
        });
        let mut source = MockNotificationSource::new();
        source.expect_acknowledge().times(0);
        source
            .expect_finish_batch()
            .withf(|batch, report| batch.token.as_deref() == Some("req-1") && report.stored == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let body = event(&[
            ("photos", "u/a.png"),
            ("photos", "u/thumb/a.png"),
            ("photos", "u/b.png"),
        ]);
        let batch = Batch {
            token: Some("req-1".to_string()),
            deliveries: vec![delivery("req-1", body, None)],
        };
        let report = worker(store, source).handle_batch(batch).await;
        assert_eq!(report.stored, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.acknowledged, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, "store");
    }

    #[tokio::test]
    async fn test_removal_only_message_is_deleted() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(0);
        let mut source = MockNotificationSource::new();
        source
            .expect_acknowledge()
            .withf(|r| r == "r-1")
            .times(1)
            .returning(|_| Ok(()));
        source.expect_finish_batch().returning(|_, _| Ok(()));

        let body = r#"{"Records": [{"eventName": "ObjectRemoved:Delete",
            "s3": {"bucket": {"name": "photos"}, "object": {"key": "a/x.jpg"}}}]}"#;
        let batch = Batch {
            token: None,
            deliveries: vec![delivery("m-1", body.to_string(), Some("r-1"))],
        };
        let report = worker(store, source).handle_batch(batch).await;
        assert_eq!(report, BatchReport::default());
    }

    #[tokio::test]
    async fn test_s3_test_event_is_deleted() {
        let mut store = MockObjectStore::new();
        store.expect_get().times(0);
        let mut source = MockNotificationSource::new();
        source
            .expect_acknowledge()
            .withf(|r| r == "r-test")
            .times(1)
            .returning(|_| Ok(()));
        source.expect_finish_batch().returning(|_, _| Ok(()));

        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"photos"}"#;
        let batch = Batch {
            token: None,
            deliveries: vec![delivery("m-1", body.to_string(), Some("r-test"))],
        };
        let report = worker(store, source).handle_batch(batch).await;
        assert_eq!(report.rejected, 0);
    }

    #[tokio::test]
    async fn test_run_backs_off_then_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut source = MockNotificationSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_next_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(SourceError::Unavailable("dns".to_string())));
        source
            .expect_next_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || {
                tx.send(true).unwrap();
                Ok(Batch::default())
            });
        // The empty batch races the shutdown signal.
        source
            .expect_finish_batch()
            .times(0..=1)
            .returning(|_, _| Ok(()));

        let config = PipelineConfig {
            poll_backoff: Duration::from_millis(5),
            ..PipelineConfig::default()
        };
        let worker = WorkerService::new(Arc::new(MockObjectStore::new()), Arc::new(source), &config);
        tokio::time::timeout(Duration::from_secs(5), worker.run(rx))
            .await
            .expect("worker did not stop");
    }

    /// Requests shutdown as soon as the first original is read, then keeps
    /// serving the batch slowly.
    struct ShutdownMidBatchStore {
        shutdown: watch::Sender<bool>,
        image: Bytes,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for ShutdownMidBatchStore {
        async fn get(&self, _container: &str, _key: &str) -> Result<Bytes, StorageError> {
            self.shutdown.send_replace(true);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.image.clone())
        }

        async fn put(
            &self,
            _container: &str,
            key: &str,
            _data: Bytes,
            _content_type: &str,
        ) -> Result<String, StorageError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(key.to_string())
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_batch() {
        let (tx, rx) = watch::channel(false);
        let store = Arc::new(ShutdownMidBatchStore {
            shutdown: tx,
            image: Bytes::from(png_bytes(16, 16)),
            puts: AtomicUsize::new(0),
        });

        let mut source = MockNotificationSource::new();
        source.expect_next_batch().times(1).returning(|| {
            Ok(Batch {
                token: None,
                deliveries: vec![
                    delivery("m-1", event(&[("photos", "a/1.png")]), Some("r-1")),
                    delivery("m-2", event(&[("photos", "a/2.png")]), Some("r-2")),
                ],
            })
        });
        source.expect_acknowledge().times(2).returning(|_| Ok(()));
        source
            .expect_finish_batch()
            .withf(|_, report| report.stored == 2 && report.acknowledged == 2)
            .times(1)
            .returning(|_, _| Ok(()));

        let worker = WorkerService::new(store.clone(), Arc::new(source), &PipelineConfig::default());
        tokio::time::timeout(Duration::from_secs(5), worker.run(rx))
            .await
            .expect("worker did not stop");

        assert!(*store.shutdown.borrow());
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
    }
}
