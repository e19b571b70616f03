//! Unit-of-work state machine: fetch, guard, decode, resize, encode,
//! store, acknowledge.

use crate::domain::keys::KeyDeriver;
use crate::domain::thumbnail::Transcoder;
use crate::domain::unit::{AckHandle, Acknowledgement, ProcessingUnit, UnitOutcome, UnitState};
use crate::error::{TranscodeError, UnitError};
use crate::ports::source::NotificationSource;
use crate::ports::storage::ObjectStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct UnitProcessor<S, Q> {
    store: Arc<S>,
    source: Arc<Q>,
    transcoder: Transcoder,
    keys: KeyDeriver,
}

impl<S, Q> UnitProcessor<S, Q>
where
    S: ObjectStore,
    Q: NotificationSource,
{
    pub fn new(store: Arc<S>, source: Arc<Q>, transcoder: Transcoder, keys: KeyDeriver) -> Self {
        Self {
            store,
            source,
            transcoder,
            keys,
        }
    }

    /// Runs one unit to `Done` or `Failed`. A failed unit releases its
    /// share of the message receipt without deleting it.
    pub async fn process(&self, unit: &ProcessingUnit) -> Result<UnitOutcome, UnitError> {
        let mut state = UnitState::Received;
        let result = self.run(unit, &mut state).await;
        match &result {
            Ok(_) => transition(&mut state, UnitState::Done),
            Err(e) => {
                unit.ack.abandon();
                transition(&mut state, UnitState::Failed(e.stage()));
            }
        }
        result
    }

    async fn run(
        &self,
        unit: &ProcessingUnit,
        state: &mut UnitState,
    ) -> Result<UnitOutcome, UnitError> {
        let container = unit.notification.container.as_str();
        let key = unit.notification.key.as_str();

        // A derivative's own upload event must not produce another derivative.
        if self.keys.is_derived(key) {
            debug!(key, "Key is already a derivative, skipping");
            transition(state, UnitState::Acknowledging);
            let acknowledgement = self.acknowledge(&unit.ack).await;
            return Ok(UnitOutcome::Skipped { acknowledgement });
        }

        transition(state, UnitState::Fetching);
        let original = self
            .store
            .get(container, key)
            .await
            .map_err(UnitError::Fetch)?;
        debug!(bytes = original.len(), "Fetched original");

        transition(state, UnitState::Decoding);
        let transcoder = self.transcoder.clone();
        let image = blocking(move || transcoder.decode(&original))
            .await
            .map_err(UnitError::Decode)?;

        transition(state, UnitState::Resizing);
        let transcoder = self.transcoder.clone();
        let resized = blocking(move || transcoder.resize(image))
            .await
            .map_err(UnitError::Resize)?;

        transition(state, UnitState::Encoding);
        let transcoder = self.transcoder.clone();
        let thumbnail = blocking(move || transcoder.encode(&resized))
            .await
            .map_err(UnitError::Encode)?;

        transition(state, UnitState::Storing);
        let derived_key = self.keys.derive(key);
        let content_type = self.keys.content_type_for(&derived_key);
        let size = thumbnail.data.len();
        let location = self
            .store
            .put(container, &derived_key, thumbnail.data, &content_type)
            .await
            .map_err(UnitError::Store)?;
        info!(
            derived_key = %derived_key,
            width = thumbnail.width,
            height = thumbnail.height,
            bytes = size,
            content_type = %content_type,
            location = %location,
            "Stored thumbnail"
        );

        transition(state, UnitState::Acknowledging);
        let acknowledgement = self.acknowledge(&unit.ack).await;

        Ok(UnitOutcome::Stored {
            derived_key,
            width: thumbnail.width,
            height: thumbnail.height,
            acknowledgement,
        })
    }

    /// Failure to delete never undoes the store; the redelivered message
    /// simply regenerates the same derivative.
    async fn acknowledge(&self, ack: &AckHandle) -> Acknowledgement {
        if matches!(ack, AckHandle::Implicit) {
            return Acknowledgement::Implicit;
        }
        let Some(receipt) = ack.complete() else {
            return Acknowledgement::Deferred;
        };
        match self.source.acknowledge(receipt).await {
            Ok(()) => {
                debug!("Deleted message");
                Acknowledgement::Deleted
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete message");
                Acknowledgement::Failed
            }
        }
    }
}

fn transition(state: &mut UnitState, next: UnitState) {
    debug!(from = %state, to = %next, "Unit transition");
    *state = next;
}

async fn blocking<T, F>(f: F) -> Result<T, TranscodeError>
where
    F: FnOnce() -> Result<T, TranscodeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TranscodeError::Join(e.to_string()))?
}
