use crate::error::NotificationError;
use serde::Deserialize;

/// "An object was uploaded": the container and the (decoded) object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadNotification {
    pub container: String,
    pub key: String,
}

impl UploadNotification {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

/// Abbreviated S3 event notification. Only the fields the worker uses are
/// modelled; everything is optional so that a missing field is reported
/// against its record instead of rejecting the whole payload.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "Records")]
    records: Option<Vec<EventRecord>>,
    /// Only set on the `s3:TestEvent` sent when notifications are configured.
    #[serde(rename = "Event")]
    event: Option<String>,
}

const TEST_EVENT: &str = "s3:TestEvent";

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(rename = "eventName")]
    event_name: Option<String>,
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: Option<BucketEntity>,
    object: Option<ObjectEntity>,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: Option<String>,
}

/// Outcome of parsing one delivery payload.
#[derive(Debug, Default)]
pub struct ParsedEvent {
    pub notifications: Vec<UploadNotification>,
    /// Records that could not be turned into a notification.
    pub rejected: Vec<NotificationError>,
    /// Records for events other than object creation.
    pub ignored: usize,
}

impl ParsedEvent {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Parses an S3 event envelope, as delivered through SQS message bodies
/// and direct Lambda invocations alike.
pub fn parse_event(payload: &str) -> Result<ParsedEvent, NotificationError> {
    let envelope: EventEnvelope = serde_json::from_str(payload)?;
    if envelope.records.is_none() && envelope.event.as_deref() == Some(TEST_EVENT) {
        return Ok(ParsedEvent {
            ignored: 1,
            ..ParsedEvent::default()
        });
    }
    let records = match envelope.records {
        Some(records) if !records.is_empty() => records,
        _ => return Err(NotificationError::NoRecords),
    };

    let mut parsed = ParsedEvent::default();
    for (index, record) in records.into_iter().enumerate() {
        if let Some(event_name) = record.event_name.as_deref() {
            if !event_name.starts_with("ObjectCreated:") {
                parsed.ignored += 1;
                continue;
            }
        }
        match notification_from_record(index, record) {
            Ok(notification) => parsed.notifications.push(notification),
            Err(err) => parsed.rejected.push(err),
        }
    }
    Ok(parsed)
}

fn notification_from_record(
    index: usize,
    record: EventRecord,
) -> Result<UploadNotification, NotificationError> {
    let s3 = record
        .s3
        .ok_or(NotificationError::MissingField { index, field: "s3" })?;
    let container = s3
        .bucket
        .and_then(|bucket| bucket.name)
        .filter(|name| !name.is_empty())
        .ok_or(NotificationError::MissingField {
            index,
            field: "s3.bucket.name",
        })?;
    let raw_key = s3
        .object
        .and_then(|object| object.key)
        .filter(|key| !key.is_empty())
        .ok_or(NotificationError::MissingField {
            index,
            field: "s3.object.key",
        })?;

    Ok(UploadNotification {
        container,
        key: decode_key(index, &raw_key)?,
    })
}

/// S3 form-encodes keys in notifications: `+` is a space, `%2B` a plus.
fn decode_key(index: usize, raw: &str) -> Result<String, NotificationError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| NotificationError::KeyEncoding {
            index,
            key: raw.to_string(),
        })
}
