//! List-watch over a document-store collection.
//!
//! Document stores deliver change-stream records keyed by document id and
//! resume from an opaque token instead of a revision. This adapter turns
//! those records into [`ChangeEvent`]s, then into revision-tagged
//! [`KvEvent`]s under a key prefix so they can feed the same mirror as a
//! revisioned backend. Revisions are assigned locally and increase by one
//! per delivered record.

use super::list_watch::{KvEventStream, ListWatch, Snapshot};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt};
use roster_core::{
    ChangeEvent, EventType, Instance, KeyValue, KvEvent, ListWatchConfig, ResumePoint, Revision,
    Service, StorageError, StorageResult, Value,
};
use serde::Deserialize;
use serde_json::Value as Json;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Collections the registry keeps in a document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Service,
    Instance,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Service => "service",
            Collection::Instance => "instance",
        }
    }

    // Field holding the embedded registry object, and its id field.
    fn info_fields(&self) -> (&'static str, &'static str) {
        match self {
            Collection::Service => ("serviceinfo", "serviceid"),
            Collection::Instance => ("instanceinfo", "instanceid"),
        }
    }

    /// Business id of a full document, or empty when absent.
    pub fn business_id(&self, document: &Json) -> String {
        let (info, id) = self.info_fields();
        document
            .get(info)
            .and_then(|i| i.get(id))
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Decode the embedded registry object, falling back to the raw map.
    pub fn decode(&self, document: &Json) -> Option<Value> {
        let (info, _) = self.info_fields();
        let typed = document.get(info).and_then(|i| match self {
            Collection::Service => serde_json::from_value::<Service>(i.clone()).ok().map(Value::Service),
            Collection::Instance => {
                serde_json::from_value::<Instance>(i.clone()).ok().map(Value::Instance)
            }
        });
        typed.or_else(|| document.as_object().cloned().map(Value::Map))
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stored document with its primary id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Json,
}

/// One record of a collection's change stream, in its wire field names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    /// `insert`, `update`, `replace` or `delete`.
    pub operation_type: String,
    pub document_key: String,
    #[serde(default)]
    pub full_document: Option<Json>,
    #[serde(default)]
    pub resume_token: Vec<u8>,
}

pub type WatchResponseStream = BoxStream<'static, StorageResult<WatchResponse>>;

/// Minimal document-store capability.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn find_all(&self, collection: Collection) -> StorageResult<Vec<Document>>;

    /// Open the change stream, resuming after `resume_after` when given.
    async fn watch(
        &self,
        collection: Collection,
        resume_after: Option<Vec<u8>>,
    ) -> StorageResult<WatchResponseStream>;
}

/// Parse a change-stream record into a [`ChangeEvent`].
///
/// The document id is read from the full document's `_id` when present,
/// otherwise from the document key. Deletes carry no business id or value.
pub fn parse_watch_response(
    collection: Collection,
    response: &WatchResponse,
) -> StorageResult<ChangeEvent> {
    let operation = EventType::from_operation(&response.operation_type).map_err(|e| {
        StorageError::WatchFailed {
            type_name: collection.to_string(),
            reason: e.to_string(),
        }
    })?;

    let document_id = response
        .full_document
        .as_ref()
        .and_then(|d| d.get("_id"))
        .and_then(Json::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| response.document_key.clone());

    if operation == EventType::Delete {
        return Ok(ChangeEvent {
            operation,
            document_id,
            business_id: String::new(),
            value: None,
        });
    }

    let business_id = response
        .full_document
        .as_ref()
        .map(|d| collection.business_id(d))
        .unwrap_or_default();

    Ok(ChangeEvent {
        operation,
        document_id,
        business_id,
        value: response.full_document.clone(),
    })
}

#[derive(Debug, Default)]
struct CursorState {
    resume_token: RwLock<Option<Vec<u8>>>,
    revision: AtomicI64,
}

impl CursorState {
    fn token(&self) -> Option<Vec<u8>> {
        self.resume_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: Vec<u8>) {
        *self
            .resume_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn next_revision(&self) -> Revision {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// [`ListWatch`] over one document collection.
pub struct DocumentListWatch {
    type_name: String,
    collection: Collection,
    prefix: Vec<u8>,
    source: Arc<dyn DocumentSource>,
    config: ListWatchConfig,
    cursor: Arc<CursorState>,
}

impl DocumentListWatch {
    pub fn new(
        type_name: impl Into<String>,
        collection: Collection,
        prefix: impl Into<Vec<u8>>,
        source: Arc<dyn DocumentSource>,
        config: ListWatchConfig,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            collection,
            prefix: prefix.into(),
            source,
            config,
            cursor: Arc::new(CursorState::default()),
        }
    }

    pub fn resume_token(&self) -> Option<Vec<u8>> {
        self.cursor.token()
    }

    pub fn set_resume_token(&self, token: Vec<u8>) {
        self.cursor.set_token(token);
    }

    fn key_for(&self, document_id: &str) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(document_id.as_bytes());
        key
    }
}

#[async_trait]
impl ListWatch for DocumentListWatch {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    async fn list(&self) -> StorageResult<Snapshot> {
        let documents = tokio::time::timeout(self.config.timeout, self.source.find_all(self.collection))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: format!("list {}", self.type_name),
                elapsed: self.config.timeout,
            })??;

        let revision = self.cursor.next_revision();
        let entries = documents
            .iter()
            .filter_map(|doc| {
                let value = self.collection.decode(&doc.body)?;
                Some(KeyValue::new(self.key_for(&doc.id), value).with_mod_revision(revision))
            })
            .collect();

        let resume = match self.resume_token() {
            Some(token) => ResumePoint::Token(token),
            None => ResumePoint::Revision(revision + 1),
        };
        Ok(Snapshot {
            revision,
            entries,
            resume,
        })
    }

    async fn watch(&self, from: ResumePoint) -> StorageResult<KvEventStream> {
        // Revision resume points are local; the store only understands tokens.
        let resume_after = match from {
            ResumePoint::Token(token) => Some(token),
            ResumePoint::Revision(_) => self.resume_token(),
        };
        let responses = self.source.watch(self.collection, resume_after).await?;

        let collection = self.collection;
        let prefix = self.prefix.clone();
        let cursor = Arc::clone(&self.cursor);

        let events = responses.filter_map(move |item| {
            let event = match item {
                Err(e) => Some(Err(e)),
                Ok(response) => {
                    cursor.set_token(response.resume_token.clone());
                    match parse_watch_response(collection, &response) {
                        Err(e) => Some(Err(e)),
                        Ok(change) => to_kv_event(collection, &prefix, change, cursor.next_revision()),
                    }
                }
            };
            future::ready(event)
        });

        Ok(events.boxed())
    }
}

fn to_kv_event(
    collection: Collection,
    prefix: &[u8],
    change: ChangeEvent,
    revision: Revision,
) -> Option<StorageResult<KvEvent>> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(change.document_id.as_bytes());

    let kv = match (&change.operation, &change.value) {
        (EventType::Delete, _) => KeyValue::key_only(key),
        (_, Some(document)) => match collection.decode(document) {
            Some(value) => KeyValue::new(key, value),
            None => {
                tracing::warn!(
                    collection = %collection,
                    document_id = %change.document_id,
                    "Skipping change event with undecodable document"
                );
                return None;
            }
        },
        (_, None) => {
            tracing::warn!(
                collection = %collection,
                document_id = %change.document_id,
                "Skipping change event without a full document"
            );
            return None;
        }
    };

    Some(Ok(KvEvent::new(
        change.operation,
        kv.with_mod_revision(revision),
        revision,
    )))
}
