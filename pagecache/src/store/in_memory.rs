//! An object store that keeps objects in process memory.

use super::{ObjectAttributes, ObjectMeta, ObjectStore, ObjectStoreError, Result};
use crate::util::clock::{Clock, SystemClock};
use crate::util::close::Close;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// An object store keeping objects in memory.
///
/// Clones share the same objects, so a clone can be handed to a cache while the original is used
/// to inspect what was stored. The store also counts the operations it serves.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore<C: Clock = SystemClock> {
    state: Arc<Mutex<State>>,
    clock: C,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    counts: OperationCounts,
    injected_failure: Option<u16>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    attributes: ObjectAttributes,
    stored_at: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self) -> ObjectMeta {
        ObjectMeta {
            content_length: Some(self.body.len() as u64),
            content_type: Some(self.attributes.content_type.clone()),
            content_disposition: Some(self.attributes.content_disposition.clone()),
            last_modified: Some(self.stored_at),
            written_at: Some(self.attributes.written_at),
        }
    }
}

/// Number of operations served by an [InMemoryObjectStore], per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub head: usize,
    pub get: usize,
    pub put: usize,
    pub upload: usize,
}

impl OperationCounts {
    pub fn total(&self) -> usize {
        self.head + self.get + self.put + self.upload
    }
}

impl InMemoryObjectStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryObjectStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryObjectStore<C> {
    /// Creates an empty store that stamps objects with the time of `clock` when they are stored.
    pub fn with_clock(clock: C) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.lock().counts
    }

    /// Makes every following operation fail with the given status, or succeed again for `None`.
    pub fn inject_failure(&self, status: Option<u16>) {
        self.lock().injected_failure = status;
    }

    /// Returns the stored contents and attributes of an object without counting an operation.
    pub fn inspect(&self, name: &str) -> Option<(Bytes, ObjectAttributes)> {
        self.lock()
            .objects
            .get(name)
            .map(|object| (object.body.clone(), object.attributes.clone()))
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-written object behind, since objects
        // are replaced as a whole.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(state: &State) -> Result<()> {
        match state.injected_failure {
            Some(status) => Err(ObjectStoreError::Status { status, code: None }),
            None => Ok(()),
        }
    }

    fn store(&self, name: &str, body: Bytes, attributes: ObjectAttributes) {
        let stored_at = self.clock.now();
        self.lock().objects.insert(
            name.to_string(),
            StoredObject {
                body,
                attributes,
                stored_at,
            },
        );
    }
}

impl<C: Clock + Clone> ObjectStore for InMemoryObjectStore<C> {
    type Reader = Cursor<Bytes>;
    type Upload = InMemoryUpload<C>;

    fn head_object(&self, name: &str) -> Result<ObjectMeta> {
        let mut state = self.lock();
        state.counts.head += 1;
        Self::check_failure(&state)?;
        state
            .objects
            .get(name)
            .map(StoredObject::meta)
            .ok_or(ObjectStoreError::NotFound)
    }

    fn get_object(&self, name: &str) -> Result<(ObjectMeta, Self::Reader)> {
        let mut state = self.lock();
        state.counts.get += 1;
        Self::check_failure(&state)?;
        state
            .objects
            .get(name)
            .map(|object| (object.meta(), Cursor::new(object.body.clone())))
            .ok_or(ObjectStoreError::NotFound)
    }

    fn put_object(&self, name: &str, body: Bytes, attributes: &ObjectAttributes) -> Result<()> {
        {
            let mut state = self.lock();
            state.counts.put += 1;
            Self::check_failure(&state)?;
        }
        self.store(name, body, attributes.clone());
        Ok(())
    }

    fn start_upload(&self, name: &str, attributes: &ObjectAttributes) -> Result<Self::Upload> {
        let mut state = self.lock();
        state.counts.upload += 1;
        Self::check_failure(&state)?;
        Ok(InMemoryUpload {
            store: self.clone(),
            name: name.to_string(),
            attributes: attributes.clone(),
            buffer: BytesMut::with_capacity(
                usize::try_from(attributes.content_length).unwrap_or_default(),
            ),
        })
    }
}

/// A streaming upload into an [InMemoryObjectStore]. The object is stored on close.
pub struct InMemoryUpload<C: Clock> {
    store: InMemoryObjectStore<C>,
    name: String,
    attributes: ObjectAttributes,
    buffer: BytesMut,
}

impl<C: Clock> Write for InMemoryUpload<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if (self.buffer.len() + buf.len()) as u64 > self.attributes.content_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "upload exceeds declared content length",
            ));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: Clock> Close for InMemoryUpload<C> {
    fn close(self) -> io::Result<()> {
        if self.buffer.len() as u64 != self.attributes.content_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upload shorter than declared content length",
            ));
        }
        self.store
            .store(&self.name, self.buffer.freeze(), self.attributes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CannedAcl;
    use crate::util::clock::test_fakes::ControlledClock;
    use chrono::TimeZone;
    use std::io::Read;

    fn attributes(content_length: u64) -> ObjectAttributes {
        ObjectAttributes {
            content_type: "text/plain".to_string(),
            content_length,
            content_disposition: "inline; filename=\"a.txt\"".to_string(),
            last_modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            written_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap(),
            acl: CannedAcl::Private,
        }
    }

    #[test]
    fn test_head_of_missing_object_is_not_found() {
        let store = InMemoryObjectStore::new();
        assert!(matches!(
            store.head_object("missing"),
            Err(ObjectStoreError::NotFound)
        ));
    }

    #[test]
    fn test_put_then_get_returns_body_and_meta() {
        let clock = ControlledClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        let store = InMemoryObjectStore::with_clock(clock.clone());
        store
            .put_object("a", Bytes::from_static(b"Hello!"), &attributes(6))
            .unwrap();

        let (meta, mut reader) = store.get_object("a").unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "Hello!");
        assert_eq!(
            meta,
            ObjectMeta {
                content_length: Some(6),
                content_type: Some("text/plain".to_string()),
                content_disposition: Some("inline; filename=\"a.txt\"".to_string()),
                last_modified: Some(clock.now()),
                written_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap()),
            }
        );
    }

    #[test]
    fn test_clones_share_objects_and_counts() {
        let store = InMemoryObjectStore::new();
        let clone = store.clone();
        clone
            .put_object("a", Bytes::from_static(b"x"), &attributes(1))
            .unwrap();
        assert!(store.head_object("a").is_ok());
        assert_eq!(
            store.operation_counts(),
            OperationCounts {
                head: 1,
                put: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_upload_becomes_visible_on_close() {
        let store = InMemoryObjectStore::new();
        let mut upload = store.start_upload("a", &attributes(5)).unwrap();
        upload.write_all(b"Hello").unwrap();
        assert!(store.inspect("a").is_none());
        upload.close().unwrap();
        assert_eq!(store.inspect("a").unwrap().0, Bytes::from_static(b"Hello"));
    }

    #[test]
    fn test_upload_rejects_wrong_length() {
        let store = InMemoryObjectStore::new();
        let mut upload = store.start_upload("a", &attributes(5)).unwrap();
        assert!(upload.write_all(b"Hello, world").is_err());

        let mut upload = store.start_upload("b", &attributes(5)).unwrap();
        upload.write_all(b"Hel").unwrap();
        assert!(upload.close().is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_injected_failure_applies_to_all_operations() {
        let store = InMemoryObjectStore::new();
        store.inject_failure(Some(503));
        assert!(matches!(
            store.head_object("a"),
            Err(ObjectStoreError::Status { status: 503, .. })
        ));
        assert!(
            store
                .put_object("a", Bytes::new(), &attributes(0))
                .is_err()
        );
        store.inject_failure(None);
        assert!(matches!(
            store.head_object("a"),
            Err(ObjectStoreError::NotFound)
        ));
    }
}
