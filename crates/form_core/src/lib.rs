//! Form-state controller: path-addressable field values, dynamic list rows
//! with typed row identity, validation-error mapping, submit lifecycle, and
//! per-file upload tracking.
//!
//! Each form owns exactly one [`FormController`]; state is never shared
//! across forms. Rows in dynamic array fields are identified by a
//! [`RowRef`]: rows the server knows carry an `id`, unsaved rows carry a
//! client-generated `local_id`, and a row never carries both.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared::{
    domain::{DraftId, FileId},
    error::ValidationErrors,
};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("invalid value path '{0}'")]
    InvalidPath(String),
    #[error("value at '{0}' is not an object")]
    NotAnObject(String),
    #[error("value at '{0}' is not an array")]
    NotAnArray(String),
    #[error("index {index} out of bounds at '{path}'")]
    IndexOutOfBounds { path: String, index: usize },
    #[error("row identity violation: {0}")]
    RowIdentity(String),
    #[error("no row matches the given reference")]
    RowNotFound,
}

/// Identity of one entry in a dynamic array field. Saved rows are
/// addressed by their server id, unsaved rows by a client draft id; the
/// two are mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowRef {
    Persisted(i64),
    Draft(DraftId),
}

impl RowRef {
    /// Reads the identity of a row object, enforcing that exactly one of
    /// `id` and `local_id` is present.
    pub fn of_row(row: &Value) -> Result<Self, FormError> {
        let id = row.get("id").and_then(Value::as_i64);
        let local = row.get("local_id").and_then(Value::as_str);
        match (id, local) {
            (Some(id), None) => Ok(Self::Persisted(id)),
            (None, Some(raw)) => {
                let parsed = Uuid::parse_str(raw)
                    .map_err(|_| FormError::RowIdentity(format!("malformed local_id '{raw}'")))?;
                Ok(Self::Draft(DraftId(parsed)))
            }
            (Some(_), Some(_)) => Err(FormError::RowIdentity(
                "row carries both id and local_id".to_string(),
            )),
            (None, None) => Err(FormError::RowIdentity(
                "row carries neither id nor local_id".to_string(),
            )),
        }
    }

    /// Draft ids are compared as strings since that is how they are stored
    /// in the row object.
    fn matches_row(&self, row: &Value) -> bool {
        match self {
            Self::Persisted(id) => row.get("id").and_then(Value::as_i64) == Some(*id),
            Self::Draft(draft) => row
                .get("local_id")
                .and_then(Value::as_str)
                .is_some_and(|raw| raw == draft.to_string()),
        }
    }
}

enum PathSegment {
    Field(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, FormError> {
    if path.is_empty() {
        return Err(FormError::InvalidPath(path.to_string()));
    }
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (field, mut rest) = match part.find('[') {
            Some(pos) => part.split_at(pos),
            None => (part, ""),
        };
        if field.is_empty() && rest.is_empty() {
            return Err(FormError::InvalidPath(path.to_string()));
        }
        if !field.is_empty() {
            segments.push(PathSegment::Field(field.to_string()));
        }
        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| FormError::InvalidPath(path.to_string()))?;
            let index = rest[1..close]
                .parse::<usize>()
                .map_err(|_| FormError::InvalidPath(path.to_string()))?;
            segments.push(PathSegment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(FormError::InvalidPath(path.to_string()));
            }
        }
    }
    Ok(segments)
}

fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path).ok()?;
    let mut current = root;
    for segment in &segments {
        current = match segment {
            PathSegment::Field(name) => current.get(name.as_str())?,
            PathSegment::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate objects as needed.
/// Array segments must address an existing entry or the slot one past the
/// end (append).
fn set_at(root: &mut Value, path: &str, value: Value) -> Result<(), FormError> {
    let segments = parse_path(path)?;
    let mut current = root;
    for (position, segment) in segments.iter().enumerate() {
        let last = position == segments.len() - 1;
        match segment {
            PathSegment::Field(name) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                let object = current
                    .as_object_mut()
                    .ok_or_else(|| FormError::NotAnObject(path.to_string()))?;
                if last {
                    object.insert(name.clone(), value);
                    return Ok(());
                }
                current = object.entry(name.clone()).or_insert(Value::Null);
            }
            PathSegment::Index(index) => {
                let array = current
                    .as_array_mut()
                    .ok_or_else(|| FormError::NotAnArray(path.to_string()))?;
                if *index > array.len() {
                    return Err(FormError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *index,
                    });
                }
                if *index == array.len() {
                    array.push(Value::Null);
                }
                if last {
                    array[*index] = value;
                    return Ok(());
                }
                current = &mut array[*index];
            }
        }
    }
    Ok(())
}

/// Field values, their baseline, and the server's last validation verdict.
#[derive(Debug, Clone)]
pub struct FormState {
    pub values: Value,
    pub initial_values: Value,
    pub field_errors: BTreeMap<String, Vec<String>>,
    pub non_field_errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Saved(Value),
    Rejected(ValidationErrors),
}

/// Result of a [`FormController::submit`] call that reached the server.
/// Transport-level failures surface as `Err` instead and never touch the
/// field-error channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Saved,
    Invalid,
}

#[async_trait]
pub trait FormSubmitter: Send + Sync {
    async fn submit(&self, values: &Value) -> Result<SubmitOutcome>;
}

pub struct MissingFormSubmitter;

#[async_trait]
impl FormSubmitter for MissingFormSubmitter {
    async fn submit(&self, _values: &Value) -> Result<SubmitOutcome> {
        Err(anyhow::anyhow!("no form backend configured"))
    }
}

#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<FileId>;
}

pub struct MissingFileUploader;

#[async_trait]
impl FileUploader for MissingFileUploader {
    async fn upload(&self, filename: &str, _bytes: &[u8]) -> Result<FileId> {
        Err(anyhow::anyhow!("no upload backend configured for '{filename}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Stored { file_id: FileId },
    Failed { reason: String },
}

/// One queued file. Failures are tracked per slot so a batch with one bad
/// file still stores the rest.
#[derive(Debug, Clone)]
pub struct UploadSlot {
    pub row: RowRef,
    pub field_key: String,
    pub filename: String,
    bytes: Vec<u8>,
    pub status: UploadStatus,
}

#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub stored: Vec<RowRef>,
    pub failed: Vec<(RowRef, String)>,
}

impl UploadReport {
    pub fn all_stored(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the state of one mounted form.
pub struct FormController {
    submitter: Arc<dyn FormSubmitter>,
    uploader: Arc<dyn FileUploader>,
    state: FormState,
    uploads: Vec<UploadSlot>,
    submitting: bool,
}

impl FormController {
    pub fn new(
        initial_values: Value,
        submitter: Arc<dyn FormSubmitter>,
        uploader: Arc<dyn FileUploader>,
    ) -> Result<Self, FormError> {
        if !initial_values.is_object() {
            return Err(FormError::NotAnObject("<root>".to_string()));
        }
        Ok(Self {
            submitter,
            uploader,
            state: FormState {
                values: initial_values.clone(),
                initial_values,
                field_errors: BTreeMap::new(),
                non_field_errors: Vec::new(),
            },
            uploads: Vec::new(),
            submitting: false,
        })
    }

    pub fn values(&self) -> &Value {
        &self.state.values
    }

    pub fn field_errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.state.field_errors
    }

    pub fn non_field_errors(&self) -> &[String] {
        &self.state.non_field_errors
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn is_dirty(&self) -> bool {
        self.state.values != self.state.initial_values
    }

    pub fn value_at(&self, path: &str) -> Option<&Value> {
        value_at(&self.state.values, path)
    }

    /// Writes one field. Editing a field clears its stale server error so
    /// the user is not shown a message about a value they already changed.
    pub fn set_value(&mut self, path: &str, value: Value) -> Result<(), FormError> {
        set_at(&mut self.state.values, path, value)?;
        self.state.field_errors.remove(path);
        Ok(())
    }

    /// Discards edits and errors, returning to the baseline values.
    pub fn reset(&mut self) {
        self.state.values = self.state.initial_values.clone();
        self.state.field_errors.clear();
        self.state.non_field_errors.clear();
    }

    /// Appends `default_object` to the named array field under a fresh
    /// draft id. The default object must not carry a server `id`; new rows
    /// get one only when the form is saved.
    pub fn add_field_row(&mut self, key: &str, default_object: Value) -> Result<RowRef, FormError> {
        let Value::Object(mut row) = default_object else {
            return Err(FormError::NotAnObject(key.to_string()));
        };
        if row.contains_key("id") {
            return Err(FormError::RowIdentity(
                "default row object must not carry a server id".to_string(),
            ));
        }

        let draft = DraftId::fresh();
        row.insert("local_id".to_string(), json!(draft.to_string()));

        let rows = self.array_field_mut(key)?;
        rows.push(Value::Object(row));
        Ok(RowRef::Draft(draft))
    }

    /// Removes the entry whose persisted id or draft id matches `row`.
    pub fn remove_field_row(&mut self, key: &str, row: &RowRef) -> Result<(), FormError> {
        let rows = self.array_field_mut(key)?;
        let position = rows
            .iter()
            .position(|entry| row.matches_row(entry))
            .ok_or(FormError::RowNotFound)?;
        rows.remove(position);
        Ok(())
    }

    /// Row identities of the named array field, in order.
    pub fn row_refs(&self, key: &str) -> Result<Vec<RowRef>, FormError> {
        let rows = self
            .state
            .values
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| FormError::NotAnArray(key.to_string()))?;
        rows.iter().map(RowRef::of_row).collect()
    }

    /// Adds a file row to `field_key` and queues its content for upload.
    pub fn queue_upload(
        &mut self,
        field_key: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<RowRef, FormError> {
        let row = self.add_field_row(field_key, json!({ "filename": filename }))?;
        self.uploads.push(UploadSlot {
            row,
            field_key: field_key.to_string(),
            filename: filename.to_string(),
            bytes,
            status: UploadStatus::Pending,
        });
        Ok(row)
    }

    pub fn uploads(&self) -> &[UploadSlot] {
        &self.uploads
    }

    pub fn failed_uploads(&self) -> Vec<&UploadSlot> {
        self.uploads
            .iter()
            .filter(|slot| matches!(slot.status, UploadStatus::Failed { .. }))
            .collect()
    }

    /// Uploads every pending slot. A failing file is recorded on its slot
    /// and reported without discarding the files that succeeded.
    pub async fn upload_pending(&mut self) -> UploadReport {
        let uploader = Arc::clone(&self.uploader);
        let mut report = UploadReport::default();

        for position in 0..self.uploads.len() {
            if self.uploads[position].status != UploadStatus::Pending {
                continue;
            }
            let row = self.uploads[position].row;
            let field_key = self.uploads[position].field_key.clone();
            let filename = self.uploads[position].filename.clone();
            let bytes = self.uploads[position].bytes.clone();

            match uploader.upload(&filename, &bytes).await {
                Ok(file_id) => {
                    self.uploads[position].status = UploadStatus::Stored { file_id };
                    if let Err(err) = self.record_file_id(&field_key, &row, file_id) {
                        debug!("uploaded file row missing from '{field_key}': {err}");
                    }
                    report.stored.push(row);
                }
                Err(err) => {
                    warn!("upload failed for '{filename}': {err:#}");
                    self.uploads[position].status = UploadStatus::Failed {
                        reason: err.to_string(),
                    };
                    report.failed.push((row, err.to_string()));
                }
            }
        }

        report
    }

    /// Sends the current values through the submit seam. A `Rejected`
    /// outcome lands in the per-field error map; a `Saved` outcome adopts
    /// the server's canonical object as the new baseline and promotes
    /// stored draft uploads to their persisted ids.
    pub async fn submit(&mut self) -> Result<SubmitStatus> {
        self.submitting = true;
        let outcome = self.submitter.submit(&self.state.values).await;
        self.submitting = false;

        match outcome? {
            SubmitOutcome::Saved(saved) => {
                self.state.field_errors.clear();
                self.state.non_field_errors.clear();
                self.state.values = saved.clone();
                self.state.initial_values = saved;
                self.reconcile_uploads();
                Ok(SubmitStatus::Saved)
            }
            SubmitOutcome::Rejected(errors) => {
                self.state.field_errors = errors.field_errors;
                self.state.non_field_errors = errors.non_field_errors;
                Ok(SubmitStatus::Invalid)
            }
        }
    }

    fn array_field_mut(&mut self, key: &str) -> Result<&mut Vec<Value>, FormError> {
        let object = self
            .state
            .values
            .as_object_mut()
            .ok_or_else(|| FormError::NotAnObject("<root>".to_string()))?;
        let entry = object.entry(key.to_string()).or_insert_with(|| json!([]));
        entry
            .as_array_mut()
            .ok_or_else(|| FormError::NotAnArray(key.to_string()))
    }

    fn record_file_id(
        &mut self,
        field_key: &str,
        row: &RowRef,
        file_id: FileId,
    ) -> Result<(), FormError> {
        let rows = self.array_field_mut(field_key)?;
        let entry = rows
            .iter_mut()
            .find(|entry| row.matches_row(entry))
            .ok_or(FormError::RowNotFound)?;
        if let Some(object) = entry.as_object_mut() {
            object.insert("file_id".to_string(), json!(file_id.0));
        }
        Ok(())
    }

    /// After a save the server response carries persisted rows; slots that
    /// were drafts pick up their server id by matching on `file_id`.
    fn reconcile_uploads(&mut self) {
        for slot in &mut self.uploads {
            let UploadStatus::Stored { file_id } = &slot.status else {
                continue;
            };
            let file_id = *file_id;
            if matches!(slot.row, RowRef::Persisted(_)) {
                continue;
            }
            let persisted = self
                .state
                .values
                .get(&slot.field_key)
                .and_then(Value::as_array)
                .and_then(|rows| {
                    rows.iter().find(|entry| {
                        entry.get("file_id").and_then(Value::as_i64) == Some(file_id.0)
                    })
                })
                .and_then(|entry| entry.get("id"))
                .and_then(Value::as_i64);

            match persisted {
                Some(id) => slot.row = RowRef::Persisted(id),
                None => debug!(
                    "no persisted row found for stored file {} in '{}'",
                    file_id.0, slot.field_key
                ),
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
