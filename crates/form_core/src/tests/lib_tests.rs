use std::sync::{
    atomic::{AtomicI64, Ordering},
    Mutex as StdMutex,
};

use anyhow::anyhow;

use super::*;

#[derive(Clone)]
enum ScriptedSubmit {
    Saved(Value),
    Rejected(ValidationErrors),
    Transport(String),
}

struct ScriptedSubmitter {
    outcome: ScriptedSubmit,
    submitted: StdMutex<Vec<Value>>,
}

impl ScriptedSubmitter {
    fn saved(value: Value) -> Arc<Self> {
        Arc::new(Self {
            outcome: ScriptedSubmit::Saved(value),
            submitted: StdMutex::new(Vec::new()),
        })
    }

    fn rejected(errors: ValidationErrors) -> Arc<Self> {
        Arc::new(Self {
            outcome: ScriptedSubmit::Rejected(errors),
            submitted: StdMutex::new(Vec::new()),
        })
    }

    fn transport_failure(message: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: ScriptedSubmit::Transport(message.to_string()),
            submitted: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FormSubmitter for ScriptedSubmitter {
    async fn submit(&self, values: &Value) -> anyhow::Result<SubmitOutcome> {
        self.submitted.lock().expect("submitted").push(values.clone());
        match self.outcome.clone() {
            ScriptedSubmit::Saved(value) => Ok(SubmitOutcome::Saved(value)),
            ScriptedSubmit::Rejected(errors) => Ok(SubmitOutcome::Rejected(errors)),
            ScriptedSubmit::Transport(message) => Err(anyhow!(message)),
        }
    }
}

struct ScriptedUploader {
    fail_on: Option<String>,
    next_id: AtomicI64,
    uploaded: StdMutex<Vec<String>>,
}

impl ScriptedUploader {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail_on: None,
            next_id: AtomicI64::new(1),
            uploaded: StdMutex::new(Vec::new()),
        })
    }

    fn failing_on(filename: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(filename.to_string()),
            next_id: AtomicI64::new(1),
            uploaded: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FileUploader for ScriptedUploader {
    async fn upload(&self, filename: &str, _bytes: &[u8]) -> anyhow::Result<FileId> {
        if self.fail_on.as_deref() == Some(filename) {
            return Err(anyhow!("storage rejected '{filename}'"));
        }
        self.uploaded
            .lock()
            .expect("uploaded")
            .push(filename.to_string());
        Ok(FileId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

fn candidate_form() -> FormController {
    FormController::new(
        json!({
            "first_name": "Jane",
            "last_name": "Doe",
            "email": "jane@example.com",
            "phones": [
                { "id": 11, "number": "+1 555 0100" }
            ],
            "resumes": [],
        }),
        Arc::new(MissingFormSubmitter),
        Arc::new(MissingFileUploader),
    )
    .expect("form")
}

#[test]
fn add_then_remove_round_trips_the_array() {
    let mut form = candidate_form();
    let before = form.values().get("phones").cloned().expect("phones");

    let row = form
        .add_field_row("phones", json!({ "number": "" }))
        .expect("add");
    assert_eq!(form.values()["phones"].as_array().expect("rows").len(), 2);

    form.remove_field_row("phones", &row).expect("remove");
    assert_eq!(form.values()["phones"], before);
}

#[test]
fn added_rows_carry_a_string_local_id_and_no_server_id() {
    let mut form = candidate_form();
    let row = form
        .add_field_row("phones", json!({ "number": "+1 555 0101" }))
        .expect("add");

    let added = form.values()["phones"]
        .as_array()
        .expect("rows")
        .last()
        .cloned()
        .expect("added row");
    assert!(added.get("id").is_none());
    assert!(added["local_id"].is_string());
    assert_eq!(RowRef::of_row(&added).expect("identity"), row);
}

#[test]
fn default_row_object_with_server_id_is_rejected() {
    let mut form = candidate_form();
    let err = form
        .add_field_row("phones", json!({ "id": 99, "number": "" }))
        .expect_err("must reject");
    assert!(matches!(err, FormError::RowIdentity(_)));
}

#[test]
fn rows_are_removable_by_persisted_id() {
    let mut form = candidate_form();
    form.remove_field_row("phones", &RowRef::Persisted(11))
        .expect("remove");
    assert!(form.values()["phones"].as_array().expect("rows").is_empty());
}

#[test]
fn removing_an_unknown_row_errors() {
    let mut form = candidate_form();
    let err = form
        .remove_field_row("phones", &RowRef::Persisted(404))
        .expect_err("unknown row");
    assert_eq!(err, FormError::RowNotFound);
}

#[test]
fn row_identity_requires_exactly_one_of_id_and_local_id() {
    let draft = DraftId::fresh();
    let both = json!({ "id": 1, "local_id": draft.to_string() });
    assert!(matches!(
        RowRef::of_row(&both),
        Err(FormError::RowIdentity(_))
    ));

    let neither = json!({ "number": "+1 555 0100" });
    assert!(matches!(
        RowRef::of_row(&neither),
        Err(FormError::RowIdentity(_))
    ));

    let persisted = json!({ "id": 7 });
    assert_eq!(
        RowRef::of_row(&persisted).expect("persisted"),
        RowRef::Persisted(7)
    );
}

#[test]
fn set_value_addresses_nested_array_paths() {
    let mut form = candidate_form();
    form.set_value("phones[0].number", json!("+1 555 0199"))
        .expect("set");
    assert_eq!(
        form.value_at("phones[0].number").cloned(),
        Some(json!("+1 555 0199"))
    );
}

#[test]
fn set_value_autovivifies_intermediate_objects() {
    let mut form = candidate_form();
    form.set_value("address.city", json!("Riga")).expect("set");
    assert_eq!(form.value_at("address.city").cloned(), Some(json!("Riga")));
}

#[test]
fn set_value_rejects_out_of_bounds_index() {
    let mut form = candidate_form();
    let err = form
        .set_value("phones[5].number", json!("+1 555 0100"))
        .expect_err("out of bounds");
    assert!(matches!(err, FormError::IndexOutOfBounds { index: 5, .. }));
}

#[tokio::test]
async fn editing_a_field_clears_its_stale_server_error() {
    let submitter =
        ScriptedSubmitter::rejected(ValidationErrors::default().field("email", "already taken"));
    let mut form = FormController::new(
        json!({ "email": "jane@example.com" }),
        submitter,
        Arc::new(MissingFileUploader),
    )
    .expect("form");

    let status = form.submit().await.expect("submit");
    assert_eq!(status, SubmitStatus::Invalid);
    assert!(form.field_errors().contains_key("email"));

    form.set_value("email", json!("jane.doe@example.com"))
        .expect("set");
    assert!(!form.field_errors().contains_key("email"));
}

#[test]
fn dirty_tracking_and_reset() {
    let mut form = candidate_form();
    assert!(!form.is_dirty());

    form.set_value("first_name", json!("Janet")).expect("set");
    assert!(form.is_dirty());

    form.reset();
    assert!(!form.is_dirty());
    assert_eq!(form.value_at("first_name").cloned(), Some(json!("Jane")));
}

#[tokio::test]
async fn rejected_submit_maps_field_errors_and_keeps_values() {
    let errors = ValidationErrors::default()
        .field("email", "enter a valid email address")
        .non_field("candidate is archived");
    let submitter = ScriptedSubmitter::rejected(errors);
    let mut form = FormController::new(
        json!({ "email": "not-an-email" }),
        submitter,
        Arc::new(MissingFileUploader),
    )
    .expect("form");

    let status = form.submit().await.expect("submit");

    assert_eq!(status, SubmitStatus::Invalid);
    assert_eq!(
        form.field_errors().get("email"),
        Some(&vec!["enter a valid email address".to_string()])
    );
    assert_eq!(form.non_field_errors(), ["candidate is archived"]);
    assert_eq!(form.value_at("email").cloned(), Some(json!("not-an-email")));
}

#[tokio::test]
async fn saved_submit_rebaselines_and_clears_errors() {
    let saved = json!({ "id": 3, "email": "jane@example.com" });
    let submitter = ScriptedSubmitter::saved(saved.clone());
    let mut form = FormController::new(
        json!({ "email": "jane@example.com" }),
        submitter,
        Arc::new(MissingFileUploader),
    )
    .expect("form");
    form.set_value("email", json!("jane@example.com")).expect("set");

    let status = form.submit().await.expect("submit");

    assert_eq!(status, SubmitStatus::Saved);
    assert!(form.field_errors().is_empty());
    assert_eq!(form.values(), &saved);
    assert!(!form.is_dirty());
}

#[tokio::test]
async fn transport_failure_bypasses_the_field_error_channel() {
    let submitter = ScriptedSubmitter::transport_failure("connection refused");
    let mut form = FormController::new(
        json!({ "email": "jane@example.com" }),
        submitter,
        Arc::new(MissingFileUploader),
    )
    .expect("form");

    let err = form.submit().await.expect_err("transport error");
    assert!(err.to_string().contains("connection refused"));
    assert!(form.field_errors().is_empty());
    assert!(!form.is_submitting());
}

#[tokio::test]
async fn upload_batch_with_one_failure_keeps_the_successes() {
    let uploader = ScriptedUploader::failing_on("broken.pdf");
    let mut form = FormController::new(
        json!({ "resumes": [] }),
        Arc::new(MissingFormSubmitter),
        uploader.clone(),
    )
    .expect("form");

    let good = form
        .queue_upload("resumes", "cv.pdf", b"good".to_vec())
        .expect("queue");
    let bad = form
        .queue_upload("resumes", "broken.pdf", b"bad".to_vec())
        .expect("queue");

    let report = form.upload_pending().await;

    assert!(!report.all_stored());
    assert_eq!(report.stored, vec![good]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, bad);
    assert_eq!(form.failed_uploads().len(), 1);

    let rows = form.values()["resumes"].as_array().expect("rows");
    assert_eq!(rows.len(), 2, "failed file row is kept for retry");
    assert_eq!(rows[0]["file_id"], json!(1), "stored file recorded in values");
    assert!(rows[1].get("file_id").is_none());
}

#[tokio::test]
async fn retry_after_failure_only_uploads_pending_slots() {
    let uploader = ScriptedUploader::failing_on("broken.pdf");
    let mut form = FormController::new(
        json!({ "resumes": [] }),
        Arc::new(MissingFormSubmitter),
        uploader.clone(),
    )
    .expect("form");

    form.queue_upload("resumes", "cv.pdf", b"good".to_vec())
        .expect("queue");
    form.queue_upload("resumes", "broken.pdf", b"bad".to_vec())
        .expect("queue");

    form.upload_pending().await;
    let report = form.upload_pending().await;

    assert!(report.stored.is_empty(), "stored slots are not re-uploaded");
    assert_eq!(uploader.uploaded.lock().expect("uploaded").len(), 1);
}

#[tokio::test]
async fn saved_response_promotes_stored_drafts_to_persisted_rows() {
    let saved = json!({
        "id": 3,
        "resumes": [
            { "id": 40, "file_id": 1, "filename": "cv.pdf" }
        ],
    });
    let submitter = ScriptedSubmitter::saved(saved);
    let uploader = ScriptedUploader::ok();
    let mut form = FormController::new(
        json!({ "resumes": [] }),
        submitter,
        uploader,
    )
    .expect("form");

    let draft = form
        .queue_upload("resumes", "cv.pdf", b"content".to_vec())
        .expect("queue");
    assert!(matches!(draft, RowRef::Draft(_)));

    let report = form.upload_pending().await;
    assert!(report.all_stored());

    let status = form.submit().await.expect("submit");
    assert_eq!(status, SubmitStatus::Saved);

    let slot = &form.uploads()[0];
    assert_eq!(slot.row, RowRef::Persisted(40));
    assert_eq!(
        form.row_refs("resumes").expect("refs"),
        vec![RowRef::Persisted(40)]
    );
}
