use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CandidateId, CandidateStage, FileId, NotificationId, ResumeId, UserId, VacancyId, VacancyStatus,
};

/// One page of a remote collection as the API returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub notification_id: NotificationId,
    pub verb: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub unread: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub candidate_id: CandidateId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub stage: CandidateStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vacancy_id: Option<VacancyId>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VacancySummary {
    pub vacancy_id: VacancyId,
    pub title: String,
    pub department: String,
    pub status: VacancyStatus,
    pub recruiter_id: UserId,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub resume_id: ResumeId,
    pub file_id: FileId,
    pub filename: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}
