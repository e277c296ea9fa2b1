//! Job record and its lifecycle state machine.
//!
//! A [`Job`] is an immutable snapshot. Every mutation is a pure function
//! that takes the current snapshot and returns the next one, or `None`
//! when nothing must be written. Storage layers run these functions
//! inside their per-job atomic update, so the rules here are the single
//! source of truth for what a worker report may change.
//!
//! Lifecycle: `QUEUED -> RUNNING -> {DONE | FAILED | CANCELED}`. Terminal
//! statuses freeze the whole record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Message stored when a job fails without a usable reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Job failed without an error message";

/// Upper bound for a stored error message, in characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 4000;

/// Largest brick budget a generation request may ask for.
pub const MAX_BRICK_BUDGET: i32 = 10_000;

/// Maximum length of a job title.
const MAX_TITLE_LEN: usize = 200;

/// Language used when a request does not specify one.
const DEFAULT_LANGUAGE: &str = "en";

macro_rules! define_job_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Wire and column representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

define_job_enum! {
    /// Coarse lifecycle state: is the job alive, and how did it end.
    JobStatus {
        Queued = "QUEUED",
        Running = "RUNNING",
        Done = "DONE",
        Failed = "FAILED",
        Canceled = "CANCELED",
    }
}

define_job_enum! {
    /// Fine-grained pipeline step. Declaration order is pipeline order.
    JobStage {
        UploadValidated = "UPLOAD_VALIDATED",
        ThreeDPreview = "THREE_D_PREVIEW",
        Generating = "GENERATING",
        Model = "MODEL",
        Verifying = "VERIFYING",
        Rendering = "RENDERING",
        Blueprint = "BLUEPRINT",
        Packaging = "PACKAGING",
        #[serde(alias = "COMPLETE")]
        Done = "DONE",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Canceled)
    }

    /// Position on the lifecycle axis. Status never moves to a lower rank.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Done | JobStatus::Failed | JobStatus::Canceled => 2,
        }
    }
}

/// Kind of input the worker starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Image,
    Drawing,
    Prompt,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Image => "image",
            SourceType::Drawing => "drawing",
            SourceType::Prompt => "prompt",
        }
    }
}

impl FromStr for SourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(SourceType::Image),
            "drawing" => Ok(SourceType::Drawing),
            "prompt" => Ok(SourceType::Prompt),
            other => Err(CoreError::Validation(format!("Unknown source type '{other}'"))),
        }
    }
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Parameters a worker needs to start a generation on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Age band of the builder, e.g. `"6-7"`.
    pub age: String,
    /// Upper bound on the number of bricks.
    pub budget: i32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub source_type: SourceType,
}

/// Result fields of a job.
///
/// Also used as the sparse patch for [`Job::merge_results`]: every `None`
/// (or blank) field of a patch means "leave as is", never "clear".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub preview_image_url: Option<String>,
    pub model_key: Option<String>,
    pub blueprint_pdf_key: Option<String>,
    pub bom_key: Option<String>,
    pub corrected_image_url: Option<String>,
    pub glb_url: Option<String>,
    pub ldr_url: Option<String>,
    pub initial_ldr_url: Option<String>,
    pub bom_url: Option<String>,
    pub pdf_url: Option<String>,
    pub background_url: Option<String>,
    pub parts: Option<i32>,
    pub final_target: Option<i32>,
    pub suggested_tags: Option<Vec<String>>,
    pub est_cost: Option<f64>,
    pub token_count: Option<i32>,
    pub stability_score: Option<i32>,
}

fn merge_text(slot: &mut Option<String>, incoming: &Option<String>) -> bool {
    match incoming {
        Some(value) if !value.trim().is_empty() && slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

fn merge_value<T: Clone + PartialEq>(slot: &mut Option<T>, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

impl JobResults {
    /// Copy every present field of `patch` into `self`.
    ///
    /// Returns `true` if any field changed.
    pub fn merge(&mut self, patch: &JobResults) -> bool {
        let mut changed = false;
        changed |= merge_text(&mut self.preview_image_url, &patch.preview_image_url);
        changed |= merge_text(&mut self.model_key, &patch.model_key);
        changed |= merge_text(&mut self.blueprint_pdf_key, &patch.blueprint_pdf_key);
        changed |= merge_text(&mut self.bom_key, &patch.bom_key);
        changed |= merge_text(&mut self.corrected_image_url, &patch.corrected_image_url);
        changed |= merge_text(&mut self.glb_url, &patch.glb_url);
        changed |= merge_text(&mut self.ldr_url, &patch.ldr_url);
        changed |= merge_text(&mut self.initial_ldr_url, &patch.initial_ldr_url);
        changed |= merge_text(&mut self.bom_url, &patch.bom_url);
        changed |= merge_text(&mut self.pdf_url, &patch.pdf_url);
        changed |= merge_text(&mut self.background_url, &patch.background_url);
        changed |= merge_value(&mut self.parts, &patch.parts);
        changed |= merge_value(&mut self.final_target, &patch.final_target);
        if patch.suggested_tags.as_ref().is_some_and(|tags| !tags.is_empty()) {
            changed |= merge_value(&mut self.suggested_tags, &patch.suggested_tags);
        }
        changed |= merge_value(&mut self.est_cost, &patch.est_cost);
        changed |= merge_value(&mut self.token_count, &patch.token_count);
        changed |= merge_value(&mut self.stability_score, &patch.stability_score);
        changed
    }

    /// True when a merge of this patch could not change anything.
    pub fn is_empty(&self) -> bool {
        !JobResults::default().merge(self)
    }
}

/// Input for creating a job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub owner_id: String,
    pub title: Option<String>,
    pub source_image_url: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl NewJob {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.owner_id.trim().is_empty() {
            return Err(CoreError::Validation("ownerId is required".into()));
        }
        if self.source_image_url.trim().is_empty() {
            return Err(CoreError::Validation("sourceImageUrl is required".into()));
        }
        if let Some(title) = &self.title {
            if title.chars().count() > MAX_TITLE_LEN {
                return Err(CoreError::Validation(format!(
                    "title too long (max {MAX_TITLE_LEN} characters)"
                )));
            }
        }
        if self.params.age.trim().is_empty() {
            return Err(CoreError::Validation("age is required".into()));
        }
        if !(1..=MAX_BRICK_BUDGET).contains(&self.params.budget) {
            return Err(CoreError::Validation(format!(
                "budget must be between 1 and {MAX_BRICK_BUDGET}"
            )));
        }
        Ok(())
    }
}

/// One generation request tracked end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub owner_id: String,
    pub title: Option<String>,
    pub status: JobStatus,
    pub stage: JobStage,
    pub source_image_url: String,
    pub params: GenerationParams,
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub results: JobResults,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub stage_updated_at: Timestamp,
}

/// Trim, default, and bound a failure message so `FAILED` always carries
/// a non-empty reason.
pub fn normalize_failure_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return DEFAULT_FAILURE_MESSAGE.to_string();
    }
    trimmed.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

impl Job {
    /// Build the initial `QUEUED` record for a validated request.
    pub fn queued(id: JobId, input: NewJob, now: Timestamp) -> Self {
        Self {
            id,
            owner_id: input.owner_id,
            title: input.title.filter(|t| !t.trim().is_empty()),
            status: JobStatus::Queued,
            stage: JobStage::UploadValidated,
            source_image_url: input.source_image_url,
            params: input.params,
            error_message: None,
            results: JobResults::default(),
            created_at: now,
            updated_at: now,
            stage_updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a worker stage/status report.
    ///
    /// Returns `None` for a terminal job: a repeated terminal report is
    /// accepted without error, anything else is dropped. With both
    /// arguments `None` the call is a heartbeat that only moves
    /// `updated_at`. Stage never moves backwards and status never drops
    /// to a lower lifecycle rank.
    pub fn advance_stage(
        &self,
        stage: Option<JobStage>,
        status: Option<JobStatus>,
        now: Timestamp,
    ) -> Option<Job> {
        if self.is_terminal() {
            return None;
        }

        let mut next = self.clone();
        next.updated_at = now;

        if let Some(stage) = stage {
            if stage > next.stage {
                next.stage = stage;
            }
        }

        next.status = match status {
            Some(requested) if requested.rank() >= self.status.rank() => requested,
            Some(_) => self.status,
            None if stage.is_some() && self.status == JobStatus::Queued => JobStatus::Running,
            None => self.status,
        };

        match next.status {
            JobStatus::Done => next.stage = JobStage::Done,
            // FAILED must carry a message; a bare status report gets the default.
            JobStatus::Failed => {
                next.error_message = Some(DEFAULT_FAILURE_MESSAGE.to_string());
            }
            _ => {}
        }

        if next.stage != self.stage {
            next.stage_updated_at = now;
        }

        Some(next)
    }

    /// Sparse-merge result fields. `None` when the job is terminal or the
    /// patch changes nothing.
    pub fn merge_results(&self, patch: &JobResults, now: Timestamp) -> Option<Job> {
        if self.is_terminal() {
            return None;
        }

        let mut next = self.clone();
        if !next.results.merge(patch) {
            return None;
        }
        next.updated_at = now;
        Some(next)
    }

    /// Move a live job to `FAILED` regardless of its stage.
    ///
    /// `None` when the job is already terminal: the first terminal outcome
    /// is kept.
    pub fn mark_failed(&self, message: &str, now: Timestamp) -> Option<Job> {
        if self.is_terminal() {
            return None;
        }

        let mut next = self.clone();
        next.status = JobStatus::Failed;
        next.error_message = Some(normalize_failure_message(message));
        next.updated_at = now;
        Some(next)
    }

    /// Mark a live job `CANCELED`. In-flight workers are not notified.
    pub fn cancel(&self, now: Timestamp) -> Result<Job, CoreError> {
        if self.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job is already {} and cannot be canceled",
                self.status
            )));
        }

        let mut next = self.clone();
        next.status = JobStatus::Canceled;
        next.updated_at = now;
        Ok(next)
    }
}
