// User-visible notices
// Toast text built from flow errors and outcomes. Notices end an error's path:
// nothing is retried and nothing propagates past the shell.

use crate::api::ApiError;
use crate::checkout::NavigationError;
use crate::flow::FlowError;
use crate::guard::{SubmissionError, SubmissionOutcome};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn api_message(error: &ApiError) -> String {
    match error {
        ApiError::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
        ApiError::Timeout(_) | ApiError::NetworkError(_) => {
            "We couldn't reach the server. Check your connection and try again.".to_string()
        }
        ApiError::ApiResponseError { status_code: 404, .. } => {
            "This offer is no longer available.".to_string()
        }
        ApiError::ApiResponseError { message, .. } if !message.trim().is_empty() => {
            message.clone()
        }
        ApiError::ApiResponseError { .. }
        | ApiError::DecodeError { .. }
        | ApiError::InvalidId(_) => {
            "Something went wrong on our side. Please try again.".to_string()
        }
    }
}

impl From<&FlowError> for Notice {
    fn from(error: &FlowError) -> Self {
        match error {
            FlowError::Navigation(NavigationError::StepInvalid { issues, .. }) => {
                match issues.first() {
                    Some(issue) => Notice::warning(issue.to_string()),
                    None => Notice::warning("Please complete this step"),
                }
            }
            FlowError::Navigation(NavigationError::FlowClosed) => {
                Notice::new(NoticeLevel::Info, "Checkout was closed")
            }
            FlowError::Api(e) => Notice::error(api_message(e)),
            FlowError::Submission(SubmissionError::PostFailed { reference, source }) => {
                Notice::error(format!(
                    "Booking {} failed: {}",
                    reference,
                    api_message(source)
                ))
            }
            FlowError::Submission(SubmissionError::Storage(_)) | FlowError::Storage(_) => {
                Notice::error("Your booking data could not be saved in this browser")
            }
            FlowError::NotMounted => Notice::error("No offer selected"),
            FlowError::NotReady => Notice::warning("Please complete all steps before booking"),
        }
    }
}

impl From<&SubmissionOutcome> for Notice {
    fn from(outcome: &SubmissionOutcome) -> Self {
        let reference = &outcome.confirmation().reference;
        match outcome {
            SubmissionOutcome::Posted { .. } => Notice::new(
                NoticeLevel::Success,
                format!("Booking {} confirmed", reference),
            ),
            SubmissionOutcome::Skipped { .. } => Notice::new(
                NoticeLevel::Info,
                format!("Booking {} was already submitted", reference),
            ),
        }
    }
}
