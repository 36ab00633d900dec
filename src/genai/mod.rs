//! Outbound generative-AI plumbing and the client-side state around it.
//!
//! Everything here runs on a single cooperative control flow: workflows issue
//! their external calls one after another, and the [`queue::JobQueue`] never
//! processes more than one job at a time.

use std::time::Duration;

pub mod client;
pub mod history;
pub mod prompts;
pub mod queue;
pub mod retry;
pub mod settings;
pub mod studio;

pub use client::{GeminiClient, GenerativeModel, InlineImage, Part};
pub use retry::{with_timeout_and_retry, RetryPolicy};
pub use studio::{Derivation, Studio};

#[derive(Debug, thiserror::Error)]
pub enum GenAiError {
    #[error("Timeout after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("API request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    NoImage(&'static str),
    #[error("API key is missing. Please set your Gemini API key in settings.")]
    MissingApiKey,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Progress notifications emitted while a workflow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Retrying,
    AnalyzingImage,
    GeneratingVariations,
}

impl StepStatus {
    pub fn label(self) -> &'static str {
        match self {
            StepStatus::Retrying => "Retrying...",
            StepStatus::AnalyzingImage => "Analyzing Image...",
            StepStatus::GeneratingVariations => "Generating Variations...",
        }
    }
}

/// Receiver for [`StepStatus`] updates.
pub type StatusSink = dyn Fn(StepStatus) + Send + Sync;

pub(crate) fn notify(sink: Option<&StatusSink>, status: StepStatus) {
    if let Some(sink) = sink {
        sink(status);
    }
}
