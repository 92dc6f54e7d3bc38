use crate::models::{BottleRecord, ImagePayload};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("device is offline")]
    Offline,
    #[error("no images supplied for analysis")]
    NoImages,
    #[error("empty response from analysis service")]
    EmptyResponse,
    #[error("malformed response from analysis service: {0}")]
    MalformedResponse(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("analysis service error ({status}): {message}")]
    Service { status: u16, message: String },
    #[error("request blocked by safety filters: {0}")]
    Blocked(String),
    #[error("analysis request timed out")]
    Timeout,
}

impl AnalysisError {
    /// Failures worth another attempt: timeouts, connection problems,
    /// rate limiting and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            AnalysisError::Timeout | AnalysisError::Transport(_) => true,
            AnalysisError::Service { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Message shown to the user; details go to the log.
    pub fn user_message(&self) -> &'static str {
        match self {
            AnalysisError::Offline => {
                "You are currently offline. AI analysis requires an internet connection."
            }
            _ => "Failed to analyze image. Please try again.",
        }
    }
}

/// Trait for bottle image analyzers (Gemini, test doubles, ...)
#[async_trait::async_trait]
pub trait BottleAnalyzer: Send + Sync {
    /// Analyzes all images in one request; they are sent in the given order.
    async fn analyze(&self, images: &[ImagePayload]) -> Result<Vec<BottleRecord>, AnalysisError>;

    async fn analyze_image(&self, image: ImagePayload) -> Result<Vec<BottleRecord>, AnalysisError> {
        self.analyze(std::slice::from_ref(&image)).await
    }
}
