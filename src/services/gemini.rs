use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::ai_service::{AnalysisError, BottleAnalyzer};
use crate::config::Config;
use crate::models::{BottleRecord, ImagePayload};

const ANALYSIS_PROMPT: &str = "Analyze this image as a LiDAR-enhanced precision inventory system.\n\
    1. Identify ALL spirit bottles.\n\
    2. For EACH bottle, perform a Geometric Volume Analysis:\n\
       - Identify Brand and Bottle Shape (e.g., Cylindrical, Tapered, Square).\n\
       - Determine Full Volume (ml).\n\
       - Calculate Fill Percentage: Analyze the liquid line relative to the bottle's total height. \
    Account for the reduced volume in the neck and shoulders of the bottle.\n\
       - Provide a \"Confidence Score\" for the estimation.\n\
       - Explanation: Describe the visual cues (e.g., \"Liquid is exactly at the top of the label on a 700ml cylindrical bottle\").\n\
    \n\
    Return the result as an array of objects in JSON format.";

const RETRY_BACKOFF: Duration = Duration::from_millis(750);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// One bottle as the model reports it; every field is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportedBottle {
    brand: String,
    full_volume_ml: f64,
    fill_percentage: f64,
    explanation: String,
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "brand": { "type": "STRING" },
                "fullVolumeMl": { "type": "NUMBER" },
                "fillPercentage": { "type": "NUMBER" },
                "explanation": { "type": "STRING" }
            },
            "required": ["brand", "fullVolumeMl", "fillPercentage", "explanation"]
        }
    })
}

fn build_request(images: &[ImagePayload]) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(Part::Text {
        text: ANALYSIS_PROMPT.to_string(),
    });
    parts.extend(images.iter().map(|image| Part::InlineData {
        inline_data: InlineData {
            mime_type: image.mime_type().to_string(),
            data: image.data().to_string(),
        },
    }));

    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts,
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json".to_string(),
            response_schema: response_schema(),
        },
    }
}

/// Pulls the generated text out of a `generateContent` response body.
fn extract_text(body: &str) -> Result<String, AnalysisError> {
    if body.trim().is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }

    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| AnalysisError::MalformedResponse(format!("invalid response envelope: {}", e)))?;

    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return Err(AnalysisError::Blocked(reason.to_string()));
    }

    let Some(candidate) = response.candidates.first() else {
        return Err(AnalysisError::EmptyResponse);
    };

    let text: String = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        log::warn!("⚠️ Candidate carried no text (finish reason: {:?})", candidate.finish_reason);
        return Err(AnalysisError::EmptyResponse);
    }

    Ok(text)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

/// Parses the model's JSON array into records with fresh client-side ids.
fn parse_records(text: &str) -> Result<Vec<BottleRecord>, AnalysisError> {
    let json = strip_code_fence(text);
    if json.is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }

    let reported: Vec<ReportedBottle> = serde_json::from_str(json)
        .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;

    reported
        .into_iter()
        .enumerate()
        .map(|(index, bottle)| {
            if !bottle.full_volume_ml.is_finite() || bottle.full_volume_ml < 0.0 {
                return Err(AnalysisError::MalformedResponse(format!(
                    "bottle {} has invalid fullVolumeMl {}",
                    index, bottle.full_volume_ml
                )));
            }
            if !bottle.fill_percentage.is_finite() || !(0.0..=100.0).contains(&bottle.fill_percentage) {
                return Err(AnalysisError::MalformedResponse(format!(
                    "bottle {} has invalid fillPercentage {}",
                    index, bottle.fill_percentage
                )));
            }

            Ok(BottleRecord {
                id: Uuid::new_v4(),
                brand: bottle.brand,
                full_volume_ml: bottle.full_volume_ml,
                fill_percentage: bottle.fill_percentage,
                explanation: bottle.explanation,
            })
        })
        .collect()
}

/// Google Gemini `generateContent` client for bottle analysis
pub struct GeminiService {
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiService {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn send(&self, request: &GenerateContentRequest) -> Result<String, AnalysisError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        log::debug!("📥 Gemini response status: {}", status);

        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(api_error) => format!(
                    "{} ({})",
                    api_error.error.message,
                    api_error.error.status.as_deref().unwrap_or("unknown")
                ),
                Err(_) => body.clone(),
            };
            log::error!("❌ Gemini API error ({}): {}", status, message);
            return Err(AnalysisError::Service {
                status: status.as_u16(),
                message,
            });
        }

        log::debug!("📄 Raw Gemini response size: {} bytes", body.len());
        Ok(body)
    }

    async fn send_with_retry(&self, request: &GenerateContentRequest) -> Result<String, AnalysisError> {
        let mut attempt = 0;
        loop {
            match self.send(request).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "🔁 Transient analysis failure ({}), retry {}/{}",
                        e,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn transport_error(e: reqwest::Error) -> AnalysisError {
    if e.is_timeout() {
        AnalysisError::Timeout
    } else {
        AnalysisError::Transport(e.to_string())
    }
}

#[async_trait::async_trait]
impl BottleAnalyzer for GeminiService {
    async fn analyze(&self, images: &[ImagePayload]) -> Result<Vec<BottleRecord>, AnalysisError> {
        if images.is_empty() {
            return Err(AnalysisError::NoImages);
        }

        let request = build_request(images);
        let total_bytes: usize = images.iter().map(ImagePayload::encoded_len).sum();
        log::info!(
            "🤖 Sending {} image(s) to Gemini with model: {}",
            images.len(),
            self.model
        );
        log::debug!("🔄 Base64 image payload: {} bytes", total_bytes);

        let body = self.send_with_retry(&request).await?;
        let text = extract_text(&body)?;
        log::debug!("💬 Gemini response content: {}", text);

        let records = parse_records(&text)?;
        log::info!("✅ Detected {} bottle(s)", records.len());
        Ok(records)
    }
}
