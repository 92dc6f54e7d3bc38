use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use std::path::Path;
use uuid::Uuid;

/// Single serving size used to turn remaining liquid into a pour count
pub const POUR_SIZE_ML: f64 = 30.0;

/// Number of angles captured in a multi-angle (360°) scan
pub const MULTI_ANGLE_STEPS: usize = 4;

pub const JPEG_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeasurementError {
    #[error("full volume must be a finite, non-negative number of ml (got {0})")]
    InvalidVolume(f64),
    #[error("fill percentage must be within 0..=100 (got {0})")]
    InvalidFill(f64),
}

/// Remaining pours for a bottle, rounded to one decimal place.
pub fn calculate_pours(full_volume_ml: f64, fill_percentage: f64) -> Result<f64, MeasurementError> {
    if !full_volume_ml.is_finite() || full_volume_ml < 0.0 {
        return Err(MeasurementError::InvalidVolume(full_volume_ml));
    }
    if !fill_percentage.is_finite() || !(0.0..=100.0).contains(&fill_percentage) {
        return Err(MeasurementError::InvalidFill(fill_percentage));
    }

    let remaining_ml = full_volume_ml * fill_percentage / 100.0;
    Ok(round_one_decimal(remaining_ml / POUR_SIZE_ML))
}

/// Rounds half away from zero on the binary value, so 0.35 becomes 0.4.
fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// One bottle detected by the analysis service
#[derive(Debug, Clone, PartialEq)]
pub struct BottleRecord {
    pub id: Uuid,
    pub brand: String,
    pub full_volume_ml: f64,
    pub fill_percentage: f64,
    pub explanation: String,
}

impl BottleRecord {
    pub fn pours(&self) -> Result<f64, MeasurementError> {
        calculate_pours(self.full_volume_ml, self.fill_percentage)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryEntry {
    pub id: Uuid,
    pub record: BottleRecord,
    pub added_at: DateTime<Utc>,
}

/// Session inventory, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    entries: Vec<InventoryEntry>,
}

impl Inventory {
    /// Stores a copy of `record` under a freshly generated entry id.
    pub fn add(&mut self, record: BottleRecord) -> &InventoryEntry {
        self.entries.push(InventoryEntry {
            id: Uuid::new_v4(),
            record,
            added_at: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn remove(&mut self, id: Uuid) -> Option<InventoryEntry> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(position))
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the per-entry rounded pour counts. Entries with out-of-range
    /// measurements contribute nothing.
    pub fn total_pours(&self) -> f64 {
        let total: f64 = self
            .entries
            .iter()
            .filter_map(|entry| entry.record.pours().ok())
            .sum();
        round_one_decimal(total)
    }
}

/// A captured JPEG, held base64-encoded as it goes over the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    data: String,
}

impl ImagePayload {
    /// Accepts either a `data:<mime>;base64,<payload>` URL or a bare payload.
    pub fn from_data_url(data_url: &str) -> Result<Self> {
        let trimmed = data_url.trim();
        let payload = match trimmed.split_once(',') {
            Some((scheme, rest)) if scheme.starts_with("data:") => rest,
            _ => trimmed,
        };

        if payload.is_empty() {
            anyhow::bail!("Image data is empty");
        }

        Ok(Self {
            data: payload.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            anyhow::bail!("Image data is empty");
        }

        Ok(Self {
            data: general_purpose::STANDARD.encode(bytes),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;

        log::debug!("📊 Image file size: {} bytes ({})", bytes.len(), path.display());
        Self::from_bytes(&bytes)
    }

    pub fn mime_type(&self) -> &'static str {
        JPEG_MIME_TYPE
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Single,
    MultiAngle,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanMode::Single => "single-shot",
            ScanMode::MultiAngle => "360° multi-angle",
        };
        write!(f, "{}", s)
    }
}

impl ScanMode {
    /// Capture guidance for the given multi-angle step (0-based)
    pub fn angle_hint(step: usize) -> Option<&'static str> {
        const HINTS: [&str; MULTI_ANGLE_STEPS] = [
            "Capture the front of the bottle.",
            "Rotate bottle 90° clockwise.",
            "Rotate bottle another 90°.",
            "Capture the final angle.",
        ];
        HINTS.get(step).copied()
    }
}
