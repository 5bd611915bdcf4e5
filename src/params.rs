use serde::{Deserialize, Serialize};

/// Validated form fields of a `/generate-video` request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// seconds
    pub duration: u32,
    pub width: u32,
    pub height: u32,
}

impl GenerationRequest {
    /// All three fields must be positive decimal integers. Missing, negative,
    /// zero, and non-numeric values are rejected alike.
    pub fn parse(duration: Option<&str>, width: Option<&str>, height: Option<&str>) -> Option<Self> {
        Some(Self {
            duration: parse_positive(duration)?,
            width: parse_positive(width)?,
            height: parse_positive(height)?,
        })
    }
}

fn parse_positive(value: Option<&str>) -> Option<u32> {
    value?.trim().parse::<u32>().ok().filter(|v| *v > 0)
}
