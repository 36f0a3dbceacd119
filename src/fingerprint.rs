//! Deterministic cache keys for generation requests.
//!
//! A [`Fingerprint`] is the SHA-256 digest of the canonical form of a
//! [`GenerationParams`]. Two requests that describe the same scene must map to
//! the same fingerprint, otherwise the cache silently stops deduplicating.
//!
//! # Canonical form
//!
//! - description: trimmed, inner whitespace collapsed to single spaces, lowercased
//! - style flags: keys and values trimmed and lowercased, sorted by key
//! - dimensions: rounded to the nearest multiple of 8 (minimum 8)

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Dimensions are quantised to this step.
pub const DIMENSION_STEP: u32 = 8;

/// Default generated image size.
pub const DEFAULT_DIMENSION: u32 = 1024;

// =============================================================================
// Generation Parameters
// =============================================================================

/// Parameters passed to the generator and used to derive the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Free-text scene description
    pub description: String,

    /// Requested width in pixels
    pub width: u32,

    /// Requested height in pixels
    pub height: u32,

    /// Style flags (e.g. "palette" => "dusk", "medium" => "watercolor")
    #[serde(default)]
    pub style: BTreeMap<String, String>,
}

impl GenerationParams {
    /// Create parameters with the default size and no style flags.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            style: BTreeMap::new(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_style(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(key.into(), value.into());
        self
    }

    /// Normalise into the form that is hashed.
    pub fn canonical(&self) -> CanonicalParams {
        let style = self
            .style
            .iter()
            .map(|(k, v)| (normalize_text(k), normalize_text(v)))
            .collect();

        CanonicalParams {
            description: normalize_text(&self.description),
            width: quantize(self.width),
            height: quantize(self.height),
            style,
        }
    }

    /// Compute the cache key for these parameters.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(self)
    }
}

/// Normalised parameters; the hashed representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalParams {
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub style: BTreeMap<String, String>,
}

/// Compute the fingerprint of `params`.
pub fn fingerprint(params: &GenerationParams) -> Fingerprint {
    let canonical = params.canonical();

    // Length-prefixed fields; no separator ambiguity between free-text values
    let mut hasher = Sha256::new();
    hasher.update(b"scene-v1");
    write_field(&mut hasher, canonical.description.as_bytes());
    hasher.update(canonical.width.to_be_bytes());
    hasher.update(canonical.height.to_be_bytes());
    hasher.update((canonical.style.len() as u64).to_be_bytes());
    for (key, value) in &canonical.style {
        write_field(&mut hasher, key.as_bytes());
        write_field(&mut hasher, value.as_bytes());
    }

    Fingerprint(hasher.finalize().into())
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn quantize(dimension: u32) -> u32 {
    let rounded = dimension.saturating_add(DIMENSION_STEP / 2) / DIMENSION_STEP * DIMENSION_STEP;
    rounded.max(DIMENSION_STEP)
}

// =============================================================================
// Fingerprint
// =============================================================================

/// 32-byte SHA-256 digest identifying a canonical generation request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Fingerprint(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
