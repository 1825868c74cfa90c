use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Distance metric, fixed for the lifetime of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// `1 - cosine_similarity`, in `[0, 2]`.
    Cosine,
    /// L2 distance.
    Euclidean,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        }
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.distance_with(a, magnitude(a), b, magnitude(b))
    }

    /// Distance with precomputed magnitudes (only used by cosine).
    pub fn distance_with(&self, a: &[f32], mag_a: f32, b: &[f32], mag_b: f32) -> f32 {
        match self {
            Metric::Cosine => {
                if mag_a == 0.0 || mag_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot(a, b) / (mag_a * mag_b)
            }
            Metric::Euclidean => euclidean_distance_squared(a, b).sqrt(),
        }
    }

    /// Map a raw distance onto a `[0, 1]` relevance score, higher is better.
    ///
    /// Cosine relevance is the similarity clamped at zero; Euclidean uses
    /// `1 / (1 + d)`.
    pub fn relevance(&self, distance: f32) -> f32 {
        let score = match self {
            Metric::Cosine => 1.0 - distance,
            Metric::Euclidean => 1.0 / (1.0 + distance.max(0.0)),
        };
        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            other => Err(format!(
                "unknown metric '{}' (expected 'cosine' or 'euclidean')",
                other
            )),
        }
    }
}

pub fn magnitude(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let mut sum = 0.0;
    let mut i = 0;

    // Unrolling 4
    while i + 3 < n {
        sum += a[i] * b[i] + a[i + 1] * b[i + 1] + a[i + 2] * b[i + 2] + a[i + 3] * b[i + 3];
        i += 4;
    }
    while i < n {
        sum += a[i] * b[i];
        i += 1;
    }
    sum
}

pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let mut sum = 0.0;
    let mut i = 0;

    while i + 3 < n {
        let d0 = a[i] - b[i];
        let d1 = a[i + 1] - b[i + 1];
        let d2 = a[i + 2] - b[i + 2];
        let d3 = a[i + 3] - b[i + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
        i += 4;
    }
    while i < n {
        let d = a[i] - b[i];
        sum += d * d;
        i += 1;
    }
    sum
}
