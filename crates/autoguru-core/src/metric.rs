//! Similarity conventions and the conversion from backend distances.
//!
//! Every backend reports raw distances under the metric it was built with;
//! `Metric::similarity` turns them into scores where higher is more similar.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `acos(cos θ) / π`, a true metric in [0, 1].
    AngularDistance,
    /// `1 - cos θ`, in [0, 2].
    Cosine,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::AngularDistance, Metric::Cosine];

    pub fn name(self) -> &'static str {
        match self {
            Metric::AngularDistance => "angular_distance",
            Metric::Cosine => "cosine",
        }
    }

    /// Distance between two L2-normalized vectors given their cosine similarity.
    pub fn distance_from_cosine(self, cosine: f32) -> f32 {
        let cosine = cosine.clamp(-1.0, 1.0);
        match self {
            Metric::AngularDistance => cosine.acos() / std::f32::consts::PI,
            Metric::Cosine => 1.0 - cosine,
        }
    }

    pub fn similarity_of(self, distance: f32) -> f32 {
        match self {
            Metric::AngularDistance | Metric::Cosine => 1.0 - distance,
        }
    }

    /// Converts raw backend distances into similarity scores.
    pub fn similarity(self, distances: &[f32]) -> Vec<f32> {
        distances.iter().map(|&d| self.similarity_of(d)).collect()
    }

    /// Inclusive range of similarity scores this metric can produce.
    pub fn similarity_range(self) -> (f32, f32) {
        match self {
            Metric::AngularDistance => (0.0, 1.0),
            Metric::Cosine => (-1.0, 1.0),
        }
    }

    pub fn can_be_negative(self) -> bool {
        self.similarity_range().0 < 0.0
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "angular_distance" | "angular" => Ok(Metric::AngularDistance),
            "cosine" => Ok(Metric::Cosine),
            other => Err(Error::InvalidConfig(format!("unknown metric '{other}'"))),
        }
    }
}
