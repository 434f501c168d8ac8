use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Default detector coarseness (image pyramid step).
pub const DEFAULT_SCALE_FACTOR: f32 = 1.1;
/// Default detector strictness.
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;

/// Bounding box for a detected face, in pixel space of the analysed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
}

/// Expression name → confidence score, in the order the detector produced them.
///
/// Iteration order matters: the dominant expression is the first key holding
/// the maximal score. Deserialization is lenient: a score that is not a
/// number becomes 0.0 instead of rejecting the whole detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionScores(Vec<(String, f32)>);

impl ExpressionScores {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace a score, keeping the original position of an existing key.
    pub fn insert(&mut self, name: impl Into<String>, score: f32) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = score,
            None => self.0.push((name, score)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f32)> for ExpressionScores {
    fn from_iter<I: IntoIterator<Item = (K, f32)>>(iter: I) -> Self {
        let mut scores = ExpressionScores::new();
        for (k, v) in iter {
            scores.insert(k, v);
        }
        scores
    }
}

impl Serialize for ExpressionScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExpressionScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoresVisitor;

        impl<'de> Visitor<'de> for ScoresVisitor {
            type Value = ExpressionScores;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of expression name to score")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut scores = ExpressionScores::new();
                while let Some((name, value)) =
                    access.next_entry::<String, serde_json::Value>()?
                {
                    let score = value.as_f64().map(|v| v as f32).unwrap_or(0.0);
                    scores.insert(name, score);
                }
                Ok(scores)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(ExpressionScores::new())
            }
        }

        deserializer.deserialize_any(ScoresVisitor)
    }
}

/// One detected face: box, expression scores and estimated age.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default, rename = "box")]
    pub bbox: BoundingBox,
    #[serde(default)]
    pub expressions: ExpressionScores,
    /// Estimated age in years, when the backend provides one.
    #[serde(default)]
    pub age: Option<f32>,
    /// Coarse age bracket for backends that cannot estimate years.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_group: Option<AgeGroup>,
}

/// Coarse age bracket guessed from the apparent face size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeGroup {
    Child,
    Teen,
    YoungAdult,
    Adult,
    Senior,
}

impl AgeGroup {
    /// Bracket for a face box of the given size: the mean of width and
    /// height, cut at 100, 120, 140 and 160 px.
    ///
    /// Only meaningful for webcam-distance faces at roughly 640x480.
    pub fn from_face_size(width: f32, height: f32) -> Self {
        let size = (width + height) / 2.0;
        if size < 100.0 {
            Self::Child
        } else if size < 120.0 {
            Self::Teen
        } else if size < 140.0 {
            Self::YoungAdult
        } else if size < 160.0 {
            Self::Adult
        } else {
            Self::Senior
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Child => "Child (0-12)",
            Self::Teen => "Teen (13-19)",
            Self::YoungAdult => "Young Adult (20-35)",
            Self::Adult => "Adult (36-50)",
            Self::Senior => "Senior (50+)",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// All detections produced by one detector invocation, in detector order.
pub type FrameResult = Vec<Detection>;

/// Live detector tuning, adjusted between ticks and read fresh on each one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Detector coarseness: step between image-pyramid levels.
    pub scale_factor: f32,
    /// Detector strictness: higher rejects more candidate windows.
    pub min_neighbors: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
        }
    }
}
