//! Per-tick summary and overlay rendering.

use crate::surface::{DrawingSurface, StrokeStyle, TextStyle};
use crate::types::{Detection, ExpressionScores, FrameResult};
use serde::Serialize;

// --- Overlay styling ---
const BOX_STROKE: StrokeStyle = StrokeStyle {
    color: [0x34, 0x98, 0xdb, 0xff],
    line_width: 2,
};
const LABEL_STYLE: TextStyle = TextStyle {
    color: [0xff, 0xff, 0xff, 0xff],
    size: 14.0,
};
const EXPRESSION_LABEL_OFFSET: f32 = 20.0;
const AGE_LABEL_OFFSET: f32 = 5.0;

const DEFAULT_EXPRESSION: &str = "neutral";
const UNKNOWN: &str = "Unknown";

/// The three text outputs shown next to the video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outputs {
    pub faces: String,
    pub expression: String,
    pub age: String,
}

impl Default for Outputs {
    fn default() -> Self {
        Self {
            faces: "0".to_string(),
            expression: UNKNOWN.to_string(),
            age: UNKNOWN.to_string(),
        }
    }
}

impl Outputs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Summary of a single detection, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSummary {
    /// Capitalized dominant expression, e.g. "Happy".
    pub expression: String,
    pub confidence: f32,
    /// Rounded age, e.g. "24 years", or a size bracket when no age is known.
    pub age: String,
}

/// Dominant expression and its score.
///
/// Only a strictly greater score replaces the current best, so the first key
/// wins ties and an empty or all-zero mapping yields ("neutral", 0.0).
pub fn dominant_expression(scores: &ExpressionScores) -> (&str, f32) {
    let mut best = (DEFAULT_EXPRESSION, 0.0f32);
    for (name, score) in scores.iter() {
        if score > best.1 {
            best = (name, score);
        }
    }
    best
}

/// Upper-case the first character, leaving the rest untouched.
pub fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Nearest whole year (halves round up) followed by " years".
pub fn format_age(age: Option<f32>) -> String {
    let years = match age {
        Some(a) if a.is_finite() => (a + 0.5).floor() as i64,
        _ => 0,
    };
    format!("{years} years")
}

/// Age text for one detection: rounded years when the backend estimated
/// them, otherwise its size bracket, otherwise "0 years".
pub fn age_label(detection: &Detection) -> String {
    match (detection.age, detection.age_group) {
        (Some(age), _) if age.is_finite() => format_age(Some(age)),
        (_, Some(group)) => group.label().to_string(),
        (age, None) => format_age(age),
    }
}

pub fn summarize(detection: &Detection) -> FaceSummary {
    let (name, confidence) = dominant_expression(&detection.expressions);
    FaceSummary {
        expression: capitalize(name),
        confidence,
        age: age_label(detection),
    }
}

/// Caption stamped on saved snapshots, e.g. "Faces detected: 2".
pub fn face_count_caption(outputs: &Outputs) -> String {
    format!("Faces detected: {}", outputs.faces)
}

/// Draw one tick's detections and update the shared outputs.
///
/// The caller clears `surface` beforehand. Every detection overwrites the
/// expression and age outputs, so the last face in `frame` is what remains.
pub fn apply<S: DrawingSurface + ?Sized>(
    surface: &mut S,
    outputs: &mut Outputs,
    frame: &FrameResult,
) {
    outputs.faces = frame.len().to_string();

    for detection in frame {
        let bbox = &detection.bbox;
        surface.stroke_rect(bbox, &BOX_STROKE);

        let summary = summarize(detection);
        surface.fill_text(
            &format!("Expression: {}", summary.expression),
            bbox.x,
            bbox.y - EXPRESSION_LABEL_OFFSET,
            &LABEL_STYLE,
        );
        surface.fill_text(
            &format!("Age: {}", summary.age),
            bbox.x,
            bbox.y - AGE_LABEL_OFFSET,
            &LABEL_STYLE,
        );

        outputs.expression = summary.expression;
        outputs.age = summary.age;
    }
}
