//! Heuristic visual assessment of property photographs.
//!
//! Converts one photograph into structured signals (property type,
//! condition class, floor count, confidence) without a trained model:
//! the pipeline is feature-engineered pixel analysis over a decoded
//! [`PixelGrid`]. Multiple photographs of the same property are merged
//! into a consensus assessment by [`fusion::merge`].

use serde::{Deserialize, Serialize};

mod assess;
mod fusion;
mod grid;

pub use assess::{assess, assess_grid, fallback_assessment};
pub use fusion::{merge, CONDITION_SNAP_TOLERANCE};
pub use grid::{ColorFamily, ColorStats, PixelGrid};

/// Property type inferred from a photograph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    House,
    Apartment,
    Building,
    Land,
    Commercial,
    Unknown,
}

impl PropertyType {
    pub fn label(&self) -> &'static str {
        match self {
            PropertyType::House => "detached house",
            PropertyType::Apartment => "apartment",
            PropertyType::Building => "multi-unit building",
            PropertyType::Land => "bare land",
            PropertyType::Commercial => "commercial premises",
            PropertyType::Unknown => "undetermined",
        }
    }
}

/// Physical condition class, ordered best to worst. Each class is bound
/// to a fixed multiplicative price coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionClass {
    New,
    VeryGood,
    Good,
    Fair,
    LightRenovation,
    Renovation,
    MajorRenovation,
}

impl ConditionClass {
    /// All classes, best to worst. Order matters for coefficient snapping.
    pub const ALL: [ConditionClass; 7] = [
        ConditionClass::New,
        ConditionClass::VeryGood,
        ConditionClass::Good,
        ConditionClass::Fair,
        ConditionClass::LightRenovation,
        ConditionClass::Renovation,
        ConditionClass::MajorRenovation,
    ];

    pub fn coefficient(&self) -> f64 {
        match self {
            ConditionClass::New => 1.15,
            ConditionClass::VeryGood => 1.10,
            ConditionClass::Good => 1.00,
            ConditionClass::Fair => 0.95,
            ConditionClass::LightRenovation => 0.85,
            ConditionClass::Renovation => 0.70,
            ConditionClass::MajorRenovation => 0.55,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConditionClass::New => "new or recent",
            ConditionClass::VeryGood => "very good condition",
            ConditionClass::Good => "good condition",
            ConditionClass::Fair => "fair condition",
            ConditionClass::LightRenovation => "light refurbishment expected",
            ConditionClass::Renovation => "renovation needed",
            ConditionClass::MajorRenovation => "major renovation needed",
        }
    }
}

/// Provenance of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentMethod {
    /// Feature-engineered pixel analysis.
    Heuristic,
    /// Fixed low-confidence result returned when the image cannot be decoded.
    HeuristicFallback,
    /// Trained-model inference (pluggable, same output schema).
    Model,
    /// Consensus of several per-photo assessments.
    Fusion,
}

/// Structured signals extracted from one photograph (or the fused
/// consensus of several).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAssessment {
    pub property_type: PropertyType,
    pub condition: ConditionClass,
    /// Equals `condition.coefficient()` for a single photo; after fusion
    /// it is the mean of the input coefficients, which the snapped class
    /// only approximates.
    pub condition_coefficient: f64,
    /// Estimated floor count, >= 1 and capped at 10.
    pub floors: u32,
    /// Not produced by the heuristic path; reserved for the model path.
    pub visible_surface_m2: Option<f64>,
    /// 0-100. Heuristic assessments stay within [20, 95].
    pub confidence: f64,
    pub method: AssessmentMethod,
    /// Number of photographs behind this assessment (1 unless fused).
    pub photo_count: usize,
    /// Per-photo confidences, retained after fusion for auditability.
    pub input_confidences: Vec<f64>,
}
