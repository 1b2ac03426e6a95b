use tracing::debug;

use crate::{assess::fallback_assessment, AssessmentMethod, ConditionClass, VisualAssessment};

/// Maximum distance between an averaged condition coefficient and a class
/// coefficient for the class to be adopted. Heuristic, tunable: outside
/// the tolerance the fusion defaults to `Good`.
pub const CONDITION_SNAP_TOLERANCE: f64 = 0.05;

const CONFIDENCE_CEILING: f64 = 95.0;
/// Corroboration bonus per photograph.
const PER_PHOTO_BONUS: f64 = 5.0;

/// Merge several independent assessments of the same property into one
/// consensus assessment. A single input is returned unchanged; an empty
/// slice degrades to the fallback assessment.
pub fn merge(assessments: &[VisualAssessment]) -> VisualAssessment {
    match assessments {
        [] => fallback_assessment(),
        [single] => single.clone(),
        many => fuse(many),
    }
}

fn fuse(assessments: &[VisualAssessment]) -> VisualAssessment {
    let property_type = majority_type(assessments);

    let mean_coefficient = assessments
        .iter()
        .map(|a| a.condition_coefficient)
        .sum::<f64>()
        / assessments.len() as f64;
    let condition = snap_condition(mean_coefficient);

    let floors = assessments.iter().map(|a| a.floors).max().unwrap_or(1);

    let input_confidences: Vec<f64> = assessments.iter().map(|a| a.confidence).collect();
    let best = input_confidences
        .iter()
        .copied()
        .fold(f64::MIN, f64::max);
    let confidence =
        (best + PER_PHOTO_BONUS * assessments.len() as f64).min(CONFIDENCE_CEILING);

    debug!(
        photos = assessments.len(),
        ?property_type,
        ?condition,
        mean_coefficient,
        confidence,
        "fused multi-photo assessment"
    );

    VisualAssessment {
        property_type,
        condition,
        condition_coefficient: mean_coefficient,
        floors,
        visible_surface_m2: None,
        confidence,
        method: AssessmentMethod::Fusion,
        photo_count: assessments.len(),
        input_confidences,
    }
}

/// Majority vote over property types, ties broken by first appearance in
/// input order.
fn majority_type(assessments: &[VisualAssessment]) -> crate::PropertyType {
    let mut winner = assessments[0].property_type;
    let mut winner_count = 0usize;
    for a in assessments {
        let count = assessments
            .iter()
            .filter(|b| b.property_type == a.property_type)
            .count();
        if count > winner_count {
            winner = a.property_type;
            winner_count = count;
        }
    }
    winner
}

/// Reconstruct a condition class from an averaged coefficient: the class
/// whose coefficient is nearest the mean wins, provided it lies within
/// the snap tolerance; `Good` otherwise.
fn snap_condition(mean_coefficient: f64) -> ConditionClass {
    ConditionClass::ALL
        .iter()
        .copied()
        .min_by(|a, b| {
            (a.coefficient() - mean_coefficient)
                .abs()
                .total_cmp(&(b.coefficient() - mean_coefficient).abs())
        })
        .filter(|c| (c.coefficient() - mean_coefficient).abs() < CONDITION_SNAP_TOLERANCE)
        .unwrap_or(ConditionClass::Good)
}
