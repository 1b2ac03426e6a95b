use tracing::{debug, warn};

use crate::grid::{coalesce_lines, ColorFamily, ColorStats, PixelGrid};
use crate::{AssessmentMethod, ConditionClass, PropertyType, VisualAssessment};

/// Line-candidate count above which a facade reads as a multi-unit building.
const BUILDING_LINE_COUNT: usize = 15;
/// Aspect ratio below which the photo is narrow-and-tall.
const TALL_ASPECT: f64 = 0.8;
/// Aspect ratio above which the photo is wide.
const WIDE_ASPECT: f64 = 1.5;
/// Assumed line rows per visible floor (window top, window bottom, slab).
const LINES_PER_FLOOR: usize = 3;
const MAX_FLOORS: u32 = 10;

/// Assess one property photograph. Never fails: bytes that cannot be
/// decoded produce the fixed low-confidence fallback assessment.
pub fn assess(image_bytes: &[u8]) -> VisualAssessment {
    match image::load_from_memory(image_bytes) {
        Ok(img) => assess_grid(&PixelGrid::from_image(&img)),
        Err(err) => {
            warn!("image decode failed, returning fallback assessment: {err}");
            fallback_assessment()
        }
    }
}

/// Run the heuristic pipeline on an already-decoded pixel grid.
pub fn assess_grid(grid: &PixelGrid) -> VisualAssessment {
    let colors = grid.color_stats();
    let texture = grid.texture_score();
    let candidates = grid.horizontal_line_candidates();
    let lines = coalesce_lines(&candidates, grid.height());
    let aspect = grid.aspect_ratio();

    let property_type = infer_property_type(&colors, candidates.len(), aspect);
    let condition = infer_condition(&colors, texture);
    let floors = estimate_floors(lines.len());
    let confidence = image_confidence(grid.min_dimension(), colors.variance, texture);

    debug!(
        ?property_type,
        ?condition,
        floors,
        confidence,
        texture,
        line_candidates = candidates.len(),
        "heuristic assessment"
    );

    VisualAssessment {
        property_type,
        condition,
        condition_coefficient: condition.coefficient(),
        floors,
        visible_surface_m2: None,
        confidence,
        method: AssessmentMethod::Heuristic,
        photo_count: 1,
        input_confidences: Vec::new(),
    }
}

/// Fixed assessment used when analysis is impossible. Still useful
/// downstream: a neutral condition with low confidence.
pub fn fallback_assessment() -> VisualAssessment {
    VisualAssessment {
        property_type: PropertyType::Unknown,
        condition: ConditionClass::Fair,
        // The undetermined state is priced neutrally, not at the Fair
        // class discount.
        condition_coefficient: 1.0,
        floors: 1,
        visible_surface_m2: None,
        confidence: 30.0,
        method: AssessmentMethod::HeuristicFallback,
        photo_count: 1,
        input_confidences: Vec::new(),
    }
}

fn infer_property_type(colors: &ColorStats, line_candidates: usize, aspect: f64) -> PropertyType {
    let has_vegetation = colors.family == ColorFamily::Vegetation;
    let many_lines = line_candidates > BUILDING_LINE_COUNT;
    let is_tall = aspect < TALL_ASPECT;
    let is_wide = aspect > WIDE_ASPECT;

    if many_lines && is_tall {
        PropertyType::Building
    } else if has_vegetation && is_wide {
        PropertyType::House
    } else if !many_lines && !has_vegetation {
        // No structure signal: flat low-variance frames read as bare land.
        if colors.variance < 500.0 {
            PropertyType::Land
        } else {
            PropertyType::House
        }
    } else {
        PropertyType::House
    }
}

fn infer_condition(colors: &ColorStats, texture: f64) -> ConditionClass {
    let is_light = colors.family == ColorFamily::Light;

    if is_light && texture < 15.0 && colors.variance < 2000.0 {
        ConditionClass::New
    } else if is_light && texture < 25.0 {
        ConditionClass::VeryGood
    } else if texture < 35.0 {
        ConditionClass::Good
    } else if texture < 50.0 {
        ConditionClass::Fair
    } else if texture < 70.0 {
        ConditionClass::LightRenovation
    } else {
        ConditionClass::Renovation
    }
}

fn estimate_floors(coalesced_lines: usize) -> u32 {
    ((coalesced_lines / LINES_PER_FLOOR).max(1) as u32).min(MAX_FLOORS)
}

fn image_confidence(min_dimension: u32, variance: f64, texture: f64) -> f64 {
    let mut confidence: f64 = 50.0;

    if min_dimension >= 1000 {
        confidence += 15.0;
    } else if min_dimension >= 500 {
        confidence += 10.0;
    } else if min_dimension < 200 {
        confidence -= 20.0;
    }

    // Well-exposed frame: neither crushed blacks nor blown highlights.
    if variance > 500.0 && variance < 5000.0 {
        confidence += 10.0;
    }

    // Detectable but not noisy texture.
    if texture > 10.0 && texture < 60.0 {
        confidence += 10.0;
    }

    confidence.clamp(20.0, 95.0)
}
