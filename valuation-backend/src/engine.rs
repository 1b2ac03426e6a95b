//! Valuation engine: merges parcel, market, energy and visual signals
//! into a priced estimate with an explicit confidence score and range.
//!
//! `calculate` is a pure function of its arguments. The seasonal month is
//! passed in by the caller rather than read from the clock, so identical
//! inputs always produce identical figures.

use chrono::Utc;
use tracing::debug;
use vision_assessor::{PropertyType, VisualAssessment};

use crate::model::{
    AppliedCoefficients, DataQuality, EnergyRating, MarketStats, ParcelRecord, ParcelTier,
    ValuationResult,
};

/// Habitable share of a built surface (walls, stairwells, partitions).
const HABITABLE_SHARE: f64 = 0.85;
/// Per-extra-floor usable share for houses (stairs, attic slopes).
const HOUSE_FLOOR_SHARE: f64 = 0.8;

const MARGIN_BASE: f64 = 0.15;
const MARGIN_BOUNDS: (f64, f64) = (0.08, 0.30);
const CONFIDENCE_BOUNDS: (f64, f64) = (15.0, 95.0);

/// Plausibility band for the sector base price, outside of which an
/// informational warning is attached.
const PRICE_BAND: (f64, f64) = (1000.0, 8000.0);

/// Immutable multiplier tables, injected at engine construction.
#[derive(Debug, Clone)]
pub struct CoefficientTables {
    /// Indexed by floor count 1..=5; higher counts use the last entry.
    pub floors: [f64; 5],
    /// Indexed by calendar month.
    pub season: [f64; 12],
    /// Indexed by energy class A..=G.
    pub energy: [f64; 7],
}

impl Default for CoefficientTables {
    fn default() -> Self {
        CoefficientTables {
            // Houses with one or two upper floors sell slightly above
            // single-storey ones; the premium fades with height.
            floors: [1.00, 1.05, 1.03, 1.02, 1.00],
            // Quiet winter market, spring rebound, autumn demand peak.
            season: [
                0.98, 0.99, 1.01, 1.02, 1.03, 1.02, 1.00, 0.99, 1.02, 1.01, 0.99, 0.98,
            ],
            // A..G. F and G carry the thermal-sieve discount.
            energy: [1.08, 1.05, 1.02, 1.00, 0.95, 0.88, 0.82],
        }
    }
}

/// Per-type habitable-surface / land-area ratio.
fn land_ratio(property_type: PropertyType) -> f64 {
    match property_type {
        PropertyType::House => 0.35,
        PropertyType::Apartment => 1.0,
        PropertyType::Building => 0.60,
        PropertyType::Land => 0.0,
        PropertyType::Commercial => 0.50,
        PropertyType::Unknown => 0.30,
    }
}

/// Per-type default surface when neither built nor land area is known.
fn default_surface(property_type: PropertyType) -> f64 {
    match property_type {
        PropertyType::House => 100.0,
        PropertyType::Apartment => 70.0,
        PropertyType::Building => 500.0,
        PropertyType::Land => 0.0,
        PropertyType::Commercial => 150.0,
        PropertyType::Unknown => 80.0,
    }
}

pub struct ValuationEngine {
    tables: CoefficientTables,
}

impl ValuationEngine {
    pub fn new(tables: CoefficientTables) -> Self {
        ValuationEngine { tables }
    }

    /// Fuse the four input records into the final estimate. `month` is the
    /// calendar month (1-12) used for the seasonal factor; `multi_photo`
    /// marks estimates backed by more than one photograph.
    pub fn calculate(
        &self,
        parcel: &ParcelRecord,
        market: &MarketStats,
        vision: &VisualAssessment,
        energy: Option<&EnergyRating>,
        multi_photo: bool,
        month: u32,
    ) -> ValuationResult {
        let floors = vision.floors.max(1);

        let surface = self.habitable_surface(parcel, vision.property_type, floors);
        debug_assert!(surface >= 0.0, "computed surface must never be negative");

        let condition_coef = vision.condition_coefficient;
        let floors_coef = self.floors_coefficient(floors);
        let season_coef = self.season_coefficient(month);
        let energy_coef = energy
            .map(|e| self.tables.energy[e.energy_class.index()])
            .unwrap_or(1.0);
        let combined = condition_coef * floors_coef * season_coef * energy_coef;

        let base_price_m2 = market.mean_price_m2;
        let adjusted_price_m2 = base_price_m2 * combined;
        let total_price = surface * adjusted_price_m2;

        let margin = self.margin_of_error(market, vision, energy.is_some());
        let price_low = total_price * (1.0 - margin);
        let price_high = total_price * (1.0 + margin);

        let confidence = self.confidence_score(parcel, market, vision, energy, multi_photo);
        let data_quality = self.data_quality(parcel, market, vision, energy);
        let warnings = self.warnings(parcel, market, vision, energy);
        let sources = self.sources(parcel, market, vision, energy);

        debug!(
            surface,
            adjusted_price_m2, total_price, confidence, margin, "valuation computed"
        );

        ValuationResult {
            land_area_m2: parcel.land_area_m2,
            habitable_surface_m2: surface,
            base_price_m2,
            adjusted_price_m2,
            total_price,
            price_low,
            price_high,
            confidence,
            data_quality,
            coefficients: AppliedCoefficients {
                condition: condition_coef,
                floors: floors_coef,
                season: season_coef,
                energy: energy_coef,
                combined,
                margin,
            },
            warnings,
            sources,
            property_type_label: vision.property_type.label().to_string(),
            condition_label: vision.condition.label().to_string(),
            parcel: parcel.clone(),
            market: market.clone(),
            energy: energy.cloned(),
            vision: vision.clone(),
            estimated_at: Utc::now(),
        }
    }

    /// Habitable-surface estimate, in order of preference: built area,
    /// land area scaled by the per-type ratio, per-type default.
    fn habitable_surface(
        &self,
        parcel: &ParcelRecord,
        property_type: PropertyType,
        floors: u32,
    ) -> f64 {
        if let Some(built) = parcel.built_area_m2 {
            if built > 0.0 {
                return built * HABITABLE_SHARE * floors.max(1) as f64;
            }
        }

        if let Some(land) = parcel.land_area_m2 {
            if land > 0.0 {
                let base = land * land_ratio(property_type);
                return if property_type == PropertyType::House {
                    base * floors as f64 * HOUSE_FLOOR_SHARE
                } else {
                    base
                };
            }
        }

        default_surface(property_type)
    }

    fn floors_coefficient(&self, floors: u32) -> f64 {
        let idx = (floors.clamp(1, 5) - 1) as usize;
        self.tables.floors[idx]
    }

    fn season_coefficient(&self, month: u32) -> f64 {
        let idx = (month.clamp(1, 12) - 1) as usize;
        self.tables.season[idx]
    }

    fn margin_of_error(&self, market: &MarketStats, vision: &VisualAssessment, has_energy: bool) -> f64 {
        let mut margin = MARGIN_BASE;

        if market.transaction_count >= 20 {
            margin -= 0.03;
        } else if market.transaction_count >= 10 {
            margin -= 0.02;
        } else if market.transaction_count == 0 {
            margin += 0.05;
        }

        if vision.confidence >= 80.0 {
            margin -= 0.02;
        } else if vision.confidence < 50.0 {
            margin += 0.03;
        }

        if has_energy {
            margin -= 0.02;
        }

        margin.clamp(MARGIN_BOUNDS.0, MARGIN_BOUNDS.1)
    }

    fn confidence_score(
        &self,
        parcel: &ParcelRecord,
        market: &MarketStats,
        vision: &VisualAssessment,
        energy: Option<&EnergyRating>,
        multi_photo: bool,
    ) -> f64 {
        let mut score = 40.0;

        score += match market.transaction_count {
            n if n >= 20 => 20.0,
            n if n >= 10 => 15.0,
            n if n >= 5 => 10.0,
            n if n > 0 => 5.0,
            _ => 0.0,
        };

        score += (vision.confidence - 50.0) * 0.2;

        if parcel.land_area_m2.is_some() {
            score += 5.0;
        }
        if parcel.built_area_m2.is_some() {
            score += 5.0;
        }
        if parcel.construction_year.is_some() {
            score += 5.0;
        }

        if energy.is_some() {
            score += 7.0;
        }

        if multi_photo {
            score += 5.0;
        }

        if market.tier != crate::model::MarketTier::Observed {
            score -= 10.0;
        }
        if parcel.tier == ParcelTier::Fallback {
            score -= 10.0;
        }

        score.clamp(CONFIDENCE_BOUNDS.0, CONFIDENCE_BOUNDS.1)
    }

    /// Weighted point system over the four inputs, normalized to 0-1 and
    /// mapped to the five ordered labels.
    fn data_quality(
        &self,
        parcel: &ParcelRecord,
        market: &MarketStats,
        vision: &VisualAssessment,
        energy: Option<&EnergyRating>,
    ) -> DataQuality {
        let mut points = 0u32;

        if market.transaction_count >= 10 {
            points += 3;
        } else if market.transaction_count > 0 {
            points += 1;
        }

        if parcel.land_area_m2.is_some() {
            points += 2;
        }
        if parcel.tier == ParcelTier::Primary {
            points += 1;
        }

        if vision.confidence >= 70.0 {
            points += 2;
        } else if vision.confidence >= 50.0 {
            points += 1;
        }

        if energy.is_some() {
            points += 2;
        }

        let ratio = points as f64 / 10.0;
        if ratio >= 0.8 {
            DataQuality::Excellent
        } else if ratio >= 0.6 {
            DataQuality::Good
        } else if ratio >= 0.4 {
            DataQuality::Average
        } else if ratio >= 0.2 {
            DataQuality::Limited
        } else {
            DataQuality::Poor
        }
    }

    fn warnings(
        &self,
        parcel: &ParcelRecord,
        market: &MarketStats,
        vision: &VisualAssessment,
        energy: Option<&EnergyRating>,
    ) -> Vec<String> {
        let mut warnings = Vec::new();

        if market.transaction_count == 0 {
            warnings.push(
                "No recent transaction in the area - estimate based on regional averages"
                    .to_string(),
            );
        } else if market.transaction_count < 5 {
            warnings.push("Few comparable transactions - limited precision".to_string());
        }

        if parcel.tier == ParcelTier::Fallback {
            warnings.push(
                "Cadastral data unavailable - surface estimated from visual analysis".to_string(),
            );
        }

        if vision.confidence < 50.0 {
            warnings.push(
                "Low image confidence - add more photographs to improve the estimate".to_string(),
            );
        }

        match energy {
            Some(rating) => {
                if rating.energy_class >= crate::model::EnergyClass::F {
                    warnings.push(format!(
                        "Poor thermal performance (energy class {}) - energy renovation work is to be expected",
                        rating.energy_class.letter()
                    ));
                }
                if rating.is_average {
                    warnings.push(
                        "Energy rating is a postal-code average - an individual audit may change the estimate significantly"
                            .to_string(),
                    );
                }
            }
            None => {
                warnings.push(
                    "No energy rating available - the estimate does not account for thermal performance"
                        .to_string(),
                );
            }
        }

        if market.mean_price_m2 < PRICE_BAND.0 {
            warnings.push(
                "Very low price area - check local constraints as well as opportunities"
                    .to_string(),
            );
        } else if market.mean_price_m2 > PRICE_BAND.1 {
            warnings.push("High price area - the market can be volatile".to_string());
        }

        warnings
    }

    fn sources(
        &self,
        parcel: &ParcelRecord,
        market: &MarketStats,
        vision: &VisualAssessment,
        energy: Option<&EnergyRating>,
    ) -> Vec<String> {
        let mut sources = Vec::new();

        if parcel.tier == ParcelTier::Primary {
            sources.push(format!("Cadastre ({})", parcel.source));
        }
        sources.push(format!("Transactions ({})", market.source));
        if let Some(rating) = energy {
            sources.push(format!("Energy registry ({})", rating.source));
        }
        sources.push(format!("Vision ({:?})", vision.method));

        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnergyClass, MarketTier};
    use vision_assessor::{AssessmentMethod, ConditionClass};

    fn engine() -> ValuationEngine {
        ValuationEngine::new(CoefficientTables::default())
    }

    fn parcel_with_land(land: f64) -> ParcelRecord {
        ParcelRecord {
            land_area_m2: Some(land),
            tier: ParcelTier::Primary,
            source: "test cadastre".to_string(),
            ..ParcelRecord::fallback("test cadastre")
        }
    }

    fn market(mean: f64, count: u32, tier: MarketTier) -> MarketStats {
        MarketStats {
            mean_price_m2: mean,
            median_price_m2: mean * 0.95,
            min_price_m2: mean * 0.7,
            max_price_m2: mean * 1.3,
            std_dev: mean * 0.15,
            transaction_count: count,
            transactions: Vec::new(),
            period: "last 12 months".to_string(),
            search_radius_m: 500,
            tier,
            source: "test transactions".to_string(),
        }
    }

    fn vision(
        property_type: PropertyType,
        condition: ConditionClass,
        floors: u32,
        confidence: f64,
    ) -> VisualAssessment {
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

    fn energy_rating(class: EnergyClass, is_average: bool) -> EnergyRating {
        EnergyRating {
            energy_class: class,
            ghg_class: Some(EnergyClass::D),
            consumption_kwh_m2: Some(250.0),
            ghg_kg_m2: Some(30.0),
            is_average,
            source: "test registry".to_string(),
        }
    }

    #[test]
    fn house_on_bare_land_scenario() {
        // 500 m² of land, house, one floor, good condition, 3000/m²,
        // zero transactions, neutral vision confidence.
        let result = engine().calculate(
            &parcel_with_land(500.0),
            &market(3000.0, 0, MarketTier::RegionalEstimate),
            &vision(PropertyType::House, ConditionClass::Good, 1, 50.0),
            None,
            false,
            7, // July, season coefficient 1.0
        );

        // 500 * 0.35 * 1 * 0.8 = 140 m².
        assert!((result.habitable_surface_m2 - 140.0).abs() < 1e-9);
        // coef = 1.0 condition * 1.0 floors * 1.0 season * 1.0 energy.
        assert!((result.coefficients.combined - 1.0).abs() < 1e-9);
        assert!((result.total_price - 140.0 * 3000.0).abs() < 1e-6);
        // margin = 0.15 + 0.05 (zero transactions) = 0.20.
        assert!((result.coefficients.margin - 0.20).abs() < 1e-9);
    }

    #[test]
    fn built_area_takes_precedence_over_land() {
        let mut parcel = parcel_with_land(500.0);
        parcel.built_area_m2 = Some(120.0);
        let result = engine().calculate(
            &parcel,
            &market(3000.0, 10, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 2, 60.0),
            None,
            false,
            7,
        );
        // 120 * 0.85 * 2 floors.
        assert!((result.habitable_surface_m2 - 204.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_areas_fall_back_to_type_defaults() {
        let result = engine().calculate(
            &ParcelRecord::fallback("local default"),
            &market(3000.0, 0, MarketTier::NationalDefault),
            &vision(PropertyType::Apartment, ConditionClass::Good, 1, 50.0),
            None,
            false,
            7,
        );
        assert!((result.habitable_surface_m2 - 70.0).abs() < 1e-9);
    }

    #[test]
    fn class_g_energy_discounts_and_warns_about_thermal_performance() {
        let rating = energy_rating(EnergyClass::G, false);
        let result = engine().calculate(
            &parcel_with_land(500.0),
            &market(3000.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            Some(&rating),
            false,
            7,
        );
        assert!((result.coefficients.energy - 0.82).abs() < 1e-9);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("thermal") && w.contains('G')));
    }

    #[test]
    fn postal_code_average_energy_record_warns() {
        let rating = energy_rating(EnergyClass::D, true);
        let result = engine().calculate(
            &parcel_with_land(500.0),
            &market(3000.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            Some(&rating),
            false,
            7,
        );
        assert!(result.warnings.iter().any(|w| w.contains("postal-code average")));
    }

    #[test]
    fn missing_energy_record_is_noted() {
        let result = engine().calculate(
            &parcel_with_land(500.0),
            &market(3000.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            None,
            false,
            7,
        );
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("No energy rating")));
        assert!((result.coefficients.energy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn price_band_warnings() {
        let low = engine().calculate(
            &parcel_with_land(500.0),
            &market(800.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            None,
            false,
            7,
        );
        assert!(low.warnings.iter().any(|w| w.contains("Very low price")));

        let high = engine().calculate(
            &parcel_with_land(500.0),
            &market(9500.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            None,
            false,
            7,
        );
        assert!(high.warnings.iter().any(|w| w.contains("volatile")));
    }

    #[test]
    fn bounds_hold_across_input_grid() {
        let eng = engine();
        let conditions = [
            ConditionClass::New,
            ConditionClass::Good,
            ConditionClass::MajorRenovation,
        ];
        for count in [0u32, 3, 7, 15, 40] {
            for tier in [
                MarketTier::Observed,
                MarketTier::RegionalEstimate,
                MarketTier::NationalDefault,
            ] {
                for condition in conditions {
                    for vision_conf in [20.0, 50.0, 95.0] {
                        for month in [1u32, 6, 12] {
                            let result = eng.calculate(
                                &parcel_with_land(350.0),
                                &market(2500.0, count, tier),
                                &vision(PropertyType::House, condition, 2, vision_conf),
                                None,
                                false,
                                month,
                            );
                            assert!(
                                (15.0..=95.0).contains(&result.confidence),
                                "confidence {} out of bounds",
                                result.confidence
                            );
                            assert!(
                                (0.08..=0.30).contains(&result.coefficients.margin),
                                "margin {} out of bounds",
                                result.coefficients.margin
                            );
                            assert!(result.price_low <= result.total_price);
                            assert!(result.total_price <= result.price_high);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn identical_inputs_yield_identical_figures() {
        let eng = engine();
        let parcel = parcel_with_land(500.0);
        let stats = market(3200.0, 8, MarketTier::Observed);
        let assessment = vision(PropertyType::House, ConditionClass::VeryGood, 2, 72.0);

        let a = eng.calculate(&parcel, &stats, &assessment, None, false, 4);
        let b = eng.calculate(&parcel, &stats, &assessment, None, false, 4);

        assert_eq!(a.total_price, b.total_price);
        assert_eq!(a.price_low, b.price_low);
        assert_eq!(a.price_high, b.price_high);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.coefficients.combined, b.coefficients.combined);
    }

    #[test]
    fn confidence_rewards_completeness() {
        let eng = engine();
        let sparse = eng.calculate(
            &ParcelRecord::fallback("local default"),
            &market(3000.0, 0, MarketTier::NationalDefault),
            &vision(PropertyType::Unknown, ConditionClass::Fair, 1, 30.0),
            None,
            false,
            7,
        );

        let mut full_parcel = parcel_with_land(500.0);
        full_parcel.built_area_m2 = Some(130.0);
        full_parcel.construction_year = Some(1998);
        let rich = eng.calculate(
            &full_parcel,
            &market(3000.0, 25, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 2, 85.0),
            Some(&energy_rating(EnergyClass::C, false)),
            true,
            7,
        );

        assert!(rich.confidence > sparse.confidence);
        assert_eq!(rich.data_quality, DataQuality::Excellent);
        assert!(matches!(
            sparse.data_quality,
            DataQuality::Poor | DataQuality::Limited
        ));
    }

    #[test]
    fn fallback_tiers_are_penalized() {
        let eng = engine();
        let stats = market(3000.0, 12, MarketTier::Observed);
        let assessment = vision(PropertyType::House, ConditionClass::Good, 1, 60.0);

        let primary = eng.calculate(&parcel_with_land(500.0), &stats, &assessment, None, false, 7);
        let fallback = eng.calculate(
            &ParcelRecord::fallback("local default"),
            &stats,
            &assessment,
            None,
            false,
            7,
        );
        // -10 tier penalty, -5 land-area bonus lost.
        assert!((primary.confidence - fallback.confidence - 15.0).abs() < 1e-9);
        assert!(fallback
            .warnings
            .iter()
            .any(|w| w.contains("Cadastral data unavailable")));
    }

    #[test]
    fn seasonal_factor_follows_the_table() {
        let eng = engine();
        let parcel = parcel_with_land(500.0);
        let stats = market(3000.0, 12, MarketTier::Observed);
        let assessment = vision(PropertyType::House, ConditionClass::Good, 1, 60.0);

        let may = eng.calculate(&parcel, &stats, &assessment, None, false, 5);
        let january = eng.calculate(&parcel, &stats, &assessment, None, false, 1);
        assert!((may.coefficients.season - 1.03).abs() < 1e-9);
        assert!((january.coefficients.season - 0.98).abs() < 1e-9);
        assert!(may.total_price > january.total_price);
    }

    #[test]
    fn result_carries_readable_labels() {
        let result = engine().calculate(
            &parcel_with_land(500.0),
            &market(3000.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            None,
            false,
            7,
        );
        assert_eq!(result.property_type_label, "detached house");
        assert_eq!(result.condition_label, "good condition");
    }

    #[test]
    fn sources_reflect_what_was_used() {
        let result = engine().calculate(
            &parcel_with_land(500.0),
            &market(3000.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            Some(&energy_rating(EnergyClass::B, false)),
            false,
            7,
        );
        assert_eq!(result.sources.len(), 4);
        assert!(result.sources[0].starts_with("Cadastre"));

        let no_parcel = engine().calculate(
            &ParcelRecord::fallback("local default"),
            &market(3000.0, 12, MarketTier::Observed),
            &vision(PropertyType::House, ConditionClass::Good, 1, 60.0),
            None,
            false,
            7,
        );
        assert!(!no_parcel.sources.iter().any(|s| s.starts_with("Cadastre")));
    }
}
