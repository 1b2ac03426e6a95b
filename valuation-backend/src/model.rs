//! Typed records exchanged between the source aggregators and the
//! valuation engine. Every field that can be unknown carries an explicit
//! absent state; zero is never used as a stand-in, since zero is a
//! legitimate computed area.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use vision_assessor::VisualAssessment;

/// GPS location. Validated at the service boundary before reaching the core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Provenance tier of a parcel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelTier {
    /// Observed cadastral data (exact or relaxed-scope lookup).
    Primary,
    /// Deterministic local default, no provider reachable.
    Fallback,
}

/// Origin of an individual parcel field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    #[default]
    Api,
    Manual,
}

/// Per-field origin tags for the operator-overridable parcel fields.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FieldOrigins {
    pub land_area: FieldOrigin,
    pub built_area: FieldOrigin,
    pub construction_year: FieldOrigin,
    pub floors: FieldOrigin,
}

/// Cadastral parcel data for one location. Constructed once per request
/// by the parcel aggregator and read-only afterwards; operator overrides
/// produce a new record via [`ParcelRecord::with_overrides`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelRecord {
    pub parcel_number: Option<String>,
    pub section: Option<String>,
    pub commune: Option<String>,
    pub insee_code: Option<String>,
    pub department_code: Option<String>,
    /// Fiscal land area in m², >= 0 when present.
    pub land_area_m2: Option<f64>,
    pub built_area_m2: Option<f64>,
    pub construction_year: Option<i32>,
    /// From the building-height enrichment lookup (height / 3 m stories).
    pub estimated_floors: Option<u32>,
    pub tier: ParcelTier,
    pub source: String,
    pub field_origins: FieldOrigins,
}

impl ParcelRecord {
    /// Empty but structurally valid record for the default tier.
    pub fn fallback(source: &str) -> Self {
        ParcelRecord {
            parcel_number: None,
            section: None,
            commune: None,
            insee_code: None,
            department_code: None,
            land_area_m2: None,
            built_area_m2: None,
            construction_year: None,
            estimated_floors: None,
            tier: ParcelTier::Fallback,
            source: source.to_string(),
            field_origins: FieldOrigins::default(),
        }
    }

    /// Apply operator-supplied values ("expert mode"): each supplied field
    /// replaces the fetched value and is tagged with a manual origin.
    pub fn with_overrides(mut self, overrides: &ManualOverrides) -> Self {
        if let Some(land) = overrides.land_area_m2 {
            self.land_area_m2 = Some(land);
            self.field_origins.land_area = FieldOrigin::Manual;
        }
        if let Some(built) = overrides.built_area_m2 {
            self.built_area_m2 = Some(built);
            self.field_origins.built_area = FieldOrigin::Manual;
        }
        if let Some(year) = overrides.construction_year {
            self.construction_year = Some(year);
            self.field_origins.construction_year = FieldOrigin::Manual;
        }
        if let Some(floors) = overrides.floors {
            self.estimated_floors = Some(floors);
            self.field_origins.floors = FieldOrigin::Manual;
        }
        self
    }
}

/// Operator-supplied parcel field values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualOverrides {
    pub land_area_m2: Option<f64>,
    pub built_area_m2: Option<f64>,
    pub construction_year: Option<i32>,
    pub floors: Option<u32>,
}

/// Provenance tier of market statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketTier {
    /// Computed from observed transactions around the point.
    Observed,
    /// Geographic bounding-box price band, no transactions.
    RegionalEstimate,
    /// Flat national average, location matched no band.
    NationalDefault,
}

/// One representative transaction retained for the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub date: Option<NaiveDate>,
    pub area_m2: f64,
    pub price: f64,
    pub price_per_m2: f64,
}

/// Price statistics around a location. Always fully populated: when the
/// transaction count is zero the figures are regionally plausible
/// defaults, so consumers branch on `tier`, never on missing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStats {
    pub mean_price_m2: f64,
    pub median_price_m2: f64,
    pub min_price_m2: f64,
    pub max_price_m2: f64,
    /// Sample standard deviation of price/m² (0 with fewer than 2 points).
    pub std_dev: f64,
    pub transaction_count: u32,
    /// Up to 10 representative transactions.
    pub transactions: Vec<TransactionSummary>,
    pub period: String,
    pub search_radius_m: u32,
    pub tier: MarketTier,
    pub source: String,
}

/// Energy performance letter class, A (best) to G (worst).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EnergyClass {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl EnergyClass {
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim() {
            "A" => Some(EnergyClass::A),
            "B" => Some(EnergyClass::B),
            "C" => Some(EnergyClass::C),
            "D" => Some(EnergyClass::D),
            "E" => Some(EnergyClass::E),
            "F" => Some(EnergyClass::F),
            "G" => Some(EnergyClass::G),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            EnergyClass::A => 'A',
            EnergyClass::B => 'B',
            EnergyClass::C => 'C',
            EnergyClass::D => 'D',
            EnergyClass::E => 'E',
            EnergyClass::F => 'F',
            EnergyClass::G => 'G',
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

/// Energy-performance record. Absent at the pipeline level is a valid,
/// common state; this struct only exists when some reading was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyRating {
    pub energy_class: EnergyClass,
    pub ghg_class: Option<EnergyClass>,
    /// kWh/m²/year.
    pub consumption_kwh_m2: Option<f64>,
    /// kgCO2/m²/year.
    pub ghg_kg_m2: Option<f64>,
    /// True when the record is a postal-code average rather than an
    /// individual reading.
    pub is_average: bool,
    pub source: String,
}

/// Qualitative data-quality label, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Excellent,
    Good,
    Average,
    Limited,
    Poor,
}

/// Every multiplicative adjustment applied to the base price, exposed for
/// auditability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AppliedCoefficients {
    pub condition: f64,
    pub floors: f64,
    pub season: f64,
    pub energy: f64,
    /// Product of the four factors above.
    pub combined: f64,
    /// Relative half-width of the price range.
    pub margin: f64,
}

/// Terminal artifact of the pipeline. Constructed once, never mutated,
/// consumed by the external reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResult {
    pub land_area_m2: Option<f64>,
    pub habitable_surface_m2: f64,
    pub base_price_m2: f64,
    pub adjusted_price_m2: f64,
    pub total_price: f64,
    pub price_low: f64,
    pub price_high: f64,
    /// 0-100, clamped to [15, 95] by the engine.
    pub confidence: f64,
    pub data_quality: DataQuality,
    pub coefficients: AppliedCoefficients,
    pub warnings: Vec<String>,
    pub sources: Vec<String>,
    /// Human-readable labels for the visual classification.
    pub property_type_label: String,
    pub condition_label: String,
    pub parcel: ParcelRecord,
    pub market: MarketStats,
    pub energy: Option<EnergyRating>,
    pub vision: VisualAssessment,
    pub estimated_at: DateTime<Utc>,
}
