//! Cadastral parcel aggregator: point-in-polygon lookup with a relaxed
//! bounding-box retry and a never-failing local default.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::model::{GeoPoint, ParcelRecord, ParcelTier};
use crate::sources::fallback::{advance, FallbackTier, FetchOutcome};
use crate::sources::Provider;

pub const PARCEL_LOOKUP_URL: &str = "https://apicarto.ign.fr/api/cadastre/parcelle";
pub const BUILDING_LOOKUP_URL: &str = "https://apicarto.ign.fr/api/gpu/document";

/// Assumed story height for the height-to-floors enrichment.
const STORY_HEIGHT_M: f64 = 3.0;
/// Half-width of the relaxed-scope lookup box, in degrees (~50 m).
const RELAXED_BOX_DEG: f64 = 0.0005;

/// Flat per-degree conversion, mid-latitude. The resulting figure is an
/// approximation and only used when the fiscal area is absent.
const LAT_METERS_PER_DEG: f64 = 111_000.0;
const LON_METERS_PER_DEG: f64 = 80_000.0;

const EXACT_SOURCE: &str = "cadastral registry";
const RELAXED_SOURCE: &str = "cadastral registry (relaxed lookup)";
const DEFAULT_SOURCE: &str = "local default";

pub struct ParcelSource<P> {
    provider: P,
}

impl<P: Provider> ParcelSource<P> {
    pub fn new(provider: P) -> Self {
        ParcelSource { provider }
    }

    /// Fetch the parcel record for a location. Never fails: degrades
    /// through the fallback tiers down to an all-absent record.
    pub async fn fetch(&self, location: GeoPoint) -> ParcelRecord {
        let mut tier = FallbackTier::Primary;
        loop {
            if let Some(record) = self.query(tier, location).await {
                return record;
            }
            match advance(tier, FetchOutcome::Miss) {
                Some(next) => {
                    warn!(?tier, ?next, "parcel lookup missed, degrading");
                    tier = next;
                }
                None => return ParcelRecord::fallback(DEFAULT_SOURCE),
            }
        }
    }

    async fn query(&self, tier: FallbackTier, location: GeoPoint) -> Option<ParcelRecord> {
        match tier {
            FallbackTier::Primary => self.lookup(point_geometry(location), EXACT_SOURCE).await,
            FallbackTier::Secondary => self.lookup(box_geometry(location), RELAXED_SOURCE).await,
            FallbackTier::Default => Some(ParcelRecord::fallback(DEFAULT_SOURCE)),
        }
    }

    async fn lookup(&self, geometry: Value, source: &str) -> Option<ParcelRecord> {
        let params = vec![("geom".to_string(), geometry.to_string())];
        let payload = match self.provider.get_json(PARCEL_LOOKUP_URL, &params).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("cadastral lookup failed: {err}");
                return None;
            }
        };

        let feature = payload.get("features")?.as_array()?.first()?;
        let (mut record, parcel_geometry) = parse_feature(feature, source)?;

        // Enrichment is best-effort: a failed building lookup never
        // invalidates the base record.
        if let Some(geom) = parcel_geometry {
            if let Some(floors) = self.building_floors(&geom).await {
                record.estimated_floors = Some(floors);
            }
        }

        Some(record)
    }

    /// Estimated floor count from the tallest building on the parcel.
    async fn building_floors(&self, geometry: &Value) -> Option<u32> {
        let params = vec![("geom".to_string(), geometry.to_string())];
        let payload = match self.provider.get_json(BUILDING_LOOKUP_URL, &params).await {
            Ok(payload) => payload,
            Err(err) => {
                debug!("building enrichment failed: {err}");
                return None;
            }
        };

        let height = payload
            .get("features")?
            .as_array()?
            .iter()
            .filter_map(|f| f.get("properties")?.get("hauteur")?.as_f64())
            .fold(None, |best: Option<f64>, h| {
                Some(best.map_or(h, |b| b.max(h)))
            })?;

        Some(((height / STORY_HEIGHT_M) as u32).max(1))
    }
}

fn str_prop(props: &Value, key: &str) -> Option<String> {
    props.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_feature(feature: &Value, source: &str) -> Option<(ParcelRecord, Option<Value>)> {
    let props = feature.get("properties")?;
    let geometry = feature.get("geometry").cloned();

    // Fiscal area when declared; polygon approximation otherwise.
    let land_area = props
        .get("contenance")
        .and_then(Value::as_f64)
        .or_else(|| geometry.as_ref().and_then(approximate_polygon_area_m2));

    let insee_code = str_prop(props, "code_insee").or_else(|| {
        match (str_prop(props, "code_dep"), str_prop(props, "code_com")) {
            (Some(dep), Some(com)) => Some(format!("{dep}{com}")),
            _ => None,
        }
    });

    let record = ParcelRecord {
        parcel_number: str_prop(props, "numero"),
        section: str_prop(props, "section"),
        commune: str_prop(props, "nom_com").or_else(|| str_prop(props, "commune")),
        insee_code,
        department_code: str_prop(props, "code_dep"),
        land_area_m2: land_area,
        built_area_m2: None,
        construction_year: None,
        estimated_floors: None,
        tier: ParcelTier::Primary,
        source: source.to_string(),
        field_origins: Default::default(),
    };

    Some((record, geometry))
}

fn point_geometry(location: GeoPoint) -> Value {
    // GeoJSON order is [longitude, latitude].
    json!({
        "type": "Point",
        "coordinates": [location.longitude, location.latitude],
    })
}

fn box_geometry(location: GeoPoint) -> Value {
    let (lat, lon) = (location.latitude, location.longitude);
    let d = RELAXED_BOX_DEG;
    json!({
        "type": "Polygon",
        "coordinates": [[
            [lon - d, lat - d],
            [lon + d, lat - d],
            [lon + d, lat + d],
            [lon - d, lat + d],
            [lon - d, lat - d],
        ]],
    })
}

/// Shoelace area of the outer ring, converted from degrees² with a flat
/// mid-latitude factor. Deliberately approximate.
fn approximate_polygon_area_m2(geometry: &Value) -> Option<f64> {
    if geometry.get("type")?.as_str()? != "Polygon" {
        return None;
    }
    let ring = geometry.get("coordinates")?.as_array()?.first()?.as_array()?;
    let points: Vec<(f64, f64)> = ring
        .iter()
        .filter_map(|c| {
            let pair = c.as_array()?;
            Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
        })
        .collect();
    if points.len() < 3 {
        return None;
    }

    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].0 * points[j].1;
        area -= points[j].0 * points[i].1;
    }
    let area_deg2 = area.abs() / 2.0;

    Some(area_deg2 * LAT_METERS_PER_DEG * LON_METERS_PER_DEG)
}
