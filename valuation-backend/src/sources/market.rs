//! Transaction-history aggregator: radius search, widened-radius retry,
//! and a deterministic regional price table as the terminal default.

use chrono::NaiveDate;
use serde_json::Value;
use tracing::warn;

use crate::model::{GeoPoint, MarketStats, MarketTier, TransactionSummary};
use crate::sources::fallback::{advance, FallbackTier, FetchOutcome};
use crate::sources::Provider;

pub const TRANSACTIONS_URL: &str = "https://api.cquest.org/dvf";

pub const DEFAULT_RADIUS_M: u32 = 500;
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 12;
/// Widening factor for the relaxed-scope search.
const SECONDARY_RADIUS_FACTOR: u32 = 4;

/// Price/area sanity band; ratios outside it are data-entry outliers.
const PRICE_M2_SANITY: (f64, f64) = (500.0, 20_000.0);
/// Transactions below this floor area are parking spots and cellars.
const MIN_AREA_M2: f64 = 10.0;
/// When the lookback window empties the set, keep this many of the most
/// recently listed transactions instead.
const STALE_KEEP_COUNT: usize = 20;
/// Representative transactions retained on the record.
const MAX_RETAINED: usize = 10;

pub struct MarketSource<P> {
    provider: P,
}

impl<P: Provider> MarketSource<P> {
    pub fn new(provider: P) -> Self {
        MarketSource { provider }
    }

    /// Fetch price statistics around a location with the default radius
    /// and lookback window. Never fails.
    pub async fn fetch(&self, location: GeoPoint, today: NaiveDate) -> MarketStats {
        self.fetch_with(location, DEFAULT_RADIUS_M, DEFAULT_LOOKBACK_MONTHS, today)
            .await
    }

    pub async fn fetch_with(
        &self,
        location: GeoPoint,
        radius_m: u32,
        lookback_months: u32,
        today: NaiveDate,
    ) -> MarketStats {
        let mut tier = FallbackTier::Primary;
        loop {
            if let Some(stats) = self
                .query(tier, location, radius_m, lookback_months, today)
                .await
            {
                return stats;
            }
            match advance(tier, FetchOutcome::Miss) {
                Some(next) => {
                    warn!(?tier, ?next, "transaction search missed, degrading");
                    tier = next;
                }
                None => return regional_default(location),
            }
        }
    }

    async fn query(
        &self,
        tier: FallbackTier,
        location: GeoPoint,
        radius_m: u32,
        lookback_months: u32,
        today: NaiveDate,
    ) -> Option<MarketStats> {
        let radius = match tier {
            FallbackTier::Primary => radius_m,
            FallbackTier::Secondary => radius_m * SECONDARY_RADIUS_FACTOR,
            FallbackTier::Default => return Some(regional_default(location)),
        };

        let params = vec![
            ("lat".to_string(), location.latitude.to_string()),
            ("lon".to_string(), location.longitude.to_string()),
            ("dist".to_string(), radius.to_string()),
        ];
        let payload = match self.provider.get_json(TRANSACTIONS_URL, &params).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("transaction search failed: {err}");
                return None;
            }
        };

        let raw = extract_transactions(&payload);
        compute_stats(&raw, radius, lookback_months, today)
    }
}

/// Raw transaction rows from either a GeoJSON feature collection or a
/// plain array payload.
fn extract_transactions(payload: &Value) -> Vec<Value> {
    if let Some(features) = payload.get("features").and_then(Value::as_array) {
        return features
            .iter()
            .filter_map(|f| f.get("properties").cloned())
            .collect();
    }
    payload.as_array().cloned().unwrap_or_default()
}

struct RawTransaction {
    date: Option<NaiveDate>,
    price: f64,
    area_m2: f64,
}

fn parse_transaction(row: &Value) -> Option<RawTransaction> {
    let price = row
        .get("valeur_fonciere")
        .or_else(|| row.get("prix"))
        .and_then(Value::as_f64)?;
    let area_m2 = row
        .get("surface_reelle_bati")
        .or_else(|| row.get("surface_bati"))
        .or_else(|| row.get("surface"))
        .and_then(Value::as_f64)?;
    let date = row
        .get("date_mutation")
        .and_then(Value::as_str)
        .and_then(parse_date);
    Some(RawTransaction {
        date,
        price,
        area_m2,
    })
}

/// Transaction dates arrive in several formats depending on the provider
/// vintage.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.get(..10).unwrap_or(raw);
    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(head, format) {
            return Some(date);
        }
    }
    None
}

/// Filter, then aggregate. `None` means nothing survived and the tier
/// should advance.
fn compute_stats(
    raw: &[Value],
    radius_m: u32,
    lookback_months: u32,
    today: NaiveDate,
) -> Option<MarketStats> {
    let parsed: Vec<RawTransaction> = raw.iter().filter_map(parse_transaction).collect();
    if parsed.is_empty() {
        return None;
    }

    let cutoff = today - chrono::Duration::days(lookback_months as i64 * 30);
    let recent: Vec<&RawTransaction> = parsed
        .iter()
        .filter(|t| t.date.is_some_and(|d| d >= cutoff))
        .collect();
    let window: Vec<&RawTransaction> = if recent.is_empty() {
        parsed.iter().take(STALE_KEEP_COUNT).collect()
    } else {
        recent
    };

    let mut summaries: Vec<TransactionSummary> = Vec::new();
    let mut prices_m2: Vec<f64> = Vec::new();
    for t in window {
        if t.area_m2 <= MIN_AREA_M2 {
            continue;
        }
        let price_per_m2 = t.price / t.area_m2;
        if !(PRICE_M2_SANITY.0..=PRICE_M2_SANITY.1).contains(&price_per_m2) {
            continue;
        }
        prices_m2.push(price_per_m2);
        summaries.push(TransactionSummary {
            date: t.date,
            area_m2: t.area_m2,
            price: t.price,
            price_per_m2,
        });
    }

    if prices_m2.is_empty() {
        return None;
    }

    let mean = prices_m2.iter().sum::<f64>() / prices_m2.len() as f64;
    summaries.truncate(MAX_RETAINED);

    Some(MarketStats {
        mean_price_m2: mean,
        median_price_m2: median(&prices_m2),
        min_price_m2: prices_m2.iter().copied().fold(f64::INFINITY, f64::min),
        max_price_m2: prices_m2.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        std_dev: sample_std_dev(&prices_m2, mean),
        transaction_count: prices_m2.len() as u32,
        transactions: summaries,
        period: format!("last {lookback_months} months"),
        search_radius_m: radius_m,
        tier: MarketTier::Observed,
        source: "transaction registry".to_string(),
    })
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Coarse static price map: bounding boxes over the densest markets, then
/// broad urban and rural bands. Pure, no I/O, cannot fail.
fn regional_price_m2(location: GeoPoint) -> Option<f64> {
    let (lat, lon) = (location.latitude, location.longitude);
    let bands: [(f64, f64, f64, f64, f64); 8] = [
        // (lat min, lat max, lon min, lon max, price/m²)
        (48.8, 48.95, 2.2, 2.5, 10_500.0), // Paris and inner ring
        (48.5, 49.2, 1.8, 3.0, 4_500.0),   // outer Paris region
        (45.7, 45.8, 4.8, 4.9, 5_000.0),   // Lyon
        (43.2, 43.4, 5.3, 5.5, 3_500.0),   // Marseille
        (44.8, 44.9, -0.6, -0.5, 4_500.0), // Bordeaux
        (43.5, 43.8, 6.8, 7.5, 6_000.0),   // Riviera
        (43.0, 50.0, -2.0, 8.0, 3_000.0),  // urban France
        (41.0, 51.5, -5.5, 9.8, 1_800.0),  // rural France
    ];
    bands
        .iter()
        .find(|(lat_min, lat_max, lon_min, lon_max, _)| {
            (*lat_min..=*lat_max).contains(&lat) && (*lon_min..=*lon_max).contains(&lon)
        })
        .map(|(_, _, _, _, price)| *price)
}

fn regional_default(location: GeoPoint) -> MarketStats {
    let (mean, tier, source) = match regional_price_m2(location) {
        Some(price) => (
            price,
            MarketTier::RegionalEstimate,
            "regional price bands".to_string(),
        ),
        None => (
            3_000.0,
            MarketTier::NationalDefault,
            "national average".to_string(),
        ),
    };

    MarketStats {
        mean_price_m2: mean,
        median_price_m2: mean * 0.95,
        min_price_m2: mean * 0.7,
        max_price_m2: mean * 1.3,
        std_dev: mean * 0.15,
        transaction_count: 0,
        transactions: Vec::new(),
        period: "regional estimate".to_string(),
        search_radius_m: 0,
        tier,
        source,
    }
}
