//! Energy-performance aggregator: reverse-geocoded registry lookup,
//! postal-code averaging as the relaxed tier, and `None` as the valid
//! terminal state. A missing rating is common and never an error.

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{EnergyClass, EnergyRating, GeoPoint};
use crate::sources::fallback::{advance, FallbackTier, FetchOutcome};
use crate::sources::Provider;

pub const REVERSE_GEOCODE_URL: &str = "https://api-adresse.data.gouv.fr/reverse/";
pub const ENERGY_REGISTRY_URL: &str =
    "https://data.ademe.fr/data-fair/api/v1/datasets/dpe-v2-logements-existants/lines";

/// Individual records fetched for the exact lookup.
const INDIVIDUAL_FETCH_SIZE: u32 = 10;
/// Records sampled for the postal-code average.
const AVERAGE_FETCH_SIZE: u32 = 100;

pub struct EnergySource<P> {
    provider: P,
}

impl<P: Provider> EnergySource<P> {
    pub fn new(provider: P) -> Self {
        EnergySource { provider }
    }

    /// Fetch the energy rating near a location. Never fails: degrades to
    /// a postal-code average and finally to `None`.
    pub async fn fetch(&self, location: GeoPoint) -> Option<EnergyRating> {
        let postcode = match self.reverse_geocode(location).await {
            Some(postcode) => postcode,
            None => {
                debug!("no postal address resolved, skipping energy lookup");
                return None;
            }
        };

        let mut tier = FallbackTier::Primary;
        loop {
            if let Some(rating) = self.query(tier, &postcode).await {
                return Some(rating);
            }
            match advance(tier, FetchOutcome::Miss) {
                Some(next) => {
                    warn!(?tier, ?next, "energy lookup missed, degrading");
                    tier = next;
                }
                None => return None,
            }
        }
    }

    async fn query(&self, tier: FallbackTier, postcode: &str) -> Option<EnergyRating> {
        match tier {
            FallbackTier::Primary => self.individual_record(postcode).await,
            FallbackTier::Secondary => self.postal_code_average(postcode).await,
            // Absence is the valid default for energy data.
            FallbackTier::Default => None,
        }
    }

    async fn reverse_geocode(&self, location: GeoPoint) -> Option<String> {
        let params = vec![
            ("lat".to_string(), location.latitude.to_string()),
            ("lon".to_string(), location.longitude.to_string()),
        ];
        let payload = match self.provider.get_json(REVERSE_GEOCODE_URL, &params).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("reverse geocoding failed: {err}");
                return None;
            }
        };

        payload
            .get("features")?
            .as_array()?
            .first()?
            .get("properties")?
            .get("postcode")?
            .as_str()
            .map(str::to_string)
    }

    /// Most recent individual reading for the postal code.
    async fn individual_record(&self, postcode: &str) -> Option<EnergyRating> {
        let params = vec![
            ("size".to_string(), INDIVIDUAL_FETCH_SIZE.to_string()),
            ("qs".to_string(), format!("code_postal:{postcode}")),
        ];
        let payload = match self.provider.get_json(ENERGY_REGISTRY_URL, &params).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("energy registry lookup failed: {err}");
                return None;
            }
        };

        let results = payload.get("results")?.as_array()?;
        let most_recent = results.iter().max_by_key(|r| {
            r.get("date_etablissement_dpe")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        })?;

        let energy_class = most_recent
            .get("classe_consommation_energie")
            .and_then(Value::as_str)
            .and_then(EnergyClass::from_letter)?;

        Some(EnergyRating {
            energy_class,
            ghg_class: most_recent
                .get("classe_estimation_ges")
                .and_then(Value::as_str)
                .and_then(EnergyClass::from_letter),
            consumption_kwh_m2: most_recent
                .get("consommation_energie")
                .and_then(Value::as_f64),
            ghg_kg_m2: most_recent.get("estimation_ges").and_then(Value::as_f64),
            is_average: false,
            source: "energy registry".to_string(),
        })
    }

    /// Postal-code average: most frequent classes, mean figures.
    async fn postal_code_average(&self, postcode: &str) -> Option<EnergyRating> {
        let params = vec![
            ("size".to_string(), AVERAGE_FETCH_SIZE.to_string()),
            ("qs".to_string(), format!("code_postal:{postcode}")),
            (
                "select".to_string(),
                "classe_consommation_energie,classe_estimation_ges,consommation_energie,estimation_ges"
                    .to_string(),
            ),
        ];
        let payload = match self.provider.get_json(ENERGY_REGISTRY_URL, &params).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("postal-code energy average failed: {err}");
                return None;
            }
        };

        let results = payload.get("results")?.as_array()?;
        if results.is_empty() {
            return None;
        }

        let energy_class = most_frequent_class(results, "classe_consommation_energie")?;
        let sample_count = results.len();

        Some(EnergyRating {
            energy_class,
            ghg_class: most_frequent_class(results, "classe_estimation_ges"),
            consumption_kwh_m2: mean_field(results, "consommation_energie"),
            ghg_kg_m2: mean_field(results, "estimation_ges"),
            is_average: true,
            source: format!("energy registry ({sample_count}-record postal average)"),
        })
    }
}

/// Most frequent class in the sample, first seen winning ties.
fn most_frequent_class(results: &[Value], key: &str) -> Option<EnergyClass> {
    let classes: Vec<EnergyClass> = results
        .iter()
        .filter_map(|r| r.get(key)?.as_str().and_then(EnergyClass::from_letter))
        .collect();
    let mut winner: Option<EnergyClass> = None;
    let mut winner_count = 0usize;
    for class in &classes {
        let count = classes.iter().filter(|c| *c == class).count();
        if count > winner_count {
            winner = Some(*class);
            winner_count = count;
        }
    }
    winner
}

fn mean_field(results: &[Value], key: &str) -> Option<f64> {
    let values: Vec<f64> = results
        .iter()
        .filter_map(|r| r.get(key).and_then(Value::as_f64))
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::ScriptedProvider;
    use serde_json::json;

    fn location() -> GeoPoint {
        GeoPoint {
            latitude: 48.85,
            longitude: 2.35,
        }
    }

    fn geocode_payload() -> Value {
        json!({"features": [{"properties": {"postcode": "75004", "city": "Paris"}}]})
    }

    #[tokio::test]
    async fn individual_record_wins_when_present() {
        let provider = ScriptedProvider::new(vec![
            Ok(geocode_payload()),
            Ok(json!({"results": [
                {
                    "classe_consommation_energie": "C",
                    "classe_estimation_ges": "D",
                    "consommation_energie": 140.0,
                    "estimation_ges": 22.0,
                    "date_etablissement_dpe": "2024-05-01",
                },
                {
                    "classe_consommation_energie": "F",
                    "date_etablissement_dpe": "2019-01-15",
                },
            ]})),
        ]);
        let rating = EnergySource::new(provider)
            .fetch(location())
            .await
            .expect("rating");

        // The 2024 reading is more recent than the 2019 one.
        assert_eq!(rating.energy_class, EnergyClass::C);
        assert_eq!(rating.ghg_class, Some(EnergyClass::D));
        assert_eq!(rating.consumption_kwh_m2, Some(140.0));
        assert!(!rating.is_average);
    }

    #[tokio::test]
    async fn empty_registry_degrades_to_postal_average() {
        let provider = ScriptedProvider::new(vec![
            Ok(geocode_payload()),
            Ok(json!({"results": []})),
            Ok(json!({"results": [
                {"classe_consommation_energie": "D", "consommation_energie": 210.0},
                {"classe_consommation_energie": "D", "consommation_energie": 190.0},
                {"classe_consommation_energie": "E", "consommation_energie": 320.0},
            ]})),
        ]);
        let rating = EnergySource::new(provider)
            .fetch(location())
            .await
            .expect("rating");

        assert!(rating.is_average);
        assert_eq!(rating.energy_class, EnergyClass::D);
        assert_eq!(rating.consumption_kwh_m2, Some(240.0));
        assert!(rating.source.contains("postal average"));
    }

    #[tokio::test]
    async fn unresolvable_address_yields_none() {
        let provider = ScriptedProvider::new(vec![Ok(json!({"features": []}))]);
        let source = EnergySource::new(provider);
        assert!(source.fetch(location()).await.is_none());
        // The registry was never queried without a postcode.
        assert_eq!(source.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn total_outage_yields_none() {
        let provider = ScriptedProvider::always_failing();
        let source = EnergySource::new(provider);
        assert!(source.fetch(location()).await.is_none());
    }

    #[test]
    fn most_frequent_class_breaks_ties_by_first_seen() {
        let rows = vec![
            json!({"classe_consommation_energie": "B"}),
            json!({"classe_consommation_energie": "E"}),
        ];
        assert_eq!(
            most_frequent_class(&rows, "classe_consommation_energie"),
            Some(EnergyClass::B)
        );
    }
}
