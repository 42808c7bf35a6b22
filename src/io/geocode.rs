//! Reverse geocoding of crash coordinates
//!
//! Best-effort enrichment only: a failed lookup means the emergency message
//! goes out with raw coordinates and no street address.

use crate::infra::config::Config;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding disabled: no API key configured")]
    MissingApiKey,

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no address found for coordinates")]
    NoResult,
}

/// Resolves coordinates to a human-readable address
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_lookup(&self, lat: &str, lon: &str) -> Result<String, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct GeocodePage {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
}

/// Google geocoding API client
pub struct ReverseGeocoder {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl ReverseGeocoder {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base: config.geocode_api_base().trim_end_matches('/').to_string(),
            api_key: config.geocode_api_key().to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for ReverseGeocoder {
    async fn reverse_lookup(&self, lat: &str, lon: &str) -> Result<String, GeocodeError> {
        if self.api_key.is_empty() {
            return Err(GeocodeError::MissingApiKey);
        }

        let url = format!("{}/maps/api/geocode/json", self.api_base);
        let page: GeocodePage = self
            .http
            .get(&url)
            .query(&[("latlng", format!("{},{}", lat, lon)), ("key", self.api_key.clone())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let address = page
            .results
            .into_iter()
            .next()
            .map(|r| r.formatted_address)
            .ok_or(GeocodeError::NoResult)?;

        debug!(lat = %lat, lon = %lon, address = %address, "reverse_geocoded");
        Ok(address)
    }
}
