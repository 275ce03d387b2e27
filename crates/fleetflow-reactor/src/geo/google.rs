// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Google Maps Distance Matrix and Time Zone client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetflow_core::model::GeoPoint;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{GeoError, GeoProvider, TimeZoneInfo};

const METERS_PER_MILE: f64 = 1609.344;

/// Google Maps client settings.
#[derive(Debug, Clone)]
pub struct GoogleMapsConfig {
    /// API key. Without it every lookup yields `None`.
    pub api_key: Option<String>,
    /// Base URL, `https://maps.googleapis.com` in production.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for GoogleMapsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://maps.googleapis.com".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<DistanceMatrixRow>,
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixRow {
    #[serde(default)]
    elements: Vec<DistanceMatrixElement>,
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixElement {
    status: String,
    distance: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeZoneResponse {
    status: String,
    raw_offset: Option<i64>,
    dst_offset: Option<i64>,
    time_zone_id: Option<String>,
}

/// [`GeoProvider`] backed by the Google Maps web services.
#[derive(Clone)]
pub struct GoogleMapsClient {
    http: reqwest::Client,
    config: GoogleMapsConfig,
}

impl GoogleMapsClient {
    /// Create a client.
    pub fn new(config: GoogleMapsConfig) -> Result<Self, GeoError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        if config.api_key.is_none() {
            warn!("No Google Maps key configured; distances and time zones will be unavailable");
        }
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_distance(
        &self,
        key: &str,
        from: GeoPoint,
        to: GeoPoint,
    ) -> Result<f64, GeoError> {
        let response: DistanceMatrixResponse = self
            .http
            .get(self.url("/maps/api/distancematrix/json"))
            .query(&[
                ("origins", from.to_string()),
                ("destinations", to.to_string()),
                ("key", key.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "OK" {
            return Err(GeoError::Status(response.status));
        }

        let element = response
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.elements.into_iter().next())
            .ok_or(GeoError::MissingField("rows[0].elements[0]"))?;

        if element.status != "OK" {
            return Err(GeoError::Status(element.status));
        }

        let meters = element
            .distance
            .ok_or(GeoError::MissingField("distance"))?
            .value;
        Ok(meters / METERS_PER_MILE)
    }

    async fn fetch_time_zone(
        &self,
        key: &str,
        at: GeoPoint,
        instant: DateTime<Utc>,
    ) -> Result<TimeZoneInfo, GeoError> {
        let response: TimeZoneResponse = self
            .http
            .get(self.url("/maps/api/timezone/json"))
            .query(&[
                ("location", at.to_string()),
                ("timestamp", instant.timestamp().to_string()),
                ("key", key.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "OK" {
            return Err(GeoError::Status(response.status));
        }

        Ok(TimeZoneInfo {
            time_zone_id: response
                .time_zone_id
                .ok_or(GeoError::MissingField("timeZoneId"))?,
            raw_offset_secs: response.raw_offset.ok_or(GeoError::MissingField("rawOffset"))?,
            dst_offset_secs: response.dst_offset.unwrap_or(0),
        })
    }
}

#[async_trait]
impl GeoProvider for GoogleMapsClient {
    async fn distance(&self, from: GeoPoint, to: GeoPoint) -> Option<f64> {
        let key = self.config.api_key.as_deref()?;
        match self.fetch_distance(key, from, to).await {
            Ok(miles) => {
                debug!(from = %from, to = %to, miles = miles, "Distance resolved");
                Some(miles)
            }
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, "Distance lookup failed");
                None
            }
        }
    }

    async fn time_zone(&self, at: GeoPoint, instant: DateTime<Utc>) -> Option<TimeZoneInfo> {
        let key = self.config.api_key.as_deref()?;
        match self.fetch_time_zone(key, at, instant).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(at = %at, instant = %instant, error = %e, "Time zone lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, key: Option<&str>) -> GoogleMapsClient {
        GoogleMapsClient::new(GoogleMapsConfig {
            api_key: key.map(str::to_string),
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_distance_converts_meters_to_miles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/distancematrix/json"))
            .and(query_param("origins", "41.88,-87.63"))
            .and(query_param("destinations", "39.77,-86.16"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "rows": [{"elements": [{"status": "OK", "distance": {"text": "1 mi", "value": 1609.344}}]}]
            })))
            .mount(&server)
            .await;

        let miles = client(&server, Some("k"))
            .distance(GeoPoint::new(41.88, -87.63), GeoPoint::new(39.77, -86.16))
            .await
            .unwrap();
        assert!((miles - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unroutable_element_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/distancematrix/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "rows": [{"elements": [{"status": "ZERO_RESULTS"}]}]
            })))
            .mount(&server)
            .await;

        let miles = client(&server, Some("k"))
            .distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0))
            .await;
        assert!(miles.is_none());
    }

    #[tokio::test]
    async fn test_time_zone_parses_offsets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/timezone/json"))
            .and(query_param("timestamp", "1741521600"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "rawOffset": -21600,
                "dstOffset": 3600,
                "timeZoneId": "America/Chicago",
                "timeZoneName": "Central Daylight Time"
            })))
            .mount(&server)
            .await;

        let instant = DateTime::from_timestamp(1_741_521_600, 0).unwrap();
        let info = client(&server, Some("k"))
            .time_zone(GeoPoint::new(41.88, -87.63), instant)
            .await
            .unwrap();
        assert_eq!(info.time_zone_id, "America/Chicago");
        assert_eq!(info.raw_offset_secs, -21600);
        assert_eq!(info.dst_offset_secs, 3600);
        assert_eq!(info.total_offset_secs(), -18000);
    }

    #[tokio::test]
    async fn test_denied_request_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/timezone/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "REQUEST_DENIED",
                "errorMessage": "The provided API key is invalid."
            })))
            .mount(&server)
            .await;

        let info = client(&server, Some("bad"))
            .time_zone(GeoPoint::new(41.88, -87.63), Utc::now())
            .await;
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_server_error_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let miles = client(&server, Some("k"))
            .distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0))
            .await;
        assert!(miles.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server, None);
        assert!(
            client
                .distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0))
                .await
                .is_none()
        );
        assert!(
            client
                .time_zone(GeoPoint::new(0.0, 0.0), Utc::now())
                .await
                .is_none()
        );
    }
}
