// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local wall-clock time to absolute instant.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use fleetflow_core::model::GeoPoint;
use tracing::debug;

use crate::geo::GeoProvider;

/// Resolve `local`, a wall-clock time at `location`, to a UTC instant.
///
/// The zone is first looked up at `local` read as if it were UTC, which is
/// off by the zone's own offset. The first correction lands on the right
/// instant unless a DST switch lies in between; a second lookup at the
/// corrected instant detects that and shifts by the DST difference.
///
/// `None` when the provider cannot answer either lookup.
pub async fn resolve_local_time(
    geo: &dyn GeoProvider,
    location: GeoPoint,
    local: NaiveDateTime,
) -> Option<DateTime<Utc>> {
    let naive_instant = local.and_utc();
    let first = geo.time_zone(location, naive_instant).await?;
    let guess = naive_instant.checked_sub_signed(Duration::seconds(first.total_offset_secs()))?;

    let second = geo.time_zone(location, guess).await?;
    if second.dst_offset_secs == first.dst_offset_secs {
        return Some(guess);
    }

    let shift = second.dst_offset_secs - first.dst_offset_secs;
    debug!(
        location = %location,
        local = %local,
        zone = %second.time_zone_id,
        shift_secs = shift,
        "DST boundary between naive and corrected instant"
    );
    guess.checked_sub_signed(Duration::seconds(shift))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{MockGeoProvider, MockZone};
    use chrono::{NaiveDate, TimeZone};

    fn chicago() -> MockGeoProvider {
        MockGeoProvider::new().with_zone(MockZone {
            id: "America/Chicago".into(),
            raw_offset_secs: -6 * 3600,
            dst_offset_secs: 3600,
            dst_from: Some(Utc.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap()),
        })
    }

    fn local(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    const HERE: GeoPoint = GeoPoint {
        lat: 41.88,
        lng: -87.63,
    };

    #[tokio::test]
    async fn test_standard_time() {
        let resolved = resolve_local_time(&chicago(), HERE, local(3, 12)).await.unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2025, 3, 3, 18, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_daylight_time() {
        let resolved = resolve_local_time(&chicago(), HERE, local(9, 12)).await.unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2025, 3, 9, 17, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_boundary_crossing_applies_dst_correction() {
        // 05:00Z is before the switch, the corrected 11:00Z is after it
        let geo = chicago();
        let resolved = resolve_local_time(&geo, HERE, local(9, 5)).await.unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2025, 3, 9, 10, 0, 0).unwrap());
        assert_eq!(geo.time_zone_calls(), 2);

        // Converting back with the offset in effect reproduces the local time
        let back = resolved + Duration::seconds(-6 * 3600 + 3600);
        assert_eq!(back.naive_utc(), local(9, 5));
    }

    #[tokio::test]
    async fn test_no_zone_yields_none() {
        let resolved = resolve_local_time(&MockGeoProvider::new(), HERE, local(9, 5)).await;
        assert!(resolved.is_none());
    }
}
