use crate::config::{LocationSource, ResolvedConfig};
use crate::errors::{Error, Result};
use crate::geo::GeoServices;
use crate::model::GeoMetadata;
use chrono::Utc;
use tracing::info;

/// Work out the metadata attached to every reading of this run.
///
/// Static coordinates are used as given; otherwise the configured query is
/// geocoded. Either way the elevation is looked up afterwards. Returns `None`
/// when location tagging is switched off, without touching either service.
pub async fn resolve(config: &ResolvedConfig, geo: &GeoServices) -> Result<Option<GeoMetadata>> {
    if !config.send_location {
        info!("Location tagging disabled, readings will carry no metadata");
        return Ok(None);
    }

    let (latitude, longitude) = match &config.location {
        Some(LocationSource::Static {
            latitude,
            longitude,
        }) => {
            info!("Using static location {}, {}", latitude, longitude);
            (*latitude, *longitude)
        }
        Some(LocationSource::Geocode(query)) => {
            let place = geo.forward_geocode(query).await?;
            (place.latitude, place.longitude)
        }
        None => {
            return Err(Error::Config(
                "Location tagging is enabled but no location is configured".to_string(),
            ))
        }
    };

    let elevation = geo.get_elevation(latitude, longitude).await?;

    Ok(Some(GeoMetadata {
        latitude,
        longitude,
        elevation,
        captured_at: Utc::now(),
    }))
}
