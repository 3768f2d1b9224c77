//! Metadata enrichment for scanned files.
//!
//! The planner consumes a [`MetadataProvider`]; the default implementation
//! reads EXIF (timestamp, camera make/model, GPS position) and hands GPS
//! coordinates to a [`LocationProvider`] for reverse geocoding. Building a
//! place-name index is an external concern; the core only consumes the
//! resolved names.

use crate::scanner::ScannedFile;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use exif as kamadak_exif;
use photocopy_common::{LocationData, LocationGranularity, Result, SourceFile};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Turns scanned files into fully enriched [`SourceFile`]s.
pub trait MetadataProvider: Send + Sync {
    fn enrich(&self, file: ScannedFile) -> Result<SourceFile>;
}

/// Resolves a GPS position to place names. Implementations are external
/// (GeoNames-backed or otherwise); [`NullLocationProvider`] resolves nothing.
pub trait LocationProvider: Send + Sync {
    fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        granularity: LocationGranularity,
        full_country_names: bool,
    ) -> Option<LocationData>;
}

/// Location provider that never resolves anything.
#[derive(Debug, Default)]
pub struct NullLocationProvider;

impl LocationProvider for NullLocationProvider {
    fn resolve(&self, _: f64, _: f64, _: LocationGranularity, _: bool) -> Option<LocationData> {
        None
    }
}

/// Provider that carries filesystem facts only; timestamps come from mtime.
/// Useful for non-photo trees and tests.
#[derive(Debug, Default)]
pub struct PlainMetadataProvider;

impl MetadataProvider for PlainMetadataProvider {
    fn enrich(&self, file: ScannedFile) -> Result<SourceFile> {
        Ok(SourceFile::new(file.path, file.size, file.modified))
    }
}

/// EXIF-backed provider: DateTimeOriginal (falling back to DateTime) for the
/// timestamp, Make + Model for the camera label, GPS fields for location
/// lookup. Files without readable EXIF keep their filesystem facts.
pub struct ExifMetadataProvider {
    location: Arc<dyn LocationProvider>,
    granularity: LocationGranularity,
    full_country_names: bool,
}

impl ExifMetadataProvider {
    pub fn new(
        location: Arc<dyn LocationProvider>,
        granularity: LocationGranularity,
        full_country_names: bool,
    ) -> Self {
        Self {
            location,
            granularity,
            full_country_names,
        }
    }

    fn read_exif(path: &Path) -> Option<kamadak_exif::Exif> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        kamadak_exif::Reader::new()
            .read_from_container(&mut reader)
            .ok()
    }

    fn exif_datetime(exif: &kamadak_exif::Exif, tag: kamadak_exif::Tag) -> Option<DateTime<Utc>> {
        let field = exif.get_field(tag, kamadak_exif::In::PRIMARY)?;
        let text = match &field.value {
            kamadak_exif::Value::Ascii(values) => {
                String::from_utf8_lossy(values.first()?).into_owned()
            }
            _ => return None,
        };
        let naive = NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
        Some(Utc.from_utc_datetime(&naive))
    }

    fn exif_text(exif: &kamadak_exif::Exif, tag: kamadak_exif::Tag) -> Option<String> {
        let field = exif.get_field(tag, kamadak_exif::In::PRIMARY)?;
        let text = field.display_value().to_string();
        let trimmed = text.trim_matches(|c: char| c == '"' || c.is_whitespace());
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn gps_coordinate(
        exif: &kamadak_exif::Exif,
        value_tag: kamadak_exif::Tag,
        ref_tag: kamadak_exif::Tag,
    ) -> Option<f64> {
        let value = exif.get_field(value_tag, kamadak_exif::In::PRIMARY)?;
        let reference = exif.get_field(ref_tag, kamadak_exif::In::PRIMARY)?;

        let degrees = match &value.value {
            kamadak_exif::Value::Rational(parts) if parts.len() >= 3 => {
                parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0
            }
            _ => return None,
        };

        let reference = reference.display_value().to_string();
        if reference.contains('S') || reference.contains('W') {
            Some(-degrees)
        } else {
            Some(degrees)
        }
    }

    fn camera_label(exif: &kamadak_exif::Exif) -> Option<String> {
        let make = Self::exif_text(exif, kamadak_exif::Tag::Make);
        let model = Self::exif_text(exif, kamadak_exif::Tag::Model);
        match (make, model) {
            (Some(make), Some(model)) => {
                // Many models already repeat the make ("Canon EOS R5").
                if model.starts_with(&make) {
                    Some(model)
                } else {
                    Some(format!("{} {}", make, model))
                }
            }
            (Some(make), None) => Some(make),
            (None, Some(model)) => Some(model),
            (None, None) => None,
        }
    }
}

impl MetadataProvider for ExifMetadataProvider {
    fn enrich(&self, file: ScannedFile) -> Result<SourceFile> {
        let mut enriched = SourceFile::new(file.path, file.size, file.modified);

        let exif = match Self::read_exif(&enriched.path) {
            Some(exif) => exif,
            None => return Ok(enriched),
        };

        let timestamp = Self::exif_datetime(&exif, kamadak_exif::Tag::DateTimeOriginal)
            .or_else(|| Self::exif_datetime(&exif, kamadak_exif::Tag::DateTime));
        enriched = enriched.with_exif_timestamp(timestamp);
        enriched = enriched.with_camera(Self::camera_label(&exif));

        let latitude = Self::gps_coordinate(
            &exif,
            kamadak_exif::Tag::GPSLatitude,
            kamadak_exif::Tag::GPSLatitudeRef,
        );
        let longitude = Self::gps_coordinate(
            &exif,
            kamadak_exif::Tag::GPSLongitude,
            kamadak_exif::Tag::GPSLongitudeRef,
        );
        if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
            debug!(
                "Resolving location for {:?} at ({:.5}, {:.5})",
                enriched.path, latitude, longitude
            );
            let location = self.location.resolve(
                latitude,
                longitude,
                self.granularity,
                self.full_country_names,
            );
            enriched = enriched.with_location(location);
        }

        Ok(enriched)
    }
}
