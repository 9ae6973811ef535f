//! Batch population of `data/standard` from the files in `data/original`.
//!
//! Every original file name is matched against an [`ImageFileExtractor`];
//! matching files are placed at their coordinates. Failures of single files
//! are recorded in the [`ImportReport`] and the batch goes on, except for
//! storage failures, which abort it.

use std::time::Instant;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::container::DataStructure;
use crate::error::BdsError;
use crate::geometry::{Location, PlateGeometry, WellGeometry};
use crate::hcs::original_dir;
use crate::metadata::{Reference, ReferenceKind};

pub const PLATE_GROUP: &str = "plate";
pub const TILE_GROUP: &str = "tile";
pub const CHANNEL_GROUP: &str = "channel";

/// Coordinates of one image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageLocation {
    pub channel: u32,
    pub plate_location: Location,
    pub well_location: Location,
}

/// Derives image coordinates from file names with a regular expression.
///
/// The expression must define the named groups `plate` (a matrix coordinate
/// such as `B03`) and `channel` (a number). The optional group `tile` holds
/// the linear position of the tile inside the well; without it every image
/// is the first tile.
#[derive(Debug, Clone)]
pub struct ImageFileExtractor {
    pattern: Regex,
    channel_offset: i64,
}

impl ImageFileExtractor {
    pub fn new(pattern: &str) -> Result<Self, BdsError> {
        let pattern =
            Regex::new(pattern).map_err(|err| BdsError::InvalidPattern(err.to_string()))?;
        let names = pattern.capture_names().flatten().collect::<Vec<_>>();
        for required in [PLATE_GROUP, CHANNEL_GROUP] {
            if !names.contains(&required) {
                return Err(BdsError::InvalidPattern(format!(
                    "missing named group '{required}' in {pattern}"
                )));
            }
        }
        Ok(Self {
            pattern,
            channel_offset: 0,
        })
    }

    /// Added to the captured channel number, e.g. `1` for zero-based names.
    pub fn with_channel_offset(mut self, channel_offset: i64) -> Self {
        self.channel_offset = channel_offset;
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// `Ok(None)` for names the pattern does not match. A matching name with
    /// unusable captures is an error.
    pub fn extract(
        &self,
        file_name: &str,
        plate_geometry: &PlateGeometry,
        well_geometry: &WellGeometry,
    ) -> Result<Option<ImageLocation>, BdsError> {
        let Some(captures) = self.pattern.captures(file_name) else {
            return Ok(None);
        };
        let plate = &captures[PLATE_GROUP];
        let plate_location = Location::from_matrix_coordinate(plate).ok_or_else(|| {
            BdsError::IllegalArgument(format!("invalid plate coordinate '{plate}' in {file_name}"))
        })?;

        let channel = &captures[CHANNEL_GROUP];
        let channel = channel
            .parse::<i64>()
            .ok()
            .map(|value| value + self.channel_offset)
            .and_then(|value| u32::try_from(value).ok())
            .ok_or_else(|| {
                BdsError::IllegalArgument(format!("invalid channel '{channel}' in {file_name}"))
            })?;

        let well_location = match captures.name(TILE_GROUP) {
            Some(tile) => {
                let position = tile.as_str().parse::<u32>().map_err(|_| {
                    BdsError::IllegalArgument(format!(
                        "invalid tile '{}' in {file_name}",
                        tile.as_str()
                    ))
                })?;
                Location::from_position(position, well_geometry)?
            }
            None => Location::new(1, 1)?,
        };

        if !plate_geometry.contains(&plate_location) {
            return Err(BdsError::LocationOutOfGeometry {
                role: "plate",
                location: plate_location.to_string(),
                geometry: plate_geometry.to_string(),
            });
        }
        Ok(Some(ImageLocation {
            channel,
            plate_location,
            well_location,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedFile {
    pub original_path: Utf8PathBuf,
    pub standard_path: Utf8PathBuf,
    pub location: ImageLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub original_path: Utf8PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub added: Vec<ImportedFile>,
    pub skipped: Vec<Utf8PathBuf>,
    pub failed: Vec<FailedFile>,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Places every matching original file of an open read-write container and
/// registers an identical reference for it.
pub fn import_standard_nodes(
    structure: &mut DataStructure,
    extractor: &ImageFileExtractor,
    sink: &dyn ProgressSink,
) -> Result<ImportReport, BdsError> {
    let started = Instant::now();
    let mut report = ImportReport::default();
    {
        let data = structure.hcs_formatted_data()?;
        let storage = structure.storage()?;
        let originals = storage.walk_files(&original_dir())?;
        sink.event(ProgressEvent {
            message: format!("phase=Import; {} original files", originals.len()),
            elapsed: None,
        });

        for node in originals {
            let relative = node
                .path()
                .strip_prefix(&original_dir())
                .map(|path| path.to_path_buf())
                .ok_or_else(|| {
                    BdsError::Storage(format!("{} is outside data/original", node.path()))
                })?;
            let location =
                match extractor.extract(node.name(), data.plate_geometry(), data.well_geometry()) {
                    Ok(Some(location)) => location,
                    Ok(None) => {
                        debug!(file = %relative, "no coordinates in file name");
                        report.skipped.push(relative);
                        continue;
                    }
                    Err(err) => {
                        warn!(file = %relative, error = %err, "import failed");
                        report.failed.push(FailedFile {
                            original_path: relative,
                            error: err.to_string(),
                        });
                        continue;
                    }
                };
            match data.add_standard_node(
                &relative,
                location.channel,
                &location.plate_location,
                &location.well_location,
            ) {
                Ok(standard) => report.added.push(ImportedFile {
                    original_path: relative,
                    standard_path: standard.relative_path,
                    location,
                }),
                Err(err) if err.is_recoverable() => {
                    warn!(file = %relative, error = %err, "import failed");
                    report.failed.push(FailedFile {
                        original_path: relative,
                        error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    for imported in &report.added {
        structure.add_reference(Reference::new(
            imported.standard_path.clone(),
            imported.original_path.clone(),
            ReferenceKind::Identical,
        ))?;
    }
    sink.event(ProgressEvent {
        message: format!(
            "phase=Import; added={} skipped={} failed={}",
            report.added.len(),
            report.skipped.len(),
            report.failed.len()
        ),
        elapsed: Some(started.elapsed()),
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const PATTERN: &str = r"^(?P<plate>[A-Z]\d+)_s(?P<tile>\d+)_w(?P<channel>\d+)\.tiff$";

    #[test]
    fn extracts_coordinates() {
        let extractor = ImageFileExtractor::new(PATTERN).unwrap();
        let plate = PlateGeometry::new(8, 12).unwrap();
        let well = WellGeometry::new(3, 3).unwrap();
        let location = extractor
            .extract("B03_s5_w2.tiff", &plate, &well)
            .unwrap()
            .unwrap();
        assert_eq!(location.channel, 2);
        assert_eq!(location.plate_location, Location::new(3, 2).unwrap());
        assert_eq!(location.well_location, Location::new(2, 2).unwrap());
        assert_eq!(extractor.extract("notes.txt", &plate, &well).unwrap(), None);
    }

    #[test]
    fn channel_offset_and_missing_tile() {
        let extractor = ImageFileExtractor::new(r"^(?P<plate>[A-Z]\d+)-(?P<channel>\d+)\.tiff$")
            .unwrap()
            .with_channel_offset(1);
        let plate = PlateGeometry::new(8, 12).unwrap();
        let well = WellGeometry::new(3, 3).unwrap();
        let location = extractor.extract("A1-0.tiff", &plate, &well).unwrap().unwrap();
        assert_eq!(location.channel, 1);
        assert_eq!(location.well_location, Location::new(1, 1).unwrap());
    }

    #[test]
    fn rejects_patterns_without_groups() {
        assert_matches!(
            ImageFileExtractor::new(r"(?P<plate>\w+)\.tiff"),
            Err(BdsError::InvalidPattern(_))
        );
        assert_matches!(
            ImageFileExtractor::new(r"(?P<plate>[A-Z"),
            Err(BdsError::InvalidPattern(_))
        );
    }

    #[test]
    fn plate_outside_geometry_is_an_error() {
        let extractor = ImageFileExtractor::new(PATTERN).unwrap();
        let plate = PlateGeometry::new(2, 2).unwrap();
        let well = WellGeometry::new(3, 3).unwrap();
        assert_matches!(
            extractor.extract("H12_s1_w1.tiff", &plate, &well),
            Err(BdsError::LocationOutOfGeometry { role: "plate", .. })
        );
    }
}
