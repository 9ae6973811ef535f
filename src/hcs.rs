//! Coordinate addressing of standardized HCS image data.
//!
//! Standard nodes live at
//! `data/standard/channel{N}/row{Y}/column{X}/<well file>` where `(X, Y)` is
//! the plate location and the well file name encodes the tile location
//! inside the well. A standard node is a link into `data/original` when the
//! container keeps its original data, otherwise the original file is moved.
//!
//! Writers are expected to be alone on a container.
//! [`HcsImageFormattedData::add_standard_node`] looks for an existing node
//! before inserting. A concurrent writer racing for the same coordinate loses
//! at the storage layer, which never replaces a node, and gets a storage error.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::channel::ChannelList;
use crate::error::BdsError;
use crate::format::{Format, FormatKind, WellFileNaming};
use crate::geometry::{Location, NamedGeometry, PlateGeometry, WellGeometry};
use crate::parameter::{CONTAINS_ORIGINAL_DATA, DEVICE_ID, FormatParameters};
use crate::storage::{Node, NodePath, Storage};

pub const DATA_DIR: &str = "data";
pub const ORIGINAL_DIR: &str = "original";
pub const STANDARD_DIR: &str = "standard";

pub fn original_dir() -> NodePath {
    NodePath::new(DATA_DIR).join(ORIGINAL_DIR)
}

pub fn standard_dir() -> NodePath {
    NodePath::new(DATA_DIR).join(STANDARD_DIR)
}

/// Typed HCS parameters of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HcsParameters {
    pub plate_geometry: PlateGeometry,
    pub well_geometry: WellGeometry,
    pub channels: ChannelList,
    pub contains_original_data: bool,
    pub device_id: Option<String>,
}

impl HcsParameters {
    pub fn from_parameters(
        format: &Format,
        parameters: &FormatParameters,
    ) -> Result<Self, BdsError> {
        format.assert_valid_parameters(parameters)?;
        let mistyped = |name: &str| {
            BdsError::DataStructure(format!(
                "format parameter {name} does not have the type required by {format}"
            ))
        };
        Ok(Self {
            plate_geometry: *parameters
                .plate_geometry()
                .ok_or_else(|| mistyped(PlateGeometry::DIRECTORY))?,
            well_geometry: *parameters
                .well_geometry()
                .ok_or_else(|| mistyped(WellGeometry::DIRECTORY))?,
            channels: parameters
                .channels()
                .cloned()
                .ok_or_else(|| mistyped(crate::channel::NUMBER_OF_CHANNELS))?,
            contains_original_data: parameters
                .flag(CONTAINS_ORIGINAL_DATA)
                .ok_or_else(|| mistyped(CONTAINS_ORIGINAL_DATA))?,
            device_id: parameters.text(DEVICE_ID).map(str::to_string),
        })
    }
}

/// A standard node together with its path below `data/standard`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardNode {
    pub node: Node,
    pub relative_path: Utf8PathBuf,
}

/// Resolves `(channel, plate location, well location)` triples to standard
/// nodes of one container and adds new ones.
#[derive(Debug, Clone)]
pub struct HcsImageFormattedData<'s> {
    storage: &'s Storage,
    format: Format,
    naming: WellFileNaming,
    parameters: HcsParameters,
    writable: bool,
}

impl<'s> HcsImageFormattedData<'s> {
    /// Validates the format and its mandatory parameters once; every later
    /// operation trusts the typed values captured here.
    pub fn new(
        storage: &'s Storage,
        format: Format,
        parameters: &FormatParameters,
    ) -> Result<Self, BdsError> {
        let parameters = HcsParameters::from_parameters(&format, parameters)?;
        Self::from_validated(storage, format, parameters)
    }

    pub(crate) fn from_validated(
        storage: &'s Storage,
        format: Format,
        parameters: HcsParameters,
    ) -> Result<Self, BdsError> {
        let FormatKind::HcsImage(naming) = format.kind() else {
            return Err(BdsError::DataStructure(format!(
                "format {format} does not describe HCS image data"
            )));
        };
        Ok(Self {
            storage,
            format,
            naming,
            parameters,
            writable: true,
        })
    }

    /// Rejects every later [`add_standard_node`](Self::add_standard_node).
    pub(crate) fn into_read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn parameters(&self) -> &HcsParameters {
        &self.parameters
    }

    pub fn plate_geometry(&self) -> &PlateGeometry {
        &self.parameters.plate_geometry
    }

    pub fn well_geometry(&self) -> &WellGeometry {
        &self.parameters.well_geometry
    }

    pub fn channel_count(&self) -> usize {
        self.parameters.channels.channel_count()
    }

    pub fn contains_original_data(&self) -> bool {
        self.parameters.contains_original_data
    }

    pub fn device_id(&self) -> Option<&str> {
        self.parameters.device_id.as_deref()
    }

    fn check_coordinates(
        &self,
        channel: u32,
        plate_location: &Location,
        well_location: &Location,
    ) -> Result<(), BdsError> {
        let count = self.channel_count();
        if channel == 0 || channel as usize > count {
            return Err(BdsError::ChannelOutOfRange { channel, count });
        }
        if !self.plate_geometry().contains(plate_location) {
            return Err(BdsError::LocationOutOfGeometry {
                role: "plate",
                location: plate_location.to_string(),
                geometry: self.plate_geometry().to_string(),
            });
        }
        if !self.well_geometry().contains(well_location) {
            return Err(BdsError::LocationOutOfGeometry {
                role: "well",
                location: well_location.to_string(),
                geometry: self.well_geometry().to_string(),
            });
        }
        Ok(())
    }

    fn column_path(channel: u32, plate_location: &Location) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("channel{channel}"))
            .join(format!("row{}", plate_location.y()))
            .join(format!("column{}", plate_location.x()))
    }

    /// Path below `data/standard` of the node for the given coordinates.
    pub fn standard_path(
        &self,
        channel: u32,
        plate_location: &Location,
        well_location: &Location,
    ) -> Result<Utf8PathBuf, BdsError> {
        self.check_coordinates(channel, plate_location, well_location)?;
        Ok(Self::column_path(channel, plate_location).join(self.naming.file_name(well_location)))
    }

    /// `Ok(None)` when nothing has been stored at these coordinates yet.
    pub fn try_get_standard_node_at(
        &self,
        channel: u32,
        plate_location: &Location,
        well_location: &Location,
    ) -> Result<Option<Node>, BdsError> {
        let relative = self.standard_path(channel, plate_location, well_location)?;
        self.storage.try_get_node(&standard_dir().join(&relative))
    }

    /// Places the original file `original_file_path` (relative to
    /// `data/original`) at the given coordinates.
    pub fn add_standard_node(
        &self,
        original_file_path: impl AsRef<Utf8Path>,
        channel: u32,
        plate_location: &Location,
        well_location: &Location,
    ) -> Result<StandardNode, BdsError> {
        if !self.writable {
            return Err(BdsError::ReadOnly);
        }
        let relative = self.standard_path(channel, plate_location, well_location)?;
        if self
            .try_get_standard_node_at(channel, plate_location, well_location)?
            .is_some()
        {
            return Err(BdsError::DuplicateStandardNode(relative.to_string()));
        }

        let original_file_path = original_file_path.as_ref();
        let original = original_dir().join(original_file_path);
        match self.storage.try_get_node(&original)? {
            Some(node) if !node.is_directory() => {}
            _ => return Err(BdsError::MissingOriginal(original_file_path.to_string())),
        }

        let mut dir = standard_dir();
        for segment in Self::column_path(channel, plate_location).iter() {
            dir = self.storage.make_directory(&dir, segment)?.path().clone();
        }
        let file_name = self.naming.file_name(well_location);
        let node = if self.contains_original_data() {
            self.storage.try_add_link(&dir, &file_name, &original)?
        } else {
            self.storage.try_add_node(&dir, &file_name, &original)?
        };
        debug!(
            original = %original_file_path,
            standard = %relative,
            link = node.is_link(),
            "standard node added"
        );
        Ok(StandardNode {
            node,
            relative_path: relative,
        })
    }

    /// Every standard node currently stored, sorted by path.
    pub fn standard_nodes(&self) -> Result<Vec<Node>, BdsError> {
        self.storage.walk_files(&standard_dir())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::parameter::FormatParameterFactory;

    fn fixture(contains_original_data: bool) -> (tempfile::TempDir, Storage, FormatParameters) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let mut storage = Storage::new(root);
        storage.mount().unwrap();
        storage
            .add_key_value_pair(&original_dir(), "img.tiff", "pixels")
            .unwrap();
        storage
            .make_directory(&NodePath::new(DATA_DIR), STANDARD_DIR)
            .unwrap();

        let factory = FormatParameterFactory::hcs();
        let mut parameters = FormatParameters::new();
        for (name, value) in [
            ("plate_geometry", "8x12"),
            ("well_geometry", "3x3"),
            ("number_of_channels", "2"),
            (
                "contains_original_data",
                if contains_original_data { "true" } else { "false" },
            ),
        ] {
            parameters.insert(factory.create_from_value(name, value).unwrap());
        }
        (temp, storage, parameters)
    }

    fn at(x: u32, y: u32) -> Location {
        Location::new(x, y).unwrap()
    }

    #[test]
    fn lookup_before_write_is_none() {
        let (_temp, storage, parameters) = fixture(true);
        let data =
            HcsImageFormattedData::new(&storage, Format::hcs_image_v1_0(), &parameters).unwrap();
        assert_eq!(
            data.try_get_standard_node_at(1, &at(1, 1), &at(1, 1))
                .unwrap(),
            None
        );
    }

    #[test]
    fn add_then_lookup_returns_link() {
        let (_temp, storage, parameters) = fixture(true);
        let data =
            HcsImageFormattedData::new(&storage, Format::hcs_image_v1_0(), &parameters).unwrap();
        let added = data
            .add_standard_node("img.tiff", 1, &at(1, 1), &at(1, 1))
            .unwrap();
        assert_eq!(
            added.relative_path,
            Utf8PathBuf::from("channel1/row1/column1/row1_column1.tiff")
        );
        let found = data
            .try_get_standard_node_at(1, &at(1, 1), &at(1, 1))
            .unwrap()
            .unwrap();
        assert!(found.is_link());
        assert!(found.path().ends_with("channel1/row1/column1/row1_column1.tiff"));
        assert_eq!(storage.read_bytes(found.path()).unwrap(), b"pixels");
    }

    #[test]
    fn second_add_is_duplicate() {
        let (_temp, storage, parameters) = fixture(true);
        let data =
            HcsImageFormattedData::new(&storage, Format::hcs_image_v1_0(), &parameters).unwrap();
        data.add_standard_node("img.tiff", 1, &at(2, 3), &at(1, 2))
            .unwrap();
        let err = data
            .add_standard_node("img.tiff", 1, &at(2, 3), &at(1, 2))
            .unwrap_err();
        assert_matches!(err, BdsError::DuplicateStandardNode(_));
    }

    #[test]
    fn channel_range_is_checked_first() {
        let (_temp, storage, parameters) = fixture(true);
        let data =
            HcsImageFormattedData::new(&storage, Format::hcs_image_v1_0(), &parameters).unwrap();
        for channel in [0, 3] {
            let err = data
                .add_standard_node("absent.tiff", channel, &at(1, 1), &at(1, 1))
                .unwrap_err();
            assert_matches!(err, BdsError::ChannelOutOfRange { .. });
        }
        assert!(storage
            .try_get_node(&standard_dir().join("channel0"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn locations_are_checked_against_geometries() {
        let (_temp, storage, parameters) = fixture(true);
        let data =
            HcsImageFormattedData::new(&storage, Format::hcs_image_v1_0(), &parameters).unwrap();
        assert_matches!(
            data.try_get_standard_node_at(1, &at(13, 1), &at(1, 1)),
            Err(BdsError::LocationOutOfGeometry { role: "plate", .. })
        );
        assert_matches!(
            data.try_get_standard_node_at(1, &at(1, 1), &at(1, 4)),
            Err(BdsError::LocationOutOfGeometry { role: "well", .. })
        );
    }

    #[test]
    fn missing_original_is_reported() {
        let (_temp, storage, parameters) = fixture(true);
        let data =
            HcsImageFormattedData::new(&storage, Format::hcs_image_v1_0(), &parameters).unwrap();
        let err = data
            .add_standard_node("absent.tiff", 1, &at(1, 1), &at(1, 1))
            .unwrap_err();
        assert_matches!(err, BdsError::MissingOriginal(_));
    }

    #[test]
    fn without_original_data_the_file_is_moved() {
        let (_temp, storage, parameters) = fixture(false);
        let data =
            HcsImageFormattedData::new(&storage, Format::hcs_image_v1_0(), &parameters).unwrap();
        let added = data
            .add_standard_node("img.tiff", 2, &at(1, 1), &at(3, 3))
            .unwrap();
        assert!(!added.node.is_link());
        assert_eq!(storage.read_bytes(added.node.path()).unwrap(), b"pixels");
        assert!(storage
            .try_get_node(&original_dir().join("img.tiff"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn legacy_format_uses_legacy_file_names() {
        let (_temp, storage, parameters) = fixture(true);
        let data =
            HcsImageFormattedData::new(&storage, Format::image_hcs_v1_0(), &parameters).unwrap();
        let path = data.standard_path(1, &at(2, 1), &at(3, 2)).unwrap();
        assert_eq!(path, Utf8PathBuf::from("channel1/row1/column2/row2column3.tiff"));
    }

    #[test]
    fn missing_parameters_fail_construction() {
        let (_temp, storage, _parameters) = fixture(true);
        let err = HcsImageFormattedData::new(
            &storage,
            Format::hcs_image_v1_0(),
            &FormatParameters::new(),
        )
        .unwrap_err();
        assert_matches!(err, BdsError::MissingParameters(_));
    }
}
