use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::channel::{ChannelList, NUMBER_OF_CHANNELS};
use crate::error::BdsError;
use crate::geometry::{Geometry, NamedGeometry, PlateGeometry, WellGeometry};
use crate::storage::{Node, NodeKind, NodePath, Storage};

pub const PLATE_GEOMETRY: &str = PlateGeometry::DIRECTORY;
pub const WELL_GEOMETRY: &str = WellGeometry::DIRECTORY;
pub const CONTAINS_ORIGINAL_DATA: &str = "contains_original_data";
pub const DEVICE_ID: &str = "device_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    PlateGeometry(PlateGeometry),
    WellGeometry(WellGeometry),
    Channels(ChannelList),
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatParameter {
    name: String,
    value: ParameterValue,
}

impl FormatParameter {
    pub fn new(name: impl Into<String>, value: ParameterValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        match &self.value {
            ParameterValue::PlateGeometry(geometry) => {
                geometry.geometry().save_to(storage, dir, &self.name)
            }
            ParameterValue::WellGeometry(geometry) => {
                geometry.geometry().save_to(storage, dir, &self.name)
            }
            ParameterValue::Channels(channels) => channels.save_to(storage, dir),
            ParameterValue::Flag(flag) => storage
                .add_key_value_pair(dir, &self.name, &flag.to_string())
                .map(|_| ()),
            ParameterValue::Text(text) => storage
                .add_key_value_pair(dir, &self.name, text)
                .map(|_| ()),
        }
    }
}

/// Typed view over the parameters of one data structure, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatParameters {
    parameters: BTreeMap<String, FormatParameter>,
}

impl FormatParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, parameter: FormatParameter) {
        self.parameters.insert(parameter.name.clone(), parameter);
    }

    pub fn get(&self, name: &str) -> Option<&FormatParameter> {
        self.parameters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatParameter> {
        self.parameters.values()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn plate_geometry(&self) -> Option<&PlateGeometry> {
        match self.get(PLATE_GEOMETRY).map(FormatParameter::value) {
            Some(ParameterValue::PlateGeometry(geometry)) => Some(geometry),
            _ => None,
        }
    }

    pub fn well_geometry(&self) -> Option<&WellGeometry> {
        match self.get(WELL_GEOMETRY).map(FormatParameter::value) {
            Some(ParameterValue::WellGeometry(geometry)) => Some(geometry),
            _ => None,
        }
    }

    pub fn channels(&self) -> Option<&ChannelList> {
        match self.get(NUMBER_OF_CHANNELS).map(FormatParameter::value) {
            Some(ParameterValue::Channels(channels)) => Some(channels),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name).map(FormatParameter::value) {
            Some(ParameterValue::Flag(flag)) => Some(*flag),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name).map(FormatParameter::value) {
            Some(ParameterValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Reads every parameter stored directly below `dir`. Children the
    /// factory does not recognise as parameters are skipped.
    pub fn load_from(
        storage: &Storage,
        dir: &NodePath,
        factory: &FormatParameterFactory,
    ) -> Result<Self, BdsError> {
        let mut parameters = Self::new();
        for node in storage.children(dir)? {
            let raw = RawParameter::Stored {
                storage,
                node: &node,
            };
            if let Some(parameter) = factory.create(node.name(), raw)? {
                parameters.insert(parameter);
            }
        }
        debug!(%dir, count = parameters.len(), "format parameters loaded");
        Ok(parameters)
    }
}

/// Input handed to a parameter parser: either a bare textual value (from a
/// config file or command line) or a node already present in storage.
#[derive(Debug, Clone, Copy)]
pub enum RawParameter<'a> {
    Value(&'a str),
    Stored { storage: &'a Storage, node: &'a Node },
}

impl RawParameter<'_> {
    /// Textual content: the value itself, or the content of a stored file.
    fn text(&self) -> Result<Option<String>, BdsError> {
        match self {
            RawParameter::Value(value) => Ok(Some(value.to_string())),
            RawParameter::Stored { storage, node } => match node.kind() {
                NodeKind::Directory => Ok(None),
                NodeKind::File | NodeKind::Link => {
                    let Some(parent) = node.path().parent() else {
                        return Ok(None);
                    };
                    storage.try_get_value(&parent, node.name())
                }
            },
        }
    }
}

pub type ParameterParser =
    fn(name: &str, raw: RawParameter<'_>) -> Result<Option<ParameterValue>, BdsError>;

/// Name → parser table turning raw parameters into typed values. Names
/// without a registered parser become plain text parameters.
#[derive(Clone, Default)]
pub struct FormatParameterFactory {
    parsers: HashMap<String, ParameterParser>,
}

impl std::fmt::Debug for FormatParameterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.parsers.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("FormatParameterFactory")
            .field("parsers", &names)
            .finish()
    }
}

impl FormatParameterFactory {
    pub fn generic() -> Self {
        Self::default()
    }

    pub fn hcs() -> Self {
        let mut factory = Self::generic();
        factory
            .register(PLATE_GEOMETRY, parse_plate_geometry)
            .register(WELL_GEOMETRY, parse_well_geometry)
            .register(NUMBER_OF_CHANNELS, parse_channels)
            .register(CONTAINS_ORIGINAL_DATA, parse_flag);
        factory
    }

    pub fn register(&mut self, name: impl Into<String>, parser: ParameterParser) -> &mut Self {
        self.parsers.insert(name.into(), parser);
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.parsers.contains_key(name)
    }

    pub fn create(
        &self,
        name: &str,
        raw: RawParameter<'_>,
    ) -> Result<Option<FormatParameter>, BdsError> {
        let value = match self.parsers.get(name) {
            Some(parser) => parser(name, raw)?,
            None => raw.text()?.map(ParameterValue::Text),
        };
        Ok(value.map(|value| FormatParameter::new(name, value)))
    }

    pub fn create_from_value(&self, name: &str, value: &str) -> Result<FormatParameter, BdsError> {
        self.create(name, RawParameter::Value(value))?
            .ok_or_else(|| BdsError::InvalidParameter {
                name: name.to_string(),
                value: value.to_string(),
            })
    }
}

fn parse_geometry(name: &str, raw: RawParameter<'_>) -> Result<Option<Geometry>, BdsError> {
    if let RawParameter::Stored { storage, node } = raw {
        if node.is_directory() {
            return Geometry::load_from(storage, node.path()).map(Some);
        }
    }
    let Some(text) = raw.text()? else {
        return Ok(None);
    };
    Geometry::parse(&text)
        .map(Some)
        .ok_or_else(|| BdsError::InvalidParameter {
            name: name.to_string(),
            value: text,
        })
}

fn parse_plate_geometry(
    name: &str,
    raw: RawParameter<'_>,
) -> Result<Option<ParameterValue>, BdsError> {
    Ok(parse_geometry(name, raw)?
        .map(|geometry| ParameterValue::PlateGeometry(PlateGeometry::from_geometry(geometry))))
}

fn parse_well_geometry(
    name: &str,
    raw: RawParameter<'_>,
) -> Result<Option<ParameterValue>, BdsError> {
    Ok(parse_geometry(name, raw)?
        .map(|geometry| ParameterValue::WellGeometry(WellGeometry::from_geometry(geometry))))
}

/// The stored count must agree with the `channel{N}` siblings when there
/// are any; otherwise placeholder channels are synthesized from the count.
fn parse_channels(name: &str, raw: RawParameter<'_>) -> Result<Option<ParameterValue>, BdsError> {
    let Some(text) = raw.text()? else {
        return Ok(None);
    };
    let counted = ChannelList::create_from_string(&text)?;
    let RawParameter::Stored { storage, node } = raw else {
        return Ok(Some(ParameterValue::Channels(counted)));
    };
    let Some(dir) = node.path().parent() else {
        return Ok(Some(ParameterValue::Channels(counted)));
    };
    if !ChannelList::has_stored_channels(storage, &dir)? {
        return Ok(Some(ParameterValue::Channels(counted)));
    }
    let stored = ChannelList::load_from(storage, &dir)?;
    if stored.channel_count() != counted.channel_count() {
        return Err(BdsError::DataStructure(format!(
            "{name} is {} but {} channel directories are stored in {dir}",
            counted.channel_count(),
            stored.channel_count()
        )));
    }
    Ok(Some(ParameterValue::Channels(stored)))
}

fn parse_flag(name: &str, raw: RawParameter<'_>) -> Result<Option<ParameterValue>, BdsError> {
    let Some(text) = raw.text()? else {
        return Ok(None);
    };
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(Some(ParameterValue::Flag(true))),
        "false" => Ok(Some(ParameterValue::Flag(false))),
        _ => Err(BdsError::InvalidParameter {
            name: name.to_string(),
            value: text,
        }),
    }
}
