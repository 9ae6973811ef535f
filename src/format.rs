use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::channel::NUMBER_OF_CHANNELS;
use crate::error::BdsError;
use crate::geometry::Location;
use crate::parameter::{
    CONTAINS_ORIGINAL_DATA, DEVICE_ID, FormatParameterFactory, FormatParameters, PLATE_GEOMETRY,
    WELL_GEOMETRY,
};
use crate::storage::{NodePath, Storage};

pub const MAJOR: &str = "major";
pub const MINOR: &str = "minor";
pub const CODE: &str = "code";
pub const VERSION: &str = "version";

pub const HCS_IMAGE: &str = "HCS_IMAGE";
pub const IMAGE_HCS: &str = "IMAGE_HCS";
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Versions sharing a major number can read each other's containers.
    pub fn is_backward_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        let node = storage.make_directory(dir, VERSION)?;
        storage.add_key_value_pair(node.path(), MAJOR, &self.major.to_string())?;
        storage.add_key_value_pair(node.path(), MINOR, &self.minor.to_string())?;
        Ok(())
    }

    /// Reads `dir/version/{major,minor}`; `None` when there is no version.
    pub fn try_load_from(storage: &Storage, dir: &NodePath) -> Result<Option<Self>, BdsError> {
        let version_dir = dir.join(VERSION);
        let Some(major) = storage.try_get_value(&version_dir, MAJOR)? else {
            return Ok(None);
        };
        let minor = storage.get_value(&version_dir, MINOR)?;
        let parse = |value: &str| {
            value.trim().parse::<u32>().map_err(|_| {
                BdsError::DataStructure(format!("invalid version number in {version_dir}: {value}"))
            })
        };
        Ok(Some(Self::new(parse(&major)?, parse(&minor)?)))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = BdsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || BdsError::IllegalArgument(format!("invalid version: {value}"));
        let (major, minor) = value.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self::new(
            major.parse().map_err(|_| invalid())?,
            minor.parse().map_err(|_| invalid())?,
        ))
    }
}

/// The `(code, version)` pair stored in a container, before it is resolved
/// against a [`FormatRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FormatReference {
    code: String,
    version: Version,
}

impl FormatReference {
    pub fn new(code: impl Into<String>, version: Version) -> Self {
        Self {
            code: code.into(),
            version,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        storage.add_key_value_pair(dir, CODE, &self.code)?;
        self.version.save_to(storage, dir)
    }

    pub fn try_load_from(storage: &Storage, dir: &NodePath) -> Result<Option<Self>, BdsError> {
        let Some(code) = storage.try_get_value(dir, CODE)? else {
            return Ok(None);
        };
        let version = Version::try_load_from(storage, dir)?
            .ok_or_else(|| BdsError::DataStructure(format!("format {code} has no version")))?;
        Ok(Some(Self::new(code, version)))
    }
}

impl fmt::Display for FormatReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} V{}", self.code, self.version)
    }
}

/// File name of a well (tile) node inside a standard column directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellFileNaming {
    /// `row{Y}_column{X}.tiff`
    Underscored,
    /// `row{Y}column{X}.tiff`
    Legacy,
}

impl WellFileNaming {
    pub fn file_name(&self, well: &Location) -> String {
        match self {
            WellFileNaming::Underscored => format!("row{}_column{}.tiff", well.y(), well.x()),
            WellFileNaming::Legacy => format!("row{}column{}.tiff", well.y(), well.x()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    HcsImage(WellFileNaming),
    Unknown,
}

/// A versioned schema: which parameters a container must and may carry, and
/// how to type them.
#[derive(Debug, Clone)]
pub struct Format {
    reference: FormatReference,
    mandatory: Vec<String>,
    optional: Vec<String>,
    kind: FormatKind,
    factory: FormatParameterFactory,
}

impl Format {
    pub fn new(
        reference: FormatReference,
        mandatory: Vec<String>,
        optional: Vec<String>,
        kind: FormatKind,
        factory: FormatParameterFactory,
    ) -> Self {
        Self {
            reference,
            mandatory,
            optional,
            kind,
            factory,
        }
    }

    pub fn hcs_image_v1_0() -> Self {
        Self::hcs(HCS_IMAGE, WellFileNaming::Underscored)
    }

    pub fn image_hcs_v1_0() -> Self {
        Self::hcs(IMAGE_HCS, WellFileNaming::Legacy)
    }

    fn hcs(code: &str, naming: WellFileNaming) -> Self {
        Self::new(
            FormatReference::new(code, Version::new(1, 0)),
            [
                PLATE_GEOMETRY,
                WELL_GEOMETRY,
                NUMBER_OF_CHANNELS,
                CONTAINS_ORIGINAL_DATA,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            vec![DEVICE_ID.to_string()],
            FormatKind::HcsImage(naming),
            FormatParameterFactory::hcs(),
        )
    }

    /// Stand-in for codes the registry does not know: nothing is mandatory
    /// and every parameter stays raw text.
    pub fn unknown(version: Version) -> Self {
        Self::unregistered(FormatReference::new(UNKNOWN, version))
    }

    /// A format declared under a code the registry does not know. Written
    /// containers keep the declared code; reading them back yields
    /// [`Format::unknown`].
    pub fn unregistered(reference: FormatReference) -> Self {
        Self::new(
            reference,
            Vec::new(),
            Vec::new(),
            FormatKind::Unknown,
            FormatParameterFactory::generic(),
        )
    }

    pub fn reference(&self) -> &FormatReference {
        &self.reference
    }

    pub fn code(&self) -> &str {
        self.reference.code()
    }

    pub fn version(&self) -> Version {
        self.reference.version()
    }

    pub fn mandatory_parameters(&self) -> &[String] {
        &self.mandatory
    }

    pub fn optional_parameters(&self) -> &[String] {
        &self.optional
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == FormatKind::Unknown
    }

    pub fn parameter_factory(&self) -> &FormatParameterFactory {
        &self.factory
    }

    pub fn missing_parameters(&self, parameters: &FormatParameters) -> Vec<String> {
        self.mandatory
            .iter()
            .filter(|name| !parameters.contains(name))
            .cloned()
            .collect()
    }

    /// Fails naming every mandatory parameter that is absent.
    pub fn assert_valid_parameters(&self, parameters: &FormatParameters) -> Result<(), BdsError> {
        let missing = self.missing_parameters(parameters);
        if missing.is_empty() {
            return Ok(());
        }
        Err(BdsError::MissingParameters(format!(
            "{} (format {})",
            missing.join(", "),
            self.reference
        )))
    }
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for Format {}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}

/// Known formats by code and version.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: HashMap<String, Vec<Format>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Format::hcs_image_v1_0());
        registry.register(Format::image_hcs_v1_0());
        registry
    }

    pub fn register(&mut self, format: Format) {
        let versions = self.formats.entry(format.code().to_string()).or_default();
        versions.retain(|known| known.version() != format.version());
        versions.push(format);
    }

    pub fn is_known_code(&self, code: &str) -> bool {
        self.formats.contains_key(code)
    }

    /// Unknown codes resolve to [`Format::unknown`]; a known code with an
    /// unregistered version is an error.
    pub fn resolve(&self, reference: &FormatReference) -> Result<Format, BdsError> {
        let Some(versions) = self.formats.get(reference.code()) else {
            return Ok(Format::unknown(reference.version()));
        };
        versions
            .iter()
            .find(|format| format.version() == reference.version())
            .cloned()
            .ok_or_else(|| BdsError::UnknownFormatVersion {
                code: reference.code().to_string(),
                version: reference.version().to_string(),
            })
    }

    pub fn resolve_code(&self, code: &str, version: Option<Version>) -> Result<Format, BdsError> {
        let version = version.unwrap_or(Version::new(1, 0));
        self.resolve(&FormatReference::new(code, version))
    }

    /// Like [`resolve_code`](Self::resolve_code), but an unknown code keeps
    /// its name so that it can be written to a new container.
    pub fn declare(&self, code: &str, version: Option<Version>) -> Result<Format, BdsError> {
        let version = version.unwrap_or(Version::new(1, 0));
        if !self.is_known_code(code) {
            return Ok(Format::unregistered(FormatReference::new(code, version)));
        }
        self.resolve(&FormatReference::new(code, version))
    }
}
