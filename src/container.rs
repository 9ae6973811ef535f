//! Version 1.0 of the BDS container: a directory with `data/` holding the
//! original and standardized files and `metadata/` describing them.
//!
//! Life cycle: [`DataStructure::create`] yields an open read-write container;
//! [`DataStructure::close`] validates it, writes checksums and the reference
//! mapping, and unmounts it. [`DataStructure::open`] mounts an existing
//! container read-write or read-only.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::checksum::{self, Checksum, ChecksumReport};
use crate::error::BdsError;
use crate::format::{Format, FormatKind, FormatReference, FormatRegistry, Version};
use crate::hcs::{self, DATA_DIR, HcsImageFormattedData, ORIGINAL_DIR, STANDARD_DIR};
use crate::metadata::{
    self, ExperimentIdentifier, Person, Reference, STANDARD_ORIGINAL_MAPPING, Sample,
};
use crate::parameter::{FormatParameter, FormatParameters};
use crate::storage::{NodePath, Storage};

pub const METADATA_DIR: &str = "metadata";
pub const PARAMETERS_DIR: &str = "parameters";
pub const FORMAT_DIR: &str = "format";
pub const CHECKSUM_DIR: &str = "md5sum";

/// Version written by and readable with this implementation.
pub const VERSION: Version = Version::new(1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadWrite,
    ReadOnly,
}

pub fn metadata_dir() -> NodePath {
    NodePath::new(METADATA_DIR)
}

pub fn parameters_dir() -> NodePath {
    metadata_dir().join(PARAMETERS_DIR)
}

fn format_dir() -> NodePath {
    metadata_dir().join(FORMAT_DIR)
}

fn checksum_dir() -> NodePath {
    metadata_dir().join(CHECKSUM_DIR)
}

/// Formatted view of a container, depending on how its format resolved.
#[derive(Debug, Clone)]
pub enum FormattedData<'s> {
    HcsImage(HcsImageFormattedData<'s>),
    Generic(GenericFormattedData),
}

impl FormattedData<'_> {
    pub fn format(&self) -> &Format {
        match self {
            FormattedData::HcsImage(data) => data.format(),
            FormattedData::Generic(data) => &data.format,
        }
    }
}

/// Formatted data of a format without typed support: raw parameters only.
#[derive(Debug, Clone)]
pub struct GenericFormattedData {
    format: Format,
    stored_format: Option<FormatReference>,
    parameters: FormatParameters,
}

impl GenericFormattedData {
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// The format as written in the container, which may name a code the
    /// registry does not know.
    pub fn stored_format(&self) -> Option<&FormatReference> {
        self.stored_format.as_ref()
    }

    pub fn parameters(&self) -> &FormatParameters {
        &self.parameters
    }
}

#[derive(Debug)]
pub struct DataStructure {
    storage: Storage,
    registry: FormatRegistry,
    mode: Option<Mode>,
    references: BTreeMap<Utf8PathBuf, Reference>,
}

impl DataStructure {
    /// Creates the empty skeleton at `root` and opens it read-write. The
    /// directory may exist but must not already hold a container.
    pub fn create(root: impl Into<Utf8PathBuf>, registry: FormatRegistry) -> Result<Self, BdsError> {
        let root = root.into();
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| BdsError::Storage(format!("create {root}: {err}")))?;
        let mut storage = Storage::new(root);
        storage.mount()?;
        if Version::try_load_from(&storage, &metadata_dir())?.is_some() {
            return Err(BdsError::DataStructure(format!(
                "a data structure already exists at {}",
                storage.root()
            )));
        }
        let data = storage.make_directory(&NodePath::root(), DATA_DIR)?;
        storage.make_directory(data.path(), ORIGINAL_DIR)?;
        storage.make_directory(data.path(), STANDARD_DIR)?;
        let metadata = storage.make_directory(&NodePath::root(), METADATA_DIR)?;
        storage.make_directory(metadata.path(), PARAMETERS_DIR)?;
        VERSION.save_to(&storage, metadata.path())?;
        info!(root = %storage.root(), version = %VERSION, "data structure created");
        Ok(Self {
            storage,
            registry,
            mode: Some(Mode::ReadWrite),
            references: BTreeMap::new(),
        })
    }

    /// Mounts an existing container. Its version must share the major
    /// version of [`VERSION`]; the format is only resolved when needed.
    pub fn open(
        root: impl Into<Utf8PathBuf>,
        mode: Mode,
        registry: FormatRegistry,
    ) -> Result<Self, BdsError> {
        let mut storage = Storage::new(root);
        storage.mount()?;
        let version = Version::try_load_from(&storage, &metadata_dir())?.ok_or_else(|| {
            BdsError::DataStructure(format!(
                "no version marker found in {}",
                storage.root()
            ))
        })?;
        if !version.is_backward_compatible_with(&VERSION) {
            storage.unmount();
            return Err(BdsError::IncompatibleVersion {
                found: version.to_string(),
                expected: format!("{}.x", VERSION.major()),
            });
        }
        let references = match storage.try_get_value(&metadata_dir(), STANDARD_ORIGINAL_MAPPING)? {
            Some(content) => metadata::parse_mapping(&content)?
                .into_iter()
                .map(|reference| (reference.standard_path().clone(), reference))
                .collect(),
            None => BTreeMap::new(),
        };
        info!(root = %storage.root(), %version, ?mode, "data structure opened");
        Ok(Self {
            storage,
            registry,
            mode: Some(mode),
            references,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        self.storage.root()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    fn assert_open(&self) -> Result<Mode, BdsError> {
        self.mode.ok_or(BdsError::NotOpen)
    }

    fn assert_writable(&self) -> Result<(), BdsError> {
        match self.assert_open()? {
            Mode::ReadWrite => Ok(()),
            Mode::ReadOnly => Err(BdsError::ReadOnly),
        }
    }

    /// The mounted storage; fails once the container is closed.
    pub fn storage(&self) -> Result<&Storage, BdsError> {
        self.assert_open()?;
        Ok(&self.storage)
    }

    pub fn version(&self) -> Result<Version, BdsError> {
        Version::try_load_from(self.storage()?, &metadata_dir())?
            .ok_or_else(|| BdsError::DataStructure("no version marker".to_string()))
    }

    pub fn original_dir(&self) -> NodePath {
        hcs::original_dir()
    }

    pub fn standard_dir(&self) -> NodePath {
        hcs::standard_dir()
    }

    /// Copies a file or directory from outside into `data/original`.
    pub fn add_original(&mut self, source: &Utf8Path) -> Result<(), BdsError> {
        self.assert_writable()?;
        let imported = self.storage.import(source, &hcs::original_dir())?;
        debug!(%source, files = imported.len(), "original data added");
        Ok(())
    }

    pub fn set_format(&mut self, format: &Format) -> Result<(), BdsError> {
        self.assert_writable()?;
        format.reference().save_to(&self.storage, &format_dir())
    }

    pub fn format_reference(&self) -> Result<Option<FormatReference>, BdsError> {
        FormatReference::try_load_from(self.storage()?, &format_dir())
    }

    /// Resolves the stored format. An unknown code yields the generic
    /// unknown format; an unknown version of a known code is an error.
    pub fn format(&self) -> Result<Format, BdsError> {
        let reference = self
            .format_reference()?
            .ok_or_else(|| BdsError::MissingMetadata("Unspecified format.".to_string()))?;
        self.registry.resolve(&reference)
    }

    pub fn add_format_parameter(&mut self, parameter: &FormatParameter) -> Result<(), BdsError> {
        self.assert_writable()?;
        parameter.save_to(&self.storage, &parameters_dir())
    }

    /// Parameters typed through the factory of the stored format.
    pub fn format_parameters(&self) -> Result<FormatParameters, BdsError> {
        let format = self.format()?;
        FormatParameters::load_from(self.storage()?, &parameters_dir(), format.parameter_factory())
    }

    pub fn set_experiment_identifier(
        &mut self,
        identifier: &ExperimentIdentifier,
    ) -> Result<(), BdsError> {
        self.assert_writable()?;
        identifier.save_to(&self.storage, &metadata_dir())
    }

    pub fn experiment_identifier(&self) -> Result<Option<ExperimentIdentifier>, BdsError> {
        ExperimentIdentifier::try_load_from(self.storage()?, &metadata_dir())
    }

    pub fn set_experiment_registrator(&mut self, registrator: &Person) -> Result<(), BdsError> {
        self.assert_writable()?;
        registrator.save_to(&self.storage, &metadata_dir())
    }

    pub fn experiment_registrator(&self) -> Result<Option<Person>, BdsError> {
        Person::try_load_from(self.storage()?, &metadata_dir())
    }

    pub fn set_experiment_registration_timestamp(
        &mut self,
        timestamp: &DateTime<Utc>,
    ) -> Result<(), BdsError> {
        self.assert_writable()?;
        metadata::save_timestamp(&self.storage, &metadata_dir(), timestamp)
    }

    pub fn experiment_registration_timestamp(&self) -> Result<Option<DateTime<Utc>>, BdsError> {
        metadata::try_load_timestamp(self.storage()?, &metadata_dir())
    }

    pub fn set_sample(&mut self, sample: &Sample) -> Result<(), BdsError> {
        self.assert_writable()?;
        sample.save_to(&self.storage, &metadata_dir())
    }

    pub fn sample(&self) -> Result<Option<Sample>, BdsError> {
        Sample::try_load_from(self.storage()?, &metadata_dir())
    }

    pub fn add_reference(&mut self, reference: Reference) -> Result<(), BdsError> {
        self.assert_writable()?;
        let key = reference.standard_path().clone();
        if self.references.contains_key(&key) {
            return Err(BdsError::DuplicateReference(key.to_string()));
        }
        self.references.insert(key, reference);
        Ok(())
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.references.values()
    }

    pub fn formatted_data(&self) -> Result<FormattedData<'_>, BdsError> {
        let format = self.format()?;
        let parameters = self.format_parameters()?;
        match format.kind() {
            FormatKind::HcsImage(_) => {
                let data = HcsImageFormattedData::new(self.storage()?, format, &parameters)?;
                Ok(FormattedData::HcsImage(match self.assert_open()? {
                    Mode::ReadWrite => data,
                    Mode::ReadOnly => data.into_read_only(),
                }))
            }
            FormatKind::Unknown => {
                format.assert_valid_parameters(&parameters)?;
                Ok(FormattedData::Generic(GenericFormattedData {
                    format,
                    stored_format: self.format_reference()?,
                    parameters,
                }))
            }
        }
    }

    pub fn hcs_formatted_data(&self) -> Result<HcsImageFormattedData<'_>, BdsError> {
        match self.formatted_data()? {
            FormattedData::HcsImage(data) => Ok(data),
            FormattedData::Generic(data) => Err(BdsError::DataStructure(format!(
                "format {} does not describe HCS image data",
                data.stored_format
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| data.format.to_string())
            ))),
        }
    }

    /// Checksums recorded when the container was last closed.
    pub fn checksums(&self) -> Result<Vec<Checksum>, BdsError> {
        match self.storage()?.try_get_value(&checksum_dir(), ORIGINAL_DIR)? {
            Some(content) => checksum::parse_checksums(&content),
            None => Ok(Vec::new()),
        }
    }

    pub fn verify_checksums(&self) -> Result<ChecksumReport, BdsError> {
        let expected = self.checksums()?;
        let actual = checksum::compute(self.storage()?, &hcs::original_dir())?;
        Ok(checksum::compare(&expected, &actual))
    }

    fn assert_valid(&self) -> Result<(), BdsError> {
        if self.format_reference()?.is_none() {
            return Err(BdsError::MissingMetadata("Unspecified format.".to_string()));
        }
        if self.experiment_identifier()?.is_none() {
            return Err(BdsError::MissingMetadata(
                "Unspecified experiment identifier.".to_string(),
            ));
        }
        if self.experiment_registrator()?.is_none() {
            return Err(BdsError::MissingMetadata(
                "Unspecified experiment registrator.".to_string(),
            ));
        }
        if self.experiment_registration_timestamp()?.is_none() {
            return Err(BdsError::MissingMetadata(
                "Unspecified experiment registration timestamp.".to_string(),
            ));
        }
        if self.sample()?.is_none() {
            return Err(BdsError::MissingMetadata("Unspecified sample.".to_string()));
        }
        self.formatted_data()?;
        for reference in self.references.values() {
            let standard = hcs::standard_dir().join(reference.standard_path());
            let Some(node) = self.storage.try_get_node(&standard)? else {
                return Err(BdsError::DataStructure(format!(
                    "referenced standard node does not exist: {}",
                    reference.standard_path()
                )));
            };
            // A moved original no longer exists; a link must still resolve.
            let original = hcs::original_dir().join(reference.original_path());
            if node.is_link() && self.storage.try_get_node(&original)?.is_none() {
                return Err(BdsError::DataStructure(format!(
                    "referenced original node does not exist: {}",
                    reference.original_path()
                )));
            }
        }
        Ok(())
    }

    /// Read-write: validates, persists the reference mapping and the
    /// checksums of `data/original`, then unmounts. Read-only: unmounts.
    /// A failed validation leaves the container open.
    pub fn close(&mut self) -> Result<(), BdsError> {
        if self.assert_open()? == Mode::ReadWrite {
            self.assert_valid()?;
            self.storage.add_key_value_pair(
                &metadata_dir(),
                STANDARD_ORIGINAL_MAPPING,
                &metadata::format_mapping(self.references.values()),
            )?;
            let checksums = checksum::compute(&self.storage, &hcs::original_dir())?;
            self.storage.add_key_value_pair(
                &checksum_dir(),
                ORIGINAL_DIR,
                &checksum::format_checksums(&checksums),
            )?;
            debug!(files = checksums.len(), "checksums written");
        }
        self.storage.unmount();
        self.mode = None;
        info!(root = %self.storage.root(), "data structure closed");
        Ok(())
    }
}
