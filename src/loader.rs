use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::container::{DataStructure, Mode};
use crate::error::BdsError;
use crate::format::{Format, FormatRegistry};
use crate::hcs::{HcsImageFormattedData, HcsParameters};

/// Opens containers stored below a common base directory.
#[derive(Debug, Clone)]
pub struct DataStructureLoader {
    base_dir: Utf8PathBuf,
    registry: FormatRegistry,
}

impl DataStructureLoader {
    pub fn new(base_dir: impl Into<Utf8PathBuf>, registry: FormatRegistry) -> Self {
        Self {
            base_dir: base_dir.into(),
            registry,
        }
    }

    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Opens `base_dir/name` read-only.
    pub fn load(&self, name: &str) -> Result<DataStructure, BdsError> {
        let root = self.base_dir.join(name);
        debug!(%root, "loading data structure");
        DataStructure::open(root, Mode::ReadOnly, self.registry.clone())
    }
}

/// A closed HCS container opened read-only together with its validated
/// parameters. Must be [`close`](HcsDatasetLoader::close)d to release the
/// mount.
#[derive(Debug)]
pub struct HcsDatasetLoader {
    structure: DataStructure,
    format: Format,
    parameters: HcsParameters,
}

impl HcsDatasetLoader {
    pub fn new(root: impl Into<Utf8PathBuf>, registry: FormatRegistry) -> Result<Self, BdsError> {
        let mut structure = DataStructure::open(root, Mode::ReadOnly, registry)?;
        match Self::validate(&structure) {
            Ok((format, parameters)) => Ok(Self {
                structure,
                format,
                parameters,
            }),
            Err(err) => {
                structure.close()?;
                Err(err)
            }
        }
    }

    fn validate(structure: &DataStructure) -> Result<(Format, HcsParameters), BdsError> {
        let data = structure.hcs_formatted_data()?;
        Ok((data.format().clone(), data.parameters().clone()))
    }

    pub fn structure(&self) -> &DataStructure {
        &self.structure
    }

    pub fn formatted_data(&self) -> Result<HcsImageFormattedData<'_>, BdsError> {
        HcsImageFormattedData::from_validated(
            self.structure.storage()?,
            self.format.clone(),
            self.parameters.clone(),
        )
        .map(HcsImageFormattedData::into_read_only)
    }

    pub fn close(mut self) -> Result<(), BdsError> {
        self.structure.close()
    }
}
