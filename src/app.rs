use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checksum::ChecksumReport;
use crate::config::ResolvedConfig;
use crate::container::{DataStructure, Mode, parameters_dir};
use crate::error::BdsError;
use crate::format::{FormatReference, FormatRegistry, Version};
use crate::geometry::Location;
use crate::import::{ImportReport, import_standard_nodes};
use crate::loader::HcsDatasetLoader;
use crate::metadata::{Person, Sample};
use crate::parameter::{FormatParameterFactory, FormatParameters};

#[derive(Debug, Clone, Serialize)]
pub struct CreateResult {
    pub root: Utf8PathBuf,
    pub format: String,
    pub original_files: usize,
    pub import: Option<ImportReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub root: Utf8PathBuf,
    pub version: Version,
    pub format: Option<FormatReference>,
    pub known_format: bool,
    pub parameters: FormatParameters,
    pub experiment: Option<String>,
    pub registrator: Option<Person>,
    pub registration_timestamp: Option<DateTime<Utc>>,
    pub sample: Option<Sample>,
    pub standard_nodes: usize,
    pub references: usize,
    pub checksummed_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub root: Utf8PathBuf,
    pub ok: bool,
    pub report: ChecksumReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocateResult {
    pub channel: u32,
    pub plate_location: Location,
    pub well_location: Location,
    pub standard_path: Utf8PathBuf,
    pub found: bool,
    pub link: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct App {
    registry: FormatRegistry,
}

impl App {
    pub fn new(registry: FormatRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Creates, populates and closes a container described by `config`.
    pub fn create_container(
        &self,
        root: &Utf8Path,
        config: &ResolvedConfig,
        originals: Option<&Utf8Path>,
        sink: &dyn ProgressSink,
    ) -> Result<CreateResult, BdsError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Create; root={root}"),
            elapsed: None,
        });

        let mut structure = DataStructure::create(root, self.registry.clone())?;
        structure.set_format(&config.format)?;
        for parameter in config.parameters.iter() {
            structure.add_format_parameter(parameter)?;
        }
        structure.set_experiment_identifier(&config.experiment)?;
        structure.set_experiment_registrator(&config.registrator)?;
        let timestamp = config.registration_timestamp.unwrap_or_else(Utc::now);
        structure.set_experiment_registration_timestamp(&timestamp)?;
        structure.set_sample(&config.sample)?;

        if let Some(originals) = originals {
            sink.event(ProgressEvent {
                message: format!("phase=Originals; copying {originals}"),
                elapsed: Some(started.elapsed()),
            });
            structure.add_original(originals)?;
        }
        let original_files = structure
            .storage()?
            .walk_files(&structure.original_dir())?
            .len();

        let import = match &config.import {
            Some(extractor) => Some(import_standard_nodes(&mut structure, extractor, sink)?),
            None => None,
        };

        sink.event(ProgressEvent {
            message: "phase=Close; validating and writing checksums".to_string(),
            elapsed: Some(started.elapsed()),
        });
        structure.close()?;
        sink.event(ProgressEvent {
            message: "phase=Done".to_string(),
            elapsed: Some(started.elapsed()),
        });

        Ok(CreateResult {
            root: root.to_path_buf(),
            format: config.format.to_string(),
            original_files,
            import,
        })
    }

    pub fn info(&self, root: &Utf8Path, sink: &dyn ProgressSink) -> Result<InfoResult, BdsError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; opening {root}"),
            elapsed: None,
        });
        let mut structure = DataStructure::open(root, Mode::ReadOnly, self.registry.clone())?;
        let result = Self::describe(&structure);
        structure.close()?;
        result
    }

    fn describe(structure: &DataStructure) -> Result<InfoResult, BdsError> {
        let format = structure.format_reference()?;
        let known_format = format
            .as_ref()
            .is_some_and(|reference| structure.registry().is_known_code(reference.code()));
        let parameters = match structure.format_parameters() {
            Ok(parameters) => parameters,
            Err(BdsError::MissingMetadata(_) | BdsError::UnknownFormatVersion { .. }) => {
                FormatParameters::load_from(
                    structure.storage()?,
                    &parameters_dir(),
                    &FormatParameterFactory::generic(),
                )?
            }
            Err(err) => return Err(err),
        };
        let storage = structure.storage()?;
        Ok(InfoResult {
            root: structure.root().to_path_buf(),
            version: structure.version()?,
            format,
            known_format,
            parameters,
            experiment: structure
                .experiment_identifier()?
                .map(|identifier| identifier.to_string()),
            registrator: structure.experiment_registrator()?,
            registration_timestamp: structure.experiment_registration_timestamp()?,
            sample: structure.sample()?,
            standard_nodes: storage.walk_files(&structure.standard_dir())?.len(),
            references: structure.references().count(),
            checksummed_files: structure.checksums()?.len(),
        })
    }

    pub fn verify(
        &self,
        root: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<VerifyResult, BdsError> {
        let started = Instant::now();
        let mut structure = DataStructure::open(root, Mode::ReadOnly, self.registry.clone())?;
        let report = structure.verify_checksums();
        structure.close()?;
        let report = report?;
        sink.event(ProgressEvent {
            message: format!("phase=Verify; checked={}", report.checked),
            elapsed: Some(started.elapsed()),
        });
        Ok(VerifyResult {
            root: root.to_path_buf(),
            ok: report.is_ok(),
            report,
        })
    }

    /// Resolves `plate` (matrix coordinate such as `B3`) and the linear
    /// `well_position` to the standard node of `channel`.
    pub fn locate(
        &self,
        root: &Utf8Path,
        channel: u32,
        plate: &str,
        well_position: u32,
    ) -> Result<LocateResult, BdsError> {
        let plate_location = Location::from_matrix_coordinate(plate).ok_or_else(|| {
            BdsError::IllegalArgument(format!("invalid plate coordinate: {plate}"))
        })?;
        let loader = HcsDatasetLoader::new(root, self.registry.clone())?;
        let result = Self::resolve(&loader, channel, plate_location, well_position);
        loader.close()?;
        result
    }

    fn resolve(
        loader: &HcsDatasetLoader,
        channel: u32,
        plate_location: Location,
        well_position: u32,
    ) -> Result<LocateResult, BdsError> {
        let data = loader.formatted_data()?;
        let well_location = Location::from_position(well_position, data.well_geometry())?;
        let standard_path = data.standard_path(channel, &plate_location, &well_location)?;
        let node = data.try_get_standard_node_at(channel, &plate_location, &well_location)?;
        Ok(LocateResult {
            channel,
            plate_location,
            well_location,
            standard_path,
            found: node.is_some(),
            link: node.is_some_and(|node| node.is_link()),
        })
    }
}
