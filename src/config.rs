use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BdsError;
use crate::format::{Format, FormatRegistry, Version};
use crate::import::ImageFileExtractor;
use crate::metadata::{ExperimentIdentifier, Person, Sample};
use crate::parameter::FormatParameters;

pub const DEFAULT_CONFIG_FILE: &str = "bds.json";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub format: FormatEntry,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub experiment: ExperimentEntry,
    pub registrator: Person,
    #[serde(default)]
    pub registration_timestamp: Option<String>,
    pub sample: SampleEntry,
    #[serde(default)]
    pub import: Option<ImportEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FormatEntry {
    Shorthand(String),
    Detailed(FormatEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FormatEntryObject {
    pub code: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExperimentEntry {
    Shorthand(String),
    Detailed(ExperimentIdentifier),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SampleEntry {
    Shorthand(String),
    Detailed(Sample),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ImportEntry {
    pub pattern: String,
    #[serde(default)]
    pub channel_offset: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub format: Format,
    pub parameters: FormatParameters,
    pub experiment: ExperimentIdentifier,
    pub registrator: Person,
    pub registration_timestamp: Option<DateTime<Utc>>,
    pub sample: Sample,
    pub import: Option<ImageFileExtractor>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `bds.json` in the current directory when no path is
    /// given.
    pub fn resolve(
        path: Option<&str>,
        registry: &FormatRegistry,
    ) -> Result<ResolvedConfig, BdsError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(BdsError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BdsError::ConfigRead(config_path.clone()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|err| BdsError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, registry)
    }

    pub fn resolve_config(
        config: Config,
        registry: &FormatRegistry,
    ) -> Result<ResolvedConfig, BdsError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let format = match config.format {
            FormatEntry::Shorthand(code) => registry.declare(&code, None)?,
            FormatEntry::Detailed(obj) => {
                let version = obj
                    .version
                    .as_deref()
                    .map(str::parse::<Version>)
                    .transpose()?;
                registry.declare(&obj.code, version)?
            }
        };

        let mut parameters = FormatParameters::new();
        for (name, value) in &config.parameters {
            parameters.insert(format.parameter_factory().create_from_value(name, value)?);
        }

        let experiment = match config.experiment {
            ExperimentEntry::Shorthand(value) => value.parse()?,
            ExperimentEntry::Detailed(identifier) => identifier,
        };

        let sample = match config.sample {
            SampleEntry::Shorthand(code) => Sample::new(code, "", ""),
            SampleEntry::Detailed(sample) => sample,
        };

        let registration_timestamp = config
            .registration_timestamp
            .map(|value| {
                DateTime::parse_from_rfc3339(&value)
                    .map(|timestamp| timestamp.with_timezone(&Utc))
                    .map_err(|err| {
                        BdsError::ConfigParse(format!("registration_timestamp {value}: {err}"))
                    })
            })
            .transpose()?;

        let import = config
            .import
            .map(|entry| {
                ImageFileExtractor::new(&entry.pattern).map(|extractor| {
                    extractor.with_channel_offset(entry.channel_offset.unwrap_or(0))
                })
            })
            .transpose()?;

        Ok(ResolvedConfig {
            schema_version,
            format,
            parameters,
            experiment,
            registrator: config.registrator,
            registration_timestamp,
            sample,
            import,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HCS_IMAGE;
    use crate::parameter::PLATE_GEOMETRY;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            schema_version: None,
            format: FormatEntry::Shorthand(HCS_IMAGE.to_string()),
            parameters: BTreeMap::from([(PLATE_GEOMETRY.to_string(), "8x12".to_string())]),
            experiment: ExperimentEntry::Shorthand("/SPACE/PROJECT/EXP1".to_string()),
            registrator: Person::new("Ada", "Lovelace", "ada@example.org"),
            registration_timestamp: None,
            sample: SampleEntry::Shorthand("PLATE1".to_string()),
            import: None,
        };

        let resolved =
            ConfigLoader::resolve_config(config, &FormatRegistry::with_defaults()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.format, Format::hcs_image_v1_0());
        assert_eq!(resolved.experiment.project_code, "PROJECT");
        assert_eq!(resolved.sample.code, "PLATE1");
        assert_eq!(
            resolved.parameters.plate_geometry().map(ToString::to_string),
            Some("8x12".to_string())
        );
    }
}
