use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BdsError;
use crate::storage::{NodePath, Storage};

pub const EXPERIMENT_IDENTIFIER: &str = "experiment_identifier";
pub const EXPERIMENT_REGISTRATOR: &str = "experiment_registrator";
pub const EXPERIMENT_REGISTRATION_TIMESTAMP: &str = "experiment_registration_timestamp";
pub const SAMPLE: &str = "sample";
pub const STANDARD_ORIGINAL_MAPPING: &str = "standard_original_mapping";

const INSTANCE_CODE: &str = "instance_code";
const SPACE_CODE: &str = "space_code";
const PROJECT_CODE: &str = "project_code";
const EXPERIMENT_CODE: &str = "experiment_code";
const FIRST_NAME: &str = "first_name";
const LAST_NAME: &str = "last_name";
const EMAIL: &str = "email";
const CODE: &str = "code";
const TYPE_CODE: &str = "type_code";
const TYPE_DESCRIPTION: &str = "type_description";

/// `[INSTANCE:]/SPACE/PROJECT/EXPERIMENT`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentIdentifier {
    #[serde(default)]
    pub instance_code: Option<String>,
    pub space_code: String,
    pub project_code: String,
    pub experiment_code: String,
}

impl ExperimentIdentifier {
    pub fn new(
        space_code: impl Into<String>,
        project_code: impl Into<String>,
        experiment_code: impl Into<String>,
    ) -> Self {
        Self {
            instance_code: None,
            space_code: space_code.into(),
            project_code: project_code.into(),
            experiment_code: experiment_code.into(),
        }
    }

    pub fn with_instance(mut self, instance_code: impl Into<String>) -> Self {
        self.instance_code = Some(instance_code.into());
        self
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        let node = storage.make_directory(dir, EXPERIMENT_IDENTIFIER)?;
        let path = node.path();
        if let Some(instance) = &self.instance_code {
            storage.add_key_value_pair(path, INSTANCE_CODE, instance)?;
        }
        storage.add_key_value_pair(path, SPACE_CODE, &self.space_code)?;
        storage.add_key_value_pair(path, PROJECT_CODE, &self.project_code)?;
        storage.add_key_value_pair(path, EXPERIMENT_CODE, &self.experiment_code)?;
        Ok(())
    }

    pub fn try_load_from(storage: &Storage, dir: &NodePath) -> Result<Option<Self>, BdsError> {
        let path = dir.join(EXPERIMENT_IDENTIFIER);
        if storage.try_get_node(&path)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            instance_code: storage.try_get_value(&path, INSTANCE_CODE)?,
            space_code: storage.get_value(&path, SPACE_CODE)?,
            project_code: storage.get_value(&path, PROJECT_CODE)?,
            experiment_code: storage.get_value(&path, EXPERIMENT_CODE)?,
        }))
    }
}

impl fmt::Display for ExperimentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(instance) = &self.instance_code {
            write!(f, "{instance}:")?;
        }
        write!(
            f,
            "/{}/{}/{}",
            self.space_code, self.project_code, self.experiment_code
        )
    }
}

impl FromStr for ExperimentIdentifier {
    type Err = BdsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (instance, path) = match trimmed.split_once(':') {
            Some((instance, path)) => (Some(instance), path),
            None => (None, trimmed),
        };
        let parts = path
            .strip_prefix('/')
            .map(|rest| rest.split('/').collect::<Vec<_>>())
            .unwrap_or_default();
        let [space, project, experiment] = parts.as_slice() else {
            return Err(BdsError::IllegalArgument(format!(
                "invalid experiment identifier: {value}"
            )));
        };
        if [space, project, experiment].iter().any(|code| code.is_empty()) {
            return Err(BdsError::IllegalArgument(format!(
                "invalid experiment identifier: {value}"
            )));
        }
        let identifier = Self::new(*space, *project, *experiment);
        Ok(match instance {
            Some(instance) if !instance.is_empty() => identifier.with_instance(instance),
            _ => identifier,
        })
    }
}

/// The person who registered the experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Person {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
        }
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        let node = storage.make_directory(dir, EXPERIMENT_REGISTRATOR)?;
        storage.add_key_value_pair(node.path(), FIRST_NAME, &self.first_name)?;
        storage.add_key_value_pair(node.path(), LAST_NAME, &self.last_name)?;
        storage.add_key_value_pair(node.path(), EMAIL, &self.email)?;
        Ok(())
    }

    pub fn try_load_from(storage: &Storage, dir: &NodePath) -> Result<Option<Self>, BdsError> {
        let path = dir.join(EXPERIMENT_REGISTRATOR);
        if storage.try_get_node(&path)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            first_name: storage.get_value(&path, FIRST_NAME)?,
            last_name: storage.get_value(&path, LAST_NAME)?,
            email: storage.get_value(&path, EMAIL)?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub code: String,
    #[serde(default)]
    pub type_code: String,
    #[serde(default)]
    pub type_description: String,
}

impl Sample {
    pub fn new(
        code: impl Into<String>,
        type_code: impl Into<String>,
        type_description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            type_code: type_code.into(),
            type_description: type_description.into(),
        }
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        let node = storage.make_directory(dir, SAMPLE)?;
        storage.add_key_value_pair(node.path(), CODE, &self.code)?;
        storage.add_key_value_pair(node.path(), TYPE_CODE, &self.type_code)?;
        storage.add_key_value_pair(node.path(), TYPE_DESCRIPTION, &self.type_description)?;
        Ok(())
    }

    pub fn try_load_from(storage: &Storage, dir: &NodePath) -> Result<Option<Self>, BdsError> {
        let path = dir.join(SAMPLE);
        if storage.try_get_node(&path)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            code: storage.get_value(&path, CODE)?,
            type_code: storage.get_value(&path, TYPE_CODE)?,
            type_description: storage.get_value(&path, TYPE_DESCRIPTION)?,
        }))
    }
}

pub fn save_timestamp(
    storage: &Storage,
    dir: &NodePath,
    timestamp: &DateTime<Utc>,
) -> Result<(), BdsError> {
    storage
        .add_key_value_pair(dir, EXPERIMENT_REGISTRATION_TIMESTAMP, &timestamp.to_rfc3339())
        .map(|_| ())
}

pub fn try_load_timestamp(
    storage: &Storage,
    dir: &NodePath,
) -> Result<Option<DateTime<Utc>>, BdsError> {
    let Some(value) = storage.try_get_value(dir, EXPERIMENT_REGISTRATION_TIMESTAMP)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(value.trim())
        .map(|timestamp| Some(timestamp.with_timezone(&Utc)))
        .map_err(|err| {
            BdsError::DataStructure(format!("invalid registration timestamp {value}: {err}"))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReferenceKind {
    /// The standard node has the same content as the original.
    Identical,
    /// The standard node was derived from the original.
    Transformed,
}

impl ReferenceKind {
    fn code(&self) -> &'static str {
        match self {
            ReferenceKind::Identical => "I",
            ReferenceKind::Transformed => "T",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(ReferenceKind::Identical),
            "T" => Some(ReferenceKind::Transformed),
            _ => None,
        }
    }
}

/// Maps a node below `data/standard` to the original it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    standard_path: Utf8PathBuf,
    original_path: Utf8PathBuf,
    kind: ReferenceKind,
}

impl Reference {
    pub fn new(
        standard_path: impl Into<Utf8PathBuf>,
        original_path: impl Into<Utf8PathBuf>,
        kind: ReferenceKind,
    ) -> Self {
        Self {
            standard_path: standard_path.into(),
            original_path: original_path.into(),
            kind,
        }
    }

    pub fn standard_path(&self) -> &Utf8PathBuf {
        &self.standard_path
    }

    pub fn original_path(&self) -> &Utf8PathBuf {
        &self.original_path
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }
}

pub fn format_mapping<'a>(references: impl IntoIterator<Item = &'a Reference>) -> String {
    references
        .into_iter()
        .map(|reference| {
            format!(
                "{}\t{}\t{}\n",
                reference.standard_path,
                reference.kind.code(),
                reference.original_path
            )
        })
        .collect()
}

pub fn parse_mapping(content: &str) -> Result<Vec<Reference>, BdsError> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.split('\t');
            let (Some(standard), Some(code), Some(original), None) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(BdsError::DataStructure(format!(
                    "malformed {STANDARD_ORIGINAL_MAPPING} line: {line}"
                )));
            };
            let kind = ReferenceKind::from_code(code).ok_or_else(|| {
                BdsError::DataStructure(format!("unknown reference type {code} in: {line}"))
            })?;
            Ok(Reference::new(standard, original, kind))
        })
        .collect()
}
