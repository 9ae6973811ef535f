use std::fs;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use bds_hcs::config::{Config, ConfigLoader, ResolvedConfig};
use bds_hcs::error::BdsError;
use bds_hcs::format::{Format, FormatRegistry};
use bds_hcs::geometry::Location;

const DETAILED: &str = r#"{
    "schema_version": 1,
    "format": { "code": "IMAGE_HCS", "version": "1.0" },
    "parameters": {
        "plate_geometry": "16x24",
        "well_geometry": "2x2",
        "number_of_channels": "3",
        "contains_original_data": "false",
        "device_id": "opera-2"
    },
    "experiment": {
        "instance_code": "DB1",
        "space_code": "SCREENING",
        "project_code": "KINASES",
        "experiment_code": "EXP-7"
    },
    "registrator": {
        "first_name": "Rosalind",
        "last_name": "Franklin",
        "email": "rf@example.org"
    },
    "registration_timestamp": "2024-05-17T11:30:00+02:00",
    "sample": { "code": "PLATE-42", "type_code": "PLATE" },
    "import": {
        "pattern": "^(?P<plate>[A-Z]\\d+)_s(?P<tile>\\d+)_w(?P<channel>\\d+)\\.tiff$",
        "channel_offset": 1
    }
}"#;

fn parse(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

fn resolve(json: &str) -> Result<ResolvedConfig, BdsError> {
    ConfigLoader::resolve_config(parse(json), &FormatRegistry::with_defaults())
}

/// A minimal shorthand config with `field` set to the JSON `value`.
fn with_field(field: &str, value: &str) -> String {
    let mut config = json!({
        "format": "HCS_IMAGE",
        "experiment": "/S/P/E",
        "registrator": { "first_name": "A", "last_name": "B", "email": "a@b.org" },
        "sample": "PLATE1"
    });
    config[field] = serde_json::from_str::<Value>(value).unwrap();
    config.to_string()
}

#[test]
fn detailed_config_resolves_every_section() {
    let resolved = resolve(DETAILED).unwrap();
    assert_eq!(resolved.format, Format::image_hcs_v1_0());
    assert_eq!(resolved.experiment.instance_code.as_deref(), Some("DB1"));
    assert_eq!(resolved.experiment.experiment_code, "EXP-7");
    assert_eq!(resolved.registrator.email, "rf@example.org");
    assert_eq!(resolved.sample.type_code, "PLATE");
    assert_eq!(resolved.sample.type_description, "");
    assert_eq!(
        resolved.registration_timestamp,
        Some(Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap())
    );

    let parameters = &resolved.parameters;
    assert_eq!(parameters.len(), 5);
    assert_eq!(parameters.plate_geometry().unwrap().to_string(), "16x24");
    assert_eq!(parameters.channels().unwrap().channel_count(), 3);
    assert_eq!(parameters.flag("contains_original_data"), Some(false));
    assert_eq!(parameters.text("device_id"), Some("opera-2"));

    let extractor = resolved.import.unwrap();
    let plate = parameters.plate_geometry().unwrap();
    let well = parameters.well_geometry().unwrap();
    let location = extractor
        .extract("P24_s3_w0.tiff", plate, well)
        .unwrap()
        .unwrap();
    assert_eq!(location.channel, 1);
    assert_eq!(location.plate_location, Location::new(24, 16).unwrap());
    assert_eq!(location.well_location, Location::new(1, 2).unwrap());
}

#[test]
fn shorthand_sections_take_defaults() {
    let resolved = resolve(&with_field("parameters", "{}")).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.format, Format::hcs_image_v1_0());
    assert_eq!(resolved.experiment.instance_code, None);
    assert_eq!(resolved.sample.code, "PLATE1");
    assert!(resolved.parameters.is_empty());
    assert!(resolved.registration_timestamp.is_none());
    assert!(resolved.import.is_none());
}

#[test]
fn unknown_format_code_resolves_to_generic_format() {
    let json = with_field("parameters", r#"{ "scanner": "GenePix" }"#)
        .replace(r#""HCS_IMAGE""#, r#""MICROARRAY""#);
    let resolved = resolve(&json).unwrap();
    assert!(resolved.format.is_unknown());
    assert_eq!(resolved.format.code(), "MICROARRAY");
    assert_eq!(resolved.parameters.text("scanner"), Some("GenePix"));
}

#[test]
fn invalid_values_are_rejected() {
    assert_matches!(
        resolve(&with_field("format", r#"{ "code": "HCS_IMAGE", "version": "2" }"#)),
        Err(BdsError::IllegalArgument(_))
    );
    assert_matches!(
        resolve(&with_field("format", r#"{ "code": "HCS_IMAGE", "version": "9.0" }"#)),
        Err(BdsError::UnknownFormatVersion { .. })
    );
    assert_matches!(
        resolve(&with_field("parameters", r#"{ "plate_geometry": "8 by 12" }"#)),
        Err(BdsError::InvalidParameter { ref name, .. }) if name == "plate_geometry"
    );
    assert_matches!(
        resolve(&with_field("registration_timestamp", r#""yesterday""#)),
        Err(BdsError::ConfigParse(_))
    );
    assert_matches!(
        resolve(&with_field("import", r#"{ "pattern": "(?P<plate>\\w+)" }"#)),
        Err(BdsError::InvalidPattern(_))
    );
    assert_matches!(
        resolve(&with_field("parameters", "{}").replace("/S/P/E", "S/P")),
        Err(BdsError::IllegalArgument(_))
    );
}

#[test]
fn resolve_reads_an_explicit_path() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("plate.json");
    fs::write(&path, DETAILED).unwrap();
    let resolved =
        ConfigLoader::resolve(path.to_str(), &FormatRegistry::with_defaults()).unwrap();
    assert_eq!(resolved.sample.code, "PLATE-42");

    fs::write(&path, "{ \"format\": ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str(), &FormatRegistry::with_defaults()),
        Err(BdsError::ConfigParse(_))
    );

    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str(), &FormatRegistry::with_defaults()),
        Err(BdsError::ConfigRead(ref reported)) if *reported == missing
    );
}
