use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use bds_hcs::container::{DataStructure, FormattedData, Mode};
use bds_hcs::error::BdsError;
use bds_hcs::format::{
    Format, FormatKind, FormatReference, FormatRegistry, HCS_IMAGE, Version, WellFileNaming,
};
use bds_hcs::geometry::Location;
use bds_hcs::metadata::{ExperimentIdentifier, Person, Reference, ReferenceKind, Sample};
use bds_hcs::parameter::FormatParameterFactory;

fn temp_root() -> (TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("container")).unwrap();
    (temp, root)
}

fn write_original(temp: &TempDir, name: &str, content: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(temp.path().join(name)).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn add_hcs_parameters(structure: &mut DataStructure, format: &Format) {
    let factory = format.parameter_factory();
    for (name, value) in [
        ("plate_geometry", "8x12"),
        ("well_geometry", "3x3"),
        ("number_of_channels", "2"),
        ("contains_original_data", "true"),
    ] {
        structure
            .add_format_parameter(&factory.create_from_value(name, value).unwrap())
            .unwrap();
    }
}

fn experiment() -> ExperimentIdentifier {
    ExperimentIdentifier::new("SCREENING", "KINASES", "EXP-7").with_instance("DB1")
}

fn registrator() -> Person {
    Person::new("Rosalind", "Franklin", "rf@example.org")
}

fn sample() -> Sample {
    Sample::new("PLATE-42", "PLATE", "384 well plate")
}

fn populate(structure: &mut DataStructure) {
    let format = Format::hcs_image_v1_0();
    structure.set_format(&format).unwrap();
    add_hcs_parameters(structure, &format);
    structure.set_experiment_identifier(&experiment()).unwrap();
    structure.set_experiment_registrator(&registrator()).unwrap();
    let registered = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
    structure
        .set_experiment_registration_timestamp(&registered)
        .unwrap();
    structure.set_sample(&sample()).unwrap();
}

#[test]
fn close_then_reopen_read_only_recovers_metadata() {
    let (temp, root) = temp_root();
    let mut structure = DataStructure::create(root.clone(), FormatRegistry::with_defaults())
        .unwrap();
    populate(&mut structure);
    structure
        .add_original(&write_original(&temp, "a.tiff", "first"))
        .unwrap();
    structure
        .add_original(&write_original(&temp, "b.tiff", "second"))
        .unwrap();
    structure.close().unwrap();
    assert!(!structure.is_open());
    assert_matches!(structure.sample(), Err(BdsError::NotOpen));

    let checksums = fs::read_to_string(root.join("metadata/md5sum/original")).unwrap();
    assert_eq!(checksums.lines().count(), 2);
    assert!(checksums.contains("  a.tiff"));
    assert!(checksums.contains("  b.tiff"));

    let mut reopened =
        DataStructure::open(root, Mode::ReadOnly, FormatRegistry::with_defaults()).unwrap();
    assert_eq!(reopened.experiment_identifier().unwrap(), Some(experiment()));
    assert_eq!(reopened.experiment_registrator().unwrap(), Some(registrator()));
    assert_eq!(
        reopened.experiment_registration_timestamp().unwrap(),
        Some(Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap())
    );
    assert_eq!(reopened.sample().unwrap(), Some(sample()));
    assert_eq!(reopened.format().unwrap(), Format::hcs_image_v1_0());
    assert_eq!(reopened.checksums().unwrap().len(), 2);
    assert!(reopened.verify_checksums().unwrap().is_ok());
    reopened.close().unwrap();
}

#[test]
fn close_names_the_missing_item() {
    let cases = [
        ("format", "Unspecified format."),
        ("experiment", "Unspecified experiment identifier."),
        ("registrator", "Unspecified experiment registrator."),
        ("timestamp", "Unspecified experiment registration timestamp."),
        ("sample", "Unspecified sample."),
    ];
    for (skipped, message) in cases {
        let (_temp, root) = temp_root();
        let mut structure = DataStructure::create(root, FormatRegistry::with_defaults()).unwrap();
        if skipped != "format" {
            let format = Format::hcs_image_v1_0();
            structure.set_format(&format).unwrap();
            add_hcs_parameters(&mut structure, &format);
        }
        if skipped != "experiment" {
            structure.set_experiment_identifier(&experiment()).unwrap();
        }
        if skipped != "registrator" {
            structure.set_experiment_registrator(&registrator()).unwrap();
        }
        if skipped != "timestamp" {
            structure
                .set_experiment_registration_timestamp(&Utc::now())
                .unwrap();
        }
        if skipped != "sample" {
            structure.set_sample(&sample()).unwrap();
        }

        let err = structure.close().unwrap_err();
        assert_matches!(err, BdsError::MissingMetadata(ref text) if text == message);
        assert!(structure.is_open(), "a failed close keeps {skipped} case open");
    }
}

#[test]
fn close_requires_mandatory_format_parameters() {
    let (_temp, root) = temp_root();
    let mut structure = DataStructure::create(root, FormatRegistry::with_defaults()).unwrap();
    structure.set_format(&Format::hcs_image_v1_0()).unwrap();
    structure.set_experiment_identifier(&experiment()).unwrap();
    structure.set_experiment_registrator(&registrator()).unwrap();
    structure
        .set_experiment_registration_timestamp(&Utc::now())
        .unwrap();
    structure.set_sample(&sample()).unwrap();
    assert_matches!(
        structure.close(),
        Err(BdsError::MissingParameters(ref names)) if names.contains("plate_geometry")
    );
}

#[test]
fn incompatible_major_version_is_rejected() {
    let (_temp, root) = temp_root();
    let mut structure = DataStructure::create(root.clone(), FormatRegistry::with_defaults())
        .unwrap();
    populate(&mut structure);
    structure.close().unwrap();
    fs::write(root.join("metadata/version/major"), "2").unwrap();

    let err = DataStructure::open(root.clone(), Mode::ReadOnly, FormatRegistry::with_defaults())
        .unwrap_err();
    assert_matches!(err, BdsError::IncompatibleVersion { ref found, .. } if found == "2.0");

    fs::write(root.join("metadata/version/major"), "1").unwrap();
    fs::write(root.join("metadata/version/minor"), "7").unwrap();
    let mut structure =
        DataStructure::open(root, Mode::ReadOnly, FormatRegistry::with_defaults()).unwrap();
    assert_eq!(structure.version().unwrap(), Version::new(1, 7));
    structure.close().unwrap();
}

#[test]
fn unknown_format_code_falls_back_to_generic_data() {
    let (_temp, root) = temp_root();
    let mut structure = DataStructure::create(root.clone(), FormatRegistry::with_defaults())
        .unwrap();
    let microarray = Format::new(
        FormatReference::new("MICROARRAY", Version::new(1, 0)),
        Vec::new(),
        Vec::new(),
        FormatKind::Unknown,
        FormatParameterFactory::generic(),
    );
    structure.set_format(&microarray).unwrap();
    structure
        .add_format_parameter(
            &FormatParameterFactory::generic()
                .create_from_value("scanner", "GenePix")
                .unwrap(),
        )
        .unwrap();
    structure.set_experiment_identifier(&experiment()).unwrap();
    structure.set_experiment_registrator(&registrator()).unwrap();
    structure
        .set_experiment_registration_timestamp(&Utc::now())
        .unwrap();
    structure.set_sample(&sample()).unwrap();
    structure.close().unwrap();

    let mut reopened =
        DataStructure::open(root, Mode::ReadOnly, FormatRegistry::with_defaults()).unwrap();
    assert!(reopened.format().unwrap().is_unknown());
    match reopened.formatted_data().unwrap() {
        FormattedData::Generic(data) => {
            assert_eq!(data.stored_format().map(|f| f.code()), Some("MICROARRAY"));
            assert_eq!(data.parameters().text("scanner"), Some("GenePix"));
        }
        FormattedData::HcsImage(_) => panic!("expected generic formatted data"),
    }
    assert_matches!(
        reopened.hcs_formatted_data(),
        Err(BdsError::DataStructure(_))
    );
    reopened.close().unwrap();
}

#[test]
fn unknown_version_of_known_format_fails_lazily() {
    let (_temp, root) = temp_root();
    let mut structure = DataStructure::create(root, FormatRegistry::with_defaults()).unwrap();
    let future = Format::new(
        FormatReference::new(HCS_IMAGE, Version::new(3, 1)),
        Vec::new(),
        Vec::new(),
        FormatKind::HcsImage(WellFileNaming::Underscored),
        FormatParameterFactory::hcs(),
    );
    structure.set_format(&future).unwrap();
    assert!(structure.format_reference().unwrap().is_some());
    assert_matches!(
        structure.formatted_data(),
        Err(BdsError::UnknownFormatVersion { ref code, ref version })
            if code == HCS_IMAGE && version == "3.1"
    );
}

#[test]
fn verify_detects_tampered_originals() {
    let (temp, root) = temp_root();
    let mut structure = DataStructure::create(root.clone(), FormatRegistry::with_defaults())
        .unwrap();
    populate(&mut structure);
    structure
        .add_original(&write_original(&temp, "img.tiff", "pixels"))
        .unwrap();
    structure.close().unwrap();

    fs::write(root.join("data/original/img.tiff"), "tampered").unwrap();
    fs::write(root.join("data/original/extra.tiff"), "new").unwrap();

    let mut reopened =
        DataStructure::open(root, Mode::ReadOnly, FormatRegistry::with_defaults()).unwrap();
    let report = reopened.verify_checksums().unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.mismatched, vec![Utf8PathBuf::from("img.tiff")]);
    assert_eq!(report.unexpected, vec![Utf8PathBuf::from("extra.tiff")]);
    assert!(report.missing.is_empty());
    reopened.close().unwrap();
}

#[test]
fn references_are_unique_and_validated_at_close() {
    let (temp, root) = temp_root();
    let mut structure = DataStructure::create(root, FormatRegistry::with_defaults()).unwrap();
    populate(&mut structure);
    structure
        .add_original(&write_original(&temp, "img.tiff", "pixels"))
        .unwrap();

    let reference = Reference::new(
        "channel1/row1/column1/row1_column1.tiff",
        "img.tiff",
        ReferenceKind::Identical,
    );
    structure.add_reference(reference.clone()).unwrap();
    assert_matches!(
        structure.add_reference(reference),
        Err(BdsError::DuplicateReference(_))
    );

    assert_matches!(structure.close(), Err(BdsError::DataStructure(_)));

    let data = structure.hcs_formatted_data().unwrap();
    let one = Location::new(1, 1).unwrap();
    data.add_standard_node("img.tiff", 1, &one, &one).unwrap();
    structure.close().unwrap();
}

#[test]
fn read_only_container_rejects_writes() {
    let (_temp, root) = temp_root();
    let mut structure = DataStructure::create(root.clone(), FormatRegistry::with_defaults())
        .unwrap();
    populate(&mut structure);
    structure.close().unwrap();

    let mut reopened =
        DataStructure::open(root, Mode::ReadOnly, FormatRegistry::with_defaults()).unwrap();
    assert_matches!(
        reopened.set_experiment_identifier(&experiment()),
        Err(BdsError::ReadOnly)
    );
    assert_matches!(
        reopened.add_reference(Reference::new("a", "b", ReferenceKind::Transformed)),
        Err(BdsError::ReadOnly)
    );
    reopened.close().unwrap();
}
