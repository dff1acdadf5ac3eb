use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;

use vna_retriever::layout::{OutputLayout, StudyDirState, move_to_others, name_series_dir};

fn root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

#[test]
fn prepare_study_dir_policies() {
    let temp = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(root(&temp));
    let dir = layout.accession_dir("E1");
    let timeout = Duration::from_secs(1);

    assert_eq!(
        layout.prepare_study_dir(&dir, false, timeout).unwrap(),
        StudyDirState::Created
    );
    fs::write(dir.join("0.dcm"), b"x").unwrap();
    assert_eq!(
        layout.prepare_study_dir(&dir, false, timeout).unwrap(),
        StudyDirState::SkippedExisting
    );
    assert!(dir.join("0.dcm").exists());

    assert_eq!(
        layout.prepare_study_dir(&dir, true, timeout).unwrap(),
        StudyDirState::Recreated
    );
    assert!(dir.exists());
    assert!(!dir.join("0.dcm").exists());
}

#[test]
fn series_rename_avoids_collisions() {
    let temp = tempfile::tempdir().unwrap();
    let study_dir = root(&temp);
    let mut used = BTreeSet::new();

    fs::create_dir(study_dir.join("t2 haste")).unwrap();
    let provisional = study_dir.join("1.2.3");
    fs::create_dir(&provisional).unwrap();
    let name = name_series_dir(&study_dir, &provisional, Some("T2 HASTE"), &mut used).unwrap();
    assert_eq!(name, "t2 haste+");
    assert!(!provisional.exists());

    let provisional = study_dir.join("1.2.4");
    fs::create_dir(&provisional).unwrap();
    let name = name_series_dir(&study_dir, &provisional, Some("others"), &mut used).unwrap();
    assert_eq!(name, "others+");

    let provisional = study_dir.join("1.2.5");
    fs::create_dir(&provisional).unwrap();
    let name = name_series_dir(&study_dir, &provisional, None, &mut used).unwrap();
    assert_eq!(name, "UnknownProtocol");
    assert!(used.contains("UnknownProtocol"));
}

#[test]
fn excluded_series_move_into_others() {
    let temp = tempfile::tempdir().unwrap();
    let study_dir = root(&temp);
    fs::create_dir_all(study_dir.join("others").join("sub")).unwrap();
    fs::create_dir(study_dir.join("sub")).unwrap();
    fs::write(study_dir.join("sub").join("metadata.xml"), b"<x/>").unwrap();

    let moved = move_to_others(&study_dir, &["sub".to_string()]).unwrap();
    assert_eq!(moved, vec!["sub+".to_string()]);
    assert!(!study_dir.join("sub").exists());
    assert!(study_dir.join("others").join("sub+").join("metadata.xml").exists());
    assert!(move_to_others(&study_dir, &[]).unwrap().is_empty());
}
