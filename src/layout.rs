use std::collections::BTreeSet;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{SearchKind, Study};
use crate::error::RetrieverError;
use crate::naming::{self, OTHERS_DIR, PLACEHOLDER_NAME};

const REMOVAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StudyDirState {
    Created,
    Recreated,
    SkippedExisting,
}

/// Directory tree under the save directory:
/// `<save_dir>/[<mrn>/]<accession>/<series>/<index>.dcm`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    save_dir: Utf8PathBuf,
}

impl OutputLayout {
    pub fn new(save_dir: Utf8PathBuf) -> Self {
        Self { save_dir }
    }

    pub fn save_dir(&self) -> &Utf8Path {
        &self.save_dir
    }

    /// Study folder known before any network call (accession searches only).
    pub fn accession_dir(&self, accession: &str) -> Utf8PathBuf {
        self.save_dir.join(naming::safe_component(accession))
    }

    pub fn study_dir(&self, study: &Study, kind: SearchKind) -> Utf8PathBuf {
        let folder = study
            .accession_number
            .as_deref()
            .map(naming::safe_component)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| naming::safe_component(study.uid.as_str()));
        match (kind, study.patient_id.as_deref()) {
            (SearchKind::Mrn, Some(mrn)) => self
                .save_dir
                .join(naming::safe_component(mrn))
                .join(folder),
            _ => self.save_dir.join(folder),
        }
    }

    pub fn others_dir(study_dir: &Utf8Path) -> Utf8PathBuf {
        study_dir.join(OTHERS_DIR)
    }

    pub fn metadata_path(series_dir: &Utf8Path) -> Utf8PathBuf {
        series_dir.join("metadata.xml")
    }

    pub fn instance_path(series_dir: &Utf8Path, index: usize) -> Utf8PathBuf {
        series_dir.join(format!("{index}.dcm"))
    }

    /// Applies the overwrite policy to a study folder before anything is written into it.
    pub fn prepare_study_dir(
        &self,
        dir: &Utf8Path,
        overwrite: bool,
        delete_timeout: Duration,
    ) -> Result<StudyDirState, RetrieverError> {
        let mut state = StudyDirState::Created;
        if dir.as_std_path().exists() {
            if !overwrite && is_non_empty_dir(dir) {
                return Ok(StudyDirState::SkippedExisting);
            }
            if overwrite {
                fs::remove_dir_all(dir.as_std_path())
                    .map_err(|err| RetrieverError::Filesystem(format!("remove {dir}: {err}")))?;
                wait_for_removal(dir, delete_timeout)?;
                state = StudyDirState::Recreated;
            }
        }
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(state)
    }
}

pub fn is_non_empty_dir(dir: &Utf8Path) -> bool {
    fs::read_dir(dir.as_std_path())
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Polls until `path` is gone, failing with `StudyDirBusy` after `timeout`.
pub fn wait_for_removal(path: &Utf8Path, timeout: Duration) -> Result<(), RetrieverError> {
    let started = Instant::now();
    while path.as_std_path().exists() {
        if started.elapsed() >= timeout {
            return Err(RetrieverError::StudyDirBusy(path.to_string()));
        }
        thread::sleep(REMOVAL_POLL_INTERVAL);
    }
    Ok(())
}

/// Renames a provisional series folder after its description.
///
/// Collisions append `+`; a missing description or a failed rename falls back
/// to the placeholder name. Returns the final folder name and records it in `used`.
pub fn name_series_dir(
    study_dir: &Utf8Path,
    provisional: &Utf8Path,
    description: Option<&str>,
    used: &mut BTreeSet<String>,
) -> Result<String, RetrieverError> {
    if let Some(base) = description.and_then(naming::sanitize_series_name) {
        let name = free_name(study_dir, &base, used);
        match fs::rename(provisional.as_std_path(), study_dir.join(&name).as_std_path()) {
            Ok(()) => {
                used.insert(name.clone());
                return Ok(name);
            }
            Err(err) => {
                tracing::warn!(folder = %name, error = %err, "rename failed, using placeholder");
            }
        }
    }

    let name = free_name(study_dir, PLACEHOLDER_NAME, used);
    fs::rename(provisional.as_std_path(), study_dir.join(&name).as_std_path())
        .map_err(|err| RetrieverError::Filesystem(format!("rename {provisional}: {err}")))?;
    used.insert(name.clone());
    Ok(name)
}

fn free_name(dir: &Utf8Path, base: &str, used: &BTreeSet<String>) -> String {
    naming::unique_name(base, |candidate| {
        candidate == OTHERS_DIR
            || used.contains(candidate)
            || dir.join(candidate).as_std_path().exists()
    })
}

/// Moves excluded series folders into `<study_dir>/others/`.
pub fn move_to_others(study_dir: &Utf8Path, names: &[String]) -> Result<Vec<String>, RetrieverError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let others = OutputLayout::others_dir(study_dir);
    fs::create_dir_all(others.as_std_path())
        .map_err(|err| RetrieverError::Filesystem(format!("create {others}: {err}")))?;

    let mut moved = Vec::new();
    for name in names {
        let target = naming::unique_name(name, |candidate| {
            others.join(candidate).as_std_path().exists()
        });
        fs::rename(
            study_dir.join(name).as_std_path(),
            others.join(&target).as_std_path(),
        )
        .map_err(|err| RetrieverError::Filesystem(format!("move {name} to {OTHERS_DIR}: {err}")))?;
        moved.push(target);
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StudyUid;

    fn study(accession: Option<&str>, patient: Option<&str>) -> Study {
        Study {
            uid: StudyUid::new("1.2.3"),
            accession_number: accession.map(str::to_string),
            patient_id: patient.map(str::to_string),
            description: None,
            study_date: None,
            modalities: Vec::new(),
        }
    }

    #[test]
    fn layout_paths() {
        let layout = OutputLayout::new(Utf8PathBuf::from("/data/dcms"));
        let by_acc = layout.study_dir(&study(Some("E123"), Some("MR9")), SearchKind::Accnum);
        assert_eq!(by_acc, Utf8PathBuf::from("/data/dcms/E123"));

        let by_mrn = layout.study_dir(&study(Some("E123"), Some("MR9")), SearchKind::Mrn);
        assert_eq!(by_mrn, Utf8PathBuf::from("/data/dcms/MR9/E123"));

        let no_acc = layout.study_dir(&study(None, None), SearchKind::Keyword);
        assert_eq!(no_acc, Utf8PathBuf::from("/data/dcms/1.2.3"));

        let series = Utf8PathBuf::from("/data/dcms/E123/t2");
        assert!(OutputLayout::instance_path(&series, 7).ends_with("t2/7.dcm"));
        assert!(OutputLayout::metadata_path(&series).ends_with("t2/metadata.xml"));
    }

    #[test]
    fn removal_wait_times_out() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let err = wait_for_removal(&dir, Duration::from_millis(150)).unwrap_err();
        assert!(matches!(err, RetrieverError::StudyDirBusy(_)));
    }
}
