use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::anonymize::Anonymizer;
use crate::archive::{ArchiveClient, StudyQuery};
use crate::config::RunOptions;
use crate::domain::{InstanceUid, SearchKind, Series, Study};
use crate::error::RetrieverError;
use crate::layout::{self, OutputLayout, StudyDirState};
use crate::metadata;
use crate::naming;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// A study resolved from a search term, with its series and instances enumerated.
#[derive(Debug, Clone, Serialize)]
pub struct StudyPlan {
    pub term: String,
    pub study: Study,
    pub study_dir: Utf8PathBuf,
    pub series: Vec<Series>,
}

impl StudyPlan {
    pub fn instance_count(&self) -> usize {
        self.series.iter().map(|series| series.instances.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTerm {
    pub term: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StudyAction {
    Downloaded,
    SkippedExisting,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyOutcome {
    pub term: String,
    pub accession_number: Option<String>,
    pub study_uid: Option<String>,
    pub path: String,
    pub action: StudyAction,
    pub series_total: usize,
    pub series_loaded: usize,
    pub series_excluded: Vec<String>,
    pub images_loaded: usize,
    pub images_skipped: usize,
    pub elapsed_ms: u128,
    pub message: Option<String>,
}

impl StudyOutcome {
    fn new(term: &str, study: Option<&Study>, path: &Utf8Path, action: StudyAction) -> Self {
        Self {
            term: term.to_string(),
            accession_number: study.and_then(|study| study.accession_number.clone()),
            study_uid: study.map(|study| study.uid.to_string()),
            path: path.to_string(),
            action,
            series_total: 0,
            series_loaded: 0,
            series_excluded: Vec::new(),
            images_loaded: 0,
            images_skipped: 0,
            elapsed_ms: 0,
            message: None,
        }
    }

    fn failed(term: &str, study: Option<&Study>, path: &Utf8Path, err: &RetrieverError) -> Self {
        let mut outcome = Self::new(term, study, path, StudyAction::Failed);
        outcome.message = Some(err.to_string());
        outcome
    }
}

/// Output of the search and enumeration stages; the review step prunes `plans`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Collection {
    pub plans: Vec<StudyPlan>,
    pub outcomes: Vec<StudyOutcome>,
    pub skipped_terms: Vec<SkippedTerm>,
}

impl Collection {
    /// Keeps the plans whose flag is `true`; missing flags count as `false`.
    pub fn retain_selected(&mut self, selected: &[bool]) {
        let mut flags = selected.iter().copied();
        self.plans.retain(|_| flags.next().unwrap_or(false));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResult {
    pub studies: Vec<StudyOutcome>,
    pub skipped_terms: Vec<SkippedTerm>,
    pub elapsed_ms: u128,
}

impl RetrieveResult {
    pub fn count(&self, action: StudyAction) -> usize {
        self.studies.iter().filter(|s| s.action == action).count()
    }

    pub fn images_loaded(&self) -> usize {
        self.studies.iter().map(|s| s.images_loaded).sum()
    }

    pub fn images_skipped(&self) -> usize {
        self.studies.iter().map(|s| s.images_skipped).sum()
    }
}

pub struct App<A: ArchiveClient, X: Anonymizer> {
    archive: A,
    anonymizer: X,
    layout: OutputLayout,
}

impl<A: ArchiveClient, X: Anonymizer> App<A, X> {
    pub fn new(archive: A, anonymizer: X, layout: OutputLayout) -> Self {
        Self {
            archive,
            anonymizer,
            layout,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Search and enumeration followed by retrieval, without a review step.
    pub fn run(
        &self,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RetrieveResult, RetrieverError> {
        let collection = self.collect(options, sink)?;
        self.retrieve(collection, options, sink)
    }

    pub fn collect(
        &self,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Collection, RetrieverError> {
        let mut collection = Collection::default();
        let mut seen = HashSet::new();

        for term in &options.terms {
            emit(sink, format!("phase=Search; {} {term}", options.search_kind));

            if options.search_kind == SearchKind::Accnum && !options.overwrite {
                let dir = self.layout.accession_dir(term);
                if layout::is_non_empty_dir(&dir) {
                    tracing::info!(folder = %dir, "folder already exists, skipping");
                    collection.outcomes.push(StudyOutcome::new(
                        term,
                        None,
                        &dir,
                        StudyAction::SkippedExisting,
                    ));
                    continue;
                }
            }

            let query = StudyQuery::from_options(term, options);
            let studies = match self.archive.search_studies(&query) {
                Ok(studies) => studies,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(term = %term, error = %err, "study search failed");
                    collection.skipped_terms.push(SkippedTerm {
                        term: term.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if studies.is_empty() {
                tracing::info!(term = %term, "no studies associated with term");
                collection.skipped_terms.push(SkippedTerm {
                    term: term.clone(),
                    reason: "no matching studies".to_string(),
                });
                continue;
            }

            for study in select_studies(studies, options) {
                if !seen.insert(study.uid.clone()) {
                    continue;
                }
                let study_dir = self.layout.study_dir(&study, options.search_kind);
                if !options.overwrite && layout::is_non_empty_dir(&study_dir) {
                    tracing::info!(folder = %study_dir, "folder already exists, skipping");
                    collection.outcomes.push(StudyOutcome::new(
                        term,
                        Some(&study),
                        &study_dir,
                        StudyAction::SkippedExisting,
                    ));
                    continue;
                }

                emit(sink, format!("phase=Enumerate; study {}", study.uid));
                match self.enumerate(&study, options) {
                    Ok(series) => collection.plans.push(StudyPlan {
                        term: term.clone(),
                        study,
                        study_dir,
                        series,
                    }),
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::warn!(term = %term, study = %study.uid, error = %err, "enumeration failed");
                        collection
                            .outcomes
                            .push(StudyOutcome::failed(term, Some(&study), &study_dir, &err));
                    }
                }
            }
        }

        Ok(collection)
    }

    fn enumerate(&self, study: &Study, options: &RunOptions) -> Result<Vec<Series>, RetrieverError> {
        let listed = self
            .archive
            .search_series(&study.uid, options.modality.as_ref())?;
        let mut series = dedupe_series(listed);
        for entry in &mut series {
            entry.instances = self
                .archive
                .search_instances(&study.uid, &entry.uid)
                .inspect_err(|err| {
                    tracing::warn!(series = %entry.uid, error = %err, "instance listing failed");
                })?;
        }
        Ok(series)
    }

    pub fn retrieve(
        &self,
        collection: Collection,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RetrieveResult, RetrieverError> {
        let started = Instant::now();
        let mut studies = collection.outcomes;

        for plan in &collection.plans {
            let outcome = match self.retrieve_study(plan, options, sink) {
                Ok(outcome) => outcome,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(study = %plan.study.uid, error = %err, "study skipped");
                    StudyOutcome::failed(&plan.term, Some(&plan.study), &plan.study_dir, &err)
                }
            };
            studies.push(outcome);
        }

        let elapsed = started.elapsed();
        sink.event(ProgressEvent {
            message: format!("phase=Done; {} studies", studies.len()),
            elapsed: Some(elapsed),
        });
        Ok(RetrieveResult {
            studies,
            skipped_terms: collection.skipped_terms,
            elapsed_ms: elapsed.as_millis(),
        })
    }

    fn retrieve_study(
        &self,
        plan: &StudyPlan,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<StudyOutcome, RetrieverError> {
        let started = Instant::now();
        let study_dir = &plan.study_dir;
        let state =
            self.layout
                .prepare_study_dir(study_dir, options.overwrite, options.delete_timeout)?;
        if state == StudyDirState::SkippedExisting {
            return Ok(StudyOutcome::new(
                &plan.term,
                Some(&plan.study),
                study_dir,
                StudyAction::SkippedExisting,
            ));
        }

        emit(
            sink,
            format!("phase=Fetch; study {} into {study_dir}", plan.study.uid),
        );
        let mut outcome =
            StudyOutcome::new(&plan.term, Some(&plan.study), study_dir, StudyAction::Downloaded);
        outcome.series_total = plan.series.len();

        let mut used = BTreeSet::new();
        let mut excluded = Vec::new();
        for series in &plan.series {
            tracing::debug!(series = %series.uid, "loading metadata");
            let provisional = study_dir.join(naming::safe_component(series.uid.as_str()));
            fs::create_dir_all(provisional.as_std_path())
                .map_err(|err| RetrieverError::Filesystem(format!("create {provisional}: {err}")))?;

            let xml = match self
                .archive
                .retrieve_series_metadata(&plan.study.uid, &series.uid)
            {
                Ok(xml) => xml,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(series = %series.uid, error = %err, "skipping series");
                    fs::remove_dir_all(provisional.as_std_path()).ok();
                    continue;
                }
            };
            fs::write(OutputLayout::metadata_path(&provisional).as_std_path(), &xml)
                .map_err(|err| RetrieverError::Filesystem(format!("write metadata: {err}")))?;

            let description = match metadata::parse_series_metadata(&xml) {
                Ok(fields) => {
                    tracing::debug!(
                        series = %series.uid,
                        number = fields.series_number.as_deref().unwrap_or("-"),
                        modality = fields.modality.as_deref().unwrap_or("-"),
                        "series metadata"
                    );
                    fields.description
                }
                Err(err) => {
                    tracing::warn!(series = %series.uid, error = %err, "unreadable metadata");
                    series.description.clone()
                }
            };
            let name =
                layout::name_series_dir(study_dir, &provisional, description.as_deref(), &mut used)?;

            if let Some(term) = naming::matching_exclude(&name, &options.exclude_terms) {
                tracing::debug!(folder = %name, term, "excluding series");
                excluded.push(name);
                continue;
            }
            outcome.series_loaded += 1;
            if options.metadata_only {
                continue;
            }

            tracing::debug!(folder = %name, "loading images");
            let series_dir = study_dir.join(&name);
            for (index, instance) in series.instances.iter().enumerate() {
                match self.fetch_instance(plan, series, instance, &series_dir, index, options) {
                    Ok(()) => outcome.images_loaded += 1,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::debug!(instance = %instance, error = %err, "skipped instance");
                        outcome.images_skipped += 1;
                    }
                }
            }
        }

        outcome.series_excluded = layout::move_to_others(study_dir, &excluded)?;
        outcome.elapsed_ms = started.elapsed().as_millis();
        tracing::info!(
            study = %plan.study.uid,
            series = %format!("{}/{}", outcome.series_loaded, outcome.series_total),
            images = outcome.images_loaded,
            skipped = outcome.images_skipped,
            "study loaded"
        );
        Ok(outcome)
    }

    fn fetch_instance(
        &self,
        plan: &StudyPlan,
        series: &Series,
        instance: &InstanceUid,
        series_dir: &Utf8Path,
        index: usize,
        options: &RunOptions,
    ) -> Result<(), RetrieverError> {
        let final_path = OutputLayout::instance_path(series_dir, index);
        let temp = tempfile::Builder::new()
            .prefix(".incoming-")
            .suffix(".dcm")
            .tempfile_in(series_dir.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
        self.archive
            .retrieve_instance(&plan.study.uid, &series.uid, instance, temp.path())?;
        if options.anonymize {
            self.anonymizer
                .anonymize(temp.path(), final_path.as_std_path())?;
        } else {
            temp.persist(final_path.as_std_path())
                .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}

/// Accession numbers identify one study; other searches keep up to `limit` studies.
fn select_studies(mut studies: Vec<Study>, options: &RunOptions) -> Vec<Study> {
    match (options.search_kind, options.limit) {
        (SearchKind::Accnum, _) => studies.truncate(1),
        (_, Some(limit)) => studies.truncate(limit),
        (_, None) => {}
    }
    studies
}

/// Removes repeated series identifiers; the first occurrence wins.
pub fn dedupe_series(series: Vec<Series>) -> Vec<Series> {
    let mut seen = HashSet::new();
    series
        .into_iter()
        .filter(|entry| seen.insert(entry.uid.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SeriesUid;

    fn series(uid: &str) -> Series {
        Series {
            uid: SeriesUid::new(uid),
            modality: None,
            description: None,
            number: None,
            instances: Vec::new(),
        }
    }

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let deduped = dedupe_series(vec![series("b"), series("a"), series("b"), series("c")]);
        let uids: Vec<&str> = deduped.iter().map(|s| s.uid.as_str()).collect();
        assert_eq!(uids, vec!["b", "a", "c"]);
    }

    #[test]
    fn retain_selected_drops_unflagged_plans() {
        let plan = |term: &str| StudyPlan {
            term: term.to_string(),
            study: Study {
                uid: crate::domain::StudyUid::new(term),
                accession_number: None,
                patient_id: None,
                description: None,
                study_date: None,
                modalities: Vec::new(),
            },
            study_dir: Utf8PathBuf::from(term),
            series: Vec::new(),
        };
        let mut collection = Collection {
            plans: vec![plan("a"), plan("b"), plan("c")],
            ..Collection::default()
        };
        collection.retain_selected(&[true, false]);
        assert_eq!(collection.plans.len(), 1);
        assert_eq!(collection.plans[0].term, "a");
    }
}
