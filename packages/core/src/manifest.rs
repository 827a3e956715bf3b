//! Input manifest and descriptor generation.

use serde::{Deserialize, Serialize};

use crate::{InputRef, JobDescriptor, ReaderName, ResourceSpec, UnknownReader};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid manifest json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownReader(#[from] UnknownReader),

    #[error("manifest run_id must not be empty")]
    MissingRunId,

    #[error("manifest selects no readers")]
    NoReaders,

    #[error("manifest has no inputs")]
    NoInputs,

    #[error("ids_per_job must be greater than zero")]
    ZeroChunk,

    #[error("id range {start}..{end} is empty or outside 0..{count}")]
    BadRange {
        start: usize,
        end: usize,
        count: usize,
    },
}

/// An id list stored as one object, read in fixed-size slices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdListSource {
    /// Object key of the newline separated id list.
    pub key: String,
    /// Number of ids in the list.
    pub count: usize,
    #[serde(default = "default_ids_per_job")]
    pub ids_per_job: usize,
    #[serde(default)]
    pub start_ix: usize,
    #[serde(default)]
    pub end_ix: Option<usize>,
}

fn default_ids_per_job() -> usize {
    3000
}

fn default_readers() -> Vec<String> {
    vec!["all".to_string()]
}

/// Batch definition: inputs crossed with a reader selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    #[serde(default = "default_readers")]
    pub readers: Vec<String>,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_list: Option<IdListSource>,
}

impl Manifest {
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Replace the reader selection, e.g. from a command-line override.
    pub fn with_readers(mut self, readers: Vec<String>) -> Self {
        self.readers = readers;
        self
    }

    /// Every (job name, input) pair the manifest describes, before readers
    /// are applied.
    fn named_inputs(&self) -> Result<Vec<(String, InputRef)>, ManifestError> {
        let mut named: Vec<(String, InputRef)> = self
            .inputs
            .iter()
            .enumerate()
            .map(|(ix, input)| (format!("{}_{ix}", self.run_id), input.clone()))
            .collect();

        if let Some(list) = &self.id_list {
            if list.ids_per_job == 0 {
                return Err(ManifestError::ZeroChunk);
            }
            let end = list.end_ix.unwrap_or(list.count).min(list.count);
            if list.start_ix >= end {
                return Err(ManifestError::BadRange {
                    start: list.start_ix,
                    end,
                    count: list.count,
                });
            }
            let mut start = list.start_ix;
            while start < end {
                let stop = start.saturating_add(list.ids_per_job).min(end);
                named.push((
                    format!("{}_{start}_{stop}", self.run_id),
                    InputRef::IdRange {
                        list_key: list.key.clone(),
                        start,
                        end: stop,
                    },
                ));
                start = stop;
            }
        }

        if named.is_empty() {
            return Err(ManifestError::NoInputs);
        }
        Ok(named)
    }

    /// Expand into one descriptor per input and selected reader.
    pub fn descriptors(&self) -> Result<Vec<JobDescriptor>, ManifestError> {
        if self.run_id.trim().is_empty() {
            return Err(ManifestError::MissingRunId);
        }
        let readers = ReaderName::parse_selection(&self.readers)?;
        if readers.is_empty() {
            return Err(ManifestError::NoReaders);
        }

        let named = self.named_inputs()?;
        let mut out = Vec::with_capacity(named.len() * readers.len());
        for (base, input) in named {
            for reader in &readers {
                out.push(JobDescriptor::new(
                    &self.run_id,
                    format!("{base}_{reader}"),
                    *reader,
                    input.clone(),
                    self.resources,
                ));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn id_list_is_chunked_with_short_tail() {
        let manifest = Manifest::from_json(
            r#"{
                "run_id": "pmc",
                "readers": ["reach", "sparser"],
                "id_list": {"key": "pmc/ids", "count": 7000}
            }"#,
        )
        .unwrap();
        let jobs = manifest.descriptors().unwrap();
        assert_eq!(jobs.len(), 6);
        let names: Vec<&str> = jobs.iter().map(|j| j.name()).collect();
        assert!(names.contains(&"pmc_0_3000_reach"));
        assert!(names.contains(&"pmc_6000_7000_sparser"));
        assert_eq!(
            jobs.last().map(|j| j.input().clone()),
            Some(InputRef::IdRange {
                list_key: "pmc/ids".into(),
                start: 6000,
                end: 7000
            })
        );
    }

    #[test]
    fn explicit_inputs_default_to_all_readers() {
        let manifest = Manifest::from_json(
            r#"{
                "run_id": "small",
                "inputs": [{"kind": "object", "key": "in/a.nxml"}],
                "resources": {"memory_mb": 16000}
            }"#,
        )
        .unwrap();
        let jobs = manifest.descriptors().unwrap();
        assert_eq!(jobs.len(), ReaderName::ALL.len());
        assert_eq!(jobs[0].resources().memory_mb, 16000);
        assert_eq!(jobs[0].resources().vcpus, 1);
        assert_eq!(jobs[0].name(), "small_0_reach");
    }

    #[test]
    fn end_index_is_clamped_to_count() {
        let manifest = Manifest {
            run_id: "r".into(),
            readers: vec!["isi".into()],
            resources: ResourceSpec::default(),
            inputs: Vec::new(),
            id_list: Some(IdListSource {
                key: "ids".into(),
                count: 10,
                ids_per_job: 4,
                start_ix: 2,
                end_ix: Some(50),
            }),
        };
        let names: Vec<String> = manifest
            .descriptors()
            .unwrap()
            .iter()
            .map(|j| j.name().to_string())
            .collect();
        assert_eq!(names, ["r_2_6_isi", "r_6_10_isi"]);
    }

    #[test]
    fn huge_chunk_size_yields_one_job() {
        let manifest = Manifest::from_json(
            r#"{
                "run_id": "r",
                "readers": ["reach"],
                "id_list": {"key": "k", "count": 10, "start_ix": 2, "ids_per_job": 18446744073709551615}
            }"#,
        )
        .unwrap();
        let jobs = manifest.descriptors().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name(), "r_2_10_reach");
    }

    #[test]
    fn rejects_empty_manifest() {
        let manifest = Manifest::from_json(r#"{"run_id": "r"}"#).unwrap();
        assert!(matches!(manifest.descriptors(), Err(ManifestError::NoInputs)));
    }

    #[test]
    fn rejects_zero_chunk() {
        let manifest = Manifest::from_json(
            r#"{"run_id": "r", "id_list": {"key": "k", "count": 3, "ids_per_job": 0}}"#,
        )
        .unwrap();
        assert!(matches!(manifest.descriptors(), Err(ManifestError::ZeroChunk)));
    }
}
