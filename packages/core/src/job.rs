//! Job descriptor types for units of reading work.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
///
/// Doubles as the idempotency token handed to the remote batch service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported reading tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderName {
    Reach,
    Sparser,
    Isi,
    Trips,
    Eidos,
    Mti,
}

impl ReaderName {
    pub const ALL: [ReaderName; 6] = [
        ReaderName::Reach,
        ReaderName::Sparser,
        ReaderName::Isi,
        ReaderName::Trips,
        ReaderName::Eidos,
        ReaderName::Mti,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderName::Reach => "reach",
            ReaderName::Sparser => "sparser",
            ReaderName::Isi => "isi",
            ReaderName::Trips => "trips",
            ReaderName::Eidos => "eidos",
            ReaderName::Mti => "mti",
        }
    }

    /// Expand a reader selection such as `["reach", "sparser"]` or `["all"]`.
    ///
    /// Duplicates are dropped and the result keeps first-seen order.
    pub fn parse_selection<S: AsRef<str>>(items: &[S]) -> Result<Vec<ReaderName>, UnknownReader> {
        let mut selected = Vec::new();
        for item in items {
            let item = item.as_ref().trim();
            let expanded: Vec<ReaderName> = if item.eq_ignore_ascii_case("all") {
                Self::ALL.to_vec()
            } else {
                vec![item.parse()?]
            };
            for reader in expanded {
                if !selected.contains(&reader) {
                    selected.push(reader);
                }
            }
        }
        Ok(selected)
    }
}

impl std::fmt::Display for ReaderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a reader name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reader: {0}")]
pub struct UnknownReader(pub String);

impl FromStr for ReaderName {
    type Err = UnknownReader;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownReader(s.to_string()))
    }
}

/// Compute budget requested for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub vcpus: u32,
    pub memory_mb: u64,
    /// Wall-clock budget while Running, in seconds.
    pub timeout_secs: u64,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            vcpus: 1,
            memory_mb: 4096,
            timeout_secs: 6 * 60 * 60,
        }
    }
}

/// Opaque locator for a job's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputRef {
    /// A single object in object storage.
    Object { key: String },
    /// Files on the machine that runs the reader.
    LocalPaths { paths: Vec<String> },
    /// Slice `[start, end)` of an id list stored as an object.
    IdRange {
        list_key: String,
        start: usize,
        end: usize,
    },
}

impl std::fmt::Display for InputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputRef::Object { key } => f.write_str(key),
            InputRef::LocalPaths { paths } => f.write_str(&paths.join(",")),
            InputRef::IdRange {
                list_key,
                start,
                end,
            } => write!(f, "{list_key}:{start}:{end}"),
        }
    }
}

/// Immutable description of one unit of reading work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    id: JobId,
    name: String,
    run_id: String,
    reader: ReaderName,
    input: InputRef,
    resources: ResourceSpec,
    created_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(
        run_id: impl Into<String>,
        name: impl Into<String>,
        reader: ReaderName,
        input: InputRef,
        resources: ResourceSpec,
    ) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            run_id: run_id.into(),
            reader,
            input,
            resources,
            created_at: Utc::now(),
        }
    }

    /// A copy of this descriptor under a fresh id.
    ///
    /// This is the only way a terminal job runs again.
    pub fn resubmission(&self) -> Self {
        Self {
            id: JobId::new(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn reader(&self) -> ReaderName {
        self.reader
    }

    pub fn input(&self) -> &InputRef {
        &self.input
    }

    pub fn resources(&self) -> &ResourceSpec {
        &self.resources
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Object-storage key where the reader is expected to leave its output.
    pub fn output_key(&self) -> String {
        format!("reading_results/{}/{}/output.json", self.reader, self.id)
    }
}
