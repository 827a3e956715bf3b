//! Reader capability trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use reading_core::{InputRef, JobId, ReaderName};
use storage::Storage;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Result type for reader runs: the output reference on success.
pub type ReaderResult = Result<String, String>;

/// Future type for async reader runs.
pub type ReaderFuture = Pin<Box<dyn Future<Output = ReaderResult> + Send>>;

/// Shared, append-only log of one job's output lines.
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-run context handed to a reader.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    pub job_id: JobId,
    pub job_name: String,
    /// Object-storage key the output must be written to.
    pub output_key: String,
    pub log: JobLog,
}

/// A reading tool the batch backend can run.
///
/// Implement this trait once per tool; the core treats all of them alike.
pub trait Reader: Send + Sync + 'static {
    /// The reader this implementation runs.
    fn name(&self) -> ReaderName;

    /// Whether the tool can run on this machine right now.
    fn is_available(&self) -> bool;

    /// Run the tool over `input` and return the output reference.
    fn run(&self, input: &InputRef, ctx: ReaderContext) -> ReaderFuture;
}

/// Registry of reader implementations keyed by reader name.
#[derive(Default)]
pub struct ReaderRegistry {
    readers: HashMap<ReaderName, Arc<dyn Reader>>,
}

impl ReaderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Register a reader, replacing any previous one with the same name.
    pub fn register<R: Reader>(&mut self, reader: R) {
        self.readers.insert(reader.name(), Arc::new(reader));
    }

    pub fn get(&self, name: ReaderName) -> Option<Arc<dyn Reader>> {
        self.readers.get(&name).cloned()
    }

    pub fn has_reader(&self, name: ReaderName) -> bool {
        self.readers.contains_key(&name)
    }

    /// Registered reader names in declaration order.
    pub fn names(&self) -> Vec<ReaderName> {
        let mut names: Vec<ReaderName> = self.readers.keys().copied().collect();
        names.sort();
        names
    }

    /// Registered readers that report themselves available.
    pub fn available(&self) -> Vec<ReaderName> {
        self.names()
            .into_iter()
            .filter(|n| self.readers.get(n).is_some_and(|r| r.is_available()))
            .collect()
    }
}

/// A closure-backed reader.
pub struct FnReader<F>
where
    F: Fn(&InputRef, ReaderContext) -> ReaderFuture + Send + Sync + 'static,
{
    name: ReaderName,
    run: F,
}

impl<F> FnReader<F>
where
    F: Fn(&InputRef, ReaderContext) -> ReaderFuture + Send + Sync + 'static,
{
    pub fn new(name: ReaderName, run: F) -> Self {
        Self { name, run }
    }
}

impl<F> Reader for FnReader<F>
where
    F: Fn(&InputRef, ReaderContext) -> ReaderFuture + Send + Sync + 'static,
{
    fn name(&self) -> ReaderName {
        self.name
    }

    fn is_available(&self) -> bool {
        true
    }

    fn run(&self, input: &InputRef, ctx: ReaderContext) -> ReaderFuture {
        (self.run)(input, ctx)
    }
}

/// Runs an external program and uploads the file it writes.
///
/// Arguments may contain `{input}`, `{output}` and `{job}` placeholders;
/// `{output}` is a scratch file that is uploaded to the job's output key
/// once the program exits successfully.
pub struct CommandReader {
    name: ReaderName,
    program: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
    storage: Storage,
}

impl CommandReader {
    pub fn new(name: ReaderName, program: impl Into<PathBuf>, storage: Storage) -> Self {
        Self {
            name,
            program: program.into(),
            args: vec!["{input}".to_string(), "{output}".to_string()],
            work_dir: std::env::temp_dir().join("reading-batch"),
            storage,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    fn render_args(&self, input: &InputRef, job_name: &str, output: &Path) -> Vec<String> {
        let input = input.to_string();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{job}", job_name)
            })
            .collect()
    }
}

impl Reader for CommandReader {
    fn name(&self) -> ReaderName {
        self.name
    }

    fn is_available(&self) -> bool {
        if self.program.components().count() > 1 {
            return self.program.is_file();
        }
        std::env::var_os("PATH").is_some_and(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(&self.program).is_file())
        })
    }

    fn run(&self, input: &InputRef, ctx: ReaderContext) -> ReaderFuture {
        let output_path = self.work_dir.join(format!("{}.out", ctx.job_id));
        let args = self.render_args(input, &ctx.job_name, &output_path);
        let program = self.program.clone();
        let work_dir = self.work_dir.clone();
        let storage = self.storage.clone();
        let name = self.name;

        Box::pin(async move {
            tokio::fs::create_dir_all(&work_dir)
                .await
                .map_err(|e| format!("cannot create {}: {e}", work_dir.display()))?;

            let mut child = tokio::process::Command::new(&program)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| format!("failed to start {}: {e}", program.display()))?;

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let (status, (), ()) = tokio::join!(
                child.wait(),
                pump_lines(stdout, ctx.log.clone()),
                pump_lines(stderr, ctx.log.clone()),
            );
            let status = status.map_err(|e| format!("{name} wait failed: {e}"))?;
            if !status.success() {
                return Err(format!("{name} exited with {status}"));
            }

            let bytes = tokio::fs::read(&output_path)
                .await
                .map_err(|e| format!("{name} left no output at {}: {e}", output_path.display()))?;
            storage
                .put_bytes(&ctx.output_key, Bytes::from(bytes))
                .await
                .map_err(|e| format!("upload of {} failed: {e}", ctx.output_key))?;
            if let Err(e) = tokio::fs::remove_file(&output_path).await {
                tracing::debug!("Could not remove {}: {}", output_path.display(), e);
            }

            Ok(ctx.output_key)
        })
    }
}

async fn pump_lines<R>(reader: Option<R>, log: JobLog)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log.push(line);
    }
}
