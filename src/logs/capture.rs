use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use crate::logs::writer::{LineFormatter, LogFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Longest entry written for a single line; longer output is split
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Resolved log file locations for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub out: PathBuf,
    pub err: PathBuf,
    pub combined: Option<PathBuf>,
}

impl LogPaths {
    /// Resolve the log files for instance `index` of `spec`
    ///
    /// Unset stdout/stderr paths fall back to `<default_dir>/<name>-out.log`
    /// and `<default_dir>/<name>-error.log`. With several instances and
    /// `merge_logs` off, every path gets a `-<index>` suffix.
    pub fn for_instance(spec: &ProcessSpec, index: usize, default_dir: &Path) -> Self {
        let out = spec
            .out_file
            .clone()
            .unwrap_or_else(|| default_dir.join(format!("{}-out.log", spec.name)));
        let err = spec
            .error_file
            .clone()
            .unwrap_or_else(|| default_dir.join(format!("{}-error.log", spec.name)));
        let combined = spec.log_file.clone();

        if spec.instances > 1 && !spec.merge_logs {
            Self {
                out: with_instance_suffix(&out, index),
                err: with_instance_suffix(&err, index),
                combined: combined.map(|p| with_instance_suffix(&p, index)),
            }
        } else {
            Self { out, err, combined }
        }
    }
}

fn with_instance_suffix(path: &Path, index: usize) -> PathBuf {
    if path.starts_with("/dev") {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}-{}", stem, index),
    };
    path.with_file_name(file_name)
}

/// The open log files of one process generation
///
/// Cloning shares the same handles; the files close once the last clone
/// (normally held by the capture tasks) is dropped.
#[derive(Debug, Clone)]
pub struct InstanceLogs {
    out: Arc<LogFile>,
    err: Arc<LogFile>,
    combined: Option<Arc<LogFile>>,
    formatter: LineFormatter,
}

impl InstanceLogs {
    /// Open every configured log file in append mode
    ///
    /// Paths that name the same file share one handle (and one lock).
    pub async fn open(paths: &LogPaths, formatter: LineFormatter) -> Result<Self> {
        let out = LogFile::open(&paths.out).await?;
        let err = if paths.err == paths.out {
            out.clone()
        } else {
            LogFile::open(&paths.err).await?
        };
        let combined = match &paths.combined {
            Some(path) if *path == paths.out => Some(out.clone()),
            Some(path) if *path == paths.err => Some(err.clone()),
            Some(path) => Some(LogFile::open(path).await?),
            None => None,
        };

        Ok(Self {
            out,
            err,
            combined,
            formatter,
        })
    }

    /// Write one line of process output to its stream file and the combined file
    pub async fn write(&self, stream: LogStream, data: &[u8]) -> Result<()> {
        let entry = self.formatter.format(data);

        let target = match stream {
            LogStream::Stdout => &self.out,
            LogStream::Stderr => &self.err,
        };
        target.write_entry(&entry).await?;

        match &self.combined {
            Some(combined) if !Arc::ptr_eq(combined, target) => {
                combined.write_entry(&entry).await?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Record a supervisor message (launch failure, give-up) in the instance's error logs
    pub async fn note(&self, message: &str) -> Result<()> {
        let line = format!("[warden] {}", message);
        self.write(LogStream::Stderr, line.as_bytes()).await
    }

    /// Take the child's stdout/stderr pipes and copy them line by line into the log files
    ///
    /// The first failed write of each stream is reported through
    /// [`LogCapture::write_failure`]; later output of that stream is discarded.
    pub fn capture(&self, child: &mut Child) -> Result<LogCapture> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WardenError::LogFileError("No stdout pipe available".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WardenError::LogFileError("No stderr pipe available".to_string()))?;

        let (failure_tx, failure_rx) = mpsc::channel(2);
        let tasks = vec![
            tokio::spawn(copy_lines(
                stdout,
                self.clone(),
                LogStream::Stdout,
                failure_tx.clone(),
            )),
            tokio::spawn(copy_lines(stderr, self.clone(), LogStream::Stderr, failure_tx)),
        ];

        Ok(LogCapture {
            tasks,
            failures: failure_rx,
        })
    }
}

/// Background task copying one pipe into the log files until EOF
///
/// The pipe keeps being read after a write failure so the child never
/// blocks on a full pipe while the supervisor stops it.
async fn copy_lines<R>(
    pipe: R,
    logs: InstanceLogs,
    stream: LogStream,
    failures: mpsc::Sender<WardenError>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    let mut failed = false;

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut line)
            .await;

        match read {
            // EOF - process closed the pipe
            Ok(0) => break,
            Ok(_) if failed => {}
            Ok(_) => {
                if let Err(e) = logs.write(stream, &line).await {
                    error!("Writing {:?} output failed: {}", stream, e);
                    failed = true;
                    let _ = failures.try_send(e);
                }
            }
            Err(e) => {
                debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

/// Handles of the capture tasks for one process generation
#[derive(Debug)]
pub struct LogCapture {
    tasks: Vec<JoinHandle<()>>,
    failures: mpsc::Receiver<WardenError>,
}

impl LogCapture {
    /// Resolves with the first log write error of this generation
    ///
    /// Returns `None` once both streams have ended without one.
    pub async fn write_failure(&mut self) -> Option<WardenError> {
        self.failures.recv().await
    }

    /// Wait for the capture tasks to reach EOF and release their file handles
    ///
    /// Output still held open by an orphaned grandchild would keep the pipes
    /// alive forever, so after `limit` the tasks are aborted instead.
    /// Returns `false` when that happened.
    pub async fn drain(mut self, limit: Duration) -> bool {
        let finished = tokio::time::timeout(limit, async {
            for task in self.tasks.iter_mut() {
                let _ = task.await;
            }
        })
        .await
        .is_ok();

        if !finished {
            for task in &self.tasks {
                task.abort();
            }
            for task in self.tasks.drain(..) {
                let _ = task.await;
            }
        }

        finished
    }
}
