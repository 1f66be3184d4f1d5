//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{
    is_progress_line, parse_progress_line, FfmpegProgress, ProgressThrottle, RenderProgress,
    DEFAULT_PROGRESS_THROTTLE,
};

/// Number of diagnostic stderr lines kept for error reports.
pub const STDERR_TAIL_LINES: usize = 20;

/// Grace period for the stderr reader to drain after the process ends.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One `-i` input with the arguments that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegInput {
    pub args: Vec<String>,
    pub source: String,
}

impl FfmpegInput {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            args: Vec::new(),
            source: path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// A libavfilter source such as `anullsrc=r=48000:cl=stereo`.
    pub fn lavfi(source: impl Into<String>) -> Self {
        Self {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: source.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in index order
    inputs: Vec<FfmpegInput>,
    /// Output file path
    output: PathBuf,
    /// Arguments placed before every input
    global_args: Vec<String>,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            global_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Append an input; returns its index.
    pub fn push_input(&mut self, input: FfmpegInput) -> usize {
        self.inputs.push(input);
        self.inputs.len() - 1
    }

    /// Add an input file.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.push_input(FfmpegInput::file(path));
        self
    }

    /// Add global arguments (before the first -i).
    pub fn global_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after the last -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, label: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(label)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn inputs(&self) -> &[FfmpegInput] {
        &self.inputs
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Overwrite flag
        if self.overwrite {
            args.push("-y".to_string());
        }

        // Log level
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.global_args.iter().cloned());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        // Output args
        args.extend(self.output_args.iter().cloned());

        // Output file
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Ring buffer of the last diagnostic lines FFmpeg printed.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a stderr line; progress lines and blanks are skipped.
    pub fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() || is_progress_line(line) || self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(STDERR_TAIL_LINES)
    }
}

/// Where parsed progress goes while the process runs.
#[derive(Debug, Clone)]
struct ProgressSink {
    tx: mpsc::Sender<RenderProgress>,
    expected_duration: f64,
}

struct ReaderOutcome {
    tail: StderrTail,
    sent_final: bool,
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled(&'static str),
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// FFmpeg binary, bare name resolved on PATH
    program: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Wall-clock limit
    timeout: Option<Duration>,
    progress: Option<ProgressSink>,
    throttle: Duration,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            cancel_rx: None,
            timeout: None,
            progress: None,
            throttle: DEFAULT_PROGRESS_THROTTLE,
        }
    }

    /// Use a specific FFmpeg binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stream progress as a percentage of `expected_duration` seconds.
    ///
    /// Dropping the receiver stops the process.
    pub fn with_progress(
        mut self,
        tx: mpsc::Sender<RenderProgress>,
        expected_duration: f64,
    ) -> Self {
        self.progress = Some(ProgressSink {
            tx,
            expected_duration,
        });
        self
    }

    /// Minimum interval between progress events.
    pub fn with_throttle(mut self, interval: Duration) -> Self {
        self.throttle = interval;
        self
    }

    /// Locate the configured binary.
    pub fn resolve_program(&self) -> MediaResult<PathBuf> {
        resolve_binary(&self.program)
    }

    /// Run an FFmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let program = self.resolve_program()?;
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", program.display(), args.join(" "));

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::ProcessSpawn(format!("{}: {}", program.display(), e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ProcessSpawn("stderr not captured".to_string()))?;

        let mut reader = tokio::spawn(read_stderr(stderr, self.progress.clone(), self.throttle));

        let outcome = self.wait_for_completion(&mut child).await;

        // A grandchild can keep stderr open after the kill; the reader owns a
        // progress sender, so it must not outlive this call.
        let reader_outcome = match &outcome {
            Ok(WaitOutcome::Exited(_)) => drain_reader(&mut reader).await,
            _ => {
                reader.abort();
                None
            }
        };

        match outcome? {
            WaitOutcome::Exited(status) if status.success() => {
                let sent_final = reader_outcome.as_ref().is_some_and(|r| r.sent_final);
                if let (Some(sink), false) = (&self.progress, sent_final) {
                    let _ = sink.tx.send(final_event(sink.expected_duration)).await;
                }
                Ok(())
            }
            WaitOutcome::Exited(status) => {
                let tail = reader_outcome.map(|r| r.tail.render()).unwrap_or_default();
                Err(MediaError::process_exit(status.code(), tail))
            }
            WaitOutcome::TimedOut => {
                let ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                Err(MediaError::Timeout(ms))
            }
            WaitOutcome::Cancelled(_) => Err(MediaError::Cancelled),
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<WaitOutcome> {
        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);
        let progress_tx = self.progress.as_ref().map(|sink| sink.tx.clone());

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status?),
            _ = sleep_until(deadline) => WaitOutcome::TimedOut,
            _ = cancelled(self.cancel_rx.clone()) => WaitOutcome::Cancelled("cancel signal"),
            _ = receiver_closed(progress_tx) => WaitOutcome::Cancelled("progress receiver closed"),
        };

        match &outcome {
            WaitOutcome::Exited(_) => {}
            WaitOutcome::TimedOut => {
                warn!(
                    timeout_ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
                    "FFmpeg timed out, killing process"
                );
                let _ = child.kill().await;
            }
            WaitOutcome::Cancelled(reason) => {
                info!(reason = *reason, "FFmpeg cancelled, killing process");
                let _ = child.kill().await;
            }
        }

        Ok(outcome)
    }
}

/// Wait briefly for the stderr reader, aborting it if stderr stays open.
async fn drain_reader(reader: &mut JoinHandle<ReaderOutcome>) -> Option<ReaderOutcome> {
    match tokio::time::timeout(READER_DRAIN_GRACE, &mut *reader).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            warn!("FFmpeg stderr reader failed: {}", e);
            None
        }
        Err(_) => {
            warn!("FFmpeg stderr reader did not drain in time, aborting it");
            reader.abort();
            None
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling
            return std::future::pending().await;
        }
    }
}

async fn receiver_closed(tx: Option<mpsc::Sender<RenderProgress>>) {
    match tx {
        Some(tx) => tx.closed().await,
        None => std::future::pending().await,
    }
}

fn final_event(expected_duration: f64) -> RenderProgress {
    RenderProgress {
        percent: 100.0,
        out_time_secs: expected_duration.max(0.0),
        speed: 0.0,
        eta_secs: Some(0.0),
        is_complete: true,
    }
}

async fn read_stderr(
    stderr: ChildStderr,
    sink: Option<ProgressSink>,
    throttle_interval: Duration,
) -> ReaderOutcome {
    let mut reader = BufReader::new(stderr).lines();
    let mut tail = StderrTail::default();
    let mut current = FfmpegProgress::default();
    let mut throttle = ProgressThrottle::new(throttle_interval);
    let mut sink = sink;
    let mut sent_final = false;

    while let Ok(Some(line)) = reader.next_line().await {
        let Some(snapshot) = parse_progress_line(&line, &mut current) else {
            tail.push(&line);
            continue;
        };

        let Some(active) = sink.as_ref() else {
            continue;
        };

        let percent = snapshot.percentage(active.expected_duration);
        let is_final = snapshot.is_complete;
        let percent = if is_final { 100.0 } else { percent };
        if let Some(percent) = throttle.observe(Instant::now(), percent, is_final) {
            let event = RenderProgress {
                percent,
                out_time_secs: snapshot.out_time_secs(),
                speed: snapshot.speed,
                eta_secs: snapshot.eta_seconds(active.expected_duration),
                is_complete: is_final,
            };
            if active.tx.send(event).await.is_err() {
                // Receiver gone; keep draining stderr for the tail
                sink = None;
            } else if is_final {
                sent_final = true;
            }
        }
    }

    ReaderOutcome { tail, sent_final }
}

fn resolve_binary(program: &Path) -> MediaResult<PathBuf> {
    if program.components().count() > 1 {
        if program.is_file() {
            return Ok(program.to_path_buf());
        }
        return Err(MediaError::FfmpegNotFound(program.display().to_string()));
    }
    which::which(program).map_err(|_| MediaError::FfmpegNotFound(program.display().to_string()))
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    resolve_binary(Path::new("ffmpeg"))
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let mut cmd = FfmpegCommand::new("out.mp4");
        let intro = cmd.push_input(FfmpegInput::file("intro.mp4"));
        let silence = cmd.push_input(
            FfmpegInput::lavfi("anullsrc=r=48000:cl=stereo").with_args(["-t", "3.000"]),
        );
        let cmd = cmd
            .global_args(["-hwaccel", "cuda"])
            .filter_complex("[0:v]null[vout]")
            .map("[vout]");

        assert_eq!(intro, 0);
        assert_eq!(silence, 1);

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        let progress = args.iter().position(|a| a == "-progress").unwrap();
        assert_eq!(args[progress + 1], "pipe:2");

        // Global args precede every input
        let hw = args.iter().position(|a| a == "-hwaccel").unwrap();
        let first_input = args.iter().position(|a| a == "-i").unwrap();
        assert!(hw < first_input);

        // Per-input args precede their -i
        let lavfi = args.iter().position(|a| a == "lavfi").unwrap();
        let silence_src = args
            .iter()
            .position(|a| a == "anullsrc=r=48000:cl=stereo")
            .unwrap();
        assert!(lavfi < silence_src);
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_stderr_tail_keeps_last_diagnostics() {
        let mut tail = StderrTail::new(3);
        for i in 0..5 {
            tail.push(&format!("error line {i}"));
            tail.push("out_time=00:00:01.000000");
            tail.push("progress=continue");
        }
        tail.push("   ");

        assert_eq!(tail.len(), 3);
        assert_eq!(tail.render(), "error line 2\nerror line 3\nerror line 4");
    }

    #[test]
    fn test_missing_binary() {
        let runner = FfmpegRunner::new().with_program("/nonexistent/bin/ffmpeg");
        let err = runner.resolve_program().unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
        assert!(err.is_pre_spawn());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn stub(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_run_streams_progress() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(
                dir.path(),
                "echo 'out_time_us=5000000' >&2\n\
                 echo 'progress=continue' >&2\n\
                 echo 'out_time_us=10000000' >&2\n\
                 echo 'progress=end' >&2\n\
                 exit 0",
            );
            let (tx, mut rx) = mpsc::channel(16);
            let runner = FfmpegRunner::new()
                .with_program(program)
                .with_throttle(Duration::ZERO)
                .with_progress(tx, 10.0);

            runner
                .run(&FfmpegCommand::new(dir.path().join("out.mp4")))
                .await
                .unwrap();
            drop(runner);

            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            assert_eq!(events.len(), 2);
            assert!((events[0].percent - 50.0).abs() < 0.01);
            assert_eq!(events[1].percent, 100.0);
            assert!(events[1].is_complete);
        }

        #[tokio::test]
        async fn test_non_zero_exit_reports_tail() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(
                dir.path(),
                "echo 'content.mp4: Invalid data found when processing input' >&2\nexit 1",
            );
            let runner = FfmpegRunner::new().with_program(program);

            let err = runner
                .run(&FfmpegCommand::new(dir.path().join("out.mp4")))
                .await
                .unwrap_err();
            match err {
                MediaError::ProcessExit { code, stderr_tail } => {
                    assert_eq!(code, Some(1));
                    assert!(stderr_tail.contains("Invalid data found"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(dir.path(), "exec sleep 30");
            let runner = FfmpegRunner::new()
                .with_program(program)
                .with_timeout(Duration::from_millis(200));

            let started = Instant::now();
            let err = runner
                .run(&FfmpegCommand::new(dir.path().join("out.mp4")))
                .await
                .unwrap_err();
            assert!(err.is_timeout());
            assert!(err.to_string().contains("timed out"));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_timeout_releases_progress_channel_when_grandchild_holds_stderr() {
            let dir = tempfile::tempdir().unwrap();
            // No exec: the shell's sleep child keeps stderr open after the kill
            let program = stub(dir.path(), "sleep 15");
            let (tx, mut rx) = mpsc::channel(16);
            let runner = FfmpegRunner::new()
                .with_program(program)
                .with_timeout(Duration::from_millis(200))
                .with_progress(tx, 10.0);

            let started = Instant::now();
            let err = runner
                .run(&FfmpegCommand::new(dir.path().join("out.mp4")))
                .await
                .unwrap_err();
            assert!(err.is_timeout());
            drop(runner);

            let closed = tokio::time::timeout(Duration::from_secs(3), async {
                while rx.recv().await.is_some() {}
            })
            .await;
            assert!(closed.is_ok(), "progress channel still open after timeout");
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_cancel_signal_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(dir.path(), "exec sleep 30");
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let runner = FfmpegRunner::new()
                .with_program(program)
                .with_cancel(cancel_rx);

            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = cancel_tx.send(true);
            });

            let started = Instant::now();
            let err = runner
                .run(&FfmpegCommand::new(dir.path().join("out.mp4")))
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::Cancelled));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_closed_receiver_stops_process() {
            let dir = tempfile::tempdir().unwrap();
            let program = stub(dir.path(), "exec sleep 30");
            let (tx, rx) = mpsc::channel(1);
            drop(rx);
            let runner = FfmpegRunner::new()
                .with_program(program)
                .with_progress(tx, 10.0);

            let err = runner
                .run(&FfmpegCommand::new(dir.path().join("out.mp4")))
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::Cancelled));
        }
    }
}
