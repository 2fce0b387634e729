//! Delegation to external tools: yt-dlp for platform pages, ffmpeg for
//! HLS/DASH manifests.
//!
//! Each tool is a black box: it gets the source URL and an output location
//! and either exits 0 leaving a finished file, or fails. Stopping a task
//! kills the child.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as AsyncCommand;

use crate::config::ExternalConfig;
use crate::control::{StopReason, StopToken};
use crate::task::ExternalTool;

/// Lines of stderr kept for the failure cause.
const STDERR_TAIL: usize = 8;
const STOP_POLL: Duration = Duration::from_millis(100);

/// Where the tool should write.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// Exact file path.
    File(PathBuf),
    /// Directory; the tool picks the name (extractor) or it is derived from the URL (muxer).
    Directory(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program} reported success but produced no file at {}", .path.display())]
    MissingOutput { program: String, path: PathBuf },
    #[error("i/o error waiting for external tool: {0}")]
    Io(#[from] std::io::Error),
}

/// How a delegated run ended without error.
#[derive(Debug)]
pub enum ExternalOutcome {
    Finished(PathBuf),
    Stopped(StopReason),
}

fn program_name(cfg: &ExternalConfig, tool: ExternalTool) -> &Path {
    match tool {
        ExternalTool::Extractor => &cfg.ytdlp_path,
        ExternalTool::StreamMuxer => &cfg.ffmpeg_path,
    }
}

/// Output file for the muxer when only a directory was given: the manifest
/// name with the container extension (`master.m3u8` → `master.mp4`).
pub fn muxer_output_name(url: &str, merge_format: &str) -> String {
    let stem = crate::url_model::filename_from_url_path(url)
        .map(|name| match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name,
        })
        .map(|s| crate::url_model::sanitize_filename(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "stream".to_string());
    format!("{}.{}", stem, merge_format)
}

/// Argument vector for `tool`. Exposed for tests and for logging the exact command.
pub fn build_args(
    cfg: &ExternalConfig,
    tool: ExternalTool,
    url: &str,
    target: &OutputTarget,
    proxy: Option<&str>,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match tool {
        ExternalTool::Extractor => {
            args.extend(["-f".into(), cfg.ytdlp_format.clone()]);
            match target {
                OutputTarget::File(p) => {
                    args.extend(["-o".into(), p.to_string_lossy().into_owned()]);
                }
                OutputTarget::Directory(d) => {
                    args.extend([
                        "-P".into(),
                        d.to_string_lossy().into_owned(),
                        "-o".into(),
                        "%(title)s.%(ext)s".into(),
                    ]);
                }
            }
            args.extend([
                "--newline".into(),
                "--no-colors".into(),
                "--no-playlist".into(),
                "--merge-output-format".into(),
                cfg.merge_format.clone(),
                "--ffmpeg-location".into(),
                cfg.ffmpeg_path.to_string_lossy().into_owned(),
                "--print".into(),
                "after_move:filepath".into(),
            ]);
            if let Some(proxy) = proxy {
                args.extend(["--proxy".into(), proxy.to_string()]);
            }
            args.push(url.to_string());
        }
        ExternalTool::StreamMuxer => {
            let out = match target {
                OutputTarget::File(p) => p.clone(),
                OutputTarget::Directory(d) => d.join(muxer_output_name(url, &cfg.merge_format)),
            };
            args.extend([
                "-hide_banner".into(),
                "-loglevel".into(),
                "error".into(),
                "-y".into(),
            ]);
            if let Some(proxy) = proxy {
                args.extend(["-http_proxy".into(), proxy.to_string()]);
            }
            args.extend([
                "-i".into(),
                url.to_string(),
                "-c".into(),
                "copy".into(),
                out.to_string_lossy().into_owned(),
            ]);
        }
    }
    args
}

/// Path the tool is expected to produce, if it can be known up front.
pub fn expected_output(cfg: &ExternalConfig, tool: ExternalTool, url: &str, target: &OutputTarget) -> Option<PathBuf> {
    match (tool, target) {
        (_, OutputTarget::File(p)) => Some(p.clone()),
        (ExternalTool::StreamMuxer, OutputTarget::Directory(d)) => {
            Some(d.join(muxer_output_name(url, &cfg.merge_format)))
        }
        (ExternalTool::Extractor, OutputTarget::Directory(_)) => None,
    }
}

/// Run `tool` to completion, or until `stop` is raised.
pub async fn run_external(
    cfg: &ExternalConfig,
    tool: ExternalTool,
    url: &str,
    target: &OutputTarget,
    proxy: Option<&str>,
    stop: &StopToken,
) -> Result<ExternalOutcome, ExternalError> {
    let program = program_name(cfg, tool);
    let program_str = program.to_string_lossy().into_owned();
    let args = build_args(cfg, tool, url, target, proxy);
    tracing::info!(program = %program_str, ?args, "starting external tool");

    let mut child = AsyncCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExternalError::Spawn {
            program: program_str.clone(),
            source,
        })?;

    let stderr_tail: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
    let stderr_task = child.stderr.take().map(|stderr| {
        let tail = Arc::clone(&stderr_tail);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "mergen_core::external", "{}", line);
                let mut t = tail.lock().unwrap_or_else(|e| e.into_inner());
                if t.len() == STDERR_TAIL {
                    t.pop_front();
                }
                t.push_back(line);
            }
        })
    });
    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(async move {
            let mut last_path: Option<String> = None;
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(target: "mergen_core::external", "{}", line);
                let trimmed = line.trim();
                if !trimmed.is_empty() && Path::new(trimmed).is_absolute() {
                    last_path = Some(trimmed.to_string());
                }
            }
            last_path
        })
    });

    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            _ = tokio::time::sleep(STOP_POLL) => {
                if let Some(reason) = stop.reason() {
                    tracing::info!(program = %program_str, ?reason, "stopping external tool");
                    let _ = child.kill().await;
                    return Ok(ExternalOutcome::Stopped(reason));
                }
            }
        }
    };

    if let Some(t) = stderr_task {
        let _ = t.await;
    }
    let printed = match stdout_task {
        Some(t) => t.await.ok().flatten(),
        None => None,
    };

    if !status.success() {
        let tail = stderr_tail.lock().unwrap_or_else(|e| e.into_inner());
        let stderr = tail.iter().cloned().collect::<Vec<_>>().join(" | ");
        return Err(ExternalError::Exit {
            program: program_str,
            status,
            stderr,
        });
    }

    let output = printed
        .map(PathBuf::from)
        .or_else(|| expected_output(cfg, tool, url, target))
        .filter(|p| p.is_file());
    match output {
        Some(path) => Ok(ExternalOutcome::Finished(path)),
        None => Err(ExternalError::MissingOutput {
            program: program_str,
            path: expected_output(cfg, tool, url, target).unwrap_or_default(),
        }),
    }
}
