//! Media fetching: metadata, published subtitles, audio.
//!
//! [`YtDlpFetcher`] shells out to `yt-dlp`. Subtitles are preferred; audio
//! is only extracted when none are published.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::process::Command;

use crate::domain::{RefKind, VideoId};

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));

const SUBTITLE_EXTS: [&str; 4] = ["srt", "vtt", "srv3", "json3"];

/// What the fetcher found for a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMedia {
    pub title: String,
    pub duration_secs: f64,
    /// Extracted audio, inside the scratch directory.
    pub audio_path: Option<PathBuf>,
    /// Plain subtitle text, when the platform publishes subtitles.
    pub subtitles: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The reference does not resolve to a video.
    #[error("not a video: {0}")]
    NotAVideo(String),

    /// Network or platform trouble; worth retrying.
    #[error("fetch failed: {0}")]
    Unavailable(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch `source_ref`, writing any files into `scratch_dir`.
    async fn fetch(&self, source_ref: &str, scratch_dir: &Path) -> Result<FetchedMedia, FetchError>;
}

#[derive(Debug, Deserialize)]
struct SubtitleTrack {
    ext: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    subtitles: HashMap<String, Vec<SubtitleTrack>>,
    #[serde(default)]
    automatic_captions: HashMap<String, Vec<SubtitleTrack>>,
}

/// `yt-dlp` backed fetcher.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
    subtitle_langs: Vec<String>,
    http: reqwest::Client,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>, subtitle_langs: Vec<String>) -> Self {
        Self {
            program: program.into(),
            subtitle_langs,
            http: reqwest::Client::new(),
        }
    }

    /// Turn a reference into something `yt-dlp` accepts.
    fn resolve_url(source_ref: &str) -> Result<String, FetchError> {
        let (id, kind) = VideoId::classify(source_ref)
            .map_err(|e| FetchError::NotAVideo(e.to_string()))?;
        let trimmed = source_ref.trim();
        match kind {
            RefKind::Url => Ok(trimmed.to_string()),
            RefKind::Bilibili if trimmed.starts_with("http") => Ok(trimmed.to_string()),
            RefKind::Bilibili => {
                let base = id.as_str().split("_p").next().unwrap_or(id.as_str());
                Ok(format!("https://www.bilibili.com/video/{base}"))
            }
            RefKind::Opaque => Err(FetchError::NotAVideo(trimmed.to_string())),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, FetchError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FetchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("Unsupported URL") || stderr.contains("is not a valid URL") {
            Err(FetchError::NotAVideo(stderr))
        } else {
            Err(FetchError::Unavailable(stderr))
        }
    }

    async fn probe(&self, url: &str) -> Result<VideoInfo, FetchError> {
        let stdout = self
            .run(&["--dump-single-json", "--no-warnings", "--skip-download", url])
            .await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| FetchError::Unavailable(format!("unreadable video info: {e}")))
    }

    fn pick_subtitle_url(&self, info: &VideoInfo) -> Option<String> {
        for lang in &self.subtitle_langs {
            let tracks = info
                .subtitles
                .get(lang)
                .or_else(|| info.automatic_captions.get(lang));
            let found = tracks.into_iter().flatten().find(|t| {
                t.ext
                    .as_deref()
                    .is_some_and(|ext| SUBTITLE_EXTS.contains(&ext))
            });
            if let Some(url) = found.and_then(|t| t.url.clone()) {
                return Some(url);
            }
        }
        None
    }

    async fn download_subtitles(&self, url: &str) -> Option<String> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match response {
            Ok(r) => match r.text().await {
                Ok(body) => Some(subtitle_text(&body)).filter(|t| !t.is_empty()),
                Err(e) => {
                    tracing::debug!(error = %e, "subtitle body unreadable");
                    None
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "subtitle download failed, falling back to audio");
                None
            }
        }
    }

    async fn extract_audio(&self, url: &str, scratch_dir: &Path) -> Result<PathBuf, FetchError> {
        let template = scratch_dir.join("audio.%(ext)s");
        let template = template.to_string_lossy();
        self.run(&[
            "--no-warnings",
            "-f",
            "bestaudio/best",
            "-x",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "128K",
            "-o",
            &template,
            url,
        ])
        .await?;

        let path = scratch_dir.join("audio.mp3");
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            Ok(path)
        } else {
            Err(FetchError::Unavailable("audio file was not produced".into()))
        }
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new(
            "yt-dlp",
            ["zh-Hans", "zh-CN", "zh", "en"].map(String::from).to_vec(),
        )
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, source_ref: &str, scratch_dir: &Path) -> Result<FetchedMedia, FetchError> {
        let url = Self::resolve_url(source_ref)?;
        let info = self.probe(&url).await?;
        let title = info.title.clone().unwrap_or_else(|| source_ref.trim().to_string());
        let duration_secs = info.duration.unwrap_or(0.0);

        if let Some(sub_url) = self.pick_subtitle_url(&info)
            && let Some(text) = self.download_subtitles(&sub_url).await
        {
            return Ok(FetchedMedia {
                title,
                duration_secs,
                audio_path: None,
                subtitles: Some(text),
            });
        }

        let audio_path = self.extract_audio(&url, scratch_dir).await?;
        Ok(FetchedMedia {
            title,
            duration_secs,
            audio_path: Some(audio_path),
            subtitles: None,
        })
    }
}

/// Reduce an SRT/VTT body to its text lines.
pub fn subtitle_text(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.contains("-->")
                && !line.chars().all(|c| c.is_ascii_digit())
                && *line != "WEBVTT"
        })
        .map(|line| TAG.replace_all(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
