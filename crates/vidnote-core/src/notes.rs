//! Note export: Markdown note plus a standalone mind-map page.
//!
//! [`NoteExportSink`] writes both files for every completed job;
//! [`export_job`] does the same on demand (CLI `export`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    ArtifactKind, Job, JobEvent, MindmapDocument, Stage, SummaryDocument, Transcript,
    TranscriptSource,
};
use crate::ports::{ArtifactStore, EventSink, EventSinkError};

/// `h:mm:ss` above an hour, `m:ss` below.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub fn render_note(
    job: &Job,
    summary: &SummaryDocument,
    mindmap: &MindmapDocument,
    transcript_source: Option<TranscriptSource>,
) -> String {
    let mut note = format!("# {}\n\n", mindmap.title);
    note.push_str(&format!("- Video: {}\n", job.video_id));
    note.push_str(&format!("- Source: {}\n", job.source_ref));
    if let Some(media) = &job.media {
        note.push_str(&format!("- Duration: {}\n", format_duration(media.duration_secs)));
    }
    let source = match transcript_source {
        Some(TranscriptSource::Subtitles) => "subtitles",
        Some(TranscriptSource::Speech) => "speech recognition",
        None => "unknown",
    };
    note.push_str(&format!("- Transcript: {source}\n"));
    note.push_str(&format!(
        "- Generated: {}\n",
        job.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if summary.truncated_input {
        note.push_str("- Note: the transcript was truncated before summarizing\n");
    }

    note.push_str("\n## Summary\n\n");
    note.push_str(summary.summary.trim());
    note.push_str("\n\n## Mind Map\n\n");
    note.push_str(mindmap.markdown.trim_end());
    note.push('\n');
    note
}

/// Standalone HTML page rendering `markdown` with markmap.
pub fn render_mindmap_html(markdown: &str, title: &str) -> String {
    // The outline lands inside a JS template literal.
    let escaped = markdown.replace('`', "\\`").replace("${", "\\${");
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - Mind Map</title>
    <style>
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif;
            background: #f5f6fa;
            padding: 20px;
        }}
        h1 {{ text-align: center; margin-bottom: 16px; font-size: 1.6rem; }}
        #markmap {{ width: 100%; height: calc(100vh - 100px); min-height: 500px; background: white; }}
    </style>
</head>
<body>
    <h1>{title}</h1>
    <svg id="markmap"></svg>
    <script src="https://cdn.jsdelivr.net/npm/d3@7"></script>
    <script src="https://cdn.jsdelivr.net/npm/markmap-view@0.15.4"></script>
    <script src="https://cdn.jsdelivr.net/npm/markmap-lib@0.15.4"></script>
    <script>
        const markdown = `{escaped}`;
        const {{ Transformer, Markmap }} = window.markmap;
        const {{ root }} = new Transformer().transform(markdown);
        const mm = Markmap.create(document.getElementById('markmap'), {{
            colorFreezeLevel: 2,
            initialExpandLevel: 3,
            maxWidth: 300,
            paddingX: 20
        }}, root);
        window.addEventListener('resize', () => mm.fit());
    </script>
</body>
</html>
"#
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Rendered files of one job.
#[derive(Debug, Clone)]
pub struct NoteBundle {
    pub note: String,
    pub mindmap_html: String,
    pub summary: String,
    pub transcript: Option<String>,
}

/// Load the text artifacts of `job` and render them.
pub async fn render_bundle(store: &dyn ArtifactStore, job: &Job) -> Result<NoteBundle, EventSinkError> {
    let summary: SummaryDocument = load_json(store, job, ArtifactKind::Summary).await?;
    let mindmap: MindmapDocument = load_json(store, job, ArtifactKind::Mindmap).await?;
    let transcript: Option<Transcript> = match job.artifact(ArtifactKind::Transcript) {
        Some(_) => Some(load_json(store, job, ArtifactKind::Transcript).await?),
        None => None,
    };

    Ok(NoteBundle {
        note: render_note(job, &summary, &mindmap, transcript.as_ref().map(|t| t.source)),
        mindmap_html: render_mindmap_html(&mindmap.markdown, &mindmap.title),
        summary: summary.summary,
        transcript: transcript.map(|t| t.text),
    })
}

async fn load_json<T: serde::de::DeserializeOwned>(
    store: &dyn ArtifactStore,
    job: &Job,
    kind: ArtifactKind,
) -> Result<T, EventSinkError> {
    let reference = job
        .artifact(kind)
        .ok_or_else(|| EventSinkError::Render(format!("{} has no {kind} artifact", job.video_id)))?;
    let artifact = store.get(reference).await?;
    artifact
        .decode()
        .map_err(|e| EventSinkError::Render(format!("undecodable {kind} artifact: {e}")))
}

/// Write the note and mind map of `job` into `out_dir`.
///
/// With `with_text` the plain summary and transcript are written too.
pub async fn export_job(
    store: &dyn ArtifactStore,
    job: &Job,
    out_dir: &Path,
    with_text: bool,
) -> Result<Vec<PathBuf>, EventSinkError> {
    if job.stage != Stage::Completed {
        return Err(EventSinkError::Render(format!(
            "{} is {}, not COMPLETED",
            job.video_id, job.stage
        )));
    }
    let bundle = render_bundle(store, job).await?;
    let key = job.video_id.storage_key();

    let mut files = vec![
        (out_dir.join(format!("{key}.md")), bundle.note),
        (out_dir.join(format!("{key}.mindmap.html")), bundle.mindmap_html),
    ];
    if with_text {
        files.push((out_dir.join(format!("{key}.summary.txt")), bundle.summary));
        if let Some(transcript) = bundle.transcript {
            files.push((out_dir.join(format!("{key}.transcript.txt")), transcript));
        }
    }

    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|source| EventSinkError::Io {
            path: out_dir.display().to_string(),
            source,
        })?;
    let mut written = Vec::with_capacity(files.len());
    for (path, content) in files {
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| EventSinkError::Io {
                path: path.display().to_string(),
                source,
            })?;
        written.push(path);
    }
    Ok(written)
}

/// Writes `<key>.md` and `<key>.mindmap.html` when a job completes.
pub struct NoteExportSink {
    artifacts: Arc<dyn ArtifactStore>,
    out_dir: PathBuf,
}

impl NoteExportSink {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts,
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait]
impl EventSink for NoteExportSink {
    async fn emit(&self, event: &JobEvent, job: &Job) -> Result<(), EventSinkError> {
        if !matches!(event, JobEvent::Completed { .. }) {
            return Ok(());
        }
        let written = export_job(self.artifacts.as_ref(), job, &self.out_dir, false).await?;
        tracing::info!(video_id = %job.video_id, files = written.len(), "note exported");
        Ok(())
    }
}
