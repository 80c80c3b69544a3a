//! vidnote: turn a video reference into a note from the command line.
//!
//! Jobs live under the configured data directory, so `status`, `list` and
//! `export` work on jobs processed by earlier runs.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use vidnote_core::domain::JobEvent;
use vidnote_core::impls::{FsArtifactStore, FsJobStore};
use vidnote_core::ports::JobStore;
use vidnote_core::{AppConfig, Job, JobStatus, PipelineBuilder, PipelineController, Stage, StepMode, VideoId};

#[derive(Parser)]
#[command(name = "vidnote")]
#[command(about = "Turn a video into a transcript, summary and mind map")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a video reference (BV id or URL) to completion
    Process {
        source_ref: String,
        /// Stop after each stage; run again to continue
        #[arg(long)]
        step: bool,
    },
    /// Show one job
    Status {
        video_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Resume a failed, cancelled or halted job
    Retry {
        video_id: String,
        /// Start over from the beginning instead of the failed stage
        #[arg(long)]
        restart: bool,
    },
    /// Cancel a job
    Cancel { video_id: String },
    /// List all jobs
    List,
    /// Continue jobs interrupted by an earlier run
    Resume,
    /// Write the note, mind map, summary and transcript of a completed job
    Export {
        video_id: String,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Process { source_ref, step } => {
            if step {
                config.pipeline.step_mode = StepMode::Pause;
            }
            let controller = controller(&config)?;
            let video_id = controller.submit(&source_ref).await?;
            let job = follow(&controller, &video_id).await?;
            report(&job);
        }
        Command::Status { video_id, json } => {
            let job = load_job(&config, &video_id).await?;
            let status = JobStatus::from_job(&job, false);
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Command::Retry { video_id, restart } => {
            let controller = controller(&config)?;
            let video_id = VideoId::new(video_id);
            controller.retry(&video_id, !restart).await?;
            let job = follow(&controller, &video_id).await?;
            report(&job);
        }
        Command::Cancel { video_id } => {
            let controller = controller(&config)?;
            let job = controller.cancel(&VideoId::new(video_id)).await?;
            println!("{}: {}", job.video_id, job.stage);
        }
        Command::List => {
            let jobs = FsJobStore::new(config.jobs_dir()).list().await?;
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in jobs {
                let status = JobStatus::from_job(&job, false);
                println!(
                    "{:<24} {:<19} {:>3}%  {}",
                    status.video_id,
                    status.stage.to_string(),
                    status.progress_percent,
                    status.title.as_deref().unwrap_or(&status.source_ref)
                );
            }
        }
        Command::Resume => {
            let controller = controller(&config)?;
            let resumed = controller.resume_interrupted().await?;
            if resumed.is_empty() {
                println!("nothing to resume");
            }
            for video_id in resumed {
                let job = follow(&controller, &video_id).await?;
                report(&job);
            }
        }
        Command::Export { video_id, out } => {
            let job = load_job(&config, &video_id).await?;
            let store = FsArtifactStore::new(config.artifacts_dir(), config.pipeline.retain_artifact_versions);
            let written = vidnote_core::notes::export_job(&store, &job, &out, true).await?;
            for path in written {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn controller(config: &AppConfig) -> Result<PipelineController> {
    let controller = PipelineBuilder::from_config(config)
        .context("failed to set up the pipeline")?
        .build()?;
    Ok(controller)
}

async fn load_job(config: &AppConfig, video_id: &str) -> Result<Job> {
    let store = FsJobStore::new(config.jobs_dir());
    match store.get(&VideoId::new(video_id)).await? {
        Some(job) => Ok(job),
        None => bail!("no job for video {video_id}"),
    }
}

/// Print progress until the driver stops; Ctrl-C cancels the job.
async fn follow(controller: &PipelineController, video_id: &VideoId) -> Result<Job> {
    let mut events = controller.subscribe();
    let printer = {
        let video_id = video_id.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.video_id() == &video_id => print_event(&event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let job = tokio::select! {
        job = controller.wait(video_id) => job?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted, cancelling {video_id}");
            controller.cancel(video_id).await?;
            controller.wait(video_id).await?
        }
    };
    printer.abort();
    Ok(job)
}

fn print_event(event: &JobEvent) {
    match event {
        JobEvent::StageStarted { stage, attempt, .. } => println!("{stage} (attempt {attempt})"),
        JobEvent::StageSkipped { stage, .. } => println!("{stage} skipped, output already present"),
        JobEvent::RetryScheduled { delay, error, .. } => {
            println!("  failed: {}; retrying in {delay:?}", error.message)
        }
        JobEvent::Halted { error, .. } => println!("  halted: {error}"),
        _ => {}
    }
}

fn report(job: &Job) {
    let status = JobStatus::from_job(job, false);
    print_status(&status);
    if job.stage == Stage::Completed {
        println!("note written to the notes directory");
    } else if job.is_active() && job.error.is_none() {
        println!("paused before {}; run `vidnote process {} --step` to continue", job.stage, job.source_ref);
    }
}

fn print_status(status: &JobStatus) {
    println!("video:    {}", status.video_id);
    if let Some(title) = &status.title {
        println!("title:    {title}");
    }
    println!("stage:    {} ({}%)", status.stage, status.progress_percent);
    let artifacts: Vec<String> = status.artifacts.iter().map(|k| k.to_string()).collect();
    println!("outputs:  {}", artifacts.join(", "));
    if let Some(message) = &status.error_message {
        let stage = status.failed_stage.map(|s| s.to_string()).unwrap_or_default();
        let kind = status.error_kind.map(|k| k.to_string()).unwrap_or_default();
        println!("error:    {kind} at {stage}: {message}");
    }
    if status.retry_possible {
        println!("retry:    vidnote retry {}", status.video_id);
    }
}
