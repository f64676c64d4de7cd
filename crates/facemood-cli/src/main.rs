use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use facemood_core::observe::detect;
use facemood_core::tally::{chart_slices, dominant};
use facemood_core::{observe, DescriptorStore, Identity, IdentityResolver, Mood, NamePrompt, Outcome};
use facemood_store::{load_store, Backend};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod analyzer;
mod config;
mod image_ref;
mod pipeline;
mod prompt;
mod recorder;

use analyzer::SidecarAnalyzer;
use config::Config;
use pipeline::Pipeline;
use prompt::{PresetPrompt, StdinPrompt};
use recorder::{spawn_recorder, Recorded};

#[derive(Parser)]
#[command(name = "facemood", version, about = "Face identity and mood journal")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the face in an image, asking for a name if it is new
    Observe {
        image: PathBuf,
        /// Name to use if the face is not recognized
        #[arg(short, long)]
        name: Option<String>,
        /// Store the image inline as a data URL instead of its path
        #[arg(long)]
        embed: bool,
    },
    /// Record every image in a directory
    Ingest {
        dir: PathBuf,
        #[arg(long)]
        embed: bool,
        /// Skip unknown faces instead of asking for names
        #[arg(long)]
        no_prompt: bool,
        /// Images analyzed in parallel
        #[arg(short, long, default_value_t = 4)]
        jobs: usize,
    },
    /// Show who the face in an image belongs to, without recording it
    Resolve { image: PathBuf },
    /// List known people
    List,
    /// Show a person's history and mood distribution
    Show { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    let backend = facemood_store::open(config.backend, &config.store_path)
        .with_context(|| format!("opening {} store at {}", config.backend, config.store_path.display()))?;
    let store = load_store(backend.as_ref(), config.descriptor_dim)
        .with_context(|| format!("loading people from {}", backend.describe()))?;
    let resolver = IdentityResolver::new(config.match_threshold, config.match_strategy);

    match cli.command {
        Commands::Observe { image, name, embed } => {
            cmd_observe(store, backend, &resolver, &config, &image, name, embed, cli.json)
        }
        Commands::Ingest {
            dir,
            embed,
            no_prompt,
            jobs,
        } => cmd_ingest(store, backend, resolver, &config, &dir, embed, no_prompt, jobs, cli.json).await,
        Commands::Resolve { image } => cmd_resolve(&store, &resolver, &config, &image, cli.json),
        Commands::List => cmd_list(&store, cli.json),
        Commands::Show { name } => cmd_show(&store, &name, cli.json),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_observe(
    mut store: DescriptorStore,
    mut backend: Box<dyn Backend>,
    resolver: &IdentityResolver,
    config: &Config,
    image: &Path,
    name: Option<String>,
    embed: bool,
    json: bool,
) -> Result<()> {
    let reference = image_ref::image_ref(image, embed)
        .with_context(|| format!("reading image {}", image.display()))?;
    let mut analyzer = SidecarAnalyzer::new(&config.inference_dir);
    let mut prompt = PresetPrompt {
        name,
        interactive: !json,
    };

    let outcome = observe(
        &mut store,
        resolver,
        &mut analyzer,
        &mut prompt,
        &image.display().to_string(),
        reference,
    )?;

    let mut persist_error = None;
    if let Some(identity) = outcome.name().and_then(|n| store.get(n)) {
        if let Err(err) = backend.upsert(identity) {
            tracing::warn!(
                person = %identity.name,
                error = %err,
                "failed to persist identity; change kept for this session only"
            );
            persist_error = Some(err.to_string());
        }
    }

    if json {
        print_json(&serde_json::json!({
            "image": image,
            "result": outcome,
            "persist_error": persist_error,
        }))
    } else {
        println!("{}", describe_outcome(&outcome));
        if let Some(err) = persist_error {
            eprintln!("warning: observation not saved: {err}");
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct IngestEntry {
    image: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recorded: Option<Recorded>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    store: DescriptorStore,
    backend: Box<dyn Backend>,
    resolver: IdentityResolver,
    config: &Config,
    dir: &Path,
    embed: bool,
    no_prompt: bool,
    jobs: usize,
    json: bool,
) -> Result<()> {
    let images = image_ref::list_images(dir)
        .with_context(|| format!("listing images in {}", dir.display()))?;
    if images.is_empty() {
        bail!("no images found in {}", dir.display());
    }
    tracing::info!(count = images.len(), dir = %dir.display(), "ingesting images");

    let recorder = spawn_recorder(store, backend, resolver)?;
    let prompt: Box<dyn NamePrompt + Send> = if no_prompt || json {
        Box::new(PresetPrompt {
            name: None,
            interactive: false,
        })
    } else {
        Box::new(StdinPrompt)
    };
    let pipeline = Pipeline::new(
        recorder.clone(),
        SidecarAnalyzer::new(&config.inference_dir),
        prompt,
        embed,
    );

    let permits = Arc::new(tokio::sync::Semaphore::new(jobs.max(1)));
    let mut tasks = tokio::task::JoinSet::new();
    for image in images {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let pipeline = pipeline.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = pipeline.observe(image.clone()).await;
            (image, result)
        });
    }

    let mut entries = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (image, result) = joined?;
        let entry = match result {
            Ok((outcome, recorded)) => IngestEntry {
                image,
                result: Some(outcome),
                recorded,
                error: None,
            },
            Err(err) => {
                tracing::warn!(image = %image.display(), error = %err, "image not recorded");
                IngestEntry {
                    image,
                    result: None,
                    recorded: None,
                    error: Some(err.to_string()),
                }
            }
        };
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.image.cmp(&b.image));
    let people = recorder.snapshot().await?;
    tracing::info!(people = people.len(), images = entries.len(), "ingest finished");

    if json {
        return print_json(&entries);
    }

    for entry in &entries {
        match (&entry.result, &entry.error) {
            (Some(outcome), _) => println!("{}: {}", entry.image.display(), describe_outcome(outcome)),
            (None, Some(err)) => println!("{}: error: {err}", entry.image.display()),
            (None, None) => {}
        }
        if let Some(err) = entry.recorded.as_ref().and_then(|r| r.persist_error.as_ref()) {
            eprintln!("warning: {} not saved: {err}", entry.image.display());
        }
    }
    let recorded = entries.iter().filter(|e| e.recorded.is_some()).count();
    let failed = entries.iter().filter(|e| e.error.is_some()).count();
    println!("{} images, {recorded} recorded, {failed} failed", entries.len());
    Ok(())
}

fn cmd_resolve(
    store: &DescriptorStore,
    resolver: &IdentityResolver,
    config: &Config,
    image: &Path,
    json: bool,
) -> Result<()> {
    let mut analyzer = SidecarAnalyzer::new(&config.inference_dir);
    let sighting = detect(&mut analyzer, &image.display().to_string())?;
    let found = resolver.find(&sighting.descriptor, store)?;

    if json {
        return print_json(&serde_json::json!({
            "image": image,
            "mood": sighting.mood,
            "name": found.map(|m| m.name()),
            "distance": found.map(|m| m.distance),
        }));
    }

    match found {
        Some(m) => println!("{} ({}, distance {:.3})", m.name(), sighting.mood, m.distance),
        None => println!("unknown face ({})", sighting.mood),
    }
    Ok(())
}

#[derive(Serialize)]
struct PersonSummary<'a> {
    name: &'a str,
    observations: usize,
    dominant_mood: Option<Mood>,
    last_seen: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Identity> for PersonSummary<'a> {
    fn from(identity: &'a Identity) -> Self {
        Self {
            name: &identity.name,
            observations: identity.history.len(),
            dominant_mood: dominant(&identity.history),
            last_seen: identity.last_seen(),
        }
    }
}

fn cmd_list(store: &DescriptorStore, json: bool) -> Result<()> {
    let people: Vec<PersonSummary> = store.all().map(PersonSummary::from).collect();
    if json {
        return print_json(&people);
    }

    if people.is_empty() {
        println!("No people recorded");
        return Ok(());
    }
    for p in &people {
        let mood = p.dominant_mood.map(|m| m.to_string()).unwrap_or_default();
        let seen = p
            .last_seen
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!("{:<24} {:>4} seen  mostly {:<10} last {}", p.name, p.observations, mood, seen);
    }
    Ok(())
}

fn cmd_show(store: &DescriptorStore, name: &str, json: bool) -> Result<()> {
    let Some(identity) = store.get(name) else {
        bail!("no person named {name}");
    };
    let slices = chart_slices(&identity.history);

    if json {
        return print_json(&serde_json::json!({
            "name": identity.name,
            "history": identity.history,
            "moods": slices,
        }));
    }

    println!("{}'s image history", identity.name);
    for (i, obs) in identity.history.iter().enumerate() {
        println!(
            "  {:>3}. {}  {:<10} {}",
            i + 1,
            obs.timestamp.format("%Y-%m-%d %H:%M"),
            obs.mood,
            short_ref(&obs.image_ref)
        );
    }
    println!("Mood distribution");
    for slice in &slices {
        println!(
            "  {:<10} {:>4}  {:>5.1}%  {}",
            slice.mood,
            slice.count,
            slice.share * 100.0,
            slice.color
        );
    }
    Ok(())
}

fn describe_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Recognized { name, mood, distance } => {
            format!("recognized {name} ({mood}, distance {distance:.3})")
        }
        Outcome::Enrolled { name, mood } => format!("enrolled {name} ({mood})"),
        Outcome::Skipped { mood } => format!("unknown face ({mood}) skipped"),
    }
}

/// Data URLs are shortened for terminal output.
fn short_ref(image_ref: &str) -> String {
    match image_ref.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => {
            format!("{header},… ({} chars)", payload.len())
        }
        _ => image_ref.to_string(),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_observe() {
        let cli = Cli::try_parse_from(["facemood", "--json", "observe", "a.jpg", "-n", "Bob"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Observe { image, name, embed } => {
                assert_eq!(image, PathBuf::from("a.jpg"));
                assert_eq!(name.as_deref(), Some("Bob"));
                assert!(!embed);
            }
            _ => panic!("expected observe"),
        }
    }

    #[test]
    fn test_short_ref() {
        assert_eq!(short_ref("/photos/a.jpg"), "/photos/a.jpg");
        assert_eq!(short_ref("data:image/png;base64,AAAA"), "data:image/png;base64,… (4 chars)");
    }

    #[test]
    fn test_describe_outcome() {
        let text = describe_outcome(&Outcome::Recognized {
            name: "Alice".into(),
            mood: Mood::Happy,
            distance: 0.1234,
        });
        assert_eq!(text, "recognized Alice (happy, distance 0.123)");
    }
}
