//! Command-line front end for the generation workflows.
//!
//! Settings, the signed-in session and the session history live under
//! `--home`; generated images are written to `--out`. Account commands talk to
//! the HTTP API at `--api-url`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use viba_studio::{
    api_client::{with_refresh, ApiClient, ClientError, SessionFile, DEFAULT_API_URL},
    genai::{
        client::{DEFAULT_BASE_URL, IMAGE_MODEL, TEXT_MODEL},
        history::{NewLocalRecord, SessionHistory},
        queue::JobQueue,
        settings::ApiKeyStore,
        studio::{ModelNames, VARIANTS_PER_DERIVATION},
        Derivation, GeminiClient, GenAiError, InlineImage, StepStatus, Studio,
    },
    generations::{
        dto::{CreateGenerationRequest, UpdateGenerationRequest},
        model::{GenerationStatus, GenerationType, ImageData},
    },
    telemetry,
};

#[derive(Parser, Debug)]
#[command(name = "studio")]
#[command(about = "Generate image derivations, avatars, try-ons and swaps")]
#[command(version)]
struct Cli {
    /// Directory holding settings.json, session.json and history.json
    #[arg(long, global = true, env = "STUDIO_HOME", default_value = ".viba-studio")]
    home: PathBuf,

    /// Directory generated images are written to
    #[arg(long, global = true, default_value = "out")]
    out: PathBuf,

    #[arg(long, global = true, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, global = true, env = "GEMINI_IMAGE_MODEL", default_value = IMAGE_MODEL)]
    image_model: String,

    #[arg(long, global = true, env = "GEMINI_TEXT_MODEL", default_value = TEXT_MODEL)]
    text_model: String,

    /// Base URL of the Viba Studio API server
    #[arg(long, global = true, env = "VIBA_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Also record each generation in the signed-in account's server history
    #[arg(long, global = true)]
    sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Describe each image and render four variants; files are queued and
    /// processed one at a time
    Derive {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
        creativity: u8,
        #[arg(long)]
        skin_tone: Option<String>,
    },
    /// Render a studio character image from reference photos
    Avatar {
        #[arg(required = true)]
        references: Vec<PathBuf>,
    },
    /// Dress the person in the garment
    TryOn { person: PathBuf, garment: PathBuf },
    /// Place the person into the scene
    Swap { person: PathBuf, scene: PathBuf },
    /// Show or clear the session history
    History {
        #[arg(long = "type", value_parser = parse_type)]
        kind: Option<GenerationType>,
        #[arg(long)]
        clear: bool,
    },
    /// Manage the stored Gemini API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Show the model and prompt used by each workflow step
    Prompts,
    /// Create an account on the API server and sign in
    Register {
        email: String,
        #[arg(long, env = "STUDIO_PASSWORD")]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Sign in to the API server
    Login {
        email: String,
        #[arg(long, env = "STUDIO_PASSWORD")]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in account
    Me,
    /// List the account's server-side generation history
    RemoteHistory {
        #[arg(long = "type", value_parser = parse_type)]
        kind: Option<GenerationType>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Delete a record from the server-side history
    RemoteDelete { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    Set { key: String },
    Remove,
    Status,
}

fn parse_type(s: &str) -> Result<GenerationType, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("viba_studio=info,studio=info");

    let cli = Cli::parse();
    let mut keys = ApiKeyStore::load(cli.home.join("settings.json")).await;
    let mut history = SessionHistory::load(cli.home.join("history.json")).await;
    let mut sessions = SessionFile::load(cli.home.join("session.json")).await;

    match &cli.command {
        Command::Key { action } => return key_command(&mut keys, action).await,
        Command::History { kind, clear } => {
            return history_command(&mut history, *kind, *clear).await
        }
        Command::Prompts => return prompts_command(&cli),
        Command::Register { .. }
        | Command::Login { .. }
        | Command::Logout
        | Command::Me
        | Command::RemoteHistory { .. }
        | Command::RemoteDelete { .. } => {
            return account_command(&cli, &mut sessions, &cli.command).await
        }
        _ => {}
    }

    let studio = build_studio(&cli, &keys)?;
    let mut recorder = Recorder {
        cli: &cli,
        history: &mut history,
        sessions: &mut sessions,
    };
    let result = match &cli.command {
        Command::Derive {
            files,
            creativity,
            skin_tone,
        } => derive(&cli, &studio, &mut recorder, files, *creativity, skin_tone.clone()).await,
        Command::Avatar { references } => {
            let images = read_all(references).await?;
            let out = studio.avatar(&images, Some(&log_status)).await;
            finish_single(&mut recorder, GenerationType::Avatar, references, out).await
        }
        Command::TryOn { person, garment } => {
            let (p, g) = (InlineImage::from_path(person).await?, InlineImage::from_path(garment).await?);
            let out = studio.try_on(&p, &g, Some(&log_status)).await;
            let inputs = [person.clone(), garment.clone()];
            finish_single(&mut recorder, GenerationType::TryOn, &inputs, out).await
        }
        Command::Swap { person, scene } => {
            let (p, s) = (InlineImage::from_path(person).await?, InlineImage::from_path(scene).await?);
            let out = studio.swap(&p, &s, Some(&log_status)).await;
            let inputs = [person.clone(), scene.clone()];
            finish_single(&mut recorder, GenerationType::Swap, &inputs, out).await
        }
        _ => Ok(()),
    };

    history.save().await.context("saving session history")?;
    result
}

fn log_status(s: StepStatus) {
    info!("{}", s.label());
}

fn build_studio(cli: &Cli, keys: &ApiKeyStore) -> Result<Studio> {
    let key = keys.resolve()?;
    let client = GeminiClient::with_base_url(key, cli.base_url.clone());
    Ok(Studio::new(
        Arc::new(client),
        ModelNames {
            image: cli.image_model.clone(),
            text: cli.text_model.clone(),
        },
    ))
}

async fn read_all(paths: &[PathBuf]) -> Result<Vec<InlineImage>> {
    let mut images = Vec::with_capacity(paths.len());
    for p in paths {
        images.push(
            InlineImage::from_path(p)
                .await
                .with_context(|| format!("reading {}", p.display()))?,
        );
    }
    Ok(images)
}

async fn write_output(out_dir: &Path, stem: &str, label: &str, n: usize, img: &InlineImage) -> Result<PathBuf> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let path = out_dir.join(format!("{stem}-{label}-{n}.{}", img.extension()));
    tokio::fs::write(&path, &img.data)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

fn display_paths(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

async fn derive(
    cli: &Cli,
    studio: &Studio,
    recorder: &mut Recorder<'_>,
    files: &[PathBuf],
    creativity: u8,
    skin_tone: Option<String>,
) -> Result<()> {
    let queue: JobQueue<PathBuf, Derivation> = JobQueue::new();
    for f in files {
        queue.enqueue(f.clone());
    }

    let finished = queue
        .run_until_idle(|path, handle| {
            let studio = studio.clone();
            let skin_tone = skin_tone.clone();
            async move {
                let image = InlineImage::from_path(&path).await?;
                let progress = handle.sink();
                let sink = move |s: StepStatus| {
                    log_status(s);
                    progress(s);
                };
                studio
                    .derive(&image, creativity, skin_tone.as_deref(), Some(&sink))
                    .await
            }
        })
        .await;

    let mut failures = 0;
    for job in finished {
        let inputs = [job.input.clone()];
        match (job.status, job.output) {
            (GenerationStatus::Completed, Some(d)) => {
                let stem = file_stem(&job.input);
                let mut outputs = Vec::with_capacity(d.images.len());
                for (n, img) in d.images.iter().enumerate() {
                    outputs.push(write_output(&cli.out, &stem, "variant", n + 1, img).await?);
                }
                println!(
                    "{}: {} of {} variants -> {}",
                    job.input.display(),
                    outputs.len(),
                    VARIANTS_PER_DERIVATION,
                    cli.out.display()
                );
                let params = json!({ "creativity": creativity, "description": d.description });
                recorder
                    .record(GenerationType::Derivation, &inputs, &outputs, params, None)
                    .await;
            }
            _ => {
                failures += 1;
                let msg = job.error.unwrap_or_else(|| "Unknown error".to_string());
                eprintln!("{}: failed: {msg}", job.input.display());
                let params = json!({ "creativity": creativity });
                recorder
                    .record(GenerationType::Derivation, &inputs, &[], params, Some(msg))
                    .await;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} derivation jobs failed", files.len());
    }
    Ok(())
}

async fn finish_single(
    recorder: &mut Recorder<'_>,
    kind: GenerationType,
    inputs: &[PathBuf],
    outcome: Result<InlineImage, GenAiError>,
) -> Result<()> {
    let stem = inputs.first().map(|p| file_stem(p)).unwrap_or_default();
    match outcome {
        Ok(img) => {
            let path = write_output(&recorder.cli.out, &stem, kind.as_str(), 1, &img).await?;
            println!("{}", path.display());
            recorder.record(kind, inputs, &[path], json!({}), None).await;
            Ok(())
        }
        Err(e) => {
            recorder
                .record(kind, inputs, &[], json!({}), Some(e.to_string()))
                .await;
            Err(e.into())
        }
    }
}

/// Writes each finished generation to the session history and, with
/// `--sync`, to the signed-in account's server history.
struct Recorder<'a> {
    cli: &'a Cli,
    history: &'a mut SessionHistory,
    sessions: &'a mut SessionFile,
}

impl Recorder<'_> {
    async fn record(
        &mut self,
        kind: GenerationType,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
        parameters: Value,
        error: Option<String>,
    ) {
        let status = match error {
            Some(_) => GenerationStatus::Failed,
            None => GenerationStatus::Completed,
        };
        self.history.add(NewLocalRecord {
            kind,
            input_images: display_paths(inputs),
            output_images: display_paths(outputs),
            parameters: parameters.clone(),
            status,
            error: error.clone(),
        });

        if !self.cli.sync {
            return;
        }
        match self.push(kind, inputs, outputs, parameters, status, error).await {
            Ok(id) => info!(%id, "generation recorded on the server"),
            Err(e) => warn!(error = %e, "could not record generation on the server"),
        }
    }

    async fn push(
        &mut self,
        kind: GenerationType,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
        parameters: Value,
        status: GenerationStatus,
        error: Option<String>,
    ) -> Result<Uuid, ClientError> {
        let mut api = signed_in_client(self.cli, self.sessions)?;
        let create = &CreateGenerationRequest {
            kind: Some(kind),
            input_images: Some(image_refs(inputs)),
            parameters: Some(parameters),
        };
        let created = with_refresh(&mut api, self.sessions, move |api| async move {
            api.create_generation(create).await
        })
        .await?;

        let update = &UpdateGenerationRequest {
            status: Some(status),
            output_images: Some(image_refs(outputs)),
            error_message: error.map(Some),
        };
        let id = created.id;
        with_refresh(&mut api, self.sessions, move |api| async move {
            api.update_generation(id, update).await
        })
        .await?;
        Ok(id)
    }
}

fn image_refs(paths: &[PathBuf]) -> Vec<ImageData> {
    paths
        .iter()
        .map(|p| ImageData {
            filename: p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            storage_url: p.display().to_string(),
        })
        .collect()
}

fn signed_in_client(cli: &Cli, sessions: &SessionFile) -> Result<ApiClient, ClientError> {
    let session = sessions.get().ok_or(ClientError::NotLoggedIn)?;
    Ok(ApiClient::new(&cli.api_url).with_token(&session.access_token))
}

async fn account_command(cli: &Cli, sessions: &mut SessionFile, command: &Command) -> Result<()> {
    match command {
        Command::Register {
            email,
            password,
            full_name,
        } => {
            let auth = ApiClient::new(&cli.api_url)
                .register(email, password, full_name.as_deref())
                .await?;
            println!("registered and signed in as {}", auth.user.email);
            sessions.store(auth.into()).await?;
        }
        Command::Login { email, password } => {
            let auth = ApiClient::new(&cli.api_url).login(email, password).await?;
            println!("signed in as {}", auth.user.email);
            sessions.store(auth.into()).await?;
        }
        Command::Logout => {
            if let Ok(api) = signed_in_client(cli, sessions) {
                if let Err(e) = api.logout().await {
                    warn!(error = %e, "server logout failed; clearing local session anyway");
                }
            }
            sessions.clear().await?;
            println!("signed out");
        }
        Command::Me => {
            let mut api = signed_in_client(cli, sessions)?;
            let me = with_refresh(&mut api, sessions, |api| async move { api.me().await }).await?;
            println!("{}  {}", me.id, me.email);
            if let Some(name) = &me.full_name {
                println!("name: {name}");
            }
            println!("member since {}", me.created_at.date());
        }
        Command::RemoteHistory {
            kind,
            limit,
            offset,
        } => {
            let (kind, limit, offset) = (*kind, *limit, *offset);
            let mut api = signed_in_client(cli, sessions)?;
            let page = with_refresh(&mut api, sessions, move |api| async move {
                api.list_generations(kind, limit, offset).await
            })
            .await?;
            if page.items.is_empty() {
                println!("no records");
            }
            for g in &page.items {
                let mut line = format!(
                    "{}  {:<10}  {:<10}  {} output(s)  {}",
                    g.id,
                    g.kind.as_str(),
                    g.status.as_str(),
                    g.output_images.len(),
                    g.created_at.date()
                );
                if let Some(e) = &g.error_message {
                    line.push_str(&format!("  error: {e}"));
                }
                println!("{line}");
            }
            println!("{} of {} record(s)", page.items.len(), page.total);
        }
        Command::RemoteDelete { id } => {
            let id = *id;
            let mut api = signed_in_client(cli, sessions)?;
            let res = with_refresh(&mut api, sessions, move |api| async move {
                api.delete_generation(id).await
            })
            .await?;
            println!("{}", res.message);
        }
        _ => {}
    }
    Ok(())
}

fn prompts_command(cli: &Cli) -> Result<()> {
    let names = ModelNames {
        image: cli.image_model.clone(),
        text: cli.text_model.clone(),
    };
    for entry in names.prompt_catalog() {
        println!("== {} / {} ({})", entry.workflow, entry.step, entry.model);
        println!("{}\n", entry.prompt);
    }
    Ok(())
}

async fn history_command(
    history: &mut SessionHistory,
    kind: Option<GenerationType>,
    clear: bool,
) -> Result<()> {
    if clear {
        history.clear();
        history.save().await?;
        println!("history cleared");
        return Ok(());
    }

    let records: Vec<_> = match kind {
        Some(k) => history.by_type(k),
        None => history.records().iter().collect(),
    };
    if records.is_empty() {
        println!("no records");
    }
    for r in records {
        let mut line = format!(
            "{}  {:<10}  {:<10}  {} output(s)",
            r.id,
            r.kind.as_str(),
            r.status.as_str(),
            r.output_images.len()
        );
        if let Some(e) = &r.error {
            line.push_str(&format!("  error: {e}"));
        }
        println!("{line}");
    }
    Ok(())
}

async fn key_command(keys: &mut ApiKeyStore, action: &KeyAction) -> Result<()> {
    match action {
        KeyAction::Set { key } => {
            keys.set(key).await?;
            println!("API key saved");
        }
        KeyAction::Remove => {
            keys.remove().await?;
            println!("API key removed");
        }
        KeyAction::Status => match (keys.has_key(), keys.resolve()) {
            (true, _) => println!("API key: stored in settings"),
            (false, Ok(_)) => println!("API key: from environment"),
            (false, Err(e)) => println!("{e}"),
        },
    }
    Ok(())
}
