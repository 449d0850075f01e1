//! Scriptly administration tool
//!
//! Registers scripts and creates users against the configured database.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use scriptly_server::{
    config::AppConfig,
    error::AppError,
    logging,
    models::ScriptSchema,
    repository::Repository,
    services::{realtime::RealtimeService, scripts::AddScript, Services},
};

#[derive(Parser)]
#[command(name = "scriptly-admin")]
#[command(about = "Administration commands for the Scriptly server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a script, or every script of a directory
    Addscript(AddscriptArgs),
    /// Create a user account
    Createuser {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        email: Option<String>,
        /// Grant administrator privileges
        #[arg(long)]
        superuser: bool,
    },
}

#[derive(Args)]
struct AddscriptArgs {
    /// Script file or directory of scripts
    path: PathBuf,
    /// Script group, the configured default group when omitted
    #[arg(long)]
    group: Option<String>,
    /// Script name, taken from the schema or the file name when omitted
    #[arg(long)]
    name: Option<String>,
    /// Parameter schema; defaults to the `.json` file next to the script
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Record the ignore-bad-imports attribute on the script (registration never imports it)
    #[arg(long)]
    ignore_bad_imports: bool,
    /// Username recorded as the script author
    #[arg(long)]
    user: Option<String>,
}

/// Candidate schema files for a script: `run.py.json`, then `run.json`
fn sidecar_schemas(script: &Path) -> Vec<PathBuf> {
    let mut with_suffix = script.as_os_str().to_owned();
    with_suffix.push(".json");
    vec![PathBuf::from(with_suffix), script.with_extension("json")]
}

/// Scripts under `path`; schema files are not scripts
fn collect_scripts(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("Cannot read {}", path.display()))? {
        let entry_path = entry?.path();
        let is_schema = entry_path.extension().is_some_and(|ext| ext == "json");
        let hidden = entry_path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if entry_path.is_file() && !is_schema && !hidden {
            scripts.push(entry_path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

fn read_schema(script: &Path, explicit: Option<&Path>) -> Result<ScriptSchema> {
    let schema_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => sidecar_schemas(script)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .with_context(|| format!("No schema found for {}", script.display()))?,
    };
    let raw = std::fs::read_to_string(&schema_path)
        .with_context(|| format!("Cannot read schema {}", schema_path.display()))?;
    ScriptSchema::from_json(&raw).map_err(|e| anyhow::anyhow!("{}: {}", schema_path.display(), e))
}

async fn add_scripts(services: &Services, repository: &Repository, args: AddscriptArgs) -> Result<()> {
    let scripts = collect_scripts(&args.path)?;
    if scripts.len() > 1 && (args.schema.is_some() || args.name.is_some()) {
        bail!("--schema and --name only apply to a single script");
    }

    let user_id = match args.user {
        Some(username) => Some(
            repository
                .users
                .get_by_username(&username)
                .await?
                .with_context(|| format!("Unknown user {}", username))?
                .id,
        ),
        None => None,
    };

    let mut failures = 0;
    for script in &scripts {
        let filename = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Invalid script path {}", script.display()))?;
        let schema = match read_schema(script, args.schema.as_deref()) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::error!("Skipping {}: {:#}", script.display(), e);
                failures += 1;
                continue;
            }
        };
        let bytes = tokio::fs::read(script)
            .await
            .with_context(|| format!("Cannot read {}", script.display()))?;

        let request = AddScript {
            filename,
            bytes,
            schema,
            group: args.group.clone(),
            name: args.name.clone(),
            ignore_bad_imports: args.ignore_bad_imports,
            user_id,
        };
        match services.scripts.add_script(request).await {
            Ok(added) => println!(
                "Added {} version {} (iteration {}): {} new parameters, {} reused",
                added.script.script_name,
                added.version.script_version,
                added.version.script_iteration,
                added.parameters_created,
                added.parameters_reused
            ),
            Err(AppError::Conflict(message)) => println!("{}: {}", script.display(), message),
            Err(e) => {
                tracing::error!("Could not add {}: {}", script.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} scripts could not be added", failures, scripts.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging);

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let repository = Repository::new(pool);
    let services = Services::new(repository.clone(), &config, RealtimeService::disabled());

    match cli.command {
        Commands::Addscript(args) => add_scripts(&services, &repository, args).await?,
        Commands::Createuser {
            username,
            password,
            email,
            superuser,
        } => {
            let user = services
                .users
                .create_user(&username, &password, email.as_deref(), superuser)
                .await?;
            println!("Created user {} (id {})", user.username, user.id);
        }
    }

    Ok(())
}
