//! Command-line entry point for the release core.
//!
//! # Responsibility
//! - Seed projects and create or inspect releases in a database file.
//! - Print results as JSON on stdout; errors go to stderr.

use clap::{Parser, Subcommand};
use log::error;
use release_core::repo::activity_repo::{ActivityRepository, SqliteActivityRepository};
use release_core::repo::project_repo::{ProjectRepository, SqliteProjectRepository};
use release_core::repo::release_project_repo::SqliteReleaseProjectRepository;
use release_core::repo::release_repo::{ReleaseRepository, SqliteReleaseRepository};
use release_core::service::association_manager::AssociationManager;
use release_core::{
    init_logging, open_db, ConfigError, CoreConfig, CreateReleaseError, CreateReleaseRequest,
    DbError, LockError, LogNotifier, LoggingError, ReleaseCreationService, RepoError,
    SqliteLockService, TenantId,
};
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "release-cli")]
#[command(author, version, about = "Idempotent release creation", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "releases.db")]
    db: PathBuf,

    /// Directory containing release.toml (defaults to the database directory)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Write rotating log files to this absolute directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Create or inspect releases
    Release {
        #[command(subcommand)]
        command: ReleaseCommand,
    },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Register a project for a tenant
    Add {
        #[arg(long)]
        tenant: TenantId,
        slug: String,
        /// Display name (defaults to the slug)
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ReleaseCommand {
    /// Create a release, or link projects to it when it already exists
    Create {
        #[arg(long)]
        tenant: TenantId,
        version: String,
        /// Project slug to link; repeat for several projects
        #[arg(short, long = "project", value_name = "SLUG")]
        projects: Vec<String>,
        #[arg(long = "ref", value_name = "REF")]
        ref_name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        owner: Option<i64>,
        /// Start time in epoch milliseconds
        #[arg(long, value_name = "EPOCH_MS")]
        date_started: Option<i64>,
        /// Ship time in epoch milliseconds; makes the release live
        #[arg(long, value_name = "EPOCH_MS")]
        date_released: Option<i64>,
    },

    /// Show a release with its linked projects and activities
    Show {
        #[arg(long)]
        tenant: TenantId,
        version: String,
    },
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Logging(LoggingError),
    Db(DbError),
    Repo(RepoError),
    Lock(LockError),
    Create(CreateReleaseError),
    NotFound { tenant: TenantId, version: String },
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Create(err) if err.is_user_facing() => 2,
            Self::NotFound { .. } => 2,
            _ => 1,
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "database error: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Lock(err) => write!(f, "{err}"),
            Self::Create(err) => write!(f, "{err}"),
            Self::NotFound { tenant, version } => {
                write!(f, "release `{version}` not found for tenant {tenant}")
            }
        }
    }
}

impl Error for CliError {}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(impl From<$source> for CliError {
            fn from(value: $source) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

impl_from!(
    ConfigError => Config,
    LoggingError => Logging,
    DbError => Db,
    RepoError => Repo,
    LockError => Lock,
    CreateReleaseError => Create,
);

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_command module=cli status=error error={err}");
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| database_dir(&cli.db));
    let config = CoreConfig::load(&config_dir)?;

    if let Some(log_dir) = cli.log_dir.as_deref() {
        init_logging(&config.logging.level, log_dir)?;
    }

    let conn = open_db(&cli.db)?;

    match cli.command {
        Commands::Project {
            command: ProjectCommand::Add { tenant, slug, name },
        } => {
            let repo = SqliteProjectRepository::try_new(&conn)?;
            let name = name.unwrap_or_else(|| slug.clone());
            let project = repo.create_project(tenant, &slug, &name)?;
            print_json(&json!({ "project": project }));
        }
        Commands::Release {
            command:
                ReleaseCommand::Create {
                    tenant,
                    version,
                    projects,
                    ref_name,
                    url,
                    owner,
                    date_started,
                    date_released,
                },
        } => {
            let locks = SqliteLockService::open(&cli.db)?;
            let service =
                ReleaseCreationService::try_new(&conn, &locks, LogNotifier, &config.lock)?;
            let request = CreateReleaseRequest {
                version,
                ref_name,
                url,
                owner_id: owner,
                date_started,
                date_released,
                projects,
            };

            let creation = service.create_or_get_release(tenant, &request)?;
            let failures: Vec<_> = creation
                .dispatch
                .failures
                .iter()
                .map(|failure| json!({ "project_id": failure.project_id, "error": failure.kind.to_string() }))
                .collect();
            print_json(&json!({
                "status": creation.outcome.status_code(),
                "created": creation.created(),
                "release": creation.release,
                "newly_linked": creation.newly_linked,
                "notified": creation.dispatch.notified,
                "notification_failures": failures,
            }));
        }
        Commands::Release {
            command: ReleaseCommand::Show { tenant, version },
        } => {
            let release = SqliteReleaseRepository::try_new(&conn)?
                .find_release(tenant, &version)?
                .ok_or(CliError::NotFound { tenant, version })?;
            let associations =
                AssociationManager::new(SqliteReleaseProjectRepository::try_new(&conn)?);
            let projects = associations.linked_projects(&release)?;
            let activities =
                SqliteActivityRepository::try_new(&conn)?.list_release_activities(release.id)?;
            print_json(&json!({
                "live": release.is_live(),
                "release": release,
                "projects": projects,
                "activities": activities,
            }));
        }
    }

    Ok(())
}

fn database_dir(db: &Path) -> PathBuf {
    match db.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("Error: failed to render output: {err}"),
    }
}
