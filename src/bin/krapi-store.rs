use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use krapi_store::types::{Backup, BackupKind, BackupOptions, RestoreOptions};
use krapi_store::{Store, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "krapi-store", about = "Krapi storage maintenance", version)]
struct Args {
  #[arg(short, long)]
  config: Option<String>,
  #[arg(long, env = "KRAPI_DATA_DIR")]
  data_dir: Option<String>,
  #[arg(long, env = "KRAPI_BACKUP_DIR")]
  backup_dir: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Ping the main database and report schema drift
  Health,
  /// Apply pending migrations to the main database and the given projects
  Migrate {
    /// Projects to open and migrate as well
    projects: Vec<String>,
  },
  /// Back up one project
  BackupProject {
    project: String,
    #[arg(long, env = "KRAPI_BACKUP_PASSWORD")]
    password: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
  },
  /// Back up the main database and every project
  BackupSystem {
    #[arg(long, env = "KRAPI_BACKUP_PASSWORD")]
    password: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
  },
  /// Restore a project backup
  RestoreProject {
    backup: Uuid,
    #[arg(long, env = "KRAPI_BACKUP_PASSWORD")]
    password: String,
    /// Replace existing project data
    #[arg(long)]
    overwrite: bool,
  },
  /// List ready backups
  ListBackups {
    #[arg(short, long)]
    project: Option<String>,
    #[arg(short, long)]
    kind: Option<String>,
    #[arg(long)]
    json: bool,
  },
  /// Delete a backup and its archive
  DeleteBackup { backup: Uuid },
  /// Check an archive against its recorded checksum
  VerifyBackup { backup: Uuid },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    StoreConfig::from_file(path)?
  } else {
    StoreConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(dir) = args.data_dir {
    config.storage.data_dir = dir;
  }
  if let Some(dir) = args.backup_dir {
    config.backup.dir = dir;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let store = Store::open(config).await?;

  match args.command {
    Command::Health => {
      let health = store.registry.health_check().await;
      let schema = store.registry.validate_schema().await?;
      print_json(&serde_json::json!({ "health": health, "schema": schema }))?;
      if !health.healthy || schema.iter().any(|r| !r.is_current()) {
        std::process::exit(1);
      }
    }
    Command::Migrate { projects } => {
      for project in &projects {
        store.registry.project(project).await?;
      }
      let applied = store.registry.migrate().await?;
      store.registry.ensure_schema_current().await?;
      print_json(&serde_json::json!({ "applied": applied }))?;
    }
    Command::BackupProject {
      project,
      password,
      description,
    } => {
      let options = BackupOptions {
        description,
        password,
      };
      let created = store.backups.backup_project(&project, options).await?;
      print_created(&created.backup, created.password.as_deref().map(String::as_str))?;
    }
    Command::BackupSystem {
      password,
      description,
    } => {
      let options = BackupOptions {
        description,
        password,
      };
      let created = store.backups.backup_system(options).await?;
      print_created(&created.backup, created.password.as_deref().map(String::as_str))?;
    }
    Command::RestoreProject {
      backup,
      password,
      overwrite,
    } => {
      let report = store
        .backups
        .restore_project(backup, RestoreOptions::new(password).overwrite(overwrite))
        .await?;
      print_json(&report)?;
    }
    Command::ListBackups { project, kind, json } => {
      let kind = kind
        .map(|k| k.parse::<BackupKind>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
      let backups = store.backups.list_backups(project.as_deref(), kind).await?;
      if json {
        print_json(&backups)?;
      } else {
        print_backup_table(&backups);
      }
    }
    Command::DeleteBackup { backup } => {
      let deleted = store.backups.delete_backup(backup).await?;
      print_json(&serde_json::json!({ "id": backup, "deleted": deleted }))?;
    }
    Command::VerifyBackup { backup } => {
      let valid = store.backups.verify_backup(backup).await?;
      print_json(&serde_json::json!({ "id": backup, "valid": valid }))?;
      if !valid {
        std::process::exit(1);
      }
    }
  }

  Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), anyhow::Error> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_created(backup: &Backup, generated_password: Option<&str>) -> Result<(), anyhow::Error> {
  print_json(backup)?;
  if let Some(password) = generated_password {
    eprintln!("Generated backup password (shown once, store it safely): {}", password);
  }
  Ok(())
}

fn print_backup_table(backups: &[Backup]) {
  let mut table = Table::new();
  table.load_preset(UTF8_FULL);
  table.set_header(vec!["id", "kind", "project", "created", "size", "description"]);
  for b in backups {
    table.add_row(vec![
      b.id.to_string(),
      b.kind.to_string(),
      b.project_id.clone().unwrap_or_else(|| "-".into()),
      b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
      b.size.to_string(),
      b.description.clone().unwrap_or_default(),
    ]);
  }
  println!("{table}");
}
