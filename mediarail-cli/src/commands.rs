//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use mediarail_core::config::MediarailConfig;
use mediarail_core::ingest::{FfmpegTranscoder, IngestService, IngestStage};
use mediarail_core::media::MediaBlob;
use mediarail_core::storage::CancelFlag;
use mediarail_core::{HttpBackend, MediarailError, Result};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Upload a video into the asset library
    Ingest {
        /// Path to the video file
        file: PathBuf,
        /// Title for the catalog record
        #[arg(short, long)]
        title: String,
        /// Description for the catalog record
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List all assets in the library
    List,
    /// Update an existing asset
    Edit {
        /// Catalog record identifier
        id: String,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
        /// Replacement video file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Resolve and print the playback URL for an asset
    Resolve {
        /// Catalog record identifier
        id: String,
    },
    /// Delete an asset from the catalog
    Remove {
        /// Catalog record identifier
        id: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    let service = build_service()?;

    match command {
        Commands::Ingest {
            file,
            title,
            description,
        } => ingest(&service, file, title, description).await,
        Commands::List => list(&service).await,
        Commands::Edit {
            id,
            title,
            description,
            file,
        } => edit(&service, id, title, description, file).await,
        Commands::Resolve { id } => resolve(&service, id).await,
        Commands::Remove { id } => remove(&service, id).await,
    }
}

fn build_service() -> Result<IngestService> {
    let config = MediarailConfig::from_env();

    let backend = HttpBackend::new(&config.network)
        .map_err(mediarail_core::storage::StorageError::from)
        .map_err(MediarailError::from)?;
    let transcoder = FfmpegTranscoder::new(config.transcode.clone());

    Ok(IngestService::new(
        config,
        Arc::new(backend),
        Arc::new(transcoder),
    ))
}

async fn ingest(
    service: &IngestService,
    file: PathBuf,
    title: String,
    description: String,
) -> Result<()> {
    let blob = MediaBlob::from_path(&file).await?;
    println!("Ingesting {} ({} bytes)", blob.file_name(), blob.len());

    let (mut events, run) = service.start_ingest(blob, title, description);

    let reporter = async {
        let mut last_stage = *events.stage.borrow();
        // The progress sender drops early when no compression happens; only
        // the stage channel closing means the run is over.
        let mut progress_open = true;
        loop {
            tokio::select! {
                changed = events.stage.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let stage = *events.stage.borrow();
                    if stage != last_stage {
                        last_stage = stage;
                        match stage {
                            IngestStage::NeedsCompression => {
                                println!("File exceeds the size limit, compressing...");
                            }
                            IngestStage::Uploading => println!("Uploading..."),
                            IngestStage::Persisting => println!("Saving catalog record..."),
                            _ => {}
                        }
                    }
                }
                changed = events.compression_percent.changed(), if progress_open => {
                    if changed.is_err() {
                        progress_open = false;
                        continue;
                    }
                    let percent = *events.compression_percent.borrow();
                    print!("\rCompressing: {percent}%");
                    if percent == 100 {
                        println!();
                    }
                }
            }
        }
    };

    let (record, ()) = tokio::join!(run, reporter);
    let record = record?;

    println!("Ingested: {}", record.title);
    if !record.id.is_empty() {
        println!("  Record id: {}", record.id);
    }
    println!("  Reference: {}", record.reference);
    if record.duration_seconds > 0 {
        println!("  Duration: {}s", record.duration_seconds);
    }

    Ok(())
}

async fn list(service: &IngestService) -> Result<()> {
    let records = service.list().await?;

    println!("Asset Library");
    println!("{:-<60}", "");

    if records.is_empty() {
        println!("No assets yet.");
        println!("Use 'mediarail ingest <file> --title <title>' to add one.");
        return Ok(());
    }

    for record in &records {
        println!("{}  {}", record.id, record.title);
        if record.duration_seconds > 0 {
            println!("    duration: {}s", record.duration_seconds);
        }
        println!("    reference: {}", record.reference);
    }
    println!("\n{} asset(s)", records.len());

    Ok(())
}

async fn edit(
    service: &IngestService,
    id: String,
    title: Option<String>,
    description: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let replacement = match file {
        Some(path) => Some(MediaBlob::from_path(&path).await?),
        None => None,
    };

    let record = service.edit(&id, title, description, replacement).await?;
    println!("Updated asset {}", record.id);
    if !record.title.is_empty() {
        println!("  Title: {}", record.title);
    }
    if record.duration_seconds > 0 {
        println!("  Duration: {}s", record.duration_seconds);
    }

    Ok(())
}

async fn resolve(service: &IngestService, id: String) -> Result<()> {
    let records = service.list().await?;
    let record = records
        .into_iter()
        .find(|record| record.id == id)
        .ok_or_else(|| {
            MediarailError::Catalog(mediarail_core::CatalogError::NotFound { id: id.clone() })
        })?;

    let url = service.playback_url(&record, &CancelFlag::new()).await?;
    println!("{url}");

    Ok(())
}

async fn remove(service: &IngestService, id: String) -> Result<()> {
    service.remove(&id).await?;
    println!("Removed asset {id}");

    Ok(())
}
