use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use janus_core::{ExtractOutcome, FeatureExtractor};
use janus_hw::Camera;
use janus_store::Store;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "janus", about = "Janus door controller CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame to a JPEG file (camera diagnostics)
    Capture {
        /// Output path
        #[arg(short, long, default_value = "frame.jpg")]
        output: PathBuf,
        /// Camera device
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },
    /// Create or update an administrator
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Enroll a face from a photo, bypassing the daemon
    Enroll {
        /// Name to enroll under
        #[arg(short, long)]
        name: String,
        /// Path to a JPEG or PNG photo with exactly one prominent face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List enrolled faces
    List,
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Set credentials (password from --password or JANUS_ADMIN_PASSWORD)
    Set {
        username: String,
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Capture { output, device } => {
            let camera = Camera::open(&device, 640, 480)?;
            let frame = camera.capture_frame()?;
            let jpeg = frame.to_jpeg(90)?;
            std::fs::write(&output, &jpeg)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "captured {}x{} frame to {}",
                frame.width,
                frame.height,
                output.display()
            );
        }
        Commands::Admin { command } => match command {
            AdminCommands::Set { username, password } => {
                let password = match password.or_else(|| std::env::var("JANUS_ADMIN_PASSWORD").ok())
                {
                    Some(p) if !p.is_empty() => p,
                    _ => bail!("provide --password or set JANUS_ADMIN_PASSWORD"),
                };
                let store = open_store().await?;
                store.admins().upsert(&username, &password).await?;
                println!("administrator '{username}' updated");
            }
        },
        Commands::Enroll { name, image } => {
            let photo = image::open(&image)
                .with_context(|| format!("failed to read {}", image.display()))?
                .to_rgb8();
            let (width, height) = (photo.width(), photo.height());
            let rgb = photo.into_raw();

            let model_dir = std::env::var("JANUS_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| janus_core::default_model_dir());
            let mut extractor = FeatureExtractor::load(&model_dir)?;

            match extractor.extract(&rgb, width, height)? {
                ExtractOutcome::NoFace => bail!("no face detected in {}", image.display()),
                ExtractOutcome::Face(embedding) => {
                    let store = open_store().await?;
                    let id = store.gallery().append(&name, &embedding).await?;
                    println!("enrolled '{name}' with id {id}");
                    println!("note: a running janusd picks this up on its next enrollment refresh or restart");
                }
            }
        }
        Commands::List => {
            let store = open_store().await?;
            let faces = store.gallery().list().await?;
            if faces.is_empty() {
                println!("no faces enrolled");
            }
            for face in faces {
                println!("{:>4}  {}  (enrolled {})", face.id, face.name, face.created_at);
            }
        }
    }

    Ok(())
}

/// Open the store with the same path resolution as the daemon.
async fn open_store() -> Result<Store> {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("janus");

    let db_path = std::env::var("JANUS_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("janus.db"));
    let key_path = std::env::var("JANUS_KEY_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("gallery.key"));

    Store::open(&db_path, &key_path)
        .await
        .context("failed to open store")
}
