use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pickup::server::{self, ExchangeState};
use pickup::workflow::NO_FILES_MESSAGE;
use pickup::{
    CodeInput, Config, Deleted, Error, FetchOutcome, PickupCode, PublishItem, RegistryEvent,
    Workflow,
};

#[derive(Parser)]
#[command(name = "pickup", version, about = "Share files with short pickup codes")]
struct Cli {
    /// Config file (defaults to <config_dir>/pickup/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root for the registry and file copies
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Exchange service base URL
    #[arg(long, global = true, env = "PICKUP_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an in-memory exchange service
    Serve {
        #[arg(long, env = "API_PORT", default_value = "4020")]
        port: u16,
    },
    #[command(flatten)]
    Local(LocalCommand),
}

/// Commands that work on the local registry and talk to the exchange.
#[derive(Subcommand)]
enum LocalCommand {
    /// List stored files, newest first
    List,
    /// Copy a file into local storage
    Import {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        mime_type: Option<String>,
    },
    /// Delete a stored file
    Delete { id: String },
    /// Share a stored file and mark it delivered
    Share { id: String },
    /// Open a stored file
    Open { id: String },
    /// Store files locally and obtain a pickup code
    Publish {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Remote URL for each path, in order
        #[arg(long = "remote-url")]
        remote_urls: Vec<String>,
    },
    /// Fetch the files behind a code
    Retrieve {
        code: String,
        /// Treat the input as a scanned payload
        #[arg(long)]
        scan: bool,
        /// Download every file into local storage
        #[arg(long)]
        download: bool,
    },
    /// Check whether a code is known to the exchange
    Exists {
        code: String,
        #[arg(long)]
        scan: bool,
    },
    /// Delete a code and its files from the exchange
    Revoke { code: String },
    /// Print the file list whenever it changes
    Watch,
}

fn load_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(root) = &cli.root {
        config.storage_root = root.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    config
}

fn code_input(code: String, scan: bool) -> CodeInput {
    if scan {
        CodeInput::Scanned(code)
    } else {
        CodeInput::Typed(code)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pickup=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn serve(port: u16) -> pickup::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::io(e, format!("binding {addr}")))?;
    server::serve(listener, ExchangeState::new())
        .await
        .map_err(|e| Error::io(e, "serving exchange"))
}

async fn run(command: Command, config: Config) -> pickup::Result<()> {
    match command {
        Command::Serve { port } => serve(port).await,
        Command::Local(command) => {
            let workflow = Workflow::from_config(&config).await?;
            run_local(command, &workflow, &config).await
        }
    }
}

async fn run_local(
    command: LocalCommand,
    workflow: &Workflow,
    config: &Config,
) -> pickup::Result<()> {
    match command {
        LocalCommand::List => print_files(workflow).await,
        LocalCommand::Import {
            path,
            name,
            mime_type,
        } => {
            let record = workflow
                .import(&path, name.as_deref(), mime_type.as_deref())
                .await?;
            println!("{}\t{}", record.id, record.name);
        }
        LocalCommand::Delete { id } => {
            workflow.delete_file(&id).await?;
            println!("deleted {id}");
        }
        LocalCommand::Share { id } => {
            let record = workflow.share_file(&id).await?;
            println!("{}", record.summary(Utc::now()));
        }
        LocalCommand::Open { id } => {
            let strategy = workflow.open_file(&id).await?;
            info!(file_id = %id, strategy, "opened");
            println!("opened with {strategy}");
        }
        LocalCommand::Publish { paths, remote_urls } => {
            if !remote_urls.is_empty() && remote_urls.len() != paths.len() {
                return Err(Error::Validation(
                    "give one --remote-url per path, or none".to_string(),
                ));
            }
            let items: Vec<PublishItem> = paths
                .into_iter()
                .enumerate()
                .map(|(i, path)| PublishItem {
                    path,
                    remote_url: remote_urls.get(i).cloned(),
                    mime_type: None,
                })
                .collect();

            let outcome = workflow.publish(&items).await?;
            for record in &outcome.records {
                println!("stored {}\t{}", record.id, record.name);
            }
            let published = outcome.upload?;
            println!("code: {}", published.code);
            println!("scan: {}", published.scan_payload);
            println!("{}", published.share_message);
        }
        LocalCommand::Retrieve {
            code,
            scan,
            download,
        } => {
            let retrieved = workflow.retrieve(&code_input(code, scan)).await?;
            let files = match retrieved.outcome {
                FetchOutcome::Files(files) => files,
                FetchOutcome::NoFiles => {
                    println!("{NO_FILES_MESSAGE}");
                    return Ok(());
                }
            };
            for file in &files {
                let mime_type = file.mime_type.as_deref().unwrap_or("unknown");
                println!("{}\t{}\t{}", file.name, mime_type, file.url);
            }
            if download {
                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_interrupt.cancel();
                    }
                });
                for file in &files {
                    let record = workflow.download(file, &cancel).await?;
                    println!("saved {}\t{}", record.id, record.name);
                }
            }
        }
        LocalCommand::Exists { code, scan } => {
            let exists = workflow.check_code(&code_input(code, scan)).await?;
            println!("{}", if exists { "exists" } else { "not found" });
        }
        LocalCommand::Revoke { code } => {
            let code = PickupCode::parse(&code)?;
            match workflow.revoke(&code).await? {
                Deleted::Removed => println!("deleted {code}"),
                Deleted::AlreadyGone => println!("{code} was already gone"),
            }
        }
        LocalCommand::Watch => {
            let mut events = workflow.registry().subscribe();
            let _watcher = workflow.registry().watch(config.poll_interval());
            print_files(workflow).await;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(RegistryEvent::Changed) | Err(RecvError::Lagged(_)) => {
                            println!();
                            print_files(workflow).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }
    }
    Ok(())
}

async fn print_files(workflow: &Workflow) {
    let files = workflow.list_files().await;
    if files.is_empty() {
        println!("no files");
        return;
    }
    let now = Utc::now();
    for record in files {
        println!("{}\t{}", record.id, record.summary(now));
    }
}
