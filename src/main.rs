//! filepush - Zero-knowledge encrypted file sharing
//!
//! Usage:
//!   filepush upload <file>...      - Encrypt a file (or a zip of several) and print its share link
//!   filepush text [text]           - Share a snippet of text
//!   filepush download <url>        - Fetch and decrypt a share
//!   filepush info <url>            - Show share metadata
//!   filepush delete <owner_token>  - Delete a share before it expires
//!   filepush status <owner_token>  - Show views and state of a share you own
//!   filepush init                  - Write a default configuration file

use clap::{Parser, Subcommand};
use filepush::{
    config::ClientConfig,
    crypto,
    retrieve::{FileSink, RetrievalOrchestrator},
    share::parse_share_id,
    transport::{HttpTransport, Transport},
    upload::{upload_text, ShareReceipt, UploadOptions, UploadOrchestrator, UploadSource},
    validation::{guess_mime_type, FileCategory},
    Error, Result,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "filepush")]
#[command(author = "filepush Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Zero-knowledge encrypted file sharing")]
struct Cli {
    /// Configuration file path (defaults to ~/.config/filepush/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// API root of the server
        #[arg(long)]
        api_url: Option<String>,

        /// Base URL for share links
        #[arg(long)]
        view_url: Option<String>,
    },

    /// Encrypt and upload a file; several files are bundled into one zip
    Upload {
        /// Files to share
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Name shown to the recipient (defaults to the file name, or <n>_files.zip)
        #[arg(long)]
        name: Option<String>,

        /// MIME type (guessed from the extension if omitted)
        #[arg(long = "type")]
        mime_type: Option<String>,

        /// Lifetime in minutes
        #[arg(short, long)]
        expires_in: Option<u32>,

        /// Require a password (prompted)
        #[arg(long)]
        protect: bool,

        /// Read the access password from file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Encrypt and upload text (from the argument or stdin)
    Text {
        /// Text to share
        text: Option<String>,

        /// Lifetime in minutes
        #[arg(short, long)]
        expires_in: Option<u32>,

        /// Require a password (prompted)
        #[arg(long)]
        protect: bool,

        /// Read the access password from file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Download and decrypt a share
    Download {
        /// Complete share link including the #key= fragment
        url: String,

        /// Directory to save into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Read the access password from file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Show metadata for a share
    Info {
        /// Share link (the key is not needed and never sent)
        url: String,
    },

    /// Delete a share using its owner token
    Delete {
        /// Owner token printed at upload time
        owner_token: String,
    },

    /// Show view count and state of a share using its owner token
    Status {
        /// Owner token printed at upload time
        owner_token: String,
    },

    /// Print a fresh random key in share link form
    Keygen,
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(ClientConfig::default_path);
    let config = ClientConfig::load_or_default(&config_path);

    // Setup logging
    let level = match (&config, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(config), false) => config.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = config.and_then(|config| run_command(cli.command, &config_path, config));
    if let Err(e) = result {
        error!("Error: {}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path, config: ClientConfig) -> Result<()> {
    match command {
        Commands::Init { api_url, view_url } => cmd_init(config_path, config, api_url, view_url),

        Commands::Upload {
            files,
            name,
            mime_type,
            expires_in,
            protect,
            password_file,
        } => cmd_upload(&config, files, name, mime_type, expires_in, protect, password_file),

        Commands::Text {
            text,
            expires_in,
            protect,
            password_file,
        } => cmd_text(&config, text, expires_in, protect, password_file),

        Commands::Download {
            url,
            output,
            password_file,
        } => cmd_download(&config, &url, &output, password_file),

        Commands::Info { url } => cmd_info(&config, &url),

        Commands::Delete { owner_token } => cmd_delete(&config, &owner_token),

        Commands::Status { owner_token } => cmd_status(&config, &owner_token),

        Commands::Keygen => cmd_keygen(),
    }
}

fn runtime() -> Result<Runtime> {
    Runtime::new().map_err(Error::Io)
}

fn cmd_init(
    config_path: &Path,
    mut config: ClientConfig,
    api_url: Option<String>,
    view_url: Option<String>,
) -> Result<()> {
    if let Some(url) = api_url {
        config.server.api_url = url;
    }
    if let Some(url) = view_url {
        config.server.view_url = url;
    }
    config.validate()?;
    config.save(config_path)?;

    info!("Configuration saved to {:?}", config_path);
    Ok(())
}

fn cmd_upload(
    config: &ClientConfig,
    mut files: Vec<PathBuf>,
    name: Option<String>,
    mime_type: Option<String>,
    expires_in: Option<u32>,
    protect: bool,
    password_file: Option<PathBuf>,
) -> Result<()> {
    let expires_in = expires_in.unwrap_or(config.upload.default_expiry_minutes);

    let (source, mut options) = if files.len() > 1 {
        info!("Bundling {} files into one archive", files.len());
        let mut options = UploadOptions::bundle(files.len(), expires_in);
        if let Some(name) = name {
            options.file_name = name;
        }
        (UploadSource::Bundle(files), options)
    } else {
        let file = files
            .pop()
            .ok_or_else(|| Error::Validation("no files selected".to_string()))?;
        let file_name = match name {
            Some(name) => name,
            None => file
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| Error::Validation(format!("cannot derive a name from {:?}", file)))?,
        };
        let mime_type = mime_type.unwrap_or_else(|| guess_mime_type(&file_name).to_string());
        (UploadSource::Path(file), UploadOptions::new(file_name, mime_type, expires_in))
    };
    options.password = read_upload_password(protect, password_file)?;

    info!(
        "Encrypting {} as {} ({:?})",
        options.file_name,
        options.mime_type,
        FileCategory::of(&options.mime_type)
    );

    let transport = HttpTransport::new(&config.server)?;
    let receipt = runtime()?.block_on(async {
        let mut flow = UploadOrchestrator::from_config(&transport, config);
        flow.run(source, options).await
    })?;

    print_receipt(&receipt);
    Ok(())
}

fn cmd_text(
    config: &ClientConfig,
    text: Option<String>,
    expires_in: Option<u32>,
    protect: bool,
    password_file: Option<PathBuf>,
) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| Error::SourceRead(format!("stdin: {}", e)))?;
            buf
        }
    };

    let mut options = UploadOptions::text(expires_in.unwrap_or(config.upload.default_expiry_minutes));
    options.password = read_upload_password(protect, password_file)?;

    let transport = HttpTransport::new(&config.server)?;
    let receipt = runtime()?.block_on(upload_text(
        &transport,
        &config.server.view_url,
        &text,
        options,
    ))?;

    print_receipt(&receipt);
    Ok(())
}

fn cmd_download(
    config: &ClientConfig,
    url: &str,
    output: &Path,
    password_file: Option<PathBuf>,
) -> Result<()> {
    let transport = HttpTransport::new(&config.server)?;
    let mut sink = FileSink::new(output);

    runtime()?.block_on(async {
        let mut flow = RetrievalOrchestrator::new(&transport);
        let meta = flow.open(url).await?;
        info!(
            "Share: {} ({}, {} bytes, expires {})",
            meta.file_name, meta.mime_type, meta.size, meta.expires_at
        );

        if flow.needs_password() {
            let password = match &password_file {
                Some(path) => read_password_file(path)?,
                None => prompt_password("Enter the password for this file: ")?,
            };
            flow.submit_password(&password)?;
        }

        flow.deliver_to(&mut sink).await
    })?;

    for path in sink.saved() {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_info(config: &ClientConfig, url: &str) -> Result<()> {
    let opaque_id = parse_share_id(url)?;

    let transport = HttpTransport::new(&config.server)?;
    let meta = runtime()?.block_on(transport.info(&opaque_id))?;

    println!("Name:       {}", meta.file_name);
    println!("Type:       {} ({:?})", meta.mime_type, FileCategory::of(&meta.mime_type));
    println!("Size:       {} bytes", meta.size);
    println!("Expires:    {}", meta.expires_at);
    println!("Views:      {}", meta.view_count);
    println!("Password:   {}", if meta.password_protected { "required" } else { "none" });
    Ok(())
}

fn cmd_delete(config: &ClientConfig, owner_token: &str) -> Result<()> {
    let transport = HttpTransport::new(&config.server)?;
    runtime()?.block_on(transport.delete(owner_token))?;
    info!("Share deleted");
    Ok(())
}

fn cmd_status(config: &ClientConfig, owner_token: &str) -> Result<()> {
    let transport = HttpTransport::new(&config.server)?;
    let info = runtime()?.block_on(transport.owner_info(owner_token))?;

    println!("Share id:   {}", info.opaque_id);
    println!("Name:       {}", info.file_name);
    println!("Type:       {}", info.mime_type);
    println!("Size:       {} bytes", info.size);
    println!("Created:    {}", info.created_at);
    println!("Expires:    {}", info.expires_at);
    println!("Views:      {}", info.view_count);
    println!("Password:   {}", if info.password_protected { "required" } else { "none" });
    println!("State:      {}", if info.is_deleted { "deleted" } else { "active" });
    Ok(())
}

fn cmd_keygen() -> Result<()> {
    let key = crypto::generate_key();
    println!("{}", crypto::export_key(&key)?);
    Ok(())
}

fn print_receipt(receipt: &ShareReceipt) {
    println!("Share link:   {}", receipt.share_url);
    println!("Owner token:  {}", receipt.owner_token);
    println!("Expires at:   {}", receipt.expires_at);
    if receipt.descriptor.password_protected {
        println!("Password:     required (share it separately)");
    }
}

fn read_upload_password(protect: bool, password_file: Option<PathBuf>) -> Result<Option<String>> {
    match password_file {
        Some(path) => Ok(Some(read_password_file(&path)?)),
        None if protect => Ok(Some(prompt_password("Set a password for this share: ")?)),
        None => Ok(None),
    }
}

fn read_password_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::SourceRead(format!("{}: {}", path.display(), e)))?;
    Ok(content.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_password(message: &str) -> Result<String> {
    rpassword::prompt_password(message).map_err(Error::Io)
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
