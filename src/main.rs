use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use totp_vpn::notify::{self, Report};
use totp_vpn::otp::{self, ImageQrDecoder};
use totp_vpn::{Config, NewProfile, ProfileStore, StatusPoller, TunnelManager};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG_FILE: &str = "totp-vpn.toml";

#[derive(Parser)]
#[command(name = "totp-vpn")]
#[command(about = "OpenVPN profile manager with TOTP challenge-response")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./totp-vpn.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect using a stored profile
    Connect {
        /// Profile id or name
        profile: String,
    },
    /// Stop the running VPN client
    Disconnect,
    /// Show current VPN status
    Status,
    /// Print state changes until Ctrl+C
    Watch,
    /// Generate default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Manage stored profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List stored profiles
    List,
    /// Store a new profile
    Add {
        #[arg(long)]
        name: String,
        #[arg(short, long)]
        username: String,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
        /// Image of the TOTP enrolment QR code
        #[arg(long)]
        qr: PathBuf,
        /// OpenVPN config file
        #[arg(long)]
        ovpn: PathBuf,
    },
    /// Show a profile (password hidden)
    Show {
        /// Profile id or name
        profile: String,
    },
    /// Delete a profile
    Remove {
        /// Profile id or name
        profile: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Init { force } = cli.command {
        let path = cli
            .config
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if path.exists() && !force {
            return Err(format!("{} already exists (use --force)", path.display()).into());
        }
        info!("Generating default config...");
        Config::default().save(&path)?;
        println!("Created default config: {}", path.display());
        return Ok(());
    }

    let config = Config::discover(cli.config.as_deref())?;
    let store = ProfileStore::new(&config.catalog.path);

    match cli.command {
        Commands::Connect { profile } => {
            let profile = store.find(&profile)?;
            let manager = Arc::new(TunnelManager::from_config(&config)?);

            let worker = manager.clone();
            let result = with_poller(manager, config.timing.poll_interval(), async move {
                worker.connect(&profile).await
            })
            .await?;

            notify::show(&Report::for_connect(&result), config.notifications);
            if result.is_err() {
                std::process::exit(1);
            }
        }
        Commands::Disconnect => {
            let manager = Arc::new(TunnelManager::from_config(&config)?);

            let worker = manager.clone();
            let result = with_poller(manager, config.timing.poll_interval(), async move {
                worker.disconnect().await
            })
            .await?;

            notify::show(&Report::for_disconnect(&result), config.notifications);
            if result.is_err() {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let manager = TunnelManager::from_config(&config)?;
            let status = manager.status();

            println!("VPN Status: {}", status.state);
            println!("  Interface: {}", status.interface);
            match status.handle_pid {
                Some(pid) if status.client_alive => println!("  Client: running (pid {})", pid),
                Some(pid) => println!("  Client: not running (stale pid {})", pid),
                None => println!("  Client: none"),
            }
        }
        Commands::Watch => {
            let manager = Arc::new(TunnelManager::from_config(&config)?);
            let mut states = manager.subscribe();
            println!("VPN Status: {}", manager.refresh());

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            ctrlc::set_handler(move || {
                let _ = shutdown_tx.send(true);
            })?;

            let poller = StatusPoller::new(manager.clone(), config.timing.poll_interval())
                .spawn(shutdown_rx.clone());

            let mut stop = shutdown_rx;
            loop {
                tokio::select! {
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!("VPN Status: {}", *states.borrow_and_update());
                    }
                    _ = stop.changed() => break,
                }
            }
            poller.await?;
        }
        Commands::Profile { command } => run_profile_command(&store, command)?,
        Commands::Init { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Run `operation` as its own task while the poller keeps the state fresh,
/// printing every state change until the operation finishes
async fn with_poller<F, T>(
    manager: Arc<TunnelManager>,
    period: Duration,
    operation: F,
) -> Result<T, tokio::task::JoinError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut states = manager.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = StatusPoller::new(manager, period).spawn(shutdown_rx);

    let mut task = tokio::spawn(operation);
    let result = loop {
        tokio::select! {
            result = &mut task => break result,
            Ok(()) = states.changed() => {
                println!("Status: {}", *states.borrow_and_update());
            }
        }
    };

    let _ = shutdown_tx.send(true);
    poller.await?;
    result
}

fn run_profile_command(
    store: &ProfileStore,
    command: ProfileCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ProfileCommands::List => {
            let profiles = store.list()?;
            if profiles.is_empty() {
                println!("No profiles stored in {}", store.path().display());
            }
            for (id, name) in profiles {
                println!("{:>4}  {}", id, name);
            }
        }
        ProfileCommands::Add {
            name,
            username,
            password,
            qr,
            ovpn,
        } => {
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Password: ")?,
            };

            if !ovpn.exists() {
                warn!("OpenVPN config {} does not exist", ovpn.display());
            }
            // Catch a bad QR image now rather than on first connect
            if let Err(e) = otp::secret_from_qr(&ImageQrDecoder::new(), &qr) {
                warn!("{}: {}", qr.display(), e);
            }

            let id = store.create(NewProfile {
                name,
                username,
                password,
                qr_code_path: qr,
                ovpn_config_path: ovpn,
            })?;
            println!("Created profile {}", id);
        }
        ProfileCommands::Show { profile } => {
            let profile = store.find(&profile)?;
            println!("Profile {}: {}", profile.id, profile.name);
            println!("  Username: {}", profile.username);
            println!("  Password: ******");
            println!("  QR code:  {}", profile.qr_code_path.display());
            println!("  Config:   {}", profile.ovpn_config_path.display());
        }
        ProfileCommands::Remove { profile } => {
            let profile = store.find(&profile)?;
            store.delete(profile.id)?;
            println!("Removed profile {} ({})", profile.id, profile.name);
        }
    }

    Ok(())
}
