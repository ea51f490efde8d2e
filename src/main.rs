//! git-workbench - command line front end
//!
//! Run with `git-workbench --help` for usage.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use git_workbench::{
    APP_NAME, VERSION,
    config::{Config, PreferenceStore},
    credentials::{CredentialStore, Credentials, FileKeyVault, PushDefault},
    git::{
        CommitOptions, DiffLineKind, FetchOptions, OperationProgress, ProgressCallback,
        PullOptions, PushOptions,
    },
    orchestrator::{GitOutcome, RepositoryOrchestrator},
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Manage local git repositories: status, diffs, staging, remotes and credentials")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Repository directory (default: current directory)
    #[arg(short, long)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show repository status
    Status,

    /// List changed files
    Changes,

    /// Show commit history
    Log {
        /// Maximum number of commits
        #[arg(short = 'n', long, default_value_t = 20)]
        max_count: usize,
    },

    /// List local and remote branches
    Branches,

    /// Show the diff of one file
    Diff {
        path: String,

        /// Diff the index instead of the working tree
        #[arg(long)]
        staged: bool,
    },

    /// Stage files
    Stage {
        paths: Vec<String>,

        /// Stage every change
        #[arg(short, long)]
        all: bool,
    },

    /// Unstage files
    Unstage { paths: Vec<String> },

    /// Commit staged changes
    Commit {
        #[arg(short, long)]
        message: String,

        #[arg(long)]
        amend: bool,

        #[arg(long)]
        allow_empty: bool,
    },

    /// Push the current branch
    Push {
        #[arg(long, default_value = "origin")]
        remote: String,

        #[arg(short, long)]
        force: bool,
    },

    /// Fetch and integrate the upstream branch
    Pull {
        #[arg(long, default_value = "origin")]
        remote: String,

        /// Rebase instead of merging (defaults to the stored setting)
        #[arg(long)]
        rebase: Option<bool>,
    },

    /// Fetch from a remote
    Fetch {
        #[arg(long, default_value = "origin")]
        remote: String,

        #[arg(long)]
        prune: bool,
    },

    /// Clone a repository
    Clone {
        url: String,
        directory: PathBuf,

        #[arg(short, long)]
        branch: Option<String>,

        /// Fetch only the latest commit
        #[arg(long)]
        shallow: bool,
    },

    /// Show or set the commit identity
    Identity {
        #[arg(long, requires = "email")]
        name: Option<String>,

        #[arg(long, requires = "name")]
        email: Option<String>,
    },

    /// Manage stored credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Show or change repository settings
    Settings {
        #[arg(long)]
        auto_fetch: Option<bool>,

        /// Minutes between automatic fetches (clamped to 5..=60)
        #[arg(long)]
        fetch_interval: Option<i64>,

        #[arg(long, value_enum)]
        push_default: Option<PushDefaultArg>,

        #[arg(long)]
        pull_rebase: Option<bool>,
    },

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Store credentials for a host, or the defaults when no host is given
    Set {
        username: String,

        /// Password or token (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        host: Option<String>,
    },

    /// Remove credentials for a host, or the defaults when no host is given
    Remove {
        #[arg(long)]
        host: Option<String>,
    },

    /// Show which username would be used for a remote URL
    Show { url: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum PushDefaultArg {
    Current,
    Matching,
    Simple,
}

impl From<PushDefaultArg> for PushDefault {
    fn from(arg: PushDefaultArg) -> Self {
        match arg {
            PushDefaultArg::Current => PushDefault::Current,
            PushDefaultArg::Matching => PushDefault::Matching,
            PushDefaultArg::Simple => PushDefault::Simple,
        }
    }
}

fn setup_logging(debug: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("info")
            .add_directive("git2=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
    };

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

/// Progress printer for network operations
fn print_progress() -> ProgressCallback {
    Arc::new(|progress: OperationProgress| {
        if progress.total > 0 {
            eprint!("\r{}: {:>3}% {}", progress.operation, progress.percent(), progress.message);
        } else {
            eprint!("\r{}: {}", progress.operation, progress.message);
        }
    })
}

/// Print the outcome message and turn errors into a failing exit
fn report<T>(outcome: GitOutcome<T>) -> Result<Option<T>> {
    match outcome {
        GitOutcome::Success { message, data } => {
            if let Some(message) = message {
                println!("{}", message);
            }
            Ok(Some(data))
        }
        GitOutcome::Error { message, .. } => Err(eyre!(message)),
        GitOutcome::InProgress { operation, .. } => {
            println!("{} is already running", operation);
            Ok(None)
        }
    }
}

fn read_secret() -> Result<String> {
    eprint!("Password or token: ");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config, using defaults: {}", e);
        Config::default()
    });

    // Ensure required directories exist
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Failed to create directories: {}", e);
    }

    setup_logging(cli.debug || config.debug, config.log_file.as_ref())?;
    info!("Starting {} v{}", APP_NAME, VERSION);

    let store = Arc::new(CredentialStore::new(
        PreferenceStore::load(&config)?,
        Arc::new(FileKeyVault::new(config.key_path()?)),
    ));

    match &cli.command {
        Commands::Identity { name, email } => {
            if let (Some(name), Some(email)) = (name, email) {
                store.set_identity(name, email)?;
            }
            let identity = store.identity();
            if identity.is_complete() {
                println!("{} <{}>", identity.name, identity.email);
            } else {
                println!("No identity configured");
            }
            return Ok(());
        }

        Commands::Credentials { action } => {
            match action {
                CredentialAction::Set {
                    username,
                    password,
                    host,
                } => {
                    let password = match password {
                        Some(password) => password.clone(),
                        None => read_secret()?,
                    };
                    let credentials = Credentials::new(username.as_str(), password);
                    match host {
                        Some(host) => store.save_host_credentials(host, &credentials)?,
                        None => store.save_default_credentials(&credentials)?,
                    }
                    println!("Credentials saved");
                }
                CredentialAction::Remove { host } => {
                    match host {
                        Some(host) => store.remove_host_credentials(host)?,
                        None => store.remove_default_credentials()?,
                    }
                    println!("Credentials removed");
                }
                CredentialAction::Show { url } => match store.credentials_for_url(url) {
                    Some(credentials) => println!("{}", credentials.username),
                    None => println!("No credentials for {}", url),
                },
            }
            return Ok(());
        }

        Commands::Settings {
            auto_fetch,
            fetch_interval,
            push_default,
            pull_rebase,
        } => {
            if let Some(enabled) = *auto_fetch {
                store.set_auto_fetch(enabled)?;
            }
            if let Some(minutes) = *fetch_interval {
                store.set_fetch_interval_minutes(minutes)?;
            }
            if let Some(mode) = *push_default {
                store.set_push_default(mode.into())?;
            }
            if let Some(rebase) = *pull_rebase {
                store.set_pull_rebase(rebase)?;
            }
            let settings = store.repository_settings();
            println!("auto_fetch: {}", settings.auto_fetch);
            println!("fetch_interval_minutes: {}", settings.fetch_interval_minutes);
            println!("push_default: {}", settings.push_default);
            println!("pull_rebase: {}", settings.pull_rebase);
            return Ok(());
        }

        Commands::Config { init } => {
            if *init {
                config.save()?;
                println!(
                    "Configuration initialized at {:?}",
                    Config::config_file_path()?
                );
            } else {
                println!("Configuration:");
                println!("{}", toml::to_string_pretty(&config)?);
                println!("\nConfig file: {:?}", Config::config_file_path()?);
                println!("Preferences: {:?}", config.preferences_path()?);
            }
            return Ok(());
        }

        _ => {}
    }

    let orchestrator = RepositoryOrchestrator::new(config, Arc::clone(&store));

    if let Commands::Clone {
        url,
        directory,
        branch,
        shallow,
    } = &cli.command
    {
        let outcome = orchestrator
            .clone_repository(url, directory, branch.clone(), *shallow, Some(print_progress()))
            .await;
        eprintln!();
        report(outcome)?;
        return Ok(());
    }

    let repo = match cli.repo {
        Some(repo) => repo,
        None => std::env::current_dir()?,
    };
    if report(orchestrator.open_repository(&repo).await)? != Some(true) {
        return Err(eyre!("{:?} is not a git repository", repo));
    }

    match cli.command {
        Commands::Status => {
            let status = orchestrator.subscribe_status().borrow().clone();
            println!("On branch {}", status.current_branch);
            if let Some(url) = &status.remote_url {
                println!("Remote: {}", url);
            }
            if status.ahead_count > 0 || status.behind_count > 0 {
                println!(
                    "Ahead {}, behind {}",
                    status.ahead_count, status.behind_count
                );
            }
            if status.is_clean {
                println!("Working tree clean");
            }
        }

        Commands::Changes => {
            for file in orchestrator.subscribe_changed_files().borrow().iter() {
                let column = if file.is_staged { "staged  " } else { "unstaged" };
                println!("{} {} {}", column, file.status.symbol(), file.path);
            }
        }

        Commands::Log { max_count } => {
            if let Some(commits) = report(orchestrator.commit_history(max_count).await)? {
                for commit in commits {
                    let when = DateTime::from_timestamp_millis(commit.timestamp_millis)
                        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!(
                        "{} {} {} ({})",
                        commit.short_id, when, commit.message, commit.author_name
                    );
                }
            }
        }

        Commands::Branches => {
            for branch in orchestrator.subscribe_branches().borrow().iter() {
                let marker = if branch.is_current { '*' } else { ' ' };
                let tracking = match &branch.tracking_branch {
                    Some(upstream) => format!(
                        " [{}: ahead {}, behind {}]",
                        upstream, branch.ahead_count, branch.behind_count
                    ),
                    None => String::new(),
                };
                println!("{} {}{}", marker, branch.name, tracking);
            }
        }

        Commands::Diff { path, staged } => {
            if let Some(diff) = report(orchestrator.file_diff(&path, staged).await)? {
                if diff.is_binary {
                    println!("Binary file {} differs", diff.path);
                } else if diff.is_unchanged() {
                    println!("No changes in {}", diff.path);
                }
                for hunk in &diff.hunks {
                    for line in &hunk.lines {
                        let prefix = match line.kind {
                            DiffLineKind::Header => "",
                            DiffLineKind::Context => " ",
                            DiffLineKind::Addition => "+",
                            DiffLineKind::Deletion => "-",
                        };
                        println!("{}{}", prefix, line.content);
                    }
                }
            }
        }

        Commands::Stage { paths, all } => {
            let outcome = if all || paths.is_empty() {
                orchestrator.stage_all().await
            } else {
                orchestrator.stage(paths).await
            };
            report(outcome)?;
        }

        Commands::Unstage { paths } => {
            report(orchestrator.unstage(paths).await)?;
        }

        Commands::Commit {
            message,
            amend,
            allow_empty,
        } => {
            let options = CommitOptions {
                amend,
                allow_empty,
                ..CommitOptions::new(message)
            };
            report(orchestrator.commit(options).await)?;
        }

        Commands::Push { remote, force } => {
            let options = PushOptions {
                remote,
                force,
                ..Default::default()
            };
            let outcome = orchestrator.push(options, Some(print_progress())).await;
            eprintln!();
            report(outcome)?;
        }

        Commands::Pull { remote, rebase } => {
            let options = PullOptions {
                remote,
                rebase: rebase.unwrap_or(store.repository_settings().pull_rebase),
                ..Default::default()
            };
            let outcome = orchestrator.pull(options, Some(print_progress())).await;
            eprintln!();
            report(outcome)?;
        }

        Commands::Fetch { remote, prune } => {
            let options = FetchOptions {
                remote,
                prune,
                ..Default::default()
            };
            let outcome = orchestrator.fetch(options, Some(print_progress())).await;
            eprintln!();
            report(outcome)?;
        }

        // Handled before a repository is opened
        Commands::Clone { .. }
        | Commands::Identity { .. }
        | Commands::Credentials { .. }
        | Commands::Settings { .. }
        | Commands::Config { .. } => {}
    }

    orchestrator.close_all().await;
    Ok(())
}
