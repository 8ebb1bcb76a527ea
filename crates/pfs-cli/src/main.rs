#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pfs_backend::Metadata;
use pfs_config::Config;
use pfs_users::UserRegistry;
use pfs_vfs::MountFs;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pfs", about = "poolfs — pooled-storage filesystem toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a config file and report the composed users and pools.
    Check {
        /// Path to the YAML config file.
        #[arg(long, default_value = "./config.yml")]
        config: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Produce a stored-credential string for the config file.
    Hash {
        /// Password to hash.
        password: String,
        /// Hash scheme.
        #[arg(long, value_enum, default_value = "argon2id")]
        scheme: Scheme,
    },
    /// List a directory as one user sees it.
    Ls {
        #[arg(long, default_value = "./config.yml")]
        config: PathBuf,
        /// User whose composed filesystem to open.
        #[arg(long)]
        user: String,
        /// Directory to list.
        #[arg(default_value = "/")]
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Stat a path as one user sees it.
    Stat {
        #[arg(long, default_value = "./config.yml")]
        config: PathBuf,
        #[arg(long)]
        user: String,
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Stream a file to stdout as one user sees it.
    Cat {
        #[arg(long, default_value = "./config.yml")]
        config: PathBuf,
        #[arg(long)]
        user: String,
        path: String,
    },
    /// Show a user's mount table.
    Mounts {
        #[arg(long, default_value = "./config.yml")]
        config: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scheme {
    Argon2id,
    Sha256,
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Serialize)]
struct CheckOutput {
    bind: String,
    webdav_enabled: bool,
    sftp_enabled: bool,
    pools: Vec<PoolOutput>,
    users: Vec<UserOutput>,
}

#[derive(Serialize)]
struct PoolOutput {
    name: String,
    path: String,
    default_perm: String,
}

#[derive(Serialize)]
struct UserOutput {
    name: String,
    has_password: bool,
    public_keys: usize,
    mounts: Vec<MountOutput>,
}

#[derive(Serialize)]
struct MountOutput {
    prefix: String,
    backend: String,
}

#[derive(Serialize)]
struct EntryOutput {
    name: String,
    mode: String,
    size: u64,
    modified_unix: u64,
    dir: bool,
}

impl EntryOutput {
    fn from_metadata(meta: &Metadata) -> Self {
        Self {
            name: meta.name.clone(),
            mode: meta.mode.render(),
            size: meta.size,
            modified_unix: unix_seconds(meta.modified),
            dir: meta.is_dir(),
        }
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

// ── Command implementations ─────────────────────────────────────────────────

fn load_registry(config: &PathBuf) -> Result<UserRegistry> {
    let config = Config::load(config)
        .with_context(|| format!("load config {}", config.display()))?;
    UserRegistry::new(config).context("compose user filesystems")
}

fn user_fs(registry: &UserRegistry, user: &str) -> Result<MountFs> {
    registry
        .user_fs(user)
        .with_context(|| format!("user {user} is not configured"))
}

fn cmd_check(config: &PathBuf, json: bool) -> Result<()> {
    let registry = load_registry(config)?;
    let cfg = registry.config();

    let pools = cfg
        .pools
        .iter()
        .map(|(name, pool)| PoolOutput {
            name: name.clone(),
            path: pool.path.clone(),
            default_perm: pool.default_perm.0.clone(),
        })
        .collect();

    let mut users = Vec::new();
    for name in registry.user_names() {
        let fs = user_fs(&registry, &name)?;
        let mounts = fs
            .list_mounts()
            .into_iter()
            .map(|mount| MountOutput {
                backend: mount.backend.name().to_owned(),
                prefix: mount.prefix,
            })
            .collect();
        let declared = cfg.users.get(&name);
        users.push(UserOutput {
            name,
            has_password: declared.is_some_and(|user| !user.password.is_empty()),
            public_keys: declared.map_or(0, |user| user.public_keys.len()),
            mounts,
        });
    }

    let output = CheckOutput {
        bind: cfg.bind.clone(),
        webdav_enabled: cfg.webdav.enabled,
        sftp_enabled: cfg.sftp.enabled,
        pools,
        users,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    println!("bind: {}", output.bind);
    println!(
        "services: webdav={} sftp={}",
        output.webdav_enabled, output.sftp_enabled
    );
    println!("pools:");
    for pool in &output.pools {
        println!(
            "  {:<16} {} (default: {:?})",
            pool.name, pool.path, pool.default_perm
        );
    }
    println!("users:");
    for user in &output.users {
        let credentials = match (user.has_password, user.public_keys) {
            (true, 0) => "password".to_owned(),
            (true, keys) => format!("password + {keys} key(s)"),
            (false, 0) => "none".to_owned(),
            (false, keys) => format!("{keys} key(s)"),
        };
        println!("  {:<16} credentials: {credentials}", user.name);
        for mount in &user.mounts {
            println!("    {:<14} [{}]", mount.prefix, mount.backend);
        }
    }
    Ok(())
}

fn cmd_hash(password: &str, scheme: Scheme) -> Result<()> {
    let stored = match scheme {
        Scheme::Argon2id => pfs_auth::hash_password_argon2id(password),
        Scheme::Sha256 => pfs_auth::hash_password_sha256(password),
    };
    println!("{stored}");
    Ok(())
}

fn cmd_ls(config: &PathBuf, user: &str, path: &str, json: bool) -> Result<()> {
    let registry = load_registry(config)?;
    let fs = user_fs(&registry, user)?;
    let mut dir = fs
        .open(path)
        .with_context(|| format!("open {path} as {user}"))?;
    let entries = dir
        .read_dir(-1)
        .with_context(|| format!("list {path} as {user}"))?;
    let entries: Vec<EntryOutput> = entries.iter().map(EntryOutput::from_metadata).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        println!("{} {:>10} {}", entry.mode, entry.size, entry.name);
    }
    Ok(())
}

fn cmd_stat(config: &PathBuf, user: &str, path: &str, json: bool) -> Result<()> {
    let registry = load_registry(config)?;
    let fs = user_fs(&registry, user)?;
    let meta = fs
        .stat(path)
        .with_context(|| format!("stat {path} as {user}"))?;
    let output = EntryOutput::from_metadata(&meta);

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    println!("name:     {}", output.name);
    println!("mode:     {}", output.mode);
    println!("size:     {}", output.size);
    println!("modified: {}", output.modified_unix);
    Ok(())
}

fn cmd_cat(config: &PathBuf, user: &str, path: &str) -> Result<()> {
    let registry = load_registry(config)?;
    let fs = user_fs(&registry, user)?;
    let meta = fs
        .stat(path)
        .with_context(|| format!("stat {path} as {user}"))?;
    if meta.is_dir() {
        bail!("{path} is a directory");
    }
    let mut file = fs
        .open(path)
        .with_context(|| format!("open {path} as {user}"))?;
    let mut stdout = std::io::stdout().lock();
    std::io::copy(&mut file, &mut stdout).with_context(|| format!("read {path}"))?;
    Ok(())
}

fn cmd_mounts(config: &PathBuf, user: &str, json: bool) -> Result<()> {
    let registry = load_registry(config)?;
    let fs = user_fs(&registry, user)?;
    let mounts: Vec<MountOutput> = fs
        .list_mounts()
        .into_iter()
        .map(|mount| MountOutput {
            backend: mount.backend.name().to_owned(),
            prefix: mount.prefix,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&mounts)?);
        return Ok(());
    }
    for mount in &mounts {
        println!("{:<20} [{}]", mount.prefix, mount.backend);
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Check { config, json } => cmd_check(config, *json),
        Command::Hash { password, scheme } => cmd_hash(password, *scheme),
        Command::Ls {
            config,
            user,
            path,
            json,
        } => cmd_ls(config, user, path, *json),
        Command::Stat {
            config,
            user,
            path,
            json,
        } => cmd_stat(config, user, path, *json),
        Command::Cat { config, user, path } => cmd_cat(config, user, path),
        Command::Mounts { config, user, json } => cmd_mounts(config, user, *json),
    }
}
