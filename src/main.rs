//! SLL - Script Support Library
//!
//! Command-line companion: config scaffolding and connectivity checks for
//! the servers listed in a host inventory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::Row as _;

use sll::cache::RedisClient;
use sll::cfg_host::{CfgHost, DEFAULT_CFG_HOST_PATH, SECTION_CACHE, SECTION_MYSQL, SECTION_POSTGRES};
use sll::config::SllConfig;
use sll::db::{Database, MySqlDb, MySqlOptions, PgDb};
use sll::http::{http_request, random_user_agent, HttpRequest};
use sll::logger::{self, init_logging};

/// SLL - Script Support Library
#[derive(Parser)]
#[command(name = "sll")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when missing)
    #[arg(short, long, default_value = "sll.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "sll.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// List the servers of a host inventory
    Hosts {
        #[arg(long, default_value = DEFAULT_CFG_HOST_PATH)]
        cfg_host: PathBuf,
    },

    /// Connect to a database server and run `SELECT 1`
    Ping {
        #[arg(long, default_value = DEFAULT_CFG_HOST_PATH)]
        cfg_host: PathBuf,

        /// Server name in the inventory
        server: String,

        /// Database to select
        #[arg(short, long)]
        database: Option<String>,

        /// Look the server up in the POSTGRES section
        #[arg(long)]
        postgres: bool,
    },

    /// Connect to a Redis server and PING it
    RedisPing {
        #[arg(long, default_value = DEFAULT_CFG_HOST_PATH)]
        cfg_host: PathBuf,

        /// Server name in the inventory
        server: String,
    },

    /// Fetch a URL and print the decoded body
    Fetch {
        url: String,

        /// Also save the body to this file
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    // A CLI run reports errors instead of exiting from inside the library
    config.logging.terminate_on_critical = false;
    init_logging(&config.logging, config.email.as_ref())?;

    let result = match cli.command {
        Commands::Init { output } => run_init(&output),
        Commands::Validate => run_validate(&cli.config),
        Commands::Hosts { cfg_host } => run_hosts(&cfg_host),
        Commands::Ping {
            cfg_host,
            server,
            database,
            postgres,
        } => run_ping(&config, &cfg_host, &server, database.as_deref(), postgres).await,
        Commands::RedisPing { cfg_host, server } => run_redis_ping(&config, &cfg_host, &server).await,
        Commands::Fetch { url, save } => run_fetch(&url, save).await,
    };

    if let Err(e) = &result {
        logger::report(e, "sll");
        logger::flush_notifications();
        std::process::exit(e.exit_code());
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<SllConfig> {
    if !path.exists() {
        return Ok(SllConfig::default());
    }
    SllConfig::from_file(path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

/// Initialize configuration file
fn run_init(output: &Path) -> sll::Result<()> {
    let config_content = r#"# SLL Configuration
# Generated configuration file

[logging]
level = "info"
colored = true
debug_info = true
terminate_on_critical = true

# [email]
# smtp_server = "smtp.example.com"
# port = 465
# email = "robot@example.com"
# dest_email = ["ops@example.com"]
# password = "changeme"
# subject = "Analytics Scripts"
# simple = false

[locker]
lock_dir = "/tmp"
ttl_secs = 3600

[database]
reconnect_attempts = 10
reconnect_timeout_secs = 10
max_fast_debug = 5000
max_delete_rows = 10000
max_execute_many = 25000
max_fetch_all = 100000
max_log_rows = 10

[redis]
connect_attempts = 10
retry_delay_ms = 100
"#;

    std::fs::write(output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then check it with: sll --config {} validate", output.display());
    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> sll::Result<()> {
    match SllConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Log level:      {}", config.logging.level);
            println!("  Lock dir:       {}", config.locker.lock_dir.display());
            println!("  Lock TTL:       {} s", config.locker.ttl_secs);
            println!(
                "  DB retry:       {} x {} s",
                config.database.reconnect_attempts, config.database.reconnect_timeout_secs
            );
            match &config.email {
                Some(email) => println!("  Email:          {} -> {:?}", email.email, email.dest_email),
                None => println!("  Email:          disabled"),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// List inventory servers
fn run_hosts(cfg_host: &Path) -> sll::Result<()> {
    let cfg = CfgHost::from_file(cfg_host)?;

    println!("Host inventory: {}", cfg_host.display());
    for section in [SECTION_MYSQL, SECTION_POSTGRES, SECTION_CACHE] {
        println!();
        println!("{}:", section);
        for name in cfg.server_names(section) {
            let attrs = cfg.server_attributes(section, name);
            let host = attrs
                .and_then(|a| a.get("ip").or_else(|| a.get("url")))
                .map(String::as_str)
                .unwrap_or("?");
            let port = attrs.and_then(|a| a.get("port")).map(String::as_str).unwrap_or("?");
            println!("  {:<20} {}:{}", name, host, port);
        }
    }
    Ok(())
}

/// Connect and run a trivial query
async fn run_ping(
    config: &SllConfig,
    cfg_host: &Path,
    server: &str,
    database: Option<&str>,
    postgres: bool,
) -> sll::Result<()> {
    let cfg = CfgHost::from_file(cfg_host)?;

    if postgres {
        let mut db_config = cfg.pg_config_by_name(server)?;
        if let Some(name) = database {
            db_config = db_config.with_database(name);
        }
        let mut db = PgDb::new(db_config, config.database.clone(), false);
        db.connect().await?;
        let rows = db.execute_query("SELECT 1").await?;
        println!("✓ {} answered ({} row)", db.db_info(), rows.len());
        db.cleanup().await;
    } else {
        let mut db_config = cfg.db_config_by_name(server)?;
        if let Some(name) = database {
            db_config = db_config.with_database(name);
        }
        let mut db = MySqlDb::new(db_config, config.database.clone(), MySqlOptions::default());
        db.connect().await?;
        let rows = db.fetch_all("SELECT VERSION()").await?;
        let version: String = rows
            .first()
            .and_then(|row| row.try_get(0).ok())
            .unwrap_or_default();
        println!("✓ {} answered, version {}", db.db_info(), version);
        db.cleanup().await;
    }
    Ok(())
}

/// Connect to Redis
async fn run_redis_ping(config: &SllConfig, cfg_host: &Path, server: &str) -> sll::Result<()> {
    let cfg = CfgHost::from_file(cfg_host)?;
    let mut client = RedisClient::with_tuning(cfg.redis_config_by_name(server)?, &config.redis);
    client.connect().await?;
    println!("✓ {} answered PING", client.info());
    client.cleanup();
    Ok(())
}

/// Fetch a page
async fn run_fetch(url: &str, save: Option<PathBuf>) -> sll::Result<()> {
    let mut request = HttpRequest::new(url).header("User-Agent", random_user_agent());
    if let Some(path) = save {
        request = request.save_to(path);
    }
    let body = http_request(&request).await?;
    println!("{}", body);
    Ok(())
}
