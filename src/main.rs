//! iptkeeper - iptables rule manager
//!
//! Command-line front end for listing, adding and deleting iptables rules
//! with an audit history, and for running the expiry daemon that retracts
//! temporary rules.
//!
//! # Usage
//!
//! ```bash
//! iptkeeper list --table filter            # Rules of one table
//! iptkeeper search 22                      # Rules mentioning "22"
//! iptkeeper add --table filter --chain INPUT --protocol tcp --dport 22 --target DROP --ttl 300
//! iptkeeper delete filter INPUT 3          # Delete rule at line 3
//! iptkeeper history --limit 20             # Recent changes
//! iptkeeper pending                        # Temporary rules awaiting expiry
//! iptkeeper stats --json                   # Traffic and rule statistics
//! iptkeeper run                            # Expiry daemon (Ctrl-C to stop)
//! ```
//!
//! # Security
//!
//! - Runs as an unprivileged user, elevating only the iptables call
//! - All inputs validated before elevation
//! - Every add and delete is recorded in the history log

use clap::{Args, Parser, Subcommand};
use iptkeeper::core::error::IptablesErrorPattern;
use iptkeeper::core::iptables::{IptablesCli, PacketFilter};
use iptkeeper::core::rule::{Rule, RuleDeleteRequest, RuleRequest};
use iptkeeper::scheduler::RuleScheduler;
use iptkeeper::service::{Actor, RuleService};
use iptkeeper::store::Store;
use iptkeeper::utils::truncate_string;
use iptkeeper::{Error, config, validators};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "iptkeeper")]
#[command(about = "iptables rule manager with audit history and temporary rules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List live rules
    List {
        /// Only this table (default: all configured tables)
        #[arg(short, long)]
        table: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Search live rules by substring (case-insensitive)
    Search {
        query: String,
        #[arg(long)]
        json: bool,
    },
    /// Add a rule
    Add(AddArgs),
    /// Delete the rule at a line number
    Delete {
        table: String,
        chain: String,
        line_number: u32,
    },
    /// Show the change history, newest first
    History {
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
        #[arg(short, long, default_value_t = 0)]
        offset: u32,
    },
    /// Show temporary rules awaiting expiry
    Pending,
    /// Show traffic and rule statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Run the expiry daemon until interrupted
    Run,
    /// Show the configuration, or write the defaults with --init
    Config {
        #[arg(long)]
        init: bool,
    },
    /// Show version and build information
    Version,
}

#[derive(Args)]
struct AddArgs {
    #[arg(short, long, default_value = "filter")]
    table: String,
    #[arg(short, long)]
    chain: String,
    #[arg(short, long)]
    protocol: Option<String>,
    #[arg(short, long)]
    source: Option<String>,
    #[arg(short, long)]
    destination: Option<String>,
    #[arg(long)]
    sport: Option<String>,
    #[arg(long)]
    dport: Option<String>,
    #[arg(short = 'j', long)]
    target: String,
    /// Insert at this 1-based position instead of appending
    #[arg(long)]
    position: Option<u32>,
    #[arg(long)]
    comment: Option<String>,
    /// Delete automatically after this many seconds
    #[arg(long, value_name = "SECONDS")]
    ttl: Option<u64>,
    /// Actor recorded in history (default: from config)
    #[arg(long)]
    actor: Option<String>,
}

impl AddArgs {
    fn into_request(self) -> RuleRequest {
        RuleRequest {
            table: self.table,
            chain: self.chain,
            protocol: self.protocol,
            source: self.source,
            destination: self.destination,
            sport: self.sport,
            dport: self.dport,
            target: self.target,
            position: self.position,
            comment: self.comment,
            expires_in: self.ttl,
        }
    }
}

fn main() -> ExitCode {
    let _ = iptkeeper::utils::ensure_dirs();
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Commands::Run));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Daemon logs go to a file in the state directory, everything else to stderr
fn init_logging(daemon: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if daemon
        && let Some(mut log_path) = iptkeeper::utils::get_state_dir()
    {
        log_path.push("iptkeeper.log");
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(e: &Error) {
    eprintln!("Error: {e}");
    if let Some(diagnostics) = e.diagnostics() {
        let translation = IptablesErrorPattern::match_error(diagnostics);
        eprintln!("  {}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  - {suggestion}");
        }
        if let Some(url) = &translation.help_url {
            eprintln!("  See: {url}");
        }
    }
}

struct Context {
    config: config::AppConfig,
    store: Store,
    service: RuleService,
}

async fn open_context() -> Result<Context, Error> {
    let config = config::load_config().await;
    let store = Store::open(&config.database_path).await?;
    let filter: Arc<dyn PacketFilter> = Arc::new(IptablesCli::new(config.iptables_binary.clone()));
    let scheduler = Arc::new(RuleScheduler::new(
        store.clone(),
        Arc::clone(&filter),
        config.tick_interval(),
    ));
    let service = RuleService::new(filter, store.clone(), scheduler, config.tables.clone());
    Ok(Context {
        config,
        store,
        service,
    })
}

fn print_rules(rules: &[Rule], json: bool) -> Result<(), Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(rules)?);
        return Ok(());
    }

    println!(
        "{:<8} {:<14} {:>4} {:>10} {:>12} {:<12} {:<5} {:<18} {:<18} OPTIONS",
        "TABLE", "CHAIN", "NUM", "PKTS", "BYTES", "TARGET", "PROT", "SOURCE", "DESTINATION"
    );
    for rule in rules {
        println!(
            "{:<8} {:<14} {:>4} {:>10} {:>12} {:<12} {:<5} {:<18} {:<18} {}",
            rule.table,
            truncate_string(&rule.chain, 14),
            rule.line_number,
            rule.packets,
            rule.bytes,
            truncate_string(&rule.target, 12),
            rule.protocol,
            rule.source,
            rule.destination,
            rule.options
        );
    }
    println!("{} rule(s)", rules.len());
    Ok(())
}

async fn handle_cli(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Version => {
            println!("iptkeeper {}", build::PKG_VERSION);
            println!(
                "commit {}{}",
                build::SHORT_COMMIT,
                if build::GIT_CLEAN { "" } else { " (dirty)" }
            );
            println!("built {}", build::BUILD_TIME);
            return Ok(());
        }
        Commands::Config { init } => {
            let path = config::config_path()
                .ok_or_else(|| Error::Internal("Config directory not found".to_string()))?;
            if init {
                if path.exists() {
                    println!("Config already exists at {}", path.display());
                } else {
                    config::save_config(&config::AppConfig::default()).await?;
                    println!("Wrote default config to {}", path.display());
                }
            } else {
                let config = config::load_config().await;
                println!("# {}", path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            return Ok(());
        }
        _ => {}
    }

    let ctx = open_context().await?;
    let result = run_command(command, &ctx).await;
    ctx.store.close().await;
    result
}

async fn run_command(command: Commands, ctx: &Context) -> Result<(), Error> {
    let service = &ctx.service;

    match command {
        Commands::List { table, json } => {
            let rules = match table {
                Some(table) => service.rules_by_table(&table).await?,
                None => service.all_rules().await?,
            };
            print_rules(&rules, json)?;
        }
        Commands::Search { query, json } => {
            let rules = service.search(&query).await?;
            print_rules(&rules, json)?;
        }
        Commands::Add(args) => {
            let actor = Actor::local(
                args.actor
                    .clone()
                    .unwrap_or_else(|| ctx.config.default_actor.clone()),
            );
            let request = args.into_request();
            if let Some(port) = request.dport.as_deref().and_then(|p| p.parse::<u16>().ok())
                && let Some(note) = validators::check_well_known_port(port)
            {
                println!("Note: {note}");
            }

            let added = service.add_rule(&request, &actor).await?;
            println!("✓ Rule added: {}", added.spec);
            match (request.ttl_seconds(), added.expiry) {
                (Some(_), Some(expiry)) => {
                    println!("  Expires at {} (id {})", expiry.expires_at, expiry.id);
                    println!("  `iptkeeper run` must be running for the rule to be removed.");
                }
                (Some(_), None) => {
                    eprintln!("✗ Rule was added but could not be registered for expiry.");
                }
                _ => {}
            }
        }
        Commands::Delete {
            table,
            chain,
            line_number,
        } => {
            let request = RuleDeleteRequest {
                table,
                chain,
                line_number,
            };
            service
                .delete_rule(&request, &Actor::local(ctx.config.default_actor.clone()))
                .await?;
            println!("✓ Rule deleted.");
        }
        Commands::History { limit, offset } => {
            let (records, total) = service.history(limit, offset).await?;
            for rec in &records {
                println!(
                    "{:>5} {} {:<11} {}/{} {} by {}@{}{}",
                    rec.id,
                    rec.created_at.format("%Y-%m-%d %H:%M:%S"),
                    rec.action,
                    rec.table,
                    rec.chain,
                    rec.rule_details,
                    rec.actor,
                    rec.ip_address,
                    match &rec.error_msg {
                        Some(e) if !rec.success => format!(" FAILED: {e}"),
                        _ => String::new(),
                    }
                );
            }
            println!("{} of {total} record(s)", records.len());
        }
        Commands::Pending => {
            let pending = service.pending_expiries().await?;
            for rule in &pending {
                println!(
                    "{} {}/{} expires {} : {}",
                    rule.id, rule.table, rule.chain, rule.expires_at, rule.rule_spec
                );
            }
            println!("{} pending", pending.len());
        }
        Commands::Stats { json } => {
            let traffic = service.traffic_stats().await?;
            let rules = service.rule_stats().await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "traffic": traffic,
                        "rules": rules,
                    }))?
                );
            } else {
                println!(
                    "Total: {} rules, {} packets, {} bytes",
                    rules.total_rules, traffic.total_packets, traffic.total_bytes
                );
                for (key, chain) in &traffic.by_chain {
                    println!("  {key:<24} {:>12} pkts {:>14} bytes", chain.packets, chain.bytes);
                }
                println!("Top rules by bytes:");
                for rule in &rules.top_rules_by_bytes {
                    println!(
                        "  {}/{} #{} {} {} bytes",
                        rule.table, rule.chain, rule.line_number, rule.target, rule.bytes
                    );
                }
            }
        }
        Commands::Run => {
            let scheduler = service.scheduler();
            scheduler.start()?;
            println!(
                "Expiry daemon running (interval {}s). Press Ctrl-C to stop.",
                ctx.config.tick_interval().as_secs()
            );

            tokio::signal::ctrl_c().await?;
            println!("Stopping...");
            scheduler.stop().await;
        }
        Commands::Version | Commands::Config { .. } => {}
    }

    Ok(())
}
