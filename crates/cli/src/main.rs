use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hubsync_api::{SyncConfig, SyncSession};
use hubsync_core::{KindKey, ResourceRecord};
use hubsync_store::kinds::{tracked_kinds, BindingSpec};
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hubsyncctl", version, about = "hubsync CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Backend base URL, e.g. "https://console.example.com/multicloud"
    #[arg(long = "backend", global = true, env = "HUBSYNC_BACKEND")]
    backend: Option<String>,

    /// Bearer token for the backend session
    #[arg(long = "token", global = true, env = "HUBSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the kinds the console keeps synchronized
    Kinds,
    /// Follow one collection and print membership changes until Ctrl-C
    Watch {
        /// Kind key, e.g. "v1/Secret" or "cluster.open-cluster-management.io/v1/ManagedCluster"
        kind: String,
    },
    /// Wait for the initial snapshot and print the console settings
    Settings,
}

fn init_tracing() {
    let env = std::env::var("HUBSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("HUBSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid HUBSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

fn session_config(cli: &Cli) -> Result<SyncConfig> {
    let backend = cli
        .backend
        .clone()
        .ok_or_else(|| anyhow!("backend required (--backend or HUBSYNC_BACKEND)"))?;
    let mut config = SyncConfig::new(backend);
    config.token = cli.token.clone();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Kinds => {
            match cli.output {
                Output::Human => {
                    for spec in tracked_kinds() {
                        let binding = match spec.binding {
                            BindingSpec::Direct => "direct",
                            BindingSpec::ByNamespace => "by-namespace",
                        };
                        println!("{} • {} • {}", spec.group_version, spec.kind, binding);
                    }
                }
                Output::Json => {
                    let rows: Vec<_> = tracked_kinds()
                        .iter()
                        .map(|spec| {
                            serde_json::json!({
                                "groupVersion": spec.group_version,
                                "kind": spec.kind,
                                "binding": match spec.binding {
                                    BindingSpec::Direct => "direct",
                                    BindingSpec::ByNamespace => "by-namespace",
                                },
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
        Commands::Watch { kind } => {
            let key = KindKey::parse(kind)
                .ok_or_else(|| anyhow!("invalid kind key: {kind} (expect v1/Kind or group/v1/Kind)"))?;
            let session = SyncSession::start(session_config(&cli)?);
            let result = watch_kind(&session, &key, cli.output).await;
            session.shutdown().await;
            result?;
        }
        Commands::Settings => {
            let session = SyncSession::start(session_config(&cli)?);
            let mut loaded = session.loaded_changed();
            tokio::select! {
                res = loaded.wait_for(|v| *v) => {
                    res.map_err(|_| anyhow!("sync session ended before the snapshot loaded"))?;
                    println!("{}", serde_json::to_string_pretty(session.settings().as_ref())?);
                }
                _ = signal::ctrl_c() => info!("interrupted before the snapshot loaded"),
            }
            session.shutdown().await;
        }
    }
    Ok(())
}

async fn watch_kind(session: &SyncSession, key: &KindKey, output: Output) -> Result<()> {
    if let Some(reader) = session.collection(&key.group_version, &key.kind) {
        info!(kind = %key, "watching collection");
        let mut version = reader.subscribe();
        let mut known: HashMap<String, ResourceRecord> = HashMap::new();
        // seed with whatever is already synchronized
        let items = reader.current();
        print_diff(&mut known, &items, output)?;
        loop {
            tokio::select! {
                _ = signal::ctrl_c() => break,
                changed = version.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let items = reader.current();
                    print_diff(&mut known, &items, output)?;
                }
            }
        }
        return Ok(());
    }
    if let Some(reader) = session.grouped(&key.group_version, &key.kind) {
        info!(kind = %key, "watching grouped collection");
        let mut version = reader.subscribe();
        loop {
            tokio::select! {
                _ = signal::ctrl_c() => break,
                changed = version.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let groups = reader.current();
                    match output {
                        Output::Human => {
                            let mut names: Vec<&String> = groups.keys().collect();
                            names.sort();
                            for ns in names {
                                println!("{} • {}", ns, groups[ns].len());
                            }
                        }
                        Output::Json => {
                            let view: HashMap<&String, usize> =
                                groups.iter().map(|(ns, recs)| (ns, recs.len())).collect();
                            println!("{}", serde_json::to_string(&view)?);
                        }
                    }
                }
            }
        }
        return Ok(());
    }
    Err(anyhow!("kind is not tracked: {key}"))
}

fn print_diff(
    known: &mut HashMap<String, ResourceRecord>,
    items: &[ResourceRecord],
    output: Output,
) -> Result<()> {
    let next: HashMap<String, ResourceRecord> = items
        .iter()
        .filter_map(|rec| rec.identity().map(|id| (id.key(), rec.clone())))
        .collect();
    for (id, rec) in &next {
        match known.get(id) {
            None => print_change('+', "added", id, rec, output)?,
            Some(prev) if prev != rec => print_change('~', "modified", id, rec, output)?,
            Some(_) => {}
        }
    }
    for id in known.keys() {
        if !next.contains_key(id) {
            match output {
                Output::Human => println!("- {id}"),
                Output::Json => println!("{}", serde_json::json!({ "op": "deleted", "id": id })),
            }
        }
    }
    *known = next;
    Ok(())
}

fn print_change(
    sigil: char,
    op: &str,
    id: &str,
    rec: &ResourceRecord,
    output: Output,
) -> Result<()> {
    match output {
        Output::Human => println!("{sigil} {id}"),
        Output::Json => println!(
            "{}",
            serde_json::to_string(&serde_json::json!({ "op": op, "id": id, "object": rec }))?
        ),
    }
    Ok(())
}
