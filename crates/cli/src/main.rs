use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use vista_agent::{DelegateRegistry, DelegateSource, TelemetryDelegate};
use vista_api::{Console, QueryRequest, Settings};
use vista_core::{kinds, AddressSpaceKey, CachedObject, Kind};
use vista_ingest::{spawn_ingest, Ingestor};
use vista_store::ObjectStore;

#[derive(Parser, Debug)]
#[command(name = "vistactl", version, about = "Query a live cache of messaging resources")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List known kinds with their scope and source
    Kinds,
    /// Watch one kind until the cache is primed, then run a single query
    Query {
        /// Kind name, e.g. Address or addressspace
        kind: String,
        /// Filter expression, e.g. "status.phase == 'Active'"
        #[arg(long = "filter")]
        filter: Option<String>,
        /// Order-by expression, e.g. "metadata.name desc"
        #[arg(long = "order-by")]
        order_by: Option<String>,
        #[arg(long = "offset", allow_negative_numbers = true)]
        offset: Option<i64>,
        #[arg(long = "first", allow_negative_numbers = true)]
        first: Option<i64>,
    },
    /// Show the address types and plans of an address space type
    AddressTypes {
        /// Address space type, e.g. standard or brokered
        space_type: String,
    },
}

fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::from_str(&settings.log).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics(settings: &Settings) {
    if let Some(addr) = settings.metrics_addr.as_deref() {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VISTA_METRICS_ADDR; expected host:port");
        }
    }
}

/// The CLI has no collector transport; live metrics are unavailable.
struct NoCollectors;

impl DelegateSource for NoCollectors {
    fn resolve(&self, key: &AddressSpaceKey) -> Result<Arc<dyn TelemetryDelegate>> {
        Err(anyhow!("no collector transport configured for {}", key))
    }
}

/// Cache fed by cluster watchers for `wanted` kinds.
struct Session {
    console: Console,
    registry: Arc<DelegateRegistry>,
    ingest_tx: tokio::sync::mpsc::Sender<vista_ingest::IngestMsg>,
    watchers: Vec<(Kind, tokio::task::JoinHandle<Result<()>>)>,
}

impl Session {
    async fn start(settings: &Settings, wanted: &[Kind], namespace: Option<String>) -> Result<Self> {
        let store = Arc::new(ObjectStore::new());
        let registry = Arc::new(DelegateRegistry::new(store.clone(), Arc::new(NoCollectors)));
        let ingestor = Arc::new(Ingestor::new(store.clone()).with_observer(registry.clone()));
        let (ingest_tx, _ingest) = spawn_ingest(ingestor, settings.queue_cap);
        let resync = Some(Duration::from_secs(settings.resync_secs)).filter(|d| !d.is_zero());
        let watchers = vista_kubehub::spawn_watchers(wanted, namespace, resync, ingest_tx.clone());
        if watchers.is_empty() {
            return Err(anyhow!("none of {:?} can be watched; collector kinds are push-only", wanted));
        }

        // Wait for first epoch (configurable)
        let mut rx = store.subscribe_epoch();
        let deadline = Instant::now() + Duration::from_secs(settings.wait_secs);
        while *rx.borrow() == 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(wait_secs = settings.wait_secs, "no data before deadline; answering from an empty cache");
                break;
            }
            let rem = deadline.duration_since(now).min(Duration::from_secs(2));
            if tokio::time::timeout(rem, rx.changed()).await.is_err() { continue; }
        }
        // Give the remaining kinds' initial lists a moment to land.
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Self { console: Console::new(store, registry.clone()), registry, ingest_tx, watchers })
    }

    fn stop(self) {
        drop(self.ingest_tx);
        self.registry.invalidate_all();
        for (kind, handle) in self.watchers {
            if handle.is_finished() { info!(kind = %kind, "watcher already finished"); }
            handle.abort();
        }
    }
}

#[derive(Serialize)]
struct PageOut<'a> {
    total: usize,
    items: Vec<&'a CachedObject>,
}

fn print_structured<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_table(kind: Kind, items: &[Arc<CachedObject>]) {
    let cols = kinds::columns_for(kind);
    let now = chrono::Utc::now().timestamp();
    let rows: Vec<_> = items.iter().map(|o| kinds::render_row(o, &cols, now)).collect();
    let widths: Vec<usize> = cols
        .iter()
        .enumerate()
        .map(|(i, c)| rows.iter().map(|r| r[i].len()).chain(std::iter::once(c.label.len())).max().unwrap_or(0))
        .collect();
    let header: Vec<String> = cols.iter().zip(&widths).map(|(c, w)| format!("{:<w$}", c.label.to_uppercase(), w = *w)).collect();
    println!("{}", header.join("  ").trim_end());
    for r in rows {
        let line: Vec<String> = r.iter().zip(&widths).map(|(cell, w)| format!("{:<w$}", cell, w = *w)).collect();
        println!("{}", line.join("  ").trim_end());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env();
    init_tracing(&settings);
    init_metrics(&settings);
    let cli = Cli::parse();

    match cli.command {
        Commands::Kinds => {
            #[derive(Serialize)]
            struct KindOut { kind: Kind, namespaced: bool, source: &'static str, gvk: Option<String> }
            let out: Vec<KindOut> = Kind::ALL
                .iter()
                .map(|k| KindOut {
                    kind: *k,
                    namespaced: k.namespaced(),
                    source: if k.is_telemetry() { "collector" } else { "cluster" },
                    gvk: kinds::gvk_key(*k),
                })
                .collect();
            match cli.output {
                Output::Human => {
                    for k in out {
                        let scope = if k.namespaced { "namespaced" } else { "cluster" };
                        println!("{} • {} • {} • {}", k.kind, scope, k.source, k.gvk.as_deref().unwrap_or("-"));
                    }
                }
                other => print_structured(other, &out)?,
            }
        }
        Commands::Query { kind, filter, order_by, offset, first } => {
            let kind = Kind::from_str(&kind).map_err(|e| anyhow!("{}", e))?;
            info!(kind = %kind, ns = ?cli.namespace, "query invoked");
            let session = Session::start(&settings, &[kind], cli.namespace.clone()).await?;
            let req = QueryRequest { kind, namespace: cli.namespace.clone(), filter, order_by, offset, first };
            let page = session.console.query(&req).context("running query")?;
            match cli.output {
                Output::Human => {
                    print_table(kind, &page.items);
                    println!("({} of {} shown)", page.items.len(), page.total);
                }
                other => print_structured(other, &PageOut { total: page.total, items: page.items.iter().map(|o| o.as_ref()).collect() })?,
            }
            session.stop();
        }
        Commands::AddressTypes { space_type } => {
            info!(space_type = %space_type, "address-types invoked");
            let session = Session::start(&settings, &[Kind::AddressSpaceSchema], None).await?;
            let types = session.console.address_types(&space_type).context("listing address types")?;
            match cli.output {
                Output::Human => {
                    for t in &types {
                        println!("{}", t.name);
                        for p in &t.plans {
                            println!("  {:<24} {}", p.name, p.short_description.as_deref().unwrap_or(&p.display_name));
                        }
                    }
                }
                other => print_structured(other, &types)?,
            }
            session.stop();
        }
    }
    Ok(())
}
