use facet::Facet;
use figue as args;
use lockmgr::{LockManager, LockManagerConfig};
use tracing_subscriber::EnvFilter;

mod scenarios;

type AnyResult<T> = Result<T, String>;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Number of bucket mutexes (default: LOCKMGR_NUM_BUCKETS or 128).
    #[facet(args::named, default)]
    buckets: Option<String>,
    /// Number of partition mutexes (default: LOCKMGR_NUM_PARTITIONS or 32).
    #[facet(args::named, default)]
    partitions: Option<String>,
    /// Log the lock table and print mutex contention when the scenario ends.
    #[facet(args::named, default)]
    dump: bool,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    /// Many threads locking a small resource hierarchy.
    Stress {
        #[facet(args::named, default)]
        threads: Option<String>,
        #[facet(args::named, default)]
        iterations: Option<String>,
        #[facet(args::named, default)]
        timeout_ms: Option<String>,
    },
    /// Step-by-step walkthrough of FIFO and compatible-first granting.
    Fairness,
    /// Tokio tasks queueing behind an exclusive holder.
    AsyncWaiters {
        #[facet(args::named, default)]
        tasks: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> AnyResult<()> {
    let cli = parse_cli()?;
    let config = config_from_cli(&cli)?;
    let mgr = std::sync::Arc::new(LockManager::with_config(config)?);
    tracing::info!(
        buckets = config.num_buckets,
        partitions = config.num_partitions,
        "lock manager ready"
    );

    scenarios::dispatch(&mgr, cli.command).await?;

    if cli.dump {
        mgr.dump(&());
        let contention = facet_json::to_string(&mgr.contention_snapshot())
            .map_err(|e| format!("encode contention snapshot: {e}"))?;
        println!("{contention}");
    }

    mgr.cleanup_unused_locks();
    let leaked = mgr.num_lock_heads();
    if leaked > 0 {
        return Err(format!("{leaked} lock heads still held after the scenario"));
    }
    Ok(())
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("lockmgr-stress")
                .description("Drive the lock manager through stress and fairness scenarios")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn config_from_cli(cli: &Cli) -> AnyResult<LockManagerConfig> {
    let mut config = LockManagerConfig::from_env()?;
    if let Some(buckets) = &cli.buckets {
        config.num_buckets = parse_number("--buckets", buckets)?;
    }
    if let Some(partitions) = &cli.partitions {
        config.num_partitions = parse_number("--partitions", partitions)?;
    }
    config.validate()?;
    Ok(config)
}

pub(crate) fn parse_number<T>(flag: &str, value: &str) -> AnyResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| format!("invalid {flag}: {e}"))
}
