use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bucketeer::config::{BucketeerConfig, LoggingConfig};
use bucketeer::ratelimit::{
    Clock, ManualClock, RateLimitDescriptor, RateLimitService, RateLimitStore, SystemClock,
};

/// Operator tool for the Bucketeer rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "bucketeer", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply `consume <unit> <amount>` / `get <unit>` lines from stdin and
    /// print each resulting descriptor as JSON
    Replay,

    /// Consume concurrently from one unit and report the settled budget
    Stress {
        /// Limitation unit to hammer
        #[arg(long, default_value = "user1")]
        unit: String,

        /// Number of concurrent consumers
        #[arg(long, default_value_t = 100)]
        workers: usize,

        /// Units consumed by each worker
        #[arg(long, default_value_t = 100)]
        amount: i64,
    },
}

/// A single replay instruction.
#[derive(Debug, PartialEq, Eq)]
enum Request {
    Consume { unit: String, amount: i64 },
    Get { unit: String },
}

fn parse_request(line: &str) -> anyhow::Result<Request> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["consume", unit, amount] => Ok(Request::Consume {
            unit: unit.to_string(),
            amount: amount
                .parse()
                .with_context(|| format!("invalid amount '{}'", amount))?,
        }),
        ["get", unit] => Ok(Request::Get {
            unit: unit.to_string(),
        }),
        _ => bail!("expected 'consume <unit> <amount>' or 'get <unit>', got '{}'", line),
    }
}

/// Outcome of a `stress` run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StressReport {
    unit: String,
    before: RateLimitDescriptor,
    after: RateLimitDescriptor,
    consumed: i64,
    expected: i64,
    matches: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BucketeerConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => BucketeerConfig::default(),
    };

    init_tracing(&config.logging);

    info!("Starting Bucketeer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        fill_rate = config.limiter.default_fill_rate,
        max_budget = config.limiter.default_max_budget,
        policy_refresh = ?config.limiter.policy_refresh,
        "Configuration loaded"
    );

    match cli.command {
        Command::Replay => {
            let store = RateLimitStore::from_config(&config.limiter, SystemClock)?;
            let mut stdout = tokio::io::stdout();

            tokio::select! {
                result = replay(&store, BufReader::new(tokio::io::stdin()), &mut stdout) => {
                    let applied = result?;
                    info!(applied = applied, "Reached end of input");
                }
                _ = shutdown_signal() => {
                    // A pending stdin read cannot be cancelled; dropping the
                    // runtime would wait for the next line.
                    info!("Bucketeer stopped");
                    std::process::exit(0);
                }
            }
        }
        Command::Stress {
            unit,
            workers,
            amount,
        } => {
            // Frozen time keeps refill out of the comparison.
            let clock = ManualClock::new(SystemClock.now());
            let store: Arc<dyn RateLimitService> =
                Arc::new(RateLimitStore::from_config(&config.limiter, clock)?);

            let report = stress(store, unit, workers, amount).await?;
            if !report.matches {
                warn!(
                    expected = report.expected,
                    actual = report.after.current_budget,
                    "Settled budget differs from expectation"
                );
            }
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    info!("Bucketeer stopped");
    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Apply request lines from `input`, writing one JSON descriptor line per
/// successful request to `output`. Returns how many requests succeeded.
async fn replay<R, W>(service: &dyn RateLimitService, input: R, output: &mut W) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut applied = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let request = match parse_request(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Skipping malformed line");
                continue;
            }
        };

        let result = match &request {
            Request::Consume { unit, amount } => service.consume(unit, *amount),
            Request::Get { unit } => service.get(unit),
        };

        match result {
            Ok(descriptor) => {
                let mut json = serde_json::to_string(&descriptor)?;
                json.push('\n');
                output.write_all(json.as_bytes()).await?;
                output.flush().await?;
                applied += 1;
            }
            Err(e) => warn!(error = %e, request = ?request, "Request failed"),
        }
    }

    Ok(applied)
}

/// Consume `amount` from `unit` on `workers` concurrent tasks and compare the
/// settled budget with what the consumptions alone predict.
///
/// The service's clock should be frozen for the comparison to be exact.
async fn stress(
    service: Arc<dyn RateLimitService>,
    unit: String,
    workers: usize,
    amount: i64,
) -> anyhow::Result<StressReport> {
    info!(unit = %unit, workers = workers, amount = amount, "Starting stress run");

    let before = service.get(&unit)?;

    let mut tasks = Vec::with_capacity(workers);
    for _ in 0..workers {
        let service = Arc::clone(&service);
        let unit = unit.clone();
        tasks.push(tokio::spawn(async move { service.consume(&unit, amount) }));
    }
    for task in tasks {
        task.await??;
    }

    let after = service.get(&unit)?;
    let consumed = amount.saturating_mul(i64::try_from(workers).unwrap_or(i64::MAX));
    // the settling `get` clamps any top-up to the ceiling
    let expected = before
        .current_budget
        .saturating_sub(consumed)
        .min(before.max_budget);

    Ok(StressReport {
        unit,
        before,
        after,
        consumed,
        expected,
        matches: after.current_budget == expected,
    })
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketeer::ratelimit::UniformPolicy;

    #[test]
    fn test_parse_consume() {
        assert_eq!(
            parse_request("consume user1 1000").unwrap(),
            Request::Consume {
                unit: "user1".to_string(),
                amount: 1000
            }
        );
        assert_eq!(
            parse_request("consume user1 -5").unwrap(),
            Request::Consume {
                unit: "user1".to_string(),
                amount: -5
            }
        );
    }

    #[test]
    fn test_parse_get() {
        assert_eq!(
            parse_request("  get   user1 ").unwrap(),
            Request::Get {
                unit: "user1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_request("consume user1").is_err());
        assert!(parse_request("consume user1 lots").is_err());
        assert!(parse_request("refill user1").is_err());
    }

    fn frozen_store() -> RateLimitStore<UniformPolicy, ManualClock> {
        RateLimitStore::new(UniformPolicy::default(), ManualClock::new(0))
    }

    #[tokio::test]
    async fn test_replay_from_reader() {
        let store = frozen_store();
        let input: &[u8] = b"consume user1 1000\n# comment\n\nrefill user1\nconsume user1 2000\nget user1\nconsume  5\n";
        let mut output = Vec::new();

        let applied = replay(&store, input, &mut output).await.unwrap();
        assert_eq!(applied, 3);

        let lines: Vec<RateLimitDescriptor> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let budgets: Vec<i64> = lines.iter().map(|d| d.current_budget).collect();
        assert_eq!(budgets, vec![999_000, 997_000, 997_000]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stress_report_matches_on_frozen_clock() {
        let service: Arc<dyn RateLimitService> = Arc::new(frozen_store());

        let report = stress(service, "user1".to_string(), 100, 100).await.unwrap();
        assert_eq!(report.before.current_budget, 1_000_000);
        assert_eq!(report.consumed, 10_000);
        assert_eq!(report.after.current_budget, 990_000);
        assert!(report.matches);
    }

    #[tokio::test]
    async fn test_stress_with_huge_top_up_saturates() {
        let service: Arc<dyn RateLimitService> = Arc::new(frozen_store());

        let report = stress(service, "u".to_string(), 100, -1_000_000_000_000_000_000)
            .await
            .unwrap();
        assert_eq!(report.consumed, i64::MIN);
        assert_eq!(report.expected, 1_000_000);
        assert_eq!(report.after.current_budget, 1_000_000);
        assert!(report.matches);
    }

    #[test]
    fn test_cli_parses_stress_defaults() {
        let cli = Cli::try_parse_from(["bucketeer", "stress"]).unwrap();
        match cli.command {
            Command::Stress {
                unit,
                workers,
                amount,
            } => {
                assert_eq!(unit, "user1");
                assert_eq!(workers, 100);
                assert_eq!(amount, 100);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
