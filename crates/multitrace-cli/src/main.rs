//! CLI for multitrace.

mod runner;

use clap::Parser;
use multitrace_batch::{BatchOutcome, TraceBatch};
use multitrace_core::{BatchConfig, LoopCount, DEFAULT_BASE_PORT, DEFAULT_HOP_LIMIT};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Multitrace - traceroute to many hosts at once.
#[derive(Parser, Debug)]
#[command(name = "multitrace")]
#[command(version)]
#[command(about = "Multitrace - traceroute to many hosts at once")]
pub struct Args {
    /// Target hostnames or IPv4 addresses.
    #[arg(required = true)]
    pub hosts: Vec<String>,

    /// Maximum TTL.
    #[arg(short = 'm', long = "max-hops", default_value_t = DEFAULT_HOP_LIMIT)]
    pub max_hops: u8,

    /// Loops per host (-1 or "inf" to loop until interrupted).
    #[arg(short = 'l', long, default_value = "1", allow_hyphen_values = true)]
    pub loops: LoopCount,

    /// Delay between loops of the same host, in milliseconds.
    #[arg(long = "loop-delay", default_value_t = 50)]
    pub loop_delay: u64,

    /// Timeout per probe in milliseconds.
    #[arg(short = 'w', long, default_value_t = 50)]
    pub timeout: u64,

    /// Destination port of the first host; host N uses this port plus N.
    #[arg(short = 'p', long = "base-port", default_value_t = DEFAULT_BASE_PORT)]
    pub base_port: u16,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log filter, overriding --verbose (e.g. "trace" or "multitrace_batch=debug").
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl Args {
    /// Convert CLI args to a BatchConfig.
    fn to_config(&self) -> BatchConfig {
        BatchConfig {
            hop_limit: self.max_hops,
            loop_count: self.loops,
            inter_loop_delay: Duration::from_millis(self.loop_delay),
            probe_timeout: Duration::from_millis(self.timeout),
            base_port: self.base_port,
        }
    }

    fn log_filter(&self) -> EnvFilter {
        let directive = match (&self.log_level, self.verbose) {
            (Some(level), _) => level.as_str(),
            (None, true) => "debug",
            (None, false) => "info",
        };
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_filter())
        .with_writer(std::io::stderr)
        .init();

    let config = args.to_config();
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let hosts = match runner::resolve_hosts(&args.hosts).await {
        Ok(hosts) => hosts,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut batch = match TraceBatch::open(config).await {
        Ok(batch) => batch,
        Err(e) => {
            eprintln!("Failed to open sockets: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        hosts = hosts.len(),
        max_hops = args.max_hops,
        loops = %args.loops,
        "Starting traceroute"
    );

    let stop = batch.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            stop.cancel();
        }
    });

    // Finite runs print the final results; infinite runs only ever produce
    // per-loop reports.
    let printer = (args.loops == LoopCount::Infinite).then(|| {
        let mut reports = batch.loop_reports();
        let json = args.json;
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                match runner::render_report(&report, json) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize loop report"),
                }
            }
        })
    });

    let outcome = batch.trace(&hosts).await;
    drop(batch);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let results = match outcome {
        Ok(BatchOutcome::Completed(results)) => results,
        Ok(BatchOutcome::Stopped(results)) => {
            if args.loops == LoopCount::Infinite {
                return ExitCode::SUCCESS;
            }
            warn!("Trace stopped before every host finished");
            results
        }
        Err(e) => {
            eprintln!("Traceroute failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runner::render_results(&results, args.json) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize results: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    #[test]
    fn test_args_to_config() {
        let args = Args::try_parse_from([
            "multitrace",
            "-m",
            "12",
            "-l",
            "3",
            "-w",
            "200",
            "--loop-delay",
            "10",
            "-p",
            "40000",
            "a.example",
            "b.example",
        ])
        .unwrap();

        assert_eq!(args.hosts, vec!["a.example", "b.example"]);
        let config = args.to_config();
        assert_eq!(config.hop_limit, 12);
        assert_eq!(config.loop_count, LoopCount::Finite(NonZeroU32::new(3).unwrap()));
        assert_eq!(config.probe_timeout, Duration::from_millis(200));
        assert_eq!(config.inter_loop_delay, Duration::from_millis(10));
        assert_eq!(config.base_port, 40000);
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["multitrace", "192.0.2.1"]).unwrap();
        let config = args.to_config();
        assert_eq!(config.hop_limit, DEFAULT_HOP_LIMIT);
        assert_eq!(config.loop_count, LoopCount::ONCE);
        assert_eq!(config.base_port, DEFAULT_BASE_PORT);
        assert!(!args.json);
    }

    #[test]
    fn test_infinite_loops() {
        let args = Args::try_parse_from(["multitrace", "-l", "-1", "192.0.2.1"]).unwrap();
        assert_eq!(args.loops, LoopCount::Infinite);

        let args = Args::try_parse_from(["multitrace", "--loops", "inf", "192.0.2.1"]).unwrap();
        assert_eq!(args.loops, LoopCount::Infinite);

        assert!(Args::try_parse_from(["multitrace", "-l", "0", "192.0.2.1"]).is_err());
    }

    #[test]
    fn test_requires_hosts() {
        assert!(Args::try_parse_from(["multitrace"]).is_err());
    }
}
