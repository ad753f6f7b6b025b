pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod interrupt;
pub mod log_retention;
pub mod logging;
pub mod patterns;
pub mod pool;
pub mod registry;
pub mod terminal;
pub mod tracker;

use channel::MessageSender;
use clap::{error::ErrorKind, CommandFactory, Parser};
use config::{load_config, CliOverrides};
use errors::LinebarsError;
use interrupt::{cancel_on_ctrl_c, CancelFlag};
use logging::{append_run_log, clear_run_log, init_run_log, JsonlLogger};
use pool::{run_pool, PoolJob};
use serde_json::json;
use terminal::{AnsiTerminal, Terminal};

#[derive(Debug, Clone, Parser)]
#[command(name = "linebars")]
#[command(about = "Count primes on a worker pool with one live progress line per worker")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    #[arg(long)]
    pub log_path: Option<std::path::PathBuf>,
    /// Worker threads; defaults to pool.concurrency.
    #[arg(long)]
    pub workers: Option<usize>,
    /// Upper bound (exclusive) of the numbers to scan.
    #[arg(long, default_value_t = 50_000)]
    pub numbers: u64,
    /// Number of ranges, one display line each; defaults to the worker count.
    #[arg(long)]
    pub ranges: Option<usize>,
    #[arg(long, default_value_t = false)]
    pub no_color: bool,
    #[arg(long, default_value_t = false)]
    pub show_index: bool,
}

pub fn run() -> Result<i32, LinebarsError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| LinebarsError::Io(e.to_string()))?;
    let terminal = AnsiTerminal::stdout();
    let cancel = CancelFlag::new();
    cancel_on_ctrl_c(&cancel)?;
    run_with_terminal(&args, &cwd, &terminal, &cancel)
}

/// Exit code after Ctrl-C, as a shell reports SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

pub fn run_with_terminal(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    terminal: &dyn Terminal,
    cancel: &CancelFlag,
) -> Result<i32, LinebarsError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(LinebarsError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        log_path: cli.log_path.clone(),
        workers: cli.workers,
        no_color: cli.no_color || !terminal.is_tty(),
        show_index: cli.show_index,
    };
    let cfg = load_config(&overrides, cwd)?;

    if let Some(path) = &cfg.logging.path {
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = cfg.logging.max_payload_bytes;
        logger.budget_bytes = cfg.logging.budget_bytes;
        init_run_log(logger);
    }

    let parts = cli.ranges.unwrap_or(cfg.pool.concurrency);
    let jobs = split_ranges(cli.numbers, parts)
        .into_iter()
        .map(|(start, stop)| PoolJob::new(format!("{start}:{stop}"), (start, stop)))
        .collect::<Vec<_>>();
    append_run_log(
        "info",
        "cli.start",
        json!({
            "numbers": cli.numbers,
            "ranges": jobs.len(),
            "workers": cfg.pool.concurrency,
        }),
    );

    let outcome = run_pool(&cfg, terminal, jobs, cancel, count_primes);
    let summary = match outcome {
        Ok(summary) => summary,
        Err(LinebarsError::Interrupted) => {
            clear_run_log();
            return Ok(INTERRUPTED_EXIT_CODE);
        }
        Err(error) => {
            clear_run_log();
            return Err(error);
        }
    };
    let total = summary.results.iter().sum::<u64>();
    terminal.write_line(&format!(
        "Total number of primes between 0-{}: {total}",
        cli.numbers
    ))?;
    clear_run_log();
    Ok(0)
}

/// Split `0..numbers` into at most `parts` contiguous half-open ranges.
pub fn split_ranges(numbers: u64, parts: usize) -> Vec<(u64, u64)> {
    let parts = (parts.max(1) as u64).min(numbers.max(1));
    let step = numbers.div_ceil(parts).max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < numbers {
        let stop = (start + step).min(numbers);
        ranges.push((start, stop));
        start = stop;
    }
    if ranges.is_empty() {
        ranges.push((0, 0));
    }
    ranges
}

/// Count primes in `[start, stop)`, reporting one status line per number.
/// Stops early once the display has gone away.
pub fn count_primes(identity: &str, (start, stop): (u64, u64), tx: &MessageSender) -> u64 {
    let _ = tx.send_to(identity, &format!("worker is {identity}"));
    let _ = tx.send_to(identity, &format!("processing total of {} items", stop - start));
    let mut primes = 0;
    for number in start..stop {
        if is_prime(number) {
            primes += 1;
        }
        if tx.send_to(identity, &format!("processed {number}")).is_err() {
            return primes;
        }
    }
    let _ = tx.send_to(identity, &format!("{identity} processing complete"));
    primes
}

pub fn is_prime(number: u64) -> bool {
    if number < 2 {
        return false;
    }
    let mut divisor = 2;
    while divisor * divisor <= number {
        if number % divisor == 0 {
            return false;
        }
        divisor += 1;
    }
    true
}

pub fn render_help() -> String {
    Cli::command().render_long_help().to_string()
}
