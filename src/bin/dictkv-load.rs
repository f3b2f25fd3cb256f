//! Load generator.
//!
//! ```text
//! USAGE:
//!     dictkv-load <HOST> <PORT> <N_REQUESTS> <PERIOD_US> <KEYS_FILE> [STATS_OUTPUT]
//! ```
//!
//! Sends `N_REQUESTS` requests over one connection: 1% `set` with a random
//! alphanumeric value of 1 to 100 characters, the rest `get`. Keys are drawn
//! uniformly from the whitespace-separated `KEYS_FILE`. After each successful
//! request the tool sleeps `PERIOD_US` microseconds; a failed request triggers
//! a reconnect and is not counted.
//!
//! If `STATS_OUTPUT` is given, mean latencies are written there as
//! `{"read":{"mean":..,"n_samples":..},"write":{..}}`.

use anyhow::{bail, Context};
use dictkv::client::{Client, DEFAULT_RETRY_DELAY};
use dictkv::protocol::Command;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Command-line parameters
#[derive(Debug)]
struct Params {
    addr: SocketAddr,
    n_requests: u64,
    period: Duration,
    keys: Vec<String>,
    stats_output: Option<PathBuf>,
}

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} <host> <port> <n_requests> <requests_period_us> <keys_list_file> [statistics_output]",
        program
    );
    eprintln!("host - server host");
    eprintln!("port - server port");
    eprintln!("n_requests - number of requests to send, must be positive");
    eprintln!("requests_period_us - period between requests in microseconds");
    eprintln!("keys_list_file - file with keys list");
    eprintln!("statistics_output - file to write statistics (optional)");
    std::process::exit(1);
}

impl Params {
    fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let program = args.first().map(String::as_str).unwrap_or("dictkv-load");
        if args.len() != 6 && args.len() != 7 {
            usage(program);
        }

        let host: IpAddr = args[1].parse().context("invalid host address")?;
        let port: u16 = args[2].parse().context("invalid port number")?;
        let n_requests: u64 = args[3].parse().context("invalid n_requests")?;
        let period_us: u64 = args[4].parse().context("invalid requests_period_us")?;
        if n_requests == 0 {
            usage(program);
        }

        let contents = std::fs::read_to_string(&args[5])
            .with_context(|| format!("failed to open keys list file {}", args[5]))?;
        let keys: Vec<String> = contents.split_whitespace().map(String::from).collect();
        if keys.is_empty() {
            bail!("keys list is empty");
        }

        Ok(Self {
            addr: SocketAddr::new(host, port),
            n_requests,
            period: Duration::from_micros(period_us),
            keys,
            stats_output: args.get(6).map(PathBuf::from),
        })
    }
}

/// Running mean of latency samples, in microseconds.
#[derive(Debug, Default)]
struct Stat {
    n_samples: u64,
    sum: f64,
}

impl Stat {
    fn report(&mut self, value: f64) {
        self.sum += value;
        self.n_samples += 1;
    }

    fn summary(&self) -> Option<Summary> {
        if self.n_samples == 0 {
            return None;
        }
        Some(Summary {
            mean: self.sum / self.n_samples as f64,
            n_samples: self.n_samples,
        })
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    mean: f64,
    n_samples: u64,
}

#[derive(Debug, Serialize)]
struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    read: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    write: Option<Summary>,
}

fn random_value(rng: &mut impl Rng, min_len: usize, max_len: usize) -> String {
    let len = rng.gen_range(min_len..=max_len);
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let params = Params::from_args()?;
    dictkv::init_tracing();

    let mut rng = StdRng::from_entropy();
    let mut client = Client::connect_with_retry(params.addr, DEFAULT_RETRY_DELAY).await;

    let mut read_stat = Stat::default();
    let mut write_stat = Stat::default();
    let mut sent = 0;

    while sent < params.n_requests {
        let key = params.keys[rng.gen_range(0..params.keys.len())].clone();
        let is_write = rng.gen_range(0..100) == 0;
        let command = if is_write {
            Command::set(key, random_value(&mut rng, 1, 100))
        } else {
            Command::get(key)
        };

        let start = Instant::now();
        let result = client.send(&command).await;
        let elapsed_us = start.elapsed().as_micros() as f64;

        match result {
            Ok(_) => {
                if is_write {
                    write_stat.report(elapsed_us);
                } else {
                    read_stat.report(elapsed_us);
                }
                sent += 1;
                tokio::time::sleep(params.period).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to send request, reconnecting");
                client = Client::connect_with_retry(params.addr, DEFAULT_RETRY_DELAY).await;
            }
        }
    }

    let report = Report {
        read: read_stat.summary(),
        write: write_stat.summary(),
    };
    info!(?report, "Load finished");

    if let Some(path) = params.stats_output {
        let json = serde_json::to_string(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(())
}
