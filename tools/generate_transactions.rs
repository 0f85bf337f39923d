//! Synthetic Transfer Generator
//!
//! Writes a CSV of random transfers, with a share of suspicious ones routed
//! through a small ring of mule accounts, for trying the pipeline.
//!
//! Usage: `generate_transactions <out.csv> [count] [suspicious_rate] [seed]`

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// 2024-01-01T00:00:00Z
const START_TIMESTAMP: i64 = 1_704_067_200;
const SECONDS_PER_30_DAYS: i64 = 30 * 24 * 3600;

const ACCOUNT_COUNT: u32 = 500;
const MULE_ACCOUNTS: [&str; 5] = ["mule_001", "mule_002", "mule_003", "mule_004", "mule_005"];

/// One output row, in the column order the pipeline reads
#[derive(Debug, Clone, Serialize)]
struct TransferRow {
    sender: String,
    receiver: String,
    amount: f64,
    time: String,
    frequency: u32,
    is_suspicious: u8,
}

/// Random transfer generator
struct TransferGenerator {
    rng: StdRng,
}

impl TransferGenerator {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn random_account(&mut self) -> String {
        format!("acct_{:04}", self.rng.gen_range(1..=ACCOUNT_COUNT))
    }

    fn random_time(&mut self, night_only: bool) -> Result<String> {
        let offset = self.rng.gen_range(0..SECONDS_PER_30_DAYS);
        let mut time = DateTime::<Utc>::from_timestamp(START_TIMESTAMP + offset, 0)
            .context("generated timestamp out of range")?;
        if night_only {
            time = time
                .with_hour(self.rng.gen_range(0..5))
                .context("invalid hour")?;
        }
        Ok(time.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }

    /// Generate an ordinary transfer between two distinct accounts
    fn generate_legitimate(&mut self) -> Result<TransferRow> {
        let sender = self.random_account();
        let mut receiver = self.random_account();
        while receiver == sender {
            receiver = self.random_account();
        }

        Ok(TransferRow {
            sender,
            receiver,
            amount: (self.rng.gen_range(10.0..2_000.0_f64) * 100.0).round() / 100.0,
            time: self.random_time(false)?,
            frequency: self.rng.gen_range(1..5),
            is_suspicious: 0,
        })
    }

    /// Generate a suspicious transfer: large, at night, through the mule ring
    fn generate_suspicious(&mut self) -> Result<TransferRow> {
        let (sender, receiver) = if self.rng.gen_bool(0.5) {
            // Layering between mules
            let from = self.random_choice(&MULE_ACCOUNTS);
            let mut to = self.random_choice(&MULE_ACCOUNTS);
            while to == from {
                to = self.random_choice(&MULE_ACCOUNTS);
            }
            (from.to_string(), to.to_string())
        } else {
            // Placement into the ring
            (self.random_account(), self.random_choice(&MULE_ACCOUNTS).to_string())
        };

        Ok(TransferRow {
            sender,
            receiver,
            amount: (self.rng.gen_range(9_000.0..50_000.0_f64) * 100.0).round() / 100.0,
            time: self.random_time(true)?,
            frequency: self.rng.gen_range(10..40),
            is_suspicious: 1,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_transactions=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(out_path) = args.get(1) else {
        bail!("usage: generate_transactions <out.csv> [count] [suspicious_rate] [seed]");
    };
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1_000);
    let suspicious_rate: f64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.05);
    let seed: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(42);

    if !(0.0..=1.0).contains(&suspicious_rate) {
        bail!("suspicious_rate must be within [0, 1], got {}", suspicious_rate);
    }

    info!(
        out = %out_path,
        count = count,
        suspicious_rate = suspicious_rate,
        seed = seed,
        "Configuration loaded"
    );

    if let Some(parent) = Path::new(out_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let mut writer = csv::Writer::from_path(out_path)
        .with_context(|| format!("Failed to open {}", out_path))?;

    let mut generator = TransferGenerator::new(seed);
    let mut legitimate_count = 0u64;
    let mut suspicious_count = 0u64;

    for i in 0..count {
        let row = if generator.rng.gen_bool(suspicious_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()?
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()?
        };
        writer.serialize(&row)?;

        if (i + 1) % 1_000 == 0 {
            info!(
                "Generated {}/{} transfers ({} legitimate, {} suspicious)",
                i + 1,
                count,
                legitimate_count,
                suspicious_count
            );
        }
    }
    writer.flush()?;

    info!(
        "Completed! Wrote {} transfers ({} legitimate, {} suspicious) to {}",
        count, legitimate_count, suspicious_count, out_path
    );

    Ok(())
}
