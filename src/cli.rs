use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use splitbox::config::{ByteSize, Config};
use splitbox::document::{PageRange, derived_file_name};
use splitbox::error::{Ceiling, SplitError};
use splitbox::governor::MemoryGate;
use splitbox::tier::TierPolicy;
use splitbox::validator::{self, RangeError, RangeValidator};

#[derive(Parser, Debug)]
#[command(name = "splitbox")]
#[command(about = "SplitBox page-range extraction engine", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $SPLITBOX_CONFIG or config/splitbox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the resolved configuration as TOML
    Config,
    /// Check a set of ranges against every ceiling without extracting anything
    Plan(PlanArgs),
}

#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    /// Page count of the source document
    #[arg(long)]
    pub pages: u32,

    /// Source document size, e.g. 12MB
    #[arg(long)]
    pub size: ByteSize,

    /// Page range such as 4-7 or 9; repeatable
    #[arg(long = "range", required = true)]
    pub ranges: Vec<PageRange>,

    /// Source file name used to derive output names
    #[arg(long, default_value = "document.pdf")]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub source: String,
    pub pages: u32,
    pub size: ByteSize,
    pub outputs: Vec<PlannedOutput>,
    pub estimate: ByteSize,
    pub ceiling: ByteSize,
    pub verdict: Verdict,
}

#[derive(Debug, Serialize)]
pub struct PlannedOutput {
    pub range: String,
    pub file_name: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected {
        code: &'static str,
        ceiling: Option<Ceiling>,
        reason: String,
    },
}

pub fn render_config(config: &Config) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

pub fn plan(config: &Config, args: &PlanArgs) -> PlanReport {
    let mut unique: Vec<PageRange> = Vec::with_capacity(args.ranges.len());
    for range in &args.ranges {
        if !unique.contains(range) {
            unique.push(*range);
        }
    }

    let memory = MemoryGate::from_config(&config.memory);
    let verdict = match admit(config, args, &unique) {
        Ok(()) => Verdict::Accepted,
        Err(err) => Verdict::Rejected {
            code: err.code(),
            ceiling: err.ceiling(),
            reason: err.to_string(),
        },
    };

    PlanReport {
        source: args.name.clone(),
        pages: args.pages,
        size: args.size,
        outputs: unique
            .iter()
            .map(|range| PlannedOutput {
                range: range.to_string(),
                file_name: derived_file_name(&args.name, *range),
            })
            .collect(),
        estimate: memory.estimate(args.size, unique.len()),
        ceiling: memory.ceiling(),
        verdict,
    }
}

/// Same order as a live session: bounds, count, tier, memory.
fn admit(config: &Config, args: &PlanArgs, ranges: &[PageRange]) -> Result<(), SplitError> {
    if args.pages == 0 {
        return Err(RangeError::EmptyDocument.into());
    }
    for range in ranges {
        validator::check_bounds(*range, args.pages)?;
    }

    RangeValidator::from_limits(&config.limits).validate(0, ranges.len())?;

    let tier = TierPolicy::new(config.tier.clone());
    tier.check_document(args.size, 0)?;
    tier.check_ranges(ranges.len())?;

    MemoryGate::from_config(&config.memory).check(args.size, ranges.len())?;
    Ok(())
}
