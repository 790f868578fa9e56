use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::{connect_bugzilla, fetch_and_save};
use crate::output::{OutputMode, kv, render};
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct FetchBugsArgs {
    /// Output report in JSON format.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct FetchReport {
    count: usize,
    buglist_file: String,
    bug_ids: Vec<u64>,
}

fn print_report(report: &FetchReport, w: &mut dyn Write) -> io::Result<()> {
    kv(w, "bugs found", report.count.to_string())?;
    kv(w, "saved to", &report.buglist_file)
}

pub fn run_fetch_bugs(args: &FetchBugsArgs, config_dir: &Path) -> Result<()> {
    let settings = Settings::load(config_dir)?;
    let client = connect_bugzilla(&settings)?;
    let bug_ids = fetch_and_save(&settings, &client)?;

    let report = FetchReport {
        count: bug_ids.len(),
        buglist_file: settings.buglist_path().display().to_string(),
        bug_ids,
    };
    render(OutputMode::from_json_flag(args.json), &report, print_report)
}
