use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;
use simflow_core::ids::ItemType;
use simflow_platform::JsonMetadataOperations;

use super::{json_filter, parse_pair};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Job directory to scan.
    #[arg(long)]
    pub job_dir: PathBuf,
    /// Record type: suite, experiment or simulation.
    #[arg(long = "type")]
    pub item_type: ItemType,
    /// Property filter, `key=value`. Values are read as JSON when possible.
    #[arg(long = "property", value_name = "KEY=VALUE", value_parser = parse_pair)]
    pub properties: Vec<(String, String)>,
    /// Tag filter, `key=value`.
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_pair)]
    pub tags: Vec<(String, String)>,
    /// Print only the number of matches.
    #[arg(long)]
    pub count: bool,
}

pub fn run(args: &StatusArgs) -> Result<(), Box<dyn Error>> {
    let metadata = JsonMetadataOperations::new(&args.job_dir, None);
    let records = metadata.filter(
        args.item_type,
        &json_filter(&args.properties, true),
        &json_filter(&args.tags, false),
        None,
        false,
    )?;
    let mut out = io::stdout().lock();
    if args.count {
        writeln!(out, "{}", records.len())?;
    } else {
        for record in &records {
            writeln!(out, "{}", serde_json::to_string(record)?)?;
        }
    }
    out.flush()?;
    Ok(())
}
