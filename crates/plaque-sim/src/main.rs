//! Plaque simulation harness.
//!
//! Runs a concurrent claim workload against an in-memory registry and
//! prints a JSON report on stdout. Logs go to stderr.

mod logging;
mod options;
mod scenario;

use plaque_types::Result;

use crate::options::SimOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = SimOptions::parse(std::env::args().skip(1))?;
    logging::init(opts.json_logs)?;

    let config = opts.registry_config()?;
    let report = scenario::run(&opts, config).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
