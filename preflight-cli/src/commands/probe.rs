//! Probe command - print the detected environment profile.

use preflight::profile::{EnvironmentProfile, SystemProbe};

use crate::error::CliError;

/// Run the probe command.
pub fn run(json: bool) -> Result<(), CliError> {
    let profile = EnvironmentProfile::derive(&SystemProbe);

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    println!("memory:       {:.1} GB", profile.memory_gb);
    println!("cores:        {}", profile.cores);
    println!("network:      {:?}", profile.network);
    println!("save-data:    {}", profile.save_data);
    println!("low-end:      {}", profile.low_end_device);
    println!("mode:         {}", profile.mode);
    println!(
        "cache budget: {:.1} MB",
        profile.cache_budget_bytes() as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}
