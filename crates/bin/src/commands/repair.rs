//! Repair command - heals a persisted room file in place.

use trellis::storage::{FileDriver, StorageDriver};

use crate::cli::RepairArgs;

/// Run the repair command
pub async fn run(args: &RepairArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (mut driver, report) = FileDriver::open(&args.path).await?;

    if report.is_clean() {
        println!("{}: no repairs needed", args.path.display());
        return Ok(());
    }

    println!("{}: {report}", args.path.display());
    if args.dry_run {
        println!("Dry run, file left untouched");
        return Ok(());
    }

    driver.flush().await?;
    println!("Repaired file written");
    Ok(())
}
