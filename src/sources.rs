use anyhow::Result;

use crate::config::Config;
use crate::store::PartitionStore;

/// Print every configured partition with its thread id and whether its
/// output file exists yet.
pub fn list_sources(config: &Config) -> Result<()> {
    let store = PartitionStore::from_config(&config.output);
    let partitions = config.partitions()?;

    println!("{:<8} {:<12} {:<8} FILE", "YEAR", "THREAD", "WRITTEN");
    for p in partitions {
        let path = store.partition_path(p.year);
        let written = if path.exists() { "yes" } else { "no" };
        println!(
            "{:<8} {:<12} {:<8} {}",
            p.year,
            p.root_id,
            written,
            path.display()
        );
    }

    let legacy = store.dir().join(&config.output.legacy_file);
    if legacy.exists() {
        println!();
        println!("legacy aggregate: {}", legacy.display());
    }

    Ok(())
}
