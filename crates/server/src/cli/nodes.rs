use anyhow::Context;
use ss_domain::config::Config;

use crate::nodes::{parse_entries, validate_entries};

/// Load the nodes file and report what a reconcile pass would keep and
/// skip. Returns `false` when any entry would be skipped.
pub fn check(config: &Config) -> anyhow::Result<bool> {
    let path = &config.collector.nodes_file;
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let entries = parse_entries(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let (configs, skipped) = validate_entries(&entries);

    for cfg in &configs {
        let state = if cfg.enabled { "enabled" } else { "disabled" };
        println!("  {:<20} {:<24} {}/{} ({state})", cfg.id, cfg.name, cfg.region, cfg.location);
    }
    for err in &skipped {
        println!("[SKIP] {err}");
    }

    println!(
        "\n{} node(s) usable, {} skipped in {}",
        configs.len(),
        skipped.len(),
        path.display()
    );
    Ok(skipped.is_empty())
}
