//! Inspect command - shows the structure of a persisted room file.

use std::collections::{BTreeMap, HashMap};

use trellis::crdt::{CrdtType, NodeId};
use trellis::storage::{FileDriver, StorageDriver};

use crate::cli::InspectArgs;
use crate::output::{OutputFormat, print_table};

/// Run the inspect command
pub async fn run(args: &InspectArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    // Opening heals in memory only; nothing is written back.
    let (driver, report) = FileDriver::open(&args.path).await?;
    let nodes = driver.iter_nodes();

    let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
    let mut depths: HashMap<NodeId, usize> = HashMap::new();
    for (id, node) in &nodes {
        *kinds.entry(node.kind.to_string()).or_default() += 1;
        // Parents come first, so their depth is already known.
        let depth = node
            .parent_id
            .as_ref()
            .and_then(|parent| depths.get(parent))
            .map_or(0, |depth| depth + 1);
        depths.insert(id.clone(), depth);
    }
    let max_depth = depths.values().copied().max().unwrap_or(0);
    let top_level: Vec<(String, CrdtType)> = driver
        .store()
        .children_of(&NodeId::root())
        .filter_map(|(key, id)| Some((key.to_string(), driver.get_node(id)?.kind)))
        .collect();

    match format {
        OutputFormat::Human => {
            println!("File:        {}", args.path.display());
            println!("Nodes:       {}", nodes.len());
            println!("Max depth:   {max_depth}");
            println!("Repairs:     {report}");
            println!();
            let rows: Vec<Vec<String>> = kinds
                .iter()
                .map(|(kind, count)| vec![kind.clone(), count.to_string()])
                .collect();
            print_table(&["TYPE", "COUNT"], &rows);
            if !top_level.is_empty() {
                println!();
                let rows: Vec<Vec<String>> = top_level
                    .iter()
                    .map(|(key, kind)| vec![key.clone(), kind.to_string()])
                    .collect();
                print_table(&["KEY", "TYPE"], &rows);
            }
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "path": args.path.display().to_string(),
                "nodes": nodes.len(),
                "max_depth": max_depth,
                "kinds": kinds,
                "repairs": report,
                "top_level": top_level
                    .iter()
                    .map(|(key, kind)| (key.clone(), serde_json::Value::from(kind.to_string())))
                    .collect::<serde_json::Map<_, _>>(),
            });
            println!("{}", serde_json::to_string(&value)?);
        }
    }

    Ok(())
}
