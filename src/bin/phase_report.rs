//! Phase report binary.
//!
//! Loads a compilation-unit dump, parses every phase, lays out one graph
//! phase and prints a per-rank summary of the computed layout.

use std::fs;

use clap::Parser;
use irscope::{layout_graph, Graph, GraphDocument};

#[derive(Parser)]
#[command(about = "Lay out one graph phase of a compiler dump and report it")]
struct Args {
    /// Path to the JSON dump.
    input: String,

    /// Name of the graph phase to lay out; defaults to the last one.
    #[arg(long)]
    phase: Option<String>,

    /// List all phases in the dump instead of laying one out.
    #[arg(long)]
    list: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let text = fs::read_to_string(&args.input)?;
    let document = GraphDocument::from_json(&text)?;
    println!(
        "function {:?}: {} phase(s)",
        document.function_name,
        document.resolver.phases.len()
    );

    if args.list {
        for (index, phase) in document.resolver.phases.iter().enumerate() {
            println!("  [{index}] {}", phase.name());
        }
        return Ok(());
    }

    let selected = match &args.phase {
        Some(name) => document
            .resolver
            .graph_phases()
            .find(|(_, phase)| phase.name == *name),
        None => document.resolver.graph_phases().last(),
    };
    let Some((index, phase)) = selected else {
        eprintln!("no matching graph phase in dump");
        std::process::exit(1);
    };

    println!("laying out phase [{index}] {:?}", phase.name);
    let mut graph = Graph::from_phase(phase);
    layout_graph(&mut graph);

    let mut by_rank: Vec<Vec<&irscope::GNode>> = vec![Vec::new(); graph.max_rank as usize + 1];
    for id in graph.visible_node_ids().collect::<Vec<_>>() {
        let node = graph.node(id).unwrap();
        by_rank[node.rank as usize].push(node);
    }
    for (rank, nodes) in by_rank.iter().enumerate().skip(1) {
        if nodes.is_empty() {
            continue;
        }
        println!("rank {rank}:");
        let mut nodes = nodes.clone();
        nodes.sort_by(|a, b| a.x.total_cmp(&b.x));
        for node in nodes {
            println!(
                "  #{:<5} x={:>8.1} y={:>8.1} {}",
                node.id,
                node.x,
                node.y,
                node.label.display_label()
            );
        }
    }

    let back_edges = graph
        .edges
        .iter()
        .filter(|edge| edge.back_edge_number != 0)
        .count();
    println!("{} back edge(s), max rank {}", back_edges, graph.max_rank);
    Ok(())
}
