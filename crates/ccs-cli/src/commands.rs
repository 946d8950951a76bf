use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, ensure, Context};
use ccs_store::{
    CompilerStore, ControlFlowGraph, GenerationReport, GenerationStatus, MemoizableObject,
    NodeBody, PerformanceStats, StoreConfig, StoreFileManager,
};
use ccs_types::ObjectIdentifier;
use colored::Colorize;
use serde::Serialize;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config.as_deref();
    match &cli.command {
        Command::List(args) => cmd_list(store_config(config, &args.dir)?, cli.format),
        Command::Fsck(args) => cmd_fsck(store_config(config, &args.dir)?, cli.format),
        Command::Stats(args) => cmd_stats(store_config(config, &args.dir)?, cli.format),
        Command::Show(args) => cmd_show(store_config(config, &args.dir)?, args.id, cli.format),
    }
}

fn store_config(config_path: Option<&Path>, dir: &Path) -> anyhow::Result<StoreConfig> {
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());
    let mut config = match config_path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    config.base_path = dir.to_path_buf();
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_generation(report: &GenerationReport) {
    let label = format!("gen {:>4}", report.generation);
    match &report.status {
        GenerationStatus::Valid {
            objects,
            bindings,
            data_bytes,
        } => println!(
            "{}  {}  {objects} objects, {bindings} bindings, {data_bytes} bytes",
            label.bold(),
            "valid".green()
        ),
        GenerationStatus::Uncommitted => println!(
            "{}  {}  data file without index, ignored",
            label.bold(),
            "uncommitted".yellow()
        ),
        GenerationStatus::Unusable { reason } => {
            println!("{}  {}  {reason}", label.bold(), "unusable".red())
        }
    }
}

fn cmd_list(config: StoreConfig, format: OutputFormat) -> anyhow::Result<()> {
    let files = StoreFileManager::new(config)?;
    let reports = files.inspect()?;
    if format == OutputFormat::Json {
        return print_json(&reports);
    }
    if reports.is_empty() {
        println!("No store files in {}.", files.base_path().display());
    }
    for report in &reports {
        print_generation(report);
    }
    Ok(())
}

#[derive(Serialize)]
struct FsckReport {
    generations: Vec<GenerationReport>,
    objects_checked: usize,
    problems: Vec<String>,
}

fn fsck(config: StoreConfig) -> anyhow::Result<FsckReport> {
    let generations = StoreFileManager::new(config.clone())?.inspect()?;
    let mut problems: Vec<String> = generations
        .iter()
        .filter_map(|g| match &g.status {
            GenerationStatus::Unusable { reason } => {
                Some(format!("generation {}: {reason}", g.generation))
            }
            _ => None,
        })
        .collect();

    let mut objects_checked = 0;
    match CompilerStore::open(config) {
        Ok(mut store) => {
            for id in store.on_disk_identifiers() {
                objects_checked += 1;
                if let Err(e) = store.lookup::<MemoizableObject>(&id) {
                    problems.push(e.to_string());
                }
            }
        }
        Err(e) => problems.push(e.to_string()),
    }
    Ok(FsckReport {
        generations,
        objects_checked,
        problems,
    })
}

fn cmd_fsck(config: StoreConfig, format: OutputFormat) -> anyhow::Result<()> {
    let report = fsck(config)?;
    if format == OutputFormat::Json {
        print_json(&report)?;
    } else {
        for generation in &report.generations {
            print_generation(generation);
        }
        for problem in &report.problems {
            println!("{} {problem}", "✗".red().bold());
        }
        if report.problems.is_empty() {
            println!(
                "{} {} objects decoded, no issues.",
                "✓".green().bold(),
                report.objects_checked
            );
        }
    }
    if !report.problems.is_empty() {
        bail!("store has {} problem(s)", report.problems.len());
    }
    Ok(())
}

#[derive(Serialize)]
struct StatsReport {
    keys: usize,
    on_disk_objects: usize,
    on_disk_bytes: u64,
    generations_loaded: usize,
    objects_per_generation: BTreeMap<u64, usize>,
    next_identifier: ObjectIdentifier,
    performance: PerformanceStats,
}

fn stats(store: &CompilerStore) -> StatsReport {
    StatsReport {
        keys: store.key_count(),
        on_disk_objects: store.on_disk_count(),
        on_disk_bytes: store.bytecount(),
        generations_loaded: store.generations_loaded(),
        objects_per_generation: store.objects_per_generation(),
        next_identifier: store.next_identifier(),
        performance: store.performance_stats(),
    }
}

fn cmd_stats(config: StoreConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = CompilerStore::open(config)?;
    let report = stats(&store);
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("Store {}", store.files().base_path().display().to_string().bold());
    println!("  keys:                {}", report.keys);
    println!("  objects on disk:     {}", report.on_disk_objects);
    println!("  bytes on disk:       {}", report.on_disk_bytes);
    println!("  generations loaded:  {}", report.generations_loaded);
    for (generation, objects) in &report.objects_per_generation {
        println!("    gen {generation:>4}:         {objects} objects");
    }
    println!("  next identifier:     {}", report.next_identifier);
    println!("{}", report.performance);
    Ok(())
}

fn cmd_show(config: StoreConfig, id: ObjectIdentifier, format: OutputFormat) -> anyhow::Result<()> {
    let mut store = CompilerStore::open(config)?;
    let Some(object) = store.lookup::<MemoizableObject>(&id)? else {
        bail!("no object {id} in {}", store.files().base_path().display());
    };
    if format == OutputFormat::Json {
        return print_json(&object);
    }
    match store.location_of(&id) {
        Some(location) => println!("{} ({})", id.to_string().yellow().bold(), location),
        None => println!("{}", id.to_string().yellow().bold()),
    }
    match &object {
        MemoizableObject::Graph(graph) => print_graph(graph),
        MemoizableObject::Value(value) => println!("  {} {value:?}", object.kind_name().cyan()),
    }
    Ok(())
}

fn print_graph(graph: &ControlFlowGraph) {
    println!("  {} {}", "graph".cyan(), graph.name.bold());
    for (label, node) in &graph.blocks {
        let marker = if *label == graph.entry { "→" } else { " " };
        println!("  {marker} {}({}):", label.green(), node.arg_count);
        println!("      {}", describe(&node.body));
    }
}

fn describe(body: &NodeBody) -> String {
    match body {
        NodeBody::Jump { target, args } => format!("jump {target} {args:?}"),
        NodeBody::Branch {
            condition,
            if_true,
            if_false,
        } => format!("branch ${condition} ? {if_true} : {if_false}"),
        NodeBody::Apply { callee, args, next } => format!("apply {callee:?} {args:?} then {next}"),
        NodeBody::Finish { arg, is_exception } => {
            if *is_exception {
                format!("raise ${arg}")
            } else {
                format!("return ${arg}")
            }
        }
        NodeBody::Subgraphs { members, next } => {
            let members: Vec<String> = members.iter().map(ToString::to_string).collect();
            format!("inline [{}] then {next}", members.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccs_store::ControlFlowNode;
    use ccs_types::CompilerMapKey;

    fn populated_store(dir: &Path) {
        let mut store = CompilerStore::open(StoreConfig::new(dir)).unwrap();
        let graph = ControlFlowGraph::new("id", "entry").with_block(
            "entry",
            ControlFlowNode::new(
                1,
                NodeBody::Finish {
                    arg: 0,
                    is_exception: false,
                },
            ),
        );
        store
            .set(CompilerMapKey::for_signature("id", ["Int64"]), graph)
            .unwrap();
        store.store(ObjectIdentifier::new(9), 5i64).unwrap();
        store.flush_to_disk().unwrap();
    }

    #[test]
    fn fsck_clean_store() {
        let dir = tempfile::tempdir().unwrap();
        populated_store(dir.path());
        let report = fsck(StoreConfig::new(dir.path())).unwrap();
        assert_eq!(report.objects_checked, 2);
        assert!(report.problems.is_empty());
        cmd_fsck(StoreConfig::new(dir.path()), OutputFormat::Text).unwrap();
    }

    #[test]
    fn fsck_reports_corrupt_generation() {
        let dir = tempfile::tempdir().unwrap();
        populated_store(dir.path());
        std::fs::write(dir.path().join("ccs-0.data"), b"garbage").unwrap();
        let report = fsck(StoreConfig::new(dir.path())).unwrap();
        assert!(!report.problems.is_empty());
        assert!(cmd_fsck(StoreConfig::new(dir.path()), OutputFormat::Json).is_err());
    }

    #[test]
    fn show_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        populated_store(dir.path());
        cmd_show(StoreConfig::new(dir.path()), ObjectIdentifier::new(0), OutputFormat::Text).unwrap();
        cmd_show(StoreConfig::new(dir.path()), ObjectIdentifier::new(9), OutputFormat::Json).unwrap();
        assert!(cmd_show(StoreConfig::new(dir.path()), ObjectIdentifier::new(77), OutputFormat::Text).is_err());
        cmd_stats(StoreConfig::new(dir.path()), OutputFormat::Text).unwrap();
        cmd_list(StoreConfig::new(dir.path()), OutputFormat::Text).unwrap();
    }

    #[test]
    fn stats_break_objects_down_by_generation() {
        let dir = tempfile::tempdir().unwrap();
        populated_store(dir.path());
        {
            let mut store = CompilerStore::open(StoreConfig::new(dir.path())).unwrap();
            store.store(ObjectIdentifier::new(20), true).unwrap();
            store.flush_to_disk().unwrap();
        }
        let store = CompilerStore::open(StoreConfig::new(dir.path())).unwrap();
        let report = stats(&store);
        assert_eq!(report.on_disk_objects, 3);
        assert_eq!(report.objects_per_generation, BTreeMap::from([(0, 2), (1, 1)]));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["objects_per_generation"]["1"], 1);
        cmd_stats(StoreConfig::new(dir.path()), OutputFormat::Json).unwrap();
    }

    #[test]
    fn config_file_keeps_directory_argument() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("ccs.toml");
        std::fs::write(&config_path, "base_path = \"/elsewhere\"\nfile_prefix = \"cfg_\"\n").unwrap();
        let config = store_config(Some(&config_path), dir.path()).unwrap();
        assert_eq!(config.base_path, dir.path());
        assert_eq!(config.file_prefix, "cfg_");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_config(None, &dir.path().join("absent")).is_err());
    }

    #[test]
    fn describe_bodies() {
        let body = NodeBody::Subgraphs {
            members: vec![ObjectIdentifier::new(3), ObjectIdentifier::new(7)],
            next: "exit".into(),
        };
        assert_eq!(describe(&body), "inline [#3, #7] then exit");
        let body = NodeBody::Finish {
            arg: 1,
            is_exception: true,
        };
        assert_eq!(describe(&body), "raise $1");
    }
}
