//! Manage the platform chassis from the command line.
//!
//! Usage:
//!   chassis list [platform.foundation] [--tree]
//!   chassis show platform.foundation --platform lab --kind node
//!   chassis add platform.foundation.cluster.control
//!   chassis remove platform.interaction.legacy --dry-run
//!   chassis rename platform.foundation.cluster platform.foundation.core
//!   chassis query node01
//!
//! The workspace is the nearest directory holding `chassis.yaml`, unless
//! `--root` or `CHASSIS_ROOT` says otherwise. Logs go to stderr and follow
//! `CHASSIS_LOG` (default `warn`).

use anyhow::{Context, Result, anyhow};
use chassis::{
    AddReport, ChassisConfig, Coordinator, FactKind, ListReport, PropagationMode, QueryReport,
    RemoveReport, RenameReport, ShowReport, Warning,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const ENV_LOG: &str = "CHASSIS_LOG";

#[derive(Parser, Debug)]
#[command(name = "chassis")]
#[command(about = "Edit chassis.yaml and keep allocations and attachments consistent")]
struct Cli {
    /// Workspace root holding chassis.yaml; searched upwards when omitted.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Print the result object as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    /// Stage every registry edit before renaming; abort if any record fails.
    #[arg(long, global = true)]
    staged: bool,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List chassis paths, optionally below a prefix.
    List {
        path: Option<String>,
        /// Draw the paths as a tree.
        #[arg(long)]
        tree: bool,
    },
    /// Show nodes and components allocated or attached to a path.
    Show {
        path: Option<String>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long, value_parser = parse_kind)]
        kind: Option<FactKind>,
    },
    /// Add a chassis path, creating missing parents.
    Add {
        path: String,
        /// Succeed when the path already exists.
        #[arg(long)]
        force: bool,
    },
    /// Remove a chassis path and everything below it.
    Remove {
        path: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Rename one segment of a chassis path.
    Rename {
        old: String,
        new: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Find the chassis paths of a node or component.
    Query {
        identifier: String,
        #[arg(long, value_parser = parse_kind)]
        kind: Option<FactKind>,
    },
}

fn parse_kind(raw: &str) -> Result<FactKind, String> {
    FactKind::try_from(raw)
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.root {
        Some(root) => ChassisConfig::for_root(root).with_env_overrides()?,
        None => {
            let cwd = env::current_dir().context("reading current directory")?;
            ChassisConfig::discover(&cwd)?
        }
    };
    if cli.staged {
        config = config.with_propagation(PropagationMode::Staged);
    }
    let coordinator = Coordinator::new(config);

    match cli.command {
        Command::List { path, tree } => {
            let report = coordinator.list(path.as_deref())?;
            emit(cli.json, &report, |r| print_list(r, tree))
        }
        Command::Show {
            path,
            platform,
            kind,
        } => {
            let report = coordinator.show(path.as_deref(), platform.as_deref(), kind)?;
            emit(cli.json, &report, print_show)
        }
        Command::Add { path, force } => {
            let report = coordinator
                .add(&path, force)
                .with_context(|| format!("failed to add chassis path {path:?}"))?;
            emit(cli.json, &report, print_add)
        }
        Command::Remove { path, dry_run } => {
            let report = coordinator.remove(&path, dry_run)?;
            emit(cli.json, &report, print_remove)
        }
        Command::Rename { old, new, dry_run } => {
            let report = coordinator.rename(&old, &new, dry_run)?;
            emit(cli.json, &report, print_rename)
        }
        Command::Query { identifier, kind } => {
            let report = coordinator.query(&identifier, kind)?;
            emit(cli.json, &report, print_query)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn emit<T: Serialize>(json: bool, report: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(report)
            .map_err(|err| anyhow!("serializing result: {err}"))?;
        println!("{rendered}");
    } else {
        human(report);
    }
    Ok(())
}

fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
}

fn print_list(report: &ListReport, tree: bool) {
    if report.paths.is_empty() {
        eprintln!("No chassis paths found");
        return;
    }
    if tree {
        print!("{}", render_tree(&report.paths));
    } else {
        for path in &report.paths {
            println!("{path}");
        }
    }
}

#[derive(Default)]
struct TreeNode {
    name: String,
    children: Vec<TreeNode>,
}

impl TreeNode {
    fn insert(&mut self, segments: &[&str]) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        let index = match self.children.iter().position(|c| c.name == *first) {
            Some(index) => index,
            None => {
                self.children.push(TreeNode {
                    name: first.to_string(),
                    children: Vec::new(),
                });
                self.children.len() - 1
            }
        };
        self.children[index].insert(rest);
    }

    fn render(&self, indent: &str, out: &mut String) {
        for (idx, child) in self.children.iter().enumerate() {
            let last = idx + 1 == self.children.len();
            let (branch, next) = if last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            out.push_str(&format!("{indent}{branch}{}\n", child.name));
            child.render(&format!("{indent}{next}"), out);
        }
    }
}

/// Top-level names flush left, descendants drawn with box characters.
fn render_tree(paths: &[String]) -> String {
    let mut root = TreeNode::default();
    for path in paths {
        root.insert(&chassis::path::split(path));
    }
    let mut out = String::new();
    for top in &root.children {
        out.push_str(&top.name);
        out.push('\n');
        top.render("", &mut out);
    }
    out
}

fn print_show(report: &ShowReport) {
    print_warnings(&report.warnings);
    if report.is_empty() {
        eprintln!("No allocations or attachments found");
        return;
    }
    for node in &report.nodes {
        println!("node: {} [{}]", node.hostname, node.platform);
    }
    for component in &report.components {
        println!("component: {} [{}]", component.component, component.chassis);
    }
}

fn print_add(report: &AddReport) {
    if report.created {
        println!("Added: {}", report.chassis);
    } else {
        println!("Already present: {}", report.chassis);
    }
}

fn print_remove(report: &RemoveReport) {
    print_warnings(&report.warnings);
    if report.dry_run {
        println!("[dry-run] No changes will be made");
    }
    if !report.allocated_nodes.is_empty() {
        println!("Allocated nodes:");
        for node in &report.allocated_nodes {
            println!("  {node}");
        }
    }
    if !report.attached_components.is_empty() {
        println!("Attached components:");
        for component in &report.attached_components {
            println!("  {component}");
        }
    }
    if report.removed {
        println!("Removed: {}", report.chassis);
    } else if !report.is_blocked() {
        println!("Safe to remove: {}", report.chassis);
    }
}

fn print_rename(report: &RenameReport) {
    if report.dry_run {
        println!("[dry-run] No changes will be made");
        println!("Would rename: {} → {}", report.old, report.new);
    } else {
        println!("Renamed: {} → {}", report.old, report.new);
    }
    let verb = if report.dry_run { "Would update" } else { "Updated" };
    for (label, records) in [
        ("attachments", &report.updated_attachments),
        ("allocations", &report.updated_allocations),
    ] {
        if records.is_empty() {
            continue;
        }
        println!("{verb} {label}:");
        for record in records {
            println!("  - {}", record.display());
        }
    }
    print_warnings(&report.warnings);
}

fn print_query(report: &QueryReport) {
    print_warnings(&report.warnings);
    if report.paths.is_empty() {
        eprintln!("No allocation or attachment found for {:?}", report.identifier);
        return;
    }
    for path in &report.paths {
        println!("{path}");
    }
}
