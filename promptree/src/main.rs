//! `promptree`: grow a tree of scored prompt variants from the command line.
//!
//! State lives in `.promptree/` under the current directory: `config.toml`
//! (commands, limits, stop policy) and `tree.json` (the iteration tree).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::warn;

use promptree::core::error::{DriverError, ScoringFailed};
use promptree::core::rules::TargetMatchEvaluator;
use promptree::core::snapshot::EvaluatorRegistry;
use promptree::core::tree::{IterationNode, IterationTree};
use promptree::driver::IterationDriver;
use promptree::exit_codes;
use promptree::io::config::{CommandRole, PromptreeConfig, config_path, load_config, write_config};
use promptree::io::executor::{CommandExecutor, PromptExecutor};
use promptree::io::judge::{JudgeEvaluator, UnconfiguredJudge};
use promptree::io::optimizer::OptimizerStrategy;
use promptree::io::seed::load_seed;
use promptree::io::tree_store::{load_tree, tree_path, write_tree};
use promptree::logging;

#[derive(Parser)]
#[command(
    name = "promptree",
    version,
    about = "Iteratively optimize prompts over a versioned tree of scored candidates"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score the seed prompt and start a new tree with it as the root.
    Init {
        /// Seed file (TOML) with the prompt and criteria.
        seed: PathBuf,
        /// Replace an existing tree.
        #[arg(short, long)]
        force: bool,
    },
    /// Grow one branch until the stop policy fires.
    Run {
        /// Version to branch from (defaults to the best leaf).
        #[arg(long)]
        from: Option<String>,
        /// Maximum number of steps (overrides `stop.max_steps`).
        #[arg(long)]
        steps: Option<u32>,
        /// Extra optimization directive; repeatable.
        #[arg(long = "directive")]
        directives: Vec<String>,
    },
    /// Print the tree.
    Show,
    /// List leaves with their scores.
    Leaves,
    /// Print the path from the root to a version.
    Path { version: String },
    /// Delete a version and its subtree.
    Delete { version: String },
    /// Print the best-scoring leaf and its prompt.
    Best,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DriverError>() {
        // Unknown or vanished versions are bad input, not failed steps.
        Some(DriverError::Tree(_)) => exit_codes::INVALID,
        Some(_) => exit_codes::FAILED,
        None if err.downcast_ref::<ScoringFailed>().is_some() => exit_codes::FAILED,
        None => exit_codes::INVALID,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { seed, force } => cmd_init(&root, &seed, force),
        Command::Run {
            from,
            steps,
            directives,
        } => cmd_run(&root, from, steps, directives),
        Command::Show => {
            let (_, tree) = open(&root)?;
            print!("{}", tree.render());
            Ok(())
        }
        Command::Leaves => {
            let (_, tree) = open(&root)?;
            for leaf in tree.leaves() {
                println!("{}", summary(&leaf));
            }
            Ok(())
        }
        Command::Path { version } => {
            let (_, tree) = open(&root)?;
            let path = tree
                .path(&version)
                .ok_or_else(|| anyhow!("unknown version {version}"))?;
            for (depth, node) in path.iter().enumerate() {
                println!("{}{}", "  ".repeat(depth), summary(node));
            }
            Ok(())
        }
        Command::Delete { version } => {
            let (_, tree) = open(&root)?;
            let removed = tree.delete(&version)?;
            write_tree(&tree_path(&root), &tree)?;
            println!("deleted {} node(s)", removed.len());
            Ok(())
        }
        Command::Best => {
            let (_, tree) = open(&root)?;
            let best = tree.best_leaf();
            println!("{}", summary(&best));
            for message in best.value().prompt() {
                println!("[{}]\n{}", message.role, message.content);
            }
            Ok(())
        }
    }
}

fn summary(node: &IterationNode) -> String {
    let candidate = node.value();
    format!(
        "{}\t{:.1}%\t{}/{}",
        node.version(),
        candidate.percentage(),
        candidate.total_score(),
        candidate.score_cap()
    )
}

fn cmd_init(root: &Path, seed_path: &Path, force: bool) -> Result<()> {
    let tree_file = tree_path(root);
    if tree_file.exists() && !force {
        bail!(
            "{} already exists (use --force to replace it)",
            tree_file.display()
        );
    }
    let cfg_file = config_path(root);
    let cfg = load_config(&cfg_file)?;
    if !cfg_file.exists() {
        write_config(&cfg_file, &cfg)?;
    }

    let seed = load_seed(seed_path)?;
    let output = match &seed.output {
        Some(output) => output.clone(),
        None => model_executor(&cfg)?
            .execute(&seed.prompt)
            .context("execute seed prompt")?,
    };
    let mut candidate = seed.candidate(output, &registry(&cfg))?;
    candidate.run_all_tasks()?;

    let tree = IterationTree::new(candidate);
    write_tree(&tree_file, &tree)?;
    println!("{}", summary(&tree.root()));
    Ok(())
}

fn cmd_run(
    root: &Path,
    from: Option<String>,
    steps: Option<u32>,
    directives: Vec<String>,
) -> Result<()> {
    let (cfg, tree) = open(root)?;
    let start = match from {
        Some(version) => version,
        None => tree.best_leaf().version().to_string(),
    };
    let executor = model_executor(&cfg)?;
    let strategy = OptimizerStrategy::new(CommandExecutor::new(
        cfg.command_for(CommandRole::Optimizer)?,
        cfg.limits(),
    )?);
    let mut stop = cfg.stop_policy(steps);
    let directives = cfg.directives.iter().cloned().chain(directives).collect();
    let driver = IterationDriver::new(&tree, executor).with_directives(directives);

    let outcome = driver.run_with(&start, &strategy, &mut stop, |node| {
        println!("{}", summary(node));
    });
    // Steps attached before a failure are kept.
    if let Err(err) = write_tree(&tree_path(root), &tree) {
        warn!(err = %err, "failed to save tree");
        return Err(err);
    }
    outcome?;
    Ok(())
}

fn open(root: &Path) -> Result<(PromptreeConfig, IterationTree)> {
    let cfg = load_config(&config_path(root))?;
    let tree_file = tree_path(root);
    if !tree_file.exists() {
        bail!(
            "{} not found (run `promptree init <seed>` first)",
            tree_file.display()
        );
    }
    let tree = load_tree(&tree_file, &registry(&cfg))?;
    Ok((cfg, tree))
}

fn model_executor(cfg: &PromptreeConfig) -> Result<CommandExecutor> {
    CommandExecutor::new(cfg.command_for(CommandRole::Model)?, cfg.limits())
}

/// Evaluators the CLI can attach to criteria. Without a judge or model
/// command, `judge` criteria still load but cannot be scored.
fn registry(cfg: &PromptreeConfig) -> EvaluatorRegistry {
    let mut registry = EvaluatorRegistry::new();
    registry.register(Arc::new(TargetMatchEvaluator));
    let judge = cfg
        .command_for(CommandRole::Judge)
        .and_then(|command| CommandExecutor::new(command, cfg.limits()));
    match judge {
        Ok(executor) => registry.register(Arc::new(JudgeEvaluator::new(executor))),
        Err(_) => registry.register(Arc::new(UnconfiguredJudge)),
    };
    registry
}
