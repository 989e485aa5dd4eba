use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rulechain_components::{FunctionRegistry, register_builtins};
use rulechain_engine::{ChainPool, ChainRunner, MsgOptions, RuleEngine};
use rulechain_node::{EngineConfig, Metadata, NodeRegistry, RuleMsg, TracingDebugSink};

/// rulechain - route messages through graphs of rule nodes
#[derive(Parser)]
#[command(name = "rulechain")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Directory of chains available as sub-chains (default: ~/.rulechain/chains)
  #[arg(long, global = true)]
  chains_dir: Option<PathBuf>,

  /// Log debug events for every node of the chain
  #[arg(long, global = true)]
  debug: bool,

  /// Message type given to payloads read from stdin
  #[arg(long, global = true, default_value = "DEFAULT")]
  msg_type: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a chain or a single node
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },

  /// Check that a chain definition parses and all of its nodes initialize
  Validate {
    /// Path to the chain file (JSON)
    chain_file: PathBuf,
  },
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run a whole chain with one payload from stdin
  Chain {
    /// Path to the chain file (JSON)
    chain_file: PathBuf,
  },

  /// Run a single node of a chain, without following its connections
  Node {
    /// Path to the chain file (JSON)
    chain_file: PathBuf,

    /// The node ID to execute
    #[arg(long)]
    node: String,
  },

  /// Run a chain for every newline-delimited payload on stdin
  Stream {
    /// Path to the chain file (JSON)
    chain_file: PathBuf,
  },
}

/// Options shared by every command.
struct Settings {
  chains_dir: PathBuf,
  debug: bool,
  msg_type: String,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.debug);

  let chains_dir = match cli.chains_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".rulechain")
      .join("chains"),
  };
  let settings = Settings {
    chains_dir,
    debug: cli.debug,
    msg_type: cli.msg_type,
  };

  let Some(command) = cli.command else {
    println!("rulechain - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Run { target } => match target {
        RunTarget::Chain { chain_file } => run_chain(&chain_file, &settings).await,
        RunTarget::Node { chain_file, node } => run_node(&chain_file, &node, &settings).await,
        RunTarget::Stream { chain_file } => run_stream(&chain_file, &settings).await,
      },
      Commands::Validate { chain_file } => validate(&chain_file).await,
    }
  })
}

fn init_tracing(debug: bool) {
  let default = if debug { "info,rulechain_node=debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
    )
    .init();
}

fn engine_config(debug: bool) -> Result<EngineConfig> {
  let registry = NodeRegistry::new();
  register_builtins(&registry, Arc::new(FunctionRegistry::new()))
    .context("failed to register built-in nodes")?;

  let config = EngineConfig::new(Arc::new(registry));
  Ok(if debug {
    config.with_debug_sink(Arc::new(TracingDebugSink))
  } else {
    config
  })
}

/// Build the chain in `chain_file` inside a pool holding every chain of the
/// chains directory. The pool is returned so sub-chain references stay valid.
async fn load_chain(chain_file: &Path, settings: &Settings) -> Result<(Arc<ChainPool>, Arc<RuleEngine>)> {
  let pool = ChainPool::new(Arc::new(engine_config(settings.debug)?));

  let content = tokio::fs::read(chain_file)
    .await
    .with_context(|| format!("failed to read chain file: {}", chain_file.display()))?;
  let engine = pool
    .create("", &content)
    .with_context(|| format!("failed to load chain file: {}", chain_file.display()))?;

  if settings.chains_dir.is_dir() {
    pool
      .load_dir(&settings.chains_dir)
      .await
      .with_context(|| format!("failed to load chains from {}", settings.chains_dir.display()))?;
  }

  if settings.debug {
    let chain = engine.chain().context("chain stopped while loading")?;
    for node in &chain.definition().metadata.nodes {
      engine.set_node_debug_mode(&node.id, true)?;
    }
  }

  let nodes = engine.chain().map(|c| c.node_count()).unwrap_or(0);
  eprintln!("Loaded chain: {} ({} nodes)", engine.id(), nodes);
  Ok((pool, engine))
}

/// A token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling in-flight messages");
      trigger.cancel();
    }
  });
  cancel
}

async fn run_chain(chain_file: &Path, settings: &Settings) -> Result<()> {
  let (pool, engine) = load_chain(chain_file, settings).await?;

  let payload = read_payload_from_stdin()?;
  let msg = RuleMsg::json(settings.msg_type.as_str(), Metadata::new(), &payload);
  eprintln!("Message: {}", msg.id);

  let options = MsgOptions::new().with_cancel(interrupt_token());
  let ends = engine
    .on_msg_and_wait(msg, options)
    .await
    .context("chain execution failed")?;

  eprintln!("Branches ended: {}", ends.len());
  println!("{}", serde_json::to_string_pretty(&ends)?);

  pool.stop();
  Ok(())
}

async fn run_node(chain_file: &Path, node_id: &str, settings: &Settings) -> Result<()> {
  let (pool, engine) = load_chain(chain_file, settings).await?;

  let payload = read_payload_from_stdin()?;
  let msg = RuleMsg::json(settings.msg_type.as_str(), Metadata::new(), &payload);

  eprintln!("Running node: {}", node_id);
  let end = engine
    .execute_node(node_id, msg, interrupt_token())
    .await
    .context("node execution failed")?;

  println!("{}", serde_json::to_string_pretty(&end)?);

  pool.stop();
  Ok(())
}

async fn run_stream(chain_file: &Path, settings: &Settings) -> Result<()> {
  let (pool, engine) = load_chain(chain_file, settings).await?;

  let (output, mut results) = mpsc::unbounded_channel();
  let runner = ChainRunner::new(engine).with_output(output);
  let sender = runner.sender();
  let runner = tokio::spawn(runner.start(interrupt_token()));

  let printer = tokio::spawn(async move {
    while let Some(ends) = results.recv().await {
      match serde_json::to_string(&ends) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to serialize chain result"),
      }
    }
  });

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut count = 0usize;
  while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
    if line.trim().is_empty() {
      continue;
    }
    let payload: serde_json::Value = serde_json::from_str(&line)
      .with_context(|| format!("failed to parse payload JSON on line {}", count + 1))?;
    let msg = RuleMsg::json(settings.msg_type.as_str(), Metadata::new(), &payload);
    if sender.send(msg).await.is_err() {
      warn!("chain runner stopped before stdin was exhausted");
      break;
    }
    count += 1;
  }
  drop(sender);

  runner.await.context("chain runner task failed")??;
  printer.await.context("output task failed")?;
  info!(messages = count, "stream finished");

  pool.stop();
  Ok(())
}

async fn validate(chain_file: &Path) -> Result<()> {
  let content = tokio::fs::read(chain_file)
    .await
    .with_context(|| format!("failed to read chain file: {}", chain_file.display()))?;

  let engine = RuleEngine::new("", &content, Arc::new(engine_config(false)?))
    .with_context(|| format!("invalid chain: {}", chain_file.display()))?;
  let chain = engine.chain().context("chain stopped while validating")?;
  let def = chain.definition();

  println!(
    "chain '{}' is valid: {} nodes, {} connections",
    engine.id(),
    chain.node_count(),
    def.metadata.connections.len() + def.metadata.rule_chain_connections.len()
  );

  engine.stop();
  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
