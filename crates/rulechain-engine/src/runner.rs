//! Chain runner with channel-based ingestion.
//!
//! The `ChainRunner` owns an mpsc channel of messages and feeds each one
//! through a [`RuleEngine`], waiting for every branch before taking the next.

use std::sync::Arc;

use rulechain_node::{ChainEnd, RuleMsg};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::RuleEngine;
use crate::error::EngineError;
use crate::options::MsgOptions;

/// Runs a chain for every message received on its channel.
///
/// # Usage
///
/// ```ignore
/// let runner = ChainRunner::new(engine);
///
/// // Hand the sender to whatever produces messages
/// let sender = runner.sender();
///
/// // Start the processing loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct ChainRunner {
  sender: mpsc::Sender<RuleMsg>,
  receiver: mpsc::Receiver<RuleMsg>,
  engine: Arc<RuleEngine>,
  output: Option<mpsc::UnboundedSender<Vec<ChainEnd>>>,
}

impl ChainRunner {
  pub fn new(engine: Arc<RuleEngine>) -> Self {
    Self::with_buffer_size(engine, 100)
  }

  pub fn with_buffer_size(engine: Arc<RuleEngine>, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
      output: None,
    }
  }

  /// Forward the branch ends of every processed message to `output`.
  pub fn with_output(mut self, output: mpsc::UnboundedSender<Vec<ChainEnd>>) -> Self {
    self.output = Some(output);
    self
  }

  pub fn sender(&self) -> mpsc::Sender<RuleMsg> {
    self.sender.clone()
  }

  /// Queue a message through the runner's own channel.
  pub async fn run(&self, msg: RuleMsg) -> Result<(), EngineError> {
    self
      .sender
      .send(msg)
      .await
      .map_err(|_| EngineError::RunnerClosed)
  }

  /// Process messages until `cancel` fires or every handle from
  /// [`ChainRunner::sender`] is dropped.
  ///
  /// Messages already queued are processed before a channel close is seen.
  pub async fn start(self, cancel: CancellationToken) -> Result<(), EngineError> {
    let Self {
      sender,
      mut receiver,
      engine,
      output,
    } = self;
    drop(sender);

    info!(chain_id = %engine.id(), "starting chain runner");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(chain_id = %engine.id(), "chain runner cancelled");
          break;
        }
        msg = receiver.recv() => {
          let Some(msg) = msg else {
            info!(chain_id = %engine.id(), "chain runner channel closed");
            break;
          };

          let msg_id = msg.id.clone();
          let options = MsgOptions::new().with_cancel(cancel.child_token());
          match engine.on_msg_and_wait(msg, options).await {
            Ok(ends) => {
              info!(
                chain_id = %engine.id(),
                msg_id = %msg_id,
                branches = ends.len(),
                "message processed"
              );
              if let Some(output) = &output {
                let _ = output.send(ends);
              }
            }
            Err(EngineError::NotInitialized) => {
              error!(chain_id = %engine.id(), "chain stopped, shutting down runner");
              return Err(EngineError::NotInitialized);
            }
            Err(e) => {
              error!(
                chain_id = %engine.id(),
                msg_id = %msg_id,
                error = %e,
                "message processing failed"
              );
            }
          }
        }
      }
    }

    Ok(())
  }

  pub fn engine(&self) -> &RuleEngine {
    &self.engine
  }
}
