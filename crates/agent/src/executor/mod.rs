// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded concurrent command executor.
//!
//! Commands arrive from the push channel, pass intake validation, and
//! wait in a bounded queue consumed by `max_parallel` workers. Every
//! accepted command produces exactly one result on the wire, including
//! validation failures, queue overflow, missing handlers, and handler
//! panics.

mod console;
mod system;

pub use console::ConsoleHandler;
pub use system::SystemHandler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use cms_core::{
    CommandEnvelope, CommandResult, ERROR_TYPE_EXECUTOR, ERROR_TYPE_HANDLER, ERROR_TYPE_INPUT,
    ERROR_TYPE_QUEUE,
};

/// Dequeue poll window; bounds shutdown observability at the workers.
const DEQUEUE_POLL: Duration = Duration::from_secs(1);

/// Where finished results go (the push client, in production).
pub trait ResultSink: Send + Sync + 'static {
    fn send_result(&self, command_id: &str, result: &CommandResult);
}

/// Per-type command handler. Handlers report failure by mutating
/// `result`; they do not return errors.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn execute(&self, command: &str, command_id: &str, result: &mut CommandResult);
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_parallel: usize,
    pub queue_capacity: usize,
    pub command_timeout: Duration,
}

impl ExecutorConfig {
    pub fn from_section(section: &cms_core::config::CommandExecutorSection) -> Self {
        ExecutorConfig {
            max_parallel: section.max_parallel_commands.max(1),
            queue_capacity: section.max_queue_size.max(1),
            command_timeout: Duration::from_secs(section.default_timeout_sec),
        }
    }
}

pub struct CommandExecutor {
    config: ExecutorConfig,
    handlers: Arc<HashMap<String, Arc<dyn CommandHandler>>>,
    sink: Arc<dyn ResultSink>,
    queue_tx: mpsc::Sender<CommandEnvelope>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<CommandEnvelope>>>,
    stop: Arc<AtomicBool>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl CommandExecutor {
    /// Build an executor with the default handler set (`console` plus the
    /// reserved `system` slot).
    pub fn new(config: ExecutorConfig, sink: Arc<dyn ResultSink>) -> Self {
        let mut handlers: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
        handlers.insert(
            "console".to_string(),
            Arc::new(ConsoleHandler::new(config.command_timeout)),
        );
        handlers.insert("system".to_string(), Arc::new(SystemHandler));
        Self::with_handlers(config, sink, handlers)
    }

    pub fn with_handlers(
        config: ExecutorConfig,
        sink: Arc<dyn ResultSink>,
        handlers: HashMap<String, Arc<dyn CommandHandler>>,
    ) -> Self {
        info!(
            max_parallel = config.max_parallel,
            queue_capacity = config.queue_capacity,
            timeout_sec = config.command_timeout.as_secs(),
            handlers = ?handlers.keys().collect::<Vec<_>>(),
            "command executor initialized"
        );
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        CommandExecutor {
            config,
            handlers: Arc::new(handlers),
            sink,
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start the worker pool. Idempotent.
    pub fn start_workers(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("worker pool already started");
            return;
        }
        info!(count = self.config.max_parallel, "starting command workers");
        for index in 0..self.config.max_parallel {
            let rx = Arc::clone(&self.queue_rx);
            let handlers = Arc::clone(&self.handlers);
            let sink = Arc::clone(&self.sink);
            let stop = Arc::clone(&self.stop);
            workers.push(tokio::spawn(worker_loop(index, rx, handlers, sink, stop)));
        }
    }

    /// Intake: validate, then non-blocking enqueue. Rejections synthesize
    /// an error result when a command id is known.
    pub fn submit(&self, payload: Value) {
        let envelope = match CommandEnvelope::parse(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "invalid command payload");
                if let Some(id) = e.id() {
                    let result =
                        CommandResult::error(e.command_type(), ERROR_TYPE_INPUT, e.to_string());
                    self.sink.send_result(id, &result);
                }
                return;
            }
        };

        match self.queue_tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                error!(
                    command_id = %envelope.id,
                    capacity = self.config.queue_capacity,
                    "command queue full, rejecting"
                );
                let result = CommandResult::error(
                    &envelope.command_type,
                    ERROR_TYPE_QUEUE,
                    "Agent command queue is full. Please try again later.",
                );
                self.sink.send_result(&envelope.id, &result);
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                error!(command_id = %envelope.id, "command queue closed, rejecting");
                let result = CommandResult::error(
                    &envelope.command_type,
                    ERROR_TYPE_EXECUTOR,
                    "Agent is shutting down.",
                );
                self.sink.send_result(&envelope.id, &result);
            }
        }
    }

    /// Stop the pool. Graceful drains the queue; otherwise pending
    /// commands are purged before workers stop.
    pub async fn stop(&self, graceful: bool) {
        info!(graceful, "stopping command executor");
        if !graceful {
            let purged = self.purge_queue().await;
            if purged > 0 {
                warn!(purged, "cleared pending commands");
            }
        }
        self.stop.store(true, Ordering::SeqCst);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let budget = self.config.command_timeout * workers.len().max(1) as u32;
        let deadline = tokio::time::Instant::now() + budget;
        for worker in workers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, worker).await.is_err() {
                warn!("worker did not stop within the join budget");
            }
        }

        let residual = self.purge_queue().await;
        if residual > 0 {
            warn!(residual, "cleared commands left after worker shutdown");
        }
        info!("command executor stopped");
    }

    async fn purge_queue(&self) -> usize {
        let mut rx = self.queue_rx.lock().await;
        let mut cleared = 0;
        while rx.try_recv().is_ok() {
            cleared += 1;
        }
        cleared
    }
}

async fn worker_loop(
    index: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<CommandEnvelope>>>,
    handlers: Arc<HashMap<String, Arc<dyn CommandHandler>>>,
    sink: Arc<dyn ResultSink>,
    stop: Arc<AtomicBool>,
) {
    debug!(worker = index, "command worker started");
    loop {
        // Bounded dequeue wait keeps shutdown observable within ~1 s.
        let next = {
            let mut rx = rx.lock().await;
            match tokio::time::timeout(DEQUEUE_POLL, rx.recv()).await {
                Ok(Some(envelope)) => Some(envelope),
                Ok(None) => break,
                Err(_) => None,
            }
        };

        match next {
            Some(envelope) => {
                info!(worker = index, command_id = %envelope.id, command_type = %envelope.command_type, "processing command");
                process_command(&handlers, sink.as_ref(), envelope).await;
            }
            None if stop.load(Ordering::SeqCst) => break,
            None => {}
        }
    }
    debug!(worker = index, "command worker stopped");
}

/// Run one command through its handler and emit the result. The handler
/// runs on its own task so a panic is contained and reported instead of
/// killing the worker.
async fn process_command(
    handlers: &HashMap<String, Arc<dyn CommandHandler>>,
    sink: &dyn ResultSink,
    envelope: CommandEnvelope,
) {
    let result = match handlers.get(&envelope.command_type) {
        None => {
            error!(command_id = %envelope.id, command_type = %envelope.command_type, "no handler for command type");
            CommandResult::error(
                &envelope.command_type,
                ERROR_TYPE_HANDLER,
                format!("Command type '{}' is not supported by this agent.", envelope.command_type),
            )
        }
        Some(handler) => {
            let handler = Arc::clone(handler);
            let command = envelope.command.clone();
            let command_id = envelope.id.clone();
            let mut result = CommandResult::skeleton(&envelope.command_type);
            let execution = tokio::spawn(async move {
                handler.execute(&command, &command_id, &mut result).await;
                result
            });
            match execution.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    error!(command_id = %envelope.id, "handler panicked");
                    CommandResult::error_with_exception(
                        &envelope.command_type,
                        ERROR_TYPE_HANDLER,
                        "Handler panicked while executing command",
                        "panic",
                    )
                }
                Err(e) => {
                    error!(command_id = %envelope.id, error = %e, "handler task failed");
                    CommandResult::error(
                        &envelope.command_type,
                        ERROR_TYPE_EXECUTOR,
                        format!("Agent internal error in worker: {e}"),
                    )
                }
            }
        }
    };

    debug!(command_id = %envelope.id, success = result.success, "command finished");
    sink.send_result(&envelope.id, &result);
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
