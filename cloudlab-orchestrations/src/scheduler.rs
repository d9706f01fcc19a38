//! Per-instance action scheduling
//!
//! Commands for the same instance run one at a time, in the order `execute` was called. Commands
//! for different instances run in parallel. Each instance with pending work owns one queue and one
//! worker task; the registry entry is removed as soon as that queue drains.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use cloudlab_models::{InstanceCommand, InstanceId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actions::{Action, ActionContext, InstanceActionListener, LoggingListener};
use crate::error::ActionError;

type ActionResult = Result<(), ActionError>;

struct QueuedAction {
    action: Action,
    done: oneshot::Sender<ActionResult>,
}

type Registry = Mutex<HashMap<InstanceId, mpsc::UnboundedSender<QueuedAction>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<InstanceId, mpsc::UnboundedSender<QueuedAction>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves with the outcome of one scheduled action
///
/// Dropping the handle does not cancel the action.
#[derive(Debug)]
pub struct ActionHandle {
    action_id: Uuid,
    receiver: oneshot::Receiver<ActionResult>,
}

impl ActionHandle {
    pub fn action_id(&self) -> Uuid {
        self.action_id
    }
}

impl Future for ActionHandle {
    type Output = ActionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ActionError::Abandoned)))
    }
}

#[derive(Clone)]
pub struct ActionScheduler {
    context: ActionContext,
    listener: Arc<dyn InstanceActionListener>,
    queues: Arc<Registry>,
}

impl ActionScheduler {
    pub fn new(context: ActionContext) -> Self {
        Self {
            context,
            listener: Arc::new(LoggingListener),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn InstanceActionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Queue a command behind any pending work for the same instance.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn execute(&self, command: InstanceCommand) -> ActionHandle {
        let action = Action::new(command);
        let instance_id = action.instance_id();
        let (done, receiver) = oneshot::channel();
        let handle = ActionHandle {
            action_id: action.id(),
            receiver,
        };
        debug!(action = action.name(), action_id = %action.id(), instance_id, "Action queued");

        let mut queued = QueuedAction { action, done };
        let mut queues = lock(&self.queues);

        if let Some(sender) = queues.get(&instance_id) {
            match sender.send(queued) {
                Ok(()) => return handle,
                // Worker already gone; start a fresh queue below
                Err(mpsc::error::SendError(returned)) => queued = returned,
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(queued).is_err() {
            warn!(instance_id, "Action queue closed before first action");
        }
        queues.insert(instance_id, sender);
        drop(queues);

        tokio::spawn(self.clone().drain(instance_id, receiver));
        handle
    }

    /// Number of instances with pending or running actions
    pub fn queue_count(&self) -> usize {
        lock(&self.queues).len()
    }

    async fn drain(self, instance_id: InstanceId, mut receiver: mpsc::UnboundedReceiver<QueuedAction>) {
        let mut next = receiver.recv().await;

        while let Some(QueuedAction { action, done }) = next {
            let result = self.run_isolated(&action).await;
            match &result {
                Ok(()) => self.listener.on_terminated(&action),
                Err(e) => self.listener.on_error(&action, e),
            }

            // Check for more work and evict under the registry lock so execute never sends into
            // a queue that is about to stop.
            next = {
                let mut queues = lock(&self.queues);
                match receiver.try_recv() {
                    Ok(queued) => Some(queued),
                    Err(_) => {
                        queues.remove(&instance_id);
                        debug!(instance_id, "Action queue drained");
                        None
                    }
                }
            };

            // The caller may have dropped its handle
            let _ = done.send(result);
        }
    }

    async fn run_isolated(&self, action: &Action) -> ActionResult {
        let context = self.context.clone();
        let task_action = action.clone();
        let task = tokio::spawn(async move { task_action.run(&context).await });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ActionError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(ActionError::Abandoned),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
