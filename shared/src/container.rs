//! Generic event-driven state container.
//!
//! A [`Container`] owns the current state of one [`Machine`]. Events are
//! queued on an unbounded channel and handled strictly one at a time, in
//! submission order, by a single dispatch task. Handlers publish states
//! through an [`Emitter`]; observers read the latest value through a
//! `watch` channel or every transition through a `broadcast` channel.

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::event::Intent;

// =============================================================================
// Constants
// =============================================================================

/// Transition stream capacity. Observers further behind than this lag.
pub const DEFAULT_TRANSITION_BUFFER: usize = 64;

// =============================================================================
// Machine
// =============================================================================

#[async_trait]
pub trait Machine: Send + Sync + Sized + 'static {
    type Event: Intent + fmt::Debug;
    type State: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;
    type Error: fmt::Display + Send + 'static;

    /// Tracing label.
    const NAME: &'static str;

    fn initial_state(&self) -> Self::State;

    /// State published when a handler fails or panics.
    fn fault_state(&self, description: &str) -> Self::State;

    /// Called once from inside the runtime when the container starts.
    fn on_spawn(&self) {}

    async fn handle(&self, event: Self::Event, emitter: &Emitter<Self>) -> Result<(), Self::Error>;
}

// =============================================================================
// Published state
// =============================================================================

struct Published<S> {
    latest: watch::Sender<S>,
    transitions: broadcast::Sender<S>,
}

impl<S: Clone> Published<S> {
    fn publish(&self, state: S) {
        // No receivers is fine for both channels.
        let _ = self.transitions.send(state.clone());
        self.latest.send_replace(state);
    }

    fn current(&self) -> S {
        self.latest.borrow().clone()
    }
}

/// Handle given to a handler for publishing states and queueing follow-ups.
pub struct Emitter<M: Machine> {
    published: Arc<Published<M::State>>,
    queue: Option<mpsc::UnboundedSender<M::Event>>,
}

impl<M: Machine> Emitter<M> {
    pub fn emit(&self, state: M::State) {
        debug!(machine = M::NAME, ?state, "emit");
        self.published.publish(state);
    }

    /// The container's current state.
    #[must_use]
    pub fn current(&self) -> M::State {
        self.published.current()
    }

    /// Queue a follow-up event. It runs after the current handler returns
    /// and after everything already queued.
    pub fn submit(&self, event: M::Event) {
        let name = event.name();
        match &self.queue {
            Some(queue) if queue.send(event).is_ok() => {}
            _ => debug!(machine = M::NAME, event = name, "follow-up dropped; container closed"),
        }
    }
}

// =============================================================================
// Container
// =============================================================================

pub struct Container<M: Machine> {
    sender: mpsc::UnboundedSender<M::Event>,
    published: Arc<Published<M::State>>,
    task: JoinHandle<()>,
}

impl<M: Machine> Container<M> {
    /// Starts the dispatch loop. Must be called from within a tokio runtime.
    pub fn spawn(machine: M) -> Self {
        Self::with_buffer(machine, DEFAULT_TRANSITION_BUFFER)
    }

    pub fn with_buffer(machine: M, transition_buffer: usize) -> Self {
        let machine = Arc::new(machine);
        let (latest, _) = watch::channel(machine.initial_state());
        let (transitions, _) = broadcast::channel(transition_buffer.max(1));
        let published = Arc::new(Published { latest, transitions });

        let (sender, receiver) = mpsc::unbounded_channel();
        let follow_ups = sender.downgrade();

        machine.on_spawn();
        let task = tokio::spawn(dispatch_loop(
            Arc::clone(&machine),
            Arc::clone(&published),
            receiver,
            follow_ups,
        ));

        Self {
            sender,
            published,
            task,
        }
    }

    /// Enqueue an event. Never blocks.
    pub fn submit(&self, event: M::Event) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            warn!(machine = M::NAME, event = name, "submit after dispatch loop stopped");
        }
    }

    /// A cloneable submit-only handle.
    #[must_use]
    pub fn sender(&self) -> EventSender<M> {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> M::State {
        self.published.current()
    }

    /// Latest-value observer. Starts at the current state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<M::State> {
        self.published.latest.subscribe()
    }

    /// Every state emitted from now on, in order.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<M::State> {
        self.published.transitions.subscribe()
    }

    /// Stops accepting events and waits for queued ones to drain.
    ///
    /// Outstanding [`EventSender`]s keep the loop alive until they are dropped.
    pub async fn shutdown(self) {
        let Self { sender, task, .. } = self;
        drop(sender);
        if let Err(e) = task.await {
            error!(machine = M::NAME, error = %e, "dispatch loop ended abnormally");
        }
    }
}

pub struct EventSender<M: Machine> {
    sender: mpsc::UnboundedSender<M::Event>,
}

impl<M: Machine> Clone for EventSender<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M: Machine> EventSender<M> {
    pub fn submit(&self, event: M::Event) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            warn!(machine = M::NAME, event = name, "submit after dispatch loop stopped");
        }
    }
}

// =============================================================================
// Dispatch loop
// =============================================================================

async fn dispatch_loop<M: Machine>(
    machine: Arc<M>,
    published: Arc<Published<M::State>>,
    mut receiver: mpsc::UnboundedReceiver<M::Event>,
    follow_ups: mpsc::WeakUnboundedSender<M::Event>,
) {
    debug!(machine = M::NAME, "dispatch loop started");

    while let Some(event) = receiver.recv().await {
        let name = event.name();
        let span = info_span!("dispatch", machine = M::NAME, event = name);

        let emitter = Emitter::<M> {
            published: Arc::clone(&published),
            queue: follow_ups.upgrade(),
        };
        let handler = Arc::clone(&machine);

        // Run on its own task so a panic is contained to this event.
        let outcome = tokio::spawn(
            async move { handler.handle(event, &emitter).await }.instrument(span.clone()),
        )
        .await;

        span.in_scope(|| match outcome {
            Ok(Ok(())) => debug!("handled"),
            Ok(Err(e)) => {
                let description = e.to_string();
                warn!(error = %description, "handler failed");
                published.publish(machine.fault_state(&description));
            }
            Err(join) => {
                let description = describe_join_error(join);
                error!(error = %description, "handler panicked");
                published.publish(machine.fault_state(&description));
            }
        });
    }

    debug!(machine = M::NAME, "dispatch loop stopped");
}

fn describe_join_error(join: JoinError) -> String {
    if join.is_cancelled() {
        return "handler cancelled".to_owned();
    }
    match join.try_into_panic() {
        Ok(payload) => panic_message(payload.as_ref()),
        Err(other) => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
