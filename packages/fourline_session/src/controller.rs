//! Async driver for [`SessionCore`].
//!
//! One actor task per controller owns the core, the in-flight requests and
//! the channel subscription. The [`SessionHandle`] talks to it over an mpsc
//! queue, reads state through a `watch` channel, and receives redirects and
//! notices as [`ControllerEvent`]s.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{ApiError, ExistenceCheck, FetchOutcome, StateFetcher};
use crate::board::DEFAULT_BOARD_SIZE;
use crate::channel::{ChannelEvent, PresenceChannel, Subscription};
use crate::machine::{
    ControllerState, Effect, Input, Notice, Route, SessionCore, SessionSnapshot, TransitionError,
};
use crate::protocol::EntryContext;
use crate::view::{BoardFilled, RestartPolicy};

/// Messages that can be sent to the controller actor
enum ControllerMessage {
    Refetch {
        respond_to: oneshot::Sender<Result<(), TransitionError>>,
    },
    DismissNotice(u64),
    Dispose,
}

/// One-shot outputs of the controller, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Redirect(Route),
    Notice(Notice),
}

/// Builds session controllers over a fixed set of collaborators.
pub struct SessionController<E, F, C> {
    existence: Arc<E>,
    fetcher: Arc<F>,
    channel: Arc<C>,
    board_size: usize,
    policy: Arc<dyn RestartPolicy>,
}

impl<E, F, C> SessionController<E, F, C>
where
    E: ExistenceCheck,
    F: StateFetcher,
    C: PresenceChannel,
{
    pub fn new(existence: Arc<E>, fetcher: Arc<F>, channel: Arc<C>) -> Self {
        Self {
            existence,
            fetcher,
            channel,
            board_size: DEFAULT_BOARD_SIZE,
            policy: Arc::new(BoardFilled),
        }
    }

    /// Dimension of the session's board. A fetch returning any other size
    /// is reported as a notice and leaves the view untouched, so this must
    /// agree with what the fetcher accepts.
    pub fn with_board_size(mut self, board_size: usize) -> Self {
        self.board_size = board_size;
        self
    }

    pub fn with_restart_policy(mut self, policy: impl RestartPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Spawn the controller for one visit to a session. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, entry: Option<EntryContext>) -> SessionHandle {
        let core = SessionCore::new(entry, self.board_size, self.policy.clone());
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = ControllerActor {
            core,
            existence: self.existence.clone(),
            fetcher: self.fetcher.clone(),
            channel: self.channel.clone(),
            receiver: msg_rx,
            snapshot_tx,
            event_tx,
            subscription: None,
            existence_req: None,
            fetch_req: None,
        };
        let task = tokio::spawn(actor.run());

        SessionHandle {
            sender: msg_tx,
            snapshot: snapshot_rx,
            events: event_rx,
            task,
        }
    }
}

/// Owner-side handle to a running controller. Dropping it disposes the
/// controller without waiting for it to finish.
pub struct SessionHandle {
    sender: mpsc::Sender<ControllerMessage>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that wakes on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Next redirect or notice; `None` once the controller has stopped.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        self.events.recv().await
    }

    /// Re-fetch the authoritative state (the restart affordance).
    pub async fn refetch(&self) -> Result<(), TransitionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Refetch { respond_to: tx })
            .await
            .map_err(|_| TransitionError::TornDown)?;
        rx.await.map_err(|_| TransitionError::TornDown)?
    }

    pub async fn dismiss_notice(&self, id: u64) {
        if self
            .sender
            .send(ControllerMessage::DismissNotice(id))
            .await
            .is_err()
        {
            debug!(id, "controller gone, notice not dismissed");
        }
    }

    /// Tear down: leave the session, release the channel, and wait for the
    /// actor to exit.
    pub async fn dispose(self) {
        let Self { sender, task, .. } = self;
        let _ = sender.send(ControllerMessage::Dispose).await;
        drop(sender);
        if let Err(e) = task.await {
            warn!(error = %e, "controller task failed");
        }
    }
}

type Pending<T> = Option<BoxFuture<'static, T>>;

struct ControllerActor<E, F, C> {
    core: SessionCore,
    existence: Arc<E>,
    fetcher: Arc<F>,
    channel: Arc<C>,
    receiver: mpsc::Receiver<ControllerMessage>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
    subscription: Option<Subscription>,
    existence_req: Pending<Result<bool, ApiError>>,
    fetch_req: Pending<(u64, Result<FetchOutcome, ApiError>)>,
}

impl<E, F, C> ControllerActor<E, F, C>
where
    E: ExistenceCheck,
    F: StateFetcher,
    C: PresenceChannel,
{
    async fn run(mut self) {
        self.apply(Input::Start);

        while self.core.state() != ControllerState::TornDown {
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(ControllerMessage::Refetch { respond_to }) => {
                        let result = self.core.refetch();
                        self.publish();
                        let _ = respond_to.send(result.map(|effects| self.perform(effects)));
                    }
                    Some(ControllerMessage::DismissNotice(id)) => self.apply(Input::DismissNotice(id)),
                    Some(ControllerMessage::Dispose) => self.apply(Input::Dispose),
                    None => {
                        debug!("session handle dropped, disposing");
                        self.apply(Input::Dispose);
                    }
                },

                result = pending(&mut self.existence_req) => {
                    self.existence_req = None;
                    self.apply(Input::ExistenceResolved(result));
                }

                (generation, result) = pending(&mut self.fetch_req) => {
                    self.fetch_req = None;
                    self.apply(Input::FetchResolved { generation, result });
                }

                event = next_channel_event(&mut self.subscription) => match event {
                    Some(event) => self.apply(Input::Channel(event)),
                    None => {
                        warn!("presence channel closed");
                        self.subscription = None;
                    }
                },
            }
        }

        // Late completions must not reach the core
        self.existence_req = None;
        self.fetch_req = None;
        debug!("controller stopped");
    }

    /// Observers of an event must already see the state that produced it.
    fn apply(&mut self, input: Input) {
        let effects = self.core.handle(input);
        self.publish();
        self.perform(effects);
    }

    fn publish(&mut self) {
        let next = self.core.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::CheckExistence(game_id) => {
                    let existence = self.existence.clone();
                    self.existence_req = Some(Box::pin(async move { existence.check(&game_id).await }));
                }
                Effect::FetchState {
                    game_id,
                    generation,
                } => {
                    let fetcher = self.fetcher.clone();
                    self.fetch_req = Some(Box::pin(async move {
                        (generation, fetcher.fetch(&game_id).await)
                    }));
                }
                Effect::Subscribe(game_id) => {
                    if self.subscription.is_none() {
                        self.subscription = Some(self.channel.subscribe(&game_id));
                    }
                }
                Effect::Emit(msg) => match &self.subscription {
                    Some(sub) => {
                        if !sub.send(msg) {
                            warn!(game_id = %sub.game_id(), "presence channel gone, intent dropped");
                        }
                    }
                    None => warn!(event = msg.event_name(), "no subscription, intent dropped"),
                },
                Effect::Unsubscribe => {
                    self.subscription = None;
                }
                Effect::Redirect(route) => {
                    let _ = self.event_tx.send(ControllerEvent::Redirect(route));
                }
                Effect::Notice(notice) => {
                    let _ = self.event_tx.send(ControllerEvent::Notice(notice));
                }
            }
        }
    }
}

async fn pending<T>(slot: &mut Pending<T>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_channel_event(subscription: &mut Option<Subscription>) -> Option<ChannelEvent> {
    match subscription {
        Some(sub) => sub.next_event().await,
        None => std::future::pending().await,
    }
}
