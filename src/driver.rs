//! Async driver: runs [`SyncCore`] on a single task and executes its effects.
//!
//! SYSTEM CONTEXT
//! ==============
//! One `select!` loop owns the core. It multiplexes:
//!
//! - UI commands from the [`DriverHandle`];
//! - push feed events;
//! - completions of spawned network calls;
//! - a tick interval driving the settle window, mutation deadlines and the
//!   reconciliation debounce.
//!
//! Network calls run as `spawn_local` tasks on the loop's `LocalSet` and
//! report back over an unbounded channel, so the core is never shared and
//! never awaited across. Time comes from `tokio::time`, so tests with a
//! paused clock drive every timer deterministically.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::LocalSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{BoardApi, FetchQuery};
use crate::config::SyncConfig;
use crate::consts::CHANNEL_CAPACITY;
use crate::coordinator::{MutationRequest, Notice};
use crate::engine::{Effect, SyncCore};
use crate::error::SyncError;
use crate::feed::FeedEvent;
use crate::item::{Slot, Status, WorkItem, WorkItemId};
use crate::pending::Ticket;
use crate::scheduler::RefetchRequest;
use crate::session::{AllColumns, CancelReason, DragPhase, DragPreview, RenderSurface};
use crate::store::BoardSnapshot;

/// Input from the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BeginDrag(WorkItemId),
    Hover(Option<Slot>),
    /// Release over `target`. `mounted` lists the columns still present in
    /// the render surface; `None` means all of them.
    Drop { target: Option<Slot>, mounted: Option<HashSet<Status>> },
    Cancel,
    Refresh,
    Shutdown,
}

enum Completion {
    Mutation { ticket: Ticket, id: WorkItemId, result: Result<WorkItem, SyncError> },
    Refetch { seq: u64, result: Result<Vec<WorkItem>, SyncError> },
}

/// The rendering layer's side of the driver.
pub struct DriverHandle {
    pub commands: mpsc::Sender<Command>,
    pub view: watch::Receiver<Arc<BoardSnapshot>>,
    pub phase: watch::Receiver<DragPhase>,
    pub preview: watch::Receiver<Option<DragPreview>>,
    pub busy: watch::Receiver<BTreeSet<WorkItemId>>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

impl DriverHandle {
    /// Queue a command. Returns `false` once the driver has stopped.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }
}

pub struct Driver<A: BoardApi + 'static> {
    core: SyncCore,
    api: Arc<A>,
    query: FetchQuery,
    tick: Duration,
    commands: mpsc::Receiver<Command>,
    feed: mpsc::Receiver<FeedEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    view_tx: watch::Sender<Arc<BoardSnapshot>>,
    busy_tx: watch::Sender<BTreeSet<WorkItemId>>,
    notices_tx: mpsc::UnboundedSender<Notice>,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl<A: BoardApi + 'static> Driver<A> {
    #[must_use]
    pub fn new(config: &SyncConfig, api: Arc<A>, query: FetchQuery, feed: mpsc::Receiver<FeedEvent>) -> (Self, DriverHandle) {
        let core = SyncCore::new(config);
        let (commands_tx, commands) = mpsc::channel(CHANNEL_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(core.view());
        let (busy_tx, busy) = watch::channel(BTreeSet::new());
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let handle = DriverHandle {
            commands: commands_tx,
            view,
            phase: core.subscribe_phase(),
            preview: core.subscribe_preview(),
            busy,
            notices,
        };
        let driver = Self {
            core,
            api,
            query,
            tick: config.tick,
            commands,
            feed,
            completions_tx,
            completions_rx,
            view_tx,
            busy_tx,
            notices_tx,
        };
        (driver, handle)
    }

    /// Load the board, then run until `Shutdown` or every handle is dropped.
    pub async fn run(self) {
        LocalSet::new().run_until(self.run_local()).await;
    }

    async fn run_local(mut self) {
        self.initial_load().await;

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut feed_open = true;

        loop {
            let effects = tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.on_command(command),
                },
                event = self.feed.recv(), if feed_open => match event {
                    Some(event) => self.on_feed_event(event),
                    None => {
                        warn!("push feed channel closed");
                        feed_open = false;
                        Vec::new()
                    }
                },
                Some(completion) = self.completions_rx.recv() => self.on_completion(completion),
                _ = ticker.tick() => {
                    let at = now();
                    if self.core.next_wakeup().is_some_and(|due| due <= at) { self.core.tick(at) } else { Vec::new() }
                },
            };
            self.execute(effects);
        }
        info!(in_flight = self.core.in_flight(), "driver stopped");
    }

    async fn initial_load(&mut self) {
        match self.api.fetch_items(&self.query).await {
            Ok(items) => match self.core.load(items) {
                Ok(effects) => self.execute(effects),
                Err(err) => warn!(%err, "initial load refused"),
            },
            Err(err) => {
                warn!(%err, board_id = %self.query.board_id, "initial fetch failed; scheduling retry");
                self.core.request_refresh(now());
            }
        }
    }

    // =============================================================
    // Inputs
    // =============================================================

    fn on_command(&mut self, command: Command) -> Vec<Effect> {
        let at = now();
        let result = match command {
            Command::BeginDrag(id) => self.core.begin_drag(&id, at).map(|()| Vec::new()),
            Command::Hover(destination) => {
                self.core.hover(destination, at);
                Ok(Vec::new())
            }
            Command::Drop { target, mounted } => {
                let surface: &dyn RenderSurface = match &mounted {
                    Some(columns) => columns,
                    None => &AllColumns,
                };
                self.core.drop_on(target, surface, at)
            }
            Command::Cancel => self.core.cancel_drag(CancelReason::Aborted, at),
            Command::Refresh => {
                self.core.request_refresh(at);
                Ok(Vec::new())
            }
            Command::Shutdown => Ok(Vec::new()),
        };
        result.unwrap_or_else(|err| {
            debug!(%err, "command refused");
            Vec::new()
        })
    }

    fn on_feed_event(&mut self, event: FeedEvent) -> Vec<Effect> {
        match event {
            FeedEvent::Remote(event) => {
                let effects = self.core.on_remote_event(event, now());
                let buffered = self.core.buffered_events();
                if buffered > 0 {
                    debug!(buffered, "remote event held until the gesture settles");
                }
                effects
            }
            FeedEvent::Connected { resumed } => {
                if resumed {
                    self.core.on_reconnected(now());
                }
                Vec::new()
            }
            FeedEvent::Disconnected => {
                info!("push feed disconnected");
                Vec::new()
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) -> Vec<Effect> {
        match completion {
            Completion::Mutation { ticket, id, result } => self.core.on_mutation_result(ticket, id, result, now()),
            Completion::Refetch { seq, result } => self.core.on_refetch_result(seq, result, now()),
        }
    }

    // =============================================================
    // Effects
    // =============================================================

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::IssueMutation(request) => self.spawn_mutation(request),
                Effect::Refetch(request) => self.spawn_refetch(request),
                Effect::Notify(notice) => {
                    warn!(id = %notice.id, code = notice.code, "{}", notice.message);
                    if self.notices_tx.send(notice).is_err() {
                        debug!("notice receiver dropped");
                    }
                }
                Effect::BusyChanged { id, busy } => {
                    self.busy_tx.send_modify(|set| {
                        if busy {
                            set.insert(id);
                        } else {
                            set.remove(&id);
                        }
                    });
                }
                Effect::RenderNeeded(revision) => {
                    debug!(revision, "view published");
                    self.view_tx.send_replace(self.core.view());
                }
            }
        }
    }

    fn spawn_mutation(&self, request: MutationRequest) {
        let api = Arc::clone(&self.api);
        let tx = self.completions_tx.clone();
        tokio::task::spawn_local(async move {
            let MutationRequest { ticket, id, status } = request;
            debug!(%id, %status, seq = ticket.seq, "sending mutation");
            let result = api.update_status(&id, status, ticket.request_id).await.map_err(SyncError::from);
            if tx.send(Completion::Mutation { ticket, id, result }).is_err() {
                debug!("driver gone; mutation reply dropped");
            }
        });
    }

    fn spawn_refetch(&self, request: RefetchRequest) {
        let api = Arc::clone(&self.api);
        let query = self.query.clone();
        let tx = self.completions_tx.clone();
        tokio::task::spawn_local(async move {
            debug!(seq = request.seq, reasons = ?request.reasons, "refetching board");
            let result = api.fetch_items(&query).await.map_err(SyncError::from);
            if tx.send(Completion::Refetch { seq: request.seq, result }).is_err() {
                debug!("driver gone; refetch result dropped");
            }
        });
    }
}
