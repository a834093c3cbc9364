use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use tracing::{debug, warn};

use super::command::{Command, EntityKey};
use crate::error::{Error, Result};
use crate::notice::NoticeBoard;
use crate::service::DataService;

type Job<O> = Pin<Box<dyn Future<Output = Result<O>>>>;

/// Applied commands waiting on one failed or pending dispatch, oldest first
type Steps<C> = Vec<(C, <C as Command>::Snapshot)>;

/// What settlement decided for a failed mutation
enum Undo<C: Command> {
    /// Roll these back, newest first
    Restore(Steps<C>),
    /// A newer mutation on the entity overwrites this one and now owns its undo steps
    Superseded,
    Nothing,
}

struct Ledger<C: Command> {
    seq: u64,
    pending: HashMap<EntityKey, BTreeMap<u64, Steps<C>>>,
}

impl<C: Command> Ledger<C> {
    fn enqueue(&mut self, key: &EntityKey, command: C, snapshot: C::Snapshot) -> u64 {
        self.seq += 1;
        self.pending.entry(key.clone()).or_default().insert(self.seq, vec![(command, snapshot)]);
        self.seq
    }

    fn settle(&mut self, key: &EntityKey, seq: u64, succeeded: bool) -> Undo<C> {
        let Some(slot) = self.pending.get_mut(key) else {
            return Undo::Nothing;
        };
        let own = slot.remove(&seq);

        let undo = match (succeeded, own) {
            (true, _) | (false, None) => Undo::Nothing,
            (false, Some(steps)) => {
                let heir = match steps.last() {
                    Some((failed, _)) => slot
                        .range_mut(seq + 1..)
                        .map(|(_, newer)| newer)
                        .find(|newer| newer.last().is_some_and(|(next, _)| next.supersedes(failed))),
                    None => None,
                };
                match heir {
                    Some(newer) => {
                        // the newer mutation rolls back to the last state the server accepted
                        let own_steps = std::mem::replace(newer, steps);
                        newer.extend(own_steps);
                        Undo::Superseded
                    }
                    None => Undo::Restore(steps),
                }
            }
        };

        if slot.is_empty() {
            self.pending.remove(key);
        }
        undo
    }

    fn in_flight(&self, key: &EntityKey) -> usize {
        self.pending.get(key).map(BTreeMap::len).unwrap_or(0)
    }
}

/// Dispatch queue of one entity. Whichever caller awaits drives the queue
/// from its front, so dispatches follow apply order however they are awaited.
struct Lane<O> {
    queue: VecDeque<(u64, Job<O>)>,
    running: Option<(u64, Job<O>)>,
    /// Settled results their callers haven't collected yet
    done: HashMap<u64, Result<O>>,
    /// Callers that went away; their results are dropped on settlement
    abandoned: HashSet<u64>,
    waiters: Vec<Waker>,
}

impl<O> Lane<O> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            running: None,
            done: HashMap::new(),
            abandoned: HashSet::new(),
            waiters: Vec::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_none() && self.done.is_empty()
    }

    fn wake_all(&mut self) {
        self.waiters.drain(..).for_each(Waker::wake);
    }

    fn drive(&mut self, seq: u64, cx: &mut Context<'_>) -> Poll<Result<O>> {
        loop {
            if let Some(result) = self.done.remove(&seq) {
                return Poll::Ready(result);
            }
            if self.running.is_none() {
                self.running = self.queue.pop_front();
            }
            let Some((running, job)) = self.running.as_mut() else {
                return Poll::Ready(Err(Error::Store(format!("mutation {} was never queued", seq))));
            };
            match job.as_mut().poll(cx) {
                Poll::Ready(result) => {
                    let running = *running;
                    self.running = None;
                    if !self.abandoned.remove(&running) {
                        self.done.insert(running, result);
                    }
                    self.wake_all();
                }
                Poll::Pending => {
                    if !self.waiters.iter().any(|w| w.will_wake(cx.waker())) {
                        self.waiters.push(cx.waker().clone());
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

type Lanes<O> = Rc<RefCell<HashMap<EntityKey, Lane<O>>>>;

/// A caller's claim on the settlement of one queued mutation
struct Turn<O> {
    lanes: Lanes<O>,
    key: EntityKey,
    seq: u64,
    finished: bool,
}

impl<O> Future for Turn<O> {
    type Output = Result<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<O>> {
        let this = self.get_mut();
        let mut lanes = this.lanes.borrow_mut();
        let Some(lane) = lanes.get_mut(&this.key) else {
            return Poll::Ready(Err(Error::Store(format!("no dispatch queue for {}", this.key))));
        };
        let polled = lane.drive(this.seq, cx);
        if polled.is_ready() {
            this.finished = true;
            if lane.is_idle() {
                lanes.remove(&this.key);
            }
        }
        polled
    }
}

impl<O> Drop for Turn<O> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Ok(mut lanes) = self.lanes.try_borrow_mut() else {
            return;
        };
        if let Some(lane) = lanes.get_mut(&self.key) {
            if lane.done.remove(&self.seq).is_none() {
                lane.abandoned.insert(self.seq);
            }
            // another caller takes over driving the queue
            lane.wake_all();
            if lane.is_idle() {
                lanes.remove(&self.key);
            }
        }
    }
}

/// Runs commands through apply → dispatch → settle.
///
/// Commands on different entities run concurrently; commands on the same
/// entity are dispatched one at a time in the order they were applied.
/// Dispatched commands are never cancelled: if the state they target has
/// been dropped by the time the service answers, the answer is discarded.
pub struct MutationExecutor<C: Command> {
    service: Rc<dyn DataService>,
    notices: NoticeBoard,
    ledger: Rc<RefCell<Ledger<C>>>,
    lanes: Lanes<C::Output>,
}

impl<C: Command> Clone for MutationExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            notices: self.notices.clone(),
            ledger: self.ledger.clone(),
            lanes: self.lanes.clone(),
        }
    }
}

impl<C> MutationExecutor<C>
where
    C: Command + Clone + 'static,
    C::State: 'static,
    C::Snapshot: 'static,
    C::Output: 'static,
{
    pub fn new(service: Rc<dyn DataService>, notices: NoticeBoard) -> Self {
        Self {
            service,
            notices,
            ledger: Rc::new(RefCell::new(Ledger { seq: 0, pending: HashMap::new() })),
            lanes: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    /// Number of applied but unsettled mutations on an entity
    pub fn in_flight(&self, key: &EntityKey) -> usize {
        self.ledger.borrow().in_flight(key)
    }

    /// Applies `command` immediately and queues its dispatch behind earlier
    /// mutations of the same entity; the returned future drives the queue up
    /// to and including this command. Validation failures from `apply`
    /// surface when the future is awaited.
    pub fn execute(&self, state: &Rc<RefCell<C::State>>, command: C) -> impl Future<Output = Result<C::Output>> {
        let turn = command.apply(&mut state.borrow_mut()).map(|snapshot| {
            let key = command.entity();
            let seq = self.ledger.borrow_mut().enqueue(&key, command.clone(), snapshot);
            let job: Job<C::Output> = Box::pin(dispatch_and_settle(
                self.service.clone(),
                self.notices.clone(),
                self.ledger.clone(),
                Rc::downgrade(state),
                command,
                key.clone(),
                seq,
            ));
            self.lanes
                .borrow_mut()
                .entry(key.clone())
                .or_insert_with(Lane::new)
                .queue
                .push_back((seq, job));
            Turn { lanes: self.lanes.clone(), key, seq, finished: false }
        });

        async move { turn?.await }
    }
}

async fn dispatch_and_settle<C: Command>(
    service: Rc<dyn DataService>,
    notices: NoticeBoard,
    ledger: Rc<RefCell<Ledger<C>>>,
    target: Weak<RefCell<C::State>>,
    command: C,
    key: EntityKey,
    seq: u64,
) -> Result<C::Output> {
    debug!(entity = %key, seq, op = command.label(), "dispatching mutation");
    let result = command.dispatch(service.as_ref()).await;

    let undo = ledger.borrow_mut().settle(&key, seq, result.is_ok());
    let Some(state) = target.upgrade() else {
        debug!(entity = %key, seq, "target state dropped, discarding settlement");
        return result.map_err(|cause| Error::Conflict { operation: command.label(), cause: Box::new(cause) });
    };

    match result {
        Ok(output) => {
            command.commit(&mut state.borrow_mut(), &output);
            debug!(entity = %key, seq, "mutation committed");
            Ok(output)
        }
        Err(cause) => {
            match undo {
                Undo::Restore(steps) => {
                    let mut state = state.borrow_mut();
                    for (applied, snapshot) in steps.into_iter().rev() {
                        applied.rollback(&mut state, snapshot);
                    }
                }
                Undo::Superseded => {
                    debug!(entity = %key, seq, "newer mutation pending, keeping its state")
                }
                Undo::Nothing => {}
            }
            warn!(entity = %key, seq, error = %cause, "mutation rolled back");
            notices.error(format!("Couldn't {}: {}", command.label(), cause));
            Err(Error::Conflict { operation: command.label(), cause: Box::new(cause) })
        }
    }
}
