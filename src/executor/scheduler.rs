//! The cooperative task scheduler driving one execution.
//!
//! Every unit of work (a field resolution, a list element completion, a
//! batch dispatch, a deferred fragment) is a task in a slab-style arena.
//! Tasks are threaded through four intrusive lanes:
//!
//! * the main lane, a LIFO stack of ready work,
//! * the serial lane, a FIFO of mutation root fields gated to one at a time,
//! * the batch lane, drained only once main and serial work is exhausted so
//!   batches accumulate the whole tick,
//! * the deferred lane, promoted only when the execution is otherwise idle.
//!
//! The whole scheduler is single-threaded: the [`Drain`] future polls tasks
//! one at a time, and external wakes (promise resolutions, timers) re-enter
//! through the shared ready list.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

use futures::{
    future::BoxFuture,
    task::{waker, ArcWake},
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{
    error::{ErrorKind, ErrorSink, FieldError, ResponsePath},
    loader::{BatchDispatch, BatchScheduler},
};

pub(crate) type TaskId = usize;

const NIL: TaskId = usize::MAX;

/// What a task does, deciding its lane and its cancellation reporting.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TaskKind {
    ResolveField,
    CompleteListElement,
    BatchDispatch,
    DeferredFragment,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TaskState {
    Queued,
    Running,
    Suspended,
    Completed,
}

/// A task waiting to be inserted into the arena.
pub(crate) struct NewTask {
    pub(crate) future: BoxFuture<'static, ()>,
    pub(crate) kind: TaskKind,
    pub(crate) serial: bool,
    pub(crate) path: Arc<ResponsePath>,
}

struct Slot {
    future: Option<BoxFuture<'static, ()>>,
    state: TaskState,
    kind: TaskKind,
    serial: bool,
    path: Arc<ResponsePath>,
    /// Stale-wake guard: bumped every time the slot is freed.
    generation: u64,
    next: TaskId,
    prev: TaskId,
}

/// An intrusive doubly-linked list over arena slots.
#[derive(Clone, Copy)]
struct Lane {
    head: TaskId,
    tail: TaskId,
}

impl Lane {
    fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
        }
    }

    fn push_front(&mut self, slots: &mut [Slot], id: TaskId) {
        slots[id].prev = NIL;
        slots[id].next = self.head;
        if self.head == NIL {
            self.tail = id;
        } else {
            slots[self.head].prev = id;
        }
        self.head = id;
    }

    fn push_back(&mut self, slots: &mut [Slot], id: TaskId) {
        slots[id].next = NIL;
        slots[id].prev = self.tail;
        if self.tail == NIL {
            self.head = id;
        } else {
            slots[self.tail].next = id;
        }
        self.tail = id;
    }

    fn pop_front(&mut self, slots: &mut [Slot]) -> Option<TaskId> {
        if self.head == NIL {
            return None;
        }
        let id = self.head;
        self.head = slots[id].next;
        if self.head == NIL {
            self.tail = NIL;
        } else {
            slots[self.head].prev = NIL;
        }
        slots[id].next = NIL;
        slots[id].prev = NIL;
        Some(id)
    }
}

struct WorkQueue {
    slots: Vec<Slot>,
    free: Vec<TaskId>,
    main: Lane,
    serial: Lane,
    batch: Lane,
    deferred: Lane,
    /// The serial task currently holding the gate, if any.
    serial_active: Option<TaskId>,
    /// Tasks inserted but not yet completed.
    live: usize,
    /// Tasks suspended on a wake that has not arrived yet.
    suspended: usize,
}

impl WorkQueue {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            main: Lane::new(),
            serial: Lane::new(),
            batch: Lane::new(),
            deferred: Lane::new(),
            serial_active: None,
            live: 0,
            suspended: 0,
        }
    }

    /// Inserts a task into its lane and returns the number of live tasks.
    fn insert(&mut self, task: NewTask) -> usize {
        let id = match self.free.pop() {
            Some(id) => {
                let slot = &mut self.slots[id];
                slot.future = Some(task.future);
                slot.state = TaskState::Queued;
                slot.kind = task.kind;
                slot.serial = task.serial;
                slot.path = task.path;
                id
            }
            None => {
                self.slots.push(Slot {
                    future: Some(task.future),
                    state: TaskState::Queued,
                    kind: task.kind,
                    serial: task.serial,
                    path: task.path,
                    generation: 0,
                    next: NIL,
                    prev: NIL,
                });
                self.slots.len() - 1
            }
        };
        self.live += 1;
        if self.slots[id].serial {
            self.serial.push_back(&mut self.slots, id);
        } else {
            match self.slots[id].kind {
                TaskKind::BatchDispatch => self.batch.push_back(&mut self.slots, id),
                TaskKind::DeferredFragment => self.deferred.push_back(&mut self.slots, id),
                _ => self.main.push_front(&mut self.slots, id),
            }
        }
        self.live
    }

    /// Picks the next runnable task: ready work first, then the serial gate,
    /// then pending batch dispatches, and deferred fragments only once
    /// everything else has settled.
    fn try_take(&mut self) -> Option<TaskId> {
        if let Some(id) = self.main.pop_front(&mut self.slots) {
            return Some(id);
        }
        if self.serial_active.is_none() {
            if let Some(id) = self.serial.pop_front(&mut self.slots) {
                self.serial_active = Some(id);
                return Some(id);
            }
        }
        if let Some(id) = self.batch.pop_front(&mut self.slots) {
            return Some(id);
        }
        if self.suspended == 0 {
            if let Some(id) = self.deferred.pop_front(&mut self.slots) {
                trace!(task = id, "promoting deferred fragment");
                return Some(id);
            }
        }
        None
    }

    /// Re-queues a task woken from suspension. Stale or duplicate wakes are
    /// ignored.
    fn requeue(&mut self, id: TaskId, generation: u64) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        if slot.generation != generation || slot.state != TaskState::Suspended {
            return;
        }
        slot.state = TaskState::Queued;
        self.suspended -= 1;
        self.main.push_front(&mut self.slots, id);
    }

    fn complete(&mut self, id: TaskId) {
        let slot = &mut self.slots[id];
        slot.state = TaskState::Completed;
        slot.future = None;
        slot.generation += 1;
        self.free.push(id);
        self.live -= 1;
        if self.serial_active == Some(id) {
            self.serial_active = None;
        }
    }
}

struct Shared {
    /// Wakes delivered by task wakers: `(task, generation)`.
    ready: Mutex<Vec<(TaskId, u64)>>,
    /// Tasks spawned from outside the drain loop's current step.
    injected: Mutex<Vec<NewTask>>,
    /// The drain future's own waker, for re-entering after external wakes.
    drain_waker: Mutex<Option<Waker>>,
}

impl Shared {
    fn wake_drain(&self) {
        if let Some(waker) = self.drain_waker.lock().unwrap().take() {
            waker.wake();
        }
    }

    fn has_pending(&self) -> bool {
        !self.ready.lock().unwrap().is_empty() || !self.injected.lock().unwrap().is_empty()
    }
}

struct TaskWaker {
    shared: Arc<Shared>,
    id: TaskId,
    generation: u64,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self
            .shared
            .ready
            .lock()
            .unwrap()
            .push((arc_self.id, arc_self.generation));
        arc_self.shared.wake_drain();
    }
}

/// A handle for spawning tasks onto a running (or not yet started)
/// scheduler.
#[derive(Clone)]
pub(crate) struct Spawner {
    shared: Arc<Shared>,
}

impl Spawner {
    pub(crate) fn spawn(&self, task: NewTask) {
        self.shared.injected.lock().unwrap().push(task);
        self.shared.wake_drain();
    }
}

/// The default batch policy inside an execution: dispatches land on the
/// scheduler's batch lane, which drains only once no resolver work is ready,
/// so every key requested during the tick joins the batch.
pub(crate) struct QueueBatchScheduler {
    spawner: Spawner,
}

impl QueueBatchScheduler {
    pub(crate) fn new(spawner: Spawner) -> Self {
        Self { spawner }
    }
}

impl BatchScheduler for QueueBatchScheduler {
    fn schedule(&self, dispatch: BatchDispatch) {
        self.spawner.spawn(NewTask {
            future: dispatch.into_future(),
            kind: TaskKind::BatchDispatch,
            serial: false,
            path: ResponsePath::root(),
        });
    }
}

pub(crate) struct SchedulerCore {
    queue: WorkQueue,
    shared: Arc<Shared>,
    cancelled: BoxFuture<'static, ()>,
    errors: ErrorSink,
}

impl SchedulerCore {
    pub(crate) fn new(cancellation: &CancellationToken, errors: ErrorSink) -> Self {
        Self {
            queue: WorkQueue::new(),
            shared: Arc::new(Shared {
                ready: Mutex::new(Vec::new()),
                injected: Mutex::new(Vec::new()),
                drain_waker: Mutex::new(None),
            }),
            cancelled: Box::pin(cancellation.clone().cancelled_owned()),
            errors,
        }
    }

    pub(crate) fn spawner(&self) -> Spawner {
        Spawner {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the scheduler until every task has completed (or the execution
    /// is cancelled).
    pub(crate) fn drain(self) -> Drain {
        Drain { core: self }
    }

    fn ingest(&mut self) {
        let injected = std::mem::take(&mut *self.shared.injected.lock().unwrap());
        for task in injected {
            let depth = self.queue.insert(task);
            trace!(depth, "task enqueued");
        }
        let ready = std::mem::take(&mut *self.shared.ready.lock().unwrap());
        for (id, generation) in ready {
            self.queue.requeue(id, generation);
        }
    }

    fn run_task(&mut self, id: TaskId) {
        let mut future = self.queue.slots[id]
            .future
            .take()
            .expect("queued task owns its future");
        self.queue.slots[id].state = TaskState::Running;

        let task_waker = waker(Arc::new(TaskWaker {
            shared: Arc::clone(&self.shared),
            id,
            generation: self.queue.slots[id].generation,
        }));
        let mut cx = Context::from_waker(&task_waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => self.queue.complete(id),
            Poll::Pending => {
                let slot = &mut self.queue.slots[id];
                slot.future = Some(future);
                slot.state = TaskState::Suspended;
                self.queue.suspended += 1;
            }
        }
    }

    /// Drops every incomplete task and records a cancellation error at each
    /// abandoned field.
    fn abort_incomplete(&mut self) {
        for id in 0..self.queue.slots.len() {
            if self.queue.slots[id].state == TaskState::Completed {
                continue;
            }
            if self.queue.slots[id].kind != TaskKind::BatchDispatch {
                let path = Arc::clone(&self.queue.slots[id].path);
                self.errors.push(
                    &path,
                    FieldError::new("execution was cancelled", ErrorKind::Cancelled),
                );
            }
            if self.queue.slots[id].state == TaskState::Suspended {
                self.queue.suspended -= 1;
            }
            self.queue.complete(id);
        }
        // Late spawns are dropped without running.
        self.shared.injected.lock().unwrap().clear();
        self.shared.ready.lock().unwrap().clear();
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        *self.shared.drain_waker.lock().unwrap() = Some(cx.waker().clone());
        self.ingest();

        if self.cancelled.as_mut().poll(cx).is_ready() {
            trace!("execution cancelled, aborting incomplete tasks");
            self.abort_incomplete();
            return Poll::Ready(());
        }

        loop {
            self.ingest();
            let Some(id) = self.queue.try_take() else {
                if self.queue.live == 0 {
                    return Poll::Ready(());
                }
                // A wake may have landed while the last task ran.
                if self.shared.has_pending() {
                    continue;
                }
                return Poll::Pending;
            };
            self.run_task(id);
        }
    }
}

/// The future driving one execution's scheduler to completion.
pub(crate) struct Drain {
    core: SchedulerCore,
}

impl Future for Drain {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().core.poll_drain(cx)
    }
}
