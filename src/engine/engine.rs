use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use slog::{debug, info, o, warn, Logger};
use uuid::Uuid;

use crate::config::{load_config, EngineConfig, MAX_QUEUE_SIZE, MIN_QUEUE_SIZE};
use crate::engine::logger::default_log;
use crate::engine::subscriptions::{Broadcast, Channel, SubscriptionsMsg};
use crate::engine::{
    EngineError, RegisterError, Scheduler, StopError, Subscriptions,
};
use crate::kernel::backoff::Backoff;
use crate::kernel::dispatcher::LockedDispatcher;
use crate::kernel::registrar::Registrar;
use crate::kernel::worker::Worker;
use crate::processor::{EventProcessor, ProcessorCell, ProcessorRef};
use crate::validate::validate_name;
use crate::{AnyMessage, Message, Payload};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Cadence at which the stop protocol re-checks a draining mailbox.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Bound on waiting for an in-flight worker to return a stopping
/// processor to its dispatcher queue.
const INFLIGHT_WAIT: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct EngineBuilder {
    name: Option<String>,
    cfg: Option<EngineConfig>,
    log: Option<Logger>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder::default()
    }

    pub fn create(self) -> Result<Engine, EngineError> {
        let name = self.name.unwrap_or_else(|| "event-engine".to_string());
        let cfg = self.cfg.unwrap_or_else(load_config);
        let log = self.log.unwrap_or_else(default_log);

        Engine::create(name.as_ref(), log, cfg)
    }

    pub fn name(self, name: &str) -> Self {
        EngineBuilder {
            name: Some(name.to_string()),
            ..self
        }
    }

    pub fn cfg(self, cfg: EngineConfig) -> Self {
        EngineBuilder {
            cfg: Some(cfg),
            ..self
        }
    }

    pub fn log(self, log: Logger) -> Self {
        EngineBuilder {
            log: Some(log),
            ..self
        }
    }
}

/// The event-processing runtime.
///
/// An `Engine` owns the dispatchers, the registrar, the scheduler pool
/// and the subscriptions processor. Construction validates configuration
/// and creates everything; `start` launches the worker threads. Create
/// one instance per application and `shutdown` it when done.
#[derive(Clone)]
pub struct Engine {
    core: Arc<EngineCore>,
}

pub(crate) struct EngineCore {
    name: String,
    id: Uuid,
    config: EngineConfig,
    log: Logger,
    started_at: SystemTime,
    started_at_moment: Instant,
    dispatchers: HashMap<String, Arc<LockedDispatcher>>,
    registrar: Registrar,
    scheduler: Scheduler,
    keep_going: Arc<AtomicBool>,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: RwLock<Option<ProcessorRef>>,
}

impl EngineCore {
    pub(crate) fn subscriptions_ref(&self) -> Option<ProcessorRef> {
        self.subscriptions.read().clone()
    }
}

impl Engine {
    /// Create a new `Engine` with configuration loaded from the
    /// environment (see [`load_config`]).
    pub fn new() -> Result<Engine, EngineError> {
        let cfg = load_config();
        Engine::create("event-engine", default_log(), cfg)
    }

    pub fn with_name(name: &str) -> Result<Engine, EngineError> {
        let cfg = load_config();
        Engine::create(name, default_log(), cfg)
    }

    /// Create a new `Engine` from an explicit configuration, bypassing
    /// config file loading.
    pub fn from_config(cfg: EngineConfig) -> Result<Engine, EngineError> {
        Engine::create("event-engine", default_log(), cfg)
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create(name: &str, log: Logger, cfg: EngineConfig) -> Result<Engine, EngineError> {
        validate_name(name).map_err(|_| EngineError::InvalidName(name.into()))?;
        cfg.validate()?;

        debug!(log, "starting engine"; "engine" => name);

        let registrar = Registrar::new();
        let scheduler = Scheduler::start(
            cfg.scheduler_pool_size,
            registrar.clone(),
            log.new(o!("subsystem" => "scheduler")),
        );

        let dispatchers = cfg
            .valid_dispatcher_names()
            .into_iter()
            .map(|name| {
                let dispatcher = Arc::new(LockedDispatcher::new(&name));
                (name, dispatcher)
            })
            .collect();

        let core = Arc::new(EngineCore {
            name: name.to_string(),
            id: Uuid::new_v4(),
            config: cfg,
            log,
            started_at: SystemTime::now(),
            started_at_moment: Instant::now(),
            dispatchers,
            registrar,
            scheduler,
            keep_going: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            subscriptions: RwLock::new(None),
        });

        let engine = Engine { core };
        let subscriptions = engine
            .register_cell(Box::new(Subscriptions::new()), None)
            .map_err(|e| EngineError::ModuleFailed(e.to_string()))?;
        *engine.core.subscriptions.write() = Some(subscriptions);

        debug!(engine.core.log, "engine created";
            "engine" => name, "id" => %engine.core.id);

        Ok(engine)
    }

    /// Register a processor: validate its identity, insert it into the
    /// registrar and enqueue it on its dispatcher. The returned handle is
    /// the posting surface.
    pub fn register(&self, processor: impl EventProcessor) -> Result<ProcessorRef, RegisterError> {
        self.register_cell(Box::new(processor), None)
    }

    /// Like [`register`](Engine::register), recording `parent` as the new
    /// processor's back-reference.
    pub fn register_with_parent(
        &self,
        processor: impl EventProcessor,
        parent: &ProcessorRef,
    ) -> Result<ProcessorRef, RegisterError> {
        self.register_cell(Box::new(processor), Some(parent.clone()))
    }

    fn register_cell(
        &self,
        processor: Box<dyn EventProcessor>,
        parent: Option<ProcessorRef>,
    ) -> Result<ProcessorRef, RegisterError> {
        let id = processor.id().to_string();
        validate_name(&id).map_err(|_| RegisterError::InvalidId(id.clone()))?;

        let dispatcher_name = processor.dispatcher().to_string();
        let dispatcher = self
            .core
            .dispatchers
            .get(&dispatcher_name)
            .ok_or_else(|| RegisterError::UnknownDispatcher(id.clone(), dispatcher_name.clone()))?;

        let queue_size = processor
            .queue_size()
            .unwrap_or(self.core.config.default_queue_size);
        if queue_size < MIN_QUEUE_SIZE || queue_size > MAX_QUEUE_SIZE {
            return Err(RegisterError::InvalidQueueSize(id, queue_size));
        }

        let cell = ProcessorCell::new(
            id.clone(),
            dispatcher_name,
            queue_size,
            processor,
            parent,
            Arc::downgrade(&self.core),
        );
        let processor_ref = ProcessorRef {
            cell: Arc::new(cell),
        };

        if !self.core.registrar.register(&processor_ref) {
            return Err(RegisterError::DuplicateId(id));
        }

        let mut queue = dispatcher.lock();
        dispatcher.push_tail(&mut queue, processor_ref.clone());
        drop(queue);

        debug!(self.core.log, "processor registered";
            "processor" => id.as_str(), "dispatcher" => processor_ref.dispatcher());

        Ok(processor_ref)
    }

    /// Launch the worker threads, one per assignment entry (plus the
    /// implicit subscriptions worker when no configured entry covers that
    /// dispatcher). Idempotent.
    pub fn start(&self) {
        if self.core.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let assignment = self.core.config.effective_assignment();
        let backoff = Backoff::from(&self.core.config.backoff);

        let mut workers = self.core.workers.lock();
        for (index, names) in assignment.iter().enumerate() {
            let dispatchers = names
                .iter()
                .map(|name| self.core.dispatchers.get(name).cloned().unwrap())
                .collect();
            let worker = Worker {
                index,
                assignment: dispatchers,
                keep_going: self.core.keep_going.clone(),
                registrar: self.core.registrar.clone(),
                backoff,
                log: self.core.log.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || worker.run())
                .unwrap();
            workers.push(handle);
        }

        info!(self.core.log, "engine started";
            "engine" => self.core.name.as_str(), "workers" => assignment.len());
    }

    /// Gracefully stop a processor with the default 30s deadline.
    pub fn stop(&self, id: &str) -> Result<(), StopError> {
        self.stop_within(id, DEFAULT_STOP_TIMEOUT)
    }

    /// Gracefully stop a processor: let workers drain its mailbox until
    /// `timeout`, forbid re-enqueueing, wait out any in-flight handler,
    /// remove it from its dispatcher queue and unregister it. Messages
    /// still queued when the deadline hits are lost (logged, not an
    /// error).
    ///
    /// Stopping does NOT remove the processor from subscription lists;
    /// unsubscribe before stopping.
    pub fn stop_within(&self, id: &str, timeout: Duration) -> Result<(), StopError> {
        let processor = self
            .core
            .registrar
            .get(id)
            .ok_or_else(|| StopError::UnknownProcessor(id.to_string()))?;
        let deadline = Instant::now() + timeout;

        // 1. drain: let workers empty the mailbox
        while !processor.mailbox().is_empty() && Instant::now() < deadline {
            thread::sleep(DRAIN_POLL);
        }
        let remaining = processor.current_queue_size();
        if remaining > 0 {
            warn!(self.core.log, "stop deadline reached, queued messages will be lost";
                "processor" => id, "messages" => remaining);
        }

        // 2. mark: from here on no worker re-enqueues it
        processor.set_stopping();

        if let Some(dispatcher) = self.core.dispatchers.get(processor.dispatcher()) {
            // 3. wait for an in-flight worker to hand it back; a worker
            // that instead observed the stopping flag and dropped it
            // wakes us too, and the bound covers a worker still inside a
            // long handler
            let mut queue = dispatcher.lock();
            let wait_deadline = Instant::now() + INFLIGHT_WAIT;
            while !LockedDispatcher::contains(&queue, id) {
                let now = Instant::now();
                if now >= wait_deadline {
                    break;
                }
                dispatcher.wait_for_work(&mut queue, wait_deadline - now);
            }

            // 4. remove from the dispatcher queue
            LockedDispatcher::remove_if(&mut queue, id);
        }

        // 5. unregister: scheduler firings can no longer reach it
        self.core.registrar.unregister(id);

        debug!(self.core.log, "processor stopped"; "processor" => id);
        Ok(())
    }

    /// Stop all worker and timer threads and join them. Does not drain
    /// mailboxes: `stop` each processor first for a clean shutdown.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.core.keep_going.swap(false, Ordering::SeqCst) {
            return;
        }

        for dispatcher in self.core.dispatchers.values() {
            dispatcher.notify_all();
        }

        let workers: Vec<JoinHandle<()>> = self.core.workers.lock().drain(..).collect();
        for handle in &workers {
            handle.thread().unpark();
        }
        for handle in workers {
            let _ = handle.join();
        }

        self.core.scheduler.shutdown();

        info!(self.core.log, "engine stopped";
            "engine" => self.core.name.as_str(), "registered" => self.core.registrar.len());
    }

    /// Handle to the subscriptions processor.
    pub fn subscriptions(&self) -> ProcessorRef {
        self.core.subscriptions.read().clone().unwrap()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.core.scheduler
    }

    /// Arm a one-shot delayed delivery (see [`Scheduler::schedule`]).
    pub fn schedule(
        &self,
        id: &str,
        msg: impl Into<Message>,
        delay: Duration,
    ) -> crate::engine::Schedule {
        self.core.scheduler.schedule(id, msg, delay)
    }

    /// Broadcast a payload with no sender; failed deliveries are only
    /// logged.
    pub fn broadcast<I, T>(&self, channels: I, msg: T) -> bool
    where
        I: IntoIterator,
        I::Item: Into<Channel>,
        T: Payload,
    {
        self.subscriptions()
            .post(Message::Subscriptions(SubscriptionsMsg::Broadcast(
                Broadcast {
                    sender: None,
                    channels: channels.into_iter().map(Into::into).collect(),
                    msg: AnyMessage::new(msg),
                },
            )))
    }

    /// Look a registered processor up by id.
    pub fn processor(&self, id: &str) -> Option<ProcessorRef> {
        self.core.registrar.get(id)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The UUID assigned to this engine instance.
    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    #[inline]
    pub fn log(&self) -> Logger {
        self.core.log.clone()
    }

    pub fn start_date(&self) -> SystemTime {
        self.core.started_at
    }

    /// Seconds since the engine was created.
    pub fn uptime(&self) -> u64 {
        Instant::now()
            .duration_since(self.core.started_at_moment)
            .as_secs()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Engine[Name: {}, Start Time: {:?}, Uptime: {} seconds]",
            self.name(),
            self.start_date(),
            self.uptime()
        )
    }
}
