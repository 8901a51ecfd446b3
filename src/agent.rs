//! Agent supervisor.
//! Owns every long-lived component by value or `Arc`, wires the pipeline at
//! init, sequences startup (connect, first twin, then the worker threads)
//! and unwinds everything in reverse on stop. Tasks and the adapter hold
//! non-owning handles into supervisor-owned state; nothing points back.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use thiserror::Error;

use crate::collectors::{
    self, ConfigurationErrorCollector, DiagnosticEventCollector, EventCollector,
    ListeningPortsCollector,
};
use crate::config::{LocalConfigError, LocalConfiguration, TwinConfiguration};
use crate::consts::{SCHEDULER_INTERVAL_MS, TWIN_UPDATE_SCHEDULER_INTERVAL_MS};
use crate::diagnostics::DiagnosticsSink;
use crate::hub::{ConnectError, HubAdapter, HubSink, HubTransport, TcpHubClient, TransportError};
use crate::memory::MemoryMonitor;
use crate::os::{self, OsError};
use crate::queueing::SyncQueue;
use crate::scheduling::{SchedulerError, SchedulerThread};
use crate::tasks::{EventMonitorTask, EventPublisherTask, TwinUpdateItem, UpdateTwinTask};
use crate::telemetry::TelemetryProvider;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("local configuration failure: {0}")]
    LocalConfig(#[from] LocalConfigError),
    #[error("hub transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("hub connection failure: {0}")]
    Connect(#[from] ConnectError),
    #[error("connect finished but no twin configuration arrived")]
    MissingTwinConfiguration,
    #[error(transparent)]
    Os(#[from] OsError),
    #[error("scheduler failure: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("agent was already started")]
    AlreadyStarted,
}

/// All five pipeline queues, supervisor-owned.
pub struct AgentQueues {
    pub diagnostic: Arc<SyncQueue<Vec<u8>>>,
    pub operational: Arc<SyncQueue<Vec<u8>>>,
    pub high_priority: Arc<SyncQueue<Vec<u8>>>,
    pub low_priority: Arc<SyncQueue<Vec<u8>>>,
    pub twin_updates: Arc<SyncQueue<TwinUpdateItem>>,
}

pub struct SecurityAgent {
    local: Arc<LocalConfiguration>,
    twin: Arc<TwinConfiguration>,
    monitor: Arc<MemoryMonitor>,
    queues: AgentQueues,
    diagnostics: DiagnosticsSink,
    telemetry: TelemetryProvider,
    adapter: Arc<HubAdapter>,
    // Staged at init, consumed by start.
    collectors: Option<Vec<Box<dyn EventCollector>>>,
    publisher_thread: Option<SchedulerThread>,
    monitor_thread: Option<SchedulerThread>,
    update_twin_thread: Option<SchedulerThread>,
}

impl SecurityAgent {
    /// Builds the agent with the real wire transport and the built-in
    /// collector set.
    pub fn init(config_path: &Path) -> Result<Self, AgentError> {
        let local = Arc::new(LocalConfiguration::load(config_path)?);
        let transport = Box::new(TcpHubClient::from_connection_string(
            &local.connection_string(),
        )?);
        Self::init_with(local, transport, vec![Box::new(ListeningPortsCollector::new())])
    }

    /// Builds the agent around the given transport and collector set. The
    /// operational collectors (diagnostics, configuration errors) are always
    /// added on top of `collectors`.
    pub fn init_with(
        local: Arc<LocalConfiguration>,
        transport: Box<dyn HubTransport>,
        mut collectors: Vec<Box<dyn EventCollector>>,
    ) -> Result<Self, AgentError> {
        log::set_max_level(local.system_logger_minimum_severity().to_level_filter());

        let event_defaults = collectors::default_priorities(&collectors);
        let twin = Arc::new(TwinConfiguration::new(
            local.remote_configuration_object_name(),
            event_defaults,
        ));
        let monitor = Arc::new(MemoryMonitor::new(twin.clone()));

        os::switch_real_and_effective_users()?;

        let queues = AgentQueues {
            // The diagnostic queue must not log its own drops.
            diagnostic: Arc::new(SyncQueue::new(monitor.clone(), false)),
            operational: Arc::new(SyncQueue::new(monitor.clone(), true)),
            high_priority: Arc::new(SyncQueue::new(monitor.clone(), true)),
            low_priority: Arc::new(SyncQueue::new(monitor.clone(), true)),
            twin_updates: Arc::new(SyncQueue::new(monitor.clone(), true)),
        };
        let diagnostics = DiagnosticsSink::new(
            queues.diagnostic.clone(),
            local.diagnostic_event_minimum_severity(),
        );

        collectors.push(Box::new(DiagnosticEventCollector::new(
            queues.diagnostic.clone(),
        )));
        collectors.push(Box::new(ConfigurationErrorCollector::new(twin.clone())));

        let adapter = HubAdapter::init(transport, queues.twin_updates.clone(), local.clone())?;
        let telemetry = TelemetryProvider::new(
            queues.low_priority.counter(),
            queues.high_priority.counter(),
            adapter.message_counter(),
        );

        Ok(Self {
            local,
            twin,
            monitor,
            queues,
            diagnostics,
            telemetry,
            adapter,
            collectors: Some(collectors),
            publisher_thread: None,
            monitor_thread: None,
            update_twin_thread: None,
        })
    }

    /// Connects, applies the initial twin and starts the worker threads.
    pub fn start(&mut self) -> Result<(), AgentError> {
        let collectors = self.collectors.take().ok_or(AgentError::AlreadyStarted)?;

        let hub: Arc<dyn HubSink> = self.adapter.clone();
        let mut update_twin_task = UpdateTwinTask::new(
            self.queues.twin_updates.clone(),
            hub.clone(),
            self.twin.clone(),
            self.diagnostics.clone(),
        );

        self.adapter.connect()?;
        // The hub pushes the full twin on connect; starting without one
        // would run the pipeline on defaults the operator never approved.
        if self.queues.twin_updates.is_empty() {
            return Err(AgentError::MissingTwinConfiguration);
        }
        update_twin_task.execute();

        let mut publisher_task = EventPublisherTask::new(
            self.queues.operational.clone(),
            self.queues.high_priority.clone(),
            self.queues.low_priority.clone(),
            hub,
            self.twin.clone(),
            self.monitor.clone(),
            self.local.agent_id().to_string(),
        );
        let mut publisher_thread =
            SchedulerThread::new(Duration::from_millis(SCHEDULER_INTERVAL_MS));
        publisher_thread.start(move || publisher_task.execute())?;
        self.publisher_thread = Some(publisher_thread);

        let mut monitor_task = EventMonitorTask::new(
            collectors,
            self.queues.operational.clone(),
            self.queues.high_priority.clone(),
            self.queues.low_priority.clone(),
            self.twin.clone(),
        );
        let mut monitor_thread = SchedulerThread::new(Duration::from_millis(
            self.local.triggered_events_interval_ms(),
        ));
        monitor_thread.start(move || monitor_task.execute())?;
        self.monitor_thread = Some(monitor_thread);

        let mut update_twin_thread =
            SchedulerThread::new(Duration::from_millis(TWIN_UPDATE_SCHEDULER_INTERVAL_MS));
        update_twin_thread.start(move || update_twin_task.execute())?;
        self.update_twin_thread = Some(update_twin_thread);

        info!("security agent started");
        Ok(())
    }

    /// Stops the worker threads and quiesces the transport, in reverse init
    /// order. Queues drain and release their accounted memory when the agent
    /// is dropped.
    pub fn stop(&mut self) {
        for thread in [
            &self.publisher_thread,
            &self.monitor_thread,
            &self.update_twin_thread,
        ]
        .into_iter()
        .flatten()
        {
            thread.stop();
        }
        for thread in [
            &mut self.publisher_thread,
            &mut self.monitor_thread,
            &mut self.update_twin_thread,
        ]
        .into_iter()
        .flatten()
        {
            thread.join();
        }
        self.publisher_thread = None;
        self.monitor_thread = None;
        self.update_twin_thread = None;

        // Callbacks are quiesced here, so nothing reaches the queues after
        // this point.
        self.adapter.shutdown();
        info!("security agent stopped");
    }

    pub fn telemetry(&self) -> &TelemetryProvider {
        &self.telemetry
    }

    pub fn diagnostics(&self) -> &DiagnosticsSink {
        &self.diagnostics
    }

    pub fn queues(&self) -> &AgentQueues {
        &self.queues
    }

    pub fn twin(&self) -> &Arc<TwinConfiguration> {
        &self.twin
    }

    pub fn memory_monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }
}

impl Drop for SecurityAgent {
    fn drop(&mut self) {
        self.stop();
    }
}
