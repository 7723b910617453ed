//! ECU Session Service
//!
//! Ties the transport, engine, bootstrap, monitor, and safety policy
//! together behind the operations collaborators call: connect,
//! disconnect, tuning writes, and limit updates. All observable output
//! flows through one broadcast stream of [`EcuEvent`]s.

use std::sync::{Arc, Mutex as StdMutex};

use ecu_monitor::{Monitor, MonitorConfig, MonitorEvent, MonitorHandle};
use ecu_protocol::{
    encode_write_request, initialize, CommandEngine, ConnectionState, EcuError, LinkFault,
    SerialLink, VehicleIdentity,
};
use ecu_safety::{SafetyError, SafetyLimits, SafetyLimitsUpdate, SafetyMonitor};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::EcuConfig;
use crate::events::EcuEvent;

/// Subscribers that fall this far behind start missing events
const EVENT_CHANNEL_DEPTH: usize = 64;

const MONITOR_CHANNEL_DEPTH: usize = 32;

/// Errors surfaced by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] EcuError),
    #[error(transparent)]
    Safety(#[from] SafetyError),
}

/// One ECU session: a single connection, monitor, and safety policy
pub struct EcuService {
    inner: Arc<Inner>,
}

struct Inner {
    config: EcuConfig,
    safety: Arc<SafetyMonitor>,
    events: broadcast::Sender<EcuEvent>,
    state: StdMutex<ConnectionState>,
    session: Mutex<Session>,
}

/// Per-connection state, rebuilt on every connect
#[derive(Default)]
struct Session {
    engine: Option<Arc<CommandEngine>>,
    monitor: Option<MonitorHandle>,
    pump: Option<JoinHandle<()>>,
    fault_watch: Option<JoinHandle<()>>,
    identity: Option<VehicleIdentity>,
}

impl EcuService {
    pub fn new(config: EcuConfig) -> Self {
        let safety = Arc::new(SafetyMonitor::new(
            SafetyLimits::default(),
            config.safety_mode,
        ));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);

        Self {
            inner: Arc::new(Inner {
                config,
                safety,
                events,
                state: StdMutex::new(ConnectionState::Disconnected),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    /// Subscribe to the session event stream.
    ///
    /// Events arrive in emission order; a subscriber that lags behind
    /// the channel depth misses events rather than blocking the session.
    pub fn subscribe(&self) -> broadcast::Receiver<EcuEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    /// Identity read by the last successful bootstrap, while connected
    pub async fn vehicle_identity(&self) -> Option<VehicleIdentity> {
        self.inner.session.lock().await.identity.clone()
    }

    /// Open the configured serial port and bring the session up
    pub async fn connect(&self) -> Result<(), SessionError> {
        let port = self.inner.config.port.clone();
        self.connect_to(&port).await
    }

    /// Open the serial device at `port` and bring the session up.
    ///
    /// On success the session is connected, initialized, and monitoring;
    /// `connected` and `initialized` events have been published. A
    /// connect on an already-connected session is a logged no-op.
    pub async fn connect_to(&self, port: &str) -> Result<(), SessionError> {
        let mut session = self.inner.session.lock().await;
        if self.is_connected() {
            debug!("connect ignored; session already connected");
            return Ok(());
        }

        self.inner.set_state(ConnectionState::Connecting);
        let link = match SerialLink::open(port).await {
            Ok(link) => link,
            Err(err) => {
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(err.into());
            }
        };

        self.bring_up(&mut session, link).await
    }

    /// Bring the session up over an already-open link.
    ///
    /// Used for TCP/WiFi adapters and tests; `connect` delegates here
    /// after opening the serial port.
    pub async fn attach(&self, link: SerialLink) -> Result<(), SessionError> {
        let mut session = self.inner.session.lock().await;
        if self.is_connected() {
            debug!("attach ignored; session already connected");
            link.close();
            return Ok(());
        }

        self.inner.set_state(ConnectionState::Connecting);
        self.bring_up(&mut session, link).await
    }

    async fn bring_up(
        &self,
        session: &mut Session,
        link: SerialLink,
    ) -> Result<(), SessionError> {
        let engine = Arc::new(CommandEngine::new(
            link,
            self.inner.config.command_timeout(),
        ));
        self.inner.set_state(ConnectionState::Connected);
        self.inner.emit(EcuEvent::Connected);
        info!("ECU connection established");

        let identity = match initialize(&engine).await {
            Ok(identity) => identity,
            Err(err) => {
                error!(%err, "ECU initialization failed");
                engine.shutdown();
                self.inner.set_state(ConnectionState::Disconnected);
                self.inner.emit(EcuEvent::Disconnected);
                return Err(err.into());
            }
        };
        self.inner.emit(EcuEvent::Initialized(identity.clone()));

        let (monitor_tx, monitor_rx) = mpsc::channel(MONITOR_CHANNEL_DEPTH);
        let monitor = Monitor::new(
            Arc::clone(&engine),
            Arc::clone(&self.inner.safety),
            MonitorConfig {
                tick_interval: self.inner.config.tick_interval(),
            },
        )
        .start(monitor_tx);

        let pump = tokio::spawn(pump_events(Arc::clone(&self.inner), monitor_rx));
        let fault_watch = tokio::spawn(watch_link(
            Arc::clone(&self.inner),
            engine.fault_events(),
        ));

        session.engine = Some(engine);
        session.monitor = Some(monitor);
        session.pump = Some(pump);
        session.fault_watch = Some(fault_watch);
        session.identity = Some(identity);
        Ok(())
    }

    /// Stop monitoring, close the link, and publish `disconnected`.
    /// Idempotent: a disconnect on a disconnected session does nothing.
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;
        self.inner.teardown(&mut session).await;
    }

    /// Apply one tuning write through the engine.
    ///
    /// The safety gate runs first: with safety mode enabled the write is
    /// rejected before any command reaches the transport.
    pub async fn write_tuning_parameter(
        &self,
        address: u16,
        value: u16,
    ) -> Result<String, SessionError> {
        self.inner.safety.authorize_write()?;

        let engine = self
            .inner
            .session
            .lock()
            .await
            .engine
            .clone()
            .ok_or(EcuError::NotConnected)?;

        let command = encode_write_request(address, value);
        let response = engine.send_command(&command).await?;

        info!(address, value, "tuning parameter written");
        self.inner.emit(EcuEvent::ParameterWritten {
            address,
            value,
            response: response.clone(),
        });
        Ok(response)
    }

    /// Merge a partial limits update, returning the limits now in force
    pub fn update_safety_limits(&self, update: &SafetyLimitsUpdate) -> SafetyLimits {
        self.inner.safety.update_limits(update)
    }

    pub fn safety_limits(&self) -> SafetyLimits {
        self.inner.safety.limits()
    }

    pub fn safety_mode_enabled(&self) -> bool {
        self.inner.safety.safety_mode_enabled()
    }

    pub fn set_safety_mode(&self, enabled: bool) {
        self.inner.safety.set_safety_mode(enabled);
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn emit(&self, event: EcuEvent) {
        // No subscribers is fine; events are fire-and-forget.
        let _ = self.events.send(event);
    }

    /// Tear down the active connection; no-op when already down
    async fn teardown(&self, session: &mut Session) {
        if session.engine.is_none() {
            debug!("disconnect ignored; session already disconnected");
            return;
        }

        // Fail the link first so an in-flight sweep or write errors out
        // promptly instead of running out its full deadline.
        if let Some(engine) = session.engine.take() {
            engine.shutdown();
        }
        if let Some(monitor) = session.monitor.take() {
            monitor.join().await;
        }
        if let Some(pump) = session.pump.take() {
            let _ = pump.await;
        }
        if let Some(fault_watch) = session.fault_watch.take() {
            fault_watch.abort();
        }
        session.identity = None;

        self.set_state(ConnectionState::Disconnected);
        self.emit(EcuEvent::Disconnected);
        info!("ECU disconnected");
    }
}

/// Fan monitor output out to subscribers, preserving tick order
async fn pump_events(inner: Arc<Inner>, mut events: mpsc::Receiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            MonitorEvent::Reading(reading) => inner.emit(EcuEvent::Data(reading)),
            MonitorEvent::Alerts(alerts) => inner.emit(EcuEvent::SafetyAlert(alerts)),
        }
    }
}

/// Turn a link fault into session teardown and the documented events
async fn watch_link(inner: Arc<Inner>, mut fault_rx: watch::Receiver<Option<LinkFault>>) {
    loop {
        if fault_rx.changed().await.is_err() {
            // Engine dropped during a normal disconnect.
            return;
        }
        let fault = fault_rx.borrow_and_update().clone();
        let Some(fault) = fault else { continue };

        let mut session = inner.session.lock().await;
        // Detach ourselves so teardown doesn't abort this task mid-run.
        session.fault_watch.take();

        match &fault {
            LinkFault::Io(cause) => {
                error!(cause = %cause, "ECU connection error");
                inner.emit(EcuEvent::Error {
                    message: cause.clone(),
                });
            }
            LinkFault::Closed => info!("ECU connection closed by transport"),
        }
        inner.teardown(&mut session).await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::sync::broadcast::error::TryRecvError;

    /// Scripted adapter peer: bootstrap replies, a fixed live-data
    /// table, and write acknowledgements.
    async fn run_mock_ecu(stream: DuplexStream, seen: mpsc::UnboundedSender<String>) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader.read_until(b'\r', &mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            let command = String::from_utf8_lossy(&buf);
            let command = command.trim_end_matches('\r').trim().to_string();
            let _ = seen.send(command.clone());

            let reply = if command == "ATZ" {
                "ELM327 v1.5".to_string()
            } else if command == "ATE0" || command == "ATSP0" {
                "OK".to_string()
            } else if command == "0902" {
                "49 02 01 31 44 34 47 50 30 30 52 35 35 42 31 32 33 34 35 36".to_string()
            } else if let Some(pid) = command
                .strip_prefix("01")
                .and_then(|p| u8::from_str_radix(p, 16).ok())
            {
                match pid {
                    0x0C => "41 0C 1B 58".to_string(),
                    0x05 => "41 05 5A".to_string(),
                    0x0B => "41 0B 64".to_string(),
                    _ => format!("41 {pid:02X} 00"),
                }
            } else if command.starts_with("22") {
                "OK".to_string()
            } else {
                "?".to_string()
            };

            write_half
                .write_all(format!("{reply}\r\n").as_bytes())
                .await
                .unwrap();
        }
    }

    fn test_config(safety_mode: bool) -> EcuConfig {
        EcuConfig {
            port: "unused-in-tests".to_string(),
            command_timeout_ms: 5000,
            tick_interval_ms: 10,
            safety_mode,
        }
    }

    async fn connected_service(
        safety_mode: bool,
    ) -> (
        EcuService,
        broadcast::Receiver<EcuEvent>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (near, far) = tokio::io::duplex(1024);
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_mock_ecu(far, seen_tx));

        let service = EcuService::new(test_config(safety_mode));
        let events = service.subscribe();
        service.attach(SerialLink::from_stream(near)).await.unwrap();
        (service, events, seen_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn session_lifecycle_publishes_documented_events() {
        let (service, mut events, _seen) = connected_service(false).await;
        assert!(service.is_connected());

        assert!(matches!(events.recv().await.unwrap(), EcuEvent::Connected));
        match events.recv().await.unwrap() {
            EcuEvent::Initialized(identity) => assert_eq!(identity.vin, "4GP00R55B123456"),
            other => panic!("expected initialized, got {other:?}"),
        }
        assert_eq!(
            service.vehicle_identity().await.map(|i| i.vin),
            Some("4GP00R55B123456".to_string())
        );

        // Monitoring is armed: a composite reading arrives.
        loop {
            if let EcuEvent::Data(reading) = events.recv().await.unwrap() {
                assert_eq!(reading.rpm, Some(1750.0));
                assert_eq!(reading.boost, Some(14.5));
                break;
            }
        }

        service.disconnect().await;
        assert!(!service.is_connected());
        assert!(service.vehicle_identity().await.is_none());

        loop {
            match events.recv().await.unwrap() {
                EcuEvent::Disconnected => break,
                EcuEvent::Data(_) | EcuEvent::SafetyAlert(_) => continue,
                other => panic!("unexpected event during disconnect: {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent() {
        let (service, mut events, _seen) = connected_service(false).await;

        service.disconnect().await;
        loop {
            if matches!(events.recv().await.unwrap(), EcuEvent::Disconnected) {
                break;
            }
        }

        service.disconnect().await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn breached_limits_surface_as_safety_alert_events() {
        let (service, mut events, _seen) = connected_service(false).await;
        service.update_safety_limits(&SafetyLimitsUpdate {
            max_rpm: Some(1000.0),
            ..Default::default()
        });

        loop {
            if let EcuEvent::SafetyAlert(alerts) = events.recv().await.unwrap() {
                assert_eq!(alerts[0].value, 1750.0);
                assert_eq!(alerts[0].limit, 1000.0);
                break;
            }
        }

        service.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn write_round_trips_and_publishes_event() {
        let (service, mut events, mut seen) = connected_service(false).await;

        // The write competes with the monitoring sweep for the engine;
        // back off and retry on Busy as callers are expected to.
        let response = loop {
            match service.write_tuning_parameter(0x1234, 0x0056).await {
                Ok(response) => break response,
                Err(SessionError::Protocol(EcuError::Busy)) => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(err) => panic!("write failed: {err}"),
            }
        };
        assert_eq!(response, "OK");

        loop {
            match events.recv().await.unwrap() {
                EcuEvent::ParameterWritten {
                    address,
                    value,
                    response,
                } => {
                    assert_eq!(address, 0x1234);
                    assert_eq!(value, 0x0056);
                    assert_eq!(response, "OK");
                    break;
                }
                _ => continue,
            }
        }

        // The write command itself reached the adapter.
        let mut wrote = false;
        while let Ok(command) = seen.try_recv() {
            if command == "2212340056" {
                wrote = true;
            }
        }
        assert!(wrote);

        service.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn safety_mode_blocks_writes_before_any_command() {
        let (service, _events, mut seen) = connected_service(true).await;

        let result = service.write_tuning_parameter(0x1234, 0x0056).await;
        assert!(matches!(
            result,
            Err(SessionError::Safety(SafetyError::WriteBlocked))
        ));

        // Nothing that looks like a write ever hit the transport.
        while let Ok(command) = seen.try_recv() {
            assert!(!command.starts_with("22"), "write leaked: {command}");
        }

        // The gate sits in front of the connection check too.
        service.disconnect().await;
        assert!(matches!(
            service.write_tuning_parameter(0x1234, 0x0056).await,
            Err(SessionError::Safety(SafetyError::WriteBlocked))
        ));

        // Only disabling safety mode unblocks writes; disconnected now
        // surfaces as the protocol error instead.
        service.set_safety_mode(false);
        assert!(matches!(
            service.write_tuning_parameter(0x1234, 0x0056).await,
            Err(SessionError::Protocol(EcuError::NotConnected))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn link_fault_tears_the_session_down() {
        let (near, far) = tokio::io::duplex(1024);
        let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
        let mock = tokio::spawn(run_mock_ecu(far, seen_tx));

        let service = EcuService::new(test_config(false));
        let mut events = service.subscribe();
        service.attach(SerialLink::from_stream(near)).await.unwrap();

        // Kill the adapter side mid-session.
        mock.abort();
        let _ = mock.await;

        loop {
            match events.recv().await {
                Ok(EcuEvent::Disconnected) => break,
                Ok(_) => continue,
                Err(err) => panic!("event stream ended early: {err}"),
            }
        }
        // Give the fault watcher's teardown a chance to finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!service.is_connected());
    }
}
