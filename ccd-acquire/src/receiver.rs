//! Receiver lifecycle: at most one background decoding task at a time.
//!
//! ```text
//! Idle --start()--> Starting --transport opened--> Running --stop()--> Stopping --joined--> Idle
//!                       |
//!                       +--open/bind failed--> Idle  (TransportUnavailable)
//! ```
//!
//! The task owns the open port or socket. Every loop iteration first checks
//! the stop channel and then blocks for at most one transport timeout, so
//! [`Receiver::stop`] returns within roughly one timeout tick. When the task
//! returns, for whatever reason, the transport is dropped and thereby closed.
//!
//! A task that ends on its own (device unplugged, socket error) is not
//! restarted; the manager stays `Running` until the caller invokes `stop()`.

use std::io::{self, Read};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver as StopReceiver, Sender, TryRecvError};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, trace, warn};

use crate::buffer::SpectrumBuffer;
use crate::config::{SerialConfig, UdpConfig};
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::serial::{self, SerialFrameDecoder};
use crate::stats::{ReceiverStats, StatsRecorder};
use crate::udp::{self, UdpPacketDecoder};

/// Read chunk size for byte-stream transports.
const SERIAL_CHUNK: usize = 1024;

/// Which transport a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Udp,
}

/// Transport selection plus its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Serial(SerialConfig),
    Udp(UdpConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Serial(_) => TransportKind::Serial,
            TransportConfig::Udp(_) => TransportKind::Udp,
        }
    }

    pub fn validate(&self) -> AcquisitionResult<()> {
        match self {
            TransportConfig::Serial(config) => config.validate(),
            TransportConfig::Udp(config) => config.validate(),
        }
    }
}

/// Lifecycle state of a [`Receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ReceiverState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// How a decoding task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// Stop was requested
    Stopped,
    /// The byte stream reached end-of-file
    TransportClosed,
    /// Unrecoverable read error
    TransportError(String),
    /// The task panicked; its transport was still dropped during unwinding
    Panicked,
}

struct Session {
    kind: TransportKind,
    stop_tx: Sender<()>,
    handle: JoinHandle<TaskExit>,
    local_addr: Option<SocketAddr>,
}

/// Starts and stops the background decoding task.
///
/// Decoded frames land in the shared [`SpectrumBuffer`]; counters in the
/// shared [`ReceiverStats`]. Both outlive any single session.
pub struct Receiver {
    buffer: Arc<SpectrumBuffer>,
    stats: Arc<ReceiverStats>,
    state: ReceiverState,
    session: Option<Session>,
}

impl Receiver {
    pub fn new(buffer: Arc<SpectrumBuffer>, stats: Arc<ReceiverStats>) -> Self {
        Self {
            buffer,
            stats,
            state: ReceiverState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ReceiverState::Running
    }

    /// Transport of the active session.
    pub fn transport(&self) -> Option<TransportKind> {
        self.session.as_ref().map(|s| s.kind)
    }

    /// Bound address of an active UDP session.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().and_then(|s| s.local_addr)
    }

    /// Whether the active session's task has already returned on its own.
    pub fn task_finished(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.handle.is_finished())
    }

    /// Open `transport` and spawn its decoding task.
    ///
    /// # Errors
    /// - [`AcquisitionError::AlreadyRunning`] if a session is active; it is left untouched.
    /// - [`AcquisitionError::Config`] if the transport settings are unusable.
    /// - [`AcquisitionError::TransportUnavailable`] if the port or socket cannot be opened.
    ///
    /// On any error the receiver stays `Idle` and the statistics keep their values.
    pub fn start(&mut self, transport: &TransportConfig) -> AcquisitionResult<()> {
        self.ensure_idle()?;
        transport.validate()?;
        self.state = ReceiverState::Starting;

        let result = match transport {
            TransportConfig::Serial(config) => self.spawn_serial(config),
            TransportConfig::Udp(config) => self.spawn_udp(config),
        };
        self.finish_start(result)
    }

    /// Decode the serial protocol from an already-open byte stream.
    ///
    /// `reader` should return [`io::ErrorKind::TimedOut`] or
    /// [`io::ErrorKind::WouldBlock`] when idle so the stop signal is seen;
    /// `Ok(0)` is treated as end of stream.
    pub fn start_stream<R>(&mut self, reader: R, config: &SerialConfig) -> AcquisitionResult<()>
    where
        R: Read + Send + 'static,
    {
        self.ensure_idle()?;
        config.validate()?;
        self.state = ReceiverState::Starting;
        let result = self.spawn_serial_reader(reader, config);
        self.finish_start(result)
    }

    /// Signal the task, wait for it, and return how it ended.
    ///
    /// Returns `None` when no session was active. Statistics keep their last
    /// values until the next successful start.
    pub fn stop(&mut self) -> Option<TaskExit> {
        let session = self.session.take()?;
        self.state = ReceiverState::Stopping;

        // The task may already be gone; a full or closed channel is fine
        let _ = session.stop_tx.try_send(());
        let exit = session.handle.join().unwrap_or_else(|_| {
            warn!("{} receiver task panicked", session.kind);
            TaskExit::Panicked
        });

        info!("{} receiver stopped ({:?})", session.kind, exit);
        self.state = ReceiverState::Idle;
        Some(exit)
    }

    fn ensure_idle(&self) -> AcquisitionResult<()> {
        match &self.session {
            Some(session) => Err(AcquisitionError::AlreadyRunning {
                transport: session.kind,
            }),
            None => Ok(()),
        }
    }

    fn finish_start(&mut self, result: AcquisitionResult<Session>) -> AcquisitionResult<()> {
        match result {
            Ok(session) => {
                info!("{} receiver started", session.kind);
                self.session = Some(session);
                self.state = ReceiverState::Running;
                Ok(())
            }
            Err(e) => {
                warn!("Receiver start failed: {e}");
                self.state = ReceiverState::Idle;
                Err(e)
            }
        }
    }

    fn spawn_serial(&self, config: &SerialConfig) -> AcquisitionResult<Session> {
        let port = serial::open_port(config).map_err(|e| AcquisitionError::TransportUnavailable {
            transport: TransportKind::Serial,
            reason: format!("{}: {e}", config.port),
        })?;
        self.spawn_serial_reader(port, config)
    }

    fn spawn_serial_reader<R>(&self, reader: R, config: &SerialConfig) -> AcquisitionResult<Session>
    where
        R: Read + Send + 'static,
    {
        let decoder = SerialFrameDecoder::from_config(config, self.buffer.pixel_count());
        let buffer = self.buffer.clone();
        let (stop_tx, handle) = self.launch("ccd-serial-rx", move |recorder, stop_rx| {
            serial_loop(reader, decoder, &buffer, recorder, stop_rx)
        })?;

        Ok(Session {
            kind: TransportKind::Serial,
            stop_tx,
            handle,
            local_addr: None,
        })
    }

    fn spawn_udp(&self, config: &UdpConfig) -> AcquisitionResult<Session> {
        let unavailable = |e: io::Error| AcquisitionError::TransportUnavailable {
            transport: TransportKind::Udp,
            reason: format!("{}: {e}", config.bind_target()),
        };
        let socket = udp::bind_socket(config).map_err(unavailable)?;
        let local_addr = socket.local_addr().map_err(unavailable)?;

        let pixel_count = self.buffer.pixel_count();
        let decoder = UdpPacketDecoder::new(config.magic, pixel_count);
        let buffer = self.buffer.clone();
        let idle = config.recv_timeout();
        let (stop_tx, handle) = self.launch("ccd-udp-rx", move |recorder, stop_rx| {
            udp_loop(socket, decoder, &buffer, recorder, stop_rx, idle)
        })?;

        Ok(Session {
            kind: TransportKind::Udp,
            stop_tx,
            handle,
            local_addr: Some(local_addr),
        })
    }

    /// Spawn the decoding thread running `body`.
    ///
    /// The thread is held at a start gate until it exists and the statistics
    /// have been zeroed, so a failed spawn leaves the previous counters alone
    /// and no frame of the new session is lost to the reset.
    fn launch<F>(
        &self,
        name: &str,
        body: F,
    ) -> AcquisitionResult<(Sender<()>, JoinHandle<TaskExit>)>
    where
        F: FnOnce(StatsRecorder, &StopReceiver<()>) -> TaskExit + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded::<()>(1);
        let stats = self.stats.clone();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            if gate_rx.recv().is_err() {
                return TaskExit::Stopped;
            }
            body(StatsRecorder::new(stats), &stop_rx)
        })?;

        self.stats.reset();
        // Capacity 1 and a single send: cannot block
        let _ = gate_tx.send(());
        Ok((stop_tx, handle))
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_requested(stop_rx: &StopReceiver<()>) -> bool {
    match stop_rx.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn is_idle_tick(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn serial_loop<R: Read>(
    mut reader: R,
    mut decoder: SerialFrameDecoder,
    buffer: &SpectrumBuffer,
    mut recorder: StatsRecorder,
    stop_rx: &StopReceiver<()>,
) -> TaskExit {
    let mut chunk = [0u8; SERIAL_CHUNK];
    let exit = loop {
        if stop_requested(stop_rx) {
            break TaskExit::Stopped;
        }
        match reader.read(&mut chunk) {
            Ok(0) => break TaskExit::TransportClosed,
            Ok(n) => {
                decoder.feed(&chunk[..n], buffer, &mut recorder);
            }
            Err(e) if is_idle_tick(&e) => {}
            Err(e) => {
                warn!("Serial read failed: {e}");
                break TaskExit::TransportError(e.to_string());
            }
        }
        recorder.tick(Instant::now());
    };
    if exit != TaskExit::Stopped {
        // Nothing more will arrive on this link
        recorder.mark_idle();
    }
    debug!(
        malformed = decoder.malformed_bytes(),
        overflow = decoder.overflow_records(),
        "serial decoder finished"
    );
    exit
}

fn udp_loop(
    socket: UdpSocket,
    mut decoder: UdpPacketDecoder,
    buffer: &SpectrumBuffer,
    mut recorder: StatsRecorder,
    stop_rx: &StopReceiver<()>,
    idle: Duration,
) -> TaskExit {
    let mut datagram = vec![0u8; udp::datagram_capacity(buffer.pixel_count())];
    loop {
        if stop_requested(stop_rx) {
            return TaskExit::Stopped;
        }
        match socket.recv_from(&mut datagram) {
            Ok((len, from)) => {
                if let Err(reason) = decoder.apply(&datagram[..len], buffer, &mut recorder) {
                    trace!(%from, %reason, "datagram dropped");
                }
            }
            Err(e) if is_idle_tick(&e) => {}
            Err(e) => {
                // e.g. ICMP port-unreachable surfacing as ConnectionReset; keep listening
                debug!("UDP receive error: {e}");
                thread::sleep(idle);
            }
        }
        recorder.tick(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{encode_frame, FrameMarkers};
    use std::io::Cursor;

    fn receiver(pixel_count: usize) -> Receiver {
        Receiver::new(
            Arc::new(SpectrumBuffer::new(pixel_count)),
            Arc::new(ReceiverStats::new()),
        )
    }

    /// Reader that reports a timeout forever, like an idle serial port.
    struct IdlePort;

    impl Read for IdlePort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(5));
            Err(io::ErrorKind::TimedOut.into())
        }
    }

    /// Reader that emits one frame every 10 ms until `until`, then reports EOF.
    struct BurstThenClose {
        frame: Vec<u8>,
        until: Instant,
    }

    impl Read for BurstThenClose {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if Instant::now() >= self.until {
                return Ok(0);
            }
            thread::sleep(Duration::from_millis(10));
            let n = buf.len().min(self.frame.len());
            buf[..n].copy_from_slice(&self.frame[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Serial.to_string(), "serial");
        assert_eq!(TransportKind::Udp.to_string(), "udp");
        assert_eq!(
            TransportConfig::Udp(UdpConfig::default()).kind(),
            TransportKind::Udp
        );
    }

    #[test]
    fn test_stop_without_session_is_noop() {
        let mut rx = receiver(4);
        assert_eq!(rx.stop(), None);
        assert_eq!(rx.state(), ReceiverState::Idle);
    }

    #[test]
    fn test_idle_stream_stops_promptly() {
        let mut rx = receiver(4);
        rx.start_stream(IdlePort, &SerialConfig::default()).unwrap();
        assert!(rx.is_running());
        assert_eq!(rx.transport(), Some(TransportKind::Serial));

        let started = Instant::now();
        assert_eq!(rx.stop(), Some(TaskExit::Stopped));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(rx.state(), ReceiverState::Idle);
    }

    #[test]
    fn test_second_start_rejected() {
        let mut rx = receiver(4);
        rx.start_stream(IdlePort, &SerialConfig::default()).unwrap();

        let err = rx
            .start_stream(IdlePort, &SerialConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::AlreadyRunning {
                transport: TransportKind::Serial
            }
        ));
        assert!(rx.is_running());
        rx.stop();
    }

    #[test]
    fn test_stream_end_finishes_task_and_keeps_stats() {
        let buffer = Arc::new(SpectrumBuffer::new(4));
        let stats = Arc::new(ReceiverStats::new());
        let mut rx = Receiver::new(buffer.clone(), stats.clone());

        let markers = FrameMarkers::default();
        let mut bytes = encode_frame(&markers, &[100, 200, 300, 400]);
        bytes.push(markers.frame_start);
        rx.start_stream(Cursor::new(bytes), &SerialConfig::default())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !rx.task_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(rx.task_finished());
        // Still Running until the caller stops it
        assert!(rx.is_running());

        assert_eq!(rx.stop(), Some(TaskExit::TransportClosed));
        assert_eq!(buffer.read_live().samples(), &[100.0, 200.0, 300.0, 400.0]);
        assert_eq!(stats.frames_received(), 1);
        assert_eq!(stats.last_sequence(), 4);
    }

    #[test]
    fn test_unusable_serial_settings_rejected_before_start() {
        let mut rx = receiver(4);

        let tiny_window = SerialConfig {
            window_capacity: 2,
            ..SerialConfig::default()
        };
        let err = rx
            .start_stream(Cursor::new(vec![0x11]), &tiny_window)
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Config(_)));
        assert_eq!(rx.state(), ReceiverState::Idle);
        assert!(rx.transport().is_none());

        let no_timeout = SerialConfig {
            read_timeout_ms: 0,
            ..SerialConfig::default()
        };
        let err = rx.start(&TransportConfig::Serial(no_timeout)).unwrap_err();
        assert!(matches!(err, AcquisitionError::Config(_)));
        assert_eq!(rx.state(), ReceiverState::Idle);

        let no_udp_timeout = UdpConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            recv_timeout_ms: 0,
            ..UdpConfig::default()
        };
        let err = rx.start(&TransportConfig::Udp(no_udp_timeout)).unwrap_err();
        assert!(matches!(err, AcquisitionError::Config(_)));

        // A valid start still works afterwards
        rx.start_stream(IdlePort, &SerialConfig::default()).unwrap();
        assert!(rx.is_running());
        rx.stop();
    }

    #[test]
    fn test_failed_start_keeps_previous_stats() {
        let buffer = Arc::new(SpectrumBuffer::new(4));
        let stats = Arc::new(ReceiverStats::new());
        let mut rx = Receiver::new(buffer, stats.clone());

        let markers = FrameMarkers::default();
        let mut bytes = encode_frame(&markers, &[1, 2, 3]);
        bytes.push(markers.frame_start);
        rx.start_stream(Cursor::new(bytes), &SerialConfig::default())
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !rx.task_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        rx.stop();
        assert_eq!(stats.frames_received(), 1);

        let bad = SerialConfig {
            window_capacity: 1,
            ..SerialConfig::default()
        };
        assert!(rx.start_stream(IdlePort, &bad).is_err());
        let missing = SerialConfig {
            port: "/dev/does-not-exist-ccd".to_string(),
            ..SerialConfig::default()
        };
        assert!(rx.start(&TransportConfig::Serial(missing)).is_err());
        assert_eq!(stats.frames_received(), 1);
        assert_eq!(stats.last_sequence(), 3);

        // A successful start begins from zero
        rx.start_stream(IdlePort, &SerialConfig::default()).unwrap();
        assert_eq!(stats.frames_received(), 0);
        rx.stop();
    }

    #[test]
    fn test_link_ending_on_its_own_publishes_zero_rate() {
        let stats = Arc::new(ReceiverStats::new());
        let mut rx = Receiver::new(Arc::new(SpectrumBuffer::new(4)), stats.clone());

        let markers = FrameMarkers::default();
        let frame = encode_frame(&markers, &[5, 6, 7, 8]);
        let until = Instant::now() + Duration::from_millis(1200);
        rx.start_stream(BurstThenClose { frame, until }, &SerialConfig::default())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !rx.task_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(rx.task_finished());
        assert!(stats.frames_received() > 1);
        assert_eq!(stats.packets_per_second(), 0.0);
        assert_eq!(rx.stop(), Some(TaskExit::TransportClosed));
    }

    #[test]
    fn test_missing_serial_port_is_unavailable() {
        let mut rx = receiver(4);
        let config = SerialConfig {
            port: "/dev/does-not-exist-ccd".to_string(),
            ..SerialConfig::default()
        };
        let err = rx.start(&TransportConfig::Serial(config)).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::TransportUnavailable {
                transport: TransportKind::Serial,
                ..
            }
        ));
        assert_eq!(rx.state(), ReceiverState::Idle);
        assert!(rx.transport().is_none());
    }
}
