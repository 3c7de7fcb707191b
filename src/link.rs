//! 에뮬레이션 링크
//!
//! UDP 소켓 하나 위에 양방향 링크를 흉내낸다.
//!
//! - 송신: `enqueue` -> [송신 큐] -> 전송 지연 스테이지 -> [전파 큐] -> 전파 지연 스테이지 -> UDP
//! - 수신: UDP -> 수신 스테이지 -> [수신 큐] -> `dequeue`
//!
//! 큐가 가득 차면 새 패킷을 버린다 (drop-tail). 각 스테이지는 분리된 스레드로 돌며
//! 프로세스 종료를 막지 않는다. 전송 지연과 전파 지연을 다른 스레드로 나눴기 때문에
//! 전파 중인 패킷이 여러 개일 수 있다.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::config::LinkConfig;
use crate::event_log::{EventLog, LinkEvent};
use crate::stats::{LinkStats, LinkStatsSnapshot};
use crate::{Error, Result, MAX_SEGMENT_SIZE, POLL_INTERVAL};

/// `idle()` 이 상태를 다시 확인하는 간격
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// 수신 스테이지는 payload 를 해석하지 않으므로 로그에 이 번호를 쓴다
const UNKNOWN_ID: u16 = 0;

const STAGE_BUSY: u8 = 0;
const STAGE_IDLE: u8 = 1;
const STAGE_STOPPED: u8 = 2;

/// 스테이지 상태 플래그. 한번 멈추면 되살아나지 않는다.
#[derive(Debug)]
struct StageFlag(AtomicU8);

impl StageFlag {
    fn new() -> Self {
        Self(AtomicU8::new(STAGE_BUSY))
    }

    fn set(&self, value: u8) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                (cur != STAGE_STOPPED).then_some(value)
            });
    }

    fn busy(&self) {
        self.set(STAGE_BUSY);
    }

    fn idle(&self) {
        self.set(STAGE_IDLE);
    }

    fn stop(&self) {
        self.0.store(STAGE_STOPPED, Ordering::SeqCst);
    }

    fn is_idle(&self) -> bool {
        self.0.load(Ordering::SeqCst) == STAGE_IDLE
    }

    fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst) == STAGE_STOPPED
    }
}

/// 스테이지들이 공유하는 상태
#[derive(Debug)]
struct PipelineState {
    outgoing: StageFlag,
    incoming: StageFlag,

    /// 송신 큐에 들어간 뒤 아직 와이어로 나가지 않은 패킷 수
    pending: AtomicUsize,
}

impl PipelineState {
    fn new() -> Self {
        Self {
            outgoing: StageFlag::new(),
            incoming: StageFlag::new(),
            pending: AtomicUsize::new(0),
        }
    }

    fn release_pending(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 전송 지연을 마치고 전파 지연을 기다리는 패킷
struct InFlight {
    id: u16,
    payload: Bytes,
    sent_at: Instant,
}

/// 에뮬레이션 링크의 한쪽 끝
pub struct Link {
    config: LinkConfig,
    socket: Option<Arc<UdpSocket>>,
    outbound_tx: Sender<(u16, Bytes)>,
    outbound_rx: Receiver<(u16, Bytes)>,
    inbound_rx: Receiver<Bytes>,
    state: Arc<PipelineState>,
    stats: Arc<LinkStats>,
    log: Arc<EventLog>,
}

impl Link {
    /// 링크 생성. 소켓을 열 수 없으면 에러를 기록하고 동작하지 않는 링크를 돌려준다.
    pub fn new(config: LinkConfig) -> Self {
        match Self::open(config.clone()) {
            Ok(link) => link,
            Err(e) => {
                error!(
                    "링크 초기화 실패 ({} -> {}): {}",
                    config.local, config.remote, e
                );
                Self::offline(config)
            }
        }
    }

    /// `config.local` 에 바인딩하고 `config.remote` 로 연결
    pub fn open(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(config.local)?;
        Self::from_socket(socket, config)
    }

    /// 이미 바인딩된 소켓으로 링크 생성. `config.local` 은 소켓 주소로 덮어쓴다.
    pub fn from_socket(socket: UdpSocket, mut config: LinkConfig) -> Result<Self> {
        config.validate()?;
        config.local = socket.local_addr()?;
        socket.connect(config.remote)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let log = EventLog::open(config.log_path.as_deref())?;
        let link = Self::assemble(config, Arc::new(socket), log)?;

        info!(
            "Link up: {} -> {} ({} Mbps, {} ms, queue {})",
            link.config.local,
            link.config.remote,
            link.config.rate_mbps,
            link.config.delay_ms,
            link.config.queue_size
        );
        Ok(link)
    }

    /// 와이어 없는 링크. 스테이지를 띄우지 않으므로 송신 큐는 채워지기만 한다.
    ///
    /// 검증 실패한 설정으로도 만들 수 있도록 큐 크기는 최소 1 로 맞춘다.
    pub fn offline(mut config: LinkConfig) -> Self {
        if config.queue_size == 0 {
            warn!("queue_size 0 -> 1 로 조정");
            config.queue_size = 1;
        }

        let log = EventLog::open(config.log_path.as_deref()).unwrap_or_else(|e| {
            warn!("이벤트 로그를 열 수 없음: {}", e);
            EventLog::disabled()
        });

        let (outbound_tx, outbound_rx) = bounded(config.queue_size);
        // 송신측을 바로 버리므로 dequeue 는 즉시 None
        let (_, inbound_rx) = bounded(config.queue_size);
        let state = Arc::new(PipelineState::new());
        state.outgoing.stop();
        state.incoming.stop();

        Self {
            config,
            socket: None,
            outbound_tx,
            outbound_rx,
            inbound_rx,
            state,
            stats: Arc::new(LinkStats::new()),
            log: Arc::new(log),
        }
    }

    /// 루프백에서 서로 연결된 링크 한 쌍. 포트는 OS 가 고른다.
    pub fn loopback_pair(template: &LinkConfig) -> Result<(Link, Link)> {
        let a = UdpSocket::bind("127.0.0.1:0")?;
        let b = UdpSocket::bind("127.0.0.1:0")?;
        let addr_a = a.local_addr()?;
        let addr_b = b.local_addr()?;

        let config = |local: SocketAddr, remote: SocketAddr| LinkConfig {
            local,
            remote,
            log_path: None,
            ..template.clone()
        };

        Ok((
            Self::from_socket(a, config(addr_a, addr_b))?,
            Self::from_socket(b, config(addr_b, addr_a))?,
        ))
    }

    fn assemble(config: LinkConfig, socket: Arc<UdpSocket>, log: EventLog) -> Result<Self> {
        let (outbound_tx, outbound_rx) = bounded(config.queue_size);
        let (inbound_tx, inbound_rx) = bounded(config.queue_size);
        let (propagation_tx, propagation_rx) = unbounded();
        let state = Arc::new(PipelineState::new());
        let stats = Arc::new(LinkStats::new());
        let log = Arc::new(log);

        let propagation = Propagation {
            socket: socket.clone(),
            queue: propagation_rx,
            delay: config.propagation_delay(),
            state: state.clone(),
            stats: stats.clone(),
        };
        spawn_stage("vlink-propagation", move || propagation.run())?;

        let transmission = Transmission {
            config: config.clone(),
            queue: outbound_rx.clone(),
            propagation: propagation_tx,
            state: state.clone(),
            log: log.clone(),
        };
        spawn_stage("vlink-transmission", move || transmission.run())?;

        let incoming = Incoming {
            socket: socket.clone(),
            queue: inbound_tx,
            state: state.clone(),
            stats: stats.clone(),
            log: log.clone(),
        };
        spawn_stage("vlink-incoming", move || incoming.run())?;

        Ok(Self {
            config,
            socket: Some(socket),
            outbound_tx,
            outbound_rx,
            inbound_rx,
            state,
            stats,
            log,
        })
    }

    /// 송신 큐에 추가. 큐가 가득 차면 조용히 버린다 (에러 아님).
    pub fn enqueue(&self, id: u16, payload: Bytes) -> Result<()> {
        if payload.len() > MAX_SEGMENT_SIZE {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: MAX_SEGMENT_SIZE,
            });
        }

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        match self.outbound_tx.try_send((id, payload)) {
            Ok(()) => {
                self.log.record(id, LinkEvent::Added);
                self.stats.record_enqueued();
            }
            Err(_) => {
                self.state.release_pending();
                self.log.record(id, LinkEvent::Dropped);
                self.stats.record_outbound_drop();
                debug!("송신 큐 가득 참, 패킷 {} 버림", id);
            }
        }
        Ok(())
    }

    /// 수신 큐에서 꺼내기.
    ///
    /// `Some(timeout)` 이면 그만큼만 기다린다. `None` 이면 데이터가 오거나 수신
    /// 스테이지가 멈출 때까지 제한 없이 기다린다.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Option<Bytes> {
        match timeout {
            Some(timeout) => self.inbound_rx.recv_timeout(timeout).ok(),
            None => self.inbound_rx.recv().ok(),
        }
    }

    /// 송수신 양쪽이 한 폴링 간격 이상 조용해질 때까지 대기
    pub fn idle(&self) {
        while !self.is_idle() {
            thread::sleep(IDLE_CHECK_INTERVAL);
        }
    }

    /// 멈춘 스테이지는 조용한 것으로 본다
    pub fn is_idle(&self) -> bool {
        let outgoing = self.state.outgoing.is_stopped()
            || (self.state.outgoing.is_idle() && self.state.pending.load(Ordering::SeqCst) == 0);
        let incoming = self.state.incoming.is_stopped() || self.state.incoming.is_idle();
        outgoing && incoming
    }

    /// 와이어 소켓이 살아 있는지
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.config.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.config.remote
    }

    /// 송신 큐 길이
    pub fn outbound_len(&self) -> usize {
        self.outbound_rx.len()
    }

    /// 수신 큐 길이
    pub fn inbound_len(&self) -> usize {
        self.inbound_rx.len()
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }
}

/// 분리된(detached) 스레드 실행
pub(crate) fn spawn_stage<F>(name: &str, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(f)?;
    Ok(())
}

/// 전송 지연 스테이지: 송신 큐 -> (크기 / 속도) 대기 -> 전파 큐
struct Transmission {
    config: LinkConfig,
    queue: Receiver<(u16, Bytes)>,
    propagation: Sender<InFlight>,
    state: Arc<PipelineState>,
    log: Arc<EventLog>,
}

impl Transmission {
    fn run(self) {
        loop {
            let (id, payload) = match self.queue.recv_timeout(POLL_INTERVAL) {
                Ok(item) => item,
                Err(RecvTimeoutError::Timeout) => {
                    self.state.outgoing.idle();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            self.state.outgoing.busy();

            self.log.record(id, LinkEvent::Sending);
            thread::sleep(self.config.transmission_delay(payload.len()));
            self.log.record(id, LinkEvent::Sent);

            let packet = InFlight {
                id,
                payload,
                sent_at: Instant::now(),
            };
            if self.propagation.send(packet).is_err() {
                self.state.release_pending();
                break;
            }
        }

        debug!("전송 지연 스테이지 종료");
        self.state.outgoing.stop();
    }
}

/// 전파 지연 스테이지: 전파 큐 -> 남은 지연만큼 대기 -> UDP 송신
struct Propagation {
    socket: Arc<UdpSocket>,
    queue: Receiver<InFlight>,
    delay: Duration,
    state: Arc<PipelineState>,
    stats: Arc<LinkStats>,
}

impl Propagation {
    fn run(self) {
        for packet in self.queue.iter() {
            let elapsed = packet.sent_at.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }

            match self.socket.send(&packet.payload) {
                Ok(_) => self.stats.record_transmitted(packet.payload.len()),
                // 상대 포트가 아직 안 열렸음: 링크 위 손실로 취급
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    debug!("상대 포트 닫힘, 패킷 {} 손실", packet.id);
                }
                Err(e) => {
                    error!("UDP 송신 실패, 전파 스테이지 종료: {}", e);
                    self.state.release_pending();
                    self.state.outgoing.stop();
                    return;
                }
            }
            self.state.release_pending();
        }
    }
}

/// 수신 스테이지: UDP -> 수신 큐
struct Incoming {
    socket: Arc<UdpSocket>,
    queue: Sender<Bytes>,
    state: Arc<PipelineState>,
    stats: Arc<LinkStats>,
    log: Arc<EventLog>,
}

impl Incoming {
    fn run(self) {
        let mut buf = vec![0u8; MAX_SEGMENT_SIZE];

        loop {
            let len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    self.state.incoming.idle();
                    continue;
                }
                Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::Interrupted) => {
                    continue;
                }
                Err(e) => {
                    error!("UDP 수신 실패, 수신 스테이지 종료: {}", e);
                    break;
                }
            };
            self.state.incoming.busy();

            self.log.record(UNKNOWN_ID, LinkEvent::Received);
            self.stats.record_received(len);

            match self.queue.try_send(Bytes::copy_from_slice(&buf[..len])) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.log.record(UNKNOWN_ID, LinkEvent::Dropped);
                    self.stats.record_inbound_drop();
                    debug!("수신 큐 가득 참, {} bytes 버림", len);
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        self.state.incoming.stop();
    }
}
