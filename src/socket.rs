//! 전송 소켓
//!
//! - 송신: 분할 -> 전체 전송 -> ACK 대기 -> 미확인분을 윈도우만큼 재전송 반복
//! - 수신: 소켓 버퍼에서 세그먼트를 꺼내 번호 기준으로 재조립
//!
//! 재시도 예산을 다 쓰면 확인된 만큼만 전달된 채로 반환한다 (최선 노력).

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SocketConfig;
use crate::reassembly::Reassembler;
use crate::segment::{Segment, SegmentBuilder};
use crate::transport::{Inbox, Transport};
use crate::window::{RoundOutcome, SendWindow};
use crate::{Error, Result};

/// 메시지 하나의 송신 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// 메시지 전체 크기
    pub total_bytes: usize,

    /// ACK 로 확인된 바이트
    pub acked_bytes: usize,

    pub total_segments: usize,
    pub acked_segments: usize,

    /// 진행한 라운드 수 (첫 전송 포함)
    pub rounds: u32,

    /// 재전송한 세그먼트 수
    pub retransmissions: u64,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.acked_segments == self.total_segments
    }
}

/// (source port, dest port) 쌍으로 바인딩된 소켓
pub struct TransportSocket {
    transport: Arc<Transport>,
    config: SocketConfig,
    source_port: u16,
    dest_port: u16,
    inbox: Arc<Inbox>,
    assembly: Mutex<Reassembler>,

    /// ACK 수신함을 한 번에 한 송신만 쓰도록
    send_lock: Mutex<()>,
}

impl TransportSocket {
    /// `source_port` 에 바인딩. 이미 쓰이는 포트면 [`Error::AddressInUse`].
    pub fn bind(
        transport: &Arc<Transport>,
        config: SocketConfig,
        source_port: u16,
        dest_port: u16,
    ) -> Result<Self> {
        config.validate()?;

        let inbox = Arc::new(Inbox::new(config.buffer_size, config.verify_checksum));
        transport.bind(source_port, inbox.clone())?;

        Ok(Self {
            transport: transport.clone(),
            config,
            source_port,
            dest_port,
            inbox,
            assembly: Mutex::new(Reassembler::new()),
            send_lock: Mutex::new(()),
        })
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn dest_port(&self) -> u16 {
        self.dest_port
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// 메시지 전송. ACK 로 확인된 바이트 수를 돌려준다.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        Ok(self.send_message(data)?.acked_bytes)
    }

    /// 메시지 전송 후 상세 결과 반환
    pub fn send_message(&self, data: &[u8]) -> Result<SendReport> {
        let _guard = self.send_lock.lock();

        let segments = SegmentBuilder::new(self.source_port, self.dest_port, self.config.segment_size)
            .split(data)?;
        let wire: Vec<(u16, Bytes)> = segments
            .iter()
            .map(|s| (s.header.sequence_id, s.encode()))
            .collect();

        let stale = self.inbox.drain_acks();
        if stale > 0 {
            debug!("포트 {}: 이전 ACK {}개 버림", self.source_port, stale);
        }

        let mut window = SendWindow::new(
            segments
                .iter()
                .map(|s| (s.header.sequence_id, s.payload.len())),
            self.config.window_size,
            self.config.max_stalled_rounds,
        );

        let mut batch = window.initial_batch();
        loop {
            for id in &batch {
                // 번호는 1..=N 이므로 id - 1 이 인덱스
                let (_, bytes) = &wire[*id as usize - 1];
                self.transport.link().enqueue(*id, bytes.clone())?;
            }

            self.collect_acks(&mut window)?;

            match window.finish_round() {
                RoundOutcome::Complete => break,
                RoundOutcome::Retransmit(next) => {
                    debug!(
                        "포트 {}: 라운드 {} 미확인 {:?}, {}개 재전송",
                        self.source_port,
                        window.rounds(),
                        window.outstanding(),
                        next.len()
                    );
                    batch = next;
                }
                RoundOutcome::Exhausted => {
                    warn!(
                        "포트 {}: 재시도 소진, {}/{} 세그먼트만 확인됨",
                        self.source_port,
                        window.acked_segments(),
                        window.total_segments()
                    );
                    break;
                }
            }
        }

        let report = SendReport {
            total_bytes: data.len(),
            acked_bytes: window.acked_bytes(),
            total_segments: window.total_segments(),
            acked_segments: window.acked_segments(),
            rounds: window.rounds(),
            retransmissions: window.retransmissions(),
        };
        if report.is_complete() {
            info!(
                "포트 {} -> {}: {} bytes 전송 완료 ({} 라운드)",
                self.source_port, self.dest_port, report.total_bytes, report.rounds
            );
        }
        Ok(report)
    }

    /// 라운드 타임아웃까지 ACK 수집. 모두 확인되면 바로 끝난다.
    fn collect_acks(&self, window: &mut SendWindow) -> Result<()> {
        let deadline = deadline_after(self.config.ack_timeout());

        while !window.is_complete() {
            match recv_until(self.inbox.acks(), deadline) {
                Ok(id) => {
                    window.ack(id);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
            }
        }
        Ok(())
    }

    /// 메시지 하나 수신.
    ///
    /// 모든 세그먼트가 모이면 `Some(message)`. 시간 안에 완성되지 않으면 `None` 이며,
    /// 받은 세그먼트는 다음 호출을 위해 남겨둔다. `Duration::MAX` 처럼 표현할 수 없을
    /// 만큼 긴 시간은 제한 없는 대기가 된다.
    ///
    /// 체크섬과 번호 범위는 ACK 전에 역다중화기가 이미 검증했다.
    pub fn recv(&self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = deadline_after(timeout);
        let mut assembly = self.assembly.lock();

        loop {
            let raw = match recv_until(self.inbox.data(), deadline) {
                Ok(raw) => raw,
                Err(RecvTimeoutError::Timeout) => {
                    if !assembly.is_empty() {
                        debug!(
                            "포트 {}: 수신 타임아웃, 누락 {:?}",
                            self.source_port,
                            assembly.missing_ids()
                        );
                    }
                    return Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
            };

            let segment = Segment::decode(&raw)?;
            assembly.insert(&segment)?;

            if assembly.is_complete() {
                let message = std::mem::take(&mut *assembly).into_message();
                return Ok(Some(message));
            }
        }
    }

    /// 완성되지 않은 수신 상태 버리기
    pub fn reset_partial(&self) -> usize {
        let mut assembly = self.assembly.lock();
        let discarded = assembly.received_count();
        *assembly = Reassembler::new();
        discarded
    }

    /// 바인딩 해제 (drop 시 자동)
    pub fn unbind(&self) {
        self.transport.unbind_inbox(self.source_port, &self.inbox);
    }
}

/// `None` 이면 기한 없음
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn recv_until<T>(
    rx: &Receiver<T>,
    deadline: Option<Instant>,
) -> std::result::Result<T, RecvTimeoutError> {
    match deadline {
        Some(deadline) => rx.recv_deadline(deadline),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

impl Drop for TransportSocket {
    fn drop(&mut self) {
        self.unbind();
    }
}
