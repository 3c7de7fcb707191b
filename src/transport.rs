//! 포트 역다중화
//!
//! 링크 수신 큐에서 패킷을 꺼내 목적지 포트에 바인딩된 소켓으로 넘긴다.
//! 데이터 세그먼트는 검증(번호 범위, 체크섬)을 통과하고 소켓 버퍼에 들어간 뒤에만
//! ACK 를 돌려보낸다. 검증에 실패하거나 버퍼가 가득 차면 ACK 없이 버려지므로
//! 송신측이 재전송한다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::link::{spawn_stage, Link};
use crate::segment::Segment;
use crate::{Error, Result};

/// 패킷 하나를 처리한 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 데이터 세그먼트가 소켓 버퍼에 들어가고 ACK 를 보냄
    Data { port: u16, sequence_id: u16 },
    /// ACK 가 소켓에 전달됨
    Ack { port: u16, sequence_id: u16 },
    /// 소켓 버퍼가 가득 차서 버림
    Dropped { port: u16 },
    /// 바인딩된 소켓 없음
    Unbound { port: u16 },
    /// 검증 실패 (체크섬, 번호 범위). ACK 없이 버림
    Corrupt { port: u16, sequence_id: u16 },
}

/// 소켓 하나의 수신함. 멀티플렉서가 채우고 소켓이 비운다.
#[derive(Debug)]
pub(crate) struct Inbox {
    verify_checksum: bool,
    data_tx: Sender<Bytes>,
    data_rx: Receiver<Bytes>,
    ack_tx: Sender<u16>,
    ack_rx: Receiver<u16>,
}

impl Inbox {
    pub(crate) fn new(capacity: usize, verify_checksum: bool) -> Self {
        let (data_tx, data_rx) = bounded(capacity);
        let (ack_tx, ack_rx) = bounded(capacity);
        Self {
            verify_checksum,
            data_tx,
            data_rx,
            ack_tx,
            ack_rx,
        }
    }

    pub(crate) fn data(&self) -> &Receiver<Bytes> {
        &self.data_rx
    }

    pub(crate) fn acks(&self) -> &Receiver<u16> {
        &self.ack_rx
    }

    /// 이전 전송에서 늦게 도착한 ACK 비우기
    pub(crate) fn drain_acks(&self) -> usize {
        self.ack_rx.try_iter().count()
    }
}

/// 링크 하나에 대한 전송 계층 (포트 -> 소켓)
pub struct Transport {
    link: Arc<Link>,
    bindings: Mutex<HashMap<u16, Arc<Inbox>>>,

    /// 역다중화 스레드가 돌고 있는지
    running: AtomicBool,
}

impl Transport {
    pub fn new(link: Arc<Link>) -> Arc<Self> {
        Arc::new(Self {
            link,
            bindings: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        })
    }

    /// 역다중화 루프를 분리된 스레드로 시작
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let transport = self.clone();
        self.running.store(true, Ordering::SeqCst);

        let spawned = spawn_stage("vlink-transport", move || {
            if let Err(e) = transport.run() {
                error!("역다중화 루프 종료: {}", e);
            }
            transport.running.store(false, Ordering::SeqCst);
        });
        if spawned.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        spawned
    }

    /// `start` 로 띄운 루프가 아직 살아 있는지.
    /// 루프가 멈추면 바인딩된 소켓에는 더 이상 아무것도 도착하지 않는다.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub(crate) fn bind(&self, port: u16, inbox: Arc<Inbox>) -> Result<()> {
        let mut bindings = self.bindings.lock();
        if bindings.contains_key(&port) {
            return Err(Error::AddressInUse { port });
        }
        bindings.insert(port, inbox);
        debug!("포트 {} 바인딩", port);
        Ok(())
    }

    /// 포트 바인딩 해제
    pub fn unbind(&self, port: u16) {
        if self.bindings.lock().remove(&port).is_some() {
            debug!("포트 {} 바인딩 해제", port);
        }
    }

    /// `inbox` 가 여전히 `port` 의 주인일 때만 해제
    pub(crate) fn unbind_inbox(&self, port: u16, inbox: &Arc<Inbox>) {
        let mut bindings = self.bindings.lock();
        if bindings
            .get(&port)
            .is_some_and(|bound| Arc::ptr_eq(bound, inbox))
        {
            bindings.remove(&port);
            debug!("포트 {} 바인딩 해제", port);
        }
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.bindings.lock().contains_key(&port)
    }

    /// 역다중화 루프.
    ///
    /// 링크 수신 큐를 시간 제한 없이 기다린다. 디코드 실패는 루프를 끝낸다.
    /// 링크 수신 스테이지가 멈추면 `Ok(())` 로 끝난다.
    pub fn run(&self) -> Result<()> {
        info!("Transport started on {}", self.link.local_addr());

        while let Some(raw) = self.link.dequeue(None) {
            self.dispatch(raw)?;
        }

        info!("링크 수신 종료, 역다중화 루프 정지");
        Ok(())
    }

    /// 패킷 하나 처리
    pub fn dispatch(&self, raw: Bytes) -> Result<Delivery> {
        let segment = Segment::decode(&raw)?;
        let port = segment.header.dest_port;
        let sequence_id = segment.header.sequence_id;

        // 잠금은 조회 동안만
        let inbox = self.bindings.lock().get(&port).cloned();
        let Some(inbox) = inbox else {
            trace!("바인딩 없는 포트 {} 패킷 버림", port);
            return Ok(Delivery::Unbound { port });
        };

        if inbox.verify_checksum {
            if let Err(e) = segment.verify_checksum() {
                warn!("포트 {} 세그먼트 {} 버림: {}", port, sequence_id, e);
                return Ok(Delivery::Corrupt { port, sequence_id });
            }
        }

        if segment.is_ack() {
            if inbox.ack_tx.try_send(sequence_id).is_err() {
                return Ok(Delivery::Dropped { port });
            }
            return Ok(Delivery::Ack { port, sequence_id });
        }

        if let Err(e) = segment.check_sequence() {
            warn!("포트 {} 세그먼트 버림: {}", port, e);
            return Ok(Delivery::Corrupt { port, sequence_id });
        }

        if inbox.data_tx.try_send(raw).is_err() {
            debug!("포트 {} 버퍼 가득 참, 세그먼트 {} 버림", port, sequence_id);
            return Ok(Delivery::Dropped { port });
        }

        self.link.enqueue(sequence_id, segment.ack().encode())?;
        Ok(Delivery::Data { port, sequence_id })
    }
}
