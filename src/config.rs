//! 링크 / 소켓 설정

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use crate::segment::HEADER_LEN;
use crate::{Error, Result, DEFAULT_SEGMENT_SIZE, MAX_SEGMENT_SIZE};

/// ACK 대기 시간 상한 (1시간)
pub const MAX_ACK_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// 에뮬레이션 링크 설정
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// 송신/수신 큐 크기 (패킷 수)
    pub queue_size: usize,

    /// 링크 속도 (Mbps)
    pub rate_mbps: f64,

    /// 단방향 전파 지연 (밀리초)
    pub delay_ms: u64,

    /// 이쪽 끝 UDP 주소
    pub local: SocketAddr,

    /// 반대쪽 끝 UDP 주소
    pub remote: SocketAddr,

    /// 이벤트 로그 파일 (None 이면 기록 안 함)
    pub log_path: Option<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            queue_size: 100,
            rate_mbps: 1.0,
            delay_ms: 100,
            local: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5000)),
            remote: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4000)),
            log_path: None,
        }
    }
}

impl LinkConfig {
    /// 주소 쌍만 지정한 기본 설정
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local,
            remote,
            ..Self::default()
        }
    }

    /// 링크 속도 (bits/sec)
    pub fn rate_bps(&self) -> f64 {
        self.rate_mbps * 1_000_000.0
    }

    /// 단방향 전파 지연
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// `bytes` 를 링크에 싣는 데 걸리는 시간
    pub fn transmission_delay(&self, bytes: usize) -> Duration {
        let rate = self.rate_bps();
        if !rate.is_finite() || rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((bytes * 8) as f64 / rate)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(Error::InvalidConfig("queue_size 는 1 이상".into()));
        }
        if !self.rate_mbps.is_finite() || self.rate_mbps <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "rate_mbps 는 양수여야 함: {}",
                self.rate_mbps
            )));
        }
        Ok(())
    }
}

/// 전송 소켓 설정
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// 소켓 수신 버퍼 크기 (패킷 수)
    pub buffer_size: usize,

    /// 세그먼트 페이로드 크기 (바이트)
    pub segment_size: usize,

    /// 재전송 라운드당 최대 재전송 세그먼트 수
    pub window_size: usize,

    /// 라운드당 ACK 대기 시간 (밀리초)
    pub ack_timeout_ms: u64,

    /// 진전 없는 라운드 허용 횟수
    pub max_stalled_rounds: u32,

    /// 수신 시 체크섬 검증
    pub verify_checksum: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            segment_size: DEFAULT_SEGMENT_SIZE,
            window_size: 16,
            ack_timeout_ms: 1000,
            max_stalled_rounds: 5,
            verify_checksum: true,
        }
    }
}

impl SocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지연이 짧은 링크용 (로컬 테스트 등)
    pub fn fast_retry() -> Self {
        Self {
            ack_timeout_ms: 200,
            ..Self::default()
        }
    }

    /// 손실이 많은 링크용: 작은 윈도우, 넉넉한 재시도
    pub fn lossy_link() -> Self {
        Self {
            segment_size: 512,
            window_size: 4,
            ack_timeout_ms: 1500,
            max_stalled_rounds: 10,
            ..Self::default()
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size 는 1 이상".into()));
        }
        if self.segment_size == 0 || self.segment_size + HEADER_LEN > MAX_SEGMENT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "segment_size 는 1..={} 범위: {}",
                MAX_SEGMENT_SIZE - HEADER_LEN,
                self.segment_size
            )));
        }
        // 윈도우 0 이면 라운드가 아무것도 보내지 않고 소진된다
        if self.window_size == 0 {
            return Err(Error::InvalidConfig("window_size 는 1 이상".into()));
        }
        if self.ack_timeout_ms == 0 || self.ack_timeout_ms > MAX_ACK_TIMEOUT_MS {
            return Err(Error::InvalidConfig(format!(
                "ack_timeout_ms 는 1..={} 범위: {}",
                MAX_ACK_TIMEOUT_MS, self.ack_timeout_ms
            )));
        }
        if self.max_stalled_rounds == 0 {
            return Err(Error::InvalidConfig("max_stalled_rounds 는 1 이상".into()));
        }
        Ok(())
    }
}
