//! 링크 통계

use std::sync::atomic::{AtomicU64, Ordering};

/// 링크 카운터. 스테이지 스레드들이 동시에 갱신한다.
#[derive(Debug, Default)]
pub struct LinkStats {
    enqueued: AtomicU64,
    dropped_outbound: AtomicU64,
    transmitted: AtomicU64,
    transmitted_bytes: AtomicU64,
    received: AtomicU64,
    received_bytes: AtomicU64,
    dropped_inbound: AtomicU64,
}

/// 특정 시점의 통계 사본
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    /// 송신 큐에 들어간 패킷 수
    pub enqueued: u64,

    /// 송신 큐가 가득 차서 버린 패킷 수
    pub dropped_outbound: u64,

    /// 와이어로 내보낸 패킷 수
    pub transmitted: u64,

    /// 와이어로 내보낸 바이트
    pub transmitted_bytes: u64,

    /// 와이어에서 받은 패킷 수
    pub received: u64,

    /// 와이어에서 받은 바이트
    pub received_bytes: u64,

    /// 수신 큐가 가득 차서 버린 패킷 수
    pub dropped_inbound: u64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound_drop(&self) {
        self.dropped_outbound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transmitted(&self, bytes: usize) {
        self.transmitted.fetch_add(1, Ordering::Relaxed);
        self.transmitted_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_inbound_drop(&self) {
        self.dropped_inbound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_outbound: self.dropped_outbound.load(Ordering::Relaxed),
            transmitted: self.transmitted.load(Ordering::Relaxed),
            transmitted_bytes: self.transmitted_bytes.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            dropped_inbound: self.dropped_inbound.load(Ordering::Relaxed),
        }
    }
}

impl LinkStatsSnapshot {
    /// 송신 손실률 (큐 오버플로우 기준)
    pub fn outbound_loss_rate(&self) -> f64 {
        let offered = self.enqueued + self.dropped_outbound;
        if offered == 0 {
            return 0.0;
        }
        self.dropped_outbound as f64 / offered as f64
    }

    /// 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "enqueued={} dropped_out={} tx={} ({} bytes) rx={} ({} bytes) dropped_in={} loss={:.1}%",
            self.enqueued,
            self.dropped_outbound,
            self.transmitted,
            self.transmitted_bytes,
            self.received,
            self.received_bytes,
            self.dropped_inbound,
            self.outbound_loss_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rate() {
        let stats = LinkStats::new();
        for _ in 0..3 {
            stats.record_enqueued();
        }
        stats.record_outbound_drop();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.enqueued, 3);
        assert_eq!(snapshot.dropped_outbound, 1);
        assert!((snapshot.outbound_loss_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_loss_rate() {
        assert_eq!(LinkStats::new().snapshot().outbound_loss_rate(), 0.0);
    }
}
