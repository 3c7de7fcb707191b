//! 송신측 재전송 윈도우
//!
//! 상태만 관리한다. 실제 전송과 ACK 대기는 호출자([`crate::TransportSocket`]) 몫.
//!
//! 한 라운드 = 전송 + ACK 대기. 라운드가 끝날 때 미확인 수가 줄지 않았으면
//! "정체" 라운드로 센다. 정체 라운드가 예산을 다 쓰면 포기한다.
//! 진전이 있는 라운드는 예산을 쓰지 않지만 미확인 집합이 유한하므로 반드시 끝난다.

use std::collections::{BTreeMap, BTreeSet};

/// 라운드 종료 판정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// 모든 세그먼트 확인됨
    Complete,
    /// 다음 라운드에 재전송할 번호 (오래된 순)
    Retransmit(Vec<u16>),
    /// 정체 예산 소진
    Exhausted,
}

/// 메시지 하나의 송신 상태
#[derive(Debug)]
pub struct SendWindow {
    /// sequence id -> 페이로드 길이
    sizes: BTreeMap<u16, usize>,

    /// 아직 ACK 받지 못한 번호
    unacked: BTreeSet<u16>,

    /// 라운드당 재전송 상한
    window_size: usize,

    /// 정체 라운드 허용 횟수
    max_stalled: u32,

    rounds: u32,
    stalled: u32,
    retransmissions: u64,

    /// 직전 라운드 종료 시점의 미확인 수
    last_outstanding: usize,
}

impl SendWindow {
    pub fn new(
        sizes: impl IntoIterator<Item = (u16, usize)>,
        window_size: usize,
        max_stalled: u32,
    ) -> Self {
        let sizes: BTreeMap<u16, usize> = sizes.into_iter().collect();
        let unacked: BTreeSet<u16> = sizes.keys().copied().collect();
        let last_outstanding = unacked.len();

        Self {
            sizes,
            unacked,
            window_size: window_size.max(1),
            max_stalled: max_stalled.max(1),
            rounds: 0,
            stalled: 0,
            retransmissions: 0,
            last_outstanding,
        }
    }

    /// 첫 라운드: 전체 전송
    pub fn initial_batch(&self) -> Vec<u16> {
        self.sizes.keys().copied().collect()
    }

    /// ACK 반영. 처음 확인된 번호면 `true`.
    pub fn ack(&mut self, sequence_id: u16) -> bool {
        self.unacked.remove(&sequence_id)
    }

    pub fn is_complete(&self) -> bool {
        self.unacked.is_empty()
    }

    /// 라운드 종료 처리
    pub fn finish_round(&mut self) -> RoundOutcome {
        self.rounds += 1;

        let outstanding = self.unacked.len();
        if outstanding == 0 {
            return RoundOutcome::Complete;
        }

        if outstanding >= self.last_outstanding {
            self.stalled += 1;
        }
        self.last_outstanding = outstanding;

        if self.stalled >= self.max_stalled {
            return RoundOutcome::Exhausted;
        }

        let batch: Vec<u16> = self
            .unacked
            .iter()
            .take(self.window_size)
            .copied()
            .collect();
        self.retransmissions += batch.len() as u64;
        RoundOutcome::Retransmit(batch)
    }

    pub fn outstanding(&self) -> Vec<u16> {
        self.unacked.iter().copied().collect()
    }

    pub fn total_segments(&self) -> usize {
        self.sizes.len()
    }

    pub fn acked_segments(&self) -> usize {
        self.sizes.len() - self.unacked.len()
    }

    /// 확인된 세그먼트의 페이로드 합
    pub fn acked_bytes(&self) -> usize {
        self.sizes
            .iter()
            .filter(|(id, _)| !self.unacked.contains(*id))
            .map(|(_, len)| len)
            .sum()
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn stalled_rounds(&self) -> u32 {
        self.stalled
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }
}
