//! 수신 메시지 재조립
//!
//! 세그먼트는 번호로 저장하므로 도착 순서와 무관하고, 중복 수신은 무시된다.
//!
//! 헤더에 메시지 번호가 없으므로 새 메시지는 충돌로 알아챈다. 한 소켓으로 오는
//! 세그먼트는 FIFO 이고 송신자는 이전 메시지를 끝내거나 포기한 뒤에만 다음 메시지를
//! 보내므로, 이전 메시지의 세그먼트는 항상 다음 메시지의 세그먼트보다 먼저 도착한다.
//!
//! - `total_segments` 가 다르면 저장된 부분 메시지 전체가 이전 메시지다.
//! - 같은 번호에 다른 페이로드가 오면 그 번호의 기존 세그먼트와 그보다 먼저
//!   도착한 세그먼트가 모두 이전 메시지다.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::segment::Segment;
use crate::DecodeError;

/// 저장된 세그먼트
#[derive(Debug)]
struct Part {
    payload: Bytes,

    /// 도착 순번 (재삽입 시 갱신)
    arrival: u64,
}

/// 메시지 하나의 재조립 상태
#[derive(Debug, Default)]
pub struct Reassembler {
    /// 첫 세그먼트가 알려준 전체 세그먼트 수
    total: Option<u16>,

    /// sequence id -> 페이로드
    parts: BTreeMap<u16, Part>,

    next_arrival: u64,

    /// 중복으로 버린 세그먼트 수
    duplicates: u64,

    /// 이전 메시지로 판단해 버린 세그먼트 수
    evicted: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 세그먼트 삽입. 새로 저장되면 `true`, 같은 내용의 중복이면 `false`.
    ///
    /// 부분 메시지와 충돌하는 세그먼트는 새 메시지의 것으로 보고, 이전 메시지의
    /// 세그먼트를 버린 뒤 저장한다.
    pub fn insert(&mut self, segment: &Segment) -> Result<bool, DecodeError> {
        segment.check_sequence()?;

        let id = segment.header.sequence_id;
        let total = segment.header.total_segments;
        let arrival = self.next_arrival;
        self.next_arrival += 1;

        match self.total {
            Some(expected) if expected != total => {
                debug!(
                    "새 메시지 시작 (total {} -> {}), 이전 세그먼트 {}개 버림",
                    expected,
                    total,
                    self.parts.len()
                );
                self.evicted += self.parts.len() as u64;
                self.parts.clear();
                self.total = Some(total);
            }
            Some(_) => {}
            None => self.total = Some(total),
        }

        if let Some(part) = self.parts.get_mut(&id) {
            if part.payload == segment.payload {
                // 내용이 같으면 어느 메시지의 것이든 결과는 같다
                part.arrival = arrival;
                self.duplicates += 1;
                return Ok(false);
            }

            let stale_before = part.arrival;
            let before = self.parts.len();
            self.parts.retain(|_, p| p.arrival > stale_before);
            let dropped = before - self.parts.len();
            self.evicted += dropped as u64;
            debug!(
                "세그먼트 {} 내용이 다름: 새 메시지로 보고 이전 세그먼트 {}개 버림",
                id, dropped
            );
        }

        self.parts.insert(
            id,
            Part {
                payload: segment.payload.clone(),
                arrival,
            },
        );
        Ok(true)
    }

    /// 1..=total 이 모두 도착했는지
    pub fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.parts.len() == total as usize,
            None => false,
        }
    }

    /// 아직 안 온 번호 목록
    pub fn missing_ids(&self) -> Vec<u16> {
        let Some(total) = self.total else {
            return Vec::new();
        };
        (1..=total)
            .filter(|id| !self.parts.contains_key(id))
            .collect()
    }

    pub fn received_count(&self) -> usize {
        self.parts.len()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// 새 메시지에 밀려 버려진 세그먼트 수
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// 아무 세그먼트도 받지 않은 상태인지
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// 번호 순으로 이어 붙인 메시지
    pub fn into_message(self) -> Bytes {
        let len = self.parts.values().map(|p| p.payload.len()).sum();
        let mut message = BytesMut::with_capacity(len);
        for part in self.parts.into_values() {
            message.extend_from_slice(&part.payload);
        }
        message.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentBuilder;
    use rand::seq::SliceRandom;

    fn sample_segments() -> (Vec<u8>, Vec<Segment>) {
        let data: Vec<u8> = (0..2500).map(|i| (i % 256) as u8).collect();
        let segments = SegmentBuilder::new(1, 2, 512).split(&data).unwrap();
        (data, segments)
    }

    #[test]
    fn test_in_order_assembly() {
        let (data, segments) = sample_segments();
        let mut assembly = Reassembler::new();

        for segment in &segments {
            assert!(!assembly.is_complete());
            assert!(assembly.insert(segment).unwrap());
        }

        assert!(assembly.is_complete());
        assert_eq!(assembly.into_message().as_ref(), data.as_slice());
    }

    #[test]
    fn test_out_of_order_assembly() {
        let (data, mut segments) = sample_segments();
        segments.shuffle(&mut rand::thread_rng());

        let mut assembly = Reassembler::new();
        for segment in &segments {
            assembly.insert(segment).unwrap();
        }

        assert!(assembly.is_complete());
        assert_eq!(assembly.into_message().as_ref(), data.as_slice());
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let (data, segments) = sample_segments();
        let mut assembly = Reassembler::new();

        assembly.insert(&segments[0]).unwrap();
        assert!(!assembly.insert(&segments[0]).unwrap());
        assert_eq!(assembly.received_count(), 1);
        assert_eq!(assembly.missing_ids(), vec![2, 3, 4, 5]);

        // 중복은 완료를 앞당기지 않는다
        for segment in &segments[1..4] {
            assembly.insert(segment).unwrap();
            assembly.insert(segment).unwrap();
        }
        assert!(!assembly.is_complete());

        assembly.insert(&segments[4]).unwrap();
        assert!(assembly.is_complete());
        assert_eq!(assembly.duplicates(), 4);
        assert_eq!(assembly.into_message().as_ref(), data.as_slice());
    }

    #[test]
    fn test_different_total_starts_new_message() {
        let (_, segments) = sample_segments();
        let next = SegmentBuilder::new(1, 2, 512).split(&[7u8; 600]).unwrap();

        let mut assembly = Reassembler::new();
        assembly.insert(&segments[0]).unwrap();
        assembly.insert(&segments[1]).unwrap();

        assert!(assembly.insert(&next[1]).unwrap());
        assert_eq!(assembly.evicted(), 2);
        assert_eq!(assembly.missing_ids(), vec![1]);

        assembly.insert(&next[0]).unwrap();
        assert!(assembly.is_complete());
        assert_eq!(assembly.into_message().as_ref(), &[7u8; 600][..]);
    }

    #[test]
    fn test_conflicting_payload_evicts_older_parts() {
        let builder = SegmentBuilder::new(1, 2, 4);
        let stale = builder.split(b"aaaabbbb").unwrap();
        let next = builder.split(b"xxxxyyyy").unwrap();

        let mut assembly = Reassembler::new();
        assembly.insert(&stale[0]).unwrap();

        assert!(assembly.insert(&next[0]).unwrap());
        assert_eq!(assembly.evicted(), 1);
        assembly.insert(&next[1]).unwrap();

        assert!(assembly.is_complete());
        assert_eq!(assembly.into_message().as_ref(), b"xxxxyyyy");
    }

    #[test]
    fn test_identical_duplicate_refreshes_arrival() {
        // 새 메시지의 1번이 이전 메시지의 1번과 같은 내용
        let builder = SegmentBuilder::new(1, 2, 2);
        let stale = builder.split(b"aabbcc").unwrap();
        let next = builder.split(b"aaddee").unwrap();

        let mut assembly = Reassembler::new();
        assembly.insert(&stale[0]).unwrap();
        assembly.insert(&stale[1]).unwrap();

        assert!(!assembly.insert(&next[0]).unwrap());
        // 2번 충돌은 2번과 그 이전 도착분만 버린다. 1번은 방금 다시 도착했으므로 남는다.
        assert!(assembly.insert(&next[1]).unwrap());
        assert_eq!(assembly.evicted(), 1);
        assembly.insert(&next[2]).unwrap();

        assert!(assembly.is_complete());
        assert_eq!(assembly.into_message().as_ref(), b"aaddee");
    }

    #[test]
    fn test_sequence_out_of_range() {
        let bad = Segment::new(1, 2, 4, 3, Bytes::from_static(b"x")).unwrap();
        let zero = Segment::new(1, 2, 0, 3, Bytes::from_static(b"x")).unwrap();

        let mut assembly = Reassembler::new();
        assert!(matches!(
            assembly.insert(&bad),
            Err(DecodeError::SequenceOutOfRange { .. })
        ));
        assert!(assembly.insert(&zero).is_err());
        assert!(assembly.is_empty());
    }
}
