//! 세그먼트 (와이어 단위) 정의
//!
//! 모든 필드는 빅엔디안 u16:
//!
//! ```text
//!  0               2               4               6
//! +---------------+---------------+---------------+---------------+
//! |  source port  |   dest port   |    length     |   checksum    |
//! +---------------+---------------+---------------+---------------+
//! |  sequence id  | total segments|  payload ...
//! +---------------+---------------+----------------
//! ```
//!
//! `length` 는 페이로드 길이 + 8 이다 (헤더는 12 바이트지만 관례상 8 을 더한다).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{DecodeError, Error, Result};

/// 고정 헤더 크기 (바이트)
pub const HEADER_LEN: usize = 12;

/// `length` 필드에 페이로드 길이와 함께 더해지는 값
pub const LENGTH_BIAS: usize = 8;

/// ACK 세그먼트의 페이로드
pub const ACK_MARKER: &[u8] = b"ACK";

/// `length` 필드로 표현할 수 있는 최대 페이로드
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - LENGTH_BIAS;

/// 세그먼트 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub source_port: u16,
    pub dest_port: u16,

    /// 페이로드 길이 + [`LENGTH_BIAS`]
    pub length: u16,

    /// 페이로드 CRC32 를 16비트로 접은 값
    pub checksum: u16,

    /// 1부터 시작하는 세그먼트 번호
    pub sequence_id: u16,

    /// 메시지를 이루는 세그먼트 수
    pub total_segments: u16,
}

/// 세그먼트 (헤더 + 페이로드)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Bytes,
}

impl Segment {
    /// 데이터 세그먼트 생성. `length` 와 `checksum` 은 페이로드로부터 계산된다.
    ///
    /// `length` 필드(u16)에 담을 수 없는 페이로드는 [`Error::PayloadTooLarge`].
    pub fn new(
        source_port: u16,
        dest_port: u16,
        sequence_id: u16,
        total_segments: u16,
        payload: Bytes,
    ) -> Result<Self> {
        let length = u16::try_from(payload.len() + LENGTH_BIAS).map_err(|_| {
            Error::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_LEN,
            }
        })?;

        Ok(Self {
            header: SegmentHeader {
                source_port,
                dest_port,
                length,
                checksum: payload_checksum(&payload),
                sequence_id,
                total_segments,
            },
            payload,
        })
    }

    /// 이 세그먼트에 대한 ACK. 포트를 뒤집고 번호는 그대로 둔다.
    pub fn ack(&self) -> Segment {
        Segment {
            header: SegmentHeader {
                source_port: self.header.dest_port,
                dest_port: self.header.source_port,
                length: (ACK_MARKER.len() + LENGTH_BIAS) as u16,
                checksum: payload_checksum(ACK_MARKER),
                sequence_id: self.header.sequence_id,
                total_segments: self.header.total_segments,
            },
            payload: Bytes::from_static(ACK_MARKER),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.payload.as_ref() == ACK_MARKER
    }

    /// 와이어 바이트로 직렬화. 헤더 필드는 저장된 값 그대로 쓴다.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u16(self.header.source_port);
        buf.put_u16(self.header.dest_port);
        buf.put_u16(self.header.length);
        buf.put_u16(self.header.checksum);
        buf.put_u16(self.header.sequence_id);
        buf.put_u16(self.header.total_segments);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// 와이어 바이트에서 역직렬화. 체크섬은 검증하지 않는다.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                len: bytes.len(),
                header: HEADER_LEN,
            });
        }

        let mut buf = bytes;
        let header = SegmentHeader {
            source_port: buf.get_u16(),
            dest_port: buf.get_u16(),
            length: buf.get_u16(),
            checksum: buf.get_u16(),
            sequence_id: buf.get_u16(),
            total_segments: buf.get_u16(),
        };

        let declared = (header.length as usize).checked_sub(LENGTH_BIAS);
        if declared != Some(buf.len()) {
            return Err(DecodeError::LengthMismatch {
                declared: declared.unwrap_or(0),
                actual: buf.len(),
            });
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// 체크섬 검증
    pub fn verify_checksum(&self) -> std::result::Result<(), DecodeError> {
        let got = payload_checksum(&self.payload);
        if got != self.header.checksum {
            return Err(DecodeError::ChecksumMismatch {
                expected: self.header.checksum,
                got,
            });
        }
        Ok(())
    }

    /// 번호가 1..=total 범위인지
    pub fn check_sequence(&self) -> std::result::Result<(), DecodeError> {
        let id = self.header.sequence_id;
        let total = self.header.total_segments;
        if id == 0 || id > total {
            return Err(DecodeError::SequenceOutOfRange {
                sequence_id: id,
                total_segments: total,
            });
        }
        Ok(())
    }

    /// 와이어 크기
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// CRC32 상위/하위 16비트 XOR
pub fn payload_checksum(payload: &[u8]) -> u16 {
    let crc = crc32fast::hash(payload);
    ((crc >> 16) as u16) ^ (crc as u16)
}

/// 메시지 분할기 (송신측)
#[derive(Debug, Clone)]
pub struct SegmentBuilder {
    source_port: u16,
    dest_port: u16,
    segment_size: usize,
}

impl SegmentBuilder {
    pub fn new(source_port: u16, dest_port: u16, segment_size: usize) -> Self {
        Self {
            source_port,
            dest_port,
            segment_size: segment_size.max(1),
        }
    }

    /// 메시지 하나를 1..=N 번호의 세그먼트들로 분할.
    /// 빈 메시지는 빈 세그먼트 하나가 된다.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Segment>> {
        let total = data.len().div_ceil(self.segment_size).max(1);
        if total > u16::MAX as usize {
            return Err(Error::MessageTooLarge { segments: total });
        }

        if data.is_empty() {
            return Ok(vec![Segment::new(
                self.source_port,
                self.dest_port,
                1,
                1,
                Bytes::new(),
            )?]);
        }

        let data = Bytes::copy_from_slice(data);
        (0..total)
            .map(|idx| {
                let start = idx * self.segment_size;
                let end = (start + self.segment_size).min(data.len());
                Segment::new(
                    self.source_port,
                    self.dest_port,
                    (idx + 1) as u16,
                    total as u16,
                    data.slice(start..end),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_wire_layout() {
        let segment = Segment::new(1, 2, 3, 4, Bytes::from_static(b"hello")).unwrap();
        let bytes = segment.encode();

        assert_eq!(bytes.len(), HEADER_LEN + 5);
        assert_eq!(&bytes[0..2], &[0, 1]);
        assert_eq!(&bytes[2..4], &[0, 2]);
        // length = 5 + 8
        assert_eq!(&bytes[4..6], &[0, 13]);
        assert_eq!(&bytes[8..10], &[0, 3]);
        assert_eq!(&bytes[10..12], &[0, 4]);
        assert_eq!(&bytes[12..], b"hello");
    }

    #[test]
    fn test_segment_roundtrip() {
        let payload: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        let segment = Segment::new(40000, 7, 12, 65535, Bytes::from(payload)).unwrap();

        let restored = Segment::decode(&segment.encode()).unwrap();
        assert_eq!(restored, segment);
        assert!(restored.verify_checksum().is_ok());

        // 헤더 필드는 계산 없이 그대로 왕복해야 함
        let raw = Segment {
            header: SegmentHeader {
                source_port: u16::MAX,
                dest_port: 0,
                length: LENGTH_BIAS as u16,
                checksum: 0xBEEF,
                sequence_id: 0,
                total_segments: 0,
            },
            payload: Bytes::new(),
        };
        assert_eq!(Segment::decode(&raw.encode()).unwrap(), raw);
    }

    #[test]
    fn test_decode_truncated() {
        let err = Segment::decode(&[0u8; HEADER_LEN - 1]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                len: HEADER_LEN - 1,
                header: HEADER_LEN
            }
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let segment = Segment::new(1, 2, 1, 1, Bytes::from_static(b"abcdef")).unwrap();
        let bytes = segment.encode();

        // 페이로드 일부가 잘린 경우
        let err = Segment::decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                declared: 6,
                actual: 4
            }
        );

        // length 필드가 bias 보다 작은 경우
        let mut short = bytes.to_vec();
        short[4..6].copy_from_slice(&3u16.to_be_bytes());
        assert!(matches!(
            Segment::decode(&short),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let segment = Segment::new(1, 2, 1, 1, Bytes::from_static(b"payload")).unwrap();
        let mut bytes = segment.encode().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let corrupted = Segment::decode(&bytes).unwrap();
        assert!(matches!(
            corrupted.verify_checksum(),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_ack_swaps_ports() {
        let data = Segment::new(1, 2, 3, 5, Bytes::from_static(b"data")).unwrap();
        let ack = data.ack();

        assert!(ack.is_ack());
        assert!(!data.is_ack());
        assert_eq!(ack.header.source_port, 2);
        assert_eq!(ack.header.dest_port, 1);
        assert_eq!(ack.header.sequence_id, 3);
        assert_eq!(ack.header.total_segments, 5);
    }

    #[test]
    fn test_split_into_segments() {
        let builder = SegmentBuilder::new(1, 2, 1024);
        let data: Vec<u8> = (0..3000).map(|i| (i % 256) as u8).collect();
        let segments = builder.split(&data).unwrap();

        assert_eq!(segments.len(), 3);
        let ids: Vec<u16> = segments.iter().map(|s| s.header.sequence_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(segments.iter().all(|s| s.header.total_segments == 3));
        assert_eq!(segments[2].payload.len(), 3000 - 2048);

        let joined: Vec<u8> = segments.iter().flat_map(|s| s.payload.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_split_exact_and_empty() {
        let builder = SegmentBuilder::new(1, 2, 100);
        assert_eq!(builder.split(&[0u8; 200]).unwrap().len(), 2);

        let empty = builder.split(&[]).unwrap();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].header.total_segments, 1);
        assert!(empty[0].payload.is_empty());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let fits = Bytes::from(vec![0u8; MAX_PAYLOAD_LEN]);
        assert_eq!(
            Segment::new(1, 2, 1, 1, fits).unwrap().header.length,
            u16::MAX
        );

        let too_big = Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(
            Segment::new(1, 2, 1, 1, too_big),
            Err(Error::PayloadTooLarge { size, max }) if size == MAX_PAYLOAD_LEN + 1 && max == MAX_PAYLOAD_LEN
        ));

        // 세그먼트 크기가 필드 한도를 넘으면 분할도 실패한다
        let builder = SegmentBuilder::new(1, 2, MAX_PAYLOAD_LEN + 1);
        assert!(builder.split(&vec![0u8; MAX_PAYLOAD_LEN + 1]).is_err());
    }

    #[test]
    fn test_check_sequence() {
        let ok = Segment::new(1, 2, 3, 3, Bytes::new()).unwrap();
        assert!(ok.check_sequence().is_ok());

        let zero = Segment::new(1, 2, 0, 3, Bytes::new()).unwrap();
        let past = Segment::new(1, 2, 4, 3, Bytes::new()).unwrap();
        assert!(matches!(
            zero.check_sequence(),
            Err(DecodeError::SequenceOutOfRange { sequence_id: 0, .. })
        ));
        assert!(past.check_sequence().is_err());
    }

    #[test]
    fn test_split_too_many_segments() {
        let builder = SegmentBuilder::new(1, 2, 1);
        let data = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            builder.split(&data),
            Err(Error::MessageTooLarge { .. })
        ));
    }
}
