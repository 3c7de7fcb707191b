//! 에러 타입 정의

use thiserror::Error;

/// vlink 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("디코드 에러: {0}")]
    Decode(#[from] DecodeError),

    #[error("포트 {port} 는 이미 사용 중")]
    AddressInUse { port: u16 },

    #[error("페이로드가 너무 큼: {size} bytes (최대 {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("메시지가 너무 큼: {segments} 세그먼트 필요 (최대 65535)")]
    MessageTooLarge { segments: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("유효하지 않은 인자: {0}")]
    InvalidArgument(String),

    #[error("채널 에러")]
    ChannelClosed,
}

/// 세그먼트 디코딩 실패
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("헤더보다 짧은 패킷: {len} bytes (헤더 {header} bytes)")]
    Truncated { len: usize, header: usize },

    #[error("길이 불일치: 헤더 {declared} bytes, 실제 페이로드 {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("체크섬 불일치: expected {expected:04X}, got {got:04X}")]
    ChecksumMismatch { expected: u16, got: u16 },

    #[error("시퀀스 범위 밖: id={sequence_id}, total={total_segments}")]
    SequenceOutOfRange {
        sequence_id: u16,
        total_segments: u16,
    },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
