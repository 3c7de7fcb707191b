//! # vlink
//!
//! UDP 위에서 동작하는 가상 링크 에뮬레이터 + 신뢰 전송 계층
//!
//! ## 구성
//! - **Link**: 전송 지연 / 전파 지연 / 유한 큐를 흉내내는 양방향 링크
//! - **Segment**: 6필드 고정 헤더 + 페이로드 (빅엔디안)
//! - **Transport**: 목적지 포트 기준 역다중화
//! - **TransportSocket**: 분할 전송, ACK 기반 재전송, 재조립
//!
//! ```text
//! app -> socket -> segments -> [out queue] -> 전송 지연 -> 전파 지연 -> UDP
//! UDP -> [in queue] -> Transport(port) -> socket buffer -> 재조립 -> app
//! ```

pub mod config;
pub mod error;
pub mod event_log;
pub mod harness;
pub mod link;
pub mod reassembly;
pub mod segment;
pub mod socket;
pub mod stats;
pub mod transport;
pub mod window;

pub use config::{LinkConfig, SocketConfig};
pub use error::{DecodeError, Error, Result};
pub use event_log::{EventLog, LinkEvent};
pub use link::Link;
pub use reassembly::Reassembler;
pub use segment::{Segment, SegmentBuilder, SegmentHeader};
pub use socket::{SendReport, TransportSocket};
pub use stats::{LinkStats, LinkStatsSnapshot};
pub use transport::{Delivery, Transport};
pub use window::{RoundOutcome, SendWindow};

/// 링크 한 번에 실을 수 있는 최대 바이트 (헤더 포함)
pub const MAX_SEGMENT_SIZE: usize = 1500;

/// 기본 세그먼트 페이로드 크기 (바이트)
pub const DEFAULT_SEGMENT_SIZE: usize = 1024;

/// 링크 스테이지의 폴링 간격. idle 판정의 기준 단위이기도 하다.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
