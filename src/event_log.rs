//! 링크 이벤트 로그
//!
//! 한 줄에 이벤트 하나: `<epoch 초(소수)> <sequence id> <이벤트>`
//! 여러 스레드가 동시에 기록하므로 뮤텍스로 직렬화하고 매번 flush 한다.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::warn;

use crate::Result;

/// 링크에서 기록하는 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// 송신 큐 진입
    Added,
    /// 큐가 가득 차서 버려짐
    Dropped,
    /// 전송 지연 시작
    Sending,
    /// 전송 지연 끝, 전파 큐로 넘어감
    Sent,
    /// 와이어에서 수신
    Received,
}

impl LinkEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkEvent::Added => "added",
            LinkEvent::Dropped => "dropped",
            LinkEvent::Sending => "sending",
            LinkEvent::Sent => "sent",
            LinkEvent::Received => "received",
        }
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 추가 전용 이벤트 로그. 파일이 없으면 아무것도 하지 않는다.
#[derive(Debug)]
pub struct EventLog {
    file: Option<Mutex<File>>,
}

impl EventLog {
    /// 기록하지 않는 로그
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// `path` 를 새로 만들어(기존 내용 삭제) 기록
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    /// 경로가 있으면 [`EventLog::create`], 없으면 [`EventLog::disabled`]
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::create(path),
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// 현재 시각으로 이벤트 한 줄 기록
    pub fn record(&self, id: u16, event: LinkEvent) {
        let Some(file) = &self.file else {
            return;
        };

        let line = format_record(epoch_secs(), id, event);
        let mut file = file.lock();
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            warn!("이벤트 로그 기록 실패: {}", e);
        }
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn format_record(timestamp: f64, id: u16, event: LinkEvent) -> String {
    format!("{:.6} {} {}\n", timestamp, id, event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_format() {
        assert_eq!(
            format_record(1700000000.5, 3, LinkEvent::Sending),
            "1700000000.500000 3 sending\n"
        );
    }

    #[test]
    fn test_disabled_log_is_noop() {
        let log = EventLog::open(None).unwrap();
        assert!(!log.is_enabled());
        log.record(1, LinkEvent::Added);
    }

    #[test]
    fn test_concurrent_writes_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.log");
        let log = Arc::new(EventLog::create(&path).unwrap());

        let handles: Vec<_> = (0..4u16)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50u16 {
                        log.record(t * 100 + i, LinkEvent::Added);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 200);

        for line in lines {
            let fields: Vec<&str> = line.split(' ').collect();
            assert_eq!(fields.len(), 3);
            assert!(fields[0].parse::<f64>().is_ok());
            assert!(fields[1].parse::<u16>().is_ok());
            assert_eq!(fields[2], "added");
        }
    }
}
