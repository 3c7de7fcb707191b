//! source / sink 실행 파일 공용 부분
//!
//! 옵션 파싱, 로깅 초기화, 링크 + 전송 계층 기동.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{LinkConfig, SocketConfig};
use crate::link::Link;
use crate::socket::TransportSocket;
use crate::transport::Transport;
use crate::{Error, Result, POLL_INTERVAL};

/// source 기본 주소
pub const SOURCE_FROM: &str = "localhost:5000";
pub const SOURCE_TO: &str = "localhost:4000";

/// sink 기본 주소 (source 와 반대)
pub const SINK_FROM: &str = "localhost:4000";
pub const SINK_TO: &str = "localhost:5000";

/// 실행 옵션
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub link: LinkConfig,
    pub socket: SocketConfig,

    /// debug 로그 + 종료 시 링크 통계
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub enum Command {
    Run(HarnessOptions),
    Help,
}

/// 인자 파싱. `args` 에는 프로그램 이름을 빼고 넘긴다.
pub fn parse_args<I>(args: I, default_from: &str, default_to: &str) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();

    let mut from: Option<String> = None;
    let mut to: Option<String> = None;
    let mut link = LinkConfig::default();
    let mut socket = SocketConfig::default();
    let mut verbose = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--from" => from = Some(value(&arg, args.next())?),
            "--to" => to = Some(value(&arg, args.next())?),
            "--rate" => link.rate_mbps = number(&arg, args.next())?,
            "--delay" => link.delay_ms = number(&arg, args.next())?,
            "--size" => link.queue_size = number(&arg, args.next())?,
            "--tcp-size" => socket.buffer_size = number(&arg, args.next())?,
            "--log" => link.log_path = Some(PathBuf::from(value(&arg, args.next())?)),
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => return Ok(Command::Help),
            other => {
                return Err(Error::InvalidArgument(format!("알 수 없는 옵션: {}", other)));
            }
        }
    }

    link.local = resolve(from.as_deref().unwrap_or(default_from))?;
    link.remote = resolve(to.as_deref().unwrap_or(default_to))?;
    link.validate()?;
    socket.validate()?;

    Ok(Command::Run(HarnessOptions {
        link,
        socket,
        verbose,
    }))
}

fn value(flag: &str, next: Option<String>) -> Result<String> {
    next.ok_or_else(|| Error::InvalidArgument(format!("{} 에 값이 필요함", flag)))
}

fn number<T: std::str::FromStr>(flag: &str, next: Option<String>) -> Result<T> {
    let raw = value(flag, next)?;
    raw.parse()
        .map_err(|_| Error::InvalidArgument(format!("{}: 숫자가 아님: {}", flag, raw)))
}

/// `host:port` 해석. IPv4 주소를 우선한다.
pub fn resolve(addr: &str) -> Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|e| Error::InvalidArgument(format!("주소 해석 실패 {}: {}", addr, e)))?
        .collect();

    candidates
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| Error::InvalidArgument(format!("주소 없음: {}", addr)))
}

/// 도움말
pub fn usage(program: &str, default_from: &str, default_to: &str) -> String {
    format!(
        r#"{program} - vlink 에뮬레이션 링크 위의 신뢰 전송 데모

사용법:
  {program} [OPTIONS]

옵션:
  --from <HOST:PORT>    이쪽 UDP 주소 (기본: {default_from})
  --to <HOST:PORT>      반대쪽 UDP 주소 (기본: {default_to})
  --rate <Mbps>         링크 속도 (기본: 1.0)
  --delay <ms>          단방향 전파 지연 (기본: 100)
  --size <N>            링크 큐 크기, 패킷 수 (기본: 100)
  --tcp-size <N>        소켓 수신 버퍼 크기, 패킷 수 (기본: 100)
  --log <PATH>          링크 이벤트 로그 파일
  -v, --verbose         debug 로그 + 종료 시 링크 통계
  -h, --help            이 도움말 출력

예시:
  vlink-sink &
  vlink-source --delay 50 --log source.log
"#
    )
}

/// 전역 로거 설치. `RUST_LOG` 가 있으면 따르고, verbose 는 debug 로 고정.
pub fn init_logging(
    verbose: bool,
) -> std::result::Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

/// 링크를 열고 역다중화 루프를 시작한다.
///
/// 링크를 열지 못해도 멈추지 않는다 (오프라인 링크로 진행).
pub fn start_endpoint(options: &HarnessOptions) -> Result<(Arc<Link>, Arc<Transport>)> {
    let link = Arc::new(Link::new(options.link.clone()));
    let transport = Transport::new(link.clone());
    transport.start()?;

    info!(
        "endpoint ready: {} -> {} (connected: {})",
        link.local_addr(),
        link.remote_addr(),
        link.is_connected()
    );
    Ok((link, transport))
}

/// 메시지 하나가 완성될 때까지 폴링.
///
/// 역다중화 루프가 멈추면 (오프라인 링크, 디코드 실패) 더 받을 것이 없으므로
/// `None` 으로 끝난다.
pub fn receive_message(socket: &TransportSocket, transport: &Transport) -> Result<Option<Bytes>> {
    loop {
        if let Some(message) = socket.recv(POLL_INTERVAL)? {
            return Ok(Some(message));
        }
        if !transport.is_running() {
            warn!(
                "포트 {}: 역다중화 루프가 멈춰 수신 중단",
                socket.source_port()
            );
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentBuilder;
    use std::time::Instant;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn run_options(list: &[&str]) -> HarnessOptions {
        match parse_args(args(list), SOURCE_FROM, SOURCE_TO).unwrap() {
            Command::Run(options) => options,
            Command::Help => panic!("expected run"),
        }
    }

    #[test]
    fn test_defaults() {
        let options = run_options(&[]);

        assert_eq!(options.link.local, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(options.link.remote, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(options.link.rate_mbps, 1.0);
        assert_eq!(options.link.delay_ms, 100);
        assert_eq!(options.link.queue_size, 100);
        assert_eq!(options.socket.buffer_size, 100);
        assert!(options.link.log_path.is_none());
        assert!(!options.verbose);
    }

    #[test]
    fn test_sink_defaults_mirror_source() {
        let Command::Run(options) = parse_args(Vec::new(), SINK_FROM, SINK_TO).unwrap() else {
            panic!("expected run");
        };
        assert_eq!(options.link.local.port(), 4000);
        assert_eq!(options.link.remote.port(), 5000);
    }

    #[test]
    fn test_overrides() {
        let options = run_options(&[
            "--from",
            "127.0.0.1:7000",
            "--to",
            "127.0.0.1:7001",
            "--rate",
            "2.5",
            "--delay",
            "20",
            "--size",
            "8",
            "--tcp-size",
            "16",
            "--log",
            "events.log",
            "-v",
        ]);

        assert_eq!(options.link.local.port(), 7000);
        assert_eq!(options.link.remote.port(), 7001);
        assert_eq!(options.link.rate_mbps, 2.5);
        assert_eq!(options.link.delay_ms, 20);
        assert_eq!(options.link.queue_size, 8);
        assert_eq!(options.socket.buffer_size, 16);
        assert_eq!(options.link.log_path, Some(PathBuf::from("events.log")));
        assert!(options.verbose);
    }

    #[test]
    fn test_help() {
        assert!(matches!(
            parse_args(args(&["--delay", "5", "--help"]), SOURCE_FROM, SOURCE_TO),
            Ok(Command::Help)
        ));
        assert!(usage("vlink-source", SOURCE_FROM, SOURCE_TO).contains("--tcp-size"));
    }

    #[test]
    fn test_invalid_arguments() {
        let cases: &[&[&str]] = &[
            &["--bogus"],
            &["--delay"],
            &["--delay", "soon"],
            &["--from", "no-port-here"],
        ];
        for case in cases {
            assert!(
                matches!(
                    parse_args(args(case), SOURCE_FROM, SOURCE_TO),
                    Err(Error::InvalidArgument(_))
                ),
                "case {:?}",
                case
            );
        }
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        assert!(matches!(
            parse_args(args(&["--rate", "0"]), SOURCE_FROM, SOURCE_TO),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            parse_args(args(&["--tcp-size", "0"]), SOURCE_FROM, SOURCE_TO),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_resolve_prefers_ipv4() {
        assert!(resolve("localhost:4000").unwrap().is_ipv4());
        assert_eq!(
            resolve("[::1]:9000").unwrap(),
            "[::1]:9000".parse::<SocketAddr>().unwrap()
        );
    }

    fn stopped_transport() -> Arc<Transport> {
        let transport = Transport::new(Arc::new(Link::offline(LinkConfig::default())));
        transport.start().unwrap();
        transport
    }

    #[test]
    fn test_receive_gives_up_when_transport_stops() {
        let transport = stopped_transport();
        let socket = TransportSocket::bind(&transport, SocketConfig::default(), 1, 1).unwrap();

        let start = Instant::now();
        assert!(receive_message(&socket, &transport).unwrap().is_none());
        assert!(start.elapsed() < POLL_INTERVAL * 3);
    }

    #[test]
    fn test_receive_drains_buffered_message_first() {
        let transport = stopped_transport();
        let socket = TransportSocket::bind(&transport, SocketConfig::default(), 1, 1).unwrap();

        for segment in &SegmentBuilder::new(1, 1, 4).split(b"hello 1").unwrap() {
            transport.dispatch(segment.encode()).unwrap();
        }

        let message = receive_message(&socket, &transport).unwrap().unwrap();
        assert_eq!(message.as_ref(), b"hello 1");
    }
}
