//! vlink 소스 - 에뮬레이션 링크 위로 짧은 메시지 두 개를 보낸다
//!
//! 소켓 두 개 (포트 1 -> 1, 2 -> 2) 를 열고 "hello 2", "hello 1" 순서로 전송한 뒤
//! 링크가 조용해질 때까지 기다린다.
//!
//! 사용법:
//!   cargo run --release --bin vlink-source -- [OPTIONS]
//!
//! 예시:
//!   # 기본 (localhost:5000 -> localhost:4000, 1 Mbps, 100ms)
//!   cargo run --release --bin vlink-source
//!
//!   # 지연 50ms, 이벤트 로그 기록
//!   cargo run --release --bin vlink-source -- --delay 50 --log source.log -v

use tracing::{info, warn};

use vlink::harness::{self, Command, SOURCE_FROM, SOURCE_TO};
use vlink::TransportSocket;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = match harness::parse_args(std::env::args().skip(1), SOURCE_FROM, SOURCE_TO)? {
        Command::Run(options) => options,
        Command::Help => {
            println!("{}", harness::usage("vlink-source", SOURCE_FROM, SOURCE_TO));
            return Ok(());
        }
    };

    harness::init_logging(options.verbose)?;
    info!("vlink source starting...");

    let (link, transport) = harness::start_endpoint(&options)?;

    let socket1 = TransportSocket::bind(&transport, options.socket.clone(), 1, 1)?;
    let socket2 = TransportSocket::bind(&transport, options.socket.clone(), 2, 2)?;

    for (socket, message) in [(&socket2, "hello 2"), (&socket1, "hello 1")] {
        let report = socket.send_message(message.as_bytes())?;
        if report.is_complete() {
            info!("port {}: {:?} 전송 완료", socket.source_port(), message);
        } else {
            warn!(
                "port {}: {:?} 일부만 전달됨 ({}/{} bytes)",
                socket.source_port(),
                message,
                report.acked_bytes,
                report.total_bytes
            );
        }
    }

    // 링크가 조용해질 때까지 대기
    link.idle();

    if options.verbose {
        info!("link stats: {}", link.stats().summary());
    }
    info!("vlink source done");
    Ok(())
}
