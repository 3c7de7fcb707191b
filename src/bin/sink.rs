//! vlink 싱크 - 소스가 보내는 메시지를 받는다
//!
//! 소스와 같은 포트 쌍 (1 -> 1, 2 -> 2) 에 바인딩하고 두 소켓에서 동시에
//! 메시지 하나씩 받은 뒤 링크가 조용해질 때까지 기다린다.
//!
//! 사용법:
//!   cargo run --release --bin vlink-sink -- [OPTIONS]
//!
//! 예시:
//!   # 기본 (localhost:4000 -> localhost:5000)
//!   cargo run --release --bin vlink-sink
//!
//!   # 소스보다 먼저 띄우고 통계 출력
//!   cargo run --release --bin vlink-sink -- --verbose

use std::thread;

use tracing::{error, info, warn};

use vlink::harness::{self, Command, SINK_FROM, SINK_TO};
use vlink::TransportSocket;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = match harness::parse_args(std::env::args().skip(1), SINK_FROM, SINK_TO)? {
        Command::Run(options) => options,
        Command::Help => {
            println!("{}", harness::usage("vlink-sink", SINK_FROM, SINK_TO));
            return Ok(());
        }
    };

    harness::init_logging(options.verbose)?;
    info!("vlink sink starting...");

    let (link, transport) = harness::start_endpoint(&options)?;

    let socket1 = TransportSocket::bind(&transport, options.socket.clone(), 1, 1)?;
    let socket2 = TransportSocket::bind(&transport, options.socket.clone(), 2, 2)?;

    thread::scope(|scope| {
        for socket in [&socket1, &socket2] {
            let transport = &transport;
            scope.spawn(move || match harness::receive_message(socket, transport) {
                Ok(Some(message)) => info!(
                    "port {}: {:?}",
                    socket.source_port(),
                    String::from_utf8_lossy(&message)
                ),
                Ok(None) => warn!("port {}: 메시지 없이 종료", socket.source_port()),
                Err(e) => error!("port {}: 수신 실패: {}", socket.source_port(), e),
            });
        }
    });

    link.idle();

    if options.verbose {
        info!("link stats: {}", link.stats().summary());
    }
    info!("vlink sink done");
    Ok(())
}
