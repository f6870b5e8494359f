use super::*;
use crate::analyzer::BurnSummary;
use crate::app::BurnRig;
use crate::config::{BurnCamConfig, NetworkConfig, SerialConfig};
use crate::events::{CompletionReason, RigEvent};
use crate::protocol::{ProtocolController, RigControl};

use serde_json::Value;
use std::ffi::CStr;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::FromRawFd;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn idle_rig() -> (TempDir, BurnRig) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BurnCamConfig::default();
    config.capture.folder = dir.path().join("capture").to_string_lossy().to_string();
    (dir, BurnRig::new(config))
}

fn controller_for(rig: &BurnRig, transport: &'static str) -> ProtocolController {
    ProtocolController::new(Arc::new(rig.clone()) as Arc<dyn RigControl>, transport)
}

#[test]
fn test_line_buffer_splits_and_trims() {
    let mut buffer = LineBuffer::new();
    assert!(buffer.push(b"STA").is_empty());
    assert_eq!(buffer.push(b"TUS\r\n\nstop\n"), vec!["STATUS", "stop"]);
    assert_eq!(buffer.push(b"  RESET  \nSTART:1"), vec!["RESET"]);
    assert_eq!(buffer.push(b"0\n"), vec!["START:10"]);
}

#[test]
fn test_line_buffer_discards_runaway_input() {
    let mut buffer = LineBuffer::new();
    assert!(buffer.push(&[b'x'; 2000]).is_empty());
    assert_eq!(buffer.push(b"STOP\n"), vec!["STOP"]);
}

#[test]
fn test_baud_rates() {
    assert_eq!(baud_rate_constant(9600), Some(libc::B9600));
    assert_eq!(baud_rate_constant(115200), Some(libc::B115200));
    assert_eq!(baud_rate_constant(12345), None);

    for &rate in crate::config::SUPPORTED_BAUD_RATES {
        assert!(baud_rate_constant(rate).is_some());
    }
}

#[test]
fn test_push_notifications() {
    let completed = RigEvent::RunCompleted {
        run_id: Uuid::new_v4(),
        reason: CompletionReason::AutoStop,
        summary: BurnSummary {
            total_frames: 12,
            ..BurnSummary::default()
        },
    };
    let line = push_notification(&completed).unwrap();
    assert!(line
        .to_line()
        .starts_with("{\"status\":\"complete\",\"type\":\"final_results\",\"total_frames\":12"));

    let failed = RigEvent::RunFailed {
        run_id: Uuid::new_v4(),
        message: "Capture failed".to_string(),
    };
    assert_eq!(
        push_notification(&failed).unwrap().to_line(),
        "{\"status\":\"error\",\"message\":\"Capture failed\"}\n"
    );

    assert!(push_notification(&RigEvent::AutoStopRequested { frame_number: 3 }).is_none());
}

#[tokio::test]
async fn test_tcp_one_response_per_line() {
    let (_dir, rig) = idle_rig();
    let config = NetworkConfig {
        enabled: true,
        ip: "127.0.0.1".to_string(),
        port: 0,
        max_connections: 2,
    };
    let transport = TcpTransport::bind(&config, controller_for(&rig, "tcp"))
        .await
        .unwrap();
    let address = transport.local_addr().unwrap();
    assert_eq!(transport.name(), "tcp");

    let cancel = CancellationToken::new();
    let server = tokio::spawn({
        let cancel = cancel.clone();
        async move { transport.serve(cancel).await }
    });

    let mut first = tokio::net::TcpStream::connect(address).await.unwrap();
    let second = tokio::net::TcpStream::connect(address).await.unwrap();

    first
        .write_all(b"status\n\nFIRESTATUS\nlaunch\n")
        .await
        .unwrap();
    let (reader, _writer) = first.split();
    let mut lines = tokio::io::BufReader::new(reader).lines();

    let status: Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(status["status"], "idle");
    assert_eq!(status["state"], "idle");
    assert_eq!(status["is_capturing"], false);

    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        "{\"status\":\"false\"}"
    );
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        "{\"status\":\"error\",\"message\":\"Unknown command: LAUNCH\"}"
    );

    // Connections are independent
    let (reader, mut writer) = second.into_split();
    writer.write_all(b"RESULTS\n").await.unwrap();
    let mut lines = tokio::io::BufReader::new(reader).lines();
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        "{\"status\":\"idle\",\"message\":\"No results available\"}"
    );

    cancel.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tcp_answers_invalid_utf8_and_runaway_lines() {
    let (_dir, rig) = idle_rig();
    let config = NetworkConfig {
        enabled: true,
        ip: "127.0.0.1".to_string(),
        port: 0,
        max_connections: 1,
    };
    let transport = TcpTransport::bind(&config, controller_for(&rig, "tcp"))
        .await
        .unwrap();
    let address = transport.local_addr().unwrap();

    let cancel = CancellationToken::new();
    let server = tokio::spawn({
        let cancel = cancel.clone();
        async move { transport.serve(cancel).await }
    });

    let stream = tokio::net::TcpStream::connect(address).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(reader).lines();

    writer.write_all(b"ST\xffTUS\nSTATUS\n").await.unwrap();

    let garbled: Value = serde_json::from_str(
        &tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(garbled["status"], "error");
    assert!(garbled["message"]
        .as_str()
        .unwrap()
        .starts_with("Unknown command: ST"));

    let status: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(status["status"], "idle");

    // An endless line is discarded without dropping the connection
    writer.write_all(&[b'x'; 4096]).await.unwrap();
    writer.write_all(b"\nFIRESTATUS\n").await.unwrap();
    let mut answers = Vec::new();
    while answers.last().map(String::as_str) != Some("{\"status\":\"false\"}") {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        answers.push(line);
    }
    assert!(answers.len() <= 2);

    cancel.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tcp_bind_failure() {
    let (_dir, rig) = idle_rig();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = NetworkConfig {
        enabled: true,
        ip: "127.0.0.1".to_string(),
        port: occupied.local_addr().unwrap().port(),
        max_connections: 1,
    };

    let result = TcpTransport::bind(&config, controller_for(&rig, "tcp")).await;
    assert!(matches!(
        result,
        Err(crate::error::BurnCamError::Transport(
            crate::error::TransportError::BindFailed { .. }
        ))
    ));
}

/// Pseudo-terminal pair: the master end plus the path of the slave device
fn open_pty() -> (File, String) {
    // SAFETY: plain libc calls on a descriptor we own; ptsname_r writes into our buffer
    unsafe {
        let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
        assert!(fd >= 0, "posix_openpt failed");
        assert_eq!(libc::grantpt(fd), 0);
        assert_eq!(libc::unlockpt(fd), 0);

        let mut name = [0 as libc::c_char; 128];
        assert_eq!(libc::ptsname_r(fd, name.as_mut_ptr(), name.len()), 0);
        let path = CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned();

        (File::from_raw_fd(fd), path)
    }
}

async fn next_line(received: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_serial_over_pty() {
    let (_dir, rig) = idle_rig();
    let (master, slave) = open_pty();

    let config = SerialConfig {
        enabled: true,
        device: slave.clone(),
        baud_rate: 9600,
        poll_interval_ms: 10,
        push_notifications: true,
    };
    let transport = SerialTransport::open(&config, controller_for(&rig, "serial"), rig.event_bus())
        .unwrap();
    assert_eq!(transport.name(), "serial");

    let cancel = CancellationToken::new();
    let server = tokio::spawn({
        let cancel = cancel.clone();
        async move { transport.serve(cancel).await }
    });

    let mut writer = master.try_clone().unwrap();
    let (sender, mut received) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in BufReader::new(master).lines() {
            match line {
                Ok(line) => {
                    if sender.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    assert_eq!(next_line(&mut received).await, "{\"status\":\"idle\",\"state\":\"idle\"}");

    writer.write_all(b"FIRESTATUS\n").unwrap();
    assert_eq!(next_line(&mut received).await, "{\"status\":\"false\"}");

    rig.event_bus().emit(RigEvent::RunFailed {
        run_id: Uuid::new_v4(),
        message: "Capture failed".to_string(),
    });
    assert_eq!(
        next_line(&mut received).await,
        "{\"status\":\"error\",\"message\":\"Capture failed\"}"
    );

    cancel.cancel();
    server.await.unwrap().unwrap();
}

#[test]
fn test_serial_open_missing_device() {
    let (_dir, rig) = idle_rig();
    let config = SerialConfig {
        enabled: true,
        device: "/nonexistent/ttyS99".to_string(),
        baud_rate: 9600,
        poll_interval_ms: 10,
        push_notifications: false,
    };

    let result = SerialTransport::open(&config, controller_for(&rig, "serial"), rig.event_bus());
    assert!(matches!(
        result,
        Err(crate::error::BurnCamError::Transport(
            crate::error::TransportError::SerialOpen { .. }
        ))
    ));
}
