use super::{LineBuffer, Transport};
use crate::config::SerialConfig;
use crate::error::{EventBusError, Result, TransportError};
use crate::events::{EventBus, EventFilter, EventReceiver, RigEvent};
use crate::protocol::{ProtocolController, ProtocolState, Response};

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Back-off while the output buffer of the line is full
const WRITE_RETRY: Duration = Duration::from_millis(5);

/// termios speed constant for a supported line speed
pub fn baud_rate_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        _ => return None,
    };
    Some(speed)
}

/// Unsolicited line pushed to the serial controller for a rig event
pub fn push_notification(event: &RigEvent) -> Option<Response> {
    match event {
        RigEvent::RunCompleted { summary, .. } => Some(
            Response::new("complete")
                .with("type", "final_results")
                .merge(summary),
        ),
        RigEvent::RunFailed { message, .. } => Some(Response::error(message.clone())),
        _ => None,
    }
}

/// Half-duplex serial link, polled for input between short sleeps
pub struct SerialTransport {
    device: String,
    port: File,
    controller: ProtocolController,
    poll_interval: Duration,
    push_bus: Option<EventBus>,
}

impl SerialTransport {
    /// Open and configure the device as a raw 8N1 line
    pub fn open(
        config: &SerialConfig,
        controller: ProtocolController,
        event_bus: &EventBus,
    ) -> Result<Self> {
        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&config.device)
            .map_err(|source| TransportError::SerialOpen {
                device: config.device.clone(),
                source,
            })?;

        configure_port(&port, &config.device, config.baud_rate)?;
        info!(
            "Serial transport on {} at {} baud",
            config.device, config.baud_rate
        );

        Ok(Self {
            device: config.device.clone(),
            port,
            controller,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            push_bus: config.push_notifications.then(|| event_bus.clone()),
        })
    }

    async fn send(&self, response: &Response) {
        let line = response.to_line();
        match self.write_all(line.as_bytes()).await {
            Ok(()) => debug!("[serial] Sent: {}", line.trim_end()),
            Err(e) => error!("Serial write to {} failed: {}", self.device, e),
        }
    }

    async fn write_all(&self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match (&self.port).write(bytes) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => bytes = &bytes[written..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(WRITE_RETRY).await;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drain whatever the line has buffered without blocking
    fn read_available(&self, lines: &mut LineBuffer) -> Vec<String> {
        let mut complete = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            match (&self.port).read(&mut buf) {
                Ok(0) => break,
                Ok(read) => complete.extend(lines.push(&buf[..read])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Serial read from {} failed: {}", self.device, e);
                    break;
                }
            }
        }

        complete
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &'static str {
        "serial"
    }

    async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        let mut push = self.push_bus.as_ref().map(|bus| {
            EventReceiver::new(
                bus.subscribe(),
                EventFilter::EventTypes(vec!["run_completed", "run_failed"]),
                "serial-push",
            )
        });

        let idle = ProtocolState::Idle.as_str();
        self.send(&Response::new(idle).with("state", idle)).await;

        let mut lines = LineBuffer::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = next_push(&mut push) => match event {
                    Ok(event) => {
                        if let Some(response) = push_notification(&event) {
                            self.send(&response).await;
                        }
                    }
                    Err(EventBusError::Lagged { .. }) => {}
                    Err(_) => push = None,
                },
                _ = tokio::time::sleep(self.poll_interval) => {
                    for line in self.read_available(&mut lines) {
                        debug!("[serial] Received: {}", line);
                        let response = self.controller.handle_line(&line).await;
                        self.send(&response).await;
                    }
                }
            }
        }

        info!("Serial transport stopped");
        Ok(())
    }
}

async fn next_push(push: &mut Option<EventReceiver>) -> std::result::Result<RigEvent, EventBusError> {
    match push {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn configure_port(port: &File, device: &str, baud: u32) -> std::result::Result<(), TransportError> {
    let configure_error = |details: String| TransportError::SerialConfigure {
        device: device.to_string(),
        details,
    };

    let speed = baud_rate_constant(baud)
        .ok_or_else(|| configure_error(format!("unsupported baud rate {}", baud)))?;
    let fd = port.as_raw_fd();

    // SAFETY: termios is plain old data and fd stays open for the duration of the calls
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(configure_error(io::Error::last_os_error().to_string()));
        }

        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB);

        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(configure_error(io::Error::last_os_error().to_string()));
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(configure_error(io::Error::last_os_error().to_string()));
        }
        libc::tcflush(fd, libc::TCIOFLUSH);
    }

    Ok(())
}
