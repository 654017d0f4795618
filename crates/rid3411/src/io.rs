//! MAVLink byte transport over TCP or UDP, adapted to the core's
//! non-blocking [`SerialPort`] trait.
//!
//! Background tasks own the socket; the node-side handle drains an
//! unbounded channel on `read` and pushes writes back the same way.

use rs3411::mavlink::SerialPort;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct SocketSerial {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: Vec<u8>,
}

impl SerialPort for SocketSerial {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.pending.is_empty() {
            match self.rx.try_recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return 0,
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }

    fn write(&mut self, data: &[u8]) {
        let _ = self.tx.send(data.to_vec());
    }
}

pub async fn connect_tcp(addr: &str) -> std::io::Result<SocketSerial> {
    let stream = TcpStream::connect(addr).await?;
    info!(addr, "connected to flight controller over TCP");
    let (mut reader, mut writer) = stream.into_split();

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    error!("TCP peer closed the connection");
                    break;
                }
                Ok(n) => {
                    if in_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(%err, "TCP read failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(chunk) = out_rx.recv().await {
            if writer.write_all(&chunk).await.is_err() {
                error!("TCP write failed");
                break;
            }
        }
    });

    Ok(SocketSerial {
        rx: in_rx,
        tx: out_tx,
        pending: Vec::new(),
    })
}

pub async fn bind_udp(addr: &str) -> std::io::Result<SocketSerial> {
    let socket = UdpSocket::bind(addr).await?;
    info!(addr, "listening for flight controller over UDP");

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let socket = std::sync::Arc::new(socket);
    let rx_socket = socket.clone();
    // reply to whoever spoke to us last
    let peer = std::sync::Arc::new(tokio::sync::Mutex::new(None));
    let rx_peer = peer.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            match rx_socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    *rx_peer.lock().await = Some(from);
                    if in_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(%err, "UDP receive failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(chunk) = out_rx.recv().await {
            let target = *peer.lock().await;
            if let Some(target) = target {
                if socket.send_to(&chunk, target).await.is_err() {
                    error!("UDP send failed");
                }
            }
        }
    });

    Ok(SocketSerial {
        rx: in_rx,
        tx: out_tx,
        pending: Vec::new(),
    })
}
