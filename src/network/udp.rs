//! UDP broadcast emulation of the radio
//!
//! Lets nodes on one LAN segment talk as if they shared the air. Every
//! transmission is a broadcast datagram; stations filter by channel and
//! drop their own echoes, and the link layer filters by destination.
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────────────────┐
//! │ Byte 0   │ Byte 1-6         │ Byte 7..N            │
//! │ Channel  │ Source MAC       │ Encoded packet       │
//! └──────────┴──────────────────┴──────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{MAX_CHANNEL, MIN_CHANNEL, RADIO_MTU};
use crate::error::RadioError;
use crate::network::radio::{InboundQueue, Radio, RawFrame};
use crate::protocol::{Destination, MacAddress};

const DATAGRAM_HEADER_LEN: usize = 7;

pub struct UdpRadio {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    address: MacAddress,
    channel: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl UdpRadio {
    /// Bind the broadcast socket on `port`
    pub fn bind(address: MacAddress, port: u16, channel: u8) -> Result<Self, RadioError> {
        let io = |e: std::io::Error| RadioError::Io(e.to_string());

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(io)?;
        socket.set_reuse_address(true).map_err(io)?;
        // Several nodes on one host share the port
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(io)?;
        socket.set_broadcast(true).map_err(io)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(io)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&bind_addr.into()).map_err(io)?;

        tracing::info!("UDP radio {} bound on port {}", address, port);

        Ok(Self {
            socket: Arc::new(socket.into()),
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port)),
            address,
            channel: Arc::new(AtomicU8::new(channel)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }

    fn receive_loop(
        socket: Arc<UdpSocket>,
        local: MacAddress,
        channel: Arc<AtomicU8>,
        running: Arc<AtomicBool>,
        inbound: InboundQueue,
    ) {
        let mut buf = [0u8; DATAGRAM_HEADER_LEN + RADIO_MTU + 64];
        while running.load(Ordering::Relaxed) {
            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    tracing::error!("UDP radio receive failed: {}", e);
                    break;
                }
            };

            if len < DATAGRAM_HEADER_LEN {
                tracing::trace!("Ignoring {}-byte datagram", len);
                continue;
            }
            if buf[0] != channel.load(Ordering::Relaxed) {
                continue;
            }
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&buf[1..DATAGRAM_HEADER_LEN]);
            let source = MacAddress::new(mac);
            if source == local {
                continue;
            }

            inbound.deliver(RawFrame {
                source,
                data: Bytes::copy_from_slice(&buf[DATAGRAM_HEADER_LEN..len]),
            });
        }
        tracing::debug!("UDP radio receive loop stopped");
    }
}

impl Radio for UdpRadio {
    fn transmit(&mut self, frame: &[u8], _destination: Destination) -> Result<(), RadioError> {
        let mut datagram = BytesMut::with_capacity(DATAGRAM_HEADER_LEN + frame.len());
        datagram.put_u8(self.channel.load(Ordering::Relaxed));
        datagram.put_slice(&self.address.octets());
        datagram.put_slice(frame);

        match self.socket.send_to(&datagram, self.target) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(RadioError::Busy),
            Err(e) => Err(RadioError::Io(e.to_string())),
        }
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            return Err(RadioError::UnsupportedChannel(channel));
        }
        self.channel.store(channel, Ordering::Relaxed);
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed)
    }

    fn local_address(&self) -> MacAddress {
        self.address
    }

    fn attach(&mut self, inbound: InboundQueue) -> Result<(), RadioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let socket = self.socket.clone();
        let local = self.address;
        let channel = self.channel.clone();
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("udp-radio-rx".into())
            .spawn(move || Self::receive_loop(socket, local, channel, running, inbound))
            .map_err(|e| RadioError::Io(e.to_string()))?;
        self.thread_handle = Some(handle);
        Ok(())
    }
}

impl Drop for UdpRadio {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
