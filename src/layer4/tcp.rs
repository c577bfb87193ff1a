use std::net::Ipv4Addr;

use anyhow::ensure;
use bit_field::BitField;
use bytes::{BufMut, Bytes, BytesMut};

use crate::layer3::ipv4::Ipv4Protocol;

pub const TCP_HEADER_SIZE_MINIMAL_BYTES: usize = 20;

// Checksum input defined by RFC 793: the pseudo-header binds the segment to
// the addresses and protocol it travels under. Never transmitted.
fn calc_pseudo_header_checksum(source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut bm = BytesMut::new();
    bm.put_slice(&source.octets());
    bm.put_slice(&destination.octets());
    bm.put_u8(0);
    bm.put_u8(Ipv4Protocol::Tcp as u8);
    bm.put_u16(segment.len() as u16);
    bm.put_slice(segment);
    crate::common::calc_checksum(&bm.freeze())
}

// Ref: https://datatracker.ietf.org/doc/html/rfc793
#[derive(Debug, Default, PartialEq, Clone)]
pub struct TcpPacket {
    bytes: Bytes,
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct TcpPacketMut {
    bytes: BytesMut,
}

#[allow(dead_code)]
impl TcpPacket {
    pub fn from_bytes(bytes: &Bytes) -> anyhow::Result<Self> {
        ensure!(
            bytes.len() >= TCP_HEADER_SIZE_MINIMAL_BYTES,
            "TCP segment is shorter than the minimal header."
        );
        Ok(Self {
            bytes: bytes.clone(),
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    crate::impl_get!(get_source_port, bytes, 0, 2, u16);
    crate::impl_get!(get_destination_port, bytes, 2, 4, u16);
    crate::impl_get!(get_sequence_number, bytes, 4, 8, u32);
    crate::impl_get!(get_ack_number, bytes, 8, 12, u32);
    crate::impl_get_bit!(get_ns_bit, bytes, 12, 0);
    crate::impl_get_bit!(get_cwr_bit, bytes, 13, 7);
    crate::impl_get_bit!(get_ece_bit, bytes, 13, 6);
    crate::impl_get_bit!(get_urg_bit, bytes, 13, 5);
    crate::impl_get_bit!(get_ack_bit, bytes, 13, 4);
    crate::impl_get_bit!(get_psh_bit, bytes, 13, 3);
    crate::impl_get_bit!(get_rst_bit, bytes, 13, 2);
    crate::impl_get_bit!(get_syn_bit, bytes, 13, 1);
    crate::impl_get_bit!(get_fin_bit, bytes, 13, 0);
    crate::impl_get!(get_window_size, bytes, 14, 16, u16);
    crate::impl_get!(get_checksum, bytes, 16, 18, u16);
    crate::impl_get!(get_urgent_pointer, bytes, 18, 20, u16);

    // Returns 4 bit data.
    fn get_header_length_raw(&self) -> u8 {
        self.bytes[12].get_bits(4..8)
    }

    pub fn get_header_length_bytes(&self) -> u8 {
        self.get_header_length_raw() * 4
    }

    // A segment whose stored checksum is correct validates to zero.
    pub fn calc_checksum(&self, source: Ipv4Addr, destination: Ipv4Addr) -> u16 {
        calc_pseudo_header_checksum(source, destination, &self.bytes)
    }
}

#[allow(dead_code)]
impl TcpPacketMut {
    pub fn minimal() -> Self {
        Self {
            bytes: BytesMut::zeroed(TCP_HEADER_SIZE_MINIMAL_BYTES),
        }
    }

    pub fn convert_to_tcp_packet(&self) -> TcpPacket {
        TcpPacket {
            bytes: self.bytes.clone().freeze(),
        }
    }

    crate::impl_set!(set_source_port, bytes, 0, 2, u16);
    crate::impl_set!(set_destination_port, bytes, 2, 4, u16);
    crate::impl_set!(set_sequence_number, bytes, 4, 8, u32);
    crate::impl_set!(set_ack_number, bytes, 8, 12, u32);
    crate::impl_set_bit!(set_ns_bit, bytes, 12, 0);
    crate::impl_set_bit!(set_cwr_bit, bytes, 13, 7);
    crate::impl_set_bit!(set_ece_bit, bytes, 13, 6);
    crate::impl_set_bit!(set_urg_bit, bytes, 13, 5);
    crate::impl_set_bit!(set_ack_bit, bytes, 13, 4);
    crate::impl_set_bit!(set_psh_bit, bytes, 13, 3);
    crate::impl_set_bit!(set_rst_bit, bytes, 13, 2);
    crate::impl_set_bit!(set_syn_bit, bytes, 13, 1);
    crate::impl_set_bit!(set_fin_bit, bytes, 13, 0);
    crate::impl_set!(set_window_size, bytes, 14, 16, u16);
    crate::impl_set!(set_checksum, bytes, 16, 18, u16);
    crate::impl_set!(set_urgent_pointer, bytes, 18, 20, u16);

    // Input: 4 bit data. Number of words.
    fn set_header_length_raw(&mut self, value: u8) -> &mut Self {
        debug_assert!((5..=15).contains(&value), "Invalid TCP header len: {value}");
        self.bytes[12].set_bits(4..8, value & 0b1111);
        self
    }

    pub fn set_header_length_bytes(&mut self, value: u8) -> &mut Self {
        debug_assert_eq!(value % 4, 0, "Value is not multiple of word.");
        self.set_header_length_raw(value / 4);
        self
    }

    fn calc_checksum(&self, source: Ipv4Addr, destination: Ipv4Addr) -> u16 {
        calc_pseudo_header_checksum(source, destination, &self.bytes)
    }

    pub fn calc_and_set_checksum(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
    ) -> &mut Self {
        self.set_checksum(0);
        let checksum = self.calc_checksum(source, destination);
        self.set_checksum(checksum);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DESTINATION: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn sample_syn() -> TcpPacketMut {
        let mut pkt = TcpPacketMut::minimal();
        pkt.set_source_port(3313)
            .set_destination_port(80)
            .set_sequence_number(0)
            .set_ack_number(0)
            .set_header_length_bytes(20)
            .set_syn_bit(true)
            .set_window_size(5840)
            .set_urgent_pointer(0)
            .calc_and_set_checksum(SOURCE, DESTINATION);
        pkt
    }

    #[test]
    fn test_syn_is_the_only_flag() {
        let pkt = sample_syn().convert_to_tcp_packet();
        assert!(pkt.get_syn_bit());
        assert!(!pkt.get_ns_bit());
        assert!(!pkt.get_cwr_bit());
        assert!(!pkt.get_ece_bit());
        assert!(!pkt.get_urg_bit());
        assert!(!pkt.get_ack_bit());
        assert!(!pkt.get_psh_bit());
        assert!(!pkt.get_rst_bit());
        assert!(!pkt.get_fin_bit());
    }

    #[test]
    fn test_checksum_validates_against_pseudo_header() {
        let pkt = sample_syn().convert_to_tcp_packet();
        assert_ne!(pkt.get_checksum(), 0);
        assert_eq!(pkt.calc_checksum(SOURCE, DESTINATION), 0);
    }

    #[test]
    fn test_checksum_recompute_matches_stored_value() {
        let pkt = sample_syn();
        let stored = pkt.convert_to_tcp_packet().get_checksum();
        let mut zeroed = pkt.clone();
        zeroed.set_checksum(0);
        assert_eq!(zeroed.calc_checksum(SOURCE, DESTINATION), stored);
    }

    #[test]
    fn test_checksum_binds_the_addresses() {
        let pkt = sample_syn().convert_to_tcp_packet();
        let elsewhere = Ipv4Addr::new(192, 168, 1, 1);
        assert_ne!(pkt.calc_checksum(SOURCE, elsewhere), 0);
    }

    #[test]
    fn test_header_fields_round_trip() {
        let pkt = sample_syn().convert_to_tcp_packet();
        let decoded = TcpPacket::from_bytes(&pkt.to_bytes()).unwrap();
        assert_eq!(decoded.get_source_port(), 3313);
        assert_eq!(decoded.get_destination_port(), 80);
        assert_eq!(decoded.get_sequence_number(), 0);
        assert_eq!(decoded.get_ack_number(), 0);
        assert_eq!(decoded.get_header_length_bytes(), 20);
        assert_eq!(decoded.get_window_size(), 5840);
        assert_eq!(decoded.get_urgent_pointer(), 0);
    }

    #[test]
    fn test_from_bytes_rejects_short_input() {
        let bytes = Bytes::from_static(&[0u8; 8]);
        assert!(TcpPacket::from_bytes(&bytes).is_err());
    }
}
