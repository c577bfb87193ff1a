use std::net::Ipv4Addr;

use anyhow::ensure;
use bit_field::BitField;
use bytes::{Bytes, BytesMut};
use num_traits::FromPrimitive;

use crate::common::calc_checksum;

pub const IPV4_HEADER_LEN: usize = 20;

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive,
)]
#[repr(u8)]
pub enum Ipv4Protocol {
    Tcp = 0x06,
    #[default]
    Invalid = 0xff,
}

// Ref: https://datatracker.ietf.org/doc/html/rfc791
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Ipv4Packet {
    header: Bytes,
    payload: Bytes,
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct Ipv4PacketMut {
    header: BytesMut,
    payload: Bytes,
}

#[allow(dead_code)]
impl Ipv4Packet {
    pub fn from_bytes(bytes: &Bytes) -> anyhow::Result<Self> {
        ensure!(
            bytes.len() >= IPV4_HEADER_LEN,
            "IPv4 packet is shorter than its header."
        );
        let mut header = bytes.clone();
        let payload = header.split_off(IPV4_HEADER_LEN);
        Ok(Self { header, payload })
    }

    crate::impl_get!(get_total_length, header, 2, 4, u16);
    crate::impl_get!(get_identification, header, 4, 6, u16);
    crate::impl_get!(get_flags, header, 6, 8, u16);
    crate::impl_get!(get_time_to_live, header, 8, 9, u8);
    crate::impl_get!(get_protocol_u8, header, 9, 10, u8);
    crate::impl_get!(get_header_checksum, header, 10, 12, u16);
    crate::impl_get_slice!(get_source_address_slice, header, 12, 16, [u8; 4]);
    crate::impl_get_slice!(get_destination_address_slice, header, 16, 20, [u8; 4]);

    pub fn get_version(&self) -> u8 {
        self.header[0].get_bits(4..8)
    }

    pub fn get_header_length_bytes(&self) -> u8 {
        self.header[0].get_bits(0..4) * 4
    }

    pub fn get_protocol(&self) -> Ipv4Protocol {
        Ipv4Protocol::from_u8(self.get_protocol_u8()).unwrap_or_default()
    }

    pub fn get_source_address(&self) -> Ipv4Addr {
        self.get_source_address_slice().into()
    }

    pub fn get_destination_address(&self) -> Ipv4Addr {
        self.get_destination_address_slice().into()
    }

    pub fn get_payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut res = BytesMut::new();
        res.extend_from_slice(&self.header);
        res.extend_from_slice(&self.payload);
        res.freeze()
    }

    // A header whose stored checksum is correct sums to zero.
    pub fn calc_header_checksum(&self) -> u16 {
        calc_checksum(&self.header)
    }
}

impl Ipv4PacketMut {
    pub fn minimal() -> Self {
        let mut ipv4_pkt = Self {
            header: BytesMut::zeroed(IPV4_HEADER_LEN),
            payload: Bytes::new(),
        };
        ipv4_pkt.set_version_and_header_len(0b0100_0101);
        ipv4_pkt
    }

    crate::impl_set!(set_version_and_header_len, header, 0, 1, u8);
    crate::impl_set!(set_type_of_service, header, 1, 2, u8);
    crate::impl_set!(set_total_length, header, 2, 4, u16);
    crate::impl_set!(set_identification, header, 4, 6, u16);
    crate::impl_set!(set_flags, header, 6, 8, u16);
    crate::impl_set!(set_time_to_live, header, 8, 9, u8);
    crate::impl_set!(set_protocol_u8, header, 9, 10, u8);
    crate::impl_set!(set_header_checksum, header, 10, 12, u16);
    crate::impl_set_slice!(set_source_address_slice, header, 12, 16, [u8; 4]);
    crate::impl_set_slice!(set_destination_address_slice, header, 16, 20, [u8; 4]);

    pub fn set_protocol(&mut self, protocol: Ipv4Protocol) -> &mut Self {
        self.set_protocol_u8(protocol as u8)
    }

    pub fn set_payload(&mut self, payload: &Bytes) -> &mut Self {
        self.payload = payload.clone();
        self
    }

    // Fill total length and header checksum. The checksum field is zeroed
    // before its own computation.
    pub fn build(&mut self) {
        self.set_header_checksum(0);
        self.set_total_length((self.header.len() + self.payload.len()) as u16);
        let checksum = calc_checksum(&self.header);
        self.set_header_checksum(checksum);
    }

    pub fn convert_to_ipv4packet(&self) -> Ipv4Packet {
        Ipv4Packet {
            header: self.header.clone().freeze(),
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Ipv4PacketMut {
        let mut pkt = Ipv4PacketMut::minimal();
        pkt.set_identification(50000)
            .set_time_to_live(255)
            .set_protocol(Ipv4Protocol::Tcp)
            .set_source_address_slice([10, 0, 0, 1])
            .set_destination_address_slice([10, 0, 0, 2])
            .set_payload(&Bytes::from_static(&[0u8; 20]));
        pkt.build();
        pkt
    }

    #[test]
    fn test_build_fills_length_and_checksum() {
        let pkt = sample_packet().convert_to_ipv4packet();
        assert_eq!(pkt.get_total_length(), 40);
        assert_ne!(pkt.get_header_checksum(), 0);
        assert_eq!(pkt.calc_header_checksum(), 0);
    }

    #[test]
    fn test_header_fields_round_trip() {
        let bytes = sample_packet().convert_to_ipv4packet().to_bytes();
        let pkt = Ipv4Packet::from_bytes(&bytes).unwrap();
        assert_eq!(pkt.get_version(), 4);
        assert_eq!(pkt.get_header_length_bytes(), 20);
        assert_eq!(pkt.get_identification(), 50000);
        assert_eq!(pkt.get_flags(), 0);
        assert_eq!(pkt.get_time_to_live(), 255);
        assert_eq!(pkt.get_protocol(), Ipv4Protocol::Tcp);
        assert_eq!(pkt.get_source_address(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(pkt.get_destination_address(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(pkt.get_payload().len(), 20);
    }

    #[test]
    fn test_from_bytes_rejects_short_input() {
        let bytes = Bytes::from_static(&[0u8; 19]);
        assert!(Ipv4Packet::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_unknown_protocol_number_decodes_as_invalid() {
        let mut pkt = sample_packet();
        pkt.set_protocol_u8(0x11);
        assert_eq!(
            pkt.convert_to_ipv4packet().get_protocol(),
            Ipv4Protocol::Invalid
        );
    }
}
