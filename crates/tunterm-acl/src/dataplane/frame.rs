//! Builds VXLAN-in-IPv4 frames the way the redirect stage receives them.
//!
//! Layout: outer Ethernet, outer IPv4, UDP, VXLAN, inner Ethernet, inner
//! IPv4 or IPv6 header. Buffers handed to the node start at the VXLAN
//! header ([`VXLAN_OFFSET`]); the data itself still begins at the outer
//! Ethernet header.

use byteorder::{BigEndian, WriteBytesExt};
use tunterm_types::{AddressFamily, IpAddress};

use super::types::ETHERNET_HEADER_LEN;

const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const UDP_HEADER_LEN: usize = 8;

pub const VXLAN_UDP_PORT: u16 = 4789;

/// Offset of the VXLAN header from the start of the frame.
pub const VXLAN_OFFSET: usize = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN;

const PAYLOAD: &[u8] = b"tunterm-probe";

/// A VXLAN frame (VNI 100) whose inner packet is addressed to `inner_dst`.
pub fn vxlan_frame(inner_dst: &IpAddress) -> Vec<u8> {
    vxlan_frame_with_vni(inner_dst, 100)
}

pub fn vxlan_frame_with_vni(inner_dst: &IpAddress, vni: u32) -> Vec<u8> {
    let inner = inner_ip(inner_dst);
    let inner_eth_len = ETHERNET_HEADER_LEN + inner.len();
    let udp_len = UDP_HEADER_LEN + 8 + inner_eth_len;

    let mut f = Vec::with_capacity(VXLAN_OFFSET + 8 + inner_eth_len);
    // Writes into a Vec cannot fail.
    let _ = write_frame(&mut f, udp_len, vni, inner_dst.family(), &inner);
    f
}

fn write_frame(
    f: &mut Vec<u8>,
    udp_len: usize,
    vni: u32,
    inner_af: AddressFamily,
    inner: &[u8],
) -> std::io::Result<()> {
    // Outer Ethernet.
    f.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 0, 0x02]);
    f.write_u16::<BigEndian>(AddressFamily::V4.ethertype())?;

    // Outer IPv4, 10.1.0.1 -> 10.1.0.2, UDP.
    f.write_u8(0x45)?;
    f.write_u8(0)?;
    f.write_u16::<BigEndian>((IPV4_HEADER_LEN + udp_len) as u16)?;
    f.write_u32::<BigEndian>(0)?;
    f.write_u8(64)?;
    f.write_u8(17)?;
    f.write_u16::<BigEndian>(0)?;
    f.extend_from_slice(&[10, 1, 0, 1, 10, 1, 0, 2]);

    // UDP.
    f.write_u16::<BigEndian>(49152)?;
    f.write_u16::<BigEndian>(VXLAN_UDP_PORT)?;
    f.write_u16::<BigEndian>(udp_len as u16)?;
    f.write_u16::<BigEndian>(0)?;

    // VXLAN: I flag, 24-bit VNI.
    f.write_u32::<BigEndian>(0x0800_0000)?;
    f.write_u32::<BigEndian>((vni & 0x00ff_ffff) << 8)?;

    // Inner Ethernet.
    f.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x03, 0x02, 0, 0, 0, 0, 0x04]);
    f.write_u16::<BigEndian>(inner_af.ethertype())?;

    f.extend_from_slice(inner);
    Ok(())
}

fn inner_ip(dst: &IpAddress) -> Vec<u8> {
    let header_len = match dst.family() {
        AddressFamily::V4 => IPV4_HEADER_LEN,
        AddressFamily::V6 => IPV6_HEADER_LEN,
    };
    let mut h = Vec::with_capacity(header_len + PAYLOAD.len());
    match dst.family() {
        AddressFamily::V4 => {
            h.extend_from_slice(&[0x45, 0]);
            h.extend_from_slice(&((IPV4_HEADER_LEN + PAYLOAD.len()) as u16).to_be_bytes());
            h.extend_from_slice(&[0, 0, 0, 0, 64, 17, 0, 0]);
            h.extend_from_slice(&[192, 0, 2, 1]);
            h.extend_from_slice(&dst.as_bytes());
        }
        AddressFamily::V6 => {
            h.extend_from_slice(&[0x60, 0, 0, 0]);
            h.extend_from_slice(&(PAYLOAD.len() as u16).to_be_bytes());
            h.extend_from_slice(&[17, 64]);
            h.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0xff, 0xff]);
            h.extend_from_slice(&[0u8; 9]);
            h.push(1);
            h.extend_from_slice(&dst.as_bytes());
        }
    }
    h.extend_from_slice(PAYLOAD);
    h
}
