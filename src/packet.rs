//! Wire layout, codec, and frame factory (§3, §4.A, §6).
//!
//! Frames are little-endian, packed, with no padding. Every kind shares a
//! 7-byte common header; the "data family" kinds (plain data, ACK-requesting
//! data, and the four reliable-transport control kinds) add a 2-byte `via`
//! next-hop field, and the four control kinds further add a 3-byte
//! `seq_id`/`number` pair. Hello and route-table snapshot frames instead
//! carry a role byte followed by a run of 4-byte route tuples.

use crc::{Crc, CRC_16_IBM_3740};

use crate::address::{Address, Role};
use crate::error::CodecError;

/// Length of the header shared by every packet kind.
pub const HEADER_COMMON_LEN: usize = 7;
/// Extra header bytes carried by the data-family kinds.
pub const VIA_LEN: usize = 2;
/// Extra header bytes carried by the four control kinds.
pub const CONTROL_EXTRA_LEN: usize = 3;
/// Encoded size of one routing-table tuple.
pub const ROUTE_TUPLE_LEN: usize = 4;
/// Encoded size of the optional payload CRC.
pub const CRC_LEN: usize = 2;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// The eight packet kinds named in §3, matched by exact type byte value
/// (the bit patterns overlap by design: the data-family kinds all carry the
/// `0x02` bit, but handler selection is always an exact match, never a mask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Data = 0x02,
    NeedAck = 0x03,
    Hello = 0x04,
    RouteTable = 0x06,
    Ack = 0x0A,
    XlData = 0x12,
    Lost = 0x22,
    Sync = 0x42,
}

impl PacketKind {
    /// Whether this kind's header includes the `via` next-hop field.
    pub fn is_data_family(self) -> bool {
        !matches!(self, PacketKind::Hello | PacketKind::RouteTable)
    }

    /// Whether this kind's header additionally includes `seq_id`/`number`.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            PacketKind::Ack | PacketKind::XlData | PacketKind::Lost | PacketKind::Sync
        )
    }

    fn header_len(self) -> usize {
        if self.is_control() {
            HEADER_COMMON_LEN + VIA_LEN + CONTROL_EXTRA_LEN
        } else if self.is_data_family() {
            HEADER_COMMON_LEN + VIA_LEN
        } else {
            HEADER_COMMON_LEN
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x02 => Ok(PacketKind::Data),
            0x03 => Ok(PacketKind::NeedAck),
            0x04 => Ok(PacketKind::Hello),
            0x06 => Ok(PacketKind::RouteTable),
            0x0A => Ok(PacketKind::Ack),
            0x12 => Ok(PacketKind::XlData),
            0x22 => Ok(PacketKind::Lost),
            0x42 => Ok(PacketKind::Sync),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// A plain or ACK-requesting data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub dst: Address,
    pub src: Address,
    pub id: u8,
    pub via: Address,
    pub payload: Vec<u8>,
}

/// An ACK, LOST, SYNC, or XL_DATA control frame. `number` is polymorphic:
/// for SYNC it holds the fragment count, for XL_DATA the fragment index,
/// for ACK/LOST the acknowledged/missing fragment number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub dst: Address,
    pub src: Address,
    pub id: u8,
    pub via: Address,
    pub seq_id: u8,
    pub number: u16,
    pub payload: Vec<u8>,
}

/// A route tuple as carried in Hello/RouteTable payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTuple {
    pub address: Address,
    pub metric: u8,
    pub role: Role,
}

/// A Hello beacon or routing-table snapshot frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFrame {
    pub dst: Address,
    pub src: Address,
    pub id: u8,
    pub role: Role,
    pub routes: Vec<RouteTuple>,
}

/// A fully decoded frame of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataFrame),
    NeedAck(DataFrame),
    Ack(ControlFrame),
    Lost(ControlFrame),
    Sync(ControlFrame),
    XlData(ControlFrame),
    Hello(TableFrame),
    RouteTable(TableFrame),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Data(_) => PacketKind::Data,
            Packet::NeedAck(_) => PacketKind::NeedAck,
            Packet::Ack(_) => PacketKind::Ack,
            Packet::Lost(_) => PacketKind::Lost,
            Packet::Sync(_) => PacketKind::Sync,
            Packet::XlData(_) => PacketKind::XlData,
            Packet::Hello(_) => PacketKind::Hello,
            Packet::RouteTable(_) => PacketKind::RouteTable,
        }
    }

    pub fn dst(&self) -> Address {
        match self {
            Packet::Data(f) | Packet::NeedAck(f) => f.dst,
            Packet::Ack(f) | Packet::Lost(f) | Packet::Sync(f) | Packet::XlData(f) => f.dst,
            Packet::Hello(f) | Packet::RouteTable(f) => f.dst,
        }
    }

    pub fn src(&self) -> Address {
        match self {
            Packet::Data(f) | Packet::NeedAck(f) => f.src,
            Packet::Ack(f) | Packet::Lost(f) | Packet::Sync(f) | Packet::XlData(f) => f.src,
            Packet::Hello(f) | Packet::RouteTable(f) => f.src,
        }
    }

    /// `via` for kinds that carry it; `src` for Hello/RouteTable, which
    /// don't (they are never forwarded).
    pub fn via(&self) -> Address {
        match self {
            Packet::Data(f) | Packet::NeedAck(f) => f.via,
            Packet::Ack(f) | Packet::Lost(f) | Packet::Sync(f) | Packet::XlData(f) => f.via,
            Packet::Hello(f) | Packet::RouteTable(f) => f.src,
        }
    }
}

/// Encodes/decodes wire frames and enforces the configured max frame size.
///
/// Mirrors the teacher's preference for small, explicit helper structs over
/// global constants: a [`PacketCodec`] is constructed once per engine from
/// the active [`crate::config::EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_packet_size: u16,
    crc_enabled: bool,
}

impl PacketCodec {
    pub fn new(max_packet_size: u16, crc_enabled: bool) -> Self {
        PacketCodec {
            max_packet_size,
            crc_enabled,
        }
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    /// Maximum payload bytes that fit in a frame of `kind` after its header
    /// and (if enabled) the trailing CRC (§4.A).
    pub fn max_payload_for(&self, kind: PacketKind) -> usize {
        let budget = self.max_packet_size as usize;
        let header = kind.header_len();
        let crc = if self.crc_enabled { CRC_LEN } else { 0 };
        budget.saturating_sub(header).saturating_sub(crc)
    }

    /// Encodes `packet` to wire bytes, rejecting frames that would exceed
    /// `max_packet_size` or whose total length doesn't fit in the `u8`
    /// `packet_size` field.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(self.max_packet_size as usize);
        match packet {
            Packet::Data(f) | Packet::NeedAck(f) => {
                self.encode_data_header(&mut buf, packet.kind(), f.dst, f.src, f.id, f.via);
                buf.extend_from_slice(&f.payload);
            }
            Packet::Ack(f) | Packet::Lost(f) | Packet::Sync(f) | Packet::XlData(f) => {
                self.encode_data_header(&mut buf, packet.kind(), f.dst, f.src, f.id, f.via);
                buf.push(f.seq_id);
                buf.extend_from_slice(&f.number.to_le_bytes());
                buf.extend_from_slice(&f.payload);
            }
            Packet::Hello(f) | Packet::RouteTable(f) => {
                self.encode_common_header(&mut buf, packet.kind(), f.dst, f.src, f.id);
                buf.push(f.role.bits());
                for route in &f.routes {
                    buf.extend_from_slice(&route.address.to_le_bytes());
                    buf.push(route.metric);
                    buf.push(route.role.bits());
                }
            }
        }

        if self.crc_enabled {
            let crc = CRC16.checksum(&buf[HEADER_COMMON_LEN.min(buf.len())..]);
            buf.extend_from_slice(&crc.to_le_bytes());
        }

        let total = buf.len();
        if total > self.max_packet_size as usize || total > u8::MAX as usize {
            return Err(CodecError::Oversize(total, self.max_packet_size));
        }
        // packet_size lives at a fixed offset in the common header (byte 6).
        buf[6] = total as u8;
        Ok(buf)
    }

    fn encode_common_header(
        &self,
        buf: &mut Vec<u8>,
        kind: PacketKind,
        dst: Address,
        src: Address,
        id: u8,
    ) {
        buf.extend_from_slice(&dst.to_le_bytes());
        buf.extend_from_slice(&src.to_le_bytes());
        buf.push(id);
        buf.push(kind as u8);
        buf.push(0); // packet_size patched in by encode() once the length is known
    }

    fn encode_data_header(
        &self,
        buf: &mut Vec<u8>,
        kind: PacketKind,
        dst: Address,
        src: Address,
        id: u8,
        via: Address,
    ) {
        self.encode_common_header(buf, kind, dst, src, id);
        buf.extend_from_slice(&via.to_le_bytes());
    }

    /// Decodes a frame, validating the declared `packet_size` against the
    /// actual byte count and, if enabled, the trailing CRC (§4.A failure mode).
    pub fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        if bytes.len() < HEADER_COMMON_LEN {
            return Err(CodecError::TooShort);
        }
        let dst = read_u16(&bytes[0..2]);
        let src = read_u16(&bytes[2..4]);
        let id = bytes[4];
        let kind = PacketKind::try_from(bytes[5])?;
        let declared = bytes[6];

        if declared as usize != bytes.len() {
            return Err(CodecError::Truncated {
                declared,
                actual: bytes.len(),
            });
        }

        let body_end = if self.crc_enabled {
            if bytes.len() < HEADER_COMMON_LEN + CRC_LEN {
                return Err(CodecError::TooShort);
            }
            let split = bytes.len() - CRC_LEN;
            let expected = read_u16(&bytes[split..]);
            let actual = CRC16.checksum(&bytes[HEADER_COMMON_LEN..split]);
            if expected != actual {
                return Err(CodecError::CrcMismatch);
            }
            split
        } else {
            bytes.len()
        };

        if kind.is_data_family() {
            if body_end < HEADER_COMMON_LEN + VIA_LEN {
                return Err(CodecError::TooShort);
            }
            let via = read_u16(&bytes[HEADER_COMMON_LEN..HEADER_COMMON_LEN + VIA_LEN]);
            if kind.is_control() {
                let ctrl_start = HEADER_COMMON_LEN + VIA_LEN;
                if body_end < ctrl_start + CONTROL_EXTRA_LEN {
                    return Err(CodecError::TooShort);
                }
                let seq_id = bytes[ctrl_start];
                let number = read_u16(&bytes[ctrl_start + 1..ctrl_start + 3]);
                let payload = bytes[ctrl_start + CONTROL_EXTRA_LEN..body_end].to_vec();
                let frame = ControlFrame {
                    dst,
                    src,
                    id,
                    via,
                    seq_id,
                    number,
                    payload,
                };
                return Ok(match kind {
                    PacketKind::Ack => Packet::Ack(frame),
                    PacketKind::Lost => Packet::Lost(frame),
                    PacketKind::Sync => Packet::Sync(frame),
                    PacketKind::XlData => Packet::XlData(frame),
                    _ => unreachable!(),
                });
            }
            let payload = bytes[HEADER_COMMON_LEN + VIA_LEN..body_end].to_vec();
            let frame = DataFrame {
                dst,
                src,
                id,
                via,
                payload,
            };
            return Ok(match kind {
                PacketKind::Data => Packet::Data(frame),
                PacketKind::NeedAck => Packet::NeedAck(frame),
                _ => unreachable!(),
            });
        }

        // Hello / RouteTable: role byte followed by route tuples.
        if body_end <= HEADER_COMMON_LEN {
            return Err(CodecError::TooShort);
        }
        let role = Role::from_bits(bytes[HEADER_COMMON_LEN]);
        let tuple_bytes = &bytes[HEADER_COMMON_LEN + 1..body_end];
        if tuple_bytes.len() % ROUTE_TUPLE_LEN != 0 {
            return Err(CodecError::TooShort);
        }
        let routes = tuple_bytes
            .chunks_exact(ROUTE_TUPLE_LEN)
            .map(|chunk| RouteTuple {
                address: read_u16(&chunk[0..2]),
                metric: chunk[2],
                role: Role::from_bits(chunk[3]),
            })
            .collect();
        let frame = TableFrame {
            dst,
            src,
            id,
            role,
            routes,
        };
        Ok(match kind {
            PacketKind::Hello => Packet::Hello(frame),
            PacketKind::RouteTable => Packet::RouteTable(frame),
            _ => unreachable!(),
        })
    }
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}
