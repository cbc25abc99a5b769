//! Packet framing and resynchronization over a growing byte buffer
//!
//! Bytes from a transport are appended with [`PacketFramer::extend`] and
//! complete packets are pulled with [`PacketFramer::next_packet`] until it
//! returns `None`. Corrupt or misaligned input never produces an error:
//! garbage is skipped and bad packets come back as
//! [`FrameOutcome::Dropped`].

use super::{crc::Crc16, FrameLayout, PacketGeometry, CRC_LEN, MAGIC, MAGIC_LEN, SEQ_LEN};
use tracing::{trace, warn};

/// Why a packet-sized slice was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    CrcMismatch { seq: u32, expected: u16, actual: u16 },
    /// Sequence or checksum fields could not be read
    Malformed { reason: String },
}

/// One framed packet, or the reason it was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// `seq` is `None` for unprotected layouts
    Packet { seq: Option<u32>, payload: Vec<u8> },
    Dropped { reason: DropReason },
}

/// Running counters of framing anomalies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub packets: u64,
    pub crc_failures: u64,
    pub malformed: u64,
    pub sync_losses: u64,
    pub discarded_bytes: u64,
    pub overflow_clears: u64,
}

pub struct PacketFramer {
    geometry: PacketGeometry,
    buffer: Vec<u8>,
    max_buffer: usize,
    stats: FramerStats,
}

impl PacketFramer {
    pub fn new(geometry: PacketGeometry, max_buffer: usize) -> Self {
        Self {
            geometry,
            buffer: Vec::with_capacity(geometry.packet_size() * 4),
            max_buffer,
            stats: FramerStats::default(),
        }
    }

    pub fn geometry(&self) -> PacketGeometry {
        self.geometry
    }

    /// Switch geometry; buffered bytes belong to the old layout and are dropped
    pub fn set_geometry(&mut self, geometry: PacketGeometry) {
        if geometry != self.geometry {
            self.geometry = geometry;
            self.buffer.clear();
        }
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append received bytes, clearing the buffer first if it would exceed its cap
    ///
    /// A single slice longer than the cap keeps only its newest `max_buffer` bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.buffer.len() + bytes.len() > self.max_buffer {
            warn!(
                buffered = self.buffer.len(),
                incoming = bytes.len(),
                cap = self.max_buffer,
                "receive buffer overflow, clearing"
            );
            self.stats.overflow_clears += 1;
            self.stats.discarded_bytes += self.buffer.len() as u64;
            self.buffer.clear();
        }
        let bytes = match bytes.len().checked_sub(self.max_buffer) {
            Some(excess) if excess > 0 => {
                self.stats.discarded_bytes += excess as u64;
                &bytes[excess..]
            }
            _ => bytes,
        };
        self.buffer.extend_from_slice(bytes);
    }

    /// Pull the next complete packet, `None` when more bytes are needed
    pub fn next_packet(&mut self) -> Option<FrameOutcome> {
        let packet_size = self.geometry.packet_size();

        match find_magic(&self.buffer) {
            None => {
                if self.buffer.len() > packet_size {
                    // A header may straddle the read boundary
                    let keep = MAGIC_LEN - 1;
                    let discard = self.buffer.len() - keep;
                    warn!(discarded = discard, "no packet header in buffer, discarding");
                    self.stats.discarded_bytes += discard as u64;
                    self.buffer.drain(..discard);
                }
                return None;
            }
            Some(0) => {}
            Some(offset) => {
                warn!(skipped = offset, "sync lost, realigning to next header");
                self.stats.sync_losses += 1;
                self.stats.discarded_bytes += offset as u64;
                self.buffer.drain(..offset);
            }
        }

        if self.buffer.len() < packet_size {
            return None;
        }

        let packet: Vec<u8> = self.buffer.drain(..packet_size).collect();
        Some(self.validate(&packet))
    }

    fn validate(&mut self, packet: &[u8]) -> FrameOutcome {
        match self.geometry.layout {
            FrameLayout::Unprotected => {
                self.stats.packets += 1;
                FrameOutcome::Packet {
                    seq: None,
                    payload: packet[MAGIC_LEN..].to_vec(),
                }
            }
            FrameLayout::Protected => self.validate_protected(packet),
        }
    }

    fn validate_protected(&mut self, packet: &[u8]) -> FrameOutcome {
        let body = &packet[MAGIC_LEN..];
        let (seq_bytes, rest) = body.split_at(SEQ_LEN.min(body.len()));
        let Some(crc_start) = rest.len().checked_sub(CRC_LEN) else {
            return self.malformed("packet shorter than sequence and checksum fields");
        };
        let (payload, crc_bytes) = rest.split_at(crc_start);

        let (Ok(seq_arr), Ok(crc_arr)) = (
            <[u8; SEQ_LEN]>::try_from(seq_bytes),
            <[u8; CRC_LEN]>::try_from(crc_bytes),
        ) else {
            return self.malformed("unreadable sequence or checksum field");
        };
        let seq = u32::from_be_bytes(seq_arr);
        let expected = u16::from_be_bytes(crc_arr);
        let actual = Crc16::new().update(seq_bytes).update(payload).finish();

        if actual != expected {
            warn!(seq, expected, actual, "CRC mismatch, dropping packet");
            self.stats.crc_failures += 1;
            return FrameOutcome::Dropped {
                reason: DropReason::CrcMismatch { seq, expected, actual },
            };
        }

        trace!(seq, "packet validated");
        self.stats.packets += 1;
        FrameOutcome::Packet {
            seq: Some(seq),
            payload: payload.to_vec(),
        }
    }

    fn malformed(&mut self, reason: &str) -> FrameOutcome {
        warn!(reason, "malformed packet metadata, dropping");
        self.stats.malformed += 1;
        FrameOutcome::Dropped {
            reason: DropReason::Malformed {
                reason: reason.to_string(),
            },
        }
    }
}

fn find_magic(buffer: &[u8]) -> Option<usize> {
    buffer.windows(MAGIC_LEN).position(|w| w == MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc16_ccitt;

    fn geometry() -> PacketGeometry {
        PacketGeometry::new(FrameLayout::Protected, 2, 2)
    }

    fn protected_packet(seq: u32, fill: u8) -> Vec<u8> {
        let payload = vec![fill; geometry().payload_size()];
        let mut body = seq.to_be_bytes().to_vec();
        body.extend_from_slice(&payload);
        let crc = crc16_ccitt(&body);

        let mut packet = MAGIC.to_vec();
        packet.extend_from_slice(&body);
        packet.extend_from_slice(&crc.to_be_bytes());
        packet
    }

    fn drain(framer: &mut PacketFramer) -> Vec<FrameOutcome> {
        std::iter::from_fn(|| framer.next_packet()).collect()
    }

    #[test]
    fn test_resync_after_leading_garbage() {
        let mut framer = PacketFramer::new(geometry(), 1 << 20);
        framer.extend(&[0x01, 0x02, 0xAA, 0x07, 0xFF]);
        framer.extend(&protected_packet(9, 0x11));

        let outcomes = drain(&mut framer);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            FrameOutcome::Packet { seq, payload } => {
                assert_eq!(*seq, Some(9));
                assert!(payload.iter().all(|&b| b == 0x11));
            }
            other => panic!("expected packet, got {:?}", other),
        }
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.stats().sync_losses, 1);
        assert_eq!(framer.stats().discarded_bytes, 5);
    }

    #[test]
    fn test_partial_packet_waits() {
        let mut framer = PacketFramer::new(geometry(), 1 << 20);
        let packet = protected_packet(1, 0x22);
        let (head, tail) = packet.split_at(7);

        framer.extend(head);
        assert!(framer.next_packet().is_none());
        assert_eq!(framer.buffered(), head.len());

        framer.extend(tail);
        assert!(matches!(framer.next_packet(), Some(FrameOutcome::Packet { .. })));
    }

    #[test]
    fn test_crc_mismatch_drops_only_that_packet() {
        let mut framer = PacketFramer::new(geometry(), 1 << 20);
        let mut bad = protected_packet(1, 0x33);
        bad[10] ^= 0x01;
        framer.extend(&bad);
        framer.extend(&protected_packet(2, 0x44));

        let outcomes = drain(&mut framer);
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[0],
            FrameOutcome::Dropped { reason: DropReason::CrcMismatch { seq: 1, .. } }
        ));
        assert!(matches!(outcomes[1], FrameOutcome::Packet { seq: Some(2), .. }));
        assert_eq!(framer.stats().crc_failures, 1);
    }

    #[test]
    fn test_headerless_buffer_keeps_tail() {
        let mut framer = PacketFramer::new(geometry(), 1 << 20);
        let mut garbage = vec![0x55; geometry().packet_size() + 10];
        // First three magic bytes at the very end
        let n = garbage.len();
        garbage[n - 3..].copy_from_slice(&MAGIC[..3]);
        framer.extend(&garbage);

        assert!(framer.next_packet().is_none());
        assert_eq!(framer.buffered(), MAGIC_LEN - 1);

        let packet = protected_packet(5, 0x66);
        framer.extend(&packet[3..]);
        assert!(matches!(framer.next_packet(), Some(FrameOutcome::Packet { seq: Some(5), .. })));
    }

    #[test]
    fn test_unprotected_layout_has_no_seq() {
        let geometry = PacketGeometry::new(FrameLayout::Unprotected, 2, 2);
        let mut framer = PacketFramer::new(geometry, 1 << 16);
        let mut packet = MAGIC.to_vec();
        packet.extend(vec![0x01; geometry.payload_size()]);
        framer.extend(&packet);

        match framer.next_packet() {
            Some(FrameOutcome::Packet { seq, payload }) => {
                assert_eq!(seq, None);
                assert_eq!(payload.len(), geometry.payload_size());
            }
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_overflow_clears_buffer() {
        let mut framer = PacketFramer::new(geometry(), 16);
        framer.extend(&[0x00; 12]);
        framer.extend(&[0x00; 8]);
        assert_eq!(framer.buffered(), 8);
        assert_eq!(framer.stats().overflow_clears, 1);
    }

    #[test]
    fn test_oversized_read_keeps_newest_bytes() {
        let mut framer = PacketFramer::new(geometry(), 16);
        framer.extend(&[0x00; 4]);
        let incoming: Vec<u8> = (0..40).collect();
        framer.extend(&incoming);

        assert_eq!(framer.buffered(), 16);
        assert_eq!(framer.stats().overflow_clears, 1);
        assert_eq!(framer.stats().discarded_bytes, 4 + 24);
        // A packet closing an oversized read survives the trim
        let mut small = PacketFramer::new(geometry(), protected_packet(3, 0x42).len());
        let mut stream = vec![0x99; 7];
        stream.extend(protected_packet(3, 0x42));
        small.extend(&stream);
        assert!(matches!(small.next_packet(), Some(FrameOutcome::Packet { seq: Some(3), .. })));
    }

    #[test]
    fn test_geometry_change_clears_buffer() {
        let mut framer = PacketFramer::new(geometry(), 1 << 20);
        framer.extend(&protected_packet(1, 0x01)[..10]);
        framer.set_geometry(PacketGeometry::new(FrameLayout::Protected, 4, 2));
        assert_eq!(framer.buffered(), 0);
    }
}
