//! Encodes µV chunks into device wire packets
//!
//! Mirror image of the core decoder, with hooks for injecting the faults a
//! real link produces: corrupted checksums and skipped sequence numbers.

use eeg_core::protocol::{crc16_ccitt, FrameLayout, PacketGeometry, MAGIC, STATUS_LEN};
use eeg_core::{DeviceProfile, EegError, EegResult, SampleChunk};

/// Status word the ADS1299 family emits at the start of every frame
pub const STATUS_BYTES: [u8; STATUS_LEN] = [0xC0, 0x00, 0x00];

const CODE_MAX: i32 = 0x7F_FFFF;
const CODE_MIN: i32 = -0x80_0000;

/// 24-bit two's-complement, big-endian
pub fn encode_sample_24(code: i32) -> [u8; 3] {
    let code = code.clamp(CODE_MIN, CODE_MAX) as u32;
    [(code >> 16) as u8, (code >> 8) as u8, code as u8]
}

pub struct PacketEncoder {
    profile: DeviceProfile,
    layout: FrameLayout,
    next_seq: u32,
    corrupt_next: bool,
    pending_skip: u32,
}

impl PacketEncoder {
    pub fn new(profile: DeviceProfile, layout: FrameLayout) -> EegResult<Self> {
        profile.validate()?;
        Ok(Self {
            profile,
            layout,
            next_seq: 0,
            corrupt_next: false,
            pending_skip: 0,
        })
    }

    pub fn with_start_seq(mut self, seq: u32) -> Self {
        self.next_seq = seq;
        self
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn geometry(&self) -> PacketGeometry {
        PacketGeometry::new(
            self.layout,
            self.profile.channel_count,
            self.profile.frames_per_packet,
        )
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// The next protected packet carries a wrong checksum
    pub fn corrupt_next_crc(&mut self) {
        self.corrupt_next = true;
    }

    /// The next protected packet jumps `count` sequence numbers ahead
    pub fn skip_sequence(&mut self, count: u32) {
        self.pending_skip = self.pending_skip.saturating_add(count);
    }

    /// Quantize µV to ADC codes, saturating at the converter range
    pub fn quantize(&self, microvolts: f32) -> i32 {
        let lsb = self.profile.lsb_to_microvolts();
        if lsb == 0.0 {
            return 0;
        }
        let code = (microvolts as f64 / lsb).round();
        code.clamp(CODE_MIN as f64, CODE_MAX as f64) as i32
    }

    /// Encode exactly one packet worth of frames
    pub fn encode(&mut self, chunk: &SampleChunk) -> EegResult<Vec<u8>> {
        let geometry = self.geometry();
        if chunk.channels() != geometry.channels {
            return Err(EegError::ChannelMismatch {
                expected: geometry.channels,
                actual: chunk.channels(),
            });
        }
        if chunk.frames() != geometry.frames_per_packet {
            return Err(EegError::shape(format!(
                "packet holds {} frames, chunk has {}",
                geometry.frames_per_packet,
                chunk.frames()
            )));
        }

        let mut payload = Vec::with_capacity(geometry.payload_size());
        let data = chunk.data();
        for frame in 0..geometry.frames_per_packet {
            payload.extend_from_slice(&STATUS_BYTES);
            for ch in 0..geometry.channels {
                payload.extend_from_slice(&encode_sample_24(self.quantize(data[[ch, frame]])));
            }
        }

        let mut packet = Vec::with_capacity(geometry.packet_size());
        packet.extend_from_slice(&MAGIC);
        match self.layout {
            FrameLayout::Unprotected => packet.extend_from_slice(&payload),
            FrameLayout::Protected => {
                let seq = self.next_seq.wrapping_add(self.pending_skip);
                self.pending_skip = 0;
                self.next_seq = seq.wrapping_add(1);

                let start = packet.len();
                packet.extend_from_slice(&seq.to_be_bytes());
                packet.extend_from_slice(&payload);
                let mut crc = crc16_ccitt(&packet[start..]);
                if self.corrupt_next {
                    crc ^= 0xFFFF;
                    self.corrupt_next = false;
                }
                packet.extend_from_slice(&crc.to_be_bytes());
            }
        }
        Ok(packet)
    }

    /// Split a chunk into whole packets; trailing frames that do not fill one are dropped
    pub fn encode_all(&mut self, chunk: &SampleChunk) -> EegResult<Vec<Vec<u8>>> {
        let fpp = self.profile.frames_per_packet;
        let whole = chunk.frames() / fpp;
        (0..whole)
            .map(|i| {
                let slice = chunk
                    .data()
                    .slice(ndarray::s![.., i * fpp..(i + 1) * fpp])
                    .to_owned();
                self.encode(&SampleChunk::new(slice))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_core::protocol::{sign_extend_24, DecodeEvent, DropReason, StreamDecoder};

    fn profile() -> DeviceProfile {
        DeviceProfile::default().with_channels(2).with_frames_per_packet(5)
    }

    #[test]
    fn test_sample_encoding() {
        assert_eq!(encode_sample_24(1), [0x00, 0x00, 0x01]);
        assert_eq!(encode_sample_24(-1), [0xFF, 0xFF, 0xFF]);
        assert_eq!(encode_sample_24(i32::MAX), [0x7F, 0xFF, 0xFF]);
        assert_eq!(sign_extend_24(encode_sample_24(-8_388_608)), -8_388_608);
    }

    #[test]
    fn test_decoder_recovers_values() {
        let mut encoder = PacketEncoder::new(profile(), FrameLayout::Protected).unwrap();
        let lsb = profile().lsb_to_microvolts() as f32;
        let chunk = SampleChunk::from_rows(vec![
            vec![0.0, 10.0, -10.0, 100.0, -250.5],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
        ])
        .unwrap();
        let packet = encoder.encode(&chunk).unwrap();

        let mut decoder = StreamDecoder::new(profile(), FrameLayout::Protected, 1 << 16).unwrap();
        let events = decoder.feed(&packet);
        let DecodeEvent::Chunk { seq, chunk: decoded } = &events[0] else {
            panic!("expected a chunk, got {:?}", events);
        };
        assert_eq!(*seq, Some(0));
        for (a, b) in decoded.data().iter().zip(chunk.data().iter()) {
            assert!((a - b).abs() <= lsb);
        }
    }

    #[test]
    fn test_saturation() {
        let encoder = PacketEncoder::new(profile(), FrameLayout::Protected).unwrap();
        assert_eq!(encoder.quantize(1e9), CODE_MAX);
        assert_eq!(encoder.quantize(-1e9), CODE_MIN);
    }

    #[test]
    fn test_fault_injection() {
        let mut encoder = PacketEncoder::new(profile(), FrameLayout::Protected)
            .unwrap()
            .with_start_seq(10);
        let chunk = SampleChunk::zeros(2, 5);
        let mut stream = encoder.encode(&chunk).unwrap();
        encoder.corrupt_next_crc();
        stream.extend(encoder.encode(&chunk).unwrap());
        encoder.skip_sequence(2);
        stream.extend(encoder.encode(&chunk).unwrap());

        let mut decoder = StreamDecoder::new(profile(), FrameLayout::Protected, 1 << 16).unwrap();
        let events = decoder.feed(&stream);
        assert!(matches!(
            events[1],
            DecodeEvent::Dropped { reason: DropReason::CrcMismatch { seq: 11, .. } }
        ));
        assert!(events.iter().any(|e| matches!(e, DecodeEvent::Loss { missing: 3, last: 10, current: 14 })));
    }

    #[test]
    fn test_unprotected_layout_size() {
        let mut encoder = PacketEncoder::new(DeviceProfile::ble(), FrameLayout::Unprotected).unwrap();
        let frames = DeviceProfile::ble().frames_per_packet;
        let packet = encoder.encode(&SampleChunk::zeros(8, frames)).unwrap();
        assert_eq!(packet.len(), encoder.geometry().packet_size());
        assert_eq!(&packet[..4], &MAGIC);
    }

    #[test]
    fn test_encode_all_drops_partial_tail() {
        let mut encoder = PacketEncoder::new(profile(), FrameLayout::Protected).unwrap();
        let packets = encoder.encode_all(&SampleChunk::zeros(2, 12)).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(encoder.next_seq(), 2);
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let mut encoder = PacketEncoder::new(profile(), FrameLayout::Protected).unwrap();
        assert!(encoder.encode(&SampleChunk::zeros(3, 5)).is_err());
        assert!(encoder.encode(&SampleChunk::zeros(2, 4)).is_err());
    }
}
