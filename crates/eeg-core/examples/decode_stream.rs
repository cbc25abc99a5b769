//! Decoding a captured byte stream
//!
//! Builds a few WiFi-layout packets by hand, corrupts one, injects line noise
//! and a sequence gap, then runs them through the stream decoder.

use eeg_core::protocol::{crc16_ccitt, DecodeEvent, FrameLayout, StreamDecoder, MAGIC};
use eeg_core::{DeviceProfile, EegResult};

fn packet(profile: &DeviceProfile, seq: u32, code: i32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(profile.payload_size());
    for _ in 0..profile.frames_per_packet {
        payload.extend_from_slice(&[0xC0, 0x00, 0x00]);
        for _ in 0..profile.channel_count {
            let bytes = code.to_be_bytes();
            payload.extend_from_slice(&bytes[1..]);
        }
    }
    let mut body = seq.to_be_bytes().to_vec();
    body.extend_from_slice(&payload);
    let mut out = MAGIC.to_vec();
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc16_ccitt(&body).to_be_bytes());
    out
}

fn main() -> EegResult<()> {
    println!("=== EEG stream decoding example ===\n");

    let profile = DeviceProfile::default().with_channels(4).with_frames_per_packet(5);
    println!(
        "Profile: {} channels @ {} Hz, {} frames/packet, {:.5} uV/LSB",
        profile.channel_count,
        profile.sample_rate,
        profile.frames_per_packet,
        profile.lsb_to_microvolts()
    );

    let mut stream = vec![0x01, 0x02, 0x03];
    stream.extend(packet(&profile, 1, 1000));
    let mut corrupted = packet(&profile, 2, 2000);
    corrupted[12] ^= 0x40;
    stream.extend(corrupted);
    stream.extend(packet(&profile, 3, -1000));
    stream.extend(packet(&profile, 6, 4000));

    let mut decoder = StreamDecoder::new(profile, FrameLayout::Protected, 4 << 20)?;
    for event in decoder.feed(&stream) {
        match event {
            DecodeEvent::Chunk { seq, chunk } => println!(
                "  chunk seq={:?} shape=[{}x{}] first={:.3} uV",
                seq,
                chunk.channels(),
                chunk.frames(),
                chunk.data()[[0, 0]]
            ),
            DecodeEvent::Dropped { reason } => println!("  dropped: {:?}", reason),
            DecodeEvent::Loss { missing, last, current } => {
                println!("  loss: {} packet(s) between {} and {}", missing, last, current)
            }
        }
    }

    println!("\nFramer stats: {:?}", decoder.stats());
    Ok(())
}
