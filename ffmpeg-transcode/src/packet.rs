use ffmpeg_next::Rational;

use crate::engine::MediaPacket;

/// Reusable FFmpeg packet buffer.
pub struct AvPacket {
    packet: ffmpeg_next::codec::packet::Packet,
}

impl AvPacket {
    pub fn empty() -> Self {
        Self {
            packet: ffmpeg_next::codec::packet::Packet::empty(),
        }
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }

    pub fn packet(&self) -> &ffmpeg_next::codec::packet::Packet {
        &self.packet
    }
}

impl Default for AvPacket {
    fn default() -> Self {
        Self::empty()
    }
}

impl MediaPacket for AvPacket {
    fn stream_index(&self) -> usize {
        self.packet.stream()
    }

    fn set_stream_index(&mut self, index: usize) {
        self.packet.set_stream(index);
    }

    fn size(&self) -> usize {
        self.packet.size()
    }

    fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    fn rescale_ts(&mut self, from: Rational, to: Rational) {
        self.packet.rescale_ts(from, to);
    }

    fn release(&mut self) {
        unsafe {
            ffmpeg_next::ffi::av_packet_unref(self.packet.as_mut_ptr());
        }
    }
}
