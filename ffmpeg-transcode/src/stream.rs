use std::fmt;

use ffmpeg_next::{Rational, codec, format::stream, media};

/// Immutable description of one elementary stream of the input container.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    index: usize,
    medium: media::Type,
    codec_id: codec::Id,
    time_base: Rational,
    rate: Rational,
}

impl StreamDescriptor {
    pub fn new(
        index: usize,
        medium: media::Type,
        codec_id: codec::Id,
        time_base: Rational,
        rate: Rational,
    ) -> Self {
        Self {
            index,
            medium,
            codec_id,
            time_base,
            rate,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn medium(&self) -> media::Type {
        self.medium
    }

    pub fn codec_id(&self) -> codec::Id {
        self.codec_id
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Average frame rate; `0/0` or `0/1` when the container does not know it.
    pub fn rate(&self) -> Rational {
        self.rate
    }

    pub fn is_video(&self) -> bool {
        self.medium == media::Type::Video
    }

    pub fn is_audio(&self) -> bool {
        self.medium == media::Type::Audio
    }

    /// Video and audio streams are decoded; everything else can only be copied.
    pub fn is_media(&self) -> bool {
        self.is_video() || self.is_audio()
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream #{} ({:?}, {:?}, time_base {}/{})",
            self.index,
            self.medium,
            self.codec_id,
            self.time_base.numerator(),
            self.time_base.denominator()
        )
    }
}

impl From<&stream::Stream<'_>> for StreamDescriptor {
    fn from(stream: &stream::Stream<'_>) -> Self {
        let parameters = stream.parameters();
        let mut rate = stream.avg_frame_rate();
        if rate.numerator() == 0 {
            rate = stream.rate();
        }
        Self {
            index: stream.index(),
            medium: parameters.medium(),
            codec_id: parameters.id(),
            time_base: stream.time_base(),
            rate,
        }
    }
}
