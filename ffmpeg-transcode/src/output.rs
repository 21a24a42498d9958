use std::{ffi::CString, path::Path, ptr};

use ffmpeg_next::{Dictionary, Rational, codec, encoder, ffi};

use crate::{
    encoder::AvEncoder,
    engine::{Encoder as _, EngineError, EngineResult, MediaPacket, Muxer},
    input::AvInput,
    packet::AvPacket,
    stream::StreamDescriptor,
};

/// Output container. Dropping it closes the file handle FFmpeg opened for it.
pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl AvOutput {
    /// Allocates the muxer for `path` (format guessed from the extension) and
    /// opens its I/O unless the format writes no file itself, as image
    /// sequences do.
    pub fn new(path: &Path) -> EngineResult<Self> {
        let url = CString::new(path.to_string_lossy().into_owned())
            .map_err(|e| EngineError::other(format!("invalid output path {path:?}: {e}")))?;

        let output = unsafe {
            let mut ctx = ptr::null_mut();
            let ret = ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null(),
                ptr::null(),
                url.as_ptr(),
            );
            if ret < 0 {
                return Err(ffmpeg_next::Error::from(ret).into());
            }
            // frees the context and closes `pb` on drop
            let output = ffmpeg_next::format::context::Output::wrap(ctx);
            if !output
                .format()
                .flags()
                .contains(ffmpeg_next::format::Flags::NO_FILE)
            {
                let ret = ffi::avio_open(&mut (*ctx).pb, url.as_ptr(), ffi::AVIO_FLAG_WRITE as i32);
                if ret < 0 {
                    return Err(ffmpeg_next::Error::from(ret).into());
                }
            }
            output
        };

        Ok(Self {
            inner: output,
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    pub fn needs_global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER)
    }

    pub fn add_encoded_stream(&mut self, encoder: &AvEncoder) -> EngineResult<usize> {
        let mut writer_stream = self.inner.add_stream(encoder.codec())?;
        encoder.write_parameters(&mut writer_stream);
        writer_stream.set_time_base(encoder.time_base());
        Ok(writer_stream.index())
    }

    pub fn add_copied_stream(
        &mut self,
        input: &AvInput,
        stream: &StreamDescriptor,
    ) -> EngineResult<usize> {
        let input_stream = input.stream(stream.index()).ok_or_else(|| {
            EngineError::other(format!("input stream #{} not found", stream.index()))
        })?;
        let mut writer_stream = self.inner.add_stream(encoder::find(codec::Id::None))?;
        writer_stream.set_parameters(input_stream.parameters());
        unsafe {
            (*writer_stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        writer_stream.set_time_base(stream.time_base());
        Ok(writer_stream.index())
    }
}

impl Muxer for AvOutput {
    type Packet = AvPacket;

    fn set_metadata(&mut self, tags: &[(String, String)]) {
        let mut dictionary = Dictionary::new();
        for (key, value) in tags {
            dictionary.set(key, value);
        }
        self.inner.set_metadata(dictionary);
    }

    fn write_header(&mut self) -> EngineResult<()> {
        if !self.have_written_header {
            self.inner.write_header()?;
            self.have_written_header = true;
        }
        Ok(())
    }

    fn write_interleaved(&mut self, packet: &mut AvPacket) -> EngineResult<()> {
        if !self.have_written_header {
            return Err(EngineError::other("header not written"));
        }
        if self.inner.stream(packet.stream_index()).is_none() {
            return Err(EngineError::other(format!(
                "output stream #{} not found",
                packet.stream_index()
            )));
        }
        let p = packet.get_mut();
        p.set_position(-1);
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> EngineResult<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        self.inner.stream(index).map(|stream| stream.time_base())
    }

    fn dump(&self, url: &str) {
        ffmpeg_next::format::context::output::dump(&self.inner, 0, Some(url));
    }
}
