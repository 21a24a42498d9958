use std::{ffi::CString, path::Path, ptr};

use ffmpeg_next::ffi;

use crate::{
    engine::{Demuxer, EngineError, EngineResult, Read},
    packet::AvPacket,
    stream::StreamDescriptor,
};

pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<StreamDescriptor>,
}

impl AvInput {
    /// Opens the container, then reads its stream information. A failure in
    /// that second step is reported as [`EngineError::StreamInfo`].
    pub fn new(path: &Path) -> EngineResult<Self> {
        let url = CString::new(path.to_string_lossy().into_owned())
            .map_err(|e| EngineError::other(format!("invalid input path {path:?}: {e}")))?;

        let input = unsafe {
            let mut ctx = ptr::null_mut();
            let ret = ffi::avformat_open_input(&mut ctx, url.as_ptr(), ptr::null(), ptr::null_mut());
            if ret < 0 {
                return Err(ffmpeg_next::Error::from(ret).into());
            }
            // owned from here on, closed on drop
            let input = ffmpeg_next::format::context::Input::wrap(ctx);
            let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                return Err(match EngineError::from(ffmpeg_next::Error::from(ret)) {
                    EngineError::Ffmpeg(err) => EngineError::StreamInfo(err),
                    err => err,
                });
            }
            input
        };

        let streams = input
            .streams()
            .map(|stream| StreamDescriptor::from(&stream))
            .collect();

        Ok(Self {
            inner: input,
            streams,
        })
    }

    pub fn stream(&self, index: usize) -> Option<ffmpeg_next::format::stream::Stream<'_>> {
        self.inner.stream(index)
    }
}

impl Demuxer for AvInput {
    type Packet = AvPacket;

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self, packet: &mut AvPacket) -> EngineResult<Read> {
        match packet.get_mut().read(&mut self.inner) {
            Ok(()) => Ok(Read::Packet),
            Err(ffmpeg_next::Error::Eof) => Ok(Read::EndOfInput),
            Err(err) => Err(err.into()),
        }
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.inner
            .metadata()
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn dump(&self, url: &str) {
        ffmpeg_next::format::context::input::dump(&self.inner, 0, Some(url));
    }
}
