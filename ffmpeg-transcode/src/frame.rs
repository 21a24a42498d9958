use ffmpeg_next::Rational;

use crate::engine::MediaFrame;

/// Reusable decoded-frame buffer. The time base travels next to the frame,
/// decoders do not stamp one.
pub struct AvFrame {
    frame: ffmpeg_next::frame::Frame,
    time_base: Rational,
}

impl AvFrame {
    pub fn empty() -> Self {
        Self {
            frame: unsafe { ffmpeg_next::frame::Frame::empty() },
            time_base: Rational::new(0, 1),
        }
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Frame {
        &mut self.frame
    }

    pub fn frame(&self) -> &ffmpeg_next::frame::Frame {
        &self.frame
    }
}

impl Default for AvFrame {
    fn default() -> Self {
        Self::empty()
    }
}

impl MediaFrame for AvFrame {
    fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        self.frame.set_pts(pts);
    }

    fn best_effort_timestamp(&self) -> Option<i64> {
        self.frame.timestamp()
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    fn clear_picture_type(&mut self) {
        unsafe {
            (*self.frame.as_mut_ptr()).pict_type =
                ffmpeg_next::ffi::AVPictureType::AV_PICTURE_TYPE_NONE;
        }
    }

    fn release(&mut self) {
        unsafe {
            ffmpeg_next::ffi::av_frame_unref(self.frame.as_mut_ptr());
        }
    }
}
