use serde::Serialize;

/// How a stream ended up in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRoute {
    Pending,
    Transcode,
    Copy,
    Skip,
}

/// Per-stream counters collected while the session runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub index: usize,
    pub kind: String,
    pub route: StreamRoute,
    pub output_index: Option<usize>,
    pub packets_read: u64,
    pub bytes_read: u64,
    pub frames_decoded: u64,
    pub frames_filtered: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub packets_dropped: u64,
    pub decoder_drained: bool,
    pub filter_drained: bool,
    pub encoder_drained: bool,
}

impl StreamStats {
    pub fn new(index: usize, kind: impl Into<String>) -> Self {
        Self {
            index,
            kind: kind.into(),
            route: StreamRoute::Pending,
            output_index: None,
            packets_read: 0,
            bytes_read: 0,
            frames_decoded: 0,
            frames_filtered: 0,
            packets_written: 0,
            bytes_written: 0,
            packets_dropped: 0,
            decoder_drained: false,
            filter_drained: false,
            encoder_drained: false,
        }
    }

    pub(crate) fn read(&mut self, size: usize) {
        self.packets_read += 1;
        self.bytes_read += size as u64;
    }

    pub(crate) fn written(&mut self, size: usize) {
        self.packets_written += 1;
        self.bytes_written += size as u64;
    }

    pub fn log_summary(&self) {
        log::info!(
            "stream #{} ({}, {:?}): read {} packets / {} bytes, decoded {} frames, filtered {} frames, wrote {} packets / {} bytes, dropped {}",
            self.index,
            self.kind,
            self.route,
            self.packets_read,
            self.bytes_read,
            self.frames_decoded,
            self.frames_filtered,
            self.packets_written,
            self.bytes_written,
            self.packets_dropped
        );
    }
}
