//! Scripted in-memory engine that drives the pipeline without FFmpeg.
//!
//! Every handle registers itself in a shared [`Ledger`] when opened and again
//! when dropped, so tests can assert that teardown releases each one exactly
//! once. Decoders, filters and encoders hold back a configurable number of
//! units to exercise the pending and flush paths.

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    path::Path,
    rc::Rc,
};

use bytes::Bytes;
use ffmpeg_next::{Rational, codec, media, util::mathematics::Rescale};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{
        Decoder, Demuxer, Drain, Encoder, Engine, EngineError, EngineResult, FilterGraph,
        MediaFrame, MediaPacket, Muxer, Read,
    },
    stream::StreamDescriptor,
};

#[derive(Debug, Default)]
struct LedgerState {
    opened: Vec<String>,
    released: Vec<String>,
    events: Vec<String>,
    written: BTreeMap<usize, Vec<FakePacket>>,
    encoded: BTreeMap<usize, Vec<Option<i64>>>,
    output_metadata: Vec<(String, String)>,
    frame_releases: usize,
    cleared_picture_types: usize,
}

/// Shared record of handle lifetimes and muxed packets.
#[derive(Debug, Clone, Default)]
pub struct Ledger(Rc<RefCell<LedgerState>>);

impl Ledger {
    fn open(&self, name: &str) -> Handle {
        self.0.borrow_mut().opened.push(name.to_string());
        Handle {
            name: name.to_string(),
            ledger: self.clone(),
        }
    }

    fn event(&self, event: String) {
        self.0.borrow_mut().events.push(event);
    }

    pub fn opened(&self) -> Vec<String> {
        self.0.borrow().opened.clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.0.borrow().released.clone()
    }

    pub fn is_open(&self, name: &str) -> bool {
        let state = self.0.borrow();
        let opened = state.opened.iter().filter(|n| *n == name).count();
        let released = state.released.iter().filter(|n| *n == name).count();
        opened > released
    }

    /// Handles opened but never released.
    pub fn leaked(&self) -> Vec<String> {
        let state = self.0.borrow();
        let mut leaked = state.opened.clone();
        for name in &state.released {
            if let Some(pos) = leaked.iter().position(|n| n == name) {
                leaked.remove(pos);
            }
        }
        leaked
    }

    /// Handles released more often than they were opened.
    pub fn over_released(&self) -> Vec<String> {
        let state = self.0.borrow();
        let mut opened = state.opened.clone();
        let mut over = Vec::new();
        for name in &state.released {
            match opened.iter().position(|n| n == name) {
                Some(pos) => {
                    opened.remove(pos);
                }
                None => over.push(name.clone()),
            }
        }
        over
    }

    pub fn events(&self) -> Vec<String> {
        self.0.borrow().events.clone()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.0.borrow().events.iter().any(|e| e == event)
    }

    /// Packets written to output stream `index`, in write order.
    pub fn written(&self, index: usize) -> Vec<FakePacket> {
        self.0
            .borrow()
            .written
            .get(&index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn output_streams_written(&self) -> Vec<usize> {
        self.0.borrow().written.keys().copied().collect()
    }

    /// Pts of every frame the encoder of input stream `stream` received.
    pub fn encoded_pts(&self, stream: usize) -> Vec<Option<i64>> {
        self.0
            .borrow()
            .encoded
            .get(&stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Container tags the output was given before its header.
    pub fn output_metadata(&self) -> Vec<(String, String)> {
        self.0.borrow().output_metadata.clone()
    }

    /// Frames that reached an encoder with their picture type cleared.
    pub fn cleared_picture_types(&self) -> usize {
        self.0.borrow().cleared_picture_types
    }

    /// Number of frame buffers released while holding a payload.
    pub fn frame_releases(&self) -> usize {
        self.0.borrow().frame_releases
    }
}

#[derive(Debug)]
struct Handle {
    name: String,
    ledger: Ledger,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.ledger.0.borrow_mut().released.push(self.name.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakePacket {
    pub stream: usize,
    pub pts: Option<i64>,
    pub data: Bytes,
}

impl FakePacket {
    pub fn new(stream: usize, pts: Option<i64>, data: impl Into<Bytes>) -> Self {
        Self {
            stream,
            pts,
            data: data.into(),
        }
    }
}

impl MediaPacket for FakePacket {
    fn stream_index(&self) -> usize {
        self.stream
    }

    fn set_stream_index(&mut self, index: usize) {
        self.stream = index;
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn rescale_ts(&mut self, from: Rational, to: Rational) {
        self.pts = self.pts.map(|pts| pts.rescale(from, to));
    }

    fn release(&mut self) {
        self.pts = None;
        self.data = Bytes::new();
    }
}

#[derive(Debug, Clone)]
pub struct FakeFrame {
    pub pts: Option<i64>,
    pub best_effort: Option<i64>,
    pub time_base: Rational,
    pub data: Bytes,
    pub picture_type_cleared: bool,
    ledger: Ledger,
}

impl FakeFrame {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            pts: None,
            best_effort: None,
            time_base: Rational::new(0, 1),
            data: Bytes::new(),
            picture_type_cleared: false,
            ledger,
        }
    }

    fn fill_from(&mut self, other: FakeFrame) {
        self.pts = other.pts;
        self.best_effort = other.best_effort;
        self.time_base = other.time_base;
        self.data = other.data;
        self.picture_type_cleared = false;
    }
}

impl MediaFrame for FakeFrame {
    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    fn best_effort_timestamp(&self) -> Option<i64> {
        self.best_effort
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    fn clear_picture_type(&mut self) {
        self.picture_type_cleared = true;
    }

    fn release(&mut self) {
        if !self.data.is_empty() {
            self.ledger.0.borrow_mut().frame_releases += 1;
        }
        self.pts = None;
        self.best_effort = None;
        self.data = Bytes::new();
        self.picture_type_cleared = false;
    }
}

/// Holds up to `delay` units back until flushed.
#[derive(Debug)]
struct DelayQueue<T> {
    name: String,
    delay: usize,
    queue: VecDeque<T>,
    flushing: bool,
    ledger: Ledger,
}

impl<T> DelayQueue<T> {
    fn new(name: String, delay: usize, ledger: Ledger) -> Self {
        Self {
            name,
            delay,
            queue: VecDeque::new(),
            flushing: false,
            ledger,
        }
    }

    fn push(&mut self, unit: Option<T>) -> EngineResult<()> {
        if self.flushing {
            return Err(EngineError::other(format!("{} already flushed", self.name)));
        }
        match unit {
            Some(unit) => self.queue.push_back(unit),
            None => self.flushing = true,
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<T, Drain> {
        if self.queue.len() > self.delay || (self.flushing && !self.queue.is_empty()) {
            if let Some(unit) = self.queue.pop_front() {
                return Ok(unit);
            }
        }
        if self.flushing {
            let event = format!("{} eos", self.name);
            if !self.ledger.has_event(&event) {
                self.ledger.event(event);
            }
            Err(Drain::EndOfStream)
        } else {
            Err(Drain::Pending)
        }
    }
}

/// Input streams plus the packets the demuxer returns, in read order.
#[derive(Debug, Clone, Default)]
pub struct Script {
    streams: Vec<StreamDescriptor>,
    packets: Vec<FakePacket>,
    metadata: Vec<(String, String)>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(mut self, medium: media::Type, time_base: Rational, rate: Rational) -> Self {
        let codec_id = match medium {
            media::Type::Video => codec::Id::H264,
            media::Type::Audio => codec::Id::AAC,
            _ => codec::Id::None,
        };
        let index = self.streams.len();
        self.streams
            .push(StreamDescriptor::new(index, medium, codec_id, time_base, rate));
        self
    }

    /// 30 fps video in an mp4-style 1/15360 time base.
    pub fn video(self) -> Self {
        self.stream(
            media::Type::Video,
            Rational::new(1, 15360),
            Rational::new(30, 1),
        )
    }

    pub fn audio(self) -> Self {
        self.stream(
            media::Type::Audio,
            Rational::new(1, 48000),
            Rational::new(48000, 1),
        )
    }

    pub fn data(self) -> Self {
        self.stream(media::Type::Data, Rational::new(1, 1000), Rational::new(0, 1))
    }

    pub fn subtitle(self) -> Self {
        self.stream(
            media::Type::Subtitle,
            Rational::new(1, 1000),
            Rational::new(0, 1),
        )
    }

    pub fn unknown(self) -> Self {
        self.stream(
            media::Type::Unknown,
            Rational::new(1, 1000),
            Rational::new(0, 1),
        )
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }

    pub fn packet(mut self, stream: usize, pts: Option<i64>, size: usize) -> Self {
        let data = vec![(self.packets.len() % 251) as u8; size];
        self.packets.push(FakePacket::new(stream, pts, data));
        self
    }

    /// Appends `count` packets per listed stream, round-robin, with pts
    /// advancing by `step` and sizes growing from 100 bytes.
    pub fn interleaved(mut self, layout: &[(usize, usize, i64)]) -> Self {
        let longest = layout.iter().map(|(_, count, _)| *count).max().unwrap_or(0);
        for i in 0..longest {
            for &(stream, count, step) in layout {
                if i < count {
                    self = self.packet(stream, Some(i as i64 * step), 100 + i);
                }
            }
        }
        self
    }

    pub fn packets(&self) -> &[FakePacket] {
        &self.packets
    }
}

/// Knobs for delays and injected failures.
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    pub decoder_delay: usize,
    pub filter_delay: usize,
    /// Encoders with a delay report that they buffer internally.
    pub encoder_delay: usize,
    pub missing_decoder: Option<usize>,
    pub fail_decoder_open: Option<usize>,
    pub missing_parameters: Option<usize>,
    /// `(stream, n)`: the n-th packet sent to that stream's decoder fails.
    pub fail_decode_at: Option<(usize, usize)>,
    /// `(stream, n)`: the n-th frame sent to that stream's encoder fails.
    pub fail_encode_at: Option<(usize, usize)>,
    pub fail_read_at: Option<usize>,
    pub fail_header: bool,
    /// Cancels the token right after the n-th packet was read.
    pub cancel_after: Option<(usize, CancellationToken)>,
}

pub struct FakeEngine {
    script: Script,
    behaviour: Behaviour,
    ledger: Ledger,
}

impl FakeEngine {
    pub fn new(script: Script, behaviour: Behaviour) -> (Self, Ledger) {
        let ledger = Ledger::default();
        let engine = Self {
            script,
            behaviour,
            ledger: ledger.clone(),
        };
        (engine, ledger)
    }
}

pub struct FakeInput {
    _handle: Handle,
    streams: Vec<StreamDescriptor>,
    metadata: Vec<(String, String)>,
    packets: VecDeque<FakePacket>,
    reads: usize,
    fail_read_at: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl Demuxer for FakeInput {
    type Packet = FakePacket;

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self, packet: &mut FakePacket) -> EngineResult<Read> {
        if self.fail_read_at == Some(self.reads) {
            return Err(EngineError::other("truncated input"));
        }
        let Some(next) = self.packets.pop_front() else {
            return Ok(Read::EndOfInput);
        };
        *packet = next;
        self.reads += 1;
        if let Some((after, token)) = &self.cancel_after {
            if *after == self.reads {
                token.cancel();
            }
        }
        Ok(Read::Packet)
    }

    fn metadata(&self) -> Vec<(String, String)> {
        self.metadata.clone()
    }
}

pub struct FakeOutput {
    _handle: Handle,
    streams: Vec<Rational>,
    header: bool,
    fail_header: bool,
    ledger: Ledger,
}

impl Muxer for FakeOutput {
    type Packet = FakePacket;

    fn set_metadata(&mut self, tags: &[(String, String)]) {
        self.ledger.0.borrow_mut().output_metadata = tags.to_vec();
        self.ledger.event("metadata".to_string());
    }

    fn write_header(&mut self) -> EngineResult<()> {
        if self.fail_header {
            return Err(EngineError::other("cannot write header"));
        }
        self.header = true;
        self.ledger.event("header".to_string());
        Ok(())
    }

    fn write_interleaved(&mut self, packet: &mut FakePacket) -> EngineResult<()> {
        if !self.header {
            return Err(EngineError::other("header not written"));
        }
        if packet.stream >= self.streams.len() {
            return Err(EngineError::other(format!(
                "output stream #{} not found",
                packet.stream
            )));
        }
        let packet = std::mem::take(packet);
        self.ledger
            .0
            .borrow_mut()
            .written
            .entry(packet.stream)
            .or_default()
            .push(packet);
        Ok(())
    }

    fn write_trailer(&mut self) -> EngineResult<()> {
        self.ledger.event("trailer".to_string());
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        self.streams.get(index).copied()
    }
}

pub struct FakeDecoder {
    _handle: Handle,
    time_base: Rational,
    queue: DelayQueue<FakeFrame>,
    received: usize,
    fail_at: Option<usize>,
    ledger: Ledger,
}

impl Decoder for FakeDecoder {
    type Packet = FakePacket;
    type Frame = FakeFrame;

    fn alloc_frame(&self) -> FakeFrame {
        FakeFrame::new(self.ledger.clone())
    }

    fn send_packet(&mut self, packet: Option<&FakePacket>) -> EngineResult<()> {
        let frame = match packet {
            Some(packet) => {
                if self.fail_at == Some(self.received) {
                    return Err(EngineError::other("invalid data found when decoding"));
                }
                self.received += 1;
                let mut frame = FakeFrame::new(self.ledger.clone());
                frame.best_effort = packet.pts;
                frame.data = packet.data.clone();
                Some(frame)
            }
            None => None,
        };
        self.queue.push(frame)
    }

    fn receive_frame(&mut self, frame: &mut FakeFrame) -> EngineResult<Drain> {
        match self.queue.pull() {
            Ok(next) => {
                frame.fill_from(next);
                Ok(Drain::Ready)
            }
            Err(drain) => Ok(drain),
        }
    }

    fn packet_time_base(&self) -> Rational {
        self.time_base
    }
}

pub struct FakeFilter {
    _handle: Handle,
    sink_time_base: Rational,
    queue: DelayQueue<FakeFrame>,
}

impl FilterGraph for FakeFilter {
    type Frame = FakeFrame;

    fn push_frame(&mut self, frame: Option<&FakeFrame>) -> EngineResult<()> {
        self.queue.push(frame.cloned())
    }

    fn pull_frame(&mut self, frame: &mut FakeFrame) -> EngineResult<Drain> {
        match self.queue.pull() {
            Ok(next) => {
                frame.fill_from(next);
                Ok(Drain::Ready)
            }
            Err(drain) => Ok(drain),
        }
    }

    fn sink_time_base(&self) -> Rational {
        self.sink_time_base
    }
}

pub struct FakeEncoder {
    _handle: Handle,
    stream: usize,
    time_base: Rational,
    queue: DelayQueue<FakePacket>,
    buffers: bool,
    received: usize,
    fail_at: Option<usize>,
    ledger: Ledger,
}

impl Encoder for FakeEncoder {
    type Packet = FakePacket;
    type Frame = FakeFrame;

    fn send_frame(&mut self, frame: Option<&FakeFrame>) -> EngineResult<()> {
        let packet = match frame {
            Some(frame) => {
                if self.fail_at == Some(self.received) {
                    return Err(EngineError::other("encoder rejected frame"));
                }
                self.received += 1;
                let mut state = self.ledger.0.borrow_mut();
                state.encoded.entry(self.stream).or_default().push(frame.pts);
                if frame.picture_type_cleared {
                    state.cleared_picture_types += 1;
                }
                drop(state);
                Some(FakePacket::new(self.stream, frame.pts, frame.data.clone()))
            }
            None => None,
        };
        self.queue.push(packet)
    }

    fn receive_packet(&mut self, packet: &mut FakePacket) -> EngineResult<Drain> {
        match self.queue.pull() {
            Ok(next) => {
                *packet = next;
                Ok(Drain::Ready)
            }
            Err(drain) => Ok(drain),
        }
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn buffers_internally(&self) -> bool {
        self.buffers
    }
}

impl Engine for FakeEngine {
    type Codec = String;
    type Packet = FakePacket;
    type Frame = FakeFrame;
    type Input = FakeInput;
    type Output = FakeOutput;
    type Decoder = FakeDecoder;
    type Encoder = FakeEncoder;
    type Filter = FakeFilter;

    fn open_input(&self, path: &Path) -> EngineResult<FakeInput> {
        if path == Path::new("missing.mp4") {
            return Err(EngineError::other("No such file or directory"));
        }
        if path == Path::new("truncated.mp4") {
            return Err(EngineError::StreamInfo(ffmpeg_next::Error::InvalidData));
        }
        Ok(FakeInput {
            _handle: self.ledger.open("input"),
            streams: self.script.streams.clone(),
            metadata: self.script.metadata.clone(),
            packets: self.script.packets.iter().cloned().collect(),
            reads: 0,
            fail_read_at: self.behaviour.fail_read_at,
            cancel_after: self.behaviour.cancel_after.clone(),
        })
    }

    fn find_decoder(&self, stream: &StreamDescriptor) -> Option<String> {
        if self.behaviour.missing_decoder == Some(stream.index()) {
            return None;
        }
        Some(format!("{:?}", stream.codec_id()).to_lowercase())
    }

    fn open_decoder(
        &self,
        _codec: &String,
        _input: &FakeInput,
        stream: &StreamDescriptor,
    ) -> EngineResult<FakeDecoder> {
        let index = stream.index();
        if self.behaviour.fail_decoder_open == Some(index) {
            return Err(EngineError::other("cannot open decoder"));
        }
        if self.behaviour.missing_parameters == Some(index) {
            return Err(EngineError::MissingParameters(format!(
                "stream #{index} has no size"
            )));
        }
        let name = format!("decoder#{index}");
        Ok(FakeDecoder {
            _handle: self.ledger.open(&name),
            time_base: stream.time_base(),
            queue: DelayQueue::new(name, self.behaviour.decoder_delay, self.ledger.clone()),
            received: 0,
            fail_at: self
                .behaviour
                .fail_decode_at
                .and_then(|(s, n)| (s == index).then_some(n)),
            ledger: self.ledger.clone(),
        })
    }

    fn create_output(&self, path: &Path) -> EngineResult<FakeOutput> {
        if path == Path::new("/read-only/out.mkv") {
            return Err(EngineError::other("Permission denied"));
        }
        Ok(FakeOutput {
            _handle: self.ledger.open("output"),
            streams: Vec::new(),
            header: false,
            fail_header: self.behaviour.fail_header,
            ledger: self.ledger.clone(),
        })
    }

    fn find_encoder(&self, name: &str) -> Option<String> {
        (name != "missing").then(|| name.to_string())
    }

    fn open_encoder(
        &self,
        codec: &String,
        stream: &StreamDescriptor,
        _decoder: &FakeDecoder,
        _output: &FakeOutput,
    ) -> EngineResult<FakeEncoder> {
        if codec == "broken" {
            return Err(EngineError::other("cannot open encoder"));
        }
        let index = stream.index();
        let time_base = if stream.is_video() && stream.rate().numerator() > 0 {
            stream.rate().invert()
        } else {
            stream.time_base()
        };
        let name = format!("encoder#{index}");
        Ok(FakeEncoder {
            _handle: self.ledger.open(&name),
            stream: index,
            time_base,
            queue: DelayQueue::new(name, self.behaviour.encoder_delay, self.ledger.clone()),
            buffers: self.behaviour.encoder_delay > 0,
            received: 0,
            fail_at: self
                .behaviour
                .fail_encode_at
                .and_then(|(s, n)| (s == index).then_some(n)),
            ledger: self.ledger.clone(),
        })
    }

    fn add_encoded_stream(
        &self,
        output: &mut FakeOutput,
        encoder: &FakeEncoder,
    ) -> EngineResult<usize> {
        output.streams.push(encoder.time_base);
        Ok(output.streams.len() - 1)
    }

    fn add_copied_stream(
        &self,
        output: &mut FakeOutput,
        _input: &FakeInput,
        stream: &StreamDescriptor,
    ) -> EngineResult<usize> {
        output.streams.push(stream.time_base());
        Ok(output.streams.len() - 1)
    }

    fn build_filter(
        &self,
        decoder: &FakeDecoder,
        encoder: &FakeEncoder,
        expression: &str,
    ) -> EngineResult<FakeFilter> {
        if expression == "invalid" {
            return Err(EngineError::other("no such filter: 'invalid'"));
        }
        let name = format!("filter#{}", encoder.stream);
        Ok(FakeFilter {
            _handle: self.ledger.open(&name),
            sink_time_base: decoder.time_base,
            queue: DelayQueue::new(name, self.behaviour.filter_delay, self.ledger.clone()),
        })
    }

    fn alloc_packet(&self) -> FakePacket {
        FakePacket::default()
    }
}
