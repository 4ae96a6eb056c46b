//! Multi-mode frame detection state machine.
//!
//! [`FrameExtractor`] consumes arbitrary-sized byte chunks, stages them in an
//! owned [`RingBuffer`], and drains complete frames to exhaustion on every
//! [`FrameExtractor::feed`] call. The detection strategy is selected by the
//! configured [`OperationMode`] and [`FrameDetection`]:
//!
//! - **QuickPlot** accepts `\n`, `\r\n` and `\r` as line terminators
//! - **DeviceSendsJson** scans for start/end delimited objects (`{`/`}` when
//!   no explicit sequences are configured)
//! - **ProjectFile** honors the configured detection mode, including optional
//!   checksum trailers after the finish sequence
//!
//! Extracted frames land in a bounded FIFO (4096 entries, drop-oldest) and
//! are handed out through [`FrameExtractor::dequeue`]. A checksum trailer
//! that has not fully arrived defers extraction — the candidate frame stays
//! buffered untouched until more bytes arrive.

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::buffer::RingBuffer;
use crate::checksum;
use crate::config::{FrameDetection, FrameExtractorConfig, OperationMode};
use crate::error::Result;
use crate::types::Frame;

/// Bounded frame-queue capacity. Enqueueing past this evicts the oldest
/// frame rather than blocking the producer.
pub const FRAME_QUEUE_CAPACITY: usize = 4096;

/// QuickPlot line terminators in priority order: at equal offsets the
/// earlier entry wins, so `\r\n` is consumed as one terminator rather than
/// a bare `\r`.
const QUICK_PLOT_TERMINATORS: [&[u8]; 3] = [b"\n", b"\r\n", b"\r"];

/// Default JSON object delimiters for `DeviceSendsJson` when no explicit
/// sequences are configured.
const JSON_START: &[u8] = b"{";
const JSON_FINISH: &[u8] = b"}";

/// Outcome of checksum validation for one candidate frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidationStatus {
    /// Trailer matched (or no checksum configured)
    FrameOk,
    /// Trailer present but did not match
    ChecksumError,
    /// Not enough bytes buffered yet to read the trailer
    ChecksumIncomplete,
}

/// Frame-detection state machine over a ring buffer.
pub struct FrameExtractor {
    config: FrameExtractorConfig,
    buffer: RingBuffer,
    queue: VecDeque<Frame>,
    sequence: u64,
    checksum_length: usize,
    frames_extracted: u64,
}

impl FrameExtractor {
    /// Build an extractor from a validated configuration.
    pub fn new(config: FrameExtractorConfig) -> Result<Self> {
        config.validate()?;
        let checksum_length = checksum::trailer_length(config.effective_checksum());
        let buffer = RingBuffer::new(config.buffer_capacity);
        Ok(Self {
            config,
            buffer,
            queue: VecDeque::new(),
            sequence: 0,
            checksum_length,
            frames_extracted: 0,
        })
    }

    /// Build an extractor with the default QuickPlot configuration.
    pub fn with_defaults() -> Self {
        // Default config always validates
        Self::new(FrameExtractorConfig::default()).expect("default config is valid")
    }

    /// Replace the configuration mid-stream.
    ///
    /// Already-buffered bytes are not reprocessed retroactively — the new
    /// rules only apply to subsequent scans. Changing `buffer_capacity`
    /// reallocates the ring and drops buffered bytes.
    pub fn configure(&mut self, config: FrameExtractorConfig) -> Result<()> {
        config.validate()?;
        if config.buffer_capacity != self.buffer.capacity() {
            self.buffer.set_capacity(config.buffer_capacity);
        }
        self.checksum_length = checksum::trailer_length(config.effective_checksum());
        self.config = config;
        Ok(())
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameExtractorConfig {
        &self.config
    }

    /// Ingest a chunk of bytes and extract every complete frame it enables.
    ///
    /// Returns the number of frames extracted by this call.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let before = self.frames_extracted;

        // Pass-through mode: the chunk itself is the frame
        if self.config.operation_mode == OperationMode::ProjectFile
            && self.config.frame_detection == FrameDetection::NoDelimiters
        {
            if !bytes.is_empty() {
                self.enqueue(bytes.to_vec(), true);
            }
            return (self.frames_extracted - before) as usize;
        }

        self.buffer.append(bytes);

        match self.config.operation_mode {
            OperationMode::QuickPlot => self.read_end_delimited(),
            OperationMode::DeviceSendsJson => self.read_start_end_delimited(),
            OperationMode::ProjectFile => match self.config.frame_detection {
                FrameDetection::EndDelimiterOnly => self.read_end_delimited(),
                FrameDetection::StartDelimiterOnly => self.read_start_delimited(),
                FrameDetection::StartAndEndDelimiter => self.read_start_end_delimited(),
                FrameDetection::NoDelimiters => unreachable!("handled above"),
            },
        }

        (self.frames_extracted - before) as usize
    }

    /// Pop the oldest queued frame.
    pub fn dequeue(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// Take every queued frame at once, oldest first.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.queue.drain(..).collect()
    }

    /// Number of queued frames awaiting dequeue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Bytes buffered but not yet framed.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Total frames extracted over this instance's lifetime.
    pub fn frames_extracted(&self) -> u64 {
        self.frames_extracted
    }

    /// Clear the ring buffer and the frame queue, and re-arm the sequence
    /// counter so the next extracted frame is numbered 1 again.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.queue.clear();
        self.sequence = 0;
    }

    fn effective_start(&self) -> &[u8] {
        if self.config.operation_mode == OperationMode::DeviceSendsJson
            && self.config.start_sequence.is_empty()
        {
            JSON_START
        } else {
            &self.config.start_sequence
        }
    }

    fn effective_finish(&self) -> &[u8] {
        if self.config.operation_mode == OperationMode::DeviceSendsJson
            && self.config.finish_sequence.is_empty()
        {
            JSON_FINISH
        } else {
            &self.config.finish_sequence
        }
    }

    /// Earliest end-of-frame terminator in the buffer: `(offset, length)`.
    fn find_terminator(&self) -> Option<(usize, usize)> {
        if self.config.operation_mode == OperationMode::QuickPlot {
            let mut best: Option<(usize, usize)> = None;
            for terminator in QUICK_PLOT_TERMINATORS {
                if let Some(index) = self.buffer.find_pattern(terminator) {
                    // Strict < keeps the higher-priority terminator on ties,
                    // so "\r\n" beats the bare "\r" at the same offset
                    if best.is_none_or(|(current, _)| index < current) {
                        best = Some((index, terminator.len()));
                    }
                }
            }
            best
        } else {
            let finish = self.effective_finish();
            self.buffer.find_pattern(finish).map(|index| (index, finish.len()))
        }
    }

    /// Frames terminated by a known end sequence (QuickPlot and
    /// project-file end-delimiter modes).
    fn read_end_delimited(&mut self) {
        loop {
            let Some((end_index, terminator_len)) = self.find_terminator() else {
                break;
            };

            let crc_position = end_index + terminator_len;
            let frame_end = crc_position + self.checksum_length;

            if end_index == 0 {
                // Empty frame: discard the terminator (and trailer) silently
                self.buffer.discard(frame_end);
                continue;
            }

            let payload = self.buffer.peek(end_index);
            match self.validate_trailer(&payload, crc_position) {
                ValidationStatus::FrameOk => {
                    self.enqueue(payload, true);
                    self.buffer.discard(frame_end);
                }
                ValidationStatus::ChecksumIncomplete => break,
                ValidationStatus::ChecksumError => {
                    self.enqueue(payload, false);
                    self.buffer.discard(frame_end);
                }
            }
        }
    }

    /// Frames bounded by two consecutive start sequences. The tail after the
    /// last located start stays buffered until a further start arrives.
    fn read_start_delimited(&mut self) {
        let start_len = self.config.start_sequence.len();

        loop {
            let Some(start_index) = self.buffer.find_pattern(&self.config.start_sequence) else {
                break;
            };

            let frame_start = start_index + start_len;
            let Some(next_start) =
                self.buffer.find_pattern_from(&self.config.start_sequence, frame_start)
            else {
                // Lone start: retain the tail, wait for the next delimiter
                break;
            };

            // Payload runs up to the next start, minus any checksum trailer
            let region_len = next_start - frame_start;
            if region_len <= self.checksum_length {
                self.buffer.discard(next_start);
                continue;
            }

            let payload_len = region_len - self.checksum_length;
            let staged = self.buffer.peek(next_start);
            let payload = staged[frame_start..frame_start + payload_len].to_vec();
            let trailer = &staged[frame_start + payload_len..next_start];

            let valid = self.checksum_length == 0
                || checksum::verify(self.config.effective_checksum(), &payload, trailer);
            if !valid {
                warn!(
                    algorithm = self.config.effective_checksum(),
                    payload_len, "checksum mismatch on start-delimited frame"
                );
            }
            self.enqueue(payload, valid);
            self.buffer.discard(next_start);
        }
    }

    /// Frames bounded by a start sequence and the following finish sequence.
    /// Bytes preceding the first start are protocol garbage and are consumed
    /// with the frame; a finish with no preceding start is discarded.
    fn read_start_end_delimited(&mut self) {
        let start = self.effective_start().to_vec();
        let finish = self.effective_finish().to_vec();

        loop {
            let Some(finish_index) = self.buffer.find_pattern(&finish) else {
                break;
            };

            let start_index = self.buffer.find_pattern(&start);
            let Some(start_index) = start_index.filter(|&s| s < finish_index) else {
                // Finish with no preceding start: resync past it
                self.buffer.discard(finish_index + finish.len());
                continue;
            };

            let frame_start = start_index + start.len();
            if frame_start >= finish_index {
                self.buffer.discard(finish_index + finish.len());
                continue;
            }

            let crc_position = finish_index + finish.len();
            let frame_end = crc_position + self.checksum_length;

            let staged = self.buffer.peek(finish_index);
            let payload = staged[frame_start..finish_index].to_vec();

            match self.validate_trailer(&payload, crc_position) {
                ValidationStatus::FrameOk => {
                    self.enqueue(payload, true);
                    self.buffer.discard(frame_end);
                }
                ValidationStatus::ChecksumIncomplete => break,
                ValidationStatus::ChecksumError => {
                    self.enqueue(payload, false);
                    self.buffer.discard(frame_end);
                }
            }
        }
    }

    /// Check the checksum trailer expected at `crc_position`.
    fn validate_trailer(&self, payload: &[u8], crc_position: usize) -> ValidationStatus {
        if self.checksum_length == 0 {
            return ValidationStatus::FrameOk;
        }

        if self.buffer.len() < crc_position + self.checksum_length {
            trace!(
                have = self.buffer.len(),
                need = crc_position + self.checksum_length,
                "checksum trailer incomplete, deferring extraction"
            );
            return ValidationStatus::ChecksumIncomplete;
        }

        let staged = self.buffer.peek(crc_position + self.checksum_length);
        let trailer = &staged[crc_position..];
        if checksum::verify(self.config.effective_checksum(), payload, trailer) {
            ValidationStatus::FrameOk
        } else {
            warn!(
                algorithm = self.config.effective_checksum(),
                payload_len = payload.len(),
                "checksum mismatch, delivering frame flagged invalid"
            );
            ValidationStatus::ChecksumError
        }
    }

    /// Stamp and queue a frame, evicting the oldest entry at capacity.
    fn enqueue(&mut self, payload: Vec<u8>, checksum_valid: bool) {
        self.sequence += 1;
        self.frames_extracted += 1;
        let frame = Frame::new(payload, self.sequence, checksum_valid);
        if self.queue.len() == FRAME_QUEUE_CAPACITY {
            self.queue.pop_front();
        }
        self.queue.push_back(frame);
    }
}
