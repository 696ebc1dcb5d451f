//! The public reader API. `BlackboxReader` decodes one session (the header
//! plus the frame/event stream that follows it); `MultiSegmentBlackboxReader`
//! locates every session in a file that concatenates several logs and hands
//! out a `BlackboxReader` for whichever one is selected.

use crate::error::{BlackboxError, Result};
use crate::frame::event::Event;
use crate::frame::Frame;
use crate::stream::decoder::{DecoderEvent, FrameDecoder};
use crate::stream::header::{find_session_offsets, scan_headers, Header};

/// One decoded unit handed out by [`BlackboxReader::records`]: a main-loop
/// frame, a GPS frame (either a fix or the home-position anchor), a slow
/// frame, an event, or a note that bytes had to be skipped to resynchronize.
#[derive(Clone, Debug)]
pub enum BlackboxRecord {
    Main(Frame),
    Gnss(Frame),
    Slow(Frame),
    Event(Event),
    Garbage(u64),
}

/// A single session: its header plus the payload bytes between the end of
/// the header and the start of the next session (or end of file).
pub struct BlackboxReader<'d> {
    pub header: Header,
    data: &'d [u8],
    payload_start: usize,
    payload_end: usize,
}

impl<'d> BlackboxReader<'d> {
    /// Parses the single session starting at byte 0 of `data`, requiring
    /// the product signature to be present.
    pub fn from_bytes(data: &'d [u8]) -> Result<Self> {
        Self::parse_at(data, 0, data.len(), false)
    }

    /// As `from_bytes`, but tolerates a missing or garbled signature line:
    /// whatever header lines are present are still read.
    pub fn from_bytes_allow_invalid_header(data: &'d [u8]) -> Result<Self> {
        Self::parse_at(data, 0, data.len(), true)
    }

    fn parse_at(data: &'d [u8], start: usize, end: usize, allow_invalid_header: bool) -> Result<Self> {
        let (header, payload_start) = scan_headers(data, start, allow_invalid_header)?;
        Ok(BlackboxReader {
            header,
            data,
            payload_start,
            payload_end: end,
        })
    }

    /// Bytes left between the end of the header and the end of this
    /// session, regardless of how much of the payload has been iterated.
    pub fn remaining_bytes(&self) -> usize {
        self.payload_end.saturating_sub(self.payload_start)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.header.i_field_names()
    }

    /// Iterates the frame/event stream for this session. Each element is
    /// `Err` only for a genuinely unrecoverable payload error (truncated
    /// mid-frame); a garbage byte run surfaces as `BlackboxRecord::Garbage`
    /// rather than stopping iteration.
    pub fn records(&self) -> Records<'_, 'd> {
        Records {
            inner: FrameDecoder::new(&self.header, &self.data[self.payload_start..self.payload_end]),
        }
    }
}

/// The iterator returned by [`BlackboxReader::records`].
pub struct Records<'h, 'd> {
    inner: FrameDecoder<'h, 'd>,
}

impl<'h, 'd> Records<'h, 'd> {
    pub fn resync_count(&self) -> u64 {
        self.inner.resync_count()
    }
}

impl<'h, 'd> Iterator for Records<'h, 'd> {
    type Item = Result<BlackboxRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|res| {
            res.map(|event| match event {
                DecoderEvent::Frame(frame) => match frame.frame_type {
                    crate::frame::FrameType::Intra | crate::frame::FrameType::Inter => {
                        BlackboxRecord::Main(frame)
                    }
                    crate::frame::FrameType::Gps | crate::frame::FrameType::GpsHome => {
                        BlackboxRecord::Gnss(frame)
                    }
                    crate::frame::FrameType::Slow => BlackboxRecord::Slow(frame),
                    crate::frame::FrameType::Event => unreachable!("events arrive as DecoderEvent::Event"),
                },
                DecoderEvent::Event(event) => BlackboxRecord::Event(event),
                DecoderEvent::Resync { skipped } => BlackboxRecord::Garbage(skipped),
            })
        })
    }
}

/// Locates every session signature in a file that may concatenate several
/// logs back to back and hands out a `BlackboxReader` for the selected one.
/// `log_index` is 1-based throughout, matching how pilots and ground
/// station tools number flights within a merged log.
pub struct MultiSegmentBlackboxReader<'d> {
    data: &'d [u8],
    offsets: Vec<u64>,
    /// 0-based position into `offsets`; `log_index()` reports it as 1-based.
    current_index: usize,
}

impl<'d> MultiSegmentBlackboxReader<'d> {
    /// Scans every session in `data` and selects log index 1.
    pub fn from_bytes(data: &'d [u8]) -> Result<Self> {
        let offsets = find_session_offsets(data);
        if offsets.is_empty() {
            return Err(BlackboxError::InvalidHeader);
        }
        Ok(MultiSegmentBlackboxReader {
            data,
            offsets,
            current_index: 0,
        })
    }

    pub fn log_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn log_pointers(&self) -> &[u64] {
        &self.offsets
    }

    /// 1-based index of the currently-selected session.
    pub fn log_index(&self) -> u32 {
        self.current_index as u32 + 1
    }

    /// Selects session `index`, 1-based (`i` in `[1, log_count]`). Out of
    /// range fails with `NoSuchLog`.
    pub fn set_log_index(&mut self, index: u32) -> Result<()> {
        if index < 1 || index > self.log_count() {
            return Err(BlackboxError::NoSuchLog {
                index,
                log_count: self.log_count(),
            });
        }
        self.current_index = (index - 1) as usize;
        Ok(())
    }

    /// Parses the currently-selected session's header and hands back a
    /// reader scoped to just its payload bytes.
    pub fn load_session(&self) -> Result<BlackboxReader<'d>> {
        let start = self.offsets[self.current_index] as usize;
        let end = self
            .offsets
            .get(self.current_index + 1)
            .map(|&o| o as usize)
            .unwrap_or(self.data.len());
        BlackboxReader::parse_at(self.data, start, end, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(crate::stream::header::SIGNATURE);
        buf.extend_from_slice(b"H Data version:2\n");
        buf.extend_from_slice(b"H I interval:32\n");
        buf.extend_from_slice(b"H P interval:1/1\n");
        buf.extend_from_slice(b"H Field I name:loopIteration,time\n");
        buf.extend_from_slice(b"H Field I signed:0,0\n");
        buf.extend_from_slice(b"H Field I predictor:0,0\n");
        buf.extend_from_slice(b"H Field I encoding:1,1\n");
        buf.push(b'I');
        buf.push(0x00); // loopIteration = 0
        buf.extend_from_slice(&[0x96, 0x01]); // time = 150
        buf.push(b'E');
        buf.push(255);
        buf.extend_from_slice(b"End of log\0");
        buf
    }

    #[test]
    fn single_session_round_trips_one_frame() {
        let data = sample_log();
        let reader = BlackboxReader::from_bytes(&data).unwrap();
        let records: Vec<_> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            BlackboxRecord::Main(frame) => assert_eq!(frame.data, vec![0, 150]),
            other => panic!("expected a main frame, got {other:?}"),
        }
        assert!(matches!(records[1], BlackboxRecord::Event(_)));
    }

    #[test]
    fn allow_invalid_header_parses_when_signature_missing() {
        let data = b"H Data version:2\n".to_vec();
        assert!(BlackboxReader::from_bytes(&data).is_err());
        let reader = BlackboxReader::from_bytes_allow_invalid_header(&data).unwrap();
        assert_eq!(reader.header.data_version().unwrap(), 2);
    }

    #[test]
    fn multi_session_reader_splits_concatenated_logs() {
        let mut data = sample_log();
        let first_len = data.len();
        data.extend_from_slice(&sample_log());

        let mut reader = MultiSegmentBlackboxReader::from_bytes(&data).unwrap();
        assert_eq!(reader.log_count(), 2);
        assert_eq!(reader.log_pointers(), &[0, first_len as u64]);
        assert_eq!(reader.log_index(), 1);

        let first = reader.load_session().unwrap();
        assert!(first.remaining_bytes() > 0);
        let first_records: Vec<_> = first.records().collect::<Result<_>>().unwrap();
        assert_eq!(first_records.len(), 2);

        reader.set_log_index(2).unwrap();
        let second = reader.load_session().unwrap();
        let second_records: Vec<_> = second.records().collect::<Result<_>>().unwrap();
        assert_eq!(second_records.len(), 2);

        assert!(reader.set_log_index(0).is_err());
        assert!(reader.set_log_index(3).is_err());
    }
}
