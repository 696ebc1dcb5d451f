//! The frame dispatcher. Walks the payload one frame-type byte at a time,
//! decodes its fields through the `EncodingKind`/`PredictorKind` machinery,
//! and resynchronizes on garbage type bytes instead of giving up on the
//! rest of the session.

use crate::bitstream::BitStream;
use crate::error::{BlackboxError, Result};
use crate::frame::event::{decode_event, Event, EventType};
use crate::frame::{Frame, FrameType};
use crate::stream::header::{FieldDef, Header};
use crate::stream::predictor::{History, PredictorContext, PredictorKind};

/// One thing the dispatcher produced while walking the payload: a decoded
/// frame, an event, or a note that it skipped bytes to find the next
/// plausible frame-type byte.
#[derive(Clone, Debug)]
pub enum DecoderEvent {
    Frame(Frame),
    Event(Event),
    Resync { skipped: u64 },
}

/// Walks one session's payload bytes, byte-aligned, one frame at a time.
/// Iterate it for the frame/event/resync stream; `resync_count` afterwards
/// reports how many times it had to recover from a garbage type byte.
pub struct FrameDecoder<'h, 'd> {
    bs: BitStream<'d>,
    header: &'h Header,
    history: History,
    time_field_ix: Option<usize>,
    motor0_ix: Option<usize>,
    minthrottle: i64,
    vbatref: i64,
    min_motor_output: i64,
    resync_count: u64,
    ended: bool,
}

impl<'h, 'd> FrameDecoder<'h, 'd> {
    pub fn new(header: &'h Header, data: &'d [u8]) -> Self {
        let time_field_ix = header.i_fields.iter().position(|f| f.name == "time");
        let motor0_ix = header.i_fields.iter().position(|f| f.name == "motor[0]");
        FrameDecoder {
            bs: BitStream::new(data),
            header,
            history: History::new(header.i_fields.len(), header.s_fields.len()),
            time_field_ix,
            motor0_ix,
            minthrottle: header.minthrottle().unwrap_or(0),
            vbatref: header.vbatref().unwrap_or(0),
            min_motor_output: header.motor_output().map(|(lo, _)| lo).unwrap_or(0),
            resync_count: 0,
            ended: false,
        }
    }

    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }

    pub fn offset(&self) -> u64 {
        self.bs.tell()
    }

    /// Decodes one frame's worth of fields. Each group (run of fields
    /// sharing one encoded token) is decoded once, then its raw values are
    /// fed through their predictors one at a time, left to right, so that
    /// `Motor0` can see fields decoded earlier in the same frame.
    fn decode_fields(
        &mut self,
        fields: &[FieldDef],
        reference: &[i64],
        reference2: &[i64],
        gps_home: [i64; 2],
    ) -> Result<Vec<i64>> {
        let mut current = vec![0i64; fields.len()];
        let mut home_coord_seen = 0usize;
        let mut ix = 0;
        while ix < fields.len() {
            let field = &fields[ix];
            let group_len = field.encoding.group_len();
            let raw_values = field.encoding.decode(&mut self.bs)?;
            if raw_values.len() != group_len {
                return Err(BlackboxError::MalformedEncoding(format!(
                    "{} decoded {} values, expected {}",
                    field.name,
                    raw_values.len(),
                    group_len
                )));
            }
            for (j, raw) in raw_values.into_iter().enumerate() {
                let f = &fields[ix + j];
                let gps_coord_sub_ix = if f.predictor == PredictorKind::HomeCoord {
                    let sub = home_coord_seen % 2;
                    home_coord_seen += 1;
                    sub
                } else {
                    0
                };
                let ctx = PredictorContext {
                    current: &current,
                    reference,
                    reference2,
                    gps_home,
                    last_main_frame_time: self.history.last_time(self.time_field_ix),
                    minthrottle: self.minthrottle,
                    vbatref: self.vbatref,
                    min_motor_output: self.min_motor_output,
                    field_ix: ix + j,
                    motor0_ix: self.motor0_ix,
                    gps_coord_sub_ix,
                    signed: f.signed,
                };
                current[ix + j] = f.predictor.apply(raw, &ctx);
            }
            ix += group_len;
        }
        Ok(current)
    }

    /// Skips bytes looking for one that could plausibly start a frame,
    /// rewinding onto it so the main loop re-reads it as a type byte.
    /// Returns the number of bytes it had to discard.
    fn resync(&mut self) -> u64 {
        let mut skipped = 0u64;
        loop {
            if self.bs.eof() {
                return skipped;
            }
            let pos = self.bs.tell();
            let b = match self.bs.read_u8() {
                Ok(b) => b,
                Err(_) => return skipped,
            };
            if FrameType::from_byte(b).is_some() {
                self.bs.seek(pos);
                return skipped;
            }
            skipped += 1;
        }
    }

    /// A codec or predictor error partway through a frame aborts that frame:
    /// seek back to one byte past the frame-type byte and resume scanning
    /// for the next plausible type byte from there, same as an invalid type
    /// byte would. `UnexpectedEof` can't be resynced past — there's nothing
    /// left to scan — so it ends the session cleanly instead.
    fn recover_from_frame_error(&mut self, start: u64, err: BlackboxError) -> Option<Result<DecoderEvent>> {
        if matches!(err, BlackboxError::UnexpectedEof) {
            self.ended = true;
            return None;
        }
        log::warn!("{err}, resyncing");
        self.bs.seek(start + 1);
        let skipped = 1 + self.resync();
        self.resync_count += skipped;
        Some(Ok(DecoderEvent::Resync { skipped }))
    }
}

impl<'h, 'd> Iterator for FrameDecoder<'h, 'd> {
    type Item = Result<DecoderEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ended {
            return None;
        }
        loop {
            if self.bs.eof() {
                return None;
            }
            let start = self.bs.tell();
            let type_byte = match self.bs.read_u8() {
                Ok(b) => b,
                Err(_) => return None,
            };
            let frame_type = match FrameType::from_byte(type_byte) {
                Some(t) => t,
                None => {
                    let skipped = self.resync() + 1;
                    self.resync_count += skipped;
                    return Some(Ok(DecoderEvent::Resync { skipped }));
                }
            };

            match frame_type {
                FrameType::Event => match decode_event(&mut self.bs) {
                    Ok(event) => {
                        if event.event_type == EventType::EndOfLog {
                            self.ended = true;
                        }
                        return Some(Ok(DecoderEvent::Event(event)));
                    }
                    Err(e) => match self.recover_from_frame_error(start, e) {
                        Some(item) => return Some(item),
                        None => return None,
                    },
                },
                FrameType::Intra => {
                    let fields = self.header.i_fields.clone();
                    let reference = self.history.last().to_vec();
                    let reference2 = self.history.last2().to_vec();
                    let gps_home = self.history.gps_home();
                    match self.decode_fields(&fields, &reference, &reference2, gps_home) {
                        Ok(data) => {
                            self.history.accept_intra(data.clone());
                            return Some(Ok(DecoderEvent::Frame(Frame {
                                frame_type: FrameType::Intra,
                                data,
                                start_offset: start,
                                end_offset: self.bs.tell(),
                            })));
                        }
                        Err(e) => match self.recover_from_frame_error(start, e) {
                            Some(item) => return Some(item),
                            None => return None,
                        },
                    }
                }
                FrameType::Inter => {
                    let fields = self.header.p_fields.clone();
                    let reference = self.history.last().to_vec();
                    let reference2 = self.history.last2().to_vec();
                    let gps_home = self.history.gps_home();
                    let has_intra = self.history.has_intra();
                    match self.decode_fields(&fields, &reference, &reference2, gps_home) {
                        Ok(data) => {
                            // A P-frame seen before any I-frame has no valid
                            // reference to predict from; discard it and
                            // surface a resync rather than a bogus delta.
                            if !has_intra {
                                let skipped = self.bs.tell() - start;
                                self.resync_count += skipped;
                                return Some(Ok(DecoderEvent::Resync { skipped }));
                            }
                            self.history.accept_inter(data.clone());
                            return Some(Ok(DecoderEvent::Frame(Frame {
                                frame_type: FrameType::Inter,
                                data,
                                start_offset: start,
                                end_offset: self.bs.tell(),
                            })));
                        }
                        Err(e) => match self.recover_from_frame_error(start, e) {
                            Some(item) => return Some(item),
                            None => return None,
                        },
                    }
                }
                FrameType::Slow => {
                    let fields = self.header.s_fields.clone();
                    let reference = self.history.last_slow().to_vec();
                    let gps_home = self.history.gps_home();
                    match self.decode_fields(&fields, &reference, &reference, gps_home) {
                        Ok(data) => {
                            self.history.accept_slow(data.clone());
                            return Some(Ok(DecoderEvent::Frame(Frame {
                                frame_type: FrameType::Slow,
                                data,
                                start_offset: start,
                                end_offset: self.bs.tell(),
                            })));
                        }
                        Err(e) => match self.recover_from_frame_error(start, e) {
                            Some(item) => return Some(item),
                            None => return None,
                        },
                    }
                }
                FrameType::Gps => {
                    let fields = self.header.g_fields.clone();
                    let gps_home = self.history.gps_home();
                    match self.decode_fields(&fields, &[], &[], gps_home) {
                        Ok(data) => {
                            return Some(Ok(DecoderEvent::Frame(Frame {
                                frame_type: FrameType::Gps,
                                data,
                                start_offset: start,
                                end_offset: self.bs.tell(),
                            })));
                        }
                        Err(e) => match self.recover_from_frame_error(start, e) {
                            Some(item) => return Some(item),
                            None => return None,
                        },
                    }
                }
                FrameType::GpsHome => {
                    let fields = self.header.h_fields.clone();
                    match self.decode_fields(&fields, &[], &[], [0, 0]) {
                        Ok(data) => {
                            let home = [
                                data.first().copied().unwrap_or(0),
                                data.get(1).copied().unwrap_or(0),
                            ];
                            self.history.accept_gps_home(home);
                            return Some(Ok(DecoderEvent::Frame(Frame {
                                frame_type: FrameType::GpsHome,
                                data,
                                start_offset: start,
                                end_offset: self.bs.tell(),
                            })));
                        }
                        Err(e) => match self.recover_from_frame_error(start, e) {
                            Some(item) => return Some(item),
                            None => return None,
                        },
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encoding::EncodingKind;
    use crate::stream::header::FieldDef;

    fn field(name: &str, predictor: PredictorKind, encoding: EncodingKind) -> FieldDef {
        FieldDef {
            name: name.into(),
            signed: false,
            predictor,
            encoding,
            group_index: 0,
        }
    }

    fn header_with_i_fields(fields: Vec<FieldDef>) -> Header {
        Header {
            i_fields: fields,
            ..Header::default()
        }
    }

    #[test]
    fn decodes_single_intra_frame() {
        let header = header_with_i_fields(vec![
            field("loopIteration", PredictorKind::Zero, EncodingKind::UnsignedVb),
            field("time", PredictorKind::Zero, EncodingKind::UnsignedVb),
        ]);
        // 'I', loopIteration=0, time=150 (LEB128 0x96 0x01)
        let data = [b'I', 0x00, 0x96, 0x01];
        let mut decoder = FrameDecoder::new(&header, &data);
        let event = decoder.next().unwrap().unwrap();
        match event {
            DecoderEvent::Frame(frame) => {
                assert_eq!(frame.frame_type, FrameType::Intra);
                assert_eq!(frame.data, vec![0, 150]);
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert!(decoder.next().is_none());
    }

    #[test]
    fn p_frame_before_i_frame_is_discarded_as_resync() {
        let header = Header {
            p_fields: vec![field("loopIteration", PredictorKind::Previous, EncodingKind::UnsignedVb)],
            ..Header::default()
        };
        let data = [b'P', 0x05];
        let mut decoder = FrameDecoder::new(&header, &data);
        match decoder.next().unwrap().unwrap() {
            DecoderEvent::Resync { skipped } => assert_eq!(skipped, 2),
            other => panic!("expected a resync, got {other:?}"),
        }
        assert!(decoder.next().is_none());
        assert_eq!(decoder.resync_count(), 2);
    }

    #[test]
    fn inter_frame_predicts_from_previous_intra() {
        let header = Header {
            i_fields: vec![field("loopIteration", PredictorKind::Zero, EncodingKind::UnsignedVb)],
            p_fields: vec![field("loopIteration", PredictorKind::Previous, EncodingKind::SignedVb)],
            ..Header::default()
        };
        // I: loopIteration = 100. P: zig-zag-encoded delta of +1 on top of it.
        let data = [b'I', 100, b'P', 0x02];
        let mut decoder = FrameDecoder::new(&header, &data);
        match decoder.next().unwrap().unwrap() {
            DecoderEvent::Frame(frame) => assert_eq!(frame.data, vec![100]),
            other => panic!("expected the I frame, got {other:?}"),
        }
        match decoder.next().unwrap().unwrap() {
            DecoderEvent::Frame(frame) => assert_eq!(frame.data, vec![101]),
            other => panic!("expected the P frame, got {other:?}"),
        }
        assert!(decoder.next().is_none());
    }

    #[test]
    fn resyncs_past_garbage_type_byte() {
        let header = header_with_i_fields(vec![field(
            "loopIteration",
            PredictorKind::Zero,
            EncodingKind::UnsignedVb,
        )]);
        let data = [0xaa, 0xbb, b'I', 0x07];
        let mut decoder = FrameDecoder::new(&header, &data);
        let first = decoder.next().unwrap().unwrap();
        match first {
            DecoderEvent::Resync { skipped } => assert_eq!(skipped, 2),
            other => panic!("expected a resync, got {other:?}"),
        }
        let second = decoder.next().unwrap().unwrap();
        match second {
            DecoderEvent::Frame(frame) => assert_eq!(frame.data, vec![7]),
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(decoder.resync_count(), 2);
    }

    #[test]
    fn mid_frame_codec_error_resyncs_instead_of_erroring() {
        let header = header_with_i_fields(vec![field(
            "loopIteration",
            PredictorKind::Zero,
            EncodingKind::UnsignedVb,
        )]);
        // First 'I' frame's VB run never terminates (5 continuation bytes,
        // no terminator) -> MalformedEncoding. A second, well-formed 'I'
        // frame follows; the decoder must recover into it rather than
        // bubbling the error out of the iterator.
        let data = [b'I', 0x80, 0x80, 0x80, 0x80, 0x80, b'I', 0x07];
        let mut decoder = FrameDecoder::new(&header, &data);
        match decoder.next().unwrap().unwrap() {
            DecoderEvent::Resync { skipped } => assert_eq!(skipped, 6),
            other => panic!("expected a resync, got {other:?}"),
        }
        match decoder.next().unwrap().unwrap() {
            DecoderEvent::Frame(frame) => assert_eq!(frame.data, vec![7]),
            other => panic!("expected a frame, got {other:?}"),
        }
        assert!(decoder.next().is_none());
        assert_eq!(decoder.resync_count(), 6);
    }

    #[test]
    fn end_of_log_event_stops_iteration() {
        let header = Header::default();
        let mut data = vec![b'E', 255];
        data.extend_from_slice(b"End of log\0");
        let mut decoder = FrameDecoder::new(&header, &data);
        let event = decoder.next().unwrap().unwrap();
        assert!(matches!(
            event,
            DecoderEvent::Event(Event { event_type: EventType::EndOfLog, .. })
        ));
        assert!(decoder.next().is_none());
    }
}
