//! Decoder for Cleanflight/Betaflight blackbox flight-data-recorder logs:
//! the ASCII header block, the field-definition tables it declares, and the
//! binary frame stream that follows (intra/inter main-loop frames, GPS
//! frames, slow frames, and events).

pub mod bitstream;
pub mod error;
pub mod frame;
pub mod stream;

pub use error::{BlackboxError, Result};
pub use frame::event::{Event, EventType};
pub use frame::{Frame, FrameType};
pub use stream::decoder::DecoderEvent;
pub use stream::header::{FieldDef, Header};
pub use stream::parser::{BlackboxReader, BlackboxRecord, MultiSegmentBlackboxReader};
pub use stream::predictor::PredictorKind;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(stream::header::SIGNATURE);
        buf.extend_from_slice(b"H Data version:2\n");
        buf.extend_from_slice(b"H I interval:32\n");
        buf.extend_from_slice(b"H P interval:1/1\n");
        buf.extend_from_slice(b"H Field I name:loopIteration,time,motor[0]\n");
        buf.extend_from_slice(b"H Field I signed:0,0,0\n");
        buf.extend_from_slice(b"H Field I predictor:0,0,0\n");
        buf.extend_from_slice(b"H Field I encoding:1,1,1\n");
        buf.push(b'I');
        buf.push(0x00); // loopIteration = 0
        buf.extend_from_slice(&[0x96, 0x01]); // time = 150
        buf.push(0xdc); // motor[0], first byte of LEB128 1500
        buf.push(0x0b);
        buf.push(b'E');
        buf.push(255);
        buf.extend_from_slice(b"End of log\0");
        buf
    }

    #[test]
    fn end_to_end_decodes_a_minimal_session() -> anyhow::Result<()> {
        let data = sample_log();
        let reader = BlackboxReader::from_bytes(&data)?;
        assert_eq!(reader.field_names(), vec!["loopIteration", "time", "motor[0]"]);

        let records: Vec<_> = reader.records().collect::<Result<_>>()?;
        assert_eq!(records.len(), 2);
        match &records[0] {
            BlackboxRecord::Main(frame) => assert_eq!(frame.data, vec![0, 150, 1500]),
            other => panic!("expected a main frame, got {other:?}"),
        }
        Ok(())
    }
}
