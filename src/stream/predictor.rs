//! The predictor engine: one `PredictorKind` usable by every frame type,
//! each a tagged variant with a pure `apply` function rather than a virtual
//! dispatch per field.

use crate::error::{BlackboxError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictorKind {
    Zero,
    Previous,
    StraightLine,
    Average2,
    MinThrottle,
    Motor0,
    Increment,
    /// Unifies HOME_COORD and HOME_LAT: both select `gps_home[0]`/
    /// `gps_home[1]` by the field's position within its `GPS_coord` group,
    /// regardless of `Data version`.
    HomeCoord,
    Around1500,
    VbatRef,
    LastMainFrameTime,
    MinMotor,
}

impl PredictorKind {
    pub fn from_id(id: u32) -> Result<PredictorKind> {
        Ok(match id {
            0 => PredictorKind::Zero,
            1 => PredictorKind::Previous,
            2 => PredictorKind::StraightLine,
            3 => PredictorKind::Average2,
            4 => PredictorKind::MinThrottle,
            5 => PredictorKind::Motor0,
            6 => PredictorKind::Increment,
            7 => PredictorKind::HomeCoord,
            8 => PredictorKind::Around1500,
            9 => PredictorKind::VbatRef,
            10 => PredictorKind::LastMainFrameTime,
            11 => PredictorKind::MinMotor,
            12 => PredictorKind::HomeCoord,
            other => {
                return Err(BlackboxError::MalformedEncoding(format!(
                    "unknown predictor id {other}"
                )))
            }
        })
    }
}

/// Everything a predictor might need to compute its baseline. The decoder
/// fills this in once per frame and updates `current`/`field_ix` as it
/// decodes each field in order.
pub struct PredictorContext<'a> {
    /// Fields of the frame being built, already-decoded prefix valid
    /// (needed by `Motor0`, which references `motor[0]` decoded earlier in
    /// the same frame).
    pub current: &'a [i64],
    /// `last` for I/P frames, `last_slow` for S frames.
    pub reference: &'a [i64],
    /// `last2` for I/P frames; equal to `reference` for S frames (Average2
    /// on slow fields degenerates to `reference` on both sides).
    pub reference2: &'a [i64],
    pub gps_home: [i64; 2],
    pub last_main_frame_time: i64,
    pub minthrottle: i64,
    pub vbatref: i64,
    pub min_motor_output: i64,
    pub field_ix: usize,
    pub motor0_ix: Option<usize>,
    /// Position of this field within its `GPS_coord` group (0 or 1),
    /// selecting `gps_home[0]`/`gps_home[1]` for `HomeCoord`.
    pub gps_coord_sub_ix: usize,
    pub signed: bool,
}

impl PredictorKind {
    pub fn apply(&self, raw: i64, ctx: &PredictorContext) -> i64 {
        let baseline = match self {
            PredictorKind::Zero => 0,
            PredictorKind::Previous => ctx.reference.get(ctx.field_ix).copied().unwrap_or(0),
            PredictorKind::StraightLine => {
                let prev = ctx.reference.get(ctx.field_ix).copied().unwrap_or(0);
                let prev2 = ctx.reference2.get(ctx.field_ix).copied().unwrap_or(0);
                2 * prev - prev2
            }
            PredictorKind::Average2 => {
                let prev = ctx.reference.get(ctx.field_ix).copied().unwrap_or(0);
                let prev2 = ctx.reference2.get(ctx.field_ix).copied().unwrap_or(0);
                floor_div_2(prev + prev2)
            }
            PredictorKind::MinThrottle => ctx.minthrottle,
            PredictorKind::Motor0 => ctx
                .motor0_ix
                .and_then(|ix| ctx.current.get(ix))
                .copied()
                .unwrap_or(0),
            PredictorKind::Increment => ctx.reference.get(ctx.field_ix).copied().unwrap_or(0) + 1,
            PredictorKind::HomeCoord => ctx.gps_home[ctx.gps_coord_sub_ix.min(1)],
            PredictorKind::Around1500 => 1500,
            PredictorKind::VbatRef => ctx.vbatref,
            PredictorKind::LastMainFrameTime => ctx.last_main_frame_time,
            PredictorKind::MinMotor => ctx.min_motor_output,
        };

        narrow(raw + baseline, ctx.signed)
    }
}

/// Floor division by 2 toward negative infinity, for the AVERAGE_2 predictor.
#[inline]
fn floor_div_2(sum: i64) -> i64 {
    if sum >= 0 {
        sum / 2
    } else {
        (sum - 1) / 2
    }
}

/// Narrows the predicted value to 32-bit signed or unsigned, matching the
/// field's declared signedness.
#[inline]
fn narrow(value: i64, signed: bool) -> i64 {
    if signed {
        value as i32 as i64
    } else {
        value as u32 as i64
    }
}

/// Owns the sliding history the predictor engine reads from: the last two
/// fully-decoded I/P frames, the last S frame, and the GPS-home fix.
pub struct History {
    last: Vec<i64>,
    last2: Vec<i64>,
    last_slow: Vec<i64>,
    gps_home: [i64; 2],
    has_intra: bool,
    has_slow: bool,
    has_gps_home: bool,
}

impl History {
    pub fn new(ip_field_count: usize, s_field_count: usize) -> Self {
        History {
            last: vec![0; ip_field_count],
            last2: vec![0; ip_field_count],
            last_slow: vec![0; s_field_count],
            gps_home: [0; 2],
            has_intra: false,
            has_slow: false,
            has_gps_home: false,
        }
    }

    pub fn last(&self) -> &[i64] {
        &self.last
    }

    pub fn last2(&self) -> &[i64] {
        &self.last2
    }

    pub fn last_slow(&self) -> &[i64] {
        &self.last_slow
    }

    pub fn gps_home(&self) -> [i64; 2] {
        self.gps_home
    }

    pub fn has_intra(&self) -> bool {
        self.has_intra
    }

    pub fn has_slow(&self) -> bool {
        self.has_slow
    }

    pub fn has_gps_home(&self) -> bool {
        self.has_gps_home
    }

    /// `time` field value of the most recent I/P frame, used by GPS frames'
    /// `LastMainFrameTime` predictor. Callers pass the field index since
    /// it's declared by the header, not fixed.
    pub fn last_time(&self, time_field_ix: Option<usize>) -> i64 {
        time_field_ix
            .and_then(|ix| self.last.get(ix))
            .copied()
            .unwrap_or(0)
    }

    /// An I-frame resets `last2` to the same value as the new `last`: both
    /// previous-frame slots collapse to the keyframe itself.
    pub fn accept_intra(&mut self, decoded: Vec<i64>) {
        self.last = decoded;
        self.last2 = self.last.clone();
        self.has_intra = true;
    }

    /// A P-frame shifts `last` into `last2` and installs the new frame.
    pub fn accept_inter(&mut self, decoded: Vec<i64>) {
        self.last2 = std::mem::replace(&mut self.last, decoded);
    }

    pub fn accept_slow(&mut self, decoded: Vec<i64>) {
        self.last_slow = decoded;
        self.has_slow = true;
    }

    pub fn accept_gps_home(&mut self, home: [i64; 2]) {
        self.gps_home = home;
        self.has_gps_home = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(current: &'a [i64], reference: &'a [i64], reference2: &'a [i64]) -> PredictorContext<'a> {
        PredictorContext {
            current,
            reference,
            reference2,
            gps_home: [0, 0],
            last_main_frame_time: 0,
            minthrottle: 1000,
            vbatref: 420,
            min_motor_output: 1070,
            field_ix: 0,
            motor0_ix: None,
            gps_coord_sub_ix: 0,
            signed: true,
        }
    }

    #[test]
    fn zero_predictor_is_identity() {
        let c = ctx(&[], &[], &[]);
        assert_eq!(PredictorKind::Zero.apply(42, &c), 42);
    }

    #[test]
    fn previous_adds_last_value() {
        let reference = [10i64];
        let c = ctx(&[], &reference, &[]);
        assert_eq!(PredictorKind::Previous.apply(5, &c), 15);
    }

    #[test]
    fn straight_line_extrapolates() {
        let reference = [10i64];
        let reference2 = [4i64];
        let c = ctx(&[], &reference, &reference2);
        // 2*10 - 4 = 16, plus raw 1 = 17
        assert_eq!(PredictorKind::StraightLine.apply(1, &c), 17);
    }

    #[test]
    fn average2_floors_toward_negative_infinity() {
        let reference = [-3i64];
        let reference2 = [-4i64];
        let c = ctx(&[], &reference, &reference2);
        // (-3 + -4) / 2 floored = -4 (not -3), plus raw 0
        assert_eq!(PredictorKind::Average2.apply(0, &c), -4);
    }

    #[test]
    fn motor0_references_current_frame() {
        let current = [1500i64, 7i64];
        let mut c = ctx(&current, &[], &[]);
        c.motor0_ix = Some(0);
        c.field_ix = 1;
        assert_eq!(PredictorKind::Motor0.apply(3, &c), 1503);
    }

    #[test]
    fn narrowing_wraps_unsigned_fields() {
        let c = PredictorContext { signed: false, ..ctx(&[], &[], &[]) };
        assert_eq!(PredictorKind::Zero.apply(-1, &c), u32::MAX as i64);
    }

    #[test]
    fn history_resets_last2_on_intra() {
        let mut h = History::new(2, 0);
        h.accept_inter(vec![1, 1]);
        h.accept_inter(vec![2, 2]);
        assert_eq!(h.last2(), &[1, 1]);
        h.accept_intra(vec![9, 9]);
        assert_eq!(h.last2(), &[9, 9]);
        assert_eq!(h.last(), &[9, 9]);
        assert!(h.has_intra());
    }
}
