//! Rational time bases and timestamp rescaling.
//!
//! A timestamp is an integer count of time-base units. Streams, codec contexts
//! and the millisecond domain used for labelling each carry their own base, and
//! every hand-off between them goes through [`rescale`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// "Timestamp unknown". Passes through [`rescale`] unchanged.
pub const NOPTS: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    num: i32,
    den: i32,
}

impl TimeBase {
    pub const MILLISECONDS: TimeBase = TimeBase::new(1, 1000);
    pub const MICROSECONDS: TimeBase = TimeBase::new(1, 1_000_000);
    /// MPEG-TS / RTP video clock.
    pub const MPEG: TimeBase = TimeBase::new(1, 90_000);

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// One tick per frame at `fps` frames per second.
    pub const fn from_frame_rate(fps: u32) -> Self {
        Self::new(1, fps as i32)
    }

    pub fn num(&self) -> i32 {
        self.num
    }

    pub fn den(&self) -> i32 {
        self.den
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Rescale `ts` from this base into `to`.
    pub fn rescale(&self, ts: i64, to: TimeBase) -> i64 {
        rescale(ts, *self, to)
    }

    pub fn to_millis(&self, ts: i64) -> i64 {
        rescale(ts, *self, TimeBase::MILLISECONDS)
    }
}

impl Display for TimeBase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// `ts * from.num * to.den / (from.den * to.num)`, rounded to nearest with
/// halves away from zero.
///
/// [`NOPTS`] is returned unchanged. Invalid bases and results that do not fit
/// an `i64` also yield [`NOPTS`].
pub fn rescale(ts: i64, from: TimeBase, to: TimeBase) -> i64 {
    if ts == NOPTS || !from.is_valid() || !to.is_valid() {
        return NOPTS;
    }
    let b = from.num as i128 * to.den as i128;
    let c = from.den as i128 * to.num as i128;
    let n = ts as i128 * b;
    let half = c / 2;
    let r = if n >= 0 {
        (n + half) / c
    } else {
        -((-n + half) / c)
    };
    match i64::try_from(r) {
        Ok(v) if v != NOPTS => v,
        _ => NOPTS,
    }
}

/// [`rescale`] over the `Option` form used by frames and coded units.
pub fn rescale_opt(ts: Option<i64>, from: TimeBase, to: TimeBase) -> Option<i64> {
    ts.map(|v| rescale(v, from, to)).filter(|v| *v != NOPTS)
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Rational> for TimeBase {
    fn from(value: ffmpeg_next::Rational) -> Self {
        Self::new(value.numerator(), value.denominator())
    }
}

#[cfg(feature = "ffmpeg")]
impl From<TimeBase> for ffmpeg_next::Rational {
    fn from(value: TimeBase) -> Self {
        ffmpeg_next::Rational::new(value.num, value.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASES: [TimeBase; 6] = [
        TimeBase::new(1, 90_000),
        TimeBase::new(1, 1000),
        TimeBase::new(1, 30),
        TimeBase::new(1001, 30_000),
        TimeBase::new(1, 1_000_000),
        TimeBase::new(1, 25),
    ];

    const SAMPLES: [i64; 9] = [0, 1, -1, 7, 1234, -98_765, 3_000_000, 90_000, 1 << 40];

    #[test]
    fn test_mpeg_clock_to_millis() {
        assert_eq!(rescale(90_000, TimeBase::MPEG, TimeBase::MILLISECONDS), 1000);
        assert_eq!(TimeBase::MPEG.to_millis(45), 1);
        assert_eq!(TimeBase::MPEG.to_millis(44), 0);
    }

    #[test]
    fn test_identity_rescale() {
        for base in BASES {
            for ts in SAMPLES {
                assert_eq!(rescale(ts, base, base), ts, "{} in {}", ts, base);
            }
            assert_eq!(rescale(i64::MAX, base, base), i64::MAX);
        }
    }

    #[test]
    fn test_numerically_equal_bases() {
        let a = TimeBase::new(1, 50);
        let b = TimeBase::new(2, 100);
        for ts in SAMPLES {
            assert_eq!(rescale(ts, a, b), ts);
        }
    }

    #[test]
    fn test_composition_within_one_unit() {
        for b1 in BASES {
            for b2 in BASES {
                for b3 in BASES {
                    for ts in SAMPLES {
                        let direct = rescale(ts, b1, b3);
                        let chained = rescale(rescale(ts, b1, b2), b2, b3);
                        // Rounding in the intermediate base is amplified by the ratio b2/b3.
                        let step = rescale(1, b2, b3).abs().max(1);
                        assert!(
                            (direct - chained).abs() <= step,
                            "{} via {} -> {}: {} vs {}",
                            b1,
                            b2,
                            b3,
                            direct,
                            chained
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_composition_through_finer_base_is_tight() {
        let frames = TimeBase::new(1, 30);
        let micro = TimeBase::MICROSECONDS;
        for ts in 0..300 {
            let direct = rescale(ts, frames, TimeBase::MILLISECONDS);
            let chained = rescale(rescale(ts, frames, micro), micro, TimeBase::MILLISECONDS);
            assert!((direct - chained).abs() <= 1);
        }
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        let half = TimeBase::new(1, 2);
        assert_eq!(rescale(1, half, TimeBase::new(1, 1)), 1);
        assert_eq!(rescale(-1, half, TimeBase::new(1, 1)), -1);
        assert_eq!(rescale(3, TimeBase::new(1, 4), TimeBase::new(1, 1)), 1);
        assert_eq!(rescale(-3, TimeBase::new(1, 4), TimeBase::new(1, 1)), -1);
    }

    #[test]
    fn test_unknown_timestamp_propagates() {
        assert_eq!(rescale(NOPTS, TimeBase::MPEG, TimeBase::MILLISECONDS), NOPTS);
        assert_eq!(rescale_opt(None, TimeBase::MPEG, TimeBase::MILLISECONDS), None);
        assert_eq!(
            rescale_opt(Some(180_000), TimeBase::MPEG, TimeBase::MILLISECONDS),
            Some(2000)
        );
    }

    #[test]
    fn test_invalid_bases_and_overflow() {
        assert_eq!(rescale(10, TimeBase::new(1, 0), TimeBase::MILLISECONDS), NOPTS);
        assert_eq!(rescale(10, TimeBase::MPEG, TimeBase::new(0, 1)), NOPTS);
        assert_eq!(
            rescale(i64::MAX, TimeBase::new(1, 1), TimeBase::MICROSECONDS),
            NOPTS
        );
    }

    #[test]
    fn test_frame_index_to_codec_base() {
        let per_frame = TimeBase::from_frame_rate(30);
        let codec = TimeBase::new(1, 15_360);
        let pts: Vec<i64> = (0..5).map(|i| rescale(i, per_frame, codec)).collect();
        assert_eq!(pts, vec![0, 512, 1024, 1536, 2048]);
    }
}
