use ffmpeg_next::Rescale;

/// Unit duration of a stream's timestamps, `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Rescales `value` from `self` into `to`, rounding to nearest with
    /// halves away from zero, the way the muxer rescales packets.
    pub fn rescale(&self, value: i64, to: TimeBase) -> i64 {
        value.rescale(*self, to)
    }
}

impl From<TimeBase> for ffmpeg_next::Rational {
    fn from(value: TimeBase) -> Self {
        ffmpeg_next::Rational::new(value.num, value.den)
    }
}

impl From<ffmpeg_next::Rational> for TimeBase {
    fn from(value: ffmpeg_next::Rational) -> Self {
        TimeBase::new(value.numerator(), value.denominator())
    }
}

/// Per-stream presentation timestamp counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClock {
    time_base: TimeBase,
    pts: i64,
}

impl StreamClock {
    pub fn new(time_base: TimeBase) -> Self {
        Self { time_base, pts: 0 }
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Timestamp the next unit will carry.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// Returns the current timestamp and moves the clock forward by `units`.
    pub fn advance(&mut self, units: i64) -> i64 {
        let pts = self.pts;
        self.pts += units.max(0);
        pts
    }

    /// Current timestamp expressed in `time_base`.
    pub fn pts_in(&self, time_base: TimeBase) -> i64 {
        self.time_base.rescale(self.pts, time_base)
    }
}
