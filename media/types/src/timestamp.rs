/*!
    Timestamp types for media timing.

    Every timestamp and duration that crosses a crate boundary is expressed in
    fixed ticks of [`Pts::TIME_BASE`] (one microsecond). Engines rescale their
    native time bases into ticks before handing samples over.
*/

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Rational;

/**
    Presentation timestamp in ticks.
*/
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Pts(pub i64);

impl Pts {
    /**
        The tick unit shared by every crate in the workspace.
    */
    pub const TIME_BASE: Rational = Rational::new(1, 1_000_000);

    pub const ZERO: Pts = Pts(0);

    /**
        Convert this PTS to a Duration.

        Negative PTS values are clamped to zero.
    */
    #[inline]
    pub fn to_duration(self) -> Duration {
        if self.0 <= 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.0 as u64)
    }

    /**
        Create a PTS from a Duration, saturating at `i64::MAX` ticks.
    */
    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
    }

    #[inline]
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self((seconds * 1_000_000.0).round() as i64)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /**
        Convert a timestamp expressed in `time_base` units into ticks.
    */
    #[inline]
    pub fn from_time_base(value: i64, time_base: Rational) -> Self {
        Self(time_base.rescale(value, Self::TIME_BASE))
    }

    /**
        Convert this timestamp into `time_base` units.
    */
    #[inline]
    pub fn to_time_base(self, time_base: Rational) -> i64 {
        Self::TIME_BASE.rescale(self.0, time_base)
    }

    #[inline]
    pub const fn saturating_add(self, duration: MediaDuration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }

    #[inline]
    pub const fn saturating_sub(self, other: Pts) -> MediaDuration {
        MediaDuration(self.0.saturating_sub(other.0))
    }
}

impl From<i64> for Pts {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Pts> for i64 {
    fn from(pts: Pts) -> Self {
        pts.0
    }
}

impl fmt::Display for Pts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/**
    Duration in ticks.

    Similar to Pts but semantically represents a duration rather than a point in time.
    [`MediaDuration::UNBOUNDED`] stands for "until the source ends".
*/
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MediaDuration(pub i64);

impl MediaDuration {
    pub const ZERO: MediaDuration = MediaDuration(0);

    pub const UNBOUNDED: MediaDuration = MediaDuration(i64::MAX);

    #[inline]
    pub const fn is_unbounded(self) -> bool {
        self.0 == i64::MAX
    }

    /**
        Convert this duration to a std Duration.

        Negative values are clamped to zero.
    */
    #[inline]
    pub fn to_duration(self) -> Duration {
        if self.0 <= 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.0 as u64)
    }

    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
    }

    #[inline]
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self((seconds * 1_000_000.0).round() as i64)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /**
        Nominal duration of one frame at `frame_rate`.
    */
    #[inline]
    pub fn frame(frame_rate: Rational) -> Self {
        Self(frame_rate.invert().rescale(1, Pts::TIME_BASE))
    }

    /**
        Duration of `count` frames at `frame_rate`.
    */
    #[inline]
    pub fn frames(count: i64, frame_rate: Rational) -> Self {
        Self(frame_rate.invert().rescale(count, Pts::TIME_BASE))
    }
}

impl From<i64> for MediaDuration {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<MediaDuration> for i64 {
    fn from(duration: MediaDuration) -> Self {
        duration.0
    }
}
