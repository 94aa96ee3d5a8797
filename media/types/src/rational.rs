/*!
    Rational number type for frame rates and time bases.
*/

use std::fmt;

use serde::{Deserialize, Serialize};

/**
    A rational number represented as a numerator and denominator.

    Used for the fixed tick base (1/1000000) and for frame rates
    (e.g., 30000/1001 for 29.97 fps).
*/
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /**
        Create a new rational number.

        # Panics

        Panics if `den` is zero.
    */
    #[inline]
    pub const fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "denominator cannot be zero");
        Self { num, den }
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /**
        Invert the rational (swap numerator and denominator).

        # Panics

        Panics if numerator is zero.
    */
    #[inline]
    pub const fn invert(self) -> Self {
        assert!(self.num != 0, "cannot invert zero");
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /**
        Returns `true` if this rational is strictly positive.
    */
    #[inline]
    pub const fn is_positive(self) -> bool {
        (self.num > 0 && self.den > 0) || (self.num < 0 && self.den < 0)
    }

    /**
        Rescale `value`, expressed in units of `self`, into units of `target`.

        Rounds to the nearest integer and saturates instead of overflowing.
    */
    pub fn rescale(self, value: i64, target: Rational) -> i64 {
        let num = value as i128 * self.num as i128 * target.den as i128;
        let den = self.den as i128 * target.num as i128;
        if den == 0 {
            return 0;
        }
        let half = den.abs() / 2;
        let rounded = if (num >= 0) == (den > 0) {
            (num.abs() + half) / den.abs()
        } else {
            -((num.abs() + half) / den.abs())
        };
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self::new(num, den)
    }
}

impl From<i32> for Rational {
    fn from(num: i32) -> Self {
        Self::new(num, 1)
    }
}
