use std::cmp::Ordering;
use std::fmt;

/// Number of ticks per second in the engine-wide time base.
pub const TIME_BASE: i64 = 1_000_000;

/// The engine-wide high-resolution time base (microseconds).
pub const TIME_BASE_Q: Rational = Rational { num: 1, den: 1_000_000 };

/// A rational number used as a time base or a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator
    pub num: i32,
    /// Denominator
    pub den: i32,
}

impl Rational {
    /// Creates a new rational `num/den`.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Returns `den/num`.
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// True when both terms are non-zero.
    pub fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Converts to a floating point value, 0.0 for an invalid rational.
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self { num: 0, den: 1 }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rounding mode for [`rescale_rnd`] and [`rescale_q_rnd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Round toward zero
    Zero,
    /// Round away from zero
    Inf,
    /// Round toward -infinity
    Down,
    /// Round toward +infinity
    Up,
    /// Round to nearest, halfway cases away from zero
    NearInf,
}

fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Computes `a * b / c` with the given rounding, without intermediate overflow.
///
/// A zero divisor saturates toward the sign of the dividend.
pub fn rescale_rnd(a: i64, b: i64, c: i64, rnd: Rounding) -> i64 {
    let mut n = a as i128 * b as i128;
    let mut d = c as i128;
    if d == 0 {
        return match n.cmp(&0) {
            Ordering::Less => i64::MIN,
            Ordering::Equal => 0,
            Ordering::Greater => i64::MAX,
        };
    }
    if d < 0 {
        n = -n;
        d = -d;
    }
    let q = n / d;
    let r = n % d;
    if r == 0 {
        return saturate(q);
    }
    let away = if n < 0 { q - 1 } else { q + 1 };
    let rounded = match rnd {
        Rounding::Zero => q,
        Rounding::Inf => away,
        Rounding::Down => {
            if n < 0 {
                q - 1
            } else {
                q
            }
        }
        Rounding::Up => {
            if n > 0 {
                q + 1
            } else {
                q
            }
        }
        Rounding::NearInf => {
            if 2 * r.abs() >= d {
                away
            } else {
                q
            }
        }
    };
    saturate(rounded)
}

/// Rescales `a` from time base `bq` to time base `cq`, rounding to nearest.
pub fn rescale_q(a: i64, bq: Rational, cq: Rational) -> i64 {
    rescale_q_rnd(a, bq, cq, Rounding::NearInf)
}

/// Rescales `a` from time base `bq` to time base `cq` with the given rounding.
pub fn rescale_q_rnd(a: i64, bq: Rational, cq: Rational, rnd: Rounding) -> i64 {
    let b = bq.num as i64 * cq.den as i64;
    let c = cq.num as i64 * bq.den as i64;
    rescale_rnd(a, b, c, rnd)
}

/// Compares two timestamps expressed in different time bases.
pub fn compare_ts(ts_a: i64, tb_a: Rational, ts_b: i64, tb_b: Rational) -> Ordering {
    let a = ts_a as i128 * tb_a.num as i128 * tb_b.den as i128;
    let b = ts_b as i128 * tb_b.num as i128 * tb_a.den as i128;
    a.cmp(&b)
}

/// Median of three values.
pub fn mid_pred(a: i64, b: i64, c: i64) -> i64 {
    a.max(b).min(a.min(b).max(c))
}

/// `floor(log2(v))` for positive `v`, 0 otherwise.
pub fn log2(v: i32) -> i32 {
    if v <= 0 {
        0
    } else {
        31 - v.leading_zeros() as i32
    }
}
