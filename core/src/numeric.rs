//! Double-double extended precision.
//!
//! A `Quad` is the unevaluated sum `hi + lo` with `|lo| <= ulp(hi) / 2`,
//! giving roughly 32 significant decimal digits. The recurrence needs them
//! where `Z` sits just below 1: the Gumbel statistics for very large particle
//! counts depend on `1 - Z` long after an `f64` has rounded it to zero.
//!
//! RULE: the textual form written by `Display` parses back to the identical
//! value. Checkpoints depend on it.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

/// Field order matters: the derived `PartialOrd` compares `hi` first, then
/// `lo`, which is a total order on normalized values.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Quad {
    hi: f64,
    lo: f64,
}

#[inline]
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    (s, err)
}

/// Requires `|a| >= |b|`.
#[inline]
fn quick_two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let err = b - (s - a);
    (s, err)
}

#[inline]
fn two_prod(a: f64, b: f64) -> (f64, f64) {
    let p = a * b;
    let err = a.mul_add(b, -p);
    (p, err)
}

impl Quad {
    pub const ZERO: Quad = Quad { hi: 0.0, lo: 0.0 };
    pub const ONE: Quad = Quad { hi: 1.0, lo: 0.0 };

    /// Build from two components, renormalizing so `lo` is below half an
    /// ulp of `hi`.
    pub fn from_parts(hi: f64, lo: f64) -> Self {
        if !hi.is_finite() {
            return Quad { hi, lo: 0.0 };
        }
        let (hi, lo) = two_sum(hi, lo);
        Quad { hi, lo }
    }

    pub fn hi(&self) -> f64 { self.hi }
    pub fn lo(&self) -> f64 { self.lo }

    /// Nearest `f64`.
    pub fn to_f64(&self) -> f64 {
        self.hi + self.lo
    }

    pub fn is_nan(&self) -> bool {
        self.hi.is_nan() || self.lo.is_nan()
    }

    pub fn is_finite(&self) -> bool {
        self.hi.is_finite() && self.lo.is_finite()
    }

    pub fn recip(self) -> Self {
        Quad::ONE / self
    }

    pub fn abs(self) -> Self {
        if self.hi < 0.0 { -self } else { self }
    }
}

impl From<f64> for Quad {
    fn from(hi: f64) -> Self {
        Quad { hi, lo: 0.0 }
    }
}

// ── Arithmetic ────────────────────────────────────────────────

impl Neg for Quad {
    type Output = Quad;
    fn neg(self) -> Quad {
        Quad { hi: -self.hi, lo: -self.lo }
    }
}

impl Add for Quad {
    type Output = Quad;
    fn add(self, rhs: Quad) -> Quad {
        let (s, e) = two_sum(self.hi, rhs.hi);
        let (t, f) = two_sum(self.lo, rhs.lo);
        let (s, e) = quick_two_sum(s, e + t);
        let (hi, lo) = quick_two_sum(s, e + f);
        Quad { hi, lo }
    }
}

impl Sub for Quad {
    type Output = Quad;
    fn sub(self, rhs: Quad) -> Quad {
        self + (-rhs)
    }
}

impl Mul for Quad {
    type Output = Quad;
    fn mul(self, rhs: Quad) -> Quad {
        let (p, e) = two_prod(self.hi, rhs.hi);
        let e = e + (self.hi * rhs.lo + self.lo * rhs.hi);
        let (hi, lo) = quick_two_sum(p, e);
        Quad { hi, lo }
    }
}

impl Mul<f64> for Quad {
    type Output = Quad;
    fn mul(self, rhs: f64) -> Quad {
        let (p, e) = two_prod(self.hi, rhs);
        let (hi, lo) = quick_two_sum(p, e + self.lo * rhs);
        Quad { hi, lo }
    }
}

impl Div for Quad {
    type Output = Quad;
    fn div(self, rhs: Quad) -> Quad {
        // Long division, three f64 quotient digits.
        let q1 = self.hi / rhs.hi;
        if !q1.is_finite() {
            return Quad::from(q1);
        }
        let r = self - rhs * q1;
        let q2 = r.hi / rhs.hi;
        let r = r - rhs * q2;
        let q3 = r.hi / rhs.hi;
        let (hi, lo) = quick_two_sum(q1, q2);
        Quad { hi, lo } + Quad::from(q3)
    }
}

// ── Text ──────────────────────────────────────────────────────

/// `hi` in shortest round-trip exponent form, followed by the signed `lo`
/// when it is non-zero: `3.333333333333333e-1+1.850371707708594e-17`.
impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lo == 0.0 {
            write!(f, "{:e}", self.hi)
        } else {
            write!(f, "{:e}{:+e}", self.hi, self.lo)
        }
    }
}

/// Serialized as its exact text form.
impl serde::Serialize for Quad {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseQuadError(String);

impl fmt::Display for ParseQuadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid extended-precision value '{}'", self.0)
    }
}

impl std::error::Error for ParseQuadError {}

impl FromStr for Quad {
    type Err = ParseQuadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let err = || ParseQuadError(text.to_string());
        if text.is_empty() {
            return Err(err());
        }

        // The low part starts at the first sign that is not an exponent sign.
        let bytes = text.as_bytes();
        let split = (1..bytes.len()).find(|&i| {
            matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E')
        });

        let (hi_text, lo_text) = match split {
            Some(i) => (&text[..i], &text[i..]),
            None => (text, ""),
        };
        let hi: f64 = hi_text.parse().map_err(|_| err())?;
        let lo: f64 = if lo_text.is_empty() {
            0.0
        } else {
            lo_text.parse().map_err(|_| err())?
        };
        Ok(Quad::from_parts(hi, lo))
    }
}
