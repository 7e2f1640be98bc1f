//! Outward-rounded interval arithmetic over `f64`.
//!
//! Every operation returns an enclosure of the exact real image: endpoints
//! are pushed outward by at least one unit in the last place after each
//! floating point step (two for library transcendentals), so results stay
//! sound even though the host math library only rounds to nearest.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

/// Closed interval `[lo, hi]`. An interval with `lo > hi` is empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

fn down_by(x: f64, ulps: f64) -> f64 {
    if x.is_finite() {
        x - x.abs() * f64::EPSILON * ulps - f64::MIN_POSITIVE
    } else {
        x
    }
}

fn up_by(x: f64, ulps: f64) -> f64 {
    if x.is_finite() {
        x + x.abs() * f64::EPSILON * ulps + f64::MIN_POSITIVE
    } else {
        x
    }
}

fn down(x: f64) -> f64 {
    down_by(x, 1.0)
}

fn up(x: f64) -> f64 {
    up_by(x, 1.0)
}

/// `a * b` with the interval convention `0 * inf = 0`.
fn mul_endpoint(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

impl Interval {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn point(v: f64) -> Self {
        Self { lo: v, hi: v }
    }

    pub fn empty() -> Self {
        Self {
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
        }
    }

    pub fn entire() -> Self {
        Self {
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
        }
    }

    /// Build from possibly-NaN endpoints; NaN degrades to the entire line.
    fn checked(lo: f64, hi: f64) -> Self {
        if lo.is_nan() || hi.is_nan() {
            Self::entire()
        } else {
            Self { lo, hi }
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.lo <= self.hi)
    }

    pub fn contains(&self, v: f64) -> bool {
        self.lo <= v && v <= self.hi
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(0.0)
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.hi - self.lo
        }
    }

    pub fn mid(&self) -> f64 {
        match (self.lo.is_finite(), self.hi.is_finite()) {
            (true, true) => self.lo + 0.5 * (self.hi - self.lo),
            (false, true) => self.hi.min(0.0) - 1.0,
            (true, false) => self.lo.max(0.0) + 1.0,
            (false, false) => 0.0,
        }
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }

    pub fn hull(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Interval {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::checked(down(self.lo + other.lo), up(self.hi + other.hi))
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::checked(down(self.lo - other.hi), up(self.hi - other.lo))
    }

    pub fn neg(&self) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        Interval {
            lo: -self.hi,
            hi: -self.lo,
        }
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        let products = [
            mul_endpoint(self.lo, other.lo),
            mul_endpoint(self.lo, other.hi),
            mul_endpoint(self.hi, other.lo),
            mul_endpoint(self.hi, other.hi),
        ];
        let lo = products.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Interval::checked(down(lo), up(hi))
    }

    pub fn scale(&self, k: f64) -> Interval {
        self.mul(&Interval::point(k))
    }

    /// Division; a divisor straddling zero yields the entire line.
    pub fn div(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        if other.contains_zero() {
            return Interval::entire();
        }
        let recip = Interval::checked(down(1.0 / other.hi), up(1.0 / other.lo));
        self.mul(&recip)
    }

    pub fn powi(&self, n: u32) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        if n == 0 {
            return Interval::point(1.0);
        }
        let slack = n as f64;
        let p = |x: f64| x.powi(n as i32);
        if n % 2 == 1 {
            return Interval::checked(down_by(p(self.lo), slack), up_by(p(self.hi), slack));
        }
        let (lo, hi) = if self.lo >= 0.0 {
            (p(self.lo), p(self.hi))
        } else if self.hi <= 0.0 {
            (p(self.hi), p(self.lo))
        } else {
            (0.0, p(self.lo).max(p(self.hi)))
        };
        Interval::checked(down_by(lo, slack).max(0.0), up_by(hi, slack))
    }

    pub fn sqrt(&self) -> Interval {
        let dom = self.intersect(&Interval::new(0.0, f64::INFINITY));
        if dom.is_empty() {
            return Interval::empty();
        }
        Interval::checked(down(dom.lo.sqrt()).max(0.0), up(dom.hi.sqrt()))
    }

    pub fn abs(&self) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        if self.lo >= 0.0 {
            *self
        } else if self.hi <= 0.0 {
            self.neg()
        } else {
            Interval::new(0.0, (-self.lo).max(self.hi))
        }
    }

    pub fn tanh(&self) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        Interval::checked(
            down_by(self.lo.tanh(), 2.0).max(-1.0),
            up_by(self.hi.tanh(), 2.0).min(1.0),
        )
    }

    pub fn exp(&self) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        Interval::checked(
            down_by(self.lo.exp(), 2.0).max(0.0),
            up_by(self.hi.exp(), 2.0),
        )
    }

    pub fn sin(&self) -> Interval {
        self.periodic(f64::sin, FRAC_PI_2, -FRAC_PI_2)
    }

    pub fn cos(&self) -> Interval {
        self.periodic(f64::cos, 0.0, PI)
    }

    /// Enclosure for a `2*pi`-periodic unit-amplitude function whose maxima
    /// sit at `max_at + 2k*pi` and minima at `min_at + 2k*pi`.
    fn periodic(&self, f: fn(f64) -> f64, max_at: f64, min_at: f64) -> Interval {
        if self.is_empty() {
            return Interval::empty();
        }
        if !self.lo.is_finite() || !self.hi.is_finite() || self.width() >= TAU {
            return Interval::new(-1.0, 1.0);
        }
        let (a, b) = (f(self.lo), f(self.hi));
        let mut lo = down_by(a.min(b), 2.0);
        let mut hi = up_by(a.max(b), 2.0);
        if hits_phase(self.lo, self.hi, max_at) {
            hi = 1.0;
        }
        if hits_phase(self.lo, self.hi, min_at) {
            lo = -1.0;
        }
        Interval::new(lo.max(-1.0), hi.min(1.0))
    }

    pub fn max(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::new(self.lo.max(other.lo), self.hi.max(other.hi))
    }

    pub fn min(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::empty();
        }
        Interval::new(self.lo.min(other.lo), self.hi.min(other.hi))
    }

    /// Natural log enclosure; non-positive parts map to `-inf`.
    pub fn ln(&self) -> Interval {
        let dom = self.intersect(&Interval::new(0.0, f64::INFINITY));
        if dom.is_empty() {
            return Interval::empty();
        }
        let lo = if dom.lo <= 0.0 {
            f64::NEG_INFINITY
        } else {
            down_by(dom.lo.ln(), 2.0)
        };
        Interval::checked(lo, up_by(dom.hi.ln(), 2.0))
    }

    /// Inverse hyperbolic tangent enclosure over `[-1, 1]`.
    pub fn atanh(&self) -> Interval {
        let dom = self.intersect(&Interval::new(-1.0, 1.0));
        if dom.is_empty() {
            return Interval::empty();
        }
        let lo = if dom.lo <= -1.0 {
            f64::NEG_INFINITY
        } else {
            down_by(dom.lo.atanh(), 4.0)
        };
        let hi = if dom.hi >= 1.0 {
            f64::INFINITY
        } else {
            up_by(dom.hi.atanh(), 4.0)
        };
        Interval::checked(lo, hi)
    }

    /// Preimage of `self` under `x -> x^n`, restricted to `within`.
    pub fn nth_root_within(&self, n: u32, within: &Interval) -> Interval {
        if n == 0 || self.is_empty() {
            return *within;
        }
        if n == 1 {
            return self.intersect(within);
        }
        let inv = 1.0 / n as f64;
        let root = |x: f64| x.abs().powf(inv).copysign(x);
        let slack = 4.0 * n as f64;
        if n % 2 == 1 {
            let pre = Interval::checked(down_by(root(self.lo), slack), up_by(root(self.hi), slack));
            return pre.intersect(within);
        }
        let nonneg = self.intersect(&Interval::new(0.0, f64::INFINITY));
        if nonneg.is_empty() {
            return Interval::empty();
        }
        let r_lo = down_by(root(nonneg.lo), slack).max(0.0);
        let r_hi = up_by(root(nonneg.hi), slack);
        let positive = Interval::new(r_lo, r_hi).intersect(within);
        let negative = Interval::new(-r_hi, -r_lo).intersect(within);
        positive.hull(&negative)
    }
}

/// Whether some `phase + 2k*pi` lies in `[lo, hi]`, erring toward yes.
fn hits_phase(lo: f64, hi: f64, phase: f64) -> bool {
    let tol = 1e-9 * (1.0 + lo.abs().max(hi.abs()));
    let k = ((lo - phase) / TAU).floor();
    let mut candidate = phase + TAU * k;
    while candidate <= hi + tol {
        if candidate >= lo - tol {
            return true;
        }
        candidate += TAU;
    }
    false
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[empty]")
        } else {
            write!(f, "[{}, {}]", self.lo, self.hi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn interval_and_point() -> impl Strategy<Value = (Interval, f64)> {
        (-50.0f64..50.0, 0.0f64..20.0, 0.0f64..=1.0)
            .prop_map(|(lo, w, s)| (Interval::new(lo, lo + w), lo + s * w))
    }

    #[test]
    fn empty_and_width() {
        assert!(Interval::empty().is_empty());
        assert!(!Interval::point(2.0).is_empty());
        assert_eq!(Interval::new(1.0, 3.0).width(), 2.0);
        assert_eq!(Interval::new(1.0, 3.0).mid(), 2.0);
        assert!(Interval::new(0.0, 1.0)
            .intersect(&Interval::new(2.0, 3.0))
            .is_empty());
    }

    #[test]
    fn mul_treats_zero_times_infinity_as_zero() {
        let z = Interval::point(0.0);
        let r = z.mul(&Interval::entire());
        assert!(r.contains(0.0));
        assert!(r.width() < 1e-300);
    }

    #[test]
    fn even_power_of_straddling_interval_starts_at_zero() {
        let r = Interval::new(-2.0, 1.0).powi(2);
        assert_eq!(r.lo, 0.0);
        assert!(r.hi >= 4.0 && r.hi < 4.0 + 1e-12);
    }

    #[test]
    fn sin_reaches_extrema_inside_interval() {
        let r = Interval::new(0.0, 2.0).sin();
        assert_eq!(r.hi, 1.0);
        assert!(r.lo <= 0.0 && r.lo > -1e-12);
        let full = Interval::new(-10.0, 10.0).cos();
        assert_eq!(full, Interval::new(-1.0, 1.0));
    }

    #[test]
    fn division_by_straddling_zero_is_entire() {
        let r = Interval::new(1.0, 2.0).div(&Interval::new(-1.0, 1.0));
        assert_eq!(r, Interval::entire());
        let q = Interval::new(1.0, 2.0).div(&Interval::new(2.0, 4.0));
        assert!(q.contains(0.25) && q.contains(1.0));
    }

    #[test]
    fn even_root_preimage_respects_domain() {
        let pre = Interval::new(1.0, 4.0).nth_root_within(2, &Interval::new(0.0, 10.0));
        assert!(pre.contains(1.0) && pre.contains(2.0));
        assert!(pre.lo > 0.99);
        let both = Interval::new(1.0, 4.0).nth_root_within(2, &Interval::new(-10.0, 10.0));
        assert!(both.contains(-2.0) && both.contains(2.0));
    }

    proptest! {
        #[test]
        fn arithmetic_encloses_point_results(
            (a, x) in interval_and_point(),
            (b, y) in interval_and_point(),
        ) {
            prop_assert!(a.add(&b).contains(x + y));
            prop_assert!(a.sub(&b).contains(x - y));
            prop_assert!(a.mul(&b).contains(x * y));
            prop_assert!(a.max(&b).contains(x.max(y)));
            prop_assert!(a.min(&b).contains(x.min(y)));
        }

        #[test]
        fn elementary_functions_enclose_point_results(
            (a, x) in interval_and_point(),
            n in 0u32..6,
        ) {
            prop_assert!(a.powi(n).contains(x.powi(n as i32)));
            prop_assert!(a.tanh().contains(x.tanh()));
            prop_assert!(a.sin().contains(x.sin()));
            prop_assert!(a.cos().contains(x.cos()));
            prop_assert!(a.abs().contains(x.abs()));
            prop_assert!(a.scale(0.1).exp().contains((0.1 * x).exp()));
            if x >= 0.0 {
                prop_assert!(a.sqrt().contains(x.sqrt()));
            }
        }
    }
}
