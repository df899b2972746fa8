//! Feasibility envelopes derived from the law of cosines.
//!
//! Distances are integral sample counts, so every bound carries a +-0.5
//! discretization correction: a reported distance `d` stands for a real
//! length anywhere in `[d - 0.5, d + 0.5]`.

/// A closed interval `[lower, upper]` with the arithmetic needed to
/// propagate distance uncertainty through the cosine rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    /// An exact value.
    pub fn exact(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// Constructs an interval, swapping the endpoints if needed.
    pub fn new(lower: f64, upper: f64) -> Self {
        if lower > upper {
            Self {
                lower: upper,
                upper: lower,
            }
        } else {
            Self { lower, upper }
        }
    }

    pub fn add(self, other: Interval) -> Interval {
        Interval::new(self.lower + other.lower, self.upper + other.upper)
    }

    pub fn sub(self, other: Interval) -> Interval {
        Interval::new(self.lower - other.upper, self.upper - other.lower)
    }

    pub fn mul(self, other: Interval) -> Interval {
        let candidates = [
            self.lower * other.lower,
            self.lower * other.upper,
            self.upper * other.lower,
            self.upper * other.upper,
        ];
        let mut min = candidates[0];
        let mut max = candidates[0];
        for c in &candidates[1..] {
            min = min.min(*c);
            max = max.max(*c);
        }
        Interval::new(min, max)
    }

    /// Division; the divisor must not straddle zero.
    pub fn div(self, other: Interval) -> Interval {
        debug_assert!(other.lower > 0.0 || other.upper < 0.0);
        let candidates = [
            self.lower / other.lower,
            self.upper / other.lower,
            self.lower / other.upper,
            self.upper / other.upper,
        ];
        let mut min = candidates[0];
        let mut max = candidates[0];
        for c in &candidates[1..] {
            min = min.min(*c);
            max = max.max(*c);
        }
        Interval::new(min, max)
    }

    pub fn scale(self, factor: f64) -> Interval {
        Interval::new(factor * self.lower, factor * self.upper)
    }

    pub fn square(self) -> Interval {
        Interval::new(self.lower * self.lower, self.upper * self.upper)
    }

    /// Square root of a (partially) nonnegative interval; the negative
    /// part is clamped away.
    pub fn root(self) -> Interval {
        debug_assert!(self.upper > 0.0);
        Interval::new(
            if self.lower > 0.0 {
                self.lower.sqrt()
            } else {
                0.0
            },
            self.upper.sqrt(),
        )
    }

    pub fn is_intersecting(self, other: Interval) -> bool {
        self.lower.max(other.lower) <= self.upper.min(other.upper)
    }

    /// Intersection; the intervals must overlap.
    pub fn intersect(self, other: Interval) -> Interval {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        debug_assert!(lower <= upper);
        Interval { lower, upper }
    }

    /// Rounds inward: the lower bound up, the upper bound down.
    pub fn round_inward(self) -> Interval {
        Interval::new(self.lower.ceil(), self.upper.floor())
    }
}

/// Scalar helpers around the law of cosines. `gamma` is always the angle
/// opposite to the side `c`.
pub mod cosine {
    use super::Interval;

    pub fn cosine_gamma(a: f64, b: f64, c: f64) -> f64 {
        (a * a + b * b - c * c) / (2.0 * a * b)
    }

    /// Lower bound for the cosine when `b` is exact and `a`, `c` are the
    /// floor of their real values.
    pub fn lower_cosine_gamma(a: f64, b: f64, c: f64) -> f64 {
        (a * a + b * b - (c + 1.0) * (c + 1.0)) / (2.0 * (a + 1.0) * b)
    }

    /// Upper bound for the cosine when `b` is exact and `a`, `c` are the
    /// floor of their real values.
    pub fn upper_cosine_gamma(a: f64, b: f64, c: f64) -> f64 {
        ((a + 1.0) * (a + 1.0) + b * b - c * c) / (2.0 * a * b)
    }

    pub fn squared_length_of_c(a: f64, b: f64, cosine_gamma: f64) -> f64 {
        a * a + b * b - 2.0 * a * b * cosine_gamma
    }

    pub fn lower_squared_length_of_c(a: f64, b: f64, cosine_gamma: f64) -> f64 {
        a * a + b * b - 2.0 * (a + 1.0) * b * cosine_gamma
    }

    pub fn upper_squared_length_of_c(a: f64, b: f64, cosine_gamma: f64) -> f64 {
        (a + 1.0) * (a + 1.0) + b * b - 2.0 * a * b * cosine_gamma
    }

    pub fn squared_length_interval(a: Interval, b: Interval, cosine_gamma: Interval) -> Interval {
        a.square()
            .add(b.square())
            .add(a.mul(b).mul(cosine_gamma).scale(-2.0))
    }

    pub fn cosine_gamma_interval(a: Interval, b: Interval, c: Interval) -> Interval {
        a.square()
            .add(b.square())
            .sub(c.square())
            .div(a.mul(b).scale(2.0))
    }

    /// Cosine interval at the far element of a candidate diagonal.
    /// Returns `None` when the interval misses `[-1, 1]` entirely.
    pub fn right_cosine(left: f64, upper: f64, right: f64) -> Option<(f64, f64)> {
        let lower_cos = lower_cosine_gamma(right, upper, left);
        let upper_cos = upper_cosine_gamma(right, upper, left);
        debug_assert!(lower_cos <= upper_cos);
        if lower_cos <= 1.0 && upper_cos >= -1.0 {
            Some((lower_cos, upper_cos))
        } else {
            None
        }
    }

    /// Checks that an intermediate diagonal is compatible with the cosine
    /// interval spanned by the two outermost diagonals.
    pub fn check_left_length(
        left: f64,
        upper: f64,
        right: f64,
        lower_cos: f64,
        upper_cos: f64,
    ) -> bool {
        // Numerical slack on the theoretical lengths.
        let epsilon = 5e-2;
        let lower_theoretical = lower_squared_length_of_c(right, upper, upper_cos);
        let upper_theoretical = upper_squared_length_of_c(right, upper, lower_cos);
        debug_assert!(lower_theoretical <= upper_theoretical);

        let lower_epsilon = -2.0 * lower_theoretical.max(0.0).sqrt() * epsilon - epsilon * epsilon;
        let upper_epsilon = 2.0 * upper_theoretical.max(0.0).sqrt() * epsilon + epsilon * epsilon;

        let left_sq_lower = left * left;
        let left_sq_upper = (left + 1.0) * (left + 1.0);

        left_sq_lower <= upper_theoretical + upper_epsilon
            && lower_theoretical - lower_epsilon <= left_sq_upper
            && right_cosine(left, upper, right).is_some()
    }

    /// Whether a diagonal of monostatic distances can belong to a single
    /// point reflector, given the element pitch in sample units.
    pub fn diagonal_feasible(diagonal: &[f64], element_pitch: f64) -> bool {
        let double_pitch = 2.0 * element_pitch;
        let mut n = diagonal.len();
        assert!(n != 0, "diagonal cannot be empty");
        if n == 1 {
            return true;
        }

        let right = diagonal[n - 1];
        let Some((lower_cos, upper_cos)) = right_cosine(diagonal[0], n as f64 * double_pitch, right)
        else {
            return false;
        };

        for &left in &diagonal[1..n - 1] {
            n -= 1;
            let upper = n as f64 * double_pitch;
            if !check_left_length(left, upper, right, lower_cos, upper_cos) {
                return false;
            }
        }
        true
    }
}

/// A diagonal variable: the element index with its (relaxed) diameter and
/// squared-diameter values.
#[derive(Debug, Clone, Copy)]
pub struct BoundVar {
    pub idx: usize,
    pub diameter: f64,
    pub square: f64,
}

impl BoundVar {
    /// `(diameter + 1)^2` expressed through the squared variable.
    pub fn plus_1_and_squared(&self) -> f64 {
        self.square + 2.0 * self.diameter + 1.0
    }

    /// Lower bound of `coef * square` over the discretization cell.
    pub fn lower_bound(&self, coef: f64) -> f64 {
        if coef > 0.0 {
            coef * self.square - coef * self.diameter + 0.25
        } else {
            coef * self.square + coef * self.diameter + 0.25
        }
    }

    /// Upper bound of `coef * square` over the discretization cell.
    pub fn upper_bound(&self, coef: f64) -> f64 {
        if coef > 0.0 {
            coef * self.square + coef * self.diameter + 0.25
        } else {
            coef * self.square - coef * self.diameter + 0.25
        }
    }
}

/// Computes lower and upper bounds for one squared diagonal when two other
/// diagonals are fixed.
#[derive(Debug, Clone, Copy)]
pub struct BoundHelper {
    pub squared_pitch: f64,
}

impl BoundHelper {
    pub fn new(element_pitch: f64) -> Self {
        Self {
            squared_pitch: element_pitch * element_pitch,
        }
    }

    /// Bounds `lb <= |j - h| * squared_i <= ub` for the real (unfloored)
    /// squared diameter of element `idx_i`, given two fixed diagonals.
    pub fn triple(&self, idx_i: usize, j: BoundVar, h: BoundVar) -> (f64, f64) {
        assert!(j.idx != h.idx && h.idx != idx_i);
        let (j, h) = if (idx_i < h.idx && j.idx > h.idx) || (h.idx < idx_i && h.idx > j.idx) {
            (h, j)
        } else {
            (j, h)
        };

        let jh = (j.idx as f64 - h.idx as f64).abs();
        let ih = (idx_i as f64 - h.idx as f64).abs();
        let constant = 4.0 * self.squared_pitch * jh * ih * (ih - jh);

        let lower = j.lower_bound(ih) + h.lower_bound(jh - ih) + constant;
        let upper = j.upper_bound(ih) + h.upper_bound(jh - ih) + constant;
        (lower, upper)
    }

    /// Like [`triple`](Self::triple) but divided by `|j - h|`, bounding the
    /// squared diameter itself.
    pub fn triple_corrected(&self, idx_i: usize, j: BoundVar, h: BoundVar) -> (f64, f64) {
        let correction = (j.idx as f64 - h.idx as f64).abs();
        let (lower, upper) = self.triple(idx_i, j, h);
        (lower / correction, upper / correction)
    }

    /// Bounds for feasible cosines: returns `((lower, upper), bound)` where
    /// the middle expression must respect `-bound <= middle <= bound`.
    pub fn cosine_bounds(&self, i: BoundVar, j: BoundVar) -> ((f64, f64), f64) {
        let delta = (j.idx as f64 - i.idx as f64).abs();
        let bound = 4.0 * (i.diameter + 1.0) * delta * self.squared_pitch.sqrt();

        let lower = i.square + delta * delta * self.squared_pitch * 4.0 - j.plus_1_and_squared();
        let upper = i.plus_1_and_squared() + delta * delta * self.squared_pitch * 4.0 - j.square;
        ((lower, upper), bound)
    }
}
