//! Time-of-flight signatures and the dense trace storage around them.
//!
//! A reflector is identified by its symmetric matrix of round-trip sample
//! indices, one per sender/receiver pair. The diagonal (the `senders`
//! monostatic distances) determines the off-diagonals up to rounding, which
//! is why candidates are enumerated over diagonals only.

/// Maps between absolute sample distances and indices into the region of
/// interest.
///
/// The measurement window starts `offset` samples after the firing instant
/// and spans `horizon` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiMapping {
    /// First valid sample distance.
    pub offset: u32,
    /// Number of valid sample distances.
    pub horizon: u32,
}

impl RoiMapping {
    /// Absolute distance of the given window index.
    pub fn to_distance(&self, index: usize) -> u32 {
        self.offset + index as u32
    }

    /// Window index of the given absolute distance, or `None` when the
    /// distance falls outside the region of interest.
    pub fn to_index(&self, distance: u32) -> Option<usize> {
        if distance >= self.offset && distance < self.offset + self.horizon {
            Some((distance - self.offset) as usize)
        } else {
            None
        }
    }

    /// Whether the distance lies inside the region of interest.
    pub fn contains(&self, distance: u32) -> bool {
        self.to_index(distance).is_some()
    }
}

/// Dense `senders x receivers x samples` trace storage.
///
/// Used for the measurement, the dual signal and the per-pair slave
/// objectives alike.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMatrix {
    senders: usize,
    receivers: usize,
    samples: usize,
    data: Vec<f64>,
}

impl TraceMatrix {
    /// An all-zero trace matrix.
    pub fn zeros(senders: usize, receivers: usize, samples: usize) -> Self {
        Self {
            senders,
            receivers,
            samples,
            data: vec![0.0; senders * receivers * samples],
        }
    }

    pub fn senders(&self) -> usize {
        self.senders
    }

    pub fn receivers(&self) -> usize {
        self.receivers
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    fn row_start(&self, sender: usize, receiver: usize) -> usize {
        debug_assert!(sender < self.senders && receiver < self.receivers);
        (sender * self.receivers + receiver) * self.samples
    }

    /// The sample row of one sender/receiver pair.
    pub fn row(&self, sender: usize, receiver: usize) -> &[f64] {
        let start = self.row_start(sender, receiver);
        &self.data[start..start + self.samples]
    }

    /// Mutable sample row of one sender/receiver pair.
    pub fn row_mut(&mut self, sender: usize, receiver: usize) -> &mut [f64] {
        let start = self.row_start(sender, receiver);
        &mut self.data[start..start + self.samples]
    }

    pub fn at(&self, sender: usize, receiver: usize, sample: usize) -> f64 {
        self.data[self.row_start(sender, receiver) + sample]
    }

    pub fn set(&mut self, sender: usize, receiver: usize, sample: usize, value: f64) {
        let idx = self.row_start(sender, receiver) + sample;
        self.data[idx] = value;
    }

    /// Reset every sample to zero.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|d| *d = 0.0);
    }

    /// Flat view over all samples.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable flat view over all samples.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Sum of squares over all samples.
    pub fn norm_squared(&self) -> f64 {
        self.data.iter().map(|d| d * d).sum()
    }
}

/// Dense symmetric `n x n` matrix of `f64`, stored as a lower triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SymmetricMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * (n + 1) / 2],
        }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    fn index(&self, i: usize, j: usize) -> usize {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        debug_assert!(hi < self.n);
        hi * (hi + 1) / 2 + lo
    }

    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.data[self.index(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.index(i, j);
        self.data[idx] = value;
    }
}

/// Relaxation values of the symmetric binary choice variables, one weight
/// per element pair and sample index.
#[derive(Debug, Clone)]
pub struct SymmetricChoices {
    elements: usize,
    samples: usize,
    data: Vec<f64>,
}

impl SymmetricChoices {
    pub fn zeros(elements: usize, samples: usize) -> Self {
        Self {
            elements,
            samples,
            data: vec![0.0; elements * (elements + 1) / 2 * samples],
        }
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    fn pair_start(&self, i: usize, j: usize) -> usize {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        debug_assert!(hi < self.elements);
        (hi * (hi + 1) / 2 + lo) * self.samples
    }

    pub fn at(&self, i: usize, j: usize, sample: usize) -> f64 {
        self.data[self.pair_start(i, j) + sample]
    }

    pub fn set(&mut self, i: usize, j: usize, sample: usize, value: f64) {
        let idx = self.pair_start(i, j) + sample;
        self.data[idx] = value;
    }

    /// The per-sample weights of one element pair.
    pub fn pair(&self, i: usize, j: usize) -> &[f64] {
        let start = self.pair_start(i, j);
        &self.data[start..start + self.samples]
    }
}

/// Auxiliary slave values carried along for center visualization.
#[derive(Debug, Clone, PartialEq)]
pub struct TofExtension {
    /// The y-representant of the reflector center.
    pub y: f64,
    /// Relaxed diameter values per element pair.
    pub diameter: SymmetricMatrix,
    /// Relaxed squared-diameter values per element.
    pub quadratic: Vec<f64>,
}

/// Round-trip sample distances of one reflector, one `u32` per
/// sender/receiver pair. Symmetric by construction: `set` writes both
/// mirror cells.
#[derive(Debug, Clone)]
pub struct TimeOfFlight {
    senders: usize,
    receivers: usize,
    data: Vec<u32>,
    /// The x-representant of the reflector center, when known.
    pub representant_x: Option<f64>,
    /// Center-visualization extension, when produced by the slave.
    pub extension: Option<TofExtension>,
}

impl TimeOfFlight {
    pub fn new(senders: usize, receivers: usize) -> Self {
        Self {
            senders,
            receivers,
            data: vec![0; senders * receivers],
            representant_x: None,
            extension: None,
        }
    }

    pub fn senders(&self) -> usize {
        self.senders
    }

    pub fn receivers(&self) -> usize {
        self.receivers
    }

    pub fn at(&self, sender: usize, receiver: usize) -> u32 {
        self.data[sender * self.receivers + receiver]
    }

    /// Writes both `(sender, receiver)` and its mirror cell.
    pub fn set(&mut self, sender: usize, receiver: usize, value: u32) {
        self.data[sender * self.receivers + receiver] = value;
        self.data[receiver * self.receivers + sender] = value;
    }

    /// The monostatic distances.
    pub fn diagonal(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.senders.min(self.receivers)).map(move |i| self.at(i, i))
    }

    /// Fills the off-diagonals with the rounded mean of the two monostatic
    /// distances.
    pub fn fill_from_diagonal(&mut self) {
        for i in 0..self.senders {
            for j in 0..self.receivers {
                if i != j {
                    let mean = (self.at(i, i) + self.at(j, j)) / 2;
                    self.data[i * self.receivers + j] = mean;
                }
            }
        }
    }

    /// Writes the reflector's impulse response into `out`: per pair, the
    /// reference signal shifted to the pair's round-trip distance.
    pub fn simulate(&self, reference: &TraceMatrix, out: &mut TraceMatrix) {
        out.clear();

        for i in 0..self.senders {
            for j in 0..self.receivers {
                let shift = self.at(i, j) as usize;
                if shift >= out.samples() {
                    continue;
                }
                let steps = reference.samples().min(out.samples() - shift);
                let src = &reference.row(i, j)[..steps];
                out.row_mut(i, j)[shift..shift + steps].copy_from_slice(src);
            }
        }
    }

    /// Inner product of this signature's simulated response with the dual
    /// signal, without materializing the response. `offset` is the window
    /// offset of the dual trace.
    pub fn dot_with_dual(&self, reference: &TraceMatrix, dual: &TraceMatrix, offset: u32) -> f64 {
        let mut dot = 0.0;
        for i in 0..self.senders {
            for j in 0..self.receivers {
                let start = self.at(i, j) as i64 - offset as i64;
                if start >= dual.samples() as i64 {
                    continue;
                }
                let steps = reference
                    .samples()
                    .min((dual.samples() as i64 - start) as usize);
                // A signature ahead of the window only overlaps with its tail.
                let (ref_skip, dual_start) = if start < 0 {
                    ((-start) as usize, 0)
                } else {
                    (0, start as usize)
                };
                if ref_skip >= steps {
                    continue;
                }
                let reference_row = &reference.row(i, j)[ref_skip..steps];
                let dual_row = &dual.row(i, j)[dual_start..dual_start + (steps - ref_skip)];
                dot += reference_row
                    .iter()
                    .zip(dual_row)
                    .map(|(r, d)| r * d)
                    .sum::<f64>();
            }
        }
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_reference(elements: usize) -> TraceMatrix {
        let mut reference = TraceMatrix::zeros(elements, elements, 1);
        for i in 0..elements {
            for j in 0..elements {
                reference.set(i, j, 0, 1.0);
            }
        }
        reference
    }

    #[test]
    fn set_is_symmetric() {
        let mut tof = TimeOfFlight::new(3, 3);
        tof.set(0, 2, 17);
        assert_eq!(tof.at(2, 0), 17);
    }

    #[test]
    fn fill_from_diagonal_rounds_mean() {
        let mut tof = TimeOfFlight::new(2, 2);
        tof.set(0, 0, 10);
        tof.set(1, 1, 13);
        tof.fill_from_diagonal();
        assert_eq!(tof.at(0, 1), 11);
        assert_eq!(tof.at(1, 0), 11);
    }

    #[test]
    fn simulate_places_reference_at_distance() {
        let mut tof = TimeOfFlight::new(1, 1);
        tof.set(0, 0, 3);
        let reference = impulse_reference(1);
        let mut out = TraceMatrix::zeros(1, 1, 6);
        tof.simulate(&reference, &mut out);
        assert_eq!(out.row(0, 0), &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn dot_with_dual_matches_simulation() {
        let mut tof = TimeOfFlight::new(2, 2);
        tof.set(0, 0, 4);
        tof.set(1, 1, 6);
        tof.fill_from_diagonal();

        let reference = impulse_reference(2);
        let mut dual = TraceMatrix::zeros(2, 2, 10);
        for i in 0..2 {
            for j in 0..2 {
                for s in 0..10 {
                    dual.set(i, j, s, (i + j) as f64 + s as f64 * 0.5);
                }
            }
        }

        let mut simulated = TraceMatrix::zeros(2, 2, 10);
        tof.simulate(&reference, &mut simulated);
        let expected: f64 = simulated
            .as_slice()
            .iter()
            .zip(dual.as_slice())
            .map(|(a, b)| a * b)
            .sum();

        let got = tof.dot_with_dual(&reference, &dual, 0);
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn dot_with_dual_respects_offset() {
        let mut tof = TimeOfFlight::new(1, 1);
        tof.set(0, 0, 5);
        let reference = impulse_reference(1);
        let mut dual = TraceMatrix::zeros(1, 1, 4);
        dual.set(0, 0, 2, 3.0);
        // Distance 5 with offset 3 lands on window index 2.
        assert!((tof.dot_with_dual(&reference, &dual, 3) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn roi_mapping_round_trips() {
        let roi = RoiMapping {
            offset: 10,
            horizon: 5,
        };
        assert_eq!(roi.to_index(10), Some(0));
        assert_eq!(roi.to_index(14), Some(4));
        assert_eq!(roi.to_index(15), None);
        assert_eq!(roi.to_index(9), None);
        assert_eq!(roi.to_distance(3), 13);
    }

    #[test]
    fn symmetric_choices_mirror_access() {
        let mut choices = SymmetricChoices::zeros(3, 4);
        choices.set(2, 0, 1, 0.5);
        assert!((choices.at(0, 2, 1) - 0.5).abs() < 1e-12);
    }
}
