//! Selection of the strongest combined inequality per element triple.
//!
//! The cosine-rule pass accumulates, per ordered element triple `(i, j, h)`,
//! a family of implications `x_k + y_l <= 1 + z_f`: if element `j` chooses
//! window index `k` and element `h` chooses `l`, then element `i` must
//! choose one of the feasible indices `f`. A chooser merges each family
//! into one violated inequality `sum x + sum y - sum z <= 1`, either
//! greedily in linear time or exactly per cell.

use std::collections::btree_map::BTreeMap;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use crate::cuts::{CutSource, SlaveCut, SlaveVar};
use crate::settings::CutSelection;
use crate::slave::session::RelaxationSnapshot;

/// Accumulated implications of one element triple: for every position `p`,
/// `b_{j,j,K[p]} + b_{h,h,L[p]} <= 1 + sum over f in F[p] of b_{i,i,f}`.
#[derive(Debug, Clone, Default)]
pub struct CellIndexes {
    /// Window indices `k` chosen by element `j`.
    pub k: Vec<usize>,
    /// Window indices `l` chosen by element `h`.
    pub l: Vec<usize>,
    /// Feasible window indices for element `i`, one list per implication.
    pub f: Vec<Vec<usize>>,
}

impl CellIndexes {
    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }
}

/// All accumulated implications of one relaxation, keyed by element triple
/// `(i, j, h)` where `i` carries the z variables.
#[derive(Debug, Default)]
pub struct AccumulatedCuts {
    cells: BTreeMap<(usize, usize, usize), CellIndexes>,
}

impl AccumulatedCuts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell_mut(&mut self, i: usize, j: usize, h: usize) -> &mut CellIndexes {
        self.cells.entry((i, j, h)).or_default()
    }

    pub fn cells(&self) -> impl Iterator<Item = (&(usize, usize, usize), &CellIndexes)> {
        self.cells.iter().filter(|(_, cell)| !cell.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.cells.values().all(|c| c.is_empty())
    }
}

fn binary_value(snapshot: &RelaxationSnapshot, element: usize, index: usize) -> f64 {
    snapshot.binary.at(element, element, index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Chosen,
    NotChosen,
    Undecided,
}

struct Part {
    /// The window index this variable stands for.
    index: usize,
    taken: Status,
    /// One entry per implication this variable participates in.
    neighbours: Vec<Neighbour>,
}

#[derive(Clone, Copy)]
struct Neighbour {
    /// Position of the paired x/y variable in the other slab.
    partner: usize,
    /// Position of the implication's z list in the list arena.
    z_list: usize,
}

/// Dedup'd slab of variables for one side of a cell.
struct Slab {
    parts: Vec<Part>,
    positions: HashMap<usize, usize>,
    /// Part positions sorted by descending relaxation value.
    order: Vec<usize>,
    /// The element whose binaries this slab reads.
    element: usize,
}

impl Slab {
    fn new(element: usize) -> Self {
        Self {
            parts: Vec::new(),
            positions: HashMap::new(),
            order: Vec::new(),
            element,
        }
    }

    fn intern(&mut self, index: usize) -> usize {
        if let Some(&pos) = self.positions.get(&index) {
            return pos;
        }
        let pos = self.parts.len();
        self.positions.insert(index, pos);
        self.parts.push(Part {
            index,
            taken: Status::Undecided,
            neighbours: Vec::new(),
        });
        pos
    }

    fn sort(&mut self, snapshot: &RelaxationSnapshot) {
        self.order = (0..self.parts.len()).collect();
        let element = self.element;
        self.order.sort_by(|&a, &b| {
            let va = binary_value(snapshot, element, self.parts[a].index);
            let vb = binary_value(snapshot, element, self.parts[b].index);
            vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    fn value_at(&self, snapshot: &RelaxationSnapshot, cursor: usize) -> f64 {
        binary_value(snapshot, self.element, self.parts[self.order[cursor]].index)
    }
}

/// Sum of the undecided z values of one implication, or `None` when some z
/// was already rejected (the implication can then never be satisfied for
/// free).
fn z_sum_if_selectable(zs: &Slab, z_list: &[usize], snapshot: &RelaxationSnapshot) -> Option<f64> {
    let mut sum = 0.0;
    for &zp in z_list {
        match zs.parts[zp].taken {
            Status::NotChosen => return None,
            // Already paid for by another implication.
            Status::Chosen => {}
            Status::Undecided => sum += binary_value(snapshot, zs.element, zs.parts[zp].index),
        }
    }
    Some(sum)
}

enum Side {
    X,
    Y,
    Z,
}

/// Runs the greedy sweep on one cell. Returns the achieved objective
/// `lhs - rhs` and the merged cut when it is violated by more than 1.
fn greedy_cell(
    elements: (usize, usize, usize),
    cell: &CellIndexes,
    snapshot: &RelaxationSnapshot,
) -> (f64, Option<SlaveCut>) {
    let (elem_i, elem_j, elem_h) = elements;

    let mut xs = Slab::new(elem_j);
    let mut ys = Slab::new(elem_h);
    let mut zs = Slab::new(elem_i);
    let mut z_lists: Vec<Vec<usize>> = Vec::with_capacity(cell.f.len());

    for p in 0..cell.k.len() {
        let x_pos = xs.intern(cell.k[p]);
        let y_pos = ys.intern(cell.l[p]);
        let list: Vec<usize> = cell.f[p].iter().map(|&f| zs.intern(f)).collect();
        let z_list = z_lists.len();
        z_lists.push(list);
        xs.parts[x_pos].neighbours.push(Neighbour {
            partner: y_pos,
            z_list,
        });
        ys.parts[y_pos].neighbours.push(Neighbour {
            partner: x_pos,
            z_list,
        });
    }

    xs.sort(snapshot);
    ys.sort(snapshot);
    zs.sort(snapshot);

    let mut x_cur = 0usize;
    let mut y_cur = 0usize;
    let mut z_cur = 0usize;

    loop {
        // Greatest-value cursor; ties prefer x, then y.
        let mut best: Option<(Side, f64)> = None;
        if x_cur < xs.order.len() {
            best = Some((Side::X, xs.value_at(snapshot, x_cur)));
        }
        if y_cur < ys.order.len() {
            let v = ys.value_at(snapshot, y_cur);
            if best.as_ref().map_or(true, |(_, bv)| v > *bv) {
                best = Some((Side::Y, v));
            }
        }
        if z_cur < zs.order.len() {
            let v = zs.value_at(snapshot, z_cur);
            if best.as_ref().map_or(true, |(_, bv)| v > *bv) {
                best = Some((Side::Z, v));
            }
        }
        let Some((side, value)) = best else {
            break;
        };

        match side {
            Side::X | Side::Y => {
                let (own, other) = match side {
                    Side::X => (&xs, &ys),
                    _ => (&ys, &xs),
                };
                let pos = own.order[match side {
                    Side::X => x_cur,
                    _ => y_cur,
                }];
                let mut can_select = true;
                for n in &own.parts[pos].neighbours {
                    if other.parts[n.partner].taken != Status::Chosen {
                        continue;
                    }
                    // The partner is in: either all z of this implication
                    // can be covered cheaper than this variable's value, or
                    // this variable must stay out.
                    match z_sum_if_selectable(&zs, &z_lists[n.z_list], snapshot) {
                        Some(z_sum) if value > z_sum => {
                            for &zp in &z_lists[n.z_list] {
                                zs.parts[zp].taken = Status::Chosen;
                            }
                        }
                        _ => {
                            can_select = false;
                            break;
                        }
                    }
                }
                let status = if can_select {
                    Status::Chosen
                } else {
                    Status::NotChosen
                };
                match side {
                    Side::X => {
                        xs.parts[pos].taken = status;
                        x_cur += 1;
                    }
                    _ => {
                        ys.parts[pos].taken = status;
                        y_cur += 1;
                    }
                }
            }
            Side::Z => {
                let pos = zs.order[z_cur];
                if zs.parts[pos].taken == Status::Undecided {
                    zs.parts[pos].taken = Status::NotChosen;
                }
                z_cur += 1;
            }
        }
    }

    let mut terms = Vec::new();
    let mut lhs_value = 0.0;
    let mut rhs_value = 0.0;
    for part in xs.parts.iter().filter(|p| p.taken == Status::Chosen) {
        terms.push((
            1.0,
            SlaveVar::Binary {
                i: elem_j,
                j: elem_j,
                sample: part.index,
            },
        ));
        lhs_value += binary_value(snapshot, elem_j, part.index);
    }
    for part in ys.parts.iter().filter(|p| p.taken == Status::Chosen) {
        terms.push((
            1.0,
            SlaveVar::Binary {
                i: elem_h,
                j: elem_h,
                sample: part.index,
            },
        ));
        lhs_value += binary_value(snapshot, elem_h, part.index);
    }
    for part in zs.parts.iter().filter(|p| p.taken == Status::Chosen) {
        terms.push((
            -1.0,
            SlaveVar::Binary {
                i: elem_i,
                j: elem_i,
                sample: part.index,
            },
        ));
        rhs_value += binary_value(snapshot, elem_i, part.index);
    }

    let objective = lhs_value - rhs_value;
    let cut = (lhs_value > rhs_value + 1.0).then(|| SlaveCut {
        terms,
        constant: 1.0,
        source: CutSource::CosineRule,
    });
    (objective, cut)
}

/// Largest number of free 0/1 variables the exact chooser enumerates.
const MAX_EXACT_VARS: usize = 20;

/// Solves one cell's 0/1 maximization exactly by implicit enumeration.
///
/// Choosing `x_k` and `y_l` together forces every `z_f` of their
/// implication, so `z` is determined by the x/y choice and the search space
/// is the tiny set of distinct x/y variables. Cells too large to enumerate
/// fall back to the greedy sweep.
fn exact_cell(
    elements: (usize, usize, usize),
    cell: &CellIndexes,
    snapshot: &RelaxationSnapshot,
) -> (f64, Option<SlaveCut>) {
    let (elem_i, elem_j, elem_h) = elements;

    let mut x_vars: Vec<usize> = Vec::new();
    let mut y_vars: Vec<usize> = Vec::new();
    let mut z_vars: Vec<usize> = Vec::new();
    let mut x_pos: HashMap<usize, usize> = HashMap::new();
    let mut y_pos: HashMap<usize, usize> = HashMap::new();
    let mut z_pos: HashMap<usize, usize> = HashMap::new();

    let mut intern = |vars: &mut Vec<usize>, map: &mut HashMap<usize, usize>, idx: usize| {
        *map.entry(idx).or_insert_with(|| {
            vars.push(idx);
            vars.len() - 1
        })
    };

    // (x position, y position, forced-z mask)
    let mut implications: Vec<(usize, usize, u64)> = Vec::with_capacity(cell.k.len());
    for p in 0..cell.k.len() {
        let xp = intern(&mut x_vars, &mut x_pos, cell.k[p]);
        let yp = intern(&mut y_vars, &mut y_pos, cell.l[p]);
        let mut mask = 0u64;
        for &f in &cell.f[p] {
            let zp = intern(&mut z_vars, &mut z_pos, f);
            if zp >= 64 {
                log::warn!(
                    "cut cell ({}, {}, {}) has too many z variables, falling back to greedy",
                    elem_i,
                    elem_j,
                    elem_h
                );
                return greedy_cell(elements, cell, snapshot);
            }
            mask |= 1 << zp;
        }
        implications.push((xp, yp, mask));
    }

    let nx = x_vars.len();
    let ny = y_vars.len();
    if nx + ny > MAX_EXACT_VARS {
        log::warn!(
            "cut cell ({}, {}, {}) has {} variables, falling back to greedy",
            elem_i,
            elem_j,
            elem_h,
            nx + ny
        );
        return greedy_cell(elements, cell, snapshot);
    }

    let x_values: Vec<f64> = x_vars.iter().map(|&k| binary_value(snapshot, elem_j, k)).collect();
    let y_values: Vec<f64> = y_vars.iter().map(|&l| binary_value(snapshot, elem_h, l)).collect();
    let z_values: Vec<f64> = z_vars.iter().map(|&f| binary_value(snapshot, elem_i, f)).collect();

    let mut best_objective = f64::NEG_INFINITY;
    let mut best: (u64, u64) = (0, 0);
    for mask in 0u64..(1u64 << (nx + ny)) {
        let x_mask = mask & ((1u64 << nx) - 1);
        let y_mask = mask >> nx;

        let mut objective = 0.0;
        for xp in 0..nx {
            if x_mask >> xp & 1 == 1 {
                objective += x_values[xp];
            }
        }
        for yp in 0..ny {
            if y_mask >> yp & 1 == 1 {
                objective += y_values[yp];
            }
        }

        let mut forced = 0u64;
        for &(xp, yp, z_mask) in &implications {
            if x_mask >> xp & 1 == 1 && y_mask >> yp & 1 == 1 {
                forced |= z_mask;
            }
        }
        let mut z_bits = forced;
        while z_bits != 0 {
            let zp = z_bits.trailing_zeros() as usize;
            objective -= z_values[zp];
            z_bits &= z_bits - 1;
        }

        if objective > best_objective {
            best_objective = objective;
            best = (mask, forced);
        }
    }

    let cut = (best_objective > 1.0).then(|| {
        let (mask, forced) = best;
        let mut terms = Vec::new();
        for xp in 0..nx {
            if mask >> xp & 1 == 1 {
                terms.push((
                    1.0,
                    SlaveVar::Binary {
                        i: elem_j,
                        j: elem_j,
                        sample: x_vars[xp],
                    },
                ));
            }
        }
        for yp in 0..ny {
            if (mask >> nx) >> yp & 1 == 1 {
                terms.push((
                    1.0,
                    SlaveVar::Binary {
                        i: elem_h,
                        j: elem_h,
                        sample: y_vars[yp],
                    },
                ));
            }
        }
        for zp in 0..z_vars.len() {
            if forced >> zp & 1 == 1 {
                terms.push((
                    -1.0,
                    SlaveVar::Binary {
                        i: elem_i,
                        j: elem_i,
                        sample: z_vars[zp],
                    },
                ));
            }
        }
        SlaveCut {
            terms,
            constant: 1.0,
            source: CutSource::CosineRule,
        }
    });
    (best_objective, cut)
}

/// Reusable two-phase counting barrier.
///
/// `sync` admits up to `capacity` threads, holds them until the barrier is
/// full, then releases them together; late arrivals wait for the next
/// round. Safe to call in a loop from a fixed set of threads.
pub struct Rendezvous {
    state: Mutex<RendezvousState>,
    entering: Condvar,
    leaving: Condvar,
    capacity: usize,
}

struct RendezvousState {
    inside: usize,
    leaving_phase: bool,
}

impl Rendezvous {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RendezvousState {
                inside: 0,
                leaving_phase: false,
            }),
            entering: Condvar::new(),
            leaving: Condvar::new(),
            capacity,
        }
    }

    pub fn sync(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Wait until the barrier accepts entries and has a free place.
        while state.leaving_phase || state.inside >= self.capacity {
            state = match self.entering.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        state.inside += 1;

        // Wait until the barrier is full.
        while !state.leaving_phase && state.inside < self.capacity {
            state = match self.leaving.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        state.leaving_phase = true;
        self.leaving.notify_all();

        state.inside -= 1;
        if state.inside == 0 {
            state.leaving_phase = false;
            self.entering.notify_all();
        }
    }
}

/// Strategy for turning accumulated implications into cuts.
#[derive(Debug, Clone, Copy)]
pub enum CutChooser {
    /// Linear-time greedy sweep.
    Greedy,
    /// Exact per-cell maximization.
    Exact,
    /// Greedy applied, exact run alongside for divergence diagnostics.
    Comparison {
        /// Objectives further apart than this are logged.
        divergence_tolerance: f64,
    },
}

impl CutChooser {
    /// The chooser for a settings value; `None` when cuts are disabled.
    pub fn from_selection(selection: CutSelection) -> Option<Self> {
        match selection {
            CutSelection::Off => None,
            CutSelection::Greedy => Some(CutChooser::Greedy),
            CutSelection::Exact => Some(CutChooser::Exact),
            CutSelection::CompareBoth => Some(CutChooser::Comparison {
                divergence_tolerance: 1e-3,
            }),
        }
    }

    /// Chooses cuts for every non-empty cell; returns the number of cuts
    /// handed to `add_cut`.
    pub fn choose(
        &self,
        ac: &AccumulatedCuts,
        snapshot: &RelaxationSnapshot,
        add_cut: &mut dyn FnMut(SlaveCut),
    ) -> u32 {
        match *self {
            CutChooser::Greedy => {
                let mut added = 0;
                for (&elements, cell) in ac.cells() {
                    if let (_, Some(cut)) = greedy_cell(elements, cell, snapshot) {
                        add_cut(cut);
                        added += 1;
                    }
                }
                added
            }
            CutChooser::Exact => {
                let mut added = 0;
                for (&elements, cell) in ac.cells() {
                    if let (_, Some(cut)) = exact_cell(elements, cell, snapshot) {
                        add_cut(cut);
                        added += 1;
                    }
                }
                added
            }
            CutChooser::Comparison {
                divergence_tolerance,
            } => Self::compare_both(ac, snapshot, divergence_tolerance, add_cut),
        }
    }

    /// Runs the greedy sweep inline and the exact chooser on a second
    /// thread, comparing their objectives cell by cell. Only the greedy
    /// cuts are applied.
    fn compare_both(
        ac: &AccumulatedCuts,
        snapshot: &RelaxationSnapshot,
        divergence_tolerance: f64,
        add_cut: &mut dyn FnMut(SlaveCut),
    ) -> u32 {
        let barrier = Rendezvous::new(2);
        let exact_objective = Mutex::new(0.0f64);
        let mut added = 0;
        let mut divergences = 0u32;
        let mut total = 0u32;

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for (&elements, cell) in ac.cells() {
                    let (objective, _) = exact_cell(elements, cell, snapshot);
                    if let Ok(mut slot) = exact_objective.lock() {
                        *slot = objective;
                    }
                    barrier.sync();
                    // Second rendezvous: the comparer is done reading.
                    barrier.sync();
                }
            });

            for (&elements, cell) in ac.cells() {
                let (greedy_objective, cut) = greedy_cell(elements, cell, snapshot);
                barrier.sync();
                let exact = exact_objective.lock().map(|g| *g).unwrap_or(f64::NAN);
                total += 1;
                if (exact - greedy_objective).abs() > divergence_tolerance {
                    divergences += 1;
                    log::warn!(
                        "cut choosers diverge on cell {:?}: greedy {} vs exact {}",
                        elements,
                        greedy_objective,
                        exact
                    );
                }
                barrier.sync();
                if let Some(cut) = cut {
                    add_cut(cut);
                    added += 1;
                }
            }
        });

        log::info!(
            "cut chooser comparison: {}/{} cells diverged",
            divergences,
            total
        );
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tof::SymmetricChoices;

    fn snapshot(elements: usize, samples: usize) -> RelaxationSnapshot {
        RelaxationSnapshot {
            binary: SymmetricChoices::zeros(elements, samples),
            diameter: None,
            squared: None,
            representant_x: 0.0,
        }
    }

    /// One implication, strong x and y, cheap z: the merged inequality is
    /// violated and both choosers find it.
    fn violated_cell() -> (RelaxationSnapshot, AccumulatedCuts) {
        let mut s = snapshot(3, 4);
        s.binary.set(1, 1, 0, 0.9); // x_0
        s.binary.set(2, 2, 1, 0.9); // y_1
        s.binary.set(0, 0, 2, 0.1); // z_2
        let mut ac = AccumulatedCuts::new();
        let cell = ac.cell_mut(0, 1, 2);
        cell.k.push(0);
        cell.l.push(1);
        cell.f.push(vec![2]);
        (s, ac)
    }

    #[test]
    fn greedy_finds_violated_inequality() {
        let (s, ac) = violated_cell();
        let mut cuts = Vec::new();
        let added = CutChooser::Greedy.choose(&ac, &s, &mut |c| cuts.push(c));
        assert_eq!(added, 1);
        // x + y - z <= 1 with values 0.9 + 0.9 - 0.1 = 1.7 > 1.
        assert!((cuts[0].violation(&s) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn exact_matches_greedy_on_simple_cell() {
        let (s, ac) = violated_cell();
        let mut greedy_cuts = Vec::new();
        let mut exact_cuts = Vec::new();
        CutChooser::Greedy.choose(&ac, &s, &mut |c| greedy_cuts.push(c));
        CutChooser::Exact.choose(&ac, &s, &mut |c| exact_cuts.push(c));
        assert_eq!(greedy_cuts.len(), 1);
        assert_eq!(exact_cuts.len(), 1);
        assert!(
            (greedy_cuts[0].violation(&s) - exact_cuts[0].violation(&s)).abs() < 1e-9
        );
    }

    #[test]
    fn satisfied_cell_yields_no_cut() {
        let (mut s, ac) = violated_cell();
        // Weak x: 0.2 + 0.9 - 0.1 = 1.0, not above 1.
        s.binary.set(1, 1, 0, 0.2);
        let mut cuts = Vec::new();
        assert_eq!(CutChooser::Greedy.choose(&ac, &s, &mut |c| cuts.push(c)), 0);
        assert_eq!(CutChooser::Exact.choose(&ac, &s, &mut |c| cuts.push(c)), 0);
    }

    #[test]
    fn exact_never_below_greedy() {
        // Two implications sharing the y variable; the greedy order can
        // miss the optimum but never exceeds it.
        let mut s = snapshot(3, 6);
        s.binary.set(1, 1, 0, 0.8);
        s.binary.set(1, 1, 1, 0.7);
        s.binary.set(2, 2, 2, 0.9);
        s.binary.set(0, 0, 3, 0.3);
        s.binary.set(0, 0, 4, 0.2);
        let mut ac = AccumulatedCuts::new();
        let cell = ac.cell_mut(0, 1, 2);
        cell.k.extend([0, 1]);
        cell.l.extend([2, 2]);
        cell.f.push(vec![3]);
        cell.f.push(vec![3, 4]);

        let (&elements, cell) = ac.cells().next().unwrap();
        let (greedy_objective, _) = super::greedy_cell(elements, cell, &s);
        let (exact_objective, _) = super::exact_cell(elements, cell, &s);
        assert!(exact_objective >= greedy_objective - 1e-9);
    }

    #[test]
    fn comparison_applies_greedy_cuts() {
        let (s, ac) = violated_cell();
        let mut cuts = Vec::new();
        let added = CutChooser::Comparison {
            divergence_tolerance: 1e-3,
        }
        .choose(&ac, &s, &mut |c| cuts.push(c));
        assert_eq!(added, 1);
    }

    #[test]
    fn rendezvous_releases_pairs() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let barrier = Rendezvous::new(2);
        let counter = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..100 {
                    counter.fetch_add(1, Ordering::SeqCst);
                    barrier.sync();
                    barrier.sync();
                }
            });
            for i in 1..=100 {
                barrier.sync();
                // Between the two syncs both threads completed round i.
                assert_eq!(counter.load(Ordering::SeqCst), i);
                barrier.sync();
            }
        });
    }
}
