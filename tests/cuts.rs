//! Validity of the generated cut families against brute force.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use colgen_core::cuts::bounds::cosine;
use colgen_core::cuts::chooser::{AccumulatedCuts, CutChooser};
use colgen_core::cuts::CutPipeline;
use colgen_core::model::tof::{RoiMapping, SymmetricChoices, SymmetricMatrix, TimeOfFlight};
use colgen_core::model::CutStatistics;
use colgen_core::slave::RelaxationSnapshot;

fn empty_snapshot(elements: usize, samples: usize) -> RelaxationSnapshot {
    RelaxationSnapshot {
        binary: SymmetricChoices::zeros(elements, samples),
        diameter: Some(SymmetricMatrix::zeros(elements)),
        squared: Some(vec![0.0; elements]),
        representant_x: 0.0,
    }
}

/// Tangent cuts linearize a concave function, so they must hold for every
/// integral point, not only near the generating one.
#[test]
fn tangent_cuts_never_cut_integral_points() {
    let mapping = RoiMapping {
        offset: 0,
        horizon: 40,
    };
    let pipeline = CutPipeline::new(1.0, mapping);

    for violated_d in [3_u32, 12, 25] {
        let mut snapshot = empty_snapshot(1, 40);
        // The relaxation overshoots: d exceeds sqrt(q) by 2.
        let q = (violated_d as f64) * (violated_d as f64);
        if let Some(diameter) = snapshot.diameter.as_mut() {
            diameter.set(0, 0, violated_d as f64 + 2.0);
        }
        snapshot.squared = Some(vec![q]);

        let mut stats = CutStatistics::default();
        let mut cuts = Vec::new();
        pipeline.tangent_cuts(&mut stats, &snapshot, &mut |c| cuts.push(c));
        assert_eq!(cuts.len(), 1);
        assert!(cuts[0].violation(&snapshot) > 0.0);

        // Every integral signature satisfies d = sqrt(d^2) exactly and must
        // survive the cut.
        for d in 0..40 {
            let mut tof = TimeOfFlight::new(1, 1);
            tof.set(0, 0, d);
            assert!(
                cuts[0].satisfied_by(&tof, &mapping),
                "tangent at {violated_d} cut off integral distance {d}"
            );
        }
    }
}

/// The cosine-rule pipeline only emits cuts that actually separate the
/// generating relaxation.
#[test]
fn cosine_rule_cuts_separate_the_relaxation() {
    let mapping = RoiMapping {
        offset: 10,
        horizon: 30,
    };
    let pipeline = CutPipeline::new(1.0, mapping);

    // Elements 1 and 2 commit to distance 10; element 0 claims distance 39,
    // far outside what the triangle geometry allows. All three sit on their
    // upper discretization boundary, so all are at risk.
    let mut snapshot = empty_snapshot(3, 30);
    snapshot.binary.set(0, 0, 29, 1.0);
    snapshot.binary.set(1, 1, 0, 1.0);
    snapshot.binary.set(2, 2, 0, 1.0);
    snapshot.squared = Some(vec![39.5 * 39.5, 10.5 * 10.5, 10.5 * 10.5]);

    let mut stats = CutStatistics::default();
    let mut cuts = Vec::new();
    let added = pipeline.cosine_rule_cuts(
        &mut stats,
        &snapshot,
        &CutChooser::Greedy,
        &mut |c| cuts.push(c),
    );
    assert!(added >= 1, "the inconsistent commitment must be cut");
    assert_eq!(stats.cosine_rule, added);
    for cut in &cuts {
        assert!(
            cut.violation(&snapshot) > 1e-9,
            "emitted cut does not separate the relaxation"
        );
    }
}

/// Cosine-rule cuts must also hold at every diagonal a single reflector can
/// produce, not only separate the fractional point that generated them.
#[test]
fn cosine_rule_cuts_hold_for_every_feasible_diagonal() {
    let mapping = RoiMapping {
        offset: 10,
        horizon: 8,
    };
    let pitch = 1.0;
    let pipeline = CutPipeline::new(pitch, mapping);

    // Elements 1 and 2 commit to distance 10, element 0 claims 17; all
    // three sit on their upper discretization boundary, so all are at risk.
    let mut snapshot = empty_snapshot(3, 8);
    snapshot.binary.set(0, 0, 7, 1.0);
    snapshot.binary.set(1, 1, 0, 1.0);
    snapshot.binary.set(2, 2, 0, 1.0);
    snapshot.squared = Some(vec![17.5 * 17.5, 10.5 * 10.5, 10.5 * 10.5]);

    let mut stats = CutStatistics::default();
    let mut cuts = Vec::new();
    let added = pipeline.cosine_rule_cuts(
        &mut stats,
        &snapshot,
        &CutChooser::Greedy,
        &mut |c| cuts.push(c),
    );
    assert!(added >= 1, "the inconsistent commitment must be cut");

    // Brute force over the whole window: a diagonal that passes the
    // pairwise feasibility check must survive every emitted cut.
    let horizon = mapping.horizon as usize;
    let mut checked = 0;
    for a in 0..horizon {
        for b in 0..horizon {
            for c in 0..horizon {
                let diagonal = [
                    mapping.to_distance(a) as f64,
                    mapping.to_distance(b) as f64,
                    mapping.to_distance(c) as f64,
                ];
                if !cosine::diagonal_feasible(&diagonal, pitch) {
                    continue;
                }
                let mut tof = TimeOfFlight::new(3, 3);
                tof.set(0, 0, mapping.to_distance(a));
                tof.set(1, 1, mapping.to_distance(b));
                tof.set(2, 2, mapping.to_distance(c));
                tof.fill_from_diagonal();
                checked += 1;
                for cut in &cuts {
                    assert!(
                        cut.satisfied_by(&tof, &mapping),
                        "feasible diagonal {diagonal:?} was cut off"
                    );
                }
            }
        }
    }
    assert!(checked > 0);
}

fn random_cell_snapshot(rng: &mut StdRng, elements: usize, samples: usize) -> RelaxationSnapshot {
    let mut snapshot = empty_snapshot(elements, samples);
    for i in 0..elements {
        // Random sub-stochastic weights per element.
        let mut remaining = 1.0;
        for k in 0..samples {
            let w: f64 = rng.gen::<f64>() * remaining * 0.6;
            snapshot.binary.set(i, i, k, w);
            remaining -= w;
        }
    }
    snapshot
}

fn random_accumulated(rng: &mut StdRng, samples: usize) -> AccumulatedCuts {
    let mut ac = AccumulatedCuts::new();
    let cell = ac.cell_mut(0, 1, 2);
    for _ in 0..6 {
        cell.k.push(rng.gen_range(0..samples));
        cell.l.push(rng.gen_range(0..samples));
        let z_count = rng.gen_range(1..4);
        cell.f
            .push((0..z_count).map(|_| rng.gen_range(0..samples)).collect());
    }
    ac
}

/// The greedy chooser is a lower bound on the exact one: whenever greedy
/// finds a violated cut, exact must find one at least as violated.
#[test]
fn greedy_never_beats_exact() {
    let mut rng = StdRng::seed_from_u64(99);
    let samples = 8;

    for round in 0..50 {
        let snapshot = random_cell_snapshot(&mut rng, 3, samples);
        let ac = random_accumulated(&mut rng, samples);

        let mut greedy_cuts = Vec::new();
        CutChooser::Greedy.choose(&ac, &snapshot, &mut |c| greedy_cuts.push(c));
        let mut exact_cuts = Vec::new();
        CutChooser::Exact.choose(&ac, &snapshot, &mut |c| exact_cuts.push(c));

        if let Some(greedy) = greedy_cuts.first() {
            let exact = exact_cuts
                .first()
                .unwrap_or_else(|| panic!("round {round}: greedy separated but exact did not"));
            let gap = exact.violation(&snapshot) - greedy.violation(&snapshot);
            assert!(
                gap > -1e-9,
                "round {round}: greedy violation exceeds the exact optimum by {}",
                -gap
            );
        }
    }
}

/// Both choosers only ever emit separating cuts.
#[test]
fn choosers_emit_only_violated_cuts() {
    let mut rng = StdRng::seed_from_u64(7);
    let samples = 8;

    for _ in 0..50 {
        let snapshot = random_cell_snapshot(&mut rng, 3, samples);
        let ac = random_accumulated(&mut rng, samples);
        for chooser in [CutChooser::Greedy, CutChooser::Exact] {
            let mut cuts = Vec::new();
            chooser.choose(&ac, &snapshot, &mut |c| cuts.push(c));
            for cut in &cuts {
                assert!(cut.violation(&snapshot) > 1e-9);
            }
        }
    }
}
