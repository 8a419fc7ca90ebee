//! Heightfield properties on the CPU reference backend
//!
//! Property tests for stability, energy and smoothing, plus the long-running
//! flat-rest and single-drop scenarios.

use proptest::prelude::*;

use ripple_glass::compute::{CpuBackend, GridExtent};
use ripple_glass::physics::heightfield::{
    all_finite, height_variance, max_abs_height, peak_envelope, wave_energy, HeightfieldSimulation,
    PerturbationPoint, SimulationParams,
};
use ripple_glass::physics::seeding::{flat_heightmap, seed_heightmap, NoiseSeed};

fn flat_simulation(extent: GridExtent, params: SimulationParams) -> HeightfieldSimulation<CpuBackend> {
    HeightfieldSimulation::new(CpuBackend::new(), extent, params, &flat_heightmap(extent))
        .expect("cpu simulation")
}

fn perturbation() -> impl Strategy<Value = PerturbationPoint> {
    prop_oneof![
        Just(PerturbationPoint::NONE),
        (-6.0f32..6.0, -6.0f32..6.0).prop_map(|(x, y)| PerturbationPoint::new(x, y)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_heights_stay_finite(
        viscosity in 0.0f32..1.0,
        mouse_size in 0.05f32..2.0,
        points in prop::collection::vec(perturbation(), 1..24),
    ) {
        let extent = GridExtent::new(16, 16);
        let params = SimulationParams {
            viscosity,
            mouse_size,
            bounds: [4.0, 4.0],
            ..Default::default()
        };
        let mut sim = flat_simulation(extent, params);
        for point in points {
            sim.advance(point).unwrap();
            prop_assert!(all_finite(&sim.texels()));
        }
    }

    #[test]
    fn test_energy_non_increasing_without_damping(
        x in -1.5f32..1.5,
        y in -1.5f32..1.5,
        mouse_size in 0.3f32..1.0,
    ) {
        let extent = GridExtent::new(48, 48);
        let params = SimulationParams {
            viscosity: 1.0,
            mouse_size,
            bounds: [4.0, 4.0],
            ..Default::default()
        };
        let mut sim = flat_simulation(extent, params);
        sim.advance(PerturbationPoint::new(x, y)).unwrap();

        let initial = wave_energy(&sim.texels(), extent, 1.0);
        prop_assert!(initial > 0.0);
        let mut previous = initial;
        for _ in 0..30 {
            sim.advance(PerturbationPoint::NONE).unwrap();
            let energy = wave_energy(&sim.texels(), extent, 1.0);
            prop_assert!(energy <= previous + 1e-5 * initial, "{} -> {}", previous, energy);
            previous = energy;
        }
    }

    #[test]
    fn test_smoothing_reduces_variance(seed in any::<u32>()) {
        let extent = GridExtent::new(32, 32);
        let noise = NoiseSeed { seed, ..NoiseSeed::default() };
        let texels = seed_heightmap(extent, [8.0, 8.0], &noise);
        let before = height_variance(&texels);
        prop_assume!(before > 1e-12);

        let mut sim =
            HeightfieldSimulation::new(CpuBackend::new(), extent, SimulationParams::default(), &texels).unwrap();
        sim.smooth(1).unwrap();
        let after = height_variance(&sim.texels());
        prop_assert!(after < before, "variance {} -> {}", before, after);
    }
}

fn scenario_params() -> SimulationParams {
    SimulationParams {
        mouse_size: 0.5,
        viscosity: 0.97,
        wave_height: 0.04,
        bounds: [8.0, 4.0],
    }
}

#[test]
fn test_flat_surface_stays_at_rest() {
    let extent = GridExtent::new(512, 256);
    let mut sim = flat_simulation(extent, scenario_params());
    for _ in 0..300 {
        sim.advance(PerturbationPoint::NONE).unwrap();
    }
    assert_eq!(sim.steps(), 300);
    assert!(max_abs_height(&sim.texels()) < 1e-3);
}

#[test]
fn test_single_drop_is_symmetric_and_decays() {
    let extent = GridExtent::new(512, 256);
    let params = scenario_params();
    let mut sim = flat_simulation(extent, params);

    sim.advance(PerturbationPoint::new(0.0, 0.0)).unwrap();
    let texels = sim.texels();

    // Texels are square (1/64 world units), so the bump mirrors across both
    // axes and across the diagonals around the centre.
    let (cx, cy) = (256u32, 128u32);
    for d in 0..40u32 {
        for e in 0..40u32 {
            let a = texels[extent.index(cx + d, cy + e)][0];
            let mirrored_x = texels[extent.index(cx - 1 - d, cy + e)][0];
            let mirrored_y = texels[extent.index(cx + d, cy - 1 - e)][0];
            let swapped = texels[extent.index(cx + e, cy + d)][0];
            assert!((a - mirrored_x).abs() < 1e-6);
            assert!((a - mirrored_y).abs() < 1e-6);
            assert!((a - swapped).abs() < 1e-6);
        }
    }

    let mut previous = peak_envelope(&texels, extent, params.viscosity);
    assert!(previous > 0.0);
    for step in 0..50 {
        sim.advance(PerturbationPoint::NONE).unwrap();
        let peak = peak_envelope(&sim.texels(), extent, params.viscosity);
        assert!(peak < previous, "step {}: peak {} >= {}", step, peak, previous);
        previous = peak;
    }
}
