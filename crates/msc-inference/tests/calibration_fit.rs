//! Calibration fit on synthetic Z decays with a known momentum bias.

use msc_calib::{CancelFlag, FunctionFamily, MomentumScaleCorrector, ParameterSet, RunConfig};
use msc_core::{Error, Muon, MuonPair};
use msc_inference::CalibrationFit;
use rand::{Rng, SeedableRng};
use rand_distr::{Cauchy, Distribution, Normal};
use std::f64::consts::PI;

const Z_MASS: f64 = 91.1876;

/// Back-to-back Z decays with a Breit-Wigner mass and 1% pt resolution.
fn z_decays(n: usize, seed: u64) -> Vec<MuonPair> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let bw = Cauchy::new(Z_MASS, 2.4952 / 2.0).unwrap();
    let smear = Normal::new(1.0, 0.01).unwrap();
    let mut pairs = Vec::with_capacity(n);
    while pairs.len() < n {
        let m = bw.sample(&mut rng);
        if !(80.0..100.0).contains(&m) {
            continue;
        }
        let eta1: f64 = rng.random_range(-1.0..1.0);
        let eta2: f64 = rng.random_range(-1.0..1.0);
        let phi: f64 = rng.random_range(-PI..0.0);
        let pt = m / (2.0 * ((eta1 - eta2).cosh() + 1.0)).sqrt();
        pairs.push(MuonPair::new(
            Muon::new(pt * smear.sample(&mut rng), eta1, phi, -1),
            Muon::new(pt * smear.sample(&mut rng), eta2, phi + PI, 1),
        ));
    }
    pairs
}

fn config(extra: &str) -> RunConfig {
    let text = format!(
        "schema_version: muscle_run_v0\n\
         table_bins: 150\n\
         bias: {{type: 1, parameters: [1.02, 0.0]}}\n\
         scale:\n  type: 1\n  parameters: [1.0, 0.0]\n  fix: [false, true]\n  steps: [2.0e-3, 1.0e-5]\n\
         resolution:\n  type: 0\n  parameters: [0.01, 0.0, 0.0]\n  fix: [true, true, true]\n\
         {extra}"
    );
    RunConfig::from_slice(text.as_bytes()).unwrap()
}

#[test]
fn biased_sample_fit_chains_iterations() {
    let pairs = z_decays(400, 11);
    let fit = CalibrationFit::new(config("iterations: 2\n")).unwrap();
    let result = fit.run(&pairs).unwrap();

    assert_eq!(result.n_pairs, 400);
    assert_eq!(result.iterations.len(), 2);
    assert_eq!(result.scale.blocks.len(), 2);
    assert_eq!(result.resolution.blocks.len(), 2);
    assert_eq!(result.background.blocks.len(), 2);

    for it in &result.iterations {
        assert!(it.nll.is_finite());
        assert!(it.nll <= it.initial_nll + 1e-9, "iteration {}: {} > {}", it.iteration, it.nll, it.initial_nll);
        assert_eq!(it.stages.len(), 1);
        assert_eq!(it.stages[0].free, vec![3]);
        // Fixed parameters keep their configured values and carry no error.
        assert_eq!(&it.parameters[..3], &[0.01, 0.0, 0.0]);
        assert_eq!(it.parameters[4], 0.0);
        assert_eq!(it.errors[0], 0.0);
        assert!(it.stats.weighted_pairs > 300);
    }
    // The first iteration sees the full bias.
    assert!(result.iterations[0].parameters[3] < 1.0);
}

#[test]
fn fitted_scale_file_drives_corrector() {
    let pairs = z_decays(200, 5);
    let fit = CalibrationFit::new(config("speedup: true\n")).unwrap();
    let result = fit.run(&pairs).unwrap();
    assert!(result.iterations[0].errors.iter().all(|&e| e == 0.0));

    let dir = tempfile::tempdir().unwrap();
    result.write_parameter_files(dir.path()).unwrap();
    let loaded = ParameterSet::load(dir.path().join("scale.txt"), FunctionFamily::Scale).unwrap();
    assert_eq!(loaded.function_types(), vec![1]);

    let corrector = MomentumScaleCorrector::from_file(dir.path().join("scale.txt")).unwrap();
    let p0 = result.iterations[0].parameters[3];
    let corrected = corrector.correct_pt(40.0, 0.0, 0.0, 1);
    assert!((corrected - 40.0 * p0).abs() < 1e-6 * 40.0);

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"iterations\""));
}

#[test]
fn cancelled_fit_returns_cancelled() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let fit = CalibrationFit::new(config("")).unwrap().with_cancel(cancel);
    let err = fit.run(&z_decays(10, 1)).unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
}

#[test]
fn invalid_config_rejected_up_front() {
    let mut cfg = config("");
    cfg.iterations = 0;
    assert!(matches!(CalibrationFit::new(cfg), Err(Error::Configuration(_))));
}
