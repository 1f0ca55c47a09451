//! End-to-end checks of the calibration engine on Z-like pairs: tables,
//! likelihood, parameter files and configuration on disk.

use approx::assert_relative_eq;
use msc_calib::likelihood::DEFAULT_MIN_PROBABILITY;
use msc_calib::{
    BackgroundFunction, CalibrationContext, CancelFlag, FunctionFamily, FunctionSelection,
    LikelihoodDriver, LineshapeTables, MomentumScaleCorrector, ParameterBlock, ParameterSet,
    ResolutionEstimator, ResolutionFunction, Resonances, RunConfig, ScaleFunction, find_best_pair,
    mass_resolution, rapidity_bin, read_pairs,
};
use msc_core::{Error, Muon, MuonPair};
use std::f64::consts::PI;

fn z_only() -> Resonances {
    Resonances::new([true, false, false, false, false, false])
}

fn z_context() -> CalibrationContext {
    let tables = LineshapeTables::build(&z_only(), 200, &CancelFlag::new()).unwrap();
    let functions = FunctionSelection {
        resolution: ResolutionFunction::Constant,
        scale: ScaleFunction::LinearPt,
        background: BackgroundFunction::None,
    };
    CalibrationContext::new(tables, functions, DEFAULT_MIN_PROBABILITY).unwrap()
}

fn back_to_back() -> MuonPair {
    MuonPair::new(Muon::new(45.0, 0.1, 0.5, -1), Muon::new(45.0, -0.2, 0.5 + PI, 1))
}

#[test]
fn z_pair_lands_in_window_with_positive_probability() {
    let pair = back_to_back();
    let mass = pair.mass();
    assert!((mass - 91.0).abs() < 0.5, "mass {mass}");

    let res = z_only();
    assert!(res.check_mass_window(mass, 0));
    assert_eq!(res.find_resonance(mass), Some(0));
    assert_eq!(rapidity_bin(pair.rapidity()), 0);

    let par = [0.01, 1e-3, 1e-3];
    let sigma = mass_resolution(&pair.mu1, &pair.mu2, ResolutionFunction::Constant, &par);
    assert!(sigma > 0.0 && sigma < 5.0, "sigma {sigma}");

    let ctx = z_context();
    let prob = ctx.mass_prob(mass, pair.rapidity(), sigma, &[]);
    assert!(prob.is_finite() && prob > 0.0, "prob {prob}");
}

#[test]
fn opening_angle_below_window_gives_zero_probability() {
    // Δφ = 1.6 rad puts the pair near 66 GeV: inside the widest Z window,
    // below the central rapidity-bin window.
    let pair = MuonPair::new(Muon::new(45.0, 0.1, 0.5, -1), Muon::new(45.0, -0.2, 2.1, 1));
    let mass = pair.mass();
    assert!((mass - 66.0).abs() < 0.5, "mass {mass}");

    let ctx = z_context();
    assert_eq!(ctx.mass_prob(mass, pair.rapidity(), 1.0, &[]), 0.0);

    let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
    let driver = LikelihoodDriver::new(ctx, &[pair], &init).unwrap();
    driver.evaluate(&init).unwrap();
    let stats = driver.stats();
    assert_eq!(stats.weighted_pairs, 1);
    assert_eq!(stats.zero_probability, 1);
    assert_eq!(stats.used, 0);
}

#[test]
fn likelihood_prefers_true_scale() {
    let truth = [
        back_to_back(),
        MuonPair::new(Muon::new(42.0, 0.5, -1.0, -1), Muon::new(48.0, 0.2, -1.0 + PI, 1)),
        MuonPair::new(Muon::new(46.0, -0.4, 2.0, -1), Muon::new(44.0, -0.1, 2.0 - PI, 1)),
    ];
    // Inputs biased 2% high: the best scale parameter is near 1/1.02.
    let biased: Vec<MuonPair> = truth
        .iter()
        .map(|p| {
            MuonPair::new(
                ScaleFunction::LinearPt.apply(&p.mu1, &[1.02, 0.0]),
                ScaleFunction::LinearPt.apply(&p.mu2, &[1.02, 0.0]),
            )
        })
        .collect();

    let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
    let driver = LikelihoodDriver::new(z_context(), &biased, &init).unwrap();
    let nominal = driver.evaluate(&init).unwrap();
    let corrected = driver.evaluate(&[0.01, 1e-3, 1e-3, 1.0 / 1.02, 0.0]).unwrap();
    assert!(corrected < nominal, "{corrected} >= {nominal}");
}

#[test]
fn wrong_parameter_count_rejected_before_evaluation() {
    let err = LikelihoodDriver::new(z_context(), &[back_to_back()], &[0.01, 1.0]).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn best_pair_then_correction_chain() {
    let muons = [
        Muon::new(45.0, 0.1, 0.5, -1),
        Muon::new(45.0, -0.2, 0.5 + PI, 1),
        Muon::new(8.0, 1.1, 2.0, 1),
    ];
    let pair = find_best_pair(&muons, &z_only()).unwrap();
    assert_eq!(pair.mu1.charge, -1);
    assert_eq!(pair.mu2.pt, 45.0);

    let mut scale = ParameterSet::new(FunctionFamily::Scale);
    scale.push(ParameterBlock::new(0, 1, vec![1.01, 0.0])).unwrap();
    scale.push(ParameterBlock::new(1, 1, vec![0.99, 0.0])).unwrap();
    let corrector = MomentumScaleCorrector::new(&scale).unwrap();
    let corrected = corrector.correct_pair(&pair);
    assert_relative_eq!(corrected.mu1.pt, 45.0 * 1.01 * 0.99, epsilon = 1e-12);
}

#[test]
fn parameter_files_survive_text_and_json() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = ParameterSet::new(FunctionFamily::Resolution);
    set.push(ParameterBlock::with_errors(0, 0, vec![0.012, 1.5e-3, 7e-4], vec![1e-4, 2e-5, 1e-5]))
        .unwrap();

    let text_path = dir.path().join("resolution.txt");
    set.save_text(&text_path).unwrap();
    let from_text = ParameterSet::load(&text_path, FunctionFamily::Resolution).unwrap();
    assert_eq!(from_text.function_types(), vec![0]);
    for (a, b) in from_text.to_vec().iter().zip(set.to_vec()) {
        assert_relative_eq!(*a, b, max_relative = 1e-12);
    }

    let json_path = dir.path().join("resolution.json");
    set.save_json(&json_path).unwrap();
    let from_json = ParameterSet::load(&json_path, FunctionFamily::Resolution).unwrap();
    assert_eq!(from_json, set);

    let estimator = ResolutionEstimator::from_file(&json_path).unwrap();
    assert_relative_eq!(estimator.sigma_pt(40.0, 0.3), 0.012);

    assert!(ParameterSet::load(&json_path, FunctionFamily::Scale).is_err());
}

#[test]
fn run_config_and_pairs_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("run.yaml");
    std::fs::write(
        &cfg_path,
        "schema_version: muscle_run_v0\n\
         table_bins: 50\n\
         scale: {type: 1, parameters: [1.0, 0.0]}\n\
         resolution: {type: 0, parameters: [0.01, 0.001, 0.001]}\n",
    )
    .unwrap();
    let cfg = RunConfig::from_path(&cfg_path).unwrap();
    assert_eq!(cfg.table_bins, 50);
    assert_eq!(cfg.initial_parameters().unwrap().len(), 5);

    let missing = RunConfig::from_path(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(missing, Error::Io(_)));

    let pairs_path = dir.path().join("pairs.json");
    std::fs::write(&pairs_path, serde_json::to_vec(&vec![back_to_back()]).unwrap()).unwrap();
    let pairs = read_pairs(&pairs_path).unwrap();
    assert_eq!(pairs, vec![back_to_back()]);
}

#[test]
fn cancelled_table_build_stops() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = LineshapeTables::build(&z_only(), 50, &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
}
