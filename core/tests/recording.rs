//! Evolve-and-record helpers writing CSV.

use std::fs;

use diffusion_core::{recorder::CsvRecorder, DiffusionTimeCdf, Quad};
use tempfile::tempdir;

fn read_lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
}

#[test]
fn quantile_rows_match_direct_queries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quantiles.csv");
    let quantiles = vec![Quad::from(10.0), Quad::from(100.0)];

    let mut recorded = DiffusionTimeCdf::with_seed(1.0, 100, 4).unwrap();
    recorded
        .evolve_and_save_quantile(&[5, 10, 50], &quantiles, &path, false)
        .unwrap();
    assert_eq!(recorded.time(), 50);

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "time,1e1,1e2");

    let mut direct = DiffusionTimeCdf::with_seed(1.0, 100, 4).unwrap();
    for (line, t) in lines[1..].iter().zip([5u64, 10, 50]) {
        direct.evolve_to_time(t).unwrap();
        let expected = format!(
            "{t},{},{}",
            direct.find_quantile(10.0).unwrap(),
            direct.find_quantile(100.0).unwrap()
        );
        assert_eq!(*line, expected);
    }
}

#[test]
fn append_continues_without_a_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("append.csv");
    let quantiles = vec![Quad::from(2.0)];

    let mut system = DiffusionTimeCdf::with_seed(1.0, 40, 4).unwrap();
    system.evolve_and_save_quantile(&[10, 20], &quantiles, &path, false).unwrap();
    system.evolve_and_save_quantile(&[30, 40], &quantiles, &path, true).unwrap();

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 5);
    assert_eq!(lines.iter().filter(|l| l.starts_with("time")).count(), 1);
    assert!(lines[4].starts_with("40,"));

    // A fresh recording replaces the old file.
    let mut fresh = DiffusionTimeCdf::with_seed(1.0, 40, 4).unwrap();
    fresh.evolve_and_save_quantile(&[1], &quantiles, &path, false).unwrap();
    assert_eq!(read_lines(&path).len(), 2);
}

#[test]
fn variance_rows_hold_positions_then_variances() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("variance.csv");

    let mut system = DiffusionTimeCdf::with_seed(f64::INFINITY, 20, 0).unwrap();
    system
        .evolve_and_get_variance(&[10, 20], &[1.0, 100.0], &path, false)
        .unwrap();

    let lines = read_lines(&path);
    assert_eq!(lines[0], "time,1,100,var1,var100");
    assert_eq!(lines.len(), 3);

    let fields: Vec<&str> = lines[2].split(',').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[0], "20");
    let var1: f64 = fields[3].parse().unwrap();
    assert!((var1 - 20.0).abs() < 1e-9, "var1 = {var1}");
    let var100: f64 = fields[4].parse().unwrap();
    assert!(var100 < var1, "the maximum of many walkers fluctuates less");
}

#[test]
fn velocity_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("velocity.csv");

    let mut system = DiffusionTimeCdf::with_seed(1.0, 30, 2).unwrap();
    system
        .evolve_and_get_prob_and_v(Quad::from(1e4), &[10, 20, 30], &path, false)
        .unwrap();

    let lines = read_lines(&path);
    assert_eq!(lines[0], "time,prob,v");
    assert_eq!(lines.len(), 4);
    for line in &lines[1..] {
        let fields: Vec<&str> = line.split(',').collect();
        let prob: Quad = fields[1].parse().unwrap();
        let v: f64 = fields[2].parse().unwrap();
        assert!(prob > Quad::from(1e-4) && prob <= Quad::ONE, "{line}");
        assert!((-1.0..=1.0).contains(&v), "{line}");
    }

    assert!(system
        .evolve_and_get_prob_and_v(Quad::from(0.5), &[30], &path, true)
        .is_err());
}

#[test]
fn rows_reach_disk_as_they_are_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rows.csv");

    let mut csv = CsvRecorder::open(&path, false).unwrap();
    csv.write_row(["time", "prob", "v"]).unwrap();
    csv.write_row(["1".to_string(), Quad::from(0.5).to_string(), "0.25".to_string()]).unwrap();

    // Still open: both rows must already be readable.
    assert_eq!(read_lines(&path), vec!["time,prob,v", "1,5e-1,0.25"]);

    // Fields that need it are quoted.
    csv.write_row(["a,b", "c"]).unwrap();
    assert_eq!(read_lines(&path)[2], "\"a,b\",c");
}
