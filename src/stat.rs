use std::collections::HashMap;
use std::fmt::Display;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufWriter, Result, Write};
use std::path::Path;
use std::time::Duration;

/// Summary of a series of elapsed times in milliseconds.
#[derive(Debug, Clone)]
pub struct Stat {
  pub count: usize,
  pub mean: f64,
  pub median: f64,
  pub std_dev: f64,
  pub min: f64,
  pub max: f64,
}

impl Stat {
  pub fn from_vec(mut data: Vec<f64>) -> Stat {
    if data.is_empty() {
      return Stat { count: 0, mean: f64::NAN, median: f64::NAN, std_dev: f64::NAN, min: f64::NAN, max: f64::NAN };
    }
    data.sort_by(f64::total_cmp);
    let count = data.len();
    let min = data[0];
    let max = data[count - 1];
    let mean = data.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 0 { (data[count / 2 - 1] + data[count / 2]) / 2.0 } else { data[count / 2] };
    let variance = data.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / count as f64;
    Stat { count, mean, median, std_dev: variance.sqrt(), min, max }
  }
}

impl Display for Stat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    // 2σ as a percentage of the mean
    let two_sigma_percent = if self.mean > 0.0 { (2.0 * self.std_dev / self.mean) * 100.0 } else { 0.0 };
    write!(
      f,
      "{}: {:.3}ms ±{:.1}% [{:.3}|{:.3}|{:.3}]",
      self.count, self.mean, two_sigma_percent, self.min, self.median, self.max
    )
  }
}

/// Elapsed times grouped by an x-axis value such as the leaf count.
pub struct Report<X: Display + Copy + Hash + Ord> {
  label: &'static str,
  data_set: HashMap<X, Vec<f64>>,
}

impl<X: Display + Copy + Hash + Ord> Report<X> {
  pub fn new(label: &'static str) -> Self {
    Report { label, data_set: HashMap::new() }
  }

  pub fn add(&mut self, x: X, y: Duration) {
    self.data_set.entry(x).or_default().push(y.as_nanos() as f64 / 1_000_000.0);
  }

  pub fn single(&self, x: X) -> Stat {
    Stat::from_vec(self.data_set.get(&x).cloned().unwrap_or_default())
  }

  pub fn save_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{},COUNT,MEAN,MEDIAN,STDDEV,MIN,MAX", self.label)?;

    let mut xs = self.data_set.keys().copied().collect::<Vec<_>>();
    xs.sort_unstable();
    for x in xs {
      let y = self.single(x);
      writeln!(
        writer,
        "\"{}\",{},{:.3},{:.3},{:.3},{:.3},{:.3}",
        x, y.count, y.mean, y.median, y.std_dev, y.min, y.max
      )?;
    }
    writer.flush()
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;

  #[test]
  fn stat_of_series() {
    let s = Stat::from_vec(vec![4.0, 1.0, 3.0, 2.0]);
    assert_eq!(4, s.count);
    assert_eq!(2.5, s.mean);
    assert_eq!(2.5, s.median);
    assert_eq!(1.0, s.min);
    assert_eq!(4.0, s.max);
    assert!((s.std_dev - 1.25f64.sqrt()).abs() < 1e-12);

    let empty = Stat::from_vec(Vec::new());
    assert_eq!(0, empty.count);
    assert!(empty.mean.is_nan());
  }

  #[test]
  fn report_csv_is_sorted_by_x() {
    let dir = tempfile::Builder::new().prefix(".tmp-predictree-stat").tempdir().unwrap();
    let path = dir.path().join("report.csv");
    let mut report = Report::new("N");
    report.add(16u64, Duration::from_millis(2));
    report.add(4u64, Duration::from_millis(1));
    report.add(16u64, Duration::from_millis(4));
    assert_eq!(3.0, report.single(16).mean);
    assert_eq!(0, report.single(8).count);
    report.save_to_csv(&path).unwrap();

    let csv = fs::read_to_string(&path).unwrap();
    let lines = csv.lines().collect::<Vec<_>>();
    assert_eq!("N,COUNT,MEAN,MEDIAN,STDDEV,MIN,MAX", lines[0]);
    assert!(lines[1].starts_with("\"4\",1,"));
    assert!(lines[2].starts_with("\"16\",2,3.000,"));
    assert_eq!(3, lines.len());
  }
}
