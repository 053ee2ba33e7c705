//! Fitted feature scaler.
//!
//! The scaler is fitted offline alongside the model and exported as JSON.
//! At runtime it is read-only.

use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// Column-wise transform between raw and normalized feature space.
pub trait Scaler: Send + Sync {
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Number of columns the scaler was fitted on.
    fn feature_count(&self) -> usize;
}

/// Parameters of a fitted per-column scaler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedScaler {
    /// Maps `[data_min, data_max]` onto `feature_range`.
    MinMax {
        data_min: Vec<f64>,
        data_max: Vec<f64>,
        #[serde(default = "default_feature_range")]
        feature_range: (f64, f64),
    },
    /// Removes `mean` and divides by `scale`.
    Standard { mean: Vec<f64>, scale: Vec<f64> },
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

// Constant columns are left unscaled instead of dividing by zero.
fn nonzero(v: f64) -> f64 {
    if v == 0.0 || !v.is_finite() {
        1.0
    } else {
        v
    }
}

impl FittedScaler {
    /// A scaler that leaves `n` columns untouched.
    pub fn identity(n: usize) -> Self {
        FittedScaler::Standard {
            mean: vec![0.0; n],
            scale: vec![1.0; n],
        }
    }

    /// Per-column `(multiplier, offset)` so that `scaled = x * mul + offset`.
    fn affine(&self) -> (Array1<f64>, Array1<f64>) {
        match self {
            FittedScaler::MinMax {
                data_min,
                data_max,
                feature_range: (lo, hi),
            } => {
                let mul: Array1<f64> = data_min
                    .iter()
                    .zip(data_max)
                    .map(|(min, max)| (hi - lo) / nonzero(max - min))
                    .collect();
                let offset: Array1<f64> = data_min
                    .iter()
                    .zip(mul.iter())
                    .map(|(min, m)| lo - min * m)
                    .collect();
                (mul, offset)
            }
            FittedScaler::Standard { mean, scale } => {
                let mul: Array1<f64> = scale.iter().map(|s| 1.0 / nonzero(*s)).collect();
                let offset: Array1<f64> = mean.iter().zip(mul.iter()).map(|(m, k)| -m * k).collect();
                (mul, offset)
            }
        }
    }

    fn check_columns(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.feature_count() {
            return Err(Error::Scaler(format!(
                "expected {} columns, got {}",
                self.feature_count(),
                x.ncols()
            )));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let consistent = match self {
            FittedScaler::MinMax {
                data_min, data_max, ..
            } => data_min.len() == data_max.len(),
            FittedScaler::Standard { mean, scale } => mean.len() == scale.len(),
        };
        if !consistent || self.feature_count() == 0 {
            return Err(Error::Scaler("scaler parameters have mismatched lengths".into()));
        }
        Ok(())
    }
}

impl Scaler for FittedScaler {
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(x)?;
        let (mul, offset) = self.affine();
        Ok(x * &mul + &offset)
    }

    fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(x)?;
        let (mul, offset) = self.affine();
        Ok((x - &offset) / &mul)
    }

    fn feature_count(&self) -> usize {
        match self {
            FittedScaler::MinMax { data_min, .. } => data_min.len(),
            FittedScaler::Standard { mean, .. } => mean.len(),
        }
    }
}

/// Scaler export together with the training metadata saved beside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub scaler: FittedScaler,
    #[serde(default)]
    pub feature_columns: Option<Vec<String>>,
    #[serde(default)]
    pub lookback_period: Option<usize>,
}

impl ScalerArtifact {
    /// Load a scaler export from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let artifact: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Scaler(format!("{}: {e}", path.display())))?;
        artifact.scaler.validate()?;
        info!(
            "Loaded scaler from {:?} ({} features, lookback {:?})",
            path,
            artifact.scaler.feature_count(),
            artifact.lookback_period
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12, "{x} != {y}");
        }
    }

    #[test]
    fn test_min_max_transform() {
        let scaler = FittedScaler::MinMax {
            data_min: vec![0.0, -1.0],
            data_max: vec![10.0, 1.0],
            feature_range: (-1.0, 1.0),
        };
        let x = array![[0.0, -1.0], [5.0, 0.0], [10.0, 1.0]];
        let scaled = scaler.transform(&x).unwrap();

        assert_close(&scaled, &array![[-1.0, -1.0], [0.0, 0.0], [1.0, 1.0]]);
        assert_close(&scaler.inverse_transform(&scaled).unwrap(), &x);
    }

    #[test]
    fn test_standard_roundtrip() {
        let scaler = FittedScaler::Standard {
            mean: vec![0.001, -0.002, 0.0, 0.0005],
            scale: vec![0.01, 0.02, 0.015, 0.0],
        };
        let x = array![[0.003, -0.001, 0.002, 0.004], [-0.01, 0.02, 0.0, -0.003]];
        let back = scaler.inverse_transform(&scaler.transform(&x).unwrap()).unwrap();
        assert_close(&back, &x);
    }

    #[test]
    fn test_constant_column_passes_through() {
        let scaler = FittedScaler::MinMax {
            data_min: vec![2.0],
            data_max: vec![2.0],
            feature_range: (0.0, 1.0),
        };
        let scaled = scaler.transform(&array![[2.0], [3.0]]).unwrap();
        assert_close(&scaled, &array![[0.0], [1.0]]);
    }

    #[test]
    fn test_column_mismatch() {
        let scaler = FittedScaler::identity(4);
        assert!(matches!(
            scaler.transform(&Array2::zeros((2, 3))),
            Err(Error::Scaler(_))
        ));
        assert!(scaler.inverse_transform(&Array2::zeros((1, 5))).is_err());
    }

    #[test]
    fn test_artifact_json() {
        let json = r#"{
            "scaler": {"kind": "min_max", "data_min": [-0.1, -0.1], "data_max": [0.1, 0.1]},
            "feature_columns": ["open", "close"],
            "lookback_period": 60
        }"#;
        let artifact: ScalerArtifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.lookback_period, Some(60));
        assert_eq!(artifact.scaler.feature_count(), 2);
        match artifact.scaler {
            FittedScaler::MinMax { feature_range, .. } => assert_eq!(feature_range, (0.0, 1.0)),
            other => panic!("unexpected scaler {other:?}"),
        }
    }

    #[test]
    fn test_artifact_rejects_mismatched_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.json");
        std::fs::write(
            &path,
            r#"{"scaler": {"kind": "standard", "mean": [0.0, 0.0], "scale": [1.0]}}"#,
        )
        .unwrap();
        assert!(matches!(ScalerArtifact::from_file(&path), Err(Error::Scaler(_))));
    }
}
