//! Score functions for [`Query::FunctionScore`](crate::lexical::query::Query::FunctionScore).

use serde::{Deserialize, Serialize};

use crate::error::{Result, XiphosError};
use crate::lexical::core::doc_values::NumericDocValues;
use crate::lexical::query::Query;

/// Transformation applied to a field value after multiplying it by `factor`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValueModifier {
    #[default]
    None,
    /// `log10(1 + v)`
    Log1p,
    /// `ln(1 + v)`
    Ln1p,
    Sqrt,
    Square,
    /// `1 / v`
    Reciprocal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayKind {
    #[default]
    Gauss,
    Exp,
    Linear,
}

/// A function of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFunction {
    /// A constant.
    Weight(f32),
    FieldValueFactor {
        field: String,
        #[serde(default = "default_factor")]
        factor: f64,
        #[serde(default)]
        modifier: FieldValueModifier,
        /// Value used for documents without one. Without it such documents are left
        /// out of the function combination.
        #[serde(default)]
        missing: Option<f64>,
    },
    /// 1.0 within `offset` of `origin`, falling to `decay` at `offset + scale`.
    Decay {
        field: String,
        origin: f64,
        scale: f64,
        #[serde(default)]
        offset: f64,
        #[serde(default = "default_decay")]
        decay: f64,
        #[serde(default)]
        kind: DecayKind,
    },
}

fn default_factor() -> f64 {
    1.0
}

fn default_decay() -> f64 {
    0.5
}

/// A function applied only to documents matching `filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredFunction {
    #[serde(default)]
    pub filter: Option<Query>,
    pub function: ScoreFunction,
}

impl FilteredFunction {
    pub fn new(function: ScoreFunction) -> Self {
        FilteredFunction {
            filter: None,
            function,
        }
    }

    pub fn with_filter(mut self, filter: Query) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// How the values of the applicable functions combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionScoreMode {
    #[default]
    Multiply,
    Sum,
    Avg,
    First,
    Max,
    Min,
}

/// How the combined function value and the query score combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostMode {
    #[default]
    Multiply,
    Replace,
    Sum,
    Avg,
    Max,
    Min,
}

impl ScoreFunction {
    /// Doc values field the function reads, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            ScoreFunction::Weight(_) => None,
            ScoreFunction::FieldValueFactor { field, .. } | ScoreFunction::Decay { field, .. } => {
                Some(field)
            }
        }
    }

    /// Rejects parameters no document could be scored with.
    pub fn validate(&self) -> Result<()> {
        match self {
            ScoreFunction::Weight(w) if !w.is_finite() => {
                Err(XiphosError::query(format!("invalid function weight {w}")))
            }
            ScoreFunction::Decay { scale, decay, .. } if *scale <= 0.0 => Err(XiphosError::query(
                format!("decay scale must be positive, got {scale} (decay {decay})"),
            )),
            ScoreFunction::Decay { decay, .. } if !(*decay > 0.0 && *decay < 1.0) => Err(
                XiphosError::query(format!("decay must be in (0, 1), got {decay}")),
            ),
            _ => Ok(()),
        }
    }

    /// Value of the function for `doc`; `None` if the document has no value and no
    /// fallback applies.
    pub fn evaluate(&self, values: Option<&NumericDocValues>, doc: u32) -> Option<f64> {
        match self {
            ScoreFunction::Weight(w) => Some(*w as f64),
            ScoreFunction::FieldValueFactor {
                factor,
                modifier,
                missing,
                ..
            } => {
                let value = values.and_then(|v| v.first_f64(doc)).or(*missing)? * factor;
                let value = match modifier {
                    FieldValueModifier::None => value,
                    FieldValueModifier::Log1p => (1.0 + value).log10(),
                    FieldValueModifier::Ln1p => (1.0 + value).ln(),
                    FieldValueModifier::Sqrt => value.sqrt(),
                    FieldValueModifier::Square => value * value,
                    FieldValueModifier::Reciprocal => 1.0 / value,
                };
                value.is_finite().then_some(value)
            }
            ScoreFunction::Decay {
                origin,
                scale,
                offset,
                decay,
                kind,
                ..
            } => {
                let value = values.and_then(|v| v.first_f64(doc))?;
                let distance = ((value - origin).abs() - offset).max(0.0);
                Some(decay_score(*kind, distance, *scale, *decay))
            }
        }
    }
}

fn decay_score(kind: DecayKind, distance: f64, scale: f64, decay: f64) -> f64 {
    match kind {
        DecayKind::Gauss => {
            let sigma_sq = -(scale * scale) / (2.0 * decay.ln());
            (-(distance * distance) / (2.0 * sigma_sq)).exp()
        }
        DecayKind::Exp => (decay.ln() / scale * distance).exp(),
        DecayKind::Linear => {
            let s = scale / (1.0 - decay);
            ((s - distance) / s).max(0.0)
        }
    }
}

/// Combines the values of the functions that applied. With none, the result is 1.
pub fn combine_functions(mode: FunctionScoreMode, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    match mode {
        FunctionScoreMode::Multiply => values.iter().product(),
        FunctionScoreMode::Sum => values.iter().sum(),
        FunctionScoreMode::Avg => values.iter().sum::<f64>() / values.len() as f64,
        FunctionScoreMode::First => values[0],
        FunctionScoreMode::Max => values.iter().copied().fold(f64::MIN, f64::max),
        FunctionScoreMode::Min => values.iter().copied().fold(f64::MAX, f64::min),
    }
}

pub fn combine_with_score(mode: BoostMode, score: f64, value: f64) -> f64 {
    match mode {
        BoostMode::Multiply => score * value,
        BoostMode::Replace => value,
        BoostMode::Sum => score + value,
        BoostMode::Avg => (score + value) / 2.0,
        BoostMode::Max => score.max(value),
        BoostMode::Min => score.min(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_at_scale_equals_decay() {
        for kind in [DecayKind::Gauss, DecayKind::Exp, DecayKind::Linear] {
            let at_origin = decay_score(kind, 0.0, 10.0, 0.5);
            let at_scale = decay_score(kind, 10.0, 10.0, 0.5);
            assert!((at_origin - 1.0).abs() < 1e-9, "{kind:?}");
            assert!((at_scale - 0.5).abs() < 1e-9, "{kind:?}");
        }
        assert_eq!(decay_score(DecayKind::Linear, 100.0, 10.0, 0.5), 0.0);
    }

    #[test]
    fn test_weight_and_missing_values() {
        assert_eq!(ScoreFunction::Weight(2.5).evaluate(None, 0), Some(2.5));
        let factor = ScoreFunction::FieldValueFactor {
            field: "likes".into(),
            factor: 2.0,
            modifier: FieldValueModifier::Sqrt,
            missing: Some(8.0),
        };
        assert_eq!(factor.evaluate(None, 0), Some(4.0));
        let no_missing = ScoreFunction::FieldValueFactor {
            field: "likes".into(),
            factor: 1.0,
            modifier: FieldValueModifier::None,
            missing: None,
        };
        assert_eq!(no_missing.evaluate(None, 0), None);
    }

    #[test]
    fn test_combination_modes() {
        let values = [2.0, 3.0];
        assert_eq!(combine_functions(FunctionScoreMode::Multiply, &values), 6.0);
        assert_eq!(combine_functions(FunctionScoreMode::Sum, &values), 5.0);
        assert_eq!(combine_functions(FunctionScoreMode::Avg, &values), 2.5);
        assert_eq!(combine_functions(FunctionScoreMode::First, &values), 2.0);
        assert_eq!(combine_functions(FunctionScoreMode::Min, &values), 2.0);
        assert_eq!(combine_functions(FunctionScoreMode::Max, &[]), 1.0);

        assert_eq!(combine_with_score(BoostMode::Replace, 4.0, 2.0), 2.0);
        assert_eq!(combine_with_score(BoostMode::Sum, 4.0, 2.0), 6.0);
        assert_eq!(combine_with_score(BoostMode::Avg, 4.0, 2.0), 3.0);
    }

    #[test]
    fn test_invalid_decay_is_rejected() {
        let decay = ScoreFunction::Decay {
            field: "age".into(),
            origin: 0.0,
            scale: 0.0,
            offset: 0.0,
            decay: 0.5,
            kind: DecayKind::Exp,
        };
        assert!(decay.validate().is_err());
    }
}
