//! Decoding classifier outputs into gesture labels.
//!
//! Gesture classifiers use one of two output conventions: either they output the label text
//! directly, or they output numbers (a class index or one score per class) that are resolved
//! through a [`ClassLabelTable`]. Each output tensor is classified into a [`Prediction`] first, and
//! only then turned into a label.

use itertools::Itertools;

use crate::{
    labels::{self, ClassLabelTable},
    nn::{Tensor, TensorData, TensorMap},
};

/// What a single classifier output tensor says about the gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// A single text element, holding the label itself.
    Text(String),
    /// A single numeric element, holding the class index.
    Index(i64),
    /// One score (logit or probability) per class.
    Scores(Vec<f32>),
}

impl Prediction {
    /// Classifies an output tensor.
    ///
    /// Returns [`None`] for tensors that follow neither convention: empty tensors, tensors with
    /// more than one text element, and single non-finite numbers.
    pub fn from_tensor(tensor: &Tensor) -> Option<Self> {
        match tensor.data() {
            TensorData::Text(text) => match &**text {
                [text] => Some(Prediction::Text(text.clone())),
                _ => None,
            },
            TensorData::Float(values) => match &**values {
                [] => None,
                [value] => value
                    .is_finite()
                    .then(|| Prediction::Index(value.round() as i64)),
                values => Some(Prediction::Scores(values.to_vec())),
            },
            TensorData::Int(values) => match &**values {
                [] => None,
                [value] => Some(Prediction::Index(*value)),
                values => Some(Prediction::Scores(
                    values.iter().map(|&v| v as f32).collect(),
                )),
            },
        }
    }

    /// Turns the prediction into a display label.
    ///
    /// Returns [`None`] if the label would be empty.
    pub fn label(&self, table: Option<&ClassLabelTable>) -> Option<String> {
        let label = match self {
            Prediction::Text(text) => strip_index_suffix(text).to_string(),
            Prediction::Index(index) => labels::resolve(table, *index),
            Prediction::Scores(scores) => labels::resolve(table, argmax(scores)? as i64),
        };
        (!label.is_empty()).then_some(label)
    }
}

/// Removes a trailing `(<digits>)` suffix, plus surrounding whitespace.
///
/// Some classifiers append the class index to their text labels, as in `Pataka(1)`.
pub fn strip_index_suffix(text: &str) -> &str {
    let trimmed = text.trim_end();
    let stripped = trimmed
        .strip_suffix(')')
        .and_then(|rest| {
            let digits = rest.trim_end_matches(|c: char| c.is_ascii_digit());
            (digits.len() < rest.len()).then_some(digits)
        })
        .and_then(|rest| rest.strip_suffix('('));
    stripped.unwrap_or(trimmed).trim()
}

/// Returns the index of the largest score.
///
/// Ties are resolved in favor of the first occurrence. NaN scores are never selected.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &score)| match best {
            Some((_, max)) if max >= score => best,
            _ => Some((i, score)),
        })
        .map(|(i, _)| i)
}

/// Decodes the outputs of a classifier into a gesture label.
///
/// Outputs are visited in `declared` order, or in the order of `outputs` if no output names are
/// declared. The first output that yields a non-empty label wins. Returns [`None`] if no output
/// yields a label, in which case the previously displayed label should be kept.
pub fn decode(
    outputs: &TensorMap,
    declared: &[String],
    table: Option<&ClassLabelTable>,
) -> Option<String> {
    let names: Vec<&str> = if declared.is_empty() {
        outputs.names().collect()
    } else {
        declared.iter().map(String::as_str).collect()
    };

    for name in names {
        let tensor = match outputs.get(name) {
            Some(tensor) => tensor,
            None => continue,
        };
        log::trace!(
            "output '{}' {:?}, first values: [{}]",
            name,
            tensor,
            preview(tensor),
        );

        let label = Prediction::from_tensor(tensor).and_then(|p| p.label(table));
        if let Some(label) = label {
            log::debug!("predicted: {label}");
            return Some(label);
        }
    }

    log::debug!("no valid label found");
    None
}

fn preview(tensor: &Tensor) -> String {
    const MAX: usize = 5;
    match tensor.data() {
        TensorData::Float(values) => values.iter().take(MAX).join(","),
        TensorData::Int(values) => values.iter().take(MAX).join(","),
        TensorData::Text(values) => values.iter().take(MAX).join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ClassLabelTable {
        ClassLabelTable::new(["Anjali", "Ardhachandra", "Pataka"])
    }

    fn single(name: &str, tensor: Tensor) -> TensorMap {
        [(name, tensor)].into_iter().collect()
    }

    #[test]
    fn text_label() {
        let outputs = single("label", Tensor::from_text(&[1], ["Pataka(1)"]));
        assert_eq!(decode(&outputs, &[], None).as_deref(), Some("Pataka"));
    }

    #[test]
    fn suffix() {
        assert_eq!(strip_index_suffix("Pataka(1)"), "Pataka");
        assert_eq!(strip_index_suffix("Pataka (12) "), "Pataka");
        assert_eq!(strip_index_suffix("  Mushti "), "Mushti");
        assert_eq!(strip_index_suffix("Pataka()"), "Pataka()");
        assert_eq!(strip_index_suffix("Pataka(a1)"), "Pataka(a1)");
        assert_eq!(strip_index_suffix("(3)"), "");
    }

    #[test]
    fn numeric_index() {
        let outputs = single("class", Tensor::from(2.0));
        assert_eq!(
            decode(&outputs, &[], Some(&table())).as_deref(),
            Some("Pataka")
        );

        let outputs = single("class", Tensor::from_iter(&[1, 1], [1.4]));
        assert_eq!(
            decode(&outputs, &[], Some(&table())).as_deref(),
            Some("Ardhachandra")
        );

        let outputs = single("class", Tensor::from_ints(&[1], [5]));
        assert_eq!(
            decode(&outputs, &[], Some(&table())).as_deref(),
            Some("Gesture 5")
        );
        assert_eq!(decode(&outputs, &[], None).as_deref(), Some("Gesture 5"));
    }

    #[test]
    fn scores() {
        let outputs = single("logits", Tensor::from_iter(&[1, 3], [0.1, 0.7, 0.2]));
        assert_eq!(
            decode(&outputs, &[], Some(&table())).as_deref(),
            Some("Ardhachandra")
        );
        assert_eq!(decode(&outputs, &[], None).as_deref(), Some("Gesture 1"));
    }

    #[test]
    fn ties_and_nan() {
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[0.1, 0.9, 0.9, 0.2]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3, 0.1]), Some(1));
        assert_eq!(argmax(&[f32::NAN]), None);
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), Some(1));
    }

    #[test]
    fn declared_order_wins() {
        let outputs: TensorMap = [
            ("scores", Tensor::from_iter(&[1, 3], [0.9, 0.05, 0.05])),
            ("label", Tensor::from_text(&[1], ["Pataka"])),
        ]
        .into_iter()
        .collect();

        let declared = ["label".to_string(), "scores".to_string()];
        assert_eq!(
            decode(&outputs, &declared, Some(&table())).as_deref(),
            Some("Pataka")
        );
        assert_eq!(
            decode(&outputs, &[], Some(&table())).as_deref(),
            Some("Anjali")
        );
    }

    #[test]
    fn skips_unusable_outputs() {
        let outputs: TensorMap = [
            ("empty", Tensor::from_iter(&[1, 0], [])),
            ("blank", Tensor::from_text(&[1], ["  "])),
            ("texts", Tensor::from_text(&[2], ["a", "b"])),
            ("nan", Tensor::from(f32::NAN)),
            ("index", Tensor::from(0.0)),
        ]
        .into_iter()
        .collect();
        let declared = ["missing".to_string()]
            .into_iter()
            .chain(outputs.names().map(String::from))
            .collect::<Vec<_>>();
        assert_eq!(
            decode(&outputs, &declared, Some(&table())).as_deref(),
            Some("Anjali")
        );
    }

    #[test]
    fn nothing_decodes() {
        let outputs = single("blank", Tensor::from_text(&[1], ["(1)"]));
        assert_eq!(decode(&outputs, &[], Some(&table())), None);
        assert_eq!(decode(&TensorMap::new(), &[], None), None);
    }

    #[test]
    fn predictions() {
        assert_eq!(
            Prediction::from_tensor(&Tensor::from_ints(&[1, 2], [3, 9])),
            Some(Prediction::Scores(vec![3.0, 9.0]))
        );
        assert_eq!(
            Prediction::from_tensor(&Tensor::from(-0.6)),
            Some(Prediction::Index(-1))
        );
        assert_eq!(
            Prediction::Index(-1).label(Some(&table())).as_deref(),
            Some("Gesture -1")
        );
    }
}
