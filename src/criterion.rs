//! Training criterion: objective and batch shaping policy.
//!
//! A criterion is written as a tag such as `"ce"`, `"whole,mmi"`, `"cnn,ce"`
//! or `"tdnn+ctc"`. It is parsed once, at configuration time, into a closed
//! [`Criterion`] value; nothing downstream looks at the tag again.

use crate::defaults;
use crate::error::{Result, SeqfeedError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Training objective the batches are prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Objective {
    /// Frame-level cross entropy against a forced alignment.
    CrossEntropy,
    /// Connectionist temporal classification; labels are a shorter token sequence.
    Ctc,
    /// Sequence-discriminative training against decoding lattices.
    Mmi,
}

impl Objective {
    /// Whether labels are aligned one-to-one with feature frames.
    pub fn is_frame_synchronous(self) -> bool {
        !matches!(self, Objective::Ctc)
    }

    /// Label encoding handed to the consumer.
    pub fn label_encoding(self) -> LabelEncoding {
        match self {
            Objective::Ctc => LabelEncoding::Sparse,
            Objective::CrossEntropy | Objective::Mmi => LabelEncoding::Dense,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Objective::CrossEntropy => "ce",
            Objective::Ctc => "ctc",
            Objective::Mmi => "mmi",
        }
    }
}

/// How one package is turned into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shaping {
    /// One batch per package, padded to the longest stream.
    Whole,
    /// Fixed-width time slices of the padded package.
    Slice,
    /// Whole batch with the feature axis reshaped for a convolutional front end.
    ConvWhole,
    /// Sliced batches with the feature axis reshaped for a convolutional front end.
    ConvSlice,
    /// Whole batch with replicated leading/trailing context frames.
    Tdnn,
}

impl Shaping {
    pub fn is_conv(self) -> bool {
        matches!(self, Shaping::ConvWhole | Shaping::ConvSlice)
    }

    pub fn is_sliced(self) -> bool {
        matches!(self, Shaping::Slice | Shaping::ConvSlice)
    }

    fn tokens(self) -> &'static [&'static str] {
        match self {
            Shaping::Whole => &["whole"],
            Shaping::Slice => &[],
            Shaping::ConvWhole => &["cnn", "whole"],
            Shaping::ConvSlice => &["cnn"],
            Shaping::Tdnn => &["tdnn"],
        }
    }
}

/// Encoding of the label structure in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelEncoding {
    /// `[nstreams, time]` zero-padded array.
    Dense,
    /// `(indices, values, dense_shape)` triple.
    Sparse,
}

/// Parsed criterion: objective × shaping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Criterion {
    objective: Objective,
    shaping: Shaping,
}

impl Criterion {
    pub fn new(objective: Objective, shaping: Shaping) -> Self {
        Self { objective, shaping }
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn shaping(&self) -> Shaping {
        self.shaping
    }

    pub fn label_encoding(&self) -> LabelEncoding {
        self.objective.label_encoding()
    }

    /// Whether labels are decimated together with the features.
    pub fn decimates_labels(&self) -> bool {
        self.objective.is_frame_synchronous()
    }

    fn invalid(tag: &str, message: impl Into<String>) -> SeqfeedError {
        SeqfeedError::InvalidCriterion {
            tag: tag.to_string(),
            message: message.into(),
        }
    }
}

impl Default for Criterion {
    fn default() -> Self {
        defaults::CRITERION
            .parse()
            .unwrap_or(Self::new(Objective::CrossEntropy, Shaping::Slice))
    }
}

impl FromStr for Criterion {
    type Err = SeqfeedError;

    fn from_str(tag: &str) -> Result<Self> {
        let mut objective: Option<Objective> = None;
        let (mut whole, mut cnn, mut tdnn) = (false, false, false);

        let tokens = tag
            .split(|c: char| c == ',' || c == '+' || c == '-' || c == '_' || c.is_whitespace())
            .filter(|t| !t.is_empty());

        for token in tokens {
            let parsed = match token.to_ascii_lowercase().as_str() {
                "ce" => Some(Objective::CrossEntropy),
                "ctc" => Some(Objective::Ctc),
                "mmi" => Some(Objective::Mmi),
                "whole" => {
                    whole = true;
                    None
                }
                "cnn" => {
                    cnn = true;
                    None
                }
                "tdnn" => {
                    tdnn = true;
                    None
                }
                other => {
                    return Err(Self::invalid(tag, format!("unknown token '{}'", other)));
                }
            };
            if let Some(found) = parsed {
                if let Some(previous) = objective
                    && previous != found
                {
                    return Err(Self::invalid(
                        tag,
                        format!(
                            "conflicting objectives '{}' and '{}'",
                            previous.token(),
                            found.token()
                        ),
                    ));
                }
                objective = Some(found);
            }
        }

        let objective =
            objective.ok_or_else(|| Self::invalid(tag, "no objective (ce, ctc or mmi)"))?;

        if cnn && tdnn {
            return Err(Self::invalid(tag, "'cnn' and 'tdnn' are mutually exclusive"));
        }

        // CTC labels are not frame-synchronous, so they can never be sliced.
        let whole_batch = whole || objective == Objective::Ctc;
        let shaping = if cnn {
            if whole_batch {
                Shaping::ConvWhole
            } else {
                Shaping::ConvSlice
            }
        } else if tdnn {
            Shaping::Tdnn
        } else if whole_batch {
            Shaping::Whole
        } else {
            Shaping::Slice
        };

        Ok(Self { objective, shaping })
    }
}

impl TryFrom<String> for Criterion {
    type Error = SeqfeedError;

    fn try_from(tag: String) -> Result<Self> {
        tag.parse()
    }
}

impl From<Criterion> for String {
    fn from(criterion: Criterion) -> Self {
        criterion.to_string()
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in self.shaping.tokens() {
            write!(f, "{},", token)?;
        }
        write!(f, "{}", self.objective.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tag: &str) -> Criterion {
        tag.parse().unwrap()
    }

    #[test]
    fn test_plain_ce_is_sliced() {
        let c = parse("ce");
        assert_eq!(c.objective(), Objective::CrossEntropy);
        assert_eq!(c.shaping(), Shaping::Slice);
        assert_eq!(c.label_encoding(), LabelEncoding::Dense);
        assert!(c.decimates_labels());
    }

    #[test]
    fn test_default_follows_default_tag() {
        assert_eq!(Criterion::default(), parse(defaults::CRITERION));
        assert_eq!(Criterion::default().shaping(), Shaping::Slice);
    }

    #[test]
    fn test_whole_mmi() {
        let c = parse("whole,mmi");
        assert_eq!(c.objective(), Objective::Mmi);
        assert_eq!(c.shaping(), Shaping::Whole);
    }

    #[test]
    fn test_ctc_forces_whole_and_sparse() {
        let c = parse("ctc");
        assert_eq!(c.shaping(), Shaping::Whole);
        assert_eq!(c.label_encoding(), LabelEncoding::Sparse);
        assert!(!c.decimates_labels());
    }

    #[test]
    fn test_cnn_variants() {
        assert_eq!(parse("cnn,ce").shaping(), Shaping::ConvSlice);
        assert_eq!(parse("cnn,whole,ce").shaping(), Shaping::ConvWhole);
        assert_eq!(parse("cnn+ctc").shaping(), Shaping::ConvWhole);
    }

    #[test]
    fn test_tdnn() {
        let c = parse("tdnn ce");
        assert_eq!(c.shaping(), Shaping::Tdnn);
        assert!(!c.shaping().is_conv());
    }

    #[test]
    fn test_tokens_are_case_insensitive() {
        assert_eq!(parse("WHOLE,CE"), parse("whole,ce"));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let err = "whole,xent".parse::<Criterion>().unwrap_err();
        assert!(err.to_string().contains("unknown token 'xent'"));
    }

    #[test]
    fn test_missing_objective_rejected() {
        assert!("whole".parse::<Criterion>().is_err());
        assert!("".parse::<Criterion>().is_err());
    }

    #[test]
    fn test_conflicting_objectives_rejected() {
        let err = "ce,ctc".parse::<Criterion>().unwrap_err();
        assert!(err.to_string().contains("conflicting objectives"));
    }

    #[test]
    fn test_repeated_objective_accepted() {
        assert_eq!(parse("ce,ce").objective(), Objective::CrossEntropy);
    }

    #[test]
    fn test_cnn_and_tdnn_exclusive() {
        assert!("cnn,tdnn,ce".parse::<Criterion>().is_err());
    }

    #[test]
    fn test_display_reparses_to_same_value() {
        for tag in ["ce", "whole,ce", "ctc", "cnn,ce", "cnn,whole,mmi", "tdnn,ce"] {
            let c = parse(tag);
            assert_eq!(parse(&c.to_string()), c, "tag {}", tag);
        }
    }

    #[test]
    fn test_serde_round_trip_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            criterion: Criterion,
        }
        let w: Wrapper = toml::from_str("criterion = \"whole,mmi\"").unwrap();
        assert_eq!(w.criterion.shaping(), Shaping::Whole);
        assert!(toml::from_str::<Wrapper>("criterion = \"bogus\"").is_err());
    }
}
