//! Answer-key normalization.
//!
//! Question records come from the question store in several historical
//! shapes: a single correct id, an array of ids, a comma-joined string,
//! options as a map or as a positional list. Shape migration happens here,
//! once; the rest of the engine only sees [`AnswerKey`].

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::model::{
    canonical_option_id, AnswerKey, BlankAnswer, ChoiceOption, KeyAnswer, QuestionFormat,
    QuestionNumber,
};

/// Points used when a record does not say how much a question is worth.
pub const DEFAULT_POINTS: f64 = 1.0;

/// A question record as stored, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawQuestion {
    #[serde(alias = "question_number")]
    pub number: QuestionNumber,
    /// Declared format; inferred from the answer fields when absent.
    #[serde(
        default,
        rename = "type",
        alias = "format",
        alias = "question_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RawOptions>,
    /// Legacy single-answer field. May hold a comma-joined list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// Multi-answer field. Wins over `correct_answer` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<RawIdList>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub option_weights: BTreeMap<String, f64>,
    #[serde(
        default,
        alias = "points_per_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub points: Option<f64>,
    #[serde(
        default,
        alias = "expected_blank_answers",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub blank_answers: Vec<RawBlank>,
}

/// Options as a label→text map or as a list. Both keep the printed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOptions {
    Map(IndexMap<String, String>),
    List(Vec<RawOption>),
}

/// A listed option: bare text (labelled by position) or an explicit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOption {
    Text(String),
    Entry {
        id: String,
        #[serde(default)]
        text: String,
    },
}

/// Correct ids as an array or a comma-joined string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawIdList {
    List(Vec<String>),
    Joined(String),
}

/// One blank: a single accepted string or several alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawBlank {
    One(String),
    Alternatives(Vec<String>),
}

impl RawIdList {
    fn ids(&self) -> Vec<String> {
        match self {
            RawIdList::List(items) => items.iter().flat_map(|s| split_joined(s)).collect(),
            RawIdList::Joined(s) => split_joined(s),
        }
    }
}

fn split_joined(s: &str) -> Vec<String> {
    s.split(',')
        .map(canonical_option_id)
        .filter(|id| !id.is_empty())
        .collect()
}

/// Positional label for the n-th listed option: A, B, ..., Z, AA, AB, ...
fn positional_label(mut index: usize) -> String {
    let mut label = Vec::new();
    loop {
        label.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    label.reverse();
    String::from_utf8_lossy(&label).into_owned()
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn normalize_options(
    number: QuestionNumber,
    raw: Option<&RawOptions>,
) -> Result<Vec<ChoiceOption>, EvaluationError> {
    let options: Vec<ChoiceOption> = match raw {
        None => Vec::new(),
        Some(RawOptions::Map(map)) => map
            .iter()
            .map(|(id, text)| ChoiceOption {
                id: canonical_option_id(id),
                text: text.clone(),
            })
            .collect(),
        Some(RawOptions::List(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                RawOption::Text(text) => ChoiceOption {
                    id: positional_label(i),
                    text: text.clone(),
                },
                RawOption::Entry { id, text } => ChoiceOption {
                    id: canonical_option_id(id),
                    text: text.clone(),
                },
            })
            .collect(),
    };

    let mut seen = HashSet::new();
    for option in &options {
        if option.id.is_empty() {
            return Err(EvaluationError::invalid_key(number, "option with an empty id"));
        }
        if !seen.insert(option.id.as_str()) {
            return Err(EvaluationError::invalid_key(
                number,
                format!("option {} is listed twice", option.id),
            ));
        }
    }
    Ok(options)
}

fn normalize_blanks(
    number: QuestionNumber,
    raw: &[RawBlank],
) -> Result<Vec<BlankAnswer>, EvaluationError> {
    raw.iter()
        .enumerate()
        .map(|(i, blank)| {
            let accepted: Vec<String> = match blank {
                RawBlank::One(s) => vec![s.trim().to_string()],
                RawBlank::Alternatives(alts) => alts.iter().map(|s| s.trim().to_string()).collect(),
            }
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
            if accepted.is_empty() {
                return Err(EvaluationError::invalid_key(
                    number,
                    format!("blank {} has no accepted answer", i + 1),
                ));
            }
            Ok(BlankAnswer { accepted })
        })
        .collect()
}

/// Normalize one question record into a canonical [`AnswerKey`].
pub fn normalize_question(raw: &RawQuestion) -> Result<AnswerKey, EvaluationError> {
    let number = raw.number;
    if number == 0 {
        return Err(EvaluationError::invalid_key(0, "question number must be positive"));
    }

    let points = raw.points.unwrap_or(DEFAULT_POINTS);

    // The multi-answer field strictly generalizes the single one.
    let correct = match &raw.correct_answers {
        Some(list) if !list.ids().is_empty() => list.ids(),
        _ => raw
            .correct_answer
            .as_deref()
            .map(split_joined)
            .unwrap_or_default(),
    };
    let correct = dedup_preserving_order(correct);
    let blanks = normalize_blanks(number, &raw.blank_answers)?;

    let format = match raw.format.as_deref() {
        Some(declared) => declared
            .parse::<QuestionFormat>()
            .map_err(|e| EvaluationError::invalid_key(number, e))?,
        None if !blanks.is_empty() => QuestionFormat::FillInBlank,
        None if correct.len() > 1 => QuestionFormat::MultiChoice,
        None => QuestionFormat::SingleChoice,
    };

    let answer = match format {
        QuestionFormat::SingleChoice => {
            let options = normalize_options(number, raw.options.as_ref())?;
            if correct.len() > 1 {
                tracing::debug!(
                    question = number,
                    "single_choice key lists {} correct ids; {} is authoritative",
                    correct.len(),
                    correct[0]
                );
            }
            KeyAnswer::SingleChoice {
                options,
                correct_option_ids: correct,
            }
        }
        QuestionFormat::MultiChoice => {
            let options = normalize_options(number, raw.options.as_ref())?;
            let mut provided = BTreeMap::new();
            for (id, &weight) in &raw.option_weights {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(EvaluationError::invalid_key(
                        number,
                        format!("weight for option {id} must be a non-negative number"),
                    ));
                }
                provided.insert(canonical_option_id(id), weight);
            }
            // Correct options without an explicit weight count as 1, never 0.
            let option_weights = correct
                .iter()
                .map(|id| (id.clone(), provided.get(id).copied().unwrap_or(1.0)))
                .collect();
            KeyAnswer::MultiChoice {
                options,
                correct_option_ids: correct,
                option_weights,
            }
        }
        QuestionFormat::FillInBlank => KeyAnswer::FillInBlank { blanks },
    };

    let key = AnswerKey {
        question_number: number,
        points,
        answer,
    };
    validate_key(&key)?;
    Ok(key)
}

/// Check the invariants every [`AnswerKey`] must hold.
///
/// Keys built by [`normalize_question`] always pass; keys built by hand are
/// checked again before they are scored.
pub fn validate_key(key: &AnswerKey) -> Result<(), EvaluationError> {
    let number = key.question_number;
    if number == 0 {
        return Err(EvaluationError::invalid_key(0, "question number must be positive"));
    }
    if !key.points.is_finite() || key.points <= 0.0 {
        return Err(EvaluationError::invalid_key(
            number,
            format!("points must be positive, got {}", key.points),
        ));
    }

    match &key.answer {
        KeyAnswer::SingleChoice {
            options,
            correct_option_ids,
        }
        | KeyAnswer::MultiChoice {
            options,
            correct_option_ids,
            ..
        } => {
            if correct_option_ids.is_empty() {
                return Err(EvaluationError::invalid_key(number, "no correct option"));
            }
            if !options.is_empty() {
                if let Some(missing) = correct_option_ids
                    .iter()
                    .find(|id| !options.iter().any(|o| &o.id == *id))
                {
                    return Err(EvaluationError::invalid_key(
                        number,
                        format!("correct option {missing} is not one of the printed options"),
                    ));
                }
            }
        }
        KeyAnswer::FillInBlank { blanks } => {
            if blanks.is_empty() {
                return Err(EvaluationError::invalid_key(number, "no expected blank answer"));
            }
            if blanks.iter().any(|b| b.accepted.is_empty()) {
                return Err(EvaluationError::invalid_key(
                    number,
                    "a blank has no accepted answer",
                ));
            }
        }
    }

    if let KeyAnswer::MultiChoice {
        correct_option_ids,
        option_weights,
        ..
    } = &key.answer
    {
        let mut total = 0.0;
        for id in correct_option_ids {
            let weight = option_weights.get(id).copied().unwrap_or(1.0);
            if !weight.is_finite() || weight < 0.0 {
                return Err(EvaluationError::invalid_key(
                    number,
                    format!("weight for option {id} must be a non-negative number"),
                ));
            }
            total += weight;
        }
        if total <= 0.0 {
            return Err(EvaluationError::invalid_key(
                number,
                "correct option weights sum to zero",
            ));
        }
    }

    Ok(())
}

/// Normalize a whole paper. Keys come back sorted by question number.
pub fn normalize_paper(raw: &[RawQuestion]) -> Result<Vec<AnswerKey>, EvaluationError> {
    check_unique_numbers(raw.iter().map(|q| q.number))?;
    let mut keys = raw
        .iter()
        .map(normalize_question)
        .collect::<Result<Vec<_>, _>>()?;
    keys.sort_by_key(|k| k.question_number);
    Ok(keys)
}

pub(crate) fn check_unique_numbers(
    numbers: impl IntoIterator<Item = QuestionNumber>,
) -> Result<(), EvaluationError> {
    let mut seen = HashSet::new();
    for n in numbers {
        if !seen.insert(n) {
            return Err(EvaluationError::DuplicateQuestion(n));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(number: QuestionNumber) -> RawQuestion {
        RawQuestion {
            number,
            points: Some(2.0),
            ..Default::default()
        }
    }

    #[test]
    fn single_answer_field() {
        let q = RawQuestion {
            correct_answer: Some("b".into()),
            ..raw(1)
        };
        let key = normalize_question(&q).unwrap();
        assert_eq!(key.format(), QuestionFormat::SingleChoice);
        match key.answer {
            KeyAnswer::SingleChoice {
                correct_option_ids, ..
            } => assert_eq!(correct_option_ids, vec!["B"]),
            other => panic!("unexpected answer: {other:?}"),
        }
    }

    #[test]
    fn multi_field_wins_over_single() {
        let q = RawQuestion {
            correct_answer: Some("D".into()),
            correct_answers: Some(RawIdList::List(vec!["A".into(), "C".into()])),
            ..raw(1)
        };
        let key = normalize_question(&q).unwrap();
        assert_eq!(key.format(), QuestionFormat::MultiChoice);
        match key.answer {
            KeyAnswer::MultiChoice {
                correct_option_ids,
                option_weights,
                ..
            } => {
                assert_eq!(correct_option_ids, vec!["A", "C"]);
                assert_eq!(option_weights.get("A"), Some(&1.0));
                assert_eq!(option_weights.get("C"), Some(&1.0));
            }
            other => panic!("unexpected answer: {other:?}"),
        }
    }

    #[test]
    fn comma_joined_legacy_string() {
        let q = RawQuestion {
            correct_answer: Some("a, c".into()),
            ..raw(3)
        };
        let key = normalize_question(&q).unwrap();
        assert_eq!(key.format(), QuestionFormat::MultiChoice);

        let q = RawQuestion {
            correct_answers: Some(RawIdList::Joined("B,D".into())),
            format: Some("multiple".into()),
            ..raw(4)
        };
        match normalize_question(&q).unwrap().answer {
            KeyAnswer::MultiChoice {
                correct_option_ids, ..
            } => assert_eq!(correct_option_ids, vec!["B", "D"]),
            other => panic!("unexpected answer: {other:?}"),
        }
    }

    #[test]
    fn partial_weights_default_to_one() {
        let mut weights = BTreeMap::new();
        weights.insert("a".to_string(), 3.0);
        let q = RawQuestion {
            correct_answers: Some(RawIdList::List(vec!["A".into(), "B".into()])),
            option_weights: weights,
            ..raw(5)
        };
        match normalize_question(&q).unwrap().answer {
            KeyAnswer::MultiChoice { option_weights, .. } => {
                assert_eq!(option_weights.get("A"), Some(&3.0));
                assert_eq!(option_weights.get("B"), Some(&1.0));
            }
            other => panic!("unexpected answer: {other:?}"),
        }
    }

    #[test]
    fn positional_option_labels() {
        let q = RawQuestion {
            options: Some(RawOptions::List(vec![
                RawOption::Text("red".into()),
                RawOption::Text("green".into()),
                RawOption::Text("blue".into()),
            ])),
            correct_answer: Some("C".into()),
            ..raw(6)
        };
        let key = normalize_question(&q).unwrap();
        let ids: Vec<&str> = key.answer.options().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(positional_label(25), "Z");
        assert_eq!(positional_label(26), "AA");
        assert_eq!(positional_label(27), "AB");
    }

    #[test]
    fn fill_in_blank_inferred() {
        let q = RawQuestion {
            blank_answers: vec![
                RawBlank::One(" Paris ".into()),
                RawBlank::Alternatives(vec!["1789".into(), "seventeen eighty-nine".into()]),
            ],
            ..raw(7)
        };
        let key = normalize_question(&q).unwrap();
        assert_eq!(key.format(), QuestionFormat::FillInBlank);
        assert_eq!(key.blank_count(), 2);
        match key.answer {
            KeyAnswer::FillInBlank { blanks } => assert_eq!(blanks[0].accepted, vec!["Paris"]),
            other => panic!("unexpected answer: {other:?}"),
        }
    }

    #[test]
    fn blanks_win_over_stray_correct_answer() {
        let q: RawQuestion = toml::from_str(
            r#"
number = 1
blank_answers = ["paris"]
correct_answer = "A"
"#,
        )
        .unwrap();
        let key = normalize_question(&q).unwrap();
        assert_eq!(key.format(), QuestionFormat::FillInBlank);
        assert_eq!(key.blank_count(), 1);
    }

    #[test]
    fn option_map_keeps_printed_order() {
        let q: RawQuestion = serde_json::from_str(
            r#"{"number": 1, "options": {"D": "d", "B": "b", "10": "x", "2": "y"}, "correct_answer": "B"}"#,
        )
        .unwrap();
        let key = normalize_question(&q).unwrap();
        let ids: Vec<&str> = key.answer.options().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["D", "B", "10", "2"]);

        let json = serde_json::to_string(&q).unwrap();
        let back: RawQuestion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);

        let q: RawQuestion = toml::from_str(
            r#"
number = 2
options = { D = "d", B = "b", C = "c" }
correct_answer = "C"
"#,
        )
        .unwrap();
        let key = normalize_question(&q).unwrap();
        let ids: Vec<&str> = key.answer.options().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["D", "B", "C"]);
    }

    #[test]
    fn rejects_missing_correct_answer() {
        let err = normalize_question(&raw(8)).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::InvalidAnswerKey {
                question_number: 8,
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_positive_points() {
        for points in [0.0, -1.0, f64::NAN] {
            let q = RawQuestion {
                correct_answer: Some("A".into()),
                points: Some(points),
                ..raw(9)
            };
            assert!(normalize_question(&q).is_err(), "points {points} accepted");
        }
    }

    #[test]
    fn missing_points_default() {
        let q = RawQuestion {
            number: 10,
            correct_answer: Some("A".into()),
            ..Default::default()
        };
        assert_eq!(normalize_question(&q).unwrap().points, DEFAULT_POINTS);
    }

    #[test]
    fn rejects_unknown_correct_option() {
        let mut map = IndexMap::new();
        map.insert("A".to_string(), "yes".to_string());
        map.insert("B".to_string(), "no".to_string());
        let q = RawQuestion {
            options: Some(RawOptions::Map(map)),
            correct_answer: Some("E".into()),
            ..raw(11)
        };
        let err = normalize_question(&q).unwrap_err();
        assert!(err.to_string().contains("not one of the printed options"));
    }

    #[test]
    fn rejects_zero_weight_sum_and_negative_weights() {
        let mut weights = BTreeMap::new();
        weights.insert("A".to_string(), 0.0);
        let q = RawQuestion {
            correct_answers: Some(RawIdList::List(vec!["A".into()])),
            format: Some("multi_choice".into()),
            option_weights: weights,
            ..raw(12)
        };
        assert!(normalize_question(&q).is_err());

        let mut weights = BTreeMap::new();
        weights.insert("B".to_string(), -1.0);
        let q = RawQuestion {
            correct_answers: Some(RawIdList::List(vec!["A".into(), "B".into()])),
            option_weights: weights,
            ..raw(13)
        };
        assert!(normalize_question(&q).is_err());
    }

    #[test]
    fn rejects_empty_blank() {
        let q = RawQuestion {
            blank_answers: vec![RawBlank::One("  ".into())],
            ..raw(14)
        };
        assert!(normalize_question(&q).is_err());
    }

    #[test]
    fn paper_sorted_and_unique() {
        let qs = vec![
            RawQuestion {
                correct_answer: Some("A".into()),
                ..raw(2)
            },
            RawQuestion {
                correct_answer: Some("B".into()),
                ..raw(1)
            },
        ];
        let keys = normalize_paper(&qs).unwrap();
        assert_eq!(keys[0].question_number, 1);
        assert_eq!(keys[1].question_number, 2);

        let dupes = vec![qs[0].clone(), qs[0].clone()];
        assert_eq!(
            normalize_paper(&dupes).unwrap_err(),
            EvaluationError::DuplicateQuestion(2)
        );
    }

    #[test]
    fn raw_question_from_toml_shapes() {
        let q: RawQuestion = toml::from_str(
            r#"
number = 1
type = "multi_choice"
options = ["one", "two", "three"]
correct_answers = "A,C"
points = 2
"#,
        )
        .unwrap();
        let key = normalize_question(&q).unwrap();
        assert_eq!(key.points, 2.0);
        assert_eq!(key.format(), QuestionFormat::MultiChoice);

        let q: RawQuestion = toml::from_str(
            r#"
question_number = 2
options = [{ id = "x", text = "ex" }, { id = "y", text = "why" }]
correct_answer = "Y"
points_per_blank = 1.5
"#,
        )
        .unwrap();
        let key = normalize_question(&q).unwrap();
        assert_eq!(key.points, 1.5);
        assert_eq!(key.answer.options()[1].id, "Y");
    }
}
