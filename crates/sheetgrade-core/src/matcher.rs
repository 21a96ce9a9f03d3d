//! Aligns detected responses with answer keys by question number.

use std::collections::{BTreeSet, HashMap};

use crate::model::{
    canonical_option_id, AnswerKey, Confidence, DetectedResponse, Diagnostics, FormatMismatch,
    QuestionNumber,
};

/// A response reduced to the shape its question expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchedResponse {
    /// Canonical option ids. Empty for fill-in-blank questions.
    pub selected: BTreeSet<String>,
    /// Raw blank strings in order. Empty for choice questions.
    pub blanks: Vec<String>,
    /// `None` when the detector reported nothing for the question.
    pub confidence: Option<Confidence>,
}

impl MatchedResponse {
    /// Nothing marked and nothing written.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty() && self.blanks.iter().all(|b| b.trim().is_empty())
    }
}

/// An answer key paired with what the student put down for it.
#[derive(Debug, Clone)]
pub struct MatchedQuestion<'a> {
    pub key: &'a AnswerKey,
    pub response: MatchedResponse,
}

/// Output of [`match_responses`].
#[derive(Debug, Clone)]
pub struct MatchSet<'a> {
    /// One entry per key, in key order.
    pub questions: Vec<MatchedQuestion<'a>>,
    /// Orphans, duplicates, mismatches, unanswered and low-confidence questions.
    pub diagnostics: Diagnostics,
}

/// Pair every answer key with its detected response.
///
/// Missing responses become empty ones; a student may skip a question.
/// Responses for unknown question numbers are reported as orphans. When the
/// detector reports the same question twice the first reading wins.
pub fn match_responses<'a>(keys: &'a [AnswerKey], responses: &[DetectedResponse]) -> MatchSet<'a> {
    let mut diagnostics = Diagnostics::default();

    let known: BTreeSet<QuestionNumber> = keys.iter().map(|k| k.question_number).collect();
    let mut by_number: HashMap<QuestionNumber, &DetectedResponse> = HashMap::new();
    for response in responses {
        if !known.contains(&response.question_number) {
            diagnostics.orphan_responses.push(response.clone());
        } else if by_number.contains_key(&response.question_number) {
            diagnostics.duplicate_responses.push(response.clone());
        } else {
            by_number.insert(response.question_number, response);
        }
    }

    let questions = keys
        .iter()
        .map(|key| {
            let number = key.question_number;
            let response = match by_number.get(&number) {
                Some(detected) => {
                    let (response, mismatched) = shape_response(key, detected);
                    if mismatched {
                        diagnostics.format_mismatches.push(FormatMismatch {
                            question_number: number,
                            expected: key.format(),
                        });
                    }
                    if detected.confidence == Confidence::Low {
                        diagnostics.low_confidence_questions.push(number);
                    }
                    response
                }
                None => MatchedResponse::default(),
            };
            if response.is_empty() {
                diagnostics.unanswered_questions.push(number);
            }
            MatchedQuestion { key, response }
        })
        .collect();

    if !diagnostics.orphan_responses.is_empty() {
        tracing::warn!(
            count = diagnostics.orphan_responses.len(),
            "detected responses with no matching answer key"
        );
    }

    MatchSet {
        questions,
        diagnostics,
    }
}

/// Drop data that does not fit the key's format. Returns whether any was dropped.
fn shape_response(key: &AnswerKey, detected: &DetectedResponse) -> (MatchedResponse, bool) {
    let selected: BTreeSet<String> = detected
        .selected_option_ids
        .iter()
        .map(|id| canonical_option_id(id))
        .filter(|id| !id.is_empty())
        .collect();
    let has_text = detected.blank_answers.iter().any(|b| !b.trim().is_empty());

    if key.is_choice() {
        let response = MatchedResponse {
            selected,
            blanks: Vec::new(),
            confidence: Some(detected.confidence),
        };
        (response, has_text)
    } else {
        let mismatched = !selected.is_empty();
        let response = MatchedResponse {
            selected: BTreeSet::new(),
            blanks: detected.blank_answers.clone(),
            confidence: Some(detected.confidence),
        };
        (response, mismatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlankAnswer, KeyAnswer};

    fn choice_key(n: QuestionNumber) -> AnswerKey {
        AnswerKey {
            question_number: n,
            points: 1.0,
            answer: KeyAnswer::SingleChoice {
                options: vec![],
                correct_option_ids: vec!["A".into()],
            },
        }
    }

    fn blank_key(n: QuestionNumber) -> AnswerKey {
        AnswerKey {
            question_number: n,
            points: 1.0,
            answer: KeyAnswer::FillInBlank {
                blanks: vec![BlankAnswer {
                    accepted: vec!["x".into()],
                }],
            },
        }
    }

    #[test]
    fn missing_responses_are_unanswered() {
        let keys = vec![choice_key(1), choice_key(2)];
        let responses = vec![DetectedResponse::choice(2, ["a"])];
        let set = match_responses(&keys, &responses);
        assert_eq!(set.questions.len(), 2);
        assert!(set.questions[0].response.is_empty());
        assert!(set.questions[0].response.confidence.is_none());
        assert_eq!(
            set.questions[1].response.selected,
            BTreeSet::from(["A".to_string()])
        );
        assert_eq!(set.diagnostics.unanswered_questions, vec![1]);
    }

    #[test]
    fn orphans_and_duplicates_are_reported() {
        let keys = vec![choice_key(1)];
        let responses = vec![
            DetectedResponse::choice(1, ["A"]),
            DetectedResponse::choice(1, ["B"]),
            DetectedResponse::choice(9, ["C"]),
        ];
        let set = match_responses(&keys, &responses);
        assert_eq!(set.diagnostics.orphan_responses.len(), 1);
        assert_eq!(set.diagnostics.orphan_responses[0].question_number, 9);
        assert_eq!(set.diagnostics.duplicate_responses.len(), 1);
        assert!(set.questions[0].response.selected.contains("A"));
    }

    #[test]
    fn blank_text_on_choice_question_is_a_mismatch() {
        let keys = vec![choice_key(1), blank_key(2)];
        let responses = vec![
            DetectedResponse::blanks(1, ["A"]),
            DetectedResponse::choice(2, ["B"]),
        ];
        let set = match_responses(&keys, &responses);
        assert_eq!(set.diagnostics.format_mismatches.len(), 2);
        assert!(set.questions.iter().all(|q| q.response.is_empty()));
        assert_eq!(set.diagnostics.unanswered_questions, vec![1, 2]);
    }

    #[test]
    fn low_confidence_flagged() {
        let keys = vec![choice_key(1)];
        let responses = vec![DetectedResponse::choice(1, ["A"]).with_confidence(Confidence::Low)];
        let set = match_responses(&keys, &responses);
        assert_eq!(set.diagnostics.low_confidence_questions, vec![1]);
        assert_eq!(set.questions[0].response.confidence, Some(Confidence::Low));
    }
}
