use std::cmp::Ordering;

use crate::dao::models::{AnswerValue, QuestionEntity, QuestionKind};

/// Check that `payload` has the shape the question type expects.
pub fn validate_payload(question: &QuestionEntity, payload: &AnswerValue) -> Result<(), String> {
    match (question.kind, payload) {
        (QuestionKind::Mcq, AnswerValue::Choice(index)) => {
            if (*index as usize) < question.choices.len() {
                Ok(())
            } else {
                Err(format!(
                    "choice {index} out of range for {} choices",
                    question.choices.len()
                ))
            }
        }
        (QuestionKind::Mtf, AnswerValue::Statements(values)) => {
            if values.len() == question.statements.len() {
                Ok(())
            } else {
                Err(format!(
                    "expected {} statements, got {}",
                    question.statements.len(),
                    values.len()
                ))
            }
        }
        (QuestionKind::Saq | QuestionKind::Spot, AnswerValue::Text(text)) => {
            if text.trim().is_empty() {
                Err("answer text must not be empty".into())
            } else {
                Ok(())
            }
        }
        (kind, _) => Err(format!("payload shape does not match a {kind:?} question")),
    }
}

/// Grade an answer against the stored key; `None` for manually graded types.
pub fn auto_grade(question: &QuestionEntity, payload: &AnswerValue) -> Option<bool> {
    if !question.kind.is_auto_gradable() {
        return None;
    }
    Some(&question.key == payload)
}

/// Points for a graded answer.
pub fn points_for(question: &QuestionEntity, is_correct: bool) -> i64 {
    if is_correct {
        question.difficulty.points()
    } else {
        0
    }
}

/// Numeric-aware ordering: digit runs compare by value, so "R2" < "R10".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_digits = take_digits(&mut left);
                let r_digits = take_digits(&mut right);
                let l_trimmed = l_digits.trim_start_matches('0');
                let r_trimmed = r_digits.trim_start_matches('0');
                let ordering = l_trimmed
                    .len()
                    .cmp(&r_trimmed.len())
                    .then_with(|| l_trimmed.cmp(r_trimmed));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                let ordering = l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Difficulty;

    fn question(kind: QuestionKind, key: AnswerValue) -> QuestionEntity {
        QuestionEntity {
            id: "q1".into(),
            round_id: "R1".into(),
            order: 1,
            kind,
            prompt: "?".into(),
            choices: vec!["a".into(), "b".into(), "c".into()],
            statements: vec!["s1".into(), "s2".into()],
            key,
            difficulty: Difficulty::Difficult,
        }
    }

    #[test]
    fn natural_order_compares_numbers_by_value() {
        let mut ids = vec!["R10", "R2", "r1", "R02b", "Final"];
        ids.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(ids, ["Final", "r1", "R2", "R02b", "R10"]);
        assert_eq!(natural_cmp("R2", "R10"), Ordering::Less);
        assert_eq!(natural_cmp("R2", "R2"), Ordering::Equal);
    }

    #[test]
    fn mcq_grading_uses_choice_index() {
        let q = question(QuestionKind::Mcq, AnswerValue::Choice(1));
        assert_eq!(auto_grade(&q, &AnswerValue::Choice(1)), Some(true));
        assert_eq!(auto_grade(&q, &AnswerValue::Choice(2)), Some(false));
        assert_eq!(points_for(&q, true), 3);
        assert_eq!(points_for(&q, false), 0);
    }

    #[test]
    fn mtf_requires_every_statement() {
        let q = question(QuestionKind::Mtf, AnswerValue::Statements(vec![true, false]));
        assert_eq!(
            auto_grade(&q, &AnswerValue::Statements(vec![true, false])),
            Some(true)
        );
        assert_eq!(
            auto_grade(&q, &AnswerValue::Statements(vec![true, true])),
            Some(false)
        );
        assert!(validate_payload(&q, &AnswerValue::Statements(vec![true])).is_err());
    }

    #[test]
    fn manual_types_are_not_auto_graded() {
        let q = question(QuestionKind::Saq, AnswerValue::Text("Paris".into()));
        assert_eq!(auto_grade(&q, &AnswerValue::Text("Paris".into())), None);
        assert!(validate_payload(&q, &AnswerValue::Text("  ".into())).is_err());
        assert!(validate_payload(&q, &AnswerValue::Choice(0)).is_err());
    }

    #[test]
    fn mcq_rejects_out_of_range_choice() {
        let q = question(QuestionKind::Mcq, AnswerValue::Choice(0));
        assert!(validate_payload(&q, &AnswerValue::Choice(2)).is_ok());
        assert!(validate_payload(&q, &AnswerValue::Choice(3)).is_err());
    }
}
