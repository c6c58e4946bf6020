//! A scored criterion over a set of reference units.

use serde::Serialize;
use uuid::Uuid;

use crate::core::error::{InvalidScoreCap, ScoreOutOfRange};
use crate::core::unit::{EvaluationUnit, UnitMap};

/// One criterion, the units that ground it, and the score it obtained.
///
/// `0 <= obtained_score <= score_cap` holds after every mutation. Setters
/// that would break it fail and leave the evaluation untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    id: String,
    units: UnitMap,
    criterion: String,
    obtained_score: f64,
    score_cap: f64,
    rationale: String,
}

impl Evaluation {
    pub fn new(units: UnitMap, score_cap: f64) -> Result<Self, InvalidScoreCap> {
        check_cap(score_cap)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            units,
            criterion: String::new(),
            obtained_score: 0.0,
            score_cap,
            rationale: String::new(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.criterion = criterion.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn criterion(&self) -> &str {
        &self.criterion
    }

    pub fn obtained_score(&self) -> f64 {
        self.obtained_score
    }

    pub fn score_cap(&self) -> f64 {
        self.score_cap
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn set_score(&mut self, score: f64) -> Result<(), ScoreOutOfRange> {
        self.check_score(score)?;
        self.obtained_score = score;
        Ok(())
    }

    /// Replace the cap. A cap below the current score is rejected.
    pub fn set_score_cap(&mut self, cap: f64) -> Result<(), InvalidScoreCap> {
        check_cap(cap)?;
        if self.obtained_score > cap {
            return Err(InvalidScoreCap::BelowObtained {
                cap,
                score: self.obtained_score,
            });
        }
        self.score_cap = cap;
        Ok(())
    }

    /// Write a scoring pass result. Score and rationale change together or not at all.
    pub fn record(
        &mut self,
        score: f64,
        rationale: impl Into<String>,
    ) -> Result<(), ScoreOutOfRange> {
        self.check_score(score)?;
        self.obtained_score = score;
        self.rationale = rationale.into();
        Ok(())
    }

    /// Same criterion, units and cap, with no score yet.
    pub fn reset(&self) -> Self {
        Self {
            obtained_score: 0.0,
            rationale: String::new(),
            ..self.clone()
        }
    }

    pub fn units(&self) -> impl Iterator<Item = &EvaluationUnit> {
        self.units.values()
    }

    pub fn unit(&self, id: &str) -> Option<&EvaluationUnit> {
        self.units.get(id)
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Insert a unit. Returns `false` when a unit with the same id was already present.
    pub fn add_unit(&mut self, unit: EvaluationUnit) -> bool {
        if self.units.contains_key(unit.id()) {
            return false;
        }
        self.units.insert(unit.id().to_string(), unit);
        true
    }

    pub fn extend_units(&mut self, units: impl IntoIterator<Item = EvaluationUnit>) {
        for unit in units {
            self.add_unit(unit);
        }
    }

    pub fn replace_units(&mut self, units: UnitMap) {
        self.units = units;
    }

    /// Remove a unit by id. Missing ids are ignored.
    pub fn remove_unit(&mut self, id: &str) -> Option<EvaluationUnit> {
        self.units.remove(id)
    }

    pub fn remove_units<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.units.remove(id);
        }
    }

    pub fn clear_units(&mut self) {
        self.units.clear();
    }

    fn check_score(&self, score: f64) -> Result<(), ScoreOutOfRange> {
        if (0.0..=self.score_cap).contains(&score) {
            return Ok(());
        }
        Err(ScoreOutOfRange {
            score,
            cap: self.score_cap,
        })
    }
}

fn check_cap(cap: f64) -> Result<(), InvalidScoreCap> {
    if cap.is_finite() && cap >= 0.0 {
        return Ok(());
    }
    Err(InvalidScoreCap::NotNonNegative { cap })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::unit::units_from_pairs;

    fn capped(cap: f64) -> Evaluation {
        let units = units_from_pairs(&["1+1=?", "2"]).expect("units");
        Evaluation::new(units, cap)
            .expect("evaluation")
            .with_criterion("matches the dataset")
    }

    #[test]
    fn in_range_scores_read_back() {
        let mut evaluation = capped(50.0);
        for score in [0.0, 12.5, 30.0, 50.0] {
            evaluation.set_score(score).expect("in range");
            assert_eq!(evaluation.obtained_score(), score);
        }
    }

    #[test]
    fn out_of_range_scores_leave_prior_value() {
        let mut evaluation = capped(50.0);
        evaluation.set_score(30.0).expect("in range");
        for score in [60.0, -0.5, f64::NAN, f64::INFINITY] {
            let err = evaluation.set_score(score).unwrap_err();
            assert_eq!(err.cap, 50.0);
            assert_eq!(evaluation.obtained_score(), 30.0);
        }
    }

    #[test]
    fn cap_below_obtained_score_is_rejected() {
        let mut evaluation = capped(50.0);
        evaluation.set_score(30.0).expect("in range");
        let err = evaluation.set_score_cap(20.0).unwrap_err();
        assert_eq!(
            err,
            InvalidScoreCap::BelowObtained {
                cap: 20.0,
                score: 30.0
            }
        );
        assert_eq!(evaluation.score_cap(), 50.0);

        evaluation.set_score_cap(30.0).expect("cap equal to score");
        assert_eq!(evaluation.score_cap(), 30.0);
    }

    #[test]
    fn negative_cap_is_rejected_at_construction() {
        let err = Evaluation::new(UnitMap::new(), -1.0).unwrap_err();
        assert_eq!(err, InvalidScoreCap::NotNonNegative { cap: -1.0 });
    }

    #[test]
    fn record_is_all_or_nothing() {
        let mut evaluation = capped(10.0);
        evaluation.record(7.0, "close enough").expect("record");
        let err = evaluation.record(11.0, "too generous").unwrap_err();
        assert_eq!(err.score, 11.0);
        assert_eq!(evaluation.obtained_score(), 7.0);
        assert_eq!(evaluation.rationale(), "close enough");
    }

    #[test]
    fn unit_set_semantics() {
        let mut evaluation = capped(10.0);
        let unit = EvaluationUnit::with_id("u1", "who are you?", "a person");
        assert!(evaluation.add_unit(unit.clone()));
        assert!(!evaluation.add_unit(unit));
        assert_eq!(evaluation.unit_count(), 2);

        assert!(evaluation.remove_unit("missing").is_none());
        assert!(evaluation.remove_unit("u1").is_some());
        assert_eq!(evaluation.unit_count(), 1);

        evaluation.clear_units();
        assert_eq!(evaluation.unit_count(), 0);
    }

    #[test]
    fn invalid_cap_leaves_live_evaluation_unchanged() {
        let mut evaluation = capped(50.0);
        evaluation.set_score(30.0).expect("in range");
        for cap in [f64::NAN, -1.0, f64::INFINITY] {
            assert!(matches!(
                evaluation.set_score_cap(cap),
                Err(InvalidScoreCap::NotNonNegative { .. })
            ));
            assert_eq!(evaluation.score_cap(), 50.0);
            assert_eq!(evaluation.obtained_score(), 30.0);
        }
    }

    #[test]
    fn extend_units_skips_known_ids() {
        let mut evaluation = capped(10.0);
        let first = evaluation.units().next().expect("unit").clone();
        let replacement = EvaluationUnit::with_id(first.id(), "other", "other");
        evaluation.extend_units([
            replacement,
            EvaluationUnit::with_id("u2", "2+2=?", "4"),
            EvaluationUnit::with_id("u3", "3+3=?", "6"),
        ]);
        assert_eq!(evaluation.unit_count(), 3);
        assert_eq!(evaluation.unit(first.id()), Some(&first));
    }

    #[test]
    fn replace_units_swaps_the_whole_set() {
        let mut evaluation = capped(10.0);
        let units = units_from_pairs(&["a", "1", "b", "2"]).expect("units");
        let ids: Vec<String> = units.keys().cloned().collect();
        evaluation.replace_units(units);
        let now: Vec<&str> = evaluation.units().map(EvaluationUnit::id).collect();
        assert_eq!(now, ids);
    }

    #[test]
    fn remove_units_ignores_missing_ids() {
        let mut evaluation = capped(10.0);
        evaluation.extend_units([
            EvaluationUnit::with_id("u2", "2+2=?", "4"),
            EvaluationUnit::with_id("u3", "3+3=?", "6"),
        ]);
        evaluation.remove_units(["u2", "missing", "u3"]);
        assert_eq!(evaluation.unit_count(), 1);
        assert!(evaluation.unit("u2").is_none());
    }

    #[test]
    fn reset_keeps_definition_and_drops_score() {
        let mut evaluation = capped(10.0).with_id("accuracy");
        evaluation.record(9.0, "good").expect("record");
        let fresh = evaluation.reset();
        assert_eq!(fresh.id(), "accuracy");
        assert_eq!(fresh.criterion(), "matches the dataset");
        assert_eq!(fresh.score_cap(), 10.0);
        assert_eq!(fresh.unit_count(), 1);
        assert_eq!(fresh.obtained_score(), 0.0);
        assert!(fresh.rationale().is_empty());
    }
}
