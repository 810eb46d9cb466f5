//! User-authored match rules and the rule evaluation engine

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::matching::similarity;
use crate::types::*;

/// Relative weight of each criterion kind in a rule's composite score
const AMOUNT_WEIGHT: f64 = 40.0;
const DATE_WEIGHT: f64 = 20.0;
const DESCRIPTION_WEIGHT: f64 = 30.0;
const REFERENCE_WEIGHT: f64 = 10.0;

/// How a rule compares the transaction amount to a candidate record amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AmountCriterion {
    /// Amounts must be equal to the minor unit
    Exact,
    /// Absolute difference within a fixed minor-unit tolerance
    Range { tolerance: i64 },
    /// Tolerance is the larger of a fixed floor and a percentage of the
    /// larger amount
    Percentage { percent: f64, fixed_tolerance: i64 },
}

impl AmountCriterion {
    /// Closeness in [0, 1] when satisfied, `None` otherwise
    fn closeness(&self, a: i64, b: i64) -> Option<f64> {
        let diff = (a - b).abs();
        match self {
            AmountCriterion::Exact => (diff == 0).then_some(1.0),
            AmountCriterion::Range { tolerance } => {
                if diff <= *tolerance {
                    Some(1.0 - diff as f64 / (*tolerance + 1) as f64)
                } else {
                    None
                }
            }
            AmountCriterion::Percentage {
                percent,
                fixed_tolerance,
            } => {
                let scaled = (percent / 100.0) * a.max(b) as f64;
                let tolerance = scaled.max(*fixed_tolerance as f64);
                if diff as f64 <= tolerance {
                    Some(1.0 - diff as f64 / (tolerance + 1.0))
                } else {
                    None
                }
            }
        }
    }
}

/// How a rule compares the transaction date to a candidate record date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DateCriterion {
    /// Same calendar date
    Exact,
    /// Within a day tolerance either side
    Range { days_tolerance: i64 },
}

impl DateCriterion {
    fn closeness(&self, a: chrono::NaiveDate, b: chrono::NaiveDate) -> Option<f64> {
        let days = (a - b).num_days().abs();
        match self {
            DateCriterion::Exact => (days == 0).then_some(1.0),
            DateCriterion::Range { days_tolerance } => {
                if days <= *days_tolerance {
                    Some(1.0 - days as f64 / (*days_tolerance + 1) as f64)
                } else {
                    None
                }
            }
        }
    }
}

/// Text comparison mode for description criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptionMode {
    Contains,
    StartsWith,
    EndsWith,
    Exact,
    Regex,
    /// Normalized edit-distance similarity between the transaction and the
    /// candidate record descriptions
    Fuzzy,
}

/// How a rule inspects the transaction description
///
/// Pattern modes test the transaction text against the rule's pattern; the
/// fuzzy mode instead compares the transaction description to each candidate
/// record's description and requires the configured minimum similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionCriterion {
    pub mode: DescriptionMode,
    pub pattern: String,
    pub case_sensitive: bool,
    /// Fuzzy-mode minimum similarity; falls back to the configured default
    pub min_similarity: Option<f64>,
}

impl DescriptionCriterion {
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self {
            mode: DescriptionMode::Contains,
            pattern: pattern.into(),
            case_sensitive: false,
            min_similarity: None,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            mode: DescriptionMode::Regex,
            pattern: pattern.into(),
            case_sensitive: true,
            min_similarity: None,
        }
    }

    pub fn fuzzy(min_similarity: f64) -> Self {
        Self {
            mode: DescriptionMode::Fuzzy,
            pattern: String::new(),
            case_sensitive: false,
            min_similarity: Some(min_similarity),
        }
    }

    fn closeness(
        &self,
        transaction_description: &str,
        record_description: &str,
        compiled: Option<&Regex>,
        defaults: &MatchingConfig,
    ) -> Option<f64> {
        let (text, pattern) = if self.case_sensitive {
            (
                transaction_description.to_string(),
                self.pattern.clone(),
            )
        } else {
            (
                transaction_description.to_lowercase(),
                self.pattern.to_lowercase(),
            )
        };

        match self.mode {
            DescriptionMode::Contains => text.contains(&pattern).then_some(1.0),
            DescriptionMode::StartsWith => text.starts_with(&pattern).then_some(1.0),
            DescriptionMode::EndsWith => text.ends_with(&pattern).then_some(1.0),
            DescriptionMode::Exact => (text == pattern).then_some(1.0),
            DescriptionMode::Regex => compiled
                .map(|re| re.is_match(transaction_description))
                .unwrap_or(false)
                .then_some(1.0),
            DescriptionMode::Fuzzy => {
                let min = self
                    .min_similarity
                    .unwrap_or(defaults.fuzzy_min_similarity);
                let score = similarity::similarity(transaction_description, record_description);
                (score >= min).then_some(score)
            }
        }
    }
}

/// Reference equality between the transaction and the candidate record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCriterion {
    pub case_sensitive: bool,
}

impl ReferenceCriterion {
    fn closeness(&self, a: Option<&str>, b: Option<&str>) -> Option<f64> {
        let (a, b) = (a?, b?);
        if a.is_empty() || b.is_empty() {
            return None;
        }
        let equal = if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        };
        equal.then_some(1.0)
    }
}

/// One criterion in a rule's conjunction
///
/// Modeled as a tagged union so every criterion kind is exhaustively handled
/// at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchCriterion {
    Amount(AmountCriterion),
    Date(DateCriterion),
    Description(DescriptionCriterion),
    Reference(ReferenceCriterion),
}

impl MatchCriterion {
    fn weight(&self) -> f64 {
        match self {
            MatchCriterion::Amount(_) => AMOUNT_WEIGHT,
            MatchCriterion::Date(_) => DATE_WEIGHT,
            MatchCriterion::Description(_) => DESCRIPTION_WEIGHT,
            MatchCriterion::Reference(_) => REFERENCE_WEIGHT,
        }
    }

    /// Compile the criterion's regex, when it has one
    fn compile(&self) -> ReconResult<Option<Regex>> {
        match self {
            MatchCriterion::Description(c) if c.mode == DescriptionMode::Regex => {
                let re = Regex::new(&c.pattern).map_err(|e| {
                    ReconError::Validation(format!("invalid regex '{}': {}", c.pattern, e))
                })?;
                Ok(Some(re))
            }
            _ => Ok(None),
        }
    }

    /// Closeness and a human-readable reason when satisfied
    fn evaluate(
        &self,
        transaction: &BankTransaction,
        record: &LedgerRecord,
        compiled: Option<&Regex>,
        defaults: &MatchingConfig,
    ) -> Option<(f64, String)> {
        match self {
            MatchCriterion::Amount(c) => c.closeness(transaction.amount, record.amount).map(|v| {
                (
                    v,
                    format!("amount {} vs {} (closeness {:.2})", transaction.amount, record.amount, v),
                )
            }),
            MatchCriterion::Date(c) => {
                c.closeness(transaction.posted_on, record.posted_on).map(|v| {
                    (
                        v,
                        format!(
                            "date {} vs {} (closeness {:.2})",
                            transaction.posted_on, record.posted_on, v
                        ),
                    )
                })
            }
            MatchCriterion::Description(c) => c
                .closeness(&transaction.description, &record.description, compiled, defaults)
                .map(|v| match c.mode {
                    DescriptionMode::Fuzzy => (v, format!("description similarity {:.2}", v)),
                    _ => (v, format!("description matches '{}'", c.pattern)),
                }),
            MatchCriterion::Reference(c) => c
                .closeness(transaction.reference.as_deref(), record.reference.as_deref())
                .map(|v| (v, "reference equality".to_string())),
        }
    }
}

/// A user-authored matching policy
///
/// Rules are evaluated in (priority, creation-order) sequence; priority values
/// need not be unique, but the ordering is fully deterministic so the same
/// rule set and data always produce the same result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    pub id: Uuid,
    pub name: String,
    /// Lower numbers are evaluated first
    pub priority: i32,
    pub active: bool,
    /// Conjunction: every criterion must be satisfied
    pub criteria: Vec<MatchCriterion>,
    /// Restrict to one candidate record type, when set
    pub record_type: Option<RecordType>,
    /// Restrict to these bank accounts; empty applies everywhere
    pub account_ids: Vec<String>,
    pub action: RuleAction,
    pub created_at: NaiveDateTime,
}

impl MatchRule {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        criteria: Vec<MatchCriterion>,
        action: RuleAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            priority,
            active: true,
            criteria,
            record_type: None,
            account_ids: Vec::new(),
            action,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Restrict the rule to one candidate record type
    pub fn for_record_type(mut self, record_type: RecordType) -> Self {
        self.record_type = Some(record_type);
        self
    }

    /// Restrict the rule to specific bank accounts
    pub fn for_accounts(mut self, account_ids: Vec<String>) -> Self {
        self.account_ids = account_ids;
        self
    }

    fn applies_to_transaction(&self, transaction: &BankTransaction) -> bool {
        self.account_ids.is_empty() || self.account_ids.contains(&transaction.account_id)
    }

    fn applies_to_record(&self, record: &LedgerRecord) -> bool {
        record.open
            && self
                .record_type
                .map(|t| t == record.record_ref.record_type)
                .unwrap_or(true)
    }
}

/// Evaluates rule sets against a transaction and a pool of candidate records
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    config: MatchingConfig,
}

impl RuleEngine {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Evaluate all active rules against a transaction and candidate pool
    ///
    /// Rules run in (priority, creation-order) sequence. The first rule whose
    /// action is auto-match or auto-reconcile and that survives with exactly
    /// one candidate short-circuits evaluation; otherwise candidates from all
    /// rules accumulate for ranking. A malformed rule is logged and skipped
    /// without disturbing the others.
    pub fn evaluate(
        &self,
        transaction: &BankTransaction,
        pool: &[LedgerRecord],
        rules: &[MatchRule],
    ) -> Vec<CandidateMatch> {
        let mut ordered: Vec<&MatchRule> = rules.iter().filter(|r| r.active).collect();
        ordered.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut candidates = Vec::new();
        for rule in ordered {
            if !rule.applies_to_transaction(transaction) {
                continue;
            }
            match self.evaluate_rule(transaction, pool, rule) {
                Ok(survivors) => {
                    let short_circuit = survivors.len() == 1
                        && matches!(rule.action, RuleAction::AutoMatch | RuleAction::AutoReconcile);
                    candidates.extend(survivors);
                    if short_circuit {
                        // First specific rule wins
                        break;
                    }
                }
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "skipping malformed match rule");
                }
            }
        }
        candidates
    }

    fn evaluate_rule(
        &self,
        transaction: &BankTransaction,
        pool: &[LedgerRecord],
        rule: &MatchRule,
    ) -> ReconResult<Vec<CandidateMatch>> {
        if rule.criteria.is_empty() {
            return Err(ReconError::Validation(format!(
                "rule '{}' has no criteria",
                rule.name
            )));
        }

        // Compile regexes once per rule; a bad pattern fails this rule only
        let mut compiled = Vec::with_capacity(rule.criteria.len());
        for criterion in &rule.criteria {
            compiled.push(criterion.compile()?);
        }

        let mut survivors = Vec::new();
        for record in pool.iter().filter(|r| rule.applies_to_record(r)) {
            let mut weighted = 0.0;
            let mut total_weight = 0.0;
            let mut reasons = vec![format!("rule '{}'", rule.name)];
            let mut satisfied = true;

            for (criterion, re) in rule.criteria.iter().zip(&compiled) {
                match criterion.evaluate(transaction, record, re.as_ref(), &self.config) {
                    Some((closeness, reason)) => {
                        weighted += criterion.weight() * closeness;
                        total_weight += criterion.weight();
                        reasons.push(reason);
                    }
                    None => {
                        satisfied = false;
                        break;
                    }
                }
            }

            if !satisfied {
                continue;
            }

            if let RuleAction::Tag(tag) = &rule.action {
                reasons.push(format!("categorized as {}", tag));
            }

            let score = 100.0 * weighted / total_weight;
            let mut candidate = CandidateMatch::new(
                record.record_ref.clone(),
                record.posted_on,
                score,
                MatchSource::Rule,
                reasons,
            );
            candidate.action = Some(rule.action.clone());
            survivors.push(candidate);
        }

        Ok(survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn txn(amount: i64, description: &str) -> BankTransaction {
        BankTransaction::new(
            "operating".to_string(),
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            Direction::Credit,
            amount,
            description.to_string(),
            None,
            Uuid::new_v4(),
        )
    }

    fn invoice(id: &str, amount: i64, description: &str) -> LedgerRecord {
        LedgerRecord {
            record_ref: RecordRef::new(RecordType::Invoice, id),
            posted_on: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            amount,
            description: description.to_string(),
            reference: None,
            counterparty: None,
            open: true,
        }
    }

    fn acme_rule(action: RuleAction) -> MatchRule {
        MatchRule::new(
            "ACME invoices",
            1,
            vec![
                MatchCriterion::Amount(AmountCriterion::Exact),
                MatchCriterion::Description(DescriptionCriterion::contains("ACME")),
            ],
            action,
        )
    }

    #[test]
    fn exact_amount_and_contains_scores_full() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "ACME CO INV-203");
        let pool = vec![invoice("inv-1", 150_000, "ACME invoice 203")];
        let rules = vec![acme_rule(RuleAction::RequireConfirmation)];

        let candidates = engine.evaluate(&transaction, &pool, &rules);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].score, 100.0);
        assert_eq!(candidates[0].tier, ConfidenceTier::Exact);
        assert_eq!(candidates[0].source, MatchSource::Rule);
    }

    #[test]
    fn amount_mismatch_eliminates_record() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "ACME CO INV-203");
        let pool = vec![invoice("inv-1", 140_000, "ACME invoice")];
        let rules = vec![acme_rule(RuleAction::RequireConfirmation)];

        assert!(engine.evaluate(&transaction, &pool, &rules).is_empty());
    }

    #[test]
    fn range_closeness_is_proportional() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "anything");
        let pool = vec![
            invoice("near", 149_950, "x"),
            invoice("far", 149_200, "x"),
        ];
        let rules = vec![MatchRule::new(
            "amount window",
            1,
            vec![MatchCriterion::Amount(AmountCriterion::Range {
                tolerance: 1_000,
            })],
            RuleAction::RequireConfirmation,
        )];

        let candidates = engine.evaluate(&transaction, &pool, &rules);
        assert_eq!(candidates.len(), 2);
        let near = candidates.iter().find(|c| c.target.record_id == "near").unwrap();
        let far = candidates.iter().find(|c| c.target.record_id == "far").unwrap();
        assert!(near.score > far.score);
    }

    #[test]
    fn malformed_regex_skips_only_that_rule() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "ACME CO INV-203");
        let pool = vec![invoice("inv-1", 150_000, "ACME invoice")];

        let bad = MatchRule::new(
            "broken",
            0,
            vec![MatchCriterion::Description(DescriptionCriterion::regex(
                "[invalid(regex",
            ))],
            RuleAction::AutoMatch,
        );
        let rules = vec![bad, acme_rule(RuleAction::RequireConfirmation)];

        let candidates = engine.evaluate(&transaction, &pool, &rules);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].target.record_id, "inv-1");
    }

    #[test]
    fn auto_match_rule_with_unique_survivor_short_circuits() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "ACME CO INV-203");
        let pool = vec![invoice("inv-1", 150_000, "ACME invoice")];

        let mut broad = MatchRule::new(
            "catch-all amounts",
            5,
            vec![MatchCriterion::Amount(AmountCriterion::Range {
                tolerance: 100_000,
            })],
            RuleAction::RequireConfirmation,
        );
        broad.created_at += chrono::Duration::seconds(1);
        let rules = vec![acme_rule(RuleAction::AutoMatch), broad];

        let candidates = engine.evaluate(&transaction, &pool, &rules);
        // The auto-match rule wins before the broad rule runs
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].action, Some(RuleAction::AutoMatch));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "ACME CO INV-203");
        let pool = vec![
            invoice("inv-1", 150_000, "ACME invoice"),
            invoice("inv-2", 150_000, "ACME other invoice"),
        ];
        let rules = vec![acme_rule(RuleAction::RequireConfirmation)];

        let first = engine.evaluate(&transaction, &pool, &rules);
        let second = engine.evaluate(&transaction, &pool, &rules);
        assert_eq!(first, second);
    }

    #[test]
    fn account_filter_gates_rule() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "ACME CO INV-203");
        let pool = vec![invoice("inv-1", 150_000, "ACME invoice")];
        let rules = vec![
            acme_rule(RuleAction::RequireConfirmation)
                .for_accounts(vec!["some-other-account".to_string()]),
        ];

        assert!(engine.evaluate(&transaction, &pool, &rules).is_empty());
    }

    #[test]
    fn closed_records_are_never_candidates() {
        let engine = RuleEngine::default();
        let transaction = txn(150_000, "ACME CO INV-203");
        let mut record = invoice("inv-1", 150_000, "ACME invoice");
        record.open = false;
        let rules = vec![acme_rule(RuleAction::RequireConfirmation)];

        assert!(engine.evaluate(&transaction, &[record], &rules).is_empty());
    }

    #[test]
    fn reference_equality_criterion() {
        let engine = RuleEngine::default();
        let mut transaction = txn(150_000, "payment");
        transaction.reference = Some("INV-203".to_string());
        let mut record = invoice("inv-1", 150_000, "invoice");
        record.reference = Some("inv-203".to_string());

        let rules = vec![MatchRule::new(
            "reference",
            1,
            vec![MatchCriterion::Reference(ReferenceCriterion {
                case_sensitive: false,
            })],
            RuleAction::RequireConfirmation,
        )];

        let candidates = engine.evaluate(&transaction, &[record], &rules);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].score, 100.0);
    }
}
