//! Learned matching patterns: fingerprinting, suggestion and reinforcement
//!
//! Every confirmed or rejected match feeds back into a store of fingerprint
//! patterns. A pattern that keeps getting confirmed grows strong enough to
//! drive auto-confirmation of recurring transactions (rent, salary,
//! subscriptions) without any user-authored rule.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::PatternConfig;
use crate::matching::similarity;
use crate::traits::PatternStore;
use crate::types::*;

/// Distill the matching features of a transaction
pub fn fingerprint(transaction: &BankTransaction) -> Fingerprint {
    let (day_of_month, weekday) = crate::types::date_features(transaction.posted_on);
    Fingerprint {
        template: similarity::template(&transaction.description),
        magnitude: Fingerprint::magnitude_of(transaction.amount),
        day_of_month,
        weekday,
    }
}

/// Deterministic storage key for a fingerprint
///
/// Only the template and amount magnitude identify a pattern. The periodicity
/// features are descriptive; folding them into the key would fragment a
/// monthly vendor pattern every time the posting day drifts.
pub fn pattern_key(fingerprint: &Fingerprint) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.template.as_bytes());
    hasher.update([0u8]);
    hasher.update(fingerprint.magnitude.to_be_bytes());
    let digest = hasher.finalize();
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

fn classify(template: &str) -> PatternType {
    let has = |words: &[&str]| words.iter().any(|w| template.contains(w));
    if has(&["salary", "payroll", "wages"]) {
        PatternType::Salary
    } else if has(&["subscription"]) {
        PatternType::Subscription
    } else if has(&["electric", "water", "utility", "gas"]) {
        PatternType::Utility
    } else if has(&["tax", "vat", "gst"]) {
        PatternType::Tax
    } else if has(&["rent", "lease", "monthly"]) {
        PatternType::Recurring
    } else {
        PatternType::VendorAmount
    }
}

/// Suggests candidates from learned patterns and reinforces them on outcomes
pub struct PatternLearner<P: PatternStore> {
    store: P,
    config: PatternConfig,
}

impl<P: PatternStore> PatternLearner<P> {
    pub fn new(store: P, config: PatternConfig) -> Self {
        Self { store, config }
    }

    /// Candidate matches for a transaction based on its learned pattern
    ///
    /// Looks up the transaction's fingerprint (falling back to the nearest
    /// active template within the configured edit distance) and scores every
    /// open pool record of the pattern's target type in the same amount
    /// magnitude. The ceiling is strength times historical success rate,
    /// shaded by description similarity below that: only a strong pattern
    /// with a clean track record and a close record can clear the
    /// auto-confirm threshold.
    pub async fn suggest(
        &self,
        transaction: &BankTransaction,
        pool: &[LedgerRecord],
    ) -> ReconResult<Vec<CandidateMatch>> {
        let fp = fingerprint(transaction);
        if fp.template.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = match self.lookup(&fp).await? {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };

        let mut candidates = Vec::new();
        for record in pool {
            if !record.open
                || record.record_ref.record_type != pattern.target_type
                || Fingerprint::magnitude_of(record.amount) != fp.magnitude
            {
                continue;
            }
            let sim = similarity::similarity(&transaction.description, &record.description);
            let ceiling = pattern.strength * pattern.success_rate();
            let score = ceiling * (0.5 + 0.5 * sim);
            let reasons = vec![
                format!(
                    "learned {:?} pattern '{}'",
                    pattern.pattern_type, pattern.fingerprint.template
                ),
                format!(
                    "{} confirmations, {} rejections",
                    pattern.confirmations, pattern.rejections
                ),
            ];
            candidates.push(CandidateMatch::new(
                record.record_ref.clone(),
                record.posted_on,
                score,
                MatchSource::Pattern,
                reasons,
            ));
        }
        Ok(candidates)
    }

    async fn lookup(&self, fp: &Fingerprint) -> ReconResult<Option<MatchingPattern>> {
        if let Some(pattern) = self.store.get_pattern(&pattern_key(fp)).await? {
            return Ok(pattern.active.then_some(pattern));
        }

        // Nearest active template within the configured edit distance,
        // strongest first with the key as a deterministic tie-break
        let mut best: Option<MatchingPattern> = None;
        for pattern in self.store.list_active_patterns().await? {
            if pattern.fingerprint.magnitude != fp.magnitude {
                continue;
            }
            let distance =
                similarity::levenshtein_distance(&pattern.fingerprint.template, &fp.template);
            if distance > self.config.template_edit_distance {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => {
                    pattern.strength > b.strength
                        || (pattern.strength == b.strength && pattern.key < b.key)
                }
            };
            if better {
                best = Some(pattern);
            }
        }
        Ok(best)
    }

    /// Feed one match decision back into the pattern store
    ///
    /// Confirmations reinforce the fingerprint's pattern, creating it on first
    /// sight; rejections weaken it, eventually deactivating it. Split matches
    /// are skipped: a partial pairing says nothing reliable about the
    /// fingerprint.
    pub async fn learn(
        &mut self,
        transaction: &BankTransaction,
        decided: &TransactionMatch,
        outcome: MatchOutcome,
    ) -> ReconResult<()> {
        if decided.is_split() {
            return Ok(());
        }
        let fp = fingerprint(transaction);
        if fp.template.is_empty() {
            return Ok(());
        }
        let key = pattern_key(&fp);

        let updated = self
            .store
            .record_outcome(&key, outcome, &self.config)
            .await?;
        if updated.is_none() && outcome == MatchOutcome::Confirmed {
            let now = chrono::Utc::now().naive_utc();
            let pattern = MatchingPattern {
                key: key.clone(),
                pattern_type: classify(&fp.template),
                fingerprint: fp,
                target_type: decided.target.record_type,
                confirmations: 1,
                rejections: 0,
                strength: self.config.initial_strength,
                active: true,
                created_at: now,
                updated_at: now,
            };
            self.store.save_pattern(&pattern).await?;
            debug!(key = %key, pattern_type = ?pattern.pattern_type, "created matching pattern");
        }
        Ok(())
    }
}
