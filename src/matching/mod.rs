//! Transaction matching: rules, learned patterns and resolution

pub mod patterns;
pub mod resolver;
pub mod rules;
pub mod similarity;

pub use patterns::PatternLearner;
pub use resolver::{MatchResolver, ResolutionResult};
pub use rules::{
    AmountCriterion, DateCriterion, DescriptionCriterion, DescriptionMode, MatchCriterion,
    MatchRule, ReferenceCriterion, RuleEngine,
};
