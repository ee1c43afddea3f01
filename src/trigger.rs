//! Ordered trigger classification.
//!
//! Each provider declares a static slice of rules. Rules are evaluated in order and
//! the first one whose predicate holds decides the reason. Providers keep the same
//! precedence: an explicit, recognized trigger field, then pull-request linkage,
//! commit/push linkage, manual markers, schedule markers and finally remote/API
//! markers.

use crate::status::TriggerReason;

/// A named predicate on raw run metadata `M`.
pub struct TriggerRule<M: ?Sized> {
    pub name: &'static str,
    pub reason: TriggerReason,
    pub matches: fn(&M) -> bool,
}

impl<M: ?Sized> TriggerRule<M> {
    pub const fn new(name: &'static str, reason: TriggerReason, matches: fn(&M) -> bool) -> Self {
        Self {
            name,
            reason,
            matches,
        }
    }
}

/// Returns the reason of the first matching rule, or `Unknown`.
pub fn classify<M: ?Sized>(rules: &[TriggerRule<M>], metadata: &M) -> TriggerReason {
    first_match(rules, metadata).map_or(TriggerReason::Unknown, |rule| rule.reason)
}

/// The rule that decided a classification, for logging and tests.
pub fn first_match<'r, M: ?Sized>(
    rules: &'r [TriggerRule<M>],
    metadata: &M,
) -> Option<&'r TriggerRule<M>> {
    rules.iter().find(|rule| (rule.matches)(metadata))
}

/// Case-insensitive substring test used by free-text rules.
pub(crate) fn mentions(text: &str, needle: &str) -> bool {
    text.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Meta {
        pr: bool,
        push: bool,
    }

    fn has_pr(meta: &Meta) -> bool {
        meta.pr
    }

    fn has_push(meta: &Meta) -> bool {
        meta.push
    }

    const RULES: &[TriggerRule<Meta>] = &[
        TriggerRule::new("pr", TriggerReason::PullRequest, has_pr),
        TriggerRule::new("push", TriggerReason::Push, has_push),
    ];

    #[test]
    fn test_first_rule_wins() {
        let meta = Meta { pr: true, push: true };
        assert_eq!(classify(RULES, &meta), TriggerReason::PullRequest);
        assert_eq!(first_match(RULES, &meta).map(|r| r.name), Some("pr"));
    }

    #[test]
    fn test_no_match_is_unknown() {
        let meta = Meta {
            pr: false,
            push: false,
        };
        assert_eq!(classify(RULES, &meta), TriggerReason::Unknown);
        assert_eq!(classify(&[], &meta), TriggerReason::Unknown);
    }

    #[test]
    fn test_mentions_is_case_insensitive() {
        assert!(mentions("Started by GitHub Push by octocat", "github push"));
        assert!(!mentions("Started by timer", "user"));
    }
}
