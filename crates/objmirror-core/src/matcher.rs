//! Rule matcher
//!
//! Pure selection of the rules applying to an object URL. Matching never
//! errors: a malformed URL simply matches nothing. All matching rules fire,
//! in rule-set load order.

use crate::config::Rule;

/// The rules applying to an object URL, in load order
pub fn match_rules<'a>(rules: &'a [Rule], target: &str) -> Vec<&'a Rule> {
    rules.iter().filter(|rule| rule.matches(target)).collect()
}
