// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Matching rules for the five subscription key kinds.
//!
//! Class keys match exactly (pointer identity) or hierarchically
//! (assignability). Generic type keys match when raw types are identical and
//! every argument is contained. Topic patterns are regexes with full-match
//! semantics: the pattern must consume the entire topic, which is enforced by
//! compiling each pattern anchored.

use std::{
    borrow::Borrow,
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    ptr,
};

use regex::Regex;
use ustr::Ustr;

use crate::events::{EventClass, GenericType, TypeArg};

/// Returns whether a hierarchical subscription keyed on `key` matches a
/// published event of class `published`.
#[must_use]
pub fn class_matches_hierarchical(
    key: &'static EventClass,
    published: &'static EventClass,
) -> bool {
    key.is_assignable_from(published)
}

/// Returns whether an exact subscription keyed on `key` matches a published
/// event of class `published`.
#[must_use]
pub fn class_matches_exact(key: &'static EventClass, published: &'static EventClass) -> bool {
    ptr::eq(key, published)
}

/// Returns whether a generic subscription keyed on `subscribed` matches the
/// `published` type expression.
///
/// Raw types must be identical and arities equal. Each subscribed argument
/// must equal the published argument, or be a wildcard containing it: every
/// upper bound assignable *from* it and every lower bound assignable *to* it.
/// Published arguments must not themselves be wildcards (callers validate).
#[must_use]
pub fn generic_type_matches(subscribed: &GenericType, published: &GenericType) -> bool {
    if !ptr::eq(subscribed.raw(), published.raw()) {
        return false;
    }
    if subscribed.args().len() != published.args().len() {
        return false;
    }

    subscribed
        .args()
        .iter()
        .zip(published.args())
        .all(|(sub, publ)| match (sub, publ) {
            (TypeArg::Concrete(a), TypeArg::Concrete(b)) => ptr::eq(*a, *b),
            (TypeArg::Wildcard { upper, lower }, TypeArg::Concrete(b)) => {
                upper.iter().all(|bound| bound.is_assignable_from(b))
                    && lower.iter().all(|bound| b.is_assignable_from(bound))
            }
            (_, TypeArg::Wildcard { .. }) => false,
        })
}

/// A compiled topic-pattern key.
///
/// Wraps the pattern source (hash/equality identity) together with its
/// anchored compilation, so `Foo[1-5]` matches the topic `Foo1` but not
/// `Foo12` or `xFoo1`.
#[derive(Clone)]
pub struct PatternKey {
    source: Ustr,
    regex: Regex,
}

impl PatternKey {
    /// Compiles a pattern key from its source string.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not a valid regex.
    pub fn new<T: AsRef<str>>(pattern: T) -> Result<Self, regex::Error> {
        let source = Ustr::from(pattern.as_ref());
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self { source, regex })
    }

    /// Returns the original pattern source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.source.as_str()
    }

    /// Returns whether the pattern fully matches the topic.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

impl PartialEq for PatternKey {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PatternKey {}

impl Hash for PatternKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.as_str().hash(state);
    }
}

impl Borrow<str> for PatternKey {
    fn borrow(&self) -> &str {
        self.source.as_str()
    }
}

impl Debug for PatternKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternKey({})", self.source)
    }
}

impl Display for PatternKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    static ROOT: EventClass = EventClass::concrete("Root", None, &[]);
    static MID: EventClass = EventClass::concrete("Mid", Some(&ROOT), &[]);
    static LEAF: EventClass = EventClass::concrete("Leaf", Some(&MID), &[]);
    static OTHER: EventClass = EventClass::concrete("Other", None, &[]);
    static CONTAINER: EventClass = EventClass::concrete("Container", None, &[]);

    #[rstest]
    #[case(&ROOT, &LEAF, true, false)]
    #[case(&LEAF, &LEAF, true, true)]
    #[case(&LEAF, &ROOT, false, false)]
    #[case(&OTHER, &LEAF, false, false)]
    fn test_class_matching(
        #[case] key: &'static EventClass,
        #[case] published: &'static EventClass,
        #[case] hierarchical: bool,
        #[case] exact: bool,
    ) {
        assert_eq!(class_matches_hierarchical(key, published), hierarchical);
        assert_eq!(class_matches_exact(key, published), exact);
    }

    fn concrete(class: &'static EventClass) -> GenericType {
        GenericType::new(&CONTAINER, vec![TypeArg::Concrete(class)])
    }

    #[rstest]
    fn test_generic_exact_args_match() {
        assert!(generic_type_matches(&concrete(&MID), &concrete(&MID)));
        assert!(!generic_type_matches(&concrete(&MID), &concrete(&LEAF)));
    }

    #[rstest]
    fn test_generic_raw_types_must_be_identical() {
        let other_raw = GenericType::new(&OTHER, vec![TypeArg::Concrete(&MID)]);
        assert!(!generic_type_matches(&other_raw, &concrete(&MID)));
    }

    #[rstest]
    fn test_generic_arity_must_match() {
        let binary = GenericType::new(
            &CONTAINER,
            vec![TypeArg::Concrete(&MID), TypeArg::Concrete(&MID)],
        );
        assert!(!generic_type_matches(&binary, &concrete(&MID)));
    }

    #[rstest]
    // `? extends Root` contains Mid and Leaf but not Other.
    #[case(vec![&ROOT], vec![], &MID, true)]
    #[case(vec![&ROOT], vec![], &LEAF, true)]
    #[case(vec![&ROOT], vec![], &OTHER, false)]
    // `? extends Mid` does not contain Root.
    #[case(vec![&MID], vec![], &ROOT, false)]
    // `? super Mid` contains Mid's ancestors but not its descendants.
    #[case(vec![], vec![&MID], &ROOT, true)]
    #[case(vec![], vec![&MID], &MID, true)]
    #[case(vec![], vec![&MID], &LEAF, false)]
    // Both bounds constrain together.
    #[case(vec![&ROOT], vec![&LEAF], &MID, true)]
    #[case(vec![&MID], vec![&LEAF], &ROOT, false)]
    fn test_generic_wildcard_containment(
        #[case] upper: Vec<&'static EventClass>,
        #[case] lower: Vec<&'static EventClass>,
        #[case] published_arg: &'static EventClass,
        #[case] expected: bool,
    ) {
        let subscribed = GenericType::new(&CONTAINER, vec![TypeArg::Wildcard { upper, lower }]);
        assert_eq!(
            generic_type_matches(&subscribed, &concrete(published_arg)),
            expected
        );
    }

    #[rstest]
    fn test_generic_published_wildcard_never_matches() {
        let wild = GenericType::new(
            &CONTAINER,
            vec![TypeArg::Wildcard {
                upper: vec![&ROOT],
                lower: vec![],
            }],
        );
        assert!(!generic_type_matches(&wild, &wild));
    }

    #[rstest]
    #[case("Foo[1-5]", "Foo1", true)]
    #[case("Foo[1-5]", "Foo5", true)]
    #[case("Foo[1-5]", "Foo7", false)]
    // Full-match semantics: no partial hits.
    #[case("Foo[1-5]", "Foo12", false)]
    #[case("Foo[1-5]", "xFoo1", false)]
    #[case("orders\\..*", "orders.filled", true)]
    #[case("orders\\..*", "orders.", true)]
    #[case("orders\\..*", "orders", false)]
    // Alternation must still consume the whole topic.
    #[case("a|ab", "ab", true)]
    #[case("a|ab", "abc", false)]
    fn test_pattern_full_match(#[case] pattern: &str, #[case] topic: &str, #[case] expected: bool) {
        let key = PatternKey::new(pattern).unwrap();
        assert_eq!(key.matches(topic), expected);
    }

    #[rstest]
    fn test_pattern_key_rejects_invalid_regex() {
        assert!(PatternKey::new("Foo[").is_err());
    }

    #[rstest]
    fn test_pattern_key_identity_is_source() {
        let a = PatternKey::new("Foo.*").unwrap();
        let b = PatternKey::new("Foo.*").unwrap();
        let c = PatternKey::new("Bar.*").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Borrow::<str>::borrow(&a), "Foo.*");
    }

    proptest::proptest! {
        // Anchored compilation must agree with matching the raw regex over
        // the entire topic.
        #[test]
        fn prop_full_match_agrees_with_whole_string_find(topic in "[a-c]{0,6}") {
            let key = PatternKey::new("a[a-b]*c").unwrap();
            let raw = Regex::new("a[a-b]*c").unwrap();
            let whole = raw
                .find_iter(&topic)
                .any(|m| m.start() == 0 && m.end() == topic.len());
            proptest::prop_assert_eq!(key.matches(&topic), whole);
        }
    }
}
