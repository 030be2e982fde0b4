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

//! Functions for condition checks at API boundaries.
//!
//! Each function validates a single predicate and returns an error with a
//! descriptive message on failure. Callers either propagate with `?` or, where
//! the condition is an internal invariant, unwrap with [`FAILED`].

use anyhow::{Result, bail};

/// Standard message for unwrapping a check that cannot fail by construction.
pub const FAILED: &str = "Condition check failed";

/// Checks the `predicate` is true.
///
/// # Errors
///
/// Returns an error with `fail_msg` if the predicate is false.
pub fn check_predicate_true(predicate: bool, fail_msg: &str) -> Result<()> {
    if !predicate {
        bail!("{fail_msg}")
    }
    Ok(())
}

/// Checks the string `value` is non-empty and not all whitespace.
///
/// # Errors
///
/// Returns an error if `value` is empty or contains only whitespace.
pub fn check_valid_string<T: AsRef<str>>(value: T, param: &str) -> Result<()> {
    let value = value.as_ref();
    if value.is_empty() {
        bail!("invalid string for `{param}`, was empty")
    }
    if value.chars().all(char::is_whitespace) {
        bail!("invalid string for `{param}`, was all whitespace")
    }
    Ok(())
}

/// Checks the `value` is positive (non-zero).
///
/// # Errors
///
/// Returns an error if `value` is zero.
pub fn check_positive(value: u64, param: &str) -> Result<()> {
    if value == 0 {
        bail!("invalid u64 for `{param}`, was zero")
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(true, true)]
    #[case(false, false)]
    fn test_check_predicate_true(#[case] predicate: bool, #[case] expected: bool) {
        assert_eq!(check_predicate_true(predicate, "failed").is_ok(), expected);
    }

    #[rstest]
    #[case("topic", true)]
    #[case("a", true)]
    #[case(" padded ", true)]
    #[case("", false)]
    #[case("   ", false)]
    #[case("\t\n", false)]
    fn test_check_valid_string(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(check_valid_string(value, "value").is_ok(), expected);
    }

    #[rstest]
    #[case(1, true)]
    #[case(u64::MAX, true)]
    #[case(0, false)]
    fn test_check_positive(#[case] value: u64, #[case] expected: bool) {
        assert_eq!(check_positive(value, "value").is_ok(), expected);
    }
}
