// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tidyfs::rules::GlobMatcher;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    pattern: &'a str,
    candidate: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    if let Ok(matcher) = GlobMatcher::new(input.pattern) {
        let _ = matcher.is_match(input.candidate);
        // literal patterns always match themselves
        if !input.pattern.contains(['*', '?']) {
            assert!(matcher.is_match(input.pattern));
        }
    }
});
