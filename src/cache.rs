//! Thread-local compilation cache for regex patterns.
//!
//! Rule files routinely repeat the same guard or search expression across
//! rules and documents. Compiled regexes are cached per thread so loading a
//! directory of rule files compiles each distinct expression once.
//! Cache is capped at 256 entries; it is cleared wholesale when full.

use regex::{Regex, RegexBuilder};
use std::cell::RefCell;
use std::collections::HashMap;

use crate::pattern::RegexOptions;

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    // Options are part of the key: `a.b` with and without dot_all are
    // different automata.
    static REGEX_CACHE: RefCell<HashMap<(String, RegexOptions), Regex>> =
        RefCell::new(HashMap::new());
}

/// Get a compiled regex from cache, or compile and cache it.
///
/// `Regex` is reference counted internally, so the returned clone shares the
/// compiled program with the cached entry.
pub fn get_or_compile(source: &str, options: RegexOptions) -> Result<Regex, regex::Error> {
    let cache_key = (source.to_string(), options);

    REGEX_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();

        if let Some(regex) = cache.get(&cache_key) {
            return Ok(regex.clone());
        }

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }

        let compiled = RegexBuilder::new(source)
            .dot_matches_new_line(options.dot_all)
            .case_insensitive(options.case_insensitive)
            .build()?;
        cache.insert(cache_key, compiled.clone());
        Ok(compiled)
    })
}

/// Clear the regex cache (mainly for testing).
pub fn clear_cache() {
    REGEX_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Number of compiled expressions currently cached.
pub fn cache_size() -> usize {
    REGEX_CACHE.with(|cache| cache.borrow().len())
}
