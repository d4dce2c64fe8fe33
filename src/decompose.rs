//! Ancestor-prefix decomposition of record paths.
//!
//! A container has no nesting: every directory that leads to an entry must
//! appear as its own record before the entry.  [`prefixes`] yields those
//! paths, outermost first, ending with the path itself:
//!
//! ```
//! use blobby::decompose::decompose;
//! let expected: [&[u8]; 3] = [b"a", b"a/b", b"a/b/c"];
//! assert_eq!(decompose(b"a/b/c"), expected);
//! ```
//!
//! Paths are raw bytes, split on `/` only.  Duplicate suppression across
//! several paths is the writer's job; this module always returns the whole
//! chain.

pub const SEPARATOR: u8 = b'/';

/// Iterator over the prefixes of one path.  See [`prefixes`].
#[derive(Debug, Clone)]
pub struct Prefixes<'a> {
    path: &'a [u8],
    pos:  usize,
    done: bool,
}

/// Prefixes of `path` ending at each separator boundary, then `path`.
///
/// Trailing separators are ignored, and a run of separators counts as one
/// boundary.  A leading separator does not produce an empty prefix.
pub fn prefixes(path: &[u8]) -> Prefixes<'_> {
    let path = trim_trailing_separators(path);
    Prefixes { path, pos: 0, done: path.is_empty() }
}

/// Collecting form of [`prefixes`].
pub fn decompose(path: &[u8]) -> Vec<&[u8]> {
    prefixes(path).collect()
}

impl<'a> Iterator for Prefixes<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.pos < self.path.len() {
            let i = self.pos;
            self.pos += 1;
            if self.path[i] == SEPARATOR && i > 0 && self.path[i - 1] != SEPARATOR {
                return Some(&self.path[..i]);
            }
        }
        self.done = true;
        Some(self.path)
    }
}

/// `a/b//` -> `a/b`.  A path made only of separators keeps one.
pub fn trim_trailing_separators(path: &[u8]) -> &[u8] {
    let mut end = path.len();
    while end > 1 && path[end - 1] == SEPARATOR {
        end -= 1;
    }
    &path[..end]
}

/// Record path of `name` inside directory `parent`.
pub fn join(parent: &[u8], name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parent.len() + 1 + name.len());
    out.extend_from_slice(parent);
    if !parent.is_empty() && parent.last() != Some(&SEPARATOR) {
        out.push(SEPARATOR);
    }
    out.extend_from_slice(name);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(path: &str) -> Vec<String> {
        decompose(path.as_bytes())
            .into_iter()
            .map(|p| String::from_utf8(p.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn nested_path() {
        assert_eq!(chain("a/b/c.txt"), ["a", "a/b", "a/b/c.txt"]);
    }

    #[test]
    fn single_component() {
        assert_eq!(chain("file"), ["file"]);
    }

    #[test]
    fn empty_path_has_no_prefixes() {
        assert!(chain("").is_empty());
    }

    #[test]
    fn trailing_separators_ignored() {
        assert_eq!(chain("a/b/"), ["a", "a/b"]);
        assert_eq!(chain("a/b///"), ["a", "a/b"]);
    }

    #[test]
    fn absolute_and_root() {
        assert_eq!(chain("/usr/lib"), ["/usr", "/usr/lib"]);
        assert_eq!(chain("/"), ["/"]);
        assert_eq!(chain("//"), ["/"]);
    }

    #[test]
    fn separator_runs_are_one_boundary() {
        assert_eq!(chain("a//b"), ["a", "a//b"]);
    }

    #[test]
    fn dot_components_are_kept() {
        assert_eq!(chain("./x/y"), [".", "./x", "./x/y"]);
    }

    #[test]
    fn no_cross_call_dedup() {
        assert_eq!(chain("a/b/x"), ["a", "a/b", "a/b/x"]);
        assert_eq!(chain("a/b/y"), ["a", "a/b", "a/b/y"]);
    }

    #[test]
    fn join_paths() {
        assert_eq!(join(b"a/b", b"c"), b"a/b/c");
        assert_eq!(join(b"a/", b"c"), b"a/c");
        assert_eq!(join(b"", b"c"), b"c");
        assert_eq!(join(b"/", b"etc"), b"/etc");
    }

    proptest! {
        #[test]
        fn chain_of_relative_segments(segments in proptest::collection::vec("[a-z0-9._-]{1,8}", 1..8)) {
            let path = segments.join("/");
            let got = decompose(path.as_bytes());
            prop_assert_eq!(got.len(), segments.len());
            prop_assert_eq!(*got.last().unwrap(), path.as_bytes());
            for (i, prefix) in got.iter().enumerate() {
                prop_assert_eq!(prefix.to_vec(), segments[..=i].join("/").into_bytes());
            }
        }

        #[test]
        fn every_prefix_leads_the_next(path in "[a/]{0,24}") {
            let got = decompose(path.as_bytes());
            for pair in got.windows(2) {
                prop_assert!(pair[1].starts_with(pair[0]));
                prop_assert!(pair[1].len() > pair[0].len());
            }
        }
    }
}
