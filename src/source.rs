//! Source buffers backing the tokenizer and every span reported afterward.
//!
//! Mirrors `passerine`'s `Source`/`Span` split: a `Source` owns the text for
//! the life of the script, and everything downstream (tokens, AST nodes)
//! borrows byte ranges into it rather than copying substrings around.

use std::fmt;
use std::rc::Rc;

/// A loaded chunk of script text, plus the path it came from (for
/// diagnostics and for resolving relative `@include` directives).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: String,
    pub contents: String,
}

impl Source {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Rc<Source> {
        Rc::new(Source { path: path.into(), contents: contents.into() })
    }

    /// A `Source` with no backing file, for tests and inline scripts.
    pub fn inline(contents: impl Into<String>) -> Rc<Source> {
        Source::new("<inline>", contents)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.path) }
}

/// Index into a [`SourceSet`]. A token's byte range is only meaningful
/// relative to the particular buffer it came from, so every token carries
/// one of these alongside its `start`/`end` — needed the moment `@include`
/// folds a second buffer into the same token stream (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// All the source buffers that have contributed tokens to one compilation:
/// the entry file plus every file pulled in transitively by `@include`.
#[derive(Debug, Default, Clone)]
pub struct SourceSet {
    sources: Vec<Rc<Source>>,
}

impl SourceSet {
    pub fn new() -> SourceSet { SourceSet { sources: Vec::new() } }

    pub fn push(&mut self, source: Rc<Source>) -> SourceId {
        let id = SourceId(self.sources.len() as u32);
        self.sources.push(source);
        id
    }

    pub fn get(&self, id: SourceId) -> &Rc<Source> { &self.sources[id.0 as usize] }
}

/// Resolves the file behind an `@include "path"` directive.
///
/// Kept as a trait rather than hard-coding `std::fs` so the tokenizer can be
/// exercised against an in-memory filesystem in tests without touching disk.
/// This is the one core feature that needs file I/O (the top-level "load the
/// entry script" step stays a host concern, per the spec's scope notes).
pub trait SourceLoader {
    fn load(&self, path: &str) -> std::io::Result<String>;
}

/// The default loader: reads straight from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &str) -> std::io::Result<String> { std::fs::read_to_string(path) }
}

/// An in-memory loader for tests: a fixed table of `path -> contents`.
#[derive(Debug, Default, Clone)]
pub struct MapLoader {
    files: std::collections::HashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> Self { MapLoader { files: std::collections::HashMap::new() } }

    pub fn with(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

impl SourceLoader for MapLoader {
    fn load(&self, path: &str) -> std::io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such include: {path}"))
        })
    }
}
