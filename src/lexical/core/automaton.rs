//! Finite automata driven in lock-step with the term dictionary.
//!
//! Each automaton implements [`fst::Automaton`] over UTF-8 bytes, so
//! [`TermDictionary::intersect`](super::dictionary::TermDictionary::intersect) can prune
//! every FST branch the automaton can no longer accept. Multi-byte characters are
//! buffered in the state until complete, so matching is character based.
//!
//! - [`LevenshteinAutomaton`] - terms within `max_edits` edits of a query term
//! - [`WildcardAutomaton`] - `*` (any sequence) and `?` (any one character)
//! - [`RegexpAutomaton`] - regular expressions, pruned on their literal prefix

use fst::Automaton;
use regex::Regex;

use crate::error::{Result, XiphosError};

/// Highest edit distance a fuzzy query may ask for.
pub const MAX_EDITS: u32 = 2;

/// Incremental UTF-8 decoder carried inside automaton states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Utf8Buffer {
    bytes: [u8; 4],
    len: u8,
}

impl Utf8Buffer {
    /// Feeds one byte. Returns the decoded char once a sequence completes.
    fn push(&mut self, byte: u8) -> Option<std::result::Result<char, ()>> {
        self.bytes[self.len as usize] = byte;
        self.len += 1;
        let expected = match self.bytes[0] {
            b if b < 0x80 => 1,
            b if b >= 0xF0 => 4,
            b if b >= 0xE0 => 3,
            b if b >= 0xC0 => 2,
            _ => {
                self.len = 0;
                return Some(Err(()));
            }
        };
        if (self.len as usize) < expected {
            return None;
        }
        let decoded = std::str::from_utf8(&self.bytes[..expected])
            .ok()
            .and_then(|s| s.chars().next())
            .ok_or(());
        self.len = 0;
        Some(decoded)
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Matches terms within a bounded (Damerau-)Levenshtein distance of a query term.
///
/// The automaton is built once per query term; each state carries one row of the
/// edit-distance matrix, so a transition costs O(query length) regardless of the
/// dictionary size.
#[derive(Debug, Clone)]
pub struct LevenshteinAutomaton {
    query: Vec<char>,
    max_edits: u32,
    prefix_length: usize,
    transpositions: bool,
}

#[derive(Debug, Clone)]
pub struct LevenshteinState {
    row: Vec<u32>,
    prev_row: Option<Vec<u32>>,
    prev_char: Option<char>,
    consumed: usize,
    pending: Utf8Buffer,
    dead: bool,
}

impl LevenshteinAutomaton {
    pub fn new(query: &str, max_edits: u32, prefix_length: usize, transpositions: bool) -> Result<Self> {
        if max_edits > MAX_EDITS {
            return Err(XiphosError::query(format!(
                "max_edits must be at most {MAX_EDITS}, got {max_edits}"
            )));
        }
        Ok(LevenshteinAutomaton {
            query: query.chars().collect(),
            max_edits,
            prefix_length,
            transpositions,
        })
    }

    pub fn max_edits(&self) -> u32 {
        self.max_edits
    }

    fn dead_state(&self) -> LevenshteinState {
        LevenshteinState {
            row: Vec::new(),
            prev_row: None,
            prev_char: None,
            consumed: 0,
            pending: Utf8Buffer::default(),
            dead: true,
        }
    }

    fn step(&self, state: &LevenshteinState, c: char) -> LevenshteinState {
        if state.consumed < self.prefix_length
            && self.query.get(state.consumed).is_none_or(|q| *q != c)
        {
            return self.dead_state();
        }

        let m = self.query.len();
        let mut row = Vec::with_capacity(m + 1);
        row.push(state.row[0] + 1);
        for i in 1..=m {
            let substitution = state.row[i - 1] + u32::from(self.query[i - 1] != c);
            let mut cost = (state.row[i] + 1).min(row[i - 1] + 1).min(substitution);
            if self.transpositions && i > 1 {
                if let (Some(prev_row), Some(prev_char)) = (&state.prev_row, state.prev_char) {
                    if self.query[i - 1] == prev_char && self.query[i - 2] == c {
                        cost = cost.min(prev_row[i - 2] + 1);
                    }
                }
            }
            row.push(cost);
        }

        let dead = row.iter().all(|d| *d > self.max_edits);
        LevenshteinState {
            prev_row: self.transpositions.then(|| state.row.clone()),
            prev_char: Some(c),
            row,
            consumed: state.consumed + 1,
            pending: Utf8Buffer::default(),
            dead,
        }
    }

    /// Edit distance of a complete term, or `None` when it exceeds `max_edits`.
    pub fn distance(&self, term: &str) -> Option<u32> {
        let mut state = self.start();
        for &b in term.as_bytes() {
            state = self.accept(&state, b);
            if state.dead {
                return None;
            }
        }
        self.is_match(&state).then(|| state.row[self.query.len()])
    }
}

impl Automaton for LevenshteinAutomaton {
    type State = LevenshteinState;

    fn start(&self) -> LevenshteinState {
        LevenshteinState {
            row: (0..=self.query.len() as u32).collect(),
            prev_row: None,
            prev_char: None,
            consumed: 0,
            pending: Utf8Buffer::default(),
            dead: false,
        }
    }

    fn is_match(&self, state: &LevenshteinState) -> bool {
        !state.dead && state.pending.is_empty() && state.row[self.query.len()] <= self.max_edits
    }

    fn can_match(&self, state: &LevenshteinState) -> bool {
        !state.dead
    }

    fn accept(&self, state: &LevenshteinState, byte: u8) -> LevenshteinState {
        if state.dead {
            return state.clone();
        }
        let mut pending = state.pending.clone();
        match pending.push(byte) {
            None => LevenshteinState {
                pending,
                ..state.clone()
            },
            Some(Ok(c)) => self.step(state, c),
            Some(Err(())) => self.dead_state(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WildcardToken {
    Char(char),
    AnyChar,
    AnySequence,
}

/// Matches `*` (zero or more characters) and `?` (exactly one character).
/// A backslash escapes the next character.
#[derive(Debug, Clone)]
pub struct WildcardAutomaton {
    tokens: Vec<WildcardToken>,
}

#[derive(Debug, Clone)]
pub struct WildcardState {
    /// Sorted set of pattern positions reachable after the consumed input.
    positions: Vec<usize>,
    pending: Utf8Buffer,
}

impl WildcardAutomaton {
    pub fn new(pattern: &str) -> Self {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            tokens.push(match c {
                '*' => WildcardToken::AnySequence,
                '?' => WildcardToken::AnyChar,
                '\\' => WildcardToken::Char(chars.next().unwrap_or('\\')),
                c => WildcardToken::Char(c),
            });
        }
        WildcardAutomaton { tokens }
    }

    /// Literal characters before the first wildcard.
    pub fn literal_prefix(&self) -> String {
        self.tokens
            .iter()
            .map_while(|t| match t {
                WildcardToken::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// Adds every position reachable through `*` without consuming input.
    fn closure(&self, positions: &mut Vec<usize>) {
        let mut i = 0;
        while i < positions.len() {
            let p = positions[i];
            if matches!(self.tokens.get(p), Some(WildcardToken::AnySequence))
                && !positions.contains(&(p + 1))
            {
                positions.push(p + 1);
            }
            i += 1;
        }
        positions.sort_unstable();
        positions.dedup();
    }

    fn step(&self, positions: &[usize], c: char) -> Vec<usize> {
        let mut next = Vec::new();
        for &p in positions {
            match self.tokens.get(p) {
                Some(WildcardToken::AnySequence) => next.push(p),
                Some(WildcardToken::AnyChar) => next.push(p + 1),
                Some(WildcardToken::Char(expected)) if *expected == c => next.push(p + 1),
                _ => {}
            }
        }
        self.closure(&mut next);
        next
    }

    pub fn matches(&self, term: &str) -> bool {
        let mut state = self.start();
        for &b in term.as_bytes() {
            state = self.accept(&state, b);
        }
        self.is_match(&state)
    }
}

impl Automaton for WildcardAutomaton {
    type State = WildcardState;

    fn start(&self) -> WildcardState {
        let mut positions = vec![0];
        self.closure(&mut positions);
        WildcardState {
            positions,
            pending: Utf8Buffer::default(),
        }
    }

    fn is_match(&self, state: &WildcardState) -> bool {
        state.pending.is_empty() && state.positions.contains(&self.tokens.len())
    }

    fn can_match(&self, state: &WildcardState) -> bool {
        !state.positions.is_empty()
    }

    fn will_always_match(&self, state: &WildcardState) -> bool {
        state.pending.is_empty()
            && state.positions.iter().any(|&p| {
                self.tokens[p.min(self.tokens.len())..]
                    .iter()
                    .all(|t| *t == WildcardToken::AnySequence)
                    && p < self.tokens.len()
            })
    }

    fn accept(&self, state: &WildcardState, byte: u8) -> WildcardState {
        let mut pending = state.pending.clone();
        match pending.push(byte) {
            None => WildcardState {
                positions: state.positions.clone(),
                pending,
            },
            Some(Ok(c)) => WildcardState {
                positions: self.step(&state.positions, c),
                pending: Utf8Buffer::default(),
            },
            Some(Err(())) => WildcardState {
                positions: Vec::new(),
                pending: Utf8Buffer::default(),
            },
        }
    }
}

/// Regular expression matching over whole terms.
///
/// Branches of the dictionary that cannot start with the pattern's literal prefix are
/// pruned during the walk; surviving terms are confirmed with an anchored regex.
#[derive(Debug, Clone)]
pub struct RegexpAutomaton {
    prefix: Vec<u8>,
    regex: Regex,
}

impl RegexpAutomaton {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(RegexpAutomaton {
            prefix: Self::literal_prefix(pattern).into_bytes(),
            regex,
        })
    }

    /// Literal characters a match must start with. Conservative: stops at the first
    /// metacharacter and drops the last literal if a quantifier follows it.
    fn literal_prefix(pattern: &str) -> String {
        const META: &[char] = &['.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '\\', '^', '$'];
        if pattern.contains('|') {
            return String::new();
        }
        let mut prefix: Vec<char> = Vec::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if META.contains(&c) {
                if matches!(c, '*' | '?' | '{') {
                    prefix.pop();
                }
                break;
            }
            prefix.push(c);
            if matches!(chars.peek(), Some('*' | '?' | '{')) {
                prefix.pop();
                break;
            }
        }
        prefix.into_iter().collect()
    }

    pub fn matches(&self, term: &str) -> bool {
        self.regex.is_match(term)
    }
}

impl Automaton for RegexpAutomaton {
    /// Number of prefix bytes matched so far, or `None` once the prefix failed.
    type State = Option<usize>;

    fn start(&self) -> Option<usize> {
        Some(0)
    }

    fn is_match(&self, state: &Option<usize>) -> bool {
        state.is_some_and(|n| n >= self.prefix.len())
    }

    fn can_match(&self, state: &Option<usize>) -> bool {
        state.is_some()
    }

    fn accept(&self, state: &Option<usize>, byte: u8) -> Option<usize> {
        let n = (*state)?;
        if n >= self.prefix.len() {
            Some(n)
        } else if self.prefix[n] == byte {
            Some(n + 1)
        } else {
            None
        }
    }
}
