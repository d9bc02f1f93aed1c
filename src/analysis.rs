//! Text analysis: raw field text to an ordered token sequence.
//!
//! An analyzer runs, in order, any number of [`char_filter`]s over the raw text, exactly
//! one [`tokenizer`], and an ordered chain of [`token_filter`]s. Analysis is a pure
//! function of its input and configuration.
//!
//! ```text
//! "<b>The</b> Quick foxes" ─ html_strip ─▶ "The Quick foxes"
//!                          ─ unicode_word ─▶ [The, Quick, foxes]
//!                          ─ lowercase ─▶ [the, quick, foxes]
//!                          ─ stem ─▶ [the, quick, fox]
//! ```

pub mod analyzer;
pub mod char_filter;
pub mod token;
pub mod token_filter;
pub mod tokenizer;
