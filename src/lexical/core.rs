//! Core data structures for lexical search.
//!
//! Every structure here is a flat byte buffer addressed by integer offsets, decoded in
//! place from a loaded segment file:
//! - FST term dictionary and the automata that drive it
//! - Delta/vbyte postings with a multi-level skip list
//! - Columnar doc values
//! - BKD tree for numeric and geo ranges
//! - Compressed stored fields, live docs and per-field metadata

pub mod automaton;
pub mod bkd_tree;
pub mod dictionary;
pub mod doc_values;
pub mod field_info;
pub mod live_docs;
pub mod posting;
pub mod skip_list;
pub mod stored_fields;
