//! Phrase matching over term positions.
//!
//! Documents containing every slot are found with a leapfrog over the slots' postings;
//! positions are only decoded for those candidates. With slop 0 the slots must chain
//! exactly, taking multi-position tokens into account. With slop > 0 a match is a
//! window whose spread of offset-normalized positions is at most the slop, so a
//! swapped pair of terms costs 2. No two slots of a window share a position.

use crate::error::Result;
use crate::lexical::core::field_info::SegmentFieldInfo;
use crate::lexical::core::posting::{NO_MORE_DOCS, PostingIterator, TermPosition};
use crate::lexical::search::scorer::Scorer;
use crate::lexical::search::scorer::term::field_length;
use crate::lexical::search::scoring::bm25::SimScorer;

/// Postings of all terms that may fill one phrase slot.
#[derive(Debug)]
pub struct SlotPostings {
    offset: u32,
    iters: Vec<PostingIterator>,
    doc: u32,
    started: bool,
}

impl SlotPostings {
    pub fn new(offset: u32, iters: Vec<PostingIterator>) -> Self {
        SlotPostings {
            offset,
            iters,
            doc: 0,
            started: false,
        }
    }

    fn cost(&self) -> u64 {
        self.iters.iter().map(PostingIterator::cost).sum()
    }

    fn next(&mut self) -> Result<u32> {
        for iter in &mut self.iters {
            if !self.started || iter.doc() == self.doc {
                iter.next()?;
            }
        }
        self.started = true;
        self.settle()
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        if self.started && self.doc >= target {
            return Ok(self.doc);
        }
        for iter in &mut self.iters {
            iter.advance(target)?;
        }
        self.started = true;
        self.settle()
    }

    fn settle(&mut self) -> Result<u32> {
        self.doc = self
            .iters
            .iter()
            .map(PostingIterator::doc)
            .min()
            .unwrap_or(NO_MORE_DOCS);
        Ok(self.doc)
    }

    /// Positions of every term of the slot in the current document, sorted.
    fn positions(&mut self) -> Result<Vec<TermPosition>> {
        let mut positions = Vec::new();
        for iter in &mut self.iters {
            if iter.doc() == self.doc {
                positions.extend_from_slice(iter.positions()?);
            }
        }
        positions.sort_unstable_by_key(|p| (p.position, p.length));
        Ok(positions)
    }
}

#[derive(Debug)]
pub struct PhraseScorer<'a> {
    /// In phrase order.
    slots: Vec<SlotPostings>,
    /// Slot indexes by increasing cost; the first one leads the leapfrog.
    order: Vec<usize>,
    slop: u32,
    doc: u32,
    started: bool,
    freq: f32,
    field: Option<&'a SegmentFieldInfo>,
    sim: SimScorer,
}

impl<'a> PhraseScorer<'a> {
    /// `slots` must be non-empty and ordered by offset.
    pub fn new(
        slots: Vec<SlotPostings>,
        slop: u32,
        field: Option<&'a SegmentFieldInfo>,
        sim: SimScorer,
    ) -> Self {
        let mut order: Vec<usize> = (0..slots.len()).collect();
        order.sort_by_key(|&i| slots[i].cost());
        PhraseScorer {
            slots,
            order,
            slop,
            doc: 0,
            started: false,
            freq: 0.0,
            field,
            sim,
        }
    }

    /// Sloppy frequency of the phrase in the current document.
    pub fn freq(&self) -> f32 {
        self.freq
    }

    fn lead(&mut self) -> &mut SlotPostings {
        let lead = self.order[0];
        &mut self.slots[lead]
    }

    /// Smallest doc `>= doc` present in every slot.
    fn align(&mut self, mut doc: u32) -> Result<u32> {
        'outer: while doc != NO_MORE_DOCS {
            for k in 1..self.order.len() {
                let other = self.slots[self.order[k]].advance(doc)?;
                if other > doc {
                    doc = self.lead().advance(other)?;
                    continue 'outer;
                }
            }
            return Ok(doc);
        }
        Ok(NO_MORE_DOCS)
    }

    fn find_match(&mut self, mut doc: u32) -> Result<u32> {
        loop {
            doc = self.align(doc)?;
            if doc == NO_MORE_DOCS {
                break;
            }
            let freq = self.phrase_freq()?;
            if freq > 0.0 {
                self.freq = freq;
                self.doc = doc;
                return Ok(doc);
            }
            doc = self.lead().next()?;
        }
        self.freq = 0.0;
        self.doc = NO_MORE_DOCS;
        Ok(NO_MORE_DOCS)
    }

    fn phrase_freq(&mut self) -> Result<f32> {
        let mut positions = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            positions.push(slot.positions()?);
        }
        let offsets: Vec<u32> = self.slots.iter().map(|s| s.offset).collect();
        Ok(if self.slop == 0 {
            exact_freq(&offsets, &positions)
        } else {
            sloppy_freq(&offsets, &positions, self.slop)
        })
    }
}

/// Number of start positions from which every slot chains exactly.
fn exact_freq(offsets: &[u32], positions: &[Vec<TermPosition>]) -> f32 {
    fn chains(i: usize, prev: TermPosition, offsets: &[u32], positions: &[Vec<TermPosition>]) -> bool {
        if i == positions.len() {
            return true;
        }
        let gap = offsets[i] - offsets[i - 1];
        let expected = prev.position + prev.length + gap.saturating_sub(1);
        positions[i]
            .iter()
            .filter(|p| p.position == expected)
            .any(|p| chains(i + 1, *p, offsets, positions))
    }

    positions[0]
        .iter()
        .filter(|start| chains(1, **start, offsets, positions))
        .count() as f32
}

/// Sum of `1 / (1 + spread)` over the windows within `slop`, one window per
/// distinct start.
///
/// Two slots never share one occurrence, so a repeated term needs as many
/// distinct positions as it has slots.
fn sloppy_freq(offsets: &[u32], positions: &[Vec<TermPosition>], slop: u32) -> f32 {
    let normalized: Vec<Vec<i64>> = positions
        .iter()
        .zip(offsets)
        .map(|(ps, offset)| {
            let mut v: Vec<i64> = ps
                .iter()
                .map(|p| p.position as i64 - *offset as i64)
                .collect();
            v.sort_unstable();
            v.dedup();
            v
        })
        .collect();
    if normalized.iter().any(Vec::is_empty) {
        return 0.0;
    }
    let offsets: Vec<i64> = offsets.iter().map(|o| *o as i64).collect();

    let mut starts: Vec<i64> = normalized.iter().flatten().copied().collect();
    starts.sort_unstable();
    starts.dedup();

    let mut window = vec![0i64; normalized.len()];
    let mut freq = 0.0;
    'starts: for low in starts {
        // the closest occurrence at or after `low` in every slot
        for (slot, values) in normalized.iter().enumerate() {
            let at = values.partition_point(|v| *v < low);
            let Some(value) = values.get(at) else {
                break 'starts;
            };
            window[slot] = *value;
        }
        let high = window.iter().copied().max().unwrap_or(low);
        if high - low > slop as i64 {
            continue;
        }
        let spread = if distinct_positions(&window, &offsets) {
            Some(high - low)
        } else {
            tightest_distinct_window(&normalized, &offsets, low, slop)
        };
        if let Some(spread) = spread {
            freq += 1.0 / (1.0 + spread as f32);
        }
    }
    freq
}

fn distinct_positions(window: &[i64], offsets: &[i64]) -> bool {
    window.iter().zip(offsets).enumerate().all(|(i, (v, o))| {
        window[..i]
            .iter()
            .zip(offsets)
            .all(|(w, p)| w + p != v + o)
    })
}

/// Smallest spread of an assignment that starts at `low`, stays within
/// `low + slop` and gives every slot its own absolute position.
fn tightest_distinct_window(
    normalized: &[Vec<i64>],
    offsets: &[i64],
    low: i64,
    slop: u32,
) -> Option<i64> {
    let high = low + slop as i64;
    let mut candidates: Vec<(usize, Vec<i64>)> = Vec::with_capacity(normalized.len());
    for (slot, values) in normalized.iter().enumerate() {
        let in_range: Vec<i64> = values
            .iter()
            .copied()
            .filter(|v| (low..=high).contains(v))
            .collect();
        if in_range.is_empty() {
            return None;
        }
        candidates.push((slot, in_range));
    }
    candidates.sort_by_key(|(_, values)| values.len());

    fn search(
        candidates: &[(usize, Vec<i64>)],
        offsets: &[i64],
        low: i64,
        taken: &mut Vec<i64>,
        bounds: (i64, i64),
        best: &mut Option<i64>,
    ) {
        let Some(((slot, values), rest)) = candidates.split_first() else {
            if bounds.0 == low && best.is_none_or(|b| bounds.1 - low < b) {
                *best = Some(bounds.1 - low);
            }
            return;
        };
        for value in values {
            let absolute = value + offsets[*slot];
            if taken.contains(&absolute) {
                continue;
            }
            let bounds = (bounds.0.min(*value), bounds.1.max(*value));
            if best.is_some_and(|b| bounds.1 - low >= b) {
                continue;
            }
            taken.push(absolute);
            search(rest, offsets, low, taken, bounds, best);
            taken.pop();
        }
    }

    let mut best = None;
    let mut taken = Vec::with_capacity(candidates.len());
    search(&candidates, offsets, low, &mut taken, (i64::MAX, i64::MIN), &mut best);
    best
}

impl Scorer for PhraseScorer<'_> {
    fn doc(&self) -> u32 {
        self.doc
    }

    fn next(&mut self) -> Result<u32> {
        if self.started && self.doc == NO_MORE_DOCS {
            return Ok(NO_MORE_DOCS);
        }
        self.started = true;
        let doc = self.lead().next()?;
        self.find_match(doc)
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        if self.started && self.doc >= target {
            return Ok(self.doc);
        }
        self.started = true;
        let doc = self.lead().advance(target)?;
        self.find_match(doc)
    }

    fn score(&mut self) -> Result<f32> {
        Ok(self.sim.score(self.freq, field_length(self.field, self.doc)))
    }

    fn cost(&self) -> u64 {
        self.order
            .first()
            .map_or(0, |&lead| self.slots[lead].cost())
    }
}
