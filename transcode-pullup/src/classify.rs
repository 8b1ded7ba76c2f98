//! Cadence classification.
//!
//! Two per-field judgements are made over the oldest queued fields:
//!
//! - **breaks**: a cadence cut between two neighbours, found where the
//!   temporal difference of one field is far larger than that of the next;
//! - **affinity**: whether a field combs less with its previous or its next
//!   neighbour, i.e. which one it was most likely scanned together with.
//!
//! [`decide_frame_length`] turns these into the number of fields (1 to 3)
//! that make up the next output frame. The thresholds (128, 64, 4x, 6x) are
//! empirical and must stay exactly as they are.

use crate::config::BreakStrictness;
use crate::queue::{Affinity, FieldRing};

/// Smallest `max_l + max_r` that counts as a break signal.
pub const BREAK_THRESHOLD: i32 = 128;

/// Smallest `max_l + max_r` that counts as an affinity signal.
pub const AFFINITY_THRESHOLD: i32 = 64;

/// How one-sided a break signal must be.
pub const BREAK_RATIO: i32 = 4;

/// How one-sided an affinity signal must be.
pub const AFFINITY_RATIO: i32 = 6;

/// Fields needed before a frame length can be decided.
pub const MIN_DECISION_FIELDS: usize = 4;

/// Classifier knobs taken from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassifierSettings {
    pub strict_breaks: BreakStrictness,
    pub strict_pairs: bool,
}

/// How [`compute_breaks`] settled a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakSource {
    /// Breaks were already computed for this field.
    Cached,
    /// A repeated field decided it without looking at metrics.
    DuplicateField,
    /// The temporal differences were scanned.
    Metrics,
}

/// Largest positive and largest negative excursion of `l` over all blocks.
fn excursions(values: impl Iterator<Item = i32>) -> (i32, i32) {
    values.fold((0, 0), |(max_l, max_r), l| (max_l.max(l), max_r.max(-l)))
}

/// Look for a cadence break inside the window `f0..=f3`.
///
/// A field repeated two slots later (same buffer) marks the break at once.
/// Otherwise the temporal differences of f2 and f3 are compared block by
/// block: a frame-wide, strongly one-sided excess marks a break left of f1
/// or right of f2.
pub fn compute_breaks(ring: &mut FieldRing, f0: usize) -> BreakSource {
    if ring.field(f0).class.has_breaks() {
        return BreakSource::Cached;
    }
    let f1 = ring.next(f0);
    let f2 = ring.next(f1);
    let f3 = ring.next(f2);

    let field = ring.field_mut(f0);
    field.class = field.class.with_breaks();

    let same02 = ring.field(f0).buffer() == ring.field(f2).buffer();
    let same13 = ring.field(f1).buffer() == ring.field(f3).buffer();
    if same02 && !same13 {
        ring.field_mut(f2).breaks.right = true;
        return BreakSource::DuplicateField;
    }
    if !same02 && same13 {
        ring.field_mut(f1).breaks.left = true;
        return BreakSource::DuplicateField;
    }

    let (max_l, max_r) = {
        let d2 = ring.field(f2).diffs();
        let d3 = ring.field(f3).diffs();
        excursions(d2.iter().zip(d3).map(|(a, b)| a - b))
    };

    // Mostly quantisation noise.
    if max_l + max_r < BREAK_THRESHOLD {
        return BreakSource::Metrics;
    }
    if max_l > BREAK_RATIO * max_r {
        ring.field_mut(f1).breaks.left = true;
    }
    if max_r > BREAK_RATIO * max_l {
        ring.field_mut(f2).breaks.right = true;
    }
    BreakSource::Metrics
}

/// Decide which neighbour field `f` pairs with.
///
/// Combing against each neighbour is de-biased by the vertical detail of
/// the two fields involved, so detailed regions need a stronger signal than
/// flat ones.
pub fn compute_affinity(ring: &mut FieldRing, f: usize) {
    if ring.field(f).class.has_affinity() {
        return;
    }
    let next = ring.next(f);
    let next2 = ring.next(next);

    let field = ring.field_mut(f);
    field.class = field.class.with_affinity();

    if ring.field(f).buffer() == ring.field(next2).buffer() {
        for (slot, affinity) in [
            (f, Affinity::Next),
            (next, Affinity::Neither),
            (next2, Affinity::Previous),
        ] {
            let field = ring.field_mut(slot);
            field.affinity = affinity;
            field.class = field.class.with_affinity();
        }
        return;
    }

    let (max_l, max_r) = {
        let this = ring.field(f);
        let left = ring.field(ring.prev(f));
        let right = ring.field(next);
        excursions((0..this.var.len()).map(|i| {
            let v = this.var[i];
            let lv = left.var[i];
            let rv = right.var[i];
            let lc = (this.comb[i] - (v + lv) + (v - lv).abs()).max(0);
            let rc = (right.comb[i] - (v + rv) + (v - rv).abs()).max(0);
            lc - rc
        }))
    };

    if max_l + max_r < AFFINITY_THRESHOLD {
        return;
    }
    let field = ring.field_mut(f);
    if max_r > AFFINITY_RATIO * max_l {
        field.affinity = Affinity::Previous;
    } else if max_l > AFFINITY_RATIO * max_r {
        field.affinity = Affinity::Next;
    }
}

/// Position (1-based) of the first break within `max` field boundaries
/// after `f`, or 0.
pub fn find_first_break(ring: &FieldRing, f: usize, max: usize) -> usize {
    let mut slot = f;
    for i in 0..max {
        let next = ring.next(slot);
        if ring.field(slot).breaks.right || ring.field(next).breaks.left {
            return i + 1;
        }
        slot = next;
    }
    0
}

/// Compute breaks and affinities over the queue.
///
/// The newest fields lack the neighbours the computations need, so breaks
/// stop three fields short of the end and affinity one short.
pub fn classify_queue(ring: &mut FieldRing) {
    let n = ring.len();
    let Some(mut slot) = ring.first() else {
        return;
    };
    for i in 0..n.saturating_sub(1) {
        if i + 3 < n {
            compute_breaks(ring, slot);
        }
        compute_affinity(ring, slot);
        slot = ring.next(slot);
    }
}

/// Classifier output for the oldest queued fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceWindow {
    /// Affinities of the first three queued fields.
    pub affinity: [Affinity; 3],
    /// First break position (0 to 3) after strictness is applied.
    pub first_break: usize,
    /// Right break on the slot just before the oldest field.
    pub break_before: bool,
    /// Left break on the third field.
    pub third_break_left: bool,
}

/// One entry of the frame length decision table.
pub struct LengthRule {
    pub name: &'static str,
    pub applies: fn(&CadenceWindow, &ClassifierSettings) -> bool,
    pub length: usize,
}

/// Length used when no rule applies: plain interlaced pairs.
pub const DEFAULT_LENGTH: usize = 2;

/// Frame length decision table, first match wins.
pub const LENGTH_RULES: &[LengthRule] = &[
    LengthRule {
        name: "first field leans back",
        applies: |w, _| w.affinity[0] == Affinity::Previous,
        length: 1,
    },
    LengthRule {
        name: "break after first, first two pair up",
        applies: |w, s| {
            w.first_break == 1
                && s.strict_breaks != BreakStrictness::Strict
                && w.affinity[0] == Affinity::Next
                && w.affinity[1] == Affinity::Previous
        },
        length: 2,
    },
    LengthRule {
        name: "break after first",
        applies: |w, _| w.first_break == 1,
        length: 1,
    },
    LengthRule {
        name: "isolated pair without corroboration",
        applies: |w, s| {
            w.first_break == 2
                && s.strict_pairs
                && w.break_before
                && w.third_break_left
                && (w.affinity[0] != Affinity::Next || w.affinity[1] != Affinity::Previous)
        },
        length: 1,
    },
    LengthRule {
        name: "break after second, second leans forward",
        applies: |w, _| w.first_break == 2 && w.affinity[1] == Affinity::Next,
        length: 1,
    },
    LengthRule {
        name: "break after second",
        applies: |w, _| w.first_break == 2,
        length: 2,
    },
    LengthRule {
        name: "break after third, third leans forward",
        applies: |w, _| w.first_break == 3 && w.affinity[2] == Affinity::Next,
        length: 2,
    },
    LengthRule {
        name: "break after third",
        applies: |w, _| w.first_break == 3,
        length: 3,
    },
    LengthRule {
        name: "second leans forward",
        applies: |w, _| w.first_break == 0 && w.affinity[1] == Affinity::Next,
        length: 1,
    },
    LengthRule {
        name: "second leans back",
        applies: |w, _| w.first_break == 0 && w.affinity[1] == Affinity::Previous,
        length: 2,
    },
    LengthRule {
        name: "third leans back, first leans forward",
        applies: |w, _| {
            w.first_break == 0
                && w.affinity[2] == Affinity::Previous
                && w.affinity[0] == Affinity::Next
        },
        length: 3,
    },
    LengthRule {
        name: "third leans back",
        applies: |w, _| w.first_break == 0 && w.affinity[2] == Affinity::Previous,
        length: 1,
    },
];

/// Evaluate the decision table.
pub fn select_length(window: &CadenceWindow, settings: &ClassifierSettings) -> (usize, &'static str) {
    LENGTH_RULES
        .iter()
        .find(|rule| (rule.applies)(window, settings))
        .map(|rule| (rule.length, rule.name))
        .unwrap_or((DEFAULT_LENGTH, "no signal"))
}

/// Classify the queue and build the decision window.
///
/// `None` while fewer than four fields are queued.
pub fn cadence_window(ring: &mut FieldRing, settings: &ClassifierSettings) -> Option<CadenceWindow> {
    if ring.len() < MIN_DECISION_FIELDS {
        return None;
    }
    classify_queue(ring);

    let f0 = ring.first()?;
    let f1 = ring.next(f0);
    let f2 = ring.next(f1);

    let mut first_break = find_first_break(ring, f0, 3);
    if first_break == 1 && settings.strict_breaks == BreakStrictness::Relaxed {
        first_break = 0;
    }

    Some(CadenceWindow {
        affinity: [
            ring.field(f0).affinity,
            ring.field(f1).affinity,
            ring.field(f2).affinity,
        ],
        first_break,
        break_before: ring.field(ring.prev(f0)).breaks.right,
        third_break_left: ring.field(f2).breaks.left,
    })
}

/// Number of queued fields forming the next frame; 0 if undecidable yet.
pub fn decide_frame_length(ring: &mut FieldRing, settings: &ClassifierSettings) -> usize {
    match cadence_window(ring, settings) {
        Some(window) => select_length(&window, settings).0,
        None => 0,
    }
}

/// Two-line rendering of affinities and breaks for the four oldest fields.
///
/// `+0.` leans back, `.0+` leans forward; `|` marks a break on that side.
pub fn cadence_strip(ring: &FieldRing) -> (String, String) {
    let mut affinity = String::new();
    let mut breaks = String::new();
    let Some(first) = ring.first() else {
        return (affinity, breaks);
    };

    let mut slot = first;
    for i in 0..MIN_DECISION_FIELDS {
        let field = ring.field(slot);
        let (l, r) = match field.affinity {
            Affinity::Previous => ('+', '.'),
            Affinity::Neither => ('.', '.'),
            Affinity::Next => ('.', '+'),
        };
        affinity.push_str(&format!("{l}{i}{r}"));

        let l = if field.breaks.left { '|' } else { '.' };
        let r = if field.breaks.right { '|' } else { '.' };
        breaks.push_str(&format!("{l}{i}{r}"));

        slot = ring.next(slot);
    }
    (affinity, breaks)
}
