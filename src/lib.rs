//! Constraint-based crossword filling.
//!
//! A structure template is parsed into a [`Grid`], the grid is scanned for
//! slots and their crossings, and [`solve`] prunes each slot's candidate
//! words with node and arc consistency before searching for a complete fill
//! with backtracking.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::{debug, trace};
use smallvec::SmallVec;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a slot, based on its index in the puzzle's slot list.
pub type SlotId = usize;

/// An identifier for a word, based on its index in the vocabulary.
pub type WordId = usize;

/// Zero-indexed (row, column) coords for a cell, where row 0 is the top row.
pub type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// Errors produced while parsing a structure template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum GridError {
    /// All rows of a structure must be the same width.
    #[display("row {row} is {found} cells wide, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    /// The structure contained no rows at all.
    #[display("structure has no rows")]
    Empty,
}

/// A rectangular puzzle shape: fixed height and width, and a flag per cell
/// recording whether it can hold a letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    height: usize,
    width: usize,
    fillable: Vec<bool>,
}

impl Grid {
    /// Parse a structure template, with `#` representing blocked cells and
    /// `.` or `_` representing fillable cells. Lines are trimmed and blank
    /// lines are skipped, so templates can be indented freely.
    pub fn parse(template: &str) -> Result<Grid, GridError> {
        let rows: Vec<&str> = template
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        if rows.is_empty() {
            return Err(GridError::Empty);
        }

        let width = rows[0].chars().count();
        let mut fillable = Vec::with_capacity(rows.len() * width);

        for (row, line) in rows.iter().enumerate() {
            let cells: Vec<char> = line.chars().collect();
            if cells.len() != width {
                return Err(GridError::RaggedRow {
                    row,
                    found: cells.len(),
                    expected: width,
                });
            }
            fillable.extend(cells.iter().map(|&cell| cell == '.' || cell == '_'));
        }

        Ok(Grid {
            height: rows.len(),
            width,
            fillable,
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Whether the cell at the given coords can hold a letter.
    pub fn is_fillable(&self, (row, col): GridCoord) -> bool {
        self.fillable[row * self.width + col]
    }
}

/// A maximal run of fillable cells in one direction. Two slots are the same
/// slot exactly when they share a start cell, direction, and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub start: GridCoord,
    pub direction: Direction,
    pub length: usize,
}

impl Slot {
    /// The coords of the idx-th cell of this slot.
    pub fn cell(&self, idx: usize) -> GridCoord {
        match self.direction {
            Direction::Across => (self.start.0, self.start.1 + idx),
            Direction::Down => (self.start.0 + idx, self.start.1),
        }
    }

    fn cells(&self) -> impl Iterator<Item = GridCoord> + '_ {
        (0..self.length).map(|idx| self.cell(idx))
    }
}

/// Scan one line of cells for maximal fillable runs, reporting each run of
/// length at least 2 to the callback as (start index, length).
fn scan_runs(open: impl Iterator<Item = bool>, mut emit: impl FnMut(usize, usize)) {
    let mut run_start = None;

    // A trailing blocked cell flushes the final run.
    for (idx, open) in open.chain(std::iter::once(false)).enumerate() {
        match (open, run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                if idx - start >= 2 {
                    emit(start, idx - start);
                }
                run_start = None;
            }
            _ => {}
        }
    }
}

/// The slots of a grid together with their crossing structure: for every
/// pair of slots whose cell runs intersect in exactly one cell, the offset
/// of that cell into each slot. Computed once per grid and read-only
/// afterward.
#[derive(Debug)]
pub struct Puzzle {
    slots: Vec<Slot>,
    overlaps: HashMap<(SlotId, SlotId), (usize, usize)>,
    neighbors: Vec<SmallVec<[SlotId; MAX_SLOT_LENGTH]>>,
}

impl Puzzle {
    /// Derive the slot set and overlap index from a grid. Rows are scanned
    /// for across slots first, then columns for down slots; single isolated
    /// fillable cells are not slots.
    pub fn build(grid: &Grid) -> Puzzle {
        let mut slots = Vec::new();

        for row in 0..grid.height() {
            scan_runs(
                (0..grid.width()).map(|col| grid.is_fillable((row, col))),
                |start, length| {
                    slots.push(Slot {
                        start: (row, start),
                        direction: Direction::Across,
                        length,
                    });
                },
            );
        }
        for col in 0..grid.width() {
            scan_runs(
                (0..grid.height()).map(|row| grid.is_fillable((row, col))),
                |start, length| {
                    slots.push(Slot {
                        start: (start, col),
                        direction: Direction::Down,
                        length,
                    });
                },
            );
        }

        // One uniform intersection test covers every pair; no per-cell
        // enumeration of edges and corners.
        let mut overlaps = HashMap::new();
        let mut neighbors = vec![SmallVec::new(); slots.len()];

        for x in 0..slots.len() {
            for y in x + 1..slots.len() {
                if let Some((ox, oy)) = intersection(&slots[x], &slots[y]) {
                    overlaps.insert((x, y), (ox, oy));
                    overlaps.insert((y, x), (oy, ox));
                    neighbors[x].push(y);
                    neighbors[y].push(x);
                }
            }
        }

        Puzzle {
            slots,
            overlaps,
            neighbors,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The offsets at which two slots share a cell, or `None` if their runs
    /// do not intersect. Symmetric: `overlap(x, y)` and `overlap(y, x)`
    /// describe the same cell with the offsets swapped.
    pub fn overlap(&self, x: SlotId, y: SlotId) -> Option<(usize, usize)> {
        self.overlaps.get(&(x, y)).copied()
    }

    /// The slots sharing an overlap with the given slot. A slot never has
    /// more neighbors than it has cells.
    pub fn neighbors(&self, slot: SlotId) -> &[SlotId] {
        &self.neighbors[slot]
    }
}

/// The single shared cell of two slots, as an offset into each, if their
/// cell runs intersect in exactly one cell.
fn intersection(x: &Slot, y: &Slot) -> Option<(usize, usize)> {
    let mut found = None;

    for (ox, cell) in x.cells().enumerate() {
        if let Some(oy) = y.cells().position(|other| other == cell) {
            if found.is_some() {
                // Runs sharing more than one cell carry no single-letter
                // constraint.
                return None;
            }
            found = Some((ox, oy));
        }
    }

    found
}

/// A candidate word with its letters cached for O(1) access by cell offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    text: String,
    letters: SmallVec<[char; MAX_SLOT_LENGTH]>,
}

impl Word {
    fn new(text: String) -> Word {
        let letters = text.chars().collect();
        Word { text, letters }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.letters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }

    fn letter(&self, idx: usize) -> Option<char> {
        self.letters.get(idx).copied()
    }
}

/// The immutable word list candidates are drawn from. Construction sorts
/// and deduplicates the words, which pins the iteration order and makes
/// repeated solves of the same puzzle return the same fill.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: Vec<Word>,
}

impl Vocabulary {
    pub fn new(words: impl IntoIterator<Item = String>) -> Vocabulary {
        let mut texts: Vec<String> = words.into_iter().collect();
        texts.sort();
        texts.dedup();

        Vocabulary {
            words: texts.into_iter().map(Word::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, id: WordId) -> &Word {
        &self.words[id]
    }
}

/// The current candidate set for every slot. Domains start as the full
/// vocabulary and only ever shrink; each slot owns an independent copy, so
/// pruning one slot never aliases into another. The store is passed by
/// reference to the consistency engine and the search, which keeps
/// alternate snapshots possible for callers that want to propagate
/// speculatively.
#[derive(Debug, Clone)]
pub struct Domains {
    candidates: Vec<Vec<WordId>>,
}

impl Domains {
    /// Map every slot of the puzzle to the entire vocabulary.
    pub fn new(puzzle: &Puzzle, vocab: &Vocabulary) -> Domains {
        let all: Vec<WordId> = (0..vocab.len()).collect();

        Domains {
            candidates: puzzle.slots().iter().map(|_| all.clone()).collect(),
        }
    }

    /// The remaining candidates for a slot, in ascending word id order.
    pub fn candidates(&self, slot: SlotId) -> &[WordId] {
        &self.candidates[slot]
    }

    /// Delete one word from a slot's domain.
    pub fn remove(&mut self, slot: SlotId, word: WordId) {
        self.candidates[slot].retain(|&other| other != word);
    }

    /// Remove every candidate the predicate rejects, reporting whether any
    /// removal occurred. This is the revision signal arc consistency keys
    /// on.
    pub fn filter(&mut self, slot: SlotId, mut keep: impl FnMut(WordId) -> bool) -> bool {
        let before = self.candidates[slot].len();
        self.candidates[slot].retain(|&word| keep(word));
        self.candidates[slot].len() != before
    }

    /// The set of letters the slot's remaining candidates admit at one
    /// cell.
    fn letters_at(&self, vocab: &Vocabulary, slot: SlotId, cell_idx: usize) -> HashSet<char> {
        self.candidates[slot]
            .iter()
            .filter_map(|&word| vocab.word(word).letter(cell_idx))
            .collect()
    }
}

/// Drop every candidate whose length differs from its slot's length.
/// Running this twice removes nothing the second time.
pub fn enforce_node_consistency(puzzle: &Puzzle, vocab: &Vocabulary, domains: &mut Domains) {
    for (slot_id, slot) in puzzle.slots().iter().enumerate() {
        domains.filter(slot_id, |word| vocab.word(word).len() == slot.length);
    }
}

/// Make `x` arc consistent with `y` by removing every candidate of `x` with
/// no supporting candidate in `y` at the shared cell. Returns whether the
/// domain of `x` changed. Arcs between slots that do not overlap revise
/// nothing.
fn revise(
    puzzle: &Puzzle,
    vocab: &Vocabulary,
    domains: &mut Domains,
    x: SlotId,
    y: SlotId,
) -> bool {
    let (ox, oy) = match puzzle.overlap(x, y) {
        Some(offsets) => offsets,
        None => return false,
    };

    // Collecting the letters y still admits at the shared cell makes the
    // support test a set lookup instead of a scan of y's domain per word.
    let support = domains.letters_at(vocab, y, oy);

    domains.filter(x, |word| {
        vocab
            .word(word)
            .letter(ox)
            .map_or(false, |letter| support.contains(&letter))
    })
}

/// Enforce arc consistency over the given arcs with an AC-3 work queue,
/// defaulting to every neighboring pair in both directions. Revising a slot
/// re-enqueues the arcs from its other neighbors, since shrinking a domain
/// can invalidate support that held earlier. Returns `false` as soon as any
/// domain empties, meaning the puzzle is unsatisfiable; `true` means every
/// remaining candidate has support in every neighboring domain.
pub fn enforce_arc_consistency(
    puzzle: &Puzzle,
    vocab: &Vocabulary,
    domains: &mut Domains,
    arcs: Option<Vec<(SlotId, SlotId)>>,
) -> bool {
    let mut queue: VecDeque<(SlotId, SlotId)> = match arcs {
        Some(arcs) => arcs.into(),
        None => (0..puzzle.slot_count())
            .flat_map(|x| puzzle.neighbors(x).iter().map(move |&y| (x, y)))
            .collect(),
    };

    while let Some((x, y)) = queue.pop_front() {
        if !revise(puzzle, vocab, domains, x, y) {
            continue;
        }
        trace!(
            "revised slot {x} against slot {y}, {} candidates left",
            domains.candidates(x).len()
        );

        if domains.candidates(x).is_empty() {
            debug!("arc consistency emptied slot {x}, puzzle is unsatisfiable");
            return false;
        }

        for &z in puzzle.neighbors(x) {
            if z != y {
                queue.push_back((z, x));
            }
        }
    }

    true
}

/// Counters describing one search run.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// Live state of one backtracking search over a pruned domain store.
struct Search<'a> {
    puzzle: &'a Puzzle,
    vocab: &'a Vocabulary,
    domains: &'a Domains,
    chosen: Vec<Option<WordId>>,
    used: BitSet,
    assigned_count: usize,
    statistics: Statistics,
}

impl<'a> Search<'a> {
    fn new(puzzle: &'a Puzzle, vocab: &'a Vocabulary, domains: &'a Domains) -> Search<'a> {
        Search {
            puzzle,
            vocab,
            domains,
            chosen: vec![None; puzzle.slot_count()],
            used: BitSet::with_capacity(vocab.len()),
            assigned_count: 0,
            statistics: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    /// Whether the current assignment violates any constraint: every chosen
    /// word must match its slot's length, all chosen words must be
    /// distinct, and every assigned pair of crossing slots must agree on
    /// the shared letter. Unassigned slots constrain nothing. This check is
    /// the sole correctness gate of the search; the ordering heuristics
    /// only affect how quickly a fill is found.
    fn consistent(&self) -> bool {
        let assigned: Vec<(SlotId, WordId)> = self
            .chosen
            .iter()
            .enumerate()
            .filter_map(|(slot, word)| word.map(|word| (slot, word)))
            .collect();

        for (idx, &(slot, word)) in assigned.iter().enumerate() {
            if self.vocab.word(word).len() != self.puzzle.slots()[slot].length {
                return false;
            }

            for &(other_slot, other_word) in &assigned[idx + 1..] {
                if word == other_word {
                    return false;
                }
                if let Some((ox, oy)) = self.puzzle.overlap(slot, other_slot) {
                    if self.vocab.word(word).letter(ox) != self.vocab.word(other_word).letter(oy)
                    {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Pick the unassigned slot with the fewest remaining candidates,
    /// breaking ties toward the slot with the most neighbors. Remaining
    /// ties fall to the lowest slot id, so selection is stable within a
    /// run.
    fn select_slot(&self) -> SlotId {
        (0..self.puzzle.slot_count())
            .filter(|&slot| self.chosen[slot].is_none())
            .min_by_key(|&slot| {
                (
                    self.domains.candidates(slot).len(),
                    Reverse(self.puzzle.neighbors(slot).len()),
                )
            })
            .expect("selecting a slot with every slot assigned?")
    }

    /// Order a slot's candidates by how many candidates each would
    /// eliminate from the domains of unassigned neighboring slots, least
    /// constraining first. A neighbor's word is eliminated when it is
    /// identical to the candidate or disagrees at the shared cell; each
    /// eliminated word counts once. Counts are collected in a single pass
    /// per candidate before sorting, and the sort is stable, so equal
    /// counts keep domain order.
    fn order_candidates(&self, slot: SlotId) -> Vec<WordId> {
        let mut scored: Vec<(WordId, usize)> = self
            .domains
            .candidates(slot)
            .iter()
            .map(|&word| {
                let candidate = self.vocab.word(word);
                let mut eliminated = 0;

                for &neighbor in self.puzzle.neighbors(slot) {
                    if self.chosen[neighbor].is_some() {
                        continue;
                    }
                    let (ox, oy) = self
                        .puzzle
                        .overlap(slot, neighbor)
                        .expect("neighboring slots always share an overlap");

                    for &other in self.domains.candidates(neighbor) {
                        if other == word
                            || candidate.letter(ox) != self.vocab.word(other).letter(oy)
                        {
                            eliminated += 1;
                        }
                    }
                }

                (word, eliminated)
            })
            .collect();

        scored.sort_by_key(|&(_, eliminated)| eliminated);
        scored.into_iter().map(|(word, _)| word).collect()
    }

    /// Depth-first search for a complete consistent assignment. Failure at
    /// any depth undoes only the most recent tentative entry, so the cost
    /// of one backtrack is one slot, not a copy of the whole assignment.
    fn backtrack(&mut self) -> bool {
        if self.assigned_count == self.puzzle.slot_count() {
            return self.consistent();
        }

        self.statistics.states += 1;
        let slot = self.select_slot();

        for word in self.order_candidates(slot) {
            // A word may be placed in at most one slot, even when it would
            // fit several.
            if self.used.contains(word) {
                continue;
            }

            self.chosen[slot] = Some(word);
            self.used.insert(word);
            self.assigned_count += 1;

            if self.consistent() && self.backtrack() {
                return true;
            }

            self.chosen[slot] = None;
            self.used.remove(word);
            self.assigned_count -= 1;
        }

        self.statistics.backtracks += 1;
        false
    }
}

/// A complete slot-to-word mapping produced by [`solve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    entries: Vec<(Slot, String)>,
}

impl Assignment {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The word assigned to the given slot, if the slot is part of this
    /// assignment.
    pub fn word_for(&self, slot: &Slot) -> Option<&str> {
        self.entries
            .iter()
            .find(|(other, _)| other == slot)
            .map(|(_, word)| word.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Slot, &str)> {
        self.entries.iter().map(|(slot, word)| (slot, word.as_str()))
    }
}

/// Fill the grid with words from the vocabulary, or report that no fill
/// exists. Candidates are pruned with node consistency and arc consistency
/// first; backtracking search runs over whatever survives. `None` means
/// the puzzle is unsatisfiable, which is an ordinary result and not an
/// error.
pub fn solve(grid: &Grid, vocab: &Vocabulary) -> Option<Assignment> {
    let puzzle = Puzzle::build(grid);
    let mut domains = Domains::new(&puzzle, vocab);

    enforce_node_consistency(&puzzle, vocab, &mut domains);
    if !enforce_arc_consistency(&puzzle, vocab, &mut domains, None) {
        return None;
    }
    debug!(
        "{} slots arc consistent, smallest domain {:?}",
        puzzle.slot_count(),
        (0..puzzle.slot_count())
            .map(|slot| domains.candidates(slot).len())
            .min()
    );

    let start = Instant::now();
    let mut search = Search::new(&puzzle, vocab, &domains);
    let solved = search.backtrack();
    search.statistics.duration = start.elapsed();
    debug!("search finished: {:?}", search.statistics);

    if !solved {
        return None;
    }

    let entries = search
        .chosen
        .iter()
        .enumerate()
        .map(|(slot_id, word)| {
            let word = word.expect("search reported success with an unassigned slot?");
            (puzzle.slots()[slot_id], vocab.word(word).text().to_string())
        })
        .collect();

    Some(Assignment { entries })
}

/// Project an assignment onto grid coordinates: one optional letter per
/// cell, `None` for blocked and unfilled cells.
pub fn render(assignment: &Assignment, grid: &Grid) -> Vec<Vec<Option<char>>> {
    let mut letters = vec![vec![None; grid.width()]; grid.height()];

    for (slot, word) in assignment.iter() {
        for (idx, letter) in word.chars().enumerate() {
            let (row, col) = slot.cell(idx);
            letters[row][col] = Some(letter);
        }
    }

    letters
}

/// Render an assignment as a text grid, with `█` for blocked cells and a
/// space for any fillable cell no slot covers.
pub fn render_text(assignment: &Assignment, grid: &Grid) -> String {
    let letters = render(assignment, grid);
    let mut out = String::new();

    for row in 0..grid.height() {
        for col in 0..grid.width() {
            if grid.is_fillable((row, col)) {
                out.push(letters[row][col].unwrap_or(' '));
            } else {
                out.push('█');
            }
        }
        out.push('\n');
    }

    out
}
