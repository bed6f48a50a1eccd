//! Sparse metrics: user metrics that only occur on a few callpaths.
//!
//! Each node carries the head of an arena-backed singly linked list of
//! entries, one entry per metric handle.

use calltree_protocol::MetricHandle;

use crate::arena::Arena;
use crate::error::ProfileResult;

/// Behaviour shared by the integer and double entry types.
pub trait SparseEntry: Clone {
    type Value: Copy;

    fn new(metric: MetricHandle, value: Self::Value) -> Self;
    fn metric(&self) -> MetricHandle;
    fn next(&self) -> Option<u32>;
    fn set_next(&mut self, next: Option<u32>);
    fn update(&mut self, value: Self::Value);
    fn merge(&mut self, other: &Self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseInt {
    pub metric: MetricHandle,
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub squares: u64,
    next: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseDouble {
    pub metric: MetricHandle,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub squares: f64,
    next: Option<u32>,
}

impl SparseEntry for SparseInt {
    type Value = u64;

    fn new(metric: MetricHandle, value: u64) -> Self {
        Self {
            metric,
            count: 1,
            sum: value,
            min: value,
            max: value,
            squares: value.wrapping_mul(value),
            next: None,
        }
    }

    fn metric(&self) -> MetricHandle {
        self.metric
    }

    fn next(&self) -> Option<u32> {
        self.next
    }

    fn set_next(&mut self, next: Option<u32>) {
        self.next = next;
    }

    fn update(&mut self, value: u64) {
        self.count += 1;
        self.sum = self.sum.wrapping_add(value);
        self.squares = self.squares.wrapping_add(value.wrapping_mul(value));
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.sum = self.sum.wrapping_add(other.sum);
        self.squares = self.squares.wrapping_add(other.squares);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

impl SparseEntry for SparseDouble {
    type Value = f64;

    fn new(metric: MetricHandle, value: f64) -> Self {
        Self {
            metric,
            count: 1,
            sum: value,
            min: value,
            max: value,
            squares: value * value,
            next: None,
        }
    }

    fn metric(&self) -> MetricHandle {
        self.metric
    }

    fn next(&self) -> Option<u32> {
        self.next
    }

    fn set_next(&mut self, next: Option<u32>) {
        self.next = next;
    }

    fn update(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.squares += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.sum += other.sum;
        self.squares += other.squares;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Walk the list starting at `head`.
pub fn iter<E: SparseEntry>(arena: &Arena<E>, head: Option<u32>) -> impl Iterator<Item = &E> + '_ {
    std::iter::successors(head.map(|i| &arena[i]), move |e| e.next().map(|i| &arena[i]))
}

fn find<E: SparseEntry>(arena: &Arena<E>, head: Option<u32>, metric: MetricHandle) -> Option<u32> {
    let mut cur = head;
    while let Some(i) = cur {
        let entry = &arena[i];
        if entry.metric() == metric {
            return Some(i);
        }
        cur = entry.next();
    }
    None
}

/// Update the entry for `metric` in place, or prepend a new one.
pub fn add_or_accumulate<E: SparseEntry>(
    arena: &mut Arena<E>,
    head: &mut Option<u32>,
    metric: MetricHandle,
    value: E::Value,
) -> ProfileResult<()> {
    if let Some(i) = find(arena, *head, metric) {
        arena[i].update(value);
        return Ok(());
    }
    let mut entry = E::new(metric, value);
    entry.set_next(*head);
    *head = Some(arena.alloc(entry)?);
    Ok(())
}

/// Merge detached entries into the list: matching metrics are combined,
/// the rest are prepended as fresh copies.
pub fn merge_into<E: SparseEntry>(
    arena: &mut Arena<E>,
    head: &mut Option<u32>,
    entries: &[E],
) -> ProfileResult<()> {
    for source in entries {
        if let Some(i) = find(arena, *head, source.metric()) {
            arena[i].merge(source);
        } else {
            let mut entry = source.clone();
            entry.set_next(*head);
            *head = Some(arena.alloc(entry)?);
        }
    }
    Ok(())
}

/// Detached copies of every entry of a list, in list order.
pub fn collect<E: SparseEntry>(arena: &Arena<E>, head: Option<u32>) -> Vec<E> {
    iter(arena, head)
        .map(|e| {
            let mut e = e.clone();
            e.set_next(None);
            e
        })
        .collect()
}
