//! Paged bump allocation for calltree storage.
//!
//! Every node, dense-metric slice and sparse-metric entry of a location lives
//! in an [`Arena`]. Objects are never freed one by one; the only teardown is
//! [`Arena::release_all`], which returns all pages to the shared
//! [`PageBudget`]. Pages never grow after creation, so an index handed out
//! once stays valid until the arena is released.

use std::ops::{Index, IndexMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ProfileConfig;
use crate::error::{ProfileError, ProfileResult};

/// Page accounting shared by all arenas of one profile.
#[derive(Debug)]
pub struct PageBudget {
    limit: usize,
    page_size: usize,
    used: AtomicUsize,
}

impl PageBudget {
    pub fn new(config: &ProfileConfig) -> Arc<Self> {
        Self::with_limit(config.max_pages(), config.page_size)
    }

    /// Budget of exactly `limit` pages; handy for reproducing exhaustion.
    pub fn with_limit(limit: usize, page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            page_size: page_size.max(1),
            used: AtomicUsize::new(0),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used_pages(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    fn acquire(&self, pages: usize) -> ProfileResult<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(pages).filter(|next| *next <= self.limit)
            })
            .map(|_| ())
            .map_err(|_| ProfileError::ArenaExhausted {
                limit: self.limit,
                page_size: self.page_size,
            })
    }

    fn release(&self, pages: usize) {
        // Saturating: a budget reset between acquire and release must not wrap.
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(pages))
            });
    }
}

/// Growable, bulk-freed storage of `T` values addressed by `u32` indices.
#[derive(Debug)]
pub struct Arena<T> {
    pages: Vec<Vec<T>>,
    per_page: usize,
    pages_per_block: usize,
    budget: Arc<PageBudget>,
}

impl<T> Arena<T> {
    pub fn new(budget: Arc<PageBudget>) -> Self {
        Self::with_min_run(budget, 1)
    }

    /// Arena whose pages can hold at least `min_run` contiguous values.
    pub fn with_min_run(budget: Arc<PageBudget>, min_run: usize) -> Self {
        let elem = std::mem::size_of::<T>().max(1);
        let per_page = (budget.page_size() / elem).max(min_run).max(1);
        let pages_per_block = (per_page * elem).div_ceil(budget.page_size());
        Self {
            pages: Vec::new(),
            per_page,
            pages_per_block,
            budget,
        }
    }

    fn new_page(&mut self) -> ProfileResult<()> {
        self.budget.acquire(self.pages_per_block)?;
        let mut page = Vec::new();
        if let Err(err) = page.try_reserve_exact(self.per_page) {
            self.budget.release(self.pages_per_block);
            return Err(err.into());
        }
        self.pages.push(page);
        Ok(())
    }

    fn room_in_last_page(&self) -> usize {
        self.pages
            .last()
            .map_or(0, |p| self.per_page - p.len())
    }

    fn next_index(&self) -> u32 {
        let page = self.pages.len().saturating_sub(1);
        let slot = self.pages.last().map_or(0, Vec::len);
        (page * self.per_page + slot) as u32
    }

    pub fn alloc(&mut self, value: T) -> ProfileResult<u32> {
        if self.room_in_last_page() == 0 {
            self.new_page()?;
        }
        let index = self.next_index();
        if let Some(page) = self.pages.last_mut() {
            page.push(value);
        }
        Ok(index)
    }

    /// Allocate `values` contiguously within one page; returns the first index.
    pub fn alloc_slice(&mut self, values: Vec<T>) -> ProfileResult<u32> {
        if values.is_empty() {
            return Ok(0);
        }
        if values.len() > self.per_page {
            return Err(ProfileError::Config(format!(
                "run of {} values exceeds arena page capacity {}",
                values.len(),
                self.per_page
            )));
        }
        if self.room_in_last_page() < values.len() {
            self.new_page()?;
        }
        let index = self.next_index();
        if let Some(page) = self.pages.last_mut() {
            page.extend(values);
        }
        Ok(index)
    }

    fn locate(&self, index: u32) -> (usize, usize) {
        let index = index as usize;
        (index / self.per_page, index % self.per_page)
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        let (page, slot) = self.locate(index);
        self.pages.get(page)?.get(slot)
    }

    pub fn slice(&self, index: u32, len: usize) -> &[T] {
        if len == 0 {
            return &[];
        }
        let (page, slot) = self.locate(index);
        &self.pages[page][slot..slot + len]
    }

    pub fn budget(&self) -> &Arc<PageBudget> {
        &self.budget
    }

    /// Number of values currently stored.
    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(Vec::is_empty)
    }

    /// Budget pages held by this arena.
    pub fn pages_in_use(&self) -> usize {
        self.pages.len() * self.pages_per_block
    }

    /// Drop every value and hand all pages back to the budget.
    pub fn release_all(&mut self) {
        let held = self.pages_in_use();
        self.pages.clear();
        self.budget.release(held);
    }
}

impl<T> Index<u32> for Arena<T> {
    type Output = T;

    fn index(&self, index: u32) -> &T {
        let (page, slot) = self.locate(index);
        &self.pages[page][slot]
    }
}

impl<T> IndexMut<u32> for Arena<T> {
    fn index_mut(&mut self, index: u32) -> &mut T {
        let (page, slot) = self.locate(index);
        &mut self.pages[page][slot]
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        self.release_all();
    }
}
