//! LRU page cache wrapping any `PageSource`. Thread-safe for concurrent
//! reader cursors; a fixed slot capacity is a ceiling, never a reservation,
//! so opening a schema never forces eviction of unrelated slots.

use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, trace};

use crate::error::Result;
use crate::page::source::{PageBuf, PageSource, PageStore};

struct Slot {
    bytes: Vec<u8>,
    /// Monotonically increasing touch counter; the slot with the smallest
    /// value is evicted first.
    last_used: u64,
}

struct Inner {
    slots: HashMap<u32, Slot>,
    clock: u64,
}

/// Wraps a `PageSource` with a bounded LRU of decoded page buffers.
pub struct CachedPageSource<S: PageSource> {
    inner: S,
    capacity: usize,
    state: Mutex<Inner>,
}

impl<S: PageSource> CachedPageSource<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        CachedPageSource {
            inner,
            capacity,
            state: Mutex::new(Inner {
                slots: HashMap::new(),
                clock: 0,
            }),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn evict_if_needed(state: &mut Inner, capacity: usize) {
        while state.slots.len() > capacity {
            let victim = state
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(pn, _)| *pn);
            if let Some(pn) = victim {
                trace!("page cache evicting page {pn}");
                state.slots.remove(&pn);
            } else {
                break;
            }
        }
    }
}

impl<S: PageSource> PageSource for CachedPageSource<S> {
    fn read_page(&self, page_number: u32) -> Result<PageBuf<'_>> {
        if self.capacity == 0 {
            return self.inner.read_page(page_number);
        }
        let mut state = self.state.lock().expect("page cache lock poisoned");
        state.clock += 1;
        let clock = state.clock;
        if let Some(slot) = state.slots.get_mut(&page_number) {
            slot.last_used = clock;
            return Ok(PageBuf::Owned(slot.bytes.clone()));
        }
        drop(state);

        let fresh = self.inner.read_page(page_number)?;
        let bytes = fresh.to_vec();
        debug!("page cache miss for page {page_number}, populating slot");

        let mut state = self.state.lock().expect("page cache lock poisoned");
        state.clock += 1;
        let clock = state.clock;
        Self::evict_if_needed(&mut state, self.capacity.saturating_sub(1));
        state.slots.insert(
            page_number,
            Slot {
                bytes: bytes.clone(),
                last_used: clock,
            },
        );
        Ok(PageBuf::Owned(bytes))
    }

    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }
}

impl<S: PageSource> CachedPageSource<S> {
    /// Drop a stale cache entry; called by writers after a page mutates so
    /// readers never observe cached pre-write bytes once invalidated.
    pub fn invalidate(&self, page_number: u32) {
        let mut state = self.state.lock().expect("page cache lock poisoned");
        state.slots.remove(&page_number);
    }
}

impl<S: PageStore> PageStore for CachedPageSource<S> {
    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        self.inner.write_page(page_number, bytes)?;
        self.invalidate(page_number);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32> {
        self.inner.allocate_page()
    }

    fn free_page(&mut self, page_number: u32) -> Result<()> {
        let result = self.inner.free_page(page_number);
        self.invalidate(page_number);
        result
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::source::MemoryPageSource;

    #[test]
    fn caches_and_returns_identical_bytes() {
        let mut mem = MemoryPageSource::empty(512, 4);
        let mut page = vec![3u8; 512];
        page[0] = 9;
        mem.write_page(2, &page).unwrap();
        let cached = CachedPageSource::new(mem, 2);
        let a = cached.read_page(2).unwrap().to_vec();
        let b = cached.read_page(2).unwrap().to_vec();
        assert_eq!(a, page);
        assert_eq!(a, b);
    }

    #[test]
    fn capacity_is_a_ceiling_not_a_reservation() {
        let mem = MemoryPageSource::empty(512, 10);
        let cached = CachedPageSource::new(mem, 3);
        for pn in 1..=10u32 {
            cached.read_page(pn).unwrap();
        }
        let state = cached.state.lock().unwrap();
        assert!(state.slots.len() <= 3);
    }

    #[test]
    fn invalidate_drops_the_slot() {
        let mem = MemoryPageSource::empty(512, 2);
        let cached = CachedPageSource::new(mem, 4);
        cached.read_page(1).unwrap();
        assert!(cached.state.lock().unwrap().slots.contains_key(&1));
        cached.invalidate(1);
        assert!(!cached.state.lock().unwrap().slots.contains_key(&1));
    }
}
