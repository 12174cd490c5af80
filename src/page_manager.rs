//! Keeps the pages of a partition ordered by age and hands out the active page.
//!
//! Pages live in an arena indexed by their sector. `page_list` holds the used pages ordered by
//! sequence number (oldest first, the last one is the active page), `free_list` the erased or
//! corrupted ones in the order they will be activated.

use crate::error::Error;
use crate::item::{CHUNK_ANY, Item, ItemType, NS_ANY};
use crate::page::{ENTRY_COUNT, Page, PageState};
use crate::partition::Partition;
use crate::platform::Platform;
use crate::{EntryStatistics, NvsStats, PageStatistics, PartitionStatistics};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

pub(crate) struct PageManager {
    pages: Vec<Page>,
    page_list: Vec<usize>,
    free_list: VecDeque<usize>,
    next_sequence: u32,
}

impl PageManager {
    /// Loads every sector and repairs the state an interrupted update or compaction left
    /// behind. Fails with `NoFreePages` if no erased page remains for compaction.
    pub(crate) fn load<T: Platform>(partition: &mut Partition<T>) -> Result<Self, Error> {
        #[cfg(feature = "defmt")]
        trace!("page manager: load");

        #[cfg(feature = "debug-logs")]
        println!("page_manager: load {} sectors", partition.sector_count());

        let sector_count = partition.sector_count();
        let mut manager = Self {
            pages: Vec::with_capacity(sector_count),
            page_list: Vec::with_capacity(sector_count),
            free_list: VecDeque::new(),
            next_sequence: 0,
        };

        for sector in 0..sector_count {
            let page = Page::load(partition, sector)?;
            match page.sequence() {
                Some(sequence) => {
                    let position = manager
                        .page_list
                        .iter()
                        .position(|&idx| manager.pages[idx].sequence().unwrap_or(0) > sequence)
                        .unwrap_or(manager.page_list.len());
                    manager.page_list.insert(position, sector);
                }
                None => manager.free_list.push_back(sector),
            }
            manager.pages.push(page);
        }

        match manager.page_list.last() {
            None => {
                manager.next_sequence = 0;
                manager.activate_page(partition)?;
            }
            Some(&last) => {
                manager.next_sequence = manager.pages[last].sequence().unwrap_or(0) + 1;
            }
        }

        manager.ensure_single_active_page(partition)?;
        manager.erase_last_item_duplicate(partition)?;
        manager.resume_freeing(partition)?;

        if manager.free_list.is_empty() {
            #[cfg(feature = "defmt")]
            warn!("no free pages left");

            return Err(Error::NoFreePages);
        }

        Ok(manager)
    }

    /// All active pages but the newest one are marked as full.
    fn ensure_single_active_page<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
    ) -> Result<(), Error> {
        let newest_active = self
            .page_list
            .iter()
            .rev()
            .copied()
            .find(|&idx| self.pages[idx].state() == PageState::Active);

        let Some(newest_active) = newest_active else {
            return Ok(());
        };

        for idx in self.page_list.clone() {
            if idx != newest_active && self.pages[idx].state() == PageState::Active {
                #[cfg(feature = "defmt")]
                warn!("duplicate active page, marking as full (sector {})", idx);

                self.pages[idx].mark_full(partition)?;
            }
        }

        Ok(())
    }

    /// If power went out after a new item was written but before the old one was erased, the
    /// last item of the newest page has an older duplicate on one of the earlier pages.
    fn erase_last_item_duplicate<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
    ) -> Result<(), Error> {
        let Some(&last) = self.page_list.last() else {
            return Ok(());
        };

        let mut last_item: Option<Item> = None;
        let mut cursor = 0;
        loop {
            match self.pages[last].find_item(
                partition,
                NS_ANY,
                ItemType::Any,
                None,
                CHUNK_ANY,
                None,
                &mut cursor,
            ) {
                Ok(item) => {
                    cursor += item.span as usize;
                    last_item = Some(item);
                }
                Err(Error::NotFound) => break,
                Err(e) => return Err(e),
            }
        }

        let Some(item) = last_item else {
            return Ok(());
        };

        let earlier = self.page_list[..self.page_list.len() - 1].to_vec();
        for idx in earlier {
            let page = &mut self.pages[idx];
            if page.state() == PageState::Freeing {
                continue;
            }
            match page.erase_item(
                partition,
                item.namespace_index,
                item.item_type,
                &item.key,
                item.chunk_index,
                None,
            ) {
                Ok(()) => {
                    #[cfg(feature = "defmt")]
                    warn!("erased duplicate of the last written item on sector {}", idx);

                    break;
                }
                Err(Error::NotFound | Error::TypeMismatch(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Finishes a compaction that was interrupted. The copy target is the newest active page,
    /// it is erased and the copy starts over on a fresh page.
    fn resume_freeing<T: Platform>(&mut self, partition: &mut Partition<T>) -> Result<(), Error> {
        let Some(position) = self
            .page_list
            .iter()
            .position(|&idx| self.pages[idx].state() == PageState::Freeing)
        else {
            return Ok(());
        };
        let freeing = self.page_list[position];

        #[cfg(feature = "defmt")]
        warn!("resuming compaction of sector {}", freeing);

        #[cfg(feature = "debug-logs")]
        println!("page_manager: resume freeing sector {freeing}");

        if let Some(&newest) = self.page_list.last()
            && newest != freeing
            && self.pages[newest].state() == PageState::Active
        {
            self.pages[newest].erase(partition)?;
            self.page_list.pop();
            self.free_list.push_back(newest);
        }

        self.activate_page(partition)?;
        let target = self.current()?;

        let (source, target) = pair_mut(&mut self.pages, freeing, target);
        source.copy_items(partition, target)?;
        source.erase(partition)?;

        self.page_list.retain(|&idx| idx != freeing);
        self.free_list.push_back(freeing);

        Ok(())
    }

    /// Makes room for a new active page. With at least two free pages one is simply
    /// activated, with the last free page the used page with the most unused entries is
    /// compacted into it and erased.
    pub(crate) fn request_new_page<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("request_new_page");

        #[cfg(feature = "debug-logs")]
        println!("page_manager: request_new_page, free pages: {}", self.free_list.len());

        if self.free_list.is_empty() {
            return Err(Error::InvalidState);
        }

        if self.free_list.len() >= 2 {
            return self.activate_page(partition);
        }

        let mut victim = None;
        let mut max_unused = 0;
        for &idx in &self.page_list {
            let unused = ENTRY_COUNT - self.pages[idx].used_entry_count();
            if unused > max_unused {
                victim = Some(idx);
                max_unused = unused;
            }
        }

        let Some(victim) = victim else {
            return Err(Error::NotEnoughSpace);
        };

        #[cfg(feature = "debug-logs")]
        println!("page_manager: compacting sector {victim}, {max_unused} unused entries");

        // activation writes the header, the victim has to be marked first to be resumable
        self.pages[victim].mark_freeing(partition)?;
        self.activate_page(partition)?;
        let target = self.current()?;

        let (source, target) = pair_mut(&mut self.pages, victim, target);
        source.copy_items(partition, target)?;
        source.erase(partition)?;

        self.page_list.retain(|&idx| idx != victim);
        self.free_list.push_back(victim);

        Ok(())
    }

    /// Takes the next free page, erasing it first if it is corrupted.
    fn activate_page<T: Platform>(&mut self, partition: &mut Partition<T>) -> Result<(), Error> {
        let Some(&idx) = self.free_list.front() else {
            return Err(Error::NotEnoughSpace);
        };

        let page = &mut self.pages[idx];
        if page.state() != PageState::Uninitialized {
            page.erase(partition)?;
        }
        page.initialize(partition, self.next_sequence)?;

        self.free_list.pop_front();
        self.page_list.push(idx);
        self.next_sequence += 1;

        Ok(())
    }

    /// Arena index of the active page.
    pub(crate) fn current(&self) -> Result<usize, Error> {
        self.page_list.last().copied().ok_or(Error::InvalidState)
    }

    /// Used pages, oldest first.
    pub(crate) fn page_list(&self) -> &[usize] {
        &self.page_list
    }

    pub(crate) fn page(&self, idx: usize) -> &Page {
        &self.pages[idx]
    }

    pub(crate) fn page_mut(&mut self, idx: usize) -> &mut Page {
        &mut self.pages[idx]
    }

    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn fill_stats(&self, stats: &mut NvsStats) -> Result<(), Error> {
        for &idx in &self.page_list {
            self.pages[idx].calc_entries(stats)?;
        }

        stats.total_entries += self.free_list.len() * ENTRY_COUNT;
        stats.free_entries += self.free_list.len() * ENTRY_COUNT;

        Ok(())
    }

    /// Per page detail, ordered by sector.
    pub(crate) fn statistics(&self) -> PartitionStatistics {
        let mut pages = PageStatistics::default();
        let entries_per_page = self
            .pages
            .iter()
            .map(|page| {
                match page.state() {
                    PageState::Uninitialized => pages.empty += 1,
                    PageState::Active => pages.active += 1,
                    PageState::Full => pages.full += 1,
                    PageState::Freeing => pages.erasing += 1,
                    PageState::Corrupt | PageState::Invalid => pages.corrupted += 1,
                }
                page.entry_statistics()
            })
            .collect::<Vec<_>>();

        let entries_overall =
            entries_per_page
                .iter()
                .fold(EntryStatistics::default(), |acc, x| EntryStatistics {
                    empty: acc.empty + x.empty,
                    written: acc.written + x.written,
                    erased: acc.erased + x.erased,
                    illegal: acc.illegal + x.illegal,
                });

        PartitionStatistics {
            pages,
            entries_per_page,
            entries_overall,
        }
    }

    pub(crate) fn free_pages(&self) -> impl Iterator<Item = &Page> {
        self.free_list.iter().map(|&idx| &self.pages[idx])
    }
}

/// Two distinct pages of the arena at once.
fn pair_mut(pages: &mut [Page], a: usize, b: usize) -> (&mut Page, &mut Page) {
    assert_ne!(a, b);
    if a < b {
        let (left, right) = pages.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = pages.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
