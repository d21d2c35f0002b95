use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::config::BufferPoolConfig;
use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Bookkeeping for one frame. The page contents live behind the frame's own
/// page latch; everything here is guarded by the pool mutex.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

struct PoolInner {
    metas: Vec<FrameMeta>,
    free_list: VecDeque<FrameId>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
}

/// BufferPoolManager mediates all access to on-disk pages through a fixed
/// array of in-memory frames.
///
/// One pool mutex covers frame metadata, the free list and the page table so
/// the residency invariant (a page is resident iff the page table maps it,
/// and pin_count > 0 iff the frame is not evictable) is updated atomically.
/// Page latches are per-frame and independent of the pool mutex; taking a
/// page latch while holding the pool mutex is permitted, never the reverse.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    inner: Mutex<PoolInner>,
    replacer: LruKReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        config: BufferPoolConfig,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(config, disk_manager))
    }

    pub fn with_disk_manager(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let mut pages = Vec::with_capacity(config.pool_size);
        let mut metas = Vec::with_capacity(config.pool_size);
        let mut free_list = VecDeque::with_capacity(config.pool_size);

        for frame_id in 0..config.pool_size {
            pages.push(Arc::new(parking_lot::RwLock::new(Page::new(
                INVALID_PAGE_ID,
            ))));
            metas.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size: config.pool_size,
            pages,
            inner: Mutex::new(PoolInner {
                metas,
                free_list,
                page_table: ExtendibleHashTable::new(config.bucket_size),
            }),
            replacer: LruKReplacer::new(config.pool_size, config.replacer_k),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a brand-new page, install it pinned in a frame, and return a
    /// guard over it. Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(self: &Arc<Self>) -> Result<PageGuard, BufferPoolError> {
        let page_id = self.disk_manager.allocate_page()?;

        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        {
            let mut page = self.pages[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }

        let meta = &mut inner.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        log::debug!("new page {} bound to frame {}", page_id, frame_id);
        Ok(PageGuard::new(
            Arc::clone(self),
            Arc::clone(&self.pages[frame_id]),
            page_id,
        ))
    }

    /// Fetch a page into the pool (reading from disk if it is not resident),
    /// pin it, and return a guard over it.
    pub fn fetch_page(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            inner.metas[frame_id].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(PageGuard::new(
                Arc::clone(self),
                Arc::clone(&self.pages[frame_id]),
                page_id,
            ));
        }

        let frame_id = self.acquire_frame(&mut inner)?;

        {
            let mut page = self.pages[frame_id].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // Put the frame back before surfacing the error
                page.reset();
                drop(page);
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        let meta = &mut inner.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(PageGuard::new(
            Arc::clone(self),
            Arc::clone(&self.pages[frame_id]),
            page_id,
        ))
    }

    /// Fetch a page and take its shared latch
    pub fn fetch_page_read(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<ReadPageGuard, BufferPoolError> {
        Ok(self.fetch_page(page_id)?.upgrade_read())
    }

    /// Fetch a page and take its exclusive latch
    pub fn fetch_page_write(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<WritePageGuard, BufferPoolError> {
        Ok(self.fetch_page(page_id)?.upgrade_write())
    }

    /// Allocate a new page and take its exclusive latch
    pub fn new_page_write(self: &Arc<Self>) -> Result<WritePageGuard, BufferPoolError> {
        Ok(self.new_page()?.upgrade_write())
    }

    /// Drop one pin on a page. The dirty flag is sticky: `is_dirty` is OR-ed
    /// into the frame's flag. When the pin count reaches zero the frame
    /// becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let meta = &mut inner.metas[frame_id];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;

        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        Ok(())
    }

    /// Write a page back to disk unconditionally and clear its dirty flag.
    ///
    /// The page is pinned across the write so it cannot be evicted, and its
    /// shared latch is taken only after the pool mutex is released: blocking
    /// on a page latch while holding the pool mutex could deadlock against a
    /// latch holder waiting to fetch.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot flush the invalid page id".to_string(),
            ));
        }

        let (frame_id, page) = {
            let mut inner = self.inner.lock();
            let frame_id = inner
                .page_table
                .find(&page_id)
                .ok_or(BufferPoolError::PageNotFound(page_id))?;
            inner.metas[frame_id].pin_count += 1;
            self.replacer.set_evictable(frame_id, false);
            (frame_id, Arc::clone(&self.pages[frame_id]))
        };

        let result = {
            let page = page.read();
            self.disk_manager.write_page(&page)
        };

        let mut inner = self.inner.lock();
        let meta = &mut inner.metas[frame_id];
        meta.pin_count -= 1;
        if result.is_ok() {
            meta.is_dirty = false;
        }
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        result.map_err(Into::into)
    }

    /// Flush every resident page with a valid id
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let inner = self.inner.lock();
            inner
                .metas
                .iter()
                .map(|meta| meta.page_id)
                .filter(|&page_id| page_id != INVALID_PAGE_ID)
                .collect()
        };

        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Evicted in the meantime, which already wrote it back
                Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Evict a page from the pool and return its frame to the free list.
    /// Deleting a page that is not resident succeeds; deleting a pinned page
    /// is refused.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(()),
        };

        if inner.metas[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        inner.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        self.pages[frame_id].write().reset();
        inner.metas[frame_id].reset();
        inner.free_list.push_back(frame_id);

        log::debug!("deleted page {} from frame {}", page_id, frame_id);
        Ok(())
    }

    /// Find a frame to hold a page: free list first, else evict the
    /// replacer's victim, flushing it if dirty and unbinding it from the
    /// page table.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(BufferPoolError::BufferPoolFull)?;
        let meta = &mut inner.metas[frame_id];
        debug_assert_eq!(meta.pin_count, 0, "evicted a pinned frame");

        if meta.page_id != INVALID_PAGE_ID {
            if meta.is_dirty {
                let page = self.pages[frame_id].read();
                if let Err(e) = self.disk_manager.write_page(&page) {
                    drop(page);
                    // Leave the victim resident and evictable so a later
                    // allocation can retry the write-back
                    self.replacer.record_access(frame_id);
                    self.replacer.set_evictable(frame_id, true);
                    return Err(e.into());
                }
                log::debug!("flushed dirty page {} on eviction", meta.page_id);
            }
            let old_page_id = meta.page_id;
            inner.page_table.remove(&old_page_id);
        }

        self.pages[frame_id].write().reset();
        inner.metas[frame_id].reset();
        Ok(frame_id)
    }

    /// Pin count of a resident page; test and diagnostics hook
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        let frame_id = inner.page_table.find(&page_id)?;
        Some(inner.metas[frame_id].pin_count)
    }

    /// Number of currently evictable frames
    pub fn evictable_count(&self) -> usize {
        self.replacer.size()
    }
}
