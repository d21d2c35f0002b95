use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

/// Scoped pin on a buffer pool page.
///
/// Construction pins the page; drop unpins it, OR-ing the accumulated dirty
/// flag into the frame. Guards are move-only; transferring ownership
/// invalidates the source by Rust's move semantics. The drop path never
/// propagates errors: an unpin failure is logged and swallowed.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    is_dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The page behind the guard; callers may take short-lived latches on it
    pub fn page(&self) -> &PagePtr {
        &self.page
    }

    /// Record that the holder wrote the page; sticky until release
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Take the page's shared latch without releasing the pin
    pub fn upgrade_read(self) -> ReadPageGuard {
        let latch = self.page.read_arc();
        ReadPageGuard { latch, base: self }
    }

    /// Take the page's exclusive latch without releasing the pin. The page
    /// is marked dirty on acquisition.
    pub fn upgrade_write(mut self) -> WritePageGuard {
        self.mark_dirty();
        let latch = self.page.write_arc();
        WritePageGuard { latch, base: self }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Err(e) = self.bpm.unpin_page(self.page_id, self.is_dirty) {
            log::error!("failed to unpin page {}: {}", self.page_id, e);
        }
    }
}

/// Pin plus shared latch. Field order matters: the latch is released before
/// the base guard unpins.
pub struct ReadPageGuard {
    latch: ArcRwLockReadGuard<RawRwLock, Page>,
    base: PageGuard,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.base.page_id()
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.data
    }

    pub fn page(&self) -> &Page {
        &*self.latch
    }
}

/// Pin plus exclusive latch; dirty from the moment of acquisition. The latch
/// is released before the base guard unpins.
pub struct WritePageGuard {
    latch: ArcRwLockWriteGuard<RawRwLock, Page>,
    base: PageGuard,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.base.page_id()
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.latch.data
    }

    pub fn page(&self) -> &Page {
        &*self.latch
    }

    pub fn page_mut(&mut self) -> &mut Page {
        &mut *self.latch
    }
}
