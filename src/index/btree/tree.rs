use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PageWriteGuard, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BPlusTreeIterator;
use crate::index::btree::node::{write_parent_pointer, BTreeNode};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;

/// Per-operation write-descent state: the root-id guard (held until a safe
/// node releases it) and the latched ancestor chain, root-most first. Pages
/// scheduled for deletion are unpinned first and deleted after all latches
/// are gone.
struct WriteContext<'a> {
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    chain: Vec<(PageId, PageWriteGuard)>,
    deleted: Vec<PageId>,
}

/// A latch-coupled, persistent B+-tree whose nodes live as buffer-pool
/// pages. The root page id is persisted through the header page (page 0)
/// under the tree's name; a separate reader-writer guard serializes root-id
/// changes.
pub struct BPlusTree<K> {
    name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: RwLock<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _phantom: PhantomData<fn(K) -> K>,
}

impl<K> BPlusTree<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open or create the named tree. An existing root page id is recovered
    /// from the header page.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        debug_assert!(leaf_max_size >= 2);
        debug_assert!(internal_max_size >= 3);

        let name = name.into();
        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id =
            HeaderPage::get_record(&header.read(), &name).unwrap_or(INVALID_PAGE_ID);
        buffer_pool.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            name,
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup under shared-latch crabbing: at most two latches (parent
    /// and child) are held at any moment.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root_guard = self.root_page_id.read();
        let root_page_id = *root_guard;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let page = self.buffer_pool.fetch_page(root_page_id)?;
        let mut guard = page.read_arc();
        drop(root_guard);

        let mut page_id = root_page_id;
        loop {
            let node = match BTreeNode::<K>::load(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            if node.is_leaf() {
                let result = node.leaf_lookup(key);
                drop(guard);
                self.buffer_pool.unpin_page(page_id, false);
                return Ok(result);
            }
            let child_id = node.child_for(key);
            let child_page = match self.buffer_pool.fetch_page(child_id) {
                Ok(page) => page,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            };
            let child_guard = child_page.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);
            guard = child_guard;
            page_id = child_id;
        }
    }

    /// Insert a key/rid pair. Returns false on a duplicate key.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root_guard = self.root_page_id.write();

        if *root_guard == INVALID_PAGE_ID {
            // start a new tree with a single leaf root
            let (page, page_id) = self.buffer_pool.new_page()?;
            let mut root = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            root.leaf_insert(key, rid);
            let store_result = root.store(&mut page.write());
            self.buffer_pool.unpin_page(page_id, true);
            store_result?;
            *root_guard = page_id;
            self.persist_root_id(page_id)?;
            return Ok(true);
        }

        let mut ctx = WriteContext {
            root_guard: Some(root_guard),
            chain: Vec::new(),
            deleted: Vec::new(),
        };
        let result = self.insert_inner(key, rid, &mut ctx);
        self.release_context(&mut ctx);
        result
    }

    fn insert_inner(&self, key: K, rid: Rid, ctx: &mut WriteContext) -> Result<bool, BTreeError> {
        self.descend_for_write(&key, ctx, true)?;

        let (leaf_id, mut leaf_guard) = match ctx.chain.pop() {
            Some(top) => top,
            None => return Err(BTreeError::InvalidNodeFormat),
        };
        let mut leaf = BTreeNode::<K>::load(&leaf_guard)?;

        if !leaf.leaf_insert(key, rid) {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, false);
            return Ok(false);
        }

        if leaf.size() < self.leaf_max_size {
            leaf.store(&mut leaf_guard)?;
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, true);
            return Ok(true);
        }

        // the leaf is full: split and propagate the middle key upward
        let (right_page, right_id) = self.buffer_pool.new_page()?;
        let right = leaf.split_leaf(right_id);
        let separator = match right.keys.first() {
            Some(key) => key.clone(),
            None => return Err(BTreeError::InvalidNodeFormat),
        };
        let store_result = right.store(&mut right_page.write());
        self.buffer_pool.unpin_page(right_id, true);
        store_result?;

        leaf.store(&mut leaf_guard)?;
        drop(leaf_guard);
        self.buffer_pool.unpin_page(leaf_id, true);
        log::debug!("split leaf {} into {}", leaf_id, right_id);

        self.propagate_split(ctx, leaf_id, separator, right_id)?;
        Ok(true)
    }

    fn propagate_split(
        &self,
        ctx: &mut WriteContext,
        mut left_id: PageId,
        mut separator: K,
        mut right_id: PageId,
    ) -> Result<(), BTreeError> {
        loop {
            match ctx.chain.pop() {
                None => {
                    // the split reached the topmost latched node: grow a new
                    // root holding the single separator
                    let (root_page, new_root_id) = self.buffer_pool.new_page()?;
                    let mut root = BTreeNode::<K>::new_internal(
                        new_root_id,
                        INVALID_PAGE_ID,
                        self.internal_max_size,
                    );
                    root.children.push(left_id);
                    root.children.push(right_id);
                    root.keys.push(separator);
                    let store_result = root.store(&mut root_page.write());
                    self.buffer_pool.unpin_page(new_root_id, true);
                    store_result?;

                    self.set_parent(left_id, new_root_id)?;
                    self.set_parent(right_id, new_root_id)?;

                    if let Some(root_guard) = ctx.root_guard.as_mut() {
                        **root_guard = new_root_id;
                    }
                    self.persist_root_id(new_root_id)?;
                    log::debug!("grew new root {}", new_root_id);
                    return Ok(());
                }
                Some((parent_id, mut parent_guard)) => {
                    let mut parent = BTreeNode::<K>::load(&parent_guard)?;
                    parent.internal_insert(separator, right_id);

                    if parent.size() < self.internal_max_size {
                        parent.store(&mut parent_guard)?;
                        drop(parent_guard);
                        self.buffer_pool.unpin_page(parent_id, true);
                        return Ok(());
                    }

                    let (right_page, new_right_id) = self.buffer_pool.new_page()?;
                    let (push_up, right_node) = match parent.split_internal(new_right_id) {
                        Some(split) => split,
                        None => {
                            self.buffer_pool.unpin_page(new_right_id, true);
                            return Err(BTreeError::InvalidNodeFormat);
                        }
                    };
                    let store_result = right_node.store(&mut right_page.write());
                    self.buffer_pool.unpin_page(new_right_id, true);
                    store_result?;

                    // children moved to the new right internal point to it
                    for &child in &right_node.children {
                        self.set_parent(child, new_right_id)?;
                    }

                    parent.store(&mut parent_guard)?;
                    drop(parent_guard);
                    self.buffer_pool.unpin_page(parent_id, true);
                    log::debug!("split internal {} into {}", parent_id, new_right_id);

                    left_id = parent_id;
                    separator = push_up;
                    right_id = new_right_id;
                }
            }
        }
    }

    /// Remove a key. Returns false if the key is absent; the tree is
    /// unchanged in that case.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut ctx = WriteContext {
            root_guard: Some(root_guard),
            chain: Vec::new(),
            deleted: Vec::new(),
        };
        let result = self.remove_inner(key, &mut ctx);
        self.release_context(&mut ctx);
        // deleted pages were unpinned while latched ancestors still shielded
        // them; reclaim the frames now
        for page_id in std::mem::take(&mut ctx.deleted) {
            self.buffer_pool.delete_page(page_id);
        }
        result
    }

    fn remove_inner(&self, key: &K, ctx: &mut WriteContext) -> Result<bool, BTreeError> {
        self.descend_for_write(key, ctx, false)?;

        let (leaf_id, mut leaf_guard) = match ctx.chain.pop() {
            Some(top) => top,
            None => return Err(BTreeError::InvalidNodeFormat),
        };
        let mut leaf = BTreeNode::<K>::load(&leaf_guard)?;

        if !leaf.leaf_remove(key) {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, false);
            return Ok(false);
        }

        if leaf.is_root() {
            if leaf.size() == 0 {
                // the tree became empty
                ctx.deleted.push(leaf_id);
                drop(leaf_guard);
                self.buffer_pool.unpin_page(leaf_id, true);
                if let Some(root_guard) = ctx.root_guard.as_mut() {
                    **root_guard = INVALID_PAGE_ID;
                }
                self.persist_root_id(INVALID_PAGE_ID)?;
            } else {
                leaf.store(&mut leaf_guard)?;
                drop(leaf_guard);
                self.buffer_pool.unpin_page(leaf_id, true);
            }
            return Ok(true);
        }

        if leaf.size() >= leaf.min_size() {
            leaf.store(&mut leaf_guard)?;
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, true);
            return Ok(true);
        }

        self.repair_leaf_underflow(ctx, leaf_id, leaf_guard, leaf)?;
        Ok(true)
    }

    fn repair_leaf_underflow(
        &self,
        ctx: &mut WriteContext,
        page_id: PageId,
        mut guard: PageWriteGuard,
        mut node: BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        let (parent_id, mut parent_guard) = match ctx.chain.pop() {
            Some(top) => top,
            None => {
                node.store(&mut guard)?;
                drop(guard);
                self.buffer_pool.unpin_page(page_id, true);
                return Err(BTreeError::InvalidNodeFormat);
            }
        };
        let mut parent = BTreeNode::<K>::load(&parent_guard)?;
        let position = match parent.child_position(page_id) {
            Some(position) => position,
            None => return Err(BTreeError::InvalidNodeFormat),
        };

        // prefer the left sibling; the leftmost child uses its right one
        let (separator_index, sibling_id, sibling_is_left) = if position == 0 {
            (0, parent.children[1], false)
        } else {
            (position - 1, parent.children[position - 1], true)
        };

        let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
        let mut sibling_guard = sibling_page.write_arc();
        let mut sibling = BTreeNode::<K>::load(&sibling_guard)?;

        if sibling.size() > sibling.min_size() {
            // redistribute one entry and refresh the parent separator
            let stolen = if sibling_is_left {
                node.leaf_steal_from_left(&mut sibling)
            } else {
                node.leaf_steal_from_right(&mut sibling)
            };
            if !stolen {
                return Err(BTreeError::InvalidNodeFormat);
            }
            let new_separator = if sibling_is_left {
                node.keys.first().cloned()
            } else {
                sibling.keys.first().cloned()
            };
            match new_separator {
                Some(separator) => parent.keys[separator_index] = separator,
                None => return Err(BTreeError::InvalidNodeFormat),
            }

            sibling.store(&mut sibling_guard)?;
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true);
            node.store(&mut guard)?;
            drop(guard);
            self.buffer_pool.unpin_page(page_id, true);
            parent.store(&mut parent_guard)?;
            drop(parent_guard);
            self.buffer_pool.unpin_page(parent_id, true);
            return Ok(());
        }

        // merge into the left node and drop the separator
        let (survivor_id, mut survivor_guard, mut survivor, victim_id, victim_guard, victim) =
            if sibling_is_left {
                (sibling_id, sibling_guard, sibling, page_id, guard, node)
            } else {
                (page_id, guard, node, sibling_id, sibling_guard, sibling)
            };
        survivor.leaf_merge(victim);
        parent.remove_at(separator_index);
        ctx.deleted.push(victim_id);

        survivor.store(&mut survivor_guard)?;
        drop(survivor_guard);
        self.buffer_pool.unpin_page(survivor_id, true);
        drop(victim_guard);
        self.buffer_pool.unpin_page(victim_id, true);
        log::debug!("merged leaf {} into {}", victim_id, survivor_id);

        self.repair_internal_underflow(ctx, parent_id, parent_guard, parent)
    }

    fn repair_internal_underflow(
        &self,
        ctx: &mut WriteContext,
        mut page_id: PageId,
        mut guard: PageWriteGuard,
        mut node: BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        loop {
            if node.is_root() {
                if node.size() == 0 {
                    // an internal root with a single child: promote the child
                    let child_id = match node.children.first() {
                        Some(&child_id) => child_id,
                        None => return Err(BTreeError::InvalidNodeFormat),
                    };
                    self.set_parent(child_id, INVALID_PAGE_ID)?;
                    ctx.deleted.push(page_id);
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true);
                    if let Some(root_guard) = ctx.root_guard.as_mut() {
                        **root_guard = child_id;
                    }
                    self.persist_root_id(child_id)?;
                    log::debug!("collapsed root into {}", child_id);
                } else {
                    node.store(&mut guard)?;
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true);
                }
                return Ok(());
            }

            if node.size() >= node.min_size() {
                node.store(&mut guard)?;
                drop(guard);
                self.buffer_pool.unpin_page(page_id, true);
                return Ok(());
            }

            let (parent_id, mut parent_guard) = match ctx.chain.pop() {
                Some(top) => top,
                None => {
                    node.store(&mut guard)?;
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true);
                    return Err(BTreeError::InvalidNodeFormat);
                }
            };
            let mut parent = BTreeNode::<K>::load(&parent_guard)?;
            let position = match parent.child_position(page_id) {
                Some(position) => position,
                None => return Err(BTreeError::InvalidNodeFormat),
            };
            let (separator_index, sibling_id, sibling_is_left) = if position == 0 {
                (0, parent.children[1], false)
            } else {
                (position - 1, parent.children[position - 1], true)
            };

            let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
            let mut sibling_guard = sibling_page.write_arc();
            let mut sibling = BTreeNode::<K>::load(&sibling_guard)?;

            if sibling.size() > sibling.min_size() {
                let separator = parent.keys[separator_index].clone();
                let (new_separator, moved_child) = if sibling_is_left {
                    let new_separator = node.internal_steal_from_left(&mut sibling, separator);
                    (new_separator, node.children.first().copied())
                } else {
                    let new_separator = node.internal_steal_from_right(&mut sibling, separator);
                    (new_separator, node.children.last().copied())
                };
                let (new_separator, moved_child) = match (new_separator, moved_child) {
                    (Some(separator), Some(child)) => (separator, child),
                    _ => return Err(BTreeError::InvalidNodeFormat),
                };
                parent.keys[separator_index] = new_separator;
                self.set_parent(moved_child, page_id)?;

                sibling.store(&mut sibling_guard)?;
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_id, true);
                node.store(&mut guard)?;
                drop(guard);
                self.buffer_pool.unpin_page(page_id, true);
                parent.store(&mut parent_guard)?;
                drop(parent_guard);
                self.buffer_pool.unpin_page(parent_id, true);
                return Ok(());
            }

            // merge: the parent separator is pulled down between the halves
            let (survivor_id, mut survivor_guard, mut survivor, victim_id, victim_guard, victim) =
                if sibling_is_left {
                    (sibling_id, sibling_guard, sibling, page_id, guard, node)
                } else {
                    (page_id, guard, node, sibling_id, sibling_guard, sibling)
                };
            let moved_children = victim.children.clone();
            survivor.internal_merge(victim, parent.keys[separator_index].clone());
            parent.remove_at(separator_index);
            ctx.deleted.push(victim_id);

            for child_id in moved_children {
                self.set_parent(child_id, survivor_id)?;
            }

            survivor.store(&mut survivor_guard)?;
            drop(survivor_guard);
            self.buffer_pool.unpin_page(survivor_id, true);
            drop(victim_guard);
            self.buffer_pool.unpin_page(victim_id, true);
            log::debug!("merged internal {} into {}", victim_id, survivor_id);

            page_id = parent_id;
            guard = parent_guard;
            node = parent;
        }
    }

    /// Pessimistic write descent: exclusive-latch the path from the root,
    /// releasing every held ancestor (and the root-id guard) whenever the
    /// newly latched node is safe for the operation. The latched chain ends
    /// at the target leaf.
    fn descend_for_write(
        &self,
        key: &K,
        ctx: &mut WriteContext,
        for_insert: bool,
    ) -> Result<(), BTreeError> {
        let mut page_id = match ctx.root_guard.as_deref() {
            Some(&root_page_id) => root_page_id,
            None => return Err(BTreeError::InvalidNodeFormat),
        };
        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let guard = page.write_arc();
            let node = match BTreeNode::<K>::load(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };

            let safe = if for_insert {
                node.is_safe_for_insert()
            } else {
                node.is_safe_for_remove()
            };
            if safe {
                ctx.root_guard = None;
                self.release_context(ctx);
            }

            if node.is_leaf() {
                ctx.chain.push((page_id, guard));
                return Ok(());
            }
            let child_id = node.child_for(key);
            ctx.chain.push((page_id, guard));
            page_id = child_id;
        }
    }

    /// Release the remaining latched chain (unpinning each page) and the
    /// root-id guard.
    fn release_context(&self, ctx: &mut WriteContext) {
        ctx.root_guard = None;
        for (page_id, guard) in ctx.chain.drain(..) {
            drop(guard);
            self.buffer_pool.unpin_page(page_id, true);
        }
    }

    fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        write_parent_pointer(&mut page.write(), parent_page_id);
        self.buffer_pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Persist the root page id on the header page under this tree's name.
    fn persist_root_id(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = header.write();
            if !HeaderPage::update_record(&mut guard, &self.name, root_page_id) {
                HeaderPage::insert_record(&mut guard, &self.name, root_page_id);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    /// Iterate from the leftmost leaf. Only shared latches are taken.
    pub fn iter(&self) -> Result<BPlusTreeIterator<K>, BTreeError> {
        self.begin_iterator(None)
    }

    /// Iterate from the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIterator<K>, BTreeError> {
        self.begin_iterator(Some(key))
    }

    fn begin_iterator(&self, key: Option<&K>) -> Result<BPlusTreeIterator<K>, BTreeError> {
        let root_guard = self.root_page_id.read();
        let root_page_id = *root_guard;
        if root_page_id == INVALID_PAGE_ID {
            return Ok(BPlusTreeIterator::end(self.buffer_pool.clone()));
        }
        let mut page = self.buffer_pool.fetch_page(root_page_id)?;
        let mut guard = page.read_arc();
        drop(root_guard);

        let mut page_id = root_page_id;
        loop {
            let node = match BTreeNode::<K>::load(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            if node.is_leaf() {
                let index = match key {
                    Some(key) => node.keys.partition_point(|k| k < key),
                    None => 0,
                };
                drop(guard);
                // the leaf stays pinned: the iterator owns the pin
                return Ok(BPlusTreeIterator::new(
                    self.buffer_pool.clone(),
                    page,
                    page_id,
                    index,
                ));
            }
            let child_id = match key {
                Some(key) => node.child_for(key),
                None => match node.children.first() {
                    Some(&child_id) => child_id,
                    None => {
                        drop(guard);
                        self.buffer_pool.unpin_page(page_id, false);
                        return Err(BTreeError::InvalidNodeFormat);
                    }
                },
            };
            let child_page = match self.buffer_pool.fetch_page(child_id) {
                Ok(child_page) => child_page,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            };
            let child_guard = child_page.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);
            page = child_page;
            guard = child_guard;
            page_id = child_id;
        }
    }
}
