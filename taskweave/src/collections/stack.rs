use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};

struct Node<T> {
    value: T,
    next: Atomic<Node<T>>,
}

/// A lock-free LIFO stack.
///
/// Nodes are reclaimed through epoch-based garbage collection, so readers
/// such as [`ConcurrentStack::try_peek`] and [`ConcurrentStack::snapshot`]
/// never see a freed node. Values are handed out as clones for the same
/// reason: a node popped by one thread may still be read by another until
/// the epoch advances.
///
/// ```
/// use taskweave::collections::ConcurrentStack;
///
/// let stack = ConcurrentStack::new();
/// stack.push_range([1, 2, 3]);
///
/// assert_eq!(stack.try_pop(), Some(3));
/// assert_eq!(stack.snapshot(), vec![2, 1]);
/// ```
pub struct ConcurrentStack<T> {
    head: Atomic<Node<T>>,

    /// Updated after the head moves, so it may briefly lag or dip below
    /// zero while mutators race.
    len: AtomicIsize,
}

impl<T: Clone + Send + Sync> ConcurrentStack<T> {
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
            len: AtomicIsize::new(0),
        }
    }

    pub fn push(&self, value: T) {
        let guard = epoch::pin();
        let mut node = Owned::new(Node {
            value,
            next: Atomic::null(),
        });

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            node.next.store(head, Ordering::Relaxed);

            match self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard)
            {
                Ok(_) => break,
                Err(err) => node = err.new,
            }
        }

        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Pushes every item in order; the last one ends up on top.
    pub fn push_range(&self, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.push(value);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.try_pop_range(1).pop()
    }

    /// Atomically pops up to `n` values, top first.
    pub fn try_pop_range(&self, n: usize) -> Vec<T> {
        if n == 0 {
            return Vec::new();
        }

        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let (taken, rest) = Self::walk(head, n, &guard);
            if taken.is_empty() {
                return Vec::new();
            }

            // Nodes are never pushed twice and the epoch keeps popped ones
            // from being reused, so an unchanged head means an unchanged chain.
            if self
                .head
                .compare_exchange(head, rest, Ordering::AcqRel, Ordering::Acquire, &guard)
                .is_ok()
            {
                self.len.fetch_sub(taken.len() as isize, Ordering::AcqRel);
                return taken
                    .into_iter()
                    .map(|node| {
                        // SAFETY: `node` was unlinked by the exchange above, by
                        // this thread only; readers still pinned keep it alive.
                        unsafe {
                            let value = node.deref().value.clone();
                            guard.defer_destroy(node);
                            value
                        }
                    })
                    .collect();
            }
        }
    }

    pub fn try_peek(&self) -> Option<T> {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        // SAFETY: nodes reachable while pinned are not reclaimed.
        unsafe { head.as_ref() }.map(|node| node.value.clone())
    }

    /// The values from top to bottom, as of a single point in time.
    pub fn snapshot(&self) -> Vec<T> {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        let (nodes, _) = Self::walk(head, usize::MAX, &guard);

        nodes
            .into_iter()
            // SAFETY: nodes reachable while pinned are not reclaimed.
            .map(|node| unsafe { node.deref() }.value.clone())
            .collect()
    }

    /// Removes every value. Values pushed concurrently may survive.
    pub fn clear(&self) {
        let guard = epoch::pin();
        let head = self.head.swap(Shared::null(), Ordering::AcqRel, &guard);
        let (nodes, _) = Self::walk(head, usize::MAX, &guard);

        self.len.fetch_sub(nodes.len() as isize, Ordering::AcqRel);
        for node in nodes {
            // SAFETY: the whole chain was detached by the swap above.
            unsafe { guard.defer_destroy(node) };
        }
    }

    /// Exact once no thread is pushing or popping.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire, &epoch::pin()).is_null()
    }

    /// Collects up to `n` nodes from `from` down. Returns them and the node
    /// after the last one collected.
    fn walk<'g>(
        from: Shared<'g, Node<T>>,
        n: usize,
        guard: &'g Guard,
    ) -> (Vec<Shared<'g, Node<T>>>, Shared<'g, Node<T>>) {
        let mut nodes = Vec::new();
        let mut cur = from;

        while nodes.len() < n {
            // SAFETY: nodes reachable while pinned are not reclaimed.
            let Some(node) = (unsafe { cur.as_ref() }) else {
                break;
            };
            nodes.push(cur);
            cur = node.next.load(Ordering::Acquire, guard);
        }

        (nodes, cur)
    }
}

impl<T: Clone + Send + Sync> Default for ConcurrentStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ConcurrentStack<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent access.
        unsafe {
            let guard = epoch::unprotected();
            let mut cur = self.head.load(Ordering::Relaxed, guard);
            while !cur.is_null() {
                let node = cur.into_owned();
                cur = node.next.load(Ordering::Relaxed, guard);
            }
        }
    }
}

impl<T: Clone + Send + Sync + fmt::Debug> fmt::Debug for ConcurrentStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}
