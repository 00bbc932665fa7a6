//! Bounded object pool for reusable hot-path state (HMAC contexts, deflate
//! writers).
//!
//! Objects are reset when handed out, so a caller never sees state left by
//! a previous user. When the pool is empty a fresh object is built; when it
//! is full a returned object is dropped.

use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

pub struct Pool<T> {
    free: ArrayQueue<T>,
    factory: Factory<T>,
    reset: Reset<T>,
}

impl<T> Pool<T> {
    pub fn new(
        capacity: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
        reset: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            factory: Box::new(factory),
            reset: Box::new(reset),
        }
    }

    pub fn acquire(&self) -> Pooled<'_, T> {
        let mut item = self.free.pop().unwrap_or_else(|| (self.factory)());
        (self.reset)(&mut item);
        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    /// Objects currently parked in the pool.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

/// Borrowed pool object; returns itself to the pool when dropped.
pub struct Pooled<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the item out.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            let _ = self.pool.free.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn buffers(capacity: usize) -> Pool<Vec<u8>> {
        Pool::new(capacity, Vec::new, Vec::clear)
    }

    #[test]
    fn released_objects_are_reused_and_reset() {
        let pool = buffers(2);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"dirty");
        }
        assert_eq!(pool.idle(), 1);
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 5);
    }

    #[test]
    fn factory_runs_only_when_empty() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let pool = Pool::new(
            4,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                0u32
            },
            |v| *v = 0,
        );
        drop(pool.acquire());
        drop(pool.acquire());
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        drop((a, b));
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn overflow_is_dropped() {
        let pool = buffers(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
