use parking_lot::{Condvar, Mutex};

/// Counts in-flight event deliveries so `close` can drain them.
#[derive(Default)]
pub(crate) struct CounterLatch {
	count: Mutex<usize>,
	cond: Condvar,
}

impl CounterLatch {
	/// Marks one delivery in flight until the guard drops.
	pub(crate) fn enter(&self) -> LatchGuard<'_> {
		*self.count.lock() += 1;
		LatchGuard { latch: self }
	}

	/// Blocks until no delivery is in flight.
	pub(crate) fn wait(&self) {
		let mut count = self.count.lock();
		while *count > 0 {
			self.cond.wait(&mut count);
		}
	}
}

pub(crate) struct LatchGuard<'a> {
	latch: &'a CounterLatch,
}

impl Drop for LatchGuard<'_> {
	fn drop(&mut self) {
		let mut count = self.latch.count.lock();
		*count -= 1;
		if *count == 0 {
			self.latch.cond.notify_all();
		}
	}
}
