use super::Capacity;
use crate::error::SandboxError;
use log::{debug, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks how much temp storage is promised to live jobs against a fixed
/// ceiling.
///
/// This is the only state shared between concurrently running jobs. It is
/// constructed once by the caller and handed to each job by reference (an
/// `Arc`); the counter is updated with compare-and-swap so `reserve` and
/// `release` may race freely.
#[derive(Debug)]
pub struct ResourceAccountant {
    ceiling: u64,
    reserved: AtomicU64,
}

impl ResourceAccountant {
    pub fn new(ceiling: Capacity) -> Arc<Self> {
        Arc::new(Self {
            ceiling: ceiling.bytes(),
            reserved: AtomicU64::new(0),
        })
    }

    pub fn ceiling(&self) -> Capacity {
        Capacity::from_bytes(self.ceiling)
    }

    pub fn reserved(&self) -> Capacity {
        Capacity::from_bytes(self.reserved.load(Ordering::Acquire))
    }

    pub fn remaining(&self) -> Capacity {
        Capacity::from_bytes(
            self.ceiling
                .saturating_sub(self.reserved.load(Ordering::Acquire)),
        )
    }

    /// Grants exactly `requested`, or fails with `ResourceExhausted` when it
    /// does not fit in what is left of the ceiling.
    pub fn reserve(
        self: &Arc<Self>,
        requested: Capacity,
    ) -> Result<Reservation, SandboxError> {
        self.reserve_within(requested, requested)
    }

    /// Grants as much as possible of `max`, as long as at least `min` fits.
    pub fn reserve_within(
        self: &Arc<Self>,
        min: Capacity,
        max: Capacity,
    ) -> Result<Reservation, SandboxError> {
        if min > max {
            return Err(SandboxError::config(format!(
                "minimum temp storage {} exceeds maximum {}",
                min, max
            )));
        }

        let mut current = self.reserved.load(Ordering::Acquire);
        loop {
            let remaining = self.ceiling.saturating_sub(current);
            if min.bytes() > remaining {
                return Err(SandboxError::ResourceExhausted {
                    requested: min,
                    remaining: Capacity::from_bytes(remaining),
                    ceiling: self.ceiling(),
                });
            }
            let granted = max.bytes().min(remaining);
            match self.reserved.compare_exchange_weak(
                current,
                current + granted,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let granted = Capacity::from_bytes(granted);
                    debug!(
                        "Reserved {} of temp storage ({} left)",
                        granted,
                        Capacity::from_bytes(remaining - granted.bytes())
                    );
                    return Ok(Reservation {
                        accountant: Some(Arc::clone(self)),
                        granted,
                        released: AtomicBool::new(false),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Same as [`Reservation::release`].
    pub fn release(&self, reservation: &Reservation) {
        reservation.release();
    }

    fn give_back(&self, amount: Capacity) {
        let previous = self.reserved.fetch_sub(amount.bytes(), Ordering::AcqRel);
        debug_assert!(previous >= amount.bytes());
        trace!("Released {} of temp storage", amount);
    }
}

/// Temp storage granted to one job. Released exactly once, either explicitly
/// or when dropped.
#[derive(Debug)]
pub struct Reservation {
    accountant: Option<Arc<ResourceAccountant>>,
    granted: Capacity,
    released: AtomicBool,
}

impl Reservation {
    /// A reservation for jobs that did not ask for bounded temp storage. It
    /// is not backed by any accountant and releasing it does nothing.
    pub fn none() -> Self {
        Reservation {
            accountant: None,
            granted: Capacity::ZERO,
            released: AtomicBool::new(false),
        }
    }

    pub fn granted(&self) -> Capacity {
        self.granted
    }

    /// True when the reservation bounds the size of the temp directory.
    pub fn is_bounded(&self) -> bool {
        self.accountant.is_some() && !self.granted.is_zero()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns the capacity to the accountant. Safe to call any number of
    /// times; only the first call has an effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(accountant) = &self.accountant {
            accountant.give_back(self.granted);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_reserve_reduces_remaining_exactly() {
        let accountant = ResourceAccountant::new(Capacity::from_mib(300));
        let r = accountant.reserve(Capacity::from_mib(100)).unwrap();
        assert_eq!(r.granted(), Capacity::from_mib(100));
        assert_eq!(accountant.remaining(), Capacity::from_mib(200));
        r.release();
        assert_eq!(accountant.remaining(), Capacity::from_mib(300));
    }

    #[test]
    fn test_reserve_over_ceiling_fails() {
        let accountant = ResourceAccountant::new(Capacity::from_mib(100));
        let _held = accountant.reserve(Capacity::from_mib(60)).unwrap();
        let err = accountant.reserve(Capacity::from_mib(50)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(accountant.remaining(), Capacity::from_mib(40));
    }

    #[test]
    fn test_release_is_idempotent() {
        let accountant = ResourceAccountant::new(Capacity::from_mib(100));
        let r = accountant.reserve(Capacity::from_mib(10)).unwrap();
        r.release();
        r.release();
        accountant.release(&r);
        assert!(r.is_released());
        drop(r);
        assert_eq!(accountant.remaining(), Capacity::from_mib(100));
        assert_eq!(accountant.reserved(), Capacity::ZERO);
    }

    #[test]
    fn test_drop_releases() {
        let accountant = ResourceAccountant::new(Capacity::from_mib(100));
        {
            let _r = accountant.reserve(Capacity::from_mib(100)).unwrap();
            assert_eq!(accountant.remaining(), Capacity::ZERO);
        }
        assert_eq!(accountant.remaining(), Capacity::from_mib(100));
    }

    #[test]
    fn test_reserve_within_caps_to_remaining() {
        let accountant = ResourceAccountant::new(Capacity::from_mib(100));
        let _a = accountant.reserve(Capacity::from_mib(70)).unwrap();
        let b = accountant
            .reserve_within(Capacity::from_mib(10), Capacity::from_mib(50))
            .unwrap();
        assert_eq!(b.granted(), Capacity::from_mib(30));
        assert_eq!(accountant.remaining(), Capacity::ZERO);
        assert!(
            accountant
                .reserve_within(Capacity::from_mib(1), Capacity::from_mib(2))
                .is_err()
        );
        assert!(
            accountant
                .reserve_within(Capacity::from_mib(3), Capacity::from_mib(2))
                .is_err()
        );
    }

    #[test]
    fn test_none_reservation_is_unbounded() {
        let r = Reservation::none();
        assert!(!r.is_bounded());
        r.release();
        r.release();
    }
}
