//! Delivery receipts carried in request extensions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag recording whether a failure in this request was delivered.
///
/// The middleware places a receipt in the request extensions before calling
/// the wrapped service, reusing one an outer layer already inserted. Whoever
/// holds a clone can read the flag once the request has finished.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    delivered: Arc<AtomicBool>,
}

impl DeliveryReceipt {
    /// Creates an unset receipt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a notifier confirmed delivery.
    #[must_use]
    pub fn delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let receipt = DeliveryReceipt::new();
        let observer = receipt.clone();

        assert!(!observer.delivered());
        receipt.mark_delivered();
        assert!(observer.delivered());
    }
}
