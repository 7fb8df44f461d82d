//! Page visibility and network connectivity, as seen by the poller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the surface showing the badge is currently visible.
pub trait Visibility: Send + Sync {
    fn is_visible(&self) -> bool;
}

/// Whether the host believes it has network access.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// A shared on/off flag usable as either probe.
///
/// Clones observe the same flag, so a frontend (or test) keeps one clone and
/// flips it while the poller reads another.
#[derive(Debug, Clone)]
pub struct Switch(Arc<AtomicBool>);

impl Switch {
    pub fn new(on: bool) -> Self {
        Self(Arc::new(AtomicBool::new(on)))
    }

    pub fn on() -> Self {
        Self::new(true)
    }

    pub fn off() -> Self {
        Self::new(false)
    }

    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::Relaxed);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Visibility for Switch {
    fn is_visible(&self) -> bool {
        self.get()
    }
}

impl Connectivity for Switch {
    fn is_online(&self) -> bool {
        self.get()
    }
}
