use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Runtime counters shared by the sensing loop, visit tasks and D-Bus.
#[derive(Default)]
pub struct KioskStats {
    pub capture_active: AtomicBool,
    pub frames: AtomicU64,
    pub faces: AtomicU64,
    pub matches: AtomicU64,
    pub unmatched: AtomicU64,
    pub notified: AtomicU64,
    pub suppressed: AtomicU64,
    pub unresolved: AtomicU64,
    /// Matches dropped because the customer already had a visit pending.
    pub coalesced: AtomicU64,
    pub registry_size: AtomicUsize,
}

impl KioskStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_json(&self) -> serde_json::Value {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "capture_active": self.capture_active.load(Ordering::Relaxed),
            "registry_size": self.registry_size.load(Ordering::Relaxed),
            "counters": {
                "frames": load(&self.frames),
                "faces": load(&self.faces),
                "matches": load(&self.matches),
                "unmatched": load(&self.unmatched),
                "notified": load(&self.notified),
                "suppressed": load(&self.suppressed),
                "unresolved": load(&self.unresolved),
                "coalesced": load(&self.coalesced),
            },
        })
    }
}
