//! Tier lifecycle phases and the binding protocol shared by every tier of
//! the routing tree.
//!
//! A binding moves through [`TierPhase`]s in one direction only. Each
//! transition runs a fallible `will_*` hook before the phase commits and a
//! `did_*` hook after; hook errors are reported through
//! [`TierBinding::did_fail`] and never wedge the transition machinery.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, FromRepr};

use crate::router::RouterErr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, FromRepr,
    Serialize, Deserialize,
)]
#[repr(u8)]
pub enum TierPhase {
    Inert = 0,
    Opened = 1,
    Loaded = 2,
    Started = 3,
    Stopped = 4,
    Unloaded = 5,
    Closed = 6,
}

/// The phase cell of one binding. Advancing is monotonic: a racing earlier
/// phase loses and reports failure rather than rolling the cell back.
pub struct TierLifecycle {
    phase: AtomicU8,
}

impl TierLifecycle {
    pub fn new() -> Self {
        TierLifecycle {
            phase: AtomicU8::new(TierPhase::Inert as u8),
        }
    }

    pub fn phase(&self) -> TierPhase {
        TierPhase::from_repr(self.phase.load(Ordering::Acquire)).unwrap_or(TierPhase::Closed)
    }

    /// Advances to `to` if it is strictly ahead of the current phase.
    /// Returns false when the cell is already at or past `to`.
    pub fn advance(&self, to: TierPhase) -> bool {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if current >= to as u8 {
                return false;
            }
            match self.phase.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for TierLifecycle {
    fn default() -> Self {
        TierLifecycle::new()
    }
}

/// The lifecycle protocol every tier binding speaks. Transition methods have
/// working defaults; implementors override the `will_*`/`did_*` hooks they
/// care about, plus [`close`](TierBinding::close), which must also release
/// the binding from its parent's table.
pub trait TierBinding: Send + Sync {
    fn lifecycle(&self) -> &TierLifecycle;

    fn phase(&self) -> TierPhase {
        self.lifecycle().phase()
    }

    fn will_open(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn did_open(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn will_load(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn did_load(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn will_start(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn did_start(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn will_stop(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn did_stop(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn will_unload(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn did_unload(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn will_close(&self) -> Result<(), RouterErr> {
        Ok(())
    }
    fn did_close(&self) -> Result<(), RouterErr> {
        Ok(())
    }

    fn will_phase(&self, phase: TierPhase) -> Result<(), RouterErr> {
        match phase {
            TierPhase::Inert => Ok(()),
            TierPhase::Opened => self.will_open(),
            TierPhase::Loaded => self.will_load(),
            TierPhase::Started => self.will_start(),
            TierPhase::Stopped => self.will_stop(),
            TierPhase::Unloaded => self.will_unload(),
            TierPhase::Closed => self.will_close(),
        }
    }

    fn did_phase(&self, phase: TierPhase) -> Result<(), RouterErr> {
        match phase {
            TierPhase::Inert => Ok(()),
            TierPhase::Opened => self.did_open(),
            TierPhase::Loaded => self.did_load(),
            TierPhase::Started => self.did_start(),
            TierPhase::Stopped => self.did_stop(),
            TierPhase::Unloaded => self.did_unload(),
            TierPhase::Closed => self.did_close(),
        }
    }

    /// Called when a hook errors. Transitions continue regardless.
    fn did_fail(&self, phase: TierPhase, err: RouterErr) {
        tracing::error!(phase = %phase, error = %err, "tier transition hook failed");
    }

    /// Runs one transition: `will_*` hook, phase advance, `did_*` hook.
    /// A no-op when the binding is already at or past `phase`.
    fn apply(&self, phase: TierPhase) {
        if self.phase() >= phase {
            return;
        }
        if let Err(err) = self.will_phase(phase) {
            self.did_fail(phase, err);
        }
        if !self.lifecycle().advance(phase) {
            return;
        }
        if let Err(err) = self.did_phase(phase) {
            self.did_fail(phase, err);
        }
    }

    fn open(&self) {
        self.apply(TierPhase::Opened);
    }
    fn load(&self) {
        self.apply(TierPhase::Loaded);
    }
    fn start(&self) {
        self.apply(TierPhase::Started);
    }
    fn stop(&self) {
        self.apply(TierPhase::Stopped);
    }
    fn unload(&self) {
        self.apply(TierPhase::Unloaded);
    }

    /// Tears the binding down. Implementations advance to
    /// [`TierPhase::Closed`], close their children, and ask their parent
    /// context to drop them from its table.
    fn close(&self);
}

/// Drives a fresh binding to [`TierPhase::Started`].
pub fn activate<B: TierBinding + ?Sized>(binding: &B) {
    binding.open();
    binding.load();
    binding.start();
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct Probe {
        lifecycle: TierLifecycle,
        log: Mutex<Vec<String>>,
        failures: AtomicUsize,
        fail_will_start: bool,
    }

    impl Probe {
        fn new(fail_will_start: bool) -> Self {
            Probe {
                lifecycle: TierLifecycle::new(),
                log: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(0),
                fail_will_start,
            }
        }

        fn record(&self, entry: &str) {
            self.log.lock().unwrap().push(entry.to_string());
        }
    }

    impl TierBinding for Probe {
        fn lifecycle(&self) -> &TierLifecycle {
            &self.lifecycle
        }

        fn will_start(&self) -> Result<(), RouterErr> {
            self.record("will_start");
            if self.fail_will_start {
                Err(RouterErr::Lifecycle {
                    phase: TierPhase::Started,
                    message: "refused".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn did_start(&self) -> Result<(), RouterErr> {
            self.record("did_start");
            Ok(())
        }

        fn did_fail(&self, _phase: TierPhase, _err: RouterErr) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) {
            self.apply(TierPhase::Closed);
        }
    }

    #[test]
    fn phase_order_matches_declaration() {
        use strum::IntoEnumIterator;

        let phases: Vec<TierPhase> = TierPhase::iter().collect();
        assert_eq!(phases.first(), Some(&TierPhase::Inert));
        assert_eq!(phases.last(), Some(&TierPhase::Closed));
        assert!(phases.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn phases_advance_monotonically() {
        let lifecycle = TierLifecycle::new();
        assert!(lifecycle.advance(TierPhase::Opened));
        assert!(lifecycle.advance(TierPhase::Started));
        assert!(!lifecycle.advance(TierPhase::Loaded));
        assert_eq!(lifecycle.phase(), TierPhase::Started);
        assert!(!lifecycle.advance(TierPhase::Started));
        assert!(lifecycle.advance(TierPhase::Closed));
        assert!(!lifecycle.advance(TierPhase::Opened));
        assert_eq!(lifecycle.phase(), TierPhase::Closed);
    }

    #[test]
    fn activate_runs_hooks_in_order() {
        let probe = Probe::new(false);
        activate(&probe);
        assert_eq!(probe.phase(), TierPhase::Started);
        assert_eq!(
            *probe.log.lock().unwrap(),
            vec!["will_start".to_string(), "did_start".to_string()]
        );
        assert_eq!(probe.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn hook_failure_is_contained() {
        let probe = Probe::new(true);
        activate(&probe);
        // transition still commits; the failure is reported once
        assert_eq!(probe.phase(), TierPhase::Started);
        assert_eq!(probe.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reapplying_a_phase_skips_hooks() {
        let probe = Probe::new(false);
        activate(&probe);
        probe.start();
        assert_eq!(probe.log.lock().unwrap().len(), 2);
    }

    #[test]
    fn will_close_observes_the_precommit_phase() {
        struct PhaseProbe {
            lifecycle: TierLifecycle,
            at_will_close: Mutex<Option<TierPhase>>,
        }

        impl TierBinding for PhaseProbe {
            fn lifecycle(&self) -> &TierLifecycle {
                &self.lifecycle
            }

            fn will_close(&self) -> Result<(), RouterErr> {
                *self.at_will_close.lock().unwrap() = Some(self.phase());
                Ok(())
            }

            fn close(&self) {
                self.apply(TierPhase::Closed);
            }
        }

        let probe = PhaseProbe {
            lifecycle: TierLifecycle::new(),
            at_will_close: Mutex::new(None),
        };
        activate(&probe);
        probe.close();
        // the will hook runs before the phase commits
        assert_eq!(
            *probe.at_will_close.lock().unwrap(),
            Some(TierPhase::Started)
        );
        assert_eq!(probe.phase(), TierPhase::Closed);
    }

    #[test]
    fn closed_bindings_ignore_restart() {
        let probe = Probe::new(false);
        probe.close();
        probe.start();
        assert_eq!(probe.phase(), TierPhase::Closed);
        assert!(probe.log.lock().unwrap().is_empty());
    }
}
