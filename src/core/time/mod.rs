//! Time management
//!
//! Tick counter access, tick forwarding and tick-period conversion.

use crate::config::TICK_PERIOD_UNKNOWN;
use crate::error::{OsalResult, OsalStatus};
use crate::kernel::Osal;
use crate::port::NativeKernel;
use crate::types::Ticks;

impl<K: NativeKernel> Osal<K> {
    /// Length of one tick in microseconds
    ///
    /// # Errors
    /// * [`OsalStatus::Failed`] if no tick period was configured
    pub fn tick_period_us(&self) -> OsalResult<u32> {
        if self.tick_period_us == TICK_PERIOD_UNKNOWN {
            return Err(OsalStatus::Failed);
        }
        Ok(self.tick_period_us)
    }

    /// Announce one tick to the native kernel
    ///
    /// Called from the tick interrupt.
    #[inline]
    pub fn time_tick(&self) {
        self.kernel.time_tick();
    }

    /// Current tick count
    #[inline]
    pub fn current_tick(&self) -> Ticks {
        self.kernel.time_get()
    }

    /// Convert milliseconds to ticks, rounding up
    pub fn ms_to_ticks(&self, ms: u32) -> OsalResult<Ticks> {
        let period = u64::from(self.tick_period_us()?);
        let ticks = (u64::from(ms) * 1000).div_ceil(period);
        Ticks::try_from(ticks).map_err(|_| OsalStatus::BadTime)
    }
}
