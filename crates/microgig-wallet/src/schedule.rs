//! Platform fee schedule
//!
//! Read-mostly configuration guarded by a `parking_lot::RwLock`. Readers
//! take a cheap snapshot of one row; callers must not cache snapshots
//! across settlements, the schedule is re-read at each settlement.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use microgig_types::{FeeSettings, FeeSettingsUpdate, FeeType};

struct ScheduleState {
    settings: HashMap<FeeType, FeeSettings>,
    version: u64,
}

/// Shared, mutable fee schedule keyed by fee type
#[derive(Clone)]
pub struct FeeSchedule {
    state: Arc<RwLock<ScheduleState>>,
}

impl FeeSchedule {
    /// Schedule seeded with the platform defaults for every fee type
    pub fn with_defaults() -> Self {
        let settings = FeeType::all()
            .into_iter()
            .map(|ft| (ft, FeeSettings::default_for(ft)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(ScheduleState {
                settings,
                version: 1,
            })),
        }
    }

    /// Current settings for one fee type
    pub fn snapshot(&self, fee_type: FeeType) -> FeeSettings {
        let state = self.state.read();
        state
            .settings
            .get(&fee_type)
            .cloned()
            .unwrap_or_else(|| FeeSettings::default_for(fee_type))
    }

    /// All current settings, in `FeeType::all()` order
    pub fn all(&self) -> Vec<FeeSettings> {
        let state = self.state.read();
        FeeType::all()
            .into_iter()
            .filter_map(|ft| state.settings.get(&ft).cloned())
            .collect()
    }

    /// Apply a partial update, returning the new settings
    pub fn update(&self, fee_type: FeeType, update: &FeeSettingsUpdate) -> FeeSettings {
        let mut state = self.state.write();
        let entry = state
            .settings
            .entry(fee_type)
            .or_insert_with(|| FeeSettings::default_for(fee_type));
        entry.apply(update);
        let updated = entry.clone();
        state.version += 1;
        tracing::info!(
            fee_type = %fee_type,
            version = state.version,
            active = updated.is_active,
            "fee schedule updated"
        );
        updated
    }

    /// Monotonic counter bumped on every update
    pub fn version(&self) -> u64 {
        self.state.read().version
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_cover_all_types() {
        let schedule = FeeSchedule::with_defaults();
        assert_eq!(schedule.all().len(), 4);
        assert_eq!(schedule.version(), 1);
    }

    #[test]
    fn test_update_bumps_version_and_persists() {
        let schedule = FeeSchedule::with_defaults();
        let updated = schedule.update(
            FeeType::Commission,
            &FeeSettingsUpdate {
                fee_percentage: Some(dec!(5)),
                ..Default::default()
            },
        );
        assert_eq!(updated.fee_percentage, dec!(5));
        assert_eq!(schedule.version(), 2);
        assert_eq!(schedule.snapshot(FeeType::Commission).fee_percentage, dec!(5));
    }
}
