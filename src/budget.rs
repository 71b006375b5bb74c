//! Daily USD spend cap for the AI selector, persisted per UTC day.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::catalog::write_json_atomic;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct BudgetState {
    /// `YYYY-MM-DD` in UTC.
    day: String,
    spent_usd: f64,
}

pub struct DailyBudget {
    path: PathBuf,
    limit_usd: f64,
    state: Mutex<BudgetState>,
}

fn utc_today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

impl DailyBudget {
    /// Loads the saved spend, if any. Unreadable state starts from zero.
    pub fn load(path: &Path, limit_usd: f64) -> Self {
        let state = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| match serde_json::from_str::<BudgetState>(&raw) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("ignoring unreadable budget file {}: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            limit_usd,
            state: Mutex::new(state),
        }
    }

    pub fn limit_usd(&self) -> f64 {
        self.limit_usd
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn spent_on(&self, day: &str) -> f64 {
        let state = self.lock();
        if state.day == day {
            state.spent_usd
        } else {
            0.0
        }
    }

    pub fn spent_today(&self) -> f64 {
        self.spent_on(&utc_today())
    }

    /// Whether spending `estimated_usd` more on `day` stays within the cap.
    pub fn allows_on(&self, day: &str, estimated_usd: f64) -> bool {
        self.spent_on(day) + estimated_usd <= self.limit_usd
    }

    pub fn allows(&self, estimated_usd: f64) -> bool {
        self.allows_on(&utc_today(), estimated_usd)
    }

    pub fn record_on(&self, day: &str, cost_usd: f64) -> Result<()> {
        let snapshot = {
            let mut state = self.lock();
            if state.day != day {
                *state = BudgetState {
                    day: day.to_string(),
                    spent_usd: 0.0,
                };
            }
            state.spent_usd += cost_usd.max(0.0);
            state.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }

    /// Adds actual spend for today and persists it.
    pub fn record(&self, cost_usd: f64) -> Result<()> {
        self.record_on(&utc_today(), cost_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn spend_accumulates_and_blocks_at_limit() {
        let tmp = TempDir::new().unwrap();
        let budget = DailyBudget::load(&tmp.path().join("b.json"), 1.0);
        assert!(budget.allows_on("2026-01-01", 0.9));
        budget.record_on("2026-01-01", 0.75).unwrap();
        assert!(budget.allows_on("2026-01-01", 0.25));
        assert!(!budget.allows_on("2026-01-01", 0.3));
    }

    #[test]
    fn new_day_resets_spend() {
        let tmp = TempDir::new().unwrap();
        let budget = DailyBudget::load(&tmp.path().join("b.json"), 1.0);
        budget.record_on("2026-01-01", 0.9).unwrap();
        assert_eq!(budget.spent_on("2026-01-02"), 0.0);
        budget.record_on("2026-01-02", 0.1).unwrap();
        assert_eq!(budget.spent_on("2026-01-01"), 0.0);
        assert!((budget.spent_on("2026-01-02") - 0.1).abs() < 1e-12);
    }

    #[test]
    fn spend_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("b.json");
        DailyBudget::load(&path, 5.0)
            .record_on("2026-03-04", 1.5)
            .unwrap();
        let reloaded = DailyBudget::load(&path, 5.0);
        assert_eq!(reloaded.spent_on("2026-03-04"), 1.5);
    }

    #[test]
    fn zero_budget_blocks_everything() {
        let tmp = TempDir::new().unwrap();
        let budget = DailyBudget::load(&tmp.path().join("b.json"), 0.0);
        assert!(!budget.allows(0.0001));
    }
}
