//! 确定性故障注入（内存能力实现共用）

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::core::error::CapabilityError;

/// 前 k 次调用返回 Transient，或持续不可用；同时统计调用次数
#[derive(Debug, Default)]
pub struct FaultPlan {
    remaining: AtomicU32,
    outage: AtomicBool,
    calls: AtomicU32,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn transient(failures: u32) -> Self {
        Self {
            remaining: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn outage() -> Self {
        Self {
            outage: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次执行前调用；返回 Err 时能力不应继续执行
    pub fn check(&self, service: &str) -> Result<(), CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.outage.load(Ordering::SeqCst) {
            return Err(CapabilityError::Transient(format!(
                "{service} temporarily unavailable"
            )));
        }
        let consumed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(CapabilityError::Transient(format!(
                "{service} temporarily unavailable"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_budget_is_consumed() {
        let plan = FaultPlan::transient(2);
        assert!(plan.check("db").is_err());
        assert!(plan.check("db").is_err());
        assert!(plan.check("db").is_ok());
        assert_eq!(plan.calls(), 3);
    }

    #[test]
    fn test_outage_toggle() {
        let plan = FaultPlan::outage();
        assert!(plan.check("email").is_err());
        plan.set_outage(false);
        assert!(plan.check("email").is_ok());
    }
}
