// FILE: src/testing/fault.rs
//! Fault policy and its runtime controller.

use crate::core::Status;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Backend operations a rule can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    Open,
    Delete,
    Access,
    Close,
    Read,
    Write,
    Truncate,
    Sync,
    FileSize,
    Lock,
    Unlock,
    CheckReservedLock,
    FileControl,
    SectorSize,
    DeviceCharacteristics,
    ShmMap,
    ShmLock,
    ShmBarrier,
    ShmUnmap,
}

fn default_code() -> i32 {
    Status::IOERR.code()
}

/// Which op fails, with which code, on which paths, and how often.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    /// Engine status code to return.
    #[serde(default = "default_code")]
    pub code: i32,
    /// Only paths containing this substring match.
    #[serde(default)]
    pub path_contains: Option<String>,
    /// Matching calls to let through before faulting.
    #[serde(default)]
    pub start_after: u64,
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl FaultRule {
    pub fn new(op: FaultOp, status: Status) -> Self {
        Self { op, code: status.code(), path_contains: None, start_after: 0, max_faults: None }
    }

    pub fn on_path(mut self, fragment: &str) -> Self {
        self.path_contains = Some(fragment.to_string());
        self
    }

    pub fn after(mut self, calls: u64) -> Self {
        self.start_after = calls;
        self
    }

    pub fn at_most(mut self, faults: u64) -> Self {
        self.max_faults = Some(faults);
        self
    }

    fn matches(&self, op: FaultOp, path: &str) -> bool {
        self.op == op && self.path_contains.as_deref().map_or(true, |fragment| path.contains(fragment))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_rules(rules: Vec<FaultRule>) -> Self {
        Self { enabled: true, rules }
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

#[derive(Debug, Default)]
struct FaultState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut state = self.state();
        state.counters = vec![RuleCounters::default(); policy.rules.len()];
        state.policy = policy;
    }

    pub fn clear(&self) {
        self.set_policy(FaultPolicy::default());
    }

    /// Faults injected so far by rule `idx`.
    pub fn hits(&self, idx: usize) -> u64 {
        self.state().counters.get(idx).map_or(0, |c| c.hits)
    }

    /// The status to fail `op` on `path` with, if a rule fires.
    pub fn should_fault(&self, op: FaultOp, path: &str) -> Option<Status> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.policy.enabled {
            return None;
        }
        state.counters.resize(state.policy.rules.len(), RuleCounters::default());

        for (rule, counters) in state.policy.rules.iter().zip(state.counters.iter_mut()) {
            if !rule.matches(op, path) {
                continue;
            }
            counters.invocations += 1;
            if counters.invocations <= rule.start_after {
                continue;
            }
            if rule.max_faults.is_some_and(|max| counters.hits >= max) {
                continue;
            }
            counters.hits += 1;
            return Some(Status::from_code(rule.code));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_json() {
        let json = r#"{ "enabled": true, "rules": [ { "op": "open", "path_contains": "replica", "max_faults": 10 } ] }"#;
        let policy = FaultPolicy::from_json(json).unwrap();
        assert_eq!(policy.rules[0].op, FaultOp::Open);
        assert_eq!(policy.rules[0].code, Status::IOERR.code());
        assert_eq!(policy.rules[0].path_contains.as_deref(), Some("replica"));
    }

    #[test]
    fn test_start_after_and_max_faults() {
        let injector = FaultInjector::new();
        injector.set_policy(FaultPolicy::with_rules(vec![FaultRule::new(FaultOp::Write, Status::FULL)
            .after(1)
            .at_most(2)]));

        assert_eq!(injector.should_fault(FaultOp::Write, "a.db"), None);
        assert_eq!(injector.should_fault(FaultOp::Write, "a.db"), Some(Status::FULL));
        assert_eq!(injector.should_fault(FaultOp::Write, "a.db"), Some(Status::FULL));
        assert_eq!(injector.should_fault(FaultOp::Write, "a.db"), None);
        assert_eq!(injector.hits(0), 2);
    }

    #[test]
    fn test_path_filter() {
        let injector = FaultInjector::new();
        injector.set_policy(FaultPolicy::with_rules(vec![
            FaultRule::new(FaultOp::Open, Status::CANTOPEN).on_path("/replica/"),
        ]));
        assert_eq!(injector.should_fault(FaultOp::Open, "/data/test.db"), None);
        assert_eq!(injector.should_fault(FaultOp::Open, "/replica/test.db"), Some(Status::CANTOPEN));
        assert_eq!(injector.should_fault(FaultOp::Read, "/replica/test.db"), None);

        injector.clear();
        assert_eq!(injector.should_fault(FaultOp::Open, "/replica/test.db"), None);
    }
}
