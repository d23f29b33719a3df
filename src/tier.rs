//! Tier routing table (§4.8/C10). Pure routing logic; no teacher counterpart, built
//! directly from the specified tier sets and predicates.

use std::collections::VecDeque;

use parking_lot::Mutex;

const MAJOR_SET: &[&str] = &["SPY", "QQQ", "IWM", "DIA", "AAPL", "TSLA", "NVDA", "MSFT", "AMZN", "GOOGL"];
const BASIC_MAJOR_SET: &[&str] = &["SPY", "QQQ", "IWM", "DIA"];
const BASIC_CONFIDENCE_SYMBOLS: &[&str] = &["SPY", "QQQ", "IWM", "DIA", "AAPL", "TSLA", "NVDA"];

const SIGNAL_TIER_MEMORY_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum Tier {
    Vip,
    Premium,
    Basic,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Vip => "vip",
            Tier::Premium => "premium",
            Tier::Basic => "basic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalConfidence {
    High,
    Medium,
    Low,
}

/// Decides which tiers see a fill, by symbol membership in the two major sets.
pub fn tiers_for_fill(symbol: &str, tier_filtering_disabled: bool) -> Vec<Tier> {
    if tier_filtering_disabled {
        return vec![Tier::Vip, Tier::Premium, Tier::Basic];
    }
    let symbol = symbol.trim().to_ascii_uppercase();
    let mut tiers = vec![Tier::Vip];
    if MAJOR_SET.contains(&symbol.as_str()) {
        tiers.push(Tier::Premium);
    }
    if BASIC_MAJOR_SET.contains(&symbol.as_str()) {
        tiers.push(Tier::Basic);
    }
    tiers
}

/// Decides which tiers see a signal, using the default per-tier predicates:
/// vip always; premium iff confidence is HIGH or MEDIUM; basic iff confidence is HIGH
/// and the symbol is in the narrower confidence-gated set.
pub fn tiers_for_signal(symbol: &str, confidence: SignalConfidence, tier_filtering_disabled: bool) -> Vec<Tier> {
    if tier_filtering_disabled {
        return vec![Tier::Vip, Tier::Premium, Tier::Basic];
    }
    let symbol = symbol.trim().to_ascii_uppercase();
    let mut tiers = vec![Tier::Vip];
    if matches!(confidence, SignalConfidence::High | SignalConfidence::Medium) {
        tiers.push(Tier::Premium);
    }
    if confidence == SignalConfidence::High && BASIC_CONFIDENCE_SYMBOLS.contains(&symbol.as_str()) {
        tiers.push(Tier::Basic);
    }
    tiers
}

/// Insertion-ordered `signalId -> tiers` memory, FIFO-evicted at 1000 entries. Lets a
/// later fill for the same signal re-use the tier set the signal itself was routed to,
/// rather than recomputing from the fill's own (possibly different) attributes.
pub struct SignalTierMemory {
    inner: Mutex<SignalTierMemoryState>,
}

struct SignalTierMemoryState {
    order: VecDeque<String>,
    map: std::collections::HashMap<String, Vec<Tier>>,
}

impl SignalTierMemory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SignalTierMemoryState {
                order: VecDeque::new(),
                map: std::collections::HashMap::new(),
            }),
        }
    }

    pub fn track(&self, signal_id: &str, tiers: Vec<Tier>) {
        let mut state = self.inner.lock();
        if !state.map.contains_key(signal_id) {
            state.order.push_back(signal_id.to_string());
            if state.order.len() > SIGNAL_TIER_MEMORY_CAP {
                if let Some(oldest) = state.order.pop_front() {
                    state.map.remove(&oldest);
                }
            }
        }
        state.map.insert(signal_id.to_string(), tiers);
    }

    pub fn lookup(&self, signal_id: &str) -> Option<Vec<Tier>> {
        self.inner.lock().map.get(signal_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignalTierMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_symbol_gets_all_three_tiers() {
        let tiers = tiers_for_fill("SPY", false);
        assert_eq!(tiers, vec![Tier::Vip, Tier::Premium, Tier::Basic]);
    }

    #[test]
    fn premium_only_symbol_skips_basic() {
        let tiers = tiers_for_fill("AAPL", false);
        assert_eq!(tiers, vec![Tier::Vip, Tier::Premium]);
    }

    #[test]
    fn unknown_symbol_is_vip_only() {
        let tiers = tiers_for_fill("XYZ", false);
        assert_eq!(tiers, vec![Tier::Vip]);
    }

    #[test]
    fn disabled_filtering_returns_all_tiers() {
        let tiers = tiers_for_fill("XYZ", true);
        assert_eq!(tiers.len(), 3);
    }

    #[test]
    fn low_confidence_signal_is_vip_only() {
        let tiers = tiers_for_signal("SPY", SignalConfidence::Low, false);
        assert_eq!(tiers, vec![Tier::Vip]);
    }

    #[test]
    fn high_confidence_narrow_symbol_reaches_basic() {
        let tiers = tiers_for_signal("NVDA", SignalConfidence::High, false);
        assert_eq!(tiers, vec![Tier::Vip, Tier::Premium, Tier::Basic]);
    }

    #[test]
    fn memory_evicts_oldest_past_cap() {
        let memory = SignalTierMemory::new();
        for i in 0..(SIGNAL_TIER_MEMORY_CAP + 10) {
            memory.track(&format!("signal_{i}"), vec![Tier::Vip]);
        }
        assert_eq!(memory.len(), SIGNAL_TIER_MEMORY_CAP);
        assert!(memory.lookup("signal_0").is_none());
        assert!(memory.lookup(&format!("signal_{}", SIGNAL_TIER_MEMORY_CAP + 9)).is_some());
    }

    #[test]
    fn fill_can_reuse_remembered_signal_tiers() {
        let memory = SignalTierMemory::new();
        memory.track("signal_1", vec![Tier::Vip, Tier::Premium]);
        assert_eq!(memory.lookup("signal_1"), Some(vec![Tier::Vip, Tier::Premium]));
    }
}
