//! Stress scenarios for the TDoA engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// TDOA-001: Well-behaved constellation, small drift, no loss
    Nominal,

    /// TDOA-002: Oscillators near the edge of the accepted drift band
    ClockDrift,

    /// TDOA-003: Tag misses a third of all packets
    PacketLoss,

    /// TDOA-004: Every timestamp counter wraps during the run
    TimerWrap,

    /// TDOA-005: Whole constellation replaced mid-run with a small anchor table
    AnchorChurn,

    /// TDOA-006: Random pair selection instead of youngest
    RandomMatching,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Nominal,
            ScenarioId::ClockDrift,
            ScenarioId::PacketLoss,
            ScenarioId::TimerWrap,
            ScenarioId::AnchorChurn,
            ScenarioId::RandomMatching,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "nominal",
            ScenarioId::ClockDrift => "clock_drift",
            ScenarioId::PacketLoss => "packet_loss",
            ScenarioId::TimerWrap => "timer_wrap",
            ScenarioId::AnchorChurn => "anchor_churn",
            ScenarioId::RandomMatching => "random_matching",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "Round-robin anchors, 2 ppm drift, every packet received",
            ScenarioId::ClockDrift => "Clocks drift up to 8 ppm, ratios still inside the physical bound",
            ScenarioId::PacketLoss => "33% tag-side packet loss, pairs must resync",
            ScenarioId::TimerWrap => "All 40-bit counters overflow one to two seconds in",
            ScenarioId::AnchorChurn => "Anchors replaced halfway, table smaller than population",
            ScenarioId::RandomMatching => "Random matching must cover many distinct pairs",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nominal" | "tdoa-001" => Ok(ScenarioId::Nominal),
            "clock_drift" | "clockdrift" | "tdoa-002" => Ok(ScenarioId::ClockDrift),
            "packet_loss" | "packetloss" | "tdoa-003" => Ok(ScenarioId::PacketLoss),
            "timer_wrap" | "timerwrap" | "tdoa-004" => Ok(ScenarioId::TimerWrap),
            "anchor_churn" | "anchorchurn" | "tdoa-005" => Ok(ScenarioId::AnchorChurn),
            "random_matching" | "randommatching" | "tdoa-006" => Ok(ScenarioId::RandomMatching),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
