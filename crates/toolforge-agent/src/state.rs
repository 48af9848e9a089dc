//! The reasoning finite-state machine: states and the transition table.

use serde::{Deserialize, Serialize};

/// A state of the reasoning machine. The machine starts in [`Respond`];
/// [`ExitResponse`] is the terminal.
///
/// [`Respond`]: AgentState::Respond
/// [`ExitResponse`]: AgentState::ExitResponse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Decide whether a direct answer suffices.
    Respond,
    /// Search the catalog with an oracle-chosen query.
    FetchTool,
    /// Execute a chosen tool with oracle-chosen arguments.
    UseTool,
    /// Decide whether to chain existing tools or create a new one.
    AnalyzeToolsForComposite,
    /// Synthesize and register a new tool.
    CreateTool,
    /// Terminal: carries the final answer and confidence.
    ExitResponse,
}

impl AgentState {
    /// Wire name used in oracle schemas and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Respond => "respond",
            Self::FetchTool => "fetch_tool",
            Self::UseTool => "use_tool",
            Self::AnalyzeToolsForComposite => "analyze_tools_for_composite",
            Self::CreateTool => "create_tool",
            Self::ExitResponse => "exit_response",
        }
    }

    /// All wire names, for the oracle's decision schema.
    pub fn wire_names() -> [&'static str; 6] {
        [
            "respond",
            "fetch_tool",
            "use_tool",
            "analyze_tools_for_composite",
            "create_tool",
            "exit_response",
        ]
    }

    /// States reachable from `self` by the next decision.
    pub fn allowed_next(&self) -> &'static [AgentState] {
        use AgentState::*;
        match self {
            Respond => &[ExitResponse, FetchTool, CreateTool],
            FetchTool => &[UseTool, AnalyzeToolsForComposite, CreateTool, ExitResponse],
            UseTool => &[Respond, FetchTool, ExitResponse],
            AnalyzeToolsForComposite => &[UseTool, CreateTool, FetchTool],
            CreateTool => &[UseTool, ExitResponse],
            ExitResponse => &[],
        }
    }

    /// Whether `next` is a legal successor. `current = None` means the
    /// machine is still in its initial `respond` state and the first
    /// decision may also *be* `respond`.
    pub fn may_transition(current: Option<AgentState>, next: AgentState) -> bool {
        match current {
            None => next == AgentState::Respond || AgentState::Respond.allowed_next().contains(&next),
            Some(current) => current.allowed_next().contains(&next),
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "respond" => Ok(Self::Respond),
            "fetch_tool" => Ok(Self::FetchTool),
            "use_tool" => Ok(Self::UseTool),
            "analyze_tools_for_composite" => Ok(Self::AnalyzeToolsForComposite),
            "create_tool" => Ok(Self::CreateTool),
            "exit_response" => Ok(Self::ExitResponse),
            other => Err(format!("unknown agent state `{other}`")),
        }
    }
}

/// Confidence label attached to a final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Lenient parse, defaulting to medium.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::AgentState::*;
    use super::*;

    #[test]
    fn round_trip_names() {
        for name in AgentState::wire_names() {
            let state: AgentState = name.parse().unwrap();
            assert_eq!(state.as_str(), name);
        }
        assert!("daydream".parse::<AgentState>().is_err());
    }

    #[test]
    fn terminal_has_no_successors() {
        assert!(ExitResponse.allowed_next().is_empty());
    }

    #[test]
    fn transition_table_matches_design() {
        assert!(AgentState::may_transition(Some(Respond), FetchTool));
        assert!(AgentState::may_transition(Some(Respond), ExitResponse));
        assert!(!AgentState::may_transition(Some(Respond), UseTool));

        assert!(AgentState::may_transition(Some(FetchTool), UseTool));
        assert!(AgentState::may_transition(Some(FetchTool), AnalyzeToolsForComposite));
        assert!(AgentState::may_transition(Some(FetchTool), CreateTool));
        assert!(!AgentState::may_transition(Some(FetchTool), Respond));

        assert!(AgentState::may_transition(Some(UseTool), Respond));
        assert!(AgentState::may_transition(Some(UseTool), FetchTool));
        assert!(!AgentState::may_transition(Some(UseTool), CreateTool));
        assert!(!AgentState::may_transition(Some(UseTool), UseTool));

        assert!(AgentState::may_transition(Some(AnalyzeToolsForComposite), CreateTool));
        assert!(AgentState::may_transition(Some(AnalyzeToolsForComposite), UseTool));
        assert!(!AgentState::may_transition(Some(AnalyzeToolsForComposite), ExitResponse));

        assert!(AgentState::may_transition(Some(CreateTool), UseTool));
        assert!(AgentState::may_transition(Some(CreateTool), ExitResponse));
        assert!(!AgentState::may_transition(Some(CreateTool), FetchTool));

        assert!(!AgentState::may_transition(Some(ExitResponse), Respond));
    }

    #[test]
    fn initial_decision_may_stay_in_respond() {
        assert!(AgentState::may_transition(None, Respond));
        assert!(AgentState::may_transition(None, FetchTool));
        assert!(AgentState::may_transition(None, CreateTool));
        assert!(!AgentState::may_transition(None, UseTool));
    }

    #[test]
    fn confidence_orders_and_parses() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
        assert_eq!(Confidence::parse_lenient("HIGH"), Confidence::High);
        assert_eq!(Confidence::parse_lenient("unsure"), Confidence::Medium);
    }
}
