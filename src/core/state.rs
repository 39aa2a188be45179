//! 编排状态机：状态与纯函数转移
//!
//! AwaitingModel（初始）→ AwaitingTools ↔ AwaitingModel → Done / Failed（终态）。
//! 转移本身不做 IO；副作用（调用模型、执行工具、写事件）由 orchestrator 在转移前后完成。

use serde::Serialize;

/// 会话所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingModel,
    AwaitingTools,
    Done,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Done | LoopState::Failed)
    }
}

/// 驱动转移的事件
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopEvent {
    /// 模型回复已追加到会话
    ModelReplied { has_tool_calls: bool },
    /// 本回合全部 ToolResult 已按请求顺序追加
    ToolsCompleted,
    /// 模型调用失败 / 超时、回合数用尽、取消、sink 写失败
    Fatal,
}

/// 纯转移函数；终态吸收一切事件，不合法的组合保持原状态
pub fn transition(state: LoopState, event: LoopEvent) -> LoopState {
    use LoopEvent::*;
    use LoopState::*;
    match (state, event) {
        (Done, _) | (Failed, _) => state,
        (_, Fatal) => Failed,
        (AwaitingModel, ModelReplied { has_tool_calls: true }) => AwaitingTools,
        (AwaitingModel, ModelReplied { has_tool_calls: false }) => Done,
        (AwaitingTools, ToolsCompleted) => AwaitingModel,
        (AwaitingModel, ToolsCompleted) | (AwaitingTools, ModelReplied { .. }) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_reply_finishes() {
        let s = transition(LoopState::AwaitingModel, LoopEvent::ModelReplied { has_tool_calls: false });
        assert_eq!(s, LoopState::Done);
        assert!(s.is_terminal());
    }

    #[test]
    fn test_tool_round_trip() {
        let s = transition(LoopState::AwaitingModel, LoopEvent::ModelReplied { has_tool_calls: true });
        assert_eq!(s, LoopState::AwaitingTools);
        assert_eq!(transition(s, LoopEvent::ToolsCompleted), LoopState::AwaitingModel);
    }

    #[test]
    fn test_fatal_from_any_live_state() {
        assert_eq!(transition(LoopState::AwaitingModel, LoopEvent::Fatal), LoopState::Failed);
        assert_eq!(transition(LoopState::AwaitingTools, LoopEvent::Fatal), LoopState::Failed);
    }

    #[test]
    fn test_terminal_states_absorb() {
        assert_eq!(transition(LoopState::Done, LoopEvent::Fatal), LoopState::Done);
        assert_eq!(transition(LoopState::Failed, LoopEvent::ToolsCompleted), LoopState::Failed);
    }

    #[test]
    fn test_out_of_order_events_ignored() {
        assert_eq!(
            transition(LoopState::AwaitingTools, LoopEvent::ModelReplied { has_tool_calls: false }),
            LoopState::AwaitingTools
        );
        assert_eq!(transition(LoopState::AwaitingModel, LoopEvent::ToolsCompleted), LoopState::AwaitingModel);
    }
}
