//! 会话对话记录
//!
//! 每个连接独占一份只追加的对话记录，连接断开即丢弃，不做持久化。

use std::collections::VecDeque;

/// 轮次分隔符，同时作为上游的 stop 序列
pub const TURN_SEPARATOR: &str = "<|endofsentence|>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 单个对话轮次，追加后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// 对话记录
#[derive(Debug, Default)]
pub struct Transcript {
    turns: VecDeque<Turn>,
    /// 最多保留的轮次数；None 表示不限制
    max_turns: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建有上限的对话记录，超出时淘汰最早的完整轮次
    pub fn with_max_turns(max_turns: Option<usize>) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.filter(|n| *n > 0),
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Role::User, text.into());
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Role::Assistant, text.into());
    }

    fn push(&mut self, role: Role, text: String) {
        self.turns.push_back(Turn { role, text });
        if let Some(max) = self.max_turns {
            while self.turns.len() > max {
                self.turns.pop_front();
            }
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 渲染为上游使用的完整文本：`{Role}: {text}<SEP>` 依次拼接
    pub fn render(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            out.push_str(turn.role.label());
            out.push_str(": ");
            out.push_str(&turn.text);
            out.push_str(TURN_SEPARATOR);
        }
        out
    }
}
