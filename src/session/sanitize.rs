//! 隐藏片段清理
//!
//! 模型输出中的 `<think>…</think>`、`<gameState>…</gameState>`、`<image …>…</image>`
//! 只面向前端展示，写入对话记录前需要移除。
//!
//! 采用线性扫描而非正则：每个开标签与其后第一个闭标签配对（非贪婪），
//! 未闭合的开标签按普通文本保留，扫描从其后继续。

/// 片段开标签的匹配方式
#[derive(Debug, Clone, Copy)]
enum Opener {
    /// 完全匹配，如 `<think>`
    Exact(&'static str),
    /// 前缀 + 属性，如 `<image src="..">`，前缀后必须紧跟 `>` 或空白
    WithAttributes(&'static str),
}

const HIDDEN_SPANS: &[(Opener, &str)] = &[
    (Opener::Exact("<think>"), "</think>"),
    (Opener::Exact("<gameState>"), "</gameState>"),
    (Opener::WithAttributes("<image"), "</image>"),
];

/// 一次查找的结果：`[from, hit)` 内没有该标记，`hit` 为 None 表示直到结尾都没有
type Lookup = Option<(usize, Option<usize>)>;

/// 查找 `needle` 在 `from` 之后首次出现的绝对位置，复用此前的查找结果
///
/// 新查找只在 `from` 越过上次命中位置后发生，同一标记的扫描区间互不重叠。
fn find_from(text: &str, needle: &str, from: usize, cache: &mut Lookup) -> Option<usize> {
    if let Some((searched_from, hit)) = *cache {
        if searched_from <= from {
            match hit {
                None => return None,
                Some(h) if h >= from => return Some(h),
                Some(_) => {}
            }
        }
    }
    let hit = text[from..].find(needle).map(|i| from + i);
    *cache = Some((from, hit));
    hit
}

/// 扫描状态，按标记缓存查找结果，整体保持线性
struct Scanner<'a> {
    text: &'a str,
    closers: [Lookup; HIDDEN_SPANS.len()],
    /// `<image` 开标签的 `>`
    gt: Lookup,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            closers: [None; HIDDEN_SPANS.len()],
            gt: None,
        }
    }

    /// 若 `start` 处是一个完整片段，返回片段结束的绝对位置
    fn span_end(&mut self, start: usize) -> Option<usize> {
        let rest = &self.text[start..];
        let (idx, body_start) = HIDDEN_SPANS
            .iter()
            .enumerate()
            .find_map(|(idx, (opener, _))| match *opener {
                Opener::Exact(tag) => rest.starts_with(tag).then_some((idx, start + tag.len())),
                Opener::WithAttributes(prefix) => {
                    let next = rest.strip_prefix(prefix)?.chars().next()?;
                    if next != '>' && !next.is_whitespace() {
                        return None;
                    }
                    let gt = find_from(self.text, ">", start + prefix.len(), &mut self.gt)?;
                    Some((idx, gt + 1))
                }
            })?;

        let closer = HIDDEN_SPANS[idx].1;
        find_from(self.text, closer, body_start, &mut self.closers[idx]).map(|c| c + closer.len())
    }
}

/// 移除所有完整的隐藏片段，片段外的文本（包括空白）原样保留
pub fn strip_hidden_spans(text: &str) -> String {
    let mut scanner = Scanner::new(text);
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('<') {
        let start = pos + rel;
        out.push_str(&text[pos..start]);

        match scanner.span_end(start) {
            Some(end) => pos = end,
            None => {
                out.push('<');
                pos = start + 1;
            }
        }
    }

    out.push_str(&text[pos..]);
    out
}
