//! 内部点位名 → 总线 topic
//!
//! topic 结构为 `{version}/{enterprise}/{site}/{area}/{line}/{mapped_name}`。
//! `mapped_name` 优先取显式覆盖表，否则把内部名规范化为小写蛇形
//! （`Process.FillVolume.Actual` → `process_fill_volume_actual`）。

use std::collections::HashMap;
use uns_config::TopicConfig;

#[derive(Debug, Clone)]
pub struct TopicMapper {
    prefix: String,
    overrides: HashMap<String, String>,
}

impl TopicMapper {
    pub fn new(config: &TopicConfig) -> Self {
        let prefix = [
            &config.version,
            &config.enterprise,
            &config.site,
            &config.area,
            &config.line,
        ]
        .iter()
        .map(|segment| segment.trim_matches('/'))
        .collect::<Vec<_>>()
        .join("/");
        Self {
            prefix,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, point_name: impl Into<String>, mapped: impl Into<String>) -> Self {
        self.overrides.insert(point_name.into(), mapped.into());
        self
    }

    pub fn mapped_name(&self, point_name: &str) -> String {
        match self.overrides.get(point_name) {
            Some(mapped) => mapped.clone(),
            None => normalize_name(point_name),
        }
    }

    pub fn map(&self, point_name: &str) -> String {
        format!("{}/{}", self.prefix, self.mapped_name(point_name))
    }
}

/// 规范化为小写蛇形：分隔符（`.` 空格 `-` `/`）转 `_`，驼峰边界插入 `_`。
pub fn normalize_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 8);
    for (index, &ch) in chars.iter().enumerate() {
        if matches!(ch, '.' | ' ' | '-' | '/' | '_') {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if ch.is_uppercase() && index > 0 && !out.is_empty() && !out.ends_with('_') {
            let prev = chars[index - 1];
            let next_is_lower = chars
                .get(index + 1)
                .map(|next| next.is_lowercase())
                .unwrap_or(false);
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.extend(ch.to_lowercase());
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
