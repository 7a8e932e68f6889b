// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 查询字符串模块
//!
//! 解析 `application/x-www-form-urlencoded` 风格的查询字符串，支持方括号嵌套：
//! - `a[b][c]=1` 生成嵌套对象；
//! - `a[]=1&a[]=2` 依次追加，键为当前最大整数键加一；
//! - 键名中的 `.` 与空格默认原样保留，只有显式打开 `convert_dots_spaces` 才转换为 `_`。
//!
//! 键恰好为 `0..n` 的对象在解析结束时转为数组。方括号最多嵌套 `MAX_NESTING_LEVEL` 层，
//! 超出部分并入最后一段键名。

use log::debug;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::form_urlencoded;

/// 方括号嵌套的最大层数
pub const MAX_NESTING_LEVEL: usize = 64;

/// 每次解析调用显式传入的选项
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStrOptions {
    /// 是否把顶层键名中的 `.` 与空格转换为 `_`
    #[serde(default)]
    pub convert_dots_spaces: bool,
}

impl ParseStrOptions {
    pub fn converting() -> Self {
        Self {
            convert_dots_spaces: true,
        }
    }
}

/// 拆分键名为顶层键与方括号段。未闭合的方括号视为顶层键的一部分
fn split_key(key: &str, opts: &ParseStrOptions) -> (String, Vec<String>) {
    let key = key.trim_start_matches(' ');
    let (base, mut rest) = match key.find('[') {
        Some(open) if key[open..].contains(']') => (&key[..open], &key[open..]),
        _ => (key, ""),
    };

    let mut segments: Vec<String> = Vec::new();
    while let Some(stripped) = rest.strip_prefix('[') {
        if segments.len() == MAX_NESTING_LEVEL {
            if let Some(last) = segments.last_mut() {
                last.push_str(rest);
            }
            break;
        }
        match stripped.find(']') {
            Some(close) => {
                segments.push(stripped[..close].to_string());
                rest = &stripped[close + 1..];
            }
            None => break,
        }
    }

    let base = match opts.convert_dots_spaces {
        true => base.replace(['.', ' ', '['], "_"),
        false => base.to_string(),
    };
    (base, segments)
}

/// 追加位置为当前最大整数键加一；最大键已是 `u64::MAX` 时没有可用位置
fn next_index(map: &Map<String, Value>) -> Option<u64> {
    match map.keys().filter_map(|k| k.parse::<u64>().ok()).max() {
        Some(max) => max.checked_add(1),
        None => Some(0),
    }
}

fn insert(target: &mut Map<String, Value>, key: String, segments: &[String], value: String) {
    let mut current = target;
    let mut key = key;
    for segment in segments {
        let entry = current
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(child) = entry else {
            return;
        };
        key = match segment.as_str() {
            "" => match next_index(child) {
                Some(index) => index.to_string(),
                None => {
                    debug!("追加位置已满，丢弃查询参数值");
                    return;
                }
            },
            k => k.to_string(),
        };
        current = child;
    }
    current.insert(key, Value::String(value));
}

/// 把键为 `0..n` 的对象递归转为数组
fn into_lists(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sequential = !map.is_empty()
                && map
                    .keys()
                    .enumerate()
                    .all(|(i, k)| *k == i.to_string());
            match sequential {
                true => Value::Array(map.into_iter().map(|(_, v)| into_lists(v)).collect()),
                false => Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, into_lists(v)))
                        .collect(),
                ),
            }
        }
        other => other,
    }
}

/// 解析查询字符串
pub fn parse_str(query: &str, opts: &ParseStrOptions) -> Map<String, Value> {
    let mut result = Map::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let (base, segments) = split_key(&key, opts);
        if base.is_empty() {
            continue;
        }
        insert(&mut result, base, &segments, value.into_owned());
    }
    result
        .into_iter()
        .map(|(k, v)| (k, into_lists(v)))
        .collect()
}

fn encode(input: &str) -> String {
    form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

fn append_pairs(pairs: &mut Vec<String>, prefix: String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => pairs.push(format!("{}={}", prefix, u8::from(*b))),
        Value::Number(n) => pairs.push(format!("{}={}", prefix, n)),
        Value::String(s) => pairs.push(format!("{}={}", prefix, encode(s))),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                append_pairs(pairs, format!("{}%5B{}%5D", prefix, i), item);
            }
        }
        Value::Object(map) => {
            for (k, item) in map {
                append_pairs(pairs, format!("{}%5B{}%5D", prefix, encode(k)), item);
            }
        }
    }
}

/// 把参数表序列化为查询字符串（嵌套键使用方括号，空格编码为 `+`）
pub fn build_query(params: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (k, v) in params {
        append_pairs(&mut pairs, encode(k), v);
    }
    pairs.join("&")
}
