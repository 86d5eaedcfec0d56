//! Protocol parser ("Soul"): turns a streamed model response into typed
//! events by parsing `THINK:` / `SAY:` / `ACT:` line prefixes, with a
//! keyword-intent fallback when the model never emits a recognizable
//! action. Direct descendant of the prototype's `ACTION:`/`TALK:` parsing
//! in `brain_v2.py`, renamed to this repo's own prefixes and given a
//! two-tier (regex-first, keyword-fallback) structure in the style of this
//! codebase's existing tool-call parser.

use crate::brain::{Chunk, LlmClient};
use crate::hands::Action;
use crate::safety::SAFE_TOOLS;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Reasoning(String),
    Talk(String),
    Action(Vec<Action>),
}

static ACT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*ACT:\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*(.*)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    None,
    Think,
    Say,
    Act,
}

/// Incremental THINK/SAY/ACT line parser. Feed chunks as they stream in;
/// `finish` flushes the final partial line and returns the resolved actions.
pub struct ProtocolParser {
    carry: String,
    mode: Segment,
    act_text: String,
    full_response: String,
}

impl ProtocolParser {
    pub fn new() -> Self {
        Self {
            carry: String::new(),
            mode: Segment::None,
            act_text: String::new(),
            full_response: String::new(),
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.full_response.push_str(chunk);
        self.carry.push_str(chunk);
        let mut events = Vec::new();
        while let Some(nl) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=nl).collect();
            self.consume_line(line.trim_end_matches('\n'), &mut events);
        }
        events
    }

    pub fn finish(&mut self, original_request: &str) -> (Vec<StreamEvent>, Vec<Action>) {
        let mut events = Vec::new();
        if !self.carry.is_empty() {
            let line = std::mem::take(&mut self.carry);
            self.consume_line(&line, &mut events);
        }
        let actions = self.resolve_actions(original_request);
        if !actions.is_empty() {
            events.push(StreamEvent::Action(actions.clone()));
        }
        (events, actions)
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let trimmed = line.trim_start();
        if let Some(rest) = strip_prefix_ci(trimmed, "THINK:") {
            self.mode = Segment::Think;
            push_nonempty(events, StreamEvent::Reasoning, rest);
        } else if let Some(rest) = strip_prefix_ci(trimmed, "SAY:") {
            self.mode = Segment::Say;
            push_nonempty(events, StreamEvent::Talk, rest);
        } else if let Some(rest) = strip_prefix_ci(trimmed, "ACT:") {
            self.mode = Segment::Act;
            self.act_text.push_str(rest);
            self.act_text.push('\n');
        } else {
            match self.mode {
                Segment::Think => push_nonempty(events, StreamEvent::Reasoning, line),
                Segment::Say => push_nonempty(events, StreamEvent::Talk, line),
                Segment::Act => {
                    self.act_text.push_str(line);
                    self.act_text.push('\n');
                }
                Segment::None => {}
            }
        }
    }

    fn resolve_actions(&self, original_request: &str) -> Vec<Action> {
        let mut found = parse_act_lines(&self.act_text);
        if found.is_empty() {
            found = parse_act_lines(&self.full_response);
        }
        if found.is_empty() {
            found = intent_fallback(&self.full_response, original_request);
        }
        found.into_iter().map(normalize_action).collect()
    }
}

impl Default for ProtocolParser {
    fn default() -> Self {
        Self::new()
    }
}

fn push_nonempty(events: &mut Vec<StreamEvent>, ctor: impl Fn(String) -> StreamEvent, text: &str) {
    let t = text.trim();
    if !t.is_empty() {
        events.push(ctor(t.to_string()));
    }
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn parse_act_lines(text: &str) -> Vec<Action> {
    ACT_LINE
        .captures_iter(text)
        .map(|c| Action {
            tool: c[1].to_string(),
            cmd: c[2].trim().to_string(),
        })
        .collect()
}

/// If the tool isn't whitelisted, try a bidirectional substring fuzzy match
/// against the whitelist before giving up and falling back to `stats`.
fn normalize_action(action: Action) -> Action {
    let tool_lower = action.tool.to_lowercase();
    if SAFE_TOOLS.contains(&tool_lower.as_str()) {
        return Action {
            tool: tool_lower,
            ..action
        };
    }
    for candidate in SAFE_TOOLS {
        let candidate: &str = candidate;
        if candidate.contains(tool_lower.as_str()) || tool_lower.contains(candidate) {
            return Action {
                tool: candidate.to_string(),
                ..action
            };
        }
    }
    Action {
        tool: "stats".to_string(),
        ..action
    }
}

/// (tool, trigger keywords) in discovery-priority order.
const TOOL_MAP: &[(&str, &[&str])] = &[
    ("physical", &["battery", "power level", "charge"]),
    ("existence", &["uptime", "how long have you been", "are you alive"]),
    ("proc_list", &["process", "processes", "running programs"]),
    ("ls", &["list files", "files in", "what's in", "contents of"]),
    ("see_active", &["active window", "current window", "what am i looking at"]),
    ("net", &["search", "look up", "internet"]),
    ("gui_speak", &["say ", "tell me", "speak"]),
    ("stats", &["cpu", "ram", "memory usage", "system stats"]),
];

fn intent_fallback(full_response: &str, original_request: &str) -> Vec<Action> {
    let haystack = format!("{full_response} {original_request}").to_lowercase();
    let mut actions = Vec::new();
    for (tool, keywords) in TOOL_MAP {
        if keywords.iter().any(|kw| haystack.contains(kw)) {
            actions.push(Action {
                tool: tool.to_string(),
                cmd: build_cmd(tool, original_request),
            });
        }
    }
    actions
}

/// Leading verbs stripped from a web-search intent's synthesized cmd, longest
/// phrase first so "search for" doesn't leave a dangling "for".
const SEARCH_VERBS: &[&str] = &["search for", "look up", "look for", "search", "google"];

fn build_cmd(tool: &str, request: &str) -> String {
    let lower = request.to_lowercase();
    let stripped = strip_other_tool_keywords(tool, &lower);
    match tool {
        "ls" => extract_path(&stripped).unwrap_or_else(|| ".".to_string()),
        "net" => strip_leading_verbs(&trim_filler(&stripped)),
        _ => trim_filler(&stripped),
    }
}

/// Removes every OTHER tool's trigger keywords (substring match) from `text`
/// so a multi-intent request doesn't leak a sibling tool's phrase into this
/// tool's synthesized cmd.
fn strip_other_tool_keywords(tool: &str, text: &str) -> String {
    let mut out = text.to_string();
    for (other_tool, keywords) in TOOL_MAP {
        if *other_tool == tool {
            continue;
        }
        for kw in *keywords {
            out = out.replace(kw, " ");
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_verbs(text: &str) -> String {
    let s = text.trim();
    for verb in SEARCH_VERBS {
        if let Some(rest) = s.strip_prefix(verb) {
            return rest.trim().to_string();
        }
    }
    s.to_string()
}

fn extract_path(lower: &str) -> Option<String> {
    for marker in [" in ", " of "] {
        if let Some(idx) = lower.find(marker) {
            let mut rest = lower[idx + marker.len()..].trim().to_string();
            for suffix in ["directory", "folder"] {
                rest = rest.trim_end_matches(suffix).trim().to_string();
            }
            if !rest.is_empty() {
                return Some(rest);
            }
        }
    }
    None
}

fn trim_filler(lower: &str) -> String {
    let mut s = lower.trim();
    for prefix in ["in ", "for ", "using ", "about ", "the ", "a "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim();
        }
    }
    for suffix in [" directory", " folder"] {
        if let Some(rest) = s.strip_suffix(suffix) {
            s = rest.trim();
        }
    }
    s.to_string()
}

/// Drives a streaming request/response through the protocol parser,
/// forwarding typed events as they resolve.
pub async fn execute_task_stream(
    brain: &dyn LlmClient,
    system_prompt: &str,
    user_request: &str,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(64);
    let mut upstream = brain.think_stream(system_prompt, user_request).await;
    let mut parser = ProtocolParser::new();
    let request = user_request.to_string();

    tokio::spawn(async move {
        while let Some(chunk) = upstream.recv().await {
            match chunk {
                Chunk::Text(text) => {
                    for event in parser.feed(&text) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Chunk::Error(e) => {
                    let _ = tx.send(StreamEvent::Talk(format!("ERROR: {e}"))).await;
                    return;
                }
            }
        }
        let (events, _actions) = parser.finish(&request);
        for event in events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });

    rx
}

/// Pure, result-aware summarization pass: given the original request and a
/// tool's result, returns a talk-only event stream. Falls back to emitting
/// the raw response as talk if the model never used a `SAY:` prefix.
pub async fn synthesize(
    brain: &dyn LlmClient,
    original_request: &str,
    tool_result: &str,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(16);
    let system_prompt = "Summarize the tool result for the user in one or two SAY: lines.";
    let user_prompt = format!("Request: {original_request}\nResult: {tool_result}");
    let full = brain.think(system_prompt, &user_prompt).await;

    tokio::spawn(async move {
        let mut parser = ProtocolParser::new();
        for event in parser.feed(&full) {
            if let StreamEvent::Talk(_) = &event {
                let _ = tx.send(event).await;
            }
        }
        let (events, _) = parser.finish(original_request);
        let mut any_talk = false;
        for event in events {
            if let StreamEvent::Talk(_) = &event {
                any_talk = true;
                let _ = tx.send(event).await;
            }
        }
        if !any_talk && !full.trim().is_empty() && parser_had_no_prefixes(&full) {
            let _ = tx.send(StreamEvent::Talk(full.trim().to_string())).await;
        }
    });

    rx
}

fn parser_had_no_prefixes(full: &str) -> bool {
    !full.to_lowercase().contains("think:")
        && !full.to_lowercase().contains("say:")
        && !full.to_lowercase().contains("act:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_think_say_act_lines() {
        let mut parser = ProtocolParser::new();
        let mut events = parser.feed("THINK: user asks window\nSAY: Checking.\nACT: see_active,\n");
        let (finish_events, actions) = parser.finish("what is my active window");
        events.extend(finish_events);

        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Reasoning(t) if t == "user asks window")));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Talk(t) if t == "Checking.")));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].tool, "see_active");
    }

    #[test]
    fn unknown_tool_normalizes_by_fuzzy_match_then_stats() {
        let mut parser = ProtocolParser::new();
        parser.feed("ACT: lss,.\n");
        let (_, actions) = parser.finish("list files");
        assert_eq!(actions[0].tool, "ls");

        let mut parser2 = ProtocolParser::new();
        parser2.feed("ACT: wizard,do-it\n");
        let (_, actions2) = parser2.finish("run mytool");
        assert_eq!(actions2[0].tool, "stats");
    }

    #[test]
    fn falls_back_to_intent_keywords_when_no_act_line() {
        let mut parser = ProtocolParser::new();
        parser.feed("SAY: Sure, checking your battery now.\n");
        let (_, actions) = parser.finish("check battery");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].tool, "physical");
    }

    #[test]
    fn net_intent_strips_leading_search_verb_and_other_tools_keywords() {
        let actions = intent_fallback("", "search for battery status");
        let net = actions.iter().find(|a| a.tool == "net").unwrap();
        assert_eq!(net.cmd, "status");
    }

    #[test]
    fn gui_speak_intent_does_not_leak_a_sibling_tools_keywords() {
        let actions = intent_fallback("", "say the battery level and list files in /tmp");
        let gui_speak = actions.iter().find(|a| a.tool == "gui_speak").unwrap();
        assert!(!gui_speak.cmd.contains("list files in"));
    }

    #[test]
    fn multiple_act_lines_yield_multiple_actions_in_order() {
        let mut parser = ProtocolParser::new();
        parser.feed("ACT: physical,\nACT: stats,\n");
        let (_, actions) = parser.finish("battery and cpu");
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].tool, "physical");
        assert_eq!(actions[1].tool, "stats");
    }
}
