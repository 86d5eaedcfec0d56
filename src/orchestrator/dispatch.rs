//! Maps a whitelisted tool name to a Hands capability or the Internet
//! collaborator, shaping the raw `cmd` argument per tool along the way.

use crate::hands::Hands;
use crate::internet::Internet;

/// Ordered substring triggers consulted by the heuristic layer for short
/// requests. First match wins.
pub const INSTANT_MAP: &[(&str, &str, &str)] = &[
    ("battery", "physical", ""),
    ("power", "physical", ""),
    ("uptime", "existence", ""),
    ("ram", "stats", ""),
    ("cpu", "stats", ""),
    ("stats", "stats", ""),
    ("active window", "see_active", ""),
    ("list files", "ls", "."),
    ("processes", "proc_list", ""),
];

pub fn heuristic_lookup(request: &str) -> Option<(&'static str, &'static str)> {
    let lower = request.to_lowercase();
    INSTANT_MAP
        .iter()
        .find(|(trigger, _, _)| lower.contains(trigger))
        .map(|(_, tool, cmd)| (*tool, *cmd))
}

pub async fn dispatch(hands: &dyn Hands, internet: &Internet, tool: &str, cmd: &str) -> String {
    match tool {
        "physical" => hands.get_physical_state().await,
        "existence" => hands.get_existence_stats().await,
        "stats" => hands.get_system_stats().await,
        "see_active" => hands.read_active_window().await,
        "see_tree" => hands.observe_ui_tree().await,
        "see_raw" => hands.capture_screen().await,
        "proc_list" => hands.get_process_list().await,
        "net" => internet.swift_search(cmd).await,
        "gui_speak" => hands.speak(cmd).await,
        "ls" => {
            let path = if cmd.trim().is_empty() { "." } else { cmd };
            hands.list_dir(path).await
        }
        "gpu" => hands.get_gpu_stats().await,
        "power" => hands.get_physical_state().await,
        "startup" => hands.get_startup_items().await,
        "shell" => {
            let result = hands.execute_shell(cmd).await;
            result.output
        }
        "service" => {
            let mut parts = cmd.splitn(2, ' ');
            let name = parts.next().unwrap_or_default();
            let action = parts.next().unwrap_or("status");
            hands.manage_service(name, action).await
        }
        "gui_click" => {
            let coords: Vec<&str> = cmd.split(',').map(str::trim).collect();
            match (
                coords.first().and_then(|s| s.parse::<i32>().ok()),
                coords.get(1).and_then(|s| s.parse::<i32>().ok()),
            ) {
                (Some(x), Some(y)) => hands.gui_click(x, y).await,
                _ => format!("ERROR: invalid gui_click argument '{cmd}'"),
            }
        }
        "gui_type" => hands.gui_type(cmd).await,
        "gui_scroll" => hands.gui_scroll(cmd).await,
        _ => format!("BLOCKED: tool '{tool}' not in whitelist"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_matches_first_definition_order() {
        assert_eq!(heuristic_lookup("check battery"), Some(("physical", "")));
        assert_eq!(heuristic_lookup("list files please"), Some(("ls", ".")));
    }

    #[test]
    fn heuristic_none_for_unmatched() {
        assert_eq!(heuristic_lookup("tell me a joke"), None);
    }
}
