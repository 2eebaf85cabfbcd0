use crate::{
    hours::{WEEKDAY_NAMES, parse_time_range},
    model::{Flow, MenuOption},
    util::is_dialplan_ident,
};
use chrono_tz::Tz;

/// Check a flow's structural integrity before compilation. Returns one
/// message per violation, empty when the flow is sound. Checks are
/// exhausted, never short-circuited, so a single call surfaces every
/// problem.
pub fn validate(flow: &Flow) -> Vec<String> {
    let mut violations = Vec::new();

    if flow.id.is_empty() {
        violations.push("flow_id: flow id is required".to_string());
    } else if !is_dialplan_ident(&flow.id) {
        violations.push(format!(
            "flow_id: flow id '{}' is not dialplan-safe (letters, digits, '-', '_')",
            flow.id
        ));
    }

    if flow.menus.is_empty() {
        violations.push("menus: flow has no menus".to_string());
    } else {
        let roots = flow.root_menu_ids();
        if roots.is_empty() {
            violations.push("root_menu: no root menu (every menu declares a parent)".to_string());
        } else if roots.len() > 1 {
            violations.push(format!(
                "root_menu: multiple root menus: {}",
                roots.join(", ")
            ));
        }
    }

    for (menu_id, menu) in &flow.menus {
        if !is_dialplan_ident(menu_id) {
            violations.push(format!(
                "menu_id: menu '{menu_id}' is not dialplan-safe (letters, digits, '-', '_')"
            ));
        }
        if menu.prompt.is_empty() {
            violations.push(format!("menu_prompt: menu '{menu_id}' has no prompt"));
        } else if !flow.prompts.contains_key(&menu.prompt) {
            violations.push(format!(
                "menu_prompt: menu '{menu_id}' prompt '{}' not found in prompts",
                menu.prompt
            ));
        }
        if menu.timeout_sec == 0 {
            violations.push(format!(
                "menu_timeout: menu '{menu_id}' timeout_sec must be at least 1"
            ));
        }
        for (key, option) in &menu.options {
            match option {
                MenuOption::Menu { menu_ref } => {
                    if !flow.menus.contains_key(menu_ref) {
                        violations.push(format!(
                            "option_target: menu '{menu_id}' option '{key}' references unknown menu '{menu_ref}'"
                        ));
                    }
                }
                MenuOption::Queue { queue_ref } => {
                    if queue_ref.is_empty() {
                        violations.push(format!(
                            "option_target: menu '{menu_id}' option '{key}' has an empty queue_ref"
                        ));
                    }
                }
                MenuOption::Language { language } => {
                    if !flow.languages.iter().any(|l| l.code == *language) {
                        violations.push(format!(
                            "option_target: menu '{menu_id}' option '{key}' selects unconfigured language '{language}'"
                        ));
                    }
                }
                MenuOption::Extension { .. }
                | MenuOption::Voicemail { .. }
                | MenuOption::Hangup { .. }
                | MenuOption::Transfer { .. } => {}
            }
        }
    }

    if let Some(hours) = &flow.business_hours {
        if hours.timezone.parse::<Tz>().is_err() {
            violations.push(format!(
                "business_hours: timezone '{}' is not a known zone",
                hours.timezone
            ));
        }
        for (weekday, ranges) in &hours.timeframes {
            if !WEEKDAY_NAMES.contains(&weekday.as_str()) {
                violations.push(format!(
                    "business_hours: '{weekday}' is not a lowercase weekday name"
                ));
            }
            for range in ranges {
                match parse_time_range(range) {
                    None => violations.push(format!(
                        "business_hours: range '{range}' on '{weekday}' is not HH:MM-HH:MM"
                    )),
                    Some((start, end)) if start > end => violations.push(format!(
                        "business_hours: range '{range}' on '{weekday}' starts after it ends"
                    )),
                    Some(_) => {}
                }
            }
        }
    }

    violations
}
