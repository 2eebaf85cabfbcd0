use chrono::{TimeZone, Utc};
use dialflow::dialplan::Dialplan;
use dialflow::loader::load_flow_from_yaml_str;
use dialflow::model::{Flow, QueueMap, QueueTarget};
use dialflow::{Compiler, HoursMode};
use pretty_assertions::assert_eq;

const HELPDESK: &str = r#"
id: helpdesk
prompts:
  main-menu: {en-US: "Sales press one, support press two."}
  support-menu: {en-US: "To leave a message press one."}
  invalid: {en-US: "That is not a valid choice."}
menus:
  main:
    prompt: main-menu
    max_retries: 1
    options:
      "1":
        action: queue
        queue_ref: sales
      "2":
        action: menu
        menu_ref: support-sub
  support-sub:
    prompt: support-menu
    max_retries: 1
    parent_menu: main
    options:
      "1":
        action: voicemail
        voicemail_box: "2000"
"#;

fn helpdesk_flow() -> Flow {
    load_flow_from_yaml_str(HELPDESK).unwrap()
}

fn sales_queue_map() -> QueueMap {
    let mut queues = QueueMap::new();
    queues.insert(
        "sales".to_string(),
        QueueTarget {
            context: "queue-ctx".to_string(),
            number: "600".to_string(),
            strategy: "leastrecent".to_string(),
            timeout: 20,
        },
    );
    queues
}

fn compile_helpdesk() -> Dialplan {
    Compiler::new()
        .with_queues(sales_queue_map())
        .compile(&helpdesk_flow())
        .unwrap()
}

#[test]
fn two_menu_flow_emits_every_generated_state() {
    let plan = compile_helpdesk();

    for context in ["dp-ivr-helpdesk", "menu-main", "menu-support-sub"] {
        assert!(plan.context(context).is_some(), "missing context {context}");
    }
    for menu in ["menu-main", "menu-support-sub"] {
        let context = plan.context(menu).unwrap();
        for exten in ["s", "1", "t", "i", "retry", "fallback"] {
            assert!(
                context.extension(exten).is_some(),
                "missing extension {exten} in {menu}"
            );
        }
    }
    assert!(plan.context("menu-main").unwrap().extension("2").is_some());
}

#[test]
fn queue_option_enqueues_and_terminates() {
    let plan = compile_helpdesk();
    let option = plan
        .context("menu-main")
        .unwrap()
        .extension("1")
        .unwrap()
        .to_string();
    assert!(option.contains("Set(IVR_RETRIES=0)"));
    assert!(option.contains("Queue(sales,tTk,,,20)"));
    assert!(option.ends_with("Hangup()\n"));
}

#[test]
fn menu_option_descends_into_the_submenu() {
    let plan = compile_helpdesk();
    let option = plan
        .context("menu-main")
        .unwrap()
        .extension("2")
        .unwrap()
        .to_string();
    assert!(option.contains("Set(IVR_RETRIES=0)"));
    assert!(option.ends_with("Goto(menu-support-sub,s,1)\n"));
}

#[test]
fn submenu_voicemail_option_routes_to_the_box() {
    let plan = compile_helpdesk();
    let option = plan
        .context("menu-support-sub")
        .unwrap()
        .extension("1")
        .unwrap()
        .to_string();
    // The voicemail context defaults to the flow tenant.
    assert!(option.contains("Voicemail(2000@default,u)"));
    assert!(option.ends_with("Hangup()\n"));
}

#[test]
fn timeout_and_invalid_share_the_retry_ceiling() {
    let plan = compile_helpdesk();
    let menu = plan.context("menu-main").unwrap();
    for exten in ["t", "i"] {
        let handler = menu.extension(exten).unwrap().to_string();
        assert!(
            handler.contains("Set(IVR_RETRIES=$[${IVR_RETRIES}+1])"),
            "{exten} must bump the counter"
        );
        assert!(handler.contains("GotoIf($[${IVR_RETRIES} < 1]?retry,1)"));
        assert!(handler.ends_with("Goto(fallback,1)\n"));
    }
}

#[test]
fn retry_replays_the_menu_after_the_invalid_notice() {
    let plan = compile_helpdesk();
    let retry = plan
        .context("menu-main")
        .unwrap()
        .extension("retry")
        .unwrap()
        .to_string();
    assert!(retry.contains("Playback(${IVR_SOUNDS}/invalid_${IVR_LANG})"));
    assert!(retry.ends_with("Goto(menu-main,s,1)\n"));
}

#[test]
fn unset_fallback_repeats_the_invalid_notice_and_hangs_up() {
    let plan = compile_helpdesk();
    let fallback = plan
        .context("menu-main")
        .unwrap()
        .extension("fallback")
        .unwrap()
        .to_string();
    assert!(fallback.contains("Playback(${IVR_SOUNDS}/invalid_${IVR_LANG})"));
    assert!(fallback.ends_with("Hangup()\n"));
}

#[test]
fn fallback_variants_route_as_configured() {
    let yaml = r#"
id: routed
voicemail_fallback: "8000"
prompts:
  greet: {en-US: hi}
menus:
  main:
    prompt: greet
    fallback_action: voicemail
    options:
      "1":
        action: menu
        menu_ref: to-queue
      "2":
        action: menu
        menu_ref: to-bye
  to-queue:
    prompt: greet
    parent_menu: main
    fallback_action: queue
  to-bye:
    prompt: greet
    parent_menu: main
    fallback_action: hangup
"#;
    let flow = load_flow_from_yaml_str(yaml).unwrap();
    let plan = Compiler::new().compile(&flow).unwrap();

    let voicemail = plan
        .context("menu-main")
        .unwrap()
        .extension("fallback")
        .unwrap()
        .to_string();
    assert!(voicemail.contains("Playback(${IVR_SOUNDS}/voicemail_${IVR_LANG})"));
    assert!(voicemail.contains("Voicemail(8000@default,u)"));

    let queue = plan
        .context("menu-to-queue")
        .unwrap()
        .extension("fallback")
        .unwrap()
        .to_string();
    assert!(queue.contains("Playback(${IVR_SOUNDS}/transfer_${IVR_LANG})"));
    // The shared fallback queue is not in the resolution table here.
    assert!(queue.contains("Queue(support,tTk)"));

    let hangup = plan
        .context("menu-to-bye")
        .unwrap()
        .extension("fallback")
        .unwrap()
        .to_string();
    assert!(hangup.contains("Playback(${IVR_SOUNDS}/goodbye_${IVR_LANG})"));
    assert!(hangup.ends_with("Hangup()\n"));
}

#[test]
fn pinned_timestamp_makes_output_byte_identical() {
    let flow = helpdesk_flow();
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
    let first = Compiler::new()
        .with_queues(sales_queue_map())
        .with_generated_at(at)
        .compile_to_string(&flow)
        .unwrap();
    let second = Compiler::new()
        .with_queues(sales_queue_map())
        .with_generated_at(at)
        .compile_to_string(&flow)
        .unwrap();
    assert_eq!(first, second);
    assert!(first.contains("; Generated: 2025-03-01T08:00:00+00:00"));
}

#[test]
fn unpinned_compiles_differ_only_in_the_generated_line() {
    let flow = helpdesk_flow();
    let first = Compiler::new().compile_to_string(&flow).unwrap();
    let second = Compiler::new().compile_to_string(&flow).unwrap();

    assert_eq!(first.lines().count(), second.lines().count());
    for (a, b) in first.lines().zip(second.lines()) {
        if a != b {
            assert!(
                a.starts_with("; Generated:") && b.starts_with("; Generated:"),
                "unexpected difference: {a:?} vs {b:?}"
            );
        }
    }
}

#[test]
fn two_language_flow_gets_a_selection_context() {
    let yaml = r#"
id: bilingual
languages:
  - {code: en-US, voice: Joanna}
  - {code: es-ES, voice: Conchita}
prompts:
  welcome: {en-US: hello, es-ES: hola}
menus:
  main:
    prompt: welcome
"#;
    let flow = load_flow_from_yaml_str(yaml).unwrap();
    let plan = Compiler::new().compile(&flow).unwrap();
    let selection = plan.context("lang-select-bilingual").unwrap();

    let language_branches: Vec<_> = selection
        .extensions
        .iter()
        .filter(|e| !matches!(e.exten.as_str(), "s" | "t" | "i"))
        .collect();
    assert_eq!(language_branches.len(), 2);

    let spanish = selection.extension("es-ES").unwrap().to_string();
    assert!(spanish.contains("Set(IVR_LANG=es-ES)"));
    assert!(spanish.contains("Playback(${IVR_SOUNDS}/language-confirmed_${IVR_LANG})"));
    assert!(spanish.ends_with("Goto(menu-main,s,1)\n"));

    let timeout = selection.extension("t").unwrap().to_string();
    assert!(timeout.contains("Set(IVR_LANG=en-US)"));
    assert!(timeout.ends_with("Goto(menu-main,s,1)\n"));

    let invalid = selection.extension("i").unwrap().to_string();
    assert!(invalid.contains("Playback(${IVR_SOUNDS}/invalid_${IVR_LANG})"));
    assert!(invalid.ends_with("Goto(lang-select-bilingual,s,1)\n"));
}

#[test]
fn after_hours_uses_the_flow_mailbox_when_configured() {
    let base = r#"
id: office
prompts:
  welcome: {en-US: hello}
menus:
  main:
    prompt: welcome
business_hours:
  timezone: UTC
  timeframes:
    monday: ["09:00-17:00"]
"#;
    let flow = load_flow_from_yaml_str(base).unwrap();
    let plan = Compiler::new().compile(&flow).unwrap();
    let closed = plan.context("after-hours-office").unwrap().to_string();
    assert!(closed.contains("Playback(${IVR_SOUNDS}/after-hours_${IVR_LANG})"));
    assert!(!closed.contains("Voicemail("));
    assert!(closed.ends_with("Hangup()\n"));

    let with_mailbox = format!("{base}voicemail_fallback: \"8000\"\n");
    let flow = load_flow_from_yaml_str(&with_mailbox).unwrap();
    let plan = Compiler::new().compile(&flow).unwrap();
    let closed = plan.context("after-hours-office").unwrap().to_string();
    assert!(closed.contains("Voicemail(8000@default,u)"));
}

#[test]
fn render_time_mode_is_reproducible_for_a_pinned_instant() {
    let yaml = r#"
id: baked
prompts:
  welcome: {en-US: hello}
menus:
  main:
    prompt: welcome
business_hours:
  timezone: UTC
  timeframes:
    monday: ["09:00-17:00"]
"#;
    let flow = load_flow_from_yaml_str(yaml).unwrap();
    // 2025-01-06 is a Monday.
    let at = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
    let compiler = Compiler::new()
        .with_hours_mode(HoursMode::RenderTime)
        .with_generated_at(at);
    let first = compiler.compile_to_string(&flow).unwrap();
    let second = compiler.compile_to_string(&flow).unwrap();
    assert_eq!(first, second);
    assert!(first.contains("Set(IVR_HOURS_OPEN=1)"));
}
