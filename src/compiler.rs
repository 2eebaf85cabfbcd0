use crate::{
    dialplan::{App, Context, Dialplan, Extension, GotoTarget, var_ref, vars},
    error::CompileError,
    hours::{self, asterisk_weekday, parse_time_range},
    model::{BusinessHours, FallbackAction, Flow, Menu, MenuOption, QueueMap},
    settings, synth,
};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Notice prompts referenced by generated states. Authors supply their texts
/// like any other prompt; synthesis derives the audio files.
pub mod prompts {
    pub const INVALID: &str = "invalid";
    pub const VOICEMAIL: &str = "voicemail";
    pub const TRANSFER: &str = "transfer";
    pub const GOODBYE: &str = "goodbye";
    pub const AFTER_HOURS: &str = "after-hours";
    pub const LANGUAGE_PROMPT: &str = "language-prompt";
    pub const LANGUAGE_CONFIRMED: &str = "language-confirmed";
}

const QUEUE_OPTS: &str = "tTk";
const VOICEMAIL_OPTS: &str = "u";
const DEFAULT_FALLBACK_QUEUE: &str = "support";
const DEFAULT_FALLBACK_MAILBOX: &str = "1000";
const DEFAULT_TRANSFER_TIMEOUT: u32 = 30;
const LANGUAGE_SELECT_TIMEOUT: u32 = 10;
const OPEN_LABEL: &str = "open";

pub fn menu_context_name(menu_id: &str) -> String {
    format!("menu-{menu_id}")
}

pub fn after_hours_context_name(flow_id: &str) -> String {
    format!("after-hours-{flow_id}")
}

pub fn language_select_context_name(flow_id: &str) -> String {
    format!("lang-select-{flow_id}")
}

/// How the generated dialplan decides whether the flow is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HoursMode {
    /// Emit time conditions the engine evaluates on every call.
    #[default]
    PerCall,
    /// Evaluate once at compile time and bake the answer into a variable.
    /// Matches the behavior of installations that recompile on a schedule.
    RenderTime,
}

/// Renders a validated flow into a dialplan. One instance can compile any
/// number of flows; `compile` never mutates its input and is deterministic
/// for a pinned `generated_at`.
#[derive(Debug, Clone)]
pub struct Compiler {
    queues: QueueMap,
    hours_mode: HoursMode,
    generated_at: Option<DateTime<Utc>>,
    fallback_queue: String,
    sounds_root: PathBuf,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            queues: QueueMap::new(),
            hours_mode: HoursMode::default(),
            generated_at: None,
            fallback_queue: DEFAULT_FALLBACK_QUEUE.to_string(),
            sounds_root: PathBuf::from(settings::DEFAULT_SOUNDS_DIR),
        }
    }

    /// Queue-resolution table; compiled `Queue()` steps take their timeout
    /// from it when the referenced queue is present.
    pub fn with_queues(mut self, queues: QueueMap) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_hours_mode(mut self, mode: HoursMode) -> Self {
        self.hours_mode = mode;
        self
    }

    /// Pin the embedded generation timestamp for reproducible output. The
    /// same instant feeds the `RenderTime` hours decision.
    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    /// Queue used by menus whose fallback action is `queue`.
    pub fn with_fallback_queue(mut self, name: impl Into<String>) -> Self {
        self.fallback_queue = name.into();
        self
    }

    pub fn with_sounds_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sounds_root = root.into();
        self
    }

    /// Compile to the structured dialplan. Fails only when the flow has no
    /// unique root menu; all other integrity problems are the validator's
    /// job and must be resolved before compilation.
    pub fn compile(&self, flow: &Flow) -> Result<Dialplan, CompileError> {
        let root_menu = root_menu(flow)?;
        let generated_at = self.generated_at.unwrap_or_else(Utc::now);

        let mut plan = Dialplan {
            header: vec![
                format!("===== IVR Flow: {} =====", flow.id),
                format!("Generated: {}", generated_at.to_rfc3339()),
                format!("Tenant: {}", flow.tenant),
            ],
            contexts: Vec::new(),
        };

        plan.contexts
            .push(self.entry_context(flow, root_menu, generated_at));
        for (menu_id, menu) in &flow.menus {
            plan.contexts.push(self.menu_context(flow, menu_id, menu));
        }
        if flow.business_hours.is_some() {
            plan.contexts.push(self.after_hours_context(flow));
        }
        if flow.languages.len() > 1 {
            plan.contexts
                .push(self.language_select_context(flow, root_menu));
        }
        Ok(plan)
    }

    /// Compile straight to dialplan text.
    pub fn compile_to_string(&self, flow: &Flow) -> Result<String, CompileError> {
        Ok(self.compile(flow)?.to_string())
    }

    fn entry_context(
        &self,
        flow: &Flow,
        root_menu: &str,
        generated_at: DateTime<Utc>,
    ) -> Context {
        let mut ext = Extension::new("s")
            .step(App::NoOp(format!(
                "IVR {} - Call from {}",
                flow.id,
                var_ref("CALLERID(num)")
            )))
            .step(App::Answer);
        for app in self.call_setup_apps(flow) {
            ext = ext.step(app);
        }
        if let Some(hours) = &flow.business_hours {
            ext = self.hours_gate(flow, hours, ext, generated_at);
        }
        if flow.call_recording.enabled {
            ext = ext.step(App::MixMonitor(format!(
                "{}.{}",
                var_ref("UNIQUEID"),
                flow.call_recording.format
            )));
        }
        ext = ext.step(App::Goto(GotoTarget::context(
            menu_context_name(root_menu),
            "s",
        )));

        let mut context = Context::new(flow.entry_context.clone());
        context.push(ext);
        context
    }

    /// Call-scoped variable roster shared by the entry context and the
    /// language-selection entry.
    fn call_setup_apps(&self, flow: &Flow) -> Vec<App> {
        let sounds_dir = synth::flow_sounds_dir(&self.sounds_root, &flow.tenant, &flow.id);
        vec![
            App::set(vars::SOUNDS, sounds_dir.display().to_string()),
            App::set(vars::FLOW_ID, flow.id.clone()),
            App::set(vars::TENANT, flow.tenant.clone()),
            App::set(vars::LANG, flow.default_language()),
            App::set(vars::DEPTH, "0"),
            App::set(vars::RETRIES, "0"),
            App::set(vars::MAX_RETRIES, flow.retry_ceiling().to_string()),
        ]
    }

    fn hours_gate(
        &self,
        flow: &Flow,
        hours: &BusinessHours,
        mut ext: Extension,
        generated_at: DateTime<Utc>,
    ) -> Extension {
        let after_hours = GotoTarget::context(after_hours_context_name(&flow.id), "s");
        match self.hours_mode {
            HoursMode::PerCall => {
                for (weekday, ranges) in &hours.timeframes {
                    let Some(short) = asterisk_weekday(weekday) else {
                        continue;
                    };
                    for range in ranges {
                        if parse_time_range(range).is_none() {
                            continue;
                        }
                        ext = ext.step(App::GotoIfTime {
                            times: range.trim().to_string(),
                            weekdays: short.to_string(),
                            label: OPEN_LABEL.to_string(),
                        });
                    }
                }
                ext = ext.step(App::Goto(after_hours));
                ext = ext.labeled_step(OPEN_LABEL, App::NoOp("Within business hours".to_string()));
            }
            HoursMode::RenderTime => {
                let open = hours::is_open(flow, generated_at);
                ext = ext.step(App::set(vars::HOURS_OPEN, if open { "1" } else { "0" }));
                ext = ext.step(App::GotoIf {
                    condition: format!("$[\"{}\"=\"0\"]", var_ref(vars::HOURS_OPEN)),
                    then: after_hours,
                });
            }
        }
        ext
    }

    fn menu_context(&self, flow: &Flow, menu_id: &str, menu: &Menu) -> Context {
        let mut context =
            Context::new(menu_context_name(menu_id)).with_banner(format!("Menu: {menu_id}"));

        context.push(
            Extension::new("s")
                .step(App::NoOp(format!(
                    "Menu {menu_id} - Level {}",
                    var_ref(vars::DEPTH)
                )))
                .step(App::set(vars::CURRENT_MENU, menu_id))
                .step(App::set(
                    vars::DEPTH,
                    format!("$[{}+1]", var_ref(vars::DEPTH)),
                ))
                .step(App::Playback(prompt_path(&menu.prompt)))
                .step(App::WaitExten(menu.timeout_sec)),
        );

        for (key, option) in &menu.options {
            context.push(self.option_extension(flow, menu_id, key, option));
        }

        context.push(self.input_failure_extension(
            "t",
            format!("Timeout in menu {menu_id}"),
            format!("Timeout handling for {menu_id}"),
            menu,
        ));
        context.push(self.input_failure_extension(
            "i",
            format!("Invalid input in menu {menu_id}"),
            format!("Invalid input handling for {menu_id}"),
            menu,
        ));

        context.push(
            Extension::new("retry")
                .with_comment(format!("Retry logic for {menu_id}"))
                .step(App::NoOp(format!(
                    "Retry {menu_id} - Attempt {}",
                    var_ref(vars::RETRIES)
                )))
                .step(App::Playback(prompt_path(prompts::INVALID)))
                .step(App::Goto(GotoTarget::context(
                    menu_context_name(menu_id),
                    "s",
                ))),
        );

        context.push(self.fallback_extension(flow, menu_id, menu));
        context
    }

    /// Shared shape of the `t` and `i` handlers: bump the retry counter,
    /// retry below the menu ceiling, otherwise fall back.
    fn input_failure_extension(
        &self,
        exten: &str,
        trace: String,
        comment: String,
        menu: &Menu,
    ) -> Extension {
        Extension::new(exten)
            .with_comment(comment)
            .step(App::NoOp(trace))
            .step(App::set(
                vars::RETRIES,
                format!("$[{}+1]", var_ref(vars::RETRIES)),
            ))
            .step(App::GotoIf {
                condition: format!("$[{} < {}]", var_ref(vars::RETRIES), menu.max_retries),
                then: GotoTarget::local("retry"),
            })
            .step(App::Goto(GotoTarget::local("fallback")))
    }

    fn option_extension(
        &self,
        flow: &Flow,
        menu_id: &str,
        key: &str,
        option: &MenuOption,
    ) -> Extension {
        let mut ext = Extension::new(key).step(App::NoOp(format!(
            "Option {key}: {}",
            option.action()
        )));
        match option {
            MenuOption::Menu { menu_ref } => {
                ext = ext.step(reset_retries()).step(App::Goto(GotoTarget::context(
                    menu_context_name(menu_ref),
                    "s",
                )));
            }
            MenuOption::Queue { queue_ref } => {
                ext = ext.step(reset_retries());
                ext = self.maybe_record(flow, ext);
                ext = ext.step(self.queue_app(queue_ref)).step(App::Hangup);
            }
            MenuOption::Extension { context, extension } => {
                ext = ext.step(reset_retries());
                ext = self.maybe_record(flow, ext);
                ext = ext.step(App::Goto(GotoTarget::context(
                    context.clone(),
                    extension.clone(),
                )));
            }
            MenuOption::Voicemail {
                voicemail_box,
                context,
            } => {
                ext = ext.step(reset_retries());
                ext = self.maybe_record(flow, ext);
                ext = ext
                    .step(App::Voicemail {
                        mailbox: voicemail_box.clone(),
                        context: context.clone().unwrap_or_else(|| flow.tenant.clone()),
                        options: VOICEMAIL_OPTS.to_string(),
                    })
                    .step(App::Hangup);
            }
            MenuOption::Hangup { prompt } => {
                ext = ext
                    .step(App::Playback(prompt_path(prompt)))
                    .step(App::Hangup);
            }
            MenuOption::Transfer {
                destination,
                timeout,
            } => {
                ext = ext.step(reset_retries());
                ext = self.maybe_record(flow, ext);
                ext = ext
                    .step(App::Dial {
                        destination: destination.clone(),
                        timeout: timeout.unwrap_or(DEFAULT_TRANSFER_TIMEOUT),
                    })
                    .step(App::Hangup);
            }
            MenuOption::Language { language } => {
                ext = ext
                    .step(App::set(vars::LANG, language.clone()))
                    .step(App::Goto(GotoTarget::context(
                        menu_context_name(menu_id),
                        "s",
                    )));
            }
        }
        ext
    }

    fn fallback_extension(&self, flow: &Flow, menu_id: &str, menu: &Menu) -> Extension {
        let mut ext = Extension::new("fallback")
            .with_comment(format!("Fallback handling for {menu_id}"))
            .step(App::NoOp(format!("Fallback for {menu_id}")));
        match menu.fallback_action {
            Some(FallbackAction::Voicemail) => {
                let mailbox = flow
                    .voicemail_fallback
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FALLBACK_MAILBOX.to_string());
                ext = ext
                    .step(App::Playback(prompt_path(prompts::VOICEMAIL)))
                    .step(App::Voicemail {
                        mailbox,
                        context: flow.tenant.clone(),
                        options: VOICEMAIL_OPTS.to_string(),
                    });
            }
            Some(FallbackAction::Queue) => {
                ext = ext
                    .step(App::Playback(prompt_path(prompts::TRANSFER)))
                    .step(self.queue_app(&self.fallback_queue));
            }
            Some(FallbackAction::Hangup) => {
                ext = ext.step(App::Playback(prompt_path(prompts::GOODBYE)));
            }
            None => {
                ext = ext.step(App::Playback(prompt_path(prompts::INVALID)));
            }
        }
        ext.step(App::Hangup)
    }

    fn after_hours_context(&self, flow: &Flow) -> Context {
        let mut ext = Extension::new("s")
            .step(App::NoOp(format!("After hours - {}", flow.id)))
            .step(App::Playback(prompt_path(prompts::AFTER_HOURS)));
        if let Some(mailbox) = &flow.voicemail_fallback {
            ext = ext.step(App::Voicemail {
                mailbox: mailbox.clone(),
                context: flow.tenant.clone(),
                options: VOICEMAIL_OPTS.to_string(),
            });
        }
        ext = ext.step(App::Hangup);

        let mut context =
            Context::new(after_hours_context_name(&flow.id)).with_banner("After Hours".to_string());
        context.push(ext);
        context
    }

    /// Alternative entry that asks the caller for a language first. Sets the
    /// full variable roster so it works as an entry point on its own.
    fn language_select_context(&self, flow: &Flow, root_menu: &str) -> Context {
        let name = language_select_context_name(&flow.id);
        let mut context =
            Context::new(name.clone()).with_banner("Language Selection".to_string());

        let mut entry = Extension::new("s")
            .step(App::NoOp(format!("Language selection - {}", flow.id)))
            .step(App::Answer);
        for app in self.call_setup_apps(flow) {
            entry = entry.step(app);
        }
        entry = entry
            .step(App::Playback(prompt_path(prompts::LANGUAGE_PROMPT)))
            .step(App::WaitExten(LANGUAGE_SELECT_TIMEOUT));
        context.push(entry);

        for language in &flow.languages {
            context.push(
                Extension::new(language.code.clone())
                    .step(App::NoOp(format!("Set language to {}", language.code)))
                    .step(App::set(vars::LANG, language.code.clone()))
                    .step(App::Playback(prompt_path(prompts::LANGUAGE_CONFIRMED)))
                    .step(App::Goto(GotoTarget::context(
                        menu_context_name(root_menu),
                        "s",
                    ))),
            );
        }

        context.push(
            Extension::new("t")
                .step(App::NoOp("Language selection timeout".to_string()))
                .step(App::set(vars::LANG, flow.default_language()))
                .step(App::Goto(GotoTarget::context(
                    menu_context_name(root_menu),
                    "s",
                ))),
        );
        context.push(
            Extension::new("i")
                .step(App::NoOp("Invalid language selection".to_string()))
                .step(App::Playback(prompt_path(prompts::INVALID)))
                .step(App::Goto(GotoTarget::context(name, "s"))),
        );
        context
    }

    fn maybe_record(&self, flow: &Flow, ext: Extension) -> Extension {
        if flow.recording.enabled {
            ext.step(App::MixMonitor(format!(
                "{}.{}",
                var_ref("UNIQUEID"),
                flow.recording.format
            )))
        } else {
            ext
        }
    }

    fn queue_app(&self, queue_ref: &str) -> App {
        match self.queues.get(queue_ref) {
            Some(target) => App::Queue {
                name: queue_ref.to_string(),
                options: QUEUE_OPTS.to_string(),
                timeout: Some(target.timeout),
            },
            None => {
                tracing::debug!(
                    queue = queue_ref,
                    "queue not in resolution table; dialing by name without a timeout"
                );
                App::Queue {
                    name: queue_ref.to_string(),
                    options: QUEUE_OPTS.to_string(),
                    timeout: None,
                }
            }
        }
    }
}

fn root_menu(flow: &Flow) -> Result<&str, CompileError> {
    let candidates = flow.root_menu_ids();
    match candidates.as_slice() {
        [] => Err(CompileError::NoRootMenu(flow.id.clone())),
        [root] => Ok(*root),
        _ => Err(CompileError::AmbiguousRootMenu {
            flow_id: flow.id.clone(),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

fn reset_retries() -> App {
    App::set(vars::RETRIES, "0")
}

fn prompt_path(prompt: &str) -> String {
    format!("{}/{prompt}_{}", var_ref(vars::SOUNDS), var_ref(vars::LANG))
}
