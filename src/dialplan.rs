use std::fmt;

/// Channel variables set by generated dialplans. Call-scoped state lives in
/// these and nowhere else.
pub mod vars {
    pub const SOUNDS: &str = "IVR_SOUNDS";
    pub const FLOW_ID: &str = "IVR_FLOW_ID";
    pub const TENANT: &str = "IVR_TENANT";
    pub const LANG: &str = "IVR_LANG";
    pub const DEPTH: &str = "IVR_DEPTH";
    pub const RETRIES: &str = "IVR_RETRIES";
    pub const MAX_RETRIES: &str = "IVR_MAX_RETRIES";
    pub const CURRENT_MENU: &str = "IVR_CURRENT_MENU";
    pub const HOURS_OPEN: &str = "IVR_HOURS_OPEN";
}

/// `${NAME}` reference for use inside application arguments.
pub fn var_ref(name: &str) -> String {
    format!("${{{name}}}")
}

/// A compiled dialplan: header comments plus contexts in emission order.
/// Rendering via `Display` is the only serialization; the structure stays
/// inspectable so tests can follow transitions without a call engine.
#[derive(Debug, Clone, Default)]
pub struct Dialplan {
    pub header: Vec<String>,
    pub contexts: Vec<Context>,
}

impl Dialplan {
    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }
}

/// One `[name]` section.
#[derive(Debug, Clone)]
pub struct Context {
    pub name: String,
    /// Section banner rendered as `; ===== banner =====` above the context.
    pub banner: Option<String>,
    pub extensions: Vec<Extension>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            banner: None,
            extensions: Vec::new(),
        }
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn push(&mut self, extension: Extension) {
        self.extensions.push(extension);
    }

    pub fn extension(&self, exten: &str) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.exten == exten)
    }
}

/// One extension: a pattern (`s`, a digit, `t`, `i`, ...) and its steps.
/// The first step renders at priority 1, the rest as `same => n`.
#[derive(Debug, Clone)]
pub struct Extension {
    pub exten: String,
    /// Comment line rendered above the `exten =>` line.
    pub comment: Option<String>,
    pub steps: Vec<Step>,
}

impl Extension {
    pub fn new(exten: impl Into<String>) -> Self {
        Self {
            exten: exten.into(),
            comment: None,
            steps: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn step(mut self, app: App) -> Self {
        self.steps.push(Step { label: None, app });
        self
    }

    pub fn labeled_step(mut self, label: impl Into<String>, app: App) -> Self {
        self.steps.push(Step {
            label: Some(label.into()),
            app,
        });
        self
    }

    pub fn apps(&self) -> impl Iterator<Item = &App> {
        self.steps.iter().map(|s| &s.app)
    }

    /// Targets of every unconditional or conditional goto in this extension.
    pub fn goto_targets(&self) -> Vec<&GotoTarget> {
        self.apps()
            .filter_map(|app| match app {
                App::Goto(target) | App::GotoIf { then: target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    /// Priority label, rendered as `n(label)`.
    pub label: Option<String>,
    pub app: App,
}

/// Where a goto lands. Priority is always 1; generated states are entered at
/// their first step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GotoTarget {
    /// Extension in the current context.
    Local { exten: String },
    /// Extension in another context.
    Context { context: String, exten: String },
}

impl GotoTarget {
    pub fn local(exten: impl Into<String>) -> Self {
        GotoTarget::Local {
            exten: exten.into(),
        }
    }

    pub fn context(context: impl Into<String>, exten: impl Into<String>) -> Self {
        GotoTarget::Context {
            context: context.into(),
            exten: exten.into(),
        }
    }
}

impl fmt::Display for GotoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GotoTarget::Local { exten } => write!(f, "{exten},1"),
            GotoTarget::Context { context, exten } => write!(f, "{context},{exten},1"),
        }
    }
}

/// The dialplan applications generated dialplans use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum App {
    NoOp(String),
    Answer,
    Set { var: String, value: String },
    Playback(String),
    WaitExten(u32),
    Goto(GotoTarget),
    GotoIf { condition: String, then: GotoTarget },
    /// Branch to a priority label while the wall clock matches.
    GotoIfTime {
        times: String,
        weekdays: String,
        label: String,
    },
    MixMonitor(String),
    Queue {
        name: String,
        options: String,
        timeout: Option<u32>,
    },
    Voicemail {
        mailbox: String,
        context: String,
        options: String,
    },
    Dial { destination: String, timeout: u32 },
    Hangup,
}

impl App {
    pub fn set(var: &str, value: impl Into<String>) -> Self {
        App::Set {
            var: var.to_string(),
            value: value.into(),
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            App::NoOp(message) => write!(f, "NoOp({message})"),
            App::Answer => write!(f, "Answer()"),
            App::Set { var, value } => write!(f, "Set({var}={value})"),
            App::Playback(path) => write!(f, "Playback({path})"),
            App::WaitExten(seconds) => write!(f, "WaitExten({seconds})"),
            App::Goto(target) => write!(f, "Goto({target})"),
            App::GotoIf { condition, then } => write!(f, "GotoIf({condition}?{then})"),
            App::GotoIfTime {
                times,
                weekdays,
                label,
            } => write!(f, "GotoIfTime({times},{weekdays},*,*?{label})"),
            App::MixMonitor(file) => write!(f, "MixMonitor({file})"),
            App::Queue {
                name,
                options,
                timeout: Some(timeout),
            } => write!(f, "Queue({name},{options},,,{timeout})"),
            App::Queue {
                name,
                options,
                timeout: None,
            } => write!(f, "Queue({name},{options})"),
            App::Voicemail {
                mailbox,
                context,
                options,
            } => write!(f, "Voicemail({mailbox}@{context},{options})"),
            App::Dial {
                destination,
                timeout,
            } => write!(f, "Dial({destination},{timeout})"),
            App::Hangup => write!(f, "Hangup()"),
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(comment) = &self.comment {
            writeln!(f, "; {comment}")?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i == 0 {
                match &step.label {
                    Some(label) => writeln!(f, "exten => {},1({label}),{}", self.exten, step.app)?,
                    None => writeln!(f, "exten => {},1,{}", self.exten, step.app)?,
                }
            } else {
                match &step.label {
                    Some(label) => writeln!(f, " same => n({label}),{}", step.app)?,
                    None => writeln!(f, " same => n,{}", step.app)?,
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(banner) = &self.banner {
            writeln!(f, "; ===== {banner} =====")?;
        }
        writeln!(f, "[{}]", self.name)?;
        for (i, extension) in self.extensions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{extension}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Dialplan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.header {
            writeln!(f, "; {line}")?;
        }
        for context in &self.contexts {
            writeln!(f)?;
            write!(f, "{context}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_renders_first_step_at_priority_one() {
        let ext = Extension::new("s")
            .step(App::NoOp("hello".to_string()))
            .step(App::Answer)
            .step(App::Hangup);
        assert_eq!(
            ext.to_string(),
            "exten => s,1,NoOp(hello)\n same => n,Answer()\n same => n,Hangup()\n"
        );
    }

    #[test]
    fn labeled_step_renders_inline_label() {
        let ext = Extension::new("s")
            .step(App::NoOp("x".to_string()))
            .labeled_step("open", App::Answer);
        assert!(ext.to_string().contains(" same => n(open),Answer()\n"));
    }

    #[test]
    fn goto_targets_render_with_priority() {
        assert_eq!(GotoTarget::local("retry").to_string(), "retry,1");
        assert_eq!(
            GotoTarget::context("menu-main", "s").to_string(),
            "menu-main,s,1"
        );
    }

    #[test]
    fn queue_timeout_occupies_the_fifth_argument() {
        let with_timeout = App::Queue {
            name: "sales".to_string(),
            options: "tTk".to_string(),
            timeout: Some(600),
        };
        assert_eq!(with_timeout.to_string(), "Queue(sales,tTk,,,600)");
        let bare = App::Queue {
            name: "sales".to_string(),
            options: "tTk".to_string(),
            timeout: None,
        };
        assert_eq!(bare.to_string(), "Queue(sales,tTk)");
    }

    #[test]
    fn context_banner_and_blank_lines_between_extensions() {
        let mut ctx = Context::new("menu-main").with_banner("Menu: main");
        ctx.push(Extension::new("s").step(App::Answer));
        ctx.push(Extension::new("t").step(App::Hangup));
        assert_eq!(
            ctx.to_string(),
            "; ===== Menu: main =====\n[menu-main]\nexten => s,1,Answer()\n\nexten => t,1,Hangup()\n"
        );
    }

    #[test]
    fn goto_target_lookup_covers_conditionals() {
        let ext = Extension::new("t")
            .step(App::GotoIf {
                condition: "$[1]".to_string(),
                then: GotoTarget::local("retry"),
            })
            .step(App::Goto(GotoTarget::local("fallback")));
        let targets = ext.goto_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], &GotoTarget::local("retry"));
        assert_eq!(targets[1], &GotoTarget::local("fallback"));
    }
}
