//! Rule command handlers: list, show, check, push, rename, delete.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;
use tracing::info;

use rulesync_config::Config;
use rulesync_core::{Problem, Rule, SyncState};

use crate::cli::{Command, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;
use crate::session::{Session, output_format};

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RuleSummary {
    name: String,
    state: SyncState,
    errors: usize,
    warnings: usize,
    foreign: bool,
    problems: Vec<Problem>,
}

impl From<&Arc<Rule>> for RuleSummary {
    fn from(rule: &Arc<Rule>) -> Self {
        let problems = rule.problems().unwrap_or_default();
        Self {
            name: rule.name(),
            state: rule.state(),
            errors: problems.iter().filter(|p| p.is_error).count(),
            warnings: problems.iter().filter(|p| !p.is_error).count(),
            foreign: rule.is_foreign(),
            problems,
        }
    }
}

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Errors")]
    errors: usize,
    #[tabled(rename = "Warnings")]
    warnings: usize,
    #[tabled(rename = "Foreign")]
    foreign: String,
}

impl From<&RuleSummary> for RuleRow {
    fn from(s: &RuleSummary) -> Self {
        Self {
            name: s.name.clone(),
            state: s.state.to_string(),
            errors: s.errors,
            warnings: s.warnings,
            foreign: if s.foreign { "yes".into() } else { String::new() },
        }
    }
}

#[derive(Tabled)]
struct ProblemRow {
    #[tabled(rename = "Line")]
    line: usize,
    #[tabled(rename = "Level")]
    level: &'static str,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&Problem> for ProblemRow {
    fn from(p: &Problem) -> Self {
        Self {
            line: p.line,
            level: if p.is_error { "error" } else { "warning" },
            message: p.description.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RuleText {
    name: String,
    state: SyncState,
    foreign: bool,
    text: String,
}

fn plain_problem(p: &Problem) -> String {
    let level = if p.is_error { "error" } else { "warning" };
    format!("{}:{level}:{}", p.line, p.description)
}

fn report_warnings(problems: &[Problem], quiet: bool) {
    for p in problems.iter().filter(|p| !p.is_error) {
        output::notice(&format!("warning: line {}: {}", p.line, p.description), quiet);
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    cmd: Command,
    session: &Session,
    cfg: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let format = output_format(global, cfg);
    let device = session.device();

    match cmd {
        Command::Rules => {
            let summaries: Vec<RuleSummary> =
                device.rules().iter().map(|r| RuleSummary::from(r)).collect();
            let out =
                output::render_list(format, &summaries, |s| RuleRow::from(s), |s| s.name.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        Command::Show(args) => {
            let rule = session.rule(&args.rule)?;
            let text = if args.raw {
                rule.raw_text()?
            } else {
                rule.text()?
            };
            let shown = RuleText {
                name: rule.name(),
                state: rule.state(),
                foreign: rule.is_foreign(),
                text: text.unwrap_or_default(),
            };
            let out =
                output::render_single(format, &shown, |t| t.text.clone(), |t| t.text.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        Command::Check(args) => {
            let text = util::read_text(&args.file)?;
            let problems = device.check_syntax(&text).await?;
            let out = if problems.is_empty() && format == OutputFormat::Table {
                "No problems found".to_owned()
            } else {
                output::render_list(format, &problems, |p| ProblemRow::from(p), |p| plain_problem(p))?
            };
            output::print_output(&out, global.quiet);

            let errors = problems.iter().filter(|p| p.is_error).count();
            if errors > 0 {
                return Err(CliError::ErrorsInCode {
                    count: errors,
                    details: format!("{} problem(s) listed above", problems.len()),
                });
            }
            Ok(())
        }

        Command::Push(args) => {
            let text = util::read_text(&args.file)?;
            let rule = if let Some(rule) = device.rule(&args.rule) {
                rule.set_code(&text).await?;
                info!(rule = %args.rule, "rule updated");
                output::notice(&format!("Rule '{}' updated", args.rule), global.quiet);
                rule
            } else {
                let rule = device.create_rule(&args.rule, &text).await?;
                info!(rule = %args.rule, "rule created");
                output::notice(&format!("Rule '{}' created", args.rule), global.quiet);
                rule
            };
            report_warnings(&rule.problems()?, global.quiet);
            Ok(())
        }

        Command::Rename(args) => {
            session.rule(&args.old)?;
            device.rename_rule(&args.old, &args.new).await?;
            output::notice(
                &format!("Rule '{}' renamed to '{}'", args.old, args.new),
                global.quiet,
            );
            Ok(())
        }

        Command::Delete(args) => {
            session.rule(&args.rule)?;
            if !util::confirm(
                &format!("Delete rule '{}' from {}?", args.rule, device.key()),
                global.yes,
                "delete",
            )? {
                return Ok(());
            }
            device.delete_rule(&args.rule).await?;
            output::notice(&format!("Rule '{}' deleted", args.rule), global.quiet);
            Ok(())
        }

        Command::Devices(_) | Command::Watch | Command::Config(_) | Command::Completions(_) => {
            Err(CliError::Validation {
                field: "command".into(),
                reason: "not a rule command".into(),
            })
        }
    }
}
