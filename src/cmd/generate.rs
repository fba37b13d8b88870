//! Post generation and flow following: `draftflow generate` and `draftflow watch`.

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::{Editor, Select, theme::ColorfulTheme};
use serde::Serialize;

use draftflow::config::Config;
use draftflow::draft::{Draft, FlowId, FlowPhase, PostRequest, SUBMIT_PROGRESS};
use draftflow::errors::FlowError;
use draftflow::session::FlowSession;
use draftflow::ui::icons::{CHECK, CROSS, WARN};
use draftflow::ui::{FlowUI, preview_width, render_draft};

use super::build_session;
use super::topics::pick_suggestion;

pub struct GenerateArgs {
    pub topic: Option<String>,
    pub audience: Option<String>,
    pub suggestion: Option<String>,
    pub yes: bool,
    pub json: bool,
}

pub struct WatchArgs {
    pub flow_id: String,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct DraftReport<'a> {
    phase: FlowPhase,
    #[serde(flatten)]
    draft: &'a Draft,
}

enum Review {
    Approve,
    Edit,
    Discard,
}

pub async fn cmd_generate(config: &Config, args: GenerateArgs, verbose: bool) -> Result<()> {
    let request = resolve_request(config, &args).await?;
    let mut session = build_session(config)?;
    let ui = FlowUI::new(verbose, args.json);

    ui.submitting(&request.topic, &request.audience);
    ui.set_progress(SUBMIT_PROGRESS, FlowPhase::Submitting);
    let flow_id = match session.start(request).await {
        Ok(flow_id) => flow_id,
        Err(e) => {
            ui.finish_error(&e.to_string());
            return Err(e).context("Post generation was not started");
        }
    };
    ui.started(flow_id.as_str());
    ui.set_progress(session.progress(), session.phase());

    let phase = follow(&mut session, &ui).await?;

    if args.json {
        return print_report(&session, phase);
    }
    print_preview(&session);

    let has_text = session.draft().is_some_and(Draft::has_text);
    if !has_text {
        session.reset();
        bail!("Flow {} produced no text to approve", flow_id);
    }

    if args.yes {
        session.approve().await?;
        println!("{} Post approved", CHECK);
        return Ok(());
    }

    review(&mut session).await
}

pub async fn cmd_watch(config: &Config, args: WatchArgs, verbose: bool) -> Result<()> {
    let flow_id = FlowId::from(args.flow_id.trim());
    if flow_id.as_str().is_empty() {
        bail!("Flow id must not be empty");
    }

    let mut session = build_session(config)?;
    let ui = FlowUI::new(verbose, args.json);
    session.resume(flow_id.clone());
    ui.started(flow_id.as_str());
    ui.set_progress(session.progress(), session.phase());

    let phase = follow(&mut session, &ui).await?;
    if args.json {
        return print_report(&session, phase);
    }
    print_preview(&session);
    println!(
        "{}",
        style(format!(
            "Approve with: draftflow approve {} --text \"...\"",
            flow_id
        ))
        .dim()
    );
    Ok(())
}

/// Take topic and audience from the flags or from a stored suggestion.
async fn resolve_request(config: &Config, args: &GenerateArgs) -> Result<PostRequest> {
    let request = match &args.suggestion {
        Some(id) => {
            let suggestion = pick_suggestion(config, id).await?;
            PostRequest::new(
                args.topic.clone().unwrap_or(suggestion.topic),
                args.audience.clone().unwrap_or(suggestion.audience),
            )
        }
        None => PostRequest::new(
            args.topic.clone().unwrap_or_default(),
            args.audience.clone().unwrap_or_default(),
        ),
    };
    request.validate().map_err(FlowError::InvalidRequest)?;
    Ok(request)
}

/// Render updates until the draft is complete, the wait times out or Ctrl-C.
async fn follow(session: &mut FlowSession, ui: &FlowUI) -> Result<FlowPhase> {
    let outcome = tokio::select! {
        result = session.wait_until_ready(|s, update| {
            ui.show_update(update, s.phase(), s.health());
        }) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(FlowPhase::TimedOut)) => {
            let has_text = session.draft().is_some_and(Draft::has_text);
            ui.finish_timed_out(has_text);
            Ok(FlowPhase::TimedOut)
        }
        Some(Ok(phase)) => {
            ui.finish_ready();
            Ok(phase)
        }
        Some(Err(e)) => {
            ui.finish_error(&e.to_string());
            session.reset();
            Err(e.into())
        }
        None => {
            ui.clear();
            let flow_id = session.flow_id().map(ToString::to_string).unwrap_or_default();
            session.reset();
            bail!("Interrupted while waiting for flow {}", flow_id)
        }
    }
}

fn print_report(session: &FlowSession, phase: FlowPhase) -> Result<()> {
    let draft = session.draft().context("No draft to report")?;
    let report = DraftReport { phase, draft };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize draft")?
    );
    Ok(())
}

fn print_preview(session: &FlowSession) {
    if let Some(draft) = session.draft() {
        println!();
        print!("{}", render_draft(draft, preview_width()));
        println!();
    }
}

fn prompt_review() -> Result<Review> {
    let options = &["Approve and publish", "Edit the text", "Discard"];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What should happen with this post?")
        .items(options)
        .default(0)
        .interact()?;

    match selection {
        0 => Ok(Review::Approve),
        1 => Ok(Review::Edit),
        _ => Ok(Review::Discard),
    }
}

/// Approve / Edit / Discard loop. A failed approval keeps the draft for another try.
async fn review(session: &mut FlowSession) -> Result<()> {
    loop {
        match prompt_review()? {
            Review::Approve => match session.approve().await {
                Ok(()) => {
                    println!("{} Post approved", CHECK);
                    return Ok(());
                }
                Err(e @ FlowError::ApprovalFailed { .. }) => {
                    println!("{} {}", CROSS, style(&e).red());
                    println!("  {}", style("The draft is unchanged; you can retry.").dim());
                }
                Err(e) => return Err(e.into()),
            },
            Review::Edit => {
                let current = session
                    .draft()
                    .and_then(Draft::final_text)
                    .unwrap_or_default()
                    .to_string();
                match Editor::new().edit(&current)? {
                    Some(edited) if !edited.trim().is_empty() => {
                        session.edit(edited.trim_end())?;
                        print_preview(session);
                    }
                    _ => println!("{} {}", WARN, style("Edit discarded").yellow()),
                }
            }
            Review::Discard => {
                session.reset();
                println!("{}", style("Draft discarded").dim());
                return Ok(());
            }
        }
    }
}
