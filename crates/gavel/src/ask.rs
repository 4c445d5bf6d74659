use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use gavel_core::{
    new_conversation_id, ConversationMode, Orchestrator, PipelineError, TurnOutcome, TurnRequest,
};
use gavel_judge::TrafficLight;

/// Run one prompt through the pipeline. Ctrl-C cancels the in-flight run.
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    prompt: String,
    mode: ConversationMode,
    json_output: bool,
) -> Result<()> {
    let conversation_id = new_conversation_id();

    let interrupt_orchestrator = orchestrator.clone();
    let interrupt_conversation = conversation_id.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_orchestrator.cancel(&interrupt_conversation);
    })
    .context("Failed to install Ctrl-C handler")?;

    let request = TurnRequest::new(prompt)
        .with_conversation(&conversation_id)
        .with_mode(mode);

    match orchestrator.process_message(request, None).await {
        Ok(outcome) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            if outcome.evaluation.passed() {
                Ok(())
            } else {
                // surfaced anyway, but the budget ran out before it passed
                std::process::exit(1);
            }
        }
        Err(PipelineError::Cancelled) => {
            eprintln!("{}", "Cancelled".bright_yellow());
            std::process::exit(130);
        }
        Err(err) => {
            eprintln!("{} {}", "Error:".bright_red(), err);
            std::process::exit(2);
        }
    }
}

fn print_outcome(outcome: &TurnOutcome) {
    println!();
    println!("{}", outcome.response);
    println!();

    let light = match outcome.evaluation.traffic_light {
        TrafficLight::Green => "●".bright_green(),
        TrafficLight::Orange => "●".bright_yellow(),
        TrafficLight::Red => "●".bright_red(),
    };
    println!(
        "{} {} {:.1} after {} iteration(s)",
        light,
        "Score:".bold(),
        outcome.evaluation.overall_score,
        outcome.iteration
    );

    for criterion in &outcome.evaluation.criteria {
        let mark = if criterion.passed {
            "✓".bright_green()
        } else {
            "✗".bright_red()
        };
        println!(
            "  {} {} {:.0} (threshold {:.0})",
            mark, criterion.name, criterion.score, criterion.threshold
        );
    }

    if !outcome.evaluation.suggestions.is_empty() {
        println!();
        println!("{}", "Suggestions:".bold());
        for suggestion in &outcome.evaluation.suggestions {
            println!("  - {suggestion}");
        }
    }
}
