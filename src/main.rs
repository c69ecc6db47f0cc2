use clap::{Parser, Subcommand};
use quiz_engine::config::{Config, LogFormat};
use quiz_engine::error::ErrorBody;
use quiz_engine::models::{format_remaining, format_score};
use quiz_engine::runner::{AdvanceOutcome, Completion, SubmissionStatus};
use quiz_engine::{build_state, AggregationEngine, QuizError, SessionEngine, SessionHandle};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quiz-engine", about = "Timed quizzes and completion-log reports")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Best score per user for one quiz.
    Leaderboard { quiz_id: String },
    /// Average score per quiz, optionally limited to the given quizzes.
    Analytics { quiz_ids: Vec<String> },
    /// Attempts and average score of one user.
    Profile { user_id: String },
    /// All completions, newest first.
    Submissions,
    /// Take a quiz in the terminal, answering with option keys.
    Play {
        quiz_id: String,
        #[arg(long)]
        user: String,
    },
}

#[derive(Serialize)]
struct RankedEntry<'a> {
    rank: usize,
    #[serde(rename = "userId")]
    user_id: &'a str,
    score: String,
    timestamp: String,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_error(err: &QuizError) -> anyhow::Result<()> {
    eprintln!("{}", serde_json::to_string_pretty(&ErrorBody::from(err))?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    let filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    let state = build_state(&config)?;
    let reports = AggregationEngine::new(state.event_log.clone());

    let outcome = match cli.command {
        Command::Leaderboard { quiz_id } => match reports.leaderboard(&quiz_id).await {
            Ok(entries) => {
                let ranked: Vec<_> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| RankedEntry {
                        rank: i + 1,
                        user_id: &e.user_id,
                        score: format_score(e.score),
                        timestamp: e.timestamp.to_rfc3339(),
                    })
                    .collect();
                print_json(&ranked)
            }
            Err(err) => Err(err.into()),
        },
        Command::Analytics { quiz_ids } => {
            let only: Option<BTreeSet<String>> =
                (!quiz_ids.is_empty()).then(|| quiz_ids.into_iter().collect());
            match reports.analytics(only.as_ref()).await {
                Ok(averages) => print_json(&averages),
                Err(err) => Err(err.into()),
            }
        }
        Command::Profile { user_id } => match reports.user_profile(&user_id).await {
            Ok(profile) => print_json(&profile),
            Err(err) => Err(err.into()),
        },
        Command::Submissions => match reports.submissions().await {
            Ok(events) => print_json(&events),
            Err(err) => Err(err.into()),
        },
        Command::Play { quiz_id, user } => {
            let engine = SessionEngine::new(state);
            match engine.start(&quiz_id, &user).await {
                Ok(handle) => play(handle).await,
                Err(err) => Err(err.into()),
            }
        }
    };

    if let Err(err) = outcome {
        if let Some(quiz_err) = err.downcast_ref::<QuizError>() {
            print_error(quiz_err)?;
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

async fn play(handle: SessionHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let completion = loop {
        let view = handle.view().await;
        println!(
            "\n[{}] Question {}/{}: {}",
            format_remaining(view.remaining_secs),
            view.current_index + 1,
            view.total_questions,
            view.question.prompt
        );
        for (key, text) in &view.question.options {
            println!("  {key}: {text}");
        }

        let line = tokio::select! {
            completion = handle.finished() => {
                println!("\nTime is up.");
                break completion;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            handle.abandon();
            println!("Attempt abandoned.");
            return Ok(());
        };

        let key = line.trim().to_uppercase();
        if let Err(err) = handle.select_answer(&view.question.id, &key).await {
            println!("{err}");
            continue;
        }
        match handle.advance().await {
            Ok(AdvanceOutcome::Next { .. }) => {}
            Ok(AdvanceOutcome::Completed(completion)) => break Some(completion),
            Err(err) => println!("{err}"),
        }
    };

    let Some(mut completion) = completion else {
        return Ok(());
    };
    if let SubmissionStatus::Failed(err) = &completion.status {
        println!("Result not saved ({err}), retrying once.");
        if let Some(retried) = handle.retry_submit().await {
            completion = retried;
        }
    }
    report(&completion);
    Ok(())
}

fn report(completion: &Completion) {
    println!(
        "Quiz complete! {}/{} correct, score {}%{}",
        completion.result.correct,
        completion.result.total,
        format_score(completion.score()),
        if completion.is_written() { "" } else { " (not saved)" }
    );
}
