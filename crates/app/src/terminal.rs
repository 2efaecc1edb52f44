//! Line-oriented exam runner and chat on stdin/stdout.

use std::error::Error;
use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use portal_core::ai::Difficulty;
use portal_core::exam::{
    ExamOutcome, ExamPhase, GenerationOutcome, ReviewRow, TickEvent, option_label,
    parse_option_label,
};
use portal_core::model::CourseId;
use portal_core::time::format_mm_ss;
use services::{AppServices, ExamController, ExamServiceError};

enum Flow {
    Continue,
    Quit,
}

/// Run one exam screen until the learner leaves or stdin closes.
///
/// A one-second interval drives the countdown while input is read
/// concurrently.
pub async fn run_exam(app: &AppServices, course_id: CourseId) -> Result<(), Box<dyn Error>> {
    let exam = app.exams().open(course_id).await?;
    let phase = exam.enter().await?;
    println!("{}", exam.course().title);
    if let Some(offer) = exam.view().await.resume_offer {
        println!(
            "Saved attempt: {}/{} answered, {} left.",
            offer.answered,
            offer.question_count,
            format_mm_ss(offer.time_left_secs)
        );
    }
    print_help(phase, exam.has_question_bank());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => match exam.tick().await {
                TickEvent::Finished(outcome) => {
                    println!("\nTime is up.");
                    print_outcome(&outcome);
                    print_help(ExamPhase::Finished, exam.has_question_bank());
                }
                TickEvent::Running { remaining_secs }
                    if remaining_secs <= 10 || remaining_secs % 60 == 0 =>
                {
                    println!("[{} left]", format_mm_ss(remaining_secs));
                }
                _ => {}
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    if exam.view().await.phase == ExamPhase::Taking {
                        exam.save_and_exit().await?;
                        println!("Attempt saved.");
                    }
                    break;
                };
                match handle_line(&exam, line.trim()).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(err) => println!("! {err}"),
                }
            }
        }
    }
    Ok(())
}

async fn handle_line(exam: &ExamController, line: &str) -> Result<Flow, ExamServiceError> {
    let (command, rest) = line
        .split_once(' ')
        .map_or((line, ""), |(command, rest)| (command, rest.trim()));
    let phase = exam.view().await.phase;
    let bank = exam.has_question_bank();
    match (phase, command) {
        (_, "") => {}
        (_, "h" | "help") => print_help(phase, bank),

        (ExamPhase::Verifying, "r") => {
            exam.resume().await?;
            show_question(exam).await;
        }
        (ExamPhase::Verifying, "x") => {
            exam.discard().await?;
            print_help(ExamPhase::Selection, bank);
        }

        (ExamPhase::Selection, "set") => {
            exam.start_pre_authored().await?;
            show_question(exam).await;
        }
        (ExamPhase::Selection, "ai") => {
            let (difficulty, topic) = parse_ai_args(rest);
            println!("Generating {} questions...", difficulty.as_str());
            match exam.start_ai(topic, difficulty).await? {
                GenerationOutcome::Started => show_question(exam).await,
                GenerationOutcome::Failed => {
                    let error = exam.view().await.last_error.unwrap_or_default();
                    println!("! {error}");
                }
                GenerationOutcome::Stale => {}
            }
        }
        (ExamPhase::Selection | ExamPhase::Finished, "q") => return Ok(Flow::Quit),

        (ExamPhase::Taking, "n") => {
            exam.next().await?;
            show_question(exam).await;
        }
        (ExamPhase::Taking, "p") => {
            exam.previous().await?;
            show_question(exam).await;
        }
        (ExamPhase::Taking, "s") => {
            let outcome = exam.submit().await?;
            print_outcome(&outcome);
            print_help(ExamPhase::Finished, bank);
        }
        (ExamPhase::Taking, "q") => {
            let progress = exam.save_and_exit().await?;
            println!(
                "Saved {}/{} answers with {} left.",
                progress.answered_count(),
                progress.questions.len(),
                format_mm_ss(progress.time_left_secs)
            );
            return Ok(Flow::Quit);
        }
        (ExamPhase::Taking, answer) => match parse_option_label(answer) {
            Some(option) => {
                exam.select_answer(option).await?;
                show_question(exam).await;
            }
            None => print_help(phase, bank),
        },

        (ExamPhase::Finished, "v") => print_row(&exam.start_review().await?),
        (ExamPhase::Finished, "t") => {
            exam.retake().await?;
            print_help(ExamPhase::Selection, bank);
        }
        (ExamPhase::Review, "n") => {
            if exam.review_next().await? {
                print_review(exam).await;
            }
        }
        (ExamPhase::Review, "p") => {
            if exam.review_previous().await? {
                print_review(exam).await;
            }
        }
        (ExamPhase::Review, "c") => {
            exam.close_review().await?;
            print_help(ExamPhase::Finished, bank);
        }

        _ => println!("unknown command, type h for help"),
    }
    Ok(Flow::Continue)
}

/// `[easy|medium|hard] [topic...]`
fn parse_ai_args(rest: &str) -> (Difficulty, Option<&str>) {
    let (first, tail) = rest
        .split_once(' ')
        .map_or((rest, ""), |(first, tail)| (first, tail.trim()));
    let difficulty = match first.to_ascii_lowercase().as_str() {
        "easy" => Some(Difficulty::Easy),
        "medium" => Some(Difficulty::Medium),
        "hard" => Some(Difficulty::Hard),
        _ => None,
    };
    match difficulty {
        Some(difficulty) => (difficulty, Some(tail).filter(|t| !t.is_empty())),
        None => (Difficulty::default(), Some(rest).filter(|t| !t.is_empty())),
    }
}

fn print_help(phase: ExamPhase, has_question_bank: bool) {
    let help = match phase {
        ExamPhase::Verifying => "r resume the saved attempt, x discard it",
        ExamPhase::Selection if has_question_bank => {
            "set start the course exam, ai [easy|medium|hard] [topic] generate one, q quit"
        }
        ExamPhase::Selection => "ai [easy|medium|hard] [topic] generate an exam, q quit",
        ExamPhase::Taking => "a-d answer, n next, p previous, s submit, q save and exit",
        ExamPhase::Finished => "v review answers, t take another exam, q quit",
        ExamPhase::Review => "n next, p previous, c close review",
        ExamPhase::Idle | ExamPhase::Generating => return,
    };
    println!("({phase}) {help}");
}

async fn show_question(exam: &ExamController) {
    let Some(view) = exam.view().await.taking else {
        return;
    };
    println!(
        "\nQuestion {}/{}   answered {}/{}   {} left",
        view.index + 1,
        view.total,
        view.answered,
        view.total,
        format_mm_ss(view.remaining_secs)
    );
    println!("{}", view.question.text());
    for (index, option) in (0_u8..).zip(view.question.options()) {
        let marker = if view.selected == Some(index) { '>' } else { ' ' };
        println!(" {marker} {}) {option}", option_label(index));
    }
}

fn print_outcome(outcome: &ExamOutcome) {
    let result = &outcome.result;
    println!(
        "Score: {}/{} ({}%), {} unanswered",
        result.score,
        result.total_questions,
        result.percentage(),
        outcome.unanswered()
    );
}

async fn print_review(exam: &ExamController) {
    if let Some(row) = exam.view().await.review_row {
        print_row(&row);
    }
}

fn print_row(row: &ReviewRow) {
    let verdict = if row.is_correct { "correct" } else { "wrong" };
    let chosen = row
        .selected
        .map_or_else(|| "-".to_string(), |s| option_label(s).to_string());
    println!("\n{}. {}", row.index + 1, row.question.text());
    println!(
        "   your answer: {chosen}   correct: {}   ({verdict})",
        option_label(row.question.correct_answer())
    );
}

/// Chat with the study assistant, streaming replies as they arrive.
pub async fn run_chat(app: &AppServices) -> Result<(), Box<dyn Error>> {
    if !app.ai_enabled().await {
        println!("AI is not configured. Set PORTAL_AI_API_KEY or the AI settings in admin.");
        return Ok(());
    }
    let chat = app.chat();
    println!("Ask anything. /reset starts over, /quit leaves.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/reset" => chat.reset().await,
            text => {
                let result = chat
                    .send(text, None, &mut |chunk| {
                        print!("{chunk}");
                        let _ = std::io::stdout().flush();
                    })
                    .await;
                println!();
                if let Err(err) = result {
                    println!("! {err}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_arguments_take_optional_difficulty() {
        assert_eq!(parse_ai_args(""), (Difficulty::Medium, None));
        assert_eq!(parse_ai_args("hard"), (Difficulty::Hard, None));
        assert_eq!(
            parse_ai_args("easy cell biology"),
            (Difficulty::Easy, Some("cell biology"))
        );
        assert_eq!(
            parse_ai_args("cell biology"),
            (Difficulty::Medium, Some("cell biology"))
        );
    }
}
