use chrono::{DateTime, Utc};
use std::fmt;

use super::progress::{AnswerSheet, ExamProgress, ExamResult, score};
use super::question::Question;
use super::ExamError;
use crate::model::CourseId;
use crate::time::{Countdown, TickOutcome};

/// Time budget per question for generated mock tests.
pub const SECONDS_PER_QUESTION: u32 = 60;

/// Time budget for a pre-authored set when the course does not configure one.
pub const DEFAULT_PRESET_DURATION_SECS: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamKind {
    AiGenerated,
    PreAuthored,
}

/// Starting countdown for a new attempt.
#[must_use]
pub fn default_duration_secs(kind: ExamKind, question_count: usize, configured: Option<u32>) -> u32 {
    match kind {
        ExamKind::AiGenerated => {
            let count = u32::try_from(question_count).unwrap_or(u32::MAX);
            SECONDS_PER_QUESTION.saturating_mul(count.max(1))
        }
        ExamKind::PreAuthored => configured
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_PRESET_DURATION_SECS),
    }
}

//
// ─── PUBLIC VIEWS ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamPhase {
    Idle,
    /// A saved attempt exists and the learner must resume or discard it.
    Verifying,
    Selection,
    Generating,
    Taking,
    Finished,
    Review,
}

impl fmt::Display for ExamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExamPhase::Idle => "idle",
            ExamPhase::Verifying => "verifying a saved attempt",
            ExamPhase::Selection => "selecting an exam",
            ExamPhase::Generating => "generating questions",
            ExamPhase::Taking => "taking the exam",
            ExamPhase::Finished => "finished",
            ExamPhase::Review => "reviewing",
        };
        f.write_str(name)
    }
}

/// Summary of a saved attempt, shown before resuming or discarding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeOffer {
    pub question_count: usize,
    pub answered: usize,
    pub time_left_secs: u32,
    pub last_saved: DateTime<Utc>,
    pub is_ai_generated: bool,
}

/// Identifies one question-generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTicket {
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The attempt is now running.
    Started,
    /// The request failed; the session is back in selection with an error.
    Failed,
    /// The response belongs to a request that is no longer current.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Submitted,
    TimeExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRow {
    pub index: usize,
    pub question: Question,
    pub selected: Option<u8>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamOutcome {
    pub result: ExamResult,
    pub reason: FinishReason,
    pub rows: Vec<ReviewRow>,
}

impl ExamOutcome {
    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.rows.iter().filter(|row| row.selected.is_none()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickEvent {
    Running { remaining_secs: u32 },
    Finished(ExamOutcome),
    /// No attempt is running; the tick had no effect.
    Ignored,
}

/// Borrowed view of the running attempt.
#[derive(Debug, Clone, Copy)]
pub struct TakingView<'a> {
    pub question: &'a Question,
    pub index: usize,
    pub total: usize,
    pub selected: Option<u8>,
    pub answered: usize,
    pub remaining_secs: u32,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct Attempt {
    questions: Vec<Question>,
    answers: AnswerSheet,
    current: usize,
    countdown: Countdown,
    kind: ExamKind,
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Verifying(ExamProgress),
    Selection,
    Generating(GenerationTicket),
    Taking(Attempt),
    Finished(ExamOutcome),
    Review { outcome: ExamOutcome, index: usize },
}

/// One learner's exam lifecycle for one course.
///
/// `selection -> taking -> finished -> review`, with a verifying step in front
/// when a saved attempt exists and a generating step for AI question sets.
#[derive(Debug, Clone)]
pub struct ExamSession {
    course_id: CourseId,
    state: State,
    epoch: u64,
    last_error: Option<String>,
}

impl ExamSession {
    #[must_use]
    pub fn new(course_id: CourseId) -> Self {
        Self {
            course_id,
            state: State::Idle,
            epoch: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn phase(&self) -> ExamPhase {
        match &self.state {
            State::Idle => ExamPhase::Idle,
            State::Verifying(_) => ExamPhase::Verifying,
            State::Selection => ExamPhase::Selection,
            State::Generating(_) => ExamPhase::Generating,
            State::Taking(_) => ExamPhase::Taking,
            State::Finished(_) => ExamPhase::Finished,
            State::Review { .. } => ExamPhase::Review,
        }
    }

    /// Last recoverable error, cleared when a new attempt starts.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn invalid(&self, action: &'static str) -> ExamError {
        ExamError::InvalidTransition {
            action,
            phase: self.phase(),
        }
    }

    // ── entry and resume ──────────────────────────────────────────────────────

    /// Enter the exam screen, offering any saved attempt for this course.
    ///
    /// A saved attempt for another course, or one that fails validation, is
    /// dropped and the session goes straight to selection.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` unless the session is idle.
    pub fn enter(&mut self, saved: Option<ExamProgress>) -> Result<ExamPhase, ExamError> {
        if !matches!(self.state, State::Idle) {
            return Err(self.invalid("enter"));
        }
        self.state = match saved {
            Some(progress) if progress.course_id == self.course_id && progress.validate().is_ok() => {
                State::Verifying(progress)
            }
            _ => State::Selection,
        };
        Ok(self.phase())
    }

    #[must_use]
    pub fn resume_offer(&self) -> Option<ResumeOffer> {
        let State::Verifying(saved) = &self.state else {
            return None;
        };
        Some(ResumeOffer {
            question_count: saved.questions.len(),
            answered: saved.answered_count(),
            time_left_secs: saved.time_left_secs,
            last_saved: saved.last_saved,
            is_ai_generated: saved.is_ai_generated,
        })
    }

    /// Restore the saved questions, answers, cursor and remaining time verbatim.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` unless a saved attempt is on offer.
    pub fn resume(&mut self) -> Result<(), ExamError> {
        if !matches!(self.state, State::Verifying(_)) {
            return Err(self.invalid("resume"));
        }
        let State::Verifying(saved) = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(self.invalid("resume"));
        };
        let kind = if saved.is_ai_generated {
            ExamKind::AiGenerated
        } else {
            ExamKind::PreAuthored
        };
        self.state = State::Taking(Attempt {
            questions: saved.questions,
            answers: saved.answers,
            current: saved.current_index,
            countdown: Countdown::new(saved.time_left_secs),
            kind,
        });
        self.last_error = None;
        Ok(())
    }

    /// Drop the saved attempt and continue to selection.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` unless a saved attempt is on offer.
    pub fn discard(&mut self) -> Result<ExamProgress, ExamError> {
        if !matches!(self.state, State::Verifying(_)) {
            return Err(self.invalid("discard"));
        }
        match std::mem::replace(&mut self.state, State::Selection) {
            State::Verifying(saved) => Ok(saved),
            _ => Err(ExamError::InvalidTransition {
                action: "discard",
                phase: ExamPhase::Selection,
            }),
        }
    }

    // ── starting an attempt ───────────────────────────────────────────────────

    /// Mark an AI generation request as in flight.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside selection.
    pub fn begin_generation(&mut self) -> Result<GenerationTicket, ExamError> {
        if !matches!(self.state, State::Selection) {
            return Err(self.invalid("generate questions"));
        }
        self.epoch += 1;
        let ticket = GenerationTicket { epoch: self.epoch };
        self.state = State::Generating(ticket);
        self.last_error = None;
        Ok(ticket)
    }

    /// Deliver the result of a generation request.
    ///
    /// Responses for a ticket that is no longer current are ignored. An error
    /// or an empty question set returns the session to selection with a
    /// recoverable error.
    pub fn complete_generation(
        &mut self,
        ticket: GenerationTicket,
        result: Result<Vec<Question>, String>,
    ) -> GenerationOutcome {
        let current = matches!(self.state, State::Generating(t) if t == ticket);
        if !current || ticket.epoch != self.epoch {
            return GenerationOutcome::Stale;
        }
        match result {
            Ok(questions) if !questions.is_empty() => {
                let duration = default_duration_secs(ExamKind::AiGenerated, questions.len(), None);
                self.start(questions, ExamKind::AiGenerated, duration);
                GenerationOutcome::Started
            }
            Ok(_) => {
                self.state = State::Selection;
                self.last_error = Some(ExamError::EmptyQuestionSet.to_string());
                GenerationOutcome::Failed
            }
            Err(message) => {
                self.state = State::Selection;
                self.last_error = Some(ExamError::GenerationFailed(message).to_string());
                GenerationOutcome::Failed
            }
        }
    }

    /// Abandon an in-flight generation request; its response will be ignored.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` unless generating.
    pub fn cancel_generation(&mut self) -> Result<(), ExamError> {
        if !matches!(self.state, State::Generating(_)) {
            return Err(self.invalid("cancel generation"));
        }
        self.epoch += 1;
        self.state = State::Selection;
        Ok(())
    }

    /// Start a pre-authored question set.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside selection, or
    /// `ExamError::EmptyQuestionSet`.
    pub fn start_pre_authored(
        &mut self,
        questions: Vec<Question>,
        configured_duration: Option<u32>,
    ) -> Result<(), ExamError> {
        if !matches!(self.state, State::Selection) {
            return Err(self.invalid("start an exam"));
        }
        if questions.is_empty() {
            return Err(ExamError::EmptyQuestionSet);
        }
        let duration =
            default_duration_secs(ExamKind::PreAuthored, questions.len(), configured_duration);
        self.start(questions, ExamKind::PreAuthored, duration);
        Ok(())
    }

    fn start(&mut self, questions: Vec<Question>, kind: ExamKind, duration_secs: u32) {
        let answers = AnswerSheet::blank(questions.len());
        self.state = State::Taking(Attempt {
            questions,
            answers,
            current: 0,
            countdown: Countdown::new(duration_secs),
            kind,
        });
        self.last_error = None;
    }

    // ── taking ────────────────────────────────────────────────────────────────

    fn attempt(&self) -> Option<&Attempt> {
        match &self.state {
            State::Taking(attempt) => Some(attempt),
            _ => None,
        }
    }

    fn attempt_mut(&mut self, action: &'static str) -> Result<&mut Attempt, ExamError> {
        let phase = self.phase();
        match &mut self.state {
            State::Taking(attempt) => Ok(attempt),
            _ => Err(ExamError::InvalidTransition { action, phase }),
        }
    }

    #[must_use]
    pub fn taking_view(&self) -> Option<TakingView<'_>> {
        let attempt = self.attempt()?;
        Some(TakingView {
            question: attempt.questions.get(attempt.current)?,
            index: attempt.current,
            total: attempt.questions.len(),
            selected: attempt.answers.get(attempt.current),
            answered: attempt.answers.answered_count(),
            remaining_secs: attempt.countdown.remaining_secs(),
        })
    }

    #[must_use]
    pub fn questions(&self) -> Option<&[Question]> {
        self.attempt().map(|a| a.questions.as_slice())
    }

    #[must_use]
    pub fn answers(&self) -> Option<&AnswerSheet> {
        self.attempt().map(|a| &a.answers)
    }

    #[must_use]
    pub fn kind(&self) -> Option<ExamKind> {
        self.attempt().map(|a| a.kind)
    }

    /// # Errors
    ///
    /// Returns `ExamError` outside an attempt or for an out-of-range index/option.
    pub fn select_answer(&mut self, index: usize, option: u8) -> Result<(), ExamError> {
        self.attempt_mut("answer")?.answers.set(index, Some(option))
    }

    /// # Errors
    ///
    /// Returns `ExamError` outside an attempt or for an out-of-range index.
    pub fn clear_answer(&mut self, index: usize) -> Result<(), ExamError> {
        self.attempt_mut("clear an answer")?.answers.set(index, None)
    }

    /// Answer the question under the cursor.
    ///
    /// # Errors
    ///
    /// Returns `ExamError` outside an attempt or for an invalid option.
    pub fn answer_current(&mut self, option: u8) -> Result<(), ExamError> {
        let attempt = self.attempt_mut("answer")?;
        let index = attempt.current;
        attempt.answers.set(index, Some(option))
    }

    /// Move to the next question. Returns `false` on the last question.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside an attempt.
    pub fn next(&mut self) -> Result<bool, ExamError> {
        let attempt = self.attempt_mut("navigate")?;
        if attempt.current + 1 < attempt.questions.len() {
            attempt.current += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Move to the previous question. Returns `false` on the first question.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside an attempt.
    pub fn previous(&mut self) -> Result<bool, ExamError> {
        let attempt = self.attempt_mut("navigate")?;
        if attempt.current > 0 {
            attempt.current -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// # Errors
    ///
    /// Returns `ExamError` outside an attempt or for an out-of-range index.
    pub fn go_to(&mut self, index: usize) -> Result<(), ExamError> {
        let attempt = self.attempt_mut("navigate")?;
        if index >= attempt.questions.len() {
            return Err(ExamError::IndexOutOfRange {
                index,
                len: attempt.questions.len(),
            });
        }
        attempt.current = index;
        Ok(())
    }

    /// Advance the countdown by one second; reaching zero finishes the attempt
    /// exactly like a manual submit.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickEvent {
        let State::Taking(attempt) = &mut self.state else {
            return TickEvent::Ignored;
        };
        match attempt.countdown.tick() {
            TickOutcome::Running { remaining_secs } => TickEvent::Running { remaining_secs },
            TickOutcome::Expired | TickOutcome::AlreadyExpired => {
                match self.finish(now, FinishReason::TimeExpired) {
                    Some(outcome) => TickEvent::Finished(outcome),
                    None => TickEvent::Ignored,
                }
            }
        }
    }

    /// Finish the attempt. Unanswered questions are allowed and count as wrong.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside an attempt.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<ExamOutcome, ExamError> {
        if !matches!(self.state, State::Taking(_)) {
            return Err(self.invalid("submit"));
        }
        self.finish(now, FinishReason::Submitted)
            .ok_or_else(|| self.invalid("submit"))
    }

    fn finish(&mut self, now: DateTime<Utc>, reason: FinishReason) -> Option<ExamOutcome> {
        let State::Taking(attempt) = std::mem::replace(&mut self.state, State::Idle) else {
            return None;
        };
        let rows = attempt
            .questions
            .iter()
            .enumerate()
            .map(|(index, question)| {
                let selected = attempt.answers.get(index);
                ReviewRow {
                    index,
                    question: question.clone(),
                    selected,
                    is_correct: question.is_correct(selected),
                }
            })
            .collect();
        let result = ExamResult {
            course_id: self.course_id,
            score: score(&attempt.questions, &attempt.answers),
            total_questions: u32::try_from(attempt.questions.len()).unwrap_or(u32::MAX),
            date: now,
            is_ai_generated: attempt.kind == ExamKind::AiGenerated,
        };
        let outcome = ExamOutcome {
            result,
            reason,
            rows,
        };
        self.epoch += 1;
        self.state = State::Finished(outcome.clone());
        Some(outcome)
    }

    /// Progress record for the running attempt.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> Option<ExamProgress> {
        let attempt = self.attempt()?;
        Some(ExamProgress {
            course_id: self.course_id,
            questions: attempt.questions.clone(),
            answers: attempt.answers.clone(),
            current_index: attempt.current,
            time_left_secs: attempt.countdown.remaining_secs(),
            last_saved: now,
            is_ai_generated: attempt.kind == ExamKind::AiGenerated,
        })
    }

    /// Leave a running attempt, returning the progress to persist.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside an attempt.
    pub fn exit(&mut self, now: DateTime<Utc>) -> Result<ExamProgress, ExamError> {
        let progress = self.snapshot(now).ok_or_else(|| self.invalid("save and exit"))?;
        self.epoch += 1;
        self.state = State::Idle;
        Ok(progress)
    }

    // ── after finishing ───────────────────────────────────────────────────────

    #[must_use]
    pub fn outcome(&self) -> Option<&ExamOutcome> {
        match &self.state {
            State::Finished(outcome) | State::Review { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    /// Open the read-only walk through the finished attempt.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` unless finished.
    pub fn start_review(&mut self) -> Result<&ReviewRow, ExamError> {
        if !matches!(self.state, State::Finished(_)) {
            return Err(self.invalid("review"));
        }
        if let State::Finished(outcome) = std::mem::replace(&mut self.state, State::Idle) {
            self.state = State::Review { outcome, index: 0 };
        }
        self.review_row().ok_or(ExamError::EmptyQuestionSet)
    }

    #[must_use]
    pub fn review_row(&self) -> Option<&ReviewRow> {
        match &self.state {
            State::Review { outcome, index } => outcome.rows.get(*index),
            _ => None,
        }
    }

    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside review.
    pub fn review_next(&mut self) -> Result<bool, ExamError> {
        let phase = self.phase();
        let State::Review { outcome, index } = &mut self.state else {
            return Err(ExamError::InvalidTransition {
                action: "navigate the review",
                phase,
            });
        };
        if *index + 1 < outcome.rows.len() {
            *index += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside review.
    pub fn review_previous(&mut self) -> Result<bool, ExamError> {
        let phase = self.phase();
        let State::Review { index, .. } = &mut self.state else {
            return Err(ExamError::InvalidTransition {
                action: "navigate the review",
                phase,
            });
        };
        if *index > 0 {
            *index -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` outside review.
    pub fn close_review(&mut self) -> Result<(), ExamError> {
        if !matches!(self.state, State::Review { .. }) {
            return Err(self.invalid("close the review"));
        }
        if let State::Review { outcome, .. } = std::mem::replace(&mut self.state, State::Idle) {
            self.state = State::Finished(outcome);
        }
        Ok(())
    }

    /// Go back to selection for a fresh attempt.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidTransition` unless finished or reviewing.
    pub fn retake(&mut self) -> Result<(), ExamError> {
        if !matches!(self.state, State::Finished(_) | State::Review { .. }) {
            return Err(self.invalid("retake"));
        }
        self.state = State::Selection;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionId;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn questions(n: u64) -> Vec<Question> {
        (1..=n)
            .map(|id| {
                Question::new(
                    QuestionId::new(id),
                    format!("Question {id}"),
                    vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    u8::try_from(id % 4).unwrap(),
                )
                .unwrap()
            })
            .collect()
    }

    fn taking(n: u64) -> ExamSession {
        let mut session = ExamSession::new(CourseId::new(1));
        assert_eq!(session.enter(None).unwrap(), ExamPhase::Selection);
        session.start_pre_authored(questions(n), None).unwrap();
        session
    }

    fn assert_sheet_matches(session: &ExamSession) {
        let q = session.questions().unwrap().len();
        let a = session.answers().unwrap().len();
        assert_eq!(q, a);
    }

    #[test]
    fn seven_of_ten_with_three_blank() {
        let mut session = taking(10);
        let qs = session.questions().unwrap().to_vec();
        for (index, question) in qs.iter().enumerate().take(7) {
            session
                .select_answer(index, question.correct_answer())
                .unwrap();
            assert_sheet_matches(&session);
        }

        let outcome = session.submit(fixed_now()).unwrap();
        assert_eq!(outcome.result.score, 7);
        assert_eq!(outcome.result.total_questions, 10);
        assert_eq!(outcome.unanswered(), 3);
        assert_eq!(outcome.reason, FinishReason::Submitted);
        assert_eq!(session.phase(), ExamPhase::Finished);
    }

    #[test]
    fn timer_expiry_scores_like_submit() {
        let mut manual = taking(3);
        let mut timed = taking(3);
        for session in [&mut manual, &mut timed] {
            let correct = session.questions().unwrap()[0].correct_answer();
            session.select_answer(0, correct).unwrap();
            session.select_answer(1, (correct + 1) % 4).unwrap();
        }
        let submitted = manual.submit(fixed_now()).unwrap();

        let mut finished = None;
        for _ in 0..DEFAULT_PRESET_DURATION_SECS {
            if let TickEvent::Finished(outcome) = timed.tick(fixed_now()) {
                finished = Some(outcome);
            }
        }
        let expired = finished.expect("countdown should finish the attempt");
        assert_eq!(expired.reason, FinishReason::TimeExpired);
        assert_eq!(expired.result, submitted.result);
        assert_eq!(timed.tick(fixed_now()), TickEvent::Ignored);
    }

    #[test]
    fn navigation_is_bounded() {
        let mut session = taking(2);
        assert!(!session.previous().unwrap());
        assert!(session.next().unwrap());
        assert!(!session.next().unwrap());
        assert_eq!(session.taking_view().unwrap().index, 1);
        assert_eq!(
            session.go_to(5).unwrap_err(),
            ExamError::IndexOutOfRange { index: 5, len: 2 }
        );
    }

    #[test]
    fn resume_restores_saved_attempt_verbatim() {
        let mut session = taking(4);
        session.select_answer(2, 3).unwrap();
        session.go_to(2).unwrap();
        for _ in 0..15 {
            session.tick(fixed_now());
        }
        let saved = session.exit(fixed_now()).unwrap();
        assert_eq!(session.phase(), ExamPhase::Idle);

        let mut resumed = ExamSession::new(CourseId::new(1));
        assert_eq!(resumed.enter(Some(saved.clone())).unwrap(), ExamPhase::Verifying);
        let offer = resumed.resume_offer().unwrap();
        assert_eq!(offer.answered, 1);
        assert_eq!(offer.time_left_secs, DEFAULT_PRESET_DURATION_SECS - 15);

        resumed.resume().unwrap();
        let later = fixed_now() + Duration::seconds(5);
        let again = resumed.snapshot(later).unwrap();
        assert_eq!(again.questions, saved.questions);
        assert_eq!(again.answers, saved.answers);
        assert_eq!(again.time_left_secs, saved.time_left_secs);
        assert_eq!(again.current_index, 2);
    }

    #[test]
    fn invalid_or_foreign_saved_attempt_goes_to_selection() {
        let mut other = ExamSession::new(CourseId::new(2));
        other.enter(None).unwrap();
        other.start_pre_authored(questions(2), None).unwrap();
        let foreign = other.snapshot(fixed_now()).unwrap();

        let mut session = ExamSession::new(CourseId::new(1));
        assert_eq!(session.enter(Some(foreign)).unwrap(), ExamPhase::Selection);
    }

    #[test]
    fn discard_moves_to_selection() {
        let mut first = taking(2);
        let saved = first.exit(fixed_now()).unwrap();
        let mut session = ExamSession::new(CourseId::new(1));
        session.enter(Some(saved.clone())).unwrap();
        assert_eq!(session.discard().unwrap(), saved);
        assert_eq!(session.phase(), ExamPhase::Selection);
        assert!(session.resume().is_err());
    }

    #[test]
    fn generation_failure_returns_to_selection() {
        let mut session = ExamSession::new(CourseId::new(1));
        session.enter(None).unwrap();
        let ticket = session.begin_generation().unwrap();
        assert_eq!(
            session.complete_generation(ticket, Err("network down".into())),
            GenerationOutcome::Failed
        );
        assert_eq!(session.phase(), ExamPhase::Selection);
        assert!(session.last_error().unwrap().contains("network down"));

        let ticket = session.begin_generation().unwrap();
        assert_eq!(
            session.complete_generation(ticket, Ok(Vec::new())),
            GenerationOutcome::Failed
        );
        assert_eq!(session.phase(), ExamPhase::Selection);
        assert!(session.questions().is_none());
    }

    #[test]
    fn stale_generation_is_ignored() {
        let mut session = ExamSession::new(CourseId::new(1));
        session.enter(None).unwrap();
        let stale = session.begin_generation().unwrap();
        session.cancel_generation().unwrap();
        let fresh = session.begin_generation().unwrap();

        assert_eq!(
            session.complete_generation(stale, Ok(questions(3))),
            GenerationOutcome::Stale
        );
        assert_eq!(session.phase(), ExamPhase::Generating);
        assert_eq!(
            session.complete_generation(fresh, Ok(questions(3))),
            GenerationOutcome::Started
        );
        assert_eq!(
            session.taking_view().unwrap().remaining_secs,
            3 * SECONDS_PER_QUESTION
        );
        assert_eq!(session.kind(), Some(ExamKind::AiGenerated));

        session.submit(fixed_now()).unwrap();
        assert_eq!(
            session.complete_generation(fresh, Ok(questions(5))),
            GenerationOutcome::Stale
        );
        assert_eq!(session.phase(), ExamPhase::Finished);
    }

    #[test]
    fn review_only_after_finishing() {
        let mut session = taking(2);
        assert!(session.start_review().is_err());
        session.answer_current(0).unwrap();
        session.submit(fixed_now()).unwrap();

        let first = session.start_review().unwrap();
        assert_eq!(first.index, 0);
        assert!(session.review_next().unwrap());
        assert!(!session.review_next().unwrap());
        assert_eq!(session.review_row().unwrap().selected, None);
        session.close_review().unwrap();
        assert_eq!(session.phase(), ExamPhase::Finished);
        session.retake().unwrap();
        assert_eq!(session.phase(), ExamPhase::Selection);
    }

    #[test]
    fn empty_preset_is_rejected() {
        let mut session = ExamSession::new(CourseId::new(1));
        session.enter(None).unwrap();
        assert_eq!(
            session.start_pre_authored(Vec::new(), None).unwrap_err(),
            ExamError::EmptyQuestionSet
        );
        assert_eq!(session.phase(), ExamPhase::Selection);
    }

    #[test]
    fn durations() {
        assert_eq!(default_duration_secs(ExamKind::AiGenerated, 10, None), 600);
        assert_eq!(default_duration_secs(ExamKind::PreAuthored, 3, None), 600);
        assert_eq!(
            default_duration_secs(ExamKind::PreAuthored, 3, Some(90)),
            90
        );
    }
}
