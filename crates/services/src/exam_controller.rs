//! Exam attempts wired to storage, question generation and autosave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use portal_core::ai::Difficulty;
use portal_core::exam::{
    ExamOutcome, ExamPhase, ExamProgress, ExamResult, ExamSession, GenerationOutcome, Question,
    ResumeOffer, ReviewRow, TickEvent,
};
use portal_core::model::{Course, CourseId, UserId};

use crate::Clock;
use crate::access_service::AccessService;
use crate::ai::{QuizGenerator, topic_for_course};
use crate::auth_service::AuthService;
use crate::debounce::Debouncer;
use crate::error::{AiError, CatalogError, ExamServiceError};
use crate::store::PortalStore;

/// Opens exam attempts for the logged-in learner.
#[derive(Clone)]
pub struct ExamService {
    clock: Clock,
    store: Arc<PortalStore>,
    auth: AuthService,
    access: AccessService,
    quiz: Option<QuizGenerator>,
    autosave_delay: Duration,
}

impl ExamService {
    #[must_use]
    pub fn new(
        clock: Clock,
        store: Arc<PortalStore>,
        auth: AuthService,
        access: AccessService,
        quiz: Option<QuizGenerator>,
        autosave_delay: Duration,
    ) -> Self {
        Self {
            clock,
            store,
            auth,
            access,
            quiz,
            autosave_delay,
        }
    }

    /// Controller for one course, after checking login and access.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Auth` without a session,
    /// `ExamServiceError::Catalog` for an unknown course, or
    /// `ExamServiceError::Locked` when the learner cannot open the course.
    pub async fn open(&self, course_id: CourseId) -> Result<ExamController, ExamServiceError> {
        let user = self.auth.require_user().await?;
        let course = self
            .store
            .course(course_id)
            .await
            .ok_or(CatalogError::CourseNotFound(course_id))?;
        if !self.access.decide(course_id).await?.is_granted() {
            return Err(ExamServiceError::Locked(course_id));
        }
        Ok(ExamController {
            user: user.id,
            course,
            session: Arc::new(Mutex::new(ExamSession::new(course_id))),
            store: Arc::clone(&self.store),
            quiz: self.quiz.clone(),
            clock: self.clock,
            autosave: Debouncer::new(self.autosave_delay),
        })
    }

    /// Finished attempts of the logged-in learner, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Auth` without a session.
    pub async fn results(&self, course_id: Option<CourseId>) -> Result<Vec<ExamResult>, ExamServiceError> {
        let user = self.auth.require_user().await?;
        let mut results: Vec<ExamResult> = self
            .store
            .exam_results(user.id)
            .await
            .into_iter()
            .filter(|r| course_id.is_none_or(|id| r.course_id == id))
            .collect();
        results.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(results)
    }
}

/// Owned snapshot of the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakingSnapshot {
    pub question: Question,
    pub index: usize,
    pub total: usize,
    pub selected: Option<u8>,
    pub answered: usize,
    pub remaining_secs: u32,
}

/// Everything a front-end needs to draw the exam screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamView {
    pub phase: ExamPhase,
    pub last_error: Option<String>,
    pub resume_offer: Option<ResumeOffer>,
    pub taking: Option<TakingSnapshot>,
    pub outcome: Option<ExamOutcome>,
    pub review_row: Option<ReviewRow>,
}

/// One learner's exam screen for one course.
///
/// Answer and navigation changes are saved after the autosave delay; starting
/// and leaving an attempt save immediately. Finishing, by submit or by the
/// timer, records one result and clears the saved attempt.
pub struct ExamController {
    user: UserId,
    course: Course,
    session: Arc<Mutex<ExamSession>>,
    store: Arc<PortalStore>,
    quiz: Option<QuizGenerator>,
    clock: Clock,
    autosave: Debouncer,
}

impl ExamController {
    #[must_use]
    pub fn course(&self) -> &Course {
        &self.course
    }

    #[must_use]
    pub fn has_question_bank(&self) -> bool {
        self.course.has_question_bank()
    }

    /// Enter the exam screen, offering a saved attempt when one exists.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` when the screen was already entered.
    pub async fn enter(&self) -> Result<ExamPhase, ExamServiceError> {
        let saved = self.store.exam_progress(self.user, self.course.id).await;
        if let Some(Err(err)) = saved.as_ref().map(ExamProgress::validate) {
            warn!(course_id = %self.course.id, error = %err, "dropping invalid saved attempt");
            self.store.clear_exam_progress(self.user, self.course.id).await;
        }
        let phase = self.session.lock().await.enter(saved)?;
        debug!(course_id = %self.course.id, %phase, "exam entered");
        Ok(phase)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` unless a saved attempt is on offer.
    pub async fn resume(&self) -> Result<(), ExamServiceError> {
        self.session.lock().await.resume()?;
        info!(course_id = %self.course.id, "exam resumed");
        Ok(())
    }

    /// Throw the saved attempt away.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` unless a saved attempt is on offer.
    pub async fn discard(&self) -> Result<(), ExamServiceError> {
        self.session.lock().await.discard()?;
        self.store.clear_exam_progress(self.user, self.course.id).await;
        info!(course_id = %self.course.id, "saved exam discarded");
        Ok(())
    }

    /// Generate a fresh question set with AI and start it.
    ///
    /// The session lock is released while waiting for the model. A reply that
    /// arrives after the request was cancelled is ignored. Failures return the
    /// session to selection with `last_error` set.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside selection.
    pub async fn start_ai(
        &self,
        topic: Option<&str>,
        difficulty: Difficulty,
    ) -> Result<GenerationOutcome, ExamServiceError> {
        let ticket = self.session.lock().await.begin_generation()?;
        let topic = topic
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or_else(|| topic_for_course(&self.course, None), str::to_string);
        info!(course_id = %self.course.id, %topic, "generating exam questions");

        let result = match &self.quiz {
            Some(quiz) => quiz.generate(&topic, difficulty).await,
            None => Err(AiError::Disabled),
        };

        let mut session = self.session.lock().await;
        let outcome = session.complete_generation(ticket, result.map_err(|e| e.to_string()));
        match outcome {
            GenerationOutcome::Started => {
                self.save_locked(&session).await;
                info!(course_id = %self.course.id, "AI exam started");
            }
            GenerationOutcome::Failed => {
                warn!(course_id = %self.course.id, error = ?session.last_error(), "AI exam generation failed");
            }
            GenerationOutcome::Stale => {
                warn!(course_id = %self.course.id, "ignoring stale AI questions");
            }
        }
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` unless generating.
    pub async fn cancel_generation(&self) -> Result<(), ExamServiceError> {
        self.session.lock().await.cancel_generation()?;
        Ok(())
    }

    /// Start the course's own question bank.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::NoQuestionBank` or `ExamServiceError::Exam`.
    pub async fn start_pre_authored(&self) -> Result<(), ExamServiceError> {
        if !self.course.has_question_bank() {
            return Err(ExamServiceError::NoQuestionBank);
        }
        let mut session = self.session.lock().await;
        session.start_pre_authored(
            self.course.question_bank.clone(),
            self.course.exam_duration_secs,
        )?;
        self.save_locked(&session).await;
        info!(
            course_id = %self.course.id,
            questions = self.course.question_bank.len(),
            "exam started"
        );
        Ok(())
    }

    // ── answering ─────────────────────────────────────────────────────────────

    /// Answer the current question.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt or for a bad option.
    pub async fn select_answer(&self, option: u8) -> Result<(), ExamServiceError> {
        self.session.lock().await.answer_current(option)?;
        self.schedule_autosave();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt or for a bad index/option.
    pub async fn select_answer_at(&self, index: usize, option: u8) -> Result<(), ExamServiceError> {
        self.session.lock().await.select_answer(index, option)?;
        self.schedule_autosave();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt or for a bad index.
    pub async fn clear_answer(&self, index: usize) -> Result<(), ExamServiceError> {
        self.session.lock().await.clear_answer(index)?;
        self.schedule_autosave();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt.
    pub async fn next(&self) -> Result<bool, ExamServiceError> {
        let moved = self.session.lock().await.next()?;
        if moved {
            self.schedule_autosave();
        }
        Ok(moved)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt.
    pub async fn previous(&self) -> Result<bool, ExamServiceError> {
        let moved = self.session.lock().await.previous()?;
        if moved {
            self.schedule_autosave();
        }
        Ok(moved)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt or for a bad index.
    pub async fn go_to(&self, index: usize) -> Result<(), ExamServiceError> {
        self.session.lock().await.go_to(index)?;
        self.schedule_autosave();
        Ok(())
    }

    /// One second of exam time.
    ///
    /// Running ticks refresh the saved remaining time through autosave; the
    /// tick that reaches zero finishes the attempt.
    pub async fn tick(&self) -> TickEvent {
        let mut session = self.session.lock().await;
        let event = session.tick(self.clock.now());
        match &event {
            TickEvent::Running { .. } => self.schedule_autosave_if_idle(),
            TickEvent::Finished(outcome) => self.record_finish(outcome).await,
            TickEvent::Ignored => {}
        }
        event
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt.
    pub async fn submit(&self) -> Result<ExamOutcome, ExamServiceError> {
        let mut session = self.session.lock().await;
        let outcome = session.submit(self.clock.now())?;
        self.record_finish(&outcome).await;
        Ok(outcome)
    }

    /// Save the attempt now and leave the exam screen.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside an attempt.
    pub async fn save_and_exit(&self) -> Result<ExamProgress, ExamServiceError> {
        let mut session = self.session.lock().await;
        self.autosave.cancel();
        let progress = session.exit(self.clock.now())?;
        self.store
            .save_exam_progress(self.user, progress.clone())
            .await;
        info!(
            course_id = %self.course.id,
            time_left_secs = progress.time_left_secs,
            "exam saved for later"
        );
        Ok(progress)
    }

    // ── after finishing ───────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` unless finished.
    pub async fn start_review(&self) -> Result<ReviewRow, ExamServiceError> {
        Ok(self.session.lock().await.start_review()?.clone())
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside review.
    pub async fn review_next(&self) -> Result<bool, ExamServiceError> {
        Ok(self.session.lock().await.review_next()?)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside review.
    pub async fn review_previous(&self) -> Result<bool, ExamServiceError> {
        Ok(self.session.lock().await.review_previous()?)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` outside review.
    pub async fn close_review(&self) -> Result<(), ExamServiceError> {
        self.session.lock().await.close_review()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` unless finished or reviewing.
    pub async fn retake(&self) -> Result<(), ExamServiceError> {
        self.session.lock().await.retake()?;
        Ok(())
    }

    pub async fn view(&self) -> ExamView {
        let session = self.session.lock().await;
        ExamView {
            phase: session.phase(),
            last_error: session.last_error().map(str::to_string),
            resume_offer: session.resume_offer(),
            taking: session.taking_view().map(|view| TakingSnapshot {
                question: view.question.clone(),
                index: view.index,
                total: view.total,
                selected: view.selected,
                answered: view.answered,
                remaining_secs: view.remaining_secs,
            }),
            outcome: session.outcome().cloned(),
            review_row: session.review_row().cloned(),
        }
    }

    /// Whether an autosave is waiting to run.
    #[must_use]
    pub fn autosave_pending(&self) -> bool {
        self.autosave.is_pending()
    }

    // ── persistence ───────────────────────────────────────────────────────────

    async fn save_locked(&self, session: &ExamSession) {
        if let Some(progress) = session.snapshot(self.clock.now()) {
            self.store.save_exam_progress(self.user, progress).await;
        }
    }

    /// Called with the session lock held, so a pending autosave cannot write
    /// the finished attempt back.
    async fn record_finish(&self, outcome: &ExamOutcome) {
        self.autosave.cancel();
        self.store
            .append_exam_result(self.user, outcome.result.clone())
            .await;
        self.store
            .clear_exam_progress(self.user, self.course.id)
            .await;
        info!(
            course_id = %self.course.id,
            score = outcome.result.score,
            total = outcome.result.total_questions,
            reason = ?outcome.reason,
            "exam finished"
        );
    }

    fn autosave_task(&self) -> impl Future<Output = ()> + Send + 'static {
        let session = Arc::clone(&self.session);
        let store = Arc::clone(&self.store);
        let user = self.user;
        let clock = self.clock;
        async move {
            // Hold the session while writing so a finish cannot interleave.
            let session = session.lock().await;
            if let Some(progress) = session.snapshot(clock.now()) {
                debug!(course_id = %progress.course_id, "autosaving exam");
                store.save_exam_progress(user, progress).await;
            }
        }
    }

    fn schedule_autosave(&self) {
        self.autosave.schedule(self.autosave_task());
    }

    fn schedule_autosave_if_idle(&self) {
        self.autosave.schedule_if_idle(self.autosave_task());
    }
}
