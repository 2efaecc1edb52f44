use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use portal_core::ai::Difficulty;
use portal_core::exam::{ExamPhase, FinishReason, GenerationOutcome, Question, TickEvent};
use portal_core::model::{CourseAccess, CourseDraft, CourseId, QuestionId, UserDraft};
use portal_core::time::{fixed_clock, fixed_now};
use services::access_service::AccessService;
use services::ai::{GenerationRequest, QuizGenerator, TextGenerator};
use services::auth_service::AuthService;
use services::error::{AiError, ExamServiceError};
use services::exam_controller::ExamService;
use services::store::PortalStore;
use storage::repository::InMemoryKeyValueStore;

const COURSE: CourseId = CourseId::new(10);

struct Harness {
    store: Arc<PortalStore>,
    auth: AuthService,
    exams: ExamService,
}

fn question_bank(count: u64) -> Vec<Question> {
    (1..=count)
        .map(|id| {
            Question::new(
                QuestionId::new(id),
                format!("Question {id}"),
                vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_for(id),
            )
            .unwrap()
        })
        .collect()
}

fn correct_for(id: u64) -> u8 {
    (id % 4) as u8
}

async fn harness(quiz: Option<Arc<dyn TextGenerator>>, exam_duration_secs: Option<u32>) -> Harness {
    let clock = fixed_clock();
    let store = Arc::new(PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await);
    let mut draft = CourseDraft::new("Exam practice", CourseAccess::Free);
    draft.question_bank = question_bank(10);
    draft.exam_duration_secs = exam_duration_secs;
    store
        .upsert_course(draft.validate(COURSE, fixed_now()).unwrap())
        .await;

    let auth = AuthService::new(clock, Arc::clone(&store));
    auth.sign_up(UserDraft {
        name: "Learner".into(),
        email: "learner@example.com".into(),
        password: "secret123".into(),
    })
    .await
    .unwrap();
    let access = AccessService::new(clock, Arc::clone(&store));
    let exams = ExamService::new(
        clock,
        Arc::clone(&store),
        auth.clone(),
        access,
        quiz.map(|generator| QuizGenerator::new(generator, 2)),
        Duration::from_secs(2),
    );
    Harness { store, auth, exams }
}

const TWO_QUESTIONS: &str = r#"[
    {"id": 1, "question": "Q1", "options": ["a", "b", "c", "d"], "correctAnswer": 0},
    {"id": 2, "question": "Q2", "options": ["a", "b", "c", "d"], "correctAnswer": "B"}
]"#;

/// Replies once `release` is notified, or fails when `reply` is `None`.
struct Gated {
    release: Notify,
    gated: bool,
    reply: Option<&'static str>,
}

impl Gated {
    fn open(reply: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            release: Notify::new(),
            gated: false,
            reply,
        })
    }

    fn closed(reply: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            release: Notify::new(),
            gated: true,
            reply,
        })
    }
}

#[async_trait]
impl TextGenerator for Gated {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, AiError> {
        if self.gated {
            self.release.notified().await;
        }
        self.reply
            .map(str::to_string)
            .ok_or(AiError::EmptyResponse)
    }
}

#[tokio::test]
async fn seven_of_ten_is_recorded_once() {
    let h = harness(None, None).await;
    let exam = h.exams.open(COURSE).await.unwrap();
    assert_eq!(exam.enter().await.unwrap(), ExamPhase::Selection);
    exam.start_pre_authored().await.unwrap();

    for id in 1..=10_u64 {
        let correct = correct_for(id);
        let option = if id <= 7 { correct } else { (correct + 1) % 4 };
        exam.select_answer(option).await.unwrap();
        exam.next().await.unwrap();
    }
    let outcome = exam.submit().await.unwrap();
    assert_eq!(outcome.result.score, 7);
    assert_eq!(outcome.result.total_questions, 10);
    assert_eq!(outcome.result.percentage(), 70);
    assert_eq!(outcome.reason, FinishReason::Submitted);
    assert!(!outcome.result.is_ai_generated);

    let results = h.exams.results(Some(COURSE)).await.unwrap();
    assert_eq!(results.len(), 1);
    let user = h.auth.require_user().await.unwrap();
    assert!(h.store.exam_progress(user.id, COURSE).await.is_none());

    let row = exam.start_review().await.unwrap();
    assert_eq!(row.index, 0);
    assert!(row.is_correct);
    assert!(exam.submit().await.is_err());
    assert_eq!(h.exams.results(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn saved_attempt_resumes_verbatim() {
    let h = harness(None, Some(900)).await;
    let exam = h.exams.open(COURSE).await.unwrap();
    exam.enter().await.unwrap();
    exam.start_pre_authored().await.unwrap();
    exam.select_answer_at(0, 1).await.unwrap();
    exam.select_answer_at(3, 2).await.unwrap();
    exam.select_answer_at(5, 0).await.unwrap();
    exam.go_to(4).await.unwrap();
    for _ in 0..5 {
        exam.tick().await;
    }
    let saved = exam.save_and_exit().await.unwrap();
    assert_eq!(saved.time_left_secs, 895);
    assert_eq!(exam.view().await.phase, ExamPhase::Idle);

    let again = h.exams.open(COURSE).await.unwrap();
    assert_eq!(again.enter().await.unwrap(), ExamPhase::Verifying);
    let offer = again.view().await.resume_offer.unwrap();
    assert_eq!(offer.question_count, 10);
    assert_eq!(offer.answered, 3);
    assert_eq!(offer.time_left_secs, 895);

    again.resume().await.unwrap();
    let taking = again.view().await.taking.unwrap();
    assert_eq!(taking.index, 4);
    assert_eq!(taking.answered, 3);
    assert_eq!(taking.remaining_secs, 895);
    again.go_to(3).await.unwrap();
    assert_eq!(again.view().await.taking.unwrap().selected, Some(2));
}

#[tokio::test]
async fn discarding_clears_the_saved_attempt() {
    let h = harness(None, None).await;
    let exam = h.exams.open(COURSE).await.unwrap();
    exam.enter().await.unwrap();
    exam.start_pre_authored().await.unwrap();
    exam.save_and_exit().await.unwrap();

    let again = h.exams.open(COURSE).await.unwrap();
    again.enter().await.unwrap();
    again.discard().await.unwrap();
    assert_eq!(again.view().await.phase, ExamPhase::Selection);
    let user = h.auth.require_user().await.unwrap();
    assert!(h.store.exam_progress(user.id, COURSE).await.is_none());
}

#[tokio::test]
async fn generated_exam_starts_and_is_saved() {
    let h = harness(Some(Gated::open(Some(TWO_QUESTIONS))), None).await;
    let exam = h.exams.open(COURSE).await.unwrap();
    exam.enter().await.unwrap();
    let outcome = exam.start_ai(Some("fractions"), Difficulty::Easy).await.unwrap();
    assert_eq!(outcome, GenerationOutcome::Started);

    let taking = exam.view().await.taking.unwrap();
    assert_eq!(taking.total, 2);
    assert_eq!(taking.remaining_secs, 120);

    let user = h.auth.require_user().await.unwrap();
    let saved = h.store.exam_progress(user.id, COURSE).await.unwrap();
    assert!(saved.is_ai_generated);

    exam.select_answer(1).await.unwrap();
    let result = exam.submit().await.unwrap().result;
    assert_eq!(result.score, 0);
    assert!(result.is_ai_generated);
}

#[tokio::test]
async fn generation_failure_returns_to_selection() {
    let h = harness(Some(Gated::open(None)), None).await;
    let exam = h.exams.open(COURSE).await.unwrap();
    exam.enter().await.unwrap();
    let outcome = exam.start_ai(None, Difficulty::Medium).await.unwrap();
    assert_eq!(outcome, GenerationOutcome::Failed);

    let view = exam.view().await;
    assert_eq!(view.phase, ExamPhase::Selection);
    assert!(view.last_error.is_some());

    exam.start_pre_authored().await.unwrap();
    assert!(exam.view().await.last_error.is_none());
}

#[tokio::test]
async fn missing_generator_fails_gracefully() {
    let h = harness(None, None).await;
    let exam = h.exams.open(COURSE).await.unwrap();
    exam.enter().await.unwrap();
    let outcome = exam.start_ai(None, Difficulty::Hard).await.unwrap();
    assert_eq!(outcome, GenerationOutcome::Failed);
    assert_eq!(exam.view().await.phase, ExamPhase::Selection);
}

#[tokio::test]
async fn cancelled_generation_ignores_late_reply() {
    let gate = Gated::closed(Some(TWO_QUESTIONS));
    let h = harness(Some(gate.clone()), None).await;
    let exam = Arc::new(h.exams.open(COURSE).await.unwrap());
    exam.enter().await.unwrap();

    let pending = {
        let exam = Arc::clone(&exam);
        tokio::spawn(async move { exam.start_ai(None, Difficulty::Medium).await })
    };
    while exam.view().await.phase != ExamPhase::Generating {
        tokio::task::yield_now().await;
    }
    exam.cancel_generation().await.unwrap();
    gate.release.notify_one();

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, GenerationOutcome::Stale);
    assert_eq!(exam.view().await.phase, ExamPhase::Selection);
    let user = h.auth.require_user().await.unwrap();
    assert!(h.store.exam_progress(user.id, COURSE).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn answers_are_autosaved_after_the_delay() {
    let h = harness(None, None).await;
    let user = h.auth.require_user().await.unwrap();
    let exam = h.exams.open(COURSE).await.unwrap();
    exam.enter().await.unwrap();
    exam.start_pre_authored().await.unwrap();
    assert_eq!(
        h.store.exam_progress(user.id, COURSE).await.unwrap().answered_count(),
        0
    );

    exam.select_answer(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    exam.next().await.unwrap();
    exam.select_answer(3).await.unwrap();
    assert!(exam.autosave_pending());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        h.store.exam_progress(user.id, COURSE).await.unwrap().answered_count(),
        0
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    let saved = h.store.exam_progress(user.id, COURSE).await.unwrap();
    assert_eq!(saved.answered_count(), 2);
    assert_eq!(saved.current_index, 1);
    assert!(!exam.autosave_pending());
}

#[tokio::test(start_paused = true)]
async fn timer_expiry_finishes_exactly_once() {
    let h = harness(None, Some(3)).await;
    let user = h.auth.require_user().await.unwrap();
    let exam = h.exams.open(COURSE).await.unwrap();
    exam.enter().await.unwrap();
    exam.start_pre_authored().await.unwrap();
    exam.select_answer(correct_for(1)).await.unwrap();

    assert_eq!(exam.tick().await, TickEvent::Running { remaining_secs: 2 });
    assert_eq!(exam.tick().await, TickEvent::Running { remaining_secs: 1 });
    let TickEvent::Finished(outcome) = exam.tick().await else {
        panic!("third tick should finish the exam");
    };
    assert_eq!(outcome.reason, FinishReason::TimeExpired);
    assert_eq!(outcome.result.score, 1);
    assert_eq!(outcome.unanswered(), 9);
    assert_eq!(exam.tick().await, TickEvent::Ignored);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.store.exam_results(user.id).await.len(), 1);
    assert!(h.store.exam_progress(user.id, COURSE).await.is_none());
}

#[tokio::test]
async fn locked_courses_cannot_open_exams() {
    let h = harness(None, None).await;
    let sponsored = CourseId::new(11);
    let mut draft = CourseDraft::new("Sponsored practice", CourseAccess::Sponsored);
    draft.question_bank = question_bank(3);
    h.store
        .upsert_course(draft.validate(sponsored, fixed_now()).unwrap())
        .await;
    h.auth
        .sign_up(UserDraft {
            name: "Student".into(),
            email: "student@example.com".into(),
            password: "secret123".into(),
        })
        .await
        .unwrap();
    assert!(matches!(
        h.exams.open(sponsored).await,
        Err(ExamServiceError::Locked(id)) if id == sponsored
    ));

    h.auth.log_out().await;
    assert!(matches!(
        h.exams.open(COURSE).await,
        Err(ExamServiceError::Auth(_))
    ));
}
