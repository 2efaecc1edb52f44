//! Authoritative application state, mirrored to a key-value store.
//!
//! Reads are served from memory. Every mutation is written through to storage
//! before the call returns; a failed write is logged and swallowed, so the
//! in-memory state stays authoritative for the running session.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, watch};
use tracing::{debug, warn};

use portal_core::exam::{ExamProgress, ExamResult};
use portal_core::model::{
    Banner, Course, CourseId, LectureId, Order, PendingVerification, PortalSettings, TempAccess,
    User, UserId, VideoProgress,
};
use storage::keys;
use storage::repository::{KeyValueStore, StorageError, load_json, save_json};

/// One persisted slice of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Users,
    Session,
    Courses,
    Banners,
    Orders,
    Settings,
    ExamProgress { user: UserId, course: CourseId },
    ExamResults { user: UserId },
    VideoProgress { user: UserId },
    TempAccess { user: UserId },
    PendingVerification { user: UserId },
}

/// Change notification sent to subscribers after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreEvent {
    pub revision: u64,
    /// `None` for the initial load.
    pub namespace: Option<Namespace>,
    /// False when the write to storage failed.
    pub persisted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PortalState {
    pub users: Vec<User>,
    pub session: Option<UserId>,
    pub courses: Vec<Course>,
    pub banners: Vec<Banner>,
    pub orders: Vec<Order>,
    pub settings: PortalSettings,
    pub exam_progress: BTreeMap<(UserId, CourseId), ExamProgress>,
    pub exam_results: BTreeMap<UserId, Vec<ExamResult>>,
    pub video_progress: BTreeMap<UserId, Vec<VideoProgress>>,
    pub temp_access: BTreeMap<UserId, Vec<TempAccess>>,
    pub pending_verification: BTreeMap<UserId, PendingVerification>,
}

impl PortalState {
    #[must_use]
    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    #[must_use]
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.iter().find(|u| u.email == email)
    }

    #[must_use]
    pub fn current_user(&self) -> Option<&User> {
        self.session.and_then(|id| self.user(id))
    }

    #[must_use]
    pub fn course(&self, id: CourseId) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }

    pub fn course_mut(&mut self, id: CourseId) -> Option<&mut Course> {
        self.courses.iter_mut().find(|c| c.id == id)
    }

    /// Drop every record owned by a user.
    fn purge_user(&mut self, id: UserId) {
        self.users.retain(|u| u.id != id);
        if self.session == Some(id) {
            self.session = None;
        }
        self.exam_progress.retain(|(user, _), _| *user != id);
        self.exam_results.remove(&id);
        self.video_progress.remove(&id);
        self.temp_access.remove(&id);
        self.pending_verification.remove(&id);
    }
}

pub struct PortalStore {
    kv: Arc<dyn KeyValueStore>,
    state: RwLock<PortalState>,
    events: watch::Sender<StoreEvent>,
}

impl PortalStore {
    /// Load every namespace from storage.
    ///
    /// Unreadable or malformed namespaces are logged and start empty.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let store = kv.as_ref();
        let mut state = PortalState {
            users: load_or_default(store, keys::USERS).await,
            session: load_or_default(store, keys::SESSION).await,
            courses: load_or_default(store, keys::COURSES).await,
            banners: load_or_default(store, keys::BANNERS).await,
            orders: load_or_default(store, keys::ORDERS).await,
            settings: load_or_default(store, keys::SETTINGS).await,
            ..PortalState::default()
        };
        if state.session.is_some() && state.current_user().is_none() {
            warn!("session refers to an unknown user, logging out");
            state.session = None;
        }

        for key in list_keys(store, keys::EXAM_PROGRESS).await {
            let Some(scope) = keys::parse_exam_progress_key(&key) else {
                continue;
            };
            let Some(progress) = load_or_default::<Option<ExamProgress>>(store, &key).await else {
                continue;
            };
            match progress.validate() {
                Ok(()) if progress.course_id == scope.1 => {
                    state.exam_progress.insert(scope, progress);
                }
                _ => warn!(key, "ignoring invalid saved exam attempt"),
            }
        }
        load_user_scoped(store, keys::EXAM_RESULTS, &mut state.exam_results).await;
        load_user_scoped(store, keys::VIDEO_PROGRESS, &mut state.video_progress).await;
        load_user_scoped(store, keys::TEMP_ACCESS, &mut state.temp_access).await;
        load_user_scoped(
            store,
            keys::PENDING_VERIFICATION,
            &mut state.pending_verification,
        )
        .await;

        debug!(
            users = state.users.len(),
            courses = state.courses.len(),
            "portal state loaded"
        );
        let (events, _) = watch::channel(StoreEvent {
            revision: 0,
            namespace: None,
            persisted: true,
        });
        Self {
            kv,
            state: RwLock::new(state),
            events,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Run a read-only closure against the current state.
    pub async fn read<R>(&self, f: impl FnOnce(&PortalState) -> R) -> R {
        let guard = self.state.read().await;
        f(&guard)
    }

    pub async fn snapshot(&self) -> PortalState {
        self.state.read().await.clone()
    }

    /// Mutate state and write the touched namespace through to storage.
    ///
    /// The write happens under the state lock, so storage sees mutations in
    /// the order they were applied.
    pub async fn update<R>(&self, namespace: Namespace, f: impl FnOnce(&mut PortalState) -> R) -> R {
        let mut guard = self.state.write().await;
        let result = f(&mut guard);
        let persisted = match self.persist(&guard, namespace).await {
            Ok(()) => true,
            Err(err) => {
                warn!(?namespace, error = %err, "failed to persist portal state");
                false
            }
        };
        drop(guard);
        self.events.send_modify(|event| {
            event.revision += 1;
            event.namespace = Some(namespace);
            event.persisted = persisted;
        });
        result
    }

    async fn persist(&self, state: &PortalState, namespace: Namespace) -> Result<(), StorageError> {
        let kv = self.kv.as_ref();
        match namespace {
            Namespace::Users => save_json(kv, keys::USERS, &state.users).await,
            Namespace::Session => match state.session {
                Some(id) => save_json(kv, keys::SESSION, &id).await,
                None => kv.remove(keys::SESSION).await.map(|_| ()),
            },
            Namespace::Courses => save_json(kv, keys::COURSES, &state.courses).await,
            Namespace::Banners => save_json(kv, keys::BANNERS, &state.banners).await,
            Namespace::Orders => save_json(kv, keys::ORDERS, &state.orders).await,
            Namespace::Settings => save_json(kv, keys::SETTINGS, &state.settings).await,
            Namespace::ExamProgress { user, course } => {
                let key = keys::exam_progress(user, course);
                put_or_remove(kv, &key, state.exam_progress.get(&(user, course))).await
            }
            Namespace::ExamResults { user } => {
                put_or_remove(kv, &keys::exam_results(user), state.exam_results.get(&user)).await
            }
            Namespace::VideoProgress { user } => {
                let key = keys::video_progress(user);
                put_or_remove(kv, &key, state.video_progress.get(&user)).await
            }
            Namespace::TempAccess { user } => {
                put_or_remove(kv, &keys::temp_access(user), state.temp_access.get(&user)).await
            }
            Namespace::PendingVerification { user } => {
                let key = keys::pending_verification(user);
                put_or_remove(kv, &key, state.pending_verification.get(&user)).await
            }
        }
    }

    // ── users and session ─────────────────────────────────────────────────────

    pub async fn users(&self) -> Vec<User> {
        self.read(|s| s.users.clone()).await
    }

    pub async fn user(&self, id: UserId) -> Option<User> {
        self.read(|s| s.user(id).cloned()).await
    }

    pub async fn current_user(&self) -> Option<User> {
        self.read(|s| s.current_user().cloned()).await
    }

    pub async fn insert_user(&self, user: User) {
        self.update(Namespace::Users, |s| s.users.push(user)).await;
    }

    /// Apply `f` to a user. Returns the updated user, or `None` if unknown.
    pub async fn update_user(&self, id: UserId, f: impl FnOnce(&mut User)) -> Option<User> {
        self.update(Namespace::Users, |s| {
            let user = s.user_mut(id)?;
            f(user);
            Some(user.clone())
        })
        .await
    }

    /// Remove a user and everything stored for them.
    pub async fn delete_user(&self, id: UserId) -> bool {
        let removed = self
            .update(Namespace::Users, |s| {
                let existed = s.user(id).is_some();
                s.purge_user(id);
                existed
            })
            .await;
        if removed {
            for key in keys::user_scoped(id) {
                if let Err(err) = self.kv.remove(&key).await {
                    warn!(key, error = %err, "failed to remove user data");
                }
            }
            for key in list_keys(self.kv.as_ref(), &keys::exam_progress_prefix(id)).await {
                if let Err(err) = self.kv.remove(&key).await {
                    warn!(key, error = %err, "failed to remove saved exam");
                }
            }
            self.update(Namespace::Session, |_| ()).await;
        }
        removed
    }

    pub async fn set_current_user(&self, id: UserId) {
        self.update(Namespace::Session, |s| s.session = Some(id)).await;
    }

    pub async fn clear_session(&self) {
        self.update(Namespace::Session, |s| s.session = None).await;
    }

    // ── catalog ───────────────────────────────────────────────────────────────

    pub async fn courses(&self) -> Vec<Course> {
        self.read(|s| s.courses.clone()).await
    }

    pub async fn course(&self, id: CourseId) -> Option<Course> {
        self.read(|s| s.course(id).cloned()).await
    }

    /// Insert or replace a course by id.
    pub async fn upsert_course(&self, course: Course) {
        self.update(Namespace::Courses, |s| match s.course_mut(course.id) {
            Some(existing) => *existing = course,
            None => s.courses.push(course),
        })
        .await;
    }

    pub async fn delete_course(&self, id: CourseId) -> bool {
        self.update(Namespace::Courses, |s| {
            let before = s.courses.len();
            s.courses.retain(|c| c.id != id);
            s.courses.len() != before
        })
        .await
    }

    pub async fn banners(&self) -> Vec<Banner> {
        self.read(|s| s.banners.clone()).await
    }

    pub async fn upsert_banner(&self, banner: Banner) {
        self.update(Namespace::Banners, |s| {
            match s.banners.iter_mut().find(|b| b.id == banner.id) {
                Some(existing) => *existing = banner,
                None => s.banners.push(banner),
            }
        })
        .await;
    }

    pub async fn delete_banner(&self, id: portal_core::model::BannerId) -> bool {
        self.update(Namespace::Banners, |s| {
            let before = s.banners.len();
            s.banners.retain(|b| b.id != id);
            s.banners.len() != before
        })
        .await
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.read(|s| s.orders.clone()).await
    }

    pub async fn insert_order(&self, order: Order) {
        self.update(Namespace::Orders, |s| s.orders.push(order)).await;
    }

    pub async fn settings(&self) -> PortalSettings {
        self.read(|s| s.settings.clone()).await
    }

    pub async fn save_settings(&self, settings: PortalSettings) {
        self.update(Namespace::Settings, |s| s.settings = settings).await;
    }

    // ── per-user records ──────────────────────────────────────────────────────

    pub async fn exam_progress(&self, user: UserId, course: CourseId) -> Option<ExamProgress> {
        self.read(|s| s.exam_progress.get(&(user, course)).cloned())
            .await
    }

    pub async fn save_exam_progress(&self, user: UserId, progress: ExamProgress) {
        let course = progress.course_id;
        self.update(Namespace::ExamProgress { user, course }, |s| {
            s.exam_progress.insert((user, course), progress);
        })
        .await;
    }

    pub async fn clear_exam_progress(&self, user: UserId, course: CourseId) -> bool {
        self.update(Namespace::ExamProgress { user, course }, |s| {
            s.exam_progress.remove(&(user, course)).is_some()
        })
        .await
    }

    pub async fn exam_results(&self, user: UserId) -> Vec<ExamResult> {
        self.read(|s| s.exam_results.get(&user).cloned().unwrap_or_default())
            .await
    }

    pub async fn append_exam_result(&self, user: UserId, result: ExamResult) {
        self.update(Namespace::ExamResults { user }, |s| {
            s.exam_results.entry(user).or_default().push(result);
        })
        .await;
    }

    pub async fn video_progress(&self, user: UserId) -> Vec<VideoProgress> {
        self.read(|s| s.video_progress.get(&user).cloned().unwrap_or_default())
            .await
    }

    pub async fn lecture_progress(&self, user: UserId, lecture: LectureId) -> Option<VideoProgress> {
        self.read(|s| {
            s.video_progress
                .get(&user)?
                .iter()
                .find(|p| p.lecture_id == lecture)
                .cloned()
        })
        .await
    }

    /// Replace the record for the same lecture, or add it.
    pub async fn save_video_progress(&self, user: UserId, progress: VideoProgress) {
        self.update(Namespace::VideoProgress { user }, |s| {
            let records = s.video_progress.entry(user).or_default();
            match records
                .iter_mut()
                .find(|p| p.lecture_id == progress.lecture_id)
            {
                Some(existing) => *existing = progress,
                None => records.push(progress),
            }
        })
        .await;
    }

    pub async fn temp_access(&self, user: UserId) -> Vec<TempAccess> {
        self.read(|s| s.temp_access.get(&user).cloned().unwrap_or_default())
            .await
    }

    /// Record a grant, replacing any earlier grant for the same course.
    pub async fn grant_temp_access(&self, user: UserId, grant: TempAccess) {
        self.update(Namespace::TempAccess { user }, |s| {
            let grants = s.temp_access.entry(user).or_default();
            grants.retain(|g| g.course_id != grant.course_id);
            grants.push(grant);
        })
        .await;
    }

    pub async fn pending_verification(&self, user: UserId) -> Option<PendingVerification> {
        self.read(|s| s.pending_verification.get(&user).cloned())
            .await
    }

    pub async fn set_pending_verification(&self, user: UserId, marker: PendingVerification) {
        self.update(Namespace::PendingVerification { user }, |s| {
            s.pending_verification.insert(user, marker);
        })
        .await;
    }

    /// Remove and return the pending marker.
    pub async fn take_pending_verification(&self, user: UserId) -> Option<PendingVerification> {
        self.update(Namespace::PendingVerification { user }, |s| {
            s.pending_verification.remove(&user)
        })
        .await
    }
}

async fn load_or_default<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> T {
    match load_json::<T>(store, key).await {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(err) => {
            warn!(key, error = %err, "discarding unreadable stored value");
            T::default()
        }
    }
}

async fn list_keys(store: &dyn KeyValueStore, prefix: &str) -> Vec<String> {
    let prefix = if prefix.ends_with('.') {
        prefix.to_string()
    } else {
        keys::namespace_prefix(prefix)
    };
    store.keys_with_prefix(&prefix).await.unwrap_or_else(|err| {
        warn!(prefix, error = %err, "failed to list stored keys");
        Vec::new()
    })
}

async fn load_user_scoped<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    root: &str,
    into: &mut BTreeMap<UserId, T>,
) {
    for key in list_keys(store, root).await {
        let Some(user) = keys::parse_user_key(root, &key) else {
            continue;
        };
        match load_json::<T>(store, &key).await {
            Ok(Some(value)) => {
                into.insert(user, value);
            }
            Ok(None) => {}
            Err(err) => warn!(key, error = %err, "discarding unreadable stored value"),
        }
    }
}

async fn put_or_remove<T: Serialize + Sync + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: Option<&T>,
) -> Result<(), StorageError> {
    match value {
        Some(value) => save_json(store, key, value).await,
        None => store.remove(key).await.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::model::{CourseAccess, CourseDraft, Role, UserDraft};
    use portal_core::time::fixed_now;
    use storage::repository::InMemoryKeyValueStore;

    fn user(id: u64, email: &str) -> User {
        UserDraft {
            name: "Learner".into(),
            email: email.into(),
            password: "secret123".into(),
        }
        .validate(UserId::new(id), Role::Student, fixed_now())
        .unwrap()
    }

    #[tokio::test]
    async fn mutations_survive_reload() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let store = PortalStore::load(Arc::clone(&kv)).await;
        store.insert_user(user(1, "a@example.com")).await;
        store.set_current_user(UserId::new(1)).await;
        let course = CourseDraft::new("Algebra", CourseAccess::Free)
            .validate(CourseId::new(1), fixed_now())
            .unwrap();
        store.upsert_course(course).await;

        let reloaded = PortalStore::load(kv).await;
        assert_eq!(reloaded.users().await.len(), 1);
        assert_eq!(
            reloaded.current_user().await.map(|u| u.id),
            Some(UserId::new(1))
        );
        assert_eq!(reloaded.courses().await[0].title, "Algebra");
    }

    #[tokio::test]
    async fn subscribers_see_revisions() {
        let store = PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await;
        let mut rx = store.subscribe();
        store.insert_user(user(1, "a@example.com")).await;
        assert!(rx.has_changed().unwrap());
        let event = *rx.borrow_and_update();
        assert_eq!(event.revision, 1);
        assert_eq!(event.namespace, Some(Namespace::Users));
        assert!(event.persisted);
    }

    #[tokio::test]
    async fn quota_failure_keeps_memory_state() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::with_quota(16));
        let store = PortalStore::load(Arc::clone(&kv)).await;
        let rx = store.subscribe();
        store.insert_user(user(1, "a@example.com")).await;

        assert_eq!(store.users().await.len(), 1);
        assert!(!rx.borrow().persisted);
        assert!(kv.get(keys::USERS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_namespace_starts_empty() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        kv.set(keys::USERS, "not json").await.unwrap();
        kv.set(keys::SESSION, "42").await.unwrap();
        let store = PortalStore::load(kv).await;
        assert!(store.users().await.is_empty());
        assert!(store.current_user().await.is_none());
    }

    #[tokio::test]
    async fn deleting_user_removes_their_records() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let store = PortalStore::load(Arc::clone(&kv)).await;
        let id = UserId::new(1);
        store.insert_user(user(1, "a@example.com")).await;
        store
            .grant_temp_access(id, TempAccess::grant(CourseId::new(2), fixed_now(), 24))
            .await;
        assert!(kv.get(&keys::temp_access(id)).await.unwrap().is_some());

        assert!(store.delete_user(id).await);
        assert!(store.temp_access(id).await.is_empty());
        assert!(kv.get(&keys::temp_access(id)).await.unwrap().is_none());
        assert!(!store.delete_user(id).await);
    }
}
