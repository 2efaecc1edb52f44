use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use portal_core::model::{
    Course, CourseAccess, CourseId, Order, OrderId, OrderStatus, PendingVerification, TempAccess,
    User,
};

use crate::Clock;
use crate::error::{AccessError, AuthError};
use crate::store::{Namespace, PortalStore};

/// Minimum time on the sponsor page before verification succeeds.
pub const MIN_VERIFICATION_SECS: i64 = 10;
/// Pending markers older than this are discarded.
pub const VERIFICATION_EXPIRY_MINS: i64 = 30;

/// Why a learner may, or may not, open a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Free,
    Admin,
    Purchased,
    KeyUnlocked,
    TempAccess { expires_at: DateTime<Utc> },
    Locked,
}

impl AccessDecision {
    #[must_use]
    pub fn is_granted(self) -> bool {
        !matches!(self, AccessDecision::Locked)
    }
}

/// Pure access rule.
///
/// Free courses are open to everyone, including anonymous visitors. Everything
/// else needs an account with a purchase, a key unlock, an active temporary
/// grant, or the admin role.
#[must_use]
pub fn decide_access(
    user: Option<&User>,
    course: &Course,
    grants: &[TempAccess],
    now: DateTime<Utc>,
) -> AccessDecision {
    if course.access.is_free() {
        return AccessDecision::Free;
    }
    let Some(user) = user else {
        return AccessDecision::Locked;
    };
    if user.is_admin() {
        return AccessDecision::Admin;
    }
    if user.purchased_courses.contains(&course.id) {
        return AccessDecision::Purchased;
    }
    if user.unlocked_courses.contains(&course.id) {
        return AccessDecision::KeyUnlocked;
    }
    grants
        .iter()
        .filter(|g| g.course_id == course.id && g.is_active(now))
        .map(|g| g.expires_at)
        .max()
        .map_or(AccessDecision::Locked, |expires_at| {
            AccessDecision::TempAccess { expires_at }
        })
}

/// Link to open and token identifying a sponsor visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorVisit {
    pub course_id: CourseId,
    pub link: String,
    pub token: Uuid,
}

/// Course unlocking: keys, purchases and sponsored temporary access.
#[derive(Clone)]
pub struct AccessService {
    clock: Clock,
    store: Arc<PortalStore>,
}

impl AccessService {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<PortalStore>) -> Self {
        Self { clock, store }
    }

    /// Access decision for the logged-in user, or an anonymous visitor.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::CourseNotFound` for an unknown course.
    pub async fn decide(&self, course_id: CourseId) -> Result<AccessDecision, AccessError> {
        let now = self.clock.now();
        self.store
            .read(|s| {
                let course = s.course(course_id).ok_or(AccessError::CourseNotFound(course_id))?;
                let user = s.current_user();
                let grants = user
                    .and_then(|u| s.temp_access.get(&u.id))
                    .map_or(&[][..], Vec::as_slice);
                Ok(decide_access(user, course, grants, now))
            })
            .await
    }

    /// Permanently unlock a paid course with its shared key.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::InvalidKey` when the key does not match, or
    /// `AccessError::KeyNotAccepted` for courses without a key.
    pub async fn redeem_access_key(&self, course_id: CourseId, key: &str) -> Result<(), AccessError> {
        let user = self.current_user().await?;
        let course = self.course(course_id).await?;
        let expected = match &course.access {
            CourseAccess::Paid {
                access_key: Some(expected),
            } => expected,
            _ => return Err(AccessError::KeyNotAccepted),
        };
        if key.trim() != expected {
            warn!(user_id = %user.id, course_id = %course_id, "rejected access key");
            return Err(AccessError::InvalidKey);
        }
        self.store
            .update_user(user.id, |u| u.add_unlock(course_id))
            .await
            .ok_or(AuthError::NotLoggedIn)?;
        info!(user_id = %user.id, course_id = %course_id, "course unlocked with key");
        Ok(())
    }

    /// Record a completed order and add the course to the user's purchases.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotPurchasable` for free or sponsored courses and
    /// `AccessError::AlreadyOwned` when the user already has the course.
    pub async fn purchase(&self, course_id: CourseId) -> Result<Order, AccessError> {
        let user = self.current_user().await?;
        let course = self.course(course_id).await?;
        if !matches!(course.access, CourseAccess::Paid { .. }) {
            return Err(AccessError::NotPurchasable);
        }
        if user.has_course(course_id) {
            return Err(AccessError::AlreadyOwned);
        }
        let now = self.clock.now();
        let order = self
            .store
            .update(Namespace::Orders, |s| {
                let order = Order {
                    id: OrderId::next_after(s.orders.iter().map(|o| &o.id)),
                    user_id: user.id,
                    course_id,
                    amount_cents: course.price_cents,
                    status: OrderStatus::Completed,
                    created_at: now,
                };
                s.orders.push(order.clone());
                order
            })
            .await;
        self.store
            .update_user(user.id, |u| u.add_purchase(course_id))
            .await
            .ok_or(AuthError::NotLoggedIn)?;
        info!(user_id = %user.id, course_id = %course_id, order_id = %order.id, "course purchased");
        Ok(order)
    }

    /// Start a sponsor visit. The caller opens the returned link.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotSponsored` or `AccessError::NoSponsorLink`.
    pub async fn begin_sponsor_verification(
        &self,
        course_id: CourseId,
    ) -> Result<SponsorVisit, AccessError> {
        let user = self.current_user().await?;
        let course = self.course(course_id).await?;
        if course.access != CourseAccess::Sponsored {
            return Err(AccessError::NotSponsored);
        }
        let link = self
            .store
            .settings()
            .await
            .sponsor_link()
            .map(str::to_string)
            .ok_or(AccessError::NoSponsorLink)?;
        let marker = PendingVerification::new(course_id, self.clock.now());
        let token = marker.token;
        self.store.set_pending_verification(user.id, marker).await;
        info!(user_id = %user.id, course_id = %course_id, "sponsor verification started");
        Ok(SponsorVisit {
            course_id,
            link,
            token,
        })
    }

    /// Finish a sponsor visit and grant temporary access.
    ///
    /// Too early keeps the marker so the learner can retry; an expired marker
    /// is removed.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NoPendingVerification`,
    /// `AccessError::VerificationTooEarly` or `AccessError::VerificationExpired`.
    pub async fn complete_sponsor_verification(&self) -> Result<TempAccess, AccessError> {
        let user = self.current_user().await?;
        let now = self.clock.now();
        let marker = self
            .store
            .pending_verification(user.id)
            .await
            .ok_or(AccessError::NoPendingVerification)?;
        let elapsed = marker.elapsed(now);
        if elapsed > Duration::minutes(VERIFICATION_EXPIRY_MINS) {
            self.store.take_pending_verification(user.id).await;
            warn!(user_id = %user.id, "sponsor verification expired");
            return Err(AccessError::VerificationExpired);
        }
        if elapsed < Duration::seconds(MIN_VERIFICATION_SECS) {
            return Err(AccessError::VerificationTooEarly {
                remaining_secs: MIN_VERIFICATION_SECS - elapsed.num_seconds(),
            });
        }
        self.store.take_pending_verification(user.id).await;
        let hours = self.store.settings().await.temp_access_hours();
        let grant = TempAccess::grant(marker.course_id, now, hours);
        self.store.grant_temp_access(user.id, grant.clone()).await;
        info!(
            user_id = %user.id,
            course_id = %marker.course_id,
            hours,
            "temporary access granted"
        );
        Ok(grant)
    }

    async fn current_user(&self) -> Result<User, AccessError> {
        Ok(self
            .store
            .current_user()
            .await
            .ok_or(AuthError::NotLoggedIn)?)
    }

    async fn course(&self, course_id: CourseId) -> Result<Course, AccessError> {
        self.store
            .course(course_id)
            .await
            .ok_or(AccessError::CourseNotFound(course_id))
    }
}
