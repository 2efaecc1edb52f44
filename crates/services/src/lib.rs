#![forbid(unsafe_code)]

pub mod access_service;
pub mod admin_service;
pub mod ai;
pub mod app_services;
pub mod auth_service;
pub mod catalog_service;
pub mod chat_service;
pub mod config;
pub mod debounce;
pub mod error;
pub mod exam_controller;
pub mod markdown;
pub mod playback_service;
pub mod seed;
pub mod store;

pub use portal_core::Clock;

pub use access_service::{AccessDecision, AccessService, SponsorVisit, decide_access};
pub use admin_service::{AdminService, BannerDraft, LectureDraft};
pub use app_services::AppServices;
pub use auth_service::AuthService;
pub use catalog_service::{CatalogService, CourseDetail, CourseFilter, CourseSummary};
pub use chat_service::{ChatAssistant, ChatReply};
pub use config::{AiConfig, PortalConfig};
pub use error::{
    AccessError, AdminError, AiError, AppServicesError, AuthError, CatalogError, ConfigError,
    ExamServiceError, PlaybackError,
};
pub use exam_controller::{ExamController, ExamService, ExamView, TakingSnapshot};
pub use playback_service::{CourseProgress, PlaybackService, PlayerSpec, ProgressEvent};
pub use store::{Namespace, PortalState, PortalStore, StoreEvent};
