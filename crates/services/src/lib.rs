#![forbid(unsafe_code)]

pub mod autosave;
pub mod config;
pub mod error;
pub mod learning_session;
pub mod quiz_service;
pub mod sidebar;

pub use course_core::Clock;

pub use autosave::{AutosaveService, WriteDriver, WriteStats};
pub use config::SyncConfig;
pub use error::{LoadError, NavigationError, QuizServiceError, SessionError};
pub use learning_session::LearningSession;
pub use quiz_service::{QuizOutcome, QuizSession, SaveChannel, StartOutcome};
pub use sidebar::{Sidebar, SidebarChapter, SidebarLesson};
